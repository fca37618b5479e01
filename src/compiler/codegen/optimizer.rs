//! Peephole optimisation over a method's instruction list.
//!
//! Runs after control-flow reconstruction and never alters observable
//! behaviour: side effects keep their order, potentially trapping operations
//! (integer division, calls, loads) are never folded away, and the stack
//! height at every structured-control boundary is preserved.
//!
//! Passes, applied to a fixed point with a three-round cap:
//! 1. constant folding of binary operations on two constants
//! 2. constant folding of unary operations
//! 3. store-then-load fusion into `local.tee`
//! 4. dead-store demotion: a store overwritten before any read degrades the
//!    first store to `drop` (the pushed value may have come from a call, so
//!    elimination stops at demotion)

use crate::compiler::codegen::instructions::{
    BlockOp, ConstValue, ConvertOp, LocalOp, NumericOp, WasmInstruction, WasmOp,
};
use crate::compiler::codegen::value_types::ValueType;

const MAX_PASSES: usize = 3;

pub fn optimize(instructions: Vec<WasmInstruction>) -> Vec<WasmInstruction> {
    let mut result = instructions;
    for _ in 0..MAX_PASSES {
        let before = result.len();
        result = fold_binary_pass(result);
        result = fold_unary_pass(result);
        result = tee_fusion_pass(result);
        result = dead_store_pass(result);
        if result.len() == before {
            break;
        }
    }
    result
}

fn as_const(instr: &WasmInstruction) -> Option<ConstValue> {
    match instr.op {
        WasmOp::Const(value) => Some(value),
        _ => None,
    }
}

/// `const a; const b; binop` with a foldable operator becomes `const (a op b)`.
fn fold_binary_pass(instructions: Vec<WasmInstruction>) -> Vec<WasmInstruction> {
    let mut result: Vec<WasmInstruction> = Vec::with_capacity(instructions.len());
    for instr in instructions {
        if let WasmOp::Numeric { op, ty } = instr.op {
            if result.len() >= 2 {
                let b = as_const(&result[result.len() - 1]);
                let a = as_const(&result[result.len() - 2]);
                if let (Some(a), Some(b)) = (a, b) {
                    if let Some(folded) = fold_binary(op, ty, a, b) {
                        result.pop();
                        let first = result.pop().unwrap();
                        result.push(WasmInstruction::new(
                            WasmOp::Const(folded),
                            first.byte_offset,
                            first.source_line,
                        ));
                        continue;
                    }
                }
            }
        }
        result.push(instr);
    }
    result
}

/// `const x; unary_op` with a foldable operator becomes `const (op x)`.
fn fold_unary_pass(instructions: Vec<WasmInstruction>) -> Vec<WasmInstruction> {
    let mut result: Vec<WasmInstruction> = Vec::with_capacity(instructions.len());
    for instr in instructions {
        let folded = match &instr.op {
            WasmOp::Numeric { op, ty } => result
                .last()
                .and_then(as_const)
                .and_then(|value| fold_unary(*op, *ty, value)),
            WasmOp::Convert(op) => result
                .last()
                .and_then(as_const)
                .and_then(|value| fold_convert(*op, value)),
            _ => None,
        };
        match folded {
            Some(value) => {
                let first = result.pop().unwrap();
                result.push(WasmInstruction::new(
                    WasmOp::Const(value),
                    first.byte_offset,
                    first.source_line,
                ));
            }
            None => result.push(instr),
        }
    }
    result
}

/// Adjacent `local.set k; local.get k` is exactly `local.tee k`.
fn tee_fusion_pass(instructions: Vec<WasmInstruction>) -> Vec<WasmInstruction> {
    let mut result: Vec<WasmInstruction> = Vec::with_capacity(instructions.len());
    for instr in instructions {
        if let WasmOp::Local {
            op: LocalOp::Get,
            index: get_index,
        } = instr.op
        {
            if let Some(WasmInstruction {
                op:
                    WasmOp::Local {
                        op: LocalOp::Set,
                        index: set_index,
                    },
                ..
            }) = result.last()
            {
                if *set_index == get_index {
                    let set = result.pop().unwrap();
                    result.push(WasmInstruction::new(
                        WasmOp::Local {
                            op: LocalOp::Tee,
                            index: get_index,
                        },
                        set.byte_offset,
                        set.source_line,
                    ));
                    continue;
                }
            }
        }
        result.push(instr);
    }
    result
}

/// `local.set k` overwritten by another `local.set k` before any read of k
/// in the same straight-line segment degrades to `drop`.
fn dead_store_pass(instructions: Vec<WasmInstruction>) -> Vec<WasmInstruction> {
    let mut result = instructions;
    for i in 0..result.len() {
        let WasmOp::Local {
            op: LocalOp::Set,
            index,
        } = result[i].op
        else {
            continue;
        };
        let mut overwritten = false;
        for later in result.iter().skip(i + 1) {
            match &later.op {
                // Control flow may expose the stored value elsewhere
                WasmOp::Block(_) | WasmOp::JumpPlaceholder(_) => break,
                WasmOp::Local {
                    op: LocalOp::Get | LocalOp::Tee,
                    index: other,
                } if *other == index => break,
                WasmOp::Local {
                    op: LocalOp::Set,
                    index: other,
                } if *other == index => {
                    overwritten = true;
                    break;
                }
                _ => {}
            }
        }
        if overwritten {
            result[i].op = WasmOp::Block(BlockOp::Drop);
        }
    }
    result
}

/// Folds where compile-time evaluation matches the target exactly. Integer
/// division and remainder stay unfolded: they can trap.
fn fold_binary(op: NumericOp, ty: ValueType, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    match (ty, a, b) {
        (ValueType::I32, ConstValue::I32(a), ConstValue::I32(b)) => {
            let value = match op {
                NumericOp::Add => a.wrapping_add(b),
                NumericOp::Sub => a.wrapping_sub(b),
                NumericOp::Mul => a.wrapping_mul(b),
                NumericOp::And => a & b,
                NumericOp::Or => a | b,
                NumericOp::Xor => a ^ b,
                NumericOp::Shl => a.wrapping_shl(b as u32 & 31),
                NumericOp::ShrS => a.wrapping_shr(b as u32 & 31),
                NumericOp::ShrU => ((a as u32).wrapping_shr(b as u32 & 31)) as i32,
                _ => return None,
            };
            Some(ConstValue::I32(value))
        }
        (ValueType::I64, ConstValue::I64(a), ConstValue::I64(b)) => {
            let value = match op {
                NumericOp::Add => a.wrapping_add(b),
                NumericOp::Sub => a.wrapping_sub(b),
                NumericOp::Mul => a.wrapping_mul(b),
                NumericOp::And => a & b,
                NumericOp::Or => a | b,
                NumericOp::Xor => a ^ b,
                NumericOp::Shl => a.wrapping_shl(b as u32 & 63),
                NumericOp::ShrS => a.wrapping_shr(b as u32 & 63),
                NumericOp::ShrU => ((a as u64).wrapping_shr(b as u32 & 63)) as i64,
                _ => return None,
            };
            Some(ConstValue::I64(value))
        }
        (ValueType::F32, ConstValue::F32(a), ConstValue::F32(b)) => {
            let value = match op {
                NumericOp::Add => a + b,
                NumericOp::Sub => a - b,
                NumericOp::Mul => a * b,
                NumericOp::Div => a / b,
                _ => return None,
            };
            Some(ConstValue::F32(value))
        }
        (ValueType::F64, ConstValue::F64(a), ConstValue::F64(b)) => {
            let value = match op {
                NumericOp::Add => a + b,
                NumericOp::Sub => a - b,
                NumericOp::Mul => a * b,
                NumericOp::Div => a / b,
                _ => return None,
            };
            Some(ConstValue::F64(value))
        }
        _ => None,
    }
}

fn fold_unary(op: NumericOp, ty: ValueType, value: ConstValue) -> Option<ConstValue> {
    match (op, ty, value) {
        (NumericOp::Eqz, ValueType::I32, ConstValue::I32(v)) => {
            Some(ConstValue::I32((v == 0) as i32))
        }
        (NumericOp::Eqz, ValueType::I64, ConstValue::I64(v)) => {
            Some(ConstValue::I32((v == 0) as i32))
        }
        (NumericOp::Neg, ValueType::F32, ConstValue::F32(v)) => Some(ConstValue::F32(-v)),
        (NumericOp::Neg, ValueType::F64, ConstValue::F64(v)) => Some(ConstValue::F64(-v)),
        (NumericOp::Abs, ValueType::F32, ConstValue::F32(v)) => Some(ConstValue::F32(v.abs())),
        (NumericOp::Abs, ValueType::F64, ConstValue::F64(v)) => Some(ConstValue::F64(v.abs())),
        _ => None,
    }
}

fn fold_convert(op: ConvertOp, value: ConstValue) -> Option<ConstValue> {
    match (op, value) {
        (ConvertOp::I32WrapI64, ConstValue::I64(v)) => Some(ConstValue::I32(v as i32)),
        (ConvertOp::I64ExtendI32S, ConstValue::I32(v)) => Some(ConstValue::I64(i64::from(v))),
        (ConvertOp::I32Extend8S, ConstValue::I32(v)) => Some(ConstValue::I32(v as i8 as i32)),
        (ConvertOp::I32Extend16S, ConstValue::I32(v)) => Some(ConstValue::I32(v as i16 as i32)),
        (ConvertOp::I64Extend8S, ConstValue::I64(v)) => Some(ConstValue::I64(v as i8 as i64)),
        (ConvertOp::I64Extend16S, ConstValue::I64(v)) => Some(ConstValue::I64(v as i16 as i64)),
        (ConvertOp::I64Extend32S, ConstValue::I64(v)) => Some(ConstValue::I64(v as i32 as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: WasmOp) -> WasmInstruction {
        WasmInstruction::new(op, 0, 0)
    }

    fn numeric(op: NumericOp, ty: ValueType) -> WasmInstruction {
        instr(WasmOp::Numeric { op, ty })
    }

    #[test]
    fn folds_integer_addition() {
        let out = optimize(vec![
            instr(WasmOp::Const(ConstValue::I32(500))),
            instr(WasmOp::Const(ConstValue::I32(100))),
            numeric(NumericOp::Add, ValueType::I32),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].op, WasmOp::Const(ConstValue::I32(600)));
    }

    #[test]
    fn fuses_store_then_load_into_tee() {
        let out = optimize(vec![
            instr(WasmOp::Const(ConstValue::I32(500))),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 0,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 0,
            }),
        ]);
        assert_eq!(
            out.iter().map(|i| &i.op).collect::<Vec<_>>(),
            vec![
                &WasmOp::Const(ConstValue::I32(500)),
                &WasmOp::Local {
                    op: LocalOp::Tee,
                    index: 0
                },
            ]
        );
    }

    #[test]
    fn no_const_const_add_remains_after_cascading_folds() {
        let out = optimize(vec![
            instr(WasmOp::Const(ConstValue::I32(1))),
            instr(WasmOp::Const(ConstValue::I32(2))),
            numeric(NumericOp::Add, ValueType::I32),
            instr(WasmOp::Const(ConstValue::I32(3))),
            numeric(NumericOp::Add, ValueType::I32),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].op, WasmOp::Const(ConstValue::I32(6)));
    }

    #[test]
    fn trapping_division_is_never_folded() {
        let input = vec![
            instr(WasmOp::Const(ConstValue::I32(10))),
            instr(WasmOp::Const(ConstValue::I32(0))),
            numeric(NumericOp::DivS, ValueType::I32),
        ];
        let out = optimize(input.clone());
        assert_eq!(out, input);
    }

    #[test]
    fn dead_store_degrades_to_drop_only_without_reads() {
        let out = optimize(vec![
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 1,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 0,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 1,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 0,
            }),
        ]);
        assert_eq!(out[1].op, WasmOp::Block(BlockOp::Drop));
        assert!(matches!(
            out[3].op,
            WasmOp::Local {
                op: LocalOp::Set,
                index: 0
            }
        ));

        // A read in between keeps the store
        let kept = optimize(vec![
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 1,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 0,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 0,
            }),
            instr(WasmOp::Block(BlockOp::Drop)),
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 1,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 0,
            }),
        ]);
        assert!(matches!(
            kept[1].op,
            WasmOp::Local {
                op: LocalOp::Set,
                index: 0
            }
        ));
    }

    #[test]
    fn stores_across_control_boundaries_are_kept() {
        let input = vec![
            instr(WasmOp::Const(ConstValue::I32(1))),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 0,
            }),
            instr(WasmOp::Block(BlockOp::Block {
                result: ValueType::Void,
            })),
            instr(WasmOp::Const(ConstValue::I32(2))),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 0,
            }),
            instr(WasmOp::Block(BlockOp::End)),
        ];
        let out = optimize(input.clone());
        assert_eq!(out, input);
    }

    #[test]
    fn optimisation_is_idempotent() {
        let once = optimize(vec![
            instr(WasmOp::Const(ConstValue::I32(7))),
            instr(WasmOp::Const(ConstValue::I32(8))),
            numeric(NumericOp::Mul, ValueType::I32),
            instr(WasmOp::Local {
                op: LocalOp::Set,
                index: 2,
            }),
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 2,
            }),
        ]);
        let twice = optimize(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn folds_unary_and_conversions() {
        let out = optimize(vec![
            instr(WasmOp::Const(ConstValue::I32(0))),
            numeric(NumericOp::Eqz, ValueType::I32),
        ]);
        assert_eq!(out[0].op, WasmOp::Const(ConstValue::I32(1)));

        let out = optimize(vec![
            instr(WasmOp::Const(ConstValue::I32(-5))),
            instr(WasmOp::Convert(ConvertOp::I64ExtendI32S)),
        ]);
        assert_eq!(out[0].op, WasmOp::Const(ConstValue::I64(-5)));
    }
}
