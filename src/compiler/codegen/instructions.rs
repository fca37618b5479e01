//! The instruction model produced by the method translator and consumed by
//! the optimiser and both module writers.
//!
//! A method's code is an ordered list of [`WasmInstruction`]. Each carries
//! the byte offset of the source opcode it came from and the source line the
//! line-number table maps that offset to, so the binary writer can attach
//! source mappings while it streams the code section.
//!
//! Branches leave the translator as [`WasmOp::JumpPlaceholder`] carrying
//! absolute bytecode targets; the control-flow reconstructor rewrites them
//! into `br`/`br_if`/`br_table` with relative depths once the nesting is
//! final.

use crate::compiler::codegen::function_name::FunctionName;
use crate::compiler::codegen::value_types::{FunctionType, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub struct WasmInstruction {
    pub op: WasmOp,
    pub byte_offset: u32,
    pub source_line: u32,
}

impl WasmInstruction {
    pub fn new(op: WasmOp, byte_offset: u32, source_line: u32) -> Self {
        WasmInstruction {
            op,
            byte_offset,
            source_line,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WasmOp {
    Const(ConstValue),
    Local { op: LocalOp, index: u32 },
    /// Globals are referenced by the owning static field's qualified name;
    /// ids are resolved when the module is finished.
    Global { op: GlobalOp, name: String },
    Numeric { op: NumericOp, ty: ValueType },
    Convert(ConvertOp),
    Call { name: FunctionName },
    /// Indirect call through the function table; the type index is interned
    /// at write time.
    CallIndirect { ty: FunctionType },
    Block(BlockOp),
    Array { op: ArrayOp, elem: ValueType },
    Struct { op: StructOp, type_name: String, field_index: u32 },
    Memory { op: MemOp, ty: ValueType, offset: u32, align: u32 },
    JumpPlaceholder(JumpKind),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ConstValue {
    pub fn ty(self) -> ValueType {
        match self {
            ConstValue::I32(_) => ValueType::I32,
            ConstValue::I64(_) => ValueType::I64,
            ConstValue::F32(_) => ValueType::F32,
            ConstValue::F64(_) => ValueType::F64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOp {
    Get,
    Set,
    Tee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalOp {
    Get,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOp {
    // Comparisons
    Eqz,
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,
    // Float orderings (NaN compares false)
    Lt,
    Gt,
    Le,
    Ge,
    // Integer arithmetic
    Clz,
    Ctz,
    Popcnt,
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,
    // Float arithmetic
    Abs,
    Neg,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,
    Div,
    Min,
    Max,
    Copysign,
    // Reference operations
    RefNull,
    RefIsNull,
    RefEq,
}

/// Conversion casts, one variant per wire opcode. Integral widening is
/// sign-extending, integral-to-float is signed, float-to-integral uses the
/// saturating forms and reinterpret casts move bit patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertOp {
    I32WrapI64,
    I64ExtendI32S,
    I64ExtendI32U,
    I32TruncSatF32S,
    I32TruncSatF64S,
    I64TruncSatF32S,
    I64TruncSatF64S,
    F32ConvertI32S,
    F32ConvertI64S,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI64S,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockOp {
    Return,
    If { result: ValueType },
    Else,
    End,
    Drop,
    Block { result: ValueType },
    Loop,
    Br { depth: u32 },
    BrIf { depth: u32 },
    BrTable { depths: Vec<u32>, default: u32 },
    Unreachable,
    Try { result: ValueType },
    Catch,
    Throw,
    Rethrow,
    BrOnExn { depth: u32 },
    /// Synchronisation has no target primitive; both lower to `drop` of the
    /// monitor operand at emission while the structural op keeps the source
    /// intent visible to the optimiser and the debug output.
    MonitorEnter,
    MonitorExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOp {
    New,
    Get,
    Set,
    Len,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructOp {
    New,
    Get,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Load,
    Store,
}

/// An unresolved branch recorded during translation. Targets are absolute
/// bytecode offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum JumpKind {
    Goto {
        target: u32,
    },
    /// The operands of `cond` are already on the stack. `jump_if_false`
    /// marks conditions whose clean Wasm comparison expresses the
    /// fall-through predicate rather than the jump predicate (the NaN-biased
    /// float compares), so the reconstructor knows which side to negate.
    Conditional {
        cond: Condition,
        jump_if_false: bool,
        target: u32,
    },
    TableSwitch {
        low: i32,
        targets: Vec<u32>,
        default: u32,
    },
    LookupSwitch {
        pairs: Vec<(i32, u32)>,
        default: u32,
        scratch: u32,
    },
}

impl JumpKind {
    /// All bytecode offsets this jump can transfer control to.
    pub fn targets(&self) -> Vec<u32> {
        match self {
            JumpKind::Goto { target } | JumpKind::Conditional { target, .. } => vec![*target],
            JumpKind::TableSwitch {
                targets, default, ..
            } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            JumpKind::LookupSwitch { pairs, default, .. } => {
                let mut all: Vec<u32> = pairs.iter().map(|(_, t)| *t).collect();
                all.push(*default);
                all
            }
        }
    }
}

/// The predicate of a conditional branch, kept symbolic until the
/// reconstructor decides between `if`/`else` and `block`+`br_if` lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Integer value compares equal to zero
    Eqz,
    /// Integer value compared against zero
    CmpZero(CmpOp),
    /// Two values of `ty` compared
    Cmp { op: CmpOp, ty: ValueType },
    /// Reference is null
    Null,
    /// Two references are identical
    RefEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CmpOp {
    /// Logical complement. Exact for integer comparisons; float comparisons
    /// must negate through `i32.eqz` instead because of NaN.
    pub fn invert(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
        }
    }

    /// The numeric opcode implementing this predicate on `ty`.
    pub fn numeric_op(self, ty: ValueType) -> NumericOp {
        let is_float = matches!(ty, ValueType::F32 | ValueType::F64);
        match (self, is_float) {
            (CmpOp::Eq, _) => NumericOp::Eq,
            (CmpOp::Ne, _) => NumericOp::Ne,
            (CmpOp::Lt, false) => NumericOp::LtS,
            (CmpOp::Ge, false) => NumericOp::GeS,
            (CmpOp::Gt, false) => NumericOp::GtS,
            (CmpOp::Le, false) => NumericOp::LeS,
            (CmpOp::Lt, true) => NumericOp::Lt,
            (CmpOp::Ge, true) => NumericOp::Ge,
            (CmpOp::Gt, true) => NumericOp::Gt,
            (CmpOp::Le, true) => NumericOp::Le,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmp_inversion_is_involutive() {
        for op in [CmpOp::Eq, CmpOp::Ne, CmpOp::Lt, CmpOp::Ge, CmpOp::Gt, CmpOp::Le] {
            assert_eq!(op.invert().invert(), op);
        }
    }

    #[test]
    fn jump_targets_include_the_default() {
        let jump = JumpKind::TableSwitch {
            low: 0,
            targets: vec![10, 20],
            default: 30,
        };
        assert_eq!(jump.targets(), vec![10, 20, 30]);

        let jump = JumpKind::LookupSwitch {
            pairs: vec![(1, 40), (1000, 50)],
            default: 60,
            scratch: 2,
        };
        assert_eq!(jump.targets(), vec![40, 50, 60]);
    }

    #[test]
    fn typed_comparison_selection() {
        assert_eq!(CmpOp::Lt.numeric_op(ValueType::I32), NumericOp::LtS);
        assert_eq!(CmpOp::Lt.numeric_op(ValueType::F64), NumericOp::Lt);
        assert_eq!(CmpOp::Eq.numeric_op(ValueType::I64), NumericOp::Eq);
    }
}
