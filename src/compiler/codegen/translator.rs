//! Method translation: linear bytecode to Wasm instructions.
//!
//! The translator decodes one method's bytecode in offset order while
//! tracking a symbolic operand stack. The stack typing picks the typed
//! opcode out of each family (`i32.add` vs `i64.add`), decides where
//! conversion casts are synthesised and records the stack state at every
//! offset so the control-flow reconstructor can type its blocks.
//!
//! Branches are emitted as [`JumpKind`] placeholders with absolute targets;
//! see [`control_flow`](super::control_flow) for the nesting pass that
//! resolves them.

use crate::compiler::bytecode::opcodes::op;
use crate::compiler::bytecode::{BytecodeReader, ClassFile, CodeAttribute, MethodInfo, PoolConstant};
use crate::compiler::codegen::control_flow::{self, ControlFlowInput};
use crate::compiler::codegen::instructions::{
    ArrayOp, BlockOp, CmpOp, Condition, ConstValue, ConvertOp, GlobalOp, JumpKind, LocalOp, MemOp,
    NumericOp, StructOp, WasmInstruction, WasmOp,
};
use crate::compiler::codegen::module_builder::ModuleBuilder;
use crate::compiler::codegen::optimizer;
use crate::compiler::codegen::type_manager::VTABLE_SLOT_SIZE;
use crate::compiler::codegen::value_types::{FunctionType, ValueType};
use crate::compiler::compiler_errors::WasmError;
use crate::compiler::runtime_library::RuntimeLibrary;
use crate::settings::CompilerOptions;
use crate::{return_input_error, return_structural_error};
use rustc_hash::FxHashMap;

/// Everything the module builder needs to record one translated method.
pub struct TranslatedCode {
    pub instructions: Vec<WasmInstruction>,
    pub params: Vec<ValueType>,
    pub param_names: Vec<String>,
    pub locals: Vec<ValueType>,
    pub local_names: Vec<(u32, String)>,
}

/// Maps the source bytecode's local-variable slots onto Wasm locals.
///
/// Slots are untyped and reusable in the source; a Wasm local is typed for
/// the whole function. Each `(slot, type)` pair the method touches gets its
/// own Wasm local, parameters first.
struct LocalManager {
    slot_map: FxHashMap<(u16, ValueType), u32>,
    types: Vec<ValueType>,
    param_count: usize,
    scratch_map: FxHashMap<(u32, ValueType), u32>,
}

impl LocalManager {
    fn new(params: &[ValueType]) -> Self {
        let mut slot_map = FxHashMap::default();
        let mut slot = 0u16;
        for (index, &ty) in params.iter().enumerate() {
            slot_map.insert((slot, ty), index as u32);
            slot += if matches!(ty, ValueType::I64 | ValueType::F64) {
                2
            } else {
                1
            };
        }
        LocalManager {
            slot_map,
            types: params.to_vec(),
            param_count: params.len(),
            scratch_map: FxHashMap::default(),
        }
    }

    fn get(&mut self, slot: u16, ty: ValueType) -> u32 {
        if let Some(&index) = self.slot_map.get(&(slot, ty)) {
            return index;
        }
        let index = self.types.len() as u32;
        self.types.push(ty);
        self.slot_map.insert((slot, ty), index);
        index
    }

    /// Scratch locals for value shuffling (dup forms, virtual-call argument
    /// stashing, switch selectors), cached by role so call sites share them.
    fn scratch(&mut self, role: u32, ty: ValueType) -> u32 {
        if let Some(&index) = self.scratch_map.get(&(role, ty)) {
            return index;
        }
        let index = self.types.len() as u32;
        self.types.push(ty);
        self.scratch_map.insert((role, ty), index);
        index
    }

    fn extra_locals(&self) -> &[ValueType] {
        &self.types[self.param_count..]
    }
}

/// Scratch roles; disjoint ranges so they never collide.
const SCRATCH_SWITCH: u32 = 0x1000_0000;
const SCRATCH_EXN: u32 = 0x2000_0000;
const SCRATCH_THIS: u32 = 0x3000_0000;
const SCRATCH_DUP: u32 = 0x4000_0000;
const SCRATCH_CALL: u32 = 0x5000_0000;

pub struct MethodTranslator<'a> {
    classes: &'a FxHashMap<String, ClassFile>,
    builder: &'a mut ModuleBuilder,
    options: &'a CompilerOptions,
    runtime: &'a RuntimeLibrary,
}

impl<'a> MethodTranslator<'a> {
    pub fn new(
        classes: &'a FxHashMap<String, ClassFile>,
        builder: &'a mut ModuleBuilder,
        options: &'a CompilerOptions,
        runtime: &'a RuntimeLibrary,
    ) -> Self {
        MethodTranslator {
            classes,
            builder,
            options,
            runtime,
        }
    }

    pub fn translate(
        &mut self,
        class: &ClassFile,
        method: &MethodInfo,
    ) -> Result<TranslatedCode, WasmError> {
        let code = match &method.code {
            Some(code) => code,
            None => return_input_error!("method {}.{} has no code", class.name, method.name),
        };
        if !code.exception_table.is_empty() && !self.options.use_eh {
            return_input_error!(
                "method {}.{} has exception handlers; enable the useEH option",
                class.name,
                method.name
            );
        }

        let receiver = if method.is_static() {
            None
        } else {
            Some(ValueType::Externref)
        };
        let signature = FunctionType::from_descriptor(&method.descriptor, receiver)?;

        let mut frame = Frame {
            classes: self.classes,
            builder: self.builder,
            options: self.options,
            runtime: self.runtime,
            class,
            method,
            code,
            locals: LocalManager::new(&signature.params),
            return_types: signature.results.clone(),
            stack: Vec::new(),
            stack_at: FxHashMap::default(),
            pending_stacks: FxHashMap::default(),
            instrs: Vec::new(),
            dead: false,
            pending_cmp: None,
            exn_scratch: None,
            offset: 0,
            line: 0,
        };
        frame.prepare_exception_entries()?;
        frame.decode_all()?;

        // Release the frame's builder borrow before the reconstructor reads
        // the type manager.
        let Frame {
            locals: mut local_manager,
            exn_scratch,
            stack_at,
            instrs,
            ..
        } = frame;

        let input = ControlFlowInput {
            code_len: code.bytecode.len() as u32,
            exception_table: &code.exception_table,
            stack_at: &stack_at,
            exn_scratch,
        };
        let structured =
            control_flow::reconstruct(instrs, &input, &self.builder.types, self.runtime)?;
        let optimized = optimizer::optimize(structured);

        #[cfg(feature = "show_instructions")]
        for instr in &optimized {
            println!("{:4} {:?}", instr.byte_offset, instr.op);
        }

        let (param_names, local_names) = frame_names(code, &signature.params, &mut local_manager);
        Ok(TranslatedCode {
            instructions: optimized,
            params: signature.params,
            param_names,
            locals: local_manager.extra_locals().to_vec(),
            local_names,
        })
    }
}

/// Parameter and local names from the local-variable table, best effort.
fn frame_names(
    code: &CodeAttribute,
    params: &[ValueType],
    locals: &mut LocalManager,
) -> (Vec<String>, Vec<(u32, String)>) {
    let mut param_names = Vec::with_capacity(params.len());
    let mut slot = 0u16;
    for &ty in params {
        let name = code
            .local_variables
            .iter()
            .find(|v| v.slot == slot && v.start_pc == 0)
            .map(|v| v.name.clone())
            .unwrap_or_default();
        param_names.push(name);
        slot += if matches!(ty, ValueType::I64 | ValueType::F64) {
            2
        } else {
            1
        };
    }

    let mut local_names = Vec::new();
    for variable in &code.local_variables {
        let ch = variable.descriptor.chars().next().unwrap_or('V');
        let Ok(ty) = ValueType::from_descriptor_char(ch) else {
            continue;
        };
        if let Some(&index) = locals.slot_map.get(&(variable.slot, ty)) {
            if index as usize >= locals.param_count
                && !local_names.iter().any(|(i, _)| *i == index)
            {
                local_names.push((index, variable.name.clone()));
            }
        }
    }
    local_names.sort_by_key(|(index, _)| *index);
    (param_names, local_names)
}

/// Pending unfused comparison (`lcmp`, `fcmpl`, ...): operand type and the
/// NaN bias the opcode pushes (-1 or +1; 0 for integers).
#[derive(Debug, Clone, Copy)]
struct PendingCmp {
    ty: ValueType,
    bias: i32,
    at: u32,
}

struct Frame<'a> {
    classes: &'a FxHashMap<String, ClassFile>,
    builder: &'a mut ModuleBuilder,
    options: &'a CompilerOptions,
    runtime: &'a RuntimeLibrary,
    class: &'a ClassFile,
    method: &'a MethodInfo,
    code: &'a CodeAttribute,
    locals: LocalManager,
    return_types: Vec<ValueType>,
    stack: Vec<ValueType>,
    stack_at: FxHashMap<u32, Vec<ValueType>>,
    pending_stacks: FxHashMap<u32, Vec<ValueType>>,
    instrs: Vec<WasmInstruction>,
    dead: bool,
    pending_cmp: Option<PendingCmp>,
    exn_scratch: Option<u32>,
    offset: u32,
    line: u32,
}

impl<'a> Frame<'a> {
    fn prepare_exception_entries(&mut self) -> Result<(), WasmError> {
        for handler in &self.code.exception_table {
            // A handler is entered with just the thrown reference on the
            // stack.
            self.pending_stacks
                .insert(handler.handler_pc, vec![ValueType::Externref]);
            if let Some(class_name) = &handler.catch_type {
                self.builder.types.register_class(self.classes, class_name)?;
                let scratch = self.locals.scratch(SCRATCH_EXN, ValueType::Externref);
                self.exn_scratch = Some(scratch);
            }
            self.builder.mark_event_used();
        }
        Ok(())
    }

    fn decode_all(&mut self) -> Result<(), WasmError> {
        let bytecode = self.code.bytecode.clone();
        let mut reader = BytecodeReader::new(&bytecode);
        while !reader.is_at_end() {
            self.offset = reader.pos();
            self.line = self.code.line_of(self.offset);

            if let Some(merge) = self.pending_stacks.get(&self.offset) {
                if self.dead {
                    self.stack = merge.clone();
                    self.dead = false;
                } else if &self.stack != merge {
                    return_structural_error!(
                        "stack type mismatch at merge offset {}: {:?} vs {:?}",
                        self.offset,
                        self.stack,
                        merge
                    );
                }
            }

            let opcode = reader.read_u8()?;

            #[cfg(feature = "show_bytecode")]
            if let Some(info) = crate::compiler::bytecode::opcodes::opcode_info(opcode) {
                println!("{:5}: {}", self.offset, info.name);
            }

            if self.dead {
                skip_operands(opcode, &mut reader)?;
                continue;
            }
            self.stack_at.insert(self.offset, self.stack.clone());

            // An unconsumed three-way compare must be materialised before
            // anything but a plain conditional uses its result.
            if self.pending_cmp.is_some() && !is_zero_conditional(opcode) {
                self.materialize_pending_cmp()?;
            }

            self.decode_one(opcode, &mut reader)
                .map_err(|e| e.in_method(&self.class.name, &self.method.name).at_line(self.line))?;
        }
        Ok(())
    }

    // =========================================================================
    // Stack bookkeeping
    // =========================================================================

    fn push(&mut self, ty: ValueType) {
        self.stack.push(ty);
    }

    fn pop(&mut self) -> Result<ValueType, WasmError> {
        match self.stack.pop() {
            Some(ty) => Ok(ty),
            None => return_structural_error!("operand stack underflow at offset {}", self.offset),
        }
    }

    fn emit(&mut self, op: WasmOp) {
        self.instrs
            .push(WasmInstruction::new(op, self.offset, self.line));
    }

    /// Record the operand stack a branch transfers to `target`. Backward
    /// targets are verified against the stack already seen there.
    fn record_jump(&mut self, target: u32) -> Result<(), WasmError> {
        if let Some(seen) = self.stack_at.get(&target) {
            if seen != &self.stack {
                return_structural_error!(
                    "stack type mismatch at merge offset {}: {:?} vs {:?}",
                    target,
                    seen,
                    self.stack
                );
            }
            return Ok(());
        }
        match self.pending_stacks.get(&target) {
            Some(existing) => {
                if existing != &self.stack {
                    return_structural_error!(
                        "stack type mismatch at merge offset {}: {:?} vs {:?}",
                        target,
                        existing,
                        self.stack
                    );
                }
            }
            None => {
                self.pending_stacks.insert(target, self.stack.clone());
            }
        }
        Ok(())
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    fn decode_one(&mut self, opcode: u8, reader: &mut BytecodeReader) -> Result<(), WasmError> {
        match opcode {
            op::NOP => {}

            // ----- constants -----
            op::ACONST_NULL => {
                self.emit(WasmOp::Numeric {
                    op: NumericOp::RefNull,
                    ty: ValueType::Externref,
                });
                self.push(ValueType::Externref);
            }
            op::ICONST_M1..=op::ICONST_5 => {
                let value = opcode as i32 - op::ICONST_0 as i32;
                self.emit(WasmOp::Const(ConstValue::I32(value)));
                self.push(ValueType::I32);
            }
            op::LCONST_0 | op::LCONST_1 => {
                self.emit(WasmOp::Const(ConstValue::I64((opcode - op::LCONST_0) as i64)));
                self.push(ValueType::I64);
            }
            op::FCONST_0..=op::FCONST_2 => {
                self.emit(WasmOp::Const(ConstValue::F32((opcode - op::FCONST_0) as f32)));
                self.push(ValueType::F32);
            }
            op::DCONST_0 | op::DCONST_1 => {
                self.emit(WasmOp::Const(ConstValue::F64((opcode - op::DCONST_0) as f64)));
                self.push(ValueType::F64);
            }
            op::BIPUSH => {
                let value = reader.read_i8()? as i32;
                self.emit(WasmOp::Const(ConstValue::I32(value)));
                self.push(ValueType::I32);
            }
            op::SIPUSH => {
                let value = reader.read_i16()? as i32;
                self.emit(WasmOp::Const(ConstValue::I32(value)));
                self.push(ValueType::I32);
            }
            op::LDC => {
                let index = reader.read_u8()? as u16;
                self.load_constant(index)?;
            }
            op::LDC_W | op::LDC2_W => {
                let index = reader.read_u16()?;
                self.load_constant(index)?;
            }

            // ----- local loads -----
            op::ILOAD => self.load_local(reader.read_u8()? as u16, ValueType::I32),
            op::LLOAD => self.load_local(reader.read_u8()? as u16, ValueType::I64),
            op::FLOAD => self.load_local(reader.read_u8()? as u16, ValueType::F32),
            op::DLOAD => self.load_local(reader.read_u8()? as u16, ValueType::F64),
            op::ALOAD => self.load_local(reader.read_u8()? as u16, ValueType::Externref),
            op::ILOAD_0..=op::ILOAD_3 => {
                self.load_local((opcode - op::ILOAD_0) as u16, ValueType::I32)
            }
            op::LLOAD_0..=op::LLOAD_3 => {
                self.load_local((opcode - op::LLOAD_0) as u16, ValueType::I64)
            }
            op::FLOAD_0..=op::FLOAD_3 => {
                self.load_local((opcode - op::FLOAD_0) as u16, ValueType::F32)
            }
            op::DLOAD_0..=op::DLOAD_3 => {
                self.load_local((opcode - op::DLOAD_0) as u16, ValueType::F64)
            }
            op::ALOAD_0..=op::ALOAD_3 => {
                self.load_local((opcode - op::ALOAD_0) as u16, ValueType::Externref)
            }

            // ----- local stores -----
            op::ISTORE => self.store_local(reader.read_u8()? as u16, ValueType::I32)?,
            op::LSTORE => self.store_local(reader.read_u8()? as u16, ValueType::I64)?,
            op::FSTORE => self.store_local(reader.read_u8()? as u16, ValueType::F32)?,
            op::DSTORE => self.store_local(reader.read_u8()? as u16, ValueType::F64)?,
            op::ASTORE => self.store_local(reader.read_u8()? as u16, ValueType::Externref)?,
            op::ISTORE_0..=op::ISTORE_3 => {
                self.store_local((opcode - op::ISTORE_0) as u16, ValueType::I32)?
            }
            op::LSTORE_0..=op::LSTORE_3 => {
                self.store_local((opcode - op::LSTORE_0) as u16, ValueType::I64)?
            }
            op::FSTORE_0..=op::FSTORE_3 => {
                self.store_local((opcode - op::FSTORE_0) as u16, ValueType::F32)?
            }
            op::DSTORE_0..=op::DSTORE_3 => {
                self.store_local((opcode - op::DSTORE_0) as u16, ValueType::F64)?
            }
            op::ASTORE_0..=op::ASTORE_3 => {
                self.store_local((opcode - op::ASTORE_0) as u16, ValueType::Externref)?
            }

            // ----- arrays -----
            op::IALOAD => self.array_load(ValueType::I32)?,
            op::LALOAD => self.array_load(ValueType::I64)?,
            op::FALOAD => self.array_load(ValueType::F32)?,
            op::DALOAD => self.array_load(ValueType::F64)?,
            op::AALOAD => self.array_load(ValueType::Externref)?,
            op::BALOAD | op::CALOAD | op::SALOAD => self.array_load(ValueType::I32)?,
            op::IASTORE => self.array_store(ValueType::I32)?,
            op::LASTORE => self.array_store(ValueType::I64)?,
            op::FASTORE => self.array_store(ValueType::F32)?,
            op::DASTORE => self.array_store(ValueType::F64)?,
            op::AASTORE => self.array_store(ValueType::Externref)?,
            op::BASTORE | op::CASTORE | op::SASTORE => self.array_store(ValueType::I32)?,
            op::NEWARRAY => {
                let atype = reader.read_u8()?;
                self.new_array(atype)?;
            }
            op::ANEWARRAY => {
                let index = reader.read_u16()?;
                self.class.constant_pool.class_name(index)?;
                self.new_array(0)?;
            }
            op::MULTIANEWARRAY => {
                let index = reader.read_u16()?;
                let dims = reader.read_u8()?;
                if dims != 1 {
                    return_input_error!("multi-dimensional array allocation is unsupported");
                }
                self.class.constant_pool.class_name(index)?;
                self.new_array(0)?;
            }
            op::ARRAYLENGTH => {
                self.pop()?;
                if self.options.use_gc {
                    self.emit(WasmOp::Array {
                        op: ArrayOp::Len,
                        elem: ValueType::I32,
                    });
                } else {
                    self.emit(WasmOp::Call {
                        name: self.runtime.array_length(),
                    });
                }
                self.push(ValueType::I32);
            }

            // ----- stack manipulation -----
            op::POP => {
                self.pop()?;
                self.emit(WasmOp::Block(BlockOp::Drop));
            }
            op::POP2 => {
                let top = self.pop()?;
                self.emit(WasmOp::Block(BlockOp::Drop));
                if slot_width(top) == 1 {
                    self.pop()?;
                    self.emit(WasmOp::Block(BlockOp::Drop));
                }
            }
            op::DUP => {
                let top = *self.top()?;
                let local = self.locals.scratch(SCRATCH_DUP, top);
                self.emit(WasmOp::Local {
                    op: LocalOp::Tee,
                    index: local,
                });
                self.emit(WasmOp::Local {
                    op: LocalOp::Get,
                    index: local,
                });
                self.push(top);
            }
            op::DUP_X1 => self.dup_shuffle(1, 1)?,
            op::DUP_X2 => self.dup_shuffle(1, 2)?,
            op::DUP2 => self.dup2()?,
            op::DUP2_X1 => self.dup_shuffle(2, 1)?,
            op::DUP2_X2 => self.dup_shuffle(2, 2)?,
            op::SWAP => {
                let a = self.pop()?;
                let b = self.pop()?;
                let sa = self.locals.scratch(SCRATCH_DUP, a);
                let sb = self.locals.scratch(SCRATCH_DUP + 1, b);
                self.emit(WasmOp::Local { op: LocalOp::Set, index: sa });
                self.emit(WasmOp::Local { op: LocalOp::Set, index: sb });
                self.emit(WasmOp::Local { op: LocalOp::Get, index: sa });
                self.emit(WasmOp::Local { op: LocalOp::Get, index: sb });
                self.push(a);
                self.push(b);
            }

            // ----- arithmetic -----
            op::IADD | op::LADD | op::FADD | op::DADD => self.binary(NumericOp::Add)?,
            op::ISUB | op::LSUB | op::FSUB | op::DSUB => self.binary(NumericOp::Sub)?,
            op::IMUL | op::LMUL | op::FMUL | op::DMUL => self.binary(NumericOp::Mul)?,
            op::IDIV | op::LDIV => self.binary(NumericOp::DivS)?,
            op::FDIV | op::DDIV => self.binary(NumericOp::Div)?,
            op::IREM | op::LREM => self.binary(NumericOp::RemS)?,
            op::FREM | op::DREM => {
                // The source language requires IEEE remainder; the target
                // has no remainder on floats.
                return_input_error!("floating-point remainder is unsupported");
            }
            op::INEG => {
                self.emit(WasmOp::Const(ConstValue::I32(-1)));
                self.emit(WasmOp::Numeric {
                    op: NumericOp::Mul,
                    ty: ValueType::I32,
                });
            }
            op::LNEG => {
                self.emit(WasmOp::Const(ConstValue::I64(-1)));
                self.emit(WasmOp::Numeric {
                    op: NumericOp::Mul,
                    ty: ValueType::I64,
                });
            }
            op::FNEG => self.emit(WasmOp::Numeric {
                op: NumericOp::Neg,
                ty: ValueType::F32,
            }),
            op::DNEG => self.emit(WasmOp::Numeric {
                op: NumericOp::Neg,
                ty: ValueType::F64,
            }),
            op::ISHL => self.binary(NumericOp::Shl)?,
            op::ISHR => self.binary(NumericOp::ShrS)?,
            op::IUSHR => self.binary(NumericOp::ShrU)?,
            op::LSHL | op::LSHR | op::LUSHR => {
                // The shift count is a 32-bit value; widen it first.
                self.pop()?;
                self.emit(WasmOp::Convert(ConvertOp::I64ExtendI32S));
                self.pop()?;
                let numeric = match opcode {
                    op::LSHL => NumericOp::Shl,
                    op::LSHR => NumericOp::ShrS,
                    _ => NumericOp::ShrU,
                };
                self.emit(WasmOp::Numeric {
                    op: numeric,
                    ty: ValueType::I64,
                });
                self.push(ValueType::I64);
            }
            op::IAND | op::LAND => self.binary(NumericOp::And)?,
            op::IOR | op::LOR => self.binary(NumericOp::Or)?,
            op::IXOR | op::LXOR => self.binary(NumericOp::Xor)?,
            op::IINC => {
                let slot = reader.read_u8()? as u16;
                let delta = reader.read_i8()? as i32;
                self.increment_local(slot, delta);
            }

            // ----- conversions -----
            op::I2L => self.convert(ConvertOp::I64ExtendI32S, ValueType::I64)?,
            op::I2F => self.convert(ConvertOp::F32ConvertI32S, ValueType::F32)?,
            op::I2D => self.convert(ConvertOp::F64ConvertI32S, ValueType::F64)?,
            op::L2I => self.convert(ConvertOp::I32WrapI64, ValueType::I32)?,
            op::L2F => self.convert(ConvertOp::F32ConvertI64S, ValueType::F32)?,
            op::L2D => self.convert(ConvertOp::F64ConvertI64S, ValueType::F64)?,
            op::F2I => self.convert(ConvertOp::I32TruncSatF32S, ValueType::I32)?,
            op::F2L => self.convert(ConvertOp::I64TruncSatF32S, ValueType::I64)?,
            op::F2D => self.convert(ConvertOp::F64PromoteF32, ValueType::F64)?,
            op::D2I => self.convert(ConvertOp::I32TruncSatF64S, ValueType::I32)?,
            op::D2L => self.convert(ConvertOp::I64TruncSatF64S, ValueType::I64)?,
            op::D2F => self.convert(ConvertOp::F32DemoteF64, ValueType::F32)?,
            op::I2B => self.emit(WasmOp::Convert(ConvertOp::I32Extend8S)),
            op::I2S => self.emit(WasmOp::Convert(ConvertOp::I32Extend16S)),
            op::I2C => {
                self.emit(WasmOp::Const(ConstValue::I32(0xFFFF)));
                self.emit(WasmOp::Numeric {
                    op: NumericOp::And,
                    ty: ValueType::I32,
                });
            }

            // ----- three-way comparisons -----
            op::LCMP => self.compare(ValueType::I64, 0)?,
            op::FCMPL => self.compare(ValueType::F32, -1)?,
            op::FCMPG => self.compare(ValueType::F32, 1)?,
            op::DCMPL => self.compare(ValueType::F64, -1)?,
            op::DCMPG => self.compare(ValueType::F64, 1)?,

            // ----- branches -----
            op::IFEQ..=op::IFLE => {
                let target = self.branch_target(reader, false)?;
                self.zero_conditional(opcode, target)?;
            }
            op::IF_ICMPEQ..=op::IF_ICMPLE => {
                let target = self.branch_target(reader, false)?;
                let cmp = match opcode {
                    op::IF_ICMPEQ => CmpOp::Eq,
                    op::IF_ICMPNE => CmpOp::Ne,
                    op::IF_ICMPLT => CmpOp::Lt,
                    op::IF_ICMPGE => CmpOp::Ge,
                    op::IF_ICMPGT => CmpOp::Gt,
                    _ => CmpOp::Le,
                };
                self.pop()?;
                self.pop()?;
                self.conditional(
                    Condition::Cmp {
                        op: cmp,
                        ty: ValueType::I32,
                    },
                    false,
                    target,
                )?;
            }
            op::IF_ACMPEQ | op::IF_ACMPNE => {
                let target = self.branch_target(reader, false)?;
                self.pop()?;
                self.pop()?;
                self.conditional(Condition::RefEq, opcode == op::IF_ACMPNE, target)?;
            }
            op::IFNULL | op::IFNONNULL => {
                let target = self.branch_target(reader, false)?;
                self.pop()?;
                self.conditional(Condition::Null, opcode == op::IFNONNULL, target)?;
            }
            op::GOTO | op::GOTO_W => {
                let target = self.branch_target(reader, opcode == op::GOTO_W)?;
                self.record_jump(target)?;
                self.emit(WasmOp::JumpPlaceholder(JumpKind::Goto { target }));
                self.dead = true;
            }
            op::JSR | op::JSR_W | op::RET => {
                return_input_error!("subroutine opcodes are unsupported");
            }

            // ----- switches -----
            op::TABLESWITCH => self.table_switch(reader)?,
            op::LOOKUPSWITCH => self.lookup_switch(reader)?,

            // ----- returns -----
            op::IRETURN..=op::ARETURN => {
                let ty = self.pop()?;
                if self.return_types.first() != Some(&ty) {
                    return_structural_error!(
                        "return value type {:?} does not match the method result {:?}",
                        ty,
                        self.return_types.first()
                    );
                }
                self.emit(WasmOp::Block(BlockOp::Return));
                self.dead = true;
            }
            op::RETURN => {
                self.emit(WasmOp::Block(BlockOp::Return));
                self.dead = true;
            }

            // ----- fields -----
            op::GETSTATIC => {
                let index = reader.read_u16()?;
                let (class_name, field, descriptor) = {
                    let (c, f, d) = self.class.constant_pool.field_ref(index)?;
                    (c.to_owned(), f.to_owned(), d.to_owned())
                };
                let ty = ValueType::from_descriptor_char(descriptor.chars().next().unwrap_or('V'))?;
                let global = format!("{class_name}.{field}");
                self.builder.ensure_global(&global, ty)?;
                self.emit(WasmOp::Global {
                    op: GlobalOp::Get,
                    name: global,
                });
                self.push(ty);
            }
            op::PUTSTATIC => {
                let index = reader.read_u16()?;
                let (class_name, field, descriptor) = {
                    let (c, f, d) = self.class.constant_pool.field_ref(index)?;
                    (c.to_owned(), f.to_owned(), d.to_owned())
                };
                let ty = ValueType::from_descriptor_char(descriptor.chars().next().unwrap_or('V'))?;
                let global = format!("{class_name}.{field}");
                self.builder.ensure_global(&global, ty)?;
                self.pop()?;
                self.emit(WasmOp::Global {
                    op: GlobalOp::Set,
                    name: global,
                });
            }
            op::GETFIELD => {
                let index = reader.read_u16()?;
                let (class_name, field, descriptor) = {
                    let (c, f, d) = self.class.constant_pool.field_ref(index)?;
                    (c.to_owned(), f.to_owned(), d.to_owned())
                };
                let ty = ValueType::from_descriptor_char(descriptor.chars().next().unwrap_or('V'))?;
                self.builder.types.register_class(self.classes, &class_name)?;
                let field_index = self.builder.types.field_index(&class_name, &field)?;
                self.pop()?;
                if self.options.use_gc {
                    self.emit(WasmOp::Struct {
                        op: StructOp::Get,
                        type_name: class_name,
                        field_index,
                    });
                } else {
                    self.emit(WasmOp::Const(ConstValue::I32(field_index as i32)));
                    self.emit(WasmOp::Call {
                        name: self.runtime.field_get(ty),
                    });
                }
                self.push(ty);
            }
            op::PUTFIELD => {
                let index = reader.read_u16()?;
                let (class_name, field, descriptor) = {
                    let (c, f, d) = self.class.constant_pool.field_ref(index)?;
                    (c.to_owned(), f.to_owned(), d.to_owned())
                };
                let ty = ValueType::from_descriptor_char(descriptor.chars().next().unwrap_or('V'))?;
                self.builder.types.register_class(self.classes, &class_name)?;
                let field_index = self.builder.types.field_index(&class_name, &field)?;
                self.pop()?;
                self.pop()?;
                if self.options.use_gc {
                    self.emit(WasmOp::Struct {
                        op: StructOp::Set,
                        type_name: class_name,
                        field_index,
                    });
                } else {
                    // helper takes (object, value, fieldIndex)
                    self.emit(WasmOp::Const(ConstValue::I32(field_index as i32)));
                    self.emit(WasmOp::Call {
                        name: self.runtime.field_set(ty),
                    });
                }
            }

            // ----- calls -----
            op::INVOKESTATIC => {
                let index = reader.read_u16()?;
                self.direct_call(index, None)?;
            }
            op::INVOKESPECIAL => {
                let index = reader.read_u16()?;
                self.direct_call(index, Some(ValueType::Externref))?;
            }
            op::INVOKEVIRTUAL => {
                let index = reader.read_u16()?;
                self.virtual_call(index)?;
            }
            op::INVOKEINTERFACE => {
                let index = reader.read_u16()?;
                reader.read_u16()?; // historical count and padding bytes
                self.virtual_call(index)?;
            }
            op::INVOKEDYNAMIC => {
                return_input_error!("dynamic call sites are unsupported");
            }

            // ----- objects -----
            op::NEW => {
                let index = reader.read_u16()?;
                let class_name = self.class.constant_pool.class_name(index)?.to_owned();
                self.builder.types.register_class(self.classes, &class_name)?;
                let vtable_offset = self.builder.types.vtable_offset(&class_name)?;
                self.emit(WasmOp::Const(ConstValue::I32(vtable_offset as i32)));
                if self.options.use_gc {
                    self.emit(WasmOp::Struct {
                        op: StructOp::New,
                        type_name: class_name,
                        field_index: 0,
                    });
                } else {
                    self.emit(WasmOp::Call {
                        name: self.runtime.allocate(),
                    });
                }
                self.push(ValueType::Externref);
            }
            op::ATHROW => {
                if !self.options.use_eh {
                    return_input_error!("athrow requires the useEH option");
                }
                self.builder.mark_event_used();
                self.pop()?;
                self.emit(WasmOp::Block(BlockOp::Throw));
                self.dead = true;
            }
            op::CHECKCAST => {
                let index = reader.read_u16()?;
                let class_name = self.class.constant_pool.class_name(index)?.to_owned();
                self.builder.types.register_class(self.classes, &class_name)?;
                let vtable_offset = self.builder.types.vtable_offset(&class_name)?;
                self.emit(WasmOp::Const(ConstValue::I32(vtable_offset as i32)));
                self.emit(WasmOp::Call {
                    name: self.runtime.cast(),
                });
            }
            op::INSTANCEOF => {
                let index = reader.read_u16()?;
                let class_name = self.class.constant_pool.class_name(index)?.to_owned();
                self.builder.types.register_class(self.classes, &class_name)?;
                let vtable_offset = self.builder.types.vtable_offset(&class_name)?;
                self.pop()?;
                self.emit(WasmOp::Const(ConstValue::I32(vtable_offset as i32)));
                self.emit(WasmOp::Call {
                    name: self.runtime.instance_of(),
                });
                self.push(ValueType::I32);
            }

            // ----- synchronisation -----
            op::MONITORENTER => {
                self.pop()?;
                self.emit(WasmOp::Block(BlockOp::MonitorEnter));
            }
            op::MONITOREXIT => {
                self.pop()?;
                self.emit(WasmOp::Block(BlockOp::MonitorExit));
            }

            op::WIDE => {
                let wide_opcode = reader.read_u8()?;
                let slot = reader.read_u16()?;
                match wide_opcode {
                    op::ILOAD => self.load_local(slot, ValueType::I32),
                    op::LLOAD => self.load_local(slot, ValueType::I64),
                    op::FLOAD => self.load_local(slot, ValueType::F32),
                    op::DLOAD => self.load_local(slot, ValueType::F64),
                    op::ALOAD => self.load_local(slot, ValueType::Externref),
                    op::ISTORE => self.store_local(slot, ValueType::I32)?,
                    op::LSTORE => self.store_local(slot, ValueType::I64)?,
                    op::FSTORE => self.store_local(slot, ValueType::F32)?,
                    op::DSTORE => self.store_local(slot, ValueType::F64)?,
                    op::ASTORE => self.store_local(slot, ValueType::Externref)?,
                    op::IINC => {
                        let delta = reader.read_i16()? as i32;
                        self.increment_local(slot, delta);
                    }
                    other => return_input_error!("unsupported wide opcode 0x{:02x}", other),
                }
            }

            other => return_input_error!("unsupported opcode 0x{:02x}", other),
        }
        Ok(())
    }

    // =========================================================================
    // Opcode helpers
    // =========================================================================

    fn top(&self) -> Result<&ValueType, WasmError> {
        match self.stack.last() {
            Some(ty) => Ok(ty),
            None => return_structural_error!("operand stack underflow at offset {}", self.offset),
        }
    }

    fn load_constant(&mut self, index: u16) -> Result<(), WasmError> {
        let constant = self.class.constant_pool.get(index)?.clone();
        match constant {
            PoolConstant::Integer(value) => {
                self.emit(WasmOp::Const(ConstValue::I32(value)));
                self.push(ValueType::I32);
            }
            PoolConstant::Long(value) => {
                self.emit(WasmOp::Const(ConstValue::I64(value)));
                self.push(ValueType::I64);
            }
            PoolConstant::Float(value) => {
                self.emit(WasmOp::Const(ConstValue::F32(value)));
                self.push(ValueType::F32);
            }
            PoolConstant::Double(value) => {
                self.emit(WasmOp::Const(ConstValue::F64(value)));
                self.push(ValueType::F64);
            }
            PoolConstant::Str(value) => {
                let id = self.builder.intern_string(&value);
                self.emit(WasmOp::Const(ConstValue::I32(id as i32)));
                self.emit(WasmOp::Call {
                    name: self.runtime.string_constant(),
                });
                self.push(ValueType::Externref);
            }
            other => return_input_error!("unsupported loadable constant {:?}", other),
        }
        Ok(())
    }

    fn load_local(&mut self, slot: u16, ty: ValueType) {
        let index = self.locals.get(slot, ty);
        self.emit(WasmOp::Local {
            op: LocalOp::Get,
            index,
        });
        self.push(ty);
    }

    fn store_local(&mut self, slot: u16, ty: ValueType) -> Result<(), WasmError> {
        self.pop()?;
        let index = self.locals.get(slot, ty);
        self.emit(WasmOp::Local {
            op: LocalOp::Set,
            index,
        });
        Ok(())
    }

    fn increment_local(&mut self, slot: u16, delta: i32) {
        let index = self.locals.get(slot, ValueType::I32);
        self.emit(WasmOp::Local {
            op: LocalOp::Get,
            index,
        });
        self.emit(WasmOp::Const(ConstValue::I32(delta)));
        self.emit(WasmOp::Numeric {
            op: NumericOp::Add,
            ty: ValueType::I32,
        });
        self.emit(WasmOp::Local {
            op: LocalOp::Set,
            index,
        });
    }

    fn binary(&mut self, numeric: NumericOp) -> Result<(), WasmError> {
        self.pop()?;
        let ty = self.pop()?;
        self.emit(WasmOp::Numeric { op: numeric, ty });
        self.push(ty);
        Ok(())
    }

    fn convert(&mut self, convert: ConvertOp, to: ValueType) -> Result<(), WasmError> {
        self.pop()?;
        self.emit(WasmOp::Convert(convert));
        self.push(to);
        Ok(())
    }

    fn array_load(&mut self, ty: ValueType) -> Result<(), WasmError> {
        self.pop()?; // index
        self.pop()?; // array reference
        if self.options.use_gc {
            self.builder.types.register_array(ty);
            self.emit(WasmOp::Array {
                op: ArrayOp::Get,
                elem: ty,
            });
        } else {
            self.emit(WasmOp::Call {
                name: self.runtime.array_get(ty),
            });
        }
        self.push(ty);
        Ok(())
    }

    fn array_store(&mut self, ty: ValueType) -> Result<(), WasmError> {
        self.pop()?; // value
        self.pop()?; // index
        self.pop()?; // array reference
        if self.options.use_gc {
            self.builder.types.register_array(ty);
            self.emit(WasmOp::Array {
                op: ArrayOp::Set,
                elem: ty,
            });
        } else {
            self.emit(WasmOp::Call {
                name: self.runtime.array_set(ty),
            });
        }
        Ok(())
    }

    fn new_array(&mut self, atype: u8) -> Result<(), WasmError> {
        let elem = match atype {
            0 => ValueType::Externref,
            4 | 8 => ValueType::I32,
            5 | 9 => ValueType::I32,
            6 => ValueType::F32,
            7 => ValueType::F64,
            10 => ValueType::I32,
            11 => ValueType::I64,
            other => return_input_error!("invalid primitive array type {}", other),
        };
        self.pop()?; // length
        if self.options.use_gc {
            self.builder.types.register_array(elem);
            self.emit(WasmOp::Array {
                op: ArrayOp::New,
                elem,
            });
        } else {
            self.emit(WasmOp::Const(ConstValue::I32(atype as i32)));
            self.emit(WasmOp::Call {
                name: self.runtime.array_new(),
            });
        }
        self.push(ValueType::Externref);
        Ok(())
    }

    /// Duplicate the top `take` slots beneath the `skip` slots below them.
    fn dup_shuffle(&mut self, take_slots: u32, skip_slots: u32) -> Result<(), WasmError> {
        let taken = self.stash_slots(take_slots, 0)?;
        let skipped = self.stash_slots(skip_slots, taken.len() as u32)?;
        self.unstash(&taken);
        self.unstash(&skipped);
        self.unstash(&taken);
        Ok(())
    }

    fn dup2(&mut self) -> Result<(), WasmError> {
        let taken = self.stash_slots(2, 0)?;
        self.unstash(&taken);
        self.unstash(&taken);
        Ok(())
    }

    /// Pop values covering `slots` stack slots into scratch locals.
    /// Returns them bottom-first so `unstash` re-pushes in order.
    fn stash_slots(&mut self, slots: u32, role_base: u32) -> Result<Vec<(u32, ValueType)>, WasmError> {
        let mut stashed = Vec::new();
        let mut remaining = slots as i64;
        let mut role = role_base;
        while remaining > 0 {
            let ty = self.pop()?;
            let local = self.locals.scratch(SCRATCH_DUP + role, ty);
            self.emit(WasmOp::Local {
                op: LocalOp::Set,
                index: local,
            });
            stashed.push((local, ty));
            remaining -= i64::from(slot_width(ty));
            role += 1;
        }
        if remaining < 0 {
            return_structural_error!(
                "stack shuffle splits a wide value at offset {}",
                self.offset
            );
        }
        stashed.reverse();
        Ok(stashed)
    }

    fn unstash(&mut self, stashed: &[(u32, ValueType)]) {
        for &(local, ty) in stashed {
            self.emit(WasmOp::Local {
                op: LocalOp::Get,
                index: local,
            });
            self.push(ty);
        }
    }

    /// Three-way compare: held pending so the usual compare-then-branch pair
    /// fuses into one typed Wasm comparison.
    fn compare(&mut self, ty: ValueType, bias: i32) -> Result<(), WasmError> {
        self.pop()?;
        self.pop()?;
        self.pending_cmp = Some(PendingCmp {
            ty,
            bias,
            at: self.offset,
        });
        self.push(ValueType::I32);
        Ok(())
    }

    /// The compare result is consumed by something other than a branch:
    /// fall back to the runtime's three-way helpers.
    fn materialize_pending_cmp(&mut self) -> Result<(), WasmError> {
        let Some(pending) = self.pending_cmp.take() else {
            return Ok(());
        };
        if pending.ty != ValueType::I64 {
            self.emit(WasmOp::Const(ConstValue::I32(pending.bias)));
        }
        self.emit(WasmOp::Call {
            name: self.runtime.compare(pending.ty),
        });
        Ok(())
    }

    fn branch_target(&mut self, reader: &mut BytecodeReader, wide: bool) -> Result<u32, WasmError> {
        let base = self.offset as i64;
        let delta = if wide {
            i64::from(reader.read_i32()?)
        } else {
            i64::from(reader.read_i16()?)
        };
        let target = base + delta;
        if target < 0 || target > self.code.bytecode.len() as i64 {
            return_input_error!("branch target {} out of range", target);
        }
        Ok(target as u32)
    }

    fn zero_conditional(&mut self, opcode: u8, target: u32) -> Result<(), WasmError> {
        if let Some(pending) = self.pending_cmp.take() {
            if pending.at + 1 == self.offset {
                // Fused: the two original operands are still on the Wasm
                // stack; drop the symbolic compare result.
                self.pop()?;
                let (cmp, jump_if_false) = fuse_compare(opcode, pending.bias);
                return self.conditional(
                    Condition::Cmp {
                        op: cmp,
                        ty: pending.ty,
                    },
                    jump_if_false,
                    target,
                );
            }
            self.pending_cmp = Some(pending);
            self.materialize_pending_cmp()?;
        }
        self.pop()?;
        let (cond, jump_if_false) = match opcode {
            op::IFEQ => (Condition::Eqz, false),
            op::IFNE => (Condition::Eqz, true),
            op::IFLT => (Condition::CmpZero(CmpOp::Lt), false),
            op::IFGE => (Condition::CmpZero(CmpOp::Ge), false),
            op::IFGT => (Condition::CmpZero(CmpOp::Gt), false),
            _ => (Condition::CmpZero(CmpOp::Le), false),
        };
        self.conditional(cond, jump_if_false, target)
    }

    fn conditional(
        &mut self,
        cond: Condition,
        jump_if_false: bool,
        target: u32,
    ) -> Result<(), WasmError> {
        self.record_jump(target)?;
        self.emit(WasmOp::JumpPlaceholder(JumpKind::Conditional {
            cond,
            jump_if_false,
            target,
        }));
        Ok(())
    }

    fn table_switch(&mut self, reader: &mut BytecodeReader) -> Result<(), WasmError> {
        reader.align_to_4();
        let base = self.offset as i64;
        let default = base + i64::from(reader.read_i32()?);
        let low = reader.read_i32()?;
        let high = reader.read_i32()?;
        if high < low {
            return_input_error!("malformed table switch: high {} below low {}", high, low);
        }
        let count = (i64::from(high) - i64::from(low) + 1) as usize;
        let mut targets = Vec::with_capacity(count);
        for _ in 0..count {
            targets.push((base + i64::from(reader.read_i32()?)) as u32);
        }
        let default = default as u32;

        self.pop()?;
        for &target in targets.iter().chain(std::iter::once(&default)) {
            self.record_jump(target)?;
        }
        self.emit(WasmOp::JumpPlaceholder(JumpKind::TableSwitch {
            low,
            targets,
            default,
        }));
        self.dead = true;
        Ok(())
    }

    fn lookup_switch(&mut self, reader: &mut BytecodeReader) -> Result<(), WasmError> {
        reader.align_to_4();
        let base = self.offset as i64;
        let default = (base + i64::from(reader.read_i32()?)) as u32;
        let count = reader.read_i32()?;
        if count < 0 {
            return_input_error!("malformed lookup switch: negative pair count");
        }
        let mut pairs = Vec::with_capacity(count as usize);
        let mut previous: Option<i32> = None;
        for _ in 0..count {
            let key = reader.read_i32()?;
            if let Some(previous) = previous {
                if key <= previous {
                    return_input_error!("malformed lookup switch: keys not strictly ascending");
                }
            }
            previous = Some(key);
            pairs.push((key, (base + i64::from(reader.read_i32()?)) as u32));
        }

        let scratch = self.locals.scratch(SCRATCH_SWITCH, ValueType::I32);
        self.pop()?;
        for &(_, target) in &pairs {
            self.record_jump(target)?;
        }
        self.record_jump(default)?;
        self.emit(WasmOp::JumpPlaceholder(JumpKind::LookupSwitch {
            pairs,
            default,
            scratch,
        }));
        self.dead = true;
        Ok(())
    }

    /// Static and special invocations become direct calls.
    fn direct_call(&mut self, index: u16, receiver: Option<ValueType>) -> Result<(), WasmError> {
        let (class_name, method_name, descriptor) = {
            let (c, m, d) = self.class.constant_pool.method_ref(index)?;
            (c.to_owned(), m.to_owned(), d.to_owned())
        };
        let name = self
            .builder
            .names
            .intern(&class_name, &method_name, &descriptor)
            .clone();
        let signature = FunctionType::from_descriptor(&descriptor, receiver)?;
        self.builder.note_call_type(&name.signature_name, &signature);
        for _ in &signature.params {
            self.pop()?;
        }
        self.emit(WasmOp::Call { name });
        for &result in &signature.results {
            self.push(result);
        }
        Ok(())
    }

    /// Instance invocations go through the receiver's vtable: stash the
    /// arguments, read the vtable pointer out of the object header, add the
    /// slot and issue `call_indirect` with the call site's type.
    fn virtual_call(&mut self, index: u16) -> Result<(), WasmError> {
        let (class_name, method_name, descriptor) = {
            let (c, m, d) = self.class.constant_pool.method_ref(index)?;
            (c.to_owned(), m.to_owned(), d.to_owned())
        };
        self.builder.types.register_class(self.classes, &class_name)?;
        let slot = self
            .builder
            .types
            .vtable_slot(&class_name, &method_name, &descriptor)?;
        let signature = FunctionType::from_descriptor(&descriptor, Some(ValueType::Externref))?;

        // Stash the arguments so the receiver surfaces.
        let mut stashed: Vec<(u32, ValueType)> = Vec::new();
        for (position, &ty) in signature.params.iter().enumerate().skip(1).rev() {
            self.pop()?;
            let local = self.locals.scratch(SCRATCH_CALL + position as u32, ty);
            self.emit(WasmOp::Local {
                op: LocalOp::Set,
                index: local,
            });
            stashed.push((local, ty));
        }
        stashed.reverse();

        let this_local = self.locals.scratch(SCRATCH_THIS, ValueType::Externref);
        self.emit(WasmOp::Local {
            op: LocalOp::Tee,
            index: this_local,
        });
        for &(local, ty) in &stashed {
            self.emit(WasmOp::Local {
                op: LocalOp::Get,
                index: local,
            });
            self.push(ty);
        }

        // Function index = vtable[slot], vtable located via object header.
        self.emit(WasmOp::Local {
            op: LocalOp::Get,
            index: this_local,
        });
        self.push(ValueType::Externref);
        if self.options.use_gc {
            self.pop()?;
            self.emit(WasmOp::Struct {
                op: StructOp::Get,
                type_name: class_name,
                field_index: 0,
            });
            self.push(ValueType::I32);
        } else {
            self.pop()?;
            self.emit(WasmOp::Call {
                name: self.runtime.vtable_of(),
            });
            self.push(ValueType::I32);
        }
        self.emit(WasmOp::Const(ConstValue::I32((slot * VTABLE_SLOT_SIZE) as i32)));
        self.emit(WasmOp::Numeric {
            op: NumericOp::Add,
            ty: ValueType::I32,
        });
        self.emit(WasmOp::Memory {
            op: MemOp::Load,
            ty: ValueType::I32,
            offset: 0,
            align: 2,
        });

        self.builder.mark_call_indirect();
        // Intern now so the writers can resolve the type immutably.
        self.builder.types.intern(&signature);
        self.emit(WasmOp::CallIndirect {
            ty: signature.clone(),
        });
        // call_indirect consumes the index, the arguments and the receiver
        self.pop()?;
        for _ in &signature.params {
            self.pop()?;
        }
        for &result in &signature.results {
            self.push(result);
        }
        Ok(())
    }
}

fn slot_width(ty: ValueType) -> u32 {
    match ty {
        ValueType::I64 | ValueType::F64 => 2,
        _ => 1,
    }
}

/// The conditionals that can fuse with a pending three-way compare.
fn is_zero_conditional(opcode: u8) -> bool {
    (op::IFEQ..=op::IFLE).contains(&opcode)
}

/// Pick the Wasm comparison for a fused `cmp` + `if<op>` pair so that NaN
/// lands on the side the bias dictates. `jump_if_false` marks pairs whose
/// clean comparison expresses the fall-through predicate.
fn fuse_compare(opcode: u8, bias: i32) -> (CmpOp, bool) {
    match opcode {
        op::IFEQ => (CmpOp::Eq, false),
        op::IFNE => (CmpOp::Eq, true),
        op::IFLT => {
            if bias <= 0 {
                (CmpOp::Ge, true)
            } else {
                (CmpOp::Lt, false)
            }
        }
        op::IFGE => {
            if bias <= 0 {
                (CmpOp::Ge, false)
            } else {
                (CmpOp::Lt, true)
            }
        }
        op::IFGT => {
            if bias <= 0 {
                (CmpOp::Gt, false)
            } else {
                (CmpOp::Le, true)
            }
        }
        _ => {
            // ifle
            if bias < 0 {
                (CmpOp::Gt, true)
            } else {
                (CmpOp::Le, false)
            }
        }
    }
}

/// Advance the reader past an instruction's operands in dead code.
fn skip_operands(opcode: u8, reader: &mut BytecodeReader) -> Result<(), WasmError> {
    use crate::compiler::bytecode::opcodes::{OperandKind, opcode_info};
    let info = match opcode_info(opcode) {
        Some(info) => info,
        None => return_input_error!("unsupported opcode 0x{:02x}", opcode),
    };
    match info.operands {
        OperandKind::None => {}
        OperandKind::SignedByte
        | OperandKind::PoolIndexByte
        | OperandKind::LocalIndex
        | OperandKind::ArrayType => {
            reader.read_u8()?;
        }
        OperandKind::SignedShort
        | OperandKind::PoolIndex
        | OperandKind::BranchOffset
        | OperandKind::LocalAndConst => {
            reader.read_u16()?;
        }
        OperandKind::PoolIndexPair => {
            reader.read_u16()?;
            reader.read_u16()?;
        }
        OperandKind::PoolIndexAndDims => {
            reader.read_u16()?;
            reader.read_u8()?;
        }
        OperandKind::BranchOffsetWide => {
            reader.read_i32()?;
        }
        OperandKind::TableSwitch => {
            reader.align_to_4();
            reader.read_i32()?;
            let low = reader.read_i32()?;
            let high = reader.read_i32()?;
            for _ in 0..(i64::from(high) - i64::from(low) + 1).max(0) {
                reader.read_i32()?;
            }
        }
        OperandKind::LookupSwitch => {
            reader.align_to_4();
            reader.read_i32()?;
            let count = reader.read_i32()?;
            for _ in 0..count.max(0) {
                reader.read_i32()?;
                reader.read_i32()?;
            }
        }
        OperandKind::WidePrefix => {
            let wide_opcode = reader.read_u8()?;
            reader.read_u16()?;
            if wide_opcode == op::IINC {
                reader.read_u16()?;
            }
        }
    }
    Ok(())
}
