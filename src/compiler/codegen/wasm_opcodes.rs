//! The Wasm opcode table.
//!
//! Maps every instruction family the compiler emits onto its wire code and
//! its text-format mnemonic. One-byte opcodes are plain values; prefix-encoded
//! opcodes (the saturating truncations and the GC-experimental family) are
//! 16-bit constants whose high byte is written first.
//!
//! The binary writer asks for codes, the text writer asks for names, and the
//! text parser resolves mnemonics back through [`lookup_mnemonic`].

use crate::compiler::codegen::instructions::{
    ArrayOp, ConvertOp, GlobalOp, LocalOp, MemOp, NumericOp, StructOp,
};
use crate::compiler::codegen::value_types::ValueType;
use crate::compiler::compiler_errors::WasmError;
use crate::return_input_error;

/// Control and structural opcodes.
#[allow(dead_code)]
pub mod ctrl {
    pub const UNREACHABLE: u16 = 0x00;
    pub const NOP: u16 = 0x01;
    pub const BLOCK: u16 = 0x02;
    pub const LOOP: u16 = 0x03;
    pub const IF: u16 = 0x04;
    pub const ELSE: u16 = 0x05;
    pub const TRY: u16 = 0x06;
    pub const CATCH: u16 = 0x07;
    pub const THROW: u16 = 0x08;
    pub const RETHROW: u16 = 0x09;
    pub const BR_ON_EXN: u16 = 0x0A;
    pub const END: u16 = 0x0B;
    pub const BR: u16 = 0x0C;
    pub const BR_IF: u16 = 0x0D;
    pub const BR_TABLE: u16 = 0x0E;
    pub const RETURN: u16 = 0x0F;
    pub const CALL: u16 = 0x10;
    pub const CALL_INDIRECT: u16 = 0x11;
    pub const DROP: u16 = 0x1A;
    pub const SELECT: u16 = 0x1B;
    pub const LOCAL_GET: u16 = 0x20;
    pub const LOCAL_SET: u16 = 0x21;
    pub const LOCAL_TEE: u16 = 0x22;
    pub const GLOBAL_GET: u16 = 0x23;
    pub const GLOBAL_SET: u16 = 0x24;
    pub const MEMORY_SIZE: u16 = 0x3F;
    pub const MEMORY_GROW: u16 = 0x40;
    pub const I32_CONST: u16 = 0x41;
    pub const I64_CONST: u16 = 0x42;
    pub const F32_CONST: u16 = 0x43;
    pub const F64_CONST: u16 = 0x44;
    pub const REF_NULL: u16 = 0xD0;
    pub const REF_IS_NULL: u16 = 0xD1;
    pub const REF_FUNC: u16 = 0xD2;
    pub const REF_EQ: u16 = 0xD5;
}

/// Emit a one-byte or prefix-encoded opcode into a byte sink.
pub fn push_opcode(out: &mut Vec<u8>, code: u16) {
    if code > 0xFF {
        out.push((code >> 8) as u8);
        out.push((code & 0xFF) as u8);
    } else {
        out.push(code as u8);
    }
}

/// Code and mnemonic of a constant push for `ty`.
pub fn const_op(ty: ValueType) -> (u16, &'static str) {
    match ty {
        ValueType::I32 => (ctrl::I32_CONST, "i32.const"),
        ValueType::I64 => (ctrl::I64_CONST, "i64.const"),
        ValueType::F32 => (ctrl::F32_CONST, "f32.const"),
        ValueType::F64 => (ctrl::F64_CONST, "f64.const"),
        other => unreachable!("constant of non-numeric type {:?}", other),
    }
}

pub fn local_op(op: LocalOp) -> (u16, &'static str) {
    match op {
        LocalOp::Get => (ctrl::LOCAL_GET, "local.get"),
        LocalOp::Set => (ctrl::LOCAL_SET, "local.set"),
        LocalOp::Tee => (ctrl::LOCAL_TEE, "local.tee"),
    }
}

pub fn global_op(op: GlobalOp) -> (u16, &'static str) {
    match op {
        GlobalOp::Get => (ctrl::GLOBAL_GET, "global.get"),
        GlobalOp::Set => (ctrl::GLOBAL_SET, "global.set"),
    }
}

/// Code and mnemonic of a numeric operation on `ty`.
///
/// The family is dense: the four numeric types each own a contiguous code
/// range, so this match is the table itself.
pub fn numeric_op(op: NumericOp, ty: ValueType) -> Result<(u16, &'static str), WasmError> {
    use NumericOp::*;
    use ValueType::*;

    let entry = match (ty, op) {
        (I32, Eqz) => (0x45, "i32.eqz"),
        (I32, Eq) => (0x46, "i32.eq"),
        (I32, Ne) => (0x47, "i32.ne"),
        (I32, LtS) => (0x48, "i32.lt_s"),
        (I32, LtU) => (0x49, "i32.lt_u"),
        (I32, GtS) => (0x4A, "i32.gt_s"),
        (I32, GtU) => (0x4B, "i32.gt_u"),
        (I32, LeS) => (0x4C, "i32.le_s"),
        (I32, LeU) => (0x4D, "i32.le_u"),
        (I32, GeS) => (0x4E, "i32.ge_s"),
        (I32, GeU) => (0x4F, "i32.ge_u"),
        (I64, Eqz) => (0x50, "i64.eqz"),
        (I64, Eq) => (0x51, "i64.eq"),
        (I64, Ne) => (0x52, "i64.ne"),
        (I64, LtS) => (0x53, "i64.lt_s"),
        (I64, LtU) => (0x54, "i64.lt_u"),
        (I64, GtS) => (0x55, "i64.gt_s"),
        (I64, GtU) => (0x56, "i64.gt_u"),
        (I64, LeS) => (0x57, "i64.le_s"),
        (I64, LeU) => (0x58, "i64.le_u"),
        (I64, GeS) => (0x59, "i64.ge_s"),
        (I64, GeU) => (0x5A, "i64.ge_u"),
        (F32, Eq) => (0x5B, "f32.eq"),
        (F32, Ne) => (0x5C, "f32.ne"),
        (F32, Lt) => (0x5D, "f32.lt"),
        (F32, Gt) => (0x5E, "f32.gt"),
        (F32, Le) => (0x5F, "f32.le"),
        (F32, Ge) => (0x60, "f32.ge"),
        (F64, Eq) => (0x61, "f64.eq"),
        (F64, Ne) => (0x62, "f64.ne"),
        (F64, Lt) => (0x63, "f64.lt"),
        (F64, Gt) => (0x64, "f64.gt"),
        (F64, Le) => (0x65, "f64.le"),
        (F64, Ge) => (0x66, "f64.ge"),
        (I32, Clz) => (0x67, "i32.clz"),
        (I32, Ctz) => (0x68, "i32.ctz"),
        (I32, Popcnt) => (0x69, "i32.popcnt"),
        (I32, Add) => (0x6A, "i32.add"),
        (I32, Sub) => (0x6B, "i32.sub"),
        (I32, Mul) => (0x6C, "i32.mul"),
        (I32, DivS) => (0x6D, "i32.div_s"),
        (I32, DivU) => (0x6E, "i32.div_u"),
        (I32, RemS) => (0x6F, "i32.rem_s"),
        (I32, RemU) => (0x70, "i32.rem_u"),
        (I32, And) => (0x71, "i32.and"),
        (I32, Or) => (0x72, "i32.or"),
        (I32, Xor) => (0x73, "i32.xor"),
        (I32, Shl) => (0x74, "i32.shl"),
        (I32, ShrS) => (0x75, "i32.shr_s"),
        (I32, ShrU) => (0x76, "i32.shr_u"),
        (I32, Rotl) => (0x77, "i32.rotl"),
        (I32, Rotr) => (0x78, "i32.rotr"),
        (I64, Clz) => (0x79, "i64.clz"),
        (I64, Ctz) => (0x7A, "i64.ctz"),
        (I64, Popcnt) => (0x7B, "i64.popcnt"),
        (I64, Add) => (0x7C, "i64.add"),
        (I64, Sub) => (0x7D, "i64.sub"),
        (I64, Mul) => (0x7E, "i64.mul"),
        (I64, DivS) => (0x7F, "i64.div_s"),
        (I64, DivU) => (0x80, "i64.div_u"),
        (I64, RemS) => (0x81, "i64.rem_s"),
        (I64, RemU) => (0x82, "i64.rem_u"),
        (I64, And) => (0x83, "i64.and"),
        (I64, Or) => (0x84, "i64.or"),
        (I64, Xor) => (0x85, "i64.xor"),
        (I64, Shl) => (0x86, "i64.shl"),
        (I64, ShrS) => (0x87, "i64.shr_s"),
        (I64, ShrU) => (0x88, "i64.shr_u"),
        (I64, Rotl) => (0x89, "i64.rotl"),
        (I64, Rotr) => (0x8A, "i64.rotr"),
        (F32, Abs) => (0x8B, "f32.abs"),
        (F32, Neg) => (0x8C, "f32.neg"),
        (F32, Ceil) => (0x8D, "f32.ceil"),
        (F32, Floor) => (0x8E, "f32.floor"),
        (F32, Trunc) => (0x8F, "f32.trunc"),
        (F32, Nearest) => (0x90, "f32.nearest"),
        (F32, Sqrt) => (0x91, "f32.sqrt"),
        (F32, Add) => (0x92, "f32.add"),
        (F32, Sub) => (0x93, "f32.sub"),
        (F32, Mul) => (0x94, "f32.mul"),
        (F32, Div) => (0x95, "f32.div"),
        (F32, Min) => (0x96, "f32.min"),
        (F32, Max) => (0x97, "f32.max"),
        (F32, Copysign) => (0x98, "f32.copysign"),
        (F64, Abs) => (0x99, "f64.abs"),
        (F64, Neg) => (0x9A, "f64.neg"),
        (F64, Ceil) => (0x9B, "f64.ceil"),
        (F64, Floor) => (0x9C, "f64.floor"),
        (F64, Trunc) => (0x9D, "f64.trunc"),
        (F64, Nearest) => (0x9E, "f64.nearest"),
        (F64, Sqrt) => (0x9F, "f64.sqrt"),
        (F64, Add) => (0xA0, "f64.add"),
        (F64, Sub) => (0xA1, "f64.sub"),
        (F64, Mul) => (0xA2, "f64.mul"),
        (F64, Div) => (0xA3, "f64.div"),
        (F64, Min) => (0xA4, "f64.min"),
        (F64, Max) => (0xA5, "f64.max"),
        (F64, Copysign) => (0xA6, "f64.copysign"),
        (Externref, RefNull) => (ctrl::REF_NULL, "ref.null"),
        (Externref, RefIsNull) => (ctrl::REF_IS_NULL, "ref.is_null"),
        (Externref, RefEq) => (ctrl::REF_EQ, "ref.eq"),
        (ty, op) => {
            return_input_error!("no wasm opcode for {:?} on type {:?}", op, ty)
        }
    };
    Ok(entry)
}

/// Code and mnemonic of a conversion cast. The float-to-integral entries are
/// the saturating 0xFC-prefixed forms.
pub fn convert_op(op: ConvertOp) -> (u16, &'static str) {
    match op {
        ConvertOp::I32WrapI64 => (0xA7, "i32.wrap_i64"),
        ConvertOp::I64ExtendI32S => (0xAC, "i64.extend_i32_s"),
        ConvertOp::I64ExtendI32U => (0xAD, "i64.extend_i32_u"),
        ConvertOp::F32ConvertI32S => (0xB2, "f32.convert_i32_s"),
        ConvertOp::F32ConvertI64S => (0xB4, "f32.convert_i64_s"),
        ConvertOp::F32DemoteF64 => (0xB6, "f32.demote_f64"),
        ConvertOp::F64ConvertI32S => (0xB7, "f64.convert_i32_s"),
        ConvertOp::F64ConvertI64S => (0xB9, "f64.convert_i64_s"),
        ConvertOp::F64PromoteF32 => (0xBB, "f64.promote_f32"),
        ConvertOp::I32ReinterpretF32 => (0xBC, "i32.reinterpret_f32"),
        ConvertOp::I64ReinterpretF64 => (0xBD, "i64.reinterpret_f64"),
        ConvertOp::F32ReinterpretI32 => (0xBE, "f32.reinterpret_i32"),
        ConvertOp::F64ReinterpretI64 => (0xBF, "f64.reinterpret_i64"),
        ConvertOp::I32Extend8S => (0xC0, "i32.extend8_s"),
        ConvertOp::I32Extend16S => (0xC1, "i32.extend16_s"),
        ConvertOp::I64Extend8S => (0xC2, "i64.extend8_s"),
        ConvertOp::I64Extend16S => (0xC3, "i64.extend16_s"),
        ConvertOp::I64Extend32S => (0xC4, "i64.extend32_s"),
        ConvertOp::I32TruncSatF32S => (0xFC00, "i32.trunc_sat_f32_s"),
        ConvertOp::I32TruncSatF64S => (0xFC02, "i32.trunc_sat_f64_s"),
        ConvertOp::I64TruncSatF32S => (0xFC04, "i64.trunc_sat_f32_s"),
        ConvertOp::I64TruncSatF64S => (0xFC06, "i64.trunc_sat_f64_s"),
    }
}

/// Code and mnemonic of a full-width linear-memory access on `ty`.
pub fn memory_op(op: MemOp, ty: ValueType) -> Result<(u16, &'static str), WasmError> {
    let entry = match (op, ty) {
        (MemOp::Load, ValueType::I32) => (0x28, "i32.load"),
        (MemOp::Load, ValueType::I64) => (0x29, "i64.load"),
        (MemOp::Load, ValueType::F32) => (0x2A, "f32.load"),
        (MemOp::Load, ValueType::F64) => (0x2B, "f64.load"),
        (MemOp::Store, ValueType::I32) => (0x36, "i32.store"),
        (MemOp::Store, ValueType::I64) => (0x37, "i64.store"),
        (MemOp::Store, ValueType::F32) => (0x38, "f32.store"),
        (MemOp::Store, ValueType::F64) => (0x39, "f64.store"),
        (op, ty) => return_input_error!("no memory opcode for {:?} on type {:?}", op, ty),
    };
    Ok(entry)
}

/// GC-experimental struct accessors (0xFB-prefixed).
pub fn struct_op(op: StructOp) -> (u16, &'static str) {
    match op {
        StructOp::New => (0xFB00, "struct.new"),
        StructOp::Get => (0xFB02, "struct.get"),
        StructOp::Set => (0xFB05, "struct.set"),
    }
}

/// GC-experimental array accessors (0xFB-prefixed). One opcode set is shared
/// by all element types; the type index immediate selects the array type.
pub fn array_op(op: ArrayOp) -> (u16, &'static str) {
    match op {
        ArrayOp::New => (0xFB06, "array.new"),
        ArrayOp::Get => (0xFB0B, "array.get"),
        ArrayOp::Set => (0xFB0E, "array.set"),
        ArrayOp::Len => (0xFB0F, "array.len"),
    }
}

/// A mnemonic resolved by the text parser, before immediates are read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextOp {
    Const(ValueType),
    Local(LocalOp),
    Global(GlobalOp),
    Numeric { op: NumericOp, ty: ValueType },
    Convert(ConvertOp),
    Memory { op: MemOp, ty: ValueType },
    BlockStart(BlockStartKind),
    Else,
    End,
    Br,
    BrIf,
    Return,
    Drop,
    Unreachable,
    Nop,
    Call,
    Throw,
    Rethrow,
    Catch,
    RefNull,
    RefIsNull,
    RefFunc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStartKind {
    Block,
    Loop,
    If,
    Try,
}

fn numeric_by_name(name: &str, ty: ValueType) -> Option<NumericOp> {
    use NumericOp::*;
    let is_int = matches!(ty, ValueType::I32 | ValueType::I64);
    let op = match name {
        "eqz" if is_int => Eqz,
        "eq" => Eq,
        "ne" => Ne,
        "lt_s" if is_int => LtS,
        "lt_u" if is_int => LtU,
        "gt_s" if is_int => GtS,
        "gt_u" if is_int => GtU,
        "le_s" if is_int => LeS,
        "le_u" if is_int => LeU,
        "ge_s" if is_int => GeS,
        "ge_u" if is_int => GeU,
        "lt" if !is_int => Lt,
        "gt" if !is_int => Gt,
        "le" if !is_int => Le,
        "ge" if !is_int => Ge,
        "clz" if is_int => Clz,
        "ctz" if is_int => Ctz,
        "popcnt" if is_int => Popcnt,
        "add" => Add,
        "sub" => Sub,
        "mul" => Mul,
        "div_s" if is_int => DivS,
        "div_u" if is_int => DivU,
        "rem_s" if is_int => RemS,
        "rem_u" if is_int => RemU,
        "and" if is_int => And,
        "or" if is_int => Or,
        "xor" if is_int => Xor,
        "shl" if is_int => Shl,
        "shr_s" if is_int => ShrS,
        "shr_u" if is_int => ShrU,
        "rotl" if is_int => Rotl,
        "rotr" if is_int => Rotr,
        "abs" if !is_int => Abs,
        "neg" if !is_int => Neg,
        "ceil" if !is_int => Ceil,
        "floor" if !is_int => Floor,
        "trunc" if !is_int => Trunc,
        "nearest" if !is_int => Nearest,
        "sqrt" if !is_int => Sqrt,
        "div" if !is_int => Div,
        "min" if !is_int => Min,
        "max" if !is_int => Max,
        "copysign" if !is_int => Copysign,
        _ => return None,
    };
    Some(op)
}

fn convert_by_name(full: &str) -> Option<ConvertOp> {
    let op = match full {
        "i32.wrap_i64" => ConvertOp::I32WrapI64,
        "i64.extend_i32_s" => ConvertOp::I64ExtendI32S,
        "i64.extend_i32_u" => ConvertOp::I64ExtendI32U,
        "f32.convert_i32_s" => ConvertOp::F32ConvertI32S,
        "f32.convert_i64_s" => ConvertOp::F32ConvertI64S,
        "f32.demote_f64" => ConvertOp::F32DemoteF64,
        "f64.convert_i32_s" => ConvertOp::F64ConvertI32S,
        "f64.convert_i64_s" => ConvertOp::F64ConvertI64S,
        "f64.promote_f32" => ConvertOp::F64PromoteF32,
        "i32.reinterpret_f32" => ConvertOp::I32ReinterpretF32,
        "i64.reinterpret_f64" => ConvertOp::I64ReinterpretF64,
        "f32.reinterpret_i32" => ConvertOp::F32ReinterpretI32,
        "f64.reinterpret_i64" => ConvertOp::F64ReinterpretI64,
        "i32.extend8_s" => ConvertOp::I32Extend8S,
        "i32.extend16_s" => ConvertOp::I32Extend16S,
        "i64.extend8_s" => ConvertOp::I64Extend8S,
        "i64.extend16_s" => ConvertOp::I64Extend16S,
        "i64.extend32_s" => ConvertOp::I64Extend32S,
        "i32.trunc_sat_f32_s" => ConvertOp::I32TruncSatF32S,
        "i32.trunc_sat_f64_s" => ConvertOp::I32TruncSatF64S,
        "i64.trunc_sat_f32_s" => ConvertOp::I64TruncSatF32S,
        "i64.trunc_sat_f64_s" => ConvertOp::I64TruncSatF64S,
        _ => return None,
    };
    Some(op)
}

/// Resolve a text mnemonic against the opcode table.
pub fn lookup_mnemonic(name: &str) -> Option<TextOp> {
    // Keywords without a type prefix
    match name {
        "block" => return Some(TextOp::BlockStart(BlockStartKind::Block)),
        "loop" => return Some(TextOp::BlockStart(BlockStartKind::Loop)),
        "if" => return Some(TextOp::BlockStart(BlockStartKind::If)),
        "try" => return Some(TextOp::BlockStart(BlockStartKind::Try)),
        "else" => return Some(TextOp::Else),
        "end" => return Some(TextOp::End),
        "br" => return Some(TextOp::Br),
        "br_if" => return Some(TextOp::BrIf),
        "return" => return Some(TextOp::Return),
        "drop" => return Some(TextOp::Drop),
        "unreachable" => return Some(TextOp::Unreachable),
        "nop" => return Some(TextOp::Nop),
        "call" => return Some(TextOp::Call),
        "throw" => return Some(TextOp::Throw),
        "rethrow" => return Some(TextOp::Rethrow),
        "catch" => return Some(TextOp::Catch),
        "local.get" => return Some(TextOp::Local(LocalOp::Get)),
        "local.set" => return Some(TextOp::Local(LocalOp::Set)),
        "local.tee" => return Some(TextOp::Local(LocalOp::Tee)),
        "global.get" => return Some(TextOp::Global(GlobalOp::Get)),
        "global.set" => return Some(TextOp::Global(GlobalOp::Set)),
        "ref.null" => return Some(TextOp::RefNull),
        "ref.is_null" => return Some(TextOp::RefIsNull),
        "ref.func" => return Some(TextOp::RefFunc),
        _ => {}
    }

    // Conversions carry two type names, match them whole
    if let Some(op) = convert_by_name(name) {
        return Some(TextOp::Convert(op));
    }

    // `<type>.<operation>` families
    let (ty_name, op_name) = name.split_once('.')?;
    let ty = ValueType::from_name(ty_name)?;
    match op_name {
        "const" => Some(TextOp::Const(ty)),
        "load" => Some(TextOp::Memory { op: MemOp::Load, ty }),
        "store" => Some(TextOp::Memory { op: MemOp::Store, ty }),
        _ => numeric_by_name(op_name, ty).map(|op| TextOp::Numeric { op, ty }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_families_share_one_symbolic_op() {
        assert_eq!(numeric_op(NumericOp::Add, ValueType::I32).unwrap().0, 0x6A);
        assert_eq!(numeric_op(NumericOp::Add, ValueType::I64).unwrap().0, 0x7C);
        assert_eq!(numeric_op(NumericOp::Add, ValueType::F32).unwrap().0, 0x92);
        assert_eq!(numeric_op(NumericOp::Add, ValueType::F64).unwrap().0, 0xA0);
    }

    #[test]
    fn rejects_ops_outside_their_family() {
        assert!(numeric_op(NumericOp::And, ValueType::F32).is_err());
        assert!(numeric_op(NumericOp::Sqrt, ValueType::I32).is_err());
        assert!(memory_op(MemOp::Load, ValueType::Externref).is_err());
    }

    #[test]
    fn prefix_opcodes_write_high_byte_first() {
        let mut out = Vec::new();
        push_opcode(&mut out, convert_op(ConvertOp::I32TruncSatF64S).0);
        assert_eq!(out, vec![0xFC, 0x02]);

        out.clear();
        push_opcode(&mut out, struct_op(StructOp::Get).0);
        assert_eq!(out, vec![0xFB, 0x02]);

        out.clear();
        push_opcode(&mut out, ctrl::BR);
        assert_eq!(out, vec![0x0C]);
    }

    #[test]
    fn mnemonic_lookup_round_trips_names() {
        for (op, ty) in [
            (NumericOp::Add, ValueType::I32),
            (NumericOp::Xor, ValueType::I64),
            (NumericOp::Copysign, ValueType::F64),
            (NumericOp::LtS, ValueType::I32),
            (NumericOp::Ge, ValueType::F32),
        ] {
            let (_, name) = numeric_op(op, ty).unwrap();
            assert_eq!(lookup_mnemonic(name), Some(TextOp::Numeric { op, ty }));
        }

        let (_, name) = convert_op(ConvertOp::I64Extend32S);
        assert_eq!(
            lookup_mnemonic(name),
            Some(TextOp::Convert(ConvertOp::I64Extend32S))
        );

        assert_eq!(lookup_mnemonic("i32.bogus"), None);
        assert_eq!(lookup_mnemonic("f32.and"), None);
    }
}
