//! Value and function types shared by the whole pipeline.
//!
//! [`ValueType`] is the tagged enumeration of every type the compiler can
//! name: the four Wasm leaf kinds plus `v128` and the reference kinds, the
//! sub-integer storage kinds that only appear inside struct and array field
//! declarations, and the composite indicators used in the type section.

use crate::compiler::compiler_errors::WasmError;
use crate::return_input_error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
    V128,
    Funcref,
    Externref,
    Void,
    // Storage kinds, only valid inside struct/array fields
    I8,
    I16,
    // Composite indicators for the type section
    Func,
    Struct,
    Array,
    RefType,
}

impl ValueType {
    /// One-byte wire code of this kind in the binary format.
    pub fn code(self) -> u8 {
        match self {
            ValueType::I32 => 0x7F,
            ValueType::I64 => 0x7E,
            ValueType::F32 => 0x7D,
            ValueType::F64 => 0x7C,
            ValueType::V128 => 0x7B,
            ValueType::I8 => 0x78,
            ValueType::I16 => 0x77,
            ValueType::Funcref => 0x70,
            ValueType::Externref => 0x6F,
            ValueType::RefType => 0x6B,
            ValueType::Func => 0x60,
            ValueType::Struct => 0x5F,
            ValueType::Array => 0x5E,
            ValueType::Void => 0x40,
        }
    }

    /// True for the kinds that may appear in a function signature or on the
    /// operand stack.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            ValueType::I32
                | ValueType::I64
                | ValueType::F32
                | ValueType::F64
                | ValueType::V128
                | ValueType::Funcref
                | ValueType::Externref
        )
    }

    /// True for `i32`/`i64`/`f32`/`f64`.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ValueType::I32 | ValueType::I64 | ValueType::F32 | ValueType::F64
        )
    }

    /// Name used by the text format.
    pub fn name(self) -> &'static str {
        match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::V128 => "v128",
            ValueType::I8 => "i8",
            ValueType::I16 => "i16",
            ValueType::Funcref => "funcref",
            ValueType::Externref => "externref",
            ValueType::RefType => "ref",
            ValueType::Func => "func",
            ValueType::Struct => "struct",
            ValueType::Array => "array",
            ValueType::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<ValueType> {
        match name {
            "i32" => Some(ValueType::I32),
            "i64" => Some(ValueType::I64),
            "f32" => Some(ValueType::F32),
            "f64" => Some(ValueType::F64),
            "v128" => Some(ValueType::V128),
            "funcref" => Some(ValueType::Funcref),
            "externref" => Some(ValueType::Externref),
            _ => None,
        }
    }

    /// Map one field-descriptor character of the source bytecode onto the
    /// value type it occupies on the operand stack. Sub-integer kinds widen
    /// to `i32` on the stack; the storage kind is only kept for fields.
    pub fn from_descriptor_char(ch: char) -> Result<ValueType, WasmError> {
        match ch {
            'Z' | 'B' | 'C' | 'S' | 'I' => Ok(ValueType::I32),
            'J' => Ok(ValueType::I64),
            'F' => Ok(ValueType::F32),
            'D' => Ok(ValueType::F64),
            'L' | '[' => Ok(ValueType::Externref),
            'V' => Ok(ValueType::Void),
            _ => return_input_error!("invalid type descriptor character '{}'", ch),
        }
    }

    /// Storage kind of a field descriptor character, keeping the sub-integer
    /// widths structs and arrays declare.
    pub fn storage_from_descriptor_char(ch: char) -> Result<ValueType, WasmError> {
        match ch {
            'Z' | 'B' => Ok(ValueType::I8),
            'C' | 'S' => Ok(ValueType::I16),
            _ => ValueType::from_descriptor_char(ch),
        }
    }
}

/// A struct or array field: storage type plus its source-level name.
/// Field order is significant and fixed at first emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedStorageType {
    pub ty: ValueType,
    pub name: String,
}

impl NamedStorageType {
    pub fn new(ty: ValueType, name: impl Into<String>) -> Self {
        NamedStorageType {
            ty,
            name: name.into(),
        }
    }
}

/// An ordered parameter list and an ordered result list. Two function types
/// compare equal iff both lists compare equal element-wise, which is what the
/// type manager's canonicalisation relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        FunctionType { params, results }
    }

    /// Build a function type from a source method descriptor like `(II)J`.
    ///
    /// `receiver` prepends the implicit `this` parameter of instance methods.
    pub fn from_descriptor(
        descriptor: &str,
        receiver: Option<ValueType>,
    ) -> Result<FunctionType, WasmError> {
        let mut params = Vec::new();
        if let Some(this_ty) = receiver {
            params.push(this_ty);
        }

        let mut chars = descriptor.chars();
        if chars.next() != Some('(') {
            return_input_error!("method descriptor must start with '(': {}", descriptor);
        }

        let mut results = Vec::new();
        let mut in_params = true;
        while let Some(ch) = chars.next() {
            let target = if in_params { &mut params } else { &mut results };
            match ch {
                ')' => {
                    if !in_params {
                        return_input_error!("unbalanced ')' in descriptor {}", descriptor);
                    }
                    in_params = false;
                }
                'L' => {
                    // Consume the class name up to ';'
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == ';' {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return_input_error!("unterminated class reference in {}", descriptor);
                    }
                    target.push(ValueType::Externref);
                }
                '[' => {
                    // Array of anything is one reference; skip the element
                    let mut elem = chars.next();
                    while elem == Some('[') {
                        elem = chars.next();
                    }
                    match elem {
                        Some('L') => {
                            let mut closed = false;
                            for inner in chars.by_ref() {
                                if inner == ';' {
                                    closed = true;
                                    break;
                                }
                            }
                            if !closed {
                                return_input_error!(
                                    "unterminated array element in {}",
                                    descriptor
                                );
                            }
                        }
                        Some(prim) => {
                            ValueType::from_descriptor_char(prim)?;
                        }
                        None => {
                            return_input_error!("truncated array descriptor in {}", descriptor)
                        }
                    }
                    target.push(ValueType::Externref);
                }
                'V' => {
                    if in_params {
                        return_input_error!("void parameter in descriptor {}", descriptor);
                    }
                    // Void result contributes nothing
                }
                prim => {
                    target.push(ValueType::from_descriptor_char(prim)?);
                }
            }
        }

        if in_params {
            return_input_error!("missing ')' in descriptor {}", descriptor);
        }

        debug_assert!(params.iter().all(|ty| ty.is_leaf()));
        Ok(FunctionType::new(params, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_with_primitives() {
        let ty = FunctionType::from_descriptor("(IJ)D", None).unwrap();
        assert_eq!(ty.params, vec![ValueType::I32, ValueType::I64]);
        assert_eq!(ty.results, vec![ValueType::F64]);
    }

    #[test]
    fn descriptor_with_references_and_arrays() {
        let ty = FunctionType::from_descriptor("(Ljava/lang/String;[I[[D)V", None).unwrap();
        assert_eq!(
            ty.params,
            vec![ValueType::Externref, ValueType::Externref, ValueType::Externref]
        );
        assert!(ty.results.is_empty());
    }

    #[test]
    fn descriptor_with_receiver() {
        let ty =
            FunctionType::from_descriptor("(I)I", Some(ValueType::Externref)).unwrap();
        assert_eq!(ty.params, vec![ValueType::Externref, ValueType::I32]);
    }

    #[test]
    fn malformed_descriptor_is_an_input_error() {
        assert!(FunctionType::from_descriptor("II)I", None).is_err());
        assert!(FunctionType::from_descriptor("(Ljava/lang/String", None).is_err());
        assert!(FunctionType::from_descriptor("(Q)I", None).is_err());
    }

    #[test]
    fn storage_kinds_stay_narrow_in_fields_only() {
        assert_eq!(
            ValueType::storage_from_descriptor_char('Z').unwrap(),
            ValueType::I8
        );
        assert_eq!(
            ValueType::storage_from_descriptor_char('C').unwrap(),
            ValueType::I16
        );
        assert_eq!(ValueType::from_descriptor_char('Z').unwrap(), ValueType::I32);
        assert!(!ValueType::I8.is_leaf());
    }
}
