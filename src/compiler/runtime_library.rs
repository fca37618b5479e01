//! Symbolic names of the runtime support library.
//!
//! When GC types are unavailable the compiler cannot express object
//! allocation, field access or reference comparison natively, so it emits
//! direct calls to helpers the runtime library supplies. Only the symbolic
//! names live here; any helper that stays undefined at module-finish time is
//! declared as an import so the host can provide it.
//!
//! The `ref_eq` and `vtable_of` helpers are configurable through the
//! property map; everything else lives in the fixed runtime class.

use crate::compiler::codegen::function_name::FunctionName;
use crate::compiler::codegen::value_types::ValueType;
use crate::compiler::compiler_errors::WasmError;
use crate::return_config_error;
use crate::settings::{CompilerOptions, RUNTIME_CLASS};

#[derive(Debug, Clone)]
pub struct RuntimeLibrary {
    ref_eq: FunctionName,
    vtable_of: FunctionName,
}

impl RuntimeLibrary {
    pub fn new(options: &CompilerOptions) -> Result<RuntimeLibrary, WasmError> {
        let ref_eq = match FunctionName::from_signature(&options.ref_eq) {
            Some(name) => name,
            None => return_config_error!("ref_eq is not a method signature: {}", options.ref_eq),
        };
        let vtable_of = match FunctionName::from_signature(&options.vtable_of) {
            Some(name) => name,
            None => {
                return_config_error!("vtable_of is not a method signature: {}", options.vtable_of)
            }
        };
        Ok(RuntimeLibrary { ref_eq, vtable_of })
    }

    fn helper(method: &str, descriptor: &str) -> FunctionName {
        FunctionName::new(RUNTIME_CLASS, method, descriptor)
    }

    /// Reference identity, `(ref, ref) -> i32`.
    pub fn ref_eq(&self) -> FunctionName {
        self.ref_eq.clone()
    }

    /// Vtable offset of an object, `(ref) -> i32`.
    pub fn vtable_of(&self) -> FunctionName {
        self.vtable_of.clone()
    }

    /// Class-tag test against a vtable offset, `(ref, i32) -> i32`.
    pub fn instance_of(&self) -> FunctionName {
        Self::helper("instanceOf", "(Ljava/lang/Object;I)Z")
    }

    /// Checked downcast, `(ref, i32) -> ref`. Throws on failure.
    pub fn cast(&self) -> FunctionName {
        Self::helper("cast", "(Ljava/lang/Object;I)Ljava/lang/Object;")
    }

    /// Object allocation from a vtable offset, `(i32) -> ref`.
    pub fn allocate(&self) -> FunctionName {
        Self::helper("allocate", "(I)Ljava/lang/Object;")
    }

    /// Interned string constant by id, `(i32) -> ref`.
    pub fn string_constant(&self) -> FunctionName {
        Self::helper("stringConstant", "(I)Ljava/lang/String;")
    }

    /// Typed instance-field read, `(ref, fieldIndex) -> value`.
    pub fn field_get(&self, ty: ValueType) -> FunctionName {
        match ty {
            ValueType::I32 => Self::helper("getInt", "(Ljava/lang/Object;I)I"),
            ValueType::I64 => Self::helper("getLong", "(Ljava/lang/Object;I)J"),
            ValueType::F32 => Self::helper("getFloat", "(Ljava/lang/Object;I)F"),
            ValueType::F64 => Self::helper("getDouble", "(Ljava/lang/Object;I)D"),
            _ => Self::helper("getRef", "(Ljava/lang/Object;I)Ljava/lang/Object;"),
        }
    }

    /// Typed instance-field write, `(ref, value, fieldIndex) -> ()`. The
    /// index comes last so call sites can append it without reshuffling.
    pub fn field_set(&self, ty: ValueType) -> FunctionName {
        match ty {
            ValueType::I32 => Self::helper("setInt", "(Ljava/lang/Object;II)V"),
            ValueType::I64 => Self::helper("setLong", "(Ljava/lang/Object;JI)V"),
            ValueType::F32 => Self::helper("setFloat", "(Ljava/lang/Object;FI)V"),
            ValueType::F64 => Self::helper("setDouble", "(Ljava/lang/Object;DI)V"),
            _ => Self::helper("setRef", "(Ljava/lang/Object;Ljava/lang/Object;I)V"),
        }
    }

    /// Array allocation, `(length, elementKind) -> ref`.
    pub fn array_new(&self) -> FunctionName {
        Self::helper("arrayNew", "(II)Ljava/lang/Object;")
    }

    /// Array length, `(ref) -> i32`.
    pub fn array_length(&self) -> FunctionName {
        Self::helper("arrayLength", "(Ljava/lang/Object;)I")
    }

    /// Typed array element read, `(ref, index) -> value`.
    pub fn array_get(&self, ty: ValueType) -> FunctionName {
        match ty {
            ValueType::I32 => Self::helper("arrayGetInt", "(Ljava/lang/Object;I)I"),
            ValueType::I64 => Self::helper("arrayGetLong", "(Ljava/lang/Object;I)J"),
            ValueType::F32 => Self::helper("arrayGetFloat", "(Ljava/lang/Object;I)F"),
            ValueType::F64 => Self::helper("arrayGetDouble", "(Ljava/lang/Object;I)D"),
            _ => Self::helper("arrayGetRef", "(Ljava/lang/Object;I)Ljava/lang/Object;"),
        }
    }

    /// Typed array element write, `(ref, index, value) -> ()`.
    pub fn array_set(&self, ty: ValueType) -> FunctionName {
        match ty {
            ValueType::I32 => Self::helper("arraySetInt", "(Ljava/lang/Object;II)V"),
            ValueType::I64 => Self::helper("arraySetLong", "(Ljava/lang/Object;IJ)V"),
            ValueType::F32 => Self::helper("arraySetFloat", "(Ljava/lang/Object;IF)V"),
            ValueType::F64 => Self::helper("arraySetDouble", "(Ljava/lang/Object;ID)V"),
            _ => Self::helper("arraySetRef", "(Ljava/lang/Object;ILjava/lang/Object;)V"),
        }
    }

    /// Three-way comparison for unfused `cmp` opcodes,
    /// `(a, b, nanBias) -> i32` for floats, `(a, b) -> i32` for longs.
    pub fn compare(&self, ty: ValueType) -> FunctionName {
        match ty {
            ValueType::I64 => Self::helper("cmpLong", "(JJ)I"),
            ValueType::F32 => Self::helper("cmpFloat", "(FFI)I"),
            _ => Self::helper("cmpDouble", "(DDI)I"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_helpers_parse_their_signatures() {
        let options = CompilerOptions::default();
        let runtime = RuntimeLibrary::new(&options).unwrap();
        assert_eq!(runtime.ref_eq().class_name, RUNTIME_CLASS);
        assert_eq!(runtime.vtable_of().method_name, "vtableOf");

        let mut options = CompilerOptions::default();
        options.ref_eq = "my/Host.same(Ljava/lang/Object;Ljava/lang/Object;)Z".to_owned();
        let runtime = RuntimeLibrary::new(&options).unwrap();
        assert_eq!(runtime.ref_eq().class_name, "my/Host");
    }

    #[test]
    fn malformed_helper_signature_is_a_config_error() {
        let mut options = CompilerOptions::default();
        options.ref_eq = "notASignature".to_owned();
        assert!(RuntimeLibrary::new(&options).is_err());
    }

    #[test]
    fn field_helpers_are_typed() {
        let runtime = RuntimeLibrary::new(&CompilerOptions::default()).unwrap();
        assert_eq!(runtime.field_get(ValueType::I64).method_name, "getLong");
        assert_eq!(runtime.field_set(ValueType::Externref).method_name, "setRef");
        assert_eq!(runtime.array_get(ValueType::F64).method_name, "arrayGetDouble");
    }
}
