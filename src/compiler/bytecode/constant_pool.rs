//! Per-class constant pool, as delivered by the class-file parser.
//!
//! Indices are 1-based and the wide constants (`long`, `double`) occupy two
//! slots, so the parser fills the unusable follower slots with
//! [`PoolConstant::Placeholder`]. All symbolic references arrive with their
//! names already resolved; the compiler never touches raw UTF-8 indices.

use crate::compiler::compiler_errors::WasmError;
use crate::return_input_error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PoolConstant {
    /// Slot 0 and the shadow slot after a wide constant
    Placeholder,
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Class(String),
    FieldRef {
        class_name: String,
        name: String,
        descriptor: String,
    },
    MethodRef {
        class_name: String,
        name: String,
        descriptor: String,
    },
    InterfaceMethodRef {
        class_name: String,
        name: String,
        descriptor: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    entries: Vec<PoolConstant>,
}

impl ConstantPool {
    pub fn new(entries: Vec<PoolConstant>) -> Self {
        ConstantPool { entries }
    }

    /// Raw 1-based access.
    pub fn get(&self, index: u16) -> Result<&PoolConstant, WasmError> {
        if index == 0 {
            return_input_error!("constant pool index 0 is reserved");
        }
        match self.entries.get(index as usize) {
            Some(PoolConstant::Placeholder) => {
                return_input_error!("constant pool index {} is a wide-constant shadow slot", index)
            }
            Some(entry) => Ok(entry),
            None => return_input_error!("constant pool index {} out of range", index),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, WasmError> {
        match self.get(index)? {
            PoolConstant::Class(name) => Ok(name),
            other => return_input_error!("expected class reference at pool index {}, found {:?}", index, other),
        }
    }

    pub fn field_ref(&self, index: u16) -> Result<(&str, &str, &str), WasmError> {
        match self.get(index)? {
            PoolConstant::FieldRef {
                class_name,
                name,
                descriptor,
            } => Ok((class_name, name, descriptor)),
            other => return_input_error!("expected field reference at pool index {}, found {:?}", index, other),
        }
    }

    /// Method references; plain and interface references share a shape.
    pub fn method_ref(&self, index: u16) -> Result<(&str, &str, &str), WasmError> {
        match self.get(index)? {
            PoolConstant::MethodRef {
                class_name,
                name,
                descriptor,
            }
            | PoolConstant::InterfaceMethodRef {
                class_name,
                name,
                descriptor,
            } => Ok((class_name, name, descriptor)),
            other => return_input_error!("expected method reference at pool index {}, found {:?}", index, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ConstantPool {
        ConstantPool::new(vec![
            PoolConstant::Placeholder,
            PoolConstant::Integer(500),
            PoolConstant::Long(1 << 40),
            PoolConstant::Placeholder,
            PoolConstant::Class("com/example/Point".to_owned()),
            PoolConstant::MethodRef {
                class_name: "com/example/Point".to_owned(),
                name: "norm".to_owned(),
                descriptor: "()D".to_owned(),
            },
        ])
    }

    #[test]
    fn one_based_with_shadow_slots() {
        let pool = pool();
        assert_eq!(pool.get(1).unwrap(), &PoolConstant::Integer(500));
        assert_eq!(pool.get(2).unwrap(), &PoolConstant::Long(1 << 40));
        assert!(pool.get(0).is_err());
        assert!(pool.get(3).is_err());
        assert!(pool.get(9).is_err());
    }

    #[test]
    fn typed_accessors_check_the_tag() {
        let pool = pool();
        assert_eq!(pool.class_name(4).unwrap(), "com/example/Point");
        let (class, name, descriptor) = pool.method_ref(5).unwrap();
        assert_eq!((class, name, descriptor), ("com/example/Point", "norm", "()D"));
        assert!(pool.field_ref(5).is_err());
        assert!(pool.method_ref(1).is_err());
    }
}
