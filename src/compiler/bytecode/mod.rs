//! The parsed class-file contract.
//!
//! Class-file *parsing* is an external collaborator; this module is the data
//! model it hands the compiler: per-method constant pool, raw bytecode,
//! line-number table, local-variable table, access flags, superclass and
//! interface chain, and field list. The CLI exchanges this model with the
//! parser as JSON, which is why everything here derives serde.

pub mod constant_pool;
pub mod opcodes;
pub mod reader;

use serde::{Deserialize, Serialize};

pub use constant_pool::{ConstantPool, PoolConstant};
pub use reader::BytecodeReader;

/// Access flags of classes, fields and methods.
#[allow(dead_code)]
pub mod access {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const PROTECTED: u16 = 0x0004;
    pub const STATIC: u16 = 0x0008;
    pub const FINAL: u16 = 0x0010;
    pub const SYNCHRONIZED: u16 = 0x0020;
    pub const NATIVE: u16 = 0x0100;
    pub const INTERFACE: u16 = 0x0200;
    pub const ABSTRACT: u16 = 0x0400;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassFile {
    pub name: String,
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    pub access_flags: u16,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub methods: Vec<MethodInfo>,
    #[serde(default)]
    pub source_file: Option<String>,
    pub constant_pool: ConstantPool,
}

impl ClassFile {
    pub fn is_interface(&self) -> bool {
        self.access_flags & access::INTERFACE != 0
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub descriptor: String,
    pub access_flags: u16,
    #[serde(default)]
    pub code: Option<CodeAttribute>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & access::STATIC != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags & access::ABSTRACT != 0
    }

    pub fn is_native(&self) -> bool {
        self.access_flags & access::NATIVE != 0
    }

    pub fn export_annotation(&self) -> bool {
        self.annotations.iter().any(|a| matches!(a, Annotation::Export))
    }

    pub fn import_annotation(&self) -> Option<(&str, &str)> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::Import { module, name } => Some((module.as_str(), name.as_str())),
            _ => None,
        })
    }

    pub fn text_code_annotation(&self) -> Option<&str> {
        self.annotations.iter().find_map(|a| match a {
            Annotation::TextCode { code } => Some(code.as_str()),
            _ => None,
        })
    }
}

/// Source-language annotations the compiler recognises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Annotation {
    /// Export a static method under its simple name
    Export,
    /// Declare the method as an import from `module.name`; its body is
    /// ignored
    Import { module: String, name: String },
    /// Replace the method body with an inline Wasm text fragment
    TextCode { code: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    #[serde(default)]
    pub exception_table: Vec<ExceptionHandler>,
    #[serde(default)]
    pub line_numbers: Vec<LineNumberEntry>,
    #[serde(default)]
    pub local_variables: Vec<LocalVariableEntry>,
}

impl CodeAttribute {
    /// Source line of a bytecode offset, from the line-number table. Entries
    /// are sorted by `start_pc`; the last one at or before `offset` wins.
    pub fn line_of(&self, offset: u32) -> u32 {
        let mut line = 0;
        for entry in &self.line_numbers {
            if entry.start_pc > offset {
                break;
            }
            line = entry.line;
        }
        line
    }
}

/// One protected region: `[start_pc, end_pc)` is covered, control transfers
/// to `handler_pc` with the thrown reference on the stack. `catch_type` is
/// the already-resolved class name, or `None` for a catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub start_pc: u32,
    pub end_pc: u32,
    pub handler_pc: u32,
    #[serde(default)]
    pub catch_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineNumberEntry {
    pub start_pc: u32,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalVariableEntry {
    pub start_pc: u32,
    pub length: u32,
    pub name: String,
    pub descriptor: String,
    pub slot: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_lookup_takes_the_preceding_entry() {
        let code = CodeAttribute {
            max_stack: 0,
            max_locals: 0,
            bytecode: Vec::new(),
            exception_table: Vec::new(),
            line_numbers: vec![
                LineNumberEntry { start_pc: 0, line: 10 },
                LineNumberEntry { start_pc: 8, line: 12 },
                LineNumberEntry { start_pc: 20, line: 15 },
            ],
            local_variables: Vec::new(),
        };
        assert_eq!(code.line_of(0), 10);
        assert_eq!(code.line_of(7), 10);
        assert_eq!(code.line_of(8), 12);
        assert_eq!(code.line_of(19), 12);
        assert_eq!(code.line_of(100), 15);
    }

    #[test]
    fn class_file_round_trips_through_json() {
        let class = ClassFile {
            name: "com/example/Adder".to_owned(),
            super_name: Some("java/lang/Object".to_owned()),
            interfaces: Vec::new(),
            access_flags: access::PUBLIC,
            fields: vec![FieldInfo {
                name: "count".to_owned(),
                descriptor: "I".to_owned(),
                access_flags: access::STATIC,
            }],
            methods: vec![MethodInfo {
                name: "add".to_owned(),
                descriptor: "(II)I".to_owned(),
                access_flags: access::PUBLIC | access::STATIC,
                code: Some(CodeAttribute {
                    max_stack: 2,
                    max_locals: 2,
                    bytecode: vec![0x1A, 0x1B, 0x60, 0xAC],
                    exception_table: Vec::new(),
                    line_numbers: Vec::new(),
                    local_variables: Vec::new(),
                }),
                annotations: vec![Annotation::Export],
            }],
            source_file: Some("Adder.java".to_owned()),
            constant_pool: ConstantPool::default(),
        };

        let json = serde_json::to_string(&class).unwrap();
        let back: ClassFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, class.name);
        assert!(back.methods[0].export_annotation());
        assert_eq!(back.methods[0].code.as_ref().unwrap().bytecode.len(), 4);
    }
}
