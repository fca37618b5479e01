//! # Compiler Error Handling
//!
//! Unified error type for the whole pipeline. Every failure surfaces as a
//! [`WasmError`] carrying the message plus the class name, method name and
//! approximate source line the compiler was working on when it failed, so the
//! CLI can pinpoint the fault in the original source.
//!
//! ## Error categories
//!
//! - **Input**: missing class/method, malformed class file, unsupported
//!   source opcode or primitive (e.g. floating remainder)
//! - **Semantic**: abstract/native method marked for export, non-static
//!   export or import, reference to an undefined function or global
//! - **Structural**: control-flow reconstruction failed (irreducible graph),
//!   stack type mismatch at a merge point, malformed switch table
//! - **File**: an output file could not be opened, written or closed
//! - **Config**: malformed project configuration
//!
//! ## Error creation macros
//!
//! The `return_*_error!` macros build and return a [`WasmError`] in one step:
//!
//! ```text
//! return_input_error!("unknown class {}", class_name);
//! ```
//!
//! Method-level context is attached where the method is known, via
//! [`WasmError::in_method`], so the deeper layers never need to thread the
//! current class and method through every call.

use colour::{e_dark_yellow_ln, e_grey_ln, e_red_ln};
use std::fmt;

/// The unified compiler error.
///
/// `class_name`, `method_name` and `source_line` stay empty/zero until a layer
/// that knows the current method attaches them with [`WasmError::in_method`].
#[derive(Debug, Clone, PartialEq)]
pub struct WasmError {
    pub msg: String,
    pub class_name: String,
    pub method_name: String,
    pub source_line: u32,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Semantic,
    Structural,
    File,
    Config,
}

pub fn error_kind_to_str(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Input => "Input Error",
        ErrorKind::Semantic => "Semantic Error",
        ErrorKind::Structural => "Structural Error",
        ErrorKind::File => "File Error",
        ErrorKind::Config => "Malformed Config",
    }
}

impl WasmError {
    pub fn new(msg: impl Into<String>, kind: ErrorKind) -> WasmError {
        WasmError {
            msg: msg.into(),
            class_name: String::new(),
            method_name: String::new(),
            source_line: 0,
            kind,
        }
    }

    /// Attach the method context if no deeper layer set it already.
    pub fn in_method(mut self, class_name: &str, method_name: &str) -> Self {
        if self.class_name.is_empty() {
            self.class_name = class_name.to_owned();
            self.method_name = method_name.to_owned();
        }
        self
    }

    /// Attach the approximate source line if no deeper layer set it already.
    pub fn at_line(mut self, line: u32) -> Self {
        if self.source_line == 0 {
            self.source_line = line;
        }
        self
    }

    pub fn file_error(msg: impl Into<String>) -> Self {
        WasmError::new(msg, ErrorKind::File)
    }
}

impl fmt::Display for WasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", error_kind_to_str(self.kind), self.msg)?;
        if !self.class_name.is_empty() {
            write!(f, "\n  at {}.{}", self.class_name, self.method_name)?;
            if self.source_line > 0 {
                write!(f, " (line {})", self.source_line)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for WasmError {}

/// Returns a new WasmError for malformed or unsupported input bytecode.
///
/// Usage: `return_input_error!("unsupported opcode 0x{:02x}", op)`;
#[macro_export]
macro_rules! return_input_error {
    ($($arg:tt)*) => {
        return Err($crate::compiler::compiler_errors::WasmError::new(
            format!($($arg)*),
            $crate::compiler::compiler_errors::ErrorKind::Input,
        ))
    };
}

/// Returns a new WasmError for violations of the export/import rules or
/// references to undefined functions and globals.
#[macro_export]
macro_rules! return_semantic_error {
    ($($arg:tt)*) => {
        return Err($crate::compiler::compiler_errors::WasmError::new(
            format!($($arg)*),
            $crate::compiler::compiler_errors::ErrorKind::Semantic,
        ))
    };
}

/// Returns a new WasmError when no valid structured nesting exists for a
/// method's control flow, or the operand stack disagrees at a merge point.
#[macro_export]
macro_rules! return_structural_error {
    ($($arg:tt)*) => {
        return Err($crate::compiler::compiler_errors::WasmError::new(
            format!($($arg)*),
            $crate::compiler::compiler_errors::ErrorKind::Structural,
        ))
    };
}

/// Returns a new WasmError for output file failures.
#[macro_export]
macro_rules! return_file_error {
    ($($arg:tt)*) => {
        return Err($crate::compiler::compiler_errors::WasmError::new(
            format!($($arg)*),
            $crate::compiler::compiler_errors::ErrorKind::File,
        ))
    };
}

/// Returns a new WasmError for malformed project configuration.
#[macro_export]
macro_rules! return_config_error {
    ($($arg:tt)*) => {
        return Err($crate::compiler::compiler_errors::WasmError::new(
            format!($($arg)*),
            $crate::compiler::compiler_errors::ErrorKind::Config,
        ))
    };
}

/// Print one error to stderr in the format the CLI shows to users.
pub fn print_formatted_error(error: &WasmError) {
    e_red_ln!("{}", error_kind_to_str(error.kind));
    e_dark_yellow_ln!("  {}", error.msg);
    if !error.class_name.is_empty() {
        if error.source_line > 0 {
            e_grey_ln!(
                "  in {}.{} near line {}",
                error.class_name,
                error.method_name,
                error.source_line
            );
        } else {
            e_grey_ln!("  in {}.{}", error.class_name, error.method_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_attached_once() {
        let err = WasmError::new("stack underflow", ErrorKind::Structural)
            .in_method("com/example/Math", "clamp")
            .at_line(42)
            .in_method("com/example/Other", "outer")
            .at_line(7);

        assert_eq!(err.class_name, "com/example/Math");
        assert_eq!(err.method_name, "clamp");
        assert_eq!(err.source_line, 42);
    }

    #[test]
    fn display_includes_method_context() {
        let err = WasmError::new("boom", ErrorKind::Input).in_method("A", "m").at_line(3);
        let text = err.to_string();
        assert!(text.contains("Input Error"));
        assert!(text.contains("A.m"));
        assert!(text.contains("line 3"));
    }
}
