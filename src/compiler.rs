//! The compiler core: the class-file contract, the codegen pipeline, the
//! runtime-library names and the unified error type.

pub mod bytecode;
pub mod codegen;
pub mod compiler_errors;
pub mod runtime_library;
