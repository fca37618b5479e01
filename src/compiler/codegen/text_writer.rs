//! Text module emission.
//!
//! Renders the same structure as the binary writer into a single
//! `(module ...)` S-expression: two-space indentation, every top-level form
//! on its own line, function bodies one instruction per line. This is the
//! canonical debugging output and must be byte-for-byte reproducible for
//! identical inputs, so everything iterates in registry order and floats
//! print through the shortest round-trip formatter.

use crate::compiler::codegen::instructions::{
    ArrayOp, BlockOp, ConstValue, StructOp, WasmInstruction, WasmOp,
};
use crate::compiler::codegen::module_builder::ModuleBuilder;
use crate::compiler::codegen::value_types::ValueType;
use crate::compiler::codegen::wasm_opcodes;
use crate::compiler::compiler_errors::WasmError;
use crate::return_structural_error;
use crate::settings::CompilerOptions;
use std::fmt::Write as _;

pub fn write_module(
    builder: &ModuleBuilder,
    options: &CompilerOptions,
) -> Result<String, WasmError> {
    let mut out = String::new();
    out.push_str("(module\n");

    for ty in builder.types.function_types() {
        let mut line = String::from("  (type (func");
        if !ty.params.is_empty() {
            line.push_str(" (param");
            for param in &ty.params {
                line.push(' ');
                line.push_str(param.name());
            }
            line.push(')');
        }
        if !ty.results.is_empty() {
            line.push_str(" (result");
            for result in &ty.results {
                line.push(' ');
                line.push_str(result.name());
            }
            line.push(')');
        }
        line.push_str("))\n");
        out.push_str(&line);
    }
    if options.use_gc {
        for struct_type in builder.types.structs_in_order() {
            let mut line = String::from("  (type (struct");
            for field in &struct_type.fields {
                let _ = write!(
                    line,
                    " (field ${} (mut {}))",
                    sanitize_id(&field.name),
                    field.ty.name()
                );
            }
            line.push_str("))\n");
            out.push_str(&line);
        }
        for element in builder.types.array_elements() {
            let _ = writeln!(out, "  (type (array (mut {})))", element.name());
        }
    }

    for import in builder.imports() {
        let _ = writeln!(
            out,
            "  (import {:?} {:?} (func ${} (type {})))",
            import.module,
            import.field,
            sanitize_id(&import.name.signature_name),
            import.type_index
        );
    }

    if builder.call_indirect_used() {
        let count = builder.function_count();
        let _ = writeln!(out, "  (table {count} {count} funcref)");
    }
    if !builder.strings().is_empty() {
        let count = builder.strings().len();
        let _ = writeln!(out, "  (table {count} {count} externref)");
    }

    let data = data_bytes(builder)?;
    if !data.is_empty() {
        let pages = (data.len() as u32).div_ceil(65536);
        let _ = writeln!(out, "  (memory {pages})");
    }

    for global in builder.globals() {
        let init = global.init.unwrap_or(match global.ty {
            ValueType::I32 => ConstValue::I32(0),
            ValueType::I64 => ConstValue::I64(0),
            ValueType::F32 => ConstValue::F32(0.0),
            _ => ConstValue::F64(0.0),
        });
        let init_text = const_text(init);
        if global.mutable {
            let _ = writeln!(
                out,
                "  (global ${} (mut {}) ({init_text}))",
                sanitize_id(&global.name),
                global.ty.name()
            );
        } else {
            let _ = writeln!(
                out,
                "  (global ${} {} ({init_text}))",
                sanitize_id(&global.name),
                global.ty.name()
            );
        }
    }

    if builder.event_type_index().is_some() {
        out.push_str("  (event (param externref))\n");
    }

    for function in builder.functions() {
        let mut header = format!("  (func ${}", sanitize_id(&function.name.signature_name));
        let _ = write!(header, " (type {})", function.type_index);
        if !function.params.is_empty() {
            header.push_str(" (param");
            for param in &function.params {
                header.push(' ');
                header.push_str(param.name());
            }
            header.push(')');
        }
        // The type section carries results; repeat them for readability
        let ty = &builder.types.function_types()[function.type_index as usize];
        if !ty.results.is_empty() {
            header.push_str(" (result");
            for result in &ty.results {
                header.push(' ');
                header.push_str(result.name());
            }
            header.push(')');
        }
        out.push_str(&header);
        out.push('\n');
        if !function.locals.is_empty() {
            out.push_str("    (local");
            for local in &function.locals {
                out.push(' ');
                out.push_str(local.name());
            }
            out.push_str(")\n");
        }
        write_body(&mut out, &function.instructions, Some(builder), 1)?;
        out.push_str("  )\n");
    }

    if !data.is_empty() {
        out.push_str("  (export \"memory\" (memory 0))\n");
    }
    if let Some(id) = builder.strings_global() {
        let _ = writeln!(out, "  (export \"strings\" (global {id}))");
    }
    for export in builder.exports() {
        let id = builder.function_id(&export.signature_name)?;
        let _ = writeln!(out, "  (export {:?} (func {id}))", export.export_name);
    }

    if builder.call_indirect_used() {
        out.push_str("  (elem (i32.const 0) func");
        for id in 0..builder.function_count() {
            let _ = write!(out, " {id}");
        }
        out.push_str(")\n");
    }
    if !data.is_empty() {
        let _ = writeln!(out, "  (data (i32.const 0) \"{}\")", escape_data(&data));
    }

    out.push_str(")\n");
    Ok(out)
}

/// Render a plain instruction sequence, one per line with no module wrapper.
/// The inline-fragment round trip goes through here.
pub fn write_fragment(instructions: &[WasmInstruction]) -> Result<String, WasmError> {
    let mut out = String::new();
    write_body(&mut out, instructions, None, 0)?;
    Ok(out)
}

fn write_body(
    out: &mut String,
    instructions: &[WasmInstruction],
    builder: Option<&ModuleBuilder>,
    base_indent: usize,
) -> Result<(), WasmError> {
    let mut depth = 0usize;
    for instr in instructions {
        let dedent = matches!(
            instr.op,
            WasmOp::Block(BlockOp::End) | WasmOp::Block(BlockOp::Else) | WasmOp::Block(BlockOp::Catch)
        );
        let indent = base_indent + depth + 1 - usize::from(dedent && depth > 0);
        let text = instruction_text(instr, builder)?;
        for _ in 0..indent {
            out.push_str("  ");
        }
        out.push_str(&text);
        out.push('\n');

        match &instr.op {
            WasmOp::Block(BlockOp::Block { .. })
            | WasmOp::Block(BlockOp::Loop)
            | WasmOp::Block(BlockOp::If { .. })
            | WasmOp::Block(BlockOp::Try { .. }) => depth += 1,
            WasmOp::Block(BlockOp::End) => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn instruction_text(
    instr: &WasmInstruction,
    builder: Option<&ModuleBuilder>,
) -> Result<String, WasmError> {
    let text = match &instr.op {
        WasmOp::Const(value) => const_text(*value),
        WasmOp::Local { op, index } => {
            let (_, name) = wasm_opcodes::local_op(*op);
            format!("{name} {index}")
        }
        WasmOp::Global { op, name } => {
            let (_, mnemonic) = wasm_opcodes::global_op(*op);
            format!("{mnemonic} ${}", sanitize_id(name))
        }
        WasmOp::Numeric { op, ty } => {
            let (_, name) = wasm_opcodes::numeric_op(*op, *ty)?;
            if name == "ref.null" {
                "ref.null extern".to_owned()
            } else {
                name.to_owned()
            }
        }
        WasmOp::Convert(op) => wasm_opcodes::convert_op(*op).1.to_owned(),
        WasmOp::Call { name } => format!("call ${}", sanitize_id(&name.signature_name)),
        WasmOp::CallIndirect { ty } => {
            let Some(builder) = builder else {
                return_structural_error!("call_indirect is not valid in a text fragment");
            };
            match builder.types.find(ty) {
                Some(index) => format!("call_indirect (type {index})"),
                None => return_structural_error!("indirect call type was never interned"),
            }
        }
        WasmOp::Block(block) => block_text(block),
        WasmOp::Array { op, elem } => {
            let (_, name) = wasm_opcodes::array_op(*op);
            match (op, builder) {
                (ArrayOp::Len, _) => name.to_owned(),
                (_, Some(builder)) => {
                    let index = builder.types.array_type_index(*elem).unwrap_or(0);
                    format!("{name} {index}")
                }
                (_, None) => format!("{name} 0"),
            }
        }
        WasmOp::Struct {
            op,
            type_name,
            field_index,
        } => {
            let (_, name) = wasm_opcodes::struct_op(*op);
            let type_id = sanitize_id(type_name);
            match op {
                StructOp::New => format!("{name} ${type_id}"),
                _ => format!("{name} ${type_id} {field_index}"),
            }
        }
        WasmOp::Memory {
            op,
            ty,
            offset,
            align: _,
        } => {
            let (_, name) = wasm_opcodes::memory_op(*op, *ty)?;
            if *offset > 0 {
                format!("{name} offset={offset}")
            } else {
                name.to_owned()
            }
        }
        WasmOp::JumpPlaceholder(_) => {
            return_structural_error!("unresolved jump placeholder reached the text writer")
        }
    };
    Ok(text)
}

fn block_text(block: &BlockOp) -> String {
    match block {
        BlockOp::Return => "return".to_owned(),
        BlockOp::If { result } => with_result("if", *result),
        BlockOp::Else => "else".to_owned(),
        BlockOp::End => "end".to_owned(),
        BlockOp::Drop => "drop".to_owned(),
        BlockOp::Block { result } => with_result("block", *result),
        BlockOp::Loop => "loop".to_owned(),
        BlockOp::Br { depth } => format!("br {depth}"),
        BlockOp::BrIf { depth } => format!("br_if {depth}"),
        BlockOp::BrTable { depths, default } => {
            let mut text = String::from("br_table");
            for depth in depths {
                let _ = write!(text, " {depth}");
            }
            let _ = write!(text, " {default}");
            text
        }
        BlockOp::Unreachable => "unreachable".to_owned(),
        BlockOp::Try { result } => with_result("try", *result),
        BlockOp::Catch => "catch".to_owned(),
        BlockOp::Throw => "throw 0".to_owned(),
        BlockOp::Rethrow => "rethrow".to_owned(),
        BlockOp::BrOnExn { depth } => format!("br_on_exn {depth} 0"),
        BlockOp::MonitorEnter | BlockOp::MonitorExit => "drop".to_owned(),
    }
}

fn with_result(keyword: &str, result: ValueType) -> String {
    if result == ValueType::Void {
        keyword.to_owned()
    } else {
        format!("{keyword} (result {})", result.name())
    }
}

fn const_text(value: ConstValue) -> String {
    match value {
        ConstValue::I32(v) => format!("i32.const {v}"),
        ConstValue::I64(v) => format!("i64.const {v}"),
        ConstValue::F32(v) => format!("f32.const {}", float_text(f64::from(v), true)),
        ConstValue::F64(v) => format!("f64.const {}", float_text(v, false)),
    }
}

/// Shortest round-trip rendering with the text format's spellings for the
/// non-finite values.
fn float_text(value: f64, single: bool) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    if single {
        format!("{:?}", value as f32)
    } else {
        format!("{value:?}")
    }
}

/// Identifier characters the text format allows; everything else becomes
/// an underscore.
fn sanitize_id(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || "!#$%&'*+-./:<=>?@\\^_`|~".contains(ch) {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn escape_data(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for &byte in data {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(byte as char),
            _ => {
                let _ = write!(out, "\\{byte:02x}");
            }
        }
    }
    out
}

fn data_bytes(builder: &ModuleBuilder) -> Result<Vec<u8>, WasmError> {
    // Mirrors the binary writer's data layout exactly.
    let mut data = Vec::new();
    for struct_type in builder.types.structs_in_order() {
        for method in &struct_type.methods {
            let id = builder
                .function_id(&method.signature_name)
                .map(|id| id as i32)
                .unwrap_or(-1);
            data.extend_from_slice(&id.to_le_bytes());
        }
    }
    if !builder.strings().is_empty() {
        let toc_base = data.len() as u32;
        let bytes_base = toc_base + builder.strings().len() as u32 * 8;
        let mut running = bytes_base;
        for value in builder.strings() {
            data.extend_from_slice(&(running as i32).to_le_bytes());
            data.extend_from_slice(&(value.len() as i32).to_le_bytes());
            running += value.len() as u32;
        }
        for value in builder.strings() {
            data.extend_from_slice(value.as_bytes());
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::instructions::{LocalOp, NumericOp};

    fn instr(op: WasmOp) -> WasmInstruction {
        WasmInstruction::new(op, 0, 0)
    }

    #[test]
    fn fragment_renders_one_instruction_per_line() {
        let text = write_fragment(&[
            instr(WasmOp::Local {
                op: LocalOp::Get,
                index: 0,
            }),
            instr(WasmOp::Const(ConstValue::I32(1))),
            instr(WasmOp::Numeric {
                op: NumericOp::Add,
                ty: ValueType::I32,
            }),
        ])
        .unwrap();
        assert_eq!(text, "  local.get 0\n  i32.const 1\n  i32.add\n");
    }

    #[test]
    fn nesting_indents_and_dedents() {
        let text = write_fragment(&[
            instr(WasmOp::Block(BlockOp::Block {
                result: ValueType::Void,
            })),
            instr(WasmOp::Const(ConstValue::I32(1))),
            instr(WasmOp::Block(BlockOp::BrIf { depth: 0 })),
            instr(WasmOp::Block(BlockOp::End)),
        ])
        .unwrap();
        assert_eq!(text, "  block\n    i32.const 1\n    br_if 0\n  end\n");
    }

    #[test]
    fn if_with_result_prints_the_block_type() {
        let text = write_fragment(&[
            instr(WasmOp::Const(ConstValue::I32(1))),
            instr(WasmOp::Block(BlockOp::If {
                result: ValueType::I32,
            })),
            instr(WasmOp::Const(ConstValue::I32(13))),
            instr(WasmOp::Block(BlockOp::Else)),
            instr(WasmOp::Const(ConstValue::I32(76))),
            instr(WasmOp::Block(BlockOp::End)),
        ])
        .unwrap();
        assert!(text.contains("if (result i32)\n"));
        assert!(text.contains("  else\n"));
    }

    #[test]
    fn float_rendering_is_stable() {
        assert_eq!(const_text(ConstValue::F64(13.0)), "f64.const 13.0");
        assert_eq!(const_text(ConstValue::F64(0.1)), "f64.const 0.1");
        assert_eq!(const_text(ConstValue::F32(2.5)), "f32.const 2.5");
        assert_eq!(const_text(ConstValue::F64(f64::NAN)), "f64.const nan");
        assert_eq!(
            const_text(ConstValue::F64(f64::NEG_INFINITY)),
            "f64.const -inf"
        );
    }

    #[test]
    fn identifiers_are_sanitised() {
        assert_eq!(
            sanitize_id("com/example/Math.add(II)I"),
            "com/example/Math.add_II_I"
        );
    }
}
