//! Binary module emission.
//!
//! Writes the 8-byte preamble and each section in its canonical order:
//! type, import, function, table, memory, global, event, export, element,
//! code, data, followed by the custom sections (debug names, source-map URL,
//! producers). Sections with no entries are elided. Each section is framed
//! as `id, size, payload` with LEB128 sizes.
//!
//! While the code section streams, the writer records the absolute byte
//! offset where each instruction lands so the source-map writer can map
//! file offsets back to source lines.

use crate::compiler::codegen::encoding::BinaryWriter;
use crate::compiler::codegen::instructions::{
    ArrayOp, BlockOp, ConstValue, StructOp, WasmInstruction, WasmOp,
};
use crate::compiler::codegen::module_builder::{FunctionRecord, ModuleBuilder};
use crate::compiler::codegen::value_types::ValueType;
use crate::compiler::codegen::wasm_opcodes::{self, ctrl};
use crate::compiler::compiler_errors::WasmError;
use crate::return_structural_error;
use crate::settings::CompilerOptions;

/// The required preamble: `\0asm`, version 1, little-endian.
pub const PREAMBLE: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

const SECTION_TYPE: u8 = 1;
const SECTION_IMPORT: u8 = 2;
const SECTION_FUNCTION: u8 = 3;
const SECTION_TABLE: u8 = 4;
const SECTION_MEMORY: u8 = 5;
const SECTION_GLOBAL: u8 = 6;
const SECTION_EXPORT: u8 = 7;
const SECTION_ELEMENT: u8 = 9;
const SECTION_CODE: u8 = 10;
const SECTION_DATA: u8 = 11;
const SECTION_EVENT: u8 = 13;
const SECTION_CUSTOM: u8 = 0;

const PAGE_SIZE: u32 = 65536;

/// One source mapping: an absolute byte offset in the emitted file and the
/// source position it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMapping {
    pub wasm_offset: u32,
    pub source_line: u32,
    pub source_file: String,
}

pub struct BinaryOutput {
    pub bytes: Vec<u8>,
    pub mappings: Vec<SourceMapping>,
}

pub fn write_module(
    builder: &ModuleBuilder,
    options: &CompilerOptions,
    module_name: &str,
) -> Result<BinaryOutput, WasmError> {
    // Sections are assembled in order, then framed; the code section's
    // absolute position is needed to finalise the source mappings.
    let mut sections: Vec<(u8, BinaryWriter)> = Vec::new();

    if options.spider_monkey {
        let mut payload = BinaryWriter::new();
        payload.write_string("GcFeatureOptIn");
        payload.write_varuint(3);
        sections.push((SECTION_CUSTOM, payload));
    }

    push_section(&mut sections, SECTION_TYPE, type_section(builder, options));
    push_section(&mut sections, SECTION_IMPORT, import_section(builder));
    push_section(&mut sections, SECTION_FUNCTION, function_section(builder));
    push_section(&mut sections, SECTION_TABLE, table_section(builder));

    let data = data_section_bytes(builder)?;
    push_section(&mut sections, SECTION_MEMORY, memory_section(&data));
    push_section(&mut sections, SECTION_GLOBAL, global_section(builder));
    push_section(&mut sections, SECTION_EVENT, event_section(builder));
    push_section(
        &mut sections,
        SECTION_EXPORT,
        export_section(builder, !data.is_empty())?,
    );
    push_section(&mut sections, SECTION_ELEMENT, element_section(builder));

    let (code, raw_mappings) = code_section(builder)?;
    let code_index = sections.len();
    sections.push((SECTION_CODE, code));

    push_section(&mut sections, SECTION_DATA, wrap_data_section(&data));

    if options.debug_names {
        sections.push((SECTION_CUSTOM, name_section(builder)));
        let mut payload = BinaryWriter::new();
        payload.write_string("sourceMappingURL");
        payload.write_string(&format!("{module_name}.wasm.map"));
        sections.push((SECTION_CUSTOM, payload));
    }
    sections.push((SECTION_CUSTOM, producers_section()));

    // Frame everything and fix the mappings up to absolute file offsets.
    let mut out = BinaryWriter::with_capacity(1024);
    out.write_bytes(&PREAMBLE);
    let mut code_payload_start = 0u32;
    for (index, (id, payload)) in sections.iter().enumerate() {
        out.write_byte(*id);
        out.write_varuint(payload.len() as u32);
        if index == code_index {
            code_payload_start = out.len() as u32;
        }
        out.write_stream(payload);
    }

    let mappings = raw_mappings
        .into_iter()
        .map(|m| SourceMapping {
            wasm_offset: m.wasm_offset + code_payload_start,
            source_line: m.source_line,
            source_file: m.source_file,
        })
        .collect();

    Ok(BinaryOutput {
        bytes: out.into_bytes(),
        mappings,
    })
}

fn push_section(sections: &mut Vec<(u8, BinaryWriter)>, id: u8, payload: BinaryWriter) {
    if !payload.is_empty() {
        sections.push((id, payload));
    }
}

// =============================================================================
// Sections
// =============================================================================

fn type_section(builder: &ModuleBuilder, options: &CompilerOptions) -> BinaryWriter {
    let function_types = builder.types.function_types();
    let struct_count = if options.use_gc {
        builder.types.structs_in_order().count()
    } else {
        0
    };
    let array_count = if options.use_gc {
        builder.types.array_elements().len()
    } else {
        0
    };
    let total = function_types.len() + struct_count + array_count;
    if total == 0 {
        return BinaryWriter::new();
    }

    let mut payload = BinaryWriter::new();
    payload.write_varuint(total as u32);
    for ty in function_types {
        payload.write_byte(ValueType::Func.code());
        payload.write_varuint(ty.params.len() as u32);
        for param in &ty.params {
            payload.write_byte(param.code());
        }
        payload.write_varuint(ty.results.len() as u32);
        for result in &ty.results {
            payload.write_byte(result.code());
        }
    }
    if options.use_gc {
        for struct_type in builder.types.structs_in_order() {
            payload.write_byte(ValueType::Struct.code());
            payload.write_varuint(struct_type.fields.len() as u32);
            for field in &struct_type.fields {
                payload.write_byte(field.ty.code());
                payload.write_byte(1); // mutable
            }
        }
        for element in builder.types.array_elements() {
            payload.write_byte(ValueType::Array.code());
            payload.write_byte(element.code());
            payload.write_byte(1); // mutable
        }
    }
    payload
}

fn import_section(builder: &ModuleBuilder) -> BinaryWriter {
    if builder.imports().is_empty() {
        return BinaryWriter::new();
    }
    let mut payload = BinaryWriter::new();
    payload.write_varuint(builder.imports().len() as u32);
    for import in builder.imports() {
        payload.write_string(&import.module);
        payload.write_string(&import.field);
        payload.write_byte(0x00); // function import
        payload.write_varuint(import.type_index);
    }
    payload
}

fn function_section(builder: &ModuleBuilder) -> BinaryWriter {
    if builder.functions().is_empty() {
        return BinaryWriter::new();
    }
    let mut payload = BinaryWriter::new();
    payload.write_varuint(builder.functions().len() as u32);
    for function in builder.functions() {
        payload.write_varuint(function.type_index);
    }
    payload
}

fn table_section(builder: &ModuleBuilder) -> BinaryWriter {
    let funcref_table = builder.call_indirect_used();
    let string_table = !builder.strings().is_empty();
    if !funcref_table && !string_table {
        return BinaryWriter::new();
    }
    let mut payload = BinaryWriter::new();
    payload.write_varuint(funcref_table as u32 + string_table as u32);
    if funcref_table {
        payload.write_byte(ValueType::Funcref.code());
        payload.write_byte(0x01); // bounded limits
        payload.write_varuint(builder.function_count());
        payload.write_varuint(builder.function_count());
    }
    if string_table {
        payload.write_byte(ValueType::Externref.code());
        payload.write_byte(0x01);
        payload.write_varuint(builder.strings().len() as u32);
        payload.write_varuint(builder.strings().len() as u32);
    }
    payload
}

fn memory_section(data: &[u8]) -> BinaryWriter {
    if data.is_empty() {
        return BinaryWriter::new();
    }
    let pages = (data.len() as u32).div_ceil(PAGE_SIZE);
    let mut payload = BinaryWriter::new();
    payload.write_varuint(1);
    payload.write_byte(0x00); // minimum only
    payload.write_varuint(pages);
    payload
}

fn global_section(builder: &ModuleBuilder) -> BinaryWriter {
    if builder.globals().is_empty() {
        return BinaryWriter::new();
    }
    let mut payload = BinaryWriter::new();
    payload.write_varuint(builder.globals().len() as u32);
    for global in builder.globals() {
        payload.write_byte(global.ty.code());
        payload.write_byte(global.mutable as u8);
        let init = global.init.unwrap_or(match global.ty {
            ValueType::I32 => ConstValue::I32(0),
            ValueType::I64 => ConstValue::I64(0),
            ValueType::F32 => ConstValue::F32(0.0),
            _ => ConstValue::F64(0.0),
        });
        write_const(&mut payload, init);
        payload.write_byte(ctrl::END as u8);
    }
    payload
}

fn event_section(builder: &ModuleBuilder) -> BinaryWriter {
    let Some(type_index) = builder.event_type_index() else {
        return BinaryWriter::new();
    };
    let mut payload = BinaryWriter::new();
    payload.write_varuint(1);
    payload.write_varuint(0); // attribute: exception
    payload.write_varuint(type_index);
    payload
}

fn export_section(builder: &ModuleBuilder, has_memory: bool) -> Result<BinaryWriter, WasmError> {
    let mut count = builder.exports().len() as u32;
    if has_memory {
        count += 1;
    }
    if builder.strings_global().is_some() {
        count += 1;
    }
    if count == 0 {
        return Ok(BinaryWriter::new());
    }
    let mut payload = BinaryWriter::new();
    payload.write_varuint(count);
    if has_memory {
        payload.write_string("memory");
        payload.write_byte(0x02);
        payload.write_varuint(0);
    }
    if let Some(id) = builder.strings_global() {
        payload.write_string("strings");
        payload.write_byte(0x03);
        payload.write_varuint(id);
    }
    for export in builder.exports() {
        payload.write_string(&export.export_name);
        payload.write_byte(0x00);
        payload.write_varuint(builder.function_id(&export.signature_name)?);
    }
    Ok(payload)
}

/// A 1:1 identity mapping from function id to table slot keeps the indirect
/// call lowering a plain vtable load.
fn element_section(builder: &ModuleBuilder) -> BinaryWriter {
    if !builder.call_indirect_used() {
        return BinaryWriter::new();
    }
    let mut payload = BinaryWriter::new();
    payload.write_varuint(1);
    payload.write_varuint(0); // active segment, table 0
    payload.write_byte(ctrl::I32_CONST as u8);
    payload.write_varint(0);
    payload.write_byte(ctrl::END as u8);
    payload.write_varuint(builder.function_count());
    for id in 0..builder.function_count() {
        payload.write_varuint(id);
    }
    payload
}

struct RawMapping {
    wasm_offset: u32,
    source_line: u32,
    source_file: String,
}

fn code_section(builder: &ModuleBuilder) -> Result<(BinaryWriter, Vec<RawMapping>), WasmError> {
    let mut payload = BinaryWriter::new();
    let mut mappings = Vec::new();
    payload.write_varuint(builder.functions().len() as u32);

    for function in builder.functions() {
        let mut body = BinaryWriter::new();
        let mut body_mappings: Vec<RawMapping> = Vec::new();
        write_locals(&mut body, &function.locals);

        let mut last_line = 0u32;
        for instr in &function.instructions {
            if instr.source_line > 0 && instr.source_line != last_line {
                body_mappings.push(RawMapping {
                    wasm_offset: body.len() as u32,
                    source_line: instr.source_line,
                    source_file: function
                        .source_file
                        .clone()
                        .unwrap_or_else(|| format!("{}.java", function.name.class_name)),
                });
                last_line = instr.source_line;
            }
            encode_instruction(&mut body, instr, builder, function)?;
        }
        body.write_byte(ctrl::END as u8);

        // Rebase this body's mappings onto the code payload: they sit after
        // this body's size prefix.
        let body_offset = payload.len() as u32 + leb_len(body.len() as u32);
        for mapping in body_mappings {
            mappings.push(RawMapping {
                wasm_offset: mapping.wasm_offset + body_offset,
                ..mapping
            });
        }
        payload.write_varuint(body.len() as u32);
        payload.write_stream(&body);
    }
    Ok((payload, mappings))
}

fn leb_len(value: u32) -> u32 {
    let mut value = value;
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Local declarations, run-length encoded by type.
fn write_locals(body: &mut BinaryWriter, locals: &[ValueType]) {
    let mut groups: Vec<(u32, ValueType)> = Vec::new();
    for &ty in locals {
        match groups.last_mut() {
            Some((count, last)) if *last == ty => *count += 1,
            _ => groups.push((1, ty)),
        }
    }
    body.write_varuint(groups.len() as u32);
    for (count, ty) in groups {
        body.write_varuint(count);
        body.write_byte(ty.code());
    }
}

fn data_section_bytes(builder: &ModuleBuilder) -> Result<Vec<u8>, WasmError> {
    let mut data = BinaryWriter::new();

    // Vtables: one function id per slot, in registration order. A slot
    // whose method never got a body (abstract, no override in the compiled
    // set) holds an out-of-range sentinel that traps on indirect call.
    for struct_type in builder.types.structs_in_order() {
        for method in &struct_type.methods {
            let id = builder
                .function_id(&method.signature_name)
                .map(|id| id as i32)
                .unwrap_or(-1);
            data.write_i32_le(id);
        }
    }

    // String table of contents, then the string bytes.
    if !builder.strings().is_empty() {
        let toc_base = data.len() as u32;
        let bytes_base = toc_base + builder.strings().len() as u32 * 8;
        let mut running = bytes_base;
        for value in builder.strings() {
            data.write_i32_le(running as i32);
            data.write_i32_le(value.len() as i32);
            running += value.len() as u32;
        }
        for value in builder.strings() {
            data.write_bytes(value.as_bytes());
        }
    }

    Ok(data.into_bytes())
}

fn wrap_data_section(data: &[u8]) -> BinaryWriter {
    if data.is_empty() {
        return BinaryWriter::new();
    }
    let mut payload = BinaryWriter::new();
    payload.write_varuint(1);
    payload.write_varuint(0); // active segment, memory 0
    payload.write_byte(ctrl::I32_CONST as u8);
    payload.write_varint(0);
    payload.write_byte(ctrl::END as u8);
    payload.write_varuint(data.len() as u32);
    payload.write_bytes(data);
    payload
}

/// Debug names: function-name subsection then local-name subsection.
fn name_section(builder: &ModuleBuilder) -> BinaryWriter {
    let mut payload = BinaryWriter::new();
    payload.write_string("name");

    let mut functions = BinaryWriter::new();
    let total = builder.function_count();
    functions.write_varuint(total);
    for import in builder.imports() {
        functions.write_varuint(import.id.unwrap_or(0));
        functions.write_string(&import.name.signature_name);
    }
    for function in builder.functions() {
        functions.write_varuint(function.id.unwrap_or(0));
        functions.write_string(&function.name.signature_name);
    }
    payload.write_byte(0x01);
    payload.write_varuint(functions.len() as u32);
    payload.write_stream(&functions);

    let mut locals = BinaryWriter::new();
    let named: Vec<&FunctionRecord> = builder
        .functions()
        .iter()
        .filter(|f| !f.param_names.iter().all(String::is_empty) || !f.local_names.is_empty())
        .collect();
    locals.write_varuint(named.len() as u32);
    for function in named {
        locals.write_varuint(function.id.unwrap_or(0));
        let params = function
            .param_names
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty());
        let count = params.clone().count() + function.local_names.len();
        locals.write_varuint(count as u32);
        for (index, name) in params {
            locals.write_varuint(index as u32);
            locals.write_string(name);
        }
        for (index, name) in &function.local_names {
            locals.write_varuint(*index);
            locals.write_string(name);
        }
    }
    payload.write_byte(0x02);
    payload.write_varuint(locals.len() as u32);
    payload.write_stream(&locals);

    payload
}

fn producers_section() -> BinaryWriter {
    let mut payload = BinaryWriter::new();
    payload.write_string("producers");
    payload.write_varuint(2);
    payload.write_string("language");
    payload.write_varuint(1);
    payload.write_string("java");
    payload.write_string("");
    payload.write_string("processed-by");
    payload.write_varuint(1);
    payload.write_string(env!("CARGO_PKG_NAME"));
    payload.write_string(env!("CARGO_PKG_VERSION"));
    payload
}

// =============================================================================
// Instructions
// =============================================================================

fn write_const(out: &mut BinaryWriter, value: ConstValue) {
    match value {
        ConstValue::I32(v) => {
            out.write_byte(ctrl::I32_CONST as u8);
            out.write_varint(i64::from(v));
        }
        ConstValue::I64(v) => {
            out.write_byte(ctrl::I64_CONST as u8);
            out.write_varint(v);
        }
        ConstValue::F32(v) => {
            out.write_byte(ctrl::F32_CONST as u8);
            out.write_f32_le(v);
        }
        ConstValue::F64(v) => {
            out.write_byte(ctrl::F64_CONST as u8);
            out.write_f64_le(v);
        }
    }
}

fn write_opcode(out: &mut BinaryWriter, code: u16) {
    if code > 0xFF {
        out.write_byte((code >> 8) as u8);
        out.write_byte((code & 0xFF) as u8);
    } else {
        out.write_byte(code as u8);
    }
}

fn write_block_type(out: &mut BinaryWriter, result: ValueType) {
    out.write_byte(result.code());
}

fn encode_instruction(
    out: &mut BinaryWriter,
    instr: &WasmInstruction,
    builder: &ModuleBuilder,
    function: &FunctionRecord,
) -> Result<(), WasmError> {
    match &instr.op {
        WasmOp::Const(value) => write_const(out, *value),
        WasmOp::Local { op, index } => {
            let (code, _) = wasm_opcodes::local_op(*op);
            write_opcode(out, code);
            out.write_varuint(*index);
        }
        WasmOp::Global { op, name } => {
            let (code, _) = wasm_opcodes::global_op(*op);
            write_opcode(out, code);
            out.write_varuint(builder.global_id(name)?);
        }
        WasmOp::Numeric { op, ty } => {
            let (code, _) = wasm_opcodes::numeric_op(*op, *ty)?;
            write_opcode(out, code);
            if code == ctrl::REF_NULL {
                out.write_byte(ValueType::Externref.code());
            }
        }
        WasmOp::Convert(op) => {
            let (code, _) = wasm_opcodes::convert_op(*op);
            write_opcode(out, code);
        }
        WasmOp::Call { name } => {
            write_opcode(out, ctrl::CALL);
            out.write_varuint(builder.function_id(&name.signature_name)?);
        }
        WasmOp::CallIndirect { ty } => {
            let index = match builder.types.find(ty) {
                Some(index) => index,
                None => return_structural_error!("indirect call type was never interned"),
            };
            write_opcode(out, ctrl::CALL_INDIRECT);
            out.write_varuint(index);
            out.write_byte(0x00); // table 0
        }
        WasmOp::Block(block) => encode_block_op(out, block, builder)?,
        WasmOp::Array { op, elem } => {
            let (code, _) = wasm_opcodes::array_op(*op);
            write_opcode(out, code);
            if !matches!(op, ArrayOp::Len) {
                let index = builder.types.array_type_index(*elem).unwrap_or(0);
                out.write_varuint(index);
            }
        }
        WasmOp::Struct {
            op,
            type_name,
            field_index,
        } => {
            let (code, _) = wasm_opcodes::struct_op(*op);
            write_opcode(out, code);
            let struct_type = builder.types.struct_type(type_name)?;
            out.write_varuint(struct_type.type_index.unwrap_or(0));
            if !matches!(op, StructOp::New) {
                out.write_varuint(*field_index);
            }
        }
        WasmOp::Memory {
            op,
            ty,
            offset,
            align,
        } => {
            let (code, _) = wasm_opcodes::memory_op(*op, *ty)?;
            write_opcode(out, code);
            out.write_varuint(*align);
            out.write_varuint(*offset);
        }
        WasmOp::JumpPlaceholder(_) => {
            return_structural_error!(
                "unresolved jump placeholder reached the writer in {}",
                function.name.signature_name
            )
        }
    }
    Ok(())
}

fn encode_block_op(
    out: &mut BinaryWriter,
    block: &BlockOp,
    builder: &ModuleBuilder,
) -> Result<(), WasmError> {
    match block {
        BlockOp::Return => write_opcode(out, ctrl::RETURN),
        BlockOp::If { result } => {
            write_opcode(out, ctrl::IF);
            write_block_type(out, *result);
        }
        BlockOp::Else => write_opcode(out, ctrl::ELSE),
        BlockOp::End => write_opcode(out, ctrl::END),
        BlockOp::Drop => write_opcode(out, ctrl::DROP),
        BlockOp::Block { result } => {
            write_opcode(out, ctrl::BLOCK);
            write_block_type(out, *result);
        }
        BlockOp::Loop => {
            write_opcode(out, ctrl::LOOP);
            write_block_type(out, ValueType::Void);
        }
        BlockOp::Br { depth } => {
            write_opcode(out, ctrl::BR);
            out.write_varuint(*depth);
        }
        BlockOp::BrIf { depth } => {
            write_opcode(out, ctrl::BR_IF);
            out.write_varuint(*depth);
        }
        BlockOp::BrTable { depths, default } => {
            write_opcode(out, ctrl::BR_TABLE);
            out.write_varuint(depths.len() as u32);
            for depth in depths {
                out.write_varuint(*depth);
            }
            out.write_varuint(*default);
        }
        BlockOp::Unreachable => write_opcode(out, ctrl::UNREACHABLE),
        BlockOp::Try { result } => {
            write_opcode(out, ctrl::TRY);
            write_block_type(out, *result);
        }
        BlockOp::Catch => write_opcode(out, ctrl::CATCH),
        BlockOp::Throw => {
            write_opcode(out, ctrl::THROW);
            out.write_varuint(event_index(builder)?);
        }
        BlockOp::Rethrow => write_opcode(out, ctrl::RETHROW),
        BlockOp::BrOnExn { depth } => {
            write_opcode(out, ctrl::BR_ON_EXN);
            out.write_varuint(*depth);
            out.write_varuint(event_index(builder)?);
        }
        // No synchronisation primitive in the target: the monitor operand
        // is dropped.
        BlockOp::MonitorEnter | BlockOp::MonitorExit => write_opcode(out, ctrl::DROP),
    }
    Ok(())
}

fn event_index(builder: &ModuleBuilder) -> Result<u32, WasmError> {
    if builder.event_type_index().is_none() {
        return_structural_error!("throw emitted without the exception event");
    }
    Ok(0)
}
