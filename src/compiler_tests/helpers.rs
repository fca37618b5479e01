//! Builders shared by the end-to-end tests: class files assembled by hand
//! and a minimal reader for the emitted binary's section layout.

use crate::compiler::bytecode::{
    Annotation, ClassFile, CodeAttribute, ConstantPool, ExceptionHandler, FieldInfo,
    LineNumberEntry, MethodInfo, PoolConstant, access,
};

/// Assembler for raw method bytecode, big-endian like the class-file format.
#[derive(Default)]
pub(crate) struct Asm {
    bytes: Vec<u8>,
}

impl Asm {
    pub(crate) fn new() -> Self {
        Asm::default()
    }

    pub(crate) fn pos(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub(crate) fn op(mut self, opcode: u8) -> Self {
        self.bytes.push(opcode);
        self
    }

    pub(crate) fn i8(mut self, value: i8) -> Self {
        self.bytes.push(value as u8);
        self
    }

    pub(crate) fn u16(mut self, value: u16) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub(crate) fn i32(mut self, value: i32) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub(crate) fn pad_to_4(mut self) -> Self {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

pub(crate) fn static_method(name: &str, descriptor: &str, bytecode: Vec<u8>) -> MethodInfo {
    MethodInfo {
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        access_flags: access::PUBLIC | access::STATIC,
        code: Some(CodeAttribute {
            max_stack: 8,
            max_locals: 8,
            bytecode,
            exception_table: Vec::new(),
            line_numbers: vec![LineNumberEntry { start_pc: 0, line: 1 }],
            local_variables: Vec::new(),
        }),
        annotations: Vec::new(),
    }
}

pub(crate) fn exported(mut method: MethodInfo) -> MethodInfo {
    method.annotations.push(Annotation::Export);
    method
}

pub(crate) fn instance_method(name: &str, descriptor: &str, bytecode: Vec<u8>) -> MethodInfo {
    MethodInfo {
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        access_flags: access::PUBLIC,
        code: Some(CodeAttribute {
            max_stack: 8,
            max_locals: 8,
            bytecode,
            exception_table: Vec::new(),
            line_numbers: Vec::new(),
            local_variables: Vec::new(),
        }),
        annotations: Vec::new(),
    }
}

pub(crate) fn class(name: &str, methods: Vec<MethodInfo>) -> ClassFile {
    class_with_pool(name, methods, Vec::new(), ConstantPool::default())
}

pub(crate) fn class_with_pool(
    name: &str,
    methods: Vec<MethodInfo>,
    fields: Vec<FieldInfo>,
    constant_pool: ConstantPool,
) -> ClassFile {
    ClassFile {
        name: name.to_owned(),
        super_name: None,
        interfaces: Vec::new(),
        access_flags: access::PUBLIC,
        fields,
        methods,
        source_file: Some(format!("{}.java", name.rsplit('/').next().unwrap_or(name))),
        constant_pool,
    }
}

pub(crate) fn pool(entries: Vec<PoolConstant>) -> ConstantPool {
    let mut all = vec![PoolConstant::Placeholder];
    all.extend(entries);
    ConstantPool::new(all)
}

pub(crate) fn handler(start: u32, end: u32, target: u32, class: Option<&str>) -> ExceptionHandler {
    ExceptionHandler {
        start_pc: start,
        end_pc: end,
        handler_pc: target,
        catch_type: class.map(str::to_owned),
    }
}

/// `int add(int, int)` returning the sum.
pub(crate) fn add_method() -> MethodInfo {
    let code = Asm::new()
        .op(0x1A) // iload_0
        .op(0x1B) // iload_1
        .op(0x60) // iadd
        .op(0xAC) // ireturn
        .finish();
    exported(static_method("add", "(II)I", code))
}

/// `int pick(int)` returning `cond != 0 ? 13 : 76`.
pub(crate) fn ternary_method() -> MethodInfo {
    let code = Asm::new()
        .op(0x1A) // 0: iload_0
        .op(0x99)
        .u16(8) // 1: ifeq -> 9
        .op(0x10)
        .i8(13) // 4: bipush 13
        .op(0xA7)
        .u16(5) // 6: goto -> 11
        .op(0x10)
        .i8(76) // 9: bipush 76
        .op(0xAC) // 11: ireturn
        .finish();
    exported(static_method("pick", "(I)I", code))
}

/// `int dispatch(int)` over the sparse keys {1, 1000, 1001, MAX_INT}.
pub(crate) fn sparse_switch_method() -> MethodInfo {
    let mut asm = Asm::new().op(0x1A); // 0: iload_0
    let switch_at = asm.pos(); // 1
    asm = asm.op(0xAB).pad_to_4(); // lookupswitch, operands at 4

    // payload: default, npairs, 4 sorted pairs; bodies follow at 44
    let bodies = [44u32, 47, 50, 53];
    let default = 56u32;
    asm = asm.i32((default - switch_at) as i32).i32(4);
    for (key, target) in [(1, bodies[0]), (1000, bodies[1]), (1001, bodies[2]), (i32::MAX as u32 as i32, bodies[3])] {
        asm = asm.i32(key).i32((target - switch_at) as i32);
    }
    for value in [10i8, 20, 30, 40, 99] {
        asm = asm.op(0x10).i8(value).op(0xAC); // bipush value; ireturn
    }
    exported(static_method("dispatch", "(I)I", asm.finish()))
}

/// Raw `(id, payload_size)` pairs of every section in the binary, in file
/// order.
pub(crate) fn section_layout(wasm: &[u8]) -> Vec<(u8, u32)> {
    assert!(wasm.len() >= 8, "module shorter than the preamble");
    let mut sections = Vec::new();
    let mut pos = 8usize;
    while pos < wasm.len() {
        let id = wasm[pos];
        pos += 1;
        let (size, used) = decode_varuint(&wasm[pos..]);
        pos += used + size as usize;
        sections.push((id, size));
    }
    assert_eq!(pos, wasm.len(), "trailing bytes after the last section");
    sections
}

pub(crate) fn decode_varuint(bytes: &[u8]) -> (u32, usize) {
    let mut result = 0u32;
    let mut shift = 0;
    for (i, byte) in bytes.iter().enumerate() {
        result |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return (result, i + 1);
        }
        shift += 7;
    }
    panic!("unterminated varuint");
}
