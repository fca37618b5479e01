//! Module assembly.
//!
//! The [`ModuleBuilder`] owns every registry the writers read from: function
//! records with their code, imported functions, globals, exports, interned
//! strings and the type manager. It coordinates index assignment across
//! sections so references stay consistent: imports are numbered before
//! defined functions, and within each group ids follow insertion order.
//!
//! Ids are assigned once, in [`ModuleBuilder::prepare_finish`], when the full
//! function count is known; they never change afterwards.

use crate::compiler::codegen::function_name::{FunctionName, FunctionNameRegistry};
use crate::compiler::codegen::instructions::{ConstValue, WasmInstruction, WasmOp};
use crate::compiler::codegen::type_manager::TypeManager;
use crate::compiler::codegen::value_types::{FunctionType, ValueType};
use crate::compiler::compiler_errors::WasmError;
use crate::settings::RUNTIME_IMPORT_MODULE;
use crate::{return_semantic_error, return_structural_error};
use rustc_hash::{FxHashMap, FxHashSet};

/// A defined function: its canonical type, late-assigned id, code and the
/// naming metadata the debug sections consume.
#[derive(Debug)]
pub struct FunctionRecord {
    pub name: FunctionName,
    pub type_index: u32,
    /// Final after `prepare_finish`; never changes afterwards.
    pub id: Option<u32>,
    pub params: Vec<ValueType>,
    pub param_names: Vec<String>,
    /// Extra locals beyond the parameters, in declaration order.
    pub locals: Vec<ValueType>,
    pub local_names: Vec<(u32, String)>,
    pub instructions: Vec<WasmInstruction>,
    pub source_file: Option<String>,
    pub exported_as: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImportFunction {
    pub name: FunctionName,
    pub module: String,
    pub field: String,
    pub type_index: u32,
    pub id: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct GlobalRecord {
    pub id: u32,
    pub name: String,
    pub ty: ValueType,
    pub mutable: bool,
    pub init: Option<ConstValue>,
}

#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub export_name: String,
    pub signature_name: String,
}

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    pub types: TypeManager,
    /// Canonical name instances; every constant-pool reference resolves
    /// through here so one signature is one record.
    pub names: FunctionNameRegistry,
    functions: Vec<FunctionRecord>,
    defined: FxHashMap<String, usize>,
    imports: Vec<ImportFunction>,
    import_index: FxHashMap<String, usize>,
    globals: Vec<GlobalRecord>,
    global_ids: FxHashMap<String, u32>,
    exports: Vec<ExportEntry>,
    strings: Vec<String>,
    string_ids: FxHashMap<String, u32>,
    /// Call-site function types, so auto-declared imports carry the
    /// receiver parameter instance calls push.
    call_types: FxHashMap<String, FunctionType>,
    event_used: bool,
    event_type_index: Option<u32>,
    strings_global: Option<u32>,
    call_indirect_used: bool,
    finished: bool,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder::default()
    }

    // =========================================================================
    // Functions and imports
    // =========================================================================

    pub fn add_function(&mut self, record: FunctionRecord) -> Result<(), WasmError> {
        let key = record.name.signature_name.clone();
        if self.defined.contains_key(&key) || self.import_index.contains_key(&key) {
            return_semantic_error!("duplicate function {}", key);
        }
        self.defined.insert(key, self.functions.len());
        self.functions.push(record);
        Ok(())
    }

    pub fn add_import(
        &mut self,
        name: FunctionName,
        module: &str,
        field: &str,
        ty: &FunctionType,
    ) -> Result<(), WasmError> {
        let key = name.signature_name.clone();
        if self.defined.contains_key(&key) || self.import_index.contains_key(&key) {
            return_semantic_error!("duplicate function {}", key);
        }
        let type_index = self.types.intern(ty);
        self.import_index.insert(key, self.imports.len());
        self.imports.push(ImportFunction {
            name,
            module: module.to_owned(),
            field: field.to_owned(),
            type_index,
            id: None,
        });
        Ok(())
    }

    pub fn add_export(&mut self, export_name: &str, signature_name: &str) -> Result<(), WasmError> {
        if self.exports.iter().any(|e| e.export_name == export_name) {
            return_semantic_error!("duplicate export name \"{}\"", export_name);
        }
        self.exports.push(ExportEntry {
            export_name: export_name.to_owned(),
            signature_name: signature_name.to_owned(),
        });
        Ok(())
    }

    // =========================================================================
    // Globals and strings
    // =========================================================================

    /// Lazily declare the global backing a static field. First sight fixes
    /// the type; the global is always mutable and zero-initialised.
    pub fn ensure_global(&mut self, name: &str, ty: ValueType) -> Result<(), WasmError> {
        if let Some(&id) = self.global_ids.get(name) {
            let existing = &self.globals[id as usize];
            if existing.ty != ty {
                return_semantic_error!(
                    "global {} first declared as {:?}, now referenced as {:?}",
                    name,
                    existing.ty,
                    ty
                );
            }
            return Ok(());
        }
        let id = self.globals.len() as u32;
        self.globals.push(GlobalRecord {
            id,
            name: name.to_owned(),
            ty,
            mutable: true,
            init: None,
        });
        self.global_ids.insert(name.to_owned(), id);
        Ok(())
    }

    /// Declare an immutable i32 global with a fixed initial value.
    pub fn add_const_global(&mut self, name: &str, value: i32) -> u32 {
        let id = self.globals.len() as u32;
        self.globals.push(GlobalRecord {
            id,
            name: name.to_owned(),
            ty: ValueType::I32,
            mutable: false,
            init: Some(ConstValue::I32(value)),
        });
        self.global_ids.insert(name.to_owned(), id);
        id
    }

    /// Record the full type a direct call site uses, receiver included.
    pub fn note_call_type(&mut self, signature_name: &str, ty: &FunctionType) {
        self.call_types
            .entry(signature_name.to_owned())
            .or_insert_with(|| ty.clone());
    }

    /// Intern a string constant, returning its id. Ids follow first-interning
    /// order; the data layout is decided when the module is written.
    pub fn intern_string(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.string_ids.get(value) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(value.to_owned());
        self.string_ids.insert(value.to_owned(), id);
        id
    }

    // =========================================================================
    // Feature tracking
    // =========================================================================

    /// Lazily intern the module-wide exception event `(externref) -> ()`.
    pub fn mark_event_used(&mut self) {
        self.event_used = true;
    }

    pub fn event_used(&self) -> bool {
        self.event_used
    }

    pub fn mark_call_indirect(&mut self) {
        self.call_indirect_used = true;
    }

    pub fn call_indirect_used(&self) -> bool {
        self.call_indirect_used
    }

    /// The one exception signature shared by every throw site, interned
    /// lazily when the module is finished.
    pub fn event_type_index(&self) -> Option<u32> {
        self.event_type_index
    }

    /// Id of the immutable global holding the string-table base offset.
    pub fn strings_global(&self) -> Option<u32> {
        self.strings_global
    }

    // =========================================================================
    // Finishing
    // =========================================================================

    /// Resolve every referenced function and assign final ids.
    ///
    /// Calls into classes outside the compiled set become imports from the
    /// runtime module; a dangling reference into a compiled class is a
    /// semantic error. Import ids precede defined-function ids, both in
    /// insertion order.
    pub fn prepare_finish(&mut self, compiled_classes: &FxHashSet<String>) -> Result<(), WasmError> {
        if self.finished {
            return_structural_error!("module already finished");
        }

        // Auto-declare undefined callees, in first-reference order.
        let mut referenced: Vec<FunctionName> = Vec::new();
        let mut seen: FxHashSet<String> = FxHashSet::default();
        for record in &self.functions {
            for instr in &record.instructions {
                if let WasmOp::Call { name } = &instr.op {
                    if !self.defined.contains_key(&name.signature_name)
                        && !self.import_index.contains_key(&name.signature_name)
                        && seen.insert(name.signature_name.clone())
                    {
                        referenced.push(name.clone());
                    }
                }
            }
        }
        for name in referenced {
            if compiled_classes.contains(&name.class_name) {
                return_semantic_error!(
                    "reference to undefined function {}",
                    name.signature_name
                );
            }
            let ty = match self.call_types.get(&name.signature_name) {
                Some(ty) => ty.clone(),
                None => FunctionType::from_descriptor(&name.descriptor, None)?,
            };
            let field = format!("{}.{}", name.class_name, name.method_name);
            self.add_import(name, RUNTIME_IMPORT_MODULE, &field, &ty)?;
        }

        let mut next_id = 0u32;
        for import in &mut self.imports {
            import.id = Some(next_id);
            next_id += 1;
        }
        for record in &mut self.functions {
            record.id = Some(next_id);
            next_id += 1;
        }

        if self.event_used {
            let index = self
                .types
                .intern(&FunctionType::new(vec![ValueType::Externref], Vec::new()));
            self.event_type_index = Some(index);
        }
        if !self.strings.is_empty() {
            let base = self.types.vtable_region_size() as i32;
            let id = self.add_const_global(".strings", base);
            self.strings_global = Some(id);
        }

        self.types.assign_composite_indices();
        self.finished = true;
        Ok(())
    }

    // =========================================================================
    // Lookups for the writers
    // =========================================================================

    pub fn function_id(&self, signature_name: &str) -> Result<u32, WasmError> {
        if let Some(&index) = self.defined.get(signature_name) {
            if let Some(id) = self.functions[index].id {
                return Ok(id);
            }
        }
        if let Some(&index) = self.import_index.get(signature_name) {
            if let Some(id) = self.imports[index].id {
                return Ok(id);
            }
        }
        return_semantic_error!("reference to undefined function {}", signature_name)
    }

    pub fn global_id(&self, name: &str) -> Result<u32, WasmError> {
        match self.global_ids.get(name) {
            Some(&id) => Ok(id),
            None => return_semantic_error!("reference to undefined global {}", name),
        }
    }

    pub fn functions(&self) -> &[FunctionRecord] {
        &self.functions
    }

    pub fn imports(&self) -> &[ImportFunction] {
        &self.imports
    }

    pub fn globals(&self) -> &[GlobalRecord] {
        &self.globals
    }

    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Total function count, imports plus defined.
    pub fn function_count(&self) -> u32 {
        (self.imports.len() + self.functions.len()) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::instructions::WasmInstruction;

    fn record(class: &str, method: &str, descriptor: &str) -> FunctionRecord {
        FunctionRecord {
            name: FunctionName::new(class, method, descriptor),
            type_index: 0,
            id: None,
            params: vec![ValueType::I32, ValueType::I32],
            param_names: Vec::new(),
            locals: Vec::new(),
            local_names: Vec::new(),
            instructions: Vec::new(),
            source_file: None,
            exported_as: None,
        }
    }

    #[test]
    fn ids_are_contiguous_imports_first() {
        let mut builder = ModuleBuilder::new();
        let ty = FunctionType::new(vec![ValueType::F64], vec![ValueType::F64]);
        builder
            .add_import(FunctionName::new("Math", "sqrt", "(D)D"), "env", "sqrt", &ty)
            .unwrap();
        builder.add_function(record("A", "f", "(II)I")).unwrap();
        builder.add_function(record("A", "g", "(II)I")).unwrap();

        builder.prepare_finish(&FxHashSet::default()).unwrap();

        assert_eq!(builder.function_id("Math.sqrt(D)D").unwrap(), 0);
        assert_eq!(builder.function_id("A.f(II)I").unwrap(), 1);
        assert_eq!(builder.function_id("A.g(II)I").unwrap(), 2);
        assert_eq!(builder.function_count(), 3);
    }

    #[test]
    fn undefined_callee_outside_the_set_becomes_a_runtime_import() {
        let mut builder = ModuleBuilder::new();
        let mut rec = record("A", "f", "()V");
        rec.instructions.push(WasmInstruction::new(
            WasmOp::Call {
                name: FunctionName::new("wasm/Runtime", "allocate", "(I)Ljava/lang/Object;"),
            },
            0,
            0,
        ));
        builder.add_function(rec).unwrap();

        let mut compiled = FxHashSet::default();
        compiled.insert("A".to_owned());
        builder.prepare_finish(&compiled).unwrap();

        assert_eq!(builder.imports().len(), 1);
        assert_eq!(builder.imports()[0].module, RUNTIME_IMPORT_MODULE);
        // Imports precede defined functions
        assert_eq!(
            builder
                .function_id("wasm/Runtime.allocate(I)Ljava/lang/Object;")
                .unwrap(),
            0
        );
        assert_eq!(builder.function_id("A.f()V").unwrap(), 1);
    }

    #[test]
    fn auto_imports_take_the_call_sites_recorded_type() {
        // An instance call pushes the receiver, which the descriptor alone
        // does not show.
        let mut builder = ModuleBuilder::new();
        let callee = FunctionName::new("java/lang/Object", "<init>", "()V");
        let with_receiver = FunctionType::new(vec![ValueType::Externref], Vec::new());
        builder.note_call_type(&callee.signature_name, &with_receiver);

        let mut rec = record("A", "f", "()V");
        rec.instructions.push(WasmInstruction::new(
            WasmOp::Call {
                name: callee.clone(),
            },
            0,
            0,
        ));
        builder.add_function(rec).unwrap();

        let mut compiled = FxHashSet::default();
        compiled.insert("A".to_owned());
        builder.prepare_finish(&compiled).unwrap();

        let import = &builder.imports()[0];
        let ty = &builder.types.function_types()[import.type_index as usize];
        assert_eq!(ty.params, vec![ValueType::Externref]);
    }

    #[test]
    fn undefined_callee_inside_the_set_is_a_semantic_error() {
        let mut builder = ModuleBuilder::new();
        let mut rec = record("A", "f", "()V");
        rec.instructions.push(WasmInstruction::new(
            WasmOp::Call {
                name: FunctionName::new("A", "missing", "()V"),
            },
            0,
            0,
        ));
        builder.add_function(rec).unwrap();

        let mut compiled = FxHashSet::default();
        compiled.insert("A".to_owned());
        assert!(builder.prepare_finish(&compiled).is_err());
    }

    #[test]
    fn globals_are_created_lazily_and_once() {
        let mut builder = ModuleBuilder::new();
        builder.ensure_global("A.count", ValueType::I32).unwrap();
        builder.ensure_global("A.count", ValueType::I32).unwrap();
        builder.ensure_global("A.sum", ValueType::F64).unwrap();
        assert_eq!(builder.globals().len(), 2);
        assert_eq!(builder.global_id("A.count").unwrap(), 0);
        assert_eq!(builder.global_id("A.sum").unwrap(), 1);
        assert!(builder.ensure_global("A.count", ValueType::I64).is_err());
        assert!(builder.global_id("A.other").is_err());
    }

    #[test]
    fn string_interning_dedups() {
        let mut builder = ModuleBuilder::new();
        assert_eq!(builder.intern_string("hello"), 0);
        assert_eq!(builder.intern_string("world"), 1);
        assert_eq!(builder.intern_string("hello"), 0);
        assert_eq!(builder.strings().len(), 2);
    }

    #[test]
    fn duplicate_exports_are_rejected() {
        let mut builder = ModuleBuilder::new();
        builder.add_export("add", "A.add(II)I").unwrap();
        assert!(builder.add_export("add", "B.add(II)I").is_err());
    }
}
