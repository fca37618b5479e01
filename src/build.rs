//! The compiler driver.
//!
//! Aggregates the input class files, drives type discovery, iterates every
//! method through the translator (or the fragment parser, or the import
//! path), finishes the module and sequences the two writers. Compilation is
//! single-threaded and runs to completion; the first error aborts the
//! in-flight module and nothing is written.

use crate::compiler::bytecode::{ClassFile, MethodInfo};
use crate::compiler::codegen::module_builder::{FunctionRecord, ModuleBuilder};
use crate::compiler::codegen::translator::MethodTranslator;
use crate::compiler::codegen::value_types::{FunctionType, ValueType};
use crate::compiler::codegen::{binary_writer, source_map, text_parser, text_writer};
use crate::compiler::compiler_errors::WasmError;
use crate::compiler::runtime_library::RuntimeLibrary;
use crate::return_semantic_error;
use crate::settings::CompilerOptions;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

#[cfg(feature = "detailed_timers")]
use colour::grey_ln;
#[cfg(feature = "detailed_timers")]
use std::time::Instant;

/// One `(module, member)` pair a JavaScript host must supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportDescriptor {
    pub module: String,
    pub name: String,
}

/// The finished artefacts of one compilation.
#[derive(Debug)]
pub struct CompiledModule {
    pub module_name: String,
    pub wasm: Vec<u8>,
    pub wat: String,
    pub source_map: Option<String>,
    pub imports: Vec<ImportDescriptor>,
}

pub fn compile_classes(
    classes: Vec<ClassFile>,
    options: &CompilerOptions,
    module_name: &str,
) -> Result<CompiledModule, WasmError> {
    #[cfg(feature = "detailed_timers")]
    let started = Instant::now();

    let runtime = RuntimeLibrary::new(options)?;
    let mut builder = ModuleBuilder::new();

    let order: Vec<String> = classes.iter().map(|c| c.name.clone()).collect();
    let class_map: FxHashMap<String, ClassFile> = classes
        .into_iter()
        .map(|class| (class.name.clone(), class))
        .collect();
    let compiled: FxHashSet<String> = order.iter().cloned().collect();

    // Struct layouts and vtable offsets are fixed up front, in input order,
    // so reference order inside method bodies cannot change the output.
    for name in &order {
        builder.types.register_class(&class_map, name)?;
    }

    for name in &order {
        let class = &class_map[name];
        for method in &class.methods {
            compile_method(&class_map, &mut builder, options, &runtime, class, method)
                .map_err(|e| e.in_method(&class.name, &method.name))?;
        }
    }

    #[cfg(feature = "detailed_timers")]
    grey_ln!("translation took {:?}", started.elapsed());

    builder.prepare_finish(&compiled)?;

    let binary = binary_writer::write_module(&builder, options, module_name)?;
    let wat = text_writer::write_module(&builder, options)?;
    let source_map = options
        .debug_names
        .then(|| source_map::write_source_map(&binary.mappings));
    let imports = builder
        .imports()
        .iter()
        .map(|import| ImportDescriptor {
            module: import.module.clone(),
            name: import.field.clone(),
        })
        .collect();

    #[cfg(feature = "detailed_timers")]
    grey_ln!("module emission finished after {:?}", started.elapsed());

    Ok(CompiledModule {
        module_name: module_name.to_owned(),
        wasm: binary.bytes,
        wat,
        source_map,
        imports,
    })
}

fn compile_method(
    classes: &FxHashMap<String, ClassFile>,
    builder: &mut ModuleBuilder,
    options: &CompilerOptions,
    runtime: &RuntimeLibrary,
    class: &ClassFile,
    method: &MethodInfo,
) -> Result<(), WasmError> {
    let name = builder
        .names
        .intern(&class.name, &method.name, &method.descriptor)
        .clone();

    if let Some((module, import_name)) = method.import_annotation() {
        if !method.is_static() {
            return_semantic_error!("imported method {} must be static", name.signature_name);
        }
        let ty = FunctionType::from_descriptor(&method.descriptor, None)?;
        builder.add_import(name, module, import_name, &ty)?;
        return Ok(());
    }

    let exported = if method.export_annotation() {
        if !method.is_static() {
            return_semantic_error!("exported method {} must be static", name.signature_name);
        }
        if method.is_abstract() || method.is_native() {
            return_semantic_error!(
                "exported method {} has no compilable body",
                name.signature_name
            );
        }
        Some(method.name.clone())
    } else {
        None
    };

    if let Some(fragment) = method.text_code_annotation() {
        let instructions = text_parser::parse_fragment(fragment)?;
        let receiver = if method.is_static() {
            None
        } else {
            Some(ValueType::Externref)
        };
        let signature = FunctionType::from_descriptor(&method.descriptor, receiver)?;
        let type_index = builder.types.intern(&signature);
        let record = FunctionRecord {
            name: name.clone(),
            type_index,
            id: None,
            params: signature.params,
            param_names: Vec::new(),
            locals: Vec::new(),
            local_names: Vec::new(),
            instructions,
            source_file: class.source_file.clone(),
            exported_as: exported.clone(),
        };
        builder.add_function(record)?;
        if let Some(export_name) = exported {
            builder.add_export(&export_name, &name.signature_name)?;
        }
        return Ok(());
    }

    if method.code.is_none() {
        // Abstract, native or interface methods without a replacement body
        // are simply not part of the module.
        return Ok(());
    }

    let receiver = if method.is_static() {
        None
    } else {
        Some(ValueType::Externref)
    };
    let signature = FunctionType::from_descriptor(&method.descriptor, receiver)?;
    let type_index = builder.types.intern(&signature);

    let mut translator = MethodTranslator::new(classes, builder, options, runtime);
    let translated = translator.translate(class, method)?;

    let record = FunctionRecord {
        name: name.clone(),
        type_index,
        id: None,
        params: translated.params,
        param_names: translated.param_names,
        locals: translated.locals,
        local_names: translated.local_names,
        instructions: translated.instructions,
        source_file: class.source_file.clone(),
        exported_as: exported.clone(),
    };
    builder.add_function(record)?;
    if let Some(export_name) = exported {
        builder.add_export(&export_name, &name.signature_name)?;
    }
    Ok(())
}
