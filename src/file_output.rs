//! Artefact writing.
//!
//! Writes `<module>.wasm`, `<module>.wat` and, when enabled, the source map
//! and the JSON imports descriptor. The binary is validated in-process
//! before anything touches the disk, so a failed compilation never leaves a
//! partial module behind.

use crate::build::CompiledModule;
use crate::compiler::compiler_errors::WasmError;
use crate::return_file_error;
use crate::settings::{self, CompilerOptions};
use std::fs;
use std::path::{Path, PathBuf};
use wasmparser::validate;

pub fn write_output_files(
    out_dir: &Path,
    module: &CompiledModule,
    options: &CompilerOptions,
) -> Result<Vec<PathBuf>, WasmError> {
    if fs::metadata(out_dir).is_err() {
        if let Err(e) = fs::create_dir_all(out_dir) {
            return_file_error!("could not create {}: {}", out_dir.display(), e);
        }
    }

    // The GC-experimental and exception encodings predate the validator's
    // feature set, so only plain modules are checked.
    if !options.use_gc && !options.use_eh {
        if let Err(e) = validate(&module.wasm) {
            return Err(WasmError::new(
                format!("emitted module failed validation: {e}"),
                crate::compiler::compiler_errors::ErrorKind::Structural,
            ));
        }
    }

    let mut written = Vec::new();

    let wasm_path = out_dir.join(format!("{}.{}", module.module_name, settings::WASM_EXTENSION));
    write_file(&wasm_path, &module.wasm)?;
    written.push(wasm_path);

    let wat_path = out_dir.join(format!("{}.{}", module.module_name, settings::WAT_EXTENSION));
    write_file(&wat_path, module.wat.as_bytes())?;
    written.push(wat_path);

    if let Some(source_map) = &module.source_map {
        let map_path = out_dir.join(format!(
            "{}.{}",
            module.module_name,
            settings::SOURCE_MAP_EXTENSION
        ));
        write_file(&map_path, source_map.as_bytes())?;
        written.push(map_path);
    }

    if !module.imports.is_empty() {
        let imports_path = out_dir.join(format!(
            "{}.{}",
            module.module_name,
            settings::IMPORTS_EXTENSION
        ));
        let descriptor = match serde_json::to_string_pretty(&module.imports) {
            Ok(json) => json,
            Err(e) => return_file_error!("could not serialise the imports descriptor: {e}"),
        };
        write_file(&imports_path, descriptor.as_bytes())?;
        written.push(imports_path);
    }

    Ok(written)
}

fn write_file(path: &Path, content: &[u8]) -> Result<(), WasmError> {
    if let Err(e) = fs::write(path, content) {
        return_file_error!("could not write {}: {}", path.display(), e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ImportDescriptor;
    use crate::compiler::codegen::binary_writer::PREAMBLE;

    fn module() -> CompiledModule {
        // An empty but well-formed module: preamble only.
        CompiledModule {
            module_name: "empty".to_owned(),
            wasm: PREAMBLE.to_vec(),
            wat: "(module\n)\n".to_owned(),
            source_map: None,
            imports: vec![ImportDescriptor {
                module: "runtime".to_owned(),
                name: "wasm/Runtime.allocate".to_owned(),
            }],
        }
    }

    #[test]
    fn writes_all_artefacts() {
        let dir = tempfile::tempdir().unwrap();
        let written =
            write_output_files(dir.path(), &module(), &CompilerOptions::default()).unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("empty.wasm").exists());
        assert!(dir.path().join("empty.wat").exists());
        let imports = std::fs::read_to_string(dir.path().join("empty.imports.json")).unwrap();
        assert!(imports.contains("wasm/Runtime.allocate"));
    }

    #[test]
    fn rejects_a_corrupt_binary() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = module();
        bad.wasm = vec![0x00, 0x61, 0x73];
        let err = write_output_files(dir.path(), &bad, &CompilerOptions::default()).unwrap_err();
        assert!(err.msg.contains("validation"));
        assert!(!dir.path().join("empty.wasm").exists());
    }
}
