//! Project configuration and compiler options.
//!
//! Options arrive from two places: a `trellis.toml` next to the input files
//! and `--key=value` flags on the command line, with flags winning. The
//! recognised keys mirror the compiler's property map: `debug_names`,
//! `use_gc`, `use_eh`, `ref_eq`, `vtable_of`, `spider_monkey`.

use crate::compiler::compiler_errors::WasmError;
use crate::return_config_error;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "trellis.toml";
pub const WASM_EXTENSION: &str = "wasm";
pub const WAT_EXTENSION: &str = "wat";
pub const SOURCE_MAP_EXTENSION: &str = "wasm.map";
pub const IMPORTS_EXTENSION: &str = "imports.json";

/// Module name the import section uses for auto-declared runtime helpers.
pub const RUNTIME_IMPORT_MODULE: &str = "runtime";

/// Class the runtime support library lives in. Only the symbolic name is
/// known to the compiler; the host or a linked library supplies the bodies.
pub const RUNTIME_CLASS: &str = "wasm/Runtime";

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Emit the debug-name custom section and a source map
    pub debug_names: bool,
    /// Emit GC-style reference, struct and array types
    pub use_gc: bool,
    /// Enable the exception-handling opcodes
    pub use_eh: bool,
    /// Runtime helper comparing references when GC is off
    pub ref_eq: String,
    /// Runtime helper reading an object's vtable offset when GC is off
    pub vtable_of: String,
    /// Emit the opt-in custom section for GC experiments
    pub spider_monkey: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            debug_names: false,
            use_gc: false,
            use_eh: false,
            ref_eq: format!("{RUNTIME_CLASS}.refEq(Ljava/lang/Object;Ljava/lang/Object;)Z"),
            vtable_of: format!("{RUNTIME_CLASS}.vtableOf(Ljava/lang/Object;)I"),
            spider_monkey: false,
        }
    }
}

impl CompilerOptions {
    /// Apply one `key=value` property. Boolean keys accept `true`/`false`
    /// and treat a bare key as `true`.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<(), WasmError> {
        let flag = |value: &str| -> Result<bool, WasmError> {
            match value {
                "" | "true" => Ok(true),
                "false" => Ok(false),
                other => return_config_error!("expected true or false, found '{}'", other),
            }
        };
        match key {
            "debug_names" | "debugNames" => self.debug_names = flag(value)?,
            "use_gc" | "useGC" => self.use_gc = flag(value)?,
            "use_eh" | "useEH" => self.use_eh = flag(value)?,
            "spider_monkey" | "SpiderMonkey" => self.spider_monkey = flag(value)?,
            "ref_eq" => self.ref_eq = value.to_owned(),
            "vtable_of" => self.vtable_of = value.to_owned(),
            other => return_config_error!("unknown compiler property '{}'", other),
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    project_name: Option<String>,
    #[serde(default)]
    compiler: ConfigCompilerSection,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigCompilerSection {
    debug_names: Option<bool>,
    use_gc: Option<bool>,
    use_eh: Option<bool>,
    ref_eq: Option<String>,
    vtable_of: Option<String>,
    spider_monkey: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub project_name: Option<String>,
    pub options: CompilerOptions,
}

impl Config {
    /// Read `trellis.toml` from `dir` if present; defaults otherwise.
    pub fn load(dir: &Path) -> Result<Config, WasmError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Config::default());
        }
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => return_config_error!("could not read {}: {}", path.display(), e),
        };
        Config::parse(&source).map_err(|e| {
            WasmError::new(
                format!("{} in {}", e.msg, path.display()),
                crate::compiler::compiler_errors::ErrorKind::Config,
            )
        })
    }

    pub fn parse(source: &str) -> Result<Config, WasmError> {
        let file: ConfigFile = match toml::from_str(source) {
            Ok(file) => file,
            Err(e) => return_config_error!("invalid config: {}", e),
        };
        let mut options = CompilerOptions::default();
        if let Some(v) = file.compiler.debug_names {
            options.debug_names = v;
        }
        if let Some(v) = file.compiler.use_gc {
            options.use_gc = v;
        }
        if let Some(v) = file.compiler.use_eh {
            options.use_eh = v;
        }
        if let Some(v) = file.compiler.ref_eq {
            options.ref_eq = v;
        }
        if let Some(v) = file.compiler.vtable_of {
            options.vtable_of = v;
        }
        if let Some(v) = file.compiler.spider_monkey {
            options.spider_monkey = v;
        }
        Ok(Config {
            project_name: file.project_name,
            options,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_all_off() {
        let options = CompilerOptions::default();
        assert!(!options.debug_names);
        assert!(!options.use_gc);
        assert!(!options.use_eh);
        assert!(!options.spider_monkey);
        assert!(options.ref_eq.starts_with(RUNTIME_CLASS));
    }

    #[test]
    fn properties_override_in_place() {
        let mut options = CompilerOptions::default();
        options.set_property("debugNames", "").unwrap();
        options.set_property("useEH", "true").unwrap();
        options.set_property("ref_eq", "my/Host.sameRef(II)Z").unwrap();
        assert!(options.debug_names);
        assert!(options.use_eh);
        assert_eq!(options.ref_eq, "my/Host.sameRef(II)Z");
        assert!(options.set_property("unknown_key", "1").is_err());
        assert!(options.set_property("use_gc", "maybe").is_err());
    }

    #[test]
    fn config_file_parses_compiler_section() {
        let config = Config::parse(
            r#"
project_name = "geometry"

[compiler]
use_eh = true
debug_names = true
"#,
        )
        .unwrap();
        assert_eq!(config.project_name.as_deref(), Some("geometry"));
        assert!(config.options.use_eh);
        assert!(config.options.debug_names);
        assert!(!config.options.use_gc);
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        assert!(Config::parse("[compiler\nuse_eh = true").is_err());
    }
}
