use colour::{e_red_ln, green_ln_bold, grey_ln, red_ln};
use std::path::{Path, PathBuf};
use std::time::Instant;
use std::{env, fs};
use trellis::build::compile_classes;
use trellis::compiler::bytecode::ClassFile;
use trellis::compiler::codegen::text_parser;
use trellis::compiler::compiler_errors::{WasmError, print_formatted_error};
use trellis::file_output::write_output_files;
use trellis::settings::Config;

enum Command {
    /// Compile a set of parsed class files into a module
    Build(Vec<PathBuf>),
    /// Parse a Wasm text fragment and report what it contains
    Wat(PathBuf),
}

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_help(false);
        return;
    }

    let (command, flags) = match parse_args(&args[1..]) {
        Ok(parsed) => parsed,
        Err(message) => {
            red_ln!("{}", message);
            print_help(true);
            std::process::exit(2);
        }
    };

    let exit = match command {
        Command::Build(inputs) => build(&inputs, &flags),
        Command::Wat(path) => check_fragment(&path),
    };
    std::process::exit(exit);
}

struct Flags {
    properties: Vec<(String, String)>,
    out_dir: Option<PathBuf>,
    module_name: Option<String>,
}

fn parse_args(args: &[String]) -> Result<(Command, Flags), String> {
    let mut flags = Flags {
        properties: Vec::new(),
        out_dir: None,
        module_name: None,
    };
    let mut inputs: Vec<PathBuf> = Vec::new();
    let mut command_word: Option<&str> = None;

    for arg in args {
        if let Some(flag) = arg.strip_prefix("--") {
            let (key, value) = match flag.split_once('=') {
                Some((key, value)) => (key, value),
                None => (flag, ""),
            };
            match key {
                "out" => flags.out_dir = Some(PathBuf::from(value)),
                "name" => flags.module_name = Some(value.to_owned()),
                _ => flags.properties.push((key.to_owned(), value.to_owned())),
            }
        } else if command_word.is_none() {
            command_word = Some(arg);
        } else {
            inputs.push(PathBuf::from(arg));
        }
    }

    match command_word {
        Some("build") => {
            if inputs.is_empty() {
                return Err("build needs at least one class file".to_owned());
            }
            Ok((Command::Build(inputs), flags))
        }
        Some("wat") => {
            let mut inputs = inputs;
            match (inputs.pop(), inputs.is_empty()) {
                (Some(path), true) => Ok((Command::Wat(path), flags)),
                _ => Err("wat takes exactly one file".to_owned()),
            }
        }
        Some(other) => Err(format!("unknown command '{other}'")),
        None => Err("missing command".to_owned()),
    }
}

fn build(inputs: &[PathBuf], flags: &Flags) -> i32 {
    let started = Instant::now();

    let base_dir = inputs[0]
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let result = (|| -> Result<(), WasmError> {
        let mut config = Config::load(&base_dir)?;
        for (key, value) in &flags.properties {
            config.options.set_property(key, value)?;
        }

        let mut classes = Vec::new();
        for input in inputs {
            classes.extend(load_classes(input)?);
        }
        grey_ln!("compiling {} classes", classes.len());

        let module_name = flags
            .module_name
            .clone()
            .or(config.project_name.clone())
            .or_else(|| {
                inputs[0]
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "module".to_owned());

        let module = compile_classes(classes, &config.options, &module_name)?;
        let out_dir = flags.out_dir.clone().unwrap_or(base_dir);
        let written = write_output_files(&out_dir, &module, &config.options)?;
        for path in written {
            grey_ln!("  {}", path.display());
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            green_ln_bold!("compiled in {:?}", started.elapsed());
            0
        }
        Err(error) => {
            print_formatted_error(&error);
            1
        }
    }
}

/// Class files arrive as the parser's JSON interchange: either one class or
/// an array of classes per file.
fn load_classes(path: &Path) -> Result<Vec<ClassFile>, WasmError> {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            return Err(WasmError::file_error(format!(
                "could not read {}: {}",
                path.display(),
                e
            )));
        }
    };
    if let Ok(many) = serde_json::from_str::<Vec<ClassFile>>(&source) {
        return Ok(many);
    }
    match serde_json::from_str::<ClassFile>(&source) {
        Ok(one) => Ok(vec![one]),
        Err(e) => Err(WasmError::new(
            format!("{} is not a parsed class file: {}", path.display(), e),
            trellis::compiler::compiler_errors::ErrorKind::Input,
        )),
    }
}

fn check_fragment(path: &Path) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            e_red_ln!("could not read {}: {}", path.display(), e);
            return 1;
        }
    };
    match text_parser::parse_fragment(&source) {
        Ok(instrs) => {
            green_ln_bold!("{}: {} instructions", path.display(), instrs.len());
            0
        }
        Err(error) => {
            print_formatted_error(&error);
            1
        }
    }
}

fn print_help(after_error: bool) {
    if after_error {
        println!();
    }
    println!("Usage:");
    println!("  trellis build <classes.json>... [--out=DIR] [--name=MODULE] [--KEY[=VALUE]]");
    println!("  trellis wat <fragment.wat>");
    println!();
    println!("Recognised properties:");
    println!("  --debugNames        emit the debug-name section and a source map");
    println!("  --useGC             emit GC-style reference and struct types");
    println!("  --useEH             enable the exception-handling opcodes");
    println!("  --SpiderMonkey      emit the GC experiment opt-in section");
    println!("  --ref_eq=SIG        runtime helper comparing references");
    println!("  --vtable_of=SIG     runtime helper reading a vtable offset");
}
