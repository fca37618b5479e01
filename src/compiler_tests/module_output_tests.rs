//! Binary-format properties of whole compiled modules.

#[cfg(test)]
mod tests {
    use crate::build::compile_classes;
    use crate::compiler::bytecode::{Annotation, MethodInfo, access};
    use crate::compiler::codegen::binary_writer::PREAMBLE;
    use crate::compiler_tests::helpers::*;
    use crate::settings::CompilerOptions;
    use wasmparser::{Parser, Payload};

    #[test]
    fn output_starts_with_the_preamble() {
        let module = compile_classes(
            vec![class("com/example/Adder", vec![add_method()])],
            &CompilerOptions::default(),
            "adder",
        )
        .unwrap();
        assert!(module.wasm.len() >= 8);
        assert_eq!(&module.wasm[..8], &PREAMBLE);
    }

    #[test]
    fn emitted_module_validates() {
        let module = compile_classes(
            vec![class("com/example/Adder", vec![add_method()])],
            &CompilerOptions::default(),
            "adder",
        )
        .unwrap();
        wasmparser::validate(&module.wasm).unwrap();
    }

    #[test]
    fn non_custom_sections_appear_in_canonical_order() {
        let module = compile_classes(
            vec![class("com/example/Adder", vec![add_method(), ternary_method()])],
            &CompilerOptions::default(),
            "adder",
        )
        .unwrap();

        // Canonical id order, with the event section slotted between global
        // and export; custom sections trail.
        let canonical = [1u8, 2, 3, 4, 5, 6, 13, 7, 9, 10, 11];
        let layout = section_layout(&module.wasm);
        let non_custom: Vec<u8> = layout
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| *id != 0)
            .collect();
        let mut cursor = 0;
        for id in &non_custom {
            let position = canonical[cursor..]
                .iter()
                .position(|c| c == id)
                .unwrap_or_else(|| panic!("section {id} out of order in {non_custom:?}"));
            cursor += position;
        }

        // Custom sections only after code in this layout
        let code_index = layout.iter().position(|(id, _)| *id == 10).unwrap();
        for (index, (id, _)) in layout.iter().enumerate() {
            if *id == 0 {
                assert!(index > code_index, "custom section before code");
            }
        }
    }

    #[test]
    fn function_types_are_canonicalised() {
        // Two methods with the same signature share one type entry
        let module = compile_classes(
            vec![class(
                "com/example/Math",
                vec![
                    add_method(),
                    exported(static_method(
                        "sub",
                        "(II)I",
                        Asm::new().op(0x1A).op(0x1B).op(0x64).op(0xAC).finish(),
                    )),
                ],
            )],
            &CompilerOptions::default(),
            "math",
        )
        .unwrap();
        assert_eq!(type_count(&module.wasm), 1);

        // Distinct signatures get distinct entries
        let module = compile_classes(
            vec![class(
                "com/example/Math",
                vec![
                    exported(static_method(
                        "idi",
                        "(I)I",
                        Asm::new().op(0x1A).op(0xAC).finish(),
                    )),
                    exported(static_method(
                        "idl",
                        "(J)J",
                        Asm::new().op(0x1E).op(0xAD).finish(),
                    )),
                ],
            )],
            &CompilerOptions::default(),
            "math",
        )
        .unwrap();
        assert_eq!(type_count(&module.wasm), 2);
    }

    fn type_count(wasm: &[u8]) -> u32 {
        for payload in Parser::new(0).parse_all(wasm) {
            if let Payload::TypeSection(reader) = payload.unwrap() {
                return reader.count();
            }
        }
        0
    }

    #[test]
    fn function_ids_count_imports_first() {
        let imported = MethodInfo {
            name: "now".to_owned(),
            descriptor: "()D".to_owned(),
            access_flags: access::PUBLIC | access::STATIC,
            code: None,
            annotations: vec![Annotation::Import {
                module: "env".to_owned(),
                name: "now".to_owned(),
            }],
        };
        let module = compile_classes(
            vec![class("com/example/Clock", vec![imported, add_method()])],
            &CompilerOptions::default(),
            "clock",
        )
        .unwrap();

        let mut imports = 0u32;
        let mut defined = 0u32;
        for payload in Parser::new(0).parse_all(&module.wasm) {
            match payload.unwrap() {
                Payload::ImportSection(reader) => imports = reader.count(),
                Payload::FunctionSection(reader) => defined = reader.count(),
                _ => {}
            }
        }
        assert_eq!(imports, 1);
        assert_eq!(defined, 1);

        // The export references the defined function, whose id follows the
        // import block.
        let mut export_index = None;
        for payload in Parser::new(0).parse_all(&module.wasm) {
            if let Payload::ExportSection(reader) = payload.unwrap() {
                for export in reader {
                    let export = export.unwrap();
                    if export.name == "add" {
                        export_index = Some(export.index);
                    }
                }
            }
        }
        assert_eq!(export_index, Some(1));
    }

    #[test]
    fn compiling_twice_is_byte_identical() {
        let classes = || {
            vec![
                class(
                    "com/example/Adder",
                    vec![add_method(), ternary_method(), sparse_switch_method()],
                ),
            ]
        };
        let options = CompilerOptions::default();
        let first = compile_classes(classes(), &options, "adder").unwrap();
        let second = compile_classes(classes(), &options, "adder").unwrap();
        assert_eq!(first.wasm, second.wasm);
        assert_eq!(first.wat, second.wat);
    }

    #[test]
    fn exports_list_the_simple_method_name() {
        let module = compile_classes(
            vec![class("com/example/Adder", vec![add_method()])],
            &CompilerOptions::default(),
            "adder",
        )
        .unwrap();
        let mut names = Vec::new();
        for payload in Parser::new(0).parse_all(&module.wasm) {
            if let Payload::ExportSection(reader) = payload.unwrap() {
                for export in reader {
                    names.push(export.unwrap().name.to_owned());
                }
            }
        }
        assert_eq!(names, vec!["add"]);
    }

    #[test]
    fn debug_names_bring_a_name_section_and_a_source_map() {
        let mut options = CompilerOptions::default();
        options.debug_names = true;
        let module = compile_classes(
            vec![class("com/example/Adder", vec![add_method()])],
            &options,
            "adder",
        )
        .unwrap();

        let mut custom_names = Vec::new();
        for payload in Parser::new(0).parse_all(&module.wasm) {
            if let Payload::CustomSection(reader) = payload.unwrap() {
                custom_names.push(reader.name().to_owned());
            }
        }
        assert!(custom_names.iter().any(|n| n == "name"));
        assert!(custom_names.iter().any(|n| n == "sourceMappingURL"));
        assert!(custom_names.iter().any(|n| n == "producers"));

        let map = module.source_map.expect("source map emitted");
        let parsed: serde_json::Value = serde_json::from_str(&map).unwrap();
        assert_eq!(parsed["version"], 3);
        assert_eq!(parsed["sources"][0], "Adder.java");
    }

    #[test]
    fn producers_section_is_always_present() {
        let module = compile_classes(
            vec![class("com/example/Adder", vec![add_method()])],
            &CompilerOptions::default(),
            "adder",
        )
        .unwrap();
        let mut found = false;
        for payload in Parser::new(0).parse_all(&module.wasm) {
            if let Payload::CustomSection(reader) = payload.unwrap() {
                if reader.name() == "producers" {
                    found = true;
                }
            }
        }
        assert!(found);
    }

    #[test]
    fn spider_monkey_opt_in_comes_first() {
        let mut options = CompilerOptions::default();
        options.spider_monkey = true;
        options.use_gc = true;
        let module = compile_classes(
            vec![class("com/example/Adder", vec![add_method()])],
            &options,
            "adder",
        )
        .unwrap();
        let layout = section_layout(&module.wasm);
        assert_eq!(layout[0].0, 0, "opt-in custom section leads");
    }
}
