//! Behaviour-level tests: control flow, dispatch, globals, strings and the
//! exception lowering, checked through both output formats.

#[cfg(test)]
mod tests {
    use crate::build::compile_classes;
    use crate::compiler::bytecode::{FieldInfo, PoolConstant, access};
    use crate::compiler::codegen::text_parser;
    use crate::compiler_tests::helpers::*;
    use crate::settings::CompilerOptions;

    /// Extract the body lines of a named function from the text output.
    fn function_body(wat: &str, name_part: &str) -> String {
        let mut body = String::new();
        let mut inside = false;
        for line in wat.lines() {
            if line.trim_start().starts_with("(func") && line.contains(name_part) {
                inside = true;
                continue;
            }
            if inside {
                if line == "  )" {
                    break;
                }
                if line.trim_start().starts_with("(local") {
                    continue;
                }
                body.push_str(line);
                body.push('\n');
            }
        }
        assert!(!body.is_empty(), "no body found for {name_part}");
        body
    }

    #[test]
    fn ternary_compiles_to_one_if_else_with_result() {
        let module = compile_classes(
            vec![class("com/example/Pick", vec![ternary_method()])],
            &CompilerOptions::default(),
            "pick",
        )
        .unwrap();

        let body = function_body(&module.wat, "pick");
        assert_eq!(body.matches("if (result i32)").count(), 1);
        assert_eq!(body.matches("else").count(), 1);
        assert!(body.contains("i32.const 13"));
        assert!(body.contains("i32.const 76"));

        // The produced text must re-read without error
        text_parser::parse_fragment(&body).unwrap();

        wasmparser::validate(&module.wasm).unwrap();
    }

    #[test]
    fn sparse_switch_emits_one_branch_per_case_plus_default() {
        let module = compile_classes(
            vec![class("com/example/Switch", vec![sparse_switch_method()])],
            &CompilerOptions::default(),
            "switch",
        )
        .unwrap();

        let body = function_body(&module.wat, "dispatch");
        // Four conditional exits, one per case; the default is the trailing
        // unconditional branch: cases + 1 transfers in total.
        assert_eq!(body.matches("br_if").count(), 4);
        assert!(body.contains("br "));
        assert!(body.contains("i32.const 1000"));
        assert!(body.contains(&format!("i32.const {}", i32::MAX)));

        text_parser::parse_fragment(&body).unwrap();
        wasmparser::validate(&module.wasm).unwrap();
    }

    #[test]
    fn virtual_calls_go_through_the_vtable() {
        let speak = instance_method("speak", "()V", Asm::new().op(0xB1).finish());
        let run = {
            let code = Asm::new()
                .op(0x2A) // aload_0
                .op(0xB6)
                .u16(1) // invokevirtual #1
                .op(0xB1) // return
                .finish();
            exported(static_method("run", "(Lcom/example/Animal;)V", code))
        };
        let animal = class_with_pool(
            "com/example/Animal",
            vec![speak, run],
            Vec::new(),
            pool(vec![PoolConstant::MethodRef {
                class_name: "com/example/Animal".to_owned(),
                name: "speak".to_owned(),
                descriptor: "()V".to_owned(),
            }]),
        );

        let module = compile_classes(vec![animal], &CompilerOptions::default(), "animal").unwrap();

        let body = function_body(&module.wat, "run");
        assert!(body.contains("call_indirect"));
        assert!(body.contains("i32.load"));
        assert!(body.contains("vtableOf"));

        // Indirect calls demand the funcref table, its 1:1 element segment
        // and the vtable bytes in the data section.
        let wat = &module.wat;
        assert!(wat.contains("(table 3 3 funcref)"));
        assert!(wat.contains("(elem (i32.const 0) func 0 1 2)"));
        assert!(wat.contains("(data (i32.const 0)"));
        assert!(wat.contains("(export \"memory\" (memory 0))"));

        // vtableOf arrives as a runtime import and lands in the descriptor
        assert!(module
            .imports
            .iter()
            .any(|import| import.name.contains("vtableOf")));

        wasmparser::validate(&module.wasm).unwrap();
    }

    #[test]
    fn static_fields_become_lazily_declared_globals() {
        let code = Asm::new()
            .op(0xB2)
            .u16(1) // getstatic #1
            .op(0x04) // iconst_1
            .op(0x60) // iadd
            .op(0xB3)
            .u16(1) // putstatic #1
            .op(0xB1) // return
            .finish();
        let counter = class_with_pool(
            "com/example/Counter",
            vec![exported(static_method("bump", "()V", code))],
            vec![FieldInfo {
                name: "count".to_owned(),
                descriptor: "I".to_owned(),
                access_flags: access::PUBLIC | access::STATIC,
            }],
            pool(vec![PoolConstant::FieldRef {
                class_name: "com/example/Counter".to_owned(),
                name: "count".to_owned(),
                descriptor: "I".to_owned(),
            }]),
        );

        let module =
            compile_classes(vec![counter], &CompilerOptions::default(), "counter").unwrap();
        assert!(module.wat.contains("(global $com/example/Counter.count (mut i32) (i32.const 0))"));
        let body = function_body(&module.wat, "bump");
        assert!(body.contains("global.get $com/example/Counter.count"));
        assert!(body.contains("global.set $com/example/Counter.count"));
        wasmparser::validate(&module.wasm).unwrap();
    }

    #[test]
    fn string_constants_are_interned_into_the_data_section() {
        let code = Asm::new()
            .op(0x12)
            .i8(1) // ldc #1
            .op(0xB0) // areturn
            .finish();
        let texts = class_with_pool(
            "com/example/Texts",
            vec![exported(static_method(
                "greeting",
                "()Ljava/lang/String;",
                code,
            ))],
            Vec::new(),
            pool(vec![PoolConstant::Str("hello".to_owned())]),
        );

        let module = compile_classes(vec![texts], &CompilerOptions::default(), "texts").unwrap();
        assert!(module.wat.contains("(table 1 1 externref)"));
        assert!(module.wat.contains("hello"));
        assert!(module.wat.contains("(export \"strings\""));
        let body = function_body(&module.wat, "greeting");
        assert!(body.contains("stringConstant"));
        assert!(module
            .imports
            .iter()
            .any(|import| import.name.contains("stringConstant")));
    }

    #[test]
    fn exception_regions_lower_to_try_catch() {
        let code = Asm::new()
            .op(0x10)
            .i8(5) // 0: bipush 5
            .op(0x3B) // 2: istore_0
            .op(0xA7)
            .u16(7) // 3: goto -> 10
            .op(0x4C) // 6: astore_1 (handler entry)
            .op(0x10)
            .i8(7) // 7: bipush 7
            .op(0x3B) // 9: istore_0
            .op(0xB1) // 10: return
            .finish();
        let mut method = exported(static_method("guarded", "()V", code));
        method
            .code
            .as_mut()
            .unwrap()
            .exception_table
            .push(handler(0, 3, 6, None));

        let mut options = CompilerOptions::default();
        options.use_eh = true;
        let module = compile_classes(
            vec![class("com/example/Guarded", vec![method])],
            &options,
            "guarded",
        )
        .unwrap();

        let body = function_body(&module.wat, "guarded");
        assert!(body.contains("try (result externref)"));
        assert!(body.contains("catch"));
        assert!(body.contains("br_on_exn 0 0"));
        assert!(body.contains("rethrow"));
        assert!(module.wat.contains("(event (param externref))"));

        // Event section id 13 sits between global(6) and export(7)
        let layout = section_layout(&module.wasm);
        assert!(layout.iter().any(|(id, _)| *id == 13));
    }

    #[test]
    fn exception_table_without_eh_option_is_an_input_error() {
        let code = Asm::new().op(0xB1).finish();
        let mut method = exported(static_method("guarded", "()V", code));
        method
            .code
            .as_mut()
            .unwrap()
            .exception_table
            .push(handler(0, 1, 1, None));

        let err = compile_classes(
            vec![class("com/example/Guarded", vec![method])],
            &CompilerOptions::default(),
            "guarded",
        )
        .unwrap_err();
        assert!(err.msg.contains("useEH"));
    }

    #[test]
    fn floating_remainder_is_rejected_with_method_context() {
        let code = Asm::new()
            .op(0x22) // fload_0
            .op(0x23) // fload_1
            .op(0x72) // frem
            .op(0xAE) // freturn
            .finish();
        let err = compile_classes(
            vec![class(
                "com/example/Modulo",
                vec![exported(static_method("rem", "(FF)F", code))],
            )],
            &CompilerOptions::default(),
            "modulo",
        )
        .unwrap_err();
        assert!(err.msg.contains("remainder"));
        assert_eq!(err.class_name, "com/example/Modulo");
        assert_eq!(err.method_name, "rem");
        assert_eq!(err.source_line, 1);
    }

    #[test]
    fn inline_text_fragments_replace_method_bodies() {
        use crate::compiler::bytecode::{Annotation, MethodInfo};
        let fragment = MethodInfo {
            name: "twice".to_owned(),
            descriptor: "(I)I".to_owned(),
            access_flags: access::PUBLIC | access::STATIC,
            code: None,
            annotations: vec![
                Annotation::Export,
                Annotation::TextCode {
                    code: "local.get 0\ni32.const 2\ni32.mul\nreturn".to_owned(),
                },
            ],
        };
        let module = compile_classes(
            vec![class("com/example/Inline", vec![fragment])],
            &CompilerOptions::default(),
            "inline",
        )
        .unwrap();
        let body = function_body(&module.wat, "twice");
        assert!(body.contains("i32.mul"));
        wasmparser::validate(&module.wasm).unwrap();
    }

    #[test]
    fn import_annotations_skip_the_body_and_feed_the_descriptor() {
        use crate::compiler::bytecode::{Annotation, MethodInfo};
        let imported = MethodInfo {
            name: "log".to_owned(),
            descriptor: "(D)V".to_owned(),
            access_flags: access::PUBLIC | access::STATIC,
            code: None,
            annotations: vec![Annotation::Import {
                module: "console".to_owned(),
                name: "log".to_owned(),
            }],
        };
        let module = compile_classes(
            vec![class("com/example/Console", vec![imported, add_method()])],
            &CompilerOptions::default(),
            "console",
        )
        .unwrap();
        assert!(module.wat.contains("(import \"console\" \"log\""));
        assert_eq!(module.imports.len(), 1);
        assert_eq!(module.imports[0].module, "console");
        assert_eq!(module.imports[0].name, "log");
    }

    #[test]
    fn exporting_an_instance_method_is_a_semantic_error() {
        let mut method = instance_method("speak", "()V", Asm::new().op(0xB1).finish());
        method
            .annotations
            .push(crate::compiler::bytecode::Annotation::Export);
        let err = compile_classes(
            vec![class("com/example/Animal", vec![method])],
            &CompilerOptions::default(),
            "animal",
        )
        .unwrap_err();
        assert!(err.msg.contains("static"));
    }
}
