#[cfg(test)]
mod tests {
    use rstest::rstest;
    use std::fs;
    use std::path::PathBuf;
    use watfront::diagnostic::DiagnosticKind;
    use watfront::ir::{ExportDesc, FuncType, InstructionKind, Module, ValueType};
    use watfront::{compile, print, wat};

    fn fixture(name: &str) -> String {
        let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures", name].iter().collect();
        fs::read_to_string(&path).unwrap_or_else(|e| panic!("couldn't read {}: {}", path.display(), e))
    }

    fn compiled(name: &str) -> Module {
        compile(&fixture(name)).unwrap_or_else(|e| panic!("{} failed to compile:\n{}", name, e))
    }

    #[rstest]
    #[case("add.wat")]
    #[case("block_unreachable.wat")]
    #[case("shared_signature.wat")]
    #[case("factorial.wat")]
    #[case("memory.wat")]
    #[case("control.wat")]
    #[case("host.wat")]
    fn valid_fixtures_round_trip(#[case] name: &str) {
        let module = compiled(name);
        let text = print::print(&module);
        let reparsed = compile(&text).unwrap_or_else(|e| panic!("printed {} failed:\n{}\n{}", name, text, e));
        assert_eq!(reparsed, module, "{} changed on round trip:\n{}", name, text);
    }

    #[rstest]
    #[case("stack_surplus.wat", DiagnosticKind::TypeMismatch, 2)]
    #[case("missing_call.wat", DiagnosticKind::UnresolvedIdentifier, 3)]
    #[case("duplicate_func.wat", DiagnosticKind::DuplicateIdentifier, 3)]
    #[case("unterminated_string.wat", DiagnosticKind::LexError, 3)]
    #[case("bad_branch.wat", DiagnosticKind::TypeMismatch, 3)]
    #[case("signature_mismatch.wat", DiagnosticKind::SignatureMismatch, 3)]
    #[case("unbalanced.wat", DiagnosticKind::ParseError, 3)]
    #[case("two_memories.wat", DiagnosticKind::ParseError, 3)]
    fn invalid_fixtures(#[case] name: &str, #[case] kind: DiagnosticKind, #[case] line: u32) {
        let diagnostics = compile(&fixture(name)).expect_err(name);
        let first = diagnostics.iter().next().expect("at least one diagnostic");
        assert_eq!(first.kind, kind, "{}: {}", name, diagnostics);
        assert_eq!(first.line(), line, "{}: {}", name, diagnostics);
    }

    #[test]
    fn add_has_one_binary_function() {
        let module = compiled("add.wat");
        assert_eq!(module.functions.len(), 1);
        assert_eq!(
            module.func_signature(0),
            Some(&FuncType::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]))
        );
    }

    #[test]
    fn stack_surplus_reports_both_values() {
        let diagnostics = compile(&fixture("stack_surplus.wat")).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.to_string(),
            "2:3: type mismatch: type mismatch in end of function: expected [i32], found [i32 i32]"
        );
    }

    #[test]
    fn missing_call_names_the_identifier() {
        let diagnostics = compile(&fixture("missing_call.wat")).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics.0[0].message.contains("$missing"));
    }

    #[test]
    fn unreachable_code_after_branch() {
        let module = compiled("block_unreachable.wat");
        let body = &module.functions[0].body;
        assert!(matches!(body[0].kind, InstructionKind::Block { .. }));
        assert!(matches!(body[1].kind, InstructionKind::Unreachable));
    }

    #[test]
    fn identical_inline_signatures_share_a_type() {
        let module = compiled("shared_signature.wat");
        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.functions[0].type_index, module.functions[1].type_index);
    }

    #[test]
    fn host_module_index_spaces() {
        let module = compiled("host.wat");
        assert_eq!(module.id.as_deref(), Some("host"));
        assert_eq!(module.imports.len(), 4);
        // $log and $callback have the same shape
        assert_eq!(module.types.len(), 2);
        assert_eq!(module.start, Some(3));
        assert_eq!(module.exports[0].desc, ExportDesc::Func(1));
        assert_eq!(module.exports[1].desc, ExportDesc::Global(1));
    }

    #[test]
    fn printed_fixture_is_stable() {
        let once = print::print(&compiled("factorial.wat"));
        let twice = print::print(&wat::parse(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn module_serializes() {
        let module = compiled("control.wat");
        let json = serde_json::to_value(&module).unwrap();
        assert_eq!(json["functions"].as_array().map(Vec::len), Some(5));
        let back: Module = serde_json::from_value(json).unwrap();
        assert_eq!(back, module);
    }
}
