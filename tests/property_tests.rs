#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use watfront::wat::{Lexer, Token};
    use watfront::{compile, print, wat};

    /// Tokens up to the first lexical error.
    fn lex_prefix(source: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        for result in Lexer::new(source).take(source.len() + 1) {
            match result {
                Ok(token) => tokens.push(token),
                Err(_) => break,
            }
        }
        tokens
    }

    /// WAT-flavoured noise: mostly fragments the lexer knows, with arbitrary
    /// characters mixed in.
    fn wat_noise() -> impl Strategy<Value = String> {
        let fragment = prop_oneof![
            Just("(".to_string()),
            Just(")".to_string()),
            Just(" ".to_string()),
            Just("\n".to_string()),
            Just(";;".to_string()),
            Just("(;".to_string()),
            Just(";)".to_string()),
            Just("\"".to_string()),
            Just("\\".to_string()),
            "[a-z0-9._$+-]{1,8}",
            "0x[0-9a-fA-F_.pP+-]{1,8}",
            any::<char>().prop_map(String::from),
        ];
        prop::collection::vec(fragment, 0..40).prop_map(|parts| parts.concat())
    }

    /// A folded i32 expression over parameter 0.
    fn i32_expr() -> impl Strategy<Value = String> {
        let leaf = prop_oneof![
            any::<i32>().prop_map(|v| format!("(i32.const {})", v)),
            Just("(local.get 0)".to_string()),
            any::<f64>()
                .prop_filter("finite", |v| v.is_finite())
                .prop_map(|v| format!("(i32.trunc_f64_s (f64.const {:?}))", v)),
        ];
        leaf.prop_recursive(4, 32, 3, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("(i32.add {} {})", a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("(i32.lt_u {} {})", a, b)),
                inner.clone().prop_map(|a| format!("(i32.eqz {})", a)),
                inner.clone().prop_map(|a| format!("(block (result i32) {})", a)),
                (inner.clone(), inner.clone(), inner.clone())
                    .prop_map(|(c, a, b)| format!("(if (result i32) {} (then {}) (else {}))", c, a, b)),
                (inner.clone(), inner).prop_map(|(a, b)| format!("(select {} {} (local.get 0))", a, b)),
            ]
        })
    }

    proptest! {
        #[test]
        fn lexer_never_panics(source in any::<String>()) {
            let _ = lex_prefix(&source);
        }

        #[test]
        fn spans_are_ordered_and_in_bounds(source in wat_noise()) {
            let tokens = lex_prefix(&source);
            let mut previous_end = 0;
            for token in &tokens {
                let span = token.span;
                prop_assert!(span.start >= previous_end);
                prop_assert!(span.start < span.end);
                prop_assert!(span.end <= source.len());
                prop_assert!(source.get(span.start..span.end).is_some());
                prop_assert!(span.line >= 1 && span.column >= 1);
                previous_end = span.end;
            }
        }

        #[test]
        fn pipeline_never_panics(source in wat_noise()) {
            let _ = compile(&source);
        }

        #[test]
        fn generated_functions_round_trip(body in i32_expr()) {
            let source = format!("(module (func $f (export \"f\") (param i32) (result i32) {}))", body);
            let module = compile(&source).map_err(|e| TestCaseError::fail(format!("{}\n{}", source, e)))?;
            let text = print::print(&module);
            let reparsed = wat::parse(&text).map_err(|e| TestCaseError::fail(format!("{}\n{}", text, e)))?;
            prop_assert_eq!(reparsed, module);
        }
    }
}
