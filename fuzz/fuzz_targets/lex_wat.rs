#![no_main]

use libfuzzer_sys::fuzz_target;

use watfront::wat::Lexer;

fuzz_target!(|data: &[u8]| {
    // Invalid UTF-8 becomes replacement characters
    let source = String::from_utf8_lossy(data);

    for result in Lexer::new(&source) {
        match result {
            Ok(token) => assert!(token.span.end <= source.len()),
            Err(_) => break,
        }
    }
});
