#![no_main]

use libfuzzer_sys::fuzz_target;

use watfront::{compile, print, wat};

fuzz_target!(|data: &[u8]| {
    let source = String::from_utf8_lossy(data);

    // Anything that compiles must print to text that parses back the same.
    if let Ok(module) = compile(&source) {
        let text = print::print(&module);
        let reparsed = wat::parse(&text).expect("printed module parses");
        assert_eq!(reparsed, module);
    }
});
