use std::env;
use std::fs;
use std::process;

fn main() {
    let Some(path) = env::args().nth(1) else {
        eprintln!("usage: watfront <file.wat>");
        process::exit(2);
    };

    let source = match fs::read_to_string(&path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("couldn't read {}: {}", path, e);
            process::exit(2);
        }
    };

    match watfront::compile(&source) {
        Ok(module) => print!("{}", watfront::print::print(&module)),
        Err(diagnostics) => {
            for diagnostic in diagnostics {
                eprintln!("{}:{}", path, diagnostic);
            }
            process::exit(1);
        }
    }
}
