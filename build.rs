use std::fs;
use std::path::Path;

fn main() {
    // Rerun if a fixture is added, removed or edited
    println!("cargo:rerun-if-changed=tests/fixtures");

    let Ok(entries) = fs::read_dir(Path::new("tests/fixtures")) else {
        return;
    };
    for path in entries.flatten().map(|entry| entry.path()) {
        if path.extension().and_then(|s| s.to_str()) == Some("wat") {
            println!("cargo:rerun-if-changed={}", path.display());
        }
    }
}
