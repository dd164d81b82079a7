use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fs;
use watfront::ir::{InstructionKind, Module};
use watfront::{compile, validate, wat};

fn load_fixture(name: &str) -> String {
    let path = format!("tests/fixtures/{}.wat", name);
    fs::read_to_string(&path).expect(&format!("Failed to read {}", path))
}

/// A module of `count` functions, each a long chain of folded arithmetic and
/// nested blocks, calling its neighbour.
fn synthetic_module(count: usize) -> String {
    let mut source = String::from("(module\n  (memory 1)\n");
    for i in 0..count {
        let callee = (i + 1) % count;
        source.push_str(&format!("  (func $f{} (param $x i32) (result i32) (local $acc i32)\n", i));
        for j in 0..20 {
            source.push_str(&format!(
                "    (local.set $acc (i32.add (local.get $acc) (i32.mul (local.get $x) (i32.const {}))))\n",
                j
            ));
        }
        source.push_str("    (block $out (result i32)\n");
        source.push_str("      (drop (br_if $out (local.get $acc) (i32.eqz (local.get $x))))\n");
        source.push_str(&format!(
            "      (i32.store offset=4 (local.get $x) (call $f{} (i32.sub (local.get $x) (i32.const 1))))\n",
            callee
        ));
        source.push_str("      (i32.load offset=4 (local.get $x))))\n");
    }
    source.push(')');
    source
}

fn count_instructions(module: &Module) -> usize {
    fn walk(body: &[watfront::ir::Instruction]) -> usize {
        body.iter()
            .map(|inst| {
                1 + match &inst.kind {
                    InstructionKind::Block { body, .. } | InstructionKind::Loop { body, .. } => walk(body),
                    InstructionKind::If {
                        then_body, else_body, ..
                    } => walk(then_body) + walk(else_body),
                    _ => 0,
                }
            })
            .sum()
    }
    module.functions.iter().map(|f| walk(&f.body)).sum()
}

fn benchmark_validation(c: &mut Criterion) {
    let test_cases = vec![
        ("factorial", load_fixture("factorial")),
        ("memory", load_fixture("memory")),
        ("control", load_fixture("control")),
        ("synthetic_200", synthetic_module(200)),
    ];

    println!("\nModule analysis:");
    for (name, source) in &test_cases {
        let module = wat::parse(source).expect("Failed to parse module");
        println!(
            "{}: {} bytes, {} functions, {} instructions",
            name,
            source.len(),
            module.functions.len(),
            count_instructions(&module)
        );
    }

    let mut group = c.benchmark_group("parse");
    for (name, source) in &test_cases {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(wat::parse(black_box(source)).expect("Failed to parse module")));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("validate");
    for (name, source) in &test_cases {
        let module = wat::parse(source).expect("Failed to parse module");
        group.bench_function(*name, |b| {
            b.iter(|| black_box(validate::validate(module.clone()).expect("Failed to validate module")));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("full_compile");
    for (name, source) in &test_cases {
        group.bench_function(*name, |b| {
            b.iter(|| black_box(compile(black_box(source)).expect("Failed to compile module")));
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_validation);
criterion_main!(benches);
