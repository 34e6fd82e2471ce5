//! Benchmark suite for AutoSCAD reply parsing and prompt assembly.
//!
//! # Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench
//!
//! # Save baseline for comparison
//! cargo bench -- --save-baseline main
//!
//! # Compare against baseline
//! cargo bench -- --baseline main
//! ```
//!
//! Criterion writes JSON estimates and HTML reports to `target/criterion/`.

use autoscad::parser::{extract_code, extract_plan, extract_verdict};
use autoscad::prompt;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

// ============================================================================
// Reply Parsing Benchmarks
// ============================================================================

/// Benchmark code extraction on model sources of increasing size.
fn bench_extract_code(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_code");

    for modules in [10, 100, 1000] {
        let body = scad_source(modules);
        let fenced = format!(
            "Here is the updated model:\n\n```openscad\n{}\n```\n\nThe hole is now centred.",
            body
        );

        group.throughput(Throughput::Bytes(fenced.len() as u64));
        group.bench_with_input(BenchmarkId::new("fenced_in_prose", modules), &fenced, |b, text| {
            b.iter(|| black_box(extract_code(black_box(text))))
        });
        group.bench_with_input(BenchmarkId::new("plain", modules), &body, |b, text| {
            b.iter(|| black_box(extract_code(black_box(text))))
        });
    }

    group.finish();
}

/// Benchmark verdict extraction for the reply shapes models produce.
fn bench_extract_verdict(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_verdict");

    let long_explanation = "The bracket is missing its second mounting hole. ".repeat(50);
    let cases = [
        ("yes_first_line", "YES\nThe cube is 10mm on each side.".to_string()),
        ("no_long", format!("NO\n{}", long_explanation)),
        (
            "json",
            r#"{"fulfilled": false, "explanation": "The fillet radius is too small."}"#.to_string(),
        ),
        ("no_token", long_explanation.clone()),
    ];

    for (name, reply) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), reply, |b, text| {
            b.iter(|| black_box(extract_verdict(black_box(text))))
        });
    }

    group.finish();
}

/// Benchmark plan extraction for structured and opaque plans.
fn bench_extract_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract_plan");

    for steps in [3, 30] {
        let structured = format!(
            "```json\n[{}]\n```",
            (0..steps)
                .map(|i| format!(
                    r#"{{"action": "modify", "target": "part_{}", "description": "move it 2mm up"}}"#,
                    i
                ))
                .collect::<Vec<_>>()
                .join(", ")
        );
        group.bench_with_input(BenchmarkId::new("structured", steps), &structured, |b, text| {
            b.iter(|| black_box(extract_plan(black_box(text))))
        });
    }

    let opaque = "1. Increase the wall thickness.\n2. Add a chamfer to the top edge.\n".repeat(10);
    group.bench_function("opaque", |b| b.iter(|| black_box(extract_plan(black_box(&opaque)))));

    group.finish();
}

// ============================================================================
// Prompt Building Benchmarks
// ============================================================================

/// Benchmark prompt assembly for each phase with a mid-sized model.
fn bench_prompt_building(c: &mut Criterion) {
    let mut group = c.benchmark_group("prompt_building");

    let specification = "A wall bracket with two 5mm mounting holes and a 45 degree support rib.";
    let source = scad_source(200);
    let views: Vec<String> = ["default", "front", "back", "left", "right", "top", "bottom"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let diagnostic = "OpenSCAD Errors:\nERROR: Parser error in file model.scad, line 12: syntax error";

    group.bench_function("evaluation", |b| {
        b.iter(|| black_box(prompt::evaluation(specification, black_box(&source), &views)))
    });
    group.bench_function("planning", |b| {
        b.iter(|| {
            black_box(prompt::planning(
                specification,
                black_box(&source),
                "The rib is missing.",
                &views,
            ))
        })
    });
    group.bench_function("codegen", |b| {
        b.iter(|| {
            black_box(prompt::codegen(
                specification,
                black_box(&source),
                r#"[{"action": "add", "description": "support rib"}]"#,
            ))
        })
    });
    group.bench_function("repair", |b| {
        b.iter(|| black_box(prompt::repair(specification, black_box(&source), diagnostic, 2)))
    });

    group.finish();
}

/// An OpenSCAD source with `modules` small modules and their instances.
fn scad_source(modules: usize) -> String {
    let mut source = String::from("$fn = 64;\n\n");
    for i in 0..modules {
        source.push_str(&format!(
            "module part_{i}() {{\n    difference() {{\n        cube([{w}, 10, 5]);\n        translate([2, 2, -1]) cylinder(h = 7, r = 1.5);\n    }}\n}}\n\n",
            i = i,
            w = 10 + i % 7
        ));
    }
    for i in 0..modules {
        source.push_str(&format!("translate([{}, 0, 0]) part_{}();\n", i * 12, i));
    }
    source
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    parser_benches,
    bench_extract_code,
    bench_extract_verdict,
    bench_extract_plan
);

criterion_group!(prompt_benches, bench_prompt_building);

criterion_main!(parser_benches, prompt_benches);
