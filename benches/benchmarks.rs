//! Benchmark suite for Evolve subsystems.
//!
//! This module provides performance benchmarks for the pure hot paths:
//! - Health scoring
//! - Mode selection
//! - Outcome determination
//! - Probe output parsing
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

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use evolve::config::{Assessments, PatternConfig};
use evolve::health::{health_score, HealthWeights, SubScores};
use evolve::metrics::collector::{CommandProbe, ProbePatterns};
use evolve::metrics::{MetricsSnapshot, SecurityCounts};
use evolve::mode::{select_mode, ModeInputs};
use evolve::workspace::{determine_outcome, RegressionPolicy};

// ============================================================================
// Health Scoring
// ============================================================================

fn bench_health_score(c: &mut Criterion) {
    let snapshot = MetricsSnapshot::new()
        .with_test_counts(480, 12)
        .with_frontend_counts(120, 3)
        .with_coverage(74.2)
        .with_todo_comments(31)
        .with_security(SecurityCounts {
            high: 1,
            medium: 4,
            ..Default::default()
        });
    let weights = HealthWeights::default();
    let assessments = Assessments::default();

    c.bench_function("health_score", |b| {
        b.iter(|| {
            let scores = SubScores::derive(black_box(&snapshot), black_box(&assessments));
            black_box(health_score(&scores, &weights))
        });
    });
}

// ============================================================================
// Mode Selection
// ============================================================================

fn bench_mode_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("mode_selection");

    // worst case walks the whole rule table to the standard fallback
    for (label, inputs) in [
        ("first_rule", ModeInputs {
            critical_findings: 2,
            ..ModeInputs::nominal(7)
        }),
        ("last_rule", ModeInputs::nominal(7)),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(label), &inputs, |b, inputs| {
            b.iter(|| black_box(select_mode(black_box(inputs))));
        });
    }

    group.finish();
}

// ============================================================================
// Outcome Determination
// ============================================================================

fn bench_outcome(c: &mut Criterion) {
    let policy = RegressionPolicy::default();
    let before = MetricsSnapshot::new().with_test_counts(500, 0);
    let failing: Vec<String> = (0..40).map(|i| format!("module_{i}::regression")).collect();
    let after = MetricsSnapshot::new()
        .with_test_counts(460, 40)
        .with_failing_tests(failing);

    c.bench_function("determine_outcome", |b| {
        b.iter(|| {
            black_box(determine_outcome(
                black_box(&before),
                black_box(&after),
                black_box(&policy),
            ))
        });
    });
}

// ============================================================================
// Probe Output Parsing
// ============================================================================

fn bench_probe_parsing(c: &mut Criterion) {
    let patterns = ProbePatterns::compile(&PatternConfig::cargo_test()).unwrap();
    let probe = CommandProbe::new("tests", "cargo test", patterns, Duration::from_secs(60));

    // a realistically sized cargo test transcript
    let mut output = String::new();
    for i in 0..500 {
        let status = if i % 50 == 0 { "FAILED" } else { "ok" };
        output.push_str(&format!("test module_{i}::case ... {status}\n"));
    }
    output.push_str("test result: FAILED. 490 passed; 10 failed; 0 ignored\n");

    c.bench_function("probe_parse_output", |b| {
        b.iter(|| black_box(probe.parse_output(black_box(&output), Some(101))));
    });
}

criterion_group!(
    benches,
    bench_health_score,
    bench_mode_selection,
    bench_outcome,
    bench_probe_parsing
);
criterion_main!(benches);
