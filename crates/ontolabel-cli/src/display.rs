//! Plain-text reports for evaluation and compile runs.

use ontolabel_compile::{CompileReport, Evaluation};
use ontolabel_core::Metric;

/// Metrics reported by `run`.
pub const REPORT_METRICS: [Metric; 3] = [
    Metric::RankPrecision(5),
    Metric::RankPrecision(10),
    Metric::RankPrecision(50),
];

pub fn print_scores(eval: &Evaluation<'_>, examples: usize) {
    println!("examples: {examples}");
    if !eval.failures().is_empty() {
        println!("failed:   {}", eval.failures().len());
    }
    for metric in REPORT_METRICS {
        println!("{:<9} {:.4}", format!("{metric}:"), eval.score(metric));
    }
}

pub fn print_compile_report(round: usize, report: &CompileReport) {
    println!("── round {} ──", round + 1);
    for (i, candidate) in report.candidates.iter().enumerate() {
        let marker = if i == report.best { "*" } else { " " };
        let outcome = match (&candidate.score, &candidate.disqualified) {
            (_, Some(reason)) => format!("disqualified: {reason}"),
            (Some(score), None) => format!("{score:.4}"),
            (None, None) => "-".to_string(),
        };
        println!(
            "{marker} {:<22} {:<40} bootstrapped={} failures={}",
            candidate.kind.to_string(),
            outcome,
            candidate.bootstrapped,
            candidate.failures
        );
    }
}
