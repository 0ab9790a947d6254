//! Human-readable run summary.

use std::fmt::Write;

use edos_control::RunSummary;
use edos_loadgen::LoadReport;

/// Render `summary` as a tick table followed by totals.
pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{:>5} {:>9} {:>9} {:>8} {:>10}  {:<10} {:<16} {:<7} endpoints",
        "tick", "elapsed", "instances", "avg_cpu", "avg_mem_mb", "decision", "reason", "label"
    );
    for r in &summary.records {
        let _ = writeln!(
            out,
            "{:>5} {:>8.1}s {:>9} {:>7.2}% {:>10.2}  {:<10} {:<16} {:<7} {}",
            r.tick,
            r.elapsed_secs,
            r.instance_count,
            r.avg_cpu_percent,
            r.avg_mem_bytes / 1_048_576.0,
            r.decision.to_string(),
            r.reason,
            r.label.to_string(),
            r.endpoints.join(","),
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Stopped ({:?}) after {} ticks, {:.1}s",
        summary.stop_reason, summary.ticks, summary.elapsed_secs
    );
    let _ = writeln!(
        out,
        "Instances: final {}, peak {}",
        summary.final_instance_count,
        summary.peak_instance_count()
    );
    let _ = writeln!(out, "Attack:   {}", format_load(&summary.attack));
    let _ = writeln!(out, "Baseline: {}", format_load(&summary.baseline));
    let _ = writeln!(
        out,
        "Cost:     {:.4} instance-hours, ${:.4}",
        summary.instance_hours, summary.total_cost
    );
    out
}

fn format_load(report: &LoadReport) -> String {
    if report.requests == 0 {
        return "no requests".to_string();
    }
    format!(
        "{} requests, {} errors ({:.1}%), RTT mean {:.1} ms, p50 {:.1} ms, p99 {:.1} ms",
        report.requests,
        report.errors,
        report.error_rate() * 100.0,
        report.mean_rtt_ms,
        report.p50_rtt_ms,
        report.p99_rtt_ms
    )
}
