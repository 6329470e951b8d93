use std::io::Write;

use super::SessionExport;
use crate::state::AggregateStats;

/// Generate a plain-text summary of a session
pub fn generate_report<W: Write>(export: &SessionExport, mut writer: W) -> std::io::Result<()> {
    writeln!(writer, "pingpoll report for {}", export.host)?;
    writeln!(writer, "Started: {}", export.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
    writeln!(
        writer,
        "Duration: {:.1}s  Interval: {:.3}s  Timeout: {:.1}s",
        export.duration_secs(),
        export.config.interval.as_secs_f64(),
        export.config.timeout.as_secs_f64()
    )?;
    writeln!(writer)?;

    writeln!(
        writer,
        "{:<8} {:>6} {:>6} {:>6} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        "Scope", "Sent", "Recv", "Loss%", "Avg", "Min", "Max", "StdDev", "Jitter", "Last"
    )?;
    writeln!(writer, "{}", "-".repeat(88))?;
    write_stats_row(&mut writer, "session", &export.stats)?;
    write_stats_row(&mut writer, "window", &export.window_stats)?;
    writeln!(writer)?;

    let stats = &export.stats;
    writeln!(
        writer,
        "Losses: {} timeout, {} unreachable, {} error",
        stats.timeout_count, stats.unreachable_count, stats.error_count
    )?;
    if export.skipped_ticks > 0 {
        writeln!(writer, "Skipped ticks (in-flight limit): {}", export.skipped_ticks)?;
    }
    writeln!(writer, "Quality: {}", stats.quality.label())?;

    Ok(())
}

fn write_stats_row<W: Write>(mut writer: W, scope: &str, stats: &AggregateStats) -> std::io::Result<()> {
    let ms = |v: Option<f64>| v.map(|v| format!("{:.1}ms", v)).unwrap_or_else(|| "-".into());
    writeln!(
        writer,
        "{:<8} {:>6} {:>6} {:>5.1}% {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}",
        scope,
        stats.count,
        stats.success_count,
        stats.loss_rate_percent,
        ms(stats.mean_rtt),
        ms(stats.min_rtt),
        ms(stats.max_rtt),
        ms(stats.stddev_rtt),
        ms(stats.jitter),
        ms(stats.last_rtt)
    )
}

/// Generate report to string
pub fn generate_report_string(export: &SessionExport) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail
    let _ = generate_report(export, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}
