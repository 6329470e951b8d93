use anyhow::Result;
use std::io::Write;

use super::SessionExport;
use crate::state::{AggregateStats, ProbeOutcome, SampleRecord};

/// Column header for sample rows
pub const CSV_HEADER: &str = "sequence,timestamp,elapsed_s,outcome,rtt_ms,target,detail";

/// Export a session as sample rows followed by a summary section
pub fn export_csv<W: Write>(export: &SessionExport, mut writer: W) -> Result<()> {
    write_csv_header(&mut writer)?;
    for record in &export.samples {
        write_csv_row(&mut writer, record, &export.host)?;
    }
    write_csv_summary(&mut writer, &export.stats, export.duration_secs(), export.config.interval.as_secs_f64())?;
    Ok(())
}

pub fn write_csv_header<W: Write>(mut writer: W) -> Result<()> {
    writeln!(writer, "{}", CSV_HEADER)?;
    Ok(())
}

/// Write one sample row; used directly when streaming a live session
pub fn write_csv_row<W: Write>(mut writer: W, record: &SampleRecord, target: &str) -> Result<()> {
    let rtt = record
        .outcome
        .rtt_ms()
        .map(|rtt| format!("{:.3}", rtt))
        .unwrap_or_default();
    let detail = match &record.outcome {
        ProbeOutcome::TransportError { reason } => escape_csv(reason),
        _ => String::new(),
    };

    writeln!(
        writer,
        "{},{},{:.3},{},{},{},{}",
        record.sequence,
        record.timestamp.to_rfc3339(),
        record.elapsed_secs,
        record.outcome.label(),
        rtt,
        escape_csv(target),
        detail
    )?;
    Ok(())
}

/// Write the blank separator row and the summary statistics section
pub fn write_csv_summary<W: Write>(
    mut writer: W,
    stats: &AggregateStats,
    duration_secs: f64,
    interval_secs: f64,
) -> Result<()> {
    let ms = |v: Option<f64>| v.map(|v| format!("{:.1}", v)).unwrap_or_default();

    writeln!(writer)?;
    writeln!(writer, "summary")?;
    writeln!(writer, "metric,value")?;
    writeln!(writer, "total,{}", stats.count)?;
    writeln!(writer, "successes,{}", stats.success_count)?;
    writeln!(writer, "losses,{}", stats.loss_count)?;
    writeln!(writer, "loss_pct,{:.1}", stats.loss_rate_percent)?;
    writeln!(writer, "avg_ms,{}", ms(stats.mean_rtt))?;
    writeln!(writer, "min_ms,{}", ms(stats.min_rtt))?;
    writeln!(writer, "max_ms,{}", ms(stats.max_rtt))?;
    writeln!(writer, "stddev_ms,{}", ms(stats.stddev_rtt))?;
    writeln!(writer, "jitter_ms,{}", ms(stats.jitter))?;
    writeln!(writer, "duration_s,{:.1}", duration_secs)?;
    writeln!(writer, "interval_s,{:.3}", interval_secs)?;
    Ok(())
}

/// Escape a string for CSV (quote if contains comma, quote, or newline)
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(sequence: u64, outcome: ProbeOutcome) -> SampleRecord {
        SampleRecord {
            sequence,
            timestamp: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            elapsed_secs: sequence as f64,
            outcome,
        }
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("simple"), "simple");
        assert_eq!(escape_csv("with,comma"), "\"with,comma\"");
        assert_eq!(escape_csv("with\"quote"), "\"with\"\"quote\"");
    }

    #[test]
    fn test_rows() {
        let mut buf = Vec::new();
        write_csv_row(&mut buf, &record(1, ProbeOutcome::success(12.25)), "example.com").unwrap();
        write_csv_row(&mut buf, &record(2, ProbeOutcome::Timeout), "example.com").unwrap();
        write_csv_row(
            &mut buf,
            &record(3, ProbeOutcome::transport_error("send failed, no route")),
            "example.com",
        )
        .unwrap();
        let out = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "1,2024-05-01T12:00:00+00:00,1.000,success,12.250,example.com,");
        assert_eq!(lines[1], "2,2024-05-01T12:00:00+00:00,2.000,timeout,,example.com,");
        assert_eq!(
            lines[2],
            "3,2024-05-01T12:00:00+00:00,3.000,error,,example.com,\"send failed, no route\""
        );
    }

    #[test]
    fn test_summary_section() {
        let stats = AggregateStats {
            count: 4,
            success_count: 3,
            loss_count: 1,
            mean_rtt: Some(15.0),
            loss_rate_percent: 25.0,
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_csv_summary(&mut buf, &stats, 4.0, 1.0).unwrap();
        let out = String::from_utf8(buf).unwrap();

        assert!(out.starts_with("\nsummary\nmetric,value\n"));
        assert!(out.contains("total,4\n"));
        assert!(out.contains("loss_pct,25.0\n"));
        assert!(out.contains("avg_ms,15.0\n"));
        // Absent figures stay empty rather than reading as zero
        assert!(out.contains("min_ms,\n"));
    }
}
