//! End-of-run summary export.
//!
//! Writes `metric,value,description` rows: tick counts, cadence
//! (period/jitter/work stats), pitch and drive ranges, telemetry counters.

use std::{fs::create_dir_all, io, path::Path};

use csv::Writer;
use log::{error, info};
use serde::Serialize;

use crate::utils::metrics::{LoopMetrics, SharedMetrics, calculate_stats, calculate_stats_u64, lock_metrics};

#[derive(Debug, Serialize, PartialEq)]
pub struct SummaryRow {
    pub metric: String,
    pub value: String,
    pub description: &'static str,
}

fn row(metric: impl Into<String>, value: impl ToString, description: &'static str) -> SummaryRow {
    SummaryRow {
        metric: metric.into(),
        value: value.to_string(),
        description,
    }
}

/// Builds the summary rows from a metrics snapshot.
pub fn summary_rows(m: &LoopMetrics) -> Vec<SummaryRow> {
    let mut rows = vec![
        row("total_ticks", m.total_ticks, "Completed RUNNING iterations"),
        row("overruns", m.overruns, "Ticks whose work exceeded the period"),
        row("timing_anomalies", m.timing_anomalies, "Ticks with non-positive elapsed time"),
        row("gripper_changes", m.gripper_changes, "Gripper open/close transitions"),
        row("frames_shown", m.frames_shown, "Annotated frames handed to the display"),
        row("frames_skipped", m.frames_skipped, "Ticks without a frame"),
    ];

    let timing = [
        ("period_us", calculate_stats_u64(&m.period_us)),
        ("jitter_us", calculate_stats_u64(&m.jitter_us)),
        ("work_us", calculate_stats_u64(&m.work_us)),
    ];
    for (name, stats) in timing {
        if let Some(s) = stats {
            rows.push(row(format!("{name}_min"), format!("{:.2}", s.min), "Minimum"));
            rows.push(row(format!("{name}_max"), format!("{:.2}", s.max), "Maximum"));
            rows.push(row(format!("{name}_avg"), format!("{:.2}", s.mean), "Mean"));
            rows.push(row(format!("{name}_std"), format!("{:.2}", s.std_dev), "Sample standard deviation"));
        }
    }

    if let Some(s) = calculate_stats(m.pitch.iter().copied()) {
        rows.push(row("pitch_min_deg", format!("{:.3}", s.min), "Most negative pitch estimate"));
        rows.push(row("pitch_max_deg", format!("{:.3}", s.max), "Most positive pitch estimate"));
        rows.push(row("pitch_avg_deg", format!("{:.3}", s.mean), "Mean pitch estimate"));
    }
    if let Some(s) = calculate_stats(m.drive.iter().copied()) {
        rows.push(row("drive_min", format!("{:.3}", s.min), "Most negative drive command"));
        rows.push(row("drive_max", format!("{:.3}", s.max), "Most positive drive command"));
    }
    rows
}

/// Writes the summary CSV to `path`, creating parent directories.
pub fn export_summary(metrics: &SharedMetrics, path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let rows = {
        let m = lock_metrics(metrics);
        summary_rows(&m)
    };

    let mut writer = Writer::from_path(path)?;
    for r in &rows {
        writer.serialize(r)?;
    }
    writer.flush()?;
    info!("Summary metrics exported to: {:?}", path);
    Ok(())
}

/// Logs instead of failing; the run is over either way.
pub fn run_exports(metrics: &SharedMetrics, path: &Path) {
    if let Err(e) = export_summary(metrics, path) {
        error!("Failed to export summary metrics: {}", e);
    }
}
