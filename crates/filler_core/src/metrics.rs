//! Snapshot metrics computed from `MachineState`.
//!
//! `compute_snapshot` samples one machine for time-series output. No state
//! mutation; the CSV helpers write to whatever the caller hands in.

use crate::machine::as_millis_f64;
use crate::MachineState;
use serde::Serialize;

/// Current schema version. Bump when fields are added/removed/reordered.
const METRICS_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct ProductionSnapshot {
    /// Sample index supplied by the caller (CLI step, elapsed ticks, ...).
    pub step: u64,
    pub metrics_version: u32,
    pub machine_id: String,
    pub running: bool,

    // Counters
    pub progress: u64,
    pub items_produced: u64,
    pub current_box: u64,
    pub items_in_box: u32,

    // Derived
    pub boxes_completed: u64,
    pub fill_percentage: u32,
    pub efficiency: u32,
    pub tick_interval_ms: f64,
}

pub fn compute_snapshot(step: u64, machine: &MachineState) -> ProductionSnapshot {
    ProductionSnapshot {
        step,
        metrics_version: METRICS_VERSION,
        machine_id: machine.id.0.clone(),
        running: machine.running,
        progress: machine.progress,
        items_produced: machine.items_produced,
        current_box: machine.current_box,
        items_in_box: machine.items_in_box,
        boxes_completed: machine.total_boxes_completed(),
        fill_percentage: machine.fill_percentage(),
        efficiency: machine.efficiency(),
        tick_interval_ms: as_millis_f64(machine.tick_interval()),
    }
}

/// Write the CSV header row for metrics.
pub fn write_metrics_header(writer: &mut impl std::io::Write) -> std::io::Result<()> {
    writeln!(
        writer,
        "step,metrics_version,machine_id,running,progress,items_produced,current_box,\
         items_in_box,boxes_completed,fill_percentage,efficiency,tick_interval_ms"
    )
}

/// Append one snapshot as a CSV row.
pub fn append_metrics_row(
    writer: &mut impl std::io::Write,
    snapshot: &ProductionSnapshot,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{},{},{},{},{},{},{},{},{},{},{},{:.3}",
        snapshot.step,
        snapshot.metrics_version,
        snapshot.machine_id,
        snapshot.running,
        snapshot.progress,
        snapshot.items_produced,
        snapshot.current_box,
        snapshot.items_in_box,
        snapshot.boxes_completed,
        snapshot.fill_percentage,
        snapshot.efficiency,
        snapshot.tick_interval_ms,
    )
}

pub fn write_metrics_csv(path: &str, snapshots: &[ProductionSnapshot]) -> std::io::Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_metrics_header(&mut file)?;
    for snapshot in snapshots {
        append_metrics_row(&mut file, snapshot)?;
    }
    std::io::Write::flush(&mut file)
}
