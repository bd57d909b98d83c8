//! Shared test fixtures for `filler_core` and downstream crates.

use crate::{MachineDef, MachineId, MachineState};

pub fn machine_def(limit: u32, cycle_time_minutes: f64) -> MachineDef {
    MachineDef {
        id: MachineId("machine_test".to_string()),
        name: "Test Filler".to_string(),
        limit,
        cycle_time_minutes,
    }
}

/// Stopped machine with fresh counters.
pub fn machine(limit: u32, cycle_time_minutes: f64) -> MachineState {
    MachineState::new(&machine_def(limit, cycle_time_minutes))
}

/// Cycle time (minutes) that yields `interval_ms` between ticks at `limit`.
pub fn cycle_time_for_interval(limit: u32, interval_ms: f64) -> f64 {
    interval_ms * f64::from(limit) / 60_000.0
}

/// Stopped machine whose tick interval is `interval_ms`.
pub fn machine_with_interval(limit: u32, interval_ms: f64) -> MachineState {
    machine(limit, cycle_time_for_interval(limit, interval_ms))
}
