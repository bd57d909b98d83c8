//! Type definitions for `filler_core`.
//!
//! Machine state, operator inputs, read models and the events emitted by
//! state transitions.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(MachineId);
string_id!(EventId);

// ---------------------------------------------------------------------------
// Core enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Normal,
    /// Also emits one `ItemProduced` per tick.
    Debug,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Machine defaults as loaded at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineDef {
    pub id: MachineId,
    pub name: String,
    /// Box capacity.
    pub limit: u32,
    /// Minutes to fill `limit` items at nominal rate.
    pub cycle_time_minutes: f64,
}

/// Operator settings change. `limit` is signed so that out-of-range input
/// from the UI can be clamped rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub limit: i64,
    pub cycle_time_minutes: f64,
    #[serde(default)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineState {
    pub id: MachineId,
    pub name: String,
    pub running: bool,
    /// Ticks advanced since the last reset.
    pub progress: u64,
    /// 1-based index of the box being filled.
    pub current_box: u64,
    /// Always within `[0, limit]`.
    pub items_in_box: u32,
    pub items_produced: u64,
    pub limit: u32,
    pub cycle_time_minutes: f64,
    /// Items the machine should have produced over its accumulated running
    /// time at the nominal rate. Basis for `efficiency`.
    pub nominal_items: f64,
    pub next_event_id: u64,
}

/// Counters discarded by a reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub total_boxes: u64,
    pub total_items: u64,
    /// Percent of nominal output, floored, `0..=100`.
    pub efficiency: u32,
}

/// Read model for the presentation layer: raw state plus derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineView {
    #[serde(flatten)]
    pub state: MachineState,
    pub fill_percentage: u32,
    pub total_boxes_completed: u64,
    pub tick_interval_ms: f64,
    pub efficiency: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub active_machines: usize,
    pub total_boxes: u64,
    pub total_items: u64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub machine_id: MachineId,
    /// Machine progress at the time of emission.
    pub progress: u64,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    MachineStarted {
        interval_ms: f64,
    },
    StartRefused {
        reason: String,
    },
    MachinePaused,
    MachineReset {
        summary: SessionSummary,
    },
    SettingsUpdated {
        limit: u32,
        cycle_time_minutes: f64,
        name: String,
        interval_ms: f64,
    },
    ItemsOverridden {
        items_in_box: u32,
    },
    ItemProduced {
        items_in_box: u32,
    },
    BoxCompleted {
        box_number: u64,
        items: u32,
    },
}
