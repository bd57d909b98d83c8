//! `filler_core`: filling-machine state and tick algorithm.
//!
//! No IO, no timers. Callers own scheduling and feed `tick` at the
//! interval reported by [`MachineState::tick_interval`].

mod dashboard;
mod machine;
pub mod metrics;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

pub use dashboard::dashboard_stats;
pub use machine::{MAX_TICK_INTERVAL, MIN_TICK_INTERVAL};
pub use metrics::{compute_snapshot, write_metrics_csv, ProductionSnapshot};
pub use types::*;

pub(crate) fn emit(state: &mut MachineState, event: Event) -> EventEnvelope {
    let id = EventId(format!("evt_{}_{:06}", state.id, state.next_event_id));
    state.next_event_id += 1;
    EventEnvelope {
        id,
        machine_id: state.id.clone(),
        progress: state.progress,
        event,
    }
}

#[cfg(test)]
mod tests;
