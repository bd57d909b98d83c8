use super::*;
use crate::test_fixtures::{machine, machine_with_interval};


// --- Shared test helpers ------------------------------------------------

fn running(limit: u32, cycle_time_minutes: f64) -> MachineState {
    let mut state = machine(limit, cycle_time_minutes);
    state.start();
    assert!(state.running, "fixture machine failed to start");
    state
}

fn tick_n(state: &mut MachineState, n: u64) -> Vec<EventEnvelope> {
    (0..n).flat_map(|_| state.tick(EventLevel::Normal)).collect()
}

fn counters(state: &MachineState) -> (u64, u64, u32, u64) {
    (
        state.progress,
        state.current_box,
        state.items_in_box,
        state.items_produced,
    )
}
