//! Dashboard-level aggregation across machines.

use crate::{DashboardStats, MachineState};

/// Counts running machines and sums completed boxes and produced items.
pub fn dashboard_stats<'a>(machines: impl IntoIterator<Item = &'a MachineState>) -> DashboardStats {
    machines
        .into_iter()
        .fold(DashboardStats::default(), |mut stats, machine| {
            if machine.running {
                stats.active_machines += 1;
            }
            stats.total_boxes += machine.total_boxes_completed();
            stats.total_items += machine.items_produced;
            stats
        })
}
