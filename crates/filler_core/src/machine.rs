//! Machine state transitions and the per-item tick.
//!
//! Every operation returns the events it produced. Configuration errors are
//! clamped here so that any state can be rendered and scheduled.

use std::time::Duration;

use crate::{
    emit, Event, EventEnvelope, EventLevel, MachineDef, MachineState, MachineView, SessionSummary,
    SettingsUpdate,
};

/// Shortest interval a timer may be scheduled at.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);
/// Longest interval a timer may be scheduled at. Keeps deadline arithmetic
/// far away from `Instant` overflow for absurd cycle times.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const MS_PER_MINUTE: f64 = 60_000.0;
const FALLBACK_CYCLE_TIME_MINUTES: f64 = 1.0;

pub(crate) fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1000.0
}

fn usable_cycle_time(minutes: f64) -> Option<f64> {
    (minutes.is_finite() && minutes > 0.0).then_some(minutes)
}

impl MachineState {
    pub fn new(def: &MachineDef) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            running: false,
            progress: 0,
            current_box: 1,
            items_in_box: 0,
            items_produced: 0,
            limit: def.limit,
            cycle_time_minutes: def.cycle_time_minutes,
            nominal_items: 0.0,
            next_event_id: 0,
        }
    }

    /// Time between two ticks at the current settings:
    /// `cycle_time_minutes * 60000 / limit` milliseconds.
    ///
    /// `limit` is treated as at least 1 and an unusable cycle time as one
    /// minute, so the result is always finite and within
    /// [`MIN_TICK_INTERVAL`]..=[`MAX_TICK_INTERVAL`].
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn tick_interval(&self) -> Duration {
        let limit = f64::from(self.limit.max(1));
        let minutes =
            usable_cycle_time(self.cycle_time_minutes).unwrap_or(FALLBACK_CYCLE_TIME_MINUTES);
        let micros = (minutes * MS_PER_MINUTE / limit * 1000.0).round();
        // `as` saturates, so overflowing cycle times land on the upper bound.
        Duration::from_micros(micros as u64).clamp(MIN_TICK_INTERVAL, MAX_TICK_INTERVAL)
    }

    /// Starts the machine. No-op when already running; refuses (stays
    /// stopped) when the configuration cannot produce a valid interval.
    pub fn start(&mut self) -> Vec<EventEnvelope> {
        if self.running {
            return Vec::new();
        }
        let reason = if self.limit == 0 {
            Some(format!("box limit must be positive, got {}", self.limit))
        } else if usable_cycle_time(self.cycle_time_minutes).is_none() {
            Some(format!(
                "cycle time must be a positive number of minutes, got {}",
                self.cycle_time_minutes
            ))
        } else {
            None
        };
        if let Some(reason) = reason {
            return vec![emit(self, Event::StartRefused { reason })];
        }

        self.running = true;
        let interval_ms = as_millis_f64(self.tick_interval());
        vec![emit(self, Event::MachineStarted { interval_ms })]
    }

    /// Stops ticking. Counters keep their values. Idempotent.
    pub fn pause(&mut self) -> Vec<EventEnvelope> {
        if !self.running {
            return Vec::new();
        }
        self.running = false;
        vec![emit(self, Event::MachinePaused)]
    }

    /// Stops the machine and clears all production counters. Name and
    /// settings survive.
    pub fn reset(&mut self) -> Vec<EventEnvelope> {
        let mut events = self.pause();
        let summary = self.session_summary();

        self.progress = 0;
        self.items_produced = 0;
        self.items_in_box = 0;
        self.current_box = 1;
        self.nominal_items = 0.0;

        events.push(emit(self, Event::MachineReset { summary }));
        events
    }

    /// Replaces limit and cycle time (and the name, when given). Running
    /// state and counters are untouched; callers holding a timer must
    /// reschedule it at the new [`tick_interval`](Self::tick_interval).
    ///
    /// A non-positive limit becomes 1; a non-positive or non-finite cycle
    /// time becomes one minute.
    pub fn update_settings(&mut self, update: &SettingsUpdate) -> Vec<EventEnvelope> {
        self.limit = u32::try_from(update.limit.max(1)).unwrap_or(u32::MAX);
        self.cycle_time_minutes = usable_cycle_time(update.cycle_time_minutes)
            .unwrap_or(FALLBACK_CYCLE_TIME_MINUTES);
        if let Some(name) = &update.name {
            self.name.clone_from(name);
        }

        let event = Event::SettingsUpdated {
            limit: self.limit,
            cycle_time_minutes: self.cycle_time_minutes,
            name: self.name.clone(),
            interval_ms: as_millis_f64(self.tick_interval()),
        };
        vec![emit(self, event)]
    }

    /// Manual operator correction of the current box. Clamped to
    /// `[0, limit]`; `progress`, `current_box` and `items_produced` are left
    /// alone even when the new value crosses a box boundary.
    pub fn set_items_in_box(&mut self, value: i64) -> Vec<EventEnvelope> {
        let clamped = value.clamp(0, i64::from(self.limit));
        self.items_in_box = u32::try_from(clamped).unwrap_or(self.limit);
        let event = Event::ItemsOverridden {
            items_in_box: self.items_in_box,
        };
        vec![emit(self, event)]
    }

    /// Produces one item. Does nothing while the machine is stopped.
    ///
    /// The item that overflows a full box becomes item 1 of the next box.
    pub fn tick(&mut self, event_level: EventLevel) -> Vec<EventEnvelope> {
        if !self.running {
            return Vec::new();
        }
        let mut events = Vec::new();

        let candidate = self.items_in_box.saturating_add(1);
        if candidate > self.limit {
            let finished = Event::BoxCompleted {
                box_number: self.current_box,
                items: self.items_in_box,
            };
            self.current_box += 1;
            self.items_in_box = 1;
            events.push(emit(self, finished));
        } else {
            self.items_in_box = candidate;
        }

        self.progress += 1;
        self.items_produced += 1;

        if event_level == EventLevel::Debug {
            let event = Event::ItemProduced {
                items_in_box: self.items_in_box,
            };
            events.push(emit(self, event));
        }
        events
    }

    /// Adds `elapsed` running time to the nominal output at the current rate.
    /// Call at the end of every running segment, before settings change.
    pub fn record_running_time(&mut self, elapsed: Duration) {
        self.nominal_items += elapsed.as_secs_f64() / self.tick_interval().as_secs_f64();
    }

    /// `floor(min(100, items_in_box / limit * 100))`.
    pub fn fill_percentage(&self) -> u32 {
        let pct = u64::from(self.items_in_box) * 100 / u64::from(self.limit.max(1));
        u32::try_from(pct.min(100)).unwrap_or(100)
    }

    /// Boxes fully filled since the last reset. The box in progress does
    /// not count.
    pub fn total_boxes_completed(&self) -> u64 {
        self.current_box.saturating_sub(1)
    }

    /// Produced items as a percentage of nominal output, floored and capped
    /// at 100. Zero until any running time has been recorded.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn efficiency(&self) -> u32 {
        if self.nominal_items <= 0.0 {
            return 0;
        }
        let pct = (self.items_produced as f64 / self.nominal_items * 100.0).floor();
        pct.clamp(0.0, 100.0) as u32
    }

    pub fn session_summary(&self) -> SessionSummary {
        SessionSummary {
            total_boxes: self.total_boxes_completed(),
            total_items: self.items_produced,
            efficiency: self.efficiency(),
        }
    }

    pub fn view(&self) -> MachineView {
        MachineView {
            state: self.clone(),
            fill_percentage: self.fill_percentage(),
            total_boxes_completed: self.total_boxes_completed(),
            tick_interval_ms: as_millis_f64(self.tick_interval()),
            efficiency: self.efficiency(),
        }
    }
}
