//! One running filling machine: its state plus the timer task driving it.
//!
//! Every path that stops the machine or changes its rate cancels the old
//! timer first. Timer tasks also carry a generation number and exit without
//! ticking once it no longer matches, so a task that was already woken when
//! it got cancelled cannot produce a stray item.

use crate::state::{EventTx, Published};
use chrono::{DateTime, Utc};
use filler_core::{
    EventEnvelope, EventLevel, MachineDef, MachineId, MachineState, MachineView, SessionSummary,
    SettingsUpdate,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub machine_id: MachineId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(flatten)]
    pub summary: SessionSummary,
}

struct MachineEngine {
    state: MachineState,
    timer: Option<AbortHandle>,
    generation: u64,
    /// Start of the current running segment.
    segment_started: Option<Instant>,
    /// Wall-clock start of the current production session.
    session_started_at: Option<DateTime<Utc>>,
}

impl MachineEngine {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
    }

    fn close_segment(&mut self) {
        if let Some(started) = self.segment_started.take() {
            self.state.record_running_time(started.elapsed());
        }
    }
}

#[derive(Clone)]
pub struct MachineHandle {
    id: MachineId,
    inner: Arc<Mutex<MachineEngine>>,
    event_tx: EventTx,
    event_level: EventLevel,
}

impl MachineHandle {
    pub fn new(def: &MachineDef, event_tx: EventTx, event_level: EventLevel) -> Self {
        Self {
            id: def.id.clone(),
            inner: Arc::new(Mutex::new(MachineEngine {
                state: MachineState::new(def),
                timer: None,
                generation: 0,
                segment_started: None,
                session_started_at: None,
            })),
            event_tx,
            event_level,
        }
    }

    pub fn id(&self) -> &MachineId {
        &self.id
    }

    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> MachineView {
        let mut engine = self.inner.lock();
        let events = engine.state.start();
        if engine.state.running && engine.timer.is_none() {
            engine.segment_started = Some(Instant::now());
            engine.session_started_at.get_or_insert_with(Utc::now);
            self.schedule(&mut engine);
            tracing::info!(
                machine = %self.id,
                interval = ?engine.state.tick_interval(),
                "machine started"
            );
        } else if !engine.state.running {
            tracing::warn!(machine = %self.id, "machine refused to start");
        }
        let view = live_view(&engine);
        drop(engine);
        self.publish_events(events);
        view
    }

    pub fn pause(&self) -> MachineView {
        let mut engine = self.inner.lock();
        engine.close_segment();
        engine.cancel_timer();
        let events = engine.state.pause();
        if !events.is_empty() {
            tracing::info!(
                machine = %self.id,
                progress = engine.state.progress,
                "machine paused"
            );
        }
        let view = live_view(&engine);
        drop(engine);
        self.publish_events(events);
        view
    }

    pub fn reset(&self) -> MachineView {
        let mut engine = self.inner.lock();
        engine.close_segment();
        engine.cancel_timer();
        let summary = engine.state.session_summary();
        let events = engine.state.reset();

        let mut published: Vec<Published> = events.into_iter().map(Published::Event).collect();
        if let Some(started_at) = engine.session_started_at.take() {
            let record = SessionRecord {
                session_id: Uuid::new_v4(),
                machine_id: self.id.clone(),
                started_at,
                ended_at: Utc::now(),
                summary,
            };
            tracing::info!(
                machine = %self.id,
                session = %record.session_id,
                boxes = record.summary.total_boxes,
                items = record.summary.total_items,
                efficiency = record.summary.efficiency,
                "production session closed"
            );
            published.push(Published::Session(record));
        } else {
            tracing::info!(machine = %self.id, "machine reset");
        }
        let view = live_view(&engine);
        drop(engine);
        self.publish(published);
        view
    }

    /// Applies new settings; a running machine continues at the new rate
    /// without a pause/start.
    pub fn update_settings(&self, update: &SettingsUpdate) -> MachineView {
        let mut engine = self.inner.lock();
        // Running time so far counts at the old rate.
        engine.close_segment();
        let events = engine.state.update_settings(update);
        if engine.state.running {
            engine.segment_started = Some(Instant::now());
            self.schedule(&mut engine);
        }
        tracing::info!(
            machine = %self.id,
            limit = engine.state.limit,
            cycle_time_minutes = engine.state.cycle_time_minutes,
            running = engine.state.running,
            "settings updated"
        );
        let view = live_view(&engine);
        drop(engine);
        self.publish_events(events);
        view
    }

    pub fn set_items_in_box(&self, value: i64) -> MachineView {
        let mut engine = self.inner.lock();
        let events = engine.state.set_items_in_box(value);
        tracing::info!(
            machine = %self.id,
            requested = value,
            items_in_box = engine.state.items_in_box,
            "items in box overridden"
        );
        let view = live_view(&engine);
        drop(engine);
        self.publish_events(events);
        view
    }

    pub fn view(&self) -> MachineView {
        live_view(&self.inner.lock())
    }

    pub fn snapshot(&self) -> MachineState {
        self.inner.lock().state.clone()
    }

    /// Replaces any live timer with one at the machine's current interval.
    fn schedule(&self, engine: &mut MachineEngine) {
        engine.cancel_timer();
        let period = engine.state.tick_interval();
        // Deadline fixed now, not at the task's first poll.
        let first_tick = Instant::now() + period;
        let task = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.event_tx.clone(),
            self.event_level,
            engine.generation,
            first_tick,
            period,
        ));
        engine.timer = Some(task.abort_handle());
        tracing::debug!(
            machine = %self.id,
            generation = engine.generation,
            period = ?period,
            "timer scheduled"
        );
    }

    fn publish_events(&self, events: Vec<EventEnvelope>) {
        self.publish(events.into_iter().map(Published::Event).collect());
    }

    fn publish(&self, items: Vec<Published>) {
        if !items.is_empty() {
            // No subscribers is fine.
            let _ = self.event_tx.send(items);
        }
    }
}

/// View including running time of the segment still in progress.
fn live_view(engine: &MachineEngine) -> MachineView {
    match engine.segment_started {
        Some(started) => {
            let mut state = engine.state.clone();
            state.record_running_time(started.elapsed());
            state.view()
        }
        None => engine.state.view(),
    }
}

async fn run_timer(
    engine: Weak<Mutex<MachineEngine>>,
    event_tx: EventTx,
    event_level: EventLevel,
    generation: u64,
    first_tick: Instant,
    period: Duration,
) {
    let mut interval = tokio::time::interval_at(first_tick, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    loop {
        interval.tick().await;
        let Some(shared) = engine.upgrade() else {
            break;
        };
        let events = {
            let mut guard = shared.lock();
            if guard.generation != generation || !guard.state.running {
                break;
            }
            guard.state.tick(event_level)
        };
        if !events.is_empty() {
            let _ = event_tx.send(events.into_iter().map(Published::Event).collect());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filler_core::test_fixtures::{machine_def, machine_with_interval};
    use filler_core::Event;
    use tokio::sync::broadcast;

    fn handle(
        limit: u32,
        cycle_time_minutes: f64,
    ) -> (MachineHandle, broadcast::Receiver<Vec<Published>>) {
        let (event_tx, rx) = broadcast::channel(1024);
        let def = machine_def(limit, cycle_time_minutes);
        (MachineHandle::new(&def, event_tx, EventLevel::Normal), rx)
    }

    fn handle_with_interval(limit: u32, interval_ms: f64) -> MachineHandle {
        let state = machine_with_interval(limit, interval_ms);
        let def = MachineDef {
            id: state.id,
            name: state.name,
            limit: state.limit,
            cycle_time_minutes: state.cycle_time_minutes,
        };
        let (event_tx, _) = broadcast::channel(1024);
        MachineHandle::new(&def, event_tx, EventLevel::Normal)
    }

    /// Lets woken timer tasks run on the paused test runtime.
    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_ms(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn drain(rx: &mut broadcast::Receiver<Vec<Published>>) -> Vec<Published> {
        let mut items = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            items.extend(batch);
        }
        items
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_at_configured_interval() {
        let (machine, _rx) = handle(100, 1.0);
        machine.start();

        advance_ms(599).await;
        assert_eq!(machine.snapshot().progress, 0);
        advance_ms(1).await;
        assert_eq!(machine.snapshot().progress, 1);
        advance_ms(600).await;
        assert_eq!(machine.snapshot().progress, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn seven_ticks_at_limit_three() {
        let machine = handle_with_interval(3, 100.0);
        machine.start();
        for _ in 0..7 {
            advance_ms(100).await;
        }
        let state = machine.snapshot();
        assert_eq!(state.items_in_box, 1);
        assert_eq!(state.current_box, 3);
        assert_eq!(state.items_produced, 7);
        assert_eq!(state.progress, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_reschedules_at_new_interval() {
        let (machine, _rx) = handle(100, 1.0);
        machine.start();
        advance_ms(600).await;
        assert_eq!(machine.snapshot().progress, 1);

        machine.update_settings(&SettingsUpdate {
            limit: 50,
            cycle_time_minutes: 1.0,
            name: None,
        });

        // The old 600 ms cadence must not fire again.
        advance_ms(600).await;
        assert_eq!(machine.snapshot().progress, 1);
        advance_ms(600).await;
        assert_eq!(machine.snapshot().progress, 2);
        advance_ms(1200).await;
        assert_eq!(machine.snapshot().progress, 3);
        assert!(machine.snapshot().running);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_settings_changes_never_stack_timers() {
        let (machine, _rx) = handle(100, 1.0);
        machine.start();
        for _ in 0..5 {
            machine.update_settings(&SettingsUpdate {
                limit: 100,
                cycle_time_minutes: 1.0,
                name: None,
            });
        }
        advance_ms(600).await;
        assert_eq!(machine.snapshot().progress, 1);
        advance_ms(600).await;
        assert_eq!(machine.snapshot().progress, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_keeps_single_timer() {
        let (machine, _rx) = handle(100, 1.0);
        machine.start();
        advance_ms(300).await;
        machine.start();
        advance_ms(300).await;
        assert_eq!(machine.snapshot().progress, 1);
        advance_ms(600).await;
        assert_eq!(machine.snapshot().progress, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_stops_ticks_and_keeps_counters() {
        let (machine, _rx) = handle(100, 1.0);
        machine.start();
        advance_ms(1800).await;
        let view = machine.pause();
        assert!(!view.state.running);
        assert_eq!(view.state.progress, 3);

        advance_ms(6000).await;
        assert_eq!(machine.snapshot().progress, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_change_while_paused_does_not_start() {
        let (machine, _rx) = handle(100, 1.0);
        machine.update_settings(&SettingsUpdate {
            limit: 10,
            cycle_time_minutes: 0.1,
            name: Some("Renamed".to_string()),
        });
        advance_ms(5000).await;
        let state = machine.snapshot();
        assert!(!state.running);
        assert_eq!(state.progress, 0);
        assert_eq!(state.name, "Renamed");
    }

    #[tokio::test(start_paused = true)]
    async fn pause_before_start_is_harmless() {
        let (machine, mut rx) = handle(100, 1.0);
        let view = machine.pause();
        assert!(!view.state.running);
        assert_eq!(view.state.progress, 0);
        assert_eq!(view.state.current_box, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_timer_and_closes_session() {
        let (machine, mut rx) = handle(3, 0.005); // 100 ms per item
        machine.start();
        for _ in 0..7 {
            advance_ms(100).await;
        }
        let view = machine.reset();
        assert!(!view.state.running);
        assert_eq!(view.state.progress, 0);
        assert_eq!(view.state.current_box, 1);

        advance_ms(1000).await;
        assert_eq!(machine.snapshot().progress, 0);

        let items = drain(&mut rx);
        let record = items
            .iter()
            .find_map(|item| match item {
                Published::Session(record) => Some(record.clone()),
                Published::Event(_) => None,
            })
            .expect("reset after running should close a session");
        assert_eq!(record.summary.total_items, 7);
        assert_eq!(record.summary.total_boxes, 2);
        assert_eq!(record.summary.efficiency, 100);
        assert!(record.ended_at >= record.started_at);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_without_session_publishes_no_record() {
        let (machine, mut rx) = handle(3, 1.0);
        machine.reset();
        let items = drain(&mut rx);
        assert!(items
            .iter()
            .all(|item| matches!(item, Published::Event(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_start_schedules_nothing() {
        let (machine, mut rx) = handle(0, 1.0);
        let view = machine.start();
        assert!(!view.state.running);
        advance_ms(120_000).await;
        assert_eq!(machine.snapshot().progress, 0);

        let items = drain(&mut rx);
        assert!(items.iter().any(|item| matches!(
            item,
            Published::Event(EventEnvelope {
                event: Event::StartRefused { .. },
                ..
            })
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn box_completions_reach_the_stream() {
        let (machine, mut rx) = handle(2, 0.002); // 60 ms per item
        machine.start();
        for _ in 0..5 {
            advance_ms(60).await;
        }
        let completed: Vec<u64> = drain(&mut rx)
            .into_iter()
            .filter_map(|item| match item {
                Published::Event(EventEnvelope {
                    event: Event::BoxCompleted { box_number, .. },
                    ..
                }) => Some(box_number),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn live_view_reports_efficiency_mid_run() {
        let (machine, _rx) = handle(100, 1.0);
        machine.start();
        advance_ms(1200).await;
        assert_eq!(machine.view().efficiency, 100);
        advance_ms(600).await;
        advance_ms(300).await;
        // 3 items over 3.5 nominal intervals.
        assert_eq!(machine.view().efficiency, 85);
    }
}
