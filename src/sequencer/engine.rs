/// Lookahead scheduler - turns wake-ups into precisely timed trigger events
///
/// The engine is woken up at a coarse, unreliable interval. On each wake-up it
/// hands out every step that falls due before `now + schedule_ahead`, each
/// stamped with its exact theoretical time. A late wake-up therefore catches
/// up several steps at once without shifting any of them.
use std::sync::PoisonError;

use log::{debug, trace};

use super::clock::{TempoConfig, TransportClock};
use super::{shared_pattern, shared_tempo, Pattern, SharedPattern, SharedTempo};
use crate::config::SchedulerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// One scheduled step, handed to the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    step_index: usize,
    scheduled_time: f64,
    active_rows: Vec<usize>,
}

impl TriggerEvent {
    pub fn new(step_index: usize, scheduled_time: f64, active_rows: Vec<usize>) -> Self {
        Self {
            step_index,
            scheduled_time,
            active_rows,
        }
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn scheduled_time(&self) -> f64 {
        self.scheduled_time
    }

    pub fn active_rows(&self) -> &[usize] {
        &self.active_rows
    }
}

/// Receiver of dispatched steps. Implementations must return quickly;
/// anything heavy belongs on a queue.
pub trait TriggerSink {
    /// A row should sound at `scheduled_time`.
    fn on_trigger(&mut self, row: usize, scheduled_time: f64);

    /// The playhead moved, or was cleared with `None`.
    fn on_step_advance(&mut self, step: Option<usize>);
}

/// Snapshot of the transport for callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportState {
    pub play_state: PlayState,
    pub current_step: usize,
    pub next_event_time: Option<f64>,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        self.play_state == PlayState::Playing
    }
}

pub struct SequencerEngine {
    pattern: SharedPattern,
    tempo: SharedTempo,
    config: SchedulerConfig,
    clock: TransportClock,
    play_state: PlayState,
}

impl SequencerEngine {
    pub fn new(pattern: SharedPattern, tempo: SharedTempo, config: SchedulerConfig) -> Self {
        let steps = pattern
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .steps();

        Self {
            pattern,
            tempo,
            clock: TransportClock::new(steps, config.beats_per_pattern),
            config,
            play_state: PlayState::Stopped,
        }
    }

    pub fn with_pattern(pattern: Pattern) -> Self {
        Self::new(
            shared_pattern(pattern),
            shared_tempo(TempoConfig::default()),
            SchedulerConfig::default(),
        )
    }

    pub fn pattern(&self) -> &SharedPattern {
        &self.pattern
    }

    pub fn tempo(&self) -> &SharedTempo {
        &self.tempo
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn is_playing(&self) -> bool {
        self.play_state == PlayState::Playing
    }

    pub fn current_step(&self) -> usize {
        self.clock.current_step()
    }

    pub fn transport_state(&self) -> TransportState {
        TransportState {
            play_state: self.play_state,
            current_step: self.clock.current_step(),
            next_event_time: self.is_playing().then(|| self.clock.next_event_time()),
        }
    }

    /// Begin or resume playback. The first step is due `start_latency`
    /// after `now`. Returns `false` if already playing.
    pub fn start(&mut self, now: f64) -> bool {
        if self.is_playing() {
            return false;
        }

        self.clock.seek(now + self.config.start_latency);
        debug!(
            "Transport {:?} -> Playing at step {} (first event at {:.3}s)",
            self.play_state,
            self.clock.current_step(),
            self.clock.next_event_time()
        );
        self.play_state = PlayState::Playing;
        true
    }

    /// Halt dispatch but keep the step position. Returns `false` unless
    /// playing.
    pub fn pause(&mut self) -> bool {
        if !self.is_playing() {
            return false;
        }

        debug!("Transport paused at step {}", self.clock.current_step());
        self.play_state = PlayState::Paused;
        true
    }

    /// Halt dispatch and rewind to step 0. Always rewinds; returns whether
    /// there was a session to end.
    pub fn stop(&mut self) -> bool {
        let was_active = self.play_state != PlayState::Stopped;
        self.play_state = PlayState::Stopped;
        self.clock.rewind();
        if was_active {
            debug!("Transport stopped");
        }
        was_active
    }

    /// Undo a `start` that could not be carried through, going back to the
    /// state it started from.
    pub fn abandon_start(&mut self, previous: PlayState) {
        match previous {
            PlayState::Stopped => {
                self.stop();
            }
            PlayState::Paused => {
                self.pause();
            }
            PlayState::Playing => {}
        }
    }

    /// Collect every step due before `now + schedule_ahead`.
    pub fn tick(&mut self, now: f64) -> Vec<TriggerEvent> {
        let mut events = Vec::new();
        if !self.is_playing() {
            return events;
        }

        let (steps, is_empty) = self.read_pattern_shape();
        if steps != self.clock.steps() {
            self.clock.set_steps(steps);
        }
        if is_empty {
            return events;
        }

        let horizon = now + self.config.schedule_ahead;
        while self.is_playing() && self.clock.next_event_time() <= horizon {
            let active_rows = self
                .pattern
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .active_rows(self.clock.current_step());
            let tempo = *self.tempo.read().unwrap_or_else(PoisonError::into_inner);

            let Some((step_index, scheduled_time)) = self.clock.advance(&tempo) else {
                break;
            };
            trace!("Scheduled step {step_index} at {scheduled_time:.4}s rows {active_rows:?}");
            events.push(TriggerEvent::new(step_index, scheduled_time, active_rows));
        }
        events
    }

    /// Tick and dispatch straight into `sink`. Returns the number of steps
    /// dispatched.
    pub fn tick_into<S: TriggerSink + ?Sized>(&mut self, now: f64, sink: &mut S) -> usize {
        let events = self.tick(now);
        for event in &events {
            dispatch(event, sink);
        }
        events.len()
    }

    fn read_pattern_shape(&self) -> (usize, bool) {
        let pattern = self.pattern.read().unwrap_or_else(PoisonError::into_inner);
        (pattern.steps(), pattern.is_empty())
    }
}

/// Fan one event out to a sink: a trigger per active row, then the playhead.
pub fn dispatch<S: TriggerSink + ?Sized>(event: &TriggerEvent, sink: &mut S) {
    for &row in event.active_rows() {
        sink.on_trigger(row, event.scheduled_time());
    }
    sink.on_step_advance(Some(event.step_index()));
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[derive(Default)]
    struct RecordingSink {
        triggers: Vec<(usize, f64)>,
        steps: Vec<Option<usize>>,
    }

    impl TriggerSink for RecordingSink {
        fn on_trigger(&mut self, row: usize, scheduled_time: f64) {
            self.triggers.push((row, scheduled_time));
        }

        fn on_step_advance(&mut self, step: Option<usize>) {
            self.steps.push(step);
        }
    }

    fn engine_with(bpm: f64, swing: f64) -> SequencerEngine {
        let engine = SequencerEngine::with_pattern(Pattern::default());
        *engine.tempo().write().unwrap() = TempoConfig::new(bpm, swing);
        engine
    }

    fn times(events: &[TriggerEvent]) -> Vec<f64> {
        events.iter().map(TriggerEvent::scheduled_time).collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < EPSILON,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_initial_state() {
        let mut engine = engine_with(120.0, 0.0);
        assert_eq!(engine.play_state(), PlayState::Stopped);
        assert_eq!(engine.current_step(), 0);
        assert_eq!(engine.transport_state().next_event_time, None);
        assert!(engine.tick(10.0).is_empty());
    }

    #[test]
    fn test_start_applies_latency() {
        let mut engine = engine_with(120.0, 0.0);
        assert!(engine.start(2.0));
        let state = engine.transport_state();
        assert!(state.is_playing());
        assert_close(state.next_event_time.unwrap(), 2.05);
    }

    #[test]
    fn test_start_while_playing_is_noop() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);
        engine.tick(0.0);
        let before = engine.transport_state();
        assert!(!engine.start(5.0));
        assert_eq!(engine.transport_state(), before);
    }

    #[test]
    fn test_full_loop_at_120_bpm() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);
        let events = engine.tick(2.0);

        assert_eq!(events.len(), 17);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.step_index(), i % 16);
            assert_close(event.scheduled_time(), 0.05 + 0.125 * i as f64);
        }
        // step 0 again exactly one loop later
        assert_close(events[16].scheduled_time() - events[0].scheduled_time(), 2.0);
    }

    #[test]
    fn test_lookahead_window() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);

        // 0.05 is inside the 100ms window, 0.175 is not
        assert_eq!(times(&engine.tick(0.0)).len(), 1);
        assert!(engine.tick(0.05).is_empty());
        let events = engine.tick(0.08);
        assert_eq!(events.len(), 1);
        assert_close(events[0].scheduled_time(), 0.175);
        assert_eq!(events[0].step_index(), 1);
    }

    #[test]
    fn test_late_tick_catches_up_with_swing() {
        let mut engine = engine_with(120.0, 0.5);
        engine.start(0.0);
        assert_eq!(engine.tick(0.0).len(), 1);

        let mut sink = RecordingSink::default();
        engine.pattern().write().unwrap().set(0, 1, true);
        engine.pattern().write().unwrap().set(0, 2, true);
        engine.pattern().write().unwrap().set(0, 3, true);

        let dispatched = engine.tick_into(0.35, &mut sink);
        assert_eq!(dispatched, 3);
        assert_eq!(sink.steps, vec![Some(1), Some(2), Some(3)]);

        let trigger_times: Vec<f64> = sink.triggers.iter().map(|&(_, t)| t).collect();
        assert_close(trigger_times[0], 0.05 + 0.09375);
        assert_close(trigger_times[1] - trigger_times[0], 0.15625);
        assert_close(trigger_times[2] - trigger_times[1], 0.09375);
    }

    #[test]
    fn test_step_sequence_never_skips_or_repeats() {
        let mut engine = engine_with(137.0, 0.3);
        engine.start(0.0);

        let mut now = 0.0;
        let mut all = Vec::new();
        // irregular wake-ups, including long stalls
        for delay in [0.025, 0.01, 0.4, 0.025, 0.0, 1.3, 0.02, 0.031, 2.7, 0.025] {
            now += delay;
            all.extend(engine.tick(now));
        }

        assert!(all.len() > 30);
        for (i, event) in all.iter().enumerate() {
            assert_eq!(event.step_index(), i % 16);
        }
        for pair in all.windows(2) {
            assert!(pair[1].scheduled_time() > pair[0].scheduled_time());
        }
        assert!(engine.transport_state().next_event_time.unwrap() > now + 0.1);
    }

    #[test]
    fn test_silent_pattern_still_advances() {
        let mut engine = engine_with(120.0, 0.0);
        let mut sink = RecordingSink::default();
        engine.start(0.0);

        for tick in 0..100 {
            engine.tick_into(tick as f64 * 0.025, &mut sink);
        }

        assert!(sink.triggers.is_empty());
        assert!(sink.steps.len() >= 19);
        for (i, step) in sink.steps.iter().enumerate() {
            assert_eq!(*step, Some(i % 16));
        }
    }

    #[test]
    fn test_dispatch_fans_out_rows() {
        let mut sink = RecordingSink::default();
        dispatch(&TriggerEvent::new(4, 1.5, vec![0, 2]), &mut sink);
        assert_eq!(sink.triggers, vec![(0, 1.5), (2, 1.5)]);
        assert_eq!(sink.steps, vec![Some(4)]);
    }

    #[test]
    fn test_pause_keeps_step_and_stop_rewinds() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);
        engine.tick(0.5);
        let step = engine.current_step();
        assert!(step > 0);

        assert!(engine.pause());
        assert_eq!(engine.play_state(), PlayState::Paused);
        assert_eq!(engine.current_step(), step);
        assert_eq!(engine.transport_state().next_event_time, None);
        assert!(engine.tick(10.0).is_empty());
        assert!(!engine.pause());

        assert!(engine.stop());
        assert_eq!(engine.play_state(), PlayState::Stopped);
        assert_eq!(engine.current_step(), 0);
        assert!(!engine.stop());
        assert_eq!(engine.current_step(), 0);
    }

    #[test]
    fn test_stop_from_playing_rewinds() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);
        engine.tick(1.0);
        assert!(engine.stop());
        assert_eq!(engine.current_step(), 0);
        engine.start(3.0);
        assert_eq!(engine.tick(3.0)[0].step_index(), 0);
    }

    #[test]
    fn test_abandoned_start_restores_previous_state() {
        let mut engine = engine_with(120.0, 0.0);
        let previous = engine.play_state();
        engine.start(0.0);
        engine.abandon_start(previous);
        assert_eq!(engine.play_state(), PlayState::Stopped);
        assert_eq!(engine.current_step(), 0);

        engine.start(0.0);
        engine.tick(0.5);
        engine.pause();
        let step = engine.current_step();

        let previous = engine.play_state();
        engine.start(1.0);
        engine.abandon_start(previous);
        assert_eq!(engine.play_state(), PlayState::Paused);
        assert_eq!(engine.current_step(), step);
        assert!(engine.tick(5.0).is_empty());
    }

    #[test]
    fn test_resume_reproduces_trajectory() {
        let mut reference = engine_with(120.0, 0.4);
        reference.start(0.0);
        let uninterrupted = reference.tick(3.0);

        let mut engine = engine_with(120.0, 0.4);
        engine.start(0.0);
        let before = engine.tick(0.7);
        let resume_step = engine.current_step();
        engine.pause();

        engine.start(10.0);
        let after = engine.tick(12.0);
        assert_eq!(after[0].step_index(), resume_step);
        assert_close(after[0].scheduled_time(), 10.05);

        let offset = uninterrupted[before.len()].scheduled_time() - after[0].scheduled_time();
        for (resumed, original) in after.iter().zip(&uninterrupted[before.len()..]) {
            assert_eq!(resumed.step_index(), original.step_index());
            assert_close(original.scheduled_time() - resumed.scheduled_time(), offset);
        }
    }

    #[test]
    fn test_empty_pattern_is_inert() {
        let mut engine = SequencerEngine::with_pattern(Pattern::new(4, 0));
        engine.start(0.0);
        assert!(engine.tick(100.0).is_empty());
        assert_eq!(engine.current_step(), 0);

        let mut engine = SequencerEngine::with_pattern(Pattern::new(0, 16));
        let mut sink = RecordingSink::default();
        engine.start(0.0);
        assert_eq!(engine.tick_into(1.0, &mut sink), 0);
        assert!(sink.triggers.is_empty());
        assert!(sink.steps.is_empty());
        assert_eq!(engine.current_step(), 0);
    }

    #[test]
    fn test_rows_added_to_empty_pattern_resume_dispatch() {
        let mut engine = SequencerEngine::with_pattern(Pattern::new(0, 16));
        engine.start(0.0);
        assert!(engine.tick(0.0).is_empty());

        *engine.pattern().write().unwrap() = Pattern::new(4, 16);
        let events = engine.tick(0.0);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_index(), 0);
    }

    #[test]
    fn test_pattern_edit_applies_to_next_dispatch_only() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);
        engine.pattern().write().unwrap().set(1, 0, true);

        let first = engine.tick(0.0);
        assert_eq!(first[0].active_rows(), &[1]);

        // editing a dispatched step does not re-dispatch it
        engine.pattern().write().unwrap().set(2, 0, true);
        engine.pattern().write().unwrap().set(2, 1, true);
        let next = engine.tick(0.1);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].step_index(), 1);
        assert_eq!(next[0].active_rows(), &[2]);
        assert_eq!(first[0].active_rows(), &[1]);
    }

    #[test]
    fn test_tempo_change_affects_unscheduled_steps_only() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);
        let first = engine.tick(0.0);
        assert_close(first[0].scheduled_time(), 0.05);

        // step 1 was already placed at 0.175 when step 0 went out
        engine.tempo().write().unwrap().set_bpm(60.0);
        let events = engine.tick(0.6);
        assert_close(events[0].scheduled_time(), 0.175);
        assert_close(events[1].scheduled_time(), 0.425);
    }

    #[test]
    fn test_shrinking_pattern_rewraps_step() {
        let mut engine = engine_with(120.0, 0.0);
        engine.start(0.0);
        engine.tick(1.0);
        assert_eq!(engine.current_step(), 9);

        *engine.pattern().write().unwrap() = Pattern::new(4, 8);
        let events = engine.tick(1.2);
        assert_eq!(events[0].step_index(), 1);
    }
}
