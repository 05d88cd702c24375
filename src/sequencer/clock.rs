/// Transport clock - tempo, swing and step timing
///
/// Everything here is pure: no threads, no I/O, no notion of "now".
/// Times are seconds on whatever timeline the caller's time source uses.

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;
pub const DEFAULT_BPM: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoConfig {
    bpm: f64,
    swing: f64,
}

impl TempoConfig {
    pub fn new(bpm: f64, swing: f64) -> Self {
        let mut tempo = Self::default();
        tempo.set_bpm(bpm);
        tempo.set_swing(swing);
        tempo
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = if bpm.is_finite() {
            bpm.clamp(MIN_BPM, MAX_BPM)
        } else {
            MIN_BPM
        };
    }

    /// Swing as a fraction in `0.0..=1.0`.
    pub fn swing(&self) -> f64 {
        self.swing
    }

    pub fn set_swing(&mut self, swing: f64) {
        self.swing = if swing.is_finite() {
            swing.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn swing_percent(&self) -> f64 {
        self.swing * 100.0
    }

    pub fn set_swing_percent(&mut self, percent: f64) {
        self.set_swing(percent / 100.0);
    }
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            swing: 0.0,
        }
    }
}

/// Unswung duration of one step, in seconds.
///
/// `beats_per_pattern` beats are spread over `steps` columns, so 4 beats on
/// 16 steps gives sixteenth notes. Returns 0 for an empty grid.
pub fn base_step_duration(tempo: &TempoConfig, steps: usize, beats_per_pattern: u32) -> f64 {
    if steps == 0 {
        return 0.0;
    }
    let seconds_per_beat = 60.0 / tempo.bpm();
    seconds_per_beat * f64::from(beats_per_pattern.max(1)) / steps as f64
}

/// Duration of `step_index` with swing applied.
///
/// Odd steps are stretched and even steps squeezed by the same amount, so
/// each even/odd pair still lasts two base steps.
pub fn step_duration(
    step_index: usize,
    tempo: &TempoConfig,
    steps: usize,
    beats_per_pattern: u32,
) -> f64 {
    let base = base_step_duration(tempo, steps, beats_per_pattern);
    let shift = 0.5 * tempo.swing();
    if step_index % 2 == 1 {
        base * (1.0 + shift)
    } else {
        base * (1.0 - shift)
    }
}

/// Position of the transport: which step comes next and when it is due.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportClock {
    steps: usize,
    beats_per_pattern: u32,
    current_step: usize,
    next_event_time: f64,
}

impl TransportClock {
    pub fn new(steps: usize, beats_per_pattern: u32) -> Self {
        Self {
            steps,
            beats_per_pattern: beats_per_pattern.max(1),
            current_step: 0,
            next_event_time: 0.0,
        }
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn set_steps(&mut self, steps: usize) {
        self.steps = steps;
        self.current_step = if steps == 0 {
            0
        } else {
            self.current_step % steps
        };
    }

    pub fn beats_per_pattern(&self) -> u32 {
        self.beats_per_pattern
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn next_event_time(&self) -> f64 {
        self.next_event_time
    }

    /// Place the pending step at an absolute time.
    pub fn seek(&mut self, time: f64) {
        self.next_event_time = time;
    }

    pub fn rewind(&mut self) {
        self.current_step = 0;
    }

    pub fn step_duration(&self, step_index: usize, tempo: &TempoConfig) -> f64 {
        step_duration(step_index, tempo, self.steps, self.beats_per_pattern)
    }

    /// Consume the pending step and move to the following one.
    ///
    /// Returns the step index and time of the consumed step. The duration is
    /// computed from `tempo` now, so tempo edits only ever move steps that
    /// have not been handed out yet.
    pub fn advance(&mut self, tempo: &TempoConfig) -> Option<(usize, f64)> {
        if self.steps == 0 {
            return None;
        }

        let step = self.current_step;
        let time = self.next_event_time;
        self.next_event_time += self.step_duration(step, tempo);
        self.current_step = (step + 1) % self.steps;
        Some((step, time))
    }
}
