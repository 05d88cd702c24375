/// Core sequencer state - the step pattern and the handles shared with the UI
use std::sync::{Arc, RwLock};

use rand::Rng;

use crate::config::{DEFAULT_ROWS, DEFAULT_STEPS};

pub mod clock;
pub mod engine;
pub mod playback;
pub mod time;

use clock::TempoConfig;

/// Per-row chance of a cell being switched on by [`Pattern::randomize`].
pub const DEFAULT_ROW_PROBABILITIES: [f64; 4] = [0.35, 0.25, 0.45, 0.2];

pub type SharedPattern = Arc<RwLock<Pattern>>;
pub type SharedTempo = Arc<RwLock<TempoConfig>>;

/// A `rows × steps` on/off grid, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    cells: Vec<bool>,
    rows: usize,
    steps: usize,
}

impl Pattern {
    pub fn new(rows: usize, steps: usize) -> Self {
        Self {
            cells: vec![false; rows * steps],
            rows,
            steps,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.steps == 0
    }

    fn index(&self, row: usize, step: usize) -> Option<usize> {
        (row < self.rows && step < self.steps).then(|| row * self.steps + step)
    }

    pub fn get(&self, row: usize, step: usize) -> bool {
        self.index(row, step)
            .and_then(|i| self.cells.get(i))
            .copied()
            .unwrap_or(false)
    }

    pub fn set(&mut self, row: usize, step: usize, value: bool) {
        if let Some(i) = self.index(row, step) {
            self.cells[i] = value;
        }
    }

    pub fn toggle(&mut self, row: usize, step: usize) {
        let current = self.get(row, step);
        self.set(row, step, !current);
    }

    /// Rows switched on in one column, in row order.
    pub fn active_rows(&self, step: usize) -> Vec<usize> {
        (0..self.rows).filter(|&row| self.get(row, step)).collect()
    }

    pub fn clear(&mut self) {
        self.cells.fill(false);
    }

    /// Switch each cell on independently with its row's probability.
    /// Rows without an entry in `probabilities` end up empty.
    pub fn randomize<R: Rng + ?Sized>(&mut self, probabilities: &[f64], rng: &mut R) {
        for row in 0..self.rows {
            let p = probabilities
                .get(row)
                .copied()
                .filter(|p| p.is_finite())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0);
            for step in 0..self.steps {
                let on = rng.gen::<f64>() < p;
                self.set(row, step, on);
            }
        }
    }

    /// Four-on-the-floor kick, backbeat snare, sparse hats and a few lead
    /// hits. Assumes the kick/snare/hat/lead row order; cells that fall
    /// outside the grid are skipped.
    pub fn seed_default_groove<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        const KICK: usize = 0;
        const SNARE: usize = 1;
        const HAT: usize = 2;
        const LEAD: usize = 3;

        self.clear();
        for step in [0, 4, 8, 12] {
            self.set(KICK, step, true);
        }
        for step in [4, 12] {
            self.set(SNARE, step, true);
        }
        for step in (0..self.steps).step_by(2) {
            let on = rng.gen::<f64>() > 0.2;
            self.set(HAT, step, on);
        }
        for step in [2, 7, 10, 15] {
            let on = rng.gen::<f64>() > 0.4;
            self.set(LEAD, step, on);
        }
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_STEPS)
    }
}

pub fn shared_pattern(pattern: Pattern) -> SharedPattern {
    Arc::new(RwLock::new(pattern))
}

pub fn shared_tempo(tempo: TempoConfig) -> SharedTempo {
    Arc::new(RwLock::new(tempo))
}
