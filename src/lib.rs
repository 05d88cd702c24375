/// SQNC transport - a lookahead step-sequencer clock
///
/// This library provides the timing core of a step sequencer:
/// - A pure transport clock for tempo, swing and step timing
/// - A lookahead scheduler that turns coarse wake-ups into exactly timed triggers
/// - A playback engine that drives the scheduler from its own thread
/// - Audio output for rendering the triggers

pub mod audio;
pub mod config;
pub mod error;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{AudioClock, AudioOutput, AudioRenderer, Waveform};
pub use config::SchedulerConfig;
pub use error::{Result, SequencerError};
pub use sequencer::clock::{TempoConfig, TransportClock};
pub use sequencer::engine::{PlayState, SequencerEngine, TransportState, TriggerEvent, TriggerSink};
pub use sequencer::playback::{PlaybackEngine, PlaybackEvent, Renderer};
pub use sequencer::time::{ManualClock, MonotonicClock, TimeSource};
pub use sequencer::{Pattern, SharedPattern, SharedTempo};
