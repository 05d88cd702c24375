/// Audio output using cpal
///
/// Notes arrive from the scheduler thread stamped with an absolute time and
/// are started by the output callback on the matching frame. The frames the
/// callback has written double as the clock the scheduler runs on.
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info, trace};

use crate::error::{Result, SequencerError};
use crate::sequencer::playback::Renderer;
use crate::sequencer::time::TimeSource;

/// Kick-ish, snare-ish, hat-ish, lead-ish.
pub const ROW_NOTES: [&str; 4] = ["C3", "E3", "G3", "C4"];
pub const ROW_DURATIONS: [f32; 4] = [0.12, 0.1, 0.06, 0.18];

const A4_FREQUENCY: f32 = 440.0;
const MASTER_GAIN: f32 = 0.9;
const PEAK_GAIN: f32 = 0.8;
const FLOOR_GAIN: f32 = 0.0001;
const ATTACK_SECONDS: f32 = 0.006;
const PREVIEW_SECONDS: f32 = 0.06;
const RELEASE_TAIL_SECONDS: f32 = 0.02;
const MAX_ACTIVE_NOTES: usize = 64;
const FALLBACK_SAMPLE_RATE: f64 = 44_100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Square,
        Waveform::Sawtooth,
        Waveform::Triangle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "Sine",
            Waveform::Square => "Square",
            Waveform::Sawtooth => "Sawtooth",
            Waveform::Triangle => "Triangle",
        }
    }

    /// Sample at `phase` in `0.0..1.0`.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * std::f32::consts::TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }

    fn from_index(index: u8) -> Self {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .unwrap_or_default()
    }
}

/// How one pattern row sounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub frequency: f32,
    pub duration: f32,
}

impl Voice {
    pub fn from_note(note: &str, duration: f32) -> Self {
        Self {
            frequency: note_to_frequency(note),
            duration,
        }
    }
}

pub fn default_voices() -> Vec<Voice> {
    ROW_NOTES
        .iter()
        .zip(ROW_DURATIONS)
        .map(|(note, duration)| Voice::from_note(note, duration))
        .collect()
}

/// Gain at `t` seconds into a note: a fast exponential rise to the peak,
/// an exponential fall to the floor at `duration`, then a short silent tail.
pub fn envelope(t: f32, duration: f32) -> f32 {
    if t < 0.0 {
        0.0
    } else if t < ATTACK_SECONDS {
        FLOOR_GAIN * (PEAK_GAIN / FLOOR_GAIN).powf(t / ATTACK_SECONDS)
    } else if t < duration {
        let decay = (duration - ATTACK_SECONDS).max(f32::EPSILON);
        PEAK_GAIN * (FLOOR_GAIN / PEAK_GAIN).powf((t - ATTACK_SECONDS) / decay)
    } else if t < duration + RELEASE_TAIL_SECONDS {
        FLOOR_GAIN
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy)]
struct NoteRequest {
    start_frame: u64,
    voice: Voice,
    waveform: Waveform,
}

struct ActiveNote {
    start_frame: u64,
    end_frame: u64,
    voice: Voice,
    waveform: Waveform,
    phase: f32,
    phase_increment: f32,
    sample_rate: f32,
}

impl ActiveNote {
    fn new(request: NoteRequest, current_frame: u64, sample_rate: f32) -> Self {
        // late notes start right away
        let start_frame = request.start_frame.max(current_frame);
        let length = ((request.voice.duration + RELEASE_TAIL_SECONDS) * sample_rate) as u64;

        Self {
            start_frame,
            end_frame: start_frame + length,
            voice: request.voice,
            waveform: request.waveform,
            phase: 0.0,
            phase_increment: request.voice.frequency / sample_rate,
            sample_rate,
        }
    }

    fn next_sample(&mut self, frame: u64) -> f32 {
        if frame < self.start_frame || frame >= self.end_frame {
            return 0.0;
        }

        let t = (frame - self.start_frame) as f32 / self.sample_rate;
        let sample = self.waveform.sample(self.phase) * envelope(t, self.voice.duration);
        self.phase = (self.phase + self.phase_increment).fract();
        sample
    }

    fn is_finished(&self, frame: u64) -> bool {
        frame >= self.end_frame
    }
}

/// Seconds elapsed on the output stream.
#[derive(Debug, Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl AudioClock {
    fn new(frames: Arc<AtomicU64>, sample_rate: f64) -> Self {
        Self {
            frames,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn frame_at(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate).round() as u64
    }
}

impl TimeSource for AudioClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate
    }
}

/// Cheap handle the scheduler thread uses to queue notes.
#[derive(Clone)]
pub struct AudioRenderer {
    notes: Option<Sender<NoteRequest>>,
    unavailable_reason: Arc<str>,
    clock: AudioClock,
    voices: Arc<Vec<Voice>>,
    waveform: Arc<AtomicU8>,
}

impl AudioRenderer {
    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn waveform(&self) -> Waveform {
        Waveform::from_index(self.waveform.load(Ordering::Relaxed))
    }

    pub fn set_waveform(&self, waveform: Waveform) {
        self.waveform.store(waveform as u8, Ordering::Relaxed);
    }

    /// Sound a short blip of a row immediately, e.g. when a cell is
    /// switched on.
    pub fn preview(&self, row: usize) {
        self.queue(row, self.clock.now(), Some(PREVIEW_SECONDS));
    }

    fn queue(&self, row: usize, time: f64, duration: Option<f32>) {
        let (Some(notes), Some(voice)) = (&self.notes, self.voices.get(row)) else {
            trace!("Dropping trigger for row {row}");
            return;
        };

        let voice = Voice {
            duration: duration.unwrap_or(voice.duration),
            ..*voice
        };
        let _ = notes.send(NoteRequest {
            start_frame: self.clock.frame_at(time),
            voice,
            waveform: self.waveform(),
        });
    }
}

impl Renderer for AudioRenderer {
    fn ensure_ready(&self) -> Result<()> {
        match self.notes {
            Some(_) => Ok(()),
            None => Err(SequencerError::BackendUnavailable(
                self.unavailable_reason.to_string(),
            )),
        }
    }

    fn render(&self, row: usize, time: f64) {
        self.queue(row, time, None);
    }
}

pub struct AudioOutput {
    _stream: Option<cpal::Stream>,
    renderer: AudioRenderer,
}

impl AudioOutput {
    pub fn new() -> Result<Self> {
        let frames = Arc::new(AtomicU64::new(0));
        let (sender, receiver) = channel();

        let (stream, sample_rate) = Self::setup_audio_stream(Arc::clone(&frames), receiver)?;

        Ok(Self {
            _stream: Some(stream),
            renderer: AudioRenderer {
                notes: Some(sender),
                unavailable_reason: Arc::from(""),
                clock: AudioClock::new(frames, sample_rate),
                voices: Arc::new(default_voices()),
                waveform: Arc::new(AtomicU8::new(Waveform::default() as u8)),
            },
        })
    }

    /// An output with no device behind it. Its renderer refuses to start.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self {
            _stream: None,
            renderer: AudioRenderer {
                notes: None,
                unavailable_reason: Arc::from(reason),
                clock: AudioClock::new(Arc::new(AtomicU64::new(0)), FALLBACK_SAMPLE_RATE),
                voices: Arc::new(default_voices()),
                waveform: Arc::new(AtomicU8::new(Waveform::default() as u8)),
            },
        }
    }

    pub fn is_connected(&self) -> bool {
        self._stream.is_some()
    }

    pub fn renderer(&self) -> AudioRenderer {
        self.renderer.clone()
    }

    fn setup_audio_stream(
        frames: Arc<AtomicU64>,
        notes: Receiver<NoteRequest>,
    ) -> Result<(cpal::Stream, f64)> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            SequencerError::BackendUnavailable("no default output device".into())
        })?;
        let config = device
            .default_output_config()
            .map_err(|e| SequencerError::BackendUnavailable(e.to_string()))?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = usize::from(config.channels()).max(1);

        let sample_format = config.sample_format();
        if sample_format != cpal::SampleFormat::F32 {
            return Err(SequencerError::UnsupportedFormat(format!("{sample_format:?}")));
        }

        let mut active = Vec::with_capacity(MAX_ACTIVE_NOTES);
        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_block(&mut active, &notes, data, channels, &frames, sample_rate);
                },
                |err| error!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| SequencerError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SequencerError::Stream(e.to_string()))?;

        info!("Audio output running at {sample_rate} Hz, {channels} channel(s)");
        Ok((stream, f64::from(sample_rate)))
    }
}

/// Fill one interleaved output buffer and advance the frame counter.
fn render_block(
    active: &mut Vec<ActiveNote>,
    incoming: &Receiver<NoteRequest>,
    data: &mut [f32],
    channels: usize,
    frames: &AtomicU64,
    sample_rate: f32,
) {
    let mut frame = frames.load(Ordering::Acquire);

    while let Ok(request) = incoming.try_recv() {
        if active.len() < MAX_ACTIVE_NOTES {
            active.push(ActiveNote::new(request, frame, sample_rate));
        }
    }

    for out in data.chunks_mut(channels) {
        let mix: f32 = active.iter_mut().map(|note| note.next_sample(frame)).sum();
        out.fill(mix * MASTER_GAIN);
        frame += 1;
    }

    frames.store(frame, Ordering::Release);
    active.retain(|note| !note.is_finished(frame));
}

pub fn midi_note_to_frequency(note: u8) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// MIDI number of a note name such as `"C3"`, `"F#4"` or `"Bb2"`.
pub fn note_to_midi(name: &str) -> Option<u8> {
    let octave = name.chars().last()?.to_digit(10)?;
    let pitch = &name[..name.len() - 1];
    let pitch_class = match pitch {
        "C" => 0,
        "C#" | "Db" => 1,
        "D" => 2,
        "D#" | "Eb" => 3,
        "E" => 4,
        "F" => 5,
        "F#" | "Gb" => 6,
        "G" => 7,
        "G#" | "Ab" => 8,
        "A" => 9,
        "A#" | "Bb" => 10,
        "B" => 11,
        _ => return None,
    };
    u8::try_from(pitch_class + (octave + 1) * 12).ok()
}

/// Frequency of a note name; anything unparseable plays as A4.
pub fn note_to_frequency(name: &str) -> f32 {
    note_to_midi(name)
        .map(midi_note_to_frequency)
        .unwrap_or(A4_FREQUENCY)
}
