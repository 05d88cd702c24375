/// Playback engine - owns the repeating timer that drives the scheduler
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{info, warn};

use super::engine::{dispatch, PlayState, SequencerEngine, TransportState, TriggerSink};
use super::time::TimeSource;
use super::{SharedPattern, SharedTempo};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Playhead position; `None` once stopped.
    StepAdvanced(Option<usize>),
    Triggered { row: usize, time: f64 },
}

/// The sound-producing side. `render` is called from the scheduler thread
/// ahead of `time` and must only queue work.
pub trait Renderer: Send + Sync {
    fn ensure_ready(&self) -> Result<()>;
    fn render(&self, row: usize, time: f64);
}

struct DispatchSink<'a> {
    renderer: &'a dyn Renderer,
    events: &'a Sender<PlaybackEvent>,
}

impl TriggerSink for DispatchSink<'_> {
    fn on_trigger(&mut self, row: usize, scheduled_time: f64) {
        self.renderer.render(row, scheduled_time);
        let _ = self.events.send(PlaybackEvent::Triggered {
            row,
            time: scheduled_time,
        });
    }

    fn on_step_advance(&mut self, step: Option<usize>) {
        let _ = self.events.send(PlaybackEvent::StepAdvanced(step));
    }
}

pub struct PlaybackEngine {
    engine: Arc<Mutex<SequencerEngine>>,
    renderer: Arc<dyn Renderer>,
    time: Arc<dyn TimeSource>,
    sender: Sender<PlaybackEvent>,
    receiver: Receiver<PlaybackEvent>,
    is_running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    pub fn new(
        engine: SequencerEngine,
        renderer: Arc<dyn Renderer>,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let (sender, receiver) = channel();

        Self {
            engine: Arc::new(Mutex::new(engine)),
            renderer,
            time,
            sender,
            receiver,
            is_running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn lock_engine(&self) -> MutexGuard<'_, SequencerEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start or resume playback.
    ///
    /// Fails without touching the transport if the renderer is not ready.
    pub fn start(&mut self) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }

        if let Err(err) = self.renderer.ensure_ready() {
            warn!("Not starting playback: {err}");
            return Err(err);
        }

        // a paused worker may still be winding down
        self.halt_worker();

        let now = self.time.now();
        let previous = {
            let mut engine = self.lock_engine();
            let previous = engine.play_state();
            engine.start(now);
            previous
        };

        if let Err(err) = self.spawn_worker() {
            warn!("Scheduler thread failed to start: {err}");
            self.lock_engine().abandon_start(previous);
            return Err(err);
        }
        Ok(())
    }

    pub fn pause(&mut self) {
        self.lock_engine().pause();
        self.halt_worker();
    }

    pub fn stop(&mut self) {
        self.lock_engine().stop();
        self.halt_worker();
        let _ = self.sender.send(PlaybackEvent::StepAdvanced(None));
    }

    /// Play/pause button semantics: pause when playing, start otherwise.
    pub fn toggle_play(&mut self) -> Result<()> {
        if self.is_playing() {
            self.pause();
            Ok(())
        } else {
            self.start()
        }
    }

    pub fn is_playing(&self) -> bool {
        self.lock_engine().is_playing()
    }

    pub fn play_state(&self) -> PlayState {
        self.lock_engine().play_state()
    }

    pub fn current_step(&self) -> usize {
        self.lock_engine().current_step()
    }

    pub fn transport_state(&self) -> TransportState {
        self.lock_engine().transport_state()
    }

    pub fn pattern(&self) -> SharedPattern {
        self.lock_engine().pattern().clone()
    }

    pub fn tempo(&self) -> SharedTempo {
        self.lock_engine().tempo().clone()
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        self.receiver.try_iter().collect()
    }

    fn spawn_worker(&mut self) -> Result<()> {
        self.is_running.store(true, Ordering::Release);

        let is_running = Arc::clone(&self.is_running);
        let engine = Arc::clone(&self.engine);
        let renderer = Arc::clone(&self.renderer);
        let time = Arc::clone(&self.time);
        let sender = self.sender.clone();
        let interval = self.lock_engine().config().lookahead_interval;

        let spawned = thread::Builder::new()
            .name("sqnc-scheduler".into())
            .spawn(move || {
                info!("Scheduler thread running every {interval:?}");
                while is_running.load(Ordering::Acquire) {
                    {
                        let mut engine = engine.lock().unwrap_or_else(PoisonError::into_inner);
                        if !engine.is_playing() {
                            break;
                        }
                        let mut sink = DispatchSink {
                            renderer: renderer.as_ref(),
                            events: &sender,
                        };
                        let now = time.now();
                        for event in engine.tick(now) {
                            dispatch(&event, &mut sink);
                        }
                    }
                    thread::sleep(interval);
                }
                info!("Scheduler thread exiting");
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.is_running.store(false, Ordering::Release);
                Err(err.into())
            }
        }
    }

    fn halt_worker(&mut self) {
        self.is_running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.halt_worker();
    }
}
