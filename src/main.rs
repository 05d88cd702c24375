#[cfg(feature = "gui")]
use eframe::egui;

#[cfg(feature = "gui")]
use std::sync::{Arc, PoisonError};

#[cfg(feature = "gui")]
use sqnc_transport::{
    audio::ROW_NOTES,
    sequencer::{shared_pattern, shared_tempo, DEFAULT_ROW_PROBABILITIES},
    AudioOutput, AudioRenderer, Pattern, PlaybackEngine, PlaybackEvent, Renderer,
    SchedulerConfig, SequencerEngine, SharedPattern, SharedTempo, TempoConfig, Waveform,
};

#[cfg(feature = "gui")]
fn main() -> Result<(), eframe::Error> {
    env_logger::init(); // Log to stderr (if you run with `RUST_LOG=debug`).

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([900.0, 420.0])
            .with_title("SQNC - Step Sequencer"),
        ..Default::default()
    };

    eframe::run_native(
        "SQNC",
        options,
        Box::new(|_cc| Ok(Box::new(SequencerApp::new()))),
    )
}

#[cfg(not(feature = "gui"))]
fn main() {
    env_logger::init();
    log::error!("This binary requires the 'gui' feature to be enabled");
    std::process::exit(1);
}

#[cfg(feature = "gui")]
struct SequencerApp {
    audio_output: AudioOutput,
    renderer: AudioRenderer,
    playback_engine: PlaybackEngine,
    pattern: SharedPattern,
    tempo: SharedTempo,

    // UI state
    current_visual_step: Option<usize>,
    last_error: Option<String>,
}

#[cfg(feature = "gui")]
impl SequencerApp {
    fn new() -> Self {
        let audio_output = AudioOutput::new().unwrap_or_else(|err| {
            log::warn!("Audio output unavailable: {err}");
            AudioOutput::disconnected(err.to_string())
        });
        let renderer = audio_output.renderer();

        let mut pattern = Pattern::default();
        pattern.seed_default_groove(&mut rand::thread_rng());
        let pattern = shared_pattern(pattern);
        let tempo = shared_tempo(TempoConfig::default());

        let engine = SequencerEngine::new(
            Arc::clone(&pattern),
            Arc::clone(&tempo),
            SchedulerConfig::default(),
        );
        let playback_engine = PlaybackEngine::new(
            engine,
            Arc::new(renderer.clone()),
            Arc::new(renderer.clock()),
        );

        Self {
            audio_output,
            renderer,
            playback_engine,
            pattern,
            tempo,
            current_visual_step: None,
            last_error: None,
        }
    }

    fn handle_playback_events(&mut self) {
        for event in self.playback_engine.poll_events() {
            if let PlaybackEvent::StepAdvanced(step) = event {
                self.current_visual_step = step;
            }
        }
    }

    fn toggle_playback(&mut self) {
        match self.playback_engine.toggle_play() {
            Ok(()) => self.last_error = None,
            Err(err) => self.last_error = Some(err.to_string()),
        }
    }

    fn stop_playback(&mut self) {
        self.playback_engine.stop();
        self.current_visual_step = None;
    }

    fn clear_pattern(&mut self) {
        self.pattern
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn randomize_pattern(&mut self) {
        self.pattern
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .randomize(&DEFAULT_ROW_PROBABILITIES, &mut rand::thread_rng());
    }

    fn toggle_cell(&mut self, row: usize, step: usize) {
        let now_on = {
            let mut pattern = self.pattern.write().unwrap_or_else(PoisonError::into_inner);
            pattern.toggle(row, step);
            pattern.get(row, step)
        };
        if now_on && self.renderer.ensure_ready().is_ok() {
            self.renderer.preview(row);
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        if ctx.wants_keyboard_input() {
            return;
        }

        let (space, clear, random) = ctx.input(|i| {
            (
                i.key_pressed(egui::Key::Space),
                i.key_pressed(egui::Key::C),
                i.key_pressed(egui::Key::R),
            )
        });

        if space {
            self.toggle_playback();
        }
        if clear {
            self.clear_pattern();
        }
        if random {
            self.randomize_pattern();
        }
    }
}

#[cfg(feature = "gui")]
impl eframe::App for SequencerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        self.handle_playback_events();
        self.handle_shortcuts(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("SQNC - Step Sequencer");
            ui.add_space(10.0);

            // Transport controls
            ui.horizontal(|ui| {
                let play_label = if self.playback_engine.is_playing() {
                    "⏸ Pause"
                } else {
                    "▶ Play"
                };
                if ui.button(play_label).clicked() {
                    self.toggle_playback();
                }
                if ui.button("⏹ Stop").clicked() {
                    self.stop_playback();
                }

                ui.add_space(20.0);

                let mut tempo = *self.tempo.read().unwrap_or_else(PoisonError::into_inner);

                ui.label("BPM:");
                let mut bpm = tempo.bpm();
                let bpm_changed = ui
                    .add(egui::Slider::new(&mut bpm, 40.0..=240.0).step_by(1.0))
                    .changed();

                ui.add_space(20.0);

                ui.label("Swing:");
                let mut swing = tempo.swing_percent();
                let swing_changed = ui
                    .add(
                        egui::Slider::new(&mut swing, 0.0..=100.0)
                            .step_by(1.0)
                            .suffix("%"),
                    )
                    .changed();

                if bpm_changed || swing_changed {
                    tempo.set_bpm(bpm);
                    tempo.set_swing_percent(swing);
                    *self.tempo.write().unwrap_or_else(PoisonError::into_inner) = tempo;
                }

                ui.add_space(20.0);

                let mut waveform = self.renderer.waveform();
                egui::ComboBox::from_label("Wave")
                    .selected_text(waveform.name())
                    .show_ui(ui, |ui| {
                        for candidate in Waveform::ALL {
                            ui.selectable_value(&mut waveform, candidate, candidate.name());
                        }
                    });
                if waveform != self.renderer.waveform() {
                    self.renderer.set_waveform(waveform);
                }
            });

            ui.add_space(10.0);

            ui.horizontal(|ui| {
                if ui.button("Clear").clicked() {
                    self.clear_pattern();
                }
                if ui.button("Randomize").clicked() {
                    self.randomize_pattern();
                }
            });

            ui.add_space(20.0);

            let grid = self
                .pattern
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            let mut clicked = None;

            for row in 0..grid.rows() {
                ui.horizontal(|ui| {
                    let note = ROW_NOTES.get(row).copied().unwrap_or("?");
                    ui.add_sized([40.0, 30.0], egui::Label::new(note));
                    for step in 0..grid.steps() {
                        let is_current = self.current_visual_step == Some(step);
                        let step_enabled = grid.get(row, step);

                        let button = egui::Button::new("")
                            .min_size(egui::vec2(40.0, 30.0))
                            .fill(if step_enabled {
                                egui::Color32::from_rgb(60, 60, 200)
                            } else if is_current {
                                egui::Color32::from_rgb(100, 200, 100)
                            } else if step % 4 == 0 {
                                egui::Color32::from_rgb(55, 55, 55)
                            } else {
                                egui::Color32::from_rgb(40, 40, 40)
                            })
                            .stroke(if is_current {
                                egui::Stroke::new(2.0, egui::Color32::from_rgb(100, 200, 100))
                            } else {
                                egui::Stroke::NONE
                            });

                        if ui.add(button).clicked() {
                            clicked = Some((row, step));
                        }
                    }
                });
            }

            if let Some((row, step)) = clicked {
                self.toggle_cell(row, step);
            }

            // Info
            ui.separator();
            ui.label("Click cells to toggle them. Space: play/pause, C: clear, R: randomize");
            if !self.audio_output.is_connected() {
                ui.colored_label(egui::Color32::YELLOW, "⚠ No audio output device");
            }
            if let Some(err) = &self.last_error {
                ui.colored_label(egui::Color32::RED, err);
            }
        });
    }
}
