// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! The instrument engine: one shared context, a management path serialised by a mutex, an event
//! handler feeding new voices and a block renderer running on the host's audio thread.

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use arc_swap::ArcSwapOption;
use atomic_float::AtomicF64;
use parking_lot::Mutex;
use tracing::{info, span, warn, Level};

use crate::audio::{Device, Stereo};
use crate::config::{load_settings, ControlsFile, Tuning};
use crate::controls::ControlBank;
use crate::samples::{load_directory, Pipeline, SampleStore};

mod dispatch;
mod error;
mod render;
mod voice;

pub use dispatch::{EventHandler, PerformanceEvent};
pub use error::EngineError;
pub use render::BlockRenderer;
pub use voice::{Voice, VoiceId, VoicePool};

const CONFIG_FILE: &str = "config.conf";
const TUNING_FILE: &str = "tuning.conf";
const CONTROLS_FILE: &str = "controls.conf";
const SAMPLES_DIR: &str = "samples";

/// Lifecycle of the engine. Only management operations move between states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped = 0,
    Loading = 1,
    Running = 2,
    Unloading = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> EngineState {
        match value {
            1 => EngineState::Loading,
            2 => EngineState::Running,
            3 => EngineState::Unloading,
            _ => EngineState::Stopped,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Stopped => "stopped",
            EngineState::Loading => "loading",
            EngineState::Running => "running",
            EngineState::Unloading => "unloading",
        };
        f.write_str(name)
    }
}

/// Construction parameters for an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Voice pool capacity. The "new" ring holds twice this.
    pub voices: usize,
    /// Largest block the renderer processes in one pass.
    pub max_block: usize,
    /// How long unload waits for in-flight callbacks after the host is deactivated.
    pub drain: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            voices: 2048,
            max_block: 16384,
            drain: Duration::from_millis(100),
        }
    }
}

/// Per-channel output peaks since the last read.
#[derive(Debug, Default)]
pub(crate) struct PeakMeter {
    left: AtomicF64,
    right: AtomicF64,
}

impl PeakMeter {
    pub(crate) fn record(&self, peak: Stereo) {
        let _ = self
            .left
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| Some(p.max(peak.left)));
        let _ = self
            .right
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| Some(p.max(peak.right)));
    }

    pub(crate) fn take(&self) -> (f64, f64) {
        (
            self.left.swap(0.0, Ordering::Relaxed),
            self.right.swap(0.0, Ordering::Relaxed),
        )
    }
}

/// State shared by the management path, the event handler and the renderer.
pub(crate) struct Shared {
    state: AtomicU8,
    pub(crate) controls: ControlBank,
    pub(crate) store: ArcSwapOption<SampleStore>,
    pub(crate) voices: VoicePool,
    pub(crate) peaks: PeakMeter,
}

impl Shared {
    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: EngineState) {
        self.state.store(state as u8, Ordering::Release);
        info!(state = %state, "Engine state changed");
    }

    /// Moves from `expected` to `next`, or reports the actual state.
    fn transition(&self, expected: EngineState, next: EngineState) -> Result<(), EngineError> {
        self.state
            .compare_exchange(
                expected as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|actual| EngineError::BadState {
                expected,
                actual: EngineState::from_u8(actual),
            })?;
        info!(state = %next, "Engine state changed");
        Ok(())
    }
}

/// The instrument engine.
pub struct Engine {
    shared: Arc<Shared>,
    config: EngineConfig,
    /// Serialises management operations.
    device: Mutex<Box<dyn Device>>,
    handler_taken: AtomicBool,
}

impl Engine {
    /// Creates a stopped engine that will stream through the given host.
    pub fn new(config: EngineConfig, device: Box<dyn Device>) -> Engine {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(EngineState::Stopped as u8),
            controls: ControlBank::new(),
            store: ArcSwapOption::empty(),
            voices: VoicePool::new(config.voices),
            peaks: PeakMeter::default(),
        });
        Engine {
            shared,
            config,
            device: Mutex::new(device),
            handler_taken: AtomicBool::new(false),
        }
    }

    /// Hands out the engine's single event handler. Later calls return None.
    pub fn take_event_handler(&self) -> Option<EventHandler> {
        if self.handler_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(EventHandler::new(self.shared.clone()))
    }

    pub fn controls(&self) -> &ControlBank {
        &self.shared.controls
    }

    /// The published sample store, present while running.
    pub fn store(&self) -> Option<Arc<SampleStore>> {
        self.shared.store.load_full()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Per-channel peak output magnitude since the previous call, in full-scale units.
    pub fn peak_levels(&self) -> (f64, f64) {
        self.shared.peaks.take()
    }

    pub fn playing_count(&self) -> usize {
        self.shared.voices.playing_count()
    }

    /// Loads the instrument in `dir`, runs the sample pipeline and starts the audio host.
    ///
    /// On failure the engine returns to Stopped with nothing published.
    pub fn load(&self, dir: &Path) -> Result<(), EngineError> {
        let mut device = self.device.lock();
        let span = span!(Level::INFO, "load", dir = ?dir);
        let _enter = span.enter();

        self.shared
            .transition(EngineState::Stopped, EngineState::Loading)?;
        match self.load_locked(dir, &mut **device) {
            Ok(()) => {
                self.shared.set_state(EngineState::Running);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Load failed");
                self.shared.store.store(None);
                self.shared.set_state(EngineState::Stopped);
                Err(e)
            }
        }
    }

    fn load_locked(&self, dir: &Path, device: &mut dyn Device) -> Result<(), EngineError> {
        check_dir(dir)?;
        let samples_dir = dir.join(SAMPLES_DIR);
        check_dir(&samples_dir)?;

        let controls = &self.shared.controls;
        controls.reset_defaults();

        let settings = load_settings(&dir.join(CONFIG_FILE));
        let tuning = Tuning::load(&dir.join(TUNING_FILE));

        let controls_path = dir.join(CONTROLS_FILE);
        if controls_path.exists() {
            if let Err(e) = self.apply_controls(&controls_path) {
                warn!(error = %e, "Ignoring saved controls");
            }
        }

        let pipeline = Pipeline::new()?;
        let (mut store, report) = pipeline
            .install(|| load_directory(&samples_dir, &tuning))
            .map_err(|source| EngineError::BadDirectory {
                path: samples_dir.clone(),
                source,
            })?;
        pipeline.run(&mut store, &settings);
        drop(pipeline);

        info!(
            loaded = report.loaded,
            skipped = report.skipped,
            samples = store.sample_count(),
            memory = store.memory_size(),
            "Instrument ready"
        );

        self.shared.store.store(Some(Arc::new(store)));
        self.shared.voices.reclaim();

        let renderer = BlockRenderer::new(self.shared.clone(), self.config.max_block);
        device.activate(renderer).map_err(EngineError::Host)?;
        info!(device = %device, "Audio host active");
        Ok(())
    }

    /// Stops the audio host, waits for in-flight blocks, recycles every voice and drops the
    /// sample store.
    pub fn unload(&self) -> Result<(), EngineError> {
        let mut device = self.device.lock();
        let span = span!(Level::INFO, "unload");
        let _enter = span.enter();

        self.shared
            .transition(EngineState::Running, EngineState::Unloading)?;
        device.deactivate();
        thread::sleep(self.config.drain);

        self.shared.voices.reclaim();
        self.shared.store.store(None);
        self.shared.set_state(EngineState::Stopped);
        Ok(())
    }

    /// Applies saved controls from `path`. Outside Running the bank is committed here, since no
    /// audio thread will do it.
    pub fn load_controls(&self, path: &Path) -> Result<(), EngineError> {
        let _device = self.device.lock();
        self.apply_controls(path)
    }

    fn apply_controls(&self, path: &Path) -> Result<(), EngineError> {
        let file = ControlsFile::read(path).map_err(|source| EngineError::ControlsLoad {
            path: path.to_path_buf(),
            source,
        })?;
        let controls = &self.shared.controls;
        file.apply(controls);
        if self.shared.state() != EngineState::Running {
            controls.commit();
        }
        info!(path = ?path, controls = file.controls.len(), "Controls loaded");
        Ok(())
    }

    /// Writes the committed control state to `path`.
    pub fn save_controls(&self, path: &Path) -> Result<(), EngineError> {
        let _device = self.device.lock();
        ControlsFile::from_bank(&self.shared.controls)
            .write(path)
            .map_err(|source| EngineError::SaveFailed {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = ?path, "Controls saved");
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

fn check_dir(path: &Path) -> Result<(), EngineError> {
    let bad = |source| EngineError::BadDirectory {
        path: PathBuf::from(path),
        source,
    };
    let meta = fs::metadata(path).map_err(bad)?;
    if !meta.is_dir() {
        return Err(bad(io::Error::other("not a directory")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::thread;

    use approx::assert_relative_eq;

    use super::*;
    use crate::audio::mock;
    use crate::controls::ControlId;
    use crate::testutil::{eventually, tone, InstrumentDir};

    fn engine(voices: usize) -> (Engine, mock::Device) {
        let host = mock::Device::get("test");
        let config = EngineConfig {
            voices,
            max_block: 64,
            drain: Duration::from_millis(1),
        };
        (Engine::new(config, Box::new(host.clone())), host)
    }

    fn single_sample() -> InstrumentDir {
        InstrumentDir::new().sample("on-60-1-1.wav", &tone(4800, 16384))
    }

    #[test]
    fn test_load_single_sample() {
        let dir = single_sample();
        let (engine, host) = engine(16);
        engine.load(dir.path()).unwrap();

        assert_eq!(engine.state(), EngineState::Running);
        assert!(host.is_active());

        let store = engine.store().unwrap();
        assert_eq!(store.layer_count(60), 1);
        assert_eq!(store.variation_count(60, 0), 1);
        // Only key 60 owns its buffer; fill shares it everywhere else.
        for key in 0..=127u8 {
            assert_eq!(store.layer_count(key), 1, "key {key}");
        }
        let owned = store.samples().filter(|s| s.is_owned()).count();
        assert_eq!(owned, 1);

        engine.unload().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!host.is_active());
        assert!(engine.store().is_none());
    }

    #[test]
    fn test_bad_state() {
        let dir = single_sample();
        let (engine, _host) = engine(16);

        assert!(matches!(
            engine.unload(),
            Err(EngineError::BadState {
                expected: EngineState::Running,
                actual: EngineState::Stopped
            })
        ));

        engine.load(dir.path()).unwrap();
        assert!(matches!(
            engine.load(dir.path()),
            Err(EngineError::BadState {
                expected: EngineState::Stopped,
                actual: EngineState::Running
            })
        ));
        engine.unload().unwrap();
    }

    #[test]
    fn test_bad_directory() {
        let (engine, host) = engine(16);
        let missing = tempfile::tempdir().unwrap();

        // No samples/ subdirectory.
        assert!(matches!(
            engine.load(missing.path()),
            Err(EngineError::BadDirectory { .. })
        ));
        assert!(matches!(
            engine.load(&missing.path().join("nope")),
            Err(EngineError::BadDirectory { .. })
        ));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!host.is_active());
    }

    #[test]
    fn test_events_ignored_when_stopped() {
        let (engine, _host) = engine(16);
        let handler = engine.take_event_handler().unwrap();
        assert!(engine.take_event_handler().is_none());

        handler.handle(PerformanceEvent::NoteOn {
            key: 60,
            velocity: 100,
        });
        engine.controls().commit();
        assert_eq!(engine.controls().key_velocity(60), 0.0);
    }

    #[test]
    fn test_note_plays_and_releases() {
        let dir = single_sample();
        let (engine, host) = engine(16);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();

        handler.handle(PerformanceEvent::NoteOn {
            key: 60,
            velocity: 127,
        });
        let (left, right) = host.render_block(32).unwrap();
        assert_eq!(engine.playing_count(), 1);
        assert!(left.iter().all(|s| *s > 0.0));
        assert_eq!(left, right);

        let (peak_left, peak_right) = engine.peak_levels();
        assert!(peak_left > 0.0);
        assert_relative_eq!(peak_left, peak_right);
        assert_eq!(engine.peak_levels(), (0.0, 0.0));

        // A 1 ms release falls below the amplitude floor long before the sample ends.
        engine.controls().update_direct(ControlId::TauKeyUp, 1.0);
        handler.handle(PerformanceEvent::NoteOff { key: 60 });
        for _ in 0..20 {
            host.render_block(64).unwrap();
        }
        assert_eq!(engine.playing_count(), 0);

        engine.unload().unwrap();
    }

    #[test]
    fn test_sustain_holds_voice() {
        let dir = single_sample();
        let (engine, host) = engine(16);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();
        let controls = engine.controls();
        controls.bind_midi(ControlId::Sustain, Some(64));
        controls.update_direct(ControlId::TauFadeIn, 0.0);
        controls.commit();

        handler.handle(PerformanceEvent::Controller {
            controller: 64,
            value: 127,
        });
        handler.handle(PerformanceEvent::NoteOn {
            key: 60,
            velocity: 100,
        });
        handler.handle(PerformanceEvent::NoteOff { key: 60 });
        let (first, _) = host.render_block(16).unwrap();
        let (second, _) = host.render_block(16).unwrap();
        assert_eq!(engine.playing_count(), 1);
        assert_relative_eq!(first[15], second[15]);

        engine.unload().unwrap();
    }

    #[test]
    fn test_transpose_shifts_note() {
        let dir = single_sample();
        let (engine, host) = engine(16);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();
        let controls = engine.controls();
        controls.update_direct(ControlId::Transpose, 2.0);
        controls.commit();

        assert_eq!(handler.note(58, 1.0).unwrap(), 1);
        host.render_block(16).unwrap();
        assert_eq!(controls.key_velocity(60), 1.0);
        assert_eq!(controls.key_velocity(58), 0.0);

        assert_eq!(engine.playing_count(), 1);
        let id = engine.shared.voices.take_playing().unwrap();
        assert_eq!(engine.shared.voices.read(id).key, 60);
        engine.shared.voices.requeue(id);

        // The release is transposed the same way.
        assert_eq!(handler.note(58, 0.0).unwrap(), 0);
        host.render_block(16).unwrap();
        assert_eq!(controls.key_velocity(60), 0.0);

        engine.unload().unwrap();
    }

    #[test]
    fn test_transposed_key_out_of_range() {
        let dir = single_sample();
        let (engine, host) = engine(16);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();
        let controls = engine.controls();
        controls.update_direct(ControlId::Transpose, 12.0);
        controls.commit();

        // 118 + 12 = 130.
        assert_eq!(handler.note(118, 1.0).unwrap(), 0);
        handler.handle(PerformanceEvent::NoteOn {
            key: 127,
            velocity: 127,
        });
        host.render_block(16).unwrap();
        assert_eq!(engine.playing_count(), 0);
        for key in 0..=127u8 {
            assert_eq!(controls.key_velocity(key), 0.0, "key {key}");
        }

        controls.update_direct(ControlId::Transpose, -12.0);
        controls.commit();
        assert_eq!(handler.note(11, 1.0).unwrap(), 0);
        assert_eq!(handler.note(12, 1.0).unwrap(), 1);
        host.render_block(16).unwrap();
        assert_eq!(controls.key_velocity(0), 1.0);
        assert_eq!(engine.playing_count(), 1);

        engine.unload().unwrap();
    }

    #[test]
    fn test_pitch_bend_normalization() {
        let dir = single_sample();
        let (engine, _host) = engine(16);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();
        let controls = engine.controls();
        assert_eq!(controls.max(ControlId::PitchBend), 1.0);

        handler.handle(PerformanceEvent::PitchBend { value: 8191 });
        controls.commit();
        assert_relative_eq!(
            controls.value(ControlId::PitchBend),
            2f64.powf(1.0 / 12.0),
            epsilon = 1e-4
        );
        assert_relative_eq!(
            controls.value(ControlId::PitchBend),
            (8191.0 / 8192.0 / 12.0f64).exp2(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            controls.value_gui(ControlId::PitchBend),
            8191.0 / 8192.0,
            epsilon = 1e-9
        );

        handler.handle(PerformanceEvent::PitchBend { value: -8192 });
        controls.commit();
        assert_relative_eq!(
            controls.value(ControlId::PitchBend),
            2f64.powf(-1.0 / 12.0),
            epsilon = 1e-12
        );

        // A wider range scales the same wheel position.
        controls.set_max(ControlId::PitchBend, 2.0);
        handler.handle(PerformanceEvent::PitchBend { value: 4096 });
        controls.commit();
        assert_relative_eq!(
            controls.value(ControlId::PitchBend),
            2f64.powf(1.0 / 12.0),
            epsilon = 1e-12
        );

        engine.unload().unwrap();
    }

    #[test]
    fn test_render_is_silent_when_stopped() {
        let dir = single_sample();
        let (engine, host) = engine(16);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();
        handler.handle(PerformanceEvent::NoteOn {
            key: 60,
            velocity: 127,
        });

        engine.shared.set_state(EngineState::Unloading);
        let (left, _) = host.render_block(16).unwrap();
        assert!(left.iter().all(|s| *s == 0.0));
        engine.shared.set_state(EngineState::Running);
        engine.unload().unwrap();
        assert_eq!(engine.shared.voices.free_count(), 16);
    }

    #[test]
    fn test_pool_overflow() {
        let dir = InstrumentDir::new()
            .sample("on-60-1-1.wav", &tone(4800, 8000))
            .sample("on-62-1-1.wav", &tone(4800, 8000));
        let (engine, host) = engine(4);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();

        let mut dropped = 0;
        for key in 40..60u8 {
            if handler.note(key, 1.0).is_err() {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 16);
        assert_eq!(engine.state(), EngineState::Running);

        host.render_block(16).unwrap();
        assert_eq!(engine.playing_count(), 4);

        assert!(handler.note(70, 1.0).is_err());
        host.render_block(16).unwrap();
        assert!(engine.playing_count() <= 4);
        assert_eq!(engine.state(), EngineState::Running);
        engine.unload().unwrap();
    }

    #[test]
    fn test_save_and_load_controls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controls.conf");
        let (engine, _host) = engine(4);
        let controls = engine.controls();

        controls.update_direct(ControlId::Amplify, 2.5);
        controls.update_direct(ControlId::TauKeyUp, 80.0);
        controls.update_direct(ControlId::PitchBend, 0.5);
        controls.set_max(ControlId::Transpose, 6.0);
        controls.bind_midi(ControlId::GammaAmp, Some(20));
        controls.commit();
        let expected: Vec<f64> = ControlId::ALL
            .into_iter()
            .map(|id| controls.value_gui(id))
            .collect();
        engine.save_controls(&path).unwrap();

        controls.reset_defaults();
        assert_relative_eq!(controls.value(ControlId::Amplify), 1.0);

        engine.load_controls(&path).unwrap();
        for (id, expected) in ControlId::ALL.into_iter().zip(expected) {
            assert_relative_eq!(controls.value_gui(id), expected, epsilon = 1e-9);
        }
        assert_relative_eq!(controls.min(ControlId::Transpose), -6.0);
        assert_eq!(controls.midi(ControlId::GammaAmp), Some(20));
    }

    #[test]
    fn test_save_controls_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _host) = engine(4);
        let path = dir.path().join("missing").join("controls.conf");
        assert!(matches!(
            engine.save_controls(&path),
            Err(EngineError::SaveFailed { .. })
        ));
    }

    #[test]
    fn test_saved_controls_applied_on_load() {
        let dir = single_sample().file("controls.conf", "[Amplify]\nValue = 3.0\n");
        let (engine, _host) = engine(4);
        engine.load(dir.path()).unwrap();
        assert_relative_eq!(engine.controls().value(ControlId::Amplify), 3.0);
        engine.unload().unwrap();
    }

    #[test]
    fn test_event_thread() {
        let dir = single_sample();
        let (engine, host) = engine(16);
        engine.load(dir.path()).unwrap();
        let handler = engine.take_event_handler().unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let join = thread::spawn(move || handler.run(rx));
        tx.send(PerformanceEvent::NoteOn {
            key: 60,
            velocity: 90,
        })
        .unwrap();
        eventually(
            || {
                host.render_block(8);
                engine.playing_count() == 1
            },
            "voice never started",
        );
        drop(tx);
        join.join().unwrap();

        let (left, _) = host.render_block(8).unwrap();
        assert!(left.iter().all(|s| *s > 0.0 && *s < 1.0));
        engine.unload().unwrap();
    }
}
