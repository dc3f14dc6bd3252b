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
//! Performance events and the note-on dispatcher that runs on the event thread.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use midly::live::LiveEvent;
use midly::MidiMessage;
use tracing::{debug, info, warn};

use super::{EngineError, EngineState, Shared, Voice, VoiceId};
use crate::controls::ControlId;
use crate::samples::{Pick, SampleStore};

/// Input from the performance transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceEvent {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    Controller { controller: u8, value: u8 },
    /// -8192..=8191
    PitchBend { value: i16 },
}

impl PerformanceEvent {
    /// Parses a raw MIDI message on any channel. Note on with velocity 0 is a note off.
    pub fn from_midi(bytes: &[u8]) -> Option<PerformanceEvent> {
        let LiveEvent::Midi { message, .. } = LiveEvent::parse(bytes).ok()? else {
            return None;
        };
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
                Some(PerformanceEvent::NoteOff { key: key.as_int() })
            }
            MidiMessage::NoteOn { key, vel } => Some(PerformanceEvent::NoteOn {
                key: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOff { key, .. } => Some(PerformanceEvent::NoteOff { key: key.as_int() }),
            MidiMessage::Controller { controller, value } => Some(PerformanceEvent::Controller {
                controller: controller.as_int(),
                value: value.as_int(),
            }),
            MidiMessage::PitchBend { bend } => Some(PerformanceEvent::PitchBend {
                value: bend.as_int(),
            }),
            _ => None,
        }
    }
}

/// Turns performance events into control updates and new voices.
///
/// There is exactly one handler per engine: it is the only producer of the "new" ring and the
/// only consumer of the recycle ring.
pub struct EventHandler {
    shared: Arc<Shared>,
}

impl EventHandler {
    pub(crate) fn new(shared: Arc<Shared>) -> EventHandler {
        EventHandler { shared }
    }

    /// Handles one event. Events are ignored unless the engine is running, and a note that
    /// can't get a voice is logged and dropped.
    pub fn handle(&self, event: PerformanceEvent) {
        if self.shared.state() != EngineState::Running {
            return;
        }
        let controls = &self.shared.controls;
        match event {
            PerformanceEvent::NoteOn { key, velocity } => {
                if let Err(e) = self.note(key, f64::from(velocity) / 127.0) {
                    warn!(key, velocity, error = %e, "Note dropped");
                }
            }
            PerformanceEvent::NoteOff { key } => {
                // A release never allocates, so it can't fail.
                let _ = self.note(key, 0.0);
            }
            PerformanceEvent::Controller { controller, value } => {
                controls.midi_dispatch(controller, f64::from(value) / 127.0);
            }
            PerformanceEvent::PitchBend { value } => {
                controls.update(ControlId::PitchBend, f64::from(value) / 8192.0);
            }
        }
    }

    /// Handles events until every sender is dropped.
    pub fn run(self, events: Receiver<PerformanceEvent>) {
        for event in events.iter() {
            self.handle(event);
        }
        info!("Performance event channel closed");
    }

    /// Starts or releases a note with velocity in 0..=1. Returns the number of voices started.
    pub fn note(&self, key: u8, velocity: f64) -> Result<usize, EngineError> {
        let controls = &self.shared.controls;

        let transposed = i32::from(key) + controls.value(ControlId::Transpose) as i32;
        let Some(key) = u8::try_from(transposed).ok().filter(|k| *k <= 127) else {
            debug!(key, transposed, "Transposed key out of range");
            return Ok(0);
        };

        controls.key_velocity_update(key, velocity);
        if velocity == 0.0 {
            return Ok(0);
        }

        let guard = self.shared.store.load();
        let Some(store) = guard.as_deref() else {
            return Ok(0);
        };
        let Some((first, second)) = store.get_samples(
            key,
            velocity,
            controls.value(ControlId::GammaLayer),
            controls.value(ControlId::MixLayers) > 0.5,
        ) else {
            return Ok(0);
        };

        let voices = &self.shared.voices;
        let id = voices
            .allocate()
            .ok_or(EngineError::PoolExhausted { key })?;
        voices.write(id, &self.init_voice(store, key, velocity, first));
        voices.submit(Some(id));

        let second_id: Option<VoiceId> = second.and_then(|pick| {
            let id = voices.allocate()?;
            voices.write(id, &self.init_voice(store, key, velocity, pick));
            Some(id)
        });
        // Keeps the new ring pair-aligned even when the second voice is missing.
        voices.submit(second_id);

        match (second, second_id) {
            (Some(_), None) => Err(EngineError::PoolExhausted { key }),
            (Some(_), Some(_)) => Ok(2),
            (None, _) => Ok(1),
        }
    }

    fn init_voice(&self, store: &SampleStore, key: u8, velocity: f64, pick: Pick) -> Voice {
        let controls = &self.shared.controls;
        let (start, rms) = store
            .sample(pick.sample)
            .map_or((0, 0.0), |sample| (sample.start(), sample.rms()));
        Voice {
            key,
            sample: pick.sample,
            position: start as f64,
            amp: controls.sample_amp(key, velocity, rms) * pick.mix,
            pan: controls.sample_pan(key),
            fade_in: if controls.value(ControlId::TauFadeIn) == 1.0 {
                0.0
            } else {
                1.0
            },
        }
    }
}
