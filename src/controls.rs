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
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

use atomic_float::AtomicF64;

use crate::audio::SAMPLE_RATE;

/// Number of MIDI keys tracked by the velocity table.
pub const KEY_COUNT: usize = 128;

/// The fixed set of performance parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ControlId {
    Sustain,
    Amplify,
    GammaAmp,
    GammaLayer,
    MixLayers,
    RmsLow,
    RmsHigh,
    PanLow,
    PanHigh,
    TauKeyUp,
    TauFadeIn,
    Transpose,
    PitchBend,
}

impl ControlId {
    pub const COUNT: usize = 13;

    pub const ALL: [ControlId; ControlId::COUNT] = [
        ControlId::Sustain,
        ControlId::Amplify,
        ControlId::GammaAmp,
        ControlId::GammaLayer,
        ControlId::MixLayers,
        ControlId::RmsLow,
        ControlId::RmsHigh,
        ControlId::PanLow,
        ControlId::PanHigh,
        ControlId::TauKeyUp,
        ControlId::TauFadeIn,
        ControlId::Transpose,
        ControlId::PitchBend,
    ];

    /// The name used for this control in controls.conf.
    pub fn name(self) -> &'static str {
        match self {
            ControlId::Sustain => "Sustain",
            ControlId::Amplify => "Amplify",
            ControlId::GammaAmp => "GammaAmp",
            ControlId::GammaLayer => "GammaLayer",
            ControlId::MixLayers => "MixLayers",
            ControlId::RmsLow => "RMSLow",
            ControlId::RmsHigh => "RMSHigh",
            ControlId::PanLow => "PanLow",
            ControlId::PanHigh => "PanHigh",
            ControlId::TauKeyUp => "TauKeyUp",
            ControlId::TauFadeIn => "TauFadeIn",
            ControlId::Transpose => "Transpose",
            ControlId::PitchBend => "PitchBend",
        }
    }

    /// Looks a control up by its persistence name, ignoring case.
    pub fn from_name(name: &str) -> Option<ControlId> {
        ControlId::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name))
    }

    fn index(self) -> usize {
        self as usize
    }

    /// (min, max, default) in natural units.
    fn defaults(self) -> (f64, f64, f64) {
        match self {
            ControlId::Sustain => (0.0, 1.0, 0.0),
            ControlId::Amplify => (0.0, 4.0, 1.0),
            ControlId::GammaAmp => (0.01, 3.0, 2.2),
            ControlId::GammaLayer => (0.01, 3.0, 1.0),
            ControlId::MixLayers => (0.0, 1.0, 0.0),
            ControlId::RmsLow => (0.0, 0.5, 0.25),
            ControlId::RmsHigh => (0.0, 0.1, 0.04),
            ControlId::PanLow => (-1.0, 1.0, 0.0),
            ControlId::PanHigh => (-1.0, 1.0, 0.0),
            ControlId::TauKeyUp => (0.0, 250.0, 150.0),
            ControlId::TauFadeIn => (0.0, 10.0, 0.15),
            ControlId::Transpose => (-12.0, 12.0, 0.0),
            ControlId::PitchBend => (0.0, 1.0, 0.0),
        }
    }

    fn is_time_constant(self) -> bool {
        matches!(self, ControlId::TauKeyUp | ControlId::TauFadeIn)
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts a natural-unit value into the form the renderer consumes.
fn to_storage(id: ControlId, value: f64) -> f64 {
    if id.is_time_constant() {
        // Milliseconds become a per-frame decay multiplier.
        if value <= 0.0 {
            1.0
        } else {
            (-1000.0 / (f64::from(SAMPLE_RATE) * value)).exp()
        }
    } else if id == ControlId::PitchBend {
        // Semitones become a playback rate multiplier.
        (value / 12.0).exp2()
    } else {
        value
    }
}

fn from_storage(id: ControlId, stored: f64) -> f64 {
    if id.is_time_constant() {
        if stored <= 0.0 || stored >= 1.0 {
            0.0
        } else {
            -1000.0 / (f64::from(SAMPLE_RATE) * stored.ln())
        }
    } else if id == ControlId::PitchBend {
        if stored <= 0.0 {
            0.0
        } else {
            12.0 * stored.log2()
        }
    } else {
        stored
    }
}

struct Param {
    min: AtomicF64,
    max: AtomicF64,
    /// Committed value, only written by commit.
    value: AtomicF64,
    pending: AtomicF64,
    /// Bound MIDI controller number, -1 when unbound.
    midi: AtomicI32,
}

impl Param {
    fn new() -> Param {
        Param {
            min: AtomicF64::new(0.0),
            max: AtomicF64::new(0.0),
            value: AtomicF64::new(0.0),
            pending: AtomicF64::new(0.0),
            midi: AtomicI32::new(-1),
        }
    }
}

/// Double-buffered performance parameters.
///
/// Writers (the event thread, management) only touch the pending side. The renderer calls
/// [`ControlBank::commit`] once per block, which publishes the pending values and the pending
/// key velocity table. Every operation is a handful of atomic loads and stores, so none of them
/// block.
pub struct ControlBank {
    params: [Param; ControlId::COUNT],
    velocity: [AtomicF64; KEY_COUNT],
    pending_velocity: [AtomicF64; KEY_COUNT],
    pitch_bend_prev: AtomicF64,
}

impl ControlBank {
    /// Creates a bank holding the default ranges and values, already committed.
    pub fn new() -> ControlBank {
        let bank = ControlBank {
            params: std::array::from_fn(|_| Param::new()),
            velocity: std::array::from_fn(|_| AtomicF64::new(0.0)),
            pending_velocity: std::array::from_fn(|_| AtomicF64::new(0.0)),
            pitch_bend_prev: AtomicF64::new(0.0),
        };
        bank.reset_defaults();
        bank
    }

    fn param(&self, id: ControlId) -> &Param {
        &self.params[id.index()]
    }

    /// Restores default ranges and values, clears the velocity table and every MIDI binding,
    /// then commits.
    pub fn reset_defaults(&self) {
        for id in ControlId::ALL {
            let (min, max, value) = id.defaults();
            let param = self.param(id);
            param.min.store(min, Ordering::Relaxed);
            param.max.store(max, Ordering::Relaxed);
            param.midi.store(-1, Ordering::Relaxed);
            self.update_direct(id, value);
        }
        for vel in &self.pending_velocity {
            vel.store(0.0, Ordering::Relaxed);
        }
        self.commit();
    }

    /// Stores a natural-unit value into the pending slot. No clamping is applied.
    pub fn update_direct(&self, id: ControlId, value: f64) {
        self.param(id)
            .pending
            .store(to_storage(id, value), Ordering::Release);
    }

    /// Maps x in [0, 1] onto the control's range and stores it.
    pub fn update(&self, id: ControlId, x: f64) {
        let param = self.param(id);
        let min = param.min.load(Ordering::Relaxed);
        let max = param.max.load(Ordering::Relaxed);
        self.update_direct(id, min + (max - min) * x);
    }

    /// Sets the pending velocity of a key. Out of range keys are ignored.
    pub fn key_velocity_update(&self, key: u8, velocity: f64) {
        if let Some(slot) = self.pending_velocity.get(usize::from(key)) {
            slot.store(velocity, Ordering::Release);
        }
    }

    /// Applies [`ControlBank::update`] to every control bound to the given MIDI controller.
    pub fn midi_dispatch(&self, controller: u8, x: f64) {
        for id in ControlId::ALL {
            if self.param(id).midi.load(Ordering::Relaxed) == i32::from(controller) {
                self.update(id, x);
            }
        }
    }

    /// Publishes pending values. Called by the renderer once per block.
    pub fn commit(&self) {
        let pitch_bend = &self.param(ControlId::PitchBend).value;
        self.pitch_bend_prev
            .store(pitch_bend.load(Ordering::Relaxed), Ordering::Relaxed);

        for param in &self.params {
            param
                .value
                .store(param.pending.load(Ordering::Acquire), Ordering::Relaxed);
        }
        for (committed, pending) in self.velocity.iter().zip(&self.pending_velocity) {
            committed.store(pending.load(Ordering::Acquire), Ordering::Relaxed);
        }
    }

    /// Committed value in storage form.
    #[inline]
    pub fn value(&self, id: ControlId) -> f64 {
        self.param(id).value.load(Ordering::Relaxed)
    }

    /// Committed value converted back to natural units.
    pub fn value_gui(&self, id: ControlId) -> f64 {
        from_storage(id, self.value(id))
    }

    pub fn min(&self, id: ControlId) -> f64 {
        self.param(id).min.load(Ordering::Relaxed)
    }

    pub fn max(&self, id: ControlId) -> f64 {
        self.param(id).max.load(Ordering::Relaxed)
    }

    /// Sets the upper bound. For transpose the lower bound mirrors it.
    pub fn set_max(&self, id: ControlId, max: f64) {
        let param = self.param(id);
        param.max.store(max, Ordering::Relaxed);
        if id == ControlId::Transpose {
            param.min.store(-max, Ordering::Relaxed);
        }
    }

    /// The MIDI controller bound to this control, if any.
    pub fn midi(&self, id: ControlId) -> Option<u8> {
        u8::try_from(self.param(id).midi.load(Ordering::Relaxed)).ok()
    }

    pub fn bind_midi(&self, id: ControlId, controller: Option<u8>) {
        let raw = controller.map_or(-1, i32::from);
        self.param(id).midi.store(raw, Ordering::Relaxed);
    }

    /// Committed velocity of a key, 0 when released or out of range.
    #[inline]
    pub fn key_velocity(&self, key: u8) -> f64 {
        self.velocity
            .get(usize::from(key))
            .map_or(0.0, |v| v.load(Ordering::Relaxed))
    }

    /// The pitch bend multiplier that was committed before the latest commit.
    #[inline]
    pub fn pitch_bend_prev(&self) -> f64 {
        self.pitch_bend_prev.load(Ordering::Relaxed)
    }

    /// Loudness normalised, velocity curved amplitude for a new voice.
    pub fn sample_amp(&self, key: u8, velocity: f64, rms: f64) -> f64 {
        if rms == 0.0 {
            return 0.0;
        }
        let rms_low = self.value(ControlId::RmsLow);
        let rms_high = self.value(ControlId::RmsHigh);
        let m = (rms_high - rms_low) / 87.0;
        let amp = (rms_low + m * (f64::from(key) - 21.0)) / rms;
        amp * velocity.powf(self.value(ControlId::GammaAmp))
    }

    /// Linear pan law across the piano range (keys 21 to 108).
    pub fn sample_pan(&self, key: u8) -> f64 {
        let pan_low = self.value(ControlId::PanLow);
        let pan_high = self.value(ControlId::PanHigh);
        let m = (pan_high - pan_low) / 87.0;
        pan_low + m * (f64::from(key) - 21.0)
    }
}

impl Default for ControlBank {
    fn default() -> Self {
        ControlBank::new()
    }
}

impl fmt::Debug for ControlBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for id in ControlId::ALL {
            map.entry(&id.name(), &self.value_gui(id));
        }
        map.finish()
    }
}
