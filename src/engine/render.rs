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
//! Per-block mixing on the audio thread.
//!
//! Nothing here blocks, locks, logs or allocates: the mix buffer is allocated when the renderer
//! is built, and voices move only through the pool's rings.

use std::sync::Arc;

use super::{EngineState, Shared, Voice};
use crate::audio::{Stereo, INT16_SCALE, MIN_AMP};
use crate::controls::{ControlBank, ControlId};
use crate::samples::Sample;

/// Produces output blocks. Moved into the host's audio callback while the engine is running.
pub struct BlockRenderer {
    shared: Arc<Shared>,
    mix: Vec<Stereo>,
}

impl BlockRenderer {
    pub(crate) fn new(shared: Arc<Shared>, max_block: usize) -> BlockRenderer {
        BlockRenderer {
            shared,
            mix: vec![Stereo::ZERO; max_block.max(1)],
        }
    }

    /// The largest block processed in one pass. Longer host buffers are split.
    pub fn max_block(&self) -> usize {
        self.mix.len()
    }

    /// Renders into separate left and right buffers of equal length.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.max_block());
            let mix = self.process(n);
            let l = &mut left[done..done + n];
            let r = &mut right[done..done + n];
            for ((frame, l), r) in mix.iter().zip(l.iter_mut()).zip(r.iter_mut()) {
                *l = frame.left as f32;
                *r = frame.right as f32;
            }
            done += n;
        }
    }

    /// Renders into an interleaved buffer. Channels past the first two are silenced.
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        if channels == 0 {
            return;
        }
        let frames = data.len() / channels;
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.max_block());
            let mix = self.process(n);
            let out = &mut data[done * channels..(done + n) * channels];
            for (frame, out) in mix.iter().zip(out.chunks_exact_mut(channels)) {
                out.fill(0.0);
                out[0] = frame.left as f32;
                if channels > 1 {
                    out[1] = frame.right as f32;
                }
            }
            done += n;
        }
    }

    /// Runs one block of `n <= max_block` frames and returns it scaled to full-scale units.
    fn process(&mut self, n: usize) -> &[Stereo] {
        let shared = &*self.shared;
        let mix = &mut self.mix[..n];
        mix.fill(Stereo::ZERO);

        if shared.state() != EngineState::Running {
            return mix;
        }

        let controls = &shared.controls;
        controls.commit();

        let voices = &shared.voices;
        voices.drain_new_pairs();

        let pb0 = controls.pitch_bend_prev();
        let pb1 = controls.value(ControlId::PitchBend);
        let slope = (pb1 - pb0) / n as f64;

        let guard = shared.store.load();
        let store = guard.as_deref();
        for _ in 0..voices.playing_count() {
            let Some(id) = voices.take_playing() else {
                break;
            };
            let mut voice = voices.read(id);
            let done = match store.and_then(|store| store.sample(voice.sample)) {
                Some(sample) => mix_voice(&mut voice, sample, mix, controls, pb0, slope),
                None => true,
            };
            if done {
                voices.retire(id);
            } else {
                voices.write(id, &voice);
                voices.requeue(id);
            }
        }

        let mut peak = Stereo::ZERO;
        for frame in mix.iter_mut() {
            *frame *= INT16_SCALE;
            peak = peak.max(frame.abs());
        }
        shared.peaks.record(peak);
        mix
    }
}

/// Adds one voice into the mix. Returns true when the voice is finished.
fn mix_voice(
    voice: &mut Voice,
    sample: &Sample,
    mix: &mut [Stereo],
    controls: &ControlBank,
    pb0: f64,
    slope: f64,
) -> bool {
    let len = sample.len() as f64;
    if voice.position >= len {
        return true;
    }

    let held = controls.value(ControlId::Sustain) > 0.5 || controls.key_velocity(voice.key) != 0.0;
    let release = if held {
        1.0
    } else {
        controls.value(ControlId::TauKeyUp)
    };
    let fade = controls.value(ControlId::TauFadeIn);
    let master = controls.value(ControlId::Amplify);
    let speed = sample.speed();

    let mut pb = pb0;
    for out in mix.iter_mut() {
        voice.amp *= release;
        voice.fade_in *= fade;

        *out += sample.interp(voice.position) * (voice.amp * (1.0 - voice.fade_in) * master);

        voice.position += pb * speed;
        pb += slope;
        if voice.position >= len {
            return true;
        }
    }

    voice.amp < MIN_AMP
}

impl std::fmt::Debug for BlockRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockRenderer")
            .field("max_block", &self.max_block())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::samples::SampleRef;

    fn voice(position: f64, amp: f64) -> Voice {
        Voice {
            key: 60,
            sample: SampleRef::new(60, 0, 0),
            position,
            amp,
            pan: 0.0,
            fade_in: 0.0,
        }
    }

    fn held_controls() -> ControlBank {
        let controls = ControlBank::new();
        controls.key_velocity_update(60, 1.0);
        controls.commit();
        controls
    }

    #[test]
    fn test_mix_constant_sample() {
        let controls = held_controls();
        let sample = Sample::new(vec![[1000, -1000]; 100], 1.0);
        let mut mix = vec![Stereo::ZERO; 10];
        let mut v = voice(0.0, 0.5);

        assert!(!mix_voice(&mut v, &sample, &mut mix, &controls, 1.0, 0.0));
        for frame in &mix {
            assert_relative_eq!(frame.left, 500.0);
            assert_relative_eq!(frame.right, -500.0);
        }
        assert_relative_eq!(v.position, 10.0);
        assert_relative_eq!(v.amp, 0.5);
    }

    #[test]
    fn test_voice_retires_at_end() {
        let controls = held_controls();
        let sample = Sample::new(vec![[1000, 1000]; 4], 1.0);
        let mut mix = vec![Stereo::ZERO; 10];
        let mut v = voice(0.0, 1.0);
        assert!(mix_voice(&mut v, &sample, &mut mix, &controls, 1.0, 0.0));
        // Frames 0..4 were written, nothing after.
        assert_relative_eq!(mix[3].left, 1000.0);
        assert_eq!(mix[4], Stereo::ZERO);
    }

    #[test]
    fn test_voice_at_end_retires_without_reading() {
        let controls = held_controls();
        let sample = Sample::new(vec![[1000, 1000]; 4], 1.0);
        let mut mix = vec![Stereo::ZERO; 4];
        let mut v = voice(4.0, 1.0);
        assert!(mix_voice(&mut v, &sample, &mut mix, &controls, 1.0, 0.0));
        assert!(mix.iter().all(|f| *f == Stereo::ZERO));
    }

    #[test]
    fn test_release_decay() {
        let controls = ControlBank::new();
        controls.update_direct(ControlId::TauKeyUp, 1.0);
        controls.commit();
        let tau = controls.value(ControlId::TauKeyUp);

        let sample = Sample::new(vec![[1000, 1000]; 1000], 1.0);
        let mut mix = vec![Stereo::ZERO; 8];
        let mut v = voice(0.0, 1.0);
        mix_voice(&mut v, &sample, &mut mix, &controls, 1.0, 0.0);
        assert_relative_eq!(v.amp, tau.powi(8), epsilon = 1e-12);
        assert_relative_eq!(mix[0].left, 1000.0 * tau, epsilon = 1e-9);
    }

    #[test]
    fn test_decayed_voice_retires() {
        let controls = ControlBank::new();
        let sample = Sample::new(vec![[1000, 1000]; 1000], 1.0);
        let mut mix = vec![Stereo::ZERO; 4];
        let mut v = voice(0.0, MIN_AMP / 2.0);
        assert!(mix_voice(&mut v, &sample, &mut mix, &controls, 1.0, 0.0));
    }

    #[test]
    fn test_fade_in() {
        let controls = held_controls();
        let fade = controls.value(ControlId::TauFadeIn);
        let sample = Sample::new(vec![[1000, 1000]; 100], 1.0);
        let mut mix = vec![Stereo::ZERO; 2];
        let mut v = voice(0.0, 1.0);
        v.fade_in = 1.0;
        mix_voice(&mut v, &sample, &mut mix, &controls, 1.0, 0.0);
        assert_relative_eq!(mix[0].left, 1000.0 * (1.0 - fade), epsilon = 1e-9);
        assert_relative_eq!(mix[1].left, 1000.0 * (1.0 - fade * fade), epsilon = 1e-9);
    }

    #[test]
    fn test_pitch_ramp_and_speed() {
        let controls = held_controls();
        let sample = Sample::new(vec![[0, 0]; 1000], 2.0);
        let mut mix = vec![Stereo::ZERO; 4];
        let mut v = voice(0.0, 1.0);
        // pb runs 1.0, 1.5, 2.0, 2.5; advance = 2 * (7.0) = 14.
        mix_voice(&mut v, &sample, &mut mix, &controls, 1.0, 0.5);
        assert_relative_eq!(v.position, 14.0);
    }
}
