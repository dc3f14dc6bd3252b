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
use std::f64::consts::PI;

use crate::audio::{RawFrame, Stereo, SAMPLE_RATE};

/// Cascaded first-order RC low-pass filter for 16 bit stereo frames.
///
/// Each stage is an exponential moving average. After every stage the signal is rescaled so its
/// peak sits at full scale, which keeps cascaded stages from drifting toward silence.
#[derive(Debug, Clone, Copy)]
pub struct LowPassFilter {
    /// Requested overall -3dB point in Hz.
    corner: f64,
    order: u32,
}

impl LowPassFilter {
    pub fn new(corner: f64, order: u32) -> LowPassFilter {
        LowPassFilter { corner, order }
    }

    /// Per-stage corner frequency so that `order` cascaded stages are -3dB at the requested
    /// corner.
    pub fn stage_corner(&self) -> f64 {
        let order = f64::from(self.order.max(1));
        self.corner / ((1.0 / order).exp2() - 1.0).sqrt()
    }

    /// Filters the frames in place. Order 0 leaves them untouched.
    pub fn apply(&self, frames: &mut [RawFrame]) {
        if self.order == 0 || frames.is_empty() {
            return;
        }

        let freq = self.stage_corner();
        let mut work = vec![Stereo::ZERO; frames.len()];
        for _ in 0..self.order {
            Self::stage(frames, &mut work, freq);
        }
    }

    fn stage(frames: &mut [RawFrame], work: &mut [Stereo], freq: f64) {
        let rc = 1.0 / (2.0 * PI * freq);
        let dt = 1.0 / f64::from(SAMPLE_RATE);
        let alpha = dt / (rc + dt);

        let mut prev = Stereo::from_raw(frames[0]);
        let mut peak = prev.abs();
        work[0] = prev;
        for (out, frame) in work.iter_mut().zip(frames.iter()).skip(1) {
            prev = prev + (Stereo::from_raw(*frame) - prev) * alpha;
            peak = peak.max(prev.abs());
            *out = prev;
        }

        let peak = peak.max_lane();
        let factor = if peak > 0.0 {
            f64::from(i16::MAX) / peak
        } else {
            1.0
        };
        for (frame, value) in frames.iter_mut().zip(work.iter()) {
            *frame = (*value * factor).round().to_raw();
        }
    }
}
