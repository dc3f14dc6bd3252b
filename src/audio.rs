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
use std::{error::Error, fmt};

use crate::engine::BlockRenderer;

pub mod cpal;
pub mod mock;
pub mod ring;
pub mod stereo;
pub mod thread_priority;

pub use ring::{Handle, RingBuffer};
pub use stereo::{RawFrame, Stereo};

/// The only sample rate samples are accepted at and audio is produced at.
pub const SAMPLE_RATE: u32 = 48_000;

/// Scales a 16-bit fixed-point value into the -1.0..1.0 range.
pub const INT16_SCALE: f64 = 3.0517578125e-05;

/// Voices whose amplitude decays below this are retired.
pub const MIN_AMP: f64 = 1e-5;

/// The host audio server. It owns the renderer while active and calls it once per block
/// from its real-time thread.
pub trait Device: fmt::Display + Send {
    /// Starts streaming, moving the renderer onto the audio thread.
    fn activate(&mut self, renderer: BlockRenderer) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Stops streaming. When this returns no callback is in flight and the renderer is gone.
    fn deactivate(&mut self);
}
