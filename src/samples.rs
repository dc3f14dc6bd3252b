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
//! Sample storage for the instrument.
//!
//! This module provides:
//! - The in-memory sample payload and its owned/shared buffer
//! - The key/layer/variation indexed store with round-robin selection
//! - Loading of an instrument's sample directory
//! - The load-time preprocessing pipeline (synthetic layer, borrow, fill, crop, RMS)

use std::fmt;
use std::sync::Arc;

use crate::audio::{RawFrame, Stereo};

mod error;
mod loader;
mod lowpass;
mod pipeline;
mod store;

pub use error::SampleError;
pub use loader::{load_directory, parse_sample_name, LoadReport};
pub use lowpass::LowPassFilter;
pub use pipeline::{Pipeline, PipelineSettings};
pub use store::{Pick, SampleStore};

/// Maximum number of velocity layers per key.
pub const MAX_LAYERS: usize = 128;

/// Maximum number of round-robin variations per layer.
pub const MAX_VARIATIONS: usize = 128;

/// Sample payload storage.
///
/// An owned buffer was produced by this slot (decoded or filtered). A shared buffer refers to
/// frames owned by another slot and was created by borrow or fill. Both hold the frames through an
/// `Arc`, so dropping either kind never frees memory still referenced elsewhere.
pub enum Buffer {
    Owned(Arc<[RawFrame]>),
    Shared(Arc<[RawFrame]>),
}

impl Buffer {
    /// A shared reference to the same frames.
    pub fn share(&self) -> Buffer {
        Buffer::Shared(Arc::clone(self.arc()))
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Buffer::Owned(_))
    }

    /// All frames, including the terminal zero frame.
    pub fn frames(&self) -> &[RawFrame] {
        self.arc()
    }

    fn arc(&self) -> &Arc<[RawFrame]> {
        match self {
            Buffer::Owned(frames) | Buffer::Shared(frames) => frames,
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_owned() { "Owned" } else { "Shared" };
        write!(f, "{}({} frames)", kind, self.frames().len())
    }
}

/// One decoded stereo take, immutable once the load pipeline has finished.
#[derive(Debug)]
pub struct Sample {
    buffer: Buffer,
    /// Frame count, excluding the terminal frame.
    len: usize,
    /// Playback start offset set by crop.
    idx0: usize,
    rms: f64,
    /// Playback rate ratio.
    speed: f64,
}

impl Sample {
    /// Creates an owned sample. A zero frame is appended so interpolation at the final frame
    /// always has a successor.
    pub fn new(mut frames: Vec<RawFrame>, speed: f64) -> Sample {
        let len = frames.len();
        frames.push([0, 0]);
        Sample {
            buffer: Buffer::Owned(frames.into()),
            len,
            idx0: 0,
            rms: 1.0,
            speed,
        }
    }

    /// A shared copy of this sample with its speed scaled by the given ratio.
    pub fn borrowed(&self, speed_ratio: f64) -> Sample {
        Sample {
            buffer: self.buffer.share(),
            len: self.len,
            idx0: self.idx0,
            rms: self.rms,
            speed: self.speed * speed_ratio,
        }
    }

    /// A new owned sample holding the given frames with this sample's metadata.
    pub(crate) fn with_frames(&self, frames: Vec<RawFrame>) -> Sample {
        let mut sample = Sample::new(frames, self.speed);
        sample.idx0 = self.idx0.min(sample.len);
        sample.rms = self.rms;
        sample
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn start(&self) -> usize {
        self.idx0
    }

    pub fn rms(&self) -> f64 {
        self.rms
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn is_owned(&self) -> bool {
        self.buffer.is_owned()
    }

    /// The sample's frames without the terminal frame.
    pub fn frames(&self) -> &[RawFrame] {
        &self.buffer.frames()[..self.len]
    }

    /// Bytes held by the buffer, only counted for owned samples.
    pub fn memory_size(&self) -> usize {
        if self.is_owned() {
            self.buffer.frames().len() * std::mem::size_of::<RawFrame>()
        } else {
            0
        }
    }

    pub(crate) fn set_start(&mut self, idx0: usize) {
        self.idx0 = idx0.min(self.len);
    }

    pub(crate) fn set_rms(&mut self, rms: f64) {
        self.rms = rms;
    }

    /// Linear interpolation between the frames around a fractional position, in raw units.
    #[inline]
    pub fn interp(&self, position: f64) -> Stereo {
        let frames = self.buffer.frames();
        let i = position as usize;
        let (Some(a), Some(b)) = (frames.get(i), frames.get(i + 1)) else {
            return Stereo::ZERO;
        };
        let a = Stereo::from_raw(*a);
        let b = Stereo::from_raw(*b);
        let mu = position - i as f64;
        a + (b - a) * mu
    }
}

/// A stable reference to a sample slot, small enough to live in an atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleRef {
    pub key: u8,
    pub layer: u8,
    pub variation: u8,
}

impl SampleRef {
    pub fn new(key: u8, layer: u8, variation: u8) -> SampleRef {
        SampleRef {
            key,
            layer,
            variation,
        }
    }

    pub fn pack(self) -> u32 {
        (u32::from(self.key) << 16) | (u32::from(self.layer) << 8) | u32::from(self.variation)
    }

    pub fn unpack(raw: u32) -> SampleRef {
        SampleRef {
            key: (raw >> 16) as u8,
            layer: (raw >> 8) as u8,
            variation: raw as u8,
        }
    }
}

impl fmt::Display for SampleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "on-{}-{}-{}",
            self.key,
            u16::from(self.layer) + 1,
            u16::from(self.variation) + 1
        )
    }
}
