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
use std::{
    error::Error,
    fs::{self, File},
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use hound::{SampleFormat, WavSpec, WavWriter};
use tempfile::TempDir;

use crate::audio::{RawFrame, SAMPLE_RATE};

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Writes a 16-bit WAV file with one vector per channel. Channels are interleaved on write.
pub fn write_wav(path: &Path, channels: &[Vec<i16>], sample_rate: u32) -> Result<(), Box<dyn Error>> {
    let num_channels = channels.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);

    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        },
    )?;
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel.get(frame).copied().unwrap_or(0))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Writes a stereo 16-bit WAV file from raw frames.
pub fn write_stereo_wav(
    path: &Path,
    frames: &[RawFrame],
    sample_rate: u32,
) -> Result<(), Box<dyn Error>> {
    let left = frames.iter().map(|f| f[0]).collect();
    let right = frames.iter().map(|f| f[1]).collect();
    write_wav(path, &[left, right], sample_rate)
}

/// A constant full-ish tone, loud enough to survive any crop threshold used in tests.
pub fn tone(frames: usize, level: i16) -> Vec<RawFrame> {
    vec![[level, level]; frames]
}

/// A scratch instrument directory with a `samples/` subdirectory.
pub struct InstrumentDir {
    dir: TempDir,
}

impl InstrumentDir {
    pub fn new() -> InstrumentDir {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("samples")).expect("samples dir");
        InstrumentDir { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn samples(&self) -> PathBuf {
        self.dir.path().join("samples")
    }

    /// Adds a 48 kHz stereo sample under `samples/`.
    pub fn sample(self, name: &str, frames: &[RawFrame]) -> InstrumentDir {
        write_stereo_wav(&self.samples().join(name), frames, SAMPLE_RATE).expect("write sample");
        self
    }

    /// Writes a file next to `samples/`.
    pub fn file(self, name: &str, contents: &str) -> InstrumentDir {
        fs::write(self.dir.path().join(name), contents).expect("write file");
        self
    }
}
