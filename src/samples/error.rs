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
use std::path::PathBuf;

/// Why a single sample file was not loaded. None of these abort an instrument load.
#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("Not a sample file name (expected on-<key>-<layer>-<variation>): {0}")]
    BadName(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: symphonia::core::errors::Error,
    },

    #[error("Unsupported sample format: {channels} channel(s) at {sample_rate}Hz (need stereo 48000Hz)")]
    FormatRejected { channels: usize, sample_rate: u32 },

    #[error("Sample contains no audio: {0}")]
    Empty(PathBuf),
}
