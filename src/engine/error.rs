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
use std::error::Error;
use std::path::PathBuf;

use super::EngineState;
use crate::config::ConfigError;

/// Errors returned by engine management operations and note dispatch.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine is {actual}, expected {expected}")]
    BadState {
        expected: EngineState,
        actual: EngineState,
    },

    #[error("Invalid instrument directory {path}: {source}")]
    BadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save controls to {path}: {source}")]
    SaveFailed {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("Failed to load controls from {path}: {source}")]
    ControlsLoad {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("Voice pool exhausted, dropping note for key {key}")]
    PoolExhausted { key: u8 },

    #[error("Failed to start load workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Audio host error: {0}")]
    Host(Box<dyn Error + Send + Sync>),
}
