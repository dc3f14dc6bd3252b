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
//! Instrument directory configuration.
//!
//! An instrument directory carries up to three files next to its `samples/` directory:
//! `config.conf` (pipeline settings), `tuning.conf` (per-file semitone offsets) and
//! `controls.conf` (saved control values and MIDI bindings). All of them are optional.

use std::collections::HashMap;
use std::path::Path;

use config::{Config, File, FileFormat, Value};

mod controls;
mod error;
mod instrument;
mod tuning;

pub use controls::{ControlRecord, ControlsFile};
pub use error::ConfigError;
pub use instrument::load_settings;
pub use tuning::Tuning;

/// A parsed INI key file. Section and key lookups ignore case.
#[derive(Debug, Default, Clone)]
pub struct IniFile {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniFile {
    /// Reads an INI file from disk.
    pub fn read(path: &Path) -> Result<IniFile, ConfigError> {
        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()?;
        IniFile::from_config(config)
    }

    /// Parses INI text.
    pub fn parse(text: &str) -> Result<IniFile, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(text, FileFormat::Ini))
            .build()?;
        IniFile::from_config(config)
    }

    fn from_config(config: Config) -> Result<IniFile, ConfigError> {
        let root = config.try_deserialize::<HashMap<String, Value>>()?;
        let mut sections = HashMap::new();
        for (name, value) in root {
            // Keys outside any section aren't used by any instrument file.
            let Ok(table) = value.into_table() else {
                continue;
            };
            let mut entries = HashMap::new();
            for (key, value) in table {
                entries.insert(key.to_lowercase(), value.into_string()?);
            }
            sections.insert(name.to_lowercase(), entries);
        }
        Ok(IniFile { sections })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .get(&key.to_lowercase())
            .map(String::as_str)
    }

    pub fn section(&self, section: &str) -> Option<&HashMap<String, String>> {
        self.sections.get(&section.to_lowercase())
    }
}
