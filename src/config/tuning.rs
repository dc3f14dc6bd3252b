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
use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use super::IniFile;

const SECTION: &str = "Tuning";

/// Per-file tuning offsets in semitones, from tuning.conf. Files not listed are untuned.
#[derive(Debug, Default, Clone)]
pub struct Tuning {
    /// Keyed by lowercased file name.
    semitones: HashMap<String, f64>,
}

impl Tuning {
    /// Reads tuning.conf. A missing or unreadable file yields an empty tuning table.
    pub fn load(path: &Path) -> Tuning {
        if !path.exists() {
            info!(path = ?path, "No tuning file");
            return Tuning::default();
        }
        match IniFile::read(path) {
            Ok(ini) => Tuning::from_ini(&ini),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read tuning file");
                Tuning::default()
            }
        }
    }

    pub(crate) fn from_ini(ini: &IniFile) -> Tuning {
        let mut semitones = HashMap::new();
        for (name, value) in ini.section(SECTION).into_iter().flatten() {
            match value.trim().parse::<f64>() {
                Ok(st) => {
                    semitones.insert(name.to_lowercase(), st);
                }
                Err(_) => warn!(file = %name, value = %value, "Ignoring bad tuning value"),
            }
        }
        Tuning { semitones }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Tuning {
        Tuning {
            semitones: pairs
                .into_iter()
                .map(|(name, st)| (name.to_lowercase(), st))
                .collect(),
        }
    }

    /// Semitone offset for a sample file name.
    pub fn semitones(&self, file_name: &str) -> f64 {
        self.semitones
            .get(&file_name.to_lowercase())
            .copied()
            .unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.semitones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.semitones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_lookup() {
        let ini =
            IniFile::parse("[Tuning]\non-60-1-1.wav=0.5\non-61-1-1.wav = -1.25\non-62-1-1.wav=x\n")
                .unwrap();
        let tuning = Tuning::from_ini(&ini);
        assert_eq!(tuning.len(), 2);
        assert_eq!(tuning.semitones("on-60-1-1.wav"), 0.5);
        assert_eq!(tuning.semitones("on-61-1-1.wav"), -1.25);
        assert_eq!(tuning.semitones("on-62-1-1.wav"), 0.0);
        assert_eq!(tuning.semitones("on-63-1-1.wav"), 0.0);
    }

    #[test]
    fn test_missing_file() {
        let tuning = Tuning::load(Path::new("/nonexistent/tuning.conf"));
        assert!(tuning.is_empty());
    }
}
