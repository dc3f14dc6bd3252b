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
//! MIDI input transport. Raw messages from a midir input port are parsed into performance events
//! and forwarded to the engine's event thread over a channel.

use std::{
    error::Error,
    fmt,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender};
use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, Level};

use crate::engine::{EventHandler, PerformanceEvent};

const CLIENT_NAME: &str = "layersampler input";

/// A MIDI input port.
pub struct Device {
    name: String,
    port: MidiInputPort,
    connection: Mutex<Option<MidiInputConnection<()>>>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Input)", self.name)
    }
}

impl Device {
    /// Forwards every recognised message from the port to `sender`.
    pub fn watch_events(&self, sender: Sender<PerformanceEvent>) -> Result<(), Box<dyn Error>> {
        let span = span!(Level::INFO, "watch events (midir)");
        let _enter = span.enter();

        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Err("Already watching events.".into());
        }

        let input = MidiInput::new(CLIENT_NAME)?;
        *connection = Some(input.connect(
            &self.port,
            "layersampler event watcher",
            move |_, raw_event, _| {
                let Some(event) = PerformanceEvent::from_midi(raw_event) else {
                    return;
                };
                debug!(event = ?event, "Received MIDI event.");
                if let Err(e) = sender.send(event) {
                    error!(err = %e, "Error sending MIDI event to receiver.");
                }
            },
            (),
        )?);

        info!(device = self.name, "Watching MIDI events.");
        Ok(())
    }

    /// Stops watching events. Dropping the connection drops the sender with it.
    pub fn stop_watch_events(&self) {
        drop(self.connection.lock().take());
    }
}

/// Lists the names of all MIDI input ports.
pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
    let input = MidiInput::new(CLIENT_NAME)?;
    let mut names = input
        .ports()
        .iter()
        .map(|port| input.port_name(port))
        .collect::<Result<Vec<String>, _>>()?;
    names.sort();
    Ok(names)
}

/// Gets the input port whose name contains `name`.
pub fn get(name: &str) -> Result<Device, Box<dyn Error>> {
    let input = MidiInput::new(CLIENT_NAME)?;
    let mut ports = Vec::new();
    for port in input.ports() {
        ports.push((input.port_name(&port)?, port));
    }
    let (name, port) = find_port(ports, name)?;
    Ok(Device {
        name,
        port,
        connection: Mutex::new(None),
    })
}

fn find_port<P>(ports: Vec<(String, P)>, name: &str) -> Result<(String, P), Box<dyn Error>> {
    let mut matches: Vec<(String, P)> = ports
        .into_iter()
        .filter(|(port_name, _)| port_name.contains(name))
        .collect();

    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|(port_name, _)| port_name.as_str())
                .collect::<Vec<&str>>()
                .join(", ")
        )
        .into());
    }
    matches
        .pop()
        .ok_or_else(|| format!("no device found with name {}", name).into())
}

/// Starts the engine's event thread. It runs until every sender for `events` is dropped.
pub fn spawn_event_thread(
    handler: EventHandler,
    events: Receiver<PerformanceEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("layersampler-events".to_string())
        .spawn(move || handler.run(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> Vec<(String, u8)> {
        vec![
            ("Digital Piano:MIDI 1".to_string(), 1),
            ("Pedal Board".to_string(), 2),
            ("Digital Drums".to_string(), 3),
        ]
    }

    #[test]
    fn test_find_port() {
        let (name, port) = find_port(ports(), "Piano").unwrap();
        assert_eq!(name, "Digital Piano:MIDI 1");
        assert_eq!(port, 1);
    }

    #[test]
    fn test_find_port_missing() {
        let err = find_port(ports(), "Organ").unwrap_err();
        assert_eq!(err.to_string(), "no device found with name Organ");
    }

    #[test]
    fn test_find_port_ambiguous() {
        let err = find_port(ports(), "Digital").unwrap_err();
        assert!(err.to_string().contains("Digital Piano:MIDI 1, Digital Drums"));
    }
}
