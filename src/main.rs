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
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use layersampler::audio::{cpal, mock};
use layersampler::{midi, Engine, EngineConfig};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A multi-layer sample instrument."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices and MIDI input ports.
    Devices {},
    /// Loads an instrument without audio output and prints what was loaded.
    Inspect {
        /// The path to the instrument directory.
        path: PathBuf,
    },
    /// Loads an instrument and plays it from a MIDI input.
    Start {
        /// The path to the instrument directory.
        path: PathBuf,
        /// The audio device to play through. Defaults to the host's default output.
        #[arg(short, long)]
        device: Option<String>,
        /// The MIDI input port to listen on. Any port whose name contains this matches.
        #[arg(short, long)]
        midi_port: Option<String>,
        /// A fixed audio buffer size in frames.
        #[arg(short, long)]
        block_size: Option<u32>,
        /// Saves the control state here on exit.
        #[arg(short, long)]
        save_controls: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = cpal::Device::list()?;
            if devices.is_empty() {
                println!("No audio devices found.");
            } else {
                println!("Audio devices:");
                for device in devices {
                    println!("- {}", device);
                }
            }

            let ports = midi::list()?;
            if ports.is_empty() {
                println!("No MIDI inputs found.");
            } else {
                println!("MIDI inputs:");
                for port in ports {
                    println!("- {}", port);
                }
            }
        }
        Commands::Inspect { path } => {
            let engine = Engine::new(
                EngineConfig::default(),
                Box::new(mock::Device::get("inspect")),
            );
            engine.load(&path)?;
            let store = engine.store().ok_or("no samples were published")?;

            println!(
                "Samples (count: {}, memory: {} bytes):",
                store.sample_count(),
                store.memory_size()
            );
            for key in 0..=127u8 {
                let layers = store.layer_count(key);
                if layers == 0 {
                    continue;
                }
                let variations = (0..layers)
                    .map(|layer| store.variation_count(key, layer).to_string())
                    .collect::<Vec<String>>()
                    .join("/");
                println!("- key {:3}: {} layers, variations {}", key, layers, variations);
            }

            drop(store);
            engine.unload()?;
        }
        Commands::Start {
            path,
            device,
            midi_port,
            block_size,
            save_controls,
        } => {
            let device = cpal::Device::get(device.as_deref(), block_size)?;
            info!(device = %device, "Using audio device");
            let engine = Engine::new(EngineConfig::default(), Box::new(device));
            engine.load(&path)?;

            let handler = engine
                .take_event_handler()
                .ok_or("event handler already taken")?;
            let (events_tx, events_rx) = crossbeam_channel::unbounded();
            let midi = match midi_port {
                Some(port) => {
                    let midi = midi::get(&port)?;
                    midi.watch_events(events_tx)?;
                    Some(midi)
                }
                None => {
                    warn!("No MIDI port given, nothing will trigger notes");
                    drop(events_tx);
                    None
                }
            };
            let event_thread = midi::spawn_event_thread(handler, events_rx)?;

            println!("Playing. Type \"quit\" to stop.");
            let mut commands = stdin_lines();
            loop {
                match commands.recv_timeout(Duration::from_secs(1)) {
                    Ok(line) if line.trim() == "quit" => break,
                    Ok(line) => println!("Unknown command: {}", line.trim()),
                    Err(RecvTimeoutError::Timeout) => {}
                    // Without stdin, keep running until killed.
                    Err(RecvTimeoutError::Disconnected) => commands = crossbeam_channel::never(),
                }
                let (left, right) = engine.peak_levels();
                info!(
                    playing = engine.playing_count(),
                    peak_left = left,
                    peak_right = right,
                    "Status"
                );
            }

            if let Some(midi) = midi {
                midi.stop_watch_events();
            }
            if event_thread.join().is_err() {
                warn!("Event thread panicked");
            }
            engine.unload()?;
            if let Some(path) = save_controls {
                engine.save_controls(&path)?;
            }
        }
    }

    Ok(())
}

/// Reads stdin lines on a background thread.
fn stdin_lines() -> crossbeam_channel::Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}
