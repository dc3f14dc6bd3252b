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
    fmt,
    thread::{self, JoinHandle},
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{error, info, span, warn, Level};

use super::thread_priority::RenderPriority;
use super::SAMPLE_RATE;
use crate::engine::BlockRenderer;

/// Output channels the renderer fills.
const CHANNELS: u16 = 2;

/// How often the stream thread checks whether the callback has recorded its priority outcome.
const PRIORITY_POLL: Duration = Duration::from_millis(100);

/// The output stream's owning thread. cpal streams aren't Send, so the stream is built, played
/// and dropped on this thread.
struct StreamThread {
    stop: Sender<()>,
    join: JoinHandle<()>,
}

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// Fixed host buffer size in frames, or None to let the host pick.
    block_size: Option<u32>,
    stream: Option<StreamThread>,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

impl Device {
    /// Lists cpal output devices.
    pub fn list() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels >= CHANNELS {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                        block_size: None,
                        stream: None,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the named cpal device, or the host's default output device when no name is given.
    pub fn get(name: Option<&str>, block_size: Option<u32>) -> Result<Device, Box<dyn Error>> {
        let mut device = match name {
            Some(name) => Device::list()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name))?,
            None => {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or("no default output device")?;
                Device {
                    name: device.name()?,
                    max_channels: CHANNELS,
                    host_id: host.id(),
                    device,
                    block_size: None,
                    stream: None,
                }
            }
        };
        device.block_size = block_size;
        Ok(device)
    }

    fn stream_config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: CHANNELS,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: match self.block_size {
                Some(frames) => cpal::BufferSize::Fixed(frames),
                None => cpal::BufferSize::Default,
            },
        }
    }
}

impl super::Device for Device {
    fn activate(&mut self, mut renderer: BlockRenderer) -> Result<(), Box<dyn Error + Send + Sync>> {
        let span = span!(Level::INFO, "activate (cpal)");
        let _enter = span.enter();

        if self.stream.is_some() {
            return Err(format!("device {} is already active", self.name).into());
        }

        let device = self.device.clone();
        let config = self.stream_config();
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let join = thread::Builder::new()
            .name("layersampler-stream".to_string())
            .spawn(move || {
                let mut priority = RenderPriority::from_env();
                let requested = priority.priority();
                let status = priority.status();
                let channels = usize::from(config.channels);
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        priority.apply();
                        renderer.render_interleaved(data, channels);
                    },
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                );
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("failed to create stream: {e}")));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(format!("failed to start stream: {e}")));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until told to stop or the device is dropped. The
                // callback can't log, so its priority outcome is reported from here.
                let mut reported = false;
                loop {
                    match stop_rx.recv_timeout(PRIORITY_POLL) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !reported {
                                reported = status.report(requested);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    device = self.name,
                    block_size = ?self.block_size,
                    "CPAL output stream started"
                );
                self.stream = Some(StreamThread {
                    stop: stop_tx,
                    join,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = join.join();
                Err("stream thread exited before starting".into())
            }
        }
    }

    fn deactivate(&mut self) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        let _ = stream.stop.send(());
        if stream.join.join().is_err() {
            warn!(device = self.name, "Stream thread panicked");
        }
        info!(device = self.name, "CPAL output stream stopped");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        super::Device::deactivate(self);
    }
}
