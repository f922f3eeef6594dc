//! Audio output devices through cpal

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::block::SampleBlock;
use crate::audio::output::{Completion, DeviceTime, OutputDevice, SlotId};
use crate::audio::render::{RenderClock, RenderCommand, Renderer};
use crate::config::PlaybackConfig;
use crate::error::AudioError;

/// Output device description for listings
#[derive(Debug, Clone, Serialize)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all output devices of the default host
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = device_capabilities(&device);
                devices.push(OutputDeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }
    devices
}

fn device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut rates = Vec::new();
    let mut chans = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [16_000u32, 22_050, 32_000, 44_100, 48_000, 96_000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !rates.contains(&rate_val)
                {
                    rates.push(rate_val);
                }
            }
            if !chans.contains(&config.channels()) {
                chans.push(config.channels());
            }
        }
    }

    rates.sort();
    chans.sort();
    (rates, chans)
}

/// Find an output device by name, or the default output device
pub fn find_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string())),
        Some(name) => {
            let devices = host
                .output_devices()
                .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
            for device in devices {
                if device.name().ok().as_deref() == Some(name) {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceNotFound(name.to_string()))
        }
    }
}

/// Pick an `f32` stream config at `sample_rate`, preferring the fewest channels
fn stream_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig, AudioError> {
    let rate = cpal::SampleRate(sample_rate);
    let best = device
        .supported_output_configs()
        .map_err(|e| AudioError::CpalError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .filter(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate())
        .min_by_key(|c| c.channels())
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("no f32 output config at {} Hz", sample_rate))
        })?;

    Ok(StreamConfig {
        channels: best.channels(),
        sample_rate: rate,
        buffer_size: cpal::BufferSize::Default,
    })
}

/// Blocks in flight back from the callback before it has to drop one itself
const RETIRE_CAPACITY: usize = 64;

/// Hardware output implementing [`OutputDevice`].
///
/// The cpal stream is not `Send`, so it lives on its own thread for as long
/// as this handle exists.
pub struct CpalOutput {
    name: String,
    sample_rate: u32,
    channels: u16,
    block_length: DeviceTime,
    commands: Sender<RenderCommand>,
    retired: Receiver<SampleBlock>,
    clock: Arc<RenderClock>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open `device_name` (or the default device) at the session sample rate
    pub fn open(
        config: &PlaybackConfig,
        device_name: Option<&str>,
    ) -> Result<(Self, Receiver<Completion>), AudioError> {
        let device = find_output_device(device_name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let stream_config = stream_config(&device, config.sample_rate)?;
        let channels = stream_config.channels;

        let (command_tx, command_rx) = unbounded::<RenderCommand>();
        let (completion_tx, completion_rx) = unbounded::<Completion>();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (retired_tx, retired_rx) = bounded::<SampleBlock>(RETIRE_CAPACITY);
        let clock = Arc::new(RenderClock::default());
        let running = Arc::new(AtomicBool::new(true));

        let mut renderer = Renderer::new(channels, command_rx, completion_tx, retired_tx, clock.clone());
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data),
                    |err| tracing::error!("Output stream error: {}", err),
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping output
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::DeviceClosed);
            }
        }

        tracing::info!(
            "Output stream open on {}: {} Hz, {} channel(s)",
            name,
            config.sample_rate,
            channels
        );

        Ok((
            Self {
                name,
                sample_rate: config.sample_rate,
                channels,
                block_length: config.block_length as DeviceTime,
                commands: command_tx,
                retired: retired_rx,
                clock,
                running,
                thread_handle: Some(handle),
            },
            completion_rx,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Drop blocks the callback has finished with, off the audio thread
    fn release_retired(&self) {
        for block in self.retired.try_iter() {
            drop(block);
        }
    }
}

impl OutputDevice for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> DeviceTime {
        self.clock.now()
    }

    /// One callback buffer, and never less than one block
    fn lead_time(&self) -> DeviceTime {
        self.clock.largest_callback().max(self.block_length)
    }

    fn schedule(&self, slot: SlotId, block: SampleBlock, start: DeviceTime) -> Result<(), AudioError> {
        self.release_retired();
        let now = self.current_time();
        if start < now {
            return Err(AudioError::StartInPast { start, now });
        }
        self.commands
            .send(RenderCommand::Arm { slot, block, start })
            .map_err(|_| AudioError::DeviceClosed)
    }

    fn cancel(&self, slot: SlotId) {
        self.release_retired();
        let _ = self.commands.send(RenderCommand::Cancel(slot));
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}
