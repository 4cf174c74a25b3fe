//! Realtime rendering: a dedicated render thread fills an SPSC frame ring,
//! the device callback drains it.
//!
//! The callback touches nothing but its half of the ring: on producer
//! starvation it pads the period with silence and carries on. Device errors
//! surface when opening or switching, never from inside the callback.

use crate::block::FRAMES_PER_BLOCK;
use crate::context::Context;
use anyhow::{anyhow, Context as _, Result};
use cadenza_rt::{frame_ring, RingConsumer, RingProducer};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, FromSample, Sample, SampleFormat, SampleRate, Stream, StreamConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Ring capacity in device periods. Enough slack for scheduling jitter on
/// the render thread without adding noticeable latency.
const RING_PERIODS: usize = 5;

/// How long the render thread naps when the ring is saturated.
const SATURATED_NAP: Duration = Duration::from_micros(250);

/// Requested device configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamOptions {
    /// Output device name; `None` selects the default output.
    pub device: Option<String>,
    pub channels: usize,
    /// Device period in frames.
    pub period_frames: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            device: None,
            channels: 2,
            period_frames: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default_output: bool,
}

/// Lists the host's output devices.
pub fn output_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|device| device.name().ok())
        .unwrap_or_default();
    let mut result = Vec::new();
    for device in host
        .output_devices()
        .context("failed to enumerate output devices")?
    {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        result.push(DeviceInfo {
            is_default_output: name == default_name,
            name,
        });
    }
    Ok(result)
}

/// A context bound to an output device.
///
/// Dropping stops the render thread; the stream dies with the struct.
pub struct RealtimeOutput {
    context: Arc<Context>,
    options: StreamOptions,
    running: Arc<AtomicBool>,
    render_thread: Option<JoinHandle<()>>,
    consumer: Arc<Mutex<RingConsumer>>,
    stream: Option<Stream>,
    device_name: String,
}

impl RealtimeOutput {
    /// Opens the device and spawns the render thread. The stream stays
    /// paused until [`start`](Self::start).
    pub fn open(context: Arc<Context>, options: StreamOptions) -> Result<Self> {
        if options.channels == 0 {
            return Err(anyhow!("channel count must be positive"));
        }
        if options.period_frames == 0 {
            return Err(anyhow!("period must be positive"));
        }

        let (producer, consumer) = frame_ring(
            options.channels,
            options.period_frames.max(FRAMES_PER_BLOCK) * RING_PERIODS,
        );
        let consumer = Arc::new(Mutex::new(consumer));
        let running = Arc::new(AtomicBool::new(true));

        let render_thread = spawn_render_thread(
            Arc::clone(&context),
            producer,
            Arc::clone(&running),
            options.channels,
        )?;

        let mut output = Self {
            context,
            options,
            running,
            render_thread: Some(render_thread),
            consumer,
            stream: None,
            device_name: String::new(),
        };
        let device = output.options.device.clone();
        output.build_stream(device.as_deref())?;
        Ok(output)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Starts the device callback.
    pub fn start(&self) -> Result<()> {
        let stream = self.stream.as_ref().ok_or_else(|| anyhow!("no stream"))?;
        stream.play().context("failed to start output stream")?;
        Ok(())
    }

    /// Pauses the device callback; the render thread keeps the ring full.
    pub fn stop(&self) -> Result<()> {
        let stream = self.stream.as_ref().ok_or_else(|| anyhow!("no stream"))?;
        stream.pause().context("failed to stop output stream")?;
        Ok(())
    }

    /// Rebuilds the stream on another device. The graph and the ring stay
    /// intact; playback resumes on the new device.
    pub fn switch_device(&mut self, device: Option<&str>) -> Result<()> {
        self.stream = None;
        self.build_stream(device)?;
        self.start()
    }

    /// Stops the render thread and tears the stream down.
    pub fn shutdown(mut self) -> Result<()> {
        self.running.store(false, Ordering::Relaxed);
        self.stream = None;
        if let Some(handle) = self.render_thread.take() {
            handle
                .join()
                .map_err(|_| anyhow!("render thread panicked"))?;
        }
        Ok(())
    }

    fn build_stream(&mut self, device: Option<&str>) -> Result<()> {
        let host = cpal::default_host();
        let device = match device {
            Some(name) => resolve_device(&host, name)?,
            None => host
                .default_output_device()
                .context("no default output device")?,
        };
        self.device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let supported = choose_stream_config(
            &device,
            self.options.channels,
            self.context.sample_rate() as u32,
        )?;
        let sample_format = supported.sample_format();
        let mut config: StreamConfig = supported.config();
        config.buffer_size = BufferSize::Fixed(self.options.period_frames as u32);

        let stream = match sample_format {
            SampleFormat::F32 => self.build_output_stream::<f32>(&device, &config),
            SampleFormat::I16 => self.build_output_stream::<i16>(&device, &config),
            SampleFormat::U16 => self.build_output_stream::<u16>(&device, &config),
            other => Err(anyhow!("unsupported sample format: {other:?}")),
        }?;
        self.stream = Some(stream);
        Ok(())
    }

    fn build_output_stream<T>(&self, device: &cpal::Device, config: &StreamConfig) -> Result<Stream>
    where
        T: cpal::SizedSample + FromSample<f32> + Send + 'static,
    {
        let consumer = Arc::clone(&self.consumer);
        let channels = self.options.channels;
        let mut staging = vec![0.0f32; channels * self.options.period_frames];
        let silence = T::from_sample(0.0f32);

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _info| {
                    if staging.len() < data.len() {
                        staging.resize(data.len(), 0.0);
                    }
                    // try_lock contends only while a device switch swaps the
                    // stream; a miss plays one silent period.
                    let frames = match consumer.try_lock() {
                        Some(mut ring) => ring.read_frames(&mut staging[..data.len()]),
                        None => 0,
                    };
                    let filled = frames * channels;
                    for (out, &value) in data.iter_mut().zip(&staging[..filled]) {
                        *out = T::from_sample(value);
                    }
                    for out in &mut data[filled..] {
                        *out = silence;
                    }
                },
                move |error| {
                    tracing::error!(%error, "output stream error");
                },
                None,
            )
            .context("failed to build output stream")?;
        Ok(stream)
    }
}

impl Drop for RealtimeOutput {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.stream = None;
        if let Some(handle) = self.render_thread.take() {
            if handle.join().is_err() {
                tracing::error!("render thread panicked during shutdown");
            }
        }
    }
}

fn spawn_render_thread(
    context: Arc<Context>,
    mut producer: RingProducer,
    running: Arc<AtomicBool>,
    channels: usize,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("cadenza-render".into())
        .spawn(move || {
            while running.load(Ordering::Relaxed) {
                if producer.available_write_frames() >= FRAMES_PER_BLOCK {
                    let mut scratch = context.pool().rent_scratch(channels);
                    if let Err(error) = context.process_block_interleaved(&mut scratch, channels) {
                        tracing::error!(%error, "block render failed, emitting silence");
                        scratch.fill(0.0);
                    }
                    producer.write_frames(&scratch);
                    context.pool().recycle_scratch(scratch);
                } else {
                    thread::sleep(SATURATED_NAP);
                }
            }
        })
        .context("failed to spawn render thread")
}

fn resolve_device(host: &cpal::Host, name: &str) -> Result<cpal::Device> {
    for device in host
        .output_devices()
        .context("failed to enumerate output devices")?
    {
        if device.name().map_or(false, |candidate| candidate == name) {
            return Ok(device);
        }
    }
    Err(anyhow!("output device not found: {name}"))
}

fn choose_stream_config(
    device: &cpal::Device,
    channels: usize,
    sample_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let desired_channels = channels.max(1) as u16;
    let desired_rate = SampleRate(sample_rate);

    if let Ok(configs) = device.supported_output_configs() {
        for range in configs {
            if range.channels() == desired_channels
                && range.sample_format() == SampleFormat::F32
                && range.min_sample_rate() <= desired_rate
                && desired_rate <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(desired_rate));
            }
        }
    }

    if let Ok(configs) = device.supported_output_configs() {
        for range in configs {
            if range.channels() == desired_channels
                && range.min_sample_rate() <= desired_rate
                && desired_rate <= range.max_sample_rate()
            {
                return Ok(range.with_sample_rate(desired_rate));
            }
        }
    }

    device
        .default_output_config()
        .context("failed to fetch default output config")
}
