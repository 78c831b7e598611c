//! Microphone capture using cpal.
//!
//! Captures at the device's native sample rate, downsamples to the
//! configured input rate, and re-chunks into fixed-size frames for
//! transmission to the model.

use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// One fixed-size frame of microphone samples at the input sample rate.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Mono f32 samples in [-1, 1]; always exactly the configured frame size.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

/// Audio capture from the system microphone via cpal.
///
/// The frame cadence is determined by the input device, not the
/// application; each frame is delivered on the capture channel as soon
/// as enough downsampled audio has accumulated.
pub struct CpalCapture {
    device: cpal::Device,
    stream_config: StreamConfig,
    target_sample_rate: u32,
    frame_size: usize,
}

impl CpalCapture {
    /// Create a new capture instance bound to the configured device.
    ///
    /// Uses the device's default configuration for maximum compatibility,
    /// then downsamples to the target rate in software.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no input device exists.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.input_device {
            host.input_devices()
                .map_err(|e| {
                    AssistantError::DeviceUnavailable(format!("cannot enumerate devices: {e}"))
                })?
                .find(|d| {
                    d.description()
                        .ok()
                        .map(|desc| desc.name() == name)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    AssistantError::DeviceUnavailable(format!("input device '{name}' not found"))
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| AssistantError::DeviceUnavailable("no default input device".into()))?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using input device: {device_name}");

        let default_config = device.default_input_config().map_err(|e| {
            AssistantError::PermissionDenied(format!("no default input config: {e}"))
        })?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels();

        let stream_config = StreamConfig {
            channels: native_channels,
            sample_rate: native_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            "native input config: {}Hz, {} channels",
            native_rate, native_channels
        );

        Ok(Self {
            device,
            stream_config,
            target_sample_rate: config.input_sample_rate,
            frame_size: config.frame_size,
        })
    }

    /// Run the capture loop, sending fixed-size frames to the channel.
    ///
    /// The cpal stream is owned by a dedicated thread (cpal streams are
    /// not `Send`); this future resolves when the cancellation token is
    /// triggered and the stream has been released.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` if the audio stream cannot be created
    /// or started (the OS refused access).
    pub async fn run(self, tx: mpsc::Sender<CaptureFrame>, cancel: CancellationToken) -> Result<()> {
        let native_rate = self.stream_config.sample_rate;
        let native_channels = self.stream_config.channels;
        let target_rate = self.target_sample_rate;
        let frame_size = self.frame_size;

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::spawn(move || {
            // Accumulator lives on the audio thread; carries the remainder
            // between callbacks so every emitted frame is exactly frame_size.
            let mut pending: Vec<f32> = Vec::with_capacity(frame_size * 2);

            let stream = self.device.build_input_stream(
                &self.stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    let mono = if native_channels > 1 {
                        to_mono(data, native_channels)
                    } else {
                        data.to_vec()
                    };

                    let samples = if native_rate != target_rate {
                        downsample(&mono, native_rate, target_rate)
                    } else {
                        mono
                    };

                    pending.extend_from_slice(&samples);
                    while pending.len() >= frame_size {
                        let frame: Vec<f32> = pending.drain(..frame_size).collect();
                        // Never block the audio thread; an overfull channel
                        // means the session is gone or badly behind.
                        if tx
                            .try_send(CaptureFrame {
                                samples: frame,
                                sample_rate: target_rate,
                            })
                            .is_err()
                        {
                            debug!("capture channel full, dropping frame");
                        }
                    }
                },
                move |err| {
                    error!("audio input stream error: {err}");
                },
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(AssistantError::PermissionDenied(format!(
                        "failed to build input stream: {e}"
                    ))));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AssistantError::PermissionDenied(format!(
                    "failed to start input stream: {e}"
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Park until told to stop; a dropped sender also unblocks us.
            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .await
            .map_err(|_| AssistantError::Channel("capture thread exited".into()))??;

        info!(
            "audio capture started: native {}Hz -> target {}Hz, {} samples/frame",
            native_rate, target_rate, frame_size
        );

        cancel.cancelled().await;

        let _ = stop_tx.send(());
        info!("audio capture stopped");
        Ok(())
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices().map_err(|e| {
            AssistantError::DeviceUnavailable(format!("cannot enumerate devices: {e}"))
        })?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Sufficient for speech (48kHz → 16kHz): speech energy sits below 8kHz,
/// so no anti-alias filter is needed.
fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(src_rate) / f64::from(dst_rate);
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            f64::from(samples[idx]) * (1.0 - frac) + f64::from(samples[idx + 1]) * frac
        } else {
            f64::from(samples[idx.min(samples.len() - 1)])
        };

        output.push(sample as f32);
    }

    output
}
