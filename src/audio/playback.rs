//! Gapless playback scheduling for streamed model audio.
//!
//! Audio arrives as a stream of short buffers. The scheduler maintains a
//! monotone timeline on the output clock so consecutive buffers play
//! back-to-back with no gaps or overlaps, and supports interruption
//! (barge-in) by cancelling everything scheduled and resetting the
//! timeline.

use crate::audio::codec::AudioBuffer;
use crate::config::AudioConfig;
use crate::error::{AssistantError, Result};
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Identifier for one scheduled audio source.
pub type SourceId = u64;

/// Abstraction over the audio output device and its clock.
///
/// The scheduler only needs a monotone clock, the ability to start a
/// buffer at a given time on that clock, and bulk cancellation. Tests
/// drive a mock sink with a manual clock; production uses [`CpalSink`].
pub trait OutputSink: Send {
    /// Current time in seconds on the output clock.
    fn now(&self) -> f64;

    /// Schedule a buffer to begin rendering at `start_at` seconds on the
    /// output clock. `start_at` is never in the past.
    fn schedule(&mut self, id: SourceId, buffer: AudioBuffer, start_at: f64);

    /// Stop and discard every scheduled source immediately.
    fn cancel_all(&mut self);
}

impl OutputSink for Box<dyn OutputSink> {
    fn now(&self) -> f64 {
        (**self).now()
    }

    fn schedule(&mut self, id: SourceId, buffer: AudioBuffer, start_at: f64) {
        (**self).schedule(id, buffer, start_at);
    }

    fn cancel_all(&mut self) {
        (**self).cancel_all();
    }
}

/// Keeps streamed audio fragments contiguous on the output timeline.
///
/// Invariants: the next start time never moves backwards past the sink
/// clock, each enqueued buffer starts exactly where the previous one
/// ends (when audio is flowing), and interruption clears everything and
/// resets the timeline to "now".
pub struct PlaybackScheduler<S: OutputSink> {
    sink: S,
    next_start: f64,
    scheduled: HashSet<SourceId>,
    next_id: SourceId,
}

impl<S: OutputSink> PlaybackScheduler<S> {
    /// Create a scheduler over the given sink with an empty timeline.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_start: 0.0,
            scheduled: HashSet::new(),
            next_id: 0,
        }
    }

    /// Enqueue a buffer for gapless playback.
    ///
    /// The buffer starts at the later of the scheduled end of the
    /// previous buffer and the sink's current time, so a pause in the
    /// stream never schedules audio in the past.
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> SourceId {
        let start_at = self.next_start.max(self.sink.now());
        let duration = buffer.duration_secs();

        let id = self.next_id;
        self.next_id += 1;

        self.sink.schedule(id, buffer, start_at);
        self.scheduled.insert(id);
        self.next_start = start_at + duration;
        id
    }

    /// Stop all playback immediately and reset the timeline.
    ///
    /// Safe to call repeatedly and when nothing is playing.
    pub fn interrupt(&mut self) {
        self.sink.cancel_all();
        self.scheduled.clear();
        self.next_start = self.sink.now();
    }

    /// Record that a source finished rendering. Returns `true` when this
    /// was the last outstanding source (playback just went idle).
    pub fn mark_done(&mut self, id: SourceId) -> bool {
        let removed = self.scheduled.remove(&id);
        removed && self.scheduled.is_empty()
    }

    /// Whether no sources are currently scheduled or playing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.scheduled.is_empty()
    }
}

/// One source waiting to render inside the cpal callback.
struct PendingSource {
    samples: Vec<f32>,
    /// Absolute output-frame index at which this source starts.
    start_frame: u64,
    /// Next sample to render.
    cursor: usize,
}

/// Shared state between the scheduler thread and the audio callback.
struct SinkState {
    sources: HashMap<SourceId, PendingSource>,
    /// Total frames rendered since the stream started; this is the clock.
    frames_rendered: u64,
}

/// cpal-backed output sink.
///
/// The device callback mixes whichever sources are due at the current
/// frame counter. Finished source ids are reported on a channel so the
/// session loop can update speaking state. The cpal stream itself is
/// owned by a dedicated thread (cpal streams are not `Send`), so the
/// sink handle can live inside the session task.
pub struct CpalSink {
    state: Arc<Mutex<SinkState>>,
    sample_rate: u32,
    done_rx: Option<mpsc::UnboundedReceiver<SourceId>>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
}

impl CpalSink {
    /// Open the configured output device at the playback sample rate.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if no output device exists and
    /// `PermissionDenied` if the stream cannot be created or started.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
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
                    AssistantError::DeviceUnavailable(format!("output device '{name}' not found"))
                })?
        } else {
            host.default_output_device().ok_or_else(|| {
                AssistantError::DeviceUnavailable("no default output device".into())
            })?
        };

        let device_name = device
            .description()
            .map(|d| d.name().to_owned())
            .unwrap_or_else(|_| "<unknown>".into());
        info!("using output device: {device_name}");

        let sample_rate = config.output_sample_rate;
        let stream_config = StreamConfig {
            channels: 1,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let state = Arc::new(Mutex::new(SinkState {
            sources: HashMap::new(),
            frames_rendered: 0,
        }));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let callback_state = Arc::clone(&state);
        std::thread::spawn(move || {
            let stream = device.build_output_stream(
                &stream_config,
                move |output: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    output.fill(0.0);
                    let Ok(mut state) = callback_state.lock() else {
                        return;
                    };

                    let base_frame = state.frames_rendered;
                    let mut finished = Vec::new();

                    for (&id, source) in &mut state.sources {
                        for (i, slot) in output.iter_mut().enumerate() {
                            let frame = base_frame + i as u64;
                            if frame < source.start_frame {
                                continue;
                            }
                            if source.cursor >= source.samples.len() {
                                break;
                            }
                            *slot += source.samples[source.cursor];
                            source.cursor += 1;
                        }
                        if source.cursor >= source.samples.len() {
                            finished.push(id);
                        }
                    }

                    for id in finished {
                        state.sources.remove(&id);
                        if done_tx.send(id).is_err() {
                            debug!("playback done channel closed");
                        }
                    }

                    state.frames_rendered = base_frame + output.len() as u64;
                },
                move |err| {
                    error!("audio output stream error: {err}");
                },
                None,
            );

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(AssistantError::PermissionDenied(format!(
                        "failed to build output stream: {e}"
                    ))));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(AssistantError::PermissionDenied(format!(
                    "failed to start output stream: {e}"
                ))));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Park until the sink is dropped.
            let _ = stop_rx.recv();
            drop(stream);
        });

        ready_rx
            .recv()
            .map_err(|_| AssistantError::Channel("playback thread exited".into()))??;

        info!("audio playback started at {sample_rate}Hz");

        Ok(Self {
            state,
            sample_rate,
            done_rx: Some(done_rx),
            stop_tx: Some(stop_tx),
        })
    }

    /// Take the channel on which finished source ids are reported.
    /// Yields `Some` exactly once.
    pub fn take_done_events(&mut self) -> Option<mpsc::UnboundedReceiver<SourceId>> {
        self.done_rx.take()
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }
}

impl OutputSink for CpalSink {
    fn now(&self) -> f64 {
        match self.state.lock() {
            Ok(state) => state.frames_rendered as f64 / f64::from(self.sample_rate),
            Err(_) => 0.0,
        }
    }

    fn schedule(&mut self, id: SourceId, buffer: AudioBuffer, start_at: f64) {
        if buffer.sample_rate != self.sample_rate {
            warn!(
                "buffer rate {}Hz differs from device rate {}Hz",
                buffer.sample_rate, self.sample_rate
            );
        }
        let start_frame = (start_at * f64::from(self.sample_rate)).round() as u64;
        if let Ok(mut state) = self.state.lock() {
            state.sources.insert(
                id,
                PendingSource {
                    samples: buffer.samples,
                    start_frame,
                    cursor: 0,
                },
            );
        }
    }

    fn cancel_all(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.sources.clear();
        }
    }
}
