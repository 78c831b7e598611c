//! Audio capture, playback, and wire codec.

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{CaptureFrame, CpalCapture};
pub use codec::{AudioBuffer, decode_frame, decode_to_buffer, encode_frame};
pub use playback::{CpalSink, OutputSink, PlaybackScheduler, SourceId};
