pub mod ffmpeg;
pub mod frame;
pub mod mimetype;

use std::io;
use std::process::ExitStatus;

use thiserror::Error;

pub use frame::RawFrame;

/// A finite, non-restartable stream of decoded frames.
///
/// `Ok(None)` marks a clean end of stream; `Err` means decoding stopped early
/// and any frames already returned remain valid.
pub trait FrameSource {
    /// Frames per second of the stream.
    fn frame_rate(&self) -> f64;

    fn next_frame(&mut self) -> Result<Option<RawFrame>, DecodeError>;

    /// Expected number of frames, when the container reports one.
    fn frame_count_hint(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to spawn {program}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("ffprobe failed: {0}")]
    Probe(String),
    #[error("no decodable video stream")]
    NoVideoStream,
    #[error("truncated frame: got {got} of {expected} bytes")]
    Truncated { got: usize, expected: usize },
    #[error("failed to read frame data")]
    Io(#[from] io::Error),
    #[error("ffmpeg exited with {status}: {stderr}")]
    Exit { status: ExitStatus, stderr: String },
}
