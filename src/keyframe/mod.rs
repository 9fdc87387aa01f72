//! Keyframe extraction: sample a decoded stream, score each sample against the
//! last kept frame, and persist the frames that mark a new visual state.

pub mod encoder;
pub mod manifest;
pub mod normalize;
pub mod pipeline;
pub mod policy;
pub mod sampler;
pub mod score;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::media::DecodeError;

pub use encoder::{JpegWriter, KeyframeRecord};
pub use manifest::Manifest;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("video not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("{} is not a video (detected {mime})", path.display())]
    NotVideo { path: PathBuf, mime: String },
    #[error("video could not be decoded")]
    Unreadable(#[source] DecodeError),
    #[error("video contains no frames")]
    NoFrames,
    #[error("a {sample_rate}s sample interval at {fps} fps is shorter than one frame")]
    InvalidInterval { fps: f64, sample_rate: f64 },
    #[error("failed to encode keyframe {}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write keyframe {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    /// True for problems with the input itself; retrying the same input will not help.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ExtractError::NotFound(_)
                | ExtractError::NotVideo { .. }
                | ExtractError::Unreadable(_)
                | ExtractError::NoFrames
                | ExtractError::InvalidInterval { .. }
        )
    }
}
