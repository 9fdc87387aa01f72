//! Synthetic frame streams and scratch directories shared by the unit tests.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use image::{Rgb, RgbImage};

use crate::media::{DecodeError, FrameSource, RawFrame};

pub fn solid_frame(index: u64, width: u32, height: u32, rgb: [u8; 3]) -> RawFrame {
    RawFrame::new(index, RgbImage::from_pixel(width, height, Rgb(rgb)))
}

/// Fresh, empty directory unique to this test and process.
pub fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("keyframer-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// In-memory frame source; optionally fails after serving a number of frames.
pub struct FrameSequence {
    fps: f64,
    frames: VecDeque<RawFrame>,
    fail_after: Option<u64>,
    served: u64,
}

impl FrameSequence {
    pub fn solid(fps: f64, width: u32, height: u32, colors: &[[u8; 3]]) -> Self {
        let frames = colors
            .iter()
            .enumerate()
            .map(|(i, &rgb)| solid_frame(i as u64, width, height, rgb))
            .collect();
        Self {
            fps,
            frames,
            fail_after: None,
            served: 0,
        }
    }

    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }
}

impl FrameSource for FrameSequence {
    fn frame_rate(&self) -> f64 {
        self.fps
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, DecodeError> {
        if self.fail_after == Some(self.served) {
            return Err(DecodeError::Truncated {
                got: 7,
                expected: 64,
            });
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.served += 1;
        }
        Ok(frame)
    }

    fn frame_count_hint(&self) -> Option<u64> {
        Some(self.frames.len() as u64 + self.served)
    }
}
