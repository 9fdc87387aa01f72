use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

use crate::media::RawFrame;

use super::sampler::Sampler;

/// Single-channel view of a normalized frame, used only for scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityBuffer(GrayImage);

impl IntensityBuffer {
    pub fn from_rgb(image: &RgbImage) -> Self {
        Self(imageops::grayscale(image))
    }

    #[cfg(test)]
    pub fn from_gray(image: GrayImage) -> Self {
        Self(image)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_raw().is_empty()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }
}

/// The color frame that is persisted when a sample is kept.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub index: u64,
    pub timestamp: f64,
    pub image: RgbImage,
}

/// A sampled frame: the persisted copy and the intensity derived from that same copy.
#[derive(Debug, Clone)]
pub struct Sample {
    pub frame: NormalizedFrame,
    pub intensity: IntensityBuffer,
}

/// Caps frame width, preserving aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    max_width: u32,
}

impl Normalizer {
    pub fn new(max_width: u32) -> Self {
        Self {
            max_width: max_width.max(1),
        }
    }

    pub fn normalize(&self, raw: RawFrame, fps: f64) -> Sample {
        let timestamp = raw.timestamp(fps);
        let RawFrame { index, image } = raw;

        let image = if image.width() > self.max_width {
            let height = scaled_height(image.width(), image.height(), self.max_width);
            // The triangle kernel is widened by the downscale ratio, so every output
            // pixel is a weighted average over its whole source footprint.
            imageops::resize(&image, self.max_width, height, FilterType::Triangle)
        } else {
            image
        };

        let intensity = IntensityBuffer::from_rgb(&image);
        Sample {
            frame: NormalizedFrame {
                index,
                timestamp,
                image,
            },
            intensity,
        }
    }
}

fn scaled_height(width: u32, height: u32, max_width: u32) -> u32 {
    let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
    scaled.max(1)
}

/// What the decode side hands to the selection policy for each decoded frame.
#[derive(Debug)]
pub enum Observation {
    Sampled(Sample),
    Skipped(RawFrame),
}

/// Sampling plus normalization for one stream; cheap to copy into a decode thread.
#[derive(Debug, Clone, Copy)]
pub struct FrameGate {
    pub sampler: Sampler,
    pub normalizer: Normalizer,
    pub fps: f64,
}

impl FrameGate {
    pub fn new(sampler: Sampler, normalizer: Normalizer, fps: f64) -> Self {
        Self {
            sampler,
            normalizer,
            fps,
        }
    }

    /// Only sampled frames pay for resizing and grayscale conversion.
    pub fn classify(&self, raw: RawFrame) -> Observation {
        if self.sampler.is_sampled(raw.index) {
            Observation::Sampled(self.normalizer.normalize(raw, self.fps))
        } else {
            Observation::Skipped(raw)
        }
    }

    pub fn normalize(&self, raw: RawFrame) -> Sample {
        self.normalizer.normalize(raw, self.fps)
    }
}
