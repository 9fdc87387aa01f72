use image::RgbImage;

/// A decoded video frame in packed RGB, tagged with its position in the decode stream.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub index: u64,
    pub image: RgbImage,
}

impl RawFrame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    /// Presentation time in seconds for a constant-rate stream.
    pub fn timestamp(&self, fps: f64) -> f64 {
        self.index as f64 / fps
    }
}
