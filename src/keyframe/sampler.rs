use super::ExtractError;

/// Picks every n-th decoded frame, n derived from a time interval and the stream rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampler {
    frame_interval: u64,
}

impl Sampler {
    pub fn new(fps: f64, sample_rate: f64) -> Result<Self, ExtractError> {
        let frames = (fps * sample_rate).floor();
        if !(fps > 0.0 && sample_rate > 0.0 && frames.is_finite() && frames >= 1.0) {
            return Err(ExtractError::InvalidInterval { fps, sample_rate });
        }
        Ok(Self {
            frame_interval: frames as u64,
        })
    }

    pub fn frame_interval(&self) -> u64 {
        self.frame_interval
    }

    pub fn is_sampled(&self, index: u64) -> bool {
        index % self.frame_interval == 0
    }
}
