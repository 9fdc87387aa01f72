use tracing::debug;

use crate::media::RawFrame;

use super::normalize::{FrameGate, IntensityBuffer, NormalizedFrame, Observation, Sample};
use super::score::score;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyConfig {
    /// Minimum score for a sampled frame to become a keyframe.
    pub threshold: f64,
    /// Minimum score for the final frame of the stream to be kept.
    pub epsilon: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            epsilon: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    HasReference,
    Finalizing,
    Done,
}

#[derive(Debug)]
pub enum Decision {
    Keep(NormalizedFrame),
    /// Too close to the last kept frame.
    Discard,
    /// The frame was not on the sampling grid.
    Skip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyStats {
    pub frames_seen: u64,
    pub samples: u64,
    pub kept: u64,
}

/// Result of draining the policy at end of stream.
#[derive(Debug)]
pub struct Finalized {
    pub trailing: Option<NormalizedFrame>,
    pub stats: PolicyStats,
    pub phase: Phase,
}

struct Reference {
    intensity: IntensityBuffer,
    index: u64,
}

/// The one frame retained for end-of-stream handling.
enum LastSeen {
    Kept(u64),
    Discarded(Sample),
    Unsampled(RawFrame),
}

/// Scene-change selection over a decode stream.
///
/// Owns all mutable run state: the reference intensity of the last kept frame,
/// the last frame seen, and the counters. Frames must be observed in decode order.
pub struct SelectionPolicy {
    gate: FrameGate,
    config: PolicyConfig,
    reference: Option<Reference>,
    last_seen: Option<LastSeen>,
    stats: PolicyStats,
}

impl SelectionPolicy {
    pub fn new(gate: FrameGate, config: PolicyConfig) -> Self {
        Self {
            gate,
            config,
            reference: None,
            last_seen: None,
            stats: PolicyStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        if self.reference.is_some() {
            Phase::HasReference
        } else {
            Phase::Empty
        }
    }

    /// Classifies and observes a raw frame in one step.
    pub fn offer(&mut self, raw: RawFrame) -> Decision {
        let observation = self.gate.classify(raw);
        self.observe(observation)
    }

    pub fn observe(&mut self, observation: Observation) -> Decision {
        self.stats.frames_seen += 1;
        match observation {
            Observation::Skipped(raw) => {
                self.last_seen = Some(LastSeen::Unsampled(raw));
                Decision::Skip
            }
            Observation::Sampled(sample) => {
                self.stats.samples += 1;
                self.select(sample)
            }
        }
    }

    fn select(&mut self, sample: Sample) -> Decision {
        let index = sample.frame.index;

        let Some(reference) = &self.reference else {
            debug!(index, "first sample, keeping unconditionally");
            return self.keep(sample);
        };

        let score = score(&reference.intensity, &sample.intensity);
        let accepted = score > self.config.threshold;
        debug!(
            index,
            reference = reference.index,
            score = format!("{:.5}", score),
            threshold = self.config.threshold,
            accepted,
            "scene comparison"
        );

        if accepted {
            self.keep(sample)
        } else {
            self.last_seen = Some(LastSeen::Discarded(sample));
            Decision::Discard
        }
    }

    fn keep(&mut self, sample: Sample) -> Decision {
        let index = sample.frame.index;
        debug!(index, from = ?self.phase(), "reference updated");
        self.reference = Some(Reference {
            intensity: sample.intensity,
            index,
        });
        self.last_seen = Some(LastSeen::Kept(index));
        self.stats.kept += 1;
        Decision::Keep(sample.frame)
    }

    /// Ends the stream and decides whether its final frame must also be kept.
    ///
    /// The final frame is held to `epsilon` rather than the scene threshold: a
    /// subtle last change still carries the end state of the recording.
    pub fn finish(self) -> Finalized {
        let mut stats = self.stats;
        let gate = self.gate;
        let epsilon = self.config.epsilon;
        debug!(phase = ?Phase::Finalizing, frames = stats.frames_seen, "finalizing selection");

        let trailing = match (self.reference, self.last_seen) {
            (_, None) => None,
            (None, Some(last)) => Self::into_sample(gate, last).map(|sample| {
                debug!(
                    index = sample.frame.index,
                    "nothing kept yet, keeping final frame"
                );
                sample.frame
            }),
            (Some(reference), Some(last)) => {
                Self::into_sample(gate, last).and_then(|sample| {
                    let score = score(&reference.intensity, &sample.intensity);
                    let accepted = score > epsilon;
                    debug!(
                        index = sample.frame.index,
                        reference = reference.index,
                        score = format!("{:.5}", score),
                        epsilon,
                        accepted,
                        "final frame comparison"
                    );
                    accepted.then_some(sample.frame)
                })
            }
        };

        if trailing.is_some() {
            stats.kept += 1;
        }

        Finalized {
            trailing,
            stats,
            phase: Phase::Done,
        }
    }

    /// `None` when the last frame seen was itself kept.
    fn into_sample(gate: FrameGate, last: LastSeen) -> Option<Sample> {
        match last {
            LastSeen::Discarded(sample) => Some(sample),
            LastSeen::Unsampled(raw) => Some(gate.normalize(raw)),
            LastSeen::Kept(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyframe::normalize::Normalizer;
    use crate::keyframe::sampler::Sampler;
    use crate::test_support::solid_frame;

    const A: [u8; 3] = [0, 0, 0];
    const B: [u8; 3] = [200, 200, 200];
    const C: [u8; 3] = [195, 195, 195];

    fn policy(sample_rate: f64, threshold: f64) -> SelectionPolicy {
        let gate = FrameGate::new(
            Sampler::new(10.0, sample_rate).unwrap(),
            Normalizer::new(1024),
            10.0,
        );
        SelectionPolicy::new(
            gate,
            PolicyConfig {
                threshold,
                epsilon: 0.001,
            },
        )
    }

    fn kept_indices(policy: &mut SelectionPolicy, colors: &[[u8; 3]]) -> Vec<u64> {
        colors
            .iter()
            .enumerate()
            .filter_map(|(i, &rgb)| match policy.offer(solid_frame(i as u64, 8, 8, rgb)) {
                Decision::Keep(frame) => Some(frame.index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_sample_always_kept() {
        let mut policy = policy(0.5, 0.03);
        assert_eq!(policy.phase(), Phase::Empty);
        assert!(matches!(
            policy.offer(solid_frame(0, 8, 8, A)),
            Decision::Keep(_)
        ));
        assert_eq!(policy.phase(), Phase::HasReference);
    }

    #[test]
    fn test_unsampled_frames_are_skipped() {
        let mut policy = policy(0.5, 0.03);
        policy.offer(solid_frame(0, 8, 8, A));
        for i in 1..5 {
            assert!(matches!(
                policy.offer(solid_frame(i, 8, 8, B)),
                Decision::Skip
            ));
        }
        // Frame 4 still differs from the reference, so finishing keeps it.
        assert_eq!(
            policy.finish().stats,
            PolicyStats {
                frames_seen: 5,
                samples: 1,
                kept: 2
            }
        );
    }

    #[test]
    fn test_below_threshold_discarded_without_moving_reference() {
        let mut policy = policy(0.1, 0.03);
        // Each step is ~0.02 from its neighbour but drift accumulates against the reference.
        let colors = [[0, 0, 0], [5, 5, 5], [10, 10, 10], [15, 15, 15]];
        let kept = kept_indices(&mut policy, &colors);
        assert_eq!(kept, vec![0, 2]);
    }

    #[test]
    fn test_final_unsampled_duplicate_not_repeated() {
        let mut policy = policy(0.5, 0.03);
        let kept = kept_indices(&mut policy, &[A, A, A, A, A, B, B, B, B, B]);
        assert_eq!(kept, vec![0, 5]);

        let finalized = policy.finish();
        assert!(finalized.trailing.is_none());
        assert_eq!(finalized.phase, Phase::Done);
        assert_eq!(finalized.stats.kept, 2);
    }

    #[test]
    fn test_subtle_final_change_is_force_saved() {
        let mut policy = policy(0.5, 0.03);
        let kept = kept_indices(&mut policy, &[A, A, A, A, A, B, B, B, B, C]);
        assert_eq!(kept, vec![0, 5]);

        let finalized = policy.finish();
        let trailing = finalized.trailing.expect("final frame should be kept");
        assert_eq!(trailing.index, 9);
        assert!((trailing.timestamp - 0.9).abs() < 1e-12);
        assert_eq!(trailing.image.get_pixel(0, 0).0, C);
        assert_eq!(finalized.stats.kept, 3);
    }

    #[test]
    fn test_discarded_final_sample_is_reconsidered() {
        // Interval of one frame: the last frame is sampled, discarded, then force-saved.
        let mut policy = policy(0.1, 0.03);
        let kept = kept_indices(&mut policy, &[B, B, C]);
        assert_eq!(kept, vec![0]);
        assert_eq!(policy.finish().trailing.map(|f| f.index), Some(2));
    }

    #[test]
    fn test_kept_final_frame_not_emitted_twice() {
        let mut policy = policy(0.1, 0.03);
        let kept = kept_indices(&mut policy, &[A, B]);
        assert_eq!(kept, vec![0, 1]);
        assert!(policy.finish().trailing.is_none());
    }

    #[test]
    fn test_single_frame_stream() {
        let mut policy = policy(0.5, 0.03);
        assert_eq!(kept_indices(&mut policy, &[A]), vec![0]);
        let finalized = policy.finish();
        assert!(finalized.trailing.is_none());
        assert_eq!(finalized.stats.kept, 1);
    }

    #[test]
    fn test_unreferenced_final_frame_kept_unconditionally() {
        let mut policy = policy(0.5, 0.03);
        // A stream whose indices never hit the sampling grid.
        policy.observe(Observation::Skipped(solid_frame(3, 8, 8, A)));
        assert_eq!(policy.phase(), Phase::Empty);
        let trailing = policy.finish().trailing.expect("final frame kept");
        assert_eq!(trailing.index, 3);
    }

    #[test]
    fn test_empty_stream_keeps_nothing() {
        let finalized = policy(0.5, 0.03).finish();
        assert!(finalized.trailing.is_none());
        assert_eq!(finalized.stats, PolicyStats::default());
    }
}
