use crossbeam::channel::bounded;
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

use crate::media::{DecodeError, FrameSource};

use super::encoder::{JpegWriter, KeyframeRecord};
use super::normalize::{FrameGate, NormalizedFrame, Normalizer, Observation};
use super::policy::{Decision, Finalized, PolicyConfig, PolicyStats, SelectionPolicy};
use super::sampler::Sampler;
use super::ExtractError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    /// Seconds between sampled frames.
    pub sample_rate: f64,
    pub max_width: u32,
    pub policy: PolicyConfig,
    /// Depth of each stage queue in pipelined mode.
    pub channel_capacity: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            sample_rate: 0.5,
            max_width: 1024,
            policy: PolicyConfig::default(),
            channel_capacity: 4,
        }
    }
}

/// Outcome of one extraction run.
#[derive(Debug)]
pub struct Extraction {
    pub fps: f64,
    pub frame_interval: u64,
    pub frames_decoded: u64,
    pub samples: u64,
    /// Artifacts in strictly increasing timestamp order.
    pub keyframes: Vec<KeyframeRecord>,
    /// Set when decoding stopped before the end of the stream.
    pub decode_error: Option<DecodeError>,
}

impl Extraction {
    pub fn is_partial(&self) -> bool {
        self.decode_error.is_some()
    }
}

fn gate_for(fps: f64, options: &ExtractOptions) -> Result<FrameGate, ExtractError> {
    let sampler = Sampler::new(fps, options.sample_rate)?;
    debug!(
        fps,
        sample_rate = options.sample_rate,
        frame_interval = sampler.frame_interval(),
        "sampling grid"
    );
    Ok(FrameGate::new(sampler, Normalizer::new(options.max_width), fps))
}

/// Decodes, selects and encodes on the calling thread.
pub fn run<S: FrameSource>(
    source: &mut S,
    writer: &mut JpegWriter,
    options: &ExtractOptions,
    progress: &ProgressBar,
) -> Result<Extraction, ExtractError> {
    let gate = gate_for(source.frame_rate(), options)?;
    let mut policy = SelectionPolicy::new(gate, options.policy);
    let mut keyframes = Vec::new();
    let mut decode_error = None;

    loop {
        match source.next_frame() {
            Ok(Some(raw)) => {
                progress.inc(1);
                if let Decision::Keep(frame) = policy.offer(raw) {
                    keyframes.push(writer.encode(&frame)?);
                }
            }
            Ok(None) => break,
            Err(e) => {
                decode_error = Some(e);
                break;
            }
        }
    }

    let Finalized {
        trailing,
        stats,
        phase,
    } = policy.finish();
    debug!(?phase, kept = stats.kept, "selection finished");
    if let Some(frame) = trailing {
        keyframes.push(writer.encode(&frame)?);
    }

    conclude(gate, stats, keyframes, decode_error)
}

enum DecodeEvent {
    Frame(Observation),
    Failed(DecodeError),
}

/// Same result as [`run`], with decoding and encoding on their own threads.
///
/// Decode and classification run ahead of selection through a bounded queue;
/// kept frames are handed to the encoder thread in selection order, so artifact
/// order is unchanged. The first encoding failure stops all three stages.
pub fn run_pipelined<S: FrameSource + Send>(
    source: &mut S,
    writer: &mut JpegWriter,
    options: &ExtractOptions,
    progress: &ProgressBar,
) -> Result<Extraction, ExtractError> {
    let gate = gate_for(source.frame_rate(), options)?;
    let capacity = options.channel_capacity.max(1);
    let (frame_tx, frame_rx) = bounded::<DecodeEvent>(capacity);
    let (keep_tx, keep_rx) = bounded::<NormalizedFrame>(capacity);

    let (stats, decode_error, encoded) = crossbeam::scope(|s| {
        let decoder = s.spawn(move |_| loop {
            let event = match source.next_frame() {
                Ok(Some(raw)) => DecodeEvent::Frame(gate.classify(raw)),
                Ok(None) => break,
                Err(e) => DecodeEvent::Failed(e),
            };
            let failed = matches!(event, DecodeEvent::Failed(_));
            if frame_tx.send(event).is_err() || failed {
                break;
            }
        });

        let encoder = s.spawn(move |_| {
            keep_rx
                .iter()
                .map(|frame| writer.encode(&frame))
                .collect::<Result<Vec<_>, _>>()
        });

        let mut policy = SelectionPolicy::new(gate, options.policy);
        let mut decode_error = None;
        for event in frame_rx.iter() {
            match event {
                DecodeEvent::Frame(observation) => {
                    progress.inc(1);
                    if let Decision::Keep(frame) = policy.observe(observation) {
                        if keep_tx.send(frame).is_err() {
                            debug!("encoder stopped, abandoning selection");
                            break;
                        }
                    }
                }
                DecodeEvent::Failed(e) => {
                    decode_error = Some(e);
                    break;
                }
            }
        }
        drop(frame_rx);

        let Finalized {
            trailing,
            stats,
            phase,
        } = policy.finish();
        debug!(?phase, kept = stats.kept, "selection finished");
        if let Some(frame) = trailing {
            let _ = keep_tx.send(frame);
        }
        drop(keep_tx);

        decoder
            .join()
            .unwrap_or_else(|e| std::panic::resume_unwind(e));
        let encoded = encoder
            .join()
            .unwrap_or_else(|e| std::panic::resume_unwind(e));
        (stats, decode_error, encoded)
    })
    .unwrap_or_else(|e| std::panic::resume_unwind(e));

    conclude(gate, stats, encoded?, decode_error)
}

fn conclude(
    gate: FrameGate,
    stats: PolicyStats,
    keyframes: Vec<KeyframeRecord>,
    decode_error: Option<DecodeError>,
) -> Result<Extraction, ExtractError> {
    if stats.frames_seen == 0 {
        return Err(match decode_error {
            Some(e) => ExtractError::Unreadable(e),
            None => ExtractError::NoFrames,
        });
    }

    if let Some(e) = &decode_error {
        warn!(
            error = %e,
            frames = stats.frames_seen,
            keyframes = keyframes.len(),
            "decoding stopped early, keeping partial result"
        );
    }
    info!(
        frames = stats.frames_seen,
        samples = stats.samples,
        keyframes = keyframes.len(),
        "extraction finished"
    );

    Ok(Extraction {
        fps: gate.fps,
        frame_interval: gate.sampler.frame_interval(),
        frames_decoded: stats.frames_seen,
        samples: stats.samples,
        keyframes,
        decode_error,
    })
}
