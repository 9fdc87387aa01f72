use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{DecodeError, FrameSource, RawFrame};

/// Stream parameters reported by ffprobe for the first video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate as the rational string ffmpeg reported, e.g. `30000/1001`.
    pub rate: String,
    pub fps: f64,
    pub frame_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

pub fn probe(input_path: &Path) -> Result<StreamInfo, DecodeError> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,avg_frame_rate,r_frame_rate,nb_frames")
        .arg("-of")
        .arg("json")
        .arg(input_path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| DecodeError::Spawn {
            program: "ffprobe",
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DecodeError::Probe(stderr.trim().to_string()));
    }

    parse_probe(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe(json: &str) -> Result<StreamInfo, DecodeError> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).map_err(|e| DecodeError::Probe(e.to_string()))?;
    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or(DecodeError::NoVideoStream)?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(DecodeError::NoVideoStream),
    };

    // Variable-rate recordings report a timebase-like r_frame_rate; the average is the useful one.
    let (rate, fps) = [stream.avg_frame_rate, stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|rate| parse_rate(&rate).map(|fps| (rate, fps)))
        .ok_or_else(|| DecodeError::Probe("stream reports no usable frame rate".into()))?;

    Ok(StreamInfo {
        width,
        height,
        rate,
        fps,
        frame_count: stream.nb_frames.and_then(|n| n.parse().ok()),
    })
}

fn parse_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Reads fixed-size rgb24 frames from a byte stream.
pub struct RawVideoReader<R> {
    inner: R,
    width: u32,
    height: u32,
    next_index: u64,
}

impl<R: Read> RawVideoReader<R> {
    pub fn new(inner: R, width: u32, height: u32) -> Self {
        Self {
            inner,
            width,
            height,
            next_index: 0,
        }
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Returns `Ok(None)` only when the stream ends exactly on a frame boundary.
    pub fn read_frame(&mut self) -> Result<Option<RawFrame>, DecodeError> {
        let expected = self.frame_len();
        let mut buf = vec![0u8; expected];
        let mut filled = 0;

        while filled < expected {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < expected {
            return Err(DecodeError::Truncated {
                got: filled,
                expected,
            });
        }

        let image = RgbImage::from_raw(self.width, self.height, buf).ok_or(
            DecodeError::Truncated {
                got: filled,
                expected,
            },
        )?;
        let frame = RawFrame::new(self.next_index, image);
        self.next_index += 1;
        Ok(Some(frame))
    }
}

/// Decodes a video file by streaming raw frames out of an ffmpeg child process.
pub struct FfmpegSource {
    info: StreamInfo,
    child: Child,
    reader: RawVideoReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    finished: bool,
}

impl FfmpegSource {
    pub fn open(input_path: &Path) -> Result<Self, DecodeError> {
        let info = probe(input_path)?;
        info!(
            width = info.width,
            height = info.height,
            fps = info.fps,
            frames = info.frame_count,
            "probed video stream"
        );

        // `-r` on the output forces a constant rate so that index / fps is the true timestamp.
        let mut child = Command::new("ffmpeg")
            .arg("-v")
            .arg("error")
            .arg("-noautorotate")
            .arg("-i")
            .arg(input_path)
            .arg("-map")
            .arg("0:v:0")
            .arg("-r")
            .arg(&info.rate)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: "ffmpeg",
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DecodeError::Spawn {
            program: "ffmpeg",
            source: std::io::Error::new(ErrorKind::BrokenPipe, "stdout not captured"),
        })?;

        // Drained on its own thread so a chatty decoder can never block the frame pipe.
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        let reader = RawVideoReader::new(stdout, info.width, info.height);
        Ok(Self {
            info,
            child,
            reader,
            stderr,
            finished: false,
        })
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        self.finished = true;
        let status = self.child.wait()?;
        let stderr = self.collect_stderr();
        if status.success() {
            debug!("ffmpeg exited cleanly");
            Ok(())
        } else {
            Err(DecodeError::Exit { status, stderr })
        }
    }
}

impl FrameSource for FfmpegSource {
    fn frame_rate(&self) -> f64 {
        self.info.fps
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        match self.reader.read_frame() {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => self.finish().map(|()| None),
            Err(e) => {
                self.finished = true;
                let _ = self.child.kill();
                let _ = self.child.wait();
                let stderr = self.collect_stderr();
                if !stderr.is_empty() {
                    warn!(stderr = %stderr, "ffmpeg reported errors");
                }
                Err(e)
            }
        }
    }

    fn frame_count_hint(&self) -> Option<u64> {
        self.info.frame_count
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
