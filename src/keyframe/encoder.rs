use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::ingest::hasher;

use super::normalize::NormalizedFrame;
use super::ExtractError;

const ARTIFACT_PREFIX: &str = "frame_";
const ARTIFACT_EXT: &str = ".jpg";

/// One persisted keyframe, in the order the cognitive service must see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyframeRecord {
    pub timestamp: f64,
    pub frame_index: u64,
    pub path: PathBuf,
    pub sha256: String,
}

pub fn artifact_name(timestamp: f64) -> String {
    format!("{ARTIFACT_PREFIX}{timestamp:.2}{ARTIFACT_EXT}")
}

/// Writes kept frames as JPEG files into one output directory.
pub struct JpegWriter {
    out_dir: PathBuf,
    quality: u8,
    issued: HashSet<String>,
}

impl JpegWriter {
    pub fn create(out_dir: &Path, quality: u8) -> Result<Self, ExtractError> {
        fs::create_dir_all(out_dir).map_err(|source| ExtractError::Write {
            path: out_dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            quality: quality.clamp(1, 100),
            issued: HashSet::new(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Kept frames that round to an already issued hundredth of a second also
    /// carry their frame index, which is unique within a run.
    fn next_name(&mut self, frame: &NormalizedFrame) -> String {
        let mut name = artifact_name(frame.timestamp);
        if self.issued.contains(&name) {
            name = format!(
                "{ARTIFACT_PREFIX}{:.2}_{}{ARTIFACT_EXT}",
                frame.timestamp, frame.index
            );
        }
        self.issued.insert(name.clone());
        name
    }

    pub fn encode(&mut self, frame: &NormalizedFrame) -> Result<KeyframeRecord, ExtractError> {
        let name = self.next_name(frame);
        let path = self.out_dir.join(name);

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality)
            .encode_image(&frame.image)
            .map_err(|source| ExtractError::Encode {
                path: path.clone(),
                source,
            })?;

        fs::write(&path, &bytes).map_err(|source| ExtractError::Write {
            path: path.clone(),
            source,
        })?;

        debug!(
            index = frame.index,
            timestamp = frame.timestamp,
            bytes = bytes.len(),
            path = %path.display(),
            "keyframe written"
        );

        Ok(KeyframeRecord {
            timestamp: frame.timestamp,
            frame_index: frame.index,
            path,
            sha256: hasher::digest_bytes(&bytes),
        })
    }
}

/// Deletes keyframe artifacts left directly inside `dir` by an earlier run.
pub fn remove_stale_artifacts(dir: &Path) -> io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let is_artifact = entry.file_type().is_file()
            && entry
                .file_name()
                .to_str()
                .map(|name| name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_EXT))
                .unwrap_or(false);
        if is_artifact {
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "removed stale keyframes");
    }
    Ok(removed)
}
