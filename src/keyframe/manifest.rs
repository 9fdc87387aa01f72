use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::encoder::KeyframeRecord;
use super::pipeline::Extraction;

pub const MANIFEST_FILE: &str = "keyframes.json";

/// Hand-off document describing one extraction run and its ordered keyframes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub source: PathBuf,
    pub source_sha256: String,
    pub fps: f64,
    pub frame_interval: u64,
    pub frames_decoded: u64,
    pub samples: u64,
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    pub keyframes: Vec<KeyframeRecord>,
}

impl Manifest {
    pub fn from_extraction(source: &Path, source_sha256: String, extraction: &Extraction) -> Self {
        Self {
            source: source.to_path_buf(),
            source_sha256,
            fps: extraction.fps,
            frame_interval: extraction.frame_interval,
            frames_decoded: extraction.frames_decoded,
            samples: extraction.samples,
            partial: extraction.is_partial(),
            decode_error: extraction.decode_error.as_ref().map(|e| e.to_string()),
            keyframes: extraction.keyframes.clone(),
        }
    }

    /// Writes `keyframes.json` into `dir` and returns its path.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write manifest: {:?}", path))?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {:?}", path))?;
        serde_json::from_str(&text).with_context(|| format!("Malformed manifest: {:?}", path))
    }
}
