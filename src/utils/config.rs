use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

use crate::keyframe::pipeline::ExtractOptions;
use crate::keyframe::policy::PolicyConfig;

pub const CONFIG_ENV_VAR: &str = "KEYFRAMER_CONFIG";
const DEFAULT_SETTINGS_FILE: &str = ".env";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{key}: cannot parse {value:?}")]
    Malformed { key: String, value: String },
    #[error("{key}: {value} is out of range, expected {expected}")]
    OutOfRange {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Extraction tunables, layered as defaults < settings file < command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Seconds between sampled frames.
    pub sample_rate: f64,
    pub threshold: f64,
    pub epsilon: f64,
    pub max_width: u32,
    pub jpeg_quality: u8,
    pub output_dir: PathBuf,
    pub channel_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let options = ExtractOptions::default();
        Self {
            sample_rate: options.sample_rate,
            threshold: options.policy.threshold,
            epsilon: options.policy.epsilon,
            max_width: options.max_width,
            jpeg_quality: 80,
            output_dir: PathBuf::from("temp_frames"),
            channel_capacity: options.channel_capacity,
        }
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, SettingsError> {
    value.parse().map_err(|_| SettingsError::Malformed {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl Settings {
    /// Defaults, overlaid with the settings file if one can be located.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SettingsError> {
        match locate_settings(explicit) {
            Some(path) => {
                let settings = load_from_env(&path)?;
                info!(path = %path.display(), "loaded settings");
                Ok(settings)
            }
            None => {
                debug!("no settings file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Applies one `KEY=VALUE` entry. Returns false for keys this tool does not use.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<bool, SettingsError> {
        match key {
            "FRAME_SAMPLE_RATE" => self.sample_rate = parse(key, value)?,
            "MIN_SCENE_CHANGE_THRESHOLD" => self.threshold = parse(key, value)?,
            "FORCE_SAVE_EPSILON" => self.epsilon = parse(key, value)?,
            "MAX_FRAME_WIDTH" => self.max_width = parse(key, value)?,
            "JPEG_QUALITY" => self.jpeg_quality = parse(key, value)?,
            "OUTPUT_DIR" => self.output_dir = PathBuf::from(value),
            "CHANNEL_CAPACITY" => self.channel_capacity = parse(key, value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        fn out_of_range(
            key: &'static str,
            value: impl ToString,
            expected: &'static str,
        ) -> SettingsError {
            SettingsError::OutOfRange {
                key,
                value: value.to_string(),
                expected,
            }
        }

        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(out_of_range("FRAME_SAMPLE_RATE", self.sample_rate, "a positive number of seconds"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(out_of_range("MIN_SCENE_CHANGE_THRESHOLD", self.threshold, "0.0 to 1.0"));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(out_of_range("FORCE_SAVE_EPSILON", self.epsilon, "0.0 to 1.0"));
        }
        if self.max_width == 0 {
            return Err(out_of_range("MAX_FRAME_WIDTH", self.max_width, "at least 1"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(out_of_range("JPEG_QUALITY", self.jpeg_quality, "1 to 100"));
        }
        if self.channel_capacity == 0 {
            return Err(out_of_range("CHANNEL_CAPACITY", self.channel_capacity, "at least 1"));
        }
        Ok(())
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            sample_rate: self.sample_rate,
            max_width: self.max_width,
            policy: PolicyConfig {
                threshold: self.threshold,
                epsilon: self.epsilon,
            },
            channel_capacity: self.channel_capacity,
        }
    }
}

/// `--config` wins, then `$KEYFRAMER_CONFIG`, then `./.env` when present.
pub fn locate_settings(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }
    let fallback = Path::new(DEFAULT_SETTINGS_FILE);
    fallback.is_file().then(|| fallback.to_path_buf())
}

pub fn load_from_env(path: &Path) -> Result<Settings, SettingsError> {
    let io_error = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io_error)?);

    let mut settings = Settings::default();
    for line in reader.lines() {
        let line = line.map_err(io_error)?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let (key, value) = (key.trim(), value.trim());
            if !settings.apply(key, value)? {
                debug!(key, "ignoring unknown setting");
            }
        }
    }

    settings.validate()?;
    Ok(settings)
}

pub fn save_to_env(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    let io_error = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut file = File::create(path).map_err(io_error)?;
    let contents = format!(
        "# keyframer settings\n\
         FRAME_SAMPLE_RATE={}\n\
         MIN_SCENE_CHANGE_THRESHOLD={}\n\
         FORCE_SAVE_EPSILON={}\n\
         MAX_FRAME_WIDTH={}\n\
         JPEG_QUALITY={}\n\
         OUTPUT_DIR={}\n\
         CHANNEL_CAPACITY={}\n",
        settings.sample_rate,
        settings.threshold,
        settings.epsilon,
        settings.max_width,
        settings.jpeg_quality,
        settings.output_dir.display(),
        settings.channel_capacity,
    );
    file.write_all(contents.as_bytes()).map_err(io_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn test_save_and_load_env() -> anyhow::Result<()> {
        let dir = scratch_dir("config-roundtrip");
        let path = dir.join("keyframer.env");
        let settings = Settings {
            sample_rate: 1.5,
            threshold: 0.05,
            epsilon: 0.002,
            max_width: 640,
            jpeg_quality: 90,
            output_dir: PathBuf::from("/tmp/frames"),
            channel_capacity: 8,
        };

        save_to_env(&path, &settings)?;

        let content = fs::read_to_string(&path)?;
        assert!(content.contains("FRAME_SAMPLE_RATE=1.5"));
        assert!(content.contains("OUTPUT_DIR=/tmp/frames"));

        let loaded = load_from_env(&path)?;
        assert_eq!(loaded, settings);

        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> anyhow::Result<()> {
        let dir = scratch_dir("config-partial");
        let path = dir.join(".env");
        fs::write(
            &path,
            "# only tune the threshold\nMIN_SCENE_CHANGE_THRESHOLD = 0.03\nGEMINI_API_KEY=unused\n",
        )?;

        let loaded = load_from_env(&path)?;
        assert_eq!(loaded.threshold, 0.03);
        assert_eq!(
            loaded,
            Settings {
                threshold: 0.03,
                ..Settings::default()
            }
        );

        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_malformed_and_out_of_range_values() {
        let dir = scratch_dir("config-invalid");
        let path = dir.join(".env");

        fs::write(&path, "MAX_FRAME_WIDTH=wide\n").unwrap();
        match load_from_env(&path) {
            Err(SettingsError::Malformed { key, value }) => {
                assert_eq!(key, "MAX_FRAME_WIDTH");
                assert_eq!(value, "wide");
            }
            other => panic!("expected malformed value, got {other:?}"),
        }

        fs::write(&path, "JPEG_QUALITY=0\n").unwrap();
        assert!(matches!(
            load_from_env(&path),
            Err(SettingsError::OutOfRange {
                key: "JPEG_QUALITY",
                ..
            })
        ));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_validate_rejects_nonsense() {
        let bad = [
            Settings {
                sample_rate: 0.0,
                ..Settings::default()
            },
            Settings {
                threshold: 1.5,
                ..Settings::default()
            },
            Settings {
                epsilon: -0.1,
                ..Settings::default()
            },
            Settings {
                channel_capacity: 0,
                ..Settings::default()
            },
        ];
        for settings in bad {
            assert!(settings.validate().is_err(), "{settings:?} should be invalid");
        }
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = Path::new("/etc/keyframer.env");
        assert_eq!(locate_settings(Some(explicit)), Some(explicit.to_path_buf()));
    }

    #[test]
    fn test_extract_options_carry_settings() {
        let settings = Settings {
            threshold: 0.2,
            max_width: 320,
            ..Settings::default()
        };
        let options = settings.extract_options();
        assert_eq!(options.policy.threshold, 0.2);
        assert_eq!(options.policy.epsilon, 0.001);
        assert_eq!(options.max_width, 320);
        assert_eq!(options.sample_rate, 0.5);
    }
}
