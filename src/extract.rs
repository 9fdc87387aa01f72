use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::info;

use crate::ingest::{hasher, scanner};
use crate::keyframe::encoder::remove_stale_artifacts;
use crate::keyframe::pipeline::{run, run_pipelined};
use crate::keyframe::{ExtractError, JpegWriter, Manifest};
use crate::media::ffmpeg::FfmpegSource;
use crate::media::{mimetype, FrameSource};
use crate::utils::config::Settings;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunFlags {
    /// Decode and encode on their own threads.
    pub pipelined: bool,
    /// Remove earlier keyframes from the output directory first.
    pub clean: bool,
    pub progress: bool,
}

fn progress_bar(enabled: bool, frames: Option<u64>) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    match frames {
        Some(total) => {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} frames",
            ) {
                bar.set_style(style);
            }
            bar
        }
        None => {
            let spinner = ProgressBar::new_spinner();
            spinner.enable_steady_tick(Duration::from_millis(120));
            spinner
        }
    }
}

/// True when the input itself was rejected; running again on it cannot succeed.
pub fn is_invalid_input(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ExtractError>()
        .map_or(false, ExtractError::is_validation)
}

/// Extracts keyframes from one video into `out_dir` and writes its manifest.
pub fn extract_one(input: &Path, out_dir: &Path, settings: &Settings, flags: RunFlags) -> Result<Manifest> {
    let mime = mimetype::ensure_video(input)?;
    info!(input = %input.display(), mime, "extracting keyframes");

    if flags.clean {
        remove_stale_artifacts(out_dir)
            .with_context(|| format!("Failed to clean output directory: {:?}", out_dir))?;
    }
    let mut writer = JpegWriter::create(out_dir, settings.jpeg_quality)?;
    let mut source = FfmpegSource::open(input).map_err(ExtractError::Unreadable)?;

    let progress = progress_bar(flags.progress, source.frame_count_hint());
    let options = settings.extract_options();
    let extraction = if flags.pipelined {
        run_pipelined(&mut source, &mut writer, &options, &progress)
    } else {
        run(&mut source, &mut writer, &options, &progress)
    };
    progress.finish_and_clear();
    let extraction = extraction?;

    let digest = hasher::digest_file(input)
        .with_context(|| format!("Failed to hash source video: {:?}", input))?;
    let manifest = Manifest::from_extraction(input, digest, &extraction);
    let manifest_path = manifest.write(writer.out_dir())?;
    info!(manifest = %manifest_path.display(), keyframes = manifest.keyframes.len(), "manifest written");

    Ok(manifest)
}

/// Where a video found under `root` gets its own keyframes.
///
/// The full relative path, extension included, names the directory: two
/// videos in one folder can share a stem but never a file name.
pub fn batch_output_dir(root: &Path, out_dir: &Path, video: &Path) -> PathBuf {
    match video.strip_prefix(root) {
        Ok(relative) if relative.file_name().is_some() => out_dir.join(relative),
        _ => out_dir.join(video.file_name().unwrap_or(OsStr::new("video"))),
    }
}

/// Extracts every video below `root` in parallel. Outcomes keep the scan order.
pub fn extract_batch(
    root: &Path,
    out_dir: &Path,
    settings: &Settings,
    flags: RunFlags,
) -> Result<Vec<(PathBuf, Result<Manifest>)>> {
    let videos = scanner::find_videos(root)
        .with_context(|| format!("Failed to scan {:?}", root))?;
    if videos.is_empty() {
        bail!("no videos found under {:?}", root);
    }
    info!(videos = videos.len(), root = %root.display(), "batch extraction");

    // Interleaved progress bars from parallel runs are unreadable.
    let flags = RunFlags {
        progress: false,
        ..flags
    };
    let outcomes = videos
        .par_iter()
        .map(|video| {
            let dir = batch_output_dir(root, out_dir, video);
            (video.clone(), extract_one(video, &dir, settings, flags))
        })
        .collect();
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;
    use std::fs;

    #[test]
    fn test_batch_output_dir_mirrors_layout() {
        let root = Path::new("/recordings");
        let out = Path::new("frames");
        assert_eq!(
            batch_output_dir(root, out, Path::new("/recordings/login.mp4")),
            PathBuf::from("frames/login.mp4")
        );
        assert_eq!(
            batch_output_dir(root, out, Path::new("/recordings/monday/checkout.mov")),
            PathBuf::from("frames/monday/checkout.mov")
        );
    }

    #[test]
    fn test_batch_output_dirs_are_distinct_for_shared_stems() {
        let root = Path::new("/recordings");
        let out = Path::new("frames");
        let videos = ["demo.mp4", "demo.mov", "demo.webm", "day2/demo.mp4"];
        let dirs: std::collections::HashSet<PathBuf> = videos
            .iter()
            .map(|v| batch_output_dir(root, out, &root.join(v)))
            .collect();
        assert_eq!(dirs.len(), videos.len());
    }

    #[test]
    fn test_extract_one_validates_input_first() {
        let dir = scratch_dir("extract-validate");
        let out = dir.join("frames");
        let notes = dir.join("notes.txt");
        fs::write(&notes, "not a video").unwrap();

        for input in [dir.join("missing.mp4"), notes] {
            let err = extract_one(&input, &out, &Settings::default(), RunFlags::default())
                .unwrap_err();
            assert!(is_invalid_input(&err), "{err:#} should be an input error");
        }
        // Nothing is created for a rejected input.
        assert!(!out.exists());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_output_failures_are_not_input_errors() {
        let write_failure = anyhow::Error::new(ExtractError::Write {
            path: PathBuf::from("frames/frame_0.00.jpg"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        });
        assert!(!is_invalid_input(&write_failure));
        assert!(is_invalid_input(&anyhow::Error::new(ExtractError::NoFrames)));
        assert!(!is_invalid_input(&anyhow::anyhow!("manifest could not be written")));
    }

    #[test]
    fn test_batch_without_videos_fails() {
        let dir = scratch_dir("extract-batch-empty");
        fs::write(dir.join("readme.txt"), "no recordings here").unwrap();
        assert!(extract_batch(&dir, &dir.join("out"), &Settings::default(), RunFlags::default())
            .is_err());
        fs::remove_dir_all(dir).unwrap();
    }
}
