use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::media::mimetype;

/// All video files below `root`, in path order. Hidden files and directories are skipped.
///
/// Entries that cannot be read are logged and left out; only an unreadable
/// `root` is an error.
pub fn find_videos(root: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    let mut videos = Vec::new();
    for entry in walker.filter_entry(|e| !is_hidden(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(e).with_context(|| format!("Failed to read {:?}", root))
            }
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let mime = match mimetype::detect_mimetype(entry.path()) {
            Ok(mime) => mime,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        if mimetype::is_video(&mime) {
            videos.push(entry.into_path());
        } else {
            debug!(path = %entry.path().display(), mime, "skipping non-video file");
        }
    }
    Ok(videos)
}

fn is_hidden(entry: &DirEntry) -> bool {
    // The root itself may legitimately be "." or a dot-directory.
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;
    use std::fs;

    // Smallest header `infer` recognises as an MP4 container.
    const MP4_HEADER: &[u8] = b"\x00\x00\x00\x18ftypisom\x00\x00\x02\x00isomiso2";

    #[test]
    fn test_find_videos_filters_and_sorts() -> Result<()> {
        let dir = scratch_dir("scanner");
        fs::create_dir_all(dir.join("day2"))?;
        fs::create_dir_all(dir.join(".cache"))?;
        fs::write(dir.join("b.mp4"), MP4_HEADER)?;
        fs::write(dir.join("a.mp4"), MP4_HEADER)?;
        fs::write(dir.join("day2").join("c.mp4"), MP4_HEADER)?;
        fs::write(dir.join(".cache").join("hidden.mp4"), MP4_HEADER)?;
        fs::write(dir.join("notes.txt"), b"not a video at all")?;

        let found = find_videos(&dir)?;
        assert_eq!(
            found,
            vec![
                dir.join("a.mp4"),
                dir.join("b.mp4"),
                dir.join("day2").join("c.mp4"),
            ]
        );

        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_entries_do_not_stop_the_scan() -> Result<()> {
        let dir = scratch_dir("scanner-broken");
        fs::write(dir.join("a.mp4"), MP4_HEADER)?;
        std::os::unix::fs::symlink(dir.join("gone.mp4"), dir.join("dangling.mp4"))?;
        fs::write(dir.join("z.mp4"), MP4_HEADER)?;

        let found = find_videos(&dir)?;
        assert_eq!(found, vec![dir.join("a.mp4"), dir.join("z.mp4")]);

        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = scratch_dir("scanner-missing-root");
        assert!(find_videos(&dir.join("absent")).is_err());
        fs::remove_dir_all(dir).unwrap();
    }
}
