use std::io;
use std::path::Path;

use crate::keyframe::ExtractError;
use crate::media::DecodeError;

const UNKNOWN_MIME: &str = "application/octet-stream";

pub fn detect_mimetype(path: &Path) -> io::Result<String> {
    let kind = infer::get_from_path(path)?;
    Ok(kind
        .map(|k| k.mime_type().to_string())
        .unwrap_or_else(|| UNKNOWN_MIME.to_string()))
}

pub fn is_video(mime: &str) -> bool {
    mime.starts_with("video/")
}

/// Rejects inputs that cannot be a video before any decoder is started.
pub fn ensure_video(path: &Path) -> Result<String, ExtractError> {
    if !path.is_file() {
        return Err(ExtractError::NotFound(path.to_path_buf()));
    }
    let mime = detect_mimetype(path).map_err(|e| ExtractError::Unreadable(DecodeError::Io(e)))?;
    if !is_video(&mime) {
        return Err(ExtractError::NotVideo {
            path: path.to_path_buf(),
            mime,
        });
    }
    Ok(mime)
}
