use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use memmap2::MmapOptions;
use sha2::{Digest, Sha256};

const MMAP_THRESHOLD: u64 = 256 * 1024 * 1024; // 256 MB

/// SHA-256 of a file on disk, hex encoded.
///
/// Long screen recordings are mapped instead of streamed through a buffer.
pub fn digest_file(path: &Path) -> io::Result<String> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut hasher = Sha256::new();
    if len > MMAP_THRESHOLD {
        // The source video is opened read-only for the duration of the run; a
        // concurrent truncation by another process is outside what we guard against.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        hasher.update(&mmap[..]);
    } else {
        io::copy(&mut BufReader::new(file), &mut hasher)?;
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
