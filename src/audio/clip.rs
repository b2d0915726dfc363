// Clip payloads and the download escape hatch

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::prelude::*;
use tracing::info;

use crate::error::{DecodeError, Result};

/// One encoded utterance as delivered by the speech service (base64 text).
/// Cheap to clone, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    encoded: Arc<str>,
}

impl AudioClip {
    /// Wrap base64 text. Surrounding whitespace is ignored.
    pub fn from_base64(text: impl AsRef<str>) -> Self {
        Self {
            encoded: Arc::from(text.as_ref().trim()),
        }
    }

    /// Wrap raw encoded audio bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            encoded: Arc::from(BASE64_STANDARD.encode(bytes)),
        }
    }

    pub fn as_base64(&self) -> &str {
        &self.encoded
    }

    /// The encoded audio bytes
    pub fn bytes(&self) -> std::result::Result<Vec<u8>, DecodeError> {
        BASE64_STANDARD
            .decode(self.encoded.as_bytes())
            .map_err(|e| DecodeError::InvalidBase64(e.to_string()))
    }
}

/// Container families we can recognise from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Mp3,
    Wav,
    Ogg,
    Flac,
    Mp4,
}

impl ContainerKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::Mp3 => "mp3",
            ContainerKind::Wav => "wav",
            ContainerKind::Ogg => "ogg",
            ContainerKind::Flac => "flac",
            ContainerKind::Mp4 => "m4a",
        }
    }
}

/// Guess the container from the first bytes of a payload
pub fn sniff_container(bytes: &[u8]) -> Option<ContainerKind> {
    match bytes {
        [b'I', b'D', b'3', ..] => Some(ContainerKind::Mp3),
        [0xFF, second, ..] if second & 0xE0 == 0xE0 => Some(ContainerKind::Mp3),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some(ContainerKind::Wav),
        [b'O', b'g', b'g', b'S', ..] => Some(ContainerKind::Ogg),
        [b'f', b'L', b'a', b'C', ..] => Some(ContainerKind::Flac),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some(ContainerKind::Mp4),
        _ => None,
    }
}

/// Timestamped file name for a downloaded clip, e.g. `neonvoice-1718000000000.mp3`
pub fn default_download_name(prefix: &str, clip: &AudioClip) -> String {
    let extension = clip
        .bytes()
        .ok()
        .and_then(|bytes| sniff_container(&bytes))
        .unwrap_or(ContainerKind::Mp3)
        .extension();
    format!(
        "{}-{}.{}",
        prefix,
        chrono::Utc::now().timestamp_millis(),
        extension
    )
}

/// Write the original encoded payload to `dir/filename`
pub fn download_clip(clip: &AudioClip, dir: &Path, filename: &str) -> Result<PathBuf> {
    let bytes = clip.bytes()?;
    fs::create_dir_all(dir)?;

    let path = dir.join(filename);
    fs::write(&path, &bytes)?;

    info!("Saved clip ({} bytes) to {:?}", bytes.len(), path);
    Ok(path)
}
