//! Media metadata for shared images and videos.
//!
//! Images are measured from their header only; pixel data is never decoded.
//! Videos are read through a [`VideoMetadataReader`], by default the
//! built-in [`Mp4MetadataReader`]. Probing never fails outward: errors are
//! logged and whatever was learned so far is returned.

pub mod mp4;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{Result, ShareBridgeError};
use crate::models::keys;

pub use mp4::Mp4MetadataReader;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
}

impl MediaMetadata {
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.duration_ms.is_none()
    }

    /// Write the known fields as decimal strings; unknown fields stay absent.
    pub fn write_extras(&self, extras: &mut BTreeMap<String, String>) {
        if let Some(width) = self.width {
            extras.insert(keys::WIDTH.to_string(), width.to_string());
        }
        if let Some(height) = self.height {
            extras.insert(keys::HEIGHT.to_string(), height.to_string());
        }
        if let Some(duration) = self.duration_ms {
            extras.insert(keys::DURATION.to_string(), duration.to_string());
        }
    }
}

/// Natural (unrotated) properties of the first video track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoTrackInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Clockwise display rotation in degrees: 0, 90, 180 or 270.
    pub rotation: u32,
    pub duration_ms: Option<u64>,
}

impl VideoTrackInfo {
    /// Display dimensions: width and height swap for quarter-turn rotations.
    pub fn into_metadata(self) -> MediaMetadata {
        let (width, height) = match self.rotation % 360 {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        };
        MediaMetadata {
            width,
            height,
            duration_ms: self.duration_ms,
        }
    }
}

/// Reads video asset metadata. Called on a blocking thread.
pub trait VideoMetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<VideoTrackInfo>;
}

#[derive(Clone)]
pub struct MetadataProber {
    video: Arc<dyn VideoMetadataReader>,
}

impl MetadataProber {
    pub fn new(video: Arc<dyn VideoMetadataReader>) -> Self {
        Self { video }
    }

    pub async fn probe(&self, path: &Path, mime: &str) -> MediaMetadata {
        if mime.starts_with("image/") {
            let owned = path.to_path_buf();
            match run_blocking(move || image_dimensions(&owned)).await {
                Ok((width, height)) => MediaMetadata {
                    width: Some(width),
                    height: Some(height),
                    duration_ms: None,
                },
                Err(e) => {
                    error!("Cannot retrieve image metadata for {}: {}", path.display(), e);
                    MediaMetadata::default()
                }
            }
        } else if mime.starts_with("video/") {
            let owned = path.to_path_buf();
            let reader = Arc::clone(&self.video);
            match run_blocking(move || reader.read(&owned)).await {
                Ok(info) => info.into_metadata(),
                Err(e) => {
                    error!("Cannot retrieve video metadata for {}: {}", path.display(), e);
                    MediaMetadata::default()
                }
            }
        } else {
            debug!("No metadata probe for {} ({})", path.display(), mime);
            MediaMetadata::default()
        }
    }
}

impl Default for MetadataProber {
    fn default() -> Self {
        Self::new(Arc::new(Mp4MetadataReader))
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ShareBridgeError::Probe(format!("probe task failed: {}", e)))?
}

fn image_dimensions(path: &Path) -> Result<(u32, u32)> {
    let reader = image::ImageReader::open(path)?.with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}
