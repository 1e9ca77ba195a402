use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keys used in [`SharePayload::extras`]. Values are always strings, numbers included.
pub mod keys {
    pub const SUBJECT: &str = "subject";
    pub const TITLE: &str = "title";
    pub const TEXT: &str = "text";
    pub const URL: &str = "url";
    pub const FILE_COUNT: &str = "fileCount";
    pub const FILE_NAME: &str = "fileName";
    pub const FILE_SIZE: &str = "fileSize";
    pub const MIME_TYPE: &str = "mimeType";
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const DURATION: &str = "duration";
    pub const CONTENT_URI: &str = "contentUri";
    pub const FILE_PATH: &str = "filePath";
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareType {
    Text,
    File,
    Multiple,
}

/// A single share event, normalized for delivery to application code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePayload {
    #[serde(rename = "type")]
    pub share_type: ShareType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<BTreeMap<String, String>>,
}

impl SharePayload {
    pub fn text(text: impl Into<String>, extras: BTreeMap<String, String>) -> Self {
        Self {
            share_type: ShareType::Text,
            text: Some(text.into()),
            files: None,
            extras: Some(extras),
        }
    }

    /// Build a file share. One file gives `File`, anything else `Multiple`,
    /// unless `force_multiple` is set (Android `SEND_MULTIPLE` with a single stream).
    pub fn files(files: Vec<String>, extras: BTreeMap<String, String>, force_multiple: bool) -> Self {
        let share_type = if files.len() == 1 && !force_multiple {
            ShareType::File
        } else {
            ShareType::Multiple
        };
        Self {
            share_type,
            text: None,
            files: Some(files),
            extras: Some(extras),
        }
    }

    /// The neutral payload handed out when nothing has been shared yet.
    pub fn empty_text() -> Self {
        Self {
            share_type: ShareType::Text,
            text: None,
            files: None,
            extras: None,
        }
    }

    /// True for the neutral empty text payload, which carries no content at all.
    pub fn is_placeholder(&self) -> bool {
        self.share_type == ShareType::Text
            && self.text.as_deref().map_or(true, str::is_empty)
            && self.files.as_ref().map_or(true, Vec::is_empty)
            && self.extras.is_none()
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.as_ref()?.get(key).map(String::as_str)
    }

    pub fn is_text_share(&self) -> bool {
        self.share_type == ShareType::Text && self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn is_file_share(&self) -> bool {
        matches!(self.share_type, ShareType::File | ShareType::Multiple)
            && self.files.as_ref().is_some_and(|f| !f.is_empty())
    }

    pub fn is_multiple_file_share(&self) -> bool {
        self.share_type == ShareType::Multiple && self.files.as_ref().is_some_and(|f| f.len() > 1)
    }

    pub fn subject(&self) -> Option<&str> {
        self.extra(keys::SUBJECT)
    }

    /// Free text that accompanied a file share.
    pub fn additional_text(&self) -> Option<&str> {
        self.extra(keys::TEXT)
    }
}

impl fmt::Display for SharePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.share_type {
            ShareType::Text => write!(f, "Text: {}", self.text.as_deref().unwrap_or_default()),
            ShareType::File => write!(
                f,
                "File: {}",
                self.files
                    .as_ref()
                    .and_then(|files| files.first())
                    .map_or("Unknown", String::as_str)
            ),
            ShareType::Multiple => write!(
                f,
                "Files: {} items",
                self.files.as_ref().map_or(0, Vec::len)
            ),
        }
    }
}

/// Lowercased extension of the first `.ext` segment that ends the path,
/// a query (`?`) or a fragment (`#`).
pub fn file_extension(uri: &str) -> Option<String> {
    for (idx, ch) in uri.char_indices() {
        if ch != '.' {
            continue;
        }
        let rest = &uri[idx + 1..];
        let end = rest.find(['.', '/', '?', '#']).unwrap_or(rest.len());
        if end == 0 {
            continue;
        }
        match rest[end..].chars().next() {
            None | Some('?') | Some('#') => return Some(rest[..end].to_lowercase()),
            _ => continue,
        }
    }
    None
}

pub fn is_image_file(uri: &str) -> bool {
    file_extension(uri).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_video_file(uri: &str) -> bool {
    file_extension(uri).is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}
