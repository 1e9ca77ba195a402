use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use futures::future::join_all;
use tracing::{debug, warn};
use url::Url;

use crate::event::ShareRequest;
use crate::mime::{mime_for_extension, OCTET_STREAM};
use crate::models::{file_extension, keys, SharePayload};
use crate::probe::{MediaMetadata, MetadataProber};
use crate::resolver::{ContentRef, ReferenceResolver, COLUMN_DISPLAY_NAME, COLUMN_SIZE};

/// What is known about one shared file. Unknown fields stay `None` and
/// never reach the payload as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub content_uri: Option<String>,
    pub file_path: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<String>,
    pub mime_type: Option<String>,
    pub metadata: MediaMetadata,
}

impl FileInfo {
    pub fn write_extras(&self, extras: &mut BTreeMap<String, String>) {
        let fields = [
            (keys::CONTENT_URI, &self.content_uri),
            (keys::FILE_PATH, &self.file_path),
            (keys::FILE_NAME, &self.file_name),
            (keys::FILE_SIZE, &self.file_size),
            (keys::MIME_TYPE, &self.mime_type),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                extras.insert(key.to_string(), value.clone());
            }
        }
        self.metadata.write_extras(extras);
    }
}

/// Turns classified share requests into payloads.
pub struct PayloadBuilder {
    resolver: ReferenceResolver,
    prober: MetadataProber,
}

impl PayloadBuilder {
    pub fn new(resolver: ReferenceResolver, prober: MetadataProber) -> Self {
        Self { resolver, prober }
    }

    pub async fn build(&self, request: ShareRequest) -> Option<SharePayload> {
        match request {
            ShareRequest::Text {
                text,
                subject,
                title,
                url,
            } => {
                let mut extras = BTreeMap::new();
                insert_opt(&mut extras, keys::SUBJECT, subject);
                insert_opt(&mut extras, keys::TITLE, title);
                insert_opt(&mut extras, keys::URL, url);
                Some(SharePayload::text(text, extras))
            }
            ShareRequest::File {
                reference,
                text,
                subject,
                staged,
            } => {
                let reference = if staged {
                    self.materialize_staged(reference).await
                } else {
                    reference
                };
                let info = self.describe(&reference).await;

                let mut extras = BTreeMap::new();
                info.write_extras(&mut extras);
                insert_opt(&mut extras, keys::TEXT, text);
                insert_opt(&mut extras, keys::SUBJECT, subject);

                let file = info.file_path.unwrap_or(reference);
                Some(SharePayload::files(vec![file], extras, false))
            }
            ShareRequest::Multiple {
                references,
                text,
                subject,
            } => {
                if references.is_empty() {
                    return None;
                }
                let resolved = join_all(references.iter().map(|r| self.resolver.resolve(r))).await;
                let files: Vec<String> = resolved
                    .iter()
                    .map(|r| r.best_effort().to_string())
                    .collect();

                let mut extras = BTreeMap::new();
                insert_opt(&mut extras, keys::TEXT, text);
                insert_opt(&mut extras, keys::SUBJECT, subject);
                extras.insert(keys::FILE_COUNT.to_string(), files.len().to_string());

                Some(SharePayload::files(files, extras, true))
            }
        }
    }

    /// Copy a staged inbox file into the cache so the delivered path outlives
    /// the staged copy. Falls back to the staged path on failure.
    async fn materialize_staged(&self, staged: String) -> String {
        match self.resolver.materialize_local(Path::new(&staged)).await {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                warn!("Cannot copy staged file {} into cache: {}", staged, e);
                staged
            }
        }
    }

    pub async fn describe(&self, raw: &str) -> FileInfo {
        match ContentRef::parse(raw) {
            ContentRef::Path(path) => self.describe_local(path).await,
            ContentRef::Uri(url) if url.scheme().eq_ignore_ascii_case("content") => {
                self.describe_content(raw, &url).await
            }
            _ => FileInfo {
                content_uri: Some(raw.to_string()),
                file_path: self.resolver.resolve(raw).await.path,
                ..Default::default()
            },
        }
    }

    async fn describe_local(&self, path: PathBuf) -> FileInfo {
        let file_size = match tokio::fs::metadata(&path).await {
            Ok(meta) => Some(meta.len().to_string()),
            Err(e) => {
                debug!("No file attributes for {}: {}", path.display(), e);
                None
            }
        };
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let path_str = path.to_string_lossy().into_owned();
        let mime = file_extension(&path_str)
            .and_then(|ext| mime_for_extension(&ext))
            .unwrap_or(OCTET_STREAM)
            .to_string();
        let metadata = self.prober.probe(&path, &mime).await;

        FileInfo {
            content_uri: None,
            file_path: Some(path_str),
            file_name,
            file_size,
            mime_type: Some(mime),
            metadata,
        }
    }

    async fn describe_content(&self, raw: &str, url: &Url) -> FileInfo {
        let registry = self.resolver.registry();

        let file_name = match registry.query(url, COLUMN_DISPLAY_NAME, None).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Content registry query failed for {}: {}", raw, e);
                return FileInfo {
                    content_uri: Some(raw.to_string()),
                    file_path: self.resolver.resolve(raw).await.path,
                    ..Default::default()
                };
            }
        };
        let file_size = registry.query(url, COLUMN_SIZE, None).await.ok().flatten();
        let mime = registry
            .mime_type(url)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| OCTET_STREAM.to_string());

        let file_path = self.resolver.resolve(raw).await.path;
        let metadata = match &file_path {
            Some(path) => self.prober.probe(Path::new(path), &mime).await,
            None => MediaMetadata::default(),
        };

        FileInfo {
            content_uri: Some(raw.to_string()),
            file_path,
            file_name,
            file_size,
            mime_type: Some(mime),
            metadata,
        }
    }
}

fn insert_opt(extras: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        extras.insert(key.to_string(), value);
    }
}
