//! Maps opaque content references to concrete local file paths.
//!
//! Resolution is attempted in order:
//! 1. direct filesystem paths (and `file://` URLs) are returned unchanged;
//! 2. document URIs are routed by provider authority (external storage,
//!    downloads, media);
//! 3. other `content://` URIs are materialized into the cache directory;
//! 4. non-content URIs fall back to their raw path component.
//!
//! Content the registry cannot place stays unresolved, so callers keep the
//! original reference.
//!
//! Failures never escape [`ReferenceResolver::resolve`]: they are logged and
//! the resolved path is simply absent.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use percent_encoding::percent_decode_str;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, ShareBridgeError};
use crate::mime::{extension_for_mime, kind_prefix};

pub const COLUMN_DISPLAY_NAME: &str = "_display_name";
pub const COLUMN_SIZE: &str = "_size";
pub const COLUMN_DATA: &str = "_data";

pub const EXTERNAL_STORAGE_AUTHORITY: &str = "com.android.externalstorage.documents";
pub const DOWNLOADS_AUTHORITY: &str = "com.android.providers.downloads.documents";
pub const MEDIA_AUTHORITY: &str = "com.android.providers.media.documents";

const PUBLIC_DOWNLOADS_URI: &str = "content://downloads/public_downloads";
const IMAGES_URI: &str = "content://media/external/images/media";
const VIDEO_URI: &str = "content://media/external/video/media";
const AUDIO_URI: &str = "content://media/external/audio/media";

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// A `WHERE` clause with positional arguments, as the registry understands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub clause: String,
    pub args: Vec<String>,
}

impl Selection {
    pub fn by_id(id: &str) -> Self {
        Self {
            clause: "_id=?".to_string(),
            args: vec![id.to_string()],
        }
    }
}

/// The platform content/document registry (Android's `ContentResolver`).
#[async_trait]
pub trait ContentRegistry: Send + Sync {
    /// Read a single column of the first matching row.
    async fn query(
        &self,
        uri: &Url,
        column: &str,
        selection: Option<&Selection>,
    ) -> Result<Option<String>>;

    async fn mime_type(&self, uri: &Url) -> Result<Option<String>>;

    async fn open(&self, uri: &Url) -> Result<Box<dyn AsyncRead + Send + Unpin>>;
}

/// Registry for platforms without one. Every lookup comes back empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRegistry;

#[async_trait]
impl ContentRegistry for NullRegistry {
    async fn query(&self, _: &Url, _: &str, _: Option<&Selection>) -> Result<Option<String>> {
        Ok(None)
    }

    async fn mime_type(&self, _: &Url) -> Result<Option<String>> {
        Ok(None)
    }

    async fn open(&self, uri: &Url) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        Err(ShareBridgeError::Registry(format!(
            "no content registry available for {}",
            uri
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRef {
    Path(PathBuf),
    Uri(Url),
    Opaque(String),
}

impl ContentRef {
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with('/') {
            return ContentRef::Path(PathBuf::from(raw));
        }
        match Url::parse(raw) {
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => ContentRef::Path(path),
                Err(()) => ContentRef::Uri(url),
            },
            Ok(url) => ContentRef::Uri(url),
            Err(_) => ContentRef::Opaque(raw.to_string()),
        }
    }

    pub fn is_content(&self) -> bool {
        matches!(self, ContentRef::Uri(url) if url.scheme().eq_ignore_ascii_case("content"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DocumentRef {
    ExternalStorage { volume: String, relative: String },
    Download { id: String },
    Media { kind: String, id: String },
}

/// Decode a document URI (`content://<authority>/document/<id>` or the
/// `tree/<tree>/document/<id>` form) for one of the known providers.
fn document_ref(url: &Url) -> Result<Option<DocumentRef>> {
    if !url.scheme().eq_ignore_ascii_case("content") {
        return Ok(None);
    }
    let Some(authority) = url.host_str() else {
        return Ok(None);
    };
    let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
    let encoded_id = match segments.as_slice() {
        ["document", id] => *id,
        ["tree", _, "document", id] => *id,
        _ => return Ok(None),
    };
    let doc_id = percent_decode_str(encoded_id).decode_utf8_lossy().into_owned();

    let doc = match authority {
        EXTERNAL_STORAGE_AUTHORITY => {
            let (volume, relative) = doc_id.split_once(':').ok_or_else(|| {
                ShareBridgeError::Resolution(format!("malformed storage document id: {}", doc_id))
            })?;
            DocumentRef::ExternalStorage {
                volume: volume.to_string(),
                relative: relative.to_string(),
            }
        }
        DOWNLOADS_AUTHORITY => DocumentRef::Download { id: doc_id },
        MEDIA_AUTHORITY => {
            let (kind, id) = doc_id.split_once(':').ok_or_else(|| {
                ShareBridgeError::Resolution(format!("malformed media document id: {}", doc_id))
            })?;
            DocumentRef::Media {
                kind: kind.to_string(),
                id: id.to_string(),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(doc))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    /// The reference exactly as received.
    pub content_uri: String,
    pub path: Option<String>,
}

impl ResolvedReference {
    /// The resolved path, or the original reference when none was found.
    pub fn best_effort(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.content_uri)
    }
}

pub struct ReferenceResolver {
    registry: Arc<dyn ContentRegistry>,
    cache_dir: PathBuf,
    external_storage_dir: PathBuf,
}

impl ReferenceResolver {
    pub fn new(
        registry: Arc<dyn ContentRegistry>,
        cache_dir: impl Into<PathBuf>,
        external_storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            cache_dir: cache_dir.into(),
            external_storage_dir: external_storage_dir.into(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ContentRegistry> {
        &self.registry
    }

    pub async fn resolve(&self, raw: &str) -> ResolvedReference {
        let reference = ContentRef::parse(raw);
        let path = match self.try_resolve(&reference).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot resolve file path for {}: {}", raw, e);
                None
            }
        };
        debug!("Resolved {} -> {:?}", raw, path);
        ResolvedReference {
            content_uri: raw.to_string(),
            path,
        }
    }

    async fn try_resolve(&self, reference: &ContentRef) -> Result<Option<String>> {
        let url = match reference {
            ContentRef::Path(path) => return Ok(Some(path.to_string_lossy().into_owned())),
            ContentRef::Opaque(_) => return Ok(None),
            ContentRef::Uri(url) => url,
        };

        if let Some(doc) = document_ref(url)? {
            self.resolve_document(url, doc).await
        } else if reference.is_content() {
            self.data_column(url, None, url).await
        } else {
            Ok(raw_path(url))
        }
    }

    async fn resolve_document(&self, url: &Url, doc: DocumentRef) -> Result<Option<String>> {
        match doc {
            DocumentRef::ExternalStorage { volume, relative } => {
                if volume.eq_ignore_ascii_case("primary") {
                    let path = self.external_storage_dir.join(relative);
                    Ok(Some(path.to_string_lossy().into_owned()))
                } else {
                    self.data_column(url, None, url).await
                }
            }
            DocumentRef::Download { id } => {
                if let Some(path) = id.strip_prefix("raw:") {
                    return Ok(Some(path.to_string()));
                }
                match id.parse::<u64>() {
                    Ok(numeric) => {
                        let downloads = Url::parse(&format!("{}/{}", PUBLIC_DOWNLOADS_URI, numeric))?;
                        match self.data_column(&downloads, None, &downloads).await {
                            Ok(path) => Ok(path),
                            Err(e) => {
                                debug!("Public downloads lookup failed ({}), querying document", e);
                                self.data_column(url, None, url).await
                            }
                        }
                    }
                    Err(_) => self.data_column(url, None, url).await,
                }
            }
            DocumentRef::Media { kind, id } => {
                let collection = match kind.as_str() {
                    "image" => IMAGES_URI,
                    "video" => VIDEO_URI,
                    "audio" => AUDIO_URI,
                    _ => return Ok(None),
                };
                let collection = Url::parse(collection)?;
                let item = Url::parse(&format!("{}/{}", collection, id))?;
                self.data_column(&collection, Some(&Selection::by_id(&id)), &item)
                    .await
            }
        }
    }

    /// Locate content through the registry. Content with an authority is
    /// copied into the cache directory; otherwise the `_data` column is read.
    async fn data_column(
        &self,
        query_uri: &Url,
        selection: Option<&Selection>,
        content_uri: &Url,
    ) -> Result<Option<String>> {
        if query_uri.host_str().map_or(true, str::is_empty) {
            return self.registry.query(query_uri, COLUMN_DATA, selection).await;
        }

        let display_name = self
            .registry
            .query(query_uri, COLUMN_DISPLAY_NAME, selection)
            .await?
            .and_then(|name| sanitize_file_name(&name));

        let file_name = match display_name {
            Some(name) => name,
            None => {
                let mime = self.registry.mime_type(content_uri).await?;
                fallback_file_name(mime.as_deref(), Utc::now().timestamp_millis())
            }
        };

        let mut reader = self.registry.open(content_uri).await?;
        let target = self.copy_into_cache(&mut reader, &file_name).await?;
        debug!("Materialized {} into {}", content_uri, target.display());
        Ok(Some(target.to_string_lossy().into_owned()))
    }

    /// Copy a local file into the cache directory under its own name.
    pub async fn materialize_local(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ShareBridgeError::Resolution(format!("no file name in {}", source.display()))
            })?;
        let mut reader = tokio::fs::File::open(source).await?;
        self.copy_into_cache(&mut reader, &name).await
    }

    /// Stream `reader` into a new cache file named after `file_name`. An
    /// existing file is never overwritten: the name gets a `_1`, `_2`, ...
    /// suffix instead.
    async fn copy_into_cache<R>(&self, reader: &mut R, file_name: &str) -> Result<PathBuf>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let (target, mut file) = self.create_unique(file_name).await?;

        let copied = match tokio::io::copy(reader, &mut file).await {
            Ok(copied) => copied,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&target).await;
                return Err(e.into());
            }
        };
        file.flush().await?;
        debug!("Wrote {} bytes to {}", copied, target.display());
        Ok(target)
    }

    async fn create_unique(&self, file_name: &str) -> Result<(PathBuf, tokio::fs::File)> {
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let target = self.cache_dir.join(numbered_name(file_name, attempt));
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(file) => return Ok((target, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ShareBridgeError::Resolution(format!(
            "no free cache name for {}",
            file_name
        )))
    }
}

/// `photo.jpg` -> `photo.jpg`, `photo_1.jpg`, `photo_2.jpg`, ...
fn numbered_name(file_name: &str, attempt: u32) -> String {
    if attempt == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, attempt, ext.to_string_lossy()),
        None => format!("{}_{}", stem, attempt),
    }
}

fn raw_path(url: &Url) -> Option<String> {
    let path = url.path();
    if path.is_empty() {
        None
    } else {
        Some(path.to_string())
    }
}

/// Keep only the final path component of a registry-supplied display name.
fn sanitize_file_name(name: &str) -> Option<String> {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}

fn fallback_file_name(mime: Option<&str>, timestamp_ms: i64) -> String {
    let prefix = kind_prefix(mime);
    match mime.and_then(extension_for_mime) {
        Some(ext) => format!("{}_{}.{}", prefix, timestamp_ms, ext),
        None => format!("{}_{}", prefix, timestamp_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryEntry, MemoryRegistry};

    fn resolver(registry: MemoryRegistry, cache: &Path) -> ReferenceResolver {
        ReferenceResolver::new(Arc::new(registry), cache, "/storage/emulated/0")
    }

    #[test]
    fn test_parse_content_ref() {
        assert_eq!(
            ContentRef::parse("/sdcard/a.jpg"),
            ContentRef::Path(PathBuf::from("/sdcard/a.jpg"))
        );
        assert_eq!(
            ContentRef::parse("file:///tmp/a%20b.png"),
            ContentRef::Path(PathBuf::from("/tmp/a b.png"))
        );
        assert!(ContentRef::parse("content://media/external/images/media/1").is_content());
        assert!(matches!(ContentRef::parse("not a uri"), ContentRef::Opaque(_)));
    }

    #[test]
    fn test_document_ref_decoding() {
        let url = Url::parse(
            "content://com.android.externalstorage.documents/document/primary%3ADCIM%2Fa.jpg",
        )
        .unwrap();
        assert_eq!(
            document_ref(&url).unwrap(),
            Some(DocumentRef::ExternalStorage {
                volume: "primary".into(),
                relative: "DCIM/a.jpg".into(),
            })
        );

        let tree = Url::parse(
            "content://com.android.providers.media.documents/tree/x/document/video%3A12",
        )
        .unwrap();
        assert_eq!(
            document_ref(&tree).unwrap(),
            Some(DocumentRef::Media {
                kind: "video".into(),
                id: "12".into(),
            })
        );

        let plain = Url::parse("content://media/external/images/media/5").unwrap();
        assert_eq!(document_ref(&plain).unwrap(), None);
    }

    #[tokio::test]
    async fn test_direct_path_is_unchanged() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = resolver(MemoryRegistry::default(), cache.path());
        let resolved = resolver.resolve("/data/user/0/shared.txt").await;
        assert_eq!(resolved.path.as_deref(), Some("/data/user/0/shared.txt"));
    }

    #[tokio::test]
    async fn test_external_storage_primary() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = resolver(MemoryRegistry::default(), cache.path());
        let resolved = resolver
            .resolve("content://com.android.externalstorage.documents/document/primary%3ADownload%2Fr.pdf")
            .await;
        assert_eq!(
            resolved.path.as_deref(),
            Some("/storage/emulated/0/Download/r.pdf")
        );
    }

    #[tokio::test]
    async fn test_generic_content_is_materialized_by_display_name() {
        let cache = tempfile::tempdir().unwrap();
        let registry = MemoryRegistry::default().with(
            "content://com.example.provider/files/9",
            MemoryEntry {
                display_name: Some("report.pdf".into()),
                bytes: Some(b"%PDF-1.4".to_vec()),
                ..Default::default()
            },
        );
        let resolver = resolver(registry, cache.path());

        let resolved = resolver.resolve("content://com.example.provider/files/9").await;
        let expected = cache.path().join("report.pdf");
        assert_eq!(resolved.path.as_deref(), Some(expected.to_str().unwrap()));
        assert_eq!(std::fs::read(&expected).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_display_name_cannot_escape_cache() {
        let cache = tempfile::tempdir().unwrap();
        let registry = MemoryRegistry::default().with(
            "content://com.example.provider/files/1",
            MemoryEntry {
                display_name: Some("../../etc/evil.txt".into()),
                bytes: Some(b"x".to_vec()),
                ..Default::default()
            },
        );
        let resolver = resolver(registry, cache.path());
        let resolved = resolver.resolve("content://com.example.provider/files/1").await;
        let expected = cache.path().join("evil.txt");
        assert_eq!(resolved.path.as_deref(), Some(expected.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_display_name_uses_kind_prefixed_name() {
        let cache = tempfile::tempdir().unwrap();
        let registry = MemoryRegistry::default().with(
            "content://com.example.provider/blob/3",
            MemoryEntry {
                mime: Some("video/mp4".into()),
                bytes: Some(vec![0u8; 4]),
                ..Default::default()
            },
        );
        let resolver = resolver(registry, cache.path());
        let resolved = resolver.resolve("content://com.example.provider/blob/3").await;
        let path = PathBuf::from(resolved.path.unwrap());
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("VID_"), "got {}", name);
        assert!(name.ends_with(".mp4"), "got {}", name);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_media_document_lookup_by_id() {
        let cache = tempfile::tempdir().unwrap();
        let registry = MemoryRegistry::default().with(
            "content://media/external/images/media/77",
            MemoryEntry {
                display_name: Some("IMG_0001.jpg".into()),
                bytes: Some(vec![1, 2, 3]),
                ..Default::default()
            },
        );
        let resolver = resolver(registry, cache.path());
        let resolved = resolver
            .resolve("content://com.android.providers.media.documents/document/image%3A77")
            .await;
        let expected = cache.path().join("IMG_0001.jpg");
        assert_eq!(resolved.path.as_deref(), Some(expected.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_download_raw_document() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = resolver(MemoryRegistry::default(), cache.path());
        let resolved = resolver
            .resolve("content://com.android.providers.downloads.documents/document/raw%3A%2Fstorage%2Femulated%2F0%2FDownload%2Fa.zip")
            .await;
        assert_eq!(
            resolved.path.as_deref(),
            Some("/storage/emulated/0/Download/a.zip")
        );
    }

    #[tokio::test]
    async fn test_download_numeric_id_uses_public_downloads() {
        let cache = tempfile::tempdir().unwrap();
        let registry = MemoryRegistry::default().with(
            "content://downloads/public_downloads/31",
            MemoryEntry {
                display_name: Some("invoice.pdf".into()),
                bytes: Some(b"pdf".to_vec()),
                ..Default::default()
            },
        );
        let resolver = resolver(registry, cache.path());
        let resolved = resolver
            .resolve("content://com.android.providers.downloads.documents/document/31")
            .await;
        let expected = cache.path().join("invoice.pdf");
        assert_eq!(resolved.path.as_deref(), Some(expected.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_registry_failure_degrades_to_no_path() {
        let cache = tempfile::tempdir().unwrap();
        let registry = MemoryRegistry::failing();
        let resolver = resolver(registry, cache.path());
        let raw = "content://com.example.provider/files/9";
        let resolved = resolver.resolve(raw).await;
        assert_eq!(resolved.path, None);
        assert_eq!(resolved.best_effort(), raw);
    }

    #[tokio::test]
    async fn test_non_content_uri_falls_back_to_raw_path() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = resolver(MemoryRegistry::default(), cache.path());
        let resolved = resolver.resolve("https://example.com/pics/cat.png").await;
        assert_eq!(resolved.path.as_deref(), Some("/pics/cat.png"));
    }

    #[tokio::test]
    async fn test_materialize_local_copies_into_cache() {
        let cache = tempfile::tempdir().unwrap();
        let inbox = tempfile::tempdir().unwrap();
        let source = inbox.path().join("note.txt");
        std::fs::write(&source, "hi").unwrap();

        let resolver = resolver(MemoryRegistry::default(), cache.path());
        let copied = resolver.materialize_local(&source).await.unwrap();
        assert_eq!(copied, cache.path().join("note.txt"));
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "hi");
    }

    #[test]
    fn test_fallback_file_name() {
        assert_eq!(fallback_file_name(Some("image/png"), 5), "IMG_5.png");
        assert_eq!(fallback_file_name(None, 5), "FILE_5");
    }

    #[tokio::test]
    async fn test_unknown_media_kind_stays_unresolved() {
        let cache = tempfile::tempdir().unwrap();
        let resolver = resolver(MemoryRegistry::default(), cache.path());
        let raw = "content://com.android.providers.media.documents/document/document%3A12";
        let resolved = resolver.resolve(raw).await;
        assert_eq!(resolved.path, None);
        assert_eq!(resolved.best_effort(), raw);
    }

    #[tokio::test]
    async fn test_content_without_authority_reads_data_column() {
        let cache = tempfile::tempdir().unwrap();
        let raw = "content:///external/files/7";
        let key = Url::parse(raw).unwrap().to_string();
        let registry = MemoryRegistry::default().with(
            &key,
            MemoryEntry {
                data: Some("/storage/emulated/0/DCIM/a.jpg".into()),
                ..Default::default()
            },
        );
        let resolver = resolver(registry, cache.path());
        let resolved = resolver.resolve(raw).await;
        assert_eq!(
            resolved.path.as_deref(),
            Some("/storage/emulated/0/DCIM/a.jpg")
        );
        assert_eq!(std::fs::read_dir(cache.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_same_display_name_does_not_overwrite() {
        let cache = tempfile::tempdir().unwrap();
        let entry = |bytes: &[u8]| MemoryEntry {
            display_name: Some("report.pdf".into()),
            bytes: Some(bytes.to_vec()),
            ..Default::default()
        };
        let registry = MemoryRegistry::default()
            .with("content://com.example.provider/files/1", entry(b"first"))
            .with("content://com.example.provider/files/2", entry(b"second"));
        let resolver = resolver(registry, cache.path());

        let first = resolver.resolve("content://com.example.provider/files/1").await;
        let second = resolver.resolve("content://com.example.provider/files/2").await;

        let first = PathBuf::from(first.path.unwrap());
        let second = PathBuf::from(second.path.unwrap());
        assert_eq!(first, cache.path().join("report.pdf"));
        assert_eq!(second, cache.path().join("report_1.pdf"));
        assert_eq!(std::fs::read(first).unwrap(), b"first");
        assert_eq!(std::fs::read(second).unwrap(), b"second");
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("photo.jpg", 0), "photo.jpg");
        assert_eq!(numbered_name("photo.jpg", 2), "photo_2.jpg");
        assert_eq!(numbered_name("IMG_5", 1), "IMG_5_1");
    }
}
