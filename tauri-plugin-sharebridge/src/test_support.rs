//! In-memory collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use url::Url;

use crate::controller::ShareListener;
use crate::error::{Result, ShareBridgeError};
use crate::models::SharePayload;
use crate::resolver::{ContentRegistry, Selection, COLUMN_DATA, COLUMN_DISPLAY_NAME, COLUMN_SIZE};

#[derive(Debug, Clone, Default)]
pub struct MemoryEntry {
    pub display_name: Option<String>,
    pub size: Option<u64>,
    pub mime: Option<String>,
    pub data: Option<String>,
    pub bytes: Option<Vec<u8>>,
}

/// Registry rows keyed by URI. A query with a selection is keyed by
/// `<uri>/<args joined by ','>`, so `_id=?` lookups land on the item URI.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    entries: HashMap<String, MemoryEntry>,
    failing: bool,
}

impl MemoryRegistry {
    pub fn with(mut self, uri: &str, entry: MemoryEntry) -> Self {
        self.entries.insert(uri.to_string(), entry);
        self
    }

    pub fn failing() -> Self {
        Self {
            entries: HashMap::new(),
            failing: true,
        }
    }

    fn lookup(&self, uri: &Url, selection: Option<&Selection>) -> Result<Option<&MemoryEntry>> {
        if self.failing {
            return Err(ShareBridgeError::Registry("registry unavailable".into()));
        }
        let key = match selection {
            Some(sel) => format!("{}/{}", uri, sel.args.join(",")),
            None => uri.to_string(),
        };
        Ok(self.entries.get(&key))
    }
}

#[async_trait]
impl ContentRegistry for MemoryRegistry {
    async fn query(
        &self,
        uri: &Url,
        column: &str,
        selection: Option<&Selection>,
    ) -> Result<Option<String>> {
        let Some(entry) = self.lookup(uri, selection)? else {
            return Ok(None);
        };
        Ok(match column {
            COLUMN_DISPLAY_NAME => entry.display_name.clone(),
            COLUMN_SIZE => entry.size.map(|s| s.to_string()),
            COLUMN_DATA => entry.data.clone(),
            _ => None,
        })
    }

    async fn mime_type(&self, uri: &Url) -> Result<Option<String>> {
        Ok(self.lookup(uri, None)?.and_then(|e| e.mime.clone()))
    }

    async fn open(&self, uri: &Url) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        match self.lookup(uri, None)?.and_then(|e| e.bytes.clone()) {
            Some(bytes) => Ok(Box::new(std::io::Cursor::new(bytes))),
            None => Err(ShareBridgeError::Registry(format!("cannot open {}", uri))),
        }
    }
}

/// A listener that forwards every payload into a channel.
pub fn recording_listener() -> (ShareListener, mpsc::UnboundedReceiver<SharePayload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: ShareListener = Arc::new(move |payload| {
        let _ = tx.send(payload);
    });
    (listener, rx)
}
