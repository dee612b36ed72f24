//! Filesystem document store
//!
//! Persists finished documents under a caller-chosen identifier (for example
//! an order reference) and hands back a retrieval URL.

use std::path::{Path, PathBuf};

use log::info;
use url::Url;

use crate::pdf::PageDocument;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub path: PathBuf,
    pub url: Url,
    pub sha256: String,
}

pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `document` as `<root>/<id>.pdf`, replacing any previous version.
    pub async fn put(&self, id: &str, document: &PageDocument) -> Result<StoredDocument> {
        validate_id(id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.root.join(format!("{}.pdf", id));
        tokio::fs::write(&path, document.as_bytes()).await?;

        let absolute = tokio::fs::canonicalize(&path).await?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| Error::StorageError(format!("no file URL for {}", absolute.display())))?;
        info!("Stored document '{}' at {}", id, url);

        Ok(StoredDocument { path: absolute, url, sha256: document.sha256_hex() })
    }

    /// Read a stored document back.
    pub async fn get(&self, id: &str) -> Result<Vec<u8>> {
        validate_id(id)?;
        let path = self.root.join(format!("{}.pdf", id));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::StorageError(format!("no document stored under '{}'", id)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::StorageError(format!("invalid document identifier '{}'", id)))
    }
}
