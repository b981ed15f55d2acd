//! Filesystem-backed store directory.
//!
//! Layout under the cache root:
//!
//! ```text
//! <root>/ACTIVE                                             name of the activated store
//! <root>/<encoded store name>/entries/<sha256(identity)>.entry
//! ```
//!
//! An entry file is one line of JSON metadata, a newline, then the raw body.
//! Entries are written to a temp file and renamed into place, so a reader
//! sees either the old entry or the new one, never a partial write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use super::{Cache, CacheStorage, CachedResponse, StoreResult};
use crate::error::StoreError;
use crate::request::RequestIdentity;
use crate::response::Response;

/// Subdirectory of a store holding its entry files
const ENTRIES_DIR: &str = "entries";

/// File extension of a complete entry
const ENTRY_EXT: &str = "entry";

/// File in the cache root naming the activated store
const ACTIVE_FILE: &str = "ACTIVE";

/// Distinguishes temp files of concurrent writers within one process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metadata line at the start of every entry file.
#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    identity: RequestIdentity,
    response: Response,
    stored_at: DateTime<Utc>,
}

/// Store directory rooted at a filesystem path.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> StoreResult<Self> {
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(encode_store_name(name))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Cache>> {
        let entries = self.store_dir(name).join(ENTRIES_DIR);
        tokio::fs::create_dir_all(&entries)
            .await
            .map_err(|source| StoreError::Open {
                name: name.to_string(),
                source,
            })?;
        Ok(Arc::new(DiskCache {
            name: name.to_string(),
            entries,
        }))
    }

    async fn has(&self, name: &str) -> StoreResult<bool> {
        let dir = self.store_dir(name);
        tokio::fs::try_exists(&dir)
            .await
            .map_err(|e| StoreError::io(dir, e))
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let file_name = entry.file_name();
            match file_name.to_str().and_then(decode_store_name) {
                Some(name) => names.push(name),
                None => debug!(dir = ?file_name, "Skipping directory that is not a store"),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let dir = self.store_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(dir, e)),
        }
    }

    async fn active(&self) -> StoreResult<Option<String>> {
        let path = self.root.join(ACTIVE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let name = contents.trim();
                Ok((!name.is_empty()).then(|| name.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn set_active(&self, name: &str) -> StoreResult<()> {
        let path = self.root.join(ACTIVE_FILE);
        let temp = self.root.join(format!(
            "{}.tmp-{}-{}",
            ACTIVE_FILE,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, format!("{}\n", name))
            .await
            .map_err(|e| StoreError::io(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::io(path, e));
        }
        debug!(store = name, "Active store recorded");
        Ok(())
    }
}

/// One store on disk.
#[derive(Debug)]
pub struct DiskCache {
    name: String,
    entries: PathBuf,
}

impl DiskCache {
    fn entry_path(&self, identity: &RequestIdentity) -> PathBuf {
        let digest = Sha256::digest(identity.as_str().as_bytes());
        self.entries
            .join(format!("{}.{}", hex::encode(digest), ENTRY_EXT))
    }

    fn parse_entry(path: &Path, bytes: &[u8]) -> StoreResult<(EntryHeader, Vec<u8>)> {
        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: "missing header line".to_string(),
            })?;
        let header: EntryHeader = serde_json::from_slice(&bytes[..split])?;
        Ok((header, bytes[split + 1..].to_vec()))
    }

    async fn read_identity(path: &Path) -> StoreResult<RequestIdentity> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let mut line = Vec::new();
        BufReader::new(file)
            .read_until(b'\n', &mut line)
            .await
            .map_err(|e| StoreError::io(path, e))?;
        let header: EntryHeader = serde_json::from_slice(&line)?;
        Ok(header.identity)
    }
}

#[async_trait]
impl Cache for DiskCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, identity: &RequestIdentity) -> StoreResult<Option<CachedResponse>> {
        let path = self.entry_path(identity);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let (header, body) = Self::parse_entry(&path, &bytes)?;
        if &header.identity != identity {
            warn!(store = %self.name, %identity, stored = %header.identity, "Entry hash collision, ignoring entry");
            return Ok(None);
        }

        let mut response = header.response;
        response.body = body;
        Ok(Some(CachedResponse {
            response,
            stored_at: header.stored_at,
        }))
    }

    async fn put(&self, identity: &RequestIdentity, response: Response) -> StoreResult<()> {
        let path = self.entry_path(identity);
        let header = EntryHeader {
            identity: identity.clone(),
            response,
            stored_at: Utc::now(),
        };

        let mut contents = serde_json::to_vec(&header)?;
        contents.push(b'\n');
        contents.extend_from_slice(&header.response.body);

        let temp = path.with_extension(format!(
            "tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&temp, &contents)
            .await
            .map_err(|e| StoreError::io(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::io(path, e));
        }

        debug!(store = %self.name, %identity, bytes = contents.len(), "Entry written");
        Ok(())
    }

    async fn remove(&self, identity: &RequestIdentity) -> StoreResult<bool> {
        let path = self.entry_path(identity);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn keys(&self) -> StoreResult<Vec<RequestIdentity>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.entries)
            .await
            .map_err(|e| StoreError::io(&self.entries, e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.entries, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match Self::read_identity(&path).await {
                Ok(identity) => keys.push(identity),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable cache entry"),
            }
        }

        Ok(keys)
    }
}

/// Encode a store name as a single safe path component.
///
/// ASCII alphanumerics, `-`, `_` and non-leading `.` are kept; every other
/// byte becomes `%XX`.
fn encode_store_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, b) in name.bytes().enumerate() {
        let keep = b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || (b == b'.' && i > 0);
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_store_name(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
