//! Content-addressed blob storage for oversized payloads.
//!
//! Large tool/model payloads are externalized here instead of being inlined
//! in the event log. Blob IDs are derived from a SHA-256 of the serialized
//! content, so identical payloads written twice share one file and a
//! re-recorded event never produces a second copy.
//!
//! Layout: `<root>/<kind>/<blob_id>.json`, where `kind` is `input` or
//! `result`. Writes go through a temp file plus atomic rename, so concurrent
//! writers racing on the same content both land on a complete file.

use std::path::PathBuf;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use flightrec_core::{BlobKind, BlobRef};

use crate::errors::Result;

/// Filesystem blob store rooted at a single directory.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) a blob store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Write a payload, returning its content-derived reference.
    ///
    /// Identical content under the same kind dedups to a single file.
    pub fn write(&self, content: &Value, kind: BlobKind) -> Result<BlobRef> {
        let serialized = serde_json::to_vec(content)?;
        let id = blob_id(&serialized);
        let path = self.blob_path(&id, kind);

        if path.exists() {
            debug!(blob_id = %id, "blob already stored, skipping write");
            return Ok(BlobRef { id, kind });
        }

        let dir = self.root.join(kind.as_str());
        std::fs::create_dir_all(&dir)?;

        // Unique temp name per writer; the rename is atomic on the same
        // filesystem, so a racing writer with the same content is harmless.
        let tmp = dir.join(format!(".{}.{}.tmp", id, std::process::id()));
        std::fs::write(&tmp, &serialized)?;
        std::fs::rename(&tmp, &path)?;

        Ok(BlobRef { id, kind })
    }

    /// Read back an externalized payload.
    pub fn read(&self, blob_ref: &BlobRef) -> Result<Value> {
        let path = self.blob_path(&blob_ref.id, blob_ref.kind);
        let raw = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn blob_path(&self, id: &str, kind: BlobKind) -> PathBuf {
        self.root.join(kind.as_str()).join(format!("{id}.json"))
    }
}

/// Derive a blob ID from serialized content.
fn blob_id(serialized: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    format!("blob_{:x}", hasher.finalize())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("blobs")).unwrap();
        (dir, store)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, store) = setup();
        let content = json!({"command": "ls -la", "output": "total 0"});

        let blob_ref = store.write(&content, BlobKind::Result).unwrap();
        assert!(blob_ref.id.starts_with("blob_"));
        assert_eq!(store.read(&blob_ref).unwrap(), content);
    }

    #[test]
    fn identical_content_dedups_to_one_file() {
        let (_dir, store) = setup();
        let content = json!({"filePath": "/tmp/x.rs"});

        let a = store.write(&content, BlobKind::Input).unwrap();
        let b = store.write(&content, BlobKind::Input).unwrap();
        assert_eq!(a.id, b.id);

        let files: Vec<_> = std::fs::read_dir(store.root().join("input"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn different_content_gets_different_ids() {
        let (_dir, store) = setup();
        let a = store.write(&json!({"n": 1}), BlobKind::Input).unwrap();
        let b = store.write(&json!({"n": 2}), BlobKind::Input).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn kinds_are_stored_in_separate_directories() {
        let (_dir, store) = setup();
        let content = json!({"same": "content"});

        let input = store.write(&content, BlobKind::Input).unwrap();
        let result = store.write(&content, BlobKind::Result).unwrap();
        assert_eq!(input.id, result.id);

        assert!(store.root().join("input").join(format!("{}.json", input.id)).exists());
        assert!(store.root().join("result").join(format!("{}.json", result.id)).exists());
    }

    #[test]
    fn read_missing_blob_is_an_error() {
        let (_dir, store) = setup();
        let missing = BlobRef {
            id: "blob_nope".into(),
            kind: BlobKind::Result,
        };
        assert!(store.read(&missing).is_err());
    }

    #[test]
    fn open_creates_root_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("blobs");
        let _store = BlobStore::open(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
