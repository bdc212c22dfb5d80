//! # StoreDb — Ordered Byte Map
//!
//! Thin persistence wrapper over sled's default tree. VERA's two stores
//! (versions and blocks) each open one of these at their own path and
//! speak a string-keyed schema:
//!
//! | Store | Key                                | Value           |
//! |-------|------------------------------------|-----------------|
//! | ADS   | `ver:{user_key}:{valid_from:020}`  | JSON `Version`  |
//! | Chain | `block:{height:020}`               | JSON `Block`    |
//!
//! Heights are zero-padded to 20 decimal digits so sled's lexicographic
//! ordering matches numeric ordering and a prefix scan recovers records
//! in height order. Values are JSON rather than a binary codec: the
//! on-disk format doubles as the debugging and interop format, and the
//! records are small enough that compactness buys nothing.
//!
//! sled is inherently thread-safe; a `StoreDb` can be shared via `Arc`
//! without external locking. Writers above this layer still serialize
//! through the store locks, because ordering — not data races — is what
//! needs protecting.

use std::path::Path;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record under key {0}")]
    Corrupt(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// A single ordered byte-keyed map, persisted at one filesystem path.
#[derive(Debug, Clone)]
pub struct StoreDb {
    db: sled::Db,
}

impl StoreDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    /// Create a temporary database that lives in memory and disappears
    /// on drop. Ideal for tests — no filesystem side effects.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Insert or overwrite a record.
    pub fn put(&self, key: &str, value: &[u8]) -> DbResult<()> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    /// Fetch a single record.
    pub fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Whether any record exists under the given key prefix.
    pub fn prefix_is_empty(&self, prefix: &str) -> DbResult<bool> {
        match self.db.scan_prefix(prefix.as_bytes()).next() {
            Some(Ok(_)) => Ok(false),
            Some(Err(e)) => Err(e.into()),
            None => Ok(true),
        }
    }

    /// All records under a key prefix, in key order. Keys that are not
    /// valid UTF-8 are reported as corrupt rather than skipped.
    pub fn scan_prefix(&self, prefix: &str) -> DbResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| DbError::Corrupt(hex::encode(&key)))?;
            out.push((key, value.to_vec()));
        }
        Ok(out)
    }

    /// Block until pending writes are durable on disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let db = StoreDb::open_temporary().unwrap();
        db.put("ver:hey:00000000000000000002", b"payload").unwrap();
        assert_eq!(
            db.get("ver:hey:00000000000000000002").unwrap().as_deref(),
            Some(b"payload".as_slice())
        );
        assert!(db.get("missing").unwrap().is_none());
    }

    #[test]
    fn prefix_scan_is_key_ordered() {
        let db = StoreDb::open_temporary().unwrap();
        db.put("block:00000000000000000010", b"b10").unwrap();
        db.put("block:00000000000000000002", b"b2").unwrap();
        db.put("block:00000000000000000001", b"b1").unwrap();
        db.put("ver:x:00000000000000000001", b"v").unwrap();

        let blocks = db.scan_prefix("block:").unwrap();
        let keys: Vec<_> = blocks.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "block:00000000000000000001",
                "block:00000000000000000002",
                "block:00000000000000000010",
            ]
        );
    }

    #[test]
    fn prefix_emptiness() {
        let db = StoreDb::open_temporary().unwrap();
        assert!(db.prefix_is_empty("ver:").unwrap());
        db.put("ver:k:00000000000000000001", b"v").unwrap();
        assert!(!db.prefix_is_empty("ver:").unwrap());
        assert!(db.prefix_is_empty("block:").unwrap());
    }

    #[test]
    fn persistent_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = StoreDb::open(dir.path()).unwrap();
            db.put("ver:k:00000000000000000001", b"v").unwrap();
            db.flush().unwrap();
        }
        let db = StoreDb::open(dir.path()).unwrap();
        assert_eq!(
            db.get("ver:k:00000000000000000001").unwrap().as_deref(),
            Some(b"v".as_slice())
        );
    }
}
