//! Persistent storage backing the keystore vault and the audit log.
//!
//! DKG and signing session state is *not* persisted here: this crate runs a
//! single core per wallet (§2, §5), so in-flight session state lives in the
//! owning coordinator struct for the process's lifetime rather than needing
//! to survive a restart.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CoreError, CoreResult};

const KEYSTORE_VAULT: TableDefinition<&str, &[u8]> = TableDefinition::new("keystore_vault");
const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");

/// ReDB-backed storage for one wallet's keystore vault and audit log.
///
/// Thread-safe via internal `Arc`. Clone is cheap.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create a database at the given path, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| CoreError::Storage(e.to_string()))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KEYSTORE_VAULT)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "Opened storage database");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open an in-memory database for testing.
    #[cfg(test)]
    pub fn open_memory() -> CoreResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(KEYSTORE_VAULT)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // --- Keystore vault ---

    /// Store an encrypted keystore entry under `key` (typically the wallet id).
    pub fn put_keystore_entry(&self, key: &str, encrypted: &[u8]) -> CoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(KEYSTORE_VAULT)?;
            table.insert(key, encrypted)?;
        }
        write_txn.commit()?;
        tracing::debug!(key, "Stored keystore entry");
        Ok(())
    }

    /// Fetch an encrypted keystore entry by key.
    pub fn get_keystore_entry(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEYSTORE_VAULT)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    /// Delete a keystore entry. Returns whether an entry was present.
    pub fn delete_keystore_entry(&self, key: &str) -> CoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(KEYSTORE_VAULT)?;
            table.remove(key)?.is_some()
        };
        write_txn.commit()?;
        if deleted {
            tracing::debug!(key, "Deleted keystore entry");
        }
        Ok(deleted)
    }

    /// List all keystore keys (wallet ids) present in the vault.
    pub fn list_keystore_keys(&self) -> CoreResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(KEYSTORE_VAULT)?;
        let keys: Vec<String> = table
            .iter()?
            .filter_map(|entry| entry.ok().map(|(k, _)| k.value().to_string()))
            .collect();
        Ok(keys)
    }

    // --- Audit log ---

    /// Store a single audit entry by sequence number.
    pub fn put_audit_entry<T>(&self, entry: &T) -> CoreResult<()>
    where
        T: Serialize + AsRef<crate::audit::AuditEntry>,
    {
        let audit_entry = entry.as_ref();
        let value = serde_json::to_vec(audit_entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_LOG)?;
            table.insert(audit_entry.seq, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::trace!(seq = audit_entry.seq, "Stored audit entry");
        Ok(())
    }

    /// Get a single audit entry by sequence number.
    pub fn get_audit_entry(&self, seq: u64) -> CoreResult<Option<crate::audit::AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;
        match table.get(seq)? {
            Some(value) => {
                let entry: crate::audit::AuditEntry = serde_json::from_slice(value.value())?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Get the latest audit sequence number, if any entries exist.
    pub fn get_latest_audit_seq(&self) -> CoreResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;
        Ok(table.iter()?.last().transpose()?.map(|(k, _)| k.value()))
    }

    /// List audit entries in `[start, end]` inclusive.
    pub fn list_audit_entries(&self, start: u64, end: u64) -> CoreResult<Vec<crate::audit::AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;
        let entries: Result<Vec<_>, CoreError> = table
            .range(start..=end)?
            .map(|entry| {
                let (_, v) = entry?;
                let parsed: crate::audit::AuditEntry = serde_json::from_slice(v.value())?;
                Ok(parsed)
            })
            .collect();
        entries
    }
}

impl From<redb::CompactionError> for CoreError {
    fn from(err: redb::CompactionError) -> Self {
        Self::Storage(err.to_string())
    }
}
