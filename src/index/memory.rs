use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use super::{Index, IndexTransaction, UpdateFn, ViewFn};
use crate::errors::{IndexError, ProjectorError};

/// Ephemeral index for tests and `memory://` deployments.
///
/// Writers are serialized; their puts are staged and only published when the
/// transaction commits. Readers never wait for a running writer.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    writer: Mutex<()>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct StagedTransaction<'a> {
    committed: &'a RwLock<HashMap<String, Vec<u8>>>,
    staged: HashMap<String, Vec<u8>>,
}

impl IndexTransaction for StagedTransaction<'_> {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IndexError> {
        if let Some(bytes) = self.staged.get(key) {
            return Ok(bytes.clone());
        }
        read_committed(self.committed, key)
    }

    fn put_bytes(&mut self, key: &str, value: Vec<u8>) -> Result<(), IndexError> {
        self.staged.insert(key.to_string(), value);
        Ok(())
    }
}

struct SnapshotTransaction<'a> {
    committed: &'a RwLock<HashMap<String, Vec<u8>>>,
}

impl IndexTransaction for SnapshotTransaction<'_> {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IndexError> {
        read_committed(self.committed, key)
    }

    fn put_bytes(&mut self, key: &str, _value: Vec<u8>) -> Result<(), IndexError> {
        Err(IndexError::ReadOnly {
            key: key.to_string(),
        })
    }
}

fn read_committed(
    committed: &RwLock<HashMap<String, Vec<u8>>>,
    key: &str,
) -> Result<Vec<u8>, IndexError> {
    committed
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .cloned()
        .ok_or_else(|| IndexError::NotFound {
            key: key.to_string(),
        })
}

impl Index for InMemoryIndex {
    fn update(&self, work: &mut UpdateFn<'_>) -> Result<(), ProjectorError> {
        // A writer that panicked never published its staged puts, so the
        // committed map is intact and the poisoned guard can be reused.
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tx = StagedTransaction {
            committed: &self.entries,
            staged: HashMap::new(),
        };
        work(&mut tx)?;

        let staged = tx.staged;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(staged);
        Ok(())
    }

    fn view(&self, work: &mut ViewFn<'_>) -> Result<(), ProjectorError> {
        let tx = SnapshotTransaction {
            committed: &self.entries,
        };
        work(&tx)
    }
}
