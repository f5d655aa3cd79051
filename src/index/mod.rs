//! Transactional key-value index holding the projections.
//!
//! ## Overview
//!
//! An [`Index`] hands out scoped [`IndexTransaction`]s. Values cross the
//! backend boundary as bytes: [`put`](trait.IndexTransaction.html#method.put)
//! encodes with `serde_json`, [`get`](trait.IndexTransaction.html#method.get)
//! decodes into the caller's type. A missing key is always
//! [`IndexError::NotFound`]; anything else is a backend or codec error.
//!
//! | Module     | Responsibility                                         |
//! |------------|--------------------------------------------------------|
//! | `memory`   | `InMemoryIndex`: `RwLock<HashMap>` with staged writes  |
//! | `sqlite`   | `SqliteIndex`: one-table SQLite store via `rusqlite`   |
//! | `defaults` | `IndexWithDefaults`: per-type fallback on not-found    |

pub mod defaults;
pub mod memory;
pub mod sqlite;

use std::any::{Any, TypeId};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{IndexError, ProjectorError};

pub use defaults::IndexWithDefaults;
pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

/// Body of a read-write transaction.
pub type UpdateFn<'w> = dyn FnMut(&mut dyn IndexTransaction) -> Result<(), ProjectorError> + 'w;

/// Body of a read-only transaction.
pub type ViewFn<'w> = dyn FnMut(&dyn IndexTransaction) -> Result<(), ProjectorError> + 'w;

/// A key-value store with scoped transactions.
pub trait Index: Send + Sync {
    /// Run `work` in a read-write transaction. The transaction commits when
    /// `work` returns `Ok` and rolls back when it fails or unwinds.
    fn update(&self, work: &mut UpdateFn<'_>) -> Result<(), ProjectorError>;

    /// Run `work` against a read-only snapshot.
    fn view(&self, work: &mut ViewFn<'_>) -> Result<(), ProjectorError>;
}

impl<I: Index + ?Sized> Index for Arc<I> {
    fn update(&self, work: &mut UpdateFn<'_>) -> Result<(), ProjectorError> {
        (**self).update(work)
    }

    fn view(&self, work: &mut ViewFn<'_>) -> Result<(), ProjectorError> {
        (**self).view(work)
    }
}

/// Raw access to one transaction's keyspace.
pub trait IndexTransaction {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IndexError>;

    fn put_bytes(&mut self, key: &str, value: Vec<u8>) -> Result<(), IndexError>;

    /// Value to hand out for a missing key of the given type.
    fn default_for(&self, _type_id: TypeId) -> Option<&(dyn Any + Send + Sync)> {
        None
    }
}

impl<'a> dyn IndexTransaction + 'a {
    pub fn get<T>(&self, key: &str) -> Result<T, IndexError>
    where
        T: DeserializeOwned + Clone + 'static,
    {
        match self.get_bytes(key) {
            Ok(bytes) => decode(key, &bytes),
            Err(IndexError::NotFound { key }) => self
                .default_for(TypeId::of::<T>())
                .and_then(|value| value.downcast_ref::<T>())
                .cloned()
                .ok_or(IndexError::NotFound { key }),
            Err(err) => Err(err),
        }
    }

    /// Like [`get`](Self::get) but maps a missing key to `None`.
    pub fn find<T>(&self, key: &str) -> Result<Option<T>, IndexError>
    where
        T: DeserializeOwned + Clone + 'static,
    {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(IndexError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), IndexError> {
        let bytes = serde_json::to_vec(value).map_err(|source| IndexError::Codec {
            key: key.to_string(),
            source,
        })?;
        self.put_bytes(key, bytes)
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, IndexError> {
    serde_json::from_slice(bytes).map_err(|source| IndexError::Codec {
        key: key.to_string(),
        source,
    })
}

/// Closure-returning conveniences over [`Index`].
pub trait IndexExt: Index {
    fn transaction<R>(
        &self,
        work: impl FnOnce(&mut dyn IndexTransaction) -> Result<R, ProjectorError>,
    ) -> Result<R, ProjectorError> {
        let mut work = Some(work);
        let mut output = None;
        self.update(&mut |tx| {
            if let Some(work) = work.take() {
                output = Some(work(tx)?);
            }
            Ok(())
        })?;
        output.ok_or(ProjectorError::TransactionSkipped)
    }

    fn read<R>(
        &self,
        work: impl FnOnce(&dyn IndexTransaction) -> Result<R, ProjectorError>,
    ) -> Result<R, ProjectorError> {
        let mut work = Some(work);
        let mut output = None;
        self.view(&mut |tx| {
            if let Some(work) = work.take() {
                output = Some(work(tx)?);
            }
            Ok(())
        })?;
        output.ok_or(ProjectorError::TransactionSkipped)
    }
}

impl<I: Index + ?Sized> IndexExt for I {}

/// Where projections are stored, parsed from a URL-like string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageUrl {
    Memory,
    Sqlite(PathBuf),
}

impl StorageUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url == "memory://" || url == "memory" {
            return Ok(Self::Memory);
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                bail!("sqlite storage URL needs a path: {}", url);
            }
            return Ok(Self::Sqlite(PathBuf::from(path)));
        }
        if url.contains("://") {
            bail!("unknown storage driver: {}", url);
        }
        if url.is_empty() {
            bail!("storage URL is empty");
        }
        Ok(Self::Sqlite(PathBuf::from(url)))
    }
}

/// Open the index backend selected by `url`.
pub fn open_index(url: &str) -> Result<Arc<dyn Index>> {
    match StorageUrl::parse(url)? {
        StorageUrl::Memory => {
            tracing::info!(storage = "memory", "opened in-memory index");
            Ok(Arc::new(InMemoryIndex::new()))
        }
        StorageUrl::Sqlite(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create storage directory {}", parent.display())
                })?;
            }
            let index = SqliteIndex::open(&path)
                .with_context(|| format!("Failed to open index at {}", path.display()))?;
            tracing::info!(storage = %path.display(), "opened sqlite index");
            Ok(Arc::new(index))
        }
    }
}
