use std::any::{Any, TypeId};
use std::collections::HashMap;

use super::{Index, IndexTransaction, UpdateFn, ViewFn};
use crate::errors::{IndexError, ProjectorError};

type Defaults = HashMap<TypeId, Box<dyn Any + Send + Sync>>;

/// Wraps an index so that reading a missing key of a registered type yields
/// that type's default instead of [`IndexError::NotFound`].
///
/// Only not-found is substituted; codec and backend errors pass through.
pub struct IndexWithDefaults<I> {
    inner: I,
    defaults: Defaults,
}

impl<I: Index> IndexWithDefaults<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            defaults: HashMap::new(),
        }
    }

    /// Register `value` as the fallback for every missing key read as `T`.
    pub fn with_default<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.defaults.insert(TypeId::of::<T>(), Box::new(value));
        self
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

struct DefaultsTransaction<'a> {
    inner: &'a mut dyn IndexTransaction,
    defaults: &'a Defaults,
}

impl IndexTransaction for DefaultsTransaction<'_> {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IndexError> {
        self.inner.get_bytes(key)
    }

    fn put_bytes(&mut self, key: &str, value: Vec<u8>) -> Result<(), IndexError> {
        self.inner.put_bytes(key, value)
    }

    fn default_for(&self, type_id: TypeId) -> Option<&(dyn Any + Send + Sync)> {
        self.defaults.get(&type_id).map(|value| value.as_ref())
    }
}

struct DefaultsView<'a> {
    inner: &'a dyn IndexTransaction,
    defaults: &'a Defaults,
}

impl IndexTransaction for DefaultsView<'_> {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IndexError> {
        self.inner.get_bytes(key)
    }

    fn put_bytes(&mut self, key: &str, _value: Vec<u8>) -> Result<(), IndexError> {
        Err(IndexError::ReadOnly {
            key: key.to_string(),
        })
    }

    fn default_for(&self, type_id: TypeId) -> Option<&(dyn Any + Send + Sync)> {
        self.defaults.get(&type_id).map(|value| value.as_ref())
    }
}

impl<I: Index> Index for IndexWithDefaults<I> {
    fn update(&self, work: &mut UpdateFn<'_>) -> Result<(), ProjectorError> {
        let defaults = &self.defaults;
        self.inner.update(&mut |tx| {
            let mut wrapped = DefaultsTransaction {
                inner: tx,
                defaults,
            };
            work(&mut wrapped)
        })
    }

    fn view(&self, work: &mut ViewFn<'_>) -> Result<(), ProjectorError> {
        let defaults = &self.defaults;
        self.inner.view(&mut |tx| {
            let wrapped = DefaultsView {
                inner: tx,
                defaults,
            };
            work(&wrapped)
        })
    }
}
