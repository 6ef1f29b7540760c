use crate::errors::LogjamResult;
use std::ops::{Bound, Deref};
use std::sync::Arc;

/// A key with every value stored under it.
pub type RawEntry = (Vec<u8>, Vec<Vec<u8>>);

/// One write of an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapChange {
    /// Replace all values of a key.
    Put(Vec<u8>, Vec<Vec<u8>>),
    /// Drop a key and its values.
    Delete(Vec<u8>),
}

/// Raw ordered map a byte-store engine provides.
///
/// Keys arrive already encoded for their [CompareMode](crate::store::CompareMode)
/// and are compared bytewise. A key carries one or more values. Higher level
/// behaviour, such as duplicate-value handling, transactions and key
/// encoding, lives in [TreeDb](crate::store::TreeDb) so every engine gets it.
///
/// # Implementations
/// - `InMemoryTreeMap`: concurrent skip list, process lifetime
/// - `FjallTreeMap` (adapter crate): one fjall partition per store file
pub trait TreeMapProvider: Send + Sync {
    fn name(&self) -> String;

    fn get(&self, key: &[u8]) -> LogjamResult<Option<Vec<Vec<u8>>>>;

    /// Entries with keys inside the bounds, in key order.
    fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<RawEntry>>;

    fn first_key(&self) -> LogjamResult<Option<Vec<u8>>>;

    fn last_key(&self) -> LogjamResult<Option<Vec<u8>>>;

    /// Number of keys.
    fn len(&self) -> LogjamResult<u64>;

    fn is_empty(&self) -> LogjamResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Applies every change or none of them.
    fn apply(&self, changes: Vec<MapChange>) -> LogjamResult<()>;

    fn clear(&self) -> LogjamResult<()>;

    fn close(&self) -> LogjamResult<()>;

    fn is_closed(&self) -> LogjamResult<bool>;
}

#[derive(Clone)]
pub struct TreeMap {
    inner: Arc<dyn TreeMapProvider>,
}

impl Deref for TreeMap {
    type Target = Arc<dyn TreeMapProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl TreeMap {
    pub fn new<T: TreeMapProvider + 'static>(inner: T) -> Self {
        TreeMap {
            inner: Arc::new(inner),
        }
    }
}
