use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use crate::store::{CompareMode, MapChange, RawEntry, TreeMap};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::{Bound, Deref};
use std::sync::Arc;

/// Ordered byte-store with duplicate values and transactions.
///
/// Keys and values are raw bytes; keys are ordered by the store's
/// [CompareMode]. A key holds one value after [place](TreeDbProvider::place)
/// and may collect several through
/// [place_with_existing](TreeDbProvider::place_with_existing).
///
/// Between `begin_transaction` and `commit_transaction` writes are staged and
/// visible only to reads of the same store. `abort_transaction` discards
/// them. Writes outside a transaction are applied immediately.
pub trait TreeDbProvider: Send + Sync {
    fn name(&self) -> String;

    fn compare_mode(&self) -> CompareMode;

    /// First value stored under `key`.
    fn at(&self, key: &[u8]) -> LogjamResult<Option<Vec<u8>>> {
        Ok(self.at_together(key)?.into_iter().next())
    }

    /// Every value stored under `key`.
    fn at_together(&self, key: &[u8]) -> LogjamResult<Vec<Vec<u8>>>;

    /// Entries with keys inside the bounds, in key order.
    fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<RawEntry>>;

    fn range_keys(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<Vec<u8>>> {
        Ok(self
            .range(lower, upper)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// Every value of every key inside the bounds.
    fn at_range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<Vec<u8>>> {
        Ok(self
            .range(lower, upper)?
            .into_iter()
            .flat_map(|(_, values)| values)
            .collect())
    }

    fn min_key(&self) -> LogjamResult<Option<Vec<u8>>>;

    fn max_key(&self) -> LogjamResult<Option<Vec<u8>>>;

    /// Number of keys.
    fn len(&self) -> LogjamResult<u64>;

    fn is_empty(&self) -> LogjamResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Stores `value` as the only value of `key`.
    fn place(&self, key: &[u8], value: &[u8]) -> LogjamResult<()>;

    /// Adds `value` to the values of `key` unless it is already there.
    fn place_with_existing(&self, key: &[u8], value: &[u8]) -> LogjamResult<()>;

    /// Drops `key` with all its values.
    fn remove(&self, key: &[u8]) -> LogjamResult<()>;

    /// Drops one value of `key`, and the key once no value is left.
    fn remove_from_existing(&self, key: &[u8], value: &[u8]) -> LogjamResult<()>;

    /// Drops every key.
    fn truncate(&self) -> LogjamResult<()>;

    fn begin_transaction(&self) -> LogjamResult<()>;

    fn commit_transaction(&self) -> LogjamResult<()>;

    fn abort_transaction(&self) -> LogjamResult<()>;

    fn in_transaction(&self) -> bool;

    fn close(&self) -> LogjamResult<()>;
}

#[derive(Clone)]
pub struct TreeDb {
    inner: Arc<dyn TreeDbProvider>,
}

impl Deref for TreeDb {
    type Target = Arc<dyn TreeDbProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::fmt::Debug for TreeDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeDb")
            .field("name", &self.inner.name())
            .field("compare", &self.inner.compare_mode())
            .finish()
    }
}

impl TreeDb {
    pub fn new<T: TreeDbProvider + 'static>(inner: T) -> Self {
        TreeDb {
            inner: Arc::new(inner),
        }
    }
}

/// [TreeDbProvider] over an engine's raw [TreeMap].
///
/// Encodes keys for the compare mode and stages transactional writes in a
/// write-set that is applied to the map as one batch on commit.
#[derive(Clone)]
pub struct StagedTree {
    inner: Arc<StagedTreeInner>,
}

impl StagedTree {
    pub fn new(map: TreeMap, compare: CompareMode) -> Self {
        StagedTree {
            inner: Arc::new(StagedTreeInner {
                name: map.name(),
                map,
                compare,
                write_set: Mutex::new(None),
            }),
        }
    }
}

impl TreeDbProvider for StagedTree {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn compare_mode(&self) -> CompareMode {
        self.inner.compare
    }

    fn at_together(&self, key: &[u8]) -> LogjamResult<Vec<Vec<u8>>> {
        self.inner.at_together(key)
    }

    fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<RawEntry>> {
        self.inner.range(lower, upper)
    }

    fn min_key(&self) -> LogjamResult<Option<Vec<u8>>> {
        self.inner.edge_key(true)
    }

    fn max_key(&self) -> LogjamResult<Option<Vec<u8>>> {
        self.inner.edge_key(false)
    }

    fn len(&self) -> LogjamResult<u64> {
        self.inner.len()
    }

    fn place(&self, key: &[u8], value: &[u8]) -> LogjamResult<()> {
        self.inner.place(key, value)
    }

    fn place_with_existing(&self, key: &[u8], value: &[u8]) -> LogjamResult<()> {
        self.inner.place_with_existing(key, value)
    }

    fn remove(&self, key: &[u8]) -> LogjamResult<()> {
        self.inner.remove(key)
    }

    fn remove_from_existing(&self, key: &[u8], value: &[u8]) -> LogjamResult<()> {
        self.inner.remove_from_existing(key, value)
    }

    fn truncate(&self) -> LogjamResult<()> {
        self.inner.truncate()
    }

    fn begin_transaction(&self) -> LogjamResult<()> {
        self.inner.begin_transaction()
    }

    fn commit_transaction(&self) -> LogjamResult<()> {
        self.inner.commit_transaction()
    }

    fn abort_transaction(&self) -> LogjamResult<()> {
        self.inner.abort_transaction()
    }

    fn in_transaction(&self) -> bool {
        self.inner.write_set.lock().is_some()
    }

    fn close(&self) -> LogjamResult<()> {
        self.inner.close()
    }
}

#[derive(Default)]
struct WriteSet {
    cleared: bool,
    // None marks a staged delete
    changes: BTreeMap<Vec<u8>, Option<Vec<Vec<u8>>>>,
}

struct StagedTreeInner {
    name: String,
    map: TreeMap,
    compare: CompareMode,
    write_set: Mutex<Option<WriteSet>>,
}

impl StagedTreeInner {
    fn check_opened(&self) -> LogjamResult<()> {
        if self.map.is_closed()? {
            log::error!("Store {} is closed", self.name);
            return Err(LogjamError::new(
                &format!("Store {} is closed", self.name),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn encode_bound(&self, bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
        match bound {
            Bound::Included(key) => Bound::Included(self.compare.encode_key(key)),
            Bound::Excluded(key) => Bound::Excluded(self.compare.encode_key(key)),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    fn stored(&self, encoded: &[u8]) -> LogjamResult<Option<Vec<Vec<u8>>>> {
        {
            let guard = self.write_set.lock();
            if let Some(write_set) = guard.as_ref() {
                if let Some(staged) = write_set.changes.get(encoded) {
                    return Ok(staged.clone());
                }
                if write_set.cleared {
                    return Ok(None);
                }
            }
        }
        self.map.get(encoded)
    }

    fn stored_range(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
    ) -> LogjamResult<Vec<RawEntry>> {
        if is_empty_range(&lower, &upper) {
            return Ok(Vec::new());
        }

        let guard = self.write_set.lock();
        let write_set = match guard.as_ref() {
            Some(write_set) if write_set.cleared || !write_set.changes.is_empty() => write_set,
            _ => return self.map.range(borrowed(&lower), borrowed(&upper)),
        };

        let mut merged: BTreeMap<Vec<u8>, Vec<Vec<u8>>> = if write_set.cleared {
            BTreeMap::new()
        } else {
            self.map
                .range(borrowed(&lower), borrowed(&upper))?
                .into_iter()
                .collect()
        };
        for (key, staged) in write_set.changes.range((lower, upper)) {
            match staged {
                Some(values) => {
                    merged.insert(key.clone(), values.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn stage(&self, change: MapChange) -> LogjamResult<()> {
        let mut guard = self.write_set.lock();
        match guard.as_mut() {
            Some(write_set) => {
                match change {
                    MapChange::Put(key, values) => write_set.changes.insert(key, Some(values)),
                    MapChange::Delete(key) => write_set.changes.insert(key, None),
                };
                Ok(())
            }
            None => {
                drop(guard);
                self.map.apply(vec![change])
            }
        }
    }

    fn at_together(&self, key: &[u8]) -> LogjamResult<Vec<Vec<u8>>> {
        self.check_opened()?;
        let encoded = self.compare.encode_key(key);
        Ok(self.stored(&encoded)?.unwrap_or_default())
    }

    fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<RawEntry>> {
        self.check_opened()?;
        let entries = self.stored_range(self.encode_bound(lower), self.encode_bound(upper))?;
        entries
            .into_iter()
            .map(|(key, values)| Ok((self.compare.decode_key(&key)?, values)))
            .collect()
    }

    fn edge_key(&self, first: bool) -> LogjamResult<Option<Vec<u8>>> {
        self.check_opened()?;
        let staged = self
            .write_set
            .lock()
            .as_ref()
            .is_some_and(|ws| ws.cleared || !ws.changes.is_empty());

        let encoded = if staged {
            let entries = self.stored_range(Bound::Unbounded, Bound::Unbounded)?;
            let edge = if first {
                entries.into_iter().next()
            } else {
                entries.into_iter().next_back()
            };
            edge.map(|(key, _)| key)
        } else if first {
            self.map.first_key()?
        } else {
            self.map.last_key()?
        };

        encoded.map(|key| self.compare.decode_key(&key)).transpose()
    }

    fn len(&self) -> LogjamResult<u64> {
        self.check_opened()?;
        let staged = self
            .write_set
            .lock()
            .as_ref()
            .is_some_and(|ws| ws.cleared || !ws.changes.is_empty());
        if staged {
            Ok(self.stored_range(Bound::Unbounded, Bound::Unbounded)?.len() as u64)
        } else {
            self.map.len()
        }
    }

    fn place(&self, key: &[u8], value: &[u8]) -> LogjamResult<()> {
        self.check_opened()?;
        self.stage(MapChange::Put(
            self.compare.encode_key(key),
            vec![value.to_vec()],
        ))
    }

    fn place_with_existing(&self, key: &[u8], value: &[u8]) -> LogjamResult<()> {
        self.check_opened()?;
        let encoded = self.compare.encode_key(key);
        let mut values = self.stored(&encoded)?.unwrap_or_default();
        if values.iter().any(|existing| existing == value) {
            return Ok(());
        }
        values.push(value.to_vec());
        self.stage(MapChange::Put(encoded, values))
    }

    fn remove(&self, key: &[u8]) -> LogjamResult<()> {
        self.check_opened()?;
        self.stage(MapChange::Delete(self.compare.encode_key(key)))
    }

    fn remove_from_existing(&self, key: &[u8], value: &[u8]) -> LogjamResult<()> {
        self.check_opened()?;
        let encoded = self.compare.encode_key(key);
        let mut values = match self.stored(&encoded)? {
            Some(values) => values,
            None => return Ok(()),
        };

        let before = values.len();
        values.retain(|existing| existing != value);
        if values.len() == before {
            return Ok(());
        }

        if values.is_empty() {
            self.stage(MapChange::Delete(encoded))
        } else {
            self.stage(MapChange::Put(encoded, values))
        }
    }

    fn truncate(&self) -> LogjamResult<()> {
        self.check_opened()?;
        let mut guard = self.write_set.lock();
        match guard.as_mut() {
            Some(write_set) => {
                write_set.cleared = true;
                write_set.changes.clear();
                Ok(())
            }
            None => {
                drop(guard);
                self.map.clear()
            }
        }
    }

    fn begin_transaction(&self) -> LogjamResult<()> {
        self.check_opened()?;
        let mut guard = self.write_set.lock();
        if guard.is_some() {
            log::error!("Transaction already active on {}", self.name);
            return Err(LogjamError::new(
                &format!("Transaction already active on {}", self.name),
                ErrorKind::TransactionError,
            ));
        }
        *guard = Some(WriteSet::default());
        log::debug!("Began transaction on {}", self.name);
        Ok(())
    }

    fn take_write_set(&self, action: &str) -> LogjamResult<WriteSet> {
        self.write_set.lock().take().ok_or_else(|| {
            log::error!("Cannot {} on {}: no active transaction", action, self.name);
            LogjamError::new(
                &format!("Cannot {} on {}: no active transaction", action, self.name),
                ErrorKind::TransactionError,
            )
        })
    }

    fn commit_transaction(&self) -> LogjamResult<()> {
        self.check_opened()?;
        let write_set = self.take_write_set("commit")?;
        if write_set.cleared {
            self.map.clear()?;
        }

        let changes: Vec<MapChange> = write_set
            .changes
            .into_iter()
            .map(|(key, staged)| match staged {
                Some(values) => MapChange::Put(key, values),
                None => MapChange::Delete(key),
            })
            .collect();
        let count = changes.len();
        if !changes.is_empty() {
            self.map.apply(changes)?;
        }
        log::debug!("Committed {} changes on {}", count, self.name);
        Ok(())
    }

    fn abort_transaction(&self) -> LogjamResult<()> {
        let write_set = self.take_write_set("abort")?;
        log::debug!(
            "Aborted transaction on {}, discarded {} changes",
            self.name,
            write_set.changes.len()
        );
        Ok(())
    }

    fn close(&self) -> LogjamResult<()> {
        if let Some(write_set) = self.write_set.lock().take() {
            log::warn!(
                "Closing {} with an open transaction, {} changes discarded",
                self.name,
                write_set.changes.len()
            );
        }
        self.map.close()
    }
}

fn borrowed(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(key) => Bound::Included(key.as_slice()),
        Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn is_empty_range(lower: &Bound<Vec<u8>>, upper: &Bound<Vec<u8>>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u))
        | (Bound::Excluded(l), Bound::Excluded(u)) => l >= u,
        _ => false,
    }
}
