use crate::error::{to_logjam_error, FjallAdapterError};
use fjall::{Keyspace, PartitionHandle, PersistMode};
use logjam::errors::LogjamResult;
use logjam::store::{decode_values, encode_values, MapChange, RawEntry, TreeMapProvider};
use parking_lot::Mutex;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Raw map stored in one fjall partition.
///
/// All values of a key are packed into a single fjall value. Batches of
/// changes are written through one fjall write batch, so they land
/// together or not at all.
#[derive(Clone)]
pub struct FjallTreeMap {
    inner: Arc<FjallTreeMapInner>,
}

impl FjallTreeMap {
    pub(crate) fn new(
        name: String,
        keyspace: Keyspace,
        partition: PartitionHandle,
        persist_on_close: bool,
    ) -> FjallTreeMap {
        FjallTreeMap {
            inner: Arc::new(FjallTreeMapInner {
                name,
                keyspace,
                partition,
                persist_on_close,
                closed: AtomicBool::new(false),
                write_lock: Mutex::new(()),
            }),
        }
    }
}

impl TreeMapProvider for FjallTreeMap {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn get(&self, key: &[u8]) -> LogjamResult<Option<Vec<Vec<u8>>>> {
        self.inner.get(key)
    }

    fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<RawEntry>> {
        self.inner.range(lower, upper)
    }

    fn first_key(&self) -> LogjamResult<Option<Vec<u8>>> {
        self.inner.edge_key(true)
    }

    fn last_key(&self) -> LogjamResult<Option<Vec<u8>>> {
        self.inner.edge_key(false)
    }

    fn len(&self) -> LogjamResult<u64> {
        self.inner.len()
    }

    fn apply(&self, changes: Vec<MapChange>) -> LogjamResult<()> {
        self.inner.apply(changes)
    }

    fn clear(&self) -> LogjamResult<()> {
        self.inner.clear()
    }

    fn close(&self) -> LogjamResult<()> {
        self.inner.close()
    }

    fn is_closed(&self) -> LogjamResult<bool> {
        Ok(self.inner.closed.load(Ordering::Relaxed))
    }
}

struct FjallTreeMapInner {
    name: String,
    keyspace: Keyspace,
    partition: PartitionHandle,
    persist_on_close: bool,
    closed: AtomicBool,
    write_lock: Mutex<()>,
}

impl FjallTreeMapInner {
    fn check_opened(&self) -> LogjamResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Tree {} is closed", self.name);
            return Err(FjallAdapterError::TreeClosed(self.name.clone()).into());
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> LogjamResult<Option<Vec<Vec<u8>>>> {
        self.check_opened()?;
        match self.partition.get(key) {
            Ok(Some(blob)) => Ok(Some(decode_values(&blob)?)),
            Ok(None) => Ok(None),
            Err(err) => {
                log::error!("Failed to read from tree {}: {}", self.name, err);
                Err(to_logjam_error(err))
            }
        }
    }

    fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<RawEntry>> {
        self.check_opened()?;
        let mut entries = Vec::new();
        for item in self.partition.range::<&[u8], _>((lower, upper)) {
            match item {
                Ok((key, blob)) => entries.push((key.to_vec(), decode_values(&blob)?)),
                Err(err) => {
                    log::error!("Failed to scan tree {}: {}", self.name, err);
                    return Err(to_logjam_error(err));
                }
            }
        }
        Ok(entries)
    }

    fn edge_key(&self, first: bool) -> LogjamResult<Option<Vec<u8>>> {
        self.check_opened()?;
        let result = if first {
            self.partition.first_key_value()
        } else {
            self.partition.last_key_value()
        };
        match result {
            Ok(entry) => Ok(entry.map(|(key, _)| key.to_vec())),
            Err(err) => {
                log::error!("Failed to read edge key of tree {}: {}", self.name, err);
                Err(to_logjam_error(err))
            }
        }
    }

    fn len(&self) -> LogjamResult<u64> {
        self.check_opened()?;
        match self.partition.len() {
            Ok(count) => Ok(count as u64),
            Err(err) => {
                log::error!("Failed to count tree {}: {}", self.name, err);
                Err(to_logjam_error(err))
            }
        }
    }

    fn apply(&self, changes: Vec<MapChange>) -> LogjamResult<()> {
        self.check_opened()?;
        if changes.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock();
        let mut batch = self.keyspace.batch();
        for change in changes {
            match change {
                MapChange::Put(key, values) => {
                    batch.insert(&self.partition, key, encode_values(&values));
                }
                MapChange::Delete(key) => {
                    batch.remove(&self.partition, key);
                }
            }
        }

        batch.commit().map_err(|err| {
            log::error!("Failed to commit batch to tree {}: {}", self.name, err);
            to_logjam_error(err)
        })
    }

    fn clear(&self) -> LogjamResult<()> {
        self.check_opened()?;
        let _guard = self.write_lock.lock();
        let mut batch = self.keyspace.batch();
        for item in self.partition.keys() {
            match item {
                Ok(key) => batch.remove(&self.partition, key),
                Err(err) => {
                    log::error!("Failed to clear tree {}: {}", self.name, err);
                    return Err(to_logjam_error(err));
                }
            }
        }

        batch.commit().map_err(|err| {
            log::error!("Failed to clear tree {}: {}", self.name, err);
            to_logjam_error(err)
        })
    }

    fn close(&self) -> LogjamResult<()> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        if self.persist_on_close {
            self.keyspace
                .persist(PersistMode::SyncAll)
                .map_err(|err| {
                    log::error!("Failed to persist tree {} on close: {}", self.name, err);
                    to_logjam_error(err)
                })?;
        }
        log::debug!("Closed tree {}", self.name);
        Ok(())
    }
}
