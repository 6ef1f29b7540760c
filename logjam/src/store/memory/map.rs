use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use crate::store::{MapChange, RawEntry, TreeMapProvider};
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) type SharedSkipMap = Arc<SkipMap<Vec<u8>, Vec<Vec<u8>>>>;

/// In-memory raw map backed by a concurrent skip list.
///
/// Closing a handle does not drop the data: the skip list may be shared
/// through [InMemoryEngine](crate::store::memory::InMemoryEngine) so that
/// reopening the same path sees what was written before.
#[derive(Clone)]
pub struct InMemoryTreeMap {
    inner: Arc<InMemoryTreeMapInner>,
}

impl InMemoryTreeMap {
    pub fn new(name: &str) -> Self {
        Self::with_backing_map(name, Arc::new(SkipMap::new()))
    }

    pub(crate) fn with_backing_map(name: &str, backing_map: SharedSkipMap) -> Self {
        InMemoryTreeMap {
            inner: Arc::new(InMemoryTreeMapInner {
                name: name.to_string(),
                backing_map,
                closed: AtomicBool::new(false),
                write_lock: Mutex::new(()),
            }),
        }
    }
}

impl TreeMapProvider for InMemoryTreeMap {
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
        self.inner.check_opened()?;
        Ok(self.inner.backing_map.front().map(|e| e.key().clone()))
    }

    fn last_key(&self) -> LogjamResult<Option<Vec<u8>>> {
        self.inner.check_opened()?;
        Ok(self.inner.backing_map.back().map(|e| e.key().clone()))
    }

    fn len(&self) -> LogjamResult<u64> {
        self.inner.check_opened()?;
        Ok(self.inner.backing_map.len() as u64)
    }

    fn apply(&self, changes: Vec<MapChange>) -> LogjamResult<()> {
        self.inner.apply(changes)
    }

    fn clear(&self) -> LogjamResult<()> {
        self.inner.check_opened()?;
        let _guard = self.inner.write_lock.lock();
        self.inner.backing_map.clear();
        Ok(())
    }

    fn close(&self) -> LogjamResult<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> LogjamResult<bool> {
        Ok(self.inner.closed.load(Ordering::Relaxed))
    }
}

struct InMemoryTreeMapInner {
    name: String,
    backing_map: SharedSkipMap,
    closed: AtomicBool,
    write_lock: Mutex<()>,
}

impl InMemoryTreeMapInner {
    fn check_opened(&self) -> LogjamResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Map {} is closed", self.name);
            return Err(LogjamError::new(
                &format!("Map {} is closed", self.name),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> LogjamResult<Option<Vec<Vec<u8>>>> {
        self.check_opened()?;
        Ok(self.backing_map.get(key).map(|entry| entry.value().clone()))
    }

    fn range(&self, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LogjamResult<Vec<RawEntry>> {
        self.check_opened()?;
        Ok(self
            .backing_map
            .range::<[u8], _>((lower, upper))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    fn apply(&self, changes: Vec<MapChange>) -> LogjamResult<()> {
        self.check_opened()?;
        let _guard = self.write_lock.lock();
        for change in changes {
            match change {
                MapChange::Put(key, values) => {
                    self.backing_map.insert(key, values);
                }
                MapChange::Delete(key) => {
                    self.backing_map.remove(&key);
                }
            }
        }
        Ok(())
    }
}
