use crate::errors::LogjamResult;
use crate::store::{decode_record_key, encode_record_key, TreeDb};
use std::ops::Bound;

const IN_FLIGHT: u8 = 0;
const COMPLETE: u8 = 1;

/// Records which keys are being written.
///
/// A key is marked in flight before any store or index is touched and
/// marked complete once the surrounding transaction has committed or
/// aborted. Keys still in flight on the next checkpoint belong to writes
/// that may have reached only some of the indexes.
///
/// Journal writes bypass the storage transaction so they survive its
/// failure.
#[derive(Clone)]
pub(crate) struct Journal {
    tree: TreeDb,
}

impl Journal {
    pub(crate) fn new(tree: TreeDb) -> Self {
        Journal { tree }
    }

    pub(crate) fn start(&self, key: u64) -> LogjamResult<()> {
        self.tree.place(&encode_record_key(key), &[IN_FLIGHT])
    }

    pub(crate) fn complete(&self, key: u64) -> LogjamResult<()> {
        self.tree.place(&encode_record_key(key), &[COMPLETE])
    }

    /// Keys started but never completed.
    pub(crate) fn incomplete(&self) -> LogjamResult<Vec<u64>> {
        let mut keys = Vec::new();
        for (key, values) in self.tree.range(Bound::Unbounded, Bound::Unbounded)? {
            let in_flight = values
                .first()
                .map(|flag| flag.first() == Some(&IN_FLIGHT))
                .unwrap_or(false);
            if in_flight {
                keys.push(decode_record_key(&key)?);
            }
        }
        Ok(keys)
    }

    pub(crate) fn clear(&self) -> LogjamResult<()> {
        self.tree.truncate()
    }

    pub(crate) fn close(&self) -> LogjamResult<()> {
        self.tree.close()
    }
}
