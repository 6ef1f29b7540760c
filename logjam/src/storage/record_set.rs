use crate::bson::Bson;
use crate::common::Convertible;
use crate::errors::LogjamResult;
use crate::storage::Storage;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::ops::Bound;

/// How a filter merges new keys into the keys it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    /// Keep keys present in both.
    #[default]
    Intersection,
    /// Keep keys present in either.
    Union,
    /// Keep held keys absent from the other set.
    Complement,
    /// Keep keys present in exactly one.
    SymmetricDifference,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Intersection => "intersection",
            Operation::Union => "union",
            Operation::Complement => "complement",
            Operation::SymmetricDifference => "symmetric difference",
        }
    }

    fn apply(&self, held: &BTreeSet<u64>, other: &BTreeSet<u64>) -> BTreeSet<u64> {
        match self {
            Operation::Intersection => {
                let (smaller, larger) = if held.len() <= other.len() {
                    (held, other)
                } else {
                    (other, held)
                };
                smaller
                    .iter()
                    .filter(|key| larger.contains(key))
                    .copied()
                    .collect()
            }
            Operation::Union => held.union(other).copied().collect(),
            Operation::Complement => held.difference(other).copied().collect(),
            Operation::SymmetricDifference => held.symmetric_difference(other).copied().collect(),
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A set of document keys taken from a [Storage].
///
/// Index lookups only touch keys; documents are read and decoded when
/// [items](StorageFilter::items) or [first](StorageFilter::first) is
/// called. Lookups made through a filter merge their keys into the held set
/// using the filter's [Operation].
///
/// # Examples
///
/// ```rust,ignore
/// let admins = storage
///     .filter("role", "admin")?
///     .search("bio", "rust")?
///     .set_operation(Operation::Union)
///     .tagged("tags", "owner")?;
/// let users: Vec<Bson> = admins.items::<Bson>()?;
/// ```
#[derive(Debug, Clone)]
pub struct StorageFilter {
    storage: Storage,
    keys: BTreeSet<u64>,
    mode: Operation,
}

impl StorageFilter {
    pub(crate) fn new(storage: Storage, keys: BTreeSet<u64>, mode: Operation) -> Self {
        StorageFilter {
            storage,
            keys,
            mode,
        }
    }

    pub fn mode(&self) -> Operation {
        self.mode
    }

    /// Selects how later lookups merge their keys.
    pub fn set_operation(mut self, mode: Operation) -> Self {
        self.mode = mode;
        self
    }

    pub fn union_keys(mut self, keys: &BTreeSet<u64>) -> Self {
        self.keys.extend(keys.iter().copied());
        self
    }

    pub fn intersect_keys(mut self, keys: &BTreeSet<u64>) -> Self {
        self.keys = Operation::Intersection.apply(&self.keys, keys);
        self
    }

    pub fn include_key(mut self, key: u64) -> Self {
        self.keys.insert(key);
        self
    }

    pub fn include_keys<I: IntoIterator<Item = u64>>(mut self, keys: I) -> Self {
        self.keys.extend(keys);
        self
    }

    pub fn exclude_key(mut self, key: u64) -> Self {
        self.keys.remove(&key);
        self
    }

    pub fn exclude_keys<I: IntoIterator<Item = u64>>(mut self, keys: I) -> Self {
        for key in keys {
            self.keys.remove(&key);
        }
        self
    }

    /// Merges the keys whose tree index value equals `value`.
    pub fn refine<V: Into<Bson>>(self, index: &str, value: V) -> LogjamResult<Self> {
        let found = self.storage.tree_keys(index, &value.into())?;
        Ok(self.merge(index, found))
    }

    /// Merges the keys whose tree index value sorts after `value`.
    pub fn greater<V: Into<Bson>>(self, index: &str, value: V) -> LogjamResult<Self> {
        let value = value.into();
        let found =
            self.storage
                .tree_range_keys(index, Bound::Excluded(&value), Bound::Unbounded)?;
        Ok(self.merge(index, found))
    }

    /// Merges the keys whose tree index value sorts before `value`.
    pub fn lesser<V: Into<Bson>>(self, index: &str, value: V) -> LogjamResult<Self> {
        let value = value.into();
        let found =
            self.storage
                .tree_range_keys(index, Bound::Unbounded, Bound::Excluded(&value))?;
        Ok(self.merge(index, found))
    }

    /// Merges the keys whose text contains `terms`.
    pub fn search(self, index: &str, terms: &str) -> LogjamResult<Self> {
        let found = self.storage.text_keys(index, terms)?;
        Ok(self.merge(index, found))
    }

    /// Merges the keys tagged with `word`.
    pub fn tagged(self, index: &str, word: &str) -> LogjamResult<Self> {
        let found = self.storage.tag_keys(index, word)?;
        Ok(self.merge(index, found))
    }

    fn merge(mut self, index: &str, found: Option<BTreeSet<u64>>) -> Self {
        match found {
            Some(found) => {
                self.keys = self.mode.apply(&self.keys, &found);
            }
            None => {
                log::warn!("Index {} is not configured, filter left unchanged", index);
            }
        }
        self
    }

    /// Combines this filter with `other` without changing the mode.
    pub fn operate(mut self, op: Operation, other: &StorageFilter) -> Self {
        self.keys = op.apply(&self.keys, &other.keys);
        self
    }

    pub fn contains(&self, key: u64) -> bool {
        self.keys.contains(&key)
    }

    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &BTreeSet<u64> {
        &self.keys
    }

    /// Stored wire bytes of every held key that still has a document.
    pub fn items_raw(&self) -> LogjamResult<Vec<Vec<u8>>> {
        let mut items = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            if let Some(bytes) = self.storage.at_raw(*key)? {
                items.push(bytes);
            }
        }
        Ok(items)
    }

    /// Decodes every held document in key order. Keys whose document has
    /// been removed since the lookup are skipped.
    pub fn items<T: Convertible<Output = T>>(&self) -> LogjamResult<Vec<T>> {
        self.items_raw()?
            .iter()
            .map(|bytes| T::from_bson(&Bson::from_binary(bytes)?))
            .collect()
    }

    pub fn items_boxed<T: Convertible<Output = T>>(&self) -> LogjamResult<Vec<Box<T>>> {
        Ok(self.items::<T>()?.into_iter().map(Box::new).collect())
    }

    /// Decodes the document with the lowest held key into `target`.
    /// Returns `false` and leaves `target` alone when nothing is held.
    pub fn first<T: Convertible<Output = T>>(&self, target: &mut T) -> LogjamResult<bool> {
        for key in &self.keys {
            if let Some(bytes) = self.storage.at_raw(*key)? {
                *target = T::from_bson(&Bson::from_binary(&bytes)?)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
