use crate::errors::LogjamResult;
use crate::store::{decode_record_key, encode_record_key, TreeDb};
use std::collections::BTreeSet;
use std::ops::{Bound, Deref};
use std::sync::Arc;

/// Full text index: maps record keys to their text and finds the keys whose
/// text contains a phrase.
pub trait TextSearcherProvider: Send + Sync {
    fn index(&self, key: u64, text: &str) -> LogjamResult<()>;

    fn remove(&self, key: u64, text: &str) -> LogjamResult<()>;

    /// Drops whatever text is indexed for `key`.
    fn purge(&self, key: u64) -> LogjamResult<()>;

    /// Keys whose text contains `terms`, ignoring case.
    fn search(&self, terms: &str) -> LogjamResult<BTreeSet<u64>>;

    fn truncate(&self) -> LogjamResult<()>;

    fn begin_transaction(&self) -> LogjamResult<()>;

    fn commit_transaction(&self) -> LogjamResult<()>;

    fn abort_transaction(&self) -> LogjamResult<()>;

    fn close(&self) -> LogjamResult<()>;
}

#[derive(Clone)]
pub struct TextSearcher {
    inner: Arc<dyn TextSearcherProvider>,
}

impl Deref for TextSearcher {
    type Target = Arc<dyn TextSearcherProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl TextSearcher {
    pub fn new<T: TextSearcherProvider + 'static>(inner: T) -> Self {
        TextSearcher {
            inner: Arc::new(inner),
        }
    }
}

/// Word index: maps each word to the record keys tagged with it.
pub trait TagSearcherProvider: Send + Sync {
    fn index(&self, key: u64, words: &BTreeSet<String>) -> LogjamResult<()>;

    fn remove(&self, key: u64, words: &BTreeSet<String>) -> LogjamResult<()>;

    /// Drops `key` from every word it is tagged with.
    fn purge(&self, key: u64) -> LogjamResult<()>;

    /// Keys tagged with exactly `word`.
    fn search(&self, word: &str) -> LogjamResult<BTreeSet<u64>>;

    fn truncate(&self) -> LogjamResult<()>;

    fn begin_transaction(&self) -> LogjamResult<()>;

    fn commit_transaction(&self) -> LogjamResult<()>;

    fn abort_transaction(&self) -> LogjamResult<()>;

    fn close(&self) -> LogjamResult<()>;
}

#[derive(Clone)]
pub struct TagSearcher {
    inner: Arc<dyn TagSearcherProvider>,
}

impl Deref for TagSearcher {
    type Target = Arc<dyn TagSearcherProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl TagSearcher {
    pub fn new<T: TagSearcherProvider + 'static>(inner: T) -> Self {
        TagSearcher {
            inner: Arc::new(inner),
        }
    }
}

/// Text index kept in a [TreeDb] keyed by record key.
///
/// Searching scans every entry, which is fine for the record counts a single
/// storage directory holds.
#[derive(Clone)]
pub struct TreeTextSearcher {
    tree: TreeDb,
}

impl TreeTextSearcher {
    pub fn new(tree: TreeDb) -> Self {
        TreeTextSearcher { tree }
    }
}

impl TextSearcherProvider for TreeTextSearcher {
    fn index(&self, key: u64, text: &str) -> LogjamResult<()> {
        self.tree
            .place(&encode_record_key(key), text.to_lowercase().as_bytes())
    }

    fn remove(&self, key: u64, _text: &str) -> LogjamResult<()> {
        self.tree.remove(&encode_record_key(key))
    }

    fn purge(&self, key: u64) -> LogjamResult<()> {
        self.tree.remove(&encode_record_key(key))
    }

    fn search(&self, terms: &str) -> LogjamResult<BTreeSet<u64>> {
        let needle = terms.to_lowercase();
        let mut keys = BTreeSet::new();
        for (key, values) in self.tree.range(Bound::Unbounded, Bound::Unbounded)? {
            let matched = values
                .iter()
                .any(|text| String::from_utf8_lossy(text).contains(&needle));
            if matched {
                keys.insert(decode_record_key(&key)?);
            }
        }
        Ok(keys)
    }

    fn truncate(&self) -> LogjamResult<()> {
        self.tree.truncate()
    }

    fn begin_transaction(&self) -> LogjamResult<()> {
        self.tree.begin_transaction()
    }

    fn commit_transaction(&self) -> LogjamResult<()> {
        self.tree.commit_transaction()
    }

    fn abort_transaction(&self) -> LogjamResult<()> {
        self.tree.abort_transaction()
    }

    fn close(&self) -> LogjamResult<()> {
        self.tree.close()
    }
}

/// Tag index kept in a [TreeDb]: each word holds the record keys tagged with
/// it as duplicate values.
#[derive(Clone)]
pub struct TreeTagSearcher {
    tree: TreeDb,
}

impl TreeTagSearcher {
    pub fn new(tree: TreeDb) -> Self {
        TreeTagSearcher { tree }
    }
}

impl TagSearcherProvider for TreeTagSearcher {
    fn index(&self, key: u64, words: &BTreeSet<String>) -> LogjamResult<()> {
        let value = encode_record_key(key);
        for word in words {
            self.tree.place_with_existing(word.as_bytes(), &value)?;
        }
        Ok(())
    }

    fn remove(&self, key: u64, words: &BTreeSet<String>) -> LogjamResult<()> {
        let value = encode_record_key(key);
        for word in words {
            self.tree.remove_from_existing(word.as_bytes(), &value)?;
        }
        Ok(())
    }

    fn purge(&self, key: u64) -> LogjamResult<()> {
        let value = encode_record_key(key);
        for (word, keys) in self.tree.range(Bound::Unbounded, Bound::Unbounded)? {
            if keys.iter().any(|k| k[..] == value[..]) {
                self.tree.remove_from_existing(&word, &value)?;
            }
        }
        Ok(())
    }

    fn search(&self, word: &str) -> LogjamResult<BTreeSet<u64>> {
        self.tree
            .at_together(word.as_bytes())?
            .iter()
            .map(|value| decode_record_key(value))
            .collect()
    }

    fn truncate(&self) -> LogjamResult<()> {
        self.tree.truncate()
    }

    fn begin_transaction(&self) -> LogjamResult<()> {
        self.tree.begin_transaction()
    }

    fn commit_transaction(&self) -> LogjamResult<()> {
        self.tree.commit_transaction()
    }

    fn abort_transaction(&self) -> LogjamResult<()> {
        self.tree.abort_transaction()
    }

    fn close(&self) -> LogjamResult<()> {
        self.tree.close()
    }
}
