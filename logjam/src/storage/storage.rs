use crate::bson::Bson;
use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use crate::storage::journal::Journal;
use crate::storage::{
    IndexConfig, IndexKind, Operation, StorageConfig, StorageFilter, KEY_FIELD,
};
use crate::store::{
    decode_record_key, encode_record_key, CompareMode, StoreEngine, TagSearcher, TextSearcher,
    TreeDb,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A directory of documents with secondary indexes.
///
/// A storage directory holds a `config` document naming the primary store
/// and every tree, text and tag index (see [StorageConfig]). Each stored
/// document carries its primary key in the `__key` field, `0` meaning not
/// yet stored.
///
/// [place](Storage::place) and [remove](Storage::remove) run inside one
/// transaction spanning the primary store and every index. Begin runs in
/// the order primary, tree indexes, text indexes, tag indexes; commit and
/// abort run in the reverse order. There is no two-phase commit: a commit
/// that fails after earlier participants committed leaves them committed.
/// With a journal configured, the affected key stays marked in flight and
/// the next [checkpoint](Storage::checkpoint) re-indexes it.
///
/// Callers sharing one `Storage` must serialize writes themselves.
///
/// # Examples
///
/// ```rust,ignore
/// let storage = Storage::open(&dir, StoreEngine::new(InMemoryEngine::new()))?;
///
/// let mut user = doc! { "name" => "Jason", "tags" => vec!["a", "b"] };
/// storage.place(&mut user)?;
///
/// let found = storage.filter("name", "Jason")?;
/// let mut first = Bson::default();
/// assert!(found.first(&mut first)?);
/// ```
#[derive(Clone)]
pub struct Storage {
    inner: Arc<StorageInner>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("directory", &self.inner.directory)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Storage {
    /// Opens the storage described by `<directory>/config`.
    ///
    /// Index entries missing their file or field are skipped with a
    /// warning. A configured journal is checkpointed before returning.
    pub fn open<P: AsRef<Path>>(directory: P, engine: StoreEngine) -> LogjamResult<Storage> {
        let directory = directory.as_ref().to_path_buf();
        let config = StorageConfig::load(&directory)?;
        let inner = StorageInner::open(directory, config, engine)?;
        let storage = Storage {
            inner: Arc::new(inner),
        };
        storage.checkpoint()?;
        Ok(storage)
    }

    pub fn configuration(&self) -> &StorageConfig {
        &self.inner.config
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// The document stored under `key`, or an empty document.
    pub fn at(&self, key: u64) -> LogjamResult<Bson> {
        self.inner.check_opened()?;
        Ok(self.inner.stored(key)?.unwrap_or_default())
    }

    /// The wire bytes stored under `key`.
    pub fn at_raw(&self, key: u64) -> LogjamResult<Option<Vec<u8>>> {
        self.inner.check_opened()?;
        self.inner.primary.at(&encode_record_key(key))
    }

    /// Number of stored documents.
    pub fn count(&self) -> LogjamResult<u64> {
        self.inner.check_opened()?;
        self.inner.primary.len()
    }

    /// Every stored key.
    pub fn all(&self) -> LogjamResult<StorageFilter> {
        self.inner.check_opened()?;
        let keys = self.inner.all_keys()?;
        Ok(StorageFilter::new(self.clone(), keys, Operation::Intersection))
    }

    /// No keys.
    pub fn none(&self) -> StorageFilter {
        StorageFilter::new(self.clone(), BTreeSet::new(), Operation::Intersection)
    }

    /// Keys whose value at the tree index's field equals `value`. An
    /// unknown index yields [none](Storage::none).
    pub fn filter<V: Into<Bson>>(&self, index: &str, value: V) -> LogjamResult<StorageFilter> {
        self.inner.check_opened()?;
        match self.tree_keys(index, &value.into())? {
            Some(keys) => Ok(self.lookup_result(keys)),
            None => Ok(self.none()),
        }
    }

    /// Keys whose text at the text index's field contains `terms`.
    pub fn search(&self, index: &str, terms: &str) -> LogjamResult<StorageFilter> {
        self.inner.check_opened()?;
        match self.text_keys(index, terms)? {
            Some(keys) => Ok(self.lookup_result(keys)),
            None => Ok(self.none()),
        }
    }

    /// Keys tagged with `word` in the tag index.
    pub fn tagged(&self, index: &str, word: &str) -> LogjamResult<StorageFilter> {
        self.inner.check_opened()?;
        match self.tag_keys(index, word)? {
            Some(keys) => Ok(self.lookup_result(keys)),
            None => Ok(self.none()),
        }
    }

    /// Inserts or updates `node`.
    ///
    /// A `__key` of `0` (or none) inserts under the next free key; any other
    /// key replaces the stored version, whose index entries are dropped
    /// first. Values of unique fields already present in their tree index
    /// fail with [ErrorKind::StorageError]. On failure the transaction is
    /// aborted and `node` gets its original `__key` back.
    ///
    /// Inside a transaction opened with
    /// [begin_transaction](Storage::begin_transaction) the write joins it
    /// and is committed or aborted with it.
    pub fn place(&self, node: &mut Bson) -> LogjamResult<()> {
        self.inner.check_opened()?;
        let original = node.get(KEY_FIELD).cloned();
        let owns_transaction = !self.in_transaction();
        if owns_transaction {
            self.begin_transaction()?;
        }

        let outcome = self.inner.place_record(node).and_then(|key| {
            if owns_transaction {
                self.commit_transaction()?;
            }
            Ok(key)
        });

        match outcome {
            Ok(key) => {
                log::debug!("Placed record {} in {:?}", key, self.inner.directory);
                Ok(())
            }
            Err(err) => {
                match original {
                    Some(original) => {
                        node.set_child(KEY_FIELD, original);
                    }
                    None => {
                        node.remove_child(KEY_FIELD);
                    }
                }
                if owns_transaction && self.in_transaction() {
                    if let Err(abort_err) = self.abort_transaction() {
                        log::error!("Abort after failed place also failed: {}", abort_err);
                    }
                }
                Err(err)
            }
        }
    }

    /// Deletes the stored version of `node` and resets its `__key` to `0`.
    /// Does nothing for a node that was never stored.
    pub fn remove(&self, node: &mut Bson) -> LogjamResult<()> {
        self.inner.check_opened()?;
        let key = node.get(KEY_FIELD).map(|k| k.as_u64()).unwrap_or(0);
        if key == 0 {
            return Ok(());
        }

        let owns_transaction = !self.in_transaction();
        if owns_transaction {
            self.begin_transaction()?;
        }

        let outcome = self.inner.remove_record(key).and_then(|_| {
            if owns_transaction {
                self.commit_transaction()?;
            }
            Ok(())
        });

        match outcome {
            Ok(()) => {
                node.set_child(KEY_FIELD, Bson::Int64(0));
                log::debug!("Removed record {} from {:?}", key, self.inner.directory);
                Ok(())
            }
            Err(err) => {
                if owns_transaction && self.in_transaction() {
                    if let Err(abort_err) = self.abort_transaction() {
                        log::error!("Abort after failed remove also failed: {}", abort_err);
                    }
                }
                Err(err)
            }
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.primary.in_transaction()
    }

    /// Begins a transaction on the primary store, then on every index.
    pub fn begin_transaction(&self) -> LogjamResult<()> {
        self.inner.check_opened()?;
        self.inner.begin_transaction()
    }

    /// Commits every index in reverse order, then the primary store.
    pub fn commit_transaction(&self) -> LogjamResult<()> {
        self.inner.check_opened()?;
        self.inner.commit_transaction()
    }

    /// Aborts every index in reverse order, then the primary store.
    pub fn abort_transaction(&self) -> LogjamResult<()> {
        self.inner.check_opened()?;
        self.inner.abort_transaction()
    }

    /// Re-indexes every key the journal still has in flight, then clears
    /// the journal. Does nothing without a journal.
    pub fn checkpoint(&self) -> LogjamResult<()> {
        self.inner.check_opened()?;
        self.inner.checkpoint()
    }

    /// Empties every index and indexes every stored document again.
    pub fn rebuild(&self) -> LogjamResult<()> {
        self.inner.check_opened()?;
        self.inner.rebuild()
    }

    /// Checkpoints and closes every index and the primary store.
    pub fn close(&self) -> LogjamResult<()> {
        self.inner.close()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }

    fn lookup_result(&self, keys: BTreeSet<u64>) -> StorageFilter {
        StorageFilter::new(self.clone(), keys, Operation::Intersection)
    }

    pub(crate) fn tree_keys(&self, index: &str, value: &Bson) -> LogjamResult<Option<BTreeSet<u64>>> {
        let tree = match self.inner.tree_index(index) {
            Some(tree) => tree,
            None => {
                log::debug!("No tree index {} in {:?}", index, self.inner.directory);
                return Ok(None);
            }
        };
        let mut keys = BTreeSet::new();
        for probe in index_values(value) {
            for stored in tree.at_together(&probe)? {
                keys.insert(decode_record_key(&stored)?);
            }
        }
        Ok(Some(keys))
    }

    pub(crate) fn tree_range_keys(
        &self,
        index: &str,
        lower: Bound<&Bson>,
        upper: Bound<&Bson>,
    ) -> LogjamResult<Option<BTreeSet<u64>>> {
        let tree = match self.inner.tree_index(index) {
            Some(tree) => tree,
            None => return Ok(None),
        };
        let lower = lower.map(storage_key);
        let upper = upper.map(storage_key);
        let values = tree.at_range(
            lower.as_ref().map(|k| k.as_slice()),
            upper.as_ref().map(|k| k.as_slice()),
        )?;
        let keys = values
            .iter()
            .map(|stored| decode_record_key(stored))
            .collect::<LogjamResult<BTreeSet<u64>>>()?;
        Ok(Some(keys))
    }

    pub(crate) fn text_keys(&self, index: &str, terms: &str) -> LogjamResult<Option<BTreeSet<u64>>> {
        match self.inner.text_index(index) {
            Some(searcher) => Ok(Some(searcher.search(terms)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn tag_keys(&self, index: &str, word: &str) -> LogjamResult<Option<BTreeSet<u64>>> {
        match self.inner.tag_index(index) {
            Some(searcher) => Ok(Some(searcher.search(word)?)),
            None => Ok(None),
        }
    }
}

/// Index key of a scalar: its wire bytes, with strings reduced to their
/// content (no length prefix, no terminator).
pub(crate) fn storage_key(value: &Bson) -> Vec<u8> {
    match value {
        Bson::String(s) => s.as_bytes().to_vec(),
        other => other.to_binary(),
    }
}

/// Index keys of a field value. Containers contribute one key per child.
pub(crate) fn index_values(value: &Bson) -> Vec<Vec<u8>> {
    if value.is_nested() {
        value
            .entries()
            .filter(|(_, child)| child.exists())
            .map(|(_, child)| storage_key(child))
            .collect()
    } else {
        vec![storage_key(value)]
    }
}

enum Participant<'a> {
    Tree(&'a TreeDb),
    Text(&'a TextSearcher),
    Tag(&'a TagSearcher),
}

impl Participant<'_> {
    fn begin(&self) -> LogjamResult<()> {
        match self {
            Participant::Tree(tree) => tree.begin_transaction(),
            Participant::Text(searcher) => searcher.begin_transaction(),
            Participant::Tag(searcher) => searcher.begin_transaction(),
        }
    }

    fn commit(&self) -> LogjamResult<()> {
        match self {
            Participant::Tree(tree) => tree.commit_transaction(),
            Participant::Text(searcher) => searcher.commit_transaction(),
            Participant::Tag(searcher) => searcher.commit_transaction(),
        }
    }

    fn abort(&self) -> LogjamResult<()> {
        match self {
            Participant::Tree(tree) => tree.abort_transaction(),
            Participant::Text(searcher) => searcher.abort_transaction(),
            Participant::Tag(searcher) => searcher.abort_transaction(),
        }
    }

    fn close(&self) -> LogjamResult<()> {
        match self {
            Participant::Tree(tree) => tree.close(),
            Participant::Text(searcher) => searcher.close(),
            Participant::Tag(searcher) => searcher.close(),
        }
    }
}

struct StorageInner {
    directory: PathBuf,
    config: StorageConfig,
    primary: TreeDb,
    tree_indexes: Vec<(IndexConfig, TreeDb)>,
    text_indexes: Vec<(IndexConfig, TextSearcher)>,
    tag_indexes: Vec<(IndexConfig, TagSearcher)>,
    journal: Option<Journal>,
    journal_pending: Mutex<Vec<u64>>,
    closed: AtomicBool,
}

impl StorageInner {
    fn open(directory: PathBuf, config: StorageConfig, engine: StoreEngine) -> LogjamResult<Self> {
        log::info!(
            "Opening storage {:?} on the {} engine",
            directory,
            engine.name()
        );

        let primary_path = config.resolve(&directory, config.main_file());
        let primary = engine.open_tree(&primary_path, config.main_compare())?;

        let mut tree_indexes = Vec::new();
        let mut text_indexes = Vec::new();
        let mut tag_indexes = Vec::new();
        for index in config.indexes() {
            let path = config.resolve(&directory, index.file());
            log::info!(
                "Opening {} index {} on field {} at {:?}",
                index.kind(),
                index.name(),
                index.field(),
                path
            );
            match index.kind() {
                IndexKind::Tree => {
                    let tree = engine.open_tree(&path, index.compare())?;
                    tree_indexes.push((index.clone(), tree));
                }
                IndexKind::Text => {
                    let searcher = engine.open_text_searcher(&path)?;
                    text_indexes.push((index.clone(), searcher));
                }
                IndexKind::Tag => {
                    let searcher = engine.open_tag_searcher(&path)?;
                    tag_indexes.push((index.clone(), searcher));
                }
            }
        }

        for field in config.unique_fields() {
            if !tree_indexes.iter().any(|(index, _)| index.field() == field) {
                log::warn!(
                    "Unique field {} has no tree index and cannot be enforced",
                    field
                );
            }
        }

        let journal = match config.journal_file() {
            Some(file) => {
                let path = config.resolve(&directory, file);
                Some(Journal::new(engine.open_tree(&path, CompareMode::Int64)?))
            }
            None => None,
        };

        Ok(StorageInner {
            directory,
            config,
            primary,
            tree_indexes,
            text_indexes,
            tag_indexes,
            journal,
            journal_pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn check_opened(&self) -> LogjamResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Storage {:?} is closed", self.directory);
            return Err(LogjamError::new(
                &format!("Storage {:?} is closed", self.directory),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }

    fn find_index<'a, T>(indexes: &'a [(IndexConfig, T)], name: &str) -> Option<&'a T> {
        indexes
            .iter()
            .find(|(config, _)| config.field() == name)
            .or_else(|| indexes.iter().find(|(config, _)| config.name() == name))
            .map(|(_, index)| index)
    }

    fn tree_index(&self, name: &str) -> Option<&TreeDb> {
        Self::find_index(&self.tree_indexes, name)
    }

    fn text_index(&self, name: &str) -> Option<&TextSearcher> {
        Self::find_index(&self.text_indexes, name)
    }

    fn tag_index(&self, name: &str) -> Option<&TagSearcher> {
        Self::find_index(&self.tag_indexes, name)
    }

    fn participants(&self) -> Vec<Participant<'_>> {
        let mut participants = vec![Participant::Tree(&self.primary)];
        participants.extend(self.tree_indexes.iter().map(|(_, t)| Participant::Tree(t)));
        participants.extend(self.text_indexes.iter().map(|(_, s)| Participant::Text(s)));
        participants.extend(self.tag_indexes.iter().map(|(_, s)| Participant::Tag(s)));
        participants
    }

    fn stored(&self, key: u64) -> LogjamResult<Option<Bson>> {
        self.primary
            .at(&encode_record_key(key))?
            .map(|bytes| Bson::from_binary(&bytes))
            .transpose()
    }

    fn all_keys(&self) -> LogjamResult<BTreeSet<u64>> {
        self.primary
            .range_keys(Bound::Unbounded, Bound::Unbounded)?
            .iter()
            .map(|key| decode_record_key(key))
            .collect()
    }

    fn next_key(&self) -> LogjamResult<u64> {
        let max = if self.primary.compare_mode() == CompareMode::Int64 {
            match self.primary.max_key()? {
                Some(key) => decode_record_key(&key)?,
                None => 0,
            }
        } else {
            self.all_keys()?.into_iter().next_back().unwrap_or(0)
        };
        Ok(max + 1)
    }

    fn begin_transaction(&self) -> LogjamResult<()> {
        let participants = self.participants();
        for (position, participant) in participants.iter().enumerate() {
            if let Err(err) = participant.begin() {
                log::error!("Unable to begin storage transaction: {}", err);
                for begun in participants[..position].iter().rev() {
                    if let Err(abort_err) = begun.abort() {
                        log::error!("Unable to unwind transaction begin: {}", abort_err);
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn ensure_transaction(&self, action: &str) -> LogjamResult<()> {
        if !self.primary.in_transaction() {
            log::error!("Cannot {} storage {:?}: no active transaction", action, self.directory);
            return Err(LogjamError::new(
                &format!("Cannot {} storage: no active transaction", action),
                ErrorKind::TransactionError,
            ));
        }
        Ok(())
    }

    fn commit_transaction(&self) -> LogjamResult<()> {
        self.ensure_transaction("commit")?;
        let mut failure: Option<LogjamError> = None;
        for participant in self.participants().iter().rev() {
            if failure.is_none() {
                if let Err(err) = participant.commit() {
                    log::error!("Commit failed, aborting the remaining participants: {}", err);
                    failure = Some(err);
                }
            } else if let Err(abort_err) = participant.abort() {
                log::error!("Unable to abort after failed commit: {}", abort_err);
            }
        }

        let pending = std::mem::take(&mut *self.journal_pending.lock());
        match failure {
            None => self.complete_journal(&pending),
            Some(err) => {
                if !pending.is_empty() {
                    log::warn!(
                        "Keys {:?} stay in flight until the next checkpoint",
                        pending
                    );
                }
                Err(err)
            }
        }
    }

    fn abort_transaction(&self) -> LogjamResult<()> {
        self.ensure_transaction("abort")?;
        let mut failure: Option<LogjamError> = None;
        for participant in self.participants().iter().rev() {
            if let Err(err) = participant.abort() {
                log::error!("Unable to abort storage transaction: {}", err);
                failure.get_or_insert(err);
            }
        }

        let pending = std::mem::take(&mut *self.journal_pending.lock());
        match failure {
            None => self.complete_journal(&pending),
            Some(err) => Err(err),
        }
    }

    fn start_journal(&self, key: u64) -> LogjamResult<()> {
        if let Some(journal) = &self.journal {
            journal.start(key)?;
            self.journal_pending.lock().push(key);
        }
        Ok(())
    }

    fn complete_journal(&self, keys: &[u64]) -> LogjamResult<()> {
        if let Some(journal) = &self.journal {
            for key in keys {
                journal.complete(*key)?;
            }
        }
        Ok(())
    }

    fn place_record(&self, node: &mut Bson) -> LogjamResult<u64> {
        let current = node.get(KEY_FIELD).map(|k| k.as_u64()).unwrap_or(0);
        let key = if current == 0 { self.next_key()? } else { current };
        self.start_journal(key)?;

        if current != 0 {
            if let Some(previous) = self.stored(current)? {
                self.unindex_record(current, &previous)?;
            }
        }

        self.check_unique(node)?;

        node.set_child(KEY_FIELD, Bson::Int64(key as i64));
        self.primary
            .place(&encode_record_key(key), &node.to_binary())?;
        self.reindex(key)?;
        Ok(key)
    }

    fn remove_record(&self, key: u64) -> LogjamResult<()> {
        self.start_journal(key)?;
        if let Some(previous) = self.stored(key)? {
            self.unindex_record(key, &previous)?;
        }
        self.primary.remove(&encode_record_key(key))
    }

    fn check_unique(&self, node: &Bson) -> LogjamResult<()> {
        for field in self.config.unique_fields() {
            let value = match node.get_path(field) {
                Some(value) if value.exists() => value,
                _ => continue,
            };
            let tree = match self.tree_index(field) {
                Some(tree) => tree,
                None => continue,
            };
            for probe in index_values(value) {
                if !tree.at_together(&probe)?.is_empty() {
                    log::error!(
                        "Unable to place record because of unique constraint [{}].",
                        field
                    );
                    return Err(LogjamError::new(
                        &format!(
                            "Unable to place record because of unique constraint [{}].",
                            field
                        ),
                        ErrorKind::StorageError,
                    ));
                }
            }
        }
        Ok(())
    }

    fn is_unique(&self, field: &str) -> bool {
        self.config.unique_fields().iter().any(|f| f == field)
    }

    fn reindex(&self, key: u64) -> LogjamResult<()> {
        match self.stored(key)? {
            Some(record) => self.index_record(key, &record),
            None => Ok(()),
        }
    }

    fn index_record(&self, key: u64, record: &Bson) -> LogjamResult<()> {
        log::debug!("Indexing record {}", key);
        let stored_key = encode_record_key(key);
        for (index, tree) in &self.tree_indexes {
            let value = match record.get_path(index.field()) {
                Some(value) if value.exists() => value,
                _ => continue,
            };
            let unique = self.is_unique(index.field());
            for probe in index_values(value) {
                if unique {
                    tree.place(&probe, &stored_key)?;
                } else {
                    tree.place_with_existing(&probe, &stored_key)?;
                }
            }
        }

        for (index, searcher) in &self.text_indexes {
            if let Some(value) = record.get_path(index.field()).filter(|v| v.exists()) {
                searcher.index(key, &value.as_string())?;
            }
        }

        for (index, searcher) in &self.tag_indexes {
            if let Some(value) = record.get_path(index.field()).filter(|v| v.exists()) {
                searcher.index(key, &value.as_set())?;
            }
        }
        Ok(())
    }

    fn unindex_record(&self, key: u64, record: &Bson) -> LogjamResult<()> {
        log::debug!("Removing record {} from indexes", key);
        let stored_key = encode_record_key(key);
        for (index, tree) in &self.tree_indexes {
            if let Some(value) = record.get_path(index.field()).filter(|v| v.exists()) {
                for probe in index_values(value) {
                    tree.remove_from_existing(&probe, &stored_key)?;
                }
            }
        }

        for (index, searcher) in &self.text_indexes {
            if let Some(value) = record.get_path(index.field()).filter(|v| v.exists()) {
                searcher.remove(key, &value.as_string())?;
            }
        }

        for (index, searcher) in &self.tag_indexes {
            if let Some(value) = record.get_path(index.field()).filter(|v| v.exists()) {
                searcher.remove(key, &value.as_set())?;
            }
        }
        Ok(())
    }

    /// Drops every index entry pointing at `key`, whatever value it was
    /// indexed under.
    fn purge_record(&self, key: u64) -> LogjamResult<()> {
        log::debug!("Purging record {} from indexes", key);
        let stored_key = encode_record_key(key);
        for (_, tree) in &self.tree_indexes {
            for (value, keys) in tree.range(Bound::Unbounded, Bound::Unbounded)? {
                if keys.iter().any(|k| k[..] == stored_key[..]) {
                    tree.remove_from_existing(&value, &stored_key)?;
                }
            }
        }

        for (_, searcher) in &self.text_indexes {
            searcher.purge(key)?;
        }

        for (_, searcher) in &self.tag_indexes {
            searcher.purge(key)?;
        }
        Ok(())
    }

    fn run_in_transaction<F>(&self, work: F) -> LogjamResult<()>
    where
        F: FnOnce() -> LogjamResult<()>,
    {
        self.begin_transaction()?;
        match work().and_then(|_| self.commit_transaction()) {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.primary.in_transaction() {
                    if let Err(abort_err) = self.abort_transaction() {
                        log::error!("Unable to abort storage transaction: {}", abort_err);
                    }
                }
                Err(err)
            }
        }
    }

    fn checkpoint(&self) -> LogjamResult<()> {
        let journal = match &self.journal {
            Some(journal) => journal,
            None => return Ok(()),
        };

        let incomplete = journal.incomplete()?;
        if !incomplete.is_empty() {
            log::info!(
                "Repairing {} interrupted writes in {:?}",
                incomplete.len(),
                self.directory
            );
            self.run_in_transaction(|| {
                for key in &incomplete {
                    self.purge_record(*key)?;
                    if let Some(record) = self.stored(*key)? {
                        self.index_record(*key, &record)?;
                    }
                }
                Ok(())
            })?;
        }
        journal.clear()?;
        log::info!("Checkpoint of {:?} complete", self.directory);
        Ok(())
    }

    fn rebuild(&self) -> LogjamResult<()> {
        log::info!("Rebuilding indexes of {:?}", self.directory);
        self.run_in_transaction(|| {
            for (_, tree) in &self.tree_indexes {
                tree.truncate()?;
            }
            for (_, searcher) in &self.text_indexes {
                searcher.truncate()?;
            }
            for (_, searcher) in &self.tag_indexes {
                searcher.truncate()?;
            }

            let records = self.primary.range(Bound::Unbounded, Bound::Unbounded)?;
            for (key, values) in records {
                let key = decode_record_key(&key)?;
                if let Some(bytes) = values.first() {
                    let record = Bson::from_binary(bytes)?;
                    self.index_record(key, &record)?;
                }
            }
            Ok(())
        })
    }

    fn close(&self) -> LogjamResult<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Ok(());
        }
        if self.primary.in_transaction() {
            log::warn!("Closing storage {:?} with an open transaction", self.directory);
            self.abort_transaction()?;
        }
        self.checkpoint()?;
        self.closed.store(true, Ordering::Relaxed);

        for participant in self.participants().iter().rev() {
            participant.close()?;
        }
        if let Some(journal) = &self.journal {
            journal.close()?;
        }
        log::info!("Closed storage {:?}", self.directory);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::storage::StorageConfigBuilder;
    use crate::store::memory::InMemoryEngine;
    use uuid::Uuid;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("logjam-storage-{}", Uuid::new_v4()))
    }

    fn user_storage(engine: &StoreEngine) -> (PathBuf, Storage) {
        let dir = test_dir();
        StorageConfigBuilder::new("user")
            .add_index(IndexKind::Tree, "name", CompareMode::Lex)
            .add_index(IndexKind::Tree, "email", CompareMode::Lex)
            .add_index(IndexKind::Tree, "age", CompareMode::Int32)
            .add_index(IndexKind::Text, "bio", CompareMode::Lex)
            .add_index(IndexKind::Tag, "tags", CompareMode::Lex)
            .add_unique("email")
            .save(&dir)
            .unwrap();
        let storage = Storage::open(&dir, engine.clone()).unwrap();
        (dir, storage)
    }

    fn memory_engine() -> StoreEngine {
        StoreEngine::new(InMemoryEngine::new())
    }

    fn key_of(node: &Bson) -> u64 {
        node.get(KEY_FIELD).map(|k| k.as_u64()).unwrap_or(0)
    }

    #[test]
    fn test_place_assigns_keys() {
        let (dir, storage) = user_storage(&memory_engine());
        let mut first = doc! { "name" => "a" };
        let mut second = doc! { "name" => "b" };
        storage.place(&mut first).unwrap();
        storage.place(&mut second).unwrap();

        assert_eq!(key_of(&first), 1);
        assert_eq!(key_of(&second), 2);
        assert_eq!(storage.at(2).unwrap(), second);
        assert_eq!(storage.count().unwrap(), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_at_missing_is_empty() {
        let (dir, storage) = user_storage(&memory_engine());
        let missing = storage.at(42).unwrap();
        assert!(!missing.exists());
        assert!(storage.at_raw(42).unwrap().is_none());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_update_moves_index_entries() {
        let (dir, storage) = user_storage(&memory_engine());
        let mut user = doc! { "name" => "old" };
        storage.place(&mut user).unwrap();
        user.set_child("name", Bson::from("new"));
        storage.place(&mut user).unwrap();

        assert_eq!(key_of(&user), 1);
        assert!(storage.filter("name", "old").unwrap().is_empty());
        assert!(storage.filter("name", "new").unwrap().contains(1));
        assert_eq!(storage.count().unwrap(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unique_violation_rolls_back() {
        let (dir, storage) = user_storage(&memory_engine());
        let mut first = doc! { "name" => "a", "email" => "x@y" };
        storage.place(&mut first).unwrap();

        let mut second = doc! { "name" => "b", "email" => "x@y" };
        let err = storage.place(&mut second).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::StorageError);
        assert_eq!(
            err.message(),
            "Unable to place record because of unique constraint [email]."
        );

        assert!(second.get(KEY_FIELD).is_none());
        assert!(!storage.at(2).unwrap().exists());
        assert!(storage.filter("name", "b").unwrap().is_empty());
        assert!(!storage.in_transaction());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unique_allows_updating_same_record() {
        let (dir, storage) = user_storage(&memory_engine());
        let mut user = doc! { "email" => "x@y", "name" => "a" };
        storage.place(&mut user).unwrap();
        user.set_child("name", Bson::from("b"));
        storage.place(&mut user).unwrap();
        assert_eq!(storage.filter("email", "x@y").unwrap().size(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_failed_update_restores_key() {
        let (dir, storage) = user_storage(&memory_engine());
        let mut first = doc! { "email" => "one" };
        let mut second = doc! { "email" => "two" };
        storage.place(&mut first).unwrap();
        storage.place(&mut second).unwrap();

        second.set_child("email", Bson::from("one"));
        assert!(storage.place(&mut second).is_err());
        assert_eq!(key_of(&second), 2);
        // the stored version and its index entries are untouched
        assert_eq!(storage.at(2).unwrap().nav("email").unwrap().as_string(), "two");
        assert!(storage.filter("email", "two").unwrap().contains(2));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_remove_clears_indexes() {
        let (dir, storage) = user_storage(&memory_engine());
        let mut user = doc! { "name" => "Jason", "bio" => "Writes Rust", "tags" => vec!["a", "b"] };
        storage.place(&mut user).unwrap();
        assert_eq!(storage.search("bio", "rust").unwrap().size(), 1);
        assert_eq!(storage.tagged("tags", "b").unwrap().size(), 1);

        storage.remove(&mut user).unwrap();
        assert_eq!(key_of(&user), 0);
        assert!(storage.filter("name", "Jason").unwrap().is_empty());
        assert!(storage.search("bio", "rust").unwrap().is_empty());
        assert!(storage.tagged("tags", "a").unwrap().is_empty());
        assert_eq!(storage.count().unwrap(), 0);

        // removing an unstored node is a no-op
        storage.remove(&mut user).unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_unknown_index_yields_none() {
        let (dir, storage) = user_storage(&memory_engine());
        let mut user = doc! { "name" => "a" };
        storage.place(&mut user).unwrap();
        assert!(storage.filter("missing", "a").unwrap().is_empty());
        assert!(storage.search("missing", "a").unwrap().is_empty());
        assert!(storage.tagged("missing", "a").unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_numeric_tree_index() {
        let (dir, storage) = user_storage(&memory_engine());
        for age in [30, 40, 50] {
            let mut user = doc! { "age" => age };
            storage.place(&mut user).unwrap();
        }
        assert_eq!(
            storage.filter("age", 40).unwrap().keys(),
            &BTreeSet::from([2])
        );
        let older = storage.all().unwrap().greater("age", 30).unwrap();
        assert_eq!(older.keys(), &BTreeSet::from([2, 3]));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_explicit_transaction() {
        let (dir, storage) = user_storage(&memory_engine());
        storage.begin_transaction().unwrap();
        let mut a = doc! { "name" => "a" };
        let mut b = doc! { "name" => "b" };
        storage.place(&mut a).unwrap();
        storage.place(&mut b).unwrap();
        assert!(storage.in_transaction());
        storage.abort_transaction().unwrap();

        assert_eq!(storage.count().unwrap(), 0);
        assert!(storage.filter("name", "a").unwrap().is_empty());

        let err = storage.commit_transaction().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::TransactionError);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_rebuild_restores_indexes() {
        let engine = memory_engine();
        let (dir, storage) = user_storage(&engine);
        let mut user = doc! { "name" => "a", "tags" => vec!["t"] };
        storage.place(&mut user).unwrap();

        // wipe the tag index behind the storage's back
        let tag_file = dir.join("index.user.tags.tcw");
        engine.open_tag_searcher(&tag_file).unwrap().truncate().unwrap();
        assert!(storage.tagged("tags", "t").unwrap().is_empty());

        storage.rebuild().unwrap();
        assert!(storage.tagged("tags", "t").unwrap().contains(1));
        assert!(storage.filter("name", "a").unwrap().contains(1));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_checkpoint_repairs_in_flight_keys() {
        let engine = memory_engine();
        let (dir, storage) = user_storage(&engine);
        let mut user = doc! { "name" => "a" };
        storage.place(&mut user).unwrap();

        // simulate a write that stored the record but never indexed it
        let mut stored = storage.at(1).unwrap();
        stored.set_child("name", Bson::from("b"));
        let primary = engine
            .open_tree(&dir.join("db.user.tcb"), CompareMode::Int64)
            .unwrap();
        primary
            .place(&encode_record_key(1), &stored.to_binary())
            .unwrap();
        let journal = engine
            .open_tree(&dir.join("journal.user.tcf"), CompareMode::Int64)
            .unwrap();
        Journal::new(journal).start(1).unwrap();

        storage.checkpoint().unwrap();
        assert!(storage.filter("name", "b").unwrap().contains(1));
        assert!(storage.filter("name", "a").unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_checkpoint_drops_entries_of_uncommitted_versions() {
        let engine = memory_engine();
        let (dir, storage) = user_storage(&engine);
        let mut user = doc! { "name" => "a", "bio" => "old bio", "tags" => vec!["old"] };
        storage.place(&mut user).unwrap();

        // indexes hold a newer version of record 1 and a record 2 whose
        // primary write never landed
        let names = engine
            .open_tree(&dir.join("index.user.name.tcb"), CompareMode::Lex)
            .unwrap();
        names.place_with_existing(b"b", &encode_record_key(1)).unwrap();
        names.place_with_existing(b"ghost", &encode_record_key(2)).unwrap();
        let bios = engine
            .open_text_searcher(&dir.join("index.user.bio.tcq"))
            .unwrap();
        bios.index(2, "ghost bio").unwrap();
        let tags = engine
            .open_tag_searcher(&dir.join("index.user.tags.tcw"))
            .unwrap();
        tags.index(1, &BTreeSet::from(["new".to_string()])).unwrap();
        tags.index(2, &BTreeSet::from(["ghost".to_string()])).unwrap();

        let journal = Journal::new(
            engine
                .open_tree(&dir.join("journal.user.tcf"), CompareMode::Int64)
                .unwrap(),
        );
        journal.start(1).unwrap();
        journal.start(2).unwrap();

        storage.checkpoint().unwrap();

        // update case: only the stored version stays indexed
        assert_eq!(storage.filter("name", "a").unwrap().keys(), &BTreeSet::from([1]));
        assert!(storage.filter("name", "b").unwrap().is_empty());
        assert_eq!(storage.tagged("tags", "old").unwrap().keys(), &BTreeSet::from([1]));
        assert!(storage.tagged("tags", "new").unwrap().is_empty());
        assert_eq!(storage.search("bio", "old").unwrap().keys(), &BTreeSet::from([1]));

        // insert case: nothing points at the missing record
        assert!(storage.filter("name", "ghost").unwrap().is_empty());
        assert!(storage.tagged("tags", "ghost").unwrap().is_empty());
        assert!(storage.search("bio", "ghost").unwrap().is_empty());
        assert!(journal.incomplete().unwrap().is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_reopen_and_close() {
        let engine = memory_engine();
        let (dir, storage) = user_storage(&engine);
        let mut user = doc! { "name" => "a" };
        storage.place(&mut user).unwrap();
        storage.close().unwrap();
        assert!(storage.is_closed());
        let err = storage.at(1).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidOperation);
        // closing twice is fine
        storage.close().unwrap();

        let reopened = Storage::open(&dir, engine).unwrap();
        assert_eq!(reopened.at(1).unwrap(), user);
        assert!(reopened.filter("name", "a").unwrap().contains(1));
        let mut next = doc! { "name" => "b" };
        reopened.place(&mut next).unwrap();
        assert_eq!(key_of(&next), 2);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_open_without_config_fails() {
        let err = Storage::open(test_dir(), memory_engine()).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ConfigError);
    }

    #[test]
    fn test_storage_key_strips_string_framing() {
        assert_eq!(storage_key(&Bson::from("abc")), b"abc".to_vec());
        assert_eq!(storage_key(&Bson::from(7)), 7i32.to_ne_bytes().to_vec());
        assert_eq!(
            index_values(&Bson::from(vec!["a", "b"])),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
    }
}
