use crate::config::{FjallConfig, FjallConfigInner};
use crate::error::{to_logjam_error, FjallAdapterError};
use crate::map::FjallTreeMap;
use dashmap::DashMap;
use fjall::{CompressionType, Keyspace, PersistMode};
use logjam::errors::LogjamResult;
use logjam::store::{CompareMode, StagedTree, StoreEngineProvider, TreeDb, TreeMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Persistent engine storing every tree in fjall.
///
/// Each storage directory gets one fjall keyspace (in the configured
/// keyspace sub directory) and every file name inside the directory maps to
/// a partition of that keyspace. Keyspaces stay open for the lifetime of
/// the engine so a storage can be closed and opened again cheaply.
///
/// # Examples
///
/// ```rust,ignore
/// let engine = FjallEngine::with_config()
///     .fsync_frequency(100)
///     .build();
/// let storage = Storage::open(&dir, StoreEngine::new(engine))?;
/// ```
#[derive(Clone)]
pub struct FjallEngine {
    inner: Arc<FjallEngineInner>,
}

impl Default for FjallEngine {
    fn default() -> Self {
        FjallEngine::new(FjallConfig::new())
    }
}

impl FjallEngine {
    pub fn new(config: FjallConfig) -> FjallEngine {
        FjallEngine {
            inner: Arc::new(FjallEngineInner {
                config,
                keyspaces: DashMap::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn with_config() -> FjallEngineBuilder {
        FjallEngineBuilder::new()
    }

    pub fn config(&self) -> &FjallConfig {
        &self.inner.config
    }

    /// Syncs every open keyspace to disk.
    pub fn commit(&self) -> LogjamResult<()> {
        self.inner.commit()
    }

    /// Commits and releases every keyspace. Trees opened before stay
    /// usable until dropped but the engine opens no new ones.
    pub fn close(&self) -> LogjamResult<()> {
        self.inner.commit()?;
        self.inner.closed.store(true, Ordering::Relaxed);
        self.inner.keyspaces.clear();
        log::info!("Closed fjall engine");
        Ok(())
    }

    /// Number of keyspaces currently open.
    pub fn keyspace_count(&self) -> usize {
        self.inner.keyspaces.len()
    }
}

impl StoreEngineProvider for FjallEngine {
    fn name(&self) -> String {
        "fjall".to_string()
    }

    fn open_tree(&self, path: &Path, compare: CompareMode) -> LogjamResult<TreeDb> {
        self.inner.open_tree(path, compare)
    }
}

struct FjallEngineInner {
    config: FjallConfig,
    keyspaces: DashMap<PathBuf, Keyspace>,
    closed: AtomicBool,
}

impl FjallEngineInner {
    fn keyspace(&self, directory: &Path) -> LogjamResult<Keyspace> {
        if let Some(keyspace) = self.keyspaces.get(directory) {
            return Ok(keyspace.clone());
        }

        let location = directory.join(self.config.keyspace_dir());
        log::info!("Opening fjall keyspace at {:?}", location);
        let keyspace = Keyspace::open(self.config.keyspace_config(&location)).map_err(|err| {
            log::error!("Failed to open keyspace at {:?}: {}", location, err);
            to_logjam_error(err)
        })?;

        let entry = self
            .keyspaces
            .entry(directory.to_path_buf())
            .or_insert(keyspace);
        Ok(entry.value().clone())
    }

    fn open_tree(&self, path: &Path, compare: CompareMode) -> LogjamResult<TreeDb> {
        if self.closed.load(Ordering::Relaxed) {
            log::error!("Cannot open {:?}: fjall engine is closed", path);
            return Err(FjallAdapterError::EngineClosed.into());
        }

        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => {
                log::error!("Tree path {:?} has no file name", path);
                return Err(FjallAdapterError::InvalidPath(path.display().to_string()).into());
            }
        };
        let directory = path.parent().unwrap_or_else(|| Path::new("."));

        let keyspace = self.keyspace(directory)?;
        let partition_name = encode_name(&file_name);
        let partition = keyspace
            .open_partition(&partition_name, self.config.partition_config())
            .map_err(|err| {
                log::error!("Failed to open partition {}: {}", partition_name, err);
                to_logjam_error(err)
            })?;

        log::debug!(
            "Opened fjall tree {} as partition {} ({})",
            file_name,
            partition_name,
            compare
        );
        let map = FjallTreeMap::new(
            file_name,
            keyspace,
            partition,
            self.config.persist_on_close(),
        );
        Ok(TreeDb::new(StagedTree::new(TreeMap::new(map), compare)))
    }

    fn commit(&self) -> LogjamResult<()> {
        for keyspace in self.keyspaces.iter() {
            keyspace.persist(PersistMode::SyncAll).map_err(|err| {
                log::error!("Failed to persist keyspace {:?}: {}", keyspace.key(), err);
                to_logjam_error(err)
            })?;
        }
        Ok(())
    }
}

impl Drop for FjallEngineInner {
    fn drop(&mut self) {
        if self.config.persist_on_close() {
            if let Err(err) = self.commit() {
                log::error!("Failed to persist keyspaces on drop: {}", err);
            }
        }
    }
}

/// Turns a file name into a valid partition name.
///
/// Partition names only allow alphanumerics and `_ - # $`. Dots become `#`
/// and any other byte becomes `$` followed by two hex digits.
pub(crate) fn encode_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-' => encoded.push(byte as char),
            b'.' => encoded.push('#'),
            other => encoded.push_str(&format!("${:02X}", other)),
        }
    }
    encoded
}

pub struct FjallEngineBuilder {
    config: FjallConfigInner,
}

impl Default for FjallEngineBuilder {
    fn default() -> Self {
        FjallEngineBuilder::new()
    }
}

impl FjallEngineBuilder {
    pub fn new() -> FjallEngineBuilder {
        FjallEngineBuilder {
            config: FjallConfigInner::new(),
        }
    }

    /// Larger caches and buffers with periodic fsync.
    pub fn production_preset(self) -> Self {
        self.cache_size(256 * 1024 * 1024)
            .max_write_buffer_size(128 * 1024 * 1024)
            .max_memtable_size(32 * 1024 * 1024)
            .bloom_filter_bits(10)
            .fsync_frequency(100)
            .compression_type(CompressionType::Lz4)
    }

    pub fn low_memory_preset(self) -> Self {
        self.cache_size(8 * 1024 * 1024)
            .max_write_buffer_size(16 * 1024 * 1024)
            .max_memtable_size(4 * 1024 * 1024)
            .flush_workers(1)
            .compaction_workers(1)
    }

    pub fn keyspace_dir(mut self, keyspace_dir: &str) -> Self {
        self.config.keyspace_dir = keyspace_dir.to_string();
        self
    }

    pub fn manual_journal_persist(mut self, manual_journal_persist: bool) -> Self {
        self.config.manual_journal_persist = manual_journal_persist;
        self
    }

    pub fn flush_workers(mut self, flush_workers: usize) -> Self {
        self.config.flush_workers = flush_workers;
        self
    }

    pub fn compaction_workers(mut self, compaction_workers: usize) -> Self {
        self.config.compaction_workers = compaction_workers;
        self
    }

    pub fn cache_size(mut self, cache_size: u64) -> Self {
        self.config.cache_size = cache_size;
        self
    }

    pub fn max_journaling_size(mut self, max_journaling_size: u64) -> Self {
        self.config.max_journaling_size = max_journaling_size;
        self
    }

    pub fn max_write_buffer_size(mut self, max_write_buffer_size: u64) -> Self {
        self.config.max_write_buffer_size = max_write_buffer_size;
        self
    }

    pub fn fsync_frequency(mut self, fsync_frequency: u16) -> Self {
        self.config.fsync_frequency = fsync_frequency;
        self
    }

    pub fn bloom_filter_bits(mut self, bloom_filter_bits: u8) -> Self {
        self.config.bloom_filter_bits = bloom_filter_bits;
        self
    }

    pub fn compression_type(mut self, compression_type: CompressionType) -> Self {
        self.config.compression_type = compression_type;
        self
    }

    pub fn max_memtable_size(mut self, max_memtable_size: u32) -> Self {
        self.config.max_memtable_size = max_memtable_size;
        self
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.config.block_size = block_size;
        self
    }

    pub fn persist_on_close(mut self, persist_on_close: bool) -> Self {
        self.config.persist_on_close = persist_on_close;
        self
    }

    pub fn build(self) -> FjallEngine {
        FjallEngine::new(FjallConfig::from_inner(self.config))
    }
}
