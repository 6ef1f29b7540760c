use fjall::{CompressionType, Config, PartitionCreateOptions};
use std::path::Path;
use std::sync::Arc;

/// Tuning for the fjall keyspaces an engine opens.
///
/// Built through [FjallEngine::with_config](crate::FjallEngine::with_config)
/// and shared by every keyspace and partition of that engine.
#[derive(Clone)]
pub struct FjallConfig {
    inner: Arc<FjallConfigInner>,
}

impl Default for FjallConfig {
    fn default() -> Self {
        FjallConfig::new()
    }
}

impl FjallConfig {
    pub fn new() -> FjallConfig {
        FjallConfig {
            inner: Arc::new(FjallConfigInner::new()),
        }
    }

    pub(crate) fn from_inner(inner: FjallConfigInner) -> FjallConfig {
        FjallConfig {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn keyspace_config(&self, path: &Path) -> Config {
        let inner = &self.inner;
        let mut config = Config::new(path)
            .manual_journal_persist(inner.manual_journal_persist)
            .flush_workers(inner.flush_workers)
            .compaction_workers(inner.compaction_workers)
            .cache_size(inner.cache_size)
            .max_journaling_size(inner.max_journaling_size)
            .max_write_buffer_size(inner.max_write_buffer_size);

        if inner.fsync_frequency > 0 {
            config = config.fsync_ms(Some(inner.fsync_frequency));
        }
        config
    }

    pub(crate) fn partition_config(&self) -> PartitionCreateOptions {
        let inner = &self.inner;
        PartitionCreateOptions::default()
            .bloom_filter_bits(if inner.bloom_filter_bits == 0 {
                None
            } else {
                Some(inner.bloom_filter_bits)
            })
            .compression(inner.compression_type)
            .max_memtable_size(inner.max_memtable_size)
            .block_size(inner.block_size)
    }

    /// Directory, inside each storage directory, holding the keyspace.
    pub fn keyspace_dir(&self) -> &str {
        &self.inner.keyspace_dir
    }

    pub fn manual_journal_persist(&self) -> bool {
        self.inner.manual_journal_persist
    }

    pub fn flush_workers(&self) -> usize {
        self.inner.flush_workers
    }

    pub fn compaction_workers(&self) -> usize {
        self.inner.compaction_workers
    }

    pub fn cache_size(&self) -> u64 {
        self.inner.cache_size
    }

    pub fn max_journaling_size(&self) -> u64 {
        self.inner.max_journaling_size
    }

    pub fn max_write_buffer_size(&self) -> u64 {
        self.inner.max_write_buffer_size
    }

    /// Milliseconds between background fsyncs, `0` for none.
    pub fn fsync_frequency(&self) -> u16 {
        self.inner.fsync_frequency
    }

    /// Bits per key of each partition's bloom filter, `0` for none.
    pub fn bloom_filter_bits(&self) -> u8 {
        self.inner.bloom_filter_bits
    }

    pub fn compression_type(&self) -> CompressionType {
        self.inner.compression_type
    }

    pub fn max_memtable_size(&self) -> u32 {
        self.inner.max_memtable_size
    }

    pub fn block_size(&self) -> u32 {
        self.inner.block_size
    }

    /// Whether closing a tree syncs the keyspace journal to disk.
    pub fn persist_on_close(&self) -> bool {
        self.inner.persist_on_close
    }
}

#[derive(Clone)]
pub(crate) struct FjallConfigInner {
    pub(crate) keyspace_dir: String,
    pub(crate) manual_journal_persist: bool,
    pub(crate) flush_workers: usize,
    pub(crate) compaction_workers: usize,
    pub(crate) cache_size: u64,
    pub(crate) max_journaling_size: u64,
    pub(crate) max_write_buffer_size: u64,
    pub(crate) fsync_frequency: u16,
    pub(crate) bloom_filter_bits: u8,
    pub(crate) compression_type: CompressionType,
    pub(crate) max_memtable_size: u32,
    pub(crate) block_size: u32,
    pub(crate) persist_on_close: bool,
}

impl FjallConfigInner {
    pub const DEFAULT_KEYSPACE_DIR: &'static str = "fjall";

    pub const DEFAULT_CACHE_MB: u64 = 32;

    pub const DEFAULT_WRITE_BUFFER_MB: u64 = 64;

    pub const DEFAULT_MAX_JOURNALING_MB: u64 = 256;

    pub const DEFAULT_MEMTABLE_MB: u32 = 8;

    pub(crate) fn new() -> FjallConfigInner {
        let cpus = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(4);

        FjallConfigInner {
            keyspace_dir: Self::DEFAULT_KEYSPACE_DIR.to_string(),
            manual_journal_persist: false,
            flush_workers: cpus.max(1),
            compaction_workers: (cpus / 2).max(1),
            cache_size: Self::DEFAULT_CACHE_MB * 1_024 * 1_024,
            max_journaling_size: Self::DEFAULT_MAX_JOURNALING_MB * 1_024 * 1_024,
            max_write_buffer_size: Self::DEFAULT_WRITE_BUFFER_MB * 1_024 * 1_024,
            fsync_frequency: 0,
            bloom_filter_bits: 10,
            compression_type: CompressionType::Lz4,
            max_memtable_size: Self::DEFAULT_MEMTABLE_MB * 1_024 * 1_024,
            block_size: 4 * 1_024,
            persist_on_close: true,
        }
    }
}
