use logjam::errors::LogjamResult;
use logjam::storage::{IndexKind, Storage, StorageConfigBuilder};
use logjam::store::{CompareMode, StoreEngine};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use std::{env, fs, thread};

/// Runs `test` between `before` and `after`, always running `after` once a
/// context exists. Panics with the first error or panic seen.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> LogjamResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> LogjamResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> LogjamResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let start_time = Instant::now();
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let test_ctx = ctx.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(move || test(test_ctx)));
    let after_result = after(ctx);

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => panic!("Test failed after {:?}: {:?}", start_time.elapsed(), e),
        Err(panic_err) => std::panic::resume_unwind(panic_err),
    }
    if let Err(e) = after_result {
        panic!("After run failed: {:?}", e);
    }
}

#[derive(Clone)]
pub struct TestContext {
    path: PathBuf,
    engine: StoreEngine,
    storage: Storage,
}

impl TestContext {
    pub fn new(path: PathBuf, engine: StoreEngine, storage: Storage) -> Self {
        Self {
            path,
            engine,
            storage,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn engine(&self) -> StoreEngine {
        self.engine.clone()
    }

    pub fn storage(&self) -> Storage {
        self.storage.clone()
    }

    /// Closes the storage and opens the same directory again through the
    /// same engine.
    pub fn reopen(&self) -> LogjamResult<Storage> {
        self.storage.close()?;
        Storage::open(&self.path, self.engine.clone())
    }
}

pub fn random_path() -> PathBuf {
    let id = uuid::Uuid::new_v4();
    env::temp_dir().join(format!("logjam-{}", id))
}

/// Configuration used by most tests: a `user` storage with tree indexes on
/// `name`, `email` (unique) and `age`, a text index on `bio` and a tag
/// index on `tags`.
pub fn user_config() -> StorageConfigBuilder {
    StorageConfigBuilder::new("user")
        .add_index(IndexKind::Tree, "name", CompareMode::Lex)
        .add_index(IndexKind::Tree, "email", CompareMode::Lex)
        .add_index(IndexKind::Tree, "age", CompareMode::Int32)
        .add_index(IndexKind::Text, "bio", CompareMode::Lex)
        .add_index(IndexKind::Tag, "tags", CompareMode::Lex)
        .add_unique("email")
}

#[cfg(not(feature = "memory"))]
pub fn create_engine() -> StoreEngine {
    use logjam_fjall_adapter::FjallEngine;

    // single flush and compaction worker per test keyspace
    StoreEngine::new(FjallEngine::with_config().low_memory_preset().build())
}

#[cfg(feature = "memory")]
pub fn create_engine() -> StoreEngine {
    StoreEngine::new(logjam::store::memory::InMemoryEngine::new())
}

pub fn create_context_with(config: StorageConfigBuilder) -> LogjamResult<TestContext> {
    let path = random_path();
    if path.exists() {
        let _ = fs::remove_dir_all(&path);
    }
    config.save(&path)?;
    let engine = create_engine();
    let storage = Storage::open(&path, engine.clone())?;
    Ok(TestContext::new(path, engine, storage))
}

pub fn create_test_context() -> LogjamResult<TestContext> {
    create_context_with(user_config())
}

pub fn cleanup(ctx: TestContext) -> LogjamResult<()> {
    if let Err(e) = ctx.storage().close() {
        eprintln!("Warning: Failed to close storage: {:?}", e);
    }

    let path = ctx.path().to_path_buf();
    drop(ctx);

    let mut delay_ms = 50u64;
    for retry in 0..5 {
        if !path.exists() {
            return Ok(());
        }
        match fs::remove_dir_all(&path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if retry == 4 => {
                eprintln!("Warning: Failed to remove test directory {:?}: {:?}", path, e);
            }
            Err(_) => {
                thread::sleep(Duration::from_millis(delay_ms));
                delay_ms = (delay_ms * 2).min(1000);
            }
        }
    }
    Ok(())
}
