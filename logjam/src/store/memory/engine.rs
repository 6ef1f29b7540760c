use crate::errors::LogjamResult;
use crate::store::memory::map::SharedSkipMap;
use crate::store::memory::InMemoryTreeMap;
use crate::store::{CompareMode, StagedTree, StoreEngineProvider, TreeDb, TreeMap};
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Engine keeping every store in memory.
///
/// Stores are registered by path, so opening the same path again through
/// this engine (or a clone of it) returns the data written before. Nothing
/// outlives the last clone.
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    inner: Arc<InMemoryEngineInner>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct paths opened so far.
    pub fn store_count(&self) -> usize {
        self.inner.registry.len()
    }
}

impl StoreEngineProvider for InMemoryEngine {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn open_tree(&self, path: &Path, compare: CompareMode) -> LogjamResult<TreeDb> {
        let backing_map: SharedSkipMap = self
            .inner
            .registry
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(SkipMap::new()))
            .clone();

        let name = path.to_string_lossy();
        log::debug!("Opened in-memory store {} ({})", name, compare);
        let map = InMemoryTreeMap::with_backing_map(&name, backing_map);
        Ok(TreeDb::new(StagedTree::new(TreeMap::new(map), compare)))
    }
}

#[derive(Default)]
struct InMemoryEngineInner {
    registry: DashMap<PathBuf, SharedSkipMap>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreEngine;
    use std::collections::BTreeSet;

    #[test]
    fn test_reopen_sees_previous_data() {
        let engine = StoreEngine::new(InMemoryEngine::new());
        let path = Path::new("/tmp/logjam/db.test.tcb");

        let tree = engine.open_tree(path, CompareMode::Int64).unwrap();
        tree.place(&1u64.to_ne_bytes(), b"record").unwrap();
        tree.close().unwrap();

        let reopened = engine.open_tree(path, CompareMode::Int64).unwrap();
        assert_eq!(
            reopened.at(&1u64.to_ne_bytes()).unwrap(),
            Some(b"record".to_vec())
        );
    }

    #[test]
    fn test_paths_are_separate() {
        let engine = InMemoryEngine::new();
        let a = engine.open_tree(Path::new("a"), CompareMode::Lex).unwrap();
        let b = engine.open_tree(Path::new("b"), CompareMode::Lex).unwrap();
        a.place(b"k", b"v").unwrap();
        assert!(b.at(b"k").unwrap().is_none());
        assert_eq!(engine.store_count(), 2);
    }

    #[test]
    fn test_default_searchers() {
        let engine = InMemoryEngine::new();
        let text = engine.open_text_searcher(Path::new("text")).unwrap();
        text.index(3, "Hello").unwrap();
        assert_eq!(text.search("hell").unwrap(), BTreeSet::from([3]));

        let tags = engine.open_tag_searcher(Path::new("tags")).unwrap();
        tags.index(3, &BTreeSet::from(["x".to_string()])).unwrap();
        assert_eq!(tags.search("x").unwrap(), BTreeSet::from([3]));
    }
}
