use crate::errors::LogjamResult;
use crate::store::{
    CompareMode, TagSearcher, TextSearcher, TreeDb, TreeTagSearcher, TreeTextSearcher,
};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

/// Opens the byte-stores and search indexes a storage directory is made of.
///
/// Paths are the resolved file paths from the storage configuration. The
/// searcher methods default to tree-backed indexes, so an engine only has to
/// provide ordered trees.
pub trait StoreEngineProvider: Send + Sync {
    fn name(&self) -> String;

    fn open_tree(&self, path: &Path, compare: CompareMode) -> LogjamResult<TreeDb>;

    fn open_text_searcher(&self, path: &Path) -> LogjamResult<TextSearcher> {
        let tree = self.open_tree(path, CompareMode::Int64)?;
        Ok(TextSearcher::new(TreeTextSearcher::new(tree)))
    }

    fn open_tag_searcher(&self, path: &Path) -> LogjamResult<TagSearcher> {
        let tree = self.open_tree(path, CompareMode::Lex)?;
        Ok(TagSearcher::new(TreeTagSearcher::new(tree)))
    }
}

#[derive(Clone)]
pub struct StoreEngine {
    inner: Arc<dyn StoreEngineProvider>,
}

impl Deref for StoreEngine {
    type Target = Arc<dyn StoreEngineProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl StoreEngine {
    pub fn new<T: StoreEngineProvider + 'static>(inner: T) -> Self {
        StoreEngine {
            inner: Arc::new(inner),
        }
    }
}
