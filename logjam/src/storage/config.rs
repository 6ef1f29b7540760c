use crate::bson::Bson;
use crate::errors::{ErrorKind, LogjamError, LogjamResult};
use crate::store::CompareMode;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

/// Name of the configuration document inside a storage directory.
pub const CONFIG_FILE: &str = "config";

/// Kind of a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Exact match and range lookups on raw value bytes.
    Tree,
    /// Case-insensitive substring search.
    Text,
    /// Membership of a word in a set of words.
    Tag,
}

impl IndexKind {
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Tree => "tree",
            IndexKind::Text => "text",
            IndexKind::Tag => "tag",
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            IndexKind::Tree => "tcb",
            IndexKind::Text => "tcq",
            IndexKind::Tag => "tcw",
        }
    }

    const ALL: [IndexKind; 3] = [IndexKind::Tree, IndexKind::Text, IndexKind::Tag];
}

impl Display for IndexKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One entry of `index/<kind>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    kind: IndexKind,
    name: String,
    file: String,
    field: String,
    compare: CompareMode,
}

impl IndexConfig {
    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Name of the configuration entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing file, relative to the storage directory.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Document path whose value is indexed.
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn compare(&self) -> CompareMode {
        self.compare
    }
}

/// Typed view of a storage configuration document.
///
/// ```text
/// main/file       primary store file
/// main/compare    lex | int32 | int64 (default)
/// main/unique/*   unique field paths
/// journal/file    optional in-flight journal
/// index/{tree,text,tag}/<name>/{file,field,compare}
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    main_file: String,
    main_compare: CompareMode,
    unique: Vec<String>,
    journal_file: Option<String>,
    indexes: Vec<IndexConfig>,
    document: Bson,
}

impl StorageConfig {
    /// Reads `<dir>/config`.
    pub fn load(directory: &Path) -> LogjamResult<StorageConfig> {
        let path = directory.join(CONFIG_FILE);
        let document = Bson::load(&path).map_err(|e| {
            log::error!("Unable to load storage configuration {:?}: {}", path, e);
            LogjamError::new_with_cause(
                &format!("Unable to load storage configuration {:?}", path),
                ErrorKind::ConfigError,
                e,
            )
        })?;
        StorageConfig::from_bson(&document)
    }

    /// Parses a configuration document. Index entries without a `file` or a
    /// `field` are skipped with a warning.
    pub fn from_bson(document: &Bson) -> LogjamResult<StorageConfig> {
        let main_file = match document.get_path("main/file") {
            Some(file) if file.exists() && !file.is_nested() => file.as_string(),
            _ => {
                log::error!("Storage configuration has no main/file");
                return Err(LogjamError::new(
                    "Storage configuration has no main/file",
                    ErrorKind::ConfigError,
                ));
            }
        };

        let main_compare = document
            .get_path("main/compare")
            .map(|c| CompareMode::from_config(&c.as_string()))
            .unwrap_or(CompareMode::Int64);

        let unique = document
            .get_path("main/unique")
            .filter(|u| u.exists())
            .map(|u| u.as_list())
            .unwrap_or_default();

        let journal_file = document
            .get_path("journal/file")
            .filter(|f| f.exists() && !f.is_nested())
            .map(|f| f.as_string());

        let mut indexes = Vec::new();
        for kind in IndexKind::ALL {
            let entries = match document.get_path(&format!("index/{}", kind.name())) {
                Some(entries) => entries,
                None => continue,
            };
            for (name, entry) in entries.entries() {
                let file = entry.get("file").filter(|f| f.exists() && !f.is_nested());
                let field = entry.get("field").filter(|f| f.exists() && !f.is_nested());
                let (file, field) = match (file, field) {
                    (Some(file), Some(field)) => (file.as_string(), field.as_string()),
                    _ => {
                        log::warn!(
                            "Skipping {} index {}: file and field are required",
                            kind,
                            name
                        );
                        continue;
                    }
                };

                let compare = entry
                    .get("compare")
                    .map(|c| CompareMode::from_config(&c.as_string()))
                    .unwrap_or(CompareMode::Lex);

                indexes.push(IndexConfig {
                    kind,
                    name: name.into_owned(),
                    file,
                    field,
                    compare,
                });
            }
        }

        Ok(StorageConfig {
            main_file,
            main_compare,
            unique,
            journal_file,
            indexes,
            document: document.clone(),
        })
    }

    pub fn main_file(&self) -> &str {
        &self.main_file
    }

    pub fn main_compare(&self) -> CompareMode {
        self.main_compare
    }

    /// Field paths that must hold distinct values across records.
    pub fn unique_fields(&self) -> &[String] {
        &self.unique
    }

    pub fn journal_file(&self) -> Option<&str> {
        self.journal_file.as_deref()
    }

    /// Every usable index, tree indexes first, each kind in entry order.
    pub fn indexes(&self) -> &[IndexConfig] {
        &self.indexes
    }

    pub fn indexes_of(&self, kind: IndexKind) -> impl Iterator<Item = &IndexConfig> {
        self.indexes.iter().filter(move |i| i.kind == kind)
    }

    /// The document this configuration was read from.
    pub fn document(&self) -> &Bson {
        &self.document
    }

    pub(crate) fn resolve(&self, directory: &Path, file: &str) -> PathBuf {
        directory.join(file)
    }
}

/// Builds and writes storage configuration documents.
///
/// # Examples
///
/// ```rust,ignore
/// let config = StorageConfigBuilder::new("user")
///     .add_index(IndexKind::Tree, "email", CompareMode::Lex)
///     .add_index(IndexKind::Tag, "tags", CompareMode::Lex)
///     .add_unique("email")
///     .save(&dir)?;
/// let storage = Storage::open(&dir, engine)?;
/// ```
pub struct StorageConfigBuilder {
    name: String,
    document: Bson,
}

impl StorageConfigBuilder {
    /// Starts a configuration for record type `name` with an int64 primary
    /// store and a journal.
    pub fn new(name: &str) -> StorageConfigBuilder {
        let mut document = Bson::default();
        document.nav_mut("main/name").value(name);
        document.nav_mut("main/compare").value("int64");
        document
            .nav_mut("main/file")
            .value(format!("db.{}.tcb", name));
        document
            .nav_mut("journal/file")
            .value(format!("journal.{}.tcf", name));
        StorageConfigBuilder {
            name: name.to_string(),
            document,
        }
    }

    /// Key ordering of the primary store.
    pub fn compare(mut self, compare: CompareMode) -> Self {
        self.document.nav_mut("main/compare").value(compare.name());
        self
    }

    /// Stores without a journal skip crash repair on open.
    pub fn without_journal(mut self) -> Self {
        self.document.remove_child("journal");
        self
    }

    /// Adds an index on `field`. The entry is named after the field with `/`
    /// replaced by `~`.
    pub fn add_index(mut self, kind: IndexKind, field: &str, compare: CompareMode) -> Self {
        let entry_name = field.replace('/', "~");
        let entry = self
            .document
            .nav_mut(&format!("index/{}", kind.name()))
            .child_mut(&entry_name);
        entry.child_mut("file").value(format!(
            "index.{}.{}.{}",
            self.name,
            entry_name,
            kind.extension()
        ));
        entry.child_mut("field").value(field);
        entry.child_mut("compare").value(compare.name());
        self
    }

    /// Marks `field` unique. Unique fields need a tree index on the same
    /// field to be enforced.
    pub fn add_unique(mut self, field: &str) -> Self {
        self.document
            .nav_mut("main/unique")
            .push_child(Bson::from(field));
        self
    }

    /// The configuration document.
    pub fn build(self) -> Bson {
        self.document
    }

    /// Creates `directory` if needed and writes the configuration into it.
    pub fn save(self, directory: &Path) -> LogjamResult<StorageConfig> {
        std::fs::create_dir_all(directory).map_err(|e| {
            log::error!("Unable to create storage directory {:?}: {}", directory, e);
            LogjamError::from(e)
        })?;
        self.document.save(directory.join(CONFIG_FILE))?;
        StorageConfig::from_bson(&self.document)
    }
}
