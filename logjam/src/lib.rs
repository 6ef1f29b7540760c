//! # LogJam - Embedded Document Storage
//!
//! A document engine built from three layers:
//!
//! - [bson]: a recursive document node ([bson::Bson]) with a compact
//!   binary wire format.
//! - [storage]: a storage directory holding a primary store plus tree,
//!   text and tag indexes kept consistent through one transaction per
//!   write, with unique constraints and a write journal for recovery.
//! - [storage::StorageFilter]: lazily evaluated key sets combined with set
//!   algebra and decoded only when read.
//!
//! Stores sit behind the [store::StoreEngineProvider] seam. The crate ships
//! an in-memory engine; `logjam-fjall-adapter` provides a persistent one.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use logjam::doc;
//! use logjam::bson::Bson;
//! use logjam::storage::{IndexKind, Storage, StorageConfigBuilder};
//! use logjam::store::{memory::InMemoryEngine, CompareMode, StoreEngine};
//!
//! StorageConfigBuilder::new("user")
//!     .add_index(IndexKind::Tree, "email", CompareMode::Lex)
//!     .add_index(IndexKind::Tag, "tags", CompareMode::Lex)
//!     .add_unique("email")
//!     .save(&dir)?;
//!
//! let storage = Storage::open(&dir, StoreEngine::new(InMemoryEngine::new()))?;
//! let mut user = doc! { "email" => "jason@example.com", "tags" => vec!["admin"] };
//! storage.place(&mut user)?;
//!
//! let admins = storage.tagged("tags", "admin")?.items::<Bson>()?;
//! storage.close()?;
//! ```

pub mod bson;
pub mod common;
pub mod errors;
pub mod storage;
pub mod store;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    colog::init();
}
