//! Documents on disk: the primary store, its secondary indexes and the key
//! sets queries over them produce.
mod config;
mod journal;
mod record_set;
#[allow(clippy::module_inception)]
mod storage;

pub use config::*;
pub use record_set::*;
pub use storage::*;

/// Field holding a document's primary key. `0` means not yet stored.
pub const KEY_FIELD: &str = "__key";
