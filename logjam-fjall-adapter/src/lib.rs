//! # LogJam Fjall Adapter
//!
//! A persistent [StoreEngineProvider](logjam::store::StoreEngineProvider)
//! backed by the [fjall](https://docs.rs/fjall) LSM-tree.
//!
//! ```rust,ignore
//! use logjam::storage::Storage;
//! use logjam::store::StoreEngine;
//! use logjam_fjall_adapter::FjallEngine;
//!
//! let engine = FjallEngine::with_config().production_preset().build();
//! let storage = Storage::open("/var/lib/logjam/user", StoreEngine::new(engine))?;
//! ```
mod config;
mod engine;
mod error;
mod map;

pub use config::*;
pub use engine::*;
pub use error::FjallAdapterError;
pub use map::*;

#[cfg(test)]
#[ctor::ctor]
fn init() {
    colog::init();
}
