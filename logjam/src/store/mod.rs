//! Byte-store seam: ordered trees, search indexes and the engines that open
//! them.
mod compare;
mod engine;
mod map;
pub mod memory;
mod search;
mod tree;
mod values;

pub use compare::*;
pub use engine::*;
pub use map::*;
pub use search::*;
pub use tree::*;
pub use values::*;
