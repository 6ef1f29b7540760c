//! Document model and its binary wire format.
mod bson_type;
pub(crate) mod codec;
mod format;
mod node;
mod path;

pub use bson_type::*;
pub use node::*;
pub use path::*;
