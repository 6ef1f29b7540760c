mod engine;
mod map;

pub use engine::*;
pub use map::*;
