mod matcher;
mod tree;

pub use matcher::*;
pub use tree::*;
