//! Disk-backed, concurrent, multi-valued B+tree: node layout
//! ([`node`]) and the descent/rebalancing algorithms built on it
//! ([`tree`]).

pub mod node;
mod tree;

pub use node::{Key, Value};
pub use tree::BPlusTree;
