//! Abstract syntax tree for Rill.

pub mod node;

pub use node::{Node, NodeKind};
