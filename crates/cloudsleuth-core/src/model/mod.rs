//! Data model for the crawl tree.
//!
//! Re-exports the arena-allocated container tree and the leaf record.
pub mod container;
pub mod leaf;
pub mod size;
pub mod tree;

pub use container::{
    Aggregate, Classification, Container, ContainerId, ContainerKind, ListingRoot, NodeIndex,
    Status,
};
pub use leaf::{Leaf, LeafMeta, LinkRecord, TargetKind};
pub use tree::ContainerTree;
