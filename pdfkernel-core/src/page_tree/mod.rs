//! Page tree classification, traversal and consistency
//!
//! A page tree node is not a stored type; its kind is derived from the
//! dictionary every time it is looked at:
//!
//! - **Root**: the node the catalog's `/Pages` entry points to
//! - **Intermediate**: `/Type /Pages`, or untyped with a Kids array
//! - **Leaf**: `/Type /Page`, or untyped without Kids
//! - **Unknown**: a dictionary with another type tag or a broken Kids entry
//! - **Error**: anything that is not a dictionary
//!
//! [`PageTreeLocator`] implements the read-only algorithms over that
//! classification. The `consistency` module keeps Count and Parent entries,
//! the caches and the page list coherent while the tree is edited.

mod cache;
mod consistency;
mod locator;

pub use cache::{CacheStats, KidsCountCache, KidsParentCache, NodeCache};
pub use locator::{PageLocation, PageTreeLocator};

/// Attributes a page inherits from its ancestors when it does not define them.
pub const INHERITABLE_ATTRIBUTES: [&str; 4] = ["Resources", "MediaBox", "CropBox", "Rotate"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    Error,
    Unknown,
    Leaf,
    Intermediate,
    Root,
}

impl NodeKind {
    /// Leaf, intermediate or root.
    pub fn is_node(self) -> bool {
        self >= NodeKind::Leaf
    }

    /// Holds kids: intermediate or root.
    pub fn is_inner(self) -> bool {
        self >= NodeKind::Intermediate
    }
}
