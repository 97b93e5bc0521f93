//! # pdfkernel
//!
//! Document object graph and page-tree consistency engine for PDF editing.
//!
//! The crate keeps a document's indirect-object space and the derived
//! page-tree state coherent while the graph is edited: page counts, Parent
//! links, a position-indexed cache of page handles, and the import maps used
//! when object subgraphs are copied in from other documents.
//!
//! ## Features
//!
//! - **Lazy resolution**: indirect objects are fetched from an [`ObjectStore`]
//!   on first use and cached as `Rc<Object>`
//! - **Page tree navigation**: positional lookup, inverse lookup and
//!   ambiguity detection that tolerate wrong Count entries and cycles
//! - **Incremental consolidation**: every edit emits a change event that
//!   repairs Count/Parent entries, caches and page handles before returning
//! - **Subgraph import**: deep copies from other documents with shared
//!   objects deduplicated and reference cycles preserved
//! - **Revisions**: incremental revisions with read-only access to older ones
//!
//! ## Quick Start
//!
//! ```rust
//! use pdfkernel::{test_helpers, Document, ObjectSource, OpenMode, Result};
//!
//! # fn main() -> Result<()> {
//! let source = Document::open(test_helpers::nested_store(), OpenMode::ReadOnly)?;
//! let mut doc = Document::open(test_helpers::flat_store(2), OpenMode::ReadWrite)?;
//!
//! // Copy the first page of `source` to the front of `doc`
//! let page = source.get_page(1)?;
//! let dict = source.resolve(page.id()).as_dict().cloned().unwrap_or_default();
//! doc.insert_page(&dict, ObjectSource::foreign(&source, page.id()), 1)?;
//!
//! assert_eq!(doc.page_count(), 3);
//! doc.save(true)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`objects`] - Object model: [`Object`], [`ObjectId`], [`Dictionary`]
//! - [`store`] - Object store contract and the in-memory [`MemoryStore`]
//! - [`resolver`] - Cached indirect object resolution
//! - [`page_tree`] - Node classification, traversal and consistency
//! - [`observer`] - Change events and observer registration
//! - [`page_list`] - Page handles and the position-indexed page list
//! - [`import`] - Importing subgraphs from other documents
//! - [`document`] - The [`Document`] facade

pub mod document;
pub mod error;
pub mod import;
pub mod objects;
pub mod observer;
pub mod page_list;
pub mod page_tree;
pub mod resolver;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use document::{Document, DocumentId, OpenMode};
pub use error::{PdfError, Result};
pub use import::ObjectSource;
pub use objects::{Dictionary, Object, ObjectId};
pub use observer::{ArrayLocation, ChangeEvent, Slot};
pub use page_list::Page;
pub use page_tree::{NodeKind, PageLocation, PageTreeLocator};
pub use store::{MemoryStore, ObjectStore, ReferenceState};

/// Current version of pdfkernel
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
