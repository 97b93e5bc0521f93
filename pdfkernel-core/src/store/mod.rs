//! Object store contract
//!
//! The kernel never touches raw document bytes. Everything it knows about
//! the indirect-object space comes through an [`ObjectStore`]: fetching an
//! object by reference, reserving fresh references, committing new values
//! and moving between revisions.
//!
//! [`MemoryStore`] is the in-memory implementation used by the CLI and the
//! test suite. It persists itself as a JSON snapshot of its revision tables.

mod memory;

pub use memory::{MemoryStore, ObjectEntry, RevisionSnapshot, Snapshot};

use crate::error::Result;
use crate::objects::{Dictionary, Object, ObjectId};
use std::io::Write;

/// Lifecycle of a reference slot in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceState {
    /// Unknown to the store.
    Free,
    /// Handed out by [`ObjectStore::reserve_reference`] but not committed yet.
    Reserved,
    /// Holds a value in the visible revision or in pending changes.
    Committed,
}

/// Backend that owns the raw indirect objects of one document.
///
/// Revision numbering follows incremental updates: revision `0` is the
/// newest one and the only one that accepts changes.
pub trait ObjectStore {
    /// Fetches the stored value of `id` as seen from the current revision.
    fn fetch(&self, id: ObjectId) -> Result<Object>;

    /// Reserves a fresh reference for an object that is about to be committed.
    fn reserve_reference(&mut self) -> ObjectId;

    /// Stores `object` as the value of `id` in the pending changes.
    fn commit(&mut self, id: ObjectId, object: Object) -> Result<()>;

    fn reference_state(&self, id: ObjectId) -> ReferenceState;

    /// Trailer dictionary of the current revision.
    fn trailer(&self) -> Result<Dictionary>;

    fn is_linearized(&self) -> bool;

    /// Current revision, `0` being the latest.
    fn revision(&self) -> usize;

    fn revision_count(&self) -> usize;

    fn change_revision(&mut self, revision: usize) -> Result<()>;

    /// Persists pending changes, either folded into the latest revision or
    /// as a new incremental revision.
    fn save_changes(&mut self, new_revision: bool) -> Result<()>;

    /// Writes the document content up to the current revision.
    fn clone_revision(&self, writer: &mut dyn Write) -> Result<()>;

    fn is_latest_revision(&self) -> bool {
        self.revision() == 0
    }
}
