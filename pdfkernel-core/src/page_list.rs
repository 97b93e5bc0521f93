//! Page handles and the position-indexed page list
//!
//! A [`Page`] is handed out by [`Document::get_page`](crate::Document::get_page)
//! and stays in the document's [`PageList`] under its current position. The
//! consistency maintainer moves handles when pages are inserted or removed
//! and invalidates the ones whose page left the tree. An invalidated handle
//! is never revived.

use crate::document::DocumentId;
use crate::objects::ObjectId;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug)]
struct PageState {
    id: ObjectId,
    document: DocumentId,
    valid: Cell<bool>,
}

/// Handle to a leaf of a document's page tree.
///
/// Clones share state: invalidating one invalidates all of them.
#[derive(Clone)]
pub struct Page {
    inner: Rc<PageState>,
}

impl Page {
    pub(crate) fn new(id: ObjectId, document: DocumentId) -> Self {
        Self {
            inner: Rc::new(PageState {
                id,
                document,
                valid: Cell::new(true),
            }),
        }
    }

    /// Reference of the page dictionary.
    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn document(&self) -> DocumentId {
        self.inner.document
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.get()
    }

    pub(crate) fn invalidate(&self) {
        if self.inner.valid.replace(false) {
            tracing::debug!("page handle for {} invalidated", self.inner.id);
        }
    }

    /// Whether both values are clones of the same handle.
    pub fn same_handle(&self, other: &Page) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.inner.id)
            .field("document", &self.inner.document)
            .field("valid", &self.inner.valid.get())
            .finish()
    }
}

/// Position (1-based) to handle. A partial view: only pages fetched so far.
#[derive(Debug, Default)]
pub struct PageList {
    entries: BTreeMap<usize, Page>,
}

impl PageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, position: usize) -> Option<Page> {
        self.entries.get(&position).cloned()
    }

    /// Stores `page` at `position`, returning the handle it displaced.
    pub fn insert(&mut self, position: usize, page: Page) -> Option<Page> {
        self.entries.insert(position, page)
    }

    pub fn remove(&mut self, position: usize) -> Option<Page> {
        self.entries.remove(&position)
    }

    pub fn position_of(&self, page: &Page) -> Option<usize> {
        self.entries
            .iter()
            .find(|(_, cached)| cached.same_handle(page))
            .map(|(position, _)| *position)
    }

    /// Positions of every handle wrapping `id`.
    pub fn positions_of_id(&self, id: ObjectId) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|(_, page)| page.id() == id)
            .map(|(position, _)| *position)
            .collect()
    }

    /// Takes out every handle at `position` or above.
    pub fn split_from(&mut self, position: usize) -> Vec<(usize, Page)> {
        self.entries.split_off(&position).into_iter().collect()
    }

    pub fn drain(&mut self) -> Vec<(usize, Page)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    /// Invalidates and drops every handle.
    pub fn invalidate_all(&mut self) {
        for (_, page) in self.drain() {
            page.invalidate();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Page)> {
        self.entries.iter().map(|(position, page)| (*position, page))
    }
}
