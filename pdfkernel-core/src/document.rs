//! Document facade
//!
//! [`Document`] ties the pieces together: the [`Resolver`] over the object
//! store, the page tree caches, the observer registry and the page list.
//! All edits go through its mutation API so that every change produces a
//! [`ChangeEvent`] and the page tree is consolidated before the call
//! returns.
//!
//! # Example
//!
//! ```rust
//! use pdfkernel::{test_helpers, Document, OpenMode, Result};
//!
//! # fn main() -> Result<()> {
//! let mut doc = Document::open(test_helpers::flat_store(3), OpenMode::ReadWrite)?;
//! assert_eq!(doc.page_count(), 3);
//!
//! let last = doc.get_page(3)?;
//! doc.remove_page(2)?;
//! assert_eq!(doc.page_count(), 2);
//! assert_eq!(doc.page_position(&last)?, 2);
//! # Ok(())
//! # }
//! ```

use crate::error::{PdfError, Result};
use crate::import::{ImportMap, ObjectSource, SourceKey};
use crate::objects::{Dictionary, Object, ObjectId};
use crate::observer::{ArrayLocation, ChangeEvent, ObserverRegistry, ObserverRole, Slot, WatchKey};
use crate::page_list::{Page, PageList};
use crate::page_tree::{
    CacheStats, KidsCountCache, KidsParentCache, PageTreeLocator, INHERITABLE_ATTRIBUTES,
};
use crate::resolver::Resolver;
use crate::store::{ObjectStore, ReferenceState};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(u64);

impl DocumentId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

pub struct Document {
    pub(crate) id: DocumentId,
    pub(crate) mode: OpenMode,
    pub(crate) resolver: Resolver,
    pub(crate) catalog: Option<ObjectId>,
    pub(crate) root: Option<ObjectId>,
    pub(crate) observers: ObserverRegistry,
    pub(crate) count_cache: RefCell<KidsCountCache>,
    pub(crate) kids_parents: KidsParentCache,
    pub(crate) page_list: RefCell<PageList>,
    /// Zero means unknown.
    pub(crate) page_count: Cell<usize>,
    pub(crate) import_maps: HashMap<SourceKey, ImportMap>,
    pub(crate) changed: bool,
}

impl Document {
    pub fn open<S: ObjectStore + 'static>(store: S, mode: OpenMode) -> Result<Self> {
        Self::open_boxed(Box::new(store), mode)
    }

    pub fn open_boxed(store: Box<dyn ObjectStore>, mode: OpenMode) -> Result<Self> {
        let mut document = Self {
            id: DocumentId::next(),
            mode,
            resolver: Resolver::new(store, mode == OpenMode::ReadWrite),
            catalog: None,
            root: None,
            observers: ObserverRegistry::new(),
            count_cache: RefCell::new(KidsCountCache::new()),
            kids_parents: KidsParentCache::new(),
            page_list: RefCell::new(PageList::new()),
            page_count: Cell::new(0),
            import_maps: HashMap::new(),
            changed: false,
        };
        document.init_revision_specific()?;
        tracing::info!(
            "opened {} ({:?}, revision {} of {})",
            document.id,
            mode,
            document.revision(),
            document.revision_count()
        );
        Ok(document)
    }

    /// Resets every per-revision structure and rediscovers the page tree.
    fn init_revision_specific(&mut self) -> Result<()> {
        self.page_list.get_mut().invalidate_all();
        self.observers.clear();
        self.kids_parents.clear();
        self.count_cache.get_mut().clear();
        self.page_count.set(0);
        self.import_maps.clear();
        self.resolver.invalidate_all();

        let trailer = self.resolver.store().trailer()?;
        self.catalog = trailer.get_reference("Root");
        self.root = None;

        match self.catalog {
            Some(catalog) => {
                self.observers
                    .register(WatchKey::Object(catalog), ObserverRole::Root);
                self.root = self.find_pages_root(catalog);
            }
            None => tracing::warn!("trailer has no /Root entry"),
        }

        match self.root {
            Some(root) => self.register_subtree(root),
            None => tracing::info!("{} has no page tree", self.id),
        }
        Ok(())
    }

    fn find_pages_root(&self, catalog: ObjectId) -> Option<ObjectId> {
        let object = self.resolver.resolve(catalog);
        let Some(dict) = object.as_dict() else {
            tracing::warn!("catalog {} is not a dictionary", catalog);
            return None;
        };
        match dict.get("Pages") {
            Some(Object::Reference(root)) if self.resolver.resolve(*root).as_dict().is_some() => {
                Some(*root)
            }
            Some(other) => {
                tracing::warn!("catalog /Pages is unusable ({})", other.type_name());
                None
            }
            None => None,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn can_change(&self) -> bool {
        self.resolver.can_change()
    }

    /// Whether there are edits not saved yet.
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn catalog(&self) -> Option<ObjectId> {
        self.catalog
    }

    pub fn page_tree_root(&self) -> Option<ObjectId> {
        self.root
    }

    pub fn resolve(&self, id: ObjectId) -> Rc<Object> {
        self.resolver.resolve(id)
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.resolver.store()
    }

    pub fn revision(&self) -> usize {
        self.resolver.store().revision()
    }

    pub fn revision_count(&self) -> usize {
        self.resolver.store().revision_count()
    }

    pub fn is_linearized(&self) -> bool {
        self.resolver.store().is_linearized()
    }

    pub fn locator(&self) -> PageTreeLocator<'_> {
        PageTreeLocator::new(&self.resolver, self.root)
    }

    pub fn count_cache_stats(&self) -> CacheStats {
        self.count_cache.borrow().stats()
    }

    pub fn cached_page_count(&self) -> usize {
        self.page_list.borrow().len()
    }

    /// Number of leaves reachable from the page tree root, whatever the
    /// Count entries say.
    pub fn page_count(&self) -> usize {
        let cached = self.page_count.get();
        if cached != 0 {
            return cached;
        }
        let Some(root) = self.root else {
            return 0;
        };

        let count = {
            let mut cache = self.count_cache.borrow_mut();
            self.locator().count_descendant_leaves(root, Some(&mut *cache))
        };
        self.page_count.set(count);
        count
    }

    pub fn get_page(&self, position: usize) -> Result<Page> {
        let count = self.page_count();
        if position == 0 || position > count {
            return Err(PdfError::PageNotFound(position));
        }
        if let Some(page) = self.page_list.borrow().get(position) {
            return Ok(page);
        }

        let root = self.root.ok_or(PdfError::NoPageRoot)?;
        let id = {
            let mut cache = self.count_cache.borrow_mut();
            self.locator()
                .find_page_by_position(root, 1, position, Some(&mut *cache))?
        };

        let page = Page::new(id, self.id);
        self.page_list.borrow_mut().insert(position, page.clone());
        tracing::debug!("page {} is {}", position, id);
        Ok(page)
    }

    /// Current position of `page`, repairing the page list if it drifted.
    pub fn page_position(&self, page: &Page) -> Result<usize> {
        if page.document() != self.id || !page.is_valid() {
            return Err(PdfError::InvalidPage);
        }
        let cached = self
            .page_list
            .borrow()
            .position_of(page)
            .ok_or(PdfError::InvalidPage)?;
        let found = match self.root {
            Some(root) => {
                let mut cache = self.count_cache.borrow_mut();
                self.locator()
                    .find_position_of_node(root, page.id(), Some(&mut *cache))
            }
            None => Err(PdfError::NoPageRoot),
        };

        let mut list = self.page_list.borrow_mut();
        match found {
            Ok(actual) => {
                if actual != cached {
                    tracing::warn!(
                        "page {} cached at {} but found at {}",
                        page.id(),
                        cached,
                        actual
                    );
                    list.remove(cached);
                    if let Some(displaced) = list.insert(actual, page.clone()) {
                        if !displaced.same_handle(page) {
                            displaced.invalidate();
                        }
                    }
                }
                Ok(actual)
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!("cached page {} is gone from the tree: {}", page.id(), e);
                list.remove(cached);
                page.invalidate();
                Err(PdfError::PageNotFound(cached))
            }
            Err(e) => Err(e),
        }
    }

    pub fn next_page(&self, page: &Page) -> Result<Page> {
        let position = self.page_position(page)?;
        self.get_page(position + 1)
    }

    pub fn prev_page(&self, page: &Page) -> Result<Page> {
        let position = self.page_position(page)?;
        if position <= 1 {
            return Err(PdfError::PageNotFound(0));
        }
        self.get_page(position - 1)
    }

    /// Inserts a copy of `page` so that it ends up at `position`.
    ///
    /// Positions are clamped to 1; a position past the last page appends.
    pub fn insert_page(
        &mut self,
        page: &Dictionary,
        source: ObjectSource<'_>,
        position: usize,
    ) -> Result<Page> {
        self.resolver.ensure_writable()?;
        let root = self.root.ok_or(PdfError::NoPageRoot)?;

        let count = self.page_count();
        let position = position.max(1);
        let append = position > count;

        let (parent, index) = if count == 0 {
            (root, self.locator().kids(root).len())
        } else {
            let target = if append { count } else { position };
            let location = {
                let mut cache = self.count_cache.borrow_mut();
                self.locator().locate_page(root, target, Some(&mut *cache))?
            };
            self.ensure_unique_kid(location.parent, location.page)?;
            (location.parent, location.index + usize::from(append))
        };

        let kids = match self.locator().kids_location(parent) {
            Some(kids) => kids,
            None => self.create_kids(parent)?,
        };

        let dict = self.prepare_page(page, &source);
        let page_ref = self.import_fresh_copy(&Object::Dictionary(dict), source, true)?;
        self.insert_array_item(&kids, index, Object::Reference(page_ref))?;

        let new_position = if append { count + 1 } else { position };
        let handle = Page::new(page_ref, self.id);
        if let Some(displaced) = self
            .page_list
            .get_mut()
            .insert(new_position, handle.clone())
        {
            tracing::warn!("page list slot {} was still occupied", new_position);
            displaced.invalidate();
        }

        tracing::info!("inserted page {} at position {}", page_ref, new_position);
        Ok(handle)
    }

    fn create_kids(&mut self, node: ObjectId) -> Result<ArrayLocation> {
        let has_kids = self
            .resolver
            .resolve(node)
            .as_dict()
            .is_some_and(|dict| dict.contains_key("Kids"));
        if has_kids {
            return Err(PdfError::MalformedFormat(format!(
                "Kids of {node} is neither an array nor a reference to one"
            )));
        }
        self.set_property(node, "Kids", Object::Array(Vec::new()))?;
        Ok(ArrayLocation::direct(node, "Kids"))
    }

    fn prepare_page(&self, page: &Dictionary, source: &ObjectSource<'_>) -> Dictionary {
        let mut dict = page.clone();
        match source {
            ObjectSource::Native => {}
            ObjectSource::Detached => {
                dict.remove("Parent");
            }
            ObjectSource::Foreign {
                document,
                reference,
            } => {
                dict.remove("Parent");
                if let Some(reference) = reference {
                    let locator = document.locator();
                    for key in INHERITABLE_ATTRIBUTES {
                        if dict.contains_key(key) {
                            continue;
                        }
                        if let Some(value) = locator.inherited_attribute(*reference, key) {
                            tracing::debug!("copying inherited /{} into imported page", key);
                            dict.set(key, value);
                        }
                    }
                }
            }
        }
        dict
    }

    pub fn remove_page(&mut self, position: usize) -> Result<()> {
        self.resolver.ensure_writable()?;
        let count = self.page_count();
        if position == 0 || position > count {
            return Err(PdfError::PageNotFound(position));
        }
        let root = self.root.ok_or(PdfError::NoPageRoot)?;

        let location = {
            let mut cache = self.count_cache.borrow_mut();
            self.locator().locate_page(root, position, Some(&mut *cache))?
        };
        self.ensure_unique_kid(location.parent, location.page)?;

        let kids = self.locator().kids_location(location.parent).ok_or_else(|| {
            PdfError::MalformedFormat(format!(
                "Kids of {} is neither an array nor a reference to one",
                location.parent
            ))
        })?;
        self.remove_array_item(&kids, location.index)?;

        tracing::info!("removed page {} from position {}", location.page, position);
        Ok(())
    }

    fn ensure_unique_kid(&self, parent: ObjectId, kid: ObjectId) -> Result<()> {
        let occurrences = self
            .locator()
            .kid_refs(parent)
            .into_iter()
            .filter(|id| *id == kid)
            .count();
        if occurrences > 1 {
            tracing::warn!("{} appears {} times under {}", kid, occurrences, parent);
            return Err(PdfError::AmbiguousPageTree);
        }
        Ok(())
    }

    /// Replaces the whole value of the indirect object `id`.
    pub fn change_indirect_property(&mut self, id: ObjectId, object: Object) -> Result<()> {
        self.resolver.ensure_writable()?;
        if self.resolver.store().reference_state(id) != ReferenceState::Committed {
            return Err(PdfError::InvalidObject(format!(
                "{id} is not an object of this document"
            )));
        }

        let old = self.resolver.update(id, object.clone())?;
        self.changed = true;
        self.notify(ChangeEvent::ValueReplaced {
            slot: Slot::Indirect(id),
            old: (*old).clone(),
            new: object,
        });
        Ok(())
    }

    pub fn set_property(&mut self, owner: ObjectId, key: &str, value: Object) -> Result<()> {
        self.resolver.ensure_writable()?;
        let mut object = (*self.resolver.resolve(owner)).clone();
        let dict = dictionary_mut(&mut object)
            .ok_or_else(|| PdfError::ElementBadType(format!("{owner} is not a dictionary")))?;

        let old = dict.set(key, value.clone()).unwrap_or(Object::Null);
        self.resolver.update(owner, object)?;
        self.changed = true;
        self.notify(ChangeEvent::ValueReplaced {
            slot: Slot::Entry {
                owner,
                key: key.to_string(),
            },
            old,
            new: value,
        });
        Ok(())
    }

    pub fn remove_property(&mut self, owner: ObjectId, key: &str) -> Result<Option<Object>> {
        self.resolver.ensure_writable()?;
        let mut object = (*self.resolver.resolve(owner)).clone();
        let dict = dictionary_mut(&mut object)
            .ok_or_else(|| PdfError::ElementBadType(format!("{owner} is not a dictionary")))?;

        let Some(old) = dict.remove(key) else {
            return Ok(None);
        };
        self.resolver.update(owner, object)?;
        self.changed = true;
        self.notify(ChangeEvent::ValueReplaced {
            slot: Slot::Entry {
                owner,
                key: key.to_string(),
            },
            old: old.clone(),
            new: Object::Null,
        });
        Ok(Some(old))
    }

    pub fn insert_array_item(
        &mut self,
        location: &ArrayLocation,
        index: usize,
        value: Object,
    ) -> Result<()> {
        self.edit_array(location, |array| {
            if index > array.len() {
                return Err(out_of_range(index, array.len()));
            }
            array.insert(index, value.clone());
            Ok(())
        })?;
        self.notify(ChangeEvent::CollectionMutated {
            array: location.clone(),
            index,
            old: Object::Null,
            new: value,
        });
        Ok(())
    }

    pub fn remove_array_item(&mut self, location: &ArrayLocation, index: usize) -> Result<Object> {
        let removed = self.edit_array(location, |array| {
            if index >= array.len() {
                return Err(out_of_range(index, array.len()));
            }
            Ok(array.remove(index))
        })?;
        self.notify(ChangeEvent::CollectionMutated {
            array: location.clone(),
            index,
            old: removed.clone(),
            new: Object::Null,
        });
        Ok(removed)
    }

    pub fn set_array_item(
        &mut self,
        location: &ArrayLocation,
        index: usize,
        value: Object,
    ) -> Result<Object> {
        let old = self.edit_array(location, |array| {
            let len = array.len();
            let slot = array.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
            Ok(std::mem::replace(slot, value.clone()))
        })?;
        self.notify(ChangeEvent::CollectionMutated {
            array: location.clone(),
            index,
            old: old.clone(),
            new: value,
        });
        Ok(old)
    }

    fn edit_array<T>(
        &mut self,
        location: &ArrayLocation,
        edit: impl FnOnce(&mut Vec<Object>) -> Result<T>,
    ) -> Result<T> {
        self.resolver.ensure_writable()?;
        let mut object = (*self.resolver.resolve(location.owner)).clone();
        let array = match &location.key {
            Some(key) => dictionary_mut(&mut object)
                .and_then(|dict| dict.get_mut(key))
                .and_then(Object::as_array_mut),
            None => object.as_array_mut(),
        }
        .ok_or_else(|| PdfError::ElementBadType(format!("no array at {location:?}")))?;

        let result = edit(array)?;
        self.resolver.update(location.owner, object)?;
        self.changed = true;
        Ok(result)
    }

    /// Persists pending changes through the store.
    pub fn save(&mut self, new_revision: bool) -> Result<()> {
        if self.is_linearized() {
            return Err(PdfError::NotImplemented(
                "saving a linearized document".to_string(),
            ));
        }
        self.resolver.ensure_writable()?;
        self.resolver.store_mut().save_changes(new_revision)?;
        self.changed = false;
        tracing::info!("saved {} (new revision: {})", self.id, new_revision);
        Ok(())
    }

    /// Writes the document content up to the current revision.
    pub fn clone_to(&self, writer: &mut dyn Write) -> Result<()> {
        if self.is_linearized() {
            return Err(PdfError::NotImplemented(
                "cloning a linearized document".to_string(),
            ));
        }
        self.resolver.store().clone_revision(writer)
    }

    /// Moves to another revision. Every page handle is invalidated and all
    /// caches are rebuilt.
    pub fn change_revision(&mut self, revision: usize) -> Result<()> {
        self.resolver.store_mut().change_revision(revision)?;
        tracing::info!("{} switched to revision {}", self.id, revision);
        self.init_revision_specific()
    }

    pub fn close(mut self, save: bool) -> Result<()> {
        if save && self.changed {
            self.save(false)?;
        }
        Ok(())
    }
}

impl Drop for Document {
    fn drop(&mut self) {
        self.page_list.get_mut().invalidate_all();
    }
}

fn dictionary_mut(object: &mut Object) -> Option<&mut Dictionary> {
    match object {
        Object::Dictionary(dict) | Object::Stream(dict, _) => Some(dict),
        _ => None,
    }
}

fn out_of_range(index: usize, len: usize) -> PdfError {
    PdfError::InvalidObject(format!("index {index} out of range for array of {len}"))
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod document_tests;
