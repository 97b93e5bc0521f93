//! Indirect object resolution
//!
//! The [`Resolver`] sits between the kernel and its [`ObjectStore`]. It hands
//! out resolved objects as `Rc<Object>` and keeps them cached until the
//! object is updated or the whole cache is dropped on a revision change.
//!
//! Cached objects are never edited in place. A mutation clones the value,
//! edits the clone and stores it back with [`Resolver::update`], so a caller
//! holding an older `Rc` keeps a stable snapshot.

use crate::error::{PdfError, Result};
use crate::objects::{Object, ObjectId};
use crate::store::{ObjectStore, ReferenceState};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub struct Resolver {
    store: Box<dyn ObjectStore>,
    writable: bool,
    cache: RefCell<HashMap<ObjectId, Rc<Object>>>,
    null: Rc<Object>,
}

impl Resolver {
    pub fn new(store: Box<dyn ObjectStore>, writable: bool) -> Self {
        Self {
            store,
            writable,
            cache: RefCell::new(HashMap::new()),
            null: Rc::new(Object::Null),
        }
    }

    /// Resolves `id`, falling back to the shared null object.
    ///
    /// Null values are not cached, so a reference that is committed later is
    /// picked up by the next lookup.
    pub fn resolve(&self, id: ObjectId) -> Rc<Object> {
        if let Some(object) = self.cache.borrow().get(&id) {
            return Rc::clone(object);
        }

        match self.store.fetch(id) {
            Ok(Object::Null) => Rc::clone(&self.null),
            Ok(object) => {
                let object = Rc::new(object);
                self.cache.borrow_mut().insert(id, Rc::clone(&object));
                object
            }
            Err(e) => {
                tracing::warn!("Failed to fetch {}: {}", id, e);
                Rc::clone(&self.null)
            }
        }
    }

    /// Follows `object` if it is a reference, otherwise returns a copy.
    pub fn resolve_value(&self, object: &Object) -> Rc<Object> {
        match object {
            Object::Reference(id) => self.resolve(*id),
            Object::Null => Rc::clone(&self.null),
            other => Rc::new(other.clone()),
        }
    }

    /// Whether edits are accepted: opened read-write and positioned on the
    /// latest revision.
    pub fn can_change(&self) -> bool {
        self.writable && self.store.is_latest_revision()
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if !self.writable {
            return Err(PdfError::ReadOnlyViolation(
                "document opened in read-only mode".to_string(),
            ));
        }
        if !self.store.is_latest_revision() {
            return Err(PdfError::ReadOnlyViolation(format!(
                "revision {} is not the latest one",
                self.store.revision()
            )));
        }
        Ok(())
    }

    pub fn reserve(&mut self) -> Result<ObjectId> {
        self.ensure_writable()?;
        Ok(self.store.reserve_reference())
    }

    /// Commits a freshly built object as the value of a reserved reference.
    pub fn register_new(&mut self, id: ObjectId, object: Object) -> Result<()> {
        self.ensure_writable()?;

        let state = self.store.reference_state(id);
        if state != ReferenceState::Reserved {
            tracing::warn!("{} registered while in state {:?}", id, state);
        }

        self.commit_and_cache(id, object)
    }

    /// Replaces the value of an existing indirect object and returns the
    /// previous one.
    pub fn update(&mut self, id: ObjectId, object: Object) -> Result<Rc<Object>> {
        self.ensure_writable()?;
        let old = self.resolve(id);
        self.commit_and_cache(id, object)?;
        Ok(old)
    }

    fn commit_and_cache(&mut self, id: ObjectId, object: Object) -> Result<()> {
        let cached = (!object.is_null()).then(|| Rc::new(object.clone()));
        self.store.commit(id, object)?;

        let mut cache = self.cache.borrow_mut();
        match cached {
            Some(object) => cache.insert(id, object),
            None => cache.remove(&id),
        };
        Ok(())
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.cache.borrow_mut();
        tracing::debug!("dropping {} resolved object(s)", cache.len());
        cache.clear();
    }

    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn ObjectStore {
        self.store.as_mut()
    }
}
