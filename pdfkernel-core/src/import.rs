//! Importing object subgraphs from other documents
//!
//! An imported object is deep-copied into the destination's reference space.
//! Every indirect reference met on the way gets a destination reference,
//! recorded in an import map kept per source document. The map is filled
//! before the referenced object is copied, which keeps self-referential
//! graphs finite and makes shared sub-objects land on a single destination.

use crate::document::{Document, DocumentId};
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId};
use std::collections::{HashMap, HashSet};

/// Where an imported object comes from.
#[derive(Clone, Copy)]
pub enum ObjectSource<'a> {
    /// Built for this document; committed as is.
    Native,
    /// Belongs to no document. References inside it cannot be followed.
    Detached,
    /// Belongs to `document`, optionally as the indirect object `reference`.
    Foreign {
        document: &'a Document,
        reference: Option<ObjectId>,
    },
}

impl<'a> ObjectSource<'a> {
    pub fn foreign(document: &'a Document, reference: ObjectId) -> Self {
        ObjectSource::Foreign {
            document,
            reference: Some(reference),
        }
    }
}

/// Key of a persistent import map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum SourceKey {
    Document(DocumentId),
    Detached,
}

/// Source reference to destination reference.
pub(crate) type ImportMap = HashMap<ObjectId, ObjectId>;

struct ImportWalk<'s> {
    source: Option<&'s Document>,
    follow: bool,
    /// Source references whose copy is being built by this walk.
    in_progress: HashSet<ObjectId>,
}

impl Document {
    /// Copies `object` into this document as a new indirect object.
    ///
    /// With `follow_references`, referenced objects are copied too, resolved
    /// in the source document. Without it, references only get reserved
    /// destinations.
    pub fn import_object(
        &mut self,
        object: &Object,
        source: ObjectSource<'_>,
        follow_references: bool,
    ) -> Result<ObjectId> {
        self.import_with(object, source, follow_references, false)
    }

    /// Like [`Document::import_object`], but the object always gets a new
    /// destination, even when its source reference was imported before.
    ///
    /// For the length of the call the source reference maps to that new
    /// destination, so sub-objects pointing back at the object (an
    /// annotation's `/P` pointing at its page) land on the copy.
    pub(crate) fn import_fresh_copy(
        &mut self,
        object: &Object,
        source: ObjectSource<'_>,
        follow_references: bool,
    ) -> Result<ObjectId> {
        self.import_with(object, source, follow_references, true)
    }

    fn import_with(
        &mut self,
        object: &Object,
        source: ObjectSource<'_>,
        follow_references: bool,
        fresh: bool,
    ) -> Result<ObjectId> {
        self.resolver.ensure_writable()?;
        if object.is_reference() {
            return Err(PdfError::ElementBadType(
                "a bare reference cannot be imported".to_string(),
            ));
        }

        let (key, source_document, reference) = match source {
            ObjectSource::Native => {
                let id = self.resolver.reserve()?;
                self.resolver.register_new(id, object.clone())?;
                self.changed = true;
                return Ok(id);
            }
            ObjectSource::Detached => (SourceKey::Detached, None, None),
            ObjectSource::Foreign {
                document,
                reference,
            } => (SourceKey::Document(document.id()), Some(document), reference),
        };

        let mut map = self.import_maps.remove(&key).unwrap_or_default();
        let mut walk = ImportWalk {
            source: source_document,
            follow: follow_references,
            in_progress: HashSet::new(),
        };
        let result = if fresh {
            self.import_fresh_root(&mut map, &mut walk, object, reference)
        } else {
            self.import_root(&mut map, &mut walk, object, reference)
        };
        self.import_maps.insert(key, map);

        let id = result?;
        self.changed = true;
        tracing::debug!("imported object as {} ({:?})", id, key);
        Ok(id)
    }

    fn import_root(
        &mut self,
        map: &mut ImportMap,
        walk: &mut ImportWalk<'_>,
        object: &Object,
        reference: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let destination = match reference {
            Some(reference) => {
                if let Some(existing) = map.get(&reference).copied() {
                    if !self.resolver.resolve(existing).is_null() {
                        return Ok(existing);
                    }
                }
                let destination = self.destination_for(map, reference)?;
                walk.in_progress.insert(reference);
                destination
            }
            None => self.resolver.reserve()?,
        };

        let copy = self.copy_object(map, walk, object)?;
        self.resolver.register_new(destination, copy)?;
        Ok(destination)
    }

    fn import_fresh_root(
        &mut self,
        map: &mut ImportMap,
        walk: &mut ImportWalk<'_>,
        object: &Object,
        reference: Option<ObjectId>,
    ) -> Result<ObjectId> {
        let destination = self.resolver.reserve()?;
        let Some(reference) = reference else {
            let copy = self.copy_object(map, walk, object)?;
            self.resolver.register_new(destination, copy)?;
            return Ok(destination);
        };

        let previous = map.insert(reference, destination);
        walk.in_progress.insert(reference);
        let copy = self.copy_object(map, walk, object);
        match previous {
            Some(previous) => map.insert(reference, previous),
            None => map.remove(&reference),
        };

        self.resolver.register_new(destination, copy?)?;
        Ok(destination)
    }

    fn destination_for(&mut self, map: &mut ImportMap, reference: ObjectId) -> Result<ObjectId> {
        if let Some(existing) = map.get(&reference) {
            return Ok(*existing);
        }
        let destination = self.resolver.reserve()?;
        map.insert(reference, destination);
        Ok(destination)
    }

    fn copy_object(
        &mut self,
        map: &mut ImportMap,
        walk: &mut ImportWalk<'_>,
        object: &Object,
    ) -> Result<Object> {
        Ok(match object {
            Object::Reference(reference) => {
                Object::Reference(self.import_reference(map, walk, *reference)?)
            }
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|item| self.copy_object(map, walk, item))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Object::Dictionary(dict) => Object::Dictionary(self.copy_dictionary(map, walk, dict)?),
            Object::Stream(dict, data) => {
                Object::Stream(self.copy_dictionary(map, walk, dict)?, data.clone())
            }
            other => other.clone(),
        })
    }

    fn copy_dictionary(
        &mut self,
        map: &mut ImportMap,
        walk: &mut ImportWalk<'_>,
        dict: &Dictionary,
    ) -> Result<Dictionary> {
        let mut copy = Dictionary::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            copy.set(key.clone(), self.copy_object(map, walk, value)?);
        }
        Ok(copy)
    }

    fn import_reference(
        &mut self,
        map: &mut ImportMap,
        walk: &mut ImportWalk<'_>,
        reference: ObjectId,
    ) -> Result<ObjectId> {
        if let Some(existing) = map.get(&reference).copied() {
            if walk.in_progress.contains(&reference) || !self.resolver.resolve(existing).is_null() {
                return Ok(existing);
            }
        }

        let destination = self.destination_for(map, reference)?;
        if !walk.follow {
            return Ok(destination);
        }

        walk.in_progress.insert(reference);
        let content = match walk.source {
            Some(document) => (*document.resolve(reference)).clone(),
            None => Object::Null,
        };
        let copy = self.copy_object(map, walk, &content)?;
        self.resolver.register_new(destination, copy)?;
        Ok(destination)
    }
}
