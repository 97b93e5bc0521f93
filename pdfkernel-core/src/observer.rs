//! Change events and observer registration
//!
//! Every edit made through the [`Document`](crate::Document) mutation API
//! produces a [`ChangeEvent`]. The [`ObserverRegistry`] records which objects
//! and arrays belong to the page tree and turns an event into the
//! [`Notification`]s the consistency maintainer acts on.

use crate::objects::{Object, ObjectId};
use crate::page_tree::KidsParentCache;
use std::collections::{HashMap, HashSet};

/// Address of a value that can be replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Entry `key` of the indirect dictionary `owner`.
    Entry { owner: ObjectId, key: String },
    /// A whole indirect object.
    Indirect(ObjectId),
}

/// Address of an array that can be edited element by element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayLocation {
    pub owner: ObjectId,
    /// `Some(key)` for a direct array stored under `key` of the `owner`
    /// dictionary, `None` when `owner` is itself an array object.
    pub key: Option<String>,
}

impl ArrayLocation {
    pub fn direct(owner: ObjectId, key: impl Into<String>) -> Self {
        Self {
            owner,
            key: Some(key.into()),
        }
    }

    pub fn indirect(array: ObjectId) -> Self {
        Self {
            owner: array,
            key: None,
        }
    }

    pub fn is_indirect(&self) -> bool {
        self.key.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    ValueReplaced {
        slot: Slot,
        old: Object,
        new: Object,
    },
    /// `old` is `Null` for an insertion, `new` is `Null` for a removal.
    CollectionMutated {
        array: ArrayLocation,
        index: usize,
        old: Object,
        new: Object,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchKey {
    Object(ObjectId),
    Array(ArrayLocation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverRole {
    /// Catalog watching its `/Pages` entry.
    Root,
    /// Page tree node watching its `/Kids` entry.
    Node,
    /// Kids array watching its elements.
    Kids,
}

/// What the consistency maintainer has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    RootReplaced {
        old: Object,
        new: Object,
    },
    /// The whole Kids value of `node` changed.
    KidsReplaced {
        node: ObjectId,
        old: Object,
        new: Object,
    },
    /// One element of the Kids array of `node` changed.
    KidsMutated {
        node: ObjectId,
        index: usize,
        old: Object,
        new: Object,
    },
}

#[derive(Debug, Default)]
pub struct ObserverRegistry {
    watches: HashMap<WatchKey, HashSet<ObserverRole>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the role was already registered for `key`.
    pub fn register(&mut self, key: WatchKey, role: ObserverRole) -> bool {
        self.watches.entry(key).or_default().insert(role)
    }

    pub fn unregister(&mut self, key: &WatchKey, role: ObserverRole) -> bool {
        let Some(roles) = self.watches.get_mut(key) else {
            return false;
        };
        let removed = roles.remove(&role);
        if roles.is_empty() {
            self.watches.remove(key);
        }
        removed
    }

    pub fn has(&self, key: &WatchKey, role: ObserverRole) -> bool {
        self.watches
            .get(key)
            .is_some_and(|roles| roles.contains(&role))
    }

    pub fn clear(&mut self) {
        self.watches.clear();
    }

    pub fn len(&self) -> usize {
        self.watches.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }

    pub fn dispatch(&self, event: &ChangeEvent, kids_parents: &KidsParentCache) -> Vec<Notification> {
        let mut notifications = Vec::new();

        match event {
            ChangeEvent::ValueReplaced {
                slot: Slot::Entry { owner, key },
                old,
                new,
            } => {
                let watch = WatchKey::Object(*owner);
                if key == "Pages" && self.has(&watch, ObserverRole::Root) {
                    notifications.push(Notification::RootReplaced {
                        old: old.clone(),
                        new: new.clone(),
                    });
                }
                if key == "Kids" && self.has(&watch, ObserverRole::Node) {
                    notifications.push(Notification::KidsReplaced {
                        node: *owner,
                        old: old.clone(),
                        new: new.clone(),
                    });
                }
            }
            ChangeEvent::ValueReplaced {
                slot: Slot::Indirect(id),
                old,
                new,
            } => {
                let watch = WatchKey::Object(*id);
                if self.has(&watch, ObserverRole::Root) {
                    let (old, new) = (entry_or_null(old, "Pages"), entry_or_null(new, "Pages"));
                    if old != new {
                        notifications.push(Notification::RootReplaced { old, new });
                    }
                }
                if self.has(&watch, ObserverRole::Node) {
                    let (old, new) = (entry_or_null(old, "Kids"), entry_or_null(new, "Kids"));
                    if old != new {
                        notifications.push(Notification::KidsReplaced {
                            node: *id,
                            old,
                            new,
                        });
                    }
                }
                let array = WatchKey::Array(ArrayLocation::indirect(*id));
                if self.has(&array, ObserverRole::Kids) {
                    match kids_parents.peek(*id) {
                        Some(node) => notifications.push(Notification::KidsReplaced {
                            node,
                            old: old.clone(),
                            new: new.clone(),
                        }),
                        None => tracing::warn!("Kids array {} has no known owner", id),
                    }
                }
            }
            ChangeEvent::CollectionMutated {
                array,
                index,
                old,
                new,
            } => {
                if self.has(&WatchKey::Array(array.clone()), ObserverRole::Kids) {
                    let node = match array.key {
                        Some(_) => Some(array.owner),
                        None => kids_parents.peek(array.owner),
                    };
                    match node {
                        Some(node) => notifications.push(Notification::KidsMutated {
                            node,
                            index: *index,
                            old: old.clone(),
                            new: new.clone(),
                        }),
                        None => tracing::warn!("Kids array {} has no known owner", array.owner),
                    }
                }
            }
        }

        notifications
    }
}

fn entry_or_null(object: &Object, key: &str) -> Object {
    object
        .as_dict()
        .and_then(|dict| dict.get(key))
        .cloned()
        .unwrap_or(Object::Null)
}
