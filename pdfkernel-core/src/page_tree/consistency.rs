//! Structural consistency maintenance
//!
//! Reacts to page tree notifications synchronously: registers observers on
//! new subtrees and drops them from removed ones, repairs Count and Parent
//! entries bottom-up, invalidates cached counts and moves or invalidates the
//! page handles affected by the edit.
//!
//! Nothing here is transactional. A failure mid-cascade is logged, the cached
//! page count is reset and the remaining steps still run.

use super::locator::PageTreeLocator;
use super::NodeKind;
use crate::document::Document;
use crate::error::{PdfError, Result};
use crate::objects::{Object, ObjectId};
use crate::observer::{ArrayLocation, ChangeEvent, Notification, ObserverRole, WatchKey};
use crate::page_list::PageList;
use std::collections::{HashMap, HashSet};

impl Document {
    pub(crate) fn notify(&mut self, event: ChangeEvent) {
        let notifications = self.observers.dispatch(&event, &self.kids_parents);
        if notifications.is_empty() {
            return;
        }

        for notification in notifications {
            tracing::debug!("page tree notification: {:?}", notification);
            let result = match notification {
                Notification::RootReplaced { new, .. } => {
                    self.on_root_replaced(&new);
                    Ok(())
                }
                Notification::KidsReplaced { node, old, new } => {
                    self.on_kids_replaced(node, &old, &new)
                }
                Notification::KidsMutated {
                    node,
                    index,
                    old,
                    new,
                } => self.on_kids_mutated(node, index, &old, &new),
            };
            if let Err(e) = result {
                tracing::error!("page tree consolidation failed: {}", e);
            }
            self.page_count.set(0);
        }
    }

    fn on_root_replaced(&mut self, new: &Object) {
        tracing::info!("page tree root replaced, rebuilding page tree state");
        self.page_list.get_mut().invalidate_all();
        self.count_cache.get_mut().clear();
        if let Some(old_root) = self.root {
            self.unregister_subtree(old_root, true);
        }

        self.root = match new {
            Object::Reference(root) if self.resolver.resolve(*root).as_dict().is_some() => {
                Some(*root)
            }
            Object::Null => None,
            other => {
                tracing::warn!("new /Pages value is unusable ({})", other.type_name());
                None
            }
        };
        if let Some(root) = self.root {
            self.register_subtree(root);
        }
    }

    fn on_kids_mutated(
        &mut self,
        node: ObjectId,
        index: usize,
        old: &Object,
        new: &Object,
    ) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let removed = old.as_reference();
        let added = new.as_reference();

        if let Some(removed) = removed {
            self.discard_subtree_counts(removed);
        }
        self.discard_ancestor_counts(node);

        if let Some(removed) = removed {
            self.unregister_subtree(removed, false);
        }
        if let Some(added) = added {
            self.register_subtree(added);
        }

        let consolidated = self.consolidate_tree(node, true);
        self.consolidate_page_list(node, index, removed, added);
        consolidated.map(drop)
    }

    fn on_kids_replaced(&mut self, node: ObjectId, old: &Object, new: &Object) -> Result<()> {
        let old_refs = self.kid_refs_of(old);
        let new_refs = self.kid_refs_of(new);
        let removed: Vec<ObjectId> = old_refs
            .iter()
            .filter(|id| !new_refs.contains(id))
            .copied()
            .collect();
        let added: Vec<ObjectId> = new_refs
            .iter()
            .filter(|id| !old_refs.contains(id))
            .copied()
            .collect();
        tracing::debug!(
            "Kids of {} replaced: {} removed, {} added",
            node,
            removed.len(),
            added.len()
        );

        self.refresh_kids_watch(node, old);
        for id in &removed {
            self.discard_subtree_counts(*id);
        }
        self.discard_ancestor_counts(node);

        for id in removed {
            self.unregister_subtree(id, false);
        }
        for id in added {
            self.register_subtree(id);
        }

        let consolidated = self.consolidate_tree(node, true);
        if let Some(root) = self.root {
            let locator = PageTreeLocator::new(&self.resolver, Some(root));
            reposition_all(self.page_list.get_mut(), &locator, root);
        }
        consolidated.map(drop)
    }

    /// Reference entries of a Kids value, following an indirect array.
    fn kid_refs_of(&self, value: &Object) -> HashSet<ObjectId> {
        self.resolver
            .resolve_value(value)
            .as_array()
            .map(|items| items.iter().filter_map(Object::as_reference).collect())
            .unwrap_or_default()
    }

    /// Moves the Kids-array observer of `node` after its Kids entry changed.
    fn refresh_kids_watch(&mut self, node: ObjectId, old: &Object) {
        if let Object::Reference(array) = old {
            let key = WatchKey::Array(ArrayLocation::indirect(*array));
            self.observers.unregister(&key, ObserverRole::Kids);
            self.kids_parents.discard(*array);
        } else {
            let key = WatchKey::Array(ArrayLocation::direct(node, "Kids"));
            self.observers.unregister(&key, ObserverRole::Kids);
        }
        self.watch_kids(node);
    }

    fn watch_kids(&mut self, node: ObjectId) {
        let locator = PageTreeLocator::new(&self.resolver, self.root);
        if let Some(location) = locator.kids_location(node) {
            if location.is_indirect() {
                self.kids_parents.update(location.owner, node);
            }
            self.observers
                .register(WatchKey::Array(location), ObserverRole::Kids);
        }
    }

    /// Registers observers on `node` and everything below it. Stops at nodes
    /// that are already registered.
    pub(crate) fn register_subtree(&mut self, node: ObjectId) {
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            let locator = PageTreeLocator::new(&self.resolver, self.root);
            let kind = locator.classify(current);
            if !kind.is_node() {
                tracing::warn!("{} is not a page tree node ({:?}), not observed", current, kind);
                continue;
            }
            let kids = if kind.is_inner() {
                locator.kid_refs(current)
            } else {
                Vec::new()
            };

            if !self
                .observers
                .register(WatchKey::Object(current), ObserverRole::Node)
            {
                continue;
            }
            if kind.is_inner() {
                self.watch_kids(current);
                stack.extend(kids);
            }
        }
    }

    /// Drops the observers of `node` and its descendants. Unless `cleanup`
    /// is set, nodes still reachable from the root keep theirs.
    pub(crate) fn unregister_subtree(&mut self, node: ObjectId, cleanup: bool) {
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            if !self
                .observers
                .has(&WatchKey::Object(current), ObserverRole::Node)
            {
                continue;
            }
            if !cleanup && self.is_reachable(current) {
                tracing::debug!("{} is still in the page tree, keeping observers", current);
                continue;
            }

            self.observers
                .unregister(&WatchKey::Object(current), ObserverRole::Node);
            let locator = PageTreeLocator::new(&self.resolver, self.root);
            let kids = locator.kid_refs(current);
            if let Some(location) = locator.kids_location(current) {
                if location.is_indirect() {
                    self.kids_parents.discard(location.owner);
                }
                self.observers
                    .unregister(&WatchKey::Array(location), ObserverRole::Kids);
            }
            stack.extend(kids);
        }
    }

    /// Reachable from the root, even if its position is ambiguous.
    fn is_reachable(&self, node: ObjectId) -> bool {
        let Some(root) = self.root else {
            return false;
        };
        let mut cache = self.count_cache.borrow_mut();
        matches!(
            self.locator()
                .find_position_of_node(root, node, Some(&mut *cache)),
            Ok(_) | Err(PdfError::AmbiguousPageTree)
        )
    }

    fn discard_subtree_counts(&mut self, node: ObjectId) {
        let locator = PageTreeLocator::new(&self.resolver, self.root);
        let cache = self.count_cache.get_mut();
        let mut visited = HashSet::new();
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if cache.discard(current).is_some() || locator.classify(current).is_inner() {
                stack.extend(locator.kid_refs(current));
            }
        }
    }

    /// Discards cached counts from `node` up to the root. A Parent chain that
    /// does not reach the root, or that passes a node listed by more than one
    /// parent, leaves no way to know which entries are stale, so the whole
    /// cache goes.
    fn discard_ancestor_counts(&mut self, node: ObjectId) {
        let shared = self.shared_nodes();
        let cache = self.count_cache.get_mut();
        let mut visited = HashSet::from([node]);
        let mut current = node;

        loop {
            if shared.contains(&current) {
                tracing::warn!(
                    "{} is listed by more than one parent, clearing count cache",
                    current
                );
                cache.clear();
                return;
            }
            cache.discard(current);
            if Some(current) == self.root {
                return;
            }
            let object = self.resolver.resolve(current);
            match object.as_dict().and_then(|dict| dict.get_reference("Parent")) {
                Some(parent) if visited.insert(parent) => current = parent,
                _ => {
                    tracing::warn!(
                        "Parent chain of {} does not reach the root, clearing count cache",
                        node
                    );
                    cache.clear();
                    return;
                }
            }
        }
    }

    /// Nodes listed in the Kids of more than one node reachable from the root.
    fn shared_nodes(&self) -> HashSet<ObjectId> {
        let mut shared = HashSet::new();
        let Some(root) = self.root else {
            return shared;
        };
        let locator = self.locator();
        let mut owners: HashMap<ObjectId, ObjectId> = HashMap::new();
        let mut visited = HashSet::new();
        let mut stack = vec![root];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) || !locator.classify(current).is_inner() {
                continue;
            }
            for kid in locator.kid_refs(current) {
                match owners.get(&kid) {
                    Some(owner) if *owner != current => {
                        shared.insert(kid);
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(kid, current);
                    }
                }
                stack.push(kid);
            }
        }
        shared
    }

    /// Recomputes the Count of `node`, repairs the Parent entries of its kids
    /// and, when the count was wrong and `propagate` is set, continues with
    /// the parent. Returns whether the Count of `node` was already right.
    pub(crate) fn consolidate_tree(&mut self, node: ObjectId, propagate: bool) -> Result<bool> {
        let mut current = node;
        let mut visited = HashSet::from([node]);
        let mut first = None;

        loop {
            let locator = PageTreeLocator::new(&self.resolver, self.root);
            if !locator.classify(current).is_inner() {
                break;
            }
            let real = locator.count_descendant_leaves(current, None);
            let kids = locator.kid_refs(current);

            let mut object = (*self.resolver.resolve(current)).clone();
            let Some(dict) = object.as_dict_mut() else {
                break;
            };
            let parent = dict.get_reference("Parent");
            let count_ok = dict.get("Count").and_then(Object::as_integer) == Some(real as i64);

            if !count_ok {
                tracing::debug!(
                    "Count of {} is {:?}, should be {}",
                    current,
                    dict.get("Count"),
                    real
                );
                dict.set("Count", real as i64);
                self.resolver.update(current, object)?;
                self.count_cache.get_mut().discard(current);
            }

            for kid in kids {
                if Some(kid) == self.root || kid == current {
                    tracing::warn!("{} lists {} as a kid, Parent left alone", current, kid);
                    continue;
                }
                self.fix_parent(kid, current)?;
            }

            first.get_or_insert(count_ok);
            if count_ok || !propagate || Some(current) == self.root {
                break;
            }
            match parent {
                Some(parent) if visited.insert(parent) => current = parent,
                Some(parent) => {
                    tracing::warn!("Parent chain loops through {}", parent);
                    break;
                }
                None => break,
            }
        }

        Ok(first.unwrap_or(true))
    }

    fn fix_parent(&mut self, kid: ObjectId, parent: ObjectId) -> Result<()> {
        let current = self.resolver.resolve(kid);
        let Some(dict) = current.as_dict() else {
            return Ok(());
        };
        if dict.get_reference("Parent") == Some(parent) {
            return Ok(());
        }

        let mut dict = dict.clone();
        dict.set("Parent", parent);
        self.resolver.update(kid, dict.into())?;
        tracing::debug!("Parent of {} set to {}", kid, parent);
        Ok(())
    }

    /// Reconciles the page list after entry `index` of the Kids array of
    /// `node` changed from `old` to `new`.
    pub(crate) fn consolidate_page_list(
        &mut self,
        node: ObjectId,
        index: usize,
        old: Option<ObjectId>,
        new: Option<ObjectId>,
    ) {
        let Some(root) = self.root else {
            self.page_list.get_mut().invalidate_all();
            return;
        };
        let locator = PageTreeLocator::new(&self.resolver, Some(root));
        let list = self.page_list.get_mut();

        let leaves = |id: Option<ObjectId>| id.map_or(0, |id| locator.count_descendant_leaves(id, None));
        let difference = leaves(new) as isize - leaves(old) as isize;
        let reachable = |id: ObjectId| {
            matches!(
                locator.find_position_of_node(root, id, None),
                Ok(_) | Err(PdfError::AmbiguousPageTree)
            )
        };

        let mut min_position: Option<usize> = None;
        let mut unknown = false;

        if let Some(old) = old {
            let removed_leaves = match locator.classify(old) {
                NodeKind::Leaf => HashSet::from([old]),
                NodeKind::Intermediate => locator.collect_leaves(old),
                _ => HashSet::new(),
            };

            for leaf in removed_leaves {
                let positions = list.positions_of_id(leaf);
                if positions.is_empty() {
                    continue;
                }
                if reachable(leaf) {
                    tracing::debug!("{} left one Kids array but is still in the tree", leaf);
                    unknown = true;
                    continue;
                }
                if positions.len() > 1 {
                    tracing::warn!("{} was cached at {} positions", leaf, positions.len());
                    unknown = true;
                }
                for position in &positions {
                    if let Some(page) = list.remove(*position) {
                        page.invalidate();
                    }
                }
                if positions.len() == 1 {
                    let position = positions[0];
                    min_position = Some(min_position.map_or(position, |min| min.min(position)));
                }
            }
        }

        if !unknown && min_position.is_none() {
            match slot_position(&locator, root, node, index) {
                Some(position) => min_position = Some(position),
                None => unknown = true,
            }
        }

        if unknown {
            reposition_all(list, &locator, root);
            return;
        }
        if difference == 0 {
            return;
        }
        let Some(min_position) = min_position else {
            return;
        };

        for (position, page) in list.split_from(min_position) {
            let target = position as isize + difference;
            if target < 1 {
                page.invalidate();
                continue;
            }
            if let Some(displaced) = list.insert(target as usize, page) {
                tracing::warn!("page list collision at {}", target);
                displaced.invalidate();
            }
        }
        tracing::debug!(
            "page list shifted by {} from position {}",
            difference,
            min_position
        );
    }
}

/// Position the entry `index` of the Kids array of `node` starts at.
fn slot_position(
    locator: &PageTreeLocator<'_>,
    root: ObjectId,
    node: ObjectId,
    index: usize,
) -> Option<usize> {
    let start = locator.find_position_of_node(root, node, None).ok()?;
    let preceding: usize = locator
        .kids(node)
        .iter()
        .take(index)
        .filter_map(Object::as_reference)
        .map(|kid| match locator.classify(kid) {
            NodeKind::Leaf => 1,
            NodeKind::Intermediate => locator.count_descendant_leaves(kid, None),
            _ => 0,
        })
        .sum();
    Some(start + preceding)
}

/// Moves every cached handle to the position the locator reports for it,
/// invalidating handles that are no longer reachable or are ambiguous.
fn reposition_all(list: &mut PageList, locator: &PageTreeLocator<'_>, root: ObjectId) {
    for (old_position, page) in list.drain() {
        let found = if locator.classify(page.id()) == NodeKind::Leaf {
            locator.find_position_of_node(root, page.id(), None)
        } else {
            Err(PdfError::PageNotFound(old_position))
        };

        match found {
            Ok(position) => {
                if position != old_position {
                    tracing::debug!("{} moved from {} to {}", page.id(), old_position, position);
                }
                if let Some(displaced) = list.insert(position, page) {
                    tracing::warn!("page list collision at {}", position);
                    displaced.invalidate();
                }
            }
            Err(e) => {
                tracing::debug!("invalidating handle of {}: {}", page.id(), e);
                page.invalidate();
            }
        }
    }
}

#[cfg(test)]
#[path = "consistency_tests.rs"]
mod consistency_tests;
