use super::cache::KidsCountCache;
use super::NodeKind;
use crate::error::{PdfError, Result};
use crate::objects::{Dictionary, Object, ObjectId};
use crate::observer::ArrayLocation;
use crate::resolver::Resolver;
use std::collections::HashSet;

/// Where a leaf sits: the node whose Kids array holds it and the entry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLocation {
    pub page: ObjectId,
    pub parent: ObjectId,
    pub index: usize,
}

/// Classification and traversal over the page tree of one document.
///
/// The locator is stateless apart from the optional kids-count cache passed
/// into the counting operations. Malformed entries are skipped with a
/// warning; only the operations that must name a position fail.
pub struct PageTreeLocator<'a> {
    resolver: &'a Resolver,
    root: Option<ObjectId>,
}

impl<'a> PageTreeLocator<'a> {
    pub fn new(resolver: &'a Resolver, root: Option<ObjectId>) -> Self {
        Self { resolver, root }
    }

    pub fn root(&self) -> Option<ObjectId> {
        self.root
    }

    pub fn classify(&self, id: ObjectId) -> NodeKind {
        let object = self.resolver.resolve(id);
        let Some(dict) = object.as_dict() else {
            return NodeKind::Error;
        };
        if self.root == Some(id) {
            return NodeKind::Root;
        }
        self.classify_dict(dict)
    }

    /// Classifies a value that may be a reference or a direct dictionary.
    pub fn classify_object(&self, object: &Object) -> NodeKind {
        match object {
            Object::Reference(id) => self.classify(*id),
            Object::Dictionary(dict) => self.classify_dict(dict),
            _ => NodeKind::Error,
        }
    }

    fn classify_dict(&self, dict: &Dictionary) -> NodeKind {
        if let Some(tag) = dict.get("Type") {
            return match self.resolver.resolve_value(tag).as_name() {
                Some("Page") => NodeKind::Leaf,
                Some("Pages") => NodeKind::Intermediate,
                other => {
                    tracing::debug!("unrecognised page tree type tag {:?}", other);
                    NodeKind::Unknown
                }
            };
        }

        match dict.get("Kids") {
            None => NodeKind::Leaf,
            Some(kids) if self.resolver.resolve_value(kids).as_array().is_some() => {
                NodeKind::Intermediate
            }
            Some(_) => NodeKind::Unknown,
        }
    }

    /// Kids entries of `node`, whether the array is direct or indirect.
    pub fn kids(&self, node: ObjectId) -> Vec<Object> {
        let object = self.resolver.resolve(node);
        object
            .as_dict()
            .and_then(|dict| dict.get("Kids"))
            .and_then(|kids| self.resolver.resolve_value(kids).as_array().cloned())
            .unwrap_or_default()
    }

    /// Reference-valued Kids entries of `node`.
    pub fn kid_refs(&self, node: ObjectId) -> Vec<ObjectId> {
        self.kids(node)
            .iter()
            .filter_map(Object::as_reference)
            .collect()
    }

    /// Mutable address of the Kids array of `node`.
    pub fn kids_location(&self, node: ObjectId) -> Option<ArrayLocation> {
        let object = self.resolver.resolve(node);
        match object.as_dict()?.get("Kids")? {
            Object::Array(_) => Some(ArrayLocation::direct(node, "Kids")),
            Object::Reference(array) if self.resolver.resolve(*array).as_array().is_some() => {
                Some(ArrayLocation::indirect(*array))
            }
            _ => None,
        }
    }

    /// Number of leaves below `node`, memoized in `cache` when given.
    pub fn count_descendant_leaves(
        &self,
        node: ObjectId,
        cache: Option<&mut KidsCountCache>,
    ) -> usize {
        self.count_leaves(node, cache, &mut HashSet::new())
    }

    fn count_leaves(
        &self,
        node: ObjectId,
        mut cache: Option<&mut KidsCountCache>,
        path: &mut HashSet<ObjectId>,
    ) -> usize {
        match self.classify(node) {
            NodeKind::Leaf => 1,
            NodeKind::Intermediate | NodeKind::Root => {
                if let Some(count) = cache.as_deref_mut().and_then(|c| c.get(node)) {
                    return count;
                }
                if !path.insert(node) {
                    tracing::warn!("Page tree cycle through {}, not counted again", node);
                    return 0;
                }

                let mut count = 0;
                for kid in self.kid_refs(node) {
                    if self.root == Some(kid) {
                        tracing::warn!("{} lists the page tree root as a kid", node);
                        continue;
                    }
                    count += self.count_leaves(kid, cache.as_deref_mut(), path);
                }
                path.remove(&node);

                if let Some(cache) = cache {
                    cache.update(node, count);
                }
                count
            }
            _ => 0,
        }
    }

    /// Returns the leaf at `target`, numbering the leaves below `root` from
    /// `start`.
    pub fn find_page_by_position(
        &self,
        root: ObjectId,
        start: usize,
        target: usize,
        cache: Option<&mut KidsCountCache>,
    ) -> Result<ObjectId> {
        if start > target {
            return Err(PdfError::PageNotFound(target));
        }
        match self.classify(root) {
            NodeKind::Leaf if start == target => Ok(root),
            NodeKind::Leaf => Err(PdfError::PageNotFound(target)),
            NodeKind::Intermediate | NodeKind::Root => self
                .descend(root, start, target, cache, &mut HashSet::new())
                .map(|location| location.page),
            kind => Err(PdfError::ElementBadType(format!(
                "{root} is not a page tree node ({kind:?})"
            ))),
        }
    }

    /// Like [`find_page_by_position`](Self::find_page_by_position) from
    /// position 1, also returning the owning node and Kids index.
    pub fn locate_page(
        &self,
        root: ObjectId,
        position: usize,
        cache: Option<&mut KidsCountCache>,
    ) -> Result<PageLocation> {
        if position == 0 {
            return Err(PdfError::PageNotFound(position));
        }
        match self.classify(root) {
            NodeKind::Intermediate | NodeKind::Root => {
                self.descend(root, 1, position, cache, &mut HashSet::new())
            }
            kind => Err(PdfError::ElementBadType(format!(
                "{root} is not an intermediate page tree node ({kind:?})"
            ))),
        }
    }

    fn descend(
        &self,
        node: ObjectId,
        start: usize,
        target: usize,
        mut cache: Option<&mut KidsCountCache>,
        path: &mut HashSet<ObjectId>,
    ) -> Result<PageLocation> {
        if start > target {
            return Err(PdfError::PageNotFound(target));
        }
        if !path.insert(node) {
            tracing::warn!("Page tree cycle through {} while looking for page {}", node, target);
            return Err(PdfError::PageNotFound(target));
        }

        let mut position = start;
        for (index, kid) in self.kids(node).iter().enumerate() {
            let Some(kid) = kid.as_reference() else {
                tracing::warn!("{} has a direct object in Kids[{}], skipped", node, index);
                continue;
            };

            match self.classify(kid) {
                NodeKind::Leaf => {
                    if position == target {
                        return Ok(PageLocation {
                            page: kid,
                            parent: node,
                            index,
                        });
                    }
                    position += 1;
                }
                NodeKind::Intermediate => {
                    let count = self.count_descendant_leaves(kid, cache.as_deref_mut());
                    if target < position + count {
                        return self.descend(kid, position, target, cache, path);
                    }
                    position += count;
                }
                kind => {
                    tracing::warn!("Kids[{}] of {} is not a usable node ({:?})", index, node, kind);
                }
            }
        }

        Err(PdfError::PageNotFound(target))
    }

    /// Position of the first leaf at or below `node`.
    ///
    /// Fails with `AmbiguousPageTree` when the matching Kids array lists
    /// `node` more than once.
    pub fn find_position_of_node(
        &self,
        root: ObjectId,
        node: ObjectId,
        mut cache: Option<&mut KidsCountCache>,
    ) -> Result<usize> {
        if root == node {
            return Ok(1);
        }
        if !self.classify(root).is_inner() {
            return Err(PdfError::ElementBadType(format!(
                "{root} is not an intermediate page tree node"
            )));
        }

        let mut path = HashSet::from([root]);
        self.search(root, node, 1, &mut cache, &mut path)?
            .ok_or(PdfError::PageNotFound(0))
    }

    fn search(
        &self,
        parent: ObjectId,
        target: ObjectId,
        start: usize,
        cache: &mut Option<&mut KidsCountCache>,
        path: &mut HashSet<ObjectId>,
    ) -> Result<Option<usize>> {
        let kids = self.kid_refs(parent);
        let mut position = start;

        for (index, kid) in kids.iter().copied().enumerate() {
            if kid == target {
                if kids[index + 1..].contains(&target) {
                    tracing::warn!("{} is listed more than once under {}", target, parent);
                    return Err(PdfError::AmbiguousPageTree);
                }
                return Ok(Some(position));
            }

            match self.classify(kid) {
                NodeKind::Leaf => position += 1,
                NodeKind::Intermediate => {
                    if path.insert(kid) {
                        let found = self.search(kid, target, position, cache, path)?;
                        path.remove(&kid);
                        if found.is_some() {
                            return Ok(found);
                        }
                    } else {
                        tracing::warn!("Page tree cycle through {}", kid);
                    }
                    position += self.count_descendant_leaves(kid, cache.as_deref_mut());
                }
                _ => {}
            }
        }

        Ok(None)
    }

    /// Walks the Parent chain of `node` looking for `ancestor`.
    pub fn is_descendant(&self, ancestor: ObjectId, node: ObjectId) -> bool {
        let mut visited = HashSet::new();
        let mut current = node;

        loop {
            let object = self.resolver.resolve(current);
            let Some(parent) = object.as_dict().and_then(|d| d.get_reference("Parent")) else {
                return false;
            };
            if parent == ancestor {
                return true;
            }
            if !visited.insert(parent) {
                tracing::warn!("Parent chain of {} loops through {}", node, parent);
                return false;
            }
            current = parent;
        }
    }

    /// Leaves reachable from `node`, each listed once.
    pub fn collect_leaves(&self, node: ObjectId) -> HashSet<ObjectId> {
        let mut leaves = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![node];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            match self.classify(current) {
                NodeKind::Leaf => {
                    leaves.insert(current);
                }
                NodeKind::Intermediate | NodeKind::Root => stack.extend(self.kid_refs(current)),
                _ => {}
            }
        }
        leaves
    }

    /// Value of an inheritable attribute for `page`, looked up on the page
    /// first and then along its Parent chain.
    pub fn inherited_attribute(&self, page: ObjectId, key: &str) -> Option<Object> {
        let mut visited = HashSet::new();
        let mut current = page;

        while visited.insert(current) {
            let object = self.resolver.resolve(current);
            let dict = object.as_dict()?;
            if let Some(value) = dict.get(key) {
                return Some(value.clone());
            }
            current = dict.get_reference("Parent")?;
        }
        None
    }
}

#[cfg(test)]
#[path = "locator_tests.rs"]
mod locator_tests;
