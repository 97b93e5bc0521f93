//! Builders for small in-memory documents
//!
//! Used by the unit tests, the integration tests and the CLI tests. Every
//! builder uses object 1 as the catalog and, when there is a page tree,
//! object 2 as its root.

use crate::objects::{name, Dictionary, Object, ObjectId};
use crate::store::MemoryStore;
use crate::{Document, OpenMode};

pub const CATALOG: ObjectId = ObjectId::new(1, 0);
pub const ROOT: ObjectId = ObjectId::new(2, 0);

pub fn id(number: u32) -> ObjectId {
    ObjectId::new(number, 0)
}

fn refs(numbers: &[u32]) -> Object {
    Object::Array(numbers.iter().map(|n| Object::Reference(id(*n))).collect())
}

pub fn catalog(pages: Option<ObjectId>) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", name("Catalog"));
    if let Some(pages) = pages {
        dict.set("Pages", pages);
    }
    dict
}

/// A `/Type /Page` dictionary.
pub fn page(parent: Option<ObjectId>) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", name("Page"));
    if let Some(parent) = parent {
        dict.set("Parent", parent);
    }
    dict
}

pub fn pages_node(parent: Option<ObjectId>, kids: Object, count: i64) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", name("Pages"));
    dict.set("Kids", kids);
    dict.set("Count", count);
    if let Some(parent) = parent {
        dict.set("Parent", parent);
    }
    dict
}

fn store_with_root(root: Dictionary) -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert(CATALOG, catalog(Some(ROOT)).into());
    store.insert(ROOT, root.into());
    store.set_root(CATALOG);
    store
}

/// Catalog without a page tree.
pub fn empty_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    store.insert(CATALOG, catalog(None).into());
    store.set_root(CATALOG);
    store
}

/// Root with `pages` leaves, objects 3 onwards.
pub fn flat_store(pages: u32) -> MemoryStore {
    let numbers: Vec<u32> = (3..3 + pages).collect();
    let mut store = store_with_root(pages_node(None, refs(&numbers), pages as i64));
    for number in numbers {
        store.insert(id(number), page(Some(ROOT)).into());
    }
    store
}

/// Two-level tree, page order 5, 6, 4, 7.
///
/// ```text
/// 2 (MediaBox) ── 3 (Resources) ── 5, 6
///              ├─ 4
///              └─ 7
/// ```
pub fn nested_store() -> MemoryStore {
    let mut root = pages_node(None, refs(&[3, 4, 7]), 4);
    root.set(
        "MediaBox",
        Object::Array(vec![0.into(), 0.into(), 100.into(), 100.into()]),
    );
    let mut store = store_with_root(root);

    let mut resources = Dictionary::new();
    resources.set("ProcSet", Object::Array(vec![name("PDF")]));
    let mut node = pages_node(Some(ROOT), refs(&[5, 6]), 2);
    node.set("Resources", resources);
    store.insert(id(3), node.into());

    store.insert(id(4), page(Some(ROOT)).into());
    store.insert(id(5), page(Some(id(3))).into());
    store.insert(id(6), page(Some(id(3))).into());
    store.insert(id(7), page(Some(ROOT)).into());
    store
}

/// Root listing page 3 twice: Kids `[3 4 3]`.
pub fn duplicate_store() -> MemoryStore {
    let mut store = store_with_root(pages_node(None, refs(&[3, 4, 3]), 3));
    store.insert(id(3), page(Some(ROOT)).into());
    store.insert(id(4), page(Some(ROOT)).into());
    store
}

/// Node 3 lists itself among its kids. Leaves: 5 then 4.
pub fn cyclic_store() -> MemoryStore {
    let mut store = store_with_root(pages_node(None, refs(&[3, 4]), 2));
    store.insert(id(3), pages_node(Some(ROOT), refs(&[5, 3]), 1).into());
    store.insert(id(4), page(Some(ROOT)).into());
    store.insert(id(5), page(Some(id(3))).into());
    store
}

/// Root whose Kids entry is a reference to array object 6 holding `[3 4 5]`.
pub fn indirect_kids_store() -> MemoryStore {
    let mut store = store_with_root(pages_node(None, Object::Reference(id(6)), 3));
    for number in 3..=5 {
        store.insert(id(number), page(Some(ROOT)).into());
    }
    store.insert(id(6), refs(&[3, 4, 5]));
    store
}

/// Root with one intermediate node per group, each holding that many leaves.
/// With `corrupt_counts` every Count field is wrong.
pub fn grouped_store(groups: &[usize], corrupt_counts: bool) -> MemoryStore {
    let mut next = 3;
    let mut group_ids = Vec::new();
    let mut objects = Vec::new();
    let mut total = 0;

    for &size in groups {
        let node = next;
        next += 1;
        let leaves: Vec<u32> = (next..next + size as u32).collect();
        next += size as u32;
        total += size;

        let count = if corrupt_counts { size as i64 + 7 } else { size as i64 };
        objects.push((node, pages_node(Some(ROOT), refs(&leaves), count)));
        for leaf in leaves {
            objects.push((leaf, page(Some(id(node)))));
        }
        group_ids.push(node);
    }

    let root_count = if corrupt_counts { 0 } else { total as i64 };
    let mut store = store_with_root(pages_node(None, refs(&group_ids), root_count));
    for (number, dict) in objects {
        store.insert(id(number), dict.into());
    }
    store
}

pub fn open(store: MemoryStore) -> Document {
    match Document::open(store, OpenMode::ReadWrite) {
        Ok(document) => document,
        Err(e) => panic!("test document failed to open: {e}"),
    }
}

pub fn open_read_only(store: MemoryStore) -> Document {
    match Document::open(store, OpenMode::ReadOnly) {
        Ok(document) => document,
        Err(e) => panic!("test document failed to open: {e}"),
    }
}
