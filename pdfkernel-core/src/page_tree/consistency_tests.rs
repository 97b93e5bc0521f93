//! Tests for page tree consolidation after edits

#[cfg(test)]
mod tests {
    use crate::document::Document;
    use crate::error::PdfError;
    use crate::import::ObjectSource;
    use crate::objects::{Object, ObjectId};
    use crate::observer::{ArrayLocation, ObserverRole, WatchKey};
    use crate::page_list::Page;
    use crate::test_helpers::{self, id, CATALOG, ROOT};

    fn count_of(doc: &Document, node: ObjectId) -> Option<i64> {
        doc.resolve(node)
            .as_dict()
            .and_then(|dict| dict.get("Count"))
            .and_then(Object::as_integer)
    }

    fn parent_of(doc: &Document, node: ObjectId) -> Option<ObjectId> {
        doc.resolve(node)
            .as_dict()
            .and_then(|dict| dict.get_reference("Parent"))
    }

    fn cached_position(doc: &Document, page: &Page) -> Option<usize> {
        doc.page_list.borrow().position_of(page)
    }

    fn handles(doc: &Document) -> Vec<Page> {
        (1..=doc.page_count())
            .map(|position| doc.get_page(position).unwrap())
            .collect()
    }

    fn new_leaf(doc: &mut Document) -> ObjectId {
        doc.import_object(&test_helpers::page(None).into(), ObjectSource::Native, false)
            .unwrap()
    }

    fn observes_node(doc: &Document, node: ObjectId) -> bool {
        doc.observers
            .has(&WatchKey::Object(node), ObserverRole::Node)
    }

    fn root_kids() -> ArrayLocation {
        ArrayLocation::direct(ROOT, "Kids")
    }

    #[test]
    fn test_observers_registered_on_open() {
        let doc = test_helpers::open(test_helpers::nested_store());

        assert!(doc
            .observers
            .has(&WatchKey::Object(CATALOG), ObserverRole::Root));
        for number in 2..=7 {
            assert!(observes_node(&doc, id(number)), "node {number} not observed");
        }
        assert!(doc.observers.has(
            &WatchKey::Array(ArrayLocation::direct(id(3), "Kids")),
            ObserverRole::Kids
        ));
        assert!(doc.observers.has(&WatchKey::Array(root_kids()), ObserverRole::Kids));
    }

    #[test]
    fn test_consolidate_tree_fixes_counts_upwards() {
        let mut doc = test_helpers::open(test_helpers::grouped_store(&[2, 3], true));

        assert!(!doc.consolidate_tree(id(3), true).unwrap());
        assert_eq!(count_of(&doc, id(3)), Some(2));
        assert_eq!(count_of(&doc, ROOT), Some(5));
        // The other group is not on the path
        assert_eq!(count_of(&doc, id(6)), Some(10));

        assert!(doc.consolidate_tree(id(3), true).unwrap());
    }

    #[test]
    fn test_consolidate_tree_without_propagation() {
        let mut doc = test_helpers::open(test_helpers::grouped_store(&[2], true));
        assert!(!doc.consolidate_tree(id(3), false).unwrap());
        assert_eq!(count_of(&doc, id(3)), Some(2));
        assert_eq!(count_of(&doc, ROOT), Some(0));
    }

    #[test]
    fn test_consolidate_tree_repairs_parent_links() {
        let mut store = test_helpers::flat_store(2);
        store.insert(id(4), test_helpers::page(Some(id(9))).into());
        let mut doc = test_helpers::open(store);

        assert!(doc.consolidate_tree(ROOT, false).unwrap());
        assert_eq!(parent_of(&doc, id(4)), Some(ROOT));
        assert_eq!(parent_of(&doc, id(3)), Some(ROOT));
    }

    #[test]
    fn test_consolidate_tree_leaves_self_listed_node_alone() {
        let mut doc = test_helpers::open(test_helpers::cyclic_store());
        assert!(doc.consolidate_tree(id(3), true).unwrap());
        assert_eq!(parent_of(&doc, id(3)), Some(ROOT));
    }

    #[test]
    fn test_insert_kid_updates_counts_and_parent() {
        let mut doc = test_helpers::open(test_helpers::nested_store());
        assert_eq!(doc.page_count(), 4);

        let leaf = new_leaf(&mut doc);
        doc.insert_array_item(
            &ArrayLocation::direct(id(3), "Kids"),
            0,
            Object::Reference(leaf),
        )
        .unwrap();

        assert_eq!(count_of(&doc, id(3)), Some(3));
        assert_eq!(count_of(&doc, ROOT), Some(5));
        assert_eq!(parent_of(&doc, leaf), Some(id(3)));
        assert_eq!(doc.page_count(), 5);
        assert!(observes_node(&doc, leaf));
    }

    #[test]
    fn test_insert_kid_shifts_page_list() {
        let mut doc = test_helpers::open(test_helpers::nested_store());
        let pages = handles(&doc);

        let leaf = new_leaf(&mut doc);
        doc.insert_array_item(
            &ArrayLocation::direct(id(3), "Kids"),
            0,
            Object::Reference(leaf),
        )
        .unwrap();

        for (index, page) in pages.iter().enumerate() {
            assert!(page.is_valid());
            assert_eq!(cached_position(&doc, page), Some(index + 2));
        }
        assert_eq!(doc.get_page(1).unwrap().id(), leaf);
        assert!(doc.get_page(2).unwrap().same_handle(&pages[0]));
    }

    #[test]
    fn test_remove_kid_invalidates_and_shifts() {
        let mut doc = test_helpers::open(test_helpers::flat_store(3));
        let pages = handles(&doc);

        let removed = doc.remove_array_item(&root_kids(), 0).unwrap();
        assert_eq!(removed, Object::Reference(id(3)));

        assert!(!pages[0].is_valid());
        assert_eq!(cached_position(&doc, &pages[1]), Some(1));
        assert_eq!(cached_position(&doc, &pages[2]), Some(2));
        assert_eq!(count_of(&doc, ROOT), Some(2));
        assert!(!observes_node(&doc, id(3)));
    }

    #[test]
    fn test_remove_uncached_kid_still_shifts() {
        let mut doc = test_helpers::open(test_helpers::flat_store(3));
        let last = doc.get_page(3).unwrap();

        doc.remove_array_item(&root_kids(), 0).unwrap();
        assert_eq!(cached_position(&doc, &last), Some(2));
        assert_eq!(doc.page_position(&last).unwrap(), 2);
    }

    #[test]
    fn test_remove_intermediate_node() {
        let mut doc = test_helpers::open(test_helpers::nested_store());
        let pages = handles(&doc);

        doc.remove_array_item(&root_kids(), 0).unwrap();

        assert!(!pages[0].is_valid());
        assert!(!pages[1].is_valid());
        assert_eq!(cached_position(&doc, &pages[2]), Some(1));
        assert_eq!(cached_position(&doc, &pages[3]), Some(2));
        assert_eq!(count_of(&doc, ROOT), Some(2));
        assert_eq!(doc.page_count(), 2);
        for number in [3, 5, 6] {
            assert!(!observes_node(&doc, id(number)));
        }
    }

    #[test]
    fn test_replacing_entry_with_duplicate() {
        let mut doc = test_helpers::open(test_helpers::flat_store(3));
        let pages = handles(&doc);

        doc.set_array_item(&root_kids(), 0, Object::Reference(id(4)))
            .unwrap();

        assert!(!pages[0].is_valid());
        assert_eq!(doc.page_count(), 3);
        assert!(matches!(
            doc.page_position(&pages[1]),
            Err(PdfError::AmbiguousPageTree)
        ));
        assert!(observes_node(&doc, id(4)));
    }

    #[test]
    fn test_removing_one_of_two_listings() {
        let mut doc = test_helpers::open(test_helpers::duplicate_store());
        let pages = handles(&doc);
        assert_eq!(pages.len(), 3);

        doc.remove_array_item(&root_kids(), 2).unwrap();

        assert_eq!(doc.page_count(), 2);
        let survivors: Vec<&Page> = [&pages[0], &pages[2]]
            .into_iter()
            .filter(|page| page.is_valid())
            .collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(doc.page_position(survivors[0]).unwrap(), 1);
        assert_eq!(doc.page_position(&pages[1]).unwrap(), 2);
        assert!(observes_node(&doc, id(3)));
    }

    #[test]
    fn test_whole_kids_replacement() {
        let mut doc = test_helpers::open(test_helpers::flat_store(3));
        let pages = handles(&doc);

        doc.set_property(
            ROOT,
            "Kids",
            Object::Array(vec![Object::Reference(id(5)), Object::Reference(id(3))]),
        )
        .unwrap();

        assert_eq!(cached_position(&doc, &pages[0]), Some(2));
        assert!(!pages[1].is_valid());
        assert_eq!(cached_position(&doc, &pages[2]), Some(1));
        assert_eq!(count_of(&doc, ROOT), Some(2));
        assert!(!observes_node(&doc, id(4)));
        assert!(doc.observers.has(&WatchKey::Array(root_kids()), ObserverRole::Kids));
    }

    #[test]
    fn test_indirect_kids_element_removed() {
        let mut doc = test_helpers::open(test_helpers::indirect_kids_store());
        let pages = handles(&doc);

        doc.remove_array_item(&ArrayLocation::indirect(id(6)), 0)
            .unwrap();

        assert!(!pages[0].is_valid());
        assert_eq!(cached_position(&doc, &pages[1]), Some(1));
        assert_eq!(cached_position(&doc, &pages[2]), Some(2));
        assert_eq!(count_of(&doc, ROOT), Some(2));
    }

    #[test]
    fn test_indirect_kids_array_replaced() {
        let mut doc = test_helpers::open(test_helpers::indirect_kids_store());
        let pages = handles(&doc);

        doc.change_indirect_property(id(6), Object::Array(vec![Object::Reference(id(5))]))
            .unwrap();

        assert!(!pages[0].is_valid());
        assert!(!pages[1].is_valid());
        assert_eq!(cached_position(&doc, &pages[2]), Some(1));
        assert_eq!(count_of(&doc, ROOT), Some(1));
        assert_eq!(doc.page_count(), 1);
    }

    #[test]
    fn test_kids_reference_swapped_for_direct_array() {
        let mut doc = test_helpers::open(test_helpers::indirect_kids_store());

        doc.set_property(
            ROOT,
            "Kids",
            Object::Array(vec![Object::Reference(id(4))]),
        )
        .unwrap();

        assert_eq!(doc.page_count(), 1);
        assert!(doc.kids_parents.peek(id(6)).is_none());
        assert!(!doc.observers.has(
            &WatchKey::Array(ArrayLocation::indirect(id(6))),
            ObserverRole::Kids
        ));
        assert!(doc.observers.has(&WatchKey::Array(root_kids()), ObserverRole::Kids));
    }

    #[test]
    fn test_root_replacement_rebuilds_state() {
        let mut store = test_helpers::flat_store(2);
        store.insert(
            id(10),
            test_helpers::pages_node(None, Object::Array(vec![Object::Reference(id(3))]), 1)
                .into(),
        );
        let mut doc = test_helpers::open(store);
        let pages = handles(&doc);

        doc.set_property(CATALOG, "Pages", Object::Reference(id(10)))
            .unwrap();

        assert!(pages.iter().all(|page| !page.is_valid()));
        assert_eq!(doc.page_tree_root(), Some(id(10)));
        assert_eq!(doc.page_count(), 1);
        assert!(observes_node(&doc, id(10)));
        assert!(observes_node(&doc, id(3)));
        assert!(!observes_node(&doc, ROOT));
        assert!(!observes_node(&doc, id(4)));
    }

    #[test]
    fn test_root_removed() {
        let mut doc = test_helpers::open(test_helpers::flat_store(2));
        let page = doc.get_page(1).unwrap();

        doc.remove_property(CATALOG, "Pages").unwrap();

        assert!(!page.is_valid());
        assert_eq!(doc.page_tree_root(), None);
        assert_eq!(doc.page_count(), 0);
        assert!(doc.get_page(1).is_err());
    }

    #[test]
    fn test_catalog_replaced_as_a_whole() {
        let mut store = test_helpers::flat_store(2);
        store.insert(
            id(10),
            test_helpers::pages_node(None, Object::Array(vec![]), 0).into(),
        );
        let mut doc = test_helpers::open(store);

        doc.change_indirect_property(CATALOG, test_helpers::catalog(Some(id(10))).into())
            .unwrap();
        assert_eq!(doc.page_tree_root(), Some(id(10)));
        assert_eq!(doc.page_count(), 0);
    }

    #[test]
    fn test_broken_parent_chain_clears_count_cache() {
        let mut store = test_helpers::nested_store();
        store.insert(
            id(3),
            test_helpers::pages_node(
                Some(id(99)),
                Object::Array(vec![Object::Reference(id(5)), Object::Reference(id(6))]),
                2,
            )
            .into(),
        );
        let mut doc = test_helpers::open(store);
        assert_eq!(doc.page_count(), 4);

        let leaf = new_leaf(&mut doc);
        doc.insert_array_item(
            &ArrayLocation::direct(id(3), "Kids"),
            2,
            Object::Reference(leaf),
        )
        .unwrap();

        assert_eq!(doc.page_count(), 5);
        assert_eq!(doc.get_page(3).unwrap().id(), leaf);
    }

    #[test]
    fn test_node_listed_by_two_parents_clears_count_cache() {
        // Root Kids [3 4], node 3 holds leaf 5 and node 4 lists node 3 again
        let refs = |numbers: &[u32]| {
            Object::Array(numbers.iter().map(|n| Object::Reference(id(*n))).collect())
        };
        let mut store = test_helpers::flat_store(0);
        store.insert(ROOT, test_helpers::pages_node(None, refs(&[3, 4]), 2).into());
        store.insert(id(3), test_helpers::pages_node(Some(ROOT), refs(&[5]), 1).into());
        store.insert(id(4), test_helpers::pages_node(Some(ROOT), refs(&[3]), 1).into());
        store.insert(id(5), test_helpers::page(Some(id(3))).into());
        let mut doc = test_helpers::open(store);
        assert_eq!(doc.page_count(), 2);

        let leaf = new_leaf(&mut doc);
        doc.insert_array_item(
            &ArrayLocation::direct(id(3), "Kids"),
            1,
            Object::Reference(leaf),
        )
        .unwrap();

        assert_eq!(doc.page_count(), 4);
        assert_eq!(doc.locator().count_descendant_leaves(ROOT, None), 4);
        let mut cache = doc.count_cache.borrow_mut();
        assert_eq!(
            doc.locator().count_descendant_leaves(id(4), Some(&mut *cache)),
            2
        );
    }

    #[test]
    fn test_unrelated_edit_keeps_caches() {
        let mut doc = test_helpers::open(test_helpers::nested_store());
        let page = doc.get_page(2).unwrap();
        let cached = doc.count_cache_stats().size;

        doc.set_property(id(6), "Rotate", Object::Integer(90)).unwrap();

        assert!(page.is_valid());
        assert_eq!(doc.count_cache_stats().size, cached);
        assert_eq!(doc.page_position(&page).unwrap(), 2);
    }
}
