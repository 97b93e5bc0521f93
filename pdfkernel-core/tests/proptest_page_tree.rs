//! Property-based tests for page tree consistency
//!
//! Generates two-level trees with arbitrary group sizes (optionally with
//! wrong Count entries) and random edit sequences, then checks the page
//! count, the page order and the cached page handles against a plain model.

use pdfkernel::test_helpers;
use pdfkernel::{Document, Object, ObjectId, ObjectSource, Page};
use proptest::prelude::*;

prop_compose! {
    fn tree_strategy()(
        groups in prop::collection::vec(0usize..5, 1..5),
        corrupt in any::<bool>()
    ) -> (Vec<usize>, bool) {
        (groups, corrupt)
    }
}

#[derive(Debug, Clone)]
enum Edit {
    Insert(usize),
    Remove(usize),
}

fn edit_strategy() -> impl Strategy<Value = Edit> {
    prop_oneof![
        (0usize..30).prop_map(Edit::Insert),
        (1usize..30).prop_map(Edit::Remove),
    ]
}

fn page_ids(doc: &Document) -> Vec<ObjectId> {
    (1..=doc.page_count())
        .map(|position| doc.get_page(position).unwrap().id())
        .collect()
}

fn count_entry(doc: &Document, node: ObjectId) -> Option<i64> {
    doc.resolve(node)
        .as_dict()
        .and_then(|dict| dict.get("Count"))
        .and_then(Object::as_integer)
}

proptest! {
    #[test]
    fn test_page_count_ignores_count_entries((groups, corrupt) in tree_strategy()) {
        let doc = test_helpers::open(test_helpers::grouped_store(&groups, corrupt));
        prop_assert_eq!(doc.page_count(), groups.iter().sum::<usize>());
    }

    #[test]
    fn test_every_position_resolves_once((groups, corrupt) in tree_strategy()) {
        let doc = test_helpers::open(test_helpers::grouped_store(&groups, corrupt));
        let ids = page_ids(&doc);

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), ids.len());

        for page in (1..=ids.len()).map(|p| doc.get_page(p).unwrap()) {
            let position = doc.page_position(&page).unwrap();
            prop_assert_eq!(ids[position - 1], page.id());
        }
    }

    #[test]
    fn test_edits_follow_model(
        (groups, corrupt) in tree_strategy(),
        edits in prop::collection::vec(edit_strategy(), 1..12)
    ) {
        let mut doc = test_helpers::open(test_helpers::grouped_store(&groups, corrupt));
        let mut model = page_ids(&doc);
        let mut handles: Vec<Page> = (1..=model.len())
            .map(|p| doc.get_page(p).unwrap())
            .collect();
        let mut edited = false;

        for edit in edits {
            match edit {
                Edit::Insert(position) => {
                    let page = doc
                        .insert_page(&test_helpers::page(None), ObjectSource::Native, position)
                        .unwrap();
                    let index = position.clamp(1, model.len() + 1) - 1;
                    model.insert(index, page.id());
                    handles.insert(index, page);
                    edited = true;
                }
                Edit::Remove(position) if position <= model.len() => {
                    doc.remove_page(position).unwrap();
                    model.remove(position - 1);
                    let removed = handles.remove(position - 1);
                    prop_assert!(!removed.is_valid());
                    edited = true;
                }
                Edit::Remove(position) => {
                    prop_assert!(doc.remove_page(position).is_err());
                }
            }

            prop_assert_eq!(doc.page_count(), model.len());
            for (index, handle) in handles.iter().enumerate() {
                prop_assert!(handle.is_valid());
                prop_assert_eq!(doc.page_position(handle).unwrap(), index + 1);
            }
        }

        prop_assert_eq!(page_ids(&doc), model);
        // Every successful edit repairs the Count chain up to the root
        if edited {
            prop_assert_eq!(
                count_entry(&doc, test_helpers::ROOT),
                Some(doc.page_count() as i64)
            );
        }
    }
}
