use crate::element::{Element, Props};
use crate::fiber::{FiberFlags, FiberId, WorkTag};
use crate::reconciler::Reconciler;
use crate::test_support::{test_rig, RecordingHost};

fn parent_pair(reconciler: &mut Reconciler<RecordingHost>) -> (FiberId, FiberId) {
    let current = reconciler.fibers.create_fiber_from_element(
        &Element::host("parent", Props::default()),
        crate::fiber::FiberMode::CONCURRENT,
    );
    let wip = reconciler
        .fibers
        .create_work_in_progress(current, Props::default());
    (current, wip)
}

fn children_of(reconciler: &Reconciler<RecordingHost>, parent: FiberId) -> Vec<FiberId> {
    let mut out = Vec::new();
    let mut cursor = reconciler.fibers[parent].child;
    while let Some(id) = cursor {
        out.push(id);
        cursor = reconciler.fibers[id].sibling;
    }
    out
}

fn keys_of(reconciler: &Reconciler<RecordingHost>, parent: FiberId) -> Vec<Option<String>> {
    children_of(reconciler, parent)
        .into_iter()
        .map(|id| reconciler.fibers[id].key.as_deref().map(str::to_owned))
        .collect()
}

#[test]
fn mount_links_children_in_descriptor_order() {
    let (mut r, _root) = test_rig();
    let (_current, wip) = parent_pair(&mut r);

    let elements = vec![
        Element::host("a", Props::default()),
        Element::host("b", Props::default()),
        Element::text("hi"),
    ];
    r.reconcile_child_fibers(wip, None, &elements, false);

    let children = children_of(&r, wip);
    assert_eq!(children.len(), 3);
    for (index, id) in children.iter().enumerate() {
        assert_eq!(r.fibers[*id].index, index as u32);
        assert_eq!(r.fibers[*id].parent, Some(wip));
    }
    assert_eq!(r.fibers[children[2]].tag, WorkTag::HostText);
    // Mount passes record no placement effects; the parent's own placement
    // covers the subtree.
    assert!(children
        .iter()
        .all(|id| !r.fibers[*id].flags.contains(FiberFlags::PLACEMENT)));
}

#[test]
fn update_reuses_positional_matches() {
    let (mut r, _root) = test_rig();
    let (current, wip) = parent_pair(&mut r);

    let old = vec![
        Element::host("a", Props::default()),
        Element::host("b", Props::default()),
    ];
    r.reconcile_child_fibers(current, None, &old, false);
    let old_children = children_of(&r, current);

    let new = vec![
        Element::host("a", Props::new().attr("x", 1i64).build()),
        Element::host("b", Props::default()),
    ];
    let first_old = r.fibers[current].child;
    r.reconcile_child_fibers(wip, first_old, &new, true);

    let new_children = children_of(&r, wip);
    assert_eq!(new_children.len(), 2);
    assert_eq!(r.fibers[new_children[0]].alternate, Some(old_children[0]));
    assert_eq!(r.fibers[new_children[1]].alternate, Some(old_children[1]));
    assert!(r.fibers[wip].deletions.is_empty());
}

#[test]
fn keyed_reorder_moves_without_recreating() {
    let (mut r, _root) = test_rig();
    let (current, wip) = parent_pair(&mut r);

    let old = vec![
        Element::host("a", Props::default()).with_key("x"),
        Element::host("b", Props::default()).with_key("y"),
    ];
    r.reconcile_child_fibers(current, None, &old, false);
    let old_children = children_of(&r, current);

    let new = vec![
        Element::host("b", Props::default()).with_key("y"),
        Element::host("a", Props::default()).with_key("x"),
    ];
    let first_old = r.fibers[current].child;
    r.reconcile_child_fibers(wip, first_old, &new, true);

    assert_eq!(
        keys_of(&r, wip),
        vec![Some("y".to_owned()), Some("x".to_owned())]
    );
    let new_children = children_of(&r, wip);
    // Both reused through their alternates.
    assert_eq!(r.fibers[new_children[0]].alternate, Some(old_children[1]));
    assert_eq!(r.fibers[new_children[1]].alternate, Some(old_children[0]));
    // Exactly one placement: the fiber that moved left-to-right.
    assert!(!r.fibers[new_children[0]].flags.contains(FiberFlags::PLACEMENT));
    assert!(r.fibers[new_children[1]].flags.contains(FiberFlags::PLACEMENT));
    assert!(r.fibers[wip].deletions.is_empty());
}

#[test]
fn removed_children_land_in_deletions() {
    let (mut r, _root) = test_rig();
    let (current, wip) = parent_pair(&mut r);

    let old = vec![
        Element::host("a", Props::default()).with_key("x"),
        Element::host("b", Props::default()).with_key("y"),
        Element::host("c", Props::default()).with_key("z"),
    ];
    r.reconcile_child_fibers(current, None, &old, false);
    let old_children = children_of(&r, current);

    let new = vec![Element::host("b", Props::default()).with_key("y")];
    let first_old = r.fibers[current].child;
    r.reconcile_child_fibers(wip, first_old, &new, true);

    assert_eq!(keys_of(&r, wip), vec![Some("y".to_owned())]);
    assert!(r.fibers[wip].flags.contains(FiberFlags::CHILD_DELETION));
    let deletions = &r.fibers[wip].deletions;
    assert_eq!(deletions.len(), 2);
    assert!(deletions.contains(&old_children[0]));
    assert!(deletions.contains(&old_children[2]));
}

#[test]
fn same_key_different_type_replaces_in_place() {
    let (mut r, _root) = test_rig();
    let (current, wip) = parent_pair(&mut r);

    let old = vec![Element::host("a", Props::default()).with_key("x")];
    r.reconcile_child_fibers(current, None, &old, false);
    let old_child = children_of(&r, current)[0];

    let new = vec![Element::host("b", Props::default()).with_key("x")];
    let first_old = r.fibers[current].child;
    r.reconcile_child_fibers(wip, first_old, &new, true);

    let new_child = children_of(&r, wip)[0];
    assert!(r.fibers[new_child].alternate.is_none(), "fresh fiber");
    assert!(r.fibers[new_child].flags.contains(FiberFlags::PLACEMENT));
    assert!(r.fibers[wip].deletions.contains(&old_child));
}

#[test]
fn text_fibers_update_in_place() {
    let (mut r, _root) = test_rig();
    let (current, wip) = parent_pair(&mut r);

    r.reconcile_child_fibers(current, None, &[Element::text("before")], false);
    let old_child = children_of(&r, current)[0];

    let first_old = r.fibers[current].child;
    r.reconcile_child_fibers(wip, first_old, &[Element::text("after")], true);

    let new_child = children_of(&r, wip)[0];
    assert_eq!(r.fibers[new_child].alternate, Some(old_child));
    assert_eq!(
        r.fibers[new_child].pending_props.text_content(),
        Some("after")
    );
}

#[test]
fn clone_child_fibers_rebuilds_the_chain_in_the_other_buffer() {
    let (mut r, _root) = test_rig();
    let (current, wip) = parent_pair(&mut r);

    let old = vec![
        Element::host("a", Props::default()),
        Element::host("b", Props::default()),
    ];
    r.reconcile_child_fibers(current, None, &old, false);
    let old_children = children_of(&r, current);

    // A bailing-out parent carries the committed children over.
    r.fibers[wip].child = r.fibers[current].child;
    r.clone_child_fibers(wip);

    let cloned = children_of(&r, wip);
    assert_eq!(cloned.len(), 2);
    assert_ne!(cloned[0], old_children[0]);
    assert_eq!(r.fibers[cloned[0]].alternate, Some(old_children[0]));
    assert_eq!(r.fibers[cloned[1]].alternate, Some(old_children[1]));
    assert!(cloned
        .iter()
        .all(|id| r.fibers[*id].parent == Some(wip)));
}
