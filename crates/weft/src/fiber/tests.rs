use super::{Fiber, FiberArena, FiberFlags, FiberMode, WorkTag};
use crate::element::{Element, Props};
use crate::test_support::RecordingHost;

fn arena() -> FiberArena<RecordingHost> {
    FiberArena::default()
}

fn host_fiber(arena: &mut FiberArena<RecordingHost>, tag: &str) -> super::FiberId {
    arena.create_fiber_from_element(&Element::host(tag, Props::default()), FiberMode::CONCURRENT)
}

#[test]
fn create_work_in_progress_wires_alternates_symmetrically() {
    let mut arena = arena();
    let current = host_fiber(&mut arena, "a");

    let wip = arena.create_work_in_progress(current, Props::default());

    assert_eq!(arena[current].alternate, Some(wip));
    assert_eq!(arena[wip].alternate, Some(current));
}

#[test]
fn create_work_in_progress_reuses_the_same_slot() {
    let mut arena = arena();
    let current = host_fiber(&mut arena, "a");

    let first = arena.create_work_in_progress(current, Props::default());
    let second = arena.create_work_in_progress(current, Props::default());

    assert_eq!(first, second, "the pair flips between two fixed slots");
    assert_eq!(arena.len(), 2);
}

#[test]
fn work_in_progress_preserves_only_static_flags() {
    let mut arena = arena();
    let current = host_fiber(&mut arena, "a");
    arena[current].flags =
        FiberFlags::PLACEMENT | FiberFlags::UPDATE | FiberFlags::REF_STATIC | FiberFlags::PASSIVE_STATIC;

    let wip = arena.create_work_in_progress(current, Props::default());

    assert_eq!(
        arena[wip].flags,
        FiberFlags::REF_STATIC | FiberFlags::PASSIVE_STATIC
    );
    assert_eq!(
        arena[wip].flags & FiberFlags::STATIC_MASK,
        arena[current].flags & FiberFlags::STATIC_MASK
    );
}

#[test]
fn work_in_progress_reuse_clears_render_output() {
    let mut arena = arena();
    let current = host_fiber(&mut arena, "a");
    let wip = arena.create_work_in_progress(current, Props::default());

    {
        let fiber = &mut arena[wip];
        fiber.flags = FiberFlags::PLACEMENT;
        fiber.subtree_flags = FiberFlags::UPDATE;
        fiber.deletions.push(current);
    }

    let wip = arena.create_work_in_progress(current, Props::default());
    let fiber = &arena[wip];
    assert!(fiber.flags.is_empty());
    assert!(fiber.subtree_flags.is_empty());
    assert!(fiber.deletions.is_empty());
}

#[test]
fn work_in_progress_copies_work_state_from_current() {
    let mut arena = arena();
    let current = host_fiber(&mut arena, "a");
    let child = host_fiber(&mut arena, "b");
    {
        let fiber = &mut arena[current];
        fiber.lanes = crate::lane::Lanes::DEFAULT;
        fiber.child_lanes = crate::lane::Lanes::TRANSITION_0;
        fiber.child = Some(child);
        fiber.index = 3;
    }

    let props = Props::new().attr("id", "x").build();
    let wip = arena.create_work_in_progress(current, props.clone());

    let fiber = &arena[wip];
    assert_eq!(fiber.lanes, crate::lane::Lanes::DEFAULT);
    assert_eq!(fiber.child_lanes, crate::lane::Lanes::TRANSITION_0);
    assert_eq!(fiber.child, Some(child));
    assert_eq!(fiber.index, 3);
    assert!(fiber.pending_props.same(&props));
}

#[test]
fn release_subtree_frees_descendants_and_alternates() {
    let mut arena = arena();
    let parent = host_fiber(&mut arena, "a");
    let child = host_fiber(&mut arena, "b");
    let grandchild = host_fiber(&mut arena, "c");
    arena[parent].child = Some(child);
    arena[child].parent = Some(parent);
    arena[child].child = Some(grandchild);
    arena[grandchild].parent = Some(child);

    let child_wip = arena.create_work_in_progress(child, Props::default());
    assert_eq!(arena.len(), 4);

    arena.release_subtree(parent);

    assert!(!arena.contains(parent));
    assert!(!arena.contains(child));
    assert!(!arena.contains(grandchild));
    assert!(!arena.contains(child_wip), "alternates go with the pair");
    assert!(arena.is_empty());
}

#[test]
fn release_subtree_leaves_siblings_of_the_root_alone() {
    let mut arena = arena();
    let first = host_fiber(&mut arena, "a");
    let second = host_fiber(&mut arena, "b");
    arena[first].sibling = Some(second);

    arena.release_subtree(first);

    assert!(!arena.contains(first));
    assert!(arena.contains(second));
}

#[test]
fn tag_mapping_covers_host_and_composite_kinds() {
    let mut arena = arena();
    let host = host_fiber(&mut arena, "a");
    assert_eq!(arena[host].tag, WorkTag::HostComponent);

    let text =
        arena.create_fiber_from_element(&Element::text("hi"), FiberMode::CONCURRENT);
    assert_eq!(arena[text].tag, WorkTag::HostText);

    let fragment =
        arena.create_fiber_from_element(&Element::fragment([]), FiberMode::CONCURRENT);
    assert_eq!(arena[fragment].tag, WorkTag::Fragment);
}

#[test]
fn new_fiber_starts_clean() {
    let fiber: Fiber<RecordingHost> =
        Fiber::new(WorkTag::Fragment, Props::default(), None, FiberMode::empty());
    assert!(fiber.flags.is_empty());
    assert!(fiber.lanes.is_empty());
    assert!(fiber.alternate.is_none());
    assert!(fiber.memoized_props.is_none());
}
