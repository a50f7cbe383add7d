use super::{Hook, HookEffectFlags, HookUpdate, RenderCx};
use crate::context::ContextStack;
use crate::element::Props;
use crate::fiber::{FiberFlags, FiberId, FiberMode};
use crate::lane::Lanes;
use crate::reconciler::UpdateBoard;
use crate::test_support::test_rig;
use smallvec::smallvec;
use std::cell::RefCell;
use std::rc::Rc;

struct HookRig {
    fiber: FiberId,
    context: ContextStack,
    board: Rc<RefCell<UpdateBoard>>,
}

impl HookRig {
    fn new() -> HookRig {
        let (mut reconciler, _root) = test_rig();
        let fiber = reconciler.fibers.create_fiber_from_element(
            &crate::element::Element::host("f", Props::default()),
            FiberMode::CONCURRENT,
        );
        HookRig {
            fiber,
            context: ContextStack::default(),
            board: Rc::new(RefCell::new(UpdateBoard::default())),
        }
    }

    fn render_cx(&self, hooks_prev: Vec<Hook>, is_mount: bool, lanes: Lanes) -> RenderCx<'_> {
        RenderCx::new(
            self.fiber,
            lanes,
            hooks_prev,
            is_mount,
            &self.context,
            self.board.clone(),
        )
    }
}

#[test]
fn use_state_returns_initial_value_on_mount() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);

    let (value, _set) = cx.use_state(|| 42i64);
    assert_eq!(*value, 42);

    let out = cx.finish(true);
    assert_eq!(out.hooks.len(), 1);
}

#[test]
fn setter_outside_render_stages_on_the_board() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    let (_value, set) = cx.use_state(|| 0i64);
    let _out = cx.finish(true);

    set.set(7);

    let board = rig.board.borrow();
    assert_eq!(board.hook_updates.len(), 1);
    assert!(!board.did_schedule_render_phase_update);
}

#[test]
fn setter_during_own_render_is_a_render_phase_update() {
    let rig = HookRig::new();
    rig.board.borrow_mut().rendering_fiber = Some(rig.fiber);
    rig.board.borrow_mut().render_lanes = Lanes::DEFAULT;

    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    let (_value, set) = cx.use_state(|| 0i64);
    set.set(1);
    let out = cx.finish(true);

    assert!(rig.board.borrow().did_schedule_render_phase_update);
    // The action went straight to the hook's pending ring.
    match &out.hooks[0] {
        Hook::State(state) => assert_eq!(state.queue.borrow().pending.len(), 1),
        _ => panic!("expected a state hook"),
    }
}

fn queue_action(hooks: &[Hook], index: usize, lane: Lanes, updater: impl Fn(&i64) -> i64 + 'static) {
    let Hook::State(state) = &hooks[index] else {
        panic!("expected a state hook");
    };
    // Same shape a SetState::update dispatch produces.
    let action: Rc<dyn std::any::Any> = Rc::new(super::StateAction::Update::<i64>(Box::new(updater)));
    state
        .queue
        .borrow_mut()
        .pending
        .push_back(HookUpdate { lane, action });
}

#[test]
fn state_updates_apply_on_the_next_render() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    let (_value, _set) = cx.use_state(|| 1i64);
    let out = cx.finish(true);

    queue_action(&out.hooks, 0, Lanes::DEFAULT, |x| x + 10);

    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    let (value, _set) = cx.use_state(|| 1i64);
    assert_eq!(*value, 11);
}

#[test]
fn hook_rebase_matches_in_order_application() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    cx.use_state(|| 0i64);
    let out = cx.finish(true);

    queue_action(&out.hooks, 0, Lanes::TRANSITION_0, |x| x * 3 + 1);
    queue_action(&out.hooks, 0, Lanes::SYNC, |x| x * 3 + 2);

    // Pass 1: sync only. The transition action is skipped, the sync action
    // applies, and the skipped lane is reported.
    let mut cx = rig.render_cx(out.hooks, false, Lanes::SYNC);
    let (value, _set) = cx.use_state(|| 0i64);
    assert_eq!(*value, 2);
    let out = cx.finish(true);
    assert_eq!(out.skipped_lanes, Lanes::TRANSITION_0);

    // Pass 2: both lanes. The rebase replays on top of the pinned base.
    let mut cx = rig.render_cx(out.hooks, false, Lanes::SYNC | Lanes::TRANSITION_0);
    let (value, _set) = cx.use_state(|| 0i64);
    assert_eq!(*value, (0 * 3 + 1) * 3 + 2);
}

#[derive(Clone, Copy)]
enum CounterAction {
    Add(i64),
    Scale(i64),
}

fn counter_reducer(state: &i64, action: &CounterAction) -> i64 {
    match action {
        CounterAction::Add(n) => state + n,
        CounterAction::Scale(n) => state * n,
    }
}

fn queue_raw_action<A: 'static>(hooks: &[Hook], index: usize, lane: Lanes, action: A) {
    let Hook::State(state) = &hooks[index] else {
        panic!("expected a state hook");
    };
    state.queue.borrow_mut().pending.push_back(HookUpdate {
        lane,
        action: Rc::new(action),
    });
}

#[test]
fn use_reducer_folds_actions_with_the_callers_reducer() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    let (value, dispatch) = cx.use_reducer(|| 1i64, counter_reducer);
    assert_eq!(*value, 1);
    let out = cx.finish(true);

    // Outside a render the action stages on the board.
    dispatch.dispatch(CounterAction::Add(4));
    assert_eq!(rig.board.borrow().hook_updates.len(), 1);
    assert!(!rig.board.borrow().did_schedule_render_phase_update);

    // Splice it onto the queue the way the reconciler does, then re-render.
    let request = rig.board.borrow_mut().hook_updates.pop().expect("staged");
    request.queue.borrow_mut().pending.push_back(HookUpdate {
        lane: Lanes::DEFAULT,
        action: request.action,
    });
    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    let (value, _dispatch) = cx.use_reducer(|| 1i64, counter_reducer);
    assert_eq!(*value, 5);
}

#[test]
fn reducer_dispatch_during_own_render_is_a_render_phase_update() {
    let rig = HookRig::new();
    rig.board.borrow_mut().rendering_fiber = Some(rig.fiber);
    rig.board.borrow_mut().render_lanes = Lanes::DEFAULT;

    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    let (_value, dispatch) = cx.use_reducer(|| 0i64, counter_reducer);
    dispatch.dispatch(CounterAction::Add(1));
    let out = cx.finish(true);

    assert!(rig.board.borrow().did_schedule_render_phase_update);
    match &out.hooks[0] {
        Hook::State(state) => assert_eq!(state.queue.borrow().pending.len(), 1),
        _ => panic!("expected a state hook"),
    }
}

#[test]
fn reducer_rebase_matches_in_order_application() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    cx.use_reducer(|| 1i64, counter_reducer);
    let out = cx.finish(true);

    queue_raw_action(&out.hooks, 0, Lanes::TRANSITION_0, CounterAction::Add(1));
    queue_raw_action(&out.hooks, 0, Lanes::SYNC, CounterAction::Scale(3));

    // Pass 1: sync only. The transition action is skipped and the scale
    // applies to the pinned base.
    let mut cx = rig.render_cx(out.hooks, false, Lanes::SYNC);
    let (value, _dispatch) = cx.use_reducer(|| 1i64, counter_reducer);
    assert_eq!(*value, 3);
    let out = cx.finish(true);
    assert_eq!(out.skipped_lanes, Lanes::TRANSITION_0);

    // Pass 2: both lanes. Add replays first, then the rebased Scale; only
    // in-order application produces (1 + 1) * 3.
    let mut cx = rig.render_cx(out.hooks, false, Lanes::SYNC | Lanes::TRANSITION_0);
    let (value, _dispatch) = cx.use_reducer(|| 1i64, counter_reducer);
    assert_eq!(*value, 6);
}

#[test]
fn use_effect_fires_on_mount_and_when_deps_change() {
    let rig = HookRig::new();

    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    cx.use_effect(Some(smallvec![1i64.into()]), || None);
    let out = cx.finish(true);
    assert!(out.fiber_flags.contains(FiberFlags::PASSIVE));
    match &out.hooks[0] {
        Hook::Effect(effect) => assert!(effect.flags.contains(HookEffectFlags::HAS_EFFECT)),
        _ => panic!("expected an effect hook"),
    }

    // Same deps: armed but not firing.
    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    cx.use_effect(Some(smallvec![1i64.into()]), || None);
    let out = cx.finish(true);
    assert!(!out.fiber_flags.contains(FiberFlags::PASSIVE));
    match &out.hooks[0] {
        Hook::Effect(effect) => assert!(!effect.flags.contains(HookEffectFlags::HAS_EFFECT)),
        _ => panic!("expected an effect hook"),
    }

    // Changed deps: fires again.
    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    cx.use_effect(Some(smallvec![2i64.into()]), || None);
    let out = cx.finish(true);
    assert!(out.fiber_flags.contains(FiberFlags::PASSIVE));
}

#[test]
fn use_effect_without_deps_always_fires() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    cx.use_effect(None, || None);
    let out = cx.finish(true);

    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    cx.use_effect(None, || None);
    let out = cx.finish(true);
    match &out.hooks[0] {
        Hook::Effect(effect) => assert!(effect.flags.contains(HookEffectFlags::HAS_EFFECT)),
        _ => panic!("expected an effect hook"),
    }
}

#[test]
fn layout_effects_mark_the_update_flag() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    cx.use_layout_effect(None, || None);
    let out = cx.finish(true);
    assert!(out.fiber_flags.contains(FiberFlags::UPDATE));
    assert!(out.fiber_flags.contains(FiberFlags::LAYOUT_STATIC));
}

#[test]
fn use_memo_recomputes_only_when_deps_change() {
    let rig = HookRig::new();
    let calls = Rc::new(RefCell::new(0));

    let count = calls.clone();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    let value = cx.use_memo(Some(smallvec![1i64.into()]), move || {
        *count.borrow_mut() += 1;
        99i64
    });
    assert_eq!(*value, 99);
    let out = cx.finish(true);

    let count = calls.clone();
    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    let value = cx.use_memo(Some(smallvec![1i64.into()]), move || {
        *count.borrow_mut() += 1;
        100i64
    });
    assert_eq!(*value, 99, "cached value survives when deps match");
    let out = cx.finish(true);
    assert_eq!(*calls.borrow(), 1);

    let count = calls.clone();
    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    let value = cx.use_memo(Some(smallvec![2i64.into()]), move || {
        *count.borrow_mut() += 1;
        100i64
    });
    assert_eq!(*value, 100);
    assert_eq!(*calls.borrow(), 2);
}

#[test]
fn use_ref_keeps_the_same_cell_across_renders() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    let cell = cx.use_ref(|| 5i64);
    *cell.borrow_mut() = 6;
    let out = cx.finish(true);

    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    let cell = cx.use_ref(|| 5i64);
    assert_eq!(*cell.borrow(), 6, "mutations persist without re-render");
}

#[test]
#[should_panic(expected = "hooks must be called unconditionally")]
fn rendering_fewer_hooks_than_before_panics() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    cx.use_state(|| 0i64);
    cx.use_state(|| 0i64);
    let out = cx.finish(true);

    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    cx.use_state(|| 0i64);
    cx.finish(true);
}

#[test]
#[should_panic(expected = "more hooks")]
fn rendering_more_hooks_than_before_panics() {
    let rig = HookRig::new();
    let mut cx = rig.render_cx(Vec::new(), true, Lanes::DEFAULT);
    cx.use_state(|| 0i64);
    let out = cx.finish(true);

    let mut cx = rig.render_cx(out.hooks, false, Lanes::DEFAULT);
    cx.use_state(|| 0i64);
    cx.use_state(|| 0i64);
    cx.finish(true);
}
