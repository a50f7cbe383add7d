//! Hooks: per-fiber state cells for function components.
//!
//! Hook state lives on the fiber in call order, so a component must call
//! its hooks unconditionally and in the same order every render. The render
//! context is passed to the component body explicitly; there is no ambient
//! current-component global.
//!
//! State hooks carry the same skip/rebase queue discipline as the class
//! update queue: a render at a limited lane set leaves low-priority actions
//! on a base queue together with rebased clones of later-applied actions.

use crate::context::{Context, ContextDependency, ContextStack};
use crate::fiber::{FiberFlags, FiberId};
use crate::lane::Lanes;
use crate::reconciler::{HookUpdateRequest, UpdateBoard};
use bitflags::bitflags;
use smallvec::SmallVec;
use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// A dependency slot for effect and memo gating.
#[derive(Clone)]
pub enum DepValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    /// Compared by allocation identity.
    Any(Rc<dyn Any>),
}

impl PartialEq for DepValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DepValue::Bool(a), DepValue::Bool(b)) => a == b,
            (DepValue::Int(a), DepValue::Int(b)) => a == b,
            (DepValue::Float(a), DepValue::Float(b)) => a == b,
            (DepValue::Str(a), DepValue::Str(b)) => a == b,
            (DepValue::Any(a), DepValue::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for DepValue {
    fn from(value: bool) -> Self {
        DepValue::Bool(value)
    }
}

impl From<i64> for DepValue {
    fn from(value: i64) -> Self {
        DepValue::Int(value)
    }
}

impl From<&str> for DepValue {
    fn from(value: &str) -> Self {
        DepValue::Str(value.into())
    }
}

/// An effect/memo dependency list. `None` means "no list": rerun every
/// render.
pub type Deps = Option<SmallVec<[DepValue; 4]>>;

fn deps_equal(prev: &Deps, next: &Deps) -> bool {
    match (prev, next) {
        (Some(prev), Some(next)) => prev.len() == next.len() && prev == next,
        _ => false,
    }
}

/// One queued state action. The action value is interpreted by the hook's
/// reducer.
#[derive(Clone)]
pub struct HookUpdate {
    pub lane: Lanes,
    pub action: Rc<dyn Any>,
}

/// Reduces previous state and an action to next state.
pub type Reducer = Rc<dyn Fn(&Rc<dyn Any>, &Rc<dyn Any>) -> Rc<dyn Any>>;

/// Producer side of a state hook, shared by both buffers and by setters
/// held in user code.
pub struct HookQueue {
    pub pending: VecDeque<HookUpdate>,
    pub lanes: Lanes,
    pub reducer: Reducer,
}

/// A state cell with its rebase bookkeeping.
#[derive(Clone)]
pub struct StateHook {
    pub memoized: Rc<dyn Any>,
    pub base_state: Rc<dyn Any>,
    pub base_queue: VecDeque<HookUpdate>,
    pub queue: Rc<RefCell<HookQueue>>,
}

bitflags! {
    /// When an effect hook fires.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HookEffectFlags: u8 {
        /// Deps changed (or mounted): fire this commit.
        const HAS_EFFECT = 1 << 0;
        /// Fires in the layout phase, synchronously after mutation.
        const LAYOUT = 1 << 1;
        /// Fires after paint, from a separately scheduled task.
        const PASSIVE = 1 << 2;
    }
}

/// Closure slot for an effect body; taken when the effect fires.
pub type EffectCreate = Rc<RefCell<Option<Box<dyn FnOnce() -> Option<Box<dyn FnOnce()>>>>>>;
/// Cleanup returned by the last firing, shared across buffers.
pub type EffectDestroy = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

#[derive(Clone)]
pub struct EffectHook {
    pub flags: HookEffectFlags,
    pub create: EffectCreate,
    pub destroy: EffectDestroy,
    pub deps: Deps,
}

#[derive(Clone)]
pub struct MemoHook {
    pub deps: Deps,
    pub value: Rc<dyn Any>,
}

#[derive(Clone)]
pub struct RefHook {
    pub cell: Rc<dyn Any>,
}

/// One hook cell on a fiber.
#[derive(Clone)]
pub enum Hook {
    State(StateHook),
    Effect(EffectHook),
    Memo(MemoHook),
    Ref(RefHook),
    Context,
}

/// Setter half of [`RenderCx::use_state`]. Clonable and callable from
/// anywhere; calls from outside a render are staged on the update board and
/// drained at the reconciler's next entry point.
pub struct SetState<T> {
    fiber: FiberId,
    queue: Rc<RefCell<HookQueue>>,
    board: Rc<RefCell<UpdateBoard>>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Clone for SetState<T> {
    fn clone(&self) -> Self {
        SetState {
            fiber: self.fiber,
            queue: self.queue.clone(),
            board: self.board.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

enum StateAction<T> {
    Set(Rc<T>),
    Update(Box<dyn Fn(&T) -> T>),
}

impl<T: 'static> SetState<T> {
    pub fn set(&self, value: T) {
        self.dispatch(StateAction::Set(Rc::new(value)));
    }

    pub fn update(&self, updater: impl Fn(&T) -> T + 'static) {
        self.dispatch(StateAction::Update(Box::new(updater)));
    }

    fn dispatch(&self, action: StateAction<T>) {
        queue_hook_action(self.fiber, &self.queue, &self.board, Rc::new(action));
    }
}

/// Dispatcher half of [`RenderCx::use_reducer`]. Clonable and callable
/// from anywhere, with the same staging rules as [`SetState`].
pub struct Dispatch<A> {
    fiber: FiberId,
    queue: Rc<RefCell<HookQueue>>,
    board: Rc<RefCell<UpdateBoard>>,
    _marker: std::marker::PhantomData<fn(A)>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Dispatch {
            fiber: self.fiber,
            queue: self.queue.clone(),
            board: self.board.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<A: 'static> Dispatch<A> {
    pub fn dispatch(&self, action: A) {
        queue_hook_action(self.fiber, &self.queue, &self.board, Rc::new(action));
    }
}

/// Route an action to its hook: straight onto the pending ring when the
/// owning fiber is the one currently rendering, staged on the board
/// otherwise.
fn queue_hook_action(
    fiber: FiberId,
    queue: &Rc<RefCell<HookQueue>>,
    board: &Rc<RefCell<UpdateBoard>>,
    action: Rc<dyn Any>,
) {
    let mut board = board.borrow_mut();
    if board.rendering_fiber == Some(fiber) {
        // Render-phase update on the fiber being rendered: visible to
        // this very render, which loops until the queue settles.
        let lane = board.render_lanes;
        queue
            .borrow_mut()
            .pending
            .push_back(HookUpdate { lane, action });
        board.did_schedule_render_phase_update = true;
    } else {
        board.hook_updates.push(HookUpdateRequest {
            fiber,
            queue: queue.clone(),
            action,
        });
    }
}

fn basic_state_reducer<T: 'static>() -> Reducer {
    Rc::new(|prev, action| {
        let prev = prev
            .clone()
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("state hook value changed type between renders"));
        let action = action
            .downcast_ref::<StateAction<T>>()
            .expect("state action for a different value type");
        match action {
            StateAction::Set(value) => value.clone() as Rc<dyn Any>,
            StateAction::Update(updater) => Rc::new(updater(&prev)) as Rc<dyn Any>,
        }
    })
}

/// Adapt a caller-supplied typed reducer to the dynamically typed queue.
fn typed_reducer<S: 'static, A: 'static>(reduce: impl Fn(&S, &A) -> S + 'static) -> Reducer {
    Rc::new(move |prev, action| {
        let prev = prev
            .clone()
            .downcast::<S>()
            .unwrap_or_else(|_| panic!("reducer hook state changed type between renders"));
        let action = action
            .downcast_ref::<A>()
            .expect("dispatched action for a different reducer");
        Rc::new(reduce(&prev, action)) as Rc<dyn Any>
    })
}

/// Everything a function component body renders with.
///
/// Created by the reconciler per attempt; collects the next hook list, the
/// context dependencies, and the effect flags to install on the fiber.
pub struct RenderCx<'a> {
    fiber: FiberId,
    render_lanes: Lanes,
    is_mount: bool,
    hooks_prev: Vec<Hook>,
    hooks_next: Vec<Hook>,
    cursor: usize,
    context: &'a ContextStack,
    context_deps: Vec<ContextDependency>,
    board: Rc<RefCell<UpdateBoard>>,
    fiber_flags: FiberFlags,
    skipped_lanes: Lanes,
    state_changed: bool,
    drained: Vec<(usize, Vec<HookUpdate>)>,
}

/// What a completed render attempt leaves behind.
pub(crate) struct RenderCxOutput {
    pub hooks: Vec<Hook>,
    pub context_deps: Vec<ContextDependency>,
    pub fiber_flags: FiberFlags,
    pub skipped_lanes: Lanes,
    /// Whether any state hook produced a different value than last render.
    pub state_changed: bool,
    /// Updates moved off each hook's pending ring this attempt, by hook
    /// index. The caller mirrors them onto the committed buffer's hook so a
    /// discarded attempt cannot lose them.
    pub drained: Vec<(usize, Vec<HookUpdate>)>,
}

impl<'a> RenderCx<'a> {
    pub(crate) fn new(
        fiber: FiberId,
        render_lanes: Lanes,
        hooks_prev: Vec<Hook>,
        is_mount: bool,
        context: &'a ContextStack,
        board: Rc<RefCell<UpdateBoard>>,
    ) -> RenderCx<'a> {
        RenderCx {
            fiber,
            render_lanes,
            is_mount,
            hooks_prev,
            hooks_next: Vec::new(),
            cursor: 0,
            context,
            context_deps: Vec::new(),
            board,
            fiber_flags: FiberFlags::empty(),
            skipped_lanes: Lanes::empty(),
            state_changed: false,
            drained: Vec::new(),
        }
    }

    /// `completed` is false when the body threw; a partial hook walk is
    /// expected then and the order check is skipped.
    pub(crate) fn finish(self, completed: bool) -> RenderCxOutput {
        if completed && !self.is_mount && self.cursor != self.hooks_prev.len() {
            panic!(
                "rendered {} hooks but the previous render had {}; hooks must be \
                 called unconditionally and in a stable order",
                self.cursor,
                self.hooks_prev.len()
            );
        }
        RenderCxOutput {
            hooks: self.hooks_next,
            context_deps: self.context_deps,
            fiber_flags: self.fiber_flags,
            skipped_lanes: self.skipped_lanes,
            state_changed: self.state_changed,
            drained: self.drained,
        }
    }

    fn next_prev_hook(&mut self) -> Option<Hook> {
        if self.is_mount {
            return None;
        }
        let hook = self.hooks_prev.get(self.cursor).cloned();
        if hook.is_none() {
            panic!("rendered more hooks than during the previous render");
        }
        hook
    }

    /// Local state with an explicit setter.
    pub fn use_state<T: 'static>(&mut self, init: impl FnOnce() -> T) -> (Rc<T>, SetState<T>) {
        let prev = self.next_prev_hook();
        let hook = match prev {
            None => {
                let value: Rc<dyn Any> = Rc::new(init());
                StateHook {
                    memoized: value.clone(),
                    base_state: value,
                    base_queue: VecDeque::new(),
                    queue: Rc::new(RefCell::new(HookQueue {
                        pending: VecDeque::new(),
                        lanes: Lanes::empty(),
                        reducer: basic_state_reducer::<T>(),
                    })),
                }
            }
            Some(Hook::State(prev)) => self.reduce_state_hook(prev),
            Some(_) => panic!("hook order changed: expected a state hook"),
        };

        let value = hook
            .memoized
            .clone()
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("state hook value changed type between renders"));
        let setter = SetState {
            fiber: self.fiber,
            queue: hook.queue.clone(),
            board: self.board.clone(),
            _marker: std::marker::PhantomData,
        };
        self.hooks_next.push(Hook::State(hook));
        self.cursor += 1;
        (value, setter)
    }

    /// Reducer-driven state: dispatched actions are folded into the next
    /// state by `reduce`, under the same lane-aware queue discipline as
    /// [`RenderCx::use_state`].
    pub fn use_reducer<S: 'static, A: 'static>(
        &mut self,
        init: impl FnOnce() -> S,
        reduce: impl Fn(&S, &A) -> S + 'static,
    ) -> (Rc<S>, Dispatch<A>) {
        let prev = self.next_prev_hook();
        let hook = match prev {
            None => {
                let value: Rc<dyn Any> = Rc::new(init());
                StateHook {
                    memoized: value.clone(),
                    base_state: value,
                    base_queue: VecDeque::new(),
                    queue: Rc::new(RefCell::new(HookQueue {
                        pending: VecDeque::new(),
                        lanes: Lanes::empty(),
                        reducer: typed_reducer(reduce),
                    })),
                }
            }
            Some(Hook::State(prev)) => {
                // The freshest closure wins: the stored reducer may close
                // over values from an earlier render.
                prev.queue.borrow_mut().reducer = typed_reducer(reduce);
                self.reduce_state_hook(prev)
            }
            Some(_) => panic!("hook order changed: expected a reducer hook"),
        };

        let value = hook
            .memoized
            .clone()
            .downcast::<S>()
            .unwrap_or_else(|_| panic!("reducer hook state changed type between renders"));
        let dispatch = Dispatch {
            fiber: self.fiber,
            queue: hook.queue.clone(),
            board: self.board.clone(),
            _marker: std::marker::PhantomData,
        };
        self.hooks_next.push(Hook::State(hook));
        self.cursor += 1;
        (value, dispatch)
    }

    fn reduce_state_hook(&mut self, prev: StateHook) -> StateHook {
        let StateHook {
            base_state,
            mut base_queue,
            queue,
            memoized,
        } = prev;

        {
            let mut shared = queue.borrow_mut();
            let drained: Vec<HookUpdate> = shared.pending.drain(..).collect();
            if !drained.is_empty() {
                self.drained.push((self.cursor, drained.clone()));
                base_queue.extend(drained);
            }
        }
        if base_queue.is_empty() {
            return StateHook {
                memoized,
                base_state,
                base_queue,
                queue,
            };
        }

        let reducer = queue.borrow().reducer.clone();
        let mut new_state = base_state;
        let mut pinned_base: Option<Rc<dyn Any>> = None;
        let mut new_base_queue: VecDeque<HookUpdate> = VecDeque::new();
        let mut remaining_lanes = Lanes::empty();

        for update in base_queue {
            if !update.lane.is_subset_of(self.render_lanes) {
                if pinned_base.is_none() {
                    pinned_base = Some(new_state.clone());
                }
                remaining_lanes |= update.lane;
                new_base_queue.push_back(update);
                continue;
            }
            if pinned_base.is_some() {
                new_base_queue.push_back(HookUpdate {
                    lane: Lanes::empty(),
                    action: update.action.clone(),
                });
            }
            new_state = reducer(&new_state, &update.action);
        }

        queue.borrow_mut().lanes = remaining_lanes;
        self.skipped_lanes |= remaining_lanes;
        if !Rc::ptr_eq(&new_state, &memoized) {
            self.state_changed = true;
        }

        StateHook {
            memoized: new_state.clone(),
            base_state: pinned_base.unwrap_or(new_state),
            base_queue: new_base_queue,
            queue,
        }
    }

    /// A post-paint effect, rerun when `deps` change.
    pub fn use_effect(
        &mut self,
        deps: Deps,
        create: impl FnOnce() -> Option<Box<dyn FnOnce()>> + 'static,
    ) {
        self.push_effect(HookEffectFlags::PASSIVE, deps, Box::new(create));
    }

    /// An effect fired synchronously in the layout phase.
    pub fn use_layout_effect(
        &mut self,
        deps: Deps,
        create: impl FnOnce() -> Option<Box<dyn FnOnce()>> + 'static,
    ) {
        self.push_effect(HookEffectFlags::LAYOUT, deps, Box::new(create));
    }

    fn push_effect(
        &mut self,
        phase: HookEffectFlags,
        deps: Deps,
        create: Box<dyn FnOnce() -> Option<Box<dyn FnOnce()>>>,
    ) {
        let prev = self.next_prev_hook();
        let (should_fire, destroy) = match prev {
            None => (true, Rc::new(RefCell::new(None))),
            Some(Hook::Effect(prev)) => (!deps_equal(&prev.deps, &deps), prev.destroy),
            Some(_) => panic!("hook order changed: expected an effect hook"),
        };

        let mut flags = phase;
        if should_fire {
            flags |= HookEffectFlags::HAS_EFFECT;
            if phase.contains(HookEffectFlags::PASSIVE) {
                self.fiber_flags |= FiberFlags::PASSIVE | FiberFlags::PASSIVE_STATIC;
            } else {
                self.fiber_flags |= FiberFlags::UPDATE | FiberFlags::LAYOUT_STATIC;
            }
        }

        self.hooks_next.push(Hook::Effect(EffectHook {
            flags,
            create: Rc::new(RefCell::new(Some(create))),
            destroy,
            deps,
        }));
        self.cursor += 1;
    }

    /// A value recomputed only when `deps` change.
    pub fn use_memo<T: 'static>(&mut self, deps: Deps, compute: impl FnOnce() -> T) -> Rc<T> {
        let prev = self.next_prev_hook();
        let hook = match prev {
            Some(Hook::Memo(prev)) if deps_equal(&prev.deps, &deps) => prev,
            Some(Hook::Memo(_)) | None => MemoHook {
                deps,
                value: Rc::new(compute()) as Rc<dyn Any>,
            },
            Some(_) => panic!("hook order changed: expected a memo hook"),
        };
        let value = hook
            .value
            .clone()
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("memo hook value changed type between renders"));
        self.hooks_next.push(Hook::Memo(hook));
        self.cursor += 1;
        value
    }

    /// A mutable cell that survives renders without scheduling work.
    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        let prev = self.next_prev_hook();
        let hook = match prev {
            Some(Hook::Ref(prev)) => prev,
            None => RefHook {
                cell: Rc::new(RefCell::new(init())) as Rc<dyn Any>,
            },
            Some(_) => panic!("hook order changed: expected a ref hook"),
        };
        let cell = hook
            .cell
            .clone()
            .downcast::<RefCell<T>>()
            .unwrap_or_else(|_| panic!("ref hook value changed type between renders"));
        self.hooks_next.push(Hook::Ref(hook));
        self.cursor += 1;
        cell
    }

    /// Read a context value and subscribe this fiber to its changes.
    pub fn use_context(&mut self, context: &Context) -> Rc<dyn Any> {
        let prev = self.next_prev_hook();
        match prev {
            None | Some(Hook::Context) => {}
            Some(_) => panic!("hook order changed: expected a context hook"),
        }
        self.context_deps.push(ContextDependency {
            context: context.clone(),
        });
        self.hooks_next.push(Hook::Context);
        self.cursor += 1;
        self.context.current(context)
    }
}

#[cfg(test)]
mod tests;
