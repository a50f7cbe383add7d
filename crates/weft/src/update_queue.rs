//! Per-fiber queues of pending state mutations.
//!
//! Class-like fibers and the host root accumulate updates on a shared
//! pending ring and fold them into state during render. A render at a
//! limited lane set may skip low-priority updates; skipped updates stay on
//! the base list together with rebased clones of everything applied after
//! them, so a later render at the skipped lanes reproduces exactly the state
//! that applying every update in original order would have produced.

use crate::element::{Props, Record};
use crate::fiber::{FiberFlags, FiberId, RootId, StateNode, WorkTag};
use crate::hooks::{HookQueue, HookUpdate};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::reconciler::Reconciler;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// How an update combines with previous state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateTag {
    /// Shallow-merge a partial record into the state.
    UpdateState,
    /// Replace the state wholesale.
    ReplaceState,
    /// Recompute without changing state.
    ForceUpdate,
    /// Merge state derived from a captured throw; flips the capture flags.
    CaptureUpdate,
}

/// The data carried by an update: a literal partial, or a function of the
/// previous state and next props.
#[derive(Clone)]
pub enum UpdatePayload {
    Partial(Record),
    Compute(Rc<dyn Fn(&Record, &Props) -> Option<Record>>),
}

impl UpdatePayload {
    fn eval(&self, prev_state: &Record, next_props: &Props) -> Option<Record> {
        match self {
            UpdatePayload::Partial(partial) => Some(partial.clone()),
            UpdatePayload::Compute(compute) => compute(prev_state, next_props),
        }
    }
}

/// A single pending state mutation.
#[derive(Clone)]
pub struct Update {
    pub lane: Lanes,
    pub tag: UpdateTag,
    pub payload: Option<UpdatePayload>,
    pub callback: Option<Rc<dyn Fn()>>,
}

impl Update {
    pub fn new(lane: Lanes, payload: Record) -> Update {
        Update {
            lane,
            tag: UpdateTag::UpdateState,
            payload: Some(UpdatePayload::Partial(payload)),
            callback: None,
        }
    }
}

/// The producer side of a queue. Shared between the two alternates of a
/// fiber so an enqueue lands once no matter which buffer renders next.
#[derive(Default)]
pub struct SharedPending {
    pub pending: VecDeque<Update>,
}

/// The per-fiber update queue.
#[derive(Clone)]
pub struct UpdateQueue {
    /// State as of the last fully applied prefix of updates.
    pub base_state: Record,
    /// Updates not yet applied at sufficient priority, in order.
    pub base_updates: VecDeque<Update>,
    pub shared: Rc<RefCell<SharedPending>>,
    /// Commit-time callbacks collected while applying updates this render.
    pub callbacks: Vec<Rc<dyn Fn()>>,
}

impl UpdateQueue {
    pub fn new(base_state: Record) -> UpdateQueue {
        UpdateQueue {
            base_state,
            base_updates: VecDeque::new(),
            shared: Rc::new(RefCell::new(SharedPending::default())),
            callbacks: Vec::new(),
        }
    }
}

/// An update staged by a producer but not yet spliced into its queue's
/// pending ring. Staging keeps the enqueue path free of structural work, so
/// it is safe to run while a render is paused mid-tree.
pub enum ConcurrentUpdate {
    Class {
        fiber: FiberId,
        update: Update,
    },
    Hook {
        queue: Rc<RefCell<HookQueue>>,
        update: HookUpdate,
    },
}

const NESTED_UPDATE_LIMIT: u32 = 50;

impl<H: HostConfig> Reconciler<H> {
    /// Queue `update` on `fiber` at `lane`. Returns the root the fiber
    /// belongs to, or `None` if the fiber was already unmounted (the update
    /// is silently dropped).
    pub(crate) fn enqueue_update(
        &mut self,
        fiber: FiberId,
        update: Update,
        lane: Lanes,
    ) -> Option<RootId> {
        self.throw_if_infinite_update_loop();

        if self.fibers[fiber].update_queue.is_none() {
            log::debug!("update dropped: fiber {:?} has no queue (unmounted)", fiber);
            return None;
        }

        if self.is_rendering() {
            // Render-phase update on a class-like fiber: splice straight
            // into the pending ring so the in-flight pass observes it.
            let shared = self.fibers[fiber]
                .update_queue
                .as_ref()
                .map(|queue| queue.shared.clone())
                .expect("checked above");
            shared.borrow_mut().pending.push_back(update);
            return self.root_of(fiber);
        }

        self.concurrent_queues
            .push(ConcurrentUpdate::Class { fiber, update });
        self.concurrently_updated_lanes |= lane;
        self.mark_update_lane_from_fiber_to_root(fiber, lane)
    }

    /// Merge `lane` into the target fiber and every ancestor's child lane
    /// summary, on both buffers, and resolve the owning root.
    pub(crate) fn mark_update_lane_from_fiber_to_root(
        &mut self,
        fiber: FiberId,
        lane: Lanes,
    ) -> Option<RootId> {
        {
            let node = &mut self.fibers[fiber];
            node.lanes |= lane;
            let alternate = node.alternate;
            if let Some(alternate) = alternate {
                self.fibers[alternate].lanes |= lane;
            }
        }

        let mut node = fiber;
        loop {
            let parent = self.fibers[node].parent;
            match parent {
                Some(parent_id) => {
                    let parent = &mut self.fibers[parent_id];
                    parent.child_lanes |= lane;
                    let alternate = parent.alternate;
                    if let Some(alternate) = alternate {
                        self.fibers[alternate].child_lanes |= lane;
                    }
                    node = parent_id;
                }
                None => break,
            }
        }

        let top = &self.fibers[node];
        if top.tag == WorkTag::HostRoot {
            match top.state_node {
                StateNode::Root(root) => Some(root),
                _ => None,
            }
        } else {
            None
        }
    }

    /// Resolve the root above `fiber` without touching lanes.
    pub(crate) fn root_of(&self, fiber: FiberId) -> Option<RootId> {
        let mut node = fiber;
        loop {
            match self.fibers[node].parent {
                Some(parent) => node = parent,
                None => break,
            }
        }
        let top = &self.fibers[node];
        if top.tag == WorkTag::HostRoot {
            match top.state_node {
                StateNode::Root(root) => Some(root),
                _ => None,
            }
        } else {
            None
        }
    }

    /// Splice every staged producer-side update into its queue's pending
    /// ring. Runs at render entry, before a commit, and never concurrently
    /// with either.
    pub(crate) fn finish_queueing_concurrent_updates(&mut self) {
        self.concurrently_updated_lanes = Lanes::empty();
        for staged in std::mem::take(&mut self.concurrent_queues) {
            match staged {
                ConcurrentUpdate::Class { fiber, update } => {
                    let Some(queue) = self
                        .fibers
                        .get(fiber)
                        .and_then(|fiber| fiber.update_queue.as_ref())
                    else {
                        continue;
                    };
                    queue.shared.borrow_mut().pending.push_back(update);
                }
                ConcurrentUpdate::Hook { queue, update } => {
                    queue.borrow_mut().pending.push_back(update);
                }
            }
        }
    }

    /// Fold the pending and base updates of `wip` into a new memoized
    /// state, observing `render_lanes`.
    pub(crate) fn process_update_queue(
        &mut self,
        wip: FiberId,
        next_props: &Props,
        render_lanes: Lanes,
    ) {
        self.has_force_update = false;

        let instance = self.fibers[wip].class_instance();
        let shared = self.fibers[wip]
            .update_queue
            .as_ref()
            .expect("process_update_queue on a fiber without a queue")
            .shared
            .clone();

        // Working list: the carried-over base list, then whatever the
        // pending ring holds. The spliced pending updates are appended to
        // the other buffer's base list too, so abandoning this
        // work-in-progress cannot lose them.
        let mut work: VecDeque<Update> = {
            let queue = self.fibers[wip].update_queue.as_mut().expect("checked above");
            std::mem::take(&mut queue.base_updates)
        };
        let base_state = self.fibers[wip]
            .update_queue
            .as_ref()
            .expect("checked above")
            .base_state
            .clone();

        let mut new_state = base_state;
        let mut new_base_state: Option<Record> = None;
        let mut new_base_updates: VecDeque<Update> = VecDeque::new();
        let mut new_lanes = Lanes::empty();
        let mut flags = FiberFlags::empty();
        let mut flags_to_clear = FiberFlags::empty();
        let mut collected_callbacks: Vec<Rc<dyn Fn()>> = Vec::new();

        loop {
            let pending: Vec<Update> = shared.borrow_mut().pending.drain(..).collect();
            if !pending.is_empty() {
                let alternate = self.fibers[wip].alternate;
                if let Some(alternate) = alternate {
                    if let Some(queue) = self.fibers[alternate].update_queue.as_mut() {
                        queue.base_updates.extend(pending.iter().cloned());
                    }
                }
                work.extend(pending);
            }
            let Some(update) = work.pop_front() else {
                // Re-check the ring once more: a payload function may have
                // enqueued while we were applying.
                if shared.borrow().pending.is_empty() {
                    break;
                }
                continue;
            };

            let update_lane = update.lane & !Lanes::OFFSCREEN;
            let is_hidden = update_lane != update.lane;
            let relevant = if is_hidden {
                self.wip_root_render_lanes
            } else {
                render_lanes
            };

            if !update_lane.is_subset_of(relevant) {
                // Not enough priority this pass. Keep it, and pin the base
                // state at the first skip so later applied updates rebase on
                // top of it next time.
                if new_base_state.is_none() {
                    new_base_state = Some(new_state.clone());
                }
                new_lanes |= update_lane;
                new_base_updates.push_back(update);
                continue;
            }

            if new_base_state.is_some() {
                // Applied after a skip: clone onto the base list with no
                // lane so the rebase replays it unconditionally. Its
                // callback already fires this commit and must not refire.
                new_base_updates.push_back(Update {
                    lane: Lanes::empty(),
                    tag: update.tag,
                    payload: update.payload.clone(),
                    callback: None,
                });
            }

            match update.tag {
                UpdateTag::UpdateState => {
                    if let Some(payload) = &update.payload {
                        if let Some(partial) = payload.eval(&new_state, next_props) {
                            new_state.merge_from(&partial);
                        }
                    }
                }
                UpdateTag::ReplaceState => {
                    new_state = update
                        .payload
                        .as_ref()
                        .and_then(|payload| payload.eval(&new_state, next_props))
                        .unwrap_or_default();
                }
                UpdateTag::CaptureUpdate => {
                    flags_to_clear |= FiberFlags::SHOULD_CAPTURE;
                    flags |= FiberFlags::DID_CAPTURE;
                    if let Some(payload) = &update.payload {
                        if let Some(partial) = payload.eval(&new_state, next_props) {
                            new_state.merge_from(&partial);
                        }
                    }
                }
                UpdateTag::ForceUpdate => {
                    self.has_force_update = true;
                }
            }

            if let Some(callback) = update.callback {
                flags |= FiberFlags::CALLBACK;
                if is_hidden {
                    flags |= FiberFlags::VISIBILITY;
                }
                collected_callbacks.push(callback);
            }
        }

        {
            let fiber = &mut self.fibers[wip];
            let queue = fiber.update_queue.as_mut().expect("checked by caller");
            queue.base_state = new_base_state.unwrap_or_else(|| new_state.clone());
            queue.base_updates = new_base_updates;
            queue.callbacks.extend(collected_callbacks);
            fiber.lanes = new_lanes;
            fiber.memoized_state = Some(new_state.clone());
            fiber.flags.remove(flags_to_clear);
            fiber.flags.insert(flags);
        }
        if let Some(instance) = instance {
            instance.borrow_mut().state = new_state;
        }

        self.mark_skipped_update_lanes(new_lanes);
    }

    pub(crate) fn mark_skipped_update_lanes(&mut self, lanes: Lanes) {
        self.wip_root_skipped_lanes |= lanes;
    }

    pub(crate) fn throw_if_infinite_update_loop(&mut self) {
        if self.nested_update_count > NESTED_UPDATE_LIMIT {
            self.nested_update_count = 0;
            self.root_with_nested_updates = None;
            panic!(
                "maximum update depth exceeded: a component repeatedly schedules \
                 synchronous updates from within an update"
            );
        }
    }
}
