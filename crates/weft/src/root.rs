//! Root containers and root-level lane bookkeeping.
//!
//! A `FiberRoot` ties a host container to its committed fiber tree and
//! carries the per-root lane state: what is pending, what is suspended or
//! pinged, what has expired, and which lanes are entangled. Lane selection
//! for the next render happens here.

use crate::element::{Element, Props, Record, Value};
use crate::fiber::{Fiber, FiberId, FiberMode, RootId, StateNode, WorkTag};
use crate::host::{CallbackId, HostConfig, HostScheduler, TimeoutId};
use crate::lane::{Lanes, Millis, LANE_COUNT};
use crate::reconciler::Reconciler;
use crate::thenable::ThrownError;
use crate::update_queue::{Update, UpdateQueue};
use std::rc::Rc;

/// How a root renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootTag {
    /// Time-sliced rendering with lane priorities.
    Concurrent,
    /// Every render is synchronous.
    Legacy,
}

/// Hooks into transition lifecycles, for host-side pending indicators.
pub struct TransitionCallbacks {
    pub on_transition_start: Rc<dyn Fn()>,
    pub on_transition_complete: Rc<dyn Fn()>,
}

/// Per-root configuration supplied at creation.
pub struct RootOptions {
    pub identifier_prefix: Rc<str>,
    /// An error crossed the root without any boundary capturing it.
    pub on_uncaught_error: Rc<dyn Fn(&ThrownError)>,
    /// An error boundary captured and recovered from an error.
    pub on_caught_error: Rc<dyn Fn(&ThrownError)>,
    /// An error surfaced during a concurrent pass but a synchronous retry
    /// rendered cleanly, or the commit absorbed a host failure.
    pub on_recoverable_error: Rc<dyn Fn(&ThrownError)>,
    pub transition_callbacks: Option<Rc<TransitionCallbacks>>,
}

impl Default for RootOptions {
    fn default() -> Self {
        RootOptions {
            identifier_prefix: "".into(),
            on_uncaught_error: Rc::new(|error| {
                log::error!("uncaught error crossed the root: {error:#}");
            }),
            on_caught_error: Rc::new(|error| {
                log::debug!("error captured by a boundary: {error:#}");
            }),
            on_recoverable_error: Rc::new(|error| {
                log::debug!("recovered from error: {error:#}");
            }),
            transition_callbacks: None,
        }
    }
}

/// The per-tree container record.
pub struct FiberRoot<H: HostConfig> {
    pub container: H::Container,
    /// Root fiber of the committed tree.
    pub current: FiberId,

    pub pending_lanes: Lanes,
    pub suspended_lanes: Lanes,
    pub pinged_lanes: Lanes,
    pub expired_lanes: Lanes,
    pub entangled_lanes: Lanes,
    pub entanglements: [Lanes; LANE_COUNT],
    pub expiration_times: [Option<Millis>; LANE_COUNT],

    pub callback_node: Option<CallbackId>,
    /// Lane priority of the outstanding callback; empty means none.
    pub callback_priority: Lanes,
    /// Fallback timer armed while the root sits suspended on data.
    pub timeout_handle: Option<TimeoutId>,

    pub identifier_prefix: Rc<str>,
    pub on_uncaught_error: Rc<dyn Fn(&ThrownError)>,
    pub on_caught_error: Rc<dyn Fn(&ThrownError)>,
    pub on_recoverable_error: Rc<dyn Fn(&ThrownError)>,
    pub transition_callbacks: Option<Rc<TransitionCallbacks>>,

    /// Intrusive link in the scheduled-root list.
    pub next_scheduled: Option<RootId>,
}

impl<H: HostConfig> FiberRoot<H> {
    /// The lane set the next render of this root should work on.
    ///
    /// Expired lanes are always included. Among the rest, the most urgent
    /// non-suspended class wins; a suspended class is only considered once
    /// pinged. If a render is already in flight at `wip_lanes` and the new
    /// selection is not more urgent, the in-flight set is kept so the
    /// current pass is not thrown away.
    pub fn get_next_lanes(&self, wip_lanes: Lanes) -> Lanes {
        let pending = self.pending_lanes;
        if pending.is_empty() && self.expired_lanes.is_empty() {
            return Lanes::empty();
        }

        let mut next = Lanes::empty();
        let suspended = self.suspended_lanes;
        let pinged = self.pinged_lanes;

        let non_idle = pending & Lanes::NON_IDLE_MASK;
        if !non_idle.is_empty() {
            let unblocked = non_idle & !suspended;
            if !unblocked.is_empty() {
                next = unblocked.highest_priority_class();
            } else {
                let woken = non_idle & pinged;
                if !woken.is_empty() {
                    next = woken.highest_priority_class();
                }
            }
        } else {
            let unblocked = pending & !suspended;
            if !unblocked.is_empty() {
                next = unblocked.highest_priority_class();
            } else {
                let woken = pending & pinged;
                if !woken.is_empty() {
                    next = woken.highest_priority_class();
                }
            }
        }

        next |= self.expired_lanes;
        if next.is_empty() {
            return Lanes::empty();
        }

        if !wip_lanes.is_empty() && wip_lanes != next {
            let next_lane = next.highest_priority_lane();
            let wip_lane = wip_lanes.highest_priority_lane();
            // Higher bit position means lower urgency; only preempt the
            // in-flight render for strictly more urgent work.
            if next_lane.bits() >= wip_lane.bits() {
                return wip_lanes;
            }
        }

        // Entangled lanes ride along with whatever pulled them in.
        let mut entangled = self.entangled_lanes & next;
        while !entangled.is_empty() {
            let lane = entangled.highest_priority_lane();
            entangled.remove(lane);
            next |= self.entanglements[lane.index()];
        }

        next
    }

    /// Stamp expiration times for newly pending lanes and promote lanes
    /// whose deadline has passed.
    pub fn mark_starved_lanes_as_expired(&mut self, now: Millis) {
        let lanes = self.pending_lanes & !Lanes::RETRY_MASK;
        for lane in lanes.iter_lanes() {
            let index = lane.index();
            match self.expiration_times[index] {
                None => {
                    let stalled = lane.intersects(self.suspended_lanes)
                        && !lane.intersects(self.pinged_lanes);
                    if !stalled {
                        if let Some(budget) = lane.expiration_budget() {
                            self.expiration_times[index] = Some(now + budget);
                        }
                    }
                }
                Some(deadline) => {
                    if deadline <= now {
                        log::debug!("lane {:?} starved past {}ms; expiring", lane, deadline);
                        self.expired_lanes |= lane;
                    }
                }
            }
        }
    }

    /// Expand `render_lanes` with everything entangled into it.
    pub fn get_entangled_lanes(&self, render_lanes: Lanes) -> Lanes {
        let mut lanes = render_lanes;
        let mut entangled = self.entangled_lanes & lanes;
        while !entangled.is_empty() {
            let lane = entangled.highest_priority_lane();
            entangled.remove(lane);
            lanes |= self.entanglements[lane.index()];
        }
        lanes
    }

    pub fn includes_expired_lane(&self, lanes: Lanes) -> bool {
        self.expired_lanes.intersects(lanes)
    }

    /// Park `lanes` until new data pings them or fresh updates arrive.
    pub fn mark_suspended(&mut self, lanes: Lanes) {
        let suspended = lanes & !self.pinged_lanes;
        self.suspended_lanes |= suspended;
        self.pinged_lanes &= !suspended;
    }

    /// Settle the books after a commit: `remaining` is everything still
    /// pending below the root.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending_lanes & !remaining;

        let had_transitions = self.pending_lanes.intersects(Lanes::TRANSITION_MASK);
        self.pending_lanes = remaining;
        self.suspended_lanes = Lanes::empty();
        self.pinged_lanes = Lanes::empty();
        self.expired_lanes &= remaining;

        for lane in no_longer_pending.iter_lanes() {
            let index = lane.index();
            self.expiration_times[index] = None;
            self.entanglements[index] = Lanes::empty();
            self.entangled_lanes.remove(lane);
        }

        if had_transitions && !remaining.intersects(Lanes::TRANSITION_MASK) {
            if let Some(callbacks) = &self.transition_callbacks {
                (callbacks.on_transition_complete)();
            }
        }
    }
}

impl<H: HostConfig> Reconciler<H> {
    /// Create a root for `container` and return its handle. The tree is
    /// empty until the first [`Reconciler::update_container`].
    pub fn create_container(
        &mut self,
        container: H::Container,
        tag: RootTag,
        options: RootOptions,
    ) -> RootId {
        let mode = match tag {
            RootTag::Concurrent => FiberMode::CONCURRENT,
            RootTag::Legacy => FiberMode::empty(),
        };

        let mut root_fiber = Fiber::new(WorkTag::HostRoot, Props::default(), None, mode);
        let initial_state = Record::new().with("element", Value::Null);
        root_fiber.memoized_state = Some(initial_state.clone());
        root_fiber.update_queue = Some(UpdateQueue::new(initial_state));
        let root_fiber_id = self.fibers.insert(root_fiber);

        let root_id = self.roots.insert(FiberRoot {
            container,
            current: root_fiber_id,
            pending_lanes: Lanes::empty(),
            suspended_lanes: Lanes::empty(),
            pinged_lanes: Lanes::empty(),
            expired_lanes: Lanes::empty(),
            entangled_lanes: Lanes::empty(),
            entanglements: [Lanes::empty(); LANE_COUNT],
            expiration_times: [None; LANE_COUNT],
            callback_node: None,
            callback_priority: Lanes::empty(),
            timeout_handle: None,
            identifier_prefix: options.identifier_prefix,
            on_uncaught_error: options.on_uncaught_error,
            on_caught_error: options.on_caught_error,
            on_recoverable_error: options.on_recoverable_error,
            transition_callbacks: options.transition_callbacks,
            next_scheduled: None,
        });
        self.fibers[root_fiber_id].state_node = StateNode::Root(root_id);

        log::debug!("created container root {:?}", root_id);
        root_id
    }

    /// Render `element` into `root`. Computes the request lane from the
    /// priority channel, queues the update on the root fiber, and schedules
    /// the root. Returns the lane the update rides on.
    pub fn update_container(
        &mut self,
        element: Element,
        root_id: RootId,
        callback: Option<Rc<dyn Fn()>>,
    ) -> Lanes {
        self.drain_board();

        let lane = self.request_update_lane();
        let root_fiber = self.roots[root_id].current;
        let update = Update {
            lane,
            tag: crate::update_queue::UpdateTag::UpdateState,
            payload: Some(crate::update_queue::UpdatePayload::Partial(
                Record::new().with("element", Value::Element(element)),
            )),
            callback,
        };
        log::trace!("update_container on {:?} at {:?}", root_id, lane);

        if let Some(owner) = self.enqueue_update(root_fiber, update, lane) {
            self.schedule_update_on_fiber(owner, lane);
        }
        lane
    }

    /// Tear down a root: render nothing, flush synchronously, then free the
    /// root record and its fibers.
    pub fn unmount_container(&mut self, root_id: RootId) {
        self.drain_board();

        let root_fiber = self.roots[root_id].current;
        let update = Update {
            lane: Lanes::SYNC,
            tag: crate::update_queue::UpdateTag::UpdateState,
            payload: Some(crate::update_queue::UpdatePayload::Partial(
                Record::new().with("element", Value::Null),
            )),
            callback: None,
        };
        if let Some(owner) = self.enqueue_update(root_fiber, update, Lanes::SYNC) {
            self.schedule_update_on_fiber(owner, Lanes::SYNC);
        }
        self.flush_sync_work();
        self.flush_passive_effects();

        self.remove_root_from_schedule(root_id);
        let root = self.roots.remove(root_id).expect("root already removed");
        if let Some(handle) = root.callback_node {
            self.host.scheduler().cancel_callback(handle);
        }
        if let Some(handle) = root.timeout_handle {
            self.host.scheduler().cancel_timeout(handle);
        }
        self.fibers.release_subtree(root.current);
        log::debug!("tore down container root {:?}", root_id);
    }
}
