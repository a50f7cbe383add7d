//! The reconciler context: every piece of cross-cutting state, packaged.
//!
//! The work loop, root scheduler, and commit driver all operate on one
//! `Reconciler` value that owns the fiber arena, the root registry, the
//! in-progress render state, and the priority channel. Nothing here is a
//! process global; two reconcilers in one process are fully isolated.
//!
//! Producers that live outside the call tree (state setters held by user
//! code, thenable resolution callbacks) cannot borrow the reconciler, so
//! they stage their work on a shared [`UpdateBoard`]; every entry point
//! drains the board before doing anything else.

use crate::context::ContextStack;
use crate::fiber::{FiberArena, FiberId, RootId};
use crate::hooks::{EffectDestroy, HookQueue, HookUpdate};
use crate::host::{HostConfig, Task};
use crate::lane::Lanes;
use crate::root::FiberRoot;
use crate::thenable::{Thrown, ThrownError};
use crate::update_queue::ConcurrentUpdate;
use bitflags::bitflags;
use slotmap::SlotMap;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

bitflags! {
    /// Where in its own machinery the reconciler currently is.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ExecutionContext: u8 {
        const BATCHED = 1 << 0;
        const RENDER = 1 << 1;
        const COMMIT = 1 << 2;
    }
}

/// How a render pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootExitStatus {
    InProgress,
    FatalErrored,
    Errored,
    Suspended,
    SuspendedWithDelay,
    SuspendedAtTheShell,
    Completed,
}

/// Why the work loop is paused, if it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendedReason {
    NotSuspended,
    SuspendedOnError,
    SuspendedOnData,
    SuspendedOnAction,
    SuspendedOnImmediate,
    SuspendedOnInstance,
    SuspendedOnInstanceAndReadyToContinue,
    SuspendedAndReadyToContinue,
    SuspendedOnDeprecatedThrowPromise,
    SuspendedOnHydration,
}

impl SuspendedReason {
    /// Reasons where the paused unit can be replayed once data arrives.
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            SuspendedReason::SuspendedOnData
                | SuspendedReason::SuspendedOnAction
                | SuspendedReason::SuspendedOnDeprecatedThrowPromise
        )
    }
}

/// A suspended root being woken by a settled thenable.
pub(crate) struct Ping {
    pub root: RootId,
    pub lanes: Lanes,
    /// Boundary to re-mark so its subtree renders again, when known.
    pub fiber: Option<FiberId>,
}

/// A state-hook action dispatched from outside a render.
pub(crate) struct HookUpdateRequest {
    pub fiber: FiberId,
    pub queue: Rc<RefCell<HookQueue>>,
    pub action: Rc<dyn Any>,
}

/// Staging area shared with setters and ping callbacks via `Rc`.
#[derive(Default)]
pub struct UpdateBoard {
    pub(crate) pings: Vec<Ping>,
    pub(crate) hook_updates: Vec<HookUpdateRequest>,
    /// Set while a component body runs, for render-phase update detection.
    pub(crate) rendering_fiber: Option<FiberId>,
    pub(crate) render_lanes: Lanes,
    pub(crate) did_schedule_render_phase_update: bool,
}

/// The core reconciler. Owns every fiber of every root it manages and all
/// scheduling state.
pub struct Reconciler<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) fibers: FiberArena<H>,
    pub(crate) roots: SlotMap<RootId, FiberRoot<H>>,

    // === Root scheduler ===
    pub(crate) first_scheduled_root: Option<RootId>,
    pub(crate) last_scheduled_root: Option<RootId>,
    pub(crate) did_schedule_microtask: bool,
    pub(crate) might_have_pending_sync_work: bool,
    pub(crate) is_flushing_work: bool,

    // === Priority channel ===
    pub(crate) execution_context: ExecutionContext,
    pub(crate) current_update_priority: Lanes,
    pub(crate) current_event_transition_lane: Lanes,
    pub(crate) in_transition: bool,
    pub(crate) next_transition_lane: Lanes,
    pub(crate) next_retry_lane: Lanes,

    // === In-progress render ===
    pub(crate) wip_root: Option<RootId>,
    pub(crate) wip: Option<FiberId>,
    pub(crate) wip_root_render_lanes: Lanes,
    pub(crate) entangled_render_lanes: Lanes,
    pub(crate) wip_root_exit_status: RootExitStatus,
    pub(crate) wip_suspended_reason: SuspendedReason,
    pub(crate) wip_thrown_value: Option<Thrown>,
    pub(crate) wip_root_skipped_lanes: Lanes,
    pub(crate) wip_root_concurrent_errors: Vec<ThrownError>,
    pub(crate) wip_root_recoverable_errors: Vec<ThrownError>,
    pub(crate) wip_root_did_attach_ping_listener: bool,
    pub(crate) did_receive_update: bool,
    pub(crate) has_force_update: bool,
    /// Fibers allocated by this render pass. Claimed by the commit, freed
    /// if the pass is abandoned, so an interrupted render cannot leak
    /// arena slots.
    pub(crate) wip_created_fibers: Vec<FiberId>,
    pub(crate) context_stack: ContextStack,
    pub(crate) host_context_stack: Vec<H::HostContext>,
    pub(crate) root_container: Option<H::Container>,

    // === Producer staging ===
    pub(crate) concurrent_queues: Vec<ConcurrentUpdate>,
    pub(crate) concurrently_updated_lanes: Lanes,
    pub(crate) board: Rc<RefCell<UpdateBoard>>,

    // === Passive effects ===
    pub(crate) root_with_pending_passive_effects: Option<RootId>,
    pub(crate) pending_passive_unmounts: Vec<EffectDestroy>,

    // === Update loop guard ===
    pub(crate) nested_update_count: u32,
    pub(crate) root_with_nested_updates: Option<RootId>,
}

impl<H: HostConfig> Reconciler<H> {
    pub fn new(host: H) -> Reconciler<H> {
        Reconciler {
            host,
            fibers: FiberArena::default(),
            roots: SlotMap::with_key(),
            first_scheduled_root: None,
            last_scheduled_root: None,
            did_schedule_microtask: false,
            might_have_pending_sync_work: false,
            is_flushing_work: false,
            execution_context: ExecutionContext::empty(),
            current_update_priority: Lanes::empty(),
            current_event_transition_lane: Lanes::empty(),
            in_transition: false,
            next_transition_lane: Lanes::TRANSITION_0,
            next_retry_lane: Lanes::RETRY_0,
            wip_root: None,
            wip: None,
            wip_root_render_lanes: Lanes::empty(),
            entangled_render_lanes: Lanes::empty(),
            wip_root_exit_status: RootExitStatus::InProgress,
            wip_suspended_reason: SuspendedReason::NotSuspended,
            wip_thrown_value: None,
            wip_root_skipped_lanes: Lanes::empty(),
            wip_root_concurrent_errors: Vec::new(),
            wip_root_recoverable_errors: Vec::new(),
            wip_root_did_attach_ping_listener: false,
            did_receive_update: false,
            has_force_update: false,
            wip_created_fibers: Vec::new(),
            context_stack: ContextStack::default(),
            host_context_stack: Vec::new(),
            root_container: None,
            concurrent_queues: Vec::new(),
            concurrently_updated_lanes: Lanes::empty(),
            board: Rc::new(RefCell::new(UpdateBoard::default())),
            root_with_pending_passive_effects: None,
            pending_passive_unmounts: Vec::new(),
            nested_update_count: 0,
            root_with_nested_updates: None,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Read access to a root's record (lane state, configuration).
    pub fn root(&self, root_id: RootId) -> Option<&crate::root::FiberRoot<H>> {
        self.roots.get(root_id)
    }

    pub(crate) fn is_rendering(&self) -> bool {
        self.execution_context.contains(ExecutionContext::RENDER)
    }

    pub(crate) fn is_working(&self) -> bool {
        self.execution_context
            .intersects(ExecutionContext::RENDER | ExecutionContext::COMMIT)
    }

    /// Entry point for the host scheduler: run a task it decided is due.
    pub fn run_task(&mut self, task: Task) {
        self.drain_board();
        match task {
            Task::ProcessRootSchedule => self.process_root_schedule(),
            Task::PerformWorkOnRoot { root } => self.perform_work_on_root_via_scheduler_task(root),
            Task::FlushPassiveEffects => {
                self.flush_passive_effects();
            }
            Task::CommitFallback { root } => self.force_fallback_commit(root),
        }
    }

    /// Absorb work staged by out-of-band producers (setters, pings). Safe
    /// to call at any time from the embedder.
    pub fn flush_pending_updates(&mut self) {
        self.drain_board();
    }

    pub(crate) fn drain_board(&mut self) {
        loop {
            let (pings, hook_updates) = {
                let mut board = self.board.borrow_mut();
                (
                    std::mem::take(&mut board.pings),
                    std::mem::take(&mut board.hook_updates),
                )
            };
            if pings.is_empty() && hook_updates.is_empty() {
                return;
            }
            for ping in pings {
                self.ping_root(ping);
            }
            for request in hook_updates {
                self.dispatch_hook_update(request);
            }
        }
    }

    fn ping_root(&mut self, ping: Ping) {
        let Some(root) = self.roots.get_mut(ping.root) else {
            return;
        };
        let woken = root.suspended_lanes & ping.lanes;
        root.pinged_lanes |= woken;
        log::debug!("root {:?} pinged at {:?}", ping.root, ping.lanes);

        if self.wip_root == Some(ping.root)
            && self.wip_suspended_reason.is_resumable()
            && self.wip_root_render_lanes.intersects(ping.lanes)
        {
            self.wip_suspended_reason = SuspendedReason::SuspendedAndReadyToContinue;
        }

        if let Some(fiber) = ping.fiber {
            // A boundary retry: schedule fresh work on the boundary at the
            // ping's (retry) lanes.
            if self.fibers.contains(fiber) {
                self.roots[ping.root].pending_lanes |= ping.lanes;
                self.mark_update_lane_from_fiber_to_root(fiber, ping.lanes);
            }
        }
        self.ensure_root_is_scheduled(ping.root);
    }

    fn dispatch_hook_update(&mut self, request: HookUpdateRequest) {
        if !self.fibers.contains(request.fiber) {
            // Setter outlived its component; drop silently.
            return;
        }
        let lane = self.request_update_lane();
        request.queue.borrow_mut().lanes |= lane;
        self.concurrent_queues.push(ConcurrentUpdate::Hook {
            queue: request.queue,
            update: HookUpdate {
                lane,
                action: request.action,
            },
        });
        self.concurrently_updated_lanes |= lane;
        if let Some(root) = self.mark_update_lane_from_fiber_to_root(request.fiber, lane) {
            self.schedule_update_on_fiber(root, lane);
        }
    }

    /// The lane a new update should ride on, from the priority channel.
    pub fn request_update_lane(&mut self) -> Lanes {
        if self.is_rendering() && !self.wip_root_render_lanes.is_empty() {
            // Render-phase updates join the render they interrupt.
            return self.wip_root_render_lanes.highest_priority_lane();
        }
        if self.in_transition {
            return self.request_transition_lane();
        }
        if !self.current_update_priority.is_empty() {
            return self.current_update_priority;
        }
        Lanes::DEFAULT
    }

    fn request_transition_lane(&mut self) -> Lanes {
        if self.current_event_transition_lane.is_empty() {
            // All transitions scheduled inside one event share a lane.
            self.current_event_transition_lane = self.claim_next_transition_lane();
        }
        self.current_event_transition_lane
    }

    fn claim_next_transition_lane(&mut self) -> Lanes {
        let lane = self.next_transition_lane;
        let shifted = Lanes::from_bits_retain(lane.bits() << 1);
        self.next_transition_lane = if shifted.intersects(Lanes::TRANSITION_MASK) {
            shifted
        } else {
            Lanes::TRANSITION_0
        };
        lane
    }

    pub(crate) fn claim_retry_lane(&mut self) -> Lanes {
        let lane = self.next_retry_lane;
        let shifted = Lanes::from_bits_retain(lane.bits() << 1);
        self.next_retry_lane = if shifted.intersects(Lanes::RETRY_MASK) {
            shifted
        } else {
            Lanes::RETRY_0
        };
        lane
    }

    /// Record a new update's lane on the root and make sure a callback is
    /// on its way.
    pub(crate) fn schedule_update_on_fiber(&mut self, root_id: RootId, lane: Lanes) {
        let root = &mut self.roots[root_id];
        let previous_transitions = root.pending_lanes & Lanes::TRANSITION_MASK;
        root.pending_lanes |= lane;
        // Fresh work can unblock a suspended tree; reconsider everything.
        if lane != Lanes::IDLE {
            root.suspended_lanes = Lanes::empty();
            root.pinged_lanes = Lanes::empty();
        }

        if lane.intersects(Lanes::TRANSITION_MASK) {
            if previous_transitions.is_empty() {
                if let Some(callbacks) = root.transition_callbacks.clone() {
                    (callbacks.on_transition_start)();
                }
            }
            // Re-using a transition lane that never finished: entangle so
            // the older transition cannot commit without the newer state.
            let other_transitions = previous_transitions & !lane;
            if !other_transitions.is_empty() {
                self.mark_root_entangled(root_id, lane | other_transitions);
            }
        }

        self.ensure_root_is_scheduled(root_id);
    }

    pub(crate) fn mark_root_entangled(&mut self, root_id: RootId, entangled: Lanes) {
        let root = &mut self.roots[root_id];
        root.entangled_lanes |= entangled;
        for lane in entangled.iter_lanes() {
            root.entanglements[lane.index()] |= entangled;
        }
    }

    // === Context-setting wrappers ===

    /// Run `f` with updates treated as discrete (highest priority) input.
    pub fn discrete_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.current_update_priority;
        self.current_update_priority = Lanes::SYNC;
        let result = f(self);
        self.current_update_priority = previous;
        result
    }

    /// Run `f` with updates coalesced into a single scheduling pass.
    pub fn batched_updates<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous = self.execution_context;
        self.execution_context |= ExecutionContext::BATCHED;
        let result = f(self);
        self.execution_context = previous;
        result
    }

    /// Run `f` at discrete priority, then flush all resulting sync work
    /// before returning.
    pub fn flush_sync<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let previous_context = self.execution_context;
        let previous_priority = self.current_update_priority;
        self.execution_context |= ExecutionContext::BATCHED;
        self.current_update_priority = Lanes::SYNC;
        let result = f(self);
        self.current_update_priority = previous_priority;
        self.execution_context = previous_context;
        if !self.is_working() {
            self.drain_board();
            self.flush_sync_work_across_roots();
        }
        result
    }

    /// Flush any pending synchronous work without scheduling anything new.
    pub fn flush_sync_work(&mut self) {
        if !self.is_working() {
            self.drain_board();
            self.flush_sync_work_across_roots();
        }
    }

    /// Mark updates scheduled inside `f` as transitions.
    pub fn start_transition(&mut self, f: impl FnOnce(&mut Self)) {
        let previous = self.in_transition;
        self.in_transition = true;
        f(self);
        self.in_transition = previous;
    }

    /// Set the priority lane the host's event dispatcher is currently
    /// delivering at. Read by [`Reconciler::request_update_lane`].
    pub fn set_current_update_priority(&mut self, lane: Lanes) {
        self.current_update_priority = lane;
    }

    pub fn current_update_priority(&self) -> Lanes {
        self.current_update_priority
    }

    /// A suspended root's fallback timer fired; force the suspended lanes
    /// through the synchronous path so the fallback commits.
    fn force_fallback_commit(&mut self, root_id: RootId) {
        let Some(root) = self.roots.get_mut(root_id) else {
            return;
        };
        root.timeout_handle = None;
        let stalled = root.suspended_lanes & !root.pinged_lanes;
        if stalled.is_empty() {
            return;
        }
        log::debug!(
            "root {:?} stalled on data at {:?}; forcing fallback",
            root_id,
            stalled
        );
        root.expired_lanes |= stalled;
        root.pinged_lanes |= stalled;
        self.ensure_root_is_scheduled(root_id);
    }
}

#[cfg(test)]
mod tests;
