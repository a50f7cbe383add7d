//! The work loop: cooperative, interruptible tree traversal.
//!
//! A render pass walks the work-in-progress tree depth first, beginning
//! each fiber on the way down and completing it on the way up. The
//! concurrent flavor checks the host's yield signal between units; the
//! synchronous flavor runs to completion. Suspension and unwinding happen
//! only between units, never inside one.
//!
//! Cancellation is implicit. A pass belongs to a (root, lanes) pair; any
//! caller that arrives with a different pair prepares a fresh stack and the
//! abandoned work-in-progress simply stops being referenced.

use crate::fiber::{FiberFlags, FiberId, RootId};
use crate::host::{HostConfig, HostScheduler, Task};
use crate::lane::{Lanes, Millis};
use crate::reconciler::{ExecutionContext, Reconciler, RootExitStatus, SuspendedReason};
use crate::thenable::{Thenable, ThenableStatus, Thrown};
use crate::update_queue::{Update, UpdatePayload, UpdateTag};
use crate::element::{ElementKind, Record, Value};
use crate::fiber::WorkTag;
use std::rc::Rc;

/// Slice budget when the host has no yield signal of its own.
const FRAME_BUDGET_NON_IDLE: Millis = 25;
const FRAME_BUDGET_IDLE: Millis = 5;

/// How long a delayed fallback may wait for data before it is forced.
const SUSPENSE_FALLBACK_TIMEOUT: Millis = 500;

impl<H: HostConfig> Reconciler<H> {
    /// Render `root` at `lanes` and commit if a tree is finished. The
    /// single entry point for both scheduler callbacks and the sync flush.
    pub(crate) fn perform_work_on_root(&mut self, root_id: RootId, lanes: Lanes, force_sync: bool) {
        if self.is_working() {
            panic!("should not already be working: render or commit entered reentrantly");
        }

        let concurrent_root = self.fibers[self.roots[root_id].current]
            .mode
            .contains(crate::fiber::FiberMode::CONCURRENT);
        let should_time_slice = !force_sync
            && concurrent_root
            && !lanes.includes_blocking_lane()
            && !self.roots[root_id].includes_expired_lane(lanes);

        log::debug!(
            "render root {:?} lanes {:?} ({})",
            root_id,
            lanes,
            if should_time_slice { "sliced" } else { "sync" }
        );

        let mut exit = if should_time_slice {
            self.render_root_concurrent(root_id, lanes)
        } else {
            self.render_root_sync(root_id, lanes)
        };
        let mut commit_lanes = lanes;

        if exit == RootExitStatus::InProgress {
            // Yielded; either the scheduler calls back or a ping revives us.
            return;
        }

        if exit == RootExitStatus::Errored {
            // An error surfaced during a time-sliced pass. It may have been
            // transient tearing; replay everything synchronously once so
            // side effects land deterministically.
            let retry_lanes = self.roots[root_id].pending_lanes & !Lanes::OFFSCREEN;
            if !retry_lanes.is_empty() {
                exit = self.recover_from_concurrent_error(root_id, retry_lanes);
                commit_lanes = retry_lanes;
            }
        }

        match exit {
            RootExitStatus::FatalErrored => {
                log::error!("render of {:?} failed fatally", root_id);
                self.reset_wip_stack();
                self.roots[root_id].mark_suspended(commit_lanes);
                self.ensure_root_is_scheduled(root_id);
            }
            RootExitStatus::SuspendedAtTheShell => {
                if !self.wip_root_did_attach_ping_listener {
                    // Nothing registered to wake this root; only a fresh
                    // update can revive it.
                    log::warn!("root {:?} suspended at the shell with no ping listener", root_id);
                }
                self.reset_wip_stack();
                self.roots[root_id].mark_suspended(commit_lanes);
                self.ensure_root_is_scheduled(root_id);
            }
            RootExitStatus::SuspendedWithDelay => {
                // Transition renders never show a fallback eagerly; park
                // the lanes and arm the forced-fallback timer.
                self.reset_wip_stack();
                self.roots[root_id].mark_suspended(commit_lanes);
                if self.roots[root_id].timeout_handle.is_none() {
                    let handle = self.host.scheduler().schedule_timeout(
                        SUSPENSE_FALLBACK_TIMEOUT,
                        Task::CommitFallback { root: root_id },
                    );
                    self.roots[root_id].timeout_handle = Some(handle);
                }
                self.ensure_root_is_scheduled(root_id);
            }
            RootExitStatus::Suspended | RootExitStatus::Completed => {
                let finished = self.fibers[self.roots[root_id].current]
                    .alternate
                    .expect("completed render without a finished tree");
                self.commit_root(root_id, finished, commit_lanes);
            }
            RootExitStatus::Errored => {
                // Sync retry failed too and nothing was pending anymore.
                self.reset_wip_stack();
                self.ensure_root_is_scheduled(root_id);
            }
            RootExitStatus::InProgress => unreachable!("handled above"),
        }
    }

    /// Reset all render-pass state and build a fresh work-in-progress root.
    pub(crate) fn prepare_fresh_stack(&mut self, root_id: RootId, lanes: Lanes) {
        if let Some(handle) = self.roots[root_id].timeout_handle.take() {
            self.host.scheduler().cancel_timeout(handle);
        }

        self.reset_wip_stack();

        self.wip_root = Some(root_id);
        let root_fiber = self.roots[root_id].current;
        let pending_props = self.fibers[root_fiber].pending_props.clone();
        let wip = self.fibers.create_work_in_progress(root_fiber, pending_props);
        self.wip = Some(wip);
        self.wip_root_render_lanes = lanes;
        self.wip_root_exit_status = RootExitStatus::InProgress;
        self.entangled_render_lanes = self.roots[root_id].get_entangled_lanes(lanes);

        // Producer-side updates staged before this render become visible
        // on their queues now.
        self.finish_queueing_concurrent_updates();
        log::trace!("fresh stack for {:?} at {:?}", root_id, lanes);
    }

    pub(crate) fn reset_wip_stack(&mut self) {
        // Fibers allocated by an abandoned pass are garbage; fibers from a
        // committed pass were claimed by the commit already.
        for id in std::mem::take(&mut self.wip_created_fibers) {
            if self.fibers.contains(id) {
                self.fibers.release_pair(id);
            }
        }
        self.wip_root = None;
        self.wip = None;
        self.wip_root_render_lanes = Lanes::empty();
        self.entangled_render_lanes = Lanes::empty();
        self.wip_root_exit_status = RootExitStatus::InProgress;
        self.wip_suspended_reason = SuspendedReason::NotSuspended;
        self.wip_thrown_value = None;
        self.wip_root_skipped_lanes = Lanes::empty();
        self.wip_root_concurrent_errors.clear();
        self.wip_root_recoverable_errors.clear();
        self.wip_root_did_attach_ping_listener = false;
        self.host_context_stack.clear();
        self.context_stack = crate::context::ContextStack::default();
        self.root_container = None;
    }

    // === Render loops ===

    pub(crate) fn render_root_sync(&mut self, root_id: RootId, lanes: Lanes) -> RootExitStatus {
        let previous_context = self.execution_context;
        self.execution_context |= ExecutionContext::RENDER;

        if self.wip_root != Some(root_id) || self.wip_root_render_lanes != lanes {
            self.prepare_fresh_stack(root_id, lanes);
        } else {
            self.finish_queueing_concurrent_updates();
        }

        loop {
            if self.wip_suspended_reason != SuspendedReason::NotSuspended {
                self.handle_suspension_sync();
            }
            if self.wip.is_none() {
                break;
            }
            self.work_loop_sync();
            if self.wip.is_none() && self.wip_suspended_reason == SuspendedReason::NotSuspended {
                break;
            }
        }

        self.execution_context = previous_context;
        self.wip_root_exit_status
    }

    pub(crate) fn render_root_concurrent(
        &mut self,
        root_id: RootId,
        lanes: Lanes,
    ) -> RootExitStatus {
        let previous_context = self.execution_context;
        self.execution_context |= ExecutionContext::RENDER;

        if self.wip_root != Some(root_id) || self.wip_root_render_lanes != lanes {
            self.prepare_fresh_stack(root_id, lanes);
        } else {
            self.finish_queueing_concurrent_updates();
        }

        'outer: loop {
            match self.wip_suspended_reason {
                SuspendedReason::NotSuspended => {}
                SuspendedReason::SuspendedOnError => {
                    let unit = self.wip;
                    let thrown = self.wip_thrown_value.take();
                    self.wip_suspended_reason = SuspendedReason::NotSuspended;
                    if let (Some(unit), Some(thrown)) = (unit, thrown) {
                        self.throw_and_unwind_work_loop(unit, thrown, false);
                    }
                }
                SuspendedReason::SuspendedOnData
                | SuspendedReason::SuspendedOnAction
                | SuspendedReason::SuspendedOnDeprecatedThrowPromise => {
                    let thenable = self.suspended_thenable();
                    match thenable.as_ref().map(|thenable| thenable.status()) {
                        Some(ThenableStatus::Pending) => {
                            // Register a wake-up and yield; the unit is
                            // replayed when the data arrives.
                            let thenable = thenable.expect("checked above");
                            self.attach_ping_listener(
                                thenable,
                                root_id,
                                self.wip_root_render_lanes,
                                None,
                            );
                            self.roots[root_id].mark_suspended(self.wip_root_render_lanes);
                            break 'outer;
                        }
                        _ => {
                            // Already settled: replay the suspended unit.
                            self.wip_suspended_reason = SuspendedReason::NotSuspended;
                            self.wip_thrown_value = None;
                            if let Some(unit) = self.wip {
                                self.replay_suspended_unit_of_work(unit);
                            }
                        }
                    }
                }
                SuspendedReason::SuspendedAndReadyToContinue => {
                    let thenable = self.suspended_thenable();
                    match thenable.as_ref().map(|thenable| thenable.status()) {
                        Some(ThenableStatus::Pending) => {
                            // Spurious wake-up; park again.
                            self.wip_suspended_reason = SuspendedReason::SuspendedOnData;
                            self.roots[root_id].mark_suspended(self.wip_root_render_lanes);
                            break 'outer;
                        }
                        _ => {
                            self.wip_suspended_reason = SuspendedReason::NotSuspended;
                            self.wip_thrown_value = None;
                            if let Some(unit) = self.wip {
                                self.replay_suspended_unit_of_work(unit);
                            }
                        }
                    }
                }
                SuspendedReason::SuspendedOnInstance => {
                    // Host resource not ready; start the preload and move
                    // past the instance, revisiting at commit.
                    self.wip_suspended_reason =
                        SuspendedReason::SuspendedOnInstanceAndReadyToContinue;
                    break 'outer;
                }
                SuspendedReason::SuspendedOnInstanceAndReadyToContinue => {
                    self.wip_suspended_reason = SuspendedReason::NotSuspended;
                    self.wip_thrown_value = None;
                    if let Some(unit) = self.wip {
                        let next = self.fibers[unit].sibling;
                        match next {
                            Some(sibling) => self.wip = Some(sibling),
                            None => self.complete_unit_of_work(unit),
                        }
                    }
                }
                SuspendedReason::SuspendedOnImmediate => {
                    // Resolves within a microtask; treat as settled.
                    self.wip_suspended_reason = SuspendedReason::NotSuspended;
                    self.wip_thrown_value = None;
                    if let Some(unit) = self.wip {
                        self.replay_suspended_unit_of_work(unit);
                    }
                }
                SuspendedReason::SuspendedOnHydration => {
                    self.reset_wip_stack();
                    self.wip_root_exit_status = RootExitStatus::SuspendedAtTheShell;
                    break 'outer;
                }
            }

            self.work_loop_concurrent();

            if self.wip_suspended_reason != SuspendedReason::NotSuspended && self.wip.is_some() {
                continue 'outer;
            }
            break 'outer;
        }

        self.execution_context = previous_context;

        if self.wip.is_some() {
            RootExitStatus::InProgress
        } else {
            self.wip_root_exit_status
        }
    }

    fn suspended_thenable(&self) -> Option<Rc<dyn Thenable>> {
        match &self.wip_thrown_value {
            Some(Thrown::Suspend(thenable)) => Some(thenable.clone()),
            _ => None,
        }
    }

    fn handle_suspension_sync(&mut self) {
        let reason = self.wip_suspended_reason;
        let unit = self.wip;
        match reason {
            SuspendedReason::NotSuspended => {}
            SuspendedReason::SuspendedOnData
            | SuspendedReason::SuspendedOnAction
            | SuspendedReason::SuspendedOnImmediate
            | SuspendedReason::SuspendedAndReadyToContinue
            | SuspendedReason::SuspendedOnDeprecatedThrowPromise => {
                let settled = self
                    .suspended_thenable()
                    .map(|thenable| !matches!(thenable.status(), ThenableStatus::Pending))
                    .unwrap_or(false);
                self.wip_suspended_reason = SuspendedReason::NotSuspended;
                if settled {
                    self.wip_thrown_value = None;
                    if let Some(unit) = unit {
                        self.replay_suspended_unit_of_work(unit);
                    }
                } else if let (Some(unit), Some(thrown)) = (unit, self.wip_thrown_value.take()) {
                    // A synchronous pass cannot wait; unwind to the nearest
                    // fallback right away.
                    self.throw_and_unwind_work_loop(unit, thrown, true);
                }
            }
            SuspendedReason::SuspendedOnError => {
                self.wip_suspended_reason = SuspendedReason::NotSuspended;
                if let (Some(unit), Some(thrown)) = (unit, self.wip_thrown_value.take()) {
                    self.throw_and_unwind_work_loop(unit, thrown, true);
                }
            }
            SuspendedReason::SuspendedOnInstance
            | SuspendedReason::SuspendedOnInstanceAndReadyToContinue => {
                self.wip_suspended_reason = SuspendedReason::NotSuspended;
                self.wip_thrown_value = None;
                if let Some(unit) = unit {
                    let next = self.fibers[unit].sibling;
                    match next {
                        Some(sibling) => self.wip = Some(sibling),
                        None => self.complete_unit_of_work(unit),
                    }
                }
            }
            SuspendedReason::SuspendedOnHydration => {
                self.reset_wip_stack();
                self.wip_root_exit_status = RootExitStatus::SuspendedAtTheShell;
            }
        }
    }

    fn work_loop_sync(&mut self) {
        while let Some(unit) = self.wip {
            if self.wip_suspended_reason != SuspendedReason::NotSuspended {
                break;
            }
            self.perform_unit_of_work(unit);
        }
    }

    fn work_loop_concurrent(&mut self) {
        if self.host.scheduler().supports_should_yield() {
            while let Some(unit) = self.wip {
                if self.wip_suspended_reason != SuspendedReason::NotSuspended {
                    break;
                }
                if self.host.scheduler().should_yield() {
                    log::trace!("yielding at {:?}", unit);
                    break;
                }
                self.perform_unit_of_work(unit);
            }
        } else {
            let budget = if self.wip_root_render_lanes.includes_non_idle_work() {
                FRAME_BUDGET_NON_IDLE
            } else {
                FRAME_BUDGET_IDLE
            };
            let yield_after = self.host.scheduler().now() + budget;
            while let Some(unit) = self.wip {
                if self.wip_suspended_reason != SuspendedReason::NotSuspended {
                    break;
                }
                if self.host.scheduler().now() >= yield_after {
                    break;
                }
                self.perform_unit_of_work(unit);
            }
        }
    }

    // === Units ===

    pub(crate) fn perform_unit_of_work(&mut self, unit: FiberId) {
        match self.begin_work(unit) {
            Ok(next) => {
                let pending = self.fibers[unit].pending_props.clone();
                self.fibers[unit].memoized_props = Some(pending);
                match next {
                    Some(child) => self.wip = Some(child),
                    None => self.complete_unit_of_work(unit),
                }
            }
            Err(thrown) => {
                self.wip = Some(unit);
                self.wip_suspended_reason = match &thrown {
                    Thrown::Error(_) => SuspendedReason::SuspendedOnError,
                    Thrown::Suspend(_) => SuspendedReason::SuspendedOnData,
                };
                self.wip_thrown_value = Some(thrown);
            }
        }
    }

    /// Re-run a unit whose dependency has since settled. The begin pass is
    /// re-entered from scratch; nothing of the failed attempt survives.
    pub(crate) fn replay_suspended_unit_of_work(&mut self, unit: FiberId) {
        log::trace!("replaying suspended unit {:?}", unit);
        self.perform_unit_of_work(unit);
    }

    pub(crate) fn complete_unit_of_work(&mut self, start: FiberId) {
        let mut completed = start;
        loop {
            let incomplete = self.fibers[completed]
                .flags
                .contains(FiberFlags::INCOMPLETE);
            let sibling = self.fibers[completed].sibling;
            let parent = self.fibers[completed].parent;

            if incomplete {
                if let Some(boundary) = self.unwind_work(completed) {
                    self.wip = Some(boundary);
                    return;
                }
                match parent {
                    Some(parent_id) => {
                        let parent_fiber = &mut self.fibers[parent_id];
                        parent_fiber.flags |= FiberFlags::INCOMPLETE;
                        parent_fiber.subtree_flags = FiberFlags::empty();
                        parent_fiber.deletions.clear();
                        completed = parent_id;
                        continue;
                    }
                    None => {
                        // Unwound through the root without a handler.
                        if self.wip_root_exit_status == RootExitStatus::InProgress {
                            self.wip_root_exit_status = RootExitStatus::SuspendedAtTheShell;
                        }
                        self.wip = None;
                        return;
                    }
                }
            }

            match self.complete_work(completed) {
                Ok(Some(next)) => {
                    self.wip = Some(next);
                    return;
                }
                Ok(None) => {}
                Err(thrown) => {
                    // Completion itself threw (host failure); route it
                    // through the same suspension machinery.
                    self.wip = Some(completed);
                    self.wip_suspended_reason = match &thrown {
                        Thrown::Error(_) => SuspendedReason::SuspendedOnError,
                        Thrown::Suspend(_) => SuspendedReason::SuspendedOnData,
                    };
                    self.wip_thrown_value = Some(thrown);
                    return;
                }
            }

            if let Some(sibling) = sibling {
                self.wip = Some(sibling);
                return;
            }
            match parent {
                Some(parent_id) => completed = parent_id,
                None => {
                    if self.wip_root_exit_status == RootExitStatus::InProgress {
                        self.wip_root_exit_status = RootExitStatus::Completed;
                    }
                    self.wip = None;
                    return;
                }
            }
        }
    }

    // === Throw handling ===

    /// Route a thrown value to the boundary that will handle it, then
    /// unwind the stack from `unit` up to that boundary.
    pub(crate) fn throw_and_unwind_work_loop(
        &mut self,
        unit: FiberId,
        thrown: Thrown,
        is_sync: bool,
    ) {
        self.handle_throw(unit, &thrown, is_sync);
        self.fibers[unit].flags |= FiberFlags::INCOMPLETE;
        self.complete_unit_of_work(unit);
    }

    fn handle_throw(&mut self, unit: FiberId, thrown: &Thrown, is_sync: bool) {
        let root_id = self.wip_root.expect("throw outside a render pass");
        match thrown {
            Thrown::Suspend(thenable) => {
                let boundary = self.nearest_suspense_boundary(unit);
                match boundary {
                    Some(boundary_id) => {
                        {
                            let boundary = &mut self.fibers[boundary_id];
                            boundary.flags |= FiberFlags::SHOULD_CAPTURE;
                            boundary.retry_queue.push(thenable.clone());
                        }
                        self.attach_ping_listener(
                            thenable.clone(),
                            root_id,
                            self.wip_root_render_lanes,
                            Some(boundary_id),
                        );
                        if self.wip_root_exit_status == RootExitStatus::InProgress {
                            // Transitions prefer waiting over flashing a
                            // fallback, except once their lanes expired and
                            // this render is the forced fallback.
                            let may_delay = self.wip_root_render_lanes.includes_only_transitions()
                                && !self.roots[root_id]
                                    .includes_expired_lane(self.wip_root_render_lanes);
                            self.wip_root_exit_status = if may_delay {
                                RootExitStatus::SuspendedWithDelay
                            } else {
                                RootExitStatus::Suspended
                            };
                        }
                        log::debug!(
                            "unit {:?} suspended; boundary {:?} will show a fallback",
                            unit,
                            boundary_id
                        );
                    }
                    None => {
                        // Nothing to show a fallback in; the whole shell
                        // stays suspended until the data arrives.
                        self.attach_ping_listener(
                            thenable.clone(),
                            root_id,
                            self.wip_root_render_lanes,
                            None,
                        );
                        self.wip_root_exit_status = RootExitStatus::SuspendedAtTheShell;
                    }
                }
            }
            Thrown::Error(error) => {
                if !is_sync {
                    self.wip_root_concurrent_errors.push(error.clone());
                    if self.wip_root_exit_status == RootExitStatus::InProgress {
                        self.wip_root_exit_status = RootExitStatus::Errored;
                    }
                }

                let lane = self.wip_root_render_lanes.highest_priority_lane();
                match self.nearest_error_boundary(unit) {
                    Some(boundary_id) => {
                        let def = match &self.fibers[boundary_id].resolved_type {
                            Some(ElementKind::Class(def)) => def.clone(),
                            _ => unreachable!("error boundaries are class fibers"),
                        };
                        let derived = def
                            .get_derived_state_from_error
                            .as_ref()
                            .map(|derive| derive(error));
                        let on_caught = self.roots[root_id].on_caught_error.clone();
                        let reported = error.clone();
                        let update = Update {
                            lane,
                            tag: UpdateTag::CaptureUpdate,
                            payload: derived.map(UpdatePayload::Partial),
                            callback: Some(Rc::new(move || on_caught(&reported))),
                        };
                        self.enqueue_captured_update(boundary_id, update);
                        self.fibers[boundary_id].flags |= FiberFlags::SHOULD_CAPTURE;
                        log::debug!(
                            "error boundary {:?} captured an error from {:?}",
                            boundary_id,
                            unit
                        );
                    }
                    None => {
                        // No boundary: unmount everything and report. If the
                        // root's own recovery pass threw again there is no
                        // one left to capture.
                        let root_fiber = self.top_of(unit);
                        if self.fibers[root_fiber]
                            .flags
                            .contains(FiberFlags::DID_CAPTURE)
                        {
                            log::error!("root recovery render failed: {error:#}");
                            self.wip_root_exit_status = RootExitStatus::FatalErrored;
                            return;
                        }
                        let on_uncaught = self.roots[root_id].on_uncaught_error.clone();
                        let reported = error.clone();
                        let update = Update {
                            lane,
                            tag: UpdateTag::CaptureUpdate,
                            payload: Some(UpdatePayload::Partial(
                                Record::new().with("element", Value::Null),
                            )),
                            callback: Some(Rc::new(move || on_uncaught(&reported))),
                        };
                        self.enqueue_captured_update(root_fiber, update);
                        self.fibers[root_fiber].flags |= FiberFlags::SHOULD_CAPTURE;
                    }
                }
            }
        }
    }

    fn enqueue_captured_update(&mut self, fiber: FiberId, update: Update) {
        let Some(queue) = self.fibers[fiber].update_queue.as_ref() else {
            return;
        };
        queue.shared.borrow_mut().pending.push_back(update);
    }

    fn nearest_suspense_boundary(&self, from: FiberId) -> Option<FiberId> {
        let mut node = self.fibers[from].parent;
        while let Some(id) = node {
            if self.fibers[id].tag == WorkTag::SuspenseBoundary {
                return Some(id);
            }
            node = self.fibers[id].parent;
        }
        None
    }

    fn nearest_error_boundary(&self, from: FiberId) -> Option<FiberId> {
        let mut node = self.fibers[from].parent;
        while let Some(id) = node {
            let fiber = &self.fibers[id];
            if fiber.tag == WorkTag::ClassComponent
                && !fiber.flags.contains(FiberFlags::DID_CAPTURE)
            {
                if let Some(ElementKind::Class(def)) = &fiber.resolved_type {
                    if def.get_derived_state_from_error.is_some() {
                        return Some(id);
                    }
                }
            }
            node = self.fibers[id].parent;
        }
        None
    }

    fn top_of(&self, from: FiberId) -> FiberId {
        let mut node = from;
        while let Some(parent) = self.fibers[node].parent {
            node = parent;
        }
        node
    }

    pub(crate) fn attach_ping_listener(
        &mut self,
        thenable: Rc<dyn Thenable>,
        root: RootId,
        lanes: Lanes,
        fiber: Option<FiberId>,
    ) {
        let board = self.board.clone();
        thenable.subscribe(Box::new(move || {
            board
                .borrow_mut()
                .pings
                .push(crate::reconciler::Ping { root, lanes, fiber });
        }));
        self.wip_root_did_attach_ping_listener = true;
    }

    fn recover_from_concurrent_error(
        &mut self,
        root_id: RootId,
        retry_lanes: Lanes,
    ) -> RootExitStatus {
        log::debug!(
            "retrying {:?} synchronously after a concurrent error",
            root_id
        );
        let errors = std::mem::take(&mut self.wip_root_concurrent_errors);
        self.reset_wip_stack();
        let exit = self.render_root_sync(root_id, retry_lanes);
        self.wip_root_recoverable_errors = errors;
        exit
    }
}
