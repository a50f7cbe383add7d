//! The root scheduler: which root works next, and at what priority.
//!
//! Roots with pending work sit on an intrusive list. Scheduling is
//! debounced through a single microtask per burst of updates; the microtask
//! walks the list, arms at most one scheduler callback per root at the
//! priority of its most urgent lanes, and flushes synchronous work inline
//! before returning to the host.

use crate::host::{HostConfig, HostScheduler, Task};
use crate::fiber::RootId;
use crate::lane::{Lanes, SchedulerPriority};
use crate::reconciler::Reconciler;

impl<H: HostConfig> Reconciler<H> {
    /// Make sure `root` is on the scheduled list and a scheduling pass is
    /// queued.
    pub(crate) fn ensure_root_is_scheduled(&mut self, root_id: RootId) {
        let in_list = self.last_scheduled_root == Some(root_id)
            || self.roots[root_id].next_scheduled.is_some();
        if !in_list {
            match self.last_scheduled_root {
                None => {
                    self.first_scheduled_root = Some(root_id);
                    self.last_scheduled_root = Some(root_id);
                }
                Some(last) => {
                    self.roots[last].next_scheduled = Some(root_id);
                    self.last_scheduled_root = Some(root_id);
                }
            }
        }

        self.might_have_pending_sync_work = true;

        if !self.did_schedule_microtask {
            self.did_schedule_microtask = true;
            if self.host.scheduler().supports_microtasks() && !self.is_working() {
                self.host.scheduler().schedule_microtask(Task::ProcessRootSchedule);
            } else {
                // Mid-render or no microtask facility: an immediate
                // callback is the closest thing.
                self.host
                    .scheduler()
                    .schedule_callback(SchedulerPriority::Immediate, Task::ProcessRootSchedule);
            }
        }
    }

    /// The debounced scheduling pass.
    pub(crate) fn process_root_schedule(&mut self) {
        self.did_schedule_microtask = false;
        self.might_have_pending_sync_work = false;

        let now = self.host.scheduler().now();
        let mut any_sync = false;
        let mut prev: Option<RootId> = None;
        let mut cursor = self.first_scheduled_root;

        while let Some(root_id) = cursor {
            let next = self.roots[root_id].next_scheduled;
            let scheduled = self.schedule_task_for_root_during_microtask(root_id, now);
            if scheduled.is_empty() {
                self.unlink_scheduled_root(prev, root_id, next);
            } else {
                if scheduled.intersects(Lanes::SYNC)
                    || self.roots[root_id].includes_expired_lane(scheduled)
                {
                    any_sync = true;
                }
                prev = Some(root_id);
            }
            cursor = next;
        }

        // The shared transition lane is scoped to one host event.
        self.current_event_transition_lane = Lanes::empty();

        if any_sync {
            self.might_have_pending_sync_work = true;
            self.flush_sync_work_across_roots();
        }
    }

    /// Reconcile one root's callback with its current next lanes. Returns
    /// the lanes a task now exists for; empty means the root has nothing to
    /// do and leaves the list.
    fn schedule_task_for_root_during_microtask(&mut self, root_id: RootId, now: u64) -> Lanes {
        let wip_lanes = if self.wip_root == Some(root_id) {
            self.wip_root_render_lanes
        } else {
            Lanes::empty()
        };

        self.roots[root_id].mark_starved_lanes_as_expired(now);
        let next_lanes = self.roots[root_id].get_next_lanes(wip_lanes);

        if next_lanes.is_empty() {
            let root = &mut self.roots[root_id];
            if let Some(handle) = root.callback_node.take() {
                self.host.scheduler().cancel_callback(handle);
            }
            self.roots[root_id].callback_priority = Lanes::empty();
            return Lanes::empty();
        }

        if next_lanes.intersects(Lanes::SYNC) {
            // Sync work is flushed inline after the list walk; no callback.
            let root = &mut self.roots[root_id];
            if let Some(handle) = root.callback_node.take() {
                self.host.scheduler().cancel_callback(handle);
            }
            self.roots[root_id].callback_priority = Lanes::SYNC;
            return next_lanes;
        }

        let new_priority = next_lanes.highest_priority_lane();
        let existing_priority = self.roots[root_id].callback_priority;
        if existing_priority == new_priority && self.roots[root_id].callback_node.is_some() {
            // The outstanding callback is still the right one.
            return next_lanes;
        }

        if let Some(handle) = self.roots[root_id].callback_node.take() {
            self.host.scheduler().cancel_callback(handle);
        }
        let handle = self
            .host
            .scheduler()
            .schedule_callback(
                new_priority.to_scheduler_priority(),
                Task::PerformWorkOnRoot { root: root_id },
            );
        let root = &mut self.roots[root_id];
        root.callback_node = Some(handle);
        root.callback_priority = new_priority;
        log::trace!(
            "root {:?} scheduled at {:?} for {:?}",
            root_id,
            new_priority,
            next_lanes
        );
        next_lanes
    }

    fn unlink_scheduled_root(&mut self, prev: Option<RootId>, root_id: RootId, next: Option<RootId>) {
        match prev {
            None => self.first_scheduled_root = next,
            Some(prev) => self.roots[prev].next_scheduled = next,
        }
        if self.last_scheduled_root == Some(root_id) {
            self.last_scheduled_root = prev;
        }
        self.roots[root_id].next_scheduled = None;
    }

    pub(crate) fn remove_root_from_schedule(&mut self, root_id: RootId) {
        let mut prev: Option<RootId> = None;
        let mut cursor = self.first_scheduled_root;
        while let Some(current) = cursor {
            let next = self.roots[current].next_scheduled;
            if current == root_id {
                self.unlink_scheduled_root(prev, current, next);
                return;
            }
            prev = Some(current);
            cursor = next;
        }
    }

    /// Flush every root whose next lanes demand synchronous processing.
    /// Loops until a full pass performs no work.
    pub(crate) fn flush_sync_work_across_roots(&mut self) {
        if self.is_flushing_work || !self.might_have_pending_sync_work {
            return;
        }
        self.is_flushing_work = true;

        loop {
            let mut did_perform_work = false;
            let mut cursor = self.first_scheduled_root;
            while let Some(root_id) = cursor {
                let next = self.roots[root_id].next_scheduled;
                let wip_lanes = if self.wip_root == Some(root_id) {
                    self.wip_root_render_lanes
                } else {
                    Lanes::empty()
                };
                let lanes = self.roots[root_id].get_next_lanes(wip_lanes);
                if !lanes.is_empty()
                    && (lanes.intersects(Lanes::SYNC)
                        || self.roots[root_id].includes_expired_lane(lanes))
                {
                    did_perform_work = true;
                    self.perform_sync_work_on_root(root_id, lanes);
                }
                cursor = next;
            }
            if !did_perform_work {
                break;
            }
        }

        self.is_flushing_work = false;
        self.might_have_pending_sync_work = false;
    }

    fn perform_sync_work_on_root(&mut self, root_id: RootId, lanes: Lanes) {
        // Passive effects may schedule more sync work; get them out of the
        // way so the sync render sees final state.
        self.flush_passive_effects();
        if !self.roots.contains_key(root_id) {
            return;
        }
        self.perform_work_on_root(root_id, lanes, true);
    }

    /// Scheduler-callback entry: recompute lanes and work on `root`.
    pub(crate) fn perform_work_on_root_via_scheduler_task(&mut self, root_id: RootId) {
        if !self.roots.contains_key(root_id) {
            return;
        }
        // The callback that ran us is spent.
        {
            let root = &mut self.roots[root_id];
            root.callback_node = None;
            root.callback_priority = Lanes::empty();
        }

        if self.root_with_pending_passive_effects.is_some() {
            self.flush_passive_effects();
            if !self.roots.contains_key(root_id) {
                return;
            }
        }

        let now = self.host.scheduler().now();
        self.roots[root_id].mark_starved_lanes_as_expired(now);
        let wip_lanes = if self.wip_root == Some(root_id) {
            self.wip_root_render_lanes
        } else {
            Lanes::empty()
        };
        let lanes = self.roots[root_id].get_next_lanes(wip_lanes);
        if lanes.is_empty() {
            return;
        }
        self.perform_work_on_root(root_id, lanes, false);
        self.ensure_root_is_scheduled(root_id);
    }
}
