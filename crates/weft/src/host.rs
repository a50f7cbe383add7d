//! The host adapter boundary.
//!
//! The reconciler core never touches a platform. Everything it needs from
//! the outside world comes through two traits: [`HostConfig`] for creating
//! and mutating platform nodes, and [`HostScheduler`] for time, cooperative
//! yielding, and deferred callbacks.
//!
//! Scheduled callbacks are semantic [`Task`] tokens rather than closures:
//! the embedder owns the [`Reconciler`](crate::Reconciler) and hands a due
//! task back to [`Reconciler::run_task`](crate::Reconciler::run_task) when
//! its scheduler decides to run it.

use crate::element::Props;
use crate::fiber::RootId;
use crate::lane::{Millis, SchedulerPriority};
use anyhow::Result;

/// A unit of deferred reconciler work minted for the host scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    /// Drain the scheduled-root list and (re)arm per-root callbacks.
    ProcessRootSchedule,
    /// Render and commit whatever `root` needs next, possibly yielding.
    PerformWorkOnRoot { root: RootId },
    /// Run passive effects left over from the last commit.
    FlushPassiveEffects,
    /// A suspended root waited long enough; force its fallback through.
    CommitFallback { root: RootId },
}

/// Handle to a scheduled callback, for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Handle to a scheduled timeout, for cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeoutId(pub u64);

/// Injected clock and cooperative yield primitive.
pub trait HostScheduler {
    /// Current time in milliseconds. Only differences matter.
    fn now(&self) -> Millis;

    /// True when the current slice of work should yield back to the host.
    fn should_yield(&self) -> bool;

    /// Whether [`HostScheduler::should_yield`] is meaningful. Hosts without
    /// one get a fixed time budget per slice instead.
    fn supports_should_yield(&self) -> bool {
        true
    }

    /// Whether [`HostScheduler::schedule_microtask`] is available.
    fn supports_microtasks(&self) -> bool {
        true
    }

    /// Queue `task` to run before the next macrotask.
    fn schedule_microtask(&mut self, task: Task);

    fn schedule_callback(&mut self, priority: SchedulerPriority, task: Task) -> CallbackId;

    fn cancel_callback(&mut self, id: CallbackId);

    fn schedule_timeout(&mut self, delay: Millis, task: Task) -> TimeoutId;

    fn cancel_timeout(&mut self, id: TimeoutId);
}

/// Either flavor of committed host node, as handed to mutation methods.
pub enum HostNode<H: HostConfig + ?Sized> {
    Instance(H::Instance),
    Text(H::TextInstance),
}

impl<H: HostConfig> Clone for HostNode<H> {
    fn clone(&self) -> Self {
        match self {
            HostNode::Instance(instance) => HostNode::Instance(instance.clone()),
            HostNode::Text(text) => HostNode::Text(text.clone()),
        }
    }
}

/// The platform glue. Creation and tree mutation of host nodes, text
/// handling, and commit bracketing.
///
/// Mutation methods are fallible; a failure during commit is recorded and
/// reported without abandoning the rest of the commit, so a single bad node
/// cannot orphan its siblings.
pub trait HostConfig: Sized + 'static {
    /// Handle to the top-level container a tree renders into.
    type Container: Clone + 'static;
    /// Handle to a created host element.
    type Instance: Clone + 'static;
    /// Handle to a created run of host text.
    type TextInstance: Clone + 'static;
    /// Context threaded down the tree during render (namespaces and the
    /// like).
    type HostContext: Clone + Default + 'static;
    /// Precomputed diff between two prop bags, applied at commit.
    type UpdatePayload: 'static;
    type Scheduler: HostScheduler;

    fn scheduler(&mut self) -> &mut Self::Scheduler;

    // === Host context ===

    fn get_root_host_context(&mut self, container: &Self::Container) -> Self::HostContext;

    fn get_child_host_context(
        &mut self,
        parent: &Self::HostContext,
        element_type: &str,
    ) -> Self::HostContext;

    // === Render-phase creation ===

    fn create_instance(
        &mut self,
        element_type: &str,
        props: &Props,
        container: &Self::Container,
        host_context: &Self::HostContext,
    ) -> Result<Self::Instance>;

    fn create_text_instance(
        &mut self,
        text: &str,
        container: &Self::Container,
        host_context: &Self::HostContext,
    ) -> Result<Self::TextInstance>;

    /// Attach `child` under a just-created, not-yet-committed `parent`.
    fn append_initial_child(
        &mut self,
        parent: &Self::Instance,
        child: &HostNode<Self>,
    ) -> Result<()>;

    /// Final setup once all initial children are attached. Returning true
    /// requests a commit-time mount notification for this instance.
    fn finalize_initial_children(
        &mut self,
        instance: &Self::Instance,
        element_type: &str,
        props: &Props,
    ) -> bool;

    /// Diff old props against new; `None` means nothing to commit.
    fn prepare_update(
        &mut self,
        instance: &Self::Instance,
        element_type: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<Self::UpdatePayload>;

    /// True when this element's children are plain text the host sets
    /// directly instead of hosting text nodes.
    fn should_set_text_content(&mut self, _element_type: &str, _props: &Props) -> bool {
        false
    }

    // === Commit-phase mutation ===

    fn commit_update(
        &mut self,
        instance: &Self::Instance,
        payload: Self::UpdatePayload,
        element_type: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Result<()>;

    fn commit_text_update(
        &mut self,
        text_instance: &Self::TextInstance,
        old_text: &str,
        new_text: &str,
    ) -> Result<()>;

    /// Mount notification requested by `finalize_initial_children`.
    fn commit_mount(
        &mut self,
        _instance: &Self::Instance,
        _element_type: &str,
        _props: &Props,
    ) -> Result<()> {
        Ok(())
    }

    fn reset_text_content(&mut self, _instance: &Self::Instance) -> Result<()> {
        Ok(())
    }

    fn append_child(&mut self, parent: &Self::Instance, child: &HostNode<Self>) -> Result<()>;

    fn insert_before(
        &mut self,
        parent: &Self::Instance,
        child: &HostNode<Self>,
        before: &HostNode<Self>,
    ) -> Result<()>;

    fn remove_child(&mut self, parent: &Self::Instance, child: &HostNode<Self>) -> Result<()>;

    fn append_child_to_container(
        &mut self,
        container: &Self::Container,
        child: &HostNode<Self>,
    ) -> Result<()>;

    fn insert_in_container_before(
        &mut self,
        container: &Self::Container,
        child: &HostNode<Self>,
        before: &HostNode<Self>,
    ) -> Result<()>;

    fn remove_child_from_container(
        &mut self,
        container: &Self::Container,
        child: &HostNode<Self>,
    ) -> Result<()>;

    // === Commit bracketing ===

    /// Called once before the mutation phase touches the host. Snapshot
    /// whatever must survive the mutations (selection, scroll).
    fn prepare_for_commit(&mut self, container: &Self::Container);

    /// Called once after the mutation phase; restore what was snapshotted.
    fn reset_after_commit(&mut self, container: &Self::Container);

    // === Commit suspension ===

    /// Whether committing an instance of this type may need to wait on a
    /// resource (a decoded image, a loaded font).
    fn may_suspend_commit(&mut self, _element_type: &str, _props: &Props) -> bool {
        false
    }

    /// Start loading the resource for an instance ahead of commit. Returns
    /// true when the resource is already usable.
    fn preload_instance(&mut self, _element_type: &str, _props: &Props) -> bool {
        true
    }
}
