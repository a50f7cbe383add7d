//! weft is a priority-scheduled fiber reconciler for declarative UI trees.
//!
//! User code describes the UI as a tree of immutable [`Element`]
//! descriptors. The reconciler diffs descriptors against a persistent
//! mirror (the fiber tree) and emits the minimal set of mutations to a
//! pluggable [`HostConfig`], under a cooperative scheduler with bitmask
//! lane priorities: urgent input preempts transitions, starved work
//! expires into the synchronous path, and renders suspend and resume
//! around asynchronous data without blocking.
//!
//! # Architecture
//!
//! Two fiber trees coexist, linked node-for-node: the committed tree that
//! matches the host, and the work-in-progress tree a render builds against
//! it. Renders are interruptible between fibers; commits are synchronous
//! and phase ordered. All cross-cutting state lives on a [`Reconciler`]
//! value owned by the embedder; there are no process-wide globals, and
//! scheduled work comes back to the reconciler as [`Task`] tokens through
//! [`Reconciler::run_task`].

mod begin_work;
mod commit;
mod complete_work;
mod context;
mod element;
mod fiber;
mod hooks;
mod host;
mod lane;
mod reconcile_children;
mod reconciler;
mod root;
mod scheduler;
mod thenable;
mod update_queue;
mod work_loop;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{Context, ContextDependency, Dependencies};
pub use element::{
    AttrValue, ClassDef, ComponentFn, Element, ElementKind, ForwardRefDef, LazyDef, LazyResult,
    MemoDef, PortalDef, Props, PropsBuilder, Record, Ref, RenderResult, Value,
};
pub use fiber::{Fiber, FiberArena, FiberFlags, FiberId, FiberMode, RootId, StateNode, WorkTag};
pub use hooks::{
    Deps, DepValue, Dispatch, Hook, HookEffectFlags, HookQueue, HookUpdate, RenderCx, SetState,
};
pub use host::{CallbackId, HostConfig, HostNode, HostScheduler, Task, TimeoutId};
pub use lane::{Lanes, Millis, SchedulerPriority, LANE_COUNT};
pub use reconciler::{
    ExecutionContext, Reconciler, RootExitStatus, SuspendedReason, UpdateBoard,
};
pub use root::{FiberRoot, RootOptions, RootTag, TransitionCallbacks};
pub use thenable::{Thenable, ThenableStatus, Thrown, ThrownError};
pub use update_queue::{SharedPending, Update, UpdatePayload, UpdateQueue, UpdateTag};
