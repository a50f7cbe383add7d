//! Context: values provided high in the tree and read far below without
//! prop threading.
//!
//! Providers push their value onto a per-context stack on the way down and
//! pop it on the way up (including the unwind path, so a throw never leaks a
//! stale value). Readers record a dependency on their fiber; when a provider
//! re-renders with a different value, every dependent fiber below it gets
//! the render lanes marked so the bailout logic cannot skip it.

use crate::fiber::FiberId;
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::reconciler::Reconciler;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    id: u64,
    default: Rc<dyn Any>,
}

/// A context handle. Clones share identity; two separately created contexts
/// never match even with equal defaults.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    pub fn new(default: Rc<dyn Any>) -> Context {
        Context {
            inner: Rc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                default,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn default_value(&self) -> &Rc<dyn Any> {
        &self.inner.default
    }
}

/// One recorded context read on a fiber.
pub struct ContextDependency {
    pub context: Context,
}

/// The context reads a fiber performed during its last render.
#[derive(Default)]
pub struct Dependencies {
    pub lanes: Lanes,
    pub contexts: Vec<ContextDependency>,
}

impl Dependencies {
    pub fn depends_on(&self, context_id: u64) -> bool {
        self.contexts.iter().any(|dep| dep.context.id() == context_id)
    }

    /// Fresh copy for a new render pass; the context list is rebuilt as the
    /// component re-reads.
    pub fn clone_for_render(&self) -> Dependencies {
        Dependencies {
            lanes: self.lanes,
            contexts: self
                .contexts
                .iter()
                .map(|dep| ContextDependency {
                    context: dep.context.clone(),
                })
                .collect(),
        }
    }
}

/// Per-context value stacks, live only while a render is on the stack.
#[derive(Default)]
pub(crate) struct ContextStack {
    values: FxHashMap<u64, Vec<Rc<dyn Any>>>,
}

impl ContextStack {
    pub fn push(&mut self, context: &Context, value: Rc<dyn Any>) {
        self.values.entry(context.id()).or_default().push(value);
    }

    pub fn pop(&mut self, context: &Context) {
        let stack = self
            .values
            .get_mut(&context.id())
            .expect("popped a context that was never pushed");
        stack.pop().expect("context stack underflow");
    }

    /// The nearest provided value, or the context default.
    pub fn current(&self, context: &Context) -> Rc<dyn Any> {
        self.values
            .get(&context.id())
            .and_then(|stack| stack.last())
            .cloned()
            .unwrap_or_else(|| context.default_value().clone())
    }

    pub fn is_balanced(&self) -> bool {
        self.values.values().all(|stack| stack.is_empty())
    }
}

impl<H: HostConfig> Reconciler<H> {
    /// Walk the in-progress subtree under `provider` and mark every fiber
    /// that reads `context_id` so it renders in this pass.
    ///
    /// The walk runs over the child links the work-in-progress inherited
    /// from current; it happens before the provider's children are
    /// reconciled, so the links are still the committed structure.
    pub(crate) fn propagate_context_change(
        &mut self,
        provider: FiberId,
        context_id: u64,
        render_lanes: Lanes,
    ) {
        let mut stack: Vec<FiberId> = Vec::new();
        if let Some(child) = self.fibers[provider].child {
            stack.push(child);
        }
        while let Some(fiber_id) = stack.pop() {
            let depends = self.fibers[fiber_id]
                .dependencies
                .as_ref()
                .is_some_and(|deps| deps.depends_on(context_id));
            if depends {
                log::trace!(
                    "context {} changed: scheduling fiber {:?} at {:?}",
                    context_id,
                    fiber_id,
                    render_lanes
                );
                let fiber = &mut self.fibers[fiber_id];
                fiber.lanes |= render_lanes;
                if let Some(deps) = fiber.dependencies.as_mut() {
                    deps.lanes |= render_lanes;
                }
                let alternate = fiber.alternate;
                if let Some(alternate) = alternate {
                    self.fibers[alternate].lanes |= render_lanes;
                }
                self.mark_ancestors_child_lanes(fiber_id, provider, render_lanes);
            }

            // A nested provider for the same context shadows this one; its
            // subtree reads the inner value and needs no marking.
            let shadows = matches!(
                &self.fibers[fiber_id].element_type,
                Some(crate::element::ElementKind::Provider { context, .. })
                    if context.id() == context_id
            );
            if !shadows {
                if let Some(child) = self.fibers[fiber_id].child {
                    stack.push(child);
                }
            }
            if let Some(sibling) = self.fibers[fiber_id].sibling {
                stack.push(sibling);
            }
        }
    }

    /// Merge `lanes` into `child_lanes` on every ancestor of `from`, up to
    /// and including `until`.
    fn mark_ancestors_child_lanes(&mut self, from: FiberId, until: FiberId, lanes: Lanes) {
        let mut node = self.fibers[from].parent;
        while let Some(parent_id) = node {
            let parent = &mut self.fibers[parent_id];
            parent.child_lanes |= lanes;
            let alternate = parent.alternate;
            if let Some(alternate) = alternate {
                self.fibers[alternate].child_lanes |= lanes;
            }
            if parent_id == until {
                break;
            }
            node = self.fibers[parent_id].parent;
        }
    }
}
