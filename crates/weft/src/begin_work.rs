//! Begin work: the pre-order visit of the render phase.
//!
//! For each fiber this decides whether the subtree can be skipped outright,
//! otherwise runs whatever user code the fiber stands for, resolves the
//! next children, and hands them to child reconciliation. Thrown values
//! propagate out as `Err` and are routed into the suspend/unwind machinery
//! by the work loop.

use crate::context::{ContextDependency, Dependencies};
use crate::element::{Element, ElementKind, Props, Record, Value};
use crate::fiber::{tag_for_kind, FiberFlags, FiberId, WorkTag};
use crate::hooks::{Hook, RenderCx};
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::reconciler::Reconciler;
use crate::thenable::Thrown;
use crate::update_queue::UpdateQueue;
use std::rc::Rc;

/// Ceiling on render-phase update loops within one component attempt.
const RENDER_PHASE_UPDATE_LIMIT: u32 = 25;

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn begin_work(&mut self, wip: FiberId) -> Result<Option<FiberId>, Thrown> {
        let render_lanes = self.entangled_render_lanes;
        let current = self.fibers[wip].alternate;

        if let Some(current_id) = current {
            let old_props = self.fibers[current_id].memoized_props.clone();
            let new_props = self.fibers[wip].pending_props.clone();
            let props_equal = old_props.as_ref().is_some_and(|old| old.same(&new_props));
            let has_scheduled_work = self.fibers[wip].lanes.intersects(render_lanes);
            let did_capture = self.fibers[wip].flags.contains(FiberFlags::DID_CAPTURE);

            if props_equal && !has_scheduled_work && !did_capture {
                self.did_receive_update = false;
                return Ok(self.attempt_early_bailout(wip, render_lanes));
            }
            // A changed context value counts as receiving an update even
            // when the props handle is identical.
            let context_changed = self.fibers[wip]
                .dependencies
                .as_ref()
                .is_some_and(|deps| deps.lanes.intersects(render_lanes));
            self.did_receive_update = !props_equal || context_changed;
        } else {
            self.did_receive_update = false;
        }

        self.fibers[wip].lanes = Lanes::empty();

        let tag = self.fibers[wip].tag;
        match tag {
            WorkTag::HostRoot => self.update_host_root(wip, render_lanes),
            WorkTag::FunctionComponent => self.update_function_component(wip, render_lanes),
            WorkTag::ClassComponent => self.update_class_component(wip, render_lanes),
            WorkTag::HostComponent => self.update_host_component(wip),
            WorkTag::HostText => Ok(None),
            WorkTag::Fragment | WorkTag::Mode | WorkTag::Profiler => {
                self.update_passthrough(wip)
            }
            WorkTag::ContextProvider => self.update_context_provider(wip, render_lanes),
            WorkTag::ContextConsumer => self.update_context_consumer(wip, render_lanes),
            WorkTag::ForwardRef => self.update_forward_ref(wip, render_lanes),
            WorkTag::MemoComponent => self.update_memo_component(wip, render_lanes),
            WorkTag::SimpleMemoComponent => self.update_simple_memo_component(wip, render_lanes),
            WorkTag::SuspenseBoundary => self.update_suspense_boundary(wip),
            WorkTag::OffscreenComponent => self.update_offscreen(wip, render_lanes),
            WorkTag::HostPortal => self.update_passthrough(wip),
            WorkTag::LazyComponent => self.update_lazy_component(wip, render_lanes),
            WorkTag::Throw => {
                let error = match &self.fibers[wip].resolved_type {
                    Some(ElementKind::Throw(error)) => error.clone(),
                    _ => Rc::new(anyhow::anyhow!("throw fiber without a payload")),
                };
                Err(Thrown::Error(error))
            }
        }
    }

    /// Nothing scheduled here: re-establish any stack state this fiber
    /// contributes, then skip as much of the subtree as lanes allow.
    fn attempt_early_bailout(&mut self, wip: FiberId, render_lanes: Lanes) -> Option<FiberId> {
        match self.fibers[wip].tag {
            WorkTag::HostRoot => self.push_host_root_context(wip),
            WorkTag::HostComponent => self.push_host_context(wip),
            WorkTag::ContextProvider => {
                if let Some(ElementKind::Provider { context, value }) =
                    self.fibers[wip].element_type.clone()
                {
                    self.context_stack.push(&context, value);
                }
            }
            _ => {}
        }
        self.bailout_on_already_finished_work(wip, render_lanes)
    }

    fn bailout_on_already_finished_work(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Option<FiberId> {
        if !self.fibers[wip].child_lanes.intersects(render_lanes) {
            log::trace!("bailout: skipping subtree of {:?}", wip);
            return None;
        }
        // Children have work; clone them into this buffer and descend.
        self.clone_child_fibers(wip);
        self.fibers[wip].child
    }

    // === Tag handlers ===

    fn update_host_root(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        self.push_host_root_context(wip);

        let props = self.fibers[wip].pending_props.clone();
        self.process_update_queue(wip, &props, render_lanes);

        let next_element = self.fibers[wip]
            .memoized_state
            .as_ref()
            .and_then(|state| state.get("element"))
            .cloned();
        let children: Vec<Element> = match next_element {
            Some(Value::Element(element)) => vec![element],
            _ => Vec::new(),
        };

        self.reconcile_children_of(wip, &children);
        Ok(self.fibers[wip].child)
    }

    fn update_function_component(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let body = match &self.fibers[wip].resolved_type {
            Some(ElementKind::Component(body)) => body.clone(),
            other => panic!(
                "function component fiber with wrong kind: {:?}",
                other.as_ref().map(|kind| kind.debug_name())
            ),
        };
        let props = self.fibers[wip].pending_props.clone();
        let (child, state_changed) = self.render_with_hooks(wip, render_lanes, move |rcx, props| {
            (body.0)(rcx, props)
        })?;
        if let Some(bailout) = self.attempt_hook_bailout(wip, render_lanes, state_changed) {
            return Ok(bailout);
        }
        self.reconcile_children_of(wip, &[child]);
        Ok(self.fibers[wip].child)
    }

    fn update_forward_ref(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let def = match &self.fibers[wip].resolved_type {
            Some(ElementKind::ForwardRef(def)) => def.clone(),
            _ => panic!("forward-ref fiber with wrong kind"),
        };
        let ref_ = self.fibers[wip].ref_.clone();
        let (child, state_changed) = self.render_with_hooks(wip, render_lanes, move |rcx, props| {
            (def.render)(rcx, props, ref_.as_ref())
        })?;
        if let Some(bailout) = self.attempt_hook_bailout(wip, render_lanes, state_changed) {
            return Ok(bailout);
        }
        self.reconcile_children_of(wip, &[child]);
        Ok(self.fibers[wip].child)
    }

    /// After the body already ran: if neither props nor hook state changed,
    /// the produced children are equivalent to the committed ones and the
    /// subtree can be carried over instead of reconciled.
    fn attempt_hook_bailout(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
        state_changed: bool,
    ) -> Option<Option<FiberId>> {
        if self.fibers[wip].alternate.is_none()
            || self.did_receive_update
            || state_changed
            || self.fibers[wip].flags.contains(FiberFlags::DID_CAPTURE)
        {
            return None;
        }
        Some(self.bailout_on_already_finished_work(wip, render_lanes))
    }

    /// Run a hook-capable body, looping while it schedules render-phase
    /// updates on itself.
    fn render_with_hooks(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
        body: impl Fn(&mut RenderCx, &Props) -> Result<Element, Thrown>,
    ) -> Result<(Element, bool), Thrown> {
        let props = self.fibers[wip].pending_props.clone();
        let current = self.fibers[wip].alternate;
        let mut attempt_hooks: Vec<Hook> = match current {
            Some(current) => self.fibers[current].hooks.clone(),
            None => Vec::new(),
        };
        let mut attempt_is_mount = current.is_none();
        let board = self.board.clone();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if attempts > RENDER_PHASE_UPDATE_LIMIT {
                panic!("too many re-renders: a component keeps scheduling render-phase updates");
            }

            {
                let mut board = board.borrow_mut();
                board.rendering_fiber = Some(wip);
                board.render_lanes = render_lanes;
                board.did_schedule_render_phase_update = false;
            }

            let mut rcx = RenderCx::new(
                wip,
                render_lanes,
                attempt_hooks.clone(),
                attempt_is_mount,
                &self.context_stack,
                board.clone(),
            );
            let result = body(&mut rcx, &props);
            let completed = result.is_ok();
            let output = rcx.finish(completed);

            let rerender = {
                let mut board = board.borrow_mut();
                board.rendering_fiber = None;
                board.did_schedule_render_phase_update
            };

            // Mirror drained hook actions onto the committed buffer so an
            // abandoned pass cannot lose them.
            if let Some(current) = current {
                for (index, updates) in &output.drained {
                    if let Some(Hook::State(hook)) = self.fibers[current].hooks.get_mut(*index) {
                        hook.base_queue.extend(updates.iter().cloned());
                    }
                }
            }

            let element = result?;

            if rerender {
                attempt_hooks = output.hooks;
                attempt_is_mount = false;
                continue;
            }

            let fiber = &mut self.fibers[wip];
            fiber.hooks = output.hooks;
            fiber.flags |= output.fiber_flags;
            fiber.lanes |= output.skipped_lanes;
            fiber.dependencies = if output.context_deps.is_empty() {
                None
            } else {
                Some(Dependencies {
                    lanes: Lanes::empty(),
                    contexts: output.context_deps,
                })
            };
            self.mark_skipped_update_lanes(output.skipped_lanes);
            return Ok((element, output.state_changed));
        }
    }

    fn update_class_component(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let def = match &self.fibers[wip].resolved_type {
            Some(ElementKind::Class(def)) => def.clone(),
            _ => panic!("class fiber with wrong kind"),
        };
        let props = self.fibers[wip].pending_props.clone();
        let current = self.fibers[wip].alternate;

        // First begin constructs the instance and its queue.
        if self.fibers[wip].class_instance().is_none() {
            let state = (def.initial_state)(&props);
            let instance = Rc::new(std::cell::RefCell::new(crate::fiber::ClassInstance {
                state: state.clone(),
                props: props.clone(),
                snapshot: None,
            }));
            let fiber = &mut self.fibers[wip];
            fiber.state_node = crate::fiber::StateNode::Class(instance);
            fiber.memoized_state = Some(state.clone());
            fiber.update_queue = Some(UpdateQueue::new(state));
        }

        self.mark_ref(wip, current);
        self.process_update_queue(wip, &props, render_lanes);

        let state = self.fibers[wip]
            .memoized_state
            .clone()
            .unwrap_or_else(Record::new);
        if let Some(instance) = self.fibers[wip].class_instance() {
            let mut instance = instance.borrow_mut();
            instance.state = state.clone();
            instance.props = props.clone();
        }

        let rendered = (def.render)(&state, &props)?;

        {
            let fiber = &mut self.fibers[wip];
            match current {
                None => {
                    if def.did_mount.is_some() {
                        fiber.flags |= FiberFlags::UPDATE | FiberFlags::LAYOUT_STATIC;
                    }
                }
                Some(_) => {
                    if def.did_update.is_some() {
                        fiber.flags |= FiberFlags::UPDATE;
                    }
                    if def.get_snapshot_before_update.is_some() {
                        fiber.flags |= FiberFlags::SNAPSHOT;
                    }
                }
            }
        }

        self.reconcile_children_of(wip, &[rendered]);
        Ok(self.fibers[wip].child)
    }

    fn update_host_component(&mut self, wip: FiberId) -> Result<Option<FiberId>, Thrown> {
        self.push_host_context(wip);
        self.mark_ref(wip, self.fibers[wip].alternate);

        let element_type = match &self.fibers[wip].resolved_type {
            Some(ElementKind::Host(tag)) => tag.clone(),
            _ => panic!("host fiber with wrong kind"),
        };
        let props = self.fibers[wip].pending_props.clone();
        let sets_text = self.host.should_set_text_content(&element_type, &props);

        if let Some(current) = self.fibers[wip].alternate {
            let old_props = self.fibers[current].memoized_props.clone();
            if let Some(old_props) = old_props {
                if !sets_text && self.host.should_set_text_content(&element_type, &old_props) {
                    // Switching from direct text to hosted children.
                    self.fibers[wip].flags |= FiberFlags::CONTENT_RESET;
                }
            }
        }

        if sets_text {
            self.reconcile_children_of(wip, &[]);
        } else {
            let children: Vec<Element> = props.children().to_vec();
            self.reconcile_children_of(wip, &children);
        }
        Ok(self.fibers[wip].child)
    }

    fn update_passthrough(&mut self, wip: FiberId) -> Result<Option<FiberId>, Thrown> {
        let children: Vec<Element> = self.fibers[wip].pending_props.children().to_vec();
        self.reconcile_children_of(wip, &children);
        Ok(self.fibers[wip].child)
    }

    fn update_context_provider(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let (context, value) = match &self.fibers[wip].element_type {
            Some(ElementKind::Provider { context, value }) => (context.clone(), value.clone()),
            _ => panic!("provider fiber with wrong kind"),
        };

        self.context_stack.push(&context, value.clone());

        if let Some(current) = self.fibers[wip].alternate {
            let old_value = match &self.fibers[current].element_type {
                Some(ElementKind::Provider { value, .. }) => Some(value.clone()),
                _ => None,
            };
            match old_value {
                Some(old) if Rc::ptr_eq(&old, &value) => {
                    // Same value: subtree consumers are unaffected.
                }
                _ => {
                    self.propagate_context_change(wip, context.id(), render_lanes);
                }
            }
        }

        self.update_passthrough(wip)
    }

    fn update_context_consumer(
        &mut self,
        wip: FiberId,
        _render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let (context, render) = match &self.fibers[wip].element_type {
            Some(ElementKind::Consumer { context, render }) => (context.clone(), render.clone()),
            _ => panic!("consumer fiber with wrong kind"),
        };
        let value = self.context_stack.current(&context);
        {
            let fiber = &mut self.fibers[wip];
            let deps = fiber.dependencies.get_or_insert_with(Dependencies::default);
            deps.contexts.clear();
            deps.contexts.push(ContextDependency { context });
        }
        let child = render(&value);
        self.reconcile_children_of(wip, &[child]);
        Ok(self.fibers[wip].child)
    }

    fn update_memo_component(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let def = match &self.fibers[wip].resolved_type {
            Some(ElementKind::Memo(def)) => def.clone(),
            _ => panic!("memo fiber with wrong kind"),
        };

        if def.compare.is_none() {
            if let ElementKind::Component(_) = &def.inner {
                // Plain function inside, default comparison: skip the
                // wrapper fiber entirely.
                let fiber = &mut self.fibers[wip];
                fiber.tag = WorkTag::SimpleMemoComponent;
                fiber.resolved_type = Some(def.inner.clone());
                return self.update_simple_memo_component(wip, render_lanes);
            }
        }

        if let Some(current) = self.fibers[wip].alternate {
            let old_props = self.fibers[current].memoized_props.clone();
            let new_props = self.fibers[wip].pending_props.clone();
            if let Some(old_props) = old_props {
                let equal = match &def.compare {
                    Some(compare) => compare(&old_props, &new_props),
                    None => old_props.shallow_eq(&new_props),
                };
                if equal && !self.fibers[wip].child_lanes.intersects(render_lanes) {
                    self.did_receive_update = false;
                    return Ok(self.bailout_on_already_finished_work(wip, render_lanes));
                }
            }
        }

        let props = self.fibers[wip].pending_props.clone();
        let ref_ = self.fibers[wip].ref_.clone();
        let mut inner = Element::new(def.inner.clone(), props);
        inner.ref_ = ref_;
        self.reconcile_children_of(wip, &[inner]);
        Ok(self.fibers[wip].child)
    }

    fn update_simple_memo_component(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        if let Some(current) = self.fibers[wip].alternate {
            let old_props = self.fibers[current].memoized_props.clone();
            let new_props = self.fibers[wip].pending_props.clone();
            if let Some(old_props) = old_props {
                if old_props.shallow_eq(&new_props)
                    && !self.fibers[wip].lanes.intersects(render_lanes)
                {
                    self.did_receive_update = false;
                    return Ok(self.bailout_on_already_finished_work(wip, render_lanes));
                }
            }
        }
        self.update_function_component(wip, render_lanes)
    }

    fn update_suspense_boundary(&mut self, wip: FiberId) -> Result<Option<FiberId>, Thrown> {
        let did_suspend = self.fibers[wip].flags.contains(FiberFlags::DID_CAPTURE);
        self.fibers[wip].flags.remove(FiberFlags::DID_CAPTURE);

        let fallback = match &self.fibers[wip].element_type {
            Some(ElementKind::Suspense { fallback }) => {
                fallback.as_ref().map(|element| (**element).clone())
            }
            _ => None,
        };
        let props = self.fibers[wip].pending_props.clone();

        let primary = Element::new(
            ElementKind::Offscreen {
                hidden: did_suspend,
            },
            props,
        );
        let mut children = vec![primary];
        if did_suspend {
            children.push(fallback.unwrap_or_else(|| Element::fragment([])));
        }

        self.fibers[wip].showing_fallback = did_suspend;
        self.reconcile_children_of(wip, &children);
        if did_suspend {
            log::debug!("suspense boundary {:?} rendering fallback", wip);
        }
        Ok(self.fibers[wip].child)
    }

    fn update_offscreen(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let hidden = match &self.fibers[wip].element_type {
            Some(ElementKind::Offscreen { hidden }) => *hidden,
            _ => false,
        };

        if hidden && !render_lanes.intersects(Lanes::OFFSCREEN) {
            // Hidden subtree, no offscreen pass requested: leave the
            // children untouched. Their queued updates stay on the shared
            // rings and apply when the subtree is revealed.
            return Ok(None);
        }

        self.update_passthrough(wip)
    }

    fn update_lazy_component(
        &mut self,
        wip: FiberId,
        render_lanes: Lanes,
    ) -> Result<Option<FiberId>, Thrown> {
        let def = match &self.fibers[wip].element_type {
            Some(ElementKind::Lazy(def)) => def.clone(),
            _ => panic!("lazy fiber with wrong kind"),
        };
        match (def.resolve)() {
            crate::element::LazyResult::Ready(kind) => {
                let fiber = &mut self.fibers[wip];
                fiber.resolved_type = Some(kind.clone());
                fiber.tag = tag_for_kind(&kind);
                log::trace!("lazy fiber {:?} resolved to {}", wip, kind.debug_name());
                match fiber.tag {
                    WorkTag::FunctionComponent => self.update_function_component(wip, render_lanes),
                    WorkTag::ClassComponent => self.update_class_component(wip, render_lanes),
                    WorkTag::ForwardRef => self.update_forward_ref(wip, render_lanes),
                    WorkTag::MemoComponent => self.update_memo_component(wip, render_lanes),
                    _ => panic!(
                        "lazy component resolved to an unsupported kind: {}",
                        kind.debug_name()
                    ),
                }
            }
            crate::element::LazyResult::Pending(thenable) => Err(Thrown::Suspend(thenable)),
        }
    }

    // === Shared pieces ===

    fn reconcile_children_of(&mut self, wip: FiberId, children: &[Element]) {
        let current = self.fibers[wip].alternate;
        let current_first_child = current.and_then(|current| self.fibers[current].child);
        // Portal children always track placements: the initial-children
        // walk stops at portals, so nothing else would ever attach them to
        // their container.
        let track_effects = current.is_some() || self.fibers[wip].tag == WorkTag::HostPortal;
        self.reconcile_child_fibers(wip, current_first_child, children, track_effects);
    }

    fn mark_ref(&mut self, wip: FiberId, current: Option<FiberId>) {
        let changed = match current {
            None => self.fibers[wip].ref_.is_some(),
            Some(current) => {
                let old = self.fibers[current].ref_.as_ref();
                let new = self.fibers[wip].ref_.as_ref();
                match (old, new) {
                    (None, None) => false,
                    (Some(old), Some(new)) => !old.same(new),
                    _ => true,
                }
            }
        };
        if changed {
            self.fibers[wip].flags |= FiberFlags::REF | FiberFlags::REF_STATIC;
        }
    }

    fn push_host_root_context(&mut self, wip: FiberId) {
        let root_id = match self.fibers[wip].state_node {
            crate::fiber::StateNode::Root(root) => root,
            _ => panic!("host root fiber without a root record"),
        };
        let container = self.roots[root_id].container.clone();
        let context = self.host.get_root_host_context(&container);
        self.root_container = Some(container);
        self.host_context_stack.push(context);
    }

    fn push_host_context(&mut self, wip: FiberId) {
        let element_type = match &self.fibers[wip].resolved_type {
            Some(ElementKind::Host(tag)) => tag.clone(),
            _ => panic!("host fiber with wrong kind"),
        };
        let parent = self
            .host_context_stack
            .last()
            .cloned()
            .unwrap_or_default();
        let child = self.host.get_child_host_context(&parent, &element_type);
        self.host_context_stack.push(child);
    }
}
