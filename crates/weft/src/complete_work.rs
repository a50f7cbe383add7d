//! Complete work: the post-order visit of the render phase.
//!
//! Completing a fiber reifies its host state (creating instances on mount,
//! diffing props on update), pops whatever it pushed on the way down, and
//! folds its children's flags and lanes into its own subtree summaries so
//! the commit can skip clean subtrees wholesale.
//!
//! The unwind half runs instead of completion for fibers marked incomplete
//! by a throw; it pops the same stacks and stops at the nearest boundary
//! that agreed to capture.

use crate::element::ElementKind;
use crate::fiber::{FiberFlags, FiberId, StateNode, WorkTag};
use crate::host::{HostConfig, HostNode};
use crate::lane::Lanes;
use crate::reconciler::Reconciler;
use crate::thenable::Thrown;
use std::rc::Rc;

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn complete_work(&mut self, wip: FiberId) -> Result<Option<FiberId>, Thrown> {
        let tag = self.fibers[wip].tag;
        match tag {
            WorkTag::HostComponent => self.complete_host_component(wip)?,
            WorkTag::HostText => self.complete_host_text(wip)?,
            WorkTag::HostRoot => {
                self.host_context_stack.pop();
            }
            WorkTag::ContextProvider => {
                if let Some(ElementKind::Provider { context, .. }) =
                    self.fibers[wip].element_type.clone()
                {
                    self.context_stack.pop(&context);
                }
            }
            WorkTag::SuspenseBoundary => {
                // A boundary holding unresolved wakeables gets revisited at
                // commit so retry listeners can be attached.
                if !self.fibers[wip].retry_queue.is_empty() {
                    self.fibers[wip].flags |= FiberFlags::UPDATE;
                }
            }
            WorkTag::OffscreenComponent => self.complete_offscreen(wip),
            WorkTag::FunctionComponent
            | WorkTag::ClassComponent
            | WorkTag::Fragment
            | WorkTag::Mode
            | WorkTag::Profiler
            | WorkTag::ContextConsumer
            | WorkTag::ForwardRef
            | WorkTag::MemoComponent
            | WorkTag::SimpleMemoComponent
            | WorkTag::HostPortal
            | WorkTag::LazyComponent
            | WorkTag::Throw => {}
        }

        self.bubble_properties(wip);

        // A hidden subtree's pending work must not keep the root hot; it
        // resurfaces when the subtree is shown again.
        if tag == WorkTag::OffscreenComponent
            && matches!(
                self.fibers[wip].element_type,
                Some(ElementKind::Offscreen { hidden: true })
            )
        {
            self.fibers[wip].child_lanes = Lanes::empty();
        }
        Ok(None)
    }

    fn complete_host_component(&mut self, wip: FiberId) -> Result<(), Thrown> {
        let element_type = match &self.fibers[wip].resolved_type {
            Some(ElementKind::Host(tag)) => tag.clone(),
            _ => panic!("host fiber with wrong kind"),
        };
        let new_props = self.fibers[wip].pending_props.clone();
        let current = self.fibers[wip].alternate;

        let already_mounted = matches!(self.fibers[wip].state_node, StateNode::Instance(_));
        if let (Some(current_id), true) = (current, already_mounted) {
            // Update path: diff props into a commit payload.
            let old_props = self.fibers[current_id]
                .memoized_props
                .clone()
                .unwrap_or_default();
            if !old_props.same(&new_props) {
                let instance = match &self.fibers[wip].state_node {
                    StateNode::Instance(instance) => instance.clone(),
                    _ => unreachable!(),
                };
                let payload =
                    self.host
                        .prepare_update(&instance, &element_type, &old_props, &new_props);
                if let Some(payload) = payload {
                    self.fibers[wip].update_payload = Some(payload);
                    self.fibers[wip].flags |= FiberFlags::UPDATE;
                }
            }
        } else {
            // Mount path: create the instance and attach the finished
            // host children beneath it.
            let host_context = self.host_context_stack.last().cloned().unwrap_or_default();
            let container = self
                .root_container
                .clone()
                .expect("host completion outside a render");
            let instance = self
                .host
                .create_instance(&element_type, &new_props, &container, &host_context)
                .map_err(|error| Thrown::Error(Rc::new(error)))?;
            self.append_all_children(&instance, wip)
                .map_err(|error| Thrown::Error(Rc::new(error)))?;
            self.fibers[wip].state_node = StateNode::Instance(instance.clone());

            if self
                .host
                .finalize_initial_children(&instance, &element_type, &new_props)
            {
                self.fibers[wip].flags |= FiberFlags::UPDATE;
            }
        }

        self.host_context_stack.pop();
        Ok(())
    }

    fn complete_host_text(&mut self, wip: FiberId) -> Result<(), Thrown> {
        let new_text: Rc<str> = self.fibers[wip]
            .pending_props
            .text_content()
            .unwrap_or("")
            .into();
        let current = self.fibers[wip].alternate;

        let already_mounted = matches!(self.fibers[wip].state_node, StateNode::Text(_));
        if let (Some(current_id), true) = (current, already_mounted) {
            let old_text = self.fibers[current_id]
                .memoized_props
                .as_ref()
                .and_then(|props| props.text_content())
                .unwrap_or("");
            if old_text != &*new_text {
                self.fibers[wip].flags |= FiberFlags::UPDATE;
            }
        } else {
            let host_context = self.host_context_stack.last().cloned().unwrap_or_default();
            let container = self
                .root_container
                .clone()
                .expect("host completion outside a render");
            let text_instance = self
                .host
                .create_text_instance(&new_text, &container, &host_context)
                .map_err(|error| Thrown::Error(Rc::new(error)))?;
            self.fibers[wip].state_node = StateNode::Text(text_instance);
        }
        Ok(())
    }

    fn complete_offscreen(&mut self, wip: FiberId) {
        let hidden_now = matches!(
            self.fibers[wip].element_type,
            Some(ElementKind::Offscreen { hidden: true })
        );
        if let Some(current) = self.fibers[wip].alternate {
            let hidden_before = matches!(
                self.fibers[current].element_type,
                Some(ElementKind::Offscreen { hidden: true })
            );
            // Revealing a subtree that never mounted has nothing to toggle;
            // its nodes arrive through ordinary placements.
            let was_mounted = self.fibers[current].child.is_some();
            if hidden_now != hidden_before && (hidden_now || was_mounted) {
                self.fibers[wip].flags |= FiberFlags::VISIBILITY;
            }
        }
    }

    /// Attach every already-created host node in `wip`'s finished subtree
    /// under the fresh `parent` instance. Descends through composite
    /// fibers, stops at host nodes and portals.
    fn append_all_children(
        &mut self,
        parent: &H::Instance,
        wip: FiberId,
    ) -> Result<(), anyhow::Error> {
        let mut node = self.fibers[wip].child;
        while let Some(id) = node {
            let host_node: Option<HostNode<H>> = self.fibers[id].host_node();
            if let Some(host_node) = host_node {
                self.host.append_initial_child(parent, &host_node)?;
            } else if self.fibers[id].tag != WorkTag::HostPortal {
                if let Some(child) = self.fibers[id].child {
                    node = Some(child);
                    continue;
                }
            }

            // Next sibling, ascending as needed.
            let mut cursor = id;
            loop {
                if cursor == wip {
                    return Ok(());
                }
                if let Some(sibling) = self.fibers[cursor].sibling {
                    node = Some(sibling);
                    break;
                }
                match self.fibers[cursor].parent {
                    Some(parent_id) if parent_id != wip => cursor = parent_id,
                    _ => return Ok(()),
                }
            }
        }
        Ok(())
    }

    /// Union every child's flags and lanes into `wip`'s subtree summaries.
    pub(crate) fn bubble_properties(&mut self, wip: FiberId) {
        let mut subtree_flags = FiberFlags::empty();
        let mut child_lanes = Lanes::empty();
        let mut children: Vec<FiberId> = Vec::new();

        let mut child = self.fibers[wip].child;
        while let Some(id) = child {
            let fiber = &self.fibers[id];
            subtree_flags |= fiber.subtree_flags | fiber.flags;
            child_lanes |= fiber.lanes | fiber.child_lanes;
            children.push(id);
            child = fiber.sibling;
        }
        for id in children {
            self.fibers[id].parent = Some(wip);
        }

        let fiber = &mut self.fibers[wip];
        fiber.subtree_flags |= subtree_flags;
        // Assignment, not union: the value copied from the other buffer
        // still carries the lanes this very pass is retiring.
        fiber.child_lanes = child_lanes;
    }

    /// Pop stack state for an incomplete fiber. Returns the fiber itself
    /// when it agreed to capture; rendering restarts there with
    /// `DID_CAPTURE` set.
    pub(crate) fn unwind_work(&mut self, wip: FiberId) -> Option<FiberId> {
        let tag = self.fibers[wip].tag;
        match tag {
            WorkTag::ClassComponent | WorkTag::SuspenseBoundary => {
                if self.capture_if_requested(wip) {
                    return Some(wip);
                }
                None
            }
            WorkTag::HostRoot => {
                self.host_context_stack.pop();
                if self.capture_if_requested(wip) {
                    return Some(wip);
                }
                None
            }
            WorkTag::HostComponent => {
                self.host_context_stack.pop();
                None
            }
            WorkTag::ContextProvider => {
                if let Some(ElementKind::Provider { context, .. }) =
                    self.fibers[wip].element_type.clone()
                {
                    self.context_stack.pop(&context);
                }
                None
            }
            _ => None,
        }
    }

    fn capture_if_requested(&mut self, wip: FiberId) -> bool {
        let fiber = &mut self.fibers[wip];
        if fiber.flags.contains(FiberFlags::SHOULD_CAPTURE) {
            fiber.flags.remove(FiberFlags::SHOULD_CAPTURE | FiberFlags::INCOMPLETE);
            fiber.flags.insert(FiberFlags::DID_CAPTURE);
            // The failed attempt's partial output is dead; the capture
            // pass rebuilds children from the committed tree.
            fiber.subtree_flags = FiberFlags::empty();
            fiber.deletions.clear();
            log::debug!("boundary {:?} captured; re-rendering it", wip);
            true
        } else {
            false
        }
    }
}
