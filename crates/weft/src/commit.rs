//! The commit driver: applying a finished tree to the host.
//!
//! Three strictly ordered synchronous subphases walk the finished tree,
//! each skipping any subtree whose bubbled flags show nothing for that
//! phase: before-mutation (snapshots), mutation (placements, updates,
//! deletions, visibility), layout (refs, lifecycles, queued callbacks).
//! The current pointer swaps between mutation and layout, so mutation sees
//! the old tree as committed and layout sees the new one.
//!
//! Host failures during commit are recorded and reported, never allowed to
//! abort the phase; skipping the rest of a commit would orphan siblings.

use crate::element::ElementKind;
use crate::fiber::{FiberFlags, FiberId, RootId, StateNode, WorkTag};
use crate::hooks::{Hook, HookEffectFlags};
use crate::host::{HostConfig, HostNode, HostScheduler, Task};
use crate::lane::{Lanes, SchedulerPriority};
use crate::reconciler::{ExecutionContext, Reconciler};
use crate::thenable::ThrownError;
use std::any::Any;
use std::rc::Rc;

/// Where a placed or removed node attaches on the host side.
enum HostParent<H: HostConfig> {
    Instance(H::Instance),
    Container(H::Container),
}

impl<H: HostConfig> Clone for HostParent<H> {
    fn clone(&self) -> Self {
        match self {
            HostParent::Instance(instance) => HostParent::Instance(instance.clone()),
            HostParent::Container(container) => HostParent::Container(container.clone()),
        }
    }
}

impl<H: HostConfig> Reconciler<H> {
    pub(crate) fn commit_root(&mut self, root_id: RootId, finished: FiberId, lanes: Lanes) {
        if self.is_working() {
            panic!("should not already be working: commit entered reentrantly");
        }
        let previous_context = self.execution_context;
        self.execution_context |= ExecutionContext::COMMIT;

        debug_assert!(
            self.context_stack.is_balanced(),
            "render left context values pushed"
        );

        let recoverable_errors = std::mem::take(&mut self.wip_root_recoverable_errors);
        let mut commit_errors: Vec<ThrownError> = Vec::new();
        let mut deleted_subtrees: Vec<FiberId> = Vec::new();

        // Everything not worked on this pass stays pending, including
        // updates staged mid-render that have not been spliced yet.
        let remaining = self.fibers[finished].lanes
            | self.fibers[finished].child_lanes
            | self.concurrently_updated_lanes;
        self.finish_queueing_concurrent_updates();
        self.roots[root_id].mark_finished(remaining);
        {
            let root = &mut self.roots[root_id];
            root.callback_node = None;
            root.callback_priority = Lanes::empty();
        }

        // This render is done with the shared pass state. Its allocations
        // are now part of the committed tree.
        self.wip_created_fibers.clear();
        self.reset_wip_stack();

        let has_effects = !(self.fibers[finished].flags | self.fibers[finished].subtree_flags)
            .intersection(
                FiberFlags::BEFORE_MUTATION_MASK
                    | FiberFlags::MUTATION_MASK
                    | FiberFlags::LAYOUT_MASK
                    | FiberFlags::PASSIVE_MASK,
            )
            .is_empty();

        let container = self.roots[root_id].container.clone();
        if has_effects {
            self.host.prepare_for_commit(&container);
            self.commit_before_mutation_on(finished);
            self.commit_mutation_on(finished, root_id, &mut commit_errors, &mut deleted_subtrees);
        }

        // The finished tree becomes the committed tree.
        self.roots[root_id].current = finished;
        log::debug!("committed {:?} at {:?}", root_id, lanes);

        if has_effects {
            self.commit_layout_on(finished, &mut commit_errors);
            self.host.reset_after_commit(&container);
        }

        for deleted in deleted_subtrees {
            self.fibers.release_subtree(deleted);
        }

        // Passive effects run later, at normal priority.
        let needs_passive = (self.fibers[finished].flags | self.fibers[finished].subtree_flags)
            .intersects(FiberFlags::PASSIVE_MASK)
            || !self.pending_passive_unmounts.is_empty();
        if needs_passive && self.root_with_pending_passive_effects.is_none() {
            self.root_with_pending_passive_effects = Some(root_id);
            self.host
                .scheduler()
                .schedule_callback(SchedulerPriority::Normal, Task::FlushPassiveEffects);
        }

        self.execution_context = previous_context;

        // Guard against commit-loop livelock: a root that re-enters sync
        // work on every commit eventually trips the update-depth panic.
        // Re-read pending lanes so updates enqueued by layout callbacks
        // count too.
        let remaining = self.roots[root_id].pending_lanes;
        if remaining.intersects(Lanes::SYNC) {
            if self.root_with_nested_updates == Some(root_id) {
                self.nested_update_count += 1;
            } else {
                self.nested_update_count = 1;
                self.root_with_nested_updates = Some(root_id);
            }
        } else {
            self.nested_update_count = 0;
            self.root_with_nested_updates = None;
        }

        let report = self.roots[root_id].on_recoverable_error.clone();
        for error in recoverable_errors.iter().chain(commit_errors.iter()) {
            report(error);
        }

        self.ensure_root_is_scheduled(root_id);
    }

    // === Before mutation ===

    fn commit_before_mutation_on(&mut self, fiber: FiberId) {
        if self.fibers[fiber]
            .subtree_flags
            .intersects(FiberFlags::BEFORE_MUTATION_MASK)
        {
            let mut child = self.fibers[fiber].child;
            while let Some(id) = child {
                child = self.fibers[id].sibling;
                self.commit_before_mutation_on(id);
            }
        }

        if self.fibers[fiber].flags.contains(FiberFlags::SNAPSHOT)
            && self.fibers[fiber].tag == WorkTag::ClassComponent
        {
            let def = match &self.fibers[fiber].resolved_type {
                Some(ElementKind::Class(def)) => def.clone(),
                _ => return,
            };
            let Some(snapshot_fn) = def.get_snapshot_before_update.clone() else {
                return;
            };
            let current = self.fibers[fiber].alternate;
            let (prev_state, prev_props) = match current {
                Some(current) => (
                    self.fibers[current].memoized_state.clone().unwrap_or_default(),
                    self.fibers[current].memoized_props.clone().unwrap_or_default(),
                ),
                None => return,
            };
            if let Some(instance) = self.fibers[fiber].class_instance() {
                let snapshot = snapshot_fn(&prev_state, &prev_props);
                instance.borrow_mut().snapshot = Some(snapshot);
            }
        }
    }

    // === Mutation ===

    fn commit_mutation_on(
        &mut self,
        fiber: FiberId,
        root_id: RootId,
        errors: &mut Vec<ThrownError>,
        deleted: &mut Vec<FiberId>,
    ) {
        let deletions = std::mem::take(&mut self.fibers[fiber].deletions);
        for child in deletions {
            self.commit_deletion(fiber, child, errors);
            deleted.push(child);
        }

        if self.fibers[fiber]
            .subtree_flags
            .intersects(FiberFlags::MUTATION_MASK)
        {
            let mut child = self.fibers[fiber].child;
            while let Some(id) = child {
                child = self.fibers[id].sibling;
                self.commit_mutation_on(id, root_id, errors, deleted);
            }
        }

        let flags = self.fibers[fiber].flags;

        if flags.contains(FiberFlags::REF) {
            if let Some(current) = self.fibers[fiber].alternate {
                self.detach_ref(current);
            }
        }

        if flags.contains(FiberFlags::CONTENT_RESET) {
            if let StateNode::Instance(instance) = &self.fibers[fiber].state_node {
                let instance = instance.clone();
                if let Err(error) = self.host.reset_text_content(&instance) {
                    self.record_commit_error(errors, error);
                }
            }
        }

        if flags.contains(FiberFlags::PLACEMENT) {
            self.commit_placement(fiber, errors);
            self.fibers[fiber].flags.remove(FiberFlags::PLACEMENT);
        }

        match self.fibers[fiber].tag {
            WorkTag::HostComponent => {
                if flags.contains(FiberFlags::UPDATE) {
                    self.commit_host_update(fiber, errors);
                }
            }
            WorkTag::HostText => {
                if flags.contains(FiberFlags::UPDATE) {
                    self.commit_text_update_on(fiber, errors);
                }
            }
            WorkTag::FunctionComponent
            | WorkTag::SimpleMemoComponent
            | WorkTag::ForwardRef => {
                if flags.contains(FiberFlags::UPDATE) {
                    // Layout effect cleanups run before the new layout
                    // effects fire.
                    self.run_effect_unmounts(fiber, HookEffectFlags::LAYOUT);
                }
            }
            WorkTag::SuspenseBoundary => {
                if flags.contains(FiberFlags::UPDATE) {
                    self.attach_suspense_retry_listeners(fiber, root_id);
                }
            }
            WorkTag::OffscreenComponent => {
                if flags.contains(FiberFlags::VISIBILITY) {
                    self.commit_visibility_toggle(fiber, errors);
                }
            }
            _ => {}
        }
    }

    fn commit_host_update(&mut self, fiber: FiberId, errors: &mut Vec<ThrownError>) {
        let element_type = match &self.fibers[fiber].resolved_type {
            Some(ElementKind::Host(tag)) => tag.clone(),
            _ => return,
        };
        let Some(payload) = self.fibers[fiber].update_payload.take() else {
            return;
        };
        let StateNode::Instance(instance) = &self.fibers[fiber].state_node else {
            return;
        };
        let instance = instance.clone();
        let new_props = self.fibers[fiber]
            .memoized_props
            .clone()
            .unwrap_or_default();
        let old_props = self.fibers[fiber]
            .alternate
            .and_then(|current| self.fibers[current].memoized_props.clone())
            .unwrap_or_default();
        if let Err(error) =
            self.host
                .commit_update(&instance, payload, &element_type, &old_props, &new_props)
        {
            self.record_commit_error(errors, error);
        }
    }

    fn commit_text_update_on(&mut self, fiber: FiberId, errors: &mut Vec<ThrownError>) {
        let StateNode::Text(text_instance) = &self.fibers[fiber].state_node else {
            return;
        };
        let text_instance = text_instance.clone();
        let new_text = self.fibers[fiber]
            .memoized_props
            .as_ref()
            .and_then(|props| props.text_content())
            .unwrap_or("")
            .to_owned();
        let old_text = self.fibers[fiber]
            .alternate
            .and_then(|current| {
                self.fibers[current]
                    .memoized_props
                    .as_ref()
                    .and_then(|props| props.text_content())
                    .map(str::to_owned)
            })
            .unwrap_or_default();
        if let Err(error) = self
            .host
            .commit_text_update(&text_instance, &old_text, &new_text)
        {
            self.record_commit_error(errors, error);
        }
    }

    // === Placement ===

    fn commit_placement(&mut self, fiber: FiberId, errors: &mut Vec<ThrownError>) {
        let Some(parent) = self.host_parent_of(fiber) else {
            log::error!("placed fiber {:?} has no host parent", fiber);
            return;
        };
        let before = self.host_sibling_of(fiber);
        self.insert_or_append_placement_node(fiber, &parent, before.as_ref(), errors);
    }

    fn host_parent_of(&self, fiber: FiberId) -> Option<HostParent<H>> {
        let mut node = self.fibers[fiber].parent;
        while let Some(id) = node {
            match self.fibers[id].tag {
                WorkTag::HostComponent => {
                    if let StateNode::Instance(instance) = &self.fibers[id].state_node {
                        return Some(HostParent::Instance(instance.clone()));
                    }
                }
                WorkTag::HostRoot => {
                    if let StateNode::Root(root_id) = self.fibers[id].state_node {
                        return Some(HostParent::Container(self.roots[root_id].container.clone()));
                    }
                }
                WorkTag::HostPortal => {
                    return self.portal_container_of(id).map(HostParent::Container);
                }
                _ => {}
            }
            node = self.fibers[id].parent;
        }
        None
    }

    fn portal_container_of(&self, portal: FiberId) -> Option<H::Container> {
        let def = match &self.fibers[portal].element_type {
            Some(ElementKind::Portal(def)) => def.clone(),
            _ => return None,
        };
        match def.container.downcast_ref::<H::Container>() {
            Some(container) => Some(container.clone()),
            None => {
                log::error!("portal container has the wrong type for this host");
                None
            }
        }
    }

    /// The committed host node this fiber's nodes must be inserted before,
    /// if any. Skips fibers that are themselves being placed: their
    /// position is not trustworthy yet.
    fn host_sibling_of(&self, fiber: FiberId) -> Option<HostNode<H>> {
        let mut node = fiber;
        'siblings: loop {
            while self.fibers[node].sibling.is_none() {
                let parent = self.fibers[node].parent;
                match parent {
                    None => return None,
                    Some(parent_id) => {
                        if self.fibers[parent_id].is_host_parent() {
                            return None;
                        }
                        node = parent_id;
                    }
                }
            }
            node = self.fibers[node].sibling.expect("checked above");

            while !matches!(
                self.fibers[node].tag,
                WorkTag::HostComponent | WorkTag::HostText
            ) {
                let fiber = &self.fibers[node];
                if fiber.flags.contains(FiberFlags::PLACEMENT)
                    || fiber.tag == WorkTag::HostPortal
                {
                    continue 'siblings;
                }
                match fiber.child {
                    None => continue 'siblings,
                    Some(child) => node = child,
                }
            }

            if !self.fibers[node].flags.contains(FiberFlags::PLACEMENT) {
                return self.fibers[node].host_node();
            }
        }
    }

    fn insert_or_append_placement_node(
        &mut self,
        fiber: FiberId,
        parent: &HostParent<H>,
        before: Option<&HostNode<H>>,
        errors: &mut Vec<ThrownError>,
    ) {
        if let Some(host_node) = self.fibers[fiber].host_node() {
            let result = match (parent, before) {
                (HostParent::Instance(parent), Some(before)) => {
                    self.host.insert_before(parent, &host_node, before)
                }
                (HostParent::Instance(parent), None) => {
                    self.host.append_child(parent, &host_node)
                }
                (HostParent::Container(container), Some(before)) => {
                    self.host
                        .insert_in_container_before(container, &host_node, before)
                }
                (HostParent::Container(container), None) => {
                    self.host.append_child_to_container(container, &host_node)
                }
            };
            if let Err(error) = result {
                self.record_commit_error(errors, error);
            }
            return;
        }
        if self.fibers[fiber].tag == WorkTag::HostPortal {
            // A portal's children were placed against the portal container
            // by their own effects.
            return;
        }
        let mut child = self.fibers[fiber].child;
        while let Some(id) = child {
            self.insert_or_append_placement_node(id, parent, before, errors);
            child = self.fibers[id].sibling;
        }
    }

    // === Deletion ===

    fn commit_deletion(
        &mut self,
        parent_fiber: FiberId,
        deleted: FiberId,
        errors: &mut Vec<ThrownError>,
    ) {
        let host_parent = self.host_parent_for_deletion(parent_fiber);
        self.delete_subtree(deleted, host_parent, errors);
    }

    /// Nearest host parent at or above `fiber` in the finished tree.
    fn host_parent_for_deletion(&self, fiber: FiberId) -> Option<HostParent<H>> {
        let mut node = Some(fiber);
        while let Some(id) = node {
            match self.fibers[id].tag {
                WorkTag::HostComponent => {
                    if let StateNode::Instance(instance) = &self.fibers[id].state_node {
                        return Some(HostParent::Instance(instance.clone()));
                    }
                }
                WorkTag::HostRoot => {
                    if let StateNode::Root(root_id) = self.fibers[id].state_node {
                        return Some(HostParent::Container(self.roots[root_id].container.clone()));
                    }
                }
                WorkTag::HostPortal => {
                    return self.portal_container_of(id).map(HostParent::Container);
                }
                _ => {}
            }
            node = self.fibers[id].parent;
        }
        None
    }

    fn delete_subtree(
        &mut self,
        fiber: FiberId,
        host_parent: Option<HostParent<H>>,
        errors: &mut Vec<ThrownError>,
    ) {
        let tag = self.fibers[fiber].tag;
        match tag {
            WorkTag::HostComponent | WorkTag::HostText => {
                self.detach_ref(fiber);
                // Unmount lifecycles below this node still run, but only
                // the topmost host node of the subtree is detached.
                let child = self.fibers[fiber].child;
                let mut cursor = child;
                while let Some(id) = cursor {
                    cursor = self.fibers[id].sibling;
                    self.delete_subtree(id, None, errors);
                }
                if let (Some(parent), Some(node)) = (host_parent, self.fibers[fiber].host_node()) {
                    let result = match &parent {
                        HostParent::Instance(parent) => self.host.remove_child(parent, &node),
                        HostParent::Container(container) => {
                            self.host.remove_child_from_container(container, &node)
                        }
                    };
                    if let Err(error) = result {
                        self.record_commit_error(errors, error);
                    }
                }
                return;
            }
            WorkTag::ClassComponent => {
                self.detach_ref(fiber);
                let def = match &self.fibers[fiber].resolved_type {
                    Some(ElementKind::Class(def)) => Some(def.clone()),
                    _ => None,
                };
                if let Some(will_unmount) = def.and_then(|def| def.will_unmount.clone()) {
                    will_unmount();
                }
            }
            WorkTag::FunctionComponent
            | WorkTag::SimpleMemoComponent
            | WorkTag::ForwardRef => {
                // Layout cleanups are synchronous with the removal; passive
                // cleanups run in the deferred passive pass.
                self.run_effect_unmounts(fiber, HookEffectFlags::LAYOUT);
                for hook in &self.fibers[fiber].hooks {
                    if let Hook::Effect(effect) = hook {
                        if effect.flags.contains(HookEffectFlags::PASSIVE) {
                            self.pending_passive_unmounts.push(effect.destroy.clone());
                        }
                    }
                }
            }
            WorkTag::HostPortal => {
                let container = self.portal_container_of(fiber).map(HostParent::Container);
                let mut cursor = self.fibers[fiber].child;
                while let Some(id) = cursor {
                    cursor = self.fibers[id].sibling;
                    self.delete_subtree(id, container.clone(), errors);
                }
                return;
            }
            _ => {}
        }

        let mut cursor = self.fibers[fiber].child;
        while let Some(id) = cursor {
            cursor = self.fibers[id].sibling;
            self.delete_subtree(id, host_parent.clone(), errors);
        }
    }

    // === Visibility (suspense fallback swap) ===

    fn commit_visibility_toggle(&mut self, fiber: FiberId, errors: &mut Vec<ThrownError>) {
        let hidden = matches!(
            self.fibers[fiber].element_type,
            Some(ElementKind::Offscreen { hidden: true })
        );
        let Some(parent) = self.host_parent_of(fiber) else {
            return;
        };

        let mut top_nodes: Vec<FiberId> = Vec::new();
        self.collect_top_host_nodes(fiber, &mut top_nodes);

        if hidden {
            for id in top_nodes {
                if let Some(node) = self.fibers[id].host_node() {
                    let result = match &parent {
                        HostParent::Instance(parent) => self.host.remove_child(parent, &node),
                        HostParent::Container(container) => {
                            self.host.remove_child_from_container(container, &node)
                        }
                    };
                    if let Err(error) = result {
                        self.record_commit_error(errors, error);
                    }
                }
            }
        } else {
            let before = self.host_sibling_of(fiber);
            for id in top_nodes {
                if let Some(node) = self.fibers[id].host_node() {
                    let result = match (&parent, before.as_ref()) {
                        (HostParent::Instance(parent), Some(before)) => {
                            self.host.insert_before(parent, &node, before)
                        }
                        (HostParent::Instance(parent), None) => {
                            self.host.append_child(parent, &node)
                        }
                        (HostParent::Container(container), Some(before)) => {
                            self.host.insert_in_container_before(container, &node, before)
                        }
                        (HostParent::Container(container), None) => {
                            self.host.append_child_to_container(container, &node)
                        }
                    };
                    if let Err(error) = result {
                        self.record_commit_error(errors, error);
                    }
                }
            }
        }
    }

    /// Topmost host nodes inside `fiber`'s subtree, in tree order.
    fn collect_top_host_nodes(&self, fiber: FiberId, out: &mut Vec<FiberId>) {
        let mut cursor = self.fibers[fiber].child;
        while let Some(id) = cursor {
            match self.fibers[id].tag {
                WorkTag::HostComponent | WorkTag::HostText => out.push(id),
                WorkTag::HostPortal => {}
                _ => self.collect_top_host_nodes(id, out),
            }
            cursor = self.fibers[id].sibling;
        }
    }

    // === Suspense retries ===

    fn attach_suspense_retry_listeners(&mut self, boundary: FiberId, root_id: RootId) {
        let wakeables = std::mem::take(&mut self.fibers[boundary].retry_queue);
        for thenable in wakeables {
            let lane = self.claim_retry_lane();
            log::trace!(
                "boundary {:?} waiting on data; retry armed at {:?}",
                boundary,
                lane
            );
            self.attach_ping_listener(thenable, root_id, lane, Some(boundary));
        }
    }

    // === Refs ===

    fn detach_ref(&mut self, fiber: FiberId) {
        let Some(ref_) = self.fibers[fiber].ref_.clone() else {
            return;
        };
        let cleanup = self.fibers[fiber].ref_cleanup.borrow_mut().take();
        match cleanup {
            Some(cleanup) => cleanup(),
            None => match ref_ {
                crate::element::Ref::Cell(cell) => {
                    *cell.borrow_mut() = None;
                }
                crate::element::Ref::Callback(callback) => {
                    callback(None);
                }
            },
        }
    }

    fn attach_ref(&mut self, fiber: FiberId) {
        let Some(ref_) = self.fibers[fiber].ref_.clone() else {
            return;
        };
        let handle: Box<dyn Any> = match &self.fibers[fiber].state_node {
            StateNode::Instance(instance) => Box::new(instance.clone()),
            StateNode::Text(text) => Box::new(text.clone()),
            StateNode::Class(instance) => Box::new(instance.clone()),
            _ => return,
        };
        match ref_ {
            crate::element::Ref::Cell(cell) => {
                *cell.borrow_mut() = Some(handle);
            }
            crate::element::Ref::Callback(callback) => {
                let cleanup = callback(Some(handle.as_ref()));
                *self.fibers[fiber].ref_cleanup.borrow_mut() = cleanup;
            }
        }
    }

    // === Layout ===

    fn commit_layout_on(&mut self, fiber: FiberId, errors: &mut Vec<ThrownError>) {
        if self.fibers[fiber]
            .subtree_flags
            .intersects(FiberFlags::LAYOUT_MASK)
        {
            let mut child = self.fibers[fiber].child;
            while let Some(id) = child {
                child = self.fibers[id].sibling;
                self.commit_layout_on(id, errors);
            }
        }

        let flags = self.fibers[fiber].flags;
        let tag = self.fibers[fiber].tag;

        if flags.contains(FiberFlags::UPDATE) {
            match tag {
                WorkTag::ClassComponent => self.commit_class_lifecycles(fiber),
                WorkTag::FunctionComponent
                | WorkTag::SimpleMemoComponent
                | WorkTag::ForwardRef => {
                    self.run_effect_mounts(fiber, HookEffectFlags::LAYOUT);
                }
                WorkTag::HostComponent => {
                    // Mount notification requested by the host when the
                    // instance was finalized.
                    if self.fibers[fiber].alternate.is_none() {
                        if let (Some(ElementKind::Host(element_type)), StateNode::Instance(instance)) = (
                            self.fibers[fiber].resolved_type.clone(),
                            &self.fibers[fiber].state_node,
                        ) {
                            let instance = instance.clone();
                            let props = self.fibers[fiber]
                                .memoized_props
                                .clone()
                                .unwrap_or_default();
                            if let Err(error) =
                                self.host.commit_mount(&instance, &element_type, &props)
                            {
                                self.record_commit_error(errors, error);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if flags.contains(FiberFlags::CALLBACK)
            && matches!(tag, WorkTag::ClassComponent | WorkTag::HostRoot)
        {
            let callbacks = match self.fibers[fiber].update_queue.as_mut() {
                Some(queue) => std::mem::take(&mut queue.callbacks),
                None => Vec::new(),
            };
            for callback in callbacks {
                callback();
            }
        }

        if flags.contains(FiberFlags::REF) {
            self.attach_ref(fiber);
        }
    }

    fn commit_class_lifecycles(&mut self, fiber: FiberId) {
        let def = match &self.fibers[fiber].resolved_type {
            Some(ElementKind::Class(def)) => def.clone(),
            _ => return,
        };
        match self.fibers[fiber].alternate {
            None => {
                if let Some(did_mount) = def.did_mount.clone() {
                    did_mount();
                }
            }
            Some(_) => {
                if let Some(did_update) = def.did_update.clone() {
                    let snapshot = self.fibers[fiber]
                        .class_instance()
                        .and_then(|instance| instance.borrow_mut().snapshot.take());
                    did_update(snapshot.as_ref());
                }
            }
        }
    }

    // === Hook effects ===

    fn run_effect_unmounts(&mut self, fiber: FiberId, phase: HookEffectFlags) {
        let destroys: Vec<_> = self.fibers[fiber]
            .hooks
            .iter()
            .filter_map(|hook| match hook {
                Hook::Effect(effect)
                    if effect.flags.contains(phase | HookEffectFlags::HAS_EFFECT) =>
                {
                    Some(effect.destroy.clone())
                }
                _ => None,
            })
            .collect();
        for destroy in destroys {
            if let Some(cleanup) = destroy.borrow_mut().take() {
                cleanup();
            }
        }
    }

    fn run_effect_mounts(&mut self, fiber: FiberId, phase: HookEffectFlags) {
        let effects: Vec<_> = self.fibers[fiber]
            .hooks
            .iter()
            .filter_map(|hook| match hook {
                Hook::Effect(effect)
                    if effect.flags.contains(phase | HookEffectFlags::HAS_EFFECT) =>
                {
                    Some((effect.create.clone(), effect.destroy.clone()))
                }
                _ => None,
            })
            .collect();
        for (create, destroy) in effects {
            let body = create.borrow_mut().take();
            if let Some(body) = body {
                *destroy.borrow_mut() = body();
            }
        }
    }

    // === Passive phase ===

    /// Run deferred passive effects: cleanups for everything unmounted or
    /// re-fired, then the new effect bodies, each pass in commit
    /// post-order. Returns whether anything ran.
    pub fn flush_passive_effects(&mut self) -> bool {
        let Some(root_id) = self.root_with_pending_passive_effects.take() else {
            return false;
        };
        if !self.roots.contains_key(root_id) {
            return false;
        }
        let previous_context = self.execution_context;
        self.execution_context |= ExecutionContext::COMMIT;
        log::debug!("flushing passive effects for {:?}", root_id);

        for destroy in std::mem::take(&mut self.pending_passive_unmounts) {
            if let Some(cleanup) = destroy.borrow_mut().take() {
                cleanup();
            }
        }

        let current = self.roots[root_id].current;
        self.passive_unmount_on(current);
        self.passive_mount_on(current);

        self.execution_context = previous_context;
        self.flush_sync_work_across_roots();
        true
    }

    fn passive_unmount_on(&mut self, fiber: FiberId) {
        if self.fibers[fiber]
            .subtree_flags
            .intersects(FiberFlags::PASSIVE_MASK)
        {
            let mut child = self.fibers[fiber].child;
            while let Some(id) = child {
                child = self.fibers[id].sibling;
                self.passive_unmount_on(id);
            }
        }
        if self.fibers[fiber].flags.contains(FiberFlags::PASSIVE) {
            self.run_effect_unmounts(fiber, HookEffectFlags::PASSIVE);
        }
    }

    fn passive_mount_on(&mut self, fiber: FiberId) {
        if self.fibers[fiber]
            .subtree_flags
            .intersects(FiberFlags::PASSIVE_MASK)
        {
            let mut child = self.fibers[fiber].child;
            while let Some(id) = child {
                child = self.fibers[id].sibling;
                self.passive_mount_on(id);
            }
        }
        if self.fibers[fiber].flags.contains(FiberFlags::PASSIVE) {
            self.run_effect_mounts(fiber, HookEffectFlags::PASSIVE);
        }
    }

    fn record_commit_error(&mut self, errors: &mut Vec<ThrownError>, error: anyhow::Error) {
        log::error!("host mutation failed during commit: {error:#}");
        errors.push(Rc::new(error));
    }
}
