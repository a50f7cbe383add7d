//! Deterministic fixtures for reconciler tests: a manual scheduler with a
//! virtual clock, a host that records every mutation in order and keeps a
//! mirror tree for final-state assertions, and a thenable settled by hand.

use crate::element::{AttrValue, Props};
use crate::host::{CallbackId, HostConfig, HostNode, HostScheduler, Task, TimeoutId};
use crate::lane::{Millis, SchedulerPriority};
use crate::reconciler::Reconciler;
use crate::thenable::{Thenable, ThenableStatus, ThrownError};
use anyhow::Result;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

// === Scheduler ===

struct ScheduledCallback {
    id: u64,
    priority: SchedulerPriority,
    task: Task,
    order: u64,
}

struct ScheduledTimeout {
    id: u64,
    due: Millis,
    task: Task,
}

#[derive(Default)]
struct SchedState {
    now: Millis,
    next_id: u64,
    order: u64,
    microtasks: VecDeque<Task>,
    callbacks: Vec<ScheduledCallback>,
    timeouts: Vec<ScheduledTimeout>,
    /// Scripted answers for `should_yield`; empty means "don't yield".
    yield_script: VecDeque<bool>,
}

/// A hand-cranked scheduler. Nothing runs until the test pops a task and
/// feeds it back to the reconciler.
#[derive(Clone, Default)]
pub(crate) struct ManualScheduler {
    state: Rc<RefCell<SchedState>>,
}

impl ManualScheduler {
    pub fn set_now(&self, now: Millis) {
        self.state.borrow_mut().now = now;
    }

    pub fn advance(&self, delta: Millis) {
        let mut state = self.state.borrow_mut();
        state.now += delta;
        // Due timeouts become ordinary immediate callbacks.
        let now = state.now;
        let (due, keep): (Vec<_>, Vec<_>) =
            state.timeouts.drain(..).partition(|timeout| timeout.due <= now);
        state.timeouts = keep;
        for timeout in due {
            let order = state.order;
            state.order += 1;
            state.callbacks.push(ScheduledCallback {
                id: timeout.id,
                priority: SchedulerPriority::Immediate,
                task: timeout.task,
                order,
            });
        }
    }

    pub fn script_yields(&self, answers: impl IntoIterator<Item = bool>) {
        self.state.borrow_mut().yield_script.extend(answers);
    }

    pub fn pop_microtask(&self) -> Option<Task> {
        self.state.borrow_mut().microtasks.pop_front()
    }

    /// Highest-priority pending callback, earliest first within a level.
    pub fn pop_callback(&self) -> Option<Task> {
        let mut state = self.state.borrow_mut();
        if state.callbacks.is_empty() {
            return None;
        }
        let mut best: Option<usize> = None;
        for (index, callback) in state.callbacks.iter().enumerate() {
            let better = match best {
                None => true,
                Some(current) => {
                    let current = &state.callbacks[current];
                    (callback.priority, callback.order) < (current.priority, current.order)
                }
            };
            if better {
                best = Some(index);
            }
        }
        best.map(|index| state.callbacks.remove(index).task)
    }

    pub fn pending_task_count(&self) -> usize {
        let state = self.state.borrow();
        state.microtasks.len() + state.callbacks.len()
    }

    pub fn pending_timeout_count(&self) -> usize {
        self.state.borrow().timeouts.len()
    }
}

impl HostScheduler for ManualScheduler {
    fn now(&self) -> Millis {
        self.state.borrow().now
    }

    fn should_yield(&self) -> bool {
        self.state
            .borrow_mut()
            .yield_script
            .pop_front()
            .unwrap_or(false)
    }

    fn schedule_microtask(&mut self, task: Task) {
        self.state.borrow_mut().microtasks.push_back(task);
    }

    fn schedule_callback(&mut self, priority: SchedulerPriority, task: Task) -> CallbackId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let order = state.order;
        state.order += 1;
        state.callbacks.push(ScheduledCallback {
            id,
            priority,
            task,
            order,
        });
        CallbackId(id)
    }

    fn cancel_callback(&mut self, id: CallbackId) {
        self.state
            .borrow_mut()
            .callbacks
            .retain(|callback| callback.id != id.0);
    }

    fn schedule_timeout(&mut self, delay: Millis, task: Task) -> TimeoutId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let due = state.now + delay;
        state.timeouts.push(ScheduledTimeout { id, due, task });
        TimeoutId(id)
    }

    fn cancel_timeout(&mut self, id: TimeoutId) {
        self.state
            .borrow_mut()
            .timeouts
            .retain(|timeout| timeout.id != id.0);
    }
}

// === Host ===

/// The trace entry for every host mutation, in call order.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum HostEvent {
    CreateInstance { id: u32, tag: String },
    CreateText { id: u32, text: String },
    AppendInitialChild { parent: u32, child: u32 },
    AppendChild { parent: u32, child: u32 },
    InsertBefore { parent: u32, child: u32, before: u32 },
    RemoveChild { parent: u32, child: u32 },
    AppendToContainer { container: u32, child: u32 },
    InsertInContainerBefore { container: u32, child: u32, before: u32 },
    RemoveFromContainer { container: u32, child: u32 },
    CommitUpdate { id: u32 },
    CommitTextUpdate { id: u32, old: String, new: String },
    PrepareForCommit,
    ResetAfterCommit,
}

#[derive(Clone)]
pub(crate) struct TestInstance {
    pub id: u32,
    pub tag: Rc<str>,
}

#[derive(Clone)]
pub(crate) struct TestTextInstance {
    pub id: u32,
}

#[derive(Default)]
pub(crate) struct HostState {
    next_node_id: u32,
    pub events: Vec<HostEvent>,
    pub container_children: FxHashMap<u32, Vec<u32>>,
    pub children: FxHashMap<u32, Vec<u32>>,
    pub tags: FxHashMap<u32, String>,
    pub attrs: FxHashMap<u32, FxHashMap<String, AttrValue>>,
    pub texts: FxHashMap<u32, String>,
}

impl HostState {
    fn markup_of(&self, node: u32, out: &mut String) {
        if let Some(text) = self.texts.get(&node) {
            out.push_str(text);
            return;
        }
        let tag = self.tags.get(&node).map(String::as_str).unwrap_or("?");
        out.push('<');
        out.push_str(tag);
        if let Some(attrs) = self.attrs.get(&node) {
            let mut names: Vec<&String> = attrs.keys().collect();
            names.sort();
            for name in names {
                out.push(' ');
                out.push_str(name);
                out.push('=');
                match &attrs[name] {
                    AttrValue::Bool(value) => out.push_str(&value.to_string()),
                    AttrValue::Int(value) => out.push_str(&value.to_string()),
                    AttrValue::Float(value) => out.push_str(&value.to_string()),
                    AttrValue::Str(value) => out.push_str(value),
                }
            }
        }
        let children = self.children.get(&node);
        match children {
            Some(children) if !children.is_empty() => {
                out.push('>');
                for child in children {
                    self.markup_of(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
            _ => out.push_str("/>"),
        }
    }
}

/// Records every adapter call and mirrors the host tree.
pub(crate) struct RecordingHost {
    pub state: Rc<RefCell<HostState>>,
    pub scheduler: ManualScheduler,
}

impl RecordingHost {
    pub fn new() -> RecordingHost {
        RecordingHost {
            state: Rc::new(RefCell::new(HostState::default())),
            scheduler: ManualScheduler::default(),
        }
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.state.borrow().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.borrow_mut().events.clear();
    }

    /// Serialized content of a container, for end-state assertions.
    pub fn container_markup(&self, container: u32) -> String {
        let state = self.state.borrow();
        let mut out = String::new();
        if let Some(children) = state.container_children.get(&container) {
            for child in children {
                state.markup_of(*child, &mut out);
            }
        }
        out
    }

    fn node_id(node: &HostNode<RecordingHost>) -> u32 {
        match node {
            HostNode::Instance(instance) => instance.id,
            HostNode::Text(text) => text.id,
        }
    }

    fn attrs_of(props: &Props) -> FxHashMap<String, AttrValue> {
        props
            .attrs()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}

impl HostConfig for RecordingHost {
    type Container = u32;
    type Instance = TestInstance;
    type TextInstance = TestTextInstance;
    type HostContext = ();
    type UpdatePayload = Vec<(String, Option<AttrValue>)>;
    type Scheduler = ManualScheduler;

    fn scheduler(&mut self) -> &mut ManualScheduler {
        &mut self.scheduler
    }

    fn get_root_host_context(&mut self, _container: &u32) {}

    fn get_child_host_context(&mut self, _parent: &(), _element_type: &str) {}

    fn create_instance(
        &mut self,
        element_type: &str,
        props: &Props,
        _container: &u32,
        _host_context: &(),
    ) -> Result<TestInstance> {
        let mut state = self.state.borrow_mut();
        state.next_node_id += 1;
        let id = state.next_node_id;
        state.events.push(HostEvent::CreateInstance {
            id,
            tag: element_type.to_owned(),
        });
        state.tags.insert(id, element_type.to_owned());
        state.attrs.insert(id, Self::attrs_of(props));
        state.children.insert(id, Vec::new());
        Ok(TestInstance {
            id,
            tag: element_type.into(),
        })
    }

    fn create_text_instance(
        &mut self,
        text: &str,
        _container: &u32,
        _host_context: &(),
    ) -> Result<TestTextInstance> {
        let mut state = self.state.borrow_mut();
        state.next_node_id += 1;
        let id = state.next_node_id;
        state.events.push(HostEvent::CreateText {
            id,
            text: text.to_owned(),
        });
        state.texts.insert(id, text.to_owned());
        Ok(TestTextInstance { id })
    }

    fn append_initial_child(
        &mut self,
        parent: &TestInstance,
        child: &HostNode<Self>,
    ) -> Result<()> {
        let child_id = Self::node_id(child);
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::AppendInitialChild {
            parent: parent.id,
            child: child_id,
        });
        state.children.entry(parent.id).or_default().push(child_id);
        Ok(())
    }

    fn finalize_initial_children(
        &mut self,
        _instance: &TestInstance,
        _element_type: &str,
        _props: &Props,
    ) -> bool {
        false
    }

    fn prepare_update(
        &mut self,
        instance: &TestInstance,
        _element_type: &str,
        old_props: &Props,
        new_props: &Props,
    ) -> Option<Vec<(String, Option<AttrValue>)>> {
        let _ = instance;
        let old = Self::attrs_of(old_props);
        let new = Self::attrs_of(new_props);
        let mut diff: Vec<(String, Option<AttrValue>)> = Vec::new();
        for (name, value) in &new {
            if old.get(name) != Some(value) {
                diff.push((name.clone(), Some(value.clone())));
            }
        }
        for name in old.keys() {
            if !new.contains_key(name) {
                diff.push((name.clone(), None));
            }
        }
        if diff.is_empty() {
            None
        } else {
            Some(diff)
        }
    }

    fn commit_update(
        &mut self,
        instance: &TestInstance,
        payload: Vec<(String, Option<AttrValue>)>,
        _element_type: &str,
        _old_props: &Props,
        _new_props: &Props,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::CommitUpdate { id: instance.id });
        let attrs = state.attrs.entry(instance.id).or_default();
        for (name, value) in payload {
            match value {
                Some(value) => {
                    attrs.insert(name, value);
                }
                None => {
                    attrs.remove(&name);
                }
            }
        }
        Ok(())
    }

    fn commit_text_update(
        &mut self,
        text_instance: &TestTextInstance,
        old_text: &str,
        new_text: &str,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::CommitTextUpdate {
            id: text_instance.id,
            old: old_text.to_owned(),
            new: new_text.to_owned(),
        });
        state.texts.insert(text_instance.id, new_text.to_owned());
        Ok(())
    }

    fn append_child(&mut self, parent: &TestInstance, child: &HostNode<Self>) -> Result<()> {
        let child_id = Self::node_id(child);
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::AppendChild {
            parent: parent.id,
            child: child_id,
        });
        let children = state.children.entry(parent.id).or_default();
        children.retain(|id| *id != child_id);
        children.push(child_id);
        Ok(())
    }

    fn insert_before(
        &mut self,
        parent: &TestInstance,
        child: &HostNode<Self>,
        before: &HostNode<Self>,
    ) -> Result<()> {
        let child_id = Self::node_id(child);
        let before_id = Self::node_id(before);
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::InsertBefore {
            parent: parent.id,
            child: child_id,
            before: before_id,
        });
        let children = state.children.entry(parent.id).or_default();
        children.retain(|id| *id != child_id);
        let index = children
            .iter()
            .position(|id| *id == before_id)
            .unwrap_or(children.len());
        children.insert(index, child_id);
        Ok(())
    }

    fn remove_child(&mut self, parent: &TestInstance, child: &HostNode<Self>) -> Result<()> {
        let child_id = Self::node_id(child);
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::RemoveChild {
            parent: parent.id,
            child: child_id,
        });
        if let Some(children) = state.children.get_mut(&parent.id) {
            children.retain(|id| *id != child_id);
        }
        Ok(())
    }

    fn append_child_to_container(&mut self, container: &u32, child: &HostNode<Self>) -> Result<()> {
        let child_id = Self::node_id(child);
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::AppendToContainer {
            container: *container,
            child: child_id,
        });
        let children = state.container_children.entry(*container).or_default();
        children.retain(|id| *id != child_id);
        children.push(child_id);
        Ok(())
    }

    fn insert_in_container_before(
        &mut self,
        container: &u32,
        child: &HostNode<Self>,
        before: &HostNode<Self>,
    ) -> Result<()> {
        let child_id = Self::node_id(child);
        let before_id = Self::node_id(before);
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::InsertInContainerBefore {
            container: *container,
            child: child_id,
            before: before_id,
        });
        let children = state.container_children.entry(*container).or_default();
        children.retain(|id| *id != child_id);
        let index = children
            .iter()
            .position(|id| *id == before_id)
            .unwrap_or(children.len());
        children.insert(index, child_id);
        Ok(())
    }

    fn remove_child_from_container(
        &mut self,
        container: &u32,
        child: &HostNode<Self>,
    ) -> Result<()> {
        let child_id = Self::node_id(child);
        let mut state = self.state.borrow_mut();
        state.events.push(HostEvent::RemoveFromContainer {
            container: *container,
            child: child_id,
        });
        if let Some(children) = state.container_children.get_mut(container) {
            children.retain(|id| *id != child_id);
        }
        Ok(())
    }

    fn prepare_for_commit(&mut self, _container: &u32) {
        self.state.borrow_mut().events.push(HostEvent::PrepareForCommit);
    }

    fn reset_after_commit(&mut self, _container: &u32) {
        self.state.borrow_mut().events.push(HostEvent::ResetAfterCommit);
    }
}

// === Thenable ===

#[derive(Default)]
struct TestThenableState {
    fulfilled: bool,
    rejected: Option<ThrownError>,
    listeners: Vec<Box<dyn FnOnce()>>,
}

/// A thenable the test settles explicitly.
#[derive(Clone, Default)]
pub(crate) struct TestThenable {
    state: Rc<RefCell<TestThenableState>>,
}

impl TestThenable {
    pub fn new() -> TestThenable {
        TestThenable::default()
    }

    pub fn resolve(&self) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            state.fulfilled = true;
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener();
        }
    }

    pub fn reject(&self, error: ThrownError) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            state.rejected = Some(error);
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener();
        }
    }
}

impl Thenable for TestThenable {
    fn status(&self) -> ThenableStatus {
        let state = self.state.borrow();
        if let Some(error) = &state.rejected {
            ThenableStatus::Rejected(error.clone())
        } else if state.fulfilled {
            ThenableStatus::Fulfilled
        } else {
            ThenableStatus::Pending
        }
    }

    fn subscribe(&self, on_settle: Box<dyn FnOnce()>) {
        let mut state = self.state.borrow_mut();
        if state.fulfilled || state.rejected.is_some() {
            drop(state);
            on_settle();
        } else {
            state.listeners.push(on_settle);
        }
    }
}

// === Pump helpers ===

/// Run microtasks and scheduler callbacks to quiescence.
pub(crate) fn pump(reconciler: &mut Reconciler<RecordingHost>) {
    loop {
        let scheduler = reconciler.host().scheduler.clone();
        if let Some(task) = scheduler.pop_microtask() {
            reconciler.run_task(task);
            continue;
        }
        if let Some(task) = scheduler.pop_callback() {
            reconciler.run_task(task);
            continue;
        }
        break;
    }
}

/// Run only queued microtasks; scheduler callbacks stay parked. This is
/// how tests model a busy host that never yields to lower priorities.
pub(crate) fn pump_microtasks(reconciler: &mut Reconciler<RecordingHost>) {
    loop {
        let scheduler = reconciler.host().scheduler.clone();
        match scheduler.pop_microtask() {
            Some(task) => reconciler.run_task(task),
            None => break,
        }
    }
}

/// Advance the virtual clock, promoting due timeouts to callbacks.
pub(crate) fn advance_time(reconciler: &mut Reconciler<RecordingHost>, delta: Millis) {
    let scheduler = reconciler.host().scheduler.clone();
    scheduler.advance(delta);
}

pub(crate) const CONTAINER: u32 = 1;

/// A reconciler over a recording host plus its root, ready to render.
pub(crate) fn test_rig() -> (Reconciler<RecordingHost>, crate::fiber::RootId) {
    let mut reconciler = Reconciler::new(RecordingHost::new());
    let root = reconciler.create_container(
        CONTAINER,
        crate::root::RootTag::Concurrent,
        crate::root::RootOptions::default(),
    );
    (reconciler, root)
}
