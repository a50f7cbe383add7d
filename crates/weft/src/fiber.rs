//! The fiber tree: persistent nodes, effect flags, and the double buffer.
//!
//! Two trees coexist at all times. The current tree matches what the host
//! shows; the work-in-progress tree is built against it during render and
//! replaces it atomically at commit. Nodes pair up across the trees through
//! `alternate` links, and an aborted render costs nothing beyond abandoning
//! the work-in-progress side.
//!
//! Fibers live in a slotmap arena owned by the reconciler. Every tree link
//! is an arena key, never an owning pointer, which keeps the cyclic
//! parent/child/alternate structure trivially droppable.

use crate::context::Dependencies;
use crate::element::{Element, ElementKind, Props, Record, Ref};
use crate::hooks::Hook;
use crate::host::HostConfig;
use crate::lane::Lanes;
use crate::thenable::Thenable;
use crate::update_queue::UpdateQueue;
use bitflags::bitflags;
use slotmap::SlotMap;
use std::cell::RefCell;
use std::rc::Rc;

slotmap::new_key_type! {
    /// Arena key of a fiber.
    pub struct FiberId;
    /// Arena key of a root container record.
    pub struct RootId;
}

bitflags! {
    /// Side effects recorded during render and applied at commit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FiberFlags: u32 {
        /// Insert this fiber's host nodes (new or moved).
        const PLACEMENT = 1 << 0;
        /// Patch host attributes/text, or run an update lifecycle.
        const UPDATE = 1 << 1;
        /// One or more children were removed; see `deletions`.
        const CHILD_DELETION = 1 << 2;
        /// Direct text content must be cleared before children commit.
        const CONTENT_RESET = 1 << 3;
        /// Commit-time callbacks are queued on the update queue.
        const CALLBACK = 1 << 4;
        /// A boundary captured a throw and is rendering its recovery pass.
        const DID_CAPTURE = 1 << 5;
        /// Discard server markup and render from scratch on the client.
        const FORCE_CLIENT_RENDER = 1 << 6;
        /// Attach or re-attach the ref in the layout phase.
        const REF = 1 << 7;
        /// Read host state before mutation (snapshot lifecycle).
        const SNAPSHOT = 1 << 8;
        /// Passive effects to run after paint.
        const PASSIVE = 1 << 9;
        const HYDRATING = 1 << 10;
        /// Subtree visibility toggled (suspense fallback swap).
        const VISIBILITY = 1 << 11;
        const FORM_RESET = 1 << 12;

        // === Render-phase bookkeeping, never committed ===

        /// This fiber threw and is being unwound.
        const INCOMPLETE = 1 << 13;
        /// The nearest boundary should capture on the way up.
        const SHOULD_CAPTURE = 1 << 14;

        // === Static bits, persist across clones ===

        const REF_STATIC = 1 << 20;
        const LAYOUT_STATIC = 1 << 21;
        const PASSIVE_STATIC = 1 << 22;

        const STATIC_MASK =
            Self::REF_STATIC.bits() | Self::LAYOUT_STATIC.bits() | Self::PASSIVE_STATIC.bits();

        // === Phase masks ===

        const BEFORE_MUTATION_MASK = Self::SNAPSHOT.bits();

        const MUTATION_MASK = Self::PLACEMENT.bits()
            | Self::UPDATE.bits()
            | Self::CHILD_DELETION.bits()
            | Self::CONTENT_RESET.bits()
            | Self::REF.bits()
            | Self::HYDRATING.bits()
            | Self::VISIBILITY.bits()
            | Self::FORM_RESET.bits();

        const LAYOUT_MASK = Self::UPDATE.bits()
            | Self::CALLBACK.bits()
            | Self::REF.bits()
            | Self::VISIBILITY.bits();

        const PASSIVE_MASK =
            Self::PASSIVE.bits() | Self::VISIBILITY.bits() | Self::CHILD_DELETION.bits();
    }
}

bitflags! {
    /// Rendering modes inherited down the tree from the root.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FiberMode: u8 {
        const CONCURRENT = 1 << 0;
        const STRICT = 1 << 1;
    }
}

/// Variant discriminator for begin/complete dispatch. The set is closed;
/// every handler matches exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkTag {
    FunctionComponent,
    ClassComponent,
    HostRoot,
    HostComponent,
    HostText,
    Fragment,
    Mode,
    Profiler,
    ContextProvider,
    ContextConsumer,
    ForwardRef,
    MemoComponent,
    SimpleMemoComponent,
    SuspenseBoundary,
    OffscreenComponent,
    HostPortal,
    LazyComponent,
    Throw,
}

/// Mutable state of a class-like component instance, shared by both
/// buffers' fibers.
pub struct ClassInstance {
    pub state: Record,
    pub props: Props,
    /// Value produced by the snapshot lifecycle just before mutation.
    pub snapshot: Option<crate::element::Value>,
}

/// Owned handle to whatever a fiber stands for on the host side.
pub enum StateNode<H: HostConfig> {
    None,
    Root(RootId),
    Instance(H::Instance),
    Text(H::TextInstance),
    Class(Rc<RefCell<ClassInstance>>),
}

impl<H: HostConfig> Clone for StateNode<H> {
    fn clone(&self) -> Self {
        match self {
            StateNode::None => StateNode::None,
            StateNode::Root(root) => StateNode::Root(*root),
            StateNode::Instance(instance) => StateNode::Instance(instance.clone()),
            StateNode::Text(text) => StateNode::Text(text.clone()),
            StateNode::Class(instance) => StateNode::Class(instance.clone()),
        }
    }
}

/// Shared slot holding the cleanup returned by the last ref attach.
pub type RefCleanup = Rc<RefCell<Option<Box<dyn FnOnce()>>>>;

/// A node in the reconciler's working representation of the UI.
pub struct Fiber<H: HostConfig> {
    pub tag: WorkTag,
    pub key: Option<Rc<str>>,
    /// The kind as written in the descriptor, before memo/lazy unwrapping.
    pub element_type: Option<ElementKind>,
    /// The kind actually rendered, after unwrapping.
    pub resolved_type: Option<ElementKind>,
    pub mode: FiberMode,
    pub state_node: StateNode<H>,

    pub pending_props: Props,
    pub memoized_props: Option<Props>,
    /// Class and root state record.
    pub memoized_state: Option<Record>,
    /// Hook cells of a function component, in call order.
    pub hooks: Vec<Hook>,
    pub update_queue: Option<UpdateQueue>,
    /// Host prop diff computed in complete, consumed by the commit.
    pub update_payload: Option<H::UpdatePayload>,
    pub dependencies: Option<Dependencies>,

    /// True on a suspense boundary currently showing its fallback.
    pub showing_fallback: bool,
    /// Thenables whose settlement should retry this suspense boundary.
    pub retry_queue: Vec<Rc<dyn Thenable>>,

    pub flags: FiberFlags,
    pub subtree_flags: FiberFlags,
    /// Current-tree children removed this render, pending host deletion.
    pub deletions: Vec<FiberId>,

    pub lanes: Lanes,
    pub child_lanes: Lanes,

    pub parent: Option<FiberId>,
    pub child: Option<FiberId>,
    pub sibling: Option<FiberId>,
    pub index: u32,
    pub alternate: Option<FiberId>,

    pub ref_: Option<Ref>,
    pub ref_cleanup: RefCleanup,
}

impl<H: HostConfig> Fiber<H> {
    pub fn new(tag: WorkTag, pending_props: Props, key: Option<Rc<str>>, mode: FiberMode) -> Self {
        Fiber {
            tag,
            key,
            element_type: None,
            resolved_type: None,
            mode,
            state_node: StateNode::None,
            pending_props,
            memoized_props: None,
            memoized_state: None,
            hooks: Vec::new(),
            update_queue: None,
            update_payload: None,
            dependencies: None,
            showing_fallback: false,
            retry_queue: Vec::new(),
            flags: FiberFlags::empty(),
            subtree_flags: FiberFlags::empty(),
            deletions: Vec::new(),
            lanes: Lanes::empty(),
            child_lanes: Lanes::empty(),
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            alternate: None,
            ref_: None,
            ref_cleanup: Rc::new(RefCell::new(None)),
        }
    }

    /// The committed host node this fiber owns, if it is a host fiber.
    pub fn host_node(&self) -> Option<crate::host::HostNode<H>> {
        match &self.state_node {
            StateNode::Instance(instance) => {
                Some(crate::host::HostNode::Instance(instance.clone()))
            }
            StateNode::Text(text) => Some(crate::host::HostNode::Text(text.clone())),
            _ => None,
        }
    }

    pub fn class_instance(&self) -> Option<Rc<RefCell<ClassInstance>>> {
        match &self.state_node {
            StateNode::Class(instance) => Some(instance.clone()),
            _ => None,
        }
    }

    pub fn is_host_parent(&self) -> bool {
        matches!(
            self.tag,
            WorkTag::HostComponent | WorkTag::HostRoot | WorkTag::HostPortal
        )
    }
}

/// Maps a descriptor kind onto its work tag. Memo components start as
/// `MemoComponent` and may be retagged `SimpleMemoComponent` on first begin.
pub fn tag_for_kind(kind: &ElementKind) -> WorkTag {
    match kind {
        ElementKind::Host(_) => WorkTag::HostComponent,
        ElementKind::Text => WorkTag::HostText,
        ElementKind::Component(_) => WorkTag::FunctionComponent,
        ElementKind::Class(_) => WorkTag::ClassComponent,
        ElementKind::Fragment => WorkTag::Fragment,
        ElementKind::StrictMode => WorkTag::Mode,
        ElementKind::Profiler(_) => WorkTag::Profiler,
        ElementKind::Provider { .. } => WorkTag::ContextProvider,
        ElementKind::Consumer { .. } => WorkTag::ContextConsumer,
        ElementKind::Memo(_) => WorkTag::MemoComponent,
        ElementKind::ForwardRef(_) => WorkTag::ForwardRef,
        ElementKind::Suspense { .. } => WorkTag::SuspenseBoundary,
        ElementKind::Offscreen { .. } => WorkTag::OffscreenComponent,
        ElementKind::Portal(_) => WorkTag::HostPortal,
        ElementKind::Lazy(_) => WorkTag::LazyComponent,
        ElementKind::Throw(_) => WorkTag::Throw,
    }
}

/// Storage for every fiber of every root managed by one reconciler.
pub struct FiberArena<H: HostConfig> {
    fibers: SlotMap<FiberId, Fiber<H>>,
}

impl<H: HostConfig> Default for FiberArena<H> {
    fn default() -> Self {
        FiberArena {
            fibers: SlotMap::with_key(),
        }
    }
}

impl<H: HostConfig> FiberArena<H> {
    pub fn insert(&mut self, fiber: Fiber<H>) -> FiberId {
        self.fibers.insert(fiber)
    }

    pub fn get(&self, id: FiberId) -> Option<&Fiber<H>> {
        self.fibers.get(id)
    }

    pub fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<H>> {
        self.fibers.get_mut(id)
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    /// Build a fresh fiber for a descriptor.
    pub fn create_fiber_from_element(&mut self, element: &Element, mode: FiberMode) -> FiberId {
        let tag = tag_for_kind(&element.kind);
        let mut fiber = Fiber::new(tag, element.props.clone(), element.key.clone(), mode);
        fiber.element_type = Some(element.kind.clone());
        fiber.resolved_type = Some(element.kind.clone());
        fiber.ref_ = element.ref_.clone();
        self.insert(fiber)
    }

    /// Prepare (or reuse) the other-buffer twin of `current` for a new
    /// render pass.
    ///
    /// The twin is allocated at most once; afterwards the same pair of slots
    /// flips back and forth, which is what bounds live fibers at twice the
    /// committed tree.
    pub fn create_work_in_progress(&mut self, current_id: FiberId, pending_props: Props) -> FiberId {
        let current = &self.fibers[current_id];
        let wip_id = match current.alternate {
            None => {
                let mut wip = Fiber::new(
                    current.tag,
                    pending_props,
                    current.key.clone(),
                    current.mode,
                );
                wip.element_type = current.element_type.clone();
                wip.resolved_type = current.resolved_type.clone();
                wip.state_node = current.state_node.clone();
                wip.flags = current.flags & FiberFlags::STATIC_MASK;
                wip.ref_cleanup = current.ref_cleanup.clone();
                let wip_id = self.insert(wip);
                self.fibers[wip_id].alternate = Some(current_id);
                self.fibers[current_id].alternate = Some(wip_id);
                wip_id
            }
            Some(wip_id) => {
                let static_flags = current.flags & FiberFlags::STATIC_MASK;
                let wip = &mut self.fibers[wip_id];
                wip.pending_props = pending_props;
                // Type can change when the same slot hosts a lazily resolved
                // component.
                wip.flags = static_flags;
                wip.subtree_flags = FiberFlags::empty();
                wip.deletions.clear();
                wip.update_payload = None;
                wip_id
            }
        };

        let current = &self.fibers[current_id];
        let tag = current.tag;
        let key = current.key.clone();
        let element_type = current.element_type.clone();
        let resolved_type = current.resolved_type.clone();
        let state_node = current.state_node.clone();
        let lanes = current.lanes;
        let child_lanes = current.child_lanes;
        let child = current.child;
        let sibling = current.sibling;
        let index = current.index;
        let memoized_props = current.memoized_props.clone();
        let memoized_state = current.memoized_state.clone();
        let hooks = current.hooks.clone();
        let update_queue = current.update_queue.clone();
        let dependencies = current
            .dependencies
            .as_ref()
            .map(|deps| deps.clone_for_render());
        let showing_fallback = current.showing_fallback;
        let ref_ = current.ref_.clone();

        let wip = &mut self.fibers[wip_id];
        wip.tag = tag;
        wip.key = key;
        wip.element_type = element_type;
        wip.resolved_type = resolved_type;
        wip.state_node = state_node;
        wip.lanes = lanes;
        wip.child_lanes = child_lanes;
        wip.child = child;
        wip.sibling = sibling;
        wip.index = index;
        wip.memoized_props = memoized_props;
        wip.memoized_state = memoized_state;
        wip.hooks = hooks;
        wip.update_queue = update_queue;
        wip.dependencies = dependencies;
        wip.showing_fallback = showing_fallback;
        wip.retry_queue.clear();
        wip.ref_ = ref_;
        wip_id
    }

    /// Free a fiber and its alternate.
    pub fn release_pair(&mut self, id: FiberId) {
        if let Some(fiber) = self.fibers.remove(id) {
            if let Some(alternate) = fiber.alternate {
                self.fibers.remove(alternate);
            }
        }
    }

    /// Free an entire detached subtree (and the alternates of every node).
    /// Only called after the commit that detached it.
    pub fn release_subtree(&mut self, root: FiberId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let (child, sibling) = match self.fibers.get(id) {
                Some(fiber) => (fiber.child, fiber.sibling),
                None => continue,
            };
            if let Some(child) = child {
                stack.push(child);
            }
            // The subtree root's siblings stay alive; only descendants walk
            // their sibling chains.
            if id != root {
                if let Some(sibling) = sibling {
                    stack.push(sibling);
                }
            }
            self.release_pair(id);
        }
    }
}

impl<H: HostConfig> std::ops::Index<FiberId> for FiberArena<H> {
    type Output = Fiber<H>;

    fn index(&self, id: FiberId) -> &Fiber<H> {
        self.fibers.get(id).expect("fiber was freed while still referenced")
    }
}

impl<H: HostConfig> std::ops::IndexMut<FiberId> for FiberArena<H> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<H> {
        self.fibers.get_mut(id).expect("fiber was freed while still referenced")
    }
}

#[cfg(test)]
mod tests;
