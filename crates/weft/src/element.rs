//! Element descriptors.
//!
//! Elements are the immutable descriptions of what the UI should look like.
//! They are cheap to build and cheap to clone; the reconciler diffs them
//! against the persistent fiber tree and keeps the host in agreement. An
//! element never carries work state of its own. Fibers do.

use crate::context::Context;
use crate::hooks::RenderCx;
use crate::thenable::{Thenable, Thrown, ThrownError};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// What a component body produces: the next element, or a thrown value.
pub type RenderResult = Result<Element, Thrown>;

/// A host attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.into())
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

#[derive(Default)]
struct PropsData {
    text: Option<Rc<str>>,
    attrs: FxHashMap<Rc<str>, AttrValue>,
    children: SmallVec<[Element; 4]>,
}

/// An immutable property bag shared by reference.
///
/// Identity comparison (`same`) is the fast path the bailout logic relies
/// on: a parent that re-renders with the same `Props` handle lets the whole
/// child subtree skip work.
#[derive(Clone, Default)]
pub struct Props {
    data: Rc<PropsData>,
}

impl Props {
    pub fn new() -> PropsBuilder {
        PropsBuilder {
            data: PropsData::default(),
        }
    }

    /// Props holding only host text content.
    pub fn text(text: impl Into<Rc<str>>) -> Props {
        Props {
            data: Rc::new(PropsData {
                text: Some(text.into()),
                ..PropsData::default()
            }),
        }
    }

    /// Identity comparison. True only for clones of the same allocation.
    pub fn same(&self, other: &Props) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }

    pub fn text_content(&self) -> Option<&str> {
        self.data.text.as_deref()
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.data.attrs.get(name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&Rc<str>, &AttrValue)> {
        self.data.attrs.iter()
    }

    pub fn children(&self) -> &[Element] {
        &self.data.children
    }

    /// Field-wise comparison used by memoized components: equal attrs and
    /// text, and children that are the same descriptors by identity.
    pub fn shallow_eq(&self, other: &Props) -> bool {
        if self.same(other) {
            return true;
        }
        self.data.text == other.data.text
            && self.data.attrs == other.data.attrs
            && self.data.children.len() == other.data.children.len()
            && self
                .data
                .children
                .iter()
                .zip(other.data.children.iter())
                .all(|(a, b)| a.same_descriptor(b))
    }
}

/// Builder for [`Props`].
pub struct PropsBuilder {
    data: PropsData,
}

impl PropsBuilder {
    pub fn attr(mut self, name: impl Into<Rc<str>>, value: impl Into<AttrValue>) -> Self {
        self.data.attrs.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, text: impl Into<Rc<str>>) -> Self {
        self.data.text = Some(text.into());
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.data.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.data.children.extend(children);
        self
    }

    pub fn build(self) -> Props {
        Props {
            data: Rc::new(self.data),
        }
    }
}

/// A function component body. Identity is the closure allocation, so the
/// same `ComponentFn` handle must be reused across renders for positional
/// matching to work.
#[derive(Clone)]
pub struct ComponentFn(pub Rc<dyn Fn(&mut RenderCx, &Props) -> RenderResult>);

impl ComponentFn {
    pub fn new(body: impl Fn(&mut RenderCx, &Props) -> RenderResult + 'static) -> Self {
        ComponentFn(Rc::new(body))
    }

    pub fn same(&self, other: &ComponentFn) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A class-like component definition: explicit state record plus lifecycle
/// callbacks, all optional except `render`.
pub struct ClassDef {
    pub initial_state: Rc<dyn Fn(&Props) -> Record>,
    pub render: Rc<dyn Fn(&Record, &Props) -> RenderResult>,
    /// Makes this class an error boundary: maps a captured error to a state
    /// partial merged before the recovery render.
    pub get_derived_state_from_error: Option<Rc<dyn Fn(&ThrownError) -> Record>>,
    pub did_mount: Option<Rc<dyn Fn()>>,
    /// Receives the snapshot taken before mutation, if any.
    pub did_update: Option<Rc<dyn Fn(Option<&Value>)>>,
    pub will_unmount: Option<Rc<dyn Fn()>>,
    pub get_snapshot_before_update: Option<Rc<dyn Fn(&Record, &Props) -> Value>>,
}

impl ClassDef {
    pub fn new(render: impl Fn(&Record, &Props) -> RenderResult + 'static) -> Self {
        ClassDef {
            initial_state: Rc::new(|_| Record::default()),
            render: Rc::new(render),
            get_derived_state_from_error: None,
            did_mount: None,
            did_update: None,
            will_unmount: None,
            get_snapshot_before_update: None,
        }
    }
}

/// A memoized wrapper around another element kind.
pub struct MemoDef {
    pub inner: ElementKind,
    /// Custom props comparison; defaults to [`Props::shallow_eq`].
    pub compare: Option<Rc<dyn Fn(&Props, &Props) -> bool>>,
}

/// Result of polling a lazy component's resolver.
pub enum LazyResult {
    Ready(ElementKind),
    Pending(Rc<dyn Thenable>),
}

/// A component whose real type arrives asynchronously.
pub struct LazyDef {
    pub resolve: Rc<dyn Fn() -> LazyResult>,
}

/// A forward-ref component: a function body that also receives the ref
/// attached to its element.
pub struct ForwardRefDef {
    pub render: Rc<dyn Fn(&mut RenderCx, &Props, Option<&Ref>) -> RenderResult>,
}

/// Children rendered into a foreign container. The container is opaque here
/// and downcast to the host's container type at commit time.
pub struct PortalDef {
    pub container: Rc<dyn Any>,
}

/// The closed set of element kinds the reconciler understands.
#[derive(Clone)]
pub enum ElementKind {
    /// A platform element named by tag.
    Host(Rc<str>),
    /// A run of host text; content lives in `Props::text`.
    Text,
    Component(ComponentFn),
    Class(Rc<ClassDef>),
    Fragment,
    StrictMode,
    Profiler(Rc<str>),
    Provider {
        context: Context,
        value: Rc<dyn Any>,
    },
    Consumer {
        context: Context,
        render: Rc<dyn Fn(&Rc<dyn Any>) -> Element>,
    },
    Memo(Rc<MemoDef>),
    ForwardRef(Rc<ForwardRefDef>),
    Suspense {
        fallback: Option<Box<Element>>,
    },
    Offscreen {
        hidden: bool,
    },
    Portal(Rc<PortalDef>),
    Lazy(Rc<LazyDef>),
    /// Re-raises its payload when rendered. Produced when child resolution
    /// itself fails and the failure must surface at the child's position.
    Throw(ThrownError),
}

impl ElementKind {
    /// Whether a fiber of this kind can be reused for `other` at the same
    /// position. Compares component identity, not props.
    pub fn matches(&self, other: &ElementKind) -> bool {
        match (self, other) {
            (ElementKind::Host(a), ElementKind::Host(b)) => a == b,
            (ElementKind::Text, ElementKind::Text) => true,
            (ElementKind::Component(a), ElementKind::Component(b)) => a.same(b),
            (ElementKind::Class(a), ElementKind::Class(b)) => Rc::ptr_eq(a, b),
            (ElementKind::Fragment, ElementKind::Fragment) => true,
            (ElementKind::StrictMode, ElementKind::StrictMode) => true,
            (ElementKind::Profiler(a), ElementKind::Profiler(b)) => a == b,
            (ElementKind::Provider { context: a, .. }, ElementKind::Provider { context: b, .. }) => {
                a.id() == b.id()
            }
            (ElementKind::Consumer { context: a, .. }, ElementKind::Consumer { context: b, .. }) => {
                a.id() == b.id()
            }
            (ElementKind::Memo(a), ElementKind::Memo(b)) => {
                Rc::ptr_eq(a, b) || a.inner.matches(&b.inner)
            }
            (ElementKind::ForwardRef(a), ElementKind::ForwardRef(b)) => Rc::ptr_eq(a, b),
            (ElementKind::Suspense { .. }, ElementKind::Suspense { .. }) => true,
            (ElementKind::Offscreen { .. }, ElementKind::Offscreen { .. }) => true,
            (ElementKind::Portal(a), ElementKind::Portal(b)) => Rc::ptr_eq(a, b),
            (ElementKind::Lazy(a), ElementKind::Lazy(b)) => Rc::ptr_eq(a, b),
            (ElementKind::Throw(_), ElementKind::Throw(_)) => true,
            _ => false,
        }
    }

    pub fn debug_name(&self) -> &'static str {
        match self {
            ElementKind::Host(_) => "host",
            ElementKind::Text => "text",
            ElementKind::Component(_) => "component",
            ElementKind::Class(_) => "class",
            ElementKind::Fragment => "fragment",
            ElementKind::StrictMode => "strict-mode",
            ElementKind::Profiler(_) => "profiler",
            ElementKind::Provider { .. } => "provider",
            ElementKind::Consumer { .. } => "consumer",
            ElementKind::Memo(_) => "memo",
            ElementKind::ForwardRef(_) => "forward-ref",
            ElementKind::Suspense { .. } => "suspense",
            ElementKind::Offscreen { .. } => "offscreen",
            ElementKind::Portal(_) => "portal",
            ElementKind::Lazy(_) => "lazy",
            ElementKind::Throw(_) => "throw",
        }
    }
}

/// An imperative handle to a committed host instance.
#[derive(Clone)]
pub enum Ref {
    /// A cell the commit phase fills with the instance and clears on detach.
    Cell(Rc<RefCell<Option<Box<dyn Any>>>>),
    /// A callback invoked with `Some(instance)` on attach. It may return a
    /// cleanup closure; otherwise it is re-invoked with `None` on detach.
    Callback(Rc<dyn Fn(Option<&dyn Any>) -> Option<Box<dyn FnOnce()>>>),
}

impl Ref {
    pub fn cell() -> (Ref, Rc<RefCell<Option<Box<dyn Any>>>>) {
        let cell = Rc::new(RefCell::new(None));
        (Ref::Cell(cell.clone()), cell)
    }

    /// Identity comparison; a changed ref is detached and re-attached.
    pub fn same(&self, other: &Ref) -> bool {
        match (self, other) {
            (Ref::Cell(a), Ref::Cell(b)) => Rc::ptr_eq(a, b),
            (Ref::Callback(a), Ref::Callback(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// An immutable view descriptor.
#[derive(Clone)]
pub struct Element {
    pub kind: ElementKind,
    /// Stable identity for sibling reordering.
    pub key: Option<Rc<str>>,
    pub props: Props,
    pub ref_: Option<Ref>,
}

impl Element {
    pub fn new(kind: ElementKind, props: Props) -> Element {
        Element {
            kind,
            key: None,
            props,
            ref_: None,
        }
    }

    pub fn host(tag: impl Into<Rc<str>>, props: Props) -> Element {
        Element::new(ElementKind::Host(tag.into()), props)
    }

    pub fn text(text: impl Into<Rc<str>>) -> Element {
        Element::new(ElementKind::Text, Props::text(text))
    }

    pub fn component(body: ComponentFn, props: Props) -> Element {
        Element::new(ElementKind::Component(body), props)
    }

    pub fn class(def: Rc<ClassDef>, props: Props) -> Element {
        Element::new(ElementKind::Class(def), props)
    }

    pub fn fragment(children: impl IntoIterator<Item = Element>) -> Element {
        Element::new(ElementKind::Fragment, Props::new().children(children).build())
    }

    pub fn strict_mode(children: impl IntoIterator<Item = Element>) -> Element {
        Element::new(
            ElementKind::StrictMode,
            Props::new().children(children).build(),
        )
    }

    pub fn profiler(id: impl Into<Rc<str>>, children: impl IntoIterator<Item = Element>) -> Element {
        Element::new(
            ElementKind::Profiler(id.into()),
            Props::new().children(children).build(),
        )
    }

    pub fn provider(
        context: &Context,
        value: Rc<dyn Any>,
        children: impl IntoIterator<Item = Element>,
    ) -> Element {
        Element::new(
            ElementKind::Provider {
                context: context.clone(),
                value,
            },
            Props::new().children(children).build(),
        )
    }

    pub fn consumer(
        context: &Context,
        render: impl Fn(&Rc<dyn Any>) -> Element + 'static,
    ) -> Element {
        Element::new(
            ElementKind::Consumer {
                context: context.clone(),
                render: Rc::new(render),
            },
            Props::default(),
        )
    }

    pub fn memo(inner: ElementKind, props: Props) -> Element {
        Element::new(
            ElementKind::Memo(Rc::new(MemoDef {
                inner,
                compare: None,
            })),
            props,
        )
    }

    pub fn suspense(
        fallback: Option<Element>,
        children: impl IntoIterator<Item = Element>,
    ) -> Element {
        Element::new(
            ElementKind::Suspense {
                fallback: fallback.map(Box::new),
            },
            Props::new().children(children).build(),
        )
    }

    pub fn portal(container: Rc<dyn Any>, children: impl IntoIterator<Item = Element>) -> Element {
        Element::new(
            ElementKind::Portal(Rc::new(PortalDef { container })),
            Props::new().children(children).build(),
        )
    }

    pub fn lazy(resolve: impl Fn() -> LazyResult + 'static, props: Props) -> Element {
        Element::new(
            ElementKind::Lazy(Rc::new(LazyDef {
                resolve: Rc::new(resolve),
            })),
            props,
        )
    }

    pub fn with_key(mut self, key: impl Into<Rc<str>>) -> Element {
        self.key = Some(key.into());
        self
    }

    pub fn with_ref(mut self, ref_: Ref) -> Element {
        self.ref_ = Some(ref_);
        self
    }

    /// True if `other` is the same descriptor: same kind identity, key, and
    /// props allocation.
    pub fn same_descriptor(&self, other: &Element) -> bool {
        self.kind.matches(&other.kind) && self.key == other.key && self.props.same(&other.props)
    }
}

/// A dynamically typed state value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Element(Element),
    Any(Rc<dyn Any>),
}

impl Value {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Value::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }
}

/// A flat state record with shallow merge semantics: merging overwrites
/// matching fields and leaves the rest alone.
#[derive(Clone, Default)]
pub struct Record {
    fields: FxHashMap<Rc<str>, Value>,
}

impl Record {
    pub fn new() -> Record {
        Record::default()
    }

    pub fn with(mut self, name: impl Into<Rc<str>>, value: Value) -> Record {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<Rc<str>>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn merge_from(&mut self, partial: &Record) {
        for (name, value) in partial.fields.iter() {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
