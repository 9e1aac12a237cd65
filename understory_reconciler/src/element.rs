// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Element model: immutable descriptions of what a render wants on screen.
//!
//! Elements are inert data. A render produces a fresh [`Node`] tree every time; the
//! reconciler compares it against the fibers of the previous commit.
//!
//! ## Building elements
//!
//! ```
//! use understory_reconciler::element::{create_element, h, text, Node};
//! use understory_reconciler::value::Value;
//!
//! let list: Node = h("ul")
//!     .children(["a", "b"].map(|k| h("li").key(k).child(text(k)).into()))
//!     .into();
//!
//! let same_shape = create_element("div", [("key", Value::from("k")), ("id", Value::from(3))], vec![]);
//! assert_eq!(same_shape.key(), Some("k"));
//! assert!(same_shape.props().get("key").is_none());
//! # let _ = list;
//! ```

use alloc::rc::Rc;
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;

use crate::context::Context;
use crate::error::Interrupt;
use crate::hooks::Hooks;
use crate::value::{Props, Ref, Value};

/// Key used to match children across renders.
pub type Key = Rc<str>;

/// Signature of a function component.
pub type RenderFn = dyn Fn(&mut Hooks<'_>, &Props) -> Result<Node, Interrupt>;

/// A function component. Identity is the wrapped closure (two `Component::new` calls are
/// two different types, even for the same closure body).
#[derive(Clone)]
pub struct Component {
    name: &'static str,
    render: Rc<RenderFn>,
}

impl Component {
    /// Wrap a render function.
    pub fn new(
        name: &'static str,
        render: impl Fn(&mut Hooks<'_>, &Props) -> Result<Node, Interrupt> + 'static,
    ) -> Self {
        Self {
            name,
            render: Rc::new(render),
        }
    }

    /// Display name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.render, &other.render)
    }

    pub(crate) fn render(&self, hooks: &mut Hooks<'_>, props: &Props) -> Result<Node, Interrupt> {
        (self.render)(hooks, props)
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Component").field(&self.name).finish()
    }
}

/// Props comparison used by [`Memo`] components.
pub type CompareFn = fn(&Props, &Props) -> bool;

#[derive(Debug)]
struct MemoData {
    component: Component,
    compare: Option<CompareFn>,
}

/// A memoized function component: re-rendered only when its props change.
#[derive(Clone, Debug)]
pub struct Memo(Rc<MemoData>);

impl Memo {
    /// The wrapped component.
    pub fn component(&self) -> &Component {
        &self.0.component
    }

    /// The custom comparison, if any. `None` means [`shallow_equals`](crate::value::shallow_equals).
    pub fn compare(&self) -> Option<CompareFn> {
        self.0.compare
    }

    /// Type identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Wrap `component` so it bails out when its props are shallowly equal.
pub fn memo(component: Component) -> Memo {
    Memo(Rc::new(MemoData {
        component,
        compare: None,
    }))
}

/// Wrap `component` with a custom props comparison; `compare` returns true when equal.
pub fn memo_with(component: Component, compare: CompareFn) -> Memo {
    Memo(Rc::new(MemoData {
        component,
        compare: Some(compare),
    }))
}

/// What an element describes.
#[derive(Clone, Debug)]
pub enum ElementType {
    /// A host node such as `"div"`.
    Host(Rc<str>),
    /// A function component.
    Function(Component),
    /// A fragment; its children are spliced into the parent.
    Fragment,
    /// A context provider; the `value` prop is provided to descendants.
    Provider(Context),
    /// A suspense boundary; the `fallback` prop is shown while children are suspended.
    Suspense,
    /// A memoized function component.
    Memo(Memo),
}

impl From<&str> for ElementType {
    fn from(tag: &str) -> Self {
        Self::Host(tag.into())
    }
}

impl From<Component> for ElementType {
    fn from(c: Component) -> Self {
        Self::Function(c)
    }
}

impl From<Memo> for ElementType {
    fn from(m: Memo) -> Self {
        Self::Memo(m)
    }
}

impl From<Context> for ElementType {
    fn from(c: Context) -> Self {
        Self::Provider(c)
    }
}

/// The payload of an [`Element`].
#[derive(Debug)]
pub struct ElementData {
    /// What the element describes.
    pub ty: ElementType,
    /// Optional reconciliation key.
    pub key: Option<Key>,
    /// Optional ref, attached to the host instance at commit.
    pub ref_: Option<Ref>,
    /// Props, including `children`.
    pub props: Props,
}

/// An immutable element. Cloning preserves identity.
#[derive(Clone)]
pub struct Element(Rc<ElementData>);

impl Element {
    /// Create an element from its parts.
    pub fn new(ty: ElementType, key: Option<Key>, ref_: Option<Ref>, props: Props) -> Self {
        Self(Rc::new(ElementData {
            ty,
            key,
            ref_,
            props,
        }))
    }

    /// The element type.
    pub fn ty(&self) -> &ElementType {
        &self.0.ty
    }

    /// The key, if any.
    pub fn key(&self) -> Option<&str> {
        self.0.key.as_deref()
    }

    pub(crate) fn key_rc(&self) -> Option<&Key> {
        self.0.key.as_ref()
    }

    /// The ref, if any.
    pub fn ref_(&self) -> Option<&Ref> {
        self.0.ref_.as_ref()
    }

    /// The props.
    pub fn props(&self) -> &Props {
        &self.0.props
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("ty", &self.0.ty)
            .field("key", &self.0.key)
            .finish_non_exhaustive()
    }
}

/// A renderable node.
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// Renders nothing.
    #[default]
    Empty,
    /// A text leaf.
    Text(Rc<str>),
    /// An element.
    Element(Element),
    /// An ordered list of children.
    List(Rc<[Node]>),
}

impl Node {
    /// "Same value" identity: text by content, everything else by pointer.
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Empty, Self::Empty) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Element(a), Self::Element(b)) => a.ptr_eq(b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Build a list node.
    pub fn list(children: impl IntoIterator<Item = Self>) -> Self {
        Self::List(children.into_iter().collect())
    }

    /// Returns the element, if this node is one.
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(e) => Some(e),
            _ => None,
        }
    }

    fn from_children(mut children: Vec<Self>) -> Self {
        match children.len() {
            0 => Self::Empty,
            1 => children.pop().unwrap_or_default(),
            _ => Self::List(children.into()),
        }
    }
}

impl From<Element> for Node {
    fn from(e: Element) -> Self {
        Self::Element(e)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<alloc::string::String> for Node {
    fn from(s: alloc::string::String) -> Self {
        Self::Text(s.into())
    }
}

impl From<Vec<Self>> for Node {
    fn from(children: Vec<Self>) -> Self {
        Self::List(children.into())
    }
}

/// A text node from anything displayable.
pub fn text(content: impl fmt::Display) -> Node {
    Node::Text(content.to_string().into())
}

/// Builder for [`Element`]s.
#[derive(Debug)]
pub struct ElementBuilder {
    ty: ElementType,
    key: Option<Key>,
    ref_: Option<Ref>,
    values: Vec<(Rc<str>, Value)>,
    children: Vec<Node>,
}

/// Start building an element of type `ty`.
pub fn h(ty: impl Into<ElementType>) -> ElementBuilder {
    ElementBuilder {
        ty: ty.into(),
        key: None,
        ref_: None,
        values: Vec::new(),
        children: Vec::new(),
    }
}

impl ElementBuilder {
    /// Set the key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the ref.
    pub fn ref_(mut self, r: Ref) -> Self {
        self.ref_ = Some(r);
        self
    }

    /// Add a named prop.
    pub fn prop(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }

    /// Append one child.
    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Append several children.
    pub fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    /// Finish the element.
    pub fn build(self) -> Element {
        let props = Props::new(self.values, Node::from_children(self.children));
        Element::new(self.ty, self.key, self.ref_, props)
    }
}

impl From<ElementBuilder> for Node {
    fn from(b: ElementBuilder) -> Self {
        Self::Element(b.build())
    }
}

impl From<ElementBuilder> for Element {
    fn from(b: ElementBuilder) -> Self {
        b.build()
    }
}

/// Element factory taking `(type, config, children)`.
///
/// `key` and `ref` entries of `config` are lifted out of the props; the remaining entries
/// become props. A single child is stored as-is, several as a list.
pub fn create_element<'a>(
    ty: impl Into<ElementType>,
    config: impl IntoIterator<Item = (&'a str, Value)>,
    children: Vec<Node>,
) -> Element {
    let mut key = None;
    let mut ref_ = None;
    let mut values = Vec::new();
    for (name, value) in config {
        match (name, value) {
            ("key", Value::Str(s)) => key = Some(s),
            ("key", Value::Int(i)) => key = Some(i.to_string().into()),
            ("key", Value::Null) => {}
            ("ref", Value::Ref(r)) => ref_ = Some(r),
            ("ref", Value::Null) => {}
            (name, value) => values.push((Rc::from(name), value)),
        }
    }
    Element::new(
        ty.into(),
        key,
        ref_,
        Props::new(values, Node::from_children(children)),
    )
}

/// An unkeyed fragment.
pub fn fragment(children: impl IntoIterator<Item = Node>) -> Node {
    h(ElementType::Fragment).children(children).into()
}

/// A context provider element.
pub fn provider(context: &Context, value: impl Into<Value>, children: impl Into<Node>) -> Element {
    h(context.clone())
        .prop("value", value)
        .child(children)
        .build()
}

/// A suspense boundary element.
pub fn suspense(fallback: impl Into<Node>, children: impl Into<Node>) -> Element {
    h(ElementType::Suspense)
        .prop("fallback", Value::Node(fallback.into()))
        .child(children)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn builder_collapses_single_child() {
        let one = h("div").child("x").build();
        assert!(matches!(one.props().children(), Node::Text(_)));
        let two = h("div").child("x").child("y").build();
        assert!(matches!(two.props().children(), Node::List(l) if l.len() == 2));
        let none = h("div").build();
        assert!(matches!(none.props().children(), Node::Empty));
    }

    #[test]
    fn create_element_lifts_key_and_ref() {
        let r = Ref::new();
        let e = create_element(
            "p",
            [
                ("key", Value::Int(4)),
                ("ref", Value::Ref(r.clone())),
                ("title", "t".into()),
            ],
            vec!["a".into()],
        );
        assert_eq!(e.key(), Some("4"));
        assert!(e.ref_().is_some_and(|x| x.ptr_eq(&r)));
        assert_eq!(e.props().len(), 1);
    }

    #[test]
    fn node_identity() {
        let e: Node = h("div").into();
        assert!(e.is(&e.clone()));
        assert!(!e.is(&h("div").into()));
        assert!(text(3).is(&"3".into()));
    }
}
