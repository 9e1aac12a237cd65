// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamic prop values, props bags, refs, and the identity rules used to compare them.
//!
//! ## Identity
//!
//! Two comparisons drive the reconciler:
//!
//! - [`Value::is`]: "same value" identity. Scalars compare by value (floats by bit pattern,
//!   with every NaN equal to every other NaN), everything reference-counted compares by pointer.
//! - [`shallow_equals`]: two props bags are equal when they hold the same keys and every
//!   value pair satisfies [`Value::is`].
//!
//! [`Props::ptr_eq`] is the cheaper reference identity used by the bailout check.

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use core::any::Any;
use core::cell::RefCell;
use core::fmt;

use crate::element::Node;

/// A callback stored in props (event handlers and the like).
#[derive(Clone)]
pub struct Callback(Rc<dyn Fn(Value)>);

impl Callback {
    /// Wrap a closure.
    pub fn new(f: impl Fn(Value) + 'static) -> Self {
        Self(Rc::new(f))
    }

    /// Invoke the callback.
    pub fn call(&self, arg: Value) {
        (self.0)(arg);
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// A mutable cell that survives across renders.
///
/// Returned by [`Hooks::use_ref`](crate::hooks::Hooks::use_ref) and attached to host
/// elements through [`ElementBuilder::ref_`](crate::element::ElementBuilder::ref_), in which
/// case the commit phase stores the host instance in it.
#[derive(Clone, Default)]
pub struct Ref(Rc<RefCell<Option<Rc<dyn Any>>>>);

impl Ref {
    /// Create an empty ref.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current value if it has type `T`.
    pub fn current<T: Clone + 'static>(&self) -> Option<T> {
        self.0.borrow().as_ref()?.downcast_ref::<T>().cloned()
    }

    /// Returns true if the ref holds a value.
    pub fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Replace the current value.
    pub fn set<T: 'static>(&self, value: T) {
        *self.0.borrow_mut() = Some(Rc::new(value));
    }

    /// Clear the current value.
    pub fn clear(&self) {
        *self.0.borrow_mut() = None;
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// A dynamically typed prop value.
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A string.
    Str(Rc<str>),
    /// A renderable node (for example a Suspense fallback).
    Node(Node),
    /// A ref cell.
    Ref(Ref),
    /// A callback.
    Callback(Callback),
    /// Any other shared value; compared by pointer.
    Any(Rc<dyn Any>),
}

impl Value {
    /// "Same value" identity.
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Node(a), Self::Node(b)) => a.is(b),
            (Self::Ref(a), Self::Ref(b)) => a.ptr_eq(b),
            (Self::Callback(a), Self::Callback(b)) => a.ptr_eq(b),
            (Self::Any(a), Self::Any(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Downcast an [`Value::Any`] payload.
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        match self {
            Self::Any(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Self::Str(v)
    }
}

impl From<Node> for Value {
    fn from(v: Node) -> Self {
        Self::Node(v)
    }
}

impl From<Ref> for Value {
    fn from(v: Ref) -> Self {
        Self::Ref(v)
    }
}

impl From<Callback> for Value {
    fn from(v: Callback) -> Self {
        Self::Callback(v)
    }
}

#[derive(Debug, Default)]
struct PropsData {
    values: BTreeMap<Rc<str>, Value>,
    children: Node,
}

/// An immutable props bag: named values plus `children`.
///
/// Cloning is cheap and preserves identity; see [`Props::ptr_eq`].
#[derive(Clone, Debug)]
pub struct Props(Rc<PropsData>);

impl Default for Props {
    fn default() -> Self {
        Self::empty()
    }
}

impl Props {
    /// A fresh, empty props bag. Each call yields a distinct identity.
    pub fn empty() -> Self {
        Self(Rc::new(PropsData::default()))
    }

    /// Build props from named values and children.
    pub fn new(values: impl IntoIterator<Item = (Rc<str>, Value)>, children: Node) -> Self {
        Self(Rc::new(PropsData {
            values: values.into_iter().collect(),
            children,
        }))
    }

    /// Props carrying only children.
    pub fn with_children(children: Node) -> Self {
        Self::new(core::iter::empty(), children)
    }

    pub(crate) fn text(content: Rc<str>) -> Self {
        Self::new([(Rc::from(CONTENT), Value::Str(content))], Node::Empty)
    }

    pub(crate) fn offscreen(hidden: bool, children: Node) -> Self {
        Self::new([(Rc::from(HIDDEN), Value::Bool(hidden))], children)
    }

    /// Look up a named value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.values.get(name)
    }

    /// Iterate named values in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.values.iter().map(|(k, v)| (&**k, v))
    }

    /// The `children` prop.
    pub fn children(&self) -> &Node {
        &self.0.children
    }

    /// Number of named values, not counting `children`.
    pub fn len(&self) -> usize {
        self.0.values.len()
    }

    /// Returns true if there are no named values.
    pub fn is_empty(&self) -> bool {
        self.0.values.is_empty()
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn text_content(&self) -> &str {
        self.get(CONTENT).and_then(Value::as_str).unwrap_or("")
    }

    pub(crate) fn is_hidden(&self) -> bool {
        self.get(HIDDEN).and_then(Value::as_bool).unwrap_or(false)
    }
}

const CONTENT: &str = "content";
const HIDDEN: &str = "hidden";

/// Shallow props equality: same keys, pairwise [`Value::is`], and identical children.
pub fn shallow_equals(a: &Props, b: &Props) -> bool {
    if a.ptr_eq(b) {
        return true;
    }
    a.children().is(b.children()) && values_equal(a, b)
}

/// Shallow equality of the named values only; `children` is ignored.
pub(crate) fn values_equal(a: &Props, b: &Props) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .all(|(key, value)| b.get(key).is_some_and(|other| value.is(other)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> Props {
        Props::new(
            pairs.iter().map(|(k, v)| (Rc::from(*k), v.clone())),
            Node::Empty,
        )
    }

    #[test]
    fn value_identity_rules() {
        assert!(Value::Float(f64::NAN).is(&Value::Float(f64::NAN)));
        assert!(!Value::Float(0.0).is(&Value::Float(-0.0)));
        assert!(Value::from("a").is(&Value::from("a")));
        let shared: Rc<dyn Any> = Rc::new(5_u8);
        assert!(Value::Any(shared.clone()).is(&Value::Any(shared)));
        assert!(!Value::Any(Rc::new(5_u8)).is(&Value::Any(Rc::new(5_u8))));
        assert!(!Value::Int(1).is(&Value::Float(1.0)));
    }

    #[test]
    fn shallow_equals_compares_keys_and_values() {
        let a = props(&[("x", Value::Int(1)), ("y", "z".into())]);
        let b = props(&[("x", Value::Int(1)), ("y", "z".into())]);
        let c = props(&[("x", Value::Int(2)), ("y", "z".into())]);
        let d = props(&[("x", Value::Int(1))]);
        assert!(!a.ptr_eq(&b));
        assert!(shallow_equals(&a, &b));
        assert!(!shallow_equals(&a, &c));
        assert!(!shallow_equals(&a, &d));
    }

    #[test]
    fn ref_holds_typed_value() {
        let r = Ref::new();
        assert!(!r.is_set());
        r.set(7_u32);
        assert_eq!(r.current::<u32>(), Some(7));
        assert_eq!(r.current::<i64>(), None);
        r.clear();
        assert!(!r.is_set());
    }
}
