// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Context objects, the provider value stack, and consumer dependency records.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::lanes::Lanes;
use crate::value::Value;

struct ContextData {
    name: &'static str,
    default: Value,
}

/// A context: a value passed implicitly from a provider to every consumer below it.
///
/// Identity is the object itself; two contexts created with the same name are distinct.
#[derive(Clone)]
pub struct Context(Rc<ContextData>);

impl Context {
    /// Create a context whose consumers see `default` when no provider encloses them.
    pub fn new(name: &'static str, default: impl Into<Value>) -> Self {
        Self(Rc::new(ContextData {
            name,
            default: default.into(),
        }))
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// Value seen outside any provider.
    pub fn default_value(&self) -> &Value {
        &self.0.default
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Context").field(&self.0.name).finish()
    }
}

/// Provider values in effect at the fiber being rendered.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    entries: Vec<(Context, Value)>,
}

impl ContextStack {
    pub(crate) fn push(&mut self, context: &Context, value: Value) {
        self.entries.push((context.clone(), value));
    }

    pub(crate) fn pop(&mut self, context: &Context) {
        debug_assert!(
            self.entries
                .last()
                .is_some_and(|(c, _)| c.ptr_eq(context)),
            "unbalanced provider stack"
        );
        self.entries.pop();
    }

    /// Innermost provided value, or the context default.
    pub(crate) fn read(&self, context: &Context) -> Value {
        self.entries
            .iter()
            .rev()
            .find(|(c, _)| c.ptr_eq(context))
            .map_or_else(|| context.default_value().clone(), |(_, v)| v.clone())
    }
}

/// One context read during a render.
#[derive(Clone, Debug)]
pub(crate) struct ContextDependency {
    pub(crate) context: Context,
    pub(crate) memoized_value: Value,
}

/// Contexts a fiber read during its last render.
#[derive(Clone, Debug, Default)]
pub(crate) struct Dependencies {
    /// Render lanes at which one of the contexts changed.
    pub(crate) lanes: Lanes,
    pub(crate) contexts: Vec<ContextDependency>,
}
