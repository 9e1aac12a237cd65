// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Awaitable values and the suspense handler stack.
//!
//! A component that reads a pending [`Thenable`] through
//! [`Hooks::use_thenable`](crate::hooks::Hooks::use_thenable) returns
//! [`Interrupt::Suspend`](crate::error::Interrupt::Suspend). The work loop then registers a
//! ping on the thenable and unwinds to the nearest suspense boundary on the handler stack.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use crate::fiber::FiberId;
use crate::lanes::{Lane, Lanes};
use crate::value::Value;

/// Settlement state of a [`Thenable`].
#[derive(Clone, Debug)]
pub enum ThenableState {
    /// Not settled yet.
    Pending,
    /// Resolved with a value.
    Fulfilled(Value),
    /// Rejected with a reason.
    Rejected(Rc<str>),
}

struct Inner {
    state: RefCell<ThenableState>,
    listeners: RefCell<Vec<Box<dyn FnOnce()>>>,
}

/// A shared, single-assignment value that may not be available yet.
///
/// ```
/// use understory_reconciler::suspense::{Thenable, ThenableState};
///
/// let t = Thenable::new();
/// assert!(t.is_pending());
/// t.resolve(42);
/// assert!(matches!(t.state(), ThenableState::Fulfilled(v) if v.as_int() == Some(42)));
/// ```
#[derive(Clone)]
pub struct Thenable(Rc<Inner>);

impl Default for Thenable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Thenable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thenable").field(&*self.0.state.borrow()).finish()
    }
}

impl Thenable {
    /// A pending thenable.
    pub fn new() -> Self {
        Self(Rc::new(Inner {
            state: RefCell::new(ThenableState::Pending),
            listeners: RefCell::new(Vec::new()),
        }))
    }

    /// An already fulfilled thenable.
    pub fn resolved(value: impl Into<Value>) -> Self {
        let t = Self::new();
        *t.0.state.borrow_mut() = ThenableState::Fulfilled(value.into());
        t
    }

    /// Current state.
    pub fn state(&self) -> ThenableState {
        self.0.state.borrow().clone()
    }

    /// Returns true while not settled.
    pub fn is_pending(&self) -> bool {
        matches!(*self.0.state.borrow(), ThenableState::Pending)
    }

    /// Fulfill with `value` and notify listeners. Ignored if already settled.
    pub fn resolve(&self, value: impl Into<Value>) {
        self.settle(ThenableState::Fulfilled(value.into()));
    }

    /// Reject with `reason` and notify listeners. Ignored if already settled.
    pub fn reject(&self, reason: &str) {
        self.settle(ThenableState::Rejected(reason.into()));
    }

    /// Stable identity while this thenable is alive.
    pub(crate) fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Run `f` once settled; immediately if already settled.
    pub(crate) fn then(&self, f: impl FnOnce() + 'static) {
        if self.is_pending() {
            self.0.listeners.borrow_mut().push(Box::new(f));
        } else {
            f();
        }
    }

    fn settle(&self, state: ThenableState) {
        if !self.is_pending() {
            return;
        }
        *self.0.state.borrow_mut() = state;
        let listeners = core::mem::take(&mut *self.0.listeners.borrow_mut());
        for listener in listeners {
            listener();
        }
    }
}

/// Everything waiting on one thenable. The thenable is held so its key stays unique.
///
/// One listener is attached per lane. Every boundary that suspended on the thenable is
/// recorded, since a boundary from a discarded render may have been replaced by a fresh
/// fiber that suspends on the same value.
#[derive(Debug)]
pub(crate) struct PingEntry {
    pub(crate) thenable: Thenable,
    pub(crate) lanes: Lanes,
    pub(crate) boundaries: Vec<(FiberId, Lane)>,
}

impl PingEntry {
    pub(crate) fn new(thenable: Thenable) -> Self {
        Self {
            thenable,
            lanes: Lanes::empty(),
            boundaries: Vec::new(),
        }
    }

    /// Record `boundary` as waiting at `lane`. Returns true if the lane needs a listener.
    pub(crate) fn wait(&mut self, lane: Lane, boundary: Option<FiberId>) -> bool {
        if let Some(boundary) = boundary {
            if !self.boundaries.contains(&(boundary, lane)) {
                self.boundaries.push((boundary, lane));
            }
        }
        let needs_listener = !self.lanes.contains(lane);
        self.lanes |= lane;
        needs_listener
    }
}

/// Stack of suspense boundaries enclosing the fiber being rendered.
///
/// Boundaries that are already showing their fallback push the enclosing handler again,
/// so a suspension inside a fallback is caught further out.
#[derive(Debug, Default)]
pub(crate) struct SuspenseHandlerStack {
    stack: Vec<Option<FiberId>>,
}

impl SuspenseHandlerStack {
    pub(crate) fn push(&mut self, handler: FiberId) {
        self.stack.push(Some(handler));
    }

    pub(crate) fn push_enclosing(&mut self) {
        let top = self.top();
        self.stack.push(top);
    }

    pub(crate) fn pop(&mut self) {
        self.stack.pop();
    }

    pub(crate) fn top(&self) -> Option<FiberId> {
        self.stack.last().copied().flatten()
    }
}
