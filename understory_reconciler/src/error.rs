// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Errors and render interruptions.

use alloc::rc::Rc;

use crate::suspense::Thenable;

/// Fatal errors reported by the reconciler.
///
/// Hook errors are contract violations by a component author; they abandon the render
/// of the lane that produced them and are never retried automatically.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// A hook of a different kind was called at a position used by another kind last render.
    #[error("`{component}` changed the order of its hooks (hook #{index})")]
    HookOrderChanged {
        /// Component display name.
        component: &'static str,
        /// Position of the offending hook call.
        index: usize,
    },
    /// More hooks were called than during the previous render.
    #[error("`{component}` rendered more hooks than during the previous render")]
    TooManyHooks {
        /// Component display name.
        component: &'static str,
    },
    /// Fewer hooks were called than during the previous render.
    #[error("`{component}` rendered fewer hooks than expected")]
    TooFewHooks {
        /// Component display name.
        component: &'static str,
    },
    /// A state or memo hook was read back with a different type than it was created with.
    #[error("`{component}` read hook #{index} with a different type than it was created with")]
    StateTypeMismatch {
        /// Component display name.
        component: &'static str,
        /// Position of the offending hook call.
        index: usize,
    },
    /// An awaited [`Thenable`] was rejected.
    #[error("awaited value was rejected: {0}")]
    Rejected(Rc<str>),
    /// The root was used from inside its own render or commit.
    #[error("root is already rendering or committing")]
    Reentrant,
    /// Updates scheduled during commit kept triggering synchronous re-renders.
    #[error("maximum update depth exceeded after {0} nested synchronous commits")]
    MaximumUpdateDepth(usize),
}

/// Why a component render did not produce a tree.
#[derive(Clone, Debug)]
pub enum Interrupt {
    /// The render is waiting on a pending value. Not an error: the nearest suspense boundary
    /// shows its fallback and the render is retried once the value settles.
    Suspend(Thenable),
    /// A fatal error.
    Error(ReconcileError),
}

impl From<ReconcileError> for Interrupt {
    fn from(err: ReconcileError) -> Self {
        Self::Error(err)
    }
}

impl From<Thenable> for Interrupt {
    fn from(thenable: Thenable) -> Self {
        Self::Suspend(thenable)
    }
}
