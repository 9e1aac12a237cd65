// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host adapter contract.
//!
//! The reconciler never touches a concrete platform API. Everything it does to the output
//! tree goes through a [`HostConfig`]: creating nodes while completing work, and inserting,
//! removing, updating, and hiding them during commit.
//!
//! [`noop::NoopHost`] is an in-memory implementation with an operation log.

pub mod noop;

use alloc::boxed::Box;
use core::fmt;

use crate::value::Props;

/// What changed on a committed host node.
#[derive(Clone, Copy, Debug)]
pub enum HostUpdate<'a> {
    /// New text content for a text node.
    Text(&'a str),
    /// New props for an element node.
    Props {
        /// The element tag.
        ty: &'a str,
        /// Props of the previous commit.
        old: &'a Props,
        /// Props being committed.
        new: &'a Props,
    },
}

/// Platform adapter used by the render and commit phases.
///
/// One instance type covers containers, element nodes, and text nodes. Instances are cheap
/// handles (cloning must not copy the underlying node).
pub trait HostConfig: 'static {
    /// Handle to a host node.
    type Instance: Clone + fmt::Debug + 'static;

    /// Create an element node. Children are attached separately.
    fn create_instance(&mut self, ty: &str, props: &Props) -> Self::Instance;

    /// Create a text node.
    fn create_text_instance(&mut self, content: &str) -> Self::Instance;

    /// Append `child` to a parent that is still being built (not yet attached).
    fn append_initial_child(&mut self, parent: &Self::Instance, child: &Self::Instance);

    /// Append `child` at the end of `container`, moving it if already attached elsewhere.
    fn append_child_to_container(&mut self, container: &Self::Instance, child: &Self::Instance);

    /// Insert `child` into `container` before `before`, moving it if already attached.
    fn insert_child_to_container(
        &mut self,
        child: &Self::Instance,
        container: &Self::Instance,
        before: &Self::Instance,
    );

    /// Detach `child` from `container`.
    fn remove_child(&mut self, child: &Self::Instance, container: &Self::Instance);

    /// Apply committed text or props to an existing node.
    fn commit_update(&mut self, instance: &Self::Instance, update: HostUpdate<'_>);

    /// Hide an element node without detaching it.
    fn hide_instance(&mut self, instance: &Self::Instance);

    /// Reveal an element node hidden by [`HostConfig::hide_instance`].
    fn unhide_instance(&mut self, instance: &Self::Instance, props: &Props);

    /// Hide a text node.
    fn hide_text_instance(&mut self, instance: &Self::Instance);

    /// Reveal a text node, restoring `content`.
    fn unhide_text_instance(&mut self, instance: &Self::Instance, content: &str);

    /// Queue `task` to run at the end of the current host turn.
    ///
    /// Used only to coalesce synchronous updates dispatched in the same turn into one render.
    fn schedule_microtask(&mut self, task: Box<dyn FnOnce()>);
}
