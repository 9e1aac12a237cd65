// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Complete work: the bottom-up half of a unit of work.
//!
//! New host nodes are created here with all of their host descendants already attached, so
//! a freshly mounted subtree reaches the committed tree through one placement. Existing host
//! nodes are only compared; the change is applied during commit. Every completed fiber
//! bubbles its children's flags and lanes so commit and later renders can skip clean
//! subtrees.

use crate::fiber::{FiberId, FiberKind};
use crate::flags::Flags;
use crate::host::HostConfig;
use crate::lanes::Lanes;
use crate::value::values_equal;
use crate::work_loop::Engine;

impl<H: HostConfig> Engine<H> {
    pub(crate) fn complete_work(&mut self, wip: FiberId) {
        let kind = self.arena[wip].kind.clone();
        let current = self.arena[wip].alternate;
        match kind {
            FiberKind::HostComponent(tag) => {
                let props = self.arena[wip].pending_props.clone();
                match current.filter(|_| self.arena[wip].state_node.is_some()) {
                    Some(current) => {
                        let changed = self.arena[current]
                            .memoized_props
                            .as_ref()
                            .is_none_or(|old| !old.ptr_eq(&props) && !values_equal(old, &props));
                        if changed {
                            self.arena[wip].flags |= Flags::UPDATE;
                        }
                    }
                    None => {
                        let instance = self.host.create_instance(&tag, &props);
                        self.append_all_children(&instance, wip);
                        self.arena[wip].state_node = Some(instance);
                    }
                }
            }
            FiberKind::HostText => {
                let props = self.arena[wip].pending_props.clone();
                match current.filter(|_| self.arena[wip].state_node.is_some()) {
                    Some(current) => {
                        let changed = self.arena[current]
                            .memoized_props
                            .as_ref()
                            .is_none_or(|old| old.text_content() != props.text_content());
                        if changed {
                            self.arena[wip].flags |= Flags::UPDATE;
                        }
                    }
                    None => {
                        let instance = self.host.create_text_instance(props.text_content());
                        self.arena[wip].state_node = Some(instance);
                    }
                }
            }
            FiberKind::ContextProvider(context) => self.session.contexts.pop(&context),
            FiberKind::Suspense => {
                self.session.suspense_handlers.pop();
                self.mark_offscreen_visibility(wip);
            }
            FiberKind::HostRoot
            | FiberKind::FunctionComponent(_)
            | FiberKind::Memo(_)
            | FiberKind::Fragment
            | FiberKind::Offscreen => {}
        }
        self.bubble_properties(wip);
        tracing::trace!(fiber = ?wip, "complete");
    }

    /// Attach the top-level host nodes below `wip` to its new instance.
    fn append_all_children(&mut self, parent: &H::Instance, wip: FiberId) {
        let Some(mut node) = self.arena[wip].child else {
            return;
        };
        loop {
            let f = &self.arena[node];
            if f.kind.is_host() {
                if let Some(child) = f.state_node.clone() {
                    self.host.append_initial_child(parent, &child);
                }
            } else if let Some(child) = f.child {
                self.arena[child].ret = Some(node);
                node = child;
                continue;
            }
            if node == wip {
                return;
            }
            while self.arena[node].sibling.is_none() {
                match self.arena[node].ret {
                    Some(ret) if ret != wip => node = ret,
                    _ => return,
                }
            }
            let ret = self.arena[node].ret;
            let Some(sibling) = self.arena[node].sibling else {
                return;
            };
            self.arena[sibling].ret = ret;
            node = sibling;
        }
    }

    /// Flag the boundary's offscreen child when it switches between shown and hidden.
    fn mark_offscreen_visibility(&mut self, suspense: FiberId) {
        let Some(offscreen) = self.arena[suspense].child else {
            return;
        };
        if !matches!(self.arena[offscreen].kind, FiberKind::Offscreen) {
            return;
        }
        let hidden = self.arena[offscreen].pending_props.is_hidden();
        // A boundary that mounted straight into its fallback has no committed primary nodes.
        let toggled = self.arena[offscreen]
            .alternate
            .and_then(|alt| self.arena.get(alt))
            .is_some_and(|alt| alt.child.is_some() && alt.pending_props.is_hidden() != hidden);
        if toggled {
            self.arena[offscreen].flags |= Flags::VISIBILITY;
        }
    }

    /// Fold the children's lanes, and unless the children were reused as-is, their flags.
    fn bubble_properties(&mut self, wip: FiberId) {
        let reused = self.arena[wip]
            .alternate
            .is_some_and(|current| self.arena[current].child == self.arena[wip].child);
        let mut child_lanes = Lanes::empty();
        let mut subtree_flags = Flags::empty();
        let mut next = self.arena[wip].child;
        while let Some(child) = next {
            let c = &mut self.arena[child];
            child_lanes |= c.lanes | c.child_lanes;
            if !reused {
                subtree_flags |= c.subtree_flags | c.flags;
                c.ret = Some(wip);
            }
            next = c.sibling;
        }
        let w = &mut self.arena[wip];
        w.child_lanes = child_lanes;
        w.subtree_flags |= subtree_flags;
    }
}
