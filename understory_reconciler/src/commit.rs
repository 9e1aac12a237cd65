// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Commit: apply a completed work-in-progress tree to the host, then swap it in.
//!
//! Commit never yields. It runs in three passes:
//!
//! 1. Mutation, children before parents. Deletions are processed first, then host
//!    placement, prop and text updates, ref detachment, layout-effect cleanups,
//!    and visibility toggles.
//! 2. The root's `current` pointer moves to the finished tree.
//! 3. Layout: refs are attached and layout effects created, children before parents.
//!
//! Passive effects are collected during the mutation pass and run later by
//! [`Engine::flush_passive_effects`], all cleanups before any create.

use alloc::vec;
use alloc::vec::Vec;

use crate::fiber::{FiberId, FiberKind};
use crate::flags::{EffectTag, Flags};
use crate::host::{HostConfig, HostUpdate};
use crate::lanes::{Lanes, NO_LANE};
use crate::work_loop::{Engine, RenderSession};

impl<H: HostConfig> Engine<H> {
    pub(crate) fn commit_root(&mut self) {
        let Some(finished) = self.session.wip_root else {
            return;
        };
        let lane = self.session.lane;
        let (remaining, flags) = {
            let f = &self.arena[finished];
            (f.lanes | f.child_lanes, f.flags | f.subtree_flags)
        };
        tracing::debug!(?lane, ?remaining, "commit");
        self.root.lanes.mark_finished(lane, remaining);
        self.root.callback_priority = NO_LANE;

        if flags.intersects(Flags::PASSIVE_MASK) {
            self.schedule_passive_flush();
        }

        // Updates dispatched by layout effects re-render before the host yields.
        let prev = self.signals.set_lane_override(Some(Lanes::SYNC));
        self.commit_mutation_effects(finished);
        self.root.current = finished;
        self.commit_layout_effects(finished);
        self.signals.set_lane_override(prev);

        self.session = RenderSession::default();
        self.sweep_if_needed();
        self.process_signals();
        self.ensure_root_is_scheduled();
    }

    fn commit_mutation_effects(&mut self, id: FiberId) {
        let deletions = core::mem::take(&mut self.arena[id].deletions);
        for deleted in deletions {
            self.commit_deletion(id, deleted);
        }

        if self.arena[id]
            .subtree_flags
            .intersects(Flags::MUTATION_MASK | Flags::PASSIVE_MASK | Flags::LAYOUT_MASK)
        {
            let mut child = self.arena[id].child;
            while let Some(c) = child {
                self.commit_mutation_effects(c);
                child = self.arena[c].sibling;
            }
        }

        let flags = self.arena[id].flags;
        if flags.contains(Flags::PLACEMENT) {
            self.commit_placement(id);
        }
        if flags.contains(Flags::UPDATE) {
            self.commit_update(id);
        }
        if flags.contains(Flags::REF) {
            if let Some(current) = self.arena[id].alternate {
                if let Some(r) = self.arena.get(current).and_then(|c| c.ref_.as_ref()) {
                    r.clear();
                }
            }
        }
        if flags.contains(Flags::LAYOUT_EFFECT) {
            for effect in self.arena[id].effects() {
                if effect.needs_run(EffectTag::LAYOUT) {
                    effect.run_destroy();
                }
            }
        }
        if flags.contains(Flags::PASSIVE_EFFECT) {
            let effects: Vec<_> = self.arena[id]
                .effects()
                .iter()
                .filter(|e| e.tag.contains(EffectTag::PASSIVE))
                .cloned()
                .collect();
            self.root.pending_passive.update.extend(effects);
        }
        if flags.contains(Flags::VISIBILITY) && matches!(self.arena[id].kind, FiberKind::Offscreen) {
            let hidden = self.arena[id].pending_props.is_hidden();
            tracing::debug!(fiber = ?id, hidden, "offscreen visibility");
            self.hide_or_unhide_all_children(id, hidden);
        }
        self.arena[id].flags -= Flags::PLACEMENT
            | Flags::UPDATE
            | Flags::CHILD_DELETION
            | Flags::VISIBILITY
            | Flags::PASSIVE_EFFECT;
    }

    fn commit_layout_effects(&mut self, id: FiberId) {
        if self.arena[id].subtree_flags.intersects(Flags::LAYOUT_MASK) {
            let mut child = self.arena[id].child;
            while let Some(c) = child {
                self.commit_layout_effects(c);
                child = self.arena[c].sibling;
            }
        }

        let f = &self.arena[id];
        if f.flags.contains(Flags::LAYOUT_EFFECT) {
            for effect in f.effects() {
                if effect.needs_run(EffectTag::LAYOUT) {
                    effect.run_create();
                }
            }
        }
        let f = &self.arena[id];
        if f.flags.contains(Flags::REF) && f.kind.is_host() {
            if let (Some(r), Some(instance)) = (&f.ref_, &f.state_node) {
                r.set(instance.clone());
            }
        }
        self.arena[id].flags -= Flags::LAYOUT_EFFECT | Flags::REF;
    }

    /// Host node that `fiber`'s host nodes are inserted into: the nearest host component or
    /// root at or above `from`.
    fn host_parent(&self, from: Option<FiberId>) -> Option<H::Instance> {
        let mut next = from;
        while let Some(id) = next {
            let f = &self.arena[id];
            if f.kind.is_host_parent() {
                return f.state_node.clone();
            }
            next = f.ret;
        }
        None
    }

    /// First committed host node after `id` in the same host parent, if any.
    fn host_sibling(&mut self, id: FiberId) -> Option<H::Instance> {
        let mut node = id;
        'siblings: loop {
            while self.arena[node].sibling.is_none() {
                match self.arena[node].ret {
                    Some(ret) if !self.arena[ret].kind.is_host_parent() => node = ret,
                    _ => return None,
                }
            }
            let ret = self.arena[node].ret;
            let Some(sibling) = self.arena[node].sibling else {
                return None;
            };
            self.arena[sibling].ret = ret;
            node = sibling;

            while !self.arena[node].kind.is_host() {
                // Nodes about to be placed are not in the host tree yet.
                if self.arena[node].flags.contains(Flags::PLACEMENT) {
                    continue 'siblings;
                }
                let Some(child) = self.arena[node].child else {
                    continue 'siblings;
                };
                self.arena[child].ret = Some(node);
                node = child;
            }
            let f = &self.arena[node];
            if !f.flags.contains(Flags::PLACEMENT) {
                return f.state_node.clone();
            }
        }
    }

    fn commit_placement(&mut self, id: FiberId) {
        let Some(parent) = self.host_parent(self.arena[id].ret) else {
            tracing::warn!(fiber = ?id, "placement without a host parent");
            return;
        };
        let before = self.host_sibling(id);
        tracing::trace!(fiber = ?id, "placement");
        self.insert_or_append(id, &parent, before.as_ref());
    }

    fn insert_or_append(&mut self, id: FiberId, parent: &H::Instance, before: Option<&H::Instance>) {
        let f = &self.arena[id];
        if f.kind.is_host() {
            if let Some(instance) = f.state_node.clone() {
                match before {
                    Some(before) => self.host.insert_child_to_container(&instance, parent, before),
                    None => self.host.append_child_to_container(parent, &instance),
                }
            }
            return;
        }
        let mut child = f.child;
        while let Some(c) = child {
            self.insert_or_append(c, parent, before);
            child = self.arena[c].sibling;
        }
    }

    fn commit_update(&mut self, id: FiberId) {
        let f = &self.arena[id];
        let Some(instance) = f.state_node.clone() else {
            return;
        };
        let new = f.pending_props.clone();
        match &f.kind {
            FiberKind::HostText => {
                self.host
                    .commit_update(&instance, HostUpdate::Text(new.text_content()));
            }
            FiberKind::HostComponent(tag) => {
                let tag = tag.clone();
                let old = f
                    .alternate
                    .and_then(|alt| self.arena.get(alt))
                    .and_then(|alt| alt.memoized_props.clone())
                    .unwrap_or_else(|| new.clone());
                self.host.commit_update(
                    &instance,
                    HostUpdate::Props {
                        ty: &tag,
                        old: &old,
                        new: &new,
                    },
                );
            }
            _ => {}
        }
    }

    /// Unmount `deleted` (a committed child of `parent`) and release its fibers.
    fn commit_deletion(&mut self, parent: FiberId, deleted: FiberId) {
        let Some(host_parent) = self.host_parent(Some(parent)) else {
            tracing::warn!(fiber = ?deleted, "deletion without a host parent");
            return;
        };
        tracing::trace!(fiber = ?deleted, "deletion");

        // (fiber, inside a host node already removed with its ancestor)
        let mut stack = vec![(deleted, false)];
        let mut top_level = Vec::new();
        while let Some((id, nested)) = stack.pop() {
            let Some(f) = self.arena.get(id) else {
                continue;
            };
            match &f.kind {
                FiberKind::HostComponent(_) | FiberKind::HostText => {
                    if let Some(r) = &f.ref_ {
                        r.clear();
                    }
                    if !nested {
                        if let Some(instance) = f.state_node.clone() {
                            top_level.push(instance);
                        }
                    }
                }
                FiberKind::FunctionComponent(_) | FiberKind::Memo(_) => {
                    for effect in f.effects() {
                        if effect.tag.contains(EffectTag::LAYOUT) {
                            effect.run_destroy();
                        } else if effect.tag.contains(EffectTag::PASSIVE) {
                            self.root.pending_passive.unmount.push(effect.clone());
                        }
                    }
                }
                _ => {}
            }
            if id != deleted {
                if let Some(sibling) = f.sibling {
                    stack.push((sibling, nested));
                }
            }
            if let Some(child) = f.child {
                stack.push((child, nested || f.kind.is_host()));
            }
        }

        for instance in &top_level {
            self.host.remove_child(instance, &host_parent);
        }
        self.arena.free_subtree(deleted);
    }

    fn hide_or_unhide_all_children(&mut self, offscreen: FiberId, hide: bool) {
        let mut stack: Vec<FiberId> = self.arena[offscreen].child.into_iter().collect();
        while let Some(id) = stack.pop() {
            let f = &self.arena[id];
            if let Some(sibling) = f.sibling {
                stack.push(sibling);
            }
            match &f.kind {
                FiberKind::HostComponent(_) => {
                    if let Some(instance) = f.state_node.clone() {
                        if hide {
                            self.host.hide_instance(&instance);
                        } else {
                            let props = f.pending_props.clone();
                            self.host.unhide_instance(&instance, &props);
                        }
                    }
                }
                FiberKind::HostText => {
                    if let Some(instance) = f.state_node.clone() {
                        if hide {
                            self.host.hide_text_instance(&instance);
                        } else {
                            let content = f.pending_props.clone();
                            self.host
                                .unhide_text_instance(&instance, content.text_content());
                        }
                    }
                }
                // A nested boundary that is still hidden stays hidden.
                FiberKind::Offscreen if f.pending_props.is_hidden() && !hide => {}
                _ => {
                    if let Some(child) = f.child {
                        stack.push(child);
                    }
                }
            }
        }
    }

    /// Run pending passive effects: every cleanup first, then every create.
    ///
    /// Returns true if anything was pending.
    pub(crate) fn flush_passive_effects(&mut self) -> bool {
        self.passive_scheduled = false;
        let pending = core::mem::take(&mut self.root.pending_passive);
        if pending.unmount.is_empty() && pending.update.is_empty() {
            return false;
        }
        tracing::debug!(
            unmount = pending.unmount.len(),
            update = pending.update.len(),
            "flushing passive effects"
        );
        for effect in &pending.unmount {
            effect.run_destroy();
        }
        for effect in &pending.update {
            if effect.needs_run(EffectTag::PASSIVE) {
                effect.run_destroy();
            }
        }
        for effect in &pending.update {
            if effect.needs_run(EffectTag::PASSIVE) {
                effect.run_create();
            }
        }
        self.process_signals();
        true
    }
}
