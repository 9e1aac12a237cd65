// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Begin work: the top-down half of a unit of work.
//!
//! Each fiber either bails out, reusing its committed children without running user code,
//! or produces its next children and reconciles them against the committed ones. A fiber
//! bails out when its props are the same object as last commit, its type is unchanged, and
//! none of its own lanes are being rendered. Its subtree is skipped entirely when no child
//! lane is being rendered either.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::child_fibers::ChildReconciler;
use crate::context::{Context, Dependencies};
use crate::element::{Component, Memo, Node};
use crate::error::Interrupt;
use crate::fiber::{Fiber, FiberId, FiberKind, FiberQueue, MemoizedState, RootState};
use crate::flags::Flags;
use crate::hooks::{HookRenderState, Hooks};
use crate::host::HostConfig;
use crate::lanes::{Lane, Lanes};
use crate::update_queue::process_update_queue;
use crate::value::{Props, Value, shallow_equals};
use crate::work_loop::Engine;

impl<H: HostConfig> Engine<H> {
    /// Begin `wip`; returns the child to work on next, if any.
    pub(crate) fn begin_work(&mut self, wip: FiberId) -> Result<Option<FiberId>, Interrupt> {
        let lane = self.session.lane;
        self.session.did_receive_update = false;

        if let Some(current) = self.arena[wip].alternate {
            let c = &self.arena[current];
            let w = &self.arena[wip];
            let same_props = c
                .memoized_props
                .as_ref()
                .is_some_and(|p| p.ptr_eq(&w.pending_props));
            if !same_props || !c.kind.same_type(&w.kind) {
                self.session.did_receive_update = true;
            } else if !c.lanes.intersects(lane) && !w.flags.contains(Flags::DID_CAPTURE) {
                tracing::trace!(fiber = ?wip, "bailout");
                return Ok(self.attempt_early_bailout(wip));
            }
        }

        self.arena[wip].lanes = Lanes::empty();
        tracing::trace!(fiber = ?wip, kind = ?self.arena[wip].kind, "begin");
        let kind = self.arena[wip].kind.clone();
        let props = self.arena[wip].pending_props.clone();
        match kind {
            FiberKind::HostRoot => Ok(self.update_host_root(wip)),
            FiberKind::HostComponent(_) => {
                self.mark_ref(wip);
                self.reconcile_children(wip, props.children());
                Ok(self.arena[wip].child)
            }
            FiberKind::HostText => Ok(None),
            FiberKind::FunctionComponent(component) => {
                self.update_function_component(wip, &component, &props)
            }
            FiberKind::Fragment | FiberKind::Offscreen => {
                self.reconcile_children(wip, props.children());
                Ok(self.arena[wip].child)
            }
            FiberKind::ContextProvider(context) => {
                Ok(self.update_context_provider(wip, &context, &props))
            }
            FiberKind::Suspense => Ok(self.update_suspense_component(wip, &props)),
            FiberKind::Memo(memo) => self.update_memo_component(wip, &memo, props),
        }
    }

    /// Bailout entry: restore the stacks this fiber would have pushed, then skip or clone.
    fn attempt_early_bailout(&mut self, wip: FiberId) -> Option<FiberId> {
        match &self.arena[wip].kind {
            FiberKind::ContextProvider(context) => {
                let context = context.clone();
                let value = provided_value(&self.arena[wip].pending_props);
                self.session.contexts.push(&context, value);
            }
            FiberKind::Suspense => self.session.suspense_handlers.push(wip),
            _ => {}
        }
        self.bailout_on_already_finished_work(wip)
    }

    pub(crate) fn bailout_on_already_finished_work(&mut self, wip: FiberId) -> Option<FiberId> {
        if !self.arena[wip].child_lanes.intersects(self.session.lane) {
            return None;
        }
        self.clone_child_fibers(wip);
        self.arena[wip].child
    }

    /// Replace the committed children of `wip` by their work-in-progress copies, unchanged.
    fn clone_child_fibers(&mut self, wip: FiberId) {
        let Some(current_child) = self.arena[wip].child else {
            return;
        };
        let props = self.arena[current_child].pending_props.clone();
        let mut new_child = self.arena.create_work_in_progress(current_child, props);
        self.arena[wip].child = Some(new_child);
        self.arena[new_child].ret = Some(wip);

        let mut current = current_child;
        while let Some(next) = self.arena[current].sibling {
            current = next;
            let props = self.arena[current].pending_props.clone();
            let sibling = self.arena.create_work_in_progress(current, props);
            self.arena[new_child].sibling = Some(sibling);
            self.arena[sibling].ret = Some(wip);
            new_child = sibling;
        }
        self.arena[new_child].sibling = None;
    }

    pub(crate) fn reconcile_children(&mut self, wip: FiberId, next: &Node) {
        let current = self.arena[wip].alternate;
        let (current_first, track) = match current {
            Some(current) => (self.arena[current].child, true),
            None => (None, false),
        };
        let child = ChildReconciler::new(&mut self.arena, track).reconcile(wip, current_first, next);
        self.arena[wip].child = child;
    }

    fn mark_ref(&mut self, wip: FiberId) {
        let r = self.arena[wip].ref_.as_ref();
        let changed = match self.arena[wip].alternate {
            None => r.is_some(),
            Some(current) => match (self.arena[current].ref_.as_ref(), r) {
                (None, None) => false,
                (Some(a), Some(b)) => !a.ptr_eq(b),
                _ => true,
            },
        };
        if changed {
            self.arena[wip].flags |= Flags::REF;
        }
    }

    fn update_host_root(&mut self, wip: FiberId) -> Option<FiberId> {
        let lane = self.session.lane;
        let (queue, prev) = match (
            &self.arena[wip].update_queue,
            &self.arena[wip].memoized_state,
        ) {
            (FiberQueue::Root(queue), MemoizedState::Root(prev)) => (queue.clone(), prev.clone()),
            _ => {
                tracing::warn!("host root without a root queue");
                return None;
            }
        };

        // Fold new updates into the committed base queue so an interrupted render keeps them.
        let pending = core::mem::take(&mut *queue.borrow_mut());
        if !pending.is_empty() {
            prev.base_queue.borrow_mut().extend(pending);
        }
        let updates = prev.base_queue.borrow().clone();
        let processed = process_update_queue(
            prev.base_state.clone(),
            &updates,
            lane,
            |_, next: &Node| next.clone(),
        );

        let next = processed.memoized_state;
        let f = &mut self.arena[wip];
        f.lanes |= processed.skipped_lanes;
        f.memoized_state = MemoizedState::Root(RootState {
            element: next.clone(),
            base_state: processed.base_state,
            base_queue: Rc::new(RefCell::new(processed.base_queue)),
        });

        if next.is(&prev.element) {
            return self.bailout_on_already_finished_work(wip);
        }
        self.reconcile_children(wip, &next);
        self.arena[wip].child
    }

    fn update_function_component(
        &mut self,
        wip: FiberId,
        component: &Component,
        props: &Props,
    ) -> Result<Option<FiberId>, Interrupt> {
        let lane = self.session.lane;
        let current = self.arena[wip].alternate;

        // A changed context read last time counts as new input.
        if self.arena[wip].dependencies.lanes.intersects(lane) {
            self.session.did_receive_update = true;
        }

        let current_hooks = current
            .and_then(|c| self.arena[c].hooks())
            .filter(|hooks| !hooks.is_empty())
            .cloned();
        let mut state = HookRenderState::new(
            wip,
            component.name(),
            current_hooks,
            lane,
            self.signals.clone(),
        );
        let children = {
            let mut hooks = Hooks::new(&mut state, &self.session.contexts);
            component.render(&mut hooks, props)?
        };
        state.finish()?;

        let f = &mut self.arena[wip];
        f.memoized_state = MemoizedState::Hooks(state.hooks);
        f.update_queue = FiberQueue::Effects(state.effects);
        f.flags |= state.flags;
        f.lanes |= state.skipped_lanes;
        f.dependencies = Dependencies {
            lanes: Lanes::empty(),
            contexts: state.dependencies,
        };

        if let Some(current) = current {
            if !self.session.did_receive_update && !state.did_receive_update {
                self.bailout_hooks(wip, current, lane);
                return Ok(self.bailout_on_already_finished_work(wip));
            }
        }
        self.reconcile_children(wip, &children);
        Ok(self.arena[wip].child)
    }

    /// The component re-ran but produced nothing new: keep the committed effects.
    fn bailout_hooks(&mut self, wip: FiberId, current: FiberId, lane: Lane) {
        let queue = self.arena[current].update_queue.clone();
        self.arena[current].lanes -= lane;
        let w = &mut self.arena[wip];
        w.update_queue = queue;
        w.flags -= Flags::PASSIVE_EFFECT | Flags::LAYOUT_EFFECT;
    }

    fn update_memo_component(
        &mut self,
        wip: FiberId,
        memo: &Memo,
        props: Props,
    ) -> Result<Option<FiberId>, Interrupt> {
        let mut props = props;
        let current = self.arena[wip].alternate;
        let prev = current.and_then(|c| self.arena[c].memoized_props.clone());
        if let (Some(current), Some(prev)) = (current, prev) {
            let equal = match memo.compare() {
                Some(compare) => compare(&prev, &props),
                None => shallow_equals(&prev, &props),
            };
            let c = &self.arena[current];
            let w = &self.arena[wip];
            let same_ref = match (&c.ref_, &w.ref_) {
                (None, None) => true,
                (Some(a), Some(b)) => a.ptr_eq(b),
                _ => false,
            };
            if equal && same_ref {
                self.session.did_receive_update = false;
                self.arena[wip].pending_props = prev.clone();
                props = prev;
                if !self.arena[current].lanes.intersects(self.session.lane) {
                    tracing::trace!(fiber = ?wip, "memo bailout");
                    return Ok(self.bailout_on_already_finished_work(wip));
                }
            }
        }
        self.update_function_component(wip, memo.component(), &props)
    }

    fn update_context_provider(
        &mut self,
        wip: FiberId,
        context: &Context,
        props: &Props,
    ) -> Option<FiberId> {
        if props.get("value").is_none() {
            tracing::warn!(context = context.name(), "provider rendered without a `value` prop");
        }
        let value = provided_value(props);
        self.session.contexts.push(context, value.clone());

        let old = self.arena[wip]
            .alternate
            .and_then(|c| self.arena[c].memoized_props.clone());
        if let Some(old) = old {
            if provided_value(&old).is(&value) {
                if old.children().is(props.children()) {
                    return self.bailout_on_already_finished_work(wip);
                }
            } else {
                self.propagate_context_change(wip, context, &value);
            }
        }
        self.reconcile_children(wip, props.children());
        self.arena[wip].child
    }

    /// Mark every consumer below `provider` whose last read of `context` differs from
    /// `value`, and the child lanes on the path back up to the provider.
    fn propagate_context_change(&mut self, provider: FiberId, context: &Context, value: &Value) {
        let lane = self.session.lane;
        let provider_alt = self.arena[provider].alternate;
        let mut stack: Vec<FiberId> = self.arena[provider].child.into_iter().collect();
        while let Some(id) = stack.pop() {
            let f = &self.arena[id];
            if let Some(sibling) = f.sibling {
                stack.push(sibling);
            }
            let stale = f
                .dependencies
                .contexts
                .iter()
                .any(|d| d.context.ptr_eq(context) && !d.memoized_value.is(value));
            if stale {
                tracing::trace!(fiber = ?id, context = context.name(), "context consumer marked");
                self.mark_consumer(id, lane);
                let mut parent = self.arena[id].ret;
                while let Some(p) = parent {
                    if p == provider || Some(p) == provider_alt {
                        break;
                    }
                    self.arena[p].child_lanes |= lane;
                    if let Some(alt) = self.arena[p].alternate {
                        if let Some(a) = self.arena.get_mut(alt) {
                            a.child_lanes |= lane;
                        }
                    }
                    parent = self.arena[p].ret;
                }
            }
            let f = &self.arena[id];
            let shadows = matches!(&f.kind, FiberKind::ContextProvider(c) if c.ptr_eq(context));
            if !shadows {
                if let Some(child) = f.child {
                    stack.push(child);
                }
            }
        }
    }

    fn mark_consumer(&mut self, id: FiberId, lane: Lane) {
        let f = &mut self.arena[id];
        f.lanes |= lane;
        f.dependencies.lanes |= lane;
        if let Some(alt) = f.alternate {
            if let Some(a) = self.arena.get_mut(alt) {
                a.lanes |= lane;
                a.dependencies.lanes |= lane;
            }
        }
    }

    fn update_suspense_component(&mut self, wip: FiberId, props: &Props) -> Option<FiberId> {
        let show_fallback = self.arena[wip].flags.contains(Flags::DID_CAPTURE);
        self.arena[wip].flags -= Flags::DID_CAPTURE;

        let primary = props.children().clone();
        let fallback = match props.get("fallback") {
            Some(Value::Node(node)) => node.clone(),
            _ => Node::Empty,
        };

        if show_fallback {
            // A suspension inside the fallback belongs to an outer boundary.
            self.session.suspense_handlers.push_enclosing();
        } else {
            self.session.suspense_handlers.push(wip);
        }

        let current_offscreen = self
            .arena[wip]
            .alternate
            .and_then(|current| self.arena[current].child);
        match (current_offscreen, show_fallback) {
            (None, false) => {
                let offscreen = self.arena.insert(Fiber::offscreen(false, primary));
                self.arena[offscreen].ret = Some(wip);
                self.arena[wip].child = Some(offscreen);
                Some(offscreen)
            }
            (None, true) => {
                let offscreen = self.arena.insert(Fiber::offscreen(true, primary));
                let fallback = self.arena.insert(Fiber::fragment(fallback, None));
                self.link_suspense_children(wip, offscreen, Some(fallback));
                Some(fallback)
            }
            (Some(current_offscreen), false) => {
                let current_fallback = self.arena[current_offscreen].sibling;
                let offscreen = self
                    .arena
                    .create_work_in_progress(current_offscreen, Props::offscreen(false, primary));
                self.link_suspense_children(wip, offscreen, None);
                if let Some(current_fallback) = current_fallback {
                    let w = &mut self.arena[wip];
                    w.deletions.push(current_fallback);
                    w.flags |= Flags::CHILD_DELETION;
                }
                Some(offscreen)
            }
            (Some(current_offscreen), true) => {
                let current_fallback = self.arena[current_offscreen].sibling;
                let offscreen = self
                    .arena
                    .create_work_in_progress(current_offscreen, Props::offscreen(true, primary));
                // The hidden primary tree is not rendered now; its work waits for the retry.
                let remaining = self.arena[current_offscreen].child_lanes - self.session.lane;
                self.arena[offscreen].child_lanes = remaining;
                let fallback = match current_fallback {
                    Some(current_fallback) => self
                        .arena
                        .create_work_in_progress(current_fallback, Props::with_children(fallback)),
                    None => {
                        let created = self.arena.insert(Fiber::fragment(fallback, None));
                        self.arena[created].flags |= Flags::PLACEMENT;
                        created
                    }
                };
                self.link_suspense_children(wip, offscreen, Some(fallback));
                Some(fallback)
            }
        }
    }

    fn link_suspense_children(&mut self, wip: FiberId, offscreen: FiberId, fallback: Option<FiberId>) {
        {
            let o = &mut self.arena[offscreen];
            o.ret = Some(wip);
            o.sibling = fallback;
            o.index = 0;
        }
        if let Some(fallback) = fallback {
            let f = &mut self.arena[fallback];
            f.ret = Some(wip);
            f.sibling = None;
            f.index = 1;
        }
        self.arena[wip].child = Some(offscreen);
    }
}

/// The `value` prop of a provider; missing values read as null.
pub(crate) fn provided_value(props: &Props) -> Value {
    props.get("value").cloned().unwrap_or(Value::Null)
}
