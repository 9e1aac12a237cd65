// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Child reconciliation: matching the previous children of a fiber to its next children.
//!
//! ## Single child
//!
//! The previous sibling chain is walked once. A fiber with the same key and a matching type
//! is reused and every other old sibling is deleted; otherwise all old siblings are deleted
//! and a fresh fiber is created.
//!
//! ## Lists
//!
//! Old children are indexed by key, or by their position when unkeyed. New children are
//! matched left to right; a reused fiber whose old position is before the last reused
//! position is marked as moved. This is a greedy single pass, not a longest increasing
//! subsequence, so some reorders are reported with more moves than strictly necessary.
//! Unclaimed old children are deleted.
//!
//! Placement and deletion are recorded only when tracking effects, i.e. when the parent
//! already exists in the committed tree.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;

use crate::element::{Element, ElementType, Key, Node};
use crate::fiber::{Fiber, FiberArena, FiberId, FiberKind};
use crate::flags::Flags;
use crate::value::Props;

/// Identity of an old child in the list path.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum MapKey {
    Key(Key),
    Index(usize),
}

/// Reconciler for the children of one parent fiber.
pub(crate) struct ChildReconciler<'a, I> {
    arena: &'a mut FiberArena<I>,
    track_effects: bool,
}

impl<'a, I: Clone> ChildReconciler<'a, I> {
    pub(crate) fn new(arena: &'a mut FiberArena<I>, track_effects: bool) -> Self {
        Self {
            arena,
            track_effects,
        }
    }

    /// Reconcile `parent`'s old children (starting at `current_first`) against `next`.
    /// Returns the new first child.
    pub(crate) fn reconcile(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        next: &Node,
    ) -> Option<FiberId> {
        // Unkeyed top-level fragments are transparent.
        let unwrapped;
        let next = match next {
            Node::Element(el) if matches!(el.ty(), ElementType::Fragment) && el.key().is_none() => {
                unwrapped = el.props().children().clone();
                &unwrapped
            }
            other => other,
        };

        match next {
            Node::Element(el) => {
                let fiber = self.reconcile_single_element(parent, current_first, el);
                Some(self.place_single(fiber))
            }
            Node::Text(content) if !content.is_empty() => {
                let fiber = self.reconcile_single_text(parent, current_first, content.clone());
                Some(self.place_single(fiber))
            }
            Node::List(items) => self.reconcile_children_array(parent, current_first, items),
            Node::Text(_) | Node::Empty => {
                self.delete_remaining(parent, current_first);
                None
            }
        }
    }

    fn delete_child(&mut self, parent: FiberId, child: FiberId) {
        if !self.track_effects {
            return;
        }
        let p = &mut self.arena[parent];
        p.deletions.push(child);
        p.flags |= Flags::CHILD_DELETION;
    }

    fn delete_remaining(&mut self, parent: FiberId, first: Option<FiberId>) {
        let mut next = first;
        while let Some(child) = next {
            self.delete_child(parent, child);
            next = self.arena[child].sibling;
        }
    }

    /// Work-in-progress copy of `current` as an only child.
    fn use_fiber(&mut self, current: FiberId, props: Props) -> FiberId {
        let clone = self.arena.create_work_in_progress(current, props);
        let f = &mut self.arena[clone];
        f.index = 0;
        f.sibling = None;
        clone
    }

    fn place_single(&mut self, fiber: FiberId) -> FiberId {
        let f = &mut self.arena[fiber];
        if self.track_effects && f.alternate.is_none() {
            f.flags |= Flags::PLACEMENT;
        }
        fiber
    }

    fn reconcile_single_element(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        element: &Element,
    ) -> FiberId {
        let key = element.key();
        let mut next = current_first;
        while let Some(child) = next {
            let f = &self.arena[child];
            let sibling = f.sibling;
            if f.key.as_deref() == key {
                if f.kind.matches(element.ty()) {
                    self.delete_remaining(parent, sibling);
                    let existing = self.use_fiber(child, element.props().clone());
                    let e = &mut self.arena[existing];
                    e.ret = Some(parent);
                    e.ref_ = element.ref_().cloned();
                    return existing;
                }
                // Same key, different type: nothing below can match either.
                self.delete_remaining(parent, Some(child));
                break;
            }
            self.delete_child(parent, child);
            next = sibling;
        }
        let created = self.arena.insert(Fiber::from_element(element));
        self.arena[created].ret = Some(parent);
        created
    }

    fn reconcile_single_text(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        content: alloc::rc::Rc<str>,
    ) -> FiberId {
        if let Some(child) = current_first {
            if matches!(self.arena[child].kind, FiberKind::HostText) {
                let sibling = self.arena[child].sibling;
                self.delete_remaining(parent, sibling);
                let existing = self.use_fiber(child, Props::text(content));
                self.arena[existing].ret = Some(parent);
                return existing;
            }
        }
        self.delete_remaining(parent, current_first);
        let created = self.arena.insert(Fiber::text(content));
        self.arena[created].ret = Some(parent);
        created
    }

    fn reconcile_children_array(
        &mut self,
        parent: FiberId,
        current_first: Option<FiberId>,
        items: &[Node],
    ) -> Option<FiberId> {
        let mut existing: BTreeMap<MapKey, FiberId> = BTreeMap::new();
        let mut old_order = Vec::new();
        let mut next = current_first;
        while let Some(child) = next {
            let f = &self.arena[child];
            let key = f
                .key
                .clone()
                .map_or(MapKey::Index(f.index), MapKey::Key);
            existing.insert(key, child);
            old_order.push(child);
            next = f.sibling;
        }

        let mut last_placed_index = 0;
        let mut first: Option<FiberId> = None;
        let mut last: Option<FiberId> = None;
        for (i, item) in items.iter().enumerate() {
            let Some(fiber) = self.update_from_map(&mut existing, i, item) else {
                continue;
            };
            {
                let f = &mut self.arena[fiber];
                f.index = i;
                f.ret = Some(parent);
                f.sibling = None;
            }
            match last {
                Some(prev) => self.arena[prev].sibling = Some(fiber),
                None => first = Some(fiber),
            }
            last = Some(fiber);

            if !self.track_effects {
                continue;
            }
            match self.arena[fiber].alternate {
                Some(current) => {
                    let old_index = self.arena[current].index;
                    if old_index < last_placed_index {
                        self.arena[fiber].flags |= Flags::PLACEMENT;
                    } else {
                        last_placed_index = old_index;
                    }
                }
                None => self.arena[fiber].flags |= Flags::PLACEMENT,
            }
        }

        let leftover: BTreeSet<FiberId> = existing.into_values().collect();
        for child in old_order {
            if leftover.contains(&child) {
                self.delete_child(parent, child);
            }
        }
        first
    }

    /// Fiber for the list item at `index`, reusing a matching old child when possible.
    fn update_from_map(
        &mut self,
        existing: &mut BTreeMap<MapKey, FiberId>,
        index: usize,
        item: &Node,
    ) -> Option<FiberId> {
        match item {
            Node::Empty => None,
            Node::Text(content) => {
                let key = MapKey::Index(index);
                if let Some(&old) = existing.get(&key) {
                    if matches!(self.arena[old].kind, FiberKind::HostText) {
                        existing.remove(&key);
                        return Some(
                            self.arena
                                .create_work_in_progress(old, Props::text(content.clone())),
                        );
                    }
                }
                Some(self.arena.insert(Fiber::text(content.clone())))
            }
            Node::Element(el) => {
                let key = el
                    .key_rc()
                    .cloned()
                    .map_or(MapKey::Index(index), MapKey::Key);
                if let Some(&old) = existing.get(&key) {
                    if self.arena[old].kind.matches(el.ty()) {
                        existing.remove(&key);
                        let fiber = self.arena.create_work_in_progress(old, el.props().clone());
                        self.arena[fiber].ref_ = el.ref_().cloned();
                        return Some(fiber);
                    }
                }
                Some(self.arena.insert(Fiber::from_element(el)))
            }
            Node::List(_) => {
                // Nested lists become unkeyed fragments.
                let key = MapKey::Index(index);
                let props = Props::with_children(item.clone());
                if let Some(&old) = existing.get(&key) {
                    if matches!(self.arena[old].kind, FiberKind::Fragment) {
                        existing.remove(&key);
                        return Some(self.arena.create_work_in_progress(old, props));
                    }
                }
                Some(self.arena.insert(Fiber::fragment(item.clone(), None)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{h, text};
    use alloc::vec;

    type Arena = FiberArena<u32>;

    fn keyed(keys: &[&str]) -> Node {
        Node::list(keys.iter().map(|k| h("li").key(*k).child(text(k)).into()))
    }

    /// Mount `node` under a fresh parent and return (parent, children) as committed fibers.
    fn mount(arena: &mut Arena, node: &Node) -> (FiberId, Vec<FiberId>) {
        let parent = arena.insert(Fiber::new(FiberKind::Fragment, Props::empty(), None));
        let first = ChildReconciler::new(arena, false).reconcile(parent, None, node);
        arena[parent].child = first;
        let children = arena.children(parent);
        (parent, children)
    }

    /// Reconcile `node` against the committed children of `current_parent`.
    fn update(arena: &mut Arena, current_parent: FiberId, node: &Node) -> (FiberId, Vec<FiberId>) {
        let wip = arena.create_work_in_progress(current_parent, Props::empty());
        let current_first = arena[current_parent].child;
        let first = ChildReconciler::new(arena, true).reconcile(wip, current_first, node);
        arena[wip].child = first;
        let children = arena.children(wip);
        (wip, children)
    }

    fn placed(arena: &Arena, children: &[FiberId]) -> Vec<usize> {
        children
            .iter()
            .filter(|&&c| arena[c].flags.contains(Flags::PLACEMENT))
            .map(|&c| arena[c].index)
            .collect()
    }

    #[test]
    fn mount_records_no_effects() {
        let mut arena = Arena::new();
        let (parent, children) = mount(&mut arena, &keyed(&["a", "b", "c"]));
        assert_eq!(children.len(), 3);
        assert!(placed(&arena, &children).is_empty());
        assert!(arena[parent].deletions.is_empty());
        assert_eq!(arena[children[2]].index, 2);
    }

    #[test]
    fn moving_one_item_forward_marks_one_placement() {
        let mut arena = Arena::new();
        let (parent, old) = mount(&mut arena, &keyed(&["a", "b", "c"]));
        let (wip, new) = update(&mut arena, parent, &keyed(&["b", "c", "a"]));

        // Every fiber is reused; only `a` moves.
        for (n, o) in new.iter().zip([old[1], old[2], old[0]]) {
            assert_eq!(arena[*n].alternate, Some(o));
        }
        assert_eq!(placed(&arena, &new), vec![2]);
        assert!(arena[wip].deletions.is_empty());
    }

    #[test]
    fn greedy_pass_over_marks_moves() {
        let mut arena = Arena::new();
        let (parent, _) = mount(&mut arena, &keyed(&["a", "b", "c"]));
        let (wip, new) = update(&mut arena, parent, &keyed(&["c", "a", "b"]));
        // `c` is placed first, so both `a` and `b` are reported as moved.
        assert_eq!(placed(&arena, &new), vec![1, 2]);
        assert!(arena[wip].deletions.is_empty());
    }

    #[test]
    fn unclaimed_children_are_deleted_in_order() {
        let mut arena = Arena::new();
        let (parent, old) = mount(&mut arena, &keyed(&["a", "b", "c", "d"]));
        let (wip, new) = update(&mut arena, parent, &keyed(&["c", "x"]));
        assert_eq!(new.len(), 2);
        assert_eq!(arena[wip].deletions, vec![old[0], old[1], old[3]]);
        assert!(arena[wip].flags.contains(Flags::CHILD_DELETION));
        // `x` is new.
        assert!(arena[new[1]].alternate.is_none());
        assert_eq!(placed(&arena, &new), vec![1]);
    }

    #[test]
    fn type_change_replaces_fiber() {
        let mut arena = Arena::new();
        let (parent, old) = mount(&mut arena, &Node::from(h("div")));
        let (wip, new) = update(&mut arena, parent, &Node::from(h("span")));
        assert_eq!(arena[wip].deletions, vec![old[0]]);
        assert_eq!(placed(&arena, &new), vec![0]);
    }

    #[test]
    fn single_keyed_child_found_among_siblings() {
        let mut arena = Arena::new();
        let (parent, old) = mount(&mut arena, &keyed(&["a", "b", "c"]));
        let next: Node = h("li").key("b").into();
        let (wip, new) = update(&mut arena, parent, &next);
        assert_eq!(new.len(), 1);
        assert_eq!(arena[new[0]].alternate, Some(old[1]));
        assert_eq!(arena[wip].deletions, vec![old[0], old[2]]);
        assert!(placed(&arena, &new).is_empty());
    }

    #[test]
    fn text_reused_and_empty_string_clears() {
        let mut arena = Arena::new();
        let (parent, old) = mount(&mut arena, &text("one"));
        let (_, new) = update(&mut arena, parent, &text("two"));
        assert_eq!(arena[new[0]].alternate, Some(old[0]));
        assert_eq!(arena[new[0]].pending_props.text_content(), "two");

        let (wip, new) = update(&mut arena, parent, &text(""));
        assert!(new.is_empty());
        assert_eq!(arena[wip].deletions, vec![old[0]]);
    }

    #[test]
    fn unkeyed_lists_match_by_position_and_nest_as_fragments() {
        let mut arena = Arena::new();
        let inner = Node::list(vec![text("x"), text("y")]);
        let first = Node::list(vec![h("a").into(), inner.clone()]);
        let (parent, old) = mount(&mut arena, &first);
        assert!(matches!(arena[old[1]].kind, FiberKind::Fragment));

        let second = Node::list(vec![h("b").into(), inner]);
        let (wip, new) = update(&mut arena, parent, &second);
        // Position 0 changed type, position 1 kept its fragment.
        assert_eq!(arena[wip].deletions, vec![old[0]]);
        assert_eq!(arena[new[1]].alternate, Some(old[1]));
    }

    #[test]
    fn unkeyed_top_level_fragment_is_unwrapped() {
        let mut arena = Arena::new();
        let node: Node = crate::element::fragment(vec![h("a").into(), h("b").into()]);
        let (_, children) = mount(&mut arena, &node);
        assert_eq!(children.len(), 2);
        assert!(matches!(&arena[children[0]].kind, FiberKind::HostComponent(t) if &**t == "a"));
    }
}
