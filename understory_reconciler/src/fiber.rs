// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fibers: the persistent per-instance work units, and the arena that owns them.
//!
//! ## Double buffering
//!
//! Every fiber that survives a commit has an `alternate`: the copy used as the
//! work-in-progress during the next render. [`FiberArena::create_work_in_progress`] reuses
//! that copy (or allocates it on first use) and links the pair in both directions. The root's
//! `current` pointer decides which side of each pair is committed.
//!
//! ## Storage
//!
//! Fibers live in a generational arena. Tree links (`ret`, `child`, `sibling`) and
//! `alternate` are [`FiberId`]s rather than pointers. Freed slots bump their generation on
//! reuse, so a stale id never aliases a live fiber.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::ops::{Index, IndexMut};

use crate::context::{Context, Dependencies};
use crate::element::{Component, Element, ElementType, Key, Memo, Node};
use crate::flags::Flags;
use crate::hooks::{Effect, Hook};
use crate::lanes::Lanes;
use crate::update_queue::Update;
use crate::value::{Props, Ref};

/// Identifier for a fiber (generational).
///
/// Handed out by the reconciler for diagnostics; stays distinct from every other fiber's id
/// even after its slot is reused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FiberId(u32, u32);

impl FiberId {
    const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Work kind of a fiber, carrying the type payload each kind needs.
#[derive(Clone, Debug)]
pub enum FiberKind {
    /// The root of a mounted tree.
    HostRoot,
    /// A host element with its tag.
    HostComponent(Rc<str>),
    /// A host text node.
    HostText,
    /// A function component.
    FunctionComponent(Component),
    /// A fragment.
    Fragment,
    /// A context provider.
    ContextProvider(Context),
    /// A suspense boundary.
    Suspense,
    /// The visible/hidden wrapper around a boundary's primary children.
    Offscreen,
    /// A memoized function component.
    Memo(Memo),
}

impl FiberKind {
    pub(crate) fn from_element_type(ty: &ElementType) -> Self {
        match ty {
            ElementType::Host(tag) => Self::HostComponent(tag.clone()),
            ElementType::Function(c) => Self::FunctionComponent(c.clone()),
            ElementType::Fragment => Self::Fragment,
            ElementType::Provider(ctx) => Self::ContextProvider(ctx.clone()),
            ElementType::Suspense => Self::Suspense,
            ElementType::Memo(m) => Self::Memo(m.clone()),
        }
    }

    /// Returns true if a fiber of this kind can be reused for an element of type `ty`.
    pub(crate) fn matches(&self, ty: &ElementType) -> bool {
        match (self, ty) {
            (Self::HostComponent(a), ElementType::Host(b)) => a == b,
            (Self::FunctionComponent(a), ElementType::Function(b)) => a.ptr_eq(b),
            (Self::Fragment, ElementType::Fragment) => true,
            (Self::ContextProvider(a), ElementType::Provider(b)) => a.ptr_eq(b),
            (Self::Suspense, ElementType::Suspense) => true,
            (Self::Memo(a), ElementType::Memo(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Same kind and same type payload.
    pub(crate) fn same_type(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::HostRoot, Self::HostRoot)
            | (Self::HostText, Self::HostText)
            | (Self::Fragment, Self::Fragment)
            | (Self::Suspense, Self::Suspense)
            | (Self::Offscreen, Self::Offscreen) => true,
            (Self::HostComponent(a), Self::HostComponent(b)) => a == b,
            (Self::FunctionComponent(a), Self::FunctionComponent(b)) => a.ptr_eq(b),
            (Self::ContextProvider(a), Self::ContextProvider(b)) => a.ptr_eq(b),
            (Self::Memo(a), Self::Memo(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn is_host(&self) -> bool {
        matches!(self, Self::HostComponent(_) | Self::HostText)
    }

    pub(crate) fn is_host_parent(&self) -> bool {
        matches!(self, Self::HostComponent(_) | Self::HostRoot)
    }
}

/// Committed state of the host root: the rendered children plus rebasing state.
#[derive(Clone, Debug, Default)]
pub(crate) struct RootState {
    pub(crate) element: Node,
    pub(crate) base_state: Node,
    pub(crate) base_queue: Rc<RefCell<Vec<Update<Node>>>>,
}

/// Per-kind memoized state.
#[derive(Clone, Debug, Default)]
pub(crate) enum MemoizedState {
    #[default]
    None,
    Root(RootState),
    Hooks(Vec<Hook>),
}

/// Per-kind update queue.
#[derive(Clone, Debug, Default)]
pub(crate) enum FiberQueue {
    #[default]
    None,
    /// Pending root renders; shared by both fibers of the root pair.
    Root(Rc<RefCell<Vec<Update<Node>>>>),
    /// Effects registered by the last render of a function component, in call order.
    Effects(Vec<Rc<Effect>>),
}

/// A unit of work and the persistent identity of one component or host node.
pub(crate) struct Fiber<I> {
    generation: u32,
    pub(crate) kind: FiberKind,
    pub(crate) key: Option<Key>,
    pub(crate) state_node: Option<I>,

    pub(crate) ret: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,

    pub(crate) pending_props: Props,
    pub(crate) memoized_props: Option<Props>,
    pub(crate) memoized_state: MemoizedState,
    pub(crate) update_queue: FiberQueue,
    pub(crate) ref_: Option<Ref>,

    pub(crate) alternate: Option<FiberId>,

    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) deletions: Vec<FiberId>,

    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,

    pub(crate) dependencies: Dependencies,
}

impl<I> fmt::Debug for Fiber<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("index", &self.index)
            .field("flags", &self.flags)
            .field("lanes", &self.lanes)
            .field("child_lanes", &self.child_lanes)
            .finish_non_exhaustive()
    }
}

impl<I> Fiber<I> {
    pub(crate) fn new(kind: FiberKind, pending_props: Props, key: Option<Key>) -> Self {
        Self {
            generation: 0,
            kind,
            key,
            state_node: None,
            ret: None,
            child: None,
            sibling: None,
            index: 0,
            pending_props,
            memoized_props: None,
            memoized_state: MemoizedState::None,
            update_queue: FiberQueue::None,
            ref_: None,
            alternate: None,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            deletions: Vec::new(),
            lanes: Lanes::empty(),
            child_lanes: Lanes::empty(),
            dependencies: Dependencies::default(),
        }
    }

    pub(crate) fn from_element(element: &Element) -> Self {
        let mut fiber = Self::new(
            FiberKind::from_element_type(element.ty()),
            element.props().clone(),
            element.key_rc().cloned(),
        );
        fiber.ref_ = element.ref_().cloned();
        fiber
    }

    pub(crate) fn text(content: Rc<str>) -> Self {
        Self::new(FiberKind::HostText, Props::text(content), None)
    }

    pub(crate) fn fragment(children: Node, key: Option<Key>) -> Self {
        Self::new(FiberKind::Fragment, Props::with_children(children), key)
    }

    pub(crate) fn offscreen(hidden: bool, children: Node) -> Self {
        Self::new(FiberKind::Offscreen, Props::offscreen(hidden, children), None)
    }

    pub(crate) fn hooks(&self) -> Option<&Vec<Hook>> {
        match &self.memoized_state {
            MemoizedState::Hooks(hooks) => Some(hooks),
            _ => None,
        }
    }

    pub(crate) fn effects(&self) -> &[Rc<Effect>] {
        match &self.update_queue {
            FiberQueue::Effects(effects) => effects,
            _ => &[],
        }
    }
}

/// Generational arena owning every fiber of one root.
pub(crate) struct FiberArena<I> {
    slots: Vec<Option<Fiber<I>>>,
    generations: Vec<u32>,
    free_list: Vec<usize>,
}

impl<I> fmt::Debug for FiberArena<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberArena")
            .field("live", &self.live_count())
            .field("free_list", &self.free_list.len())
            .finish_non_exhaustive()
    }
}

impl<I> Default for FiberArena<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Clone> FiberArena<I> {
    /// Return the work-in-progress fiber for `current`, reusing its alternate if present.
    ///
    /// Effect state on a reused alternate is reset; scheduling, state, and structure are
    /// copied forward from `current` so untouched subtrees are relinked, not recreated.
    pub(crate) fn create_work_in_progress(
        &mut self,
        current: FiberId,
        pending_props: Props,
    ) -> FiberId {
        let alternate = self[current].alternate;
        let wip = match alternate {
            Some(wip) => {
                let w = &mut self[wip];
                w.pending_props = pending_props;
                w.flags = Flags::empty();
                w.subtree_flags = Flags::empty();
                w.deletions.clear();
                wip
            }
            None => {
                let c = &self[current];
                let fiber = Fiber::new(c.kind.clone(), pending_props, c.key.clone());
                let wip = self.insert(fiber);
                self[wip].alternate = Some(current);
                self[current].alternate = Some(wip);
                wip
            }
        };

        let c = &self[current];
        let kind = c.kind.clone();
        let state_node = c.state_node.clone();
        let update_queue = c.update_queue.clone();
        let child = c.child;
        let sibling = c.sibling;
        let index = c.index;
        let memoized_props = c.memoized_props.clone();
        let memoized_state = c.memoized_state.clone();
        let ref_ = c.ref_.clone();
        let lanes = c.lanes;
        let child_lanes = c.child_lanes;
        let dependencies = c.dependencies.clone();

        let w = &mut self[wip];
        w.kind = kind;
        w.state_node = state_node;
        w.update_queue = update_queue;
        w.child = child;
        w.sibling = sibling;
        w.index = index;
        w.memoized_props = memoized_props;
        w.memoized_state = memoized_state;
        w.ref_ = ref_;
        w.lanes = lanes;
        w.child_lanes = child_lanes;
        w.dependencies = dependencies;
        wip
    }
}

impl<I> FiberArena<I> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Store `fiber` and return its id.
    pub(crate) fn insert(&mut self, mut fiber: Fiber<I>) -> FiberId {
        let (idx, generation) = if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            fiber.generation = generation;
            self.slots[idx] = Some(fiber);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "FiberId uses 32-bit indices by design."
            )]
            (idx as u32, generation)
        } else {
            let generation = 1_u32;
            fiber.generation = generation;
            self.slots.push(Some(fiber));
            self.generations.push(generation);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "FiberId uses 32-bit indices by design."
            )]
            ((self.slots.len() - 1) as u32, generation)
        };
        FiberId::new(idx, generation)
    }

    /// Returns true if `id` refers to a live fiber.
    pub(crate) fn is_alive(&self, id: FiberId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn get(&self, id: FiberId) -> Option<&Fiber<I>> {
        self.slots
            .get(id.idx())?
            .as_ref()
            .filter(|f| f.generation == id.1)
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Option<&mut Fiber<I>> {
        self.slots
            .get_mut(id.idx())?
            .as_mut()
            .filter(|f| f.generation == id.1)
    }

    /// Number of live fibers.
    pub(crate) fn live_count(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Release one fiber. Stale ids are ignored.
    pub(crate) fn free(&mut self, id: FiberId) {
        if self.is_alive(id) {
            self.slots[id.idx()] = None;
            self.free_list.push(id.idx());
        }
    }

    /// Release a detached subtree rooted at `root` (not its siblings), and the alternate of
    /// every fiber in it.
    pub(crate) fn free_subtree(&mut self, root: FiberId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.get(id) else {
                continue;
            };
            if let Some(child) = fiber.child {
                stack.push(child);
            }
            if id != root {
                if let Some(sibling) = fiber.sibling {
                    stack.push(sibling);
                }
            }
            if let Some(alt) = fiber.alternate {
                self.free(alt);
            }
            self.free(id);
        }
    }

    /// Release every fiber not reachable from `root` through tree links. Alternates of
    /// reachable fibers are kept.
    pub(crate) fn retain_reachable(&mut self, root: FiberId) {
        let mut live = vec![false; self.slots.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(fiber) = self.get(id) else {
                continue;
            };
            if live[id.idx()] {
                continue;
            }
            live[id.idx()] = true;
            if let Some(alt) = fiber.alternate {
                if self.is_alive(alt) {
                    live[alt.idx()] = true;
                }
            }
            if let Some(child) = fiber.child {
                stack.push(child);
            }
            if id != root {
                if let Some(sibling) = fiber.sibling {
                    stack.push(sibling);
                }
            }
        }
        for (idx, keep) in live.into_iter().enumerate() {
            if !keep && self.slots[idx].is_some() {
                self.slots[idx] = None;
                self.free_list.push(idx);
            }
        }
    }

    /// Children of `parent` in sibling order.
    pub(crate) fn children(&self, parent: FiberId) -> Vec<FiberId> {
        let mut out = Vec::new();
        let mut next = self[parent].child;
        while let Some(id) = next {
            out.push(id);
            next = self[id].sibling;
        }
        out
    }
}

impl<I> Index<FiberId> for FiberArena<I> {
    type Output = Fiber<I>;

    fn index(&self, id: FiberId) -> &Fiber<I> {
        self.get(id).expect("dangling FiberId")
    }
}

impl<I> IndexMut<FiberId> for FiberArena<I> {
    fn index_mut(&mut self, id: FiberId) -> &mut Fiber<I> {
        self.get_mut(id).expect("dangling FiberId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena() -> FiberArena<u32> {
        FiberArena::new()
    }

    #[test]
    fn work_in_progress_pairs_once() {
        let mut a = arena();
        let current = a.insert(Fiber::new(FiberKind::HostText, Props::empty(), None));
        a[current].lanes = Lanes::DEFAULT;
        a[current].state_node = Some(7);

        let wip = a.create_work_in_progress(current, Props::empty());
        assert_eq!(a[wip].alternate, Some(current));
        assert_eq!(a[current].alternate, Some(wip));
        assert_eq!(a[wip].lanes, Lanes::DEFAULT);
        assert_eq!(a[wip].state_node, Some(7));

        a[wip].flags = Flags::PLACEMENT;
        a[wip].deletions.push(current);
        let again = a.create_work_in_progress(current, Props::empty());
        assert_eq!(again, wip);
        assert!(a[again].flags.is_empty());
        assert!(a[again].deletions.is_empty());
        assert_eq!(a.live_count(), 2);
    }

    #[test]
    fn stale_ids_never_alias() {
        let mut a = arena();
        let first = a.insert(Fiber::new(FiberKind::Fragment, Props::empty(), None));
        a.free(first);
        let second = a.insert(Fiber::new(FiberKind::Fragment, Props::empty(), None));
        assert_eq!(first.idx(), second.idx());
        assert_ne!(first, second);
        assert!(!a.is_alive(first));
        assert!(a.is_alive(second));
    }

    #[test]
    fn sweep_keeps_tree_and_alternates() {
        let mut a = arena();
        let root = a.insert(Fiber::new(FiberKind::HostRoot, Props::empty(), None));
        let child = a.insert(Fiber::new(FiberKind::Fragment, Props::empty(), None));
        let orphan = a.insert(Fiber::new(FiberKind::Fragment, Props::empty(), None));
        a[root].child = Some(child);
        a[child].ret = Some(root);
        let alt = a.create_work_in_progress(child, Props::empty());

        a.retain_reachable(root);
        assert!(a.is_alive(root));
        assert!(a.is_alive(child));
        assert!(a.is_alive(alt));
        assert!(!a.is_alive(orphan));

        a.free_subtree(child);
        assert!(!a.is_alive(child));
        assert!(!a.is_alive(alt));
        assert!(a.is_alive(root));
    }
}
