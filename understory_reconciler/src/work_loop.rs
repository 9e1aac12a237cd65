// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The engine: root bookkeeping, scheduling, and the render loop.
//!
//! ## Scheduling
//!
//! [`Engine::ensure_root_is_scheduled`] is the only place that requests work. Synchronous
//! lanes are flushed from a host microtask so updates dispatched in the same turn render
//! once; every other lane becomes a scheduler task at the matching priority. A task whose
//! priority no longer matches the next lane is cancelled and replaced.
//!
//! ## Rendering
//!
//! A render works on one lane. It resumes the saved work-in-progress when the lane is the
//! same as last time and starts over from the committed tree otherwise. Each unit of work
//! is one `begin_work` followed, when the fiber has no child to descend into, by completing
//! it and its finished ancestors. Time-sliced renders check
//! [`Scheduler::should_yield`](crate::scheduler::Scheduler::should_yield) between units.
//!
//! ## Suspension
//!
//! A component returning [`Interrupt::Suspend`] abandons its unit of work. The nearest
//! suspense boundary is flagged to capture, a ping is attached to the thenable, and the
//! work-in-progress unwinds to that boundary, which is begun again showing its fallback.
//! Without a boundary the render does not complete and its lane waits for the ping.

use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;

use crate::context::ContextStack;
use crate::error::{Interrupt, ReconcileError};
use crate::fiber::{Fiber, FiberArena, FiberId, FiberKind, FiberQueue, MemoizedState, RootState};
use crate::flags::Flags;
use crate::hooks::Effect;
use crate::host::HostConfig;
use crate::lanes::{Lane, Lanes, NO_LANE, RootLanes};
use crate::element::Node;
use crate::root::{RootCell, RootOptions, Signal, Signals};
use crate::scheduler::{Priority, Task, TaskHandle};
use crate::suspense::{PingEntry, SuspenseHandlerStack, Thenable, ThenableState};
use crate::update_queue::Update;
use crate::value::Props;

/// Where a render stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RootExitStatus {
    /// Work remains and the loop has not stopped.
    InProgress,
    /// The loop yielded with work remaining.
    Incomplete,
    /// The whole tree was completed and can be committed.
    Completed,
    /// Suspended with no boundary to catch it.
    DidNotComplete,
    /// A component raised a fatal error.
    Errored,
}

/// Passive effects waiting for their flush.
#[derive(Debug, Default)]
pub(crate) struct PendingPassive {
    /// Effects of deleted fibers: cleanups only.
    pub(crate) unmount: Vec<Rc<Effect>>,
    /// Effects of committed fibers.
    pub(crate) update: Vec<Rc<Effect>>,
}

/// Root-level state that outlives any single render.
#[derive(Debug)]
pub(crate) struct FiberRoot {
    pub(crate) current: FiberId,
    pub(crate) lanes: RootLanes,
    pub(crate) callback_node: Option<TaskHandle>,
    pub(crate) callback_priority: Lane,
    pub(crate) pending_passive: PendingPassive,
    pub(crate) ping_cache: BTreeMap<usize, PingEntry>,
}

/// Cursor state of the render in progress.
#[derive(Debug)]
pub(crate) struct RenderSession {
    pub(crate) wip_root: Option<FiberId>,
    pub(crate) wip: Option<FiberId>,
    pub(crate) lane: Lane,
    pub(crate) exit_status: RootExitStatus,
    /// Set when the fiber being begun has new props or a changed context.
    pub(crate) did_receive_update: bool,
    pub(crate) contexts: ContextStack,
    pub(crate) suspense_handlers: SuspenseHandlerStack,
}

impl Default for RenderSession {
    fn default() -> Self {
        Self {
            wip_root: None,
            wip: None,
            lane: NO_LANE,
            exit_status: RootExitStatus::InProgress,
            did_receive_update: false,
            contexts: ContextStack::default(),
            suspense_handlers: SuspenseHandlerStack::default(),
        }
    }
}

/// Everything one root owns: the host, the fibers, and the scheduling state.
pub(crate) struct Engine<H: HostConfig> {
    pub(crate) host: H,
    pub(crate) arena: FiberArena<H::Instance>,
    pub(crate) root: FiberRoot,
    pub(crate) session: RenderSession,
    pub(crate) signals: Rc<Signals>,
    pub(crate) options: RootOptions,
    pub(crate) errors: Vec<ReconcileError>,
    sync_pending: bool,
    microtask_scheduled: bool,
    pub(crate) passive_scheduled: bool,
    /// Fibers may have been orphaned by discarded or unwound work.
    pub(crate) needs_sweep: bool,
    this: Weak<RootCell<H>>,
}

impl<H: HostConfig> core::fmt::Debug for Engine<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("arena", &self.arena)
            .field("root", &self.root)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<H: HostConfig> Engine<H> {
    pub(crate) fn new(
        host: H,
        container: H::Instance,
        signals: Rc<Signals>,
        options: RootOptions,
        this: Weak<RootCell<H>>,
    ) -> Self {
        let mut arena = FiberArena::new();
        let mut root_fiber = Fiber::new(FiberKind::HostRoot, Props::empty(), None);
        root_fiber.state_node = Some(container);
        root_fiber.update_queue = FiberQueue::Root(Rc::default());
        root_fiber.memoized_state = MemoizedState::Root(RootState::default());
        let current = arena.insert(root_fiber);
        Self {
            host,
            arena,
            root: FiberRoot {
                current,
                lanes: RootLanes::default(),
                callback_node: None,
                callback_priority: NO_LANE,
                pending_passive: PendingPassive::default(),
                ping_cache: BTreeMap::new(),
            },
            session: RenderSession::default(),
            signals,
            options,
            errors: Vec::new(),
            sync_pending: false,
            microtask_scheduled: false,
            passive_scheduled: false,
            needs_sweep: false,
            this,
        }
    }

    /// Queue new root children at `lane`.
    pub(crate) fn update_container(&mut self, element: Node, lane: Lane) {
        let current = self.root.current;
        if let FiberQueue::Root(queue) = &self.arena[current].update_queue {
            queue.borrow_mut().push(Update {
                action: element,
                lane,
            });
        }
        tracing::debug!(?lane, "root render requested");
        self.schedule_update_on_fiber(current, lane);
    }

    /// Drain the inbox: state updates and pings posted while the engine was busy.
    pub(crate) fn process_signals(&mut self) {
        loop {
            let signals = self.signals.take_inbox();
            if signals.is_empty() {
                return;
            }
            for signal in signals {
                match signal {
                    Signal::Update { queue, update } => self.enqueue_state_update(&queue, update),
                    Signal::Ping { key, lane } => self.ping(key, lane),
                }
            }
        }
    }

    fn enqueue_state_update(
        &mut self,
        queue: &Rc<crate::hooks::StateQueue>,
        update: Update<crate::update_queue::Action>,
    ) {
        let fiber = queue.fiber;
        let Some(f) = self.arena.get(fiber) else {
            tracing::warn!("state update on an unmounted component ignored");
            return;
        };

        // Eager bailout: only when neither side of the fiber has pending work.
        let idle = f.lanes.is_empty()
            && f
                .alternate
                .and_then(|alt| self.arena.get(alt))
                .is_none_or(|alt| alt.lanes.is_empty());
        if idle {
            let last = queue.last_rendered.borrow().clone();
            let eager = update.action.apply(&last);
            if (queue.equals)(&*eager, &*last) {
                tracing::trace!(?fiber, "state unchanged; update not scheduled");
                queue.pending.borrow_mut().push(update);
                return;
            }
        }

        let lane = update.lane;
        queue.pending.borrow_mut().push(update);
        self.schedule_update_on_fiber(fiber, lane);
    }

    fn ping(&mut self, key: usize, lane: Lane) {
        // Every lane's listener fires on settle; the first one takes the whole entry.
        if let Some(entry) = self.root.ping_cache.remove(&key) {
            match entry.thenable.state() {
                ThenableState::Rejected(reason) => {
                    tracing::debug!(%reason, "awaited value rejected");
                }
                _ => tracing::debug!(?lane, "awaited value settled"),
            }
            for (boundary, waiting) in entry.boundaries {
                if self.arena.is_alive(boundary) {
                    self.mark_update_lane_from_fiber_to_root(boundary, waiting);
                }
            }
        }
        self.root.lanes.mark_pinged(lane);
        self.root.lanes.mark_updated(lane);
        self.ensure_root_is_scheduled();
    }

    pub(crate) fn schedule_update_on_fiber(&mut self, fiber: FiberId, lane: Lane) {
        if !self.mark_update_lane_from_fiber_to_root(fiber, lane) {
            tracing::warn!(?fiber, "update on a fiber detached from the root ignored");
            return;
        }
        self.root.lanes.mark_updated(lane);
        self.ensure_root_is_scheduled();
    }

    /// Add `lane` to `fiber` and to the child lanes of every ancestor, on both sides of each
    /// fiber pair. Returns false if the walk does not reach a host root.
    pub(crate) fn mark_update_lane_from_fiber_to_root(&mut self, fiber: FiberId, lane: Lane) -> bool {
        self.arena[fiber].lanes |= lane;
        if let Some(alt) = self.arena[fiber].alternate {
            if let Some(a) = self.arena.get_mut(alt) {
                a.lanes |= lane;
            }
        }
        let mut node = fiber;
        loop {
            let Some(parent) = self.arena[node].ret else {
                return matches!(self.arena[node].kind, FiberKind::HostRoot);
            };
            let Some(p) = self.arena.get_mut(parent) else {
                return false;
            };
            p.child_lanes |= lane;
            if let Some(alt) = p.alternate {
                if let Some(a) = self.arena.get_mut(alt) {
                    a.child_lanes |= lane;
                }
            }
            node = parent;
        }
    }

    /// Make sure a task or microtask exists for the next lane, and only one.
    pub(crate) fn ensure_root_is_scheduled(&mut self) {
        let lane = self.root.lanes.next_lane();
        let existing = self.root.callback_node;
        if lane == NO_LANE {
            if let Some(handle) = existing {
                self.signals.scheduler.cancel_callback(handle);
            }
            self.root.callback_node = None;
            self.root.callback_priority = NO_LANE;
            return;
        }
        if lane == self.root.callback_priority {
            return;
        }
        if let Some(handle) = existing {
            self.signals.scheduler.cancel_callback(handle);
        }
        if lane == Lanes::SYNC {
            tracing::debug!("sync work scheduled");
            self.sync_pending = true;
            self.schedule_sync_flush();
            self.root.callback_node = None;
        } else {
            let priority = lane.to_priority();
            tracing::debug!(?lane, ?priority, "concurrent work scheduled");
            let handle = self
                .signals
                .scheduler
                .schedule_callback(priority, self.concurrent_task());
            self.root.callback_node = Some(handle);
        }
        self.root.callback_priority = lane;
    }

    fn schedule_sync_flush(&mut self) {
        if self.microtask_scheduled {
            return;
        }
        self.microtask_scheduled = true;
        let this = self.this.clone();
        self.host.schedule_microtask(alloc::boxed::Box::new(move || {
            RootCell::with_engine(&this, |engine| {
                engine.microtask_scheduled = false;
                engine.flush_sync_work();
            });
        }));
    }

    fn concurrent_task(&self) -> Task {
        let this = self.this.clone();
        Task::new(move |did_timeout| {
            RootCell::with_engine(&this, |engine| {
                engine.perform_concurrent_work_on_root(did_timeout)
            })
            .flatten()
        })
    }

    pub(crate) fn schedule_passive_flush(&mut self) {
        if self.passive_scheduled {
            return;
        }
        self.passive_scheduled = true;
        let this = self.this.clone();
        self.signals.scheduler.schedule_callback(
            Priority::Normal,
            Task::new(move |_| {
                RootCell::with_engine(&this, |engine| {
                    engine.flush_passive_effects();
                });
                None
            }),
        );
    }

    /// Render and commit synchronous work until none is left.
    pub(crate) fn flush_sync_work(&mut self) {
        self.process_signals();
        let mut nested = 0;
        while self.sync_pending {
            self.sync_pending = false;
            nested += 1;
            if nested > self.options.nested_update_limit {
                self.root.lanes.pending -= Lanes::SYNC;
                self.root.callback_priority = NO_LANE;
                self.record_error(ReconcileError::MaximumUpdateDepth(
                    self.options.nested_update_limit,
                ));
                break;
            }
            self.perform_sync_work_on_root();
            self.process_signals();
        }
    }

    fn perform_sync_work_on_root(&mut self) {
        self.flush_passive_effects();
        let lane = self.root.lanes.next_lane();
        if lane != Lanes::SYNC {
            self.root.callback_priority = NO_LANE;
            self.ensure_root_is_scheduled();
            return;
        }
        let status = self.render_root(lane, false);
        self.finish_render(lane, status);
    }

    /// Body of a scheduled concurrent task. Returns a continuation while this task is still
    /// the root's callback.
    pub(crate) fn perform_concurrent_work_on_root(&mut self, did_timeout: bool) -> Option<Task> {
        let original = self.root.callback_node;
        if self.flush_passive_effects() && self.root.callback_node != original {
            return None;
        }
        let lane = self.root.lanes.next_lane();
        if lane == NO_LANE {
            return None;
        }
        let time_slice = self.options.time_slicing && !did_timeout && lane != Lanes::SYNC;
        let status = self.render_root(lane, time_slice);
        self.finish_render(lane, status);
        self.process_signals();
        self.ensure_root_is_scheduled();
        if original.is_some() && self.root.callback_node == original {
            return Some(self.concurrent_task());
        }
        None
    }

    fn finish_render(&mut self, lane: Lane, status: RootExitStatus) {
        match status {
            RootExitStatus::Completed => self.commit_root(),
            RootExitStatus::DidNotComplete => {
                tracing::debug!(?lane, "render suspended without a boundary");
                self.discard_work_in_progress();
                self.root.lanes.mark_suspended(lane);
                self.root.callback_priority = NO_LANE;
                self.ensure_root_is_scheduled();
            }
            RootExitStatus::Errored => {
                self.root.lanes.pending -= lane;
                self.root.lanes.suspended -= lane;
                self.root.callback_priority = NO_LANE;
                self.ensure_root_is_scheduled();
            }
            RootExitStatus::InProgress | RootExitStatus::Incomplete => {}
        }
    }

    pub(crate) fn record_error(&mut self, err: ReconcileError) {
        tracing::error!(%err, "reconciliation failed");
        self.errors.push(err);
    }

    /// Render `lane` until the tree is complete, the loop yields, or rendering fails.
    pub(crate) fn render_root(&mut self, lane: Lane, time_slice: bool) -> RootExitStatus {
        if self.session.wip_root.is_none() || self.session.lane != lane {
            self.prepare_fresh_stack(lane);
        }
        loop {
            let result = if time_slice {
                self.work_loop_concurrent()
            } else {
                self.work_loop_sync()
            };
            match result {
                Ok(()) => break,
                Err(Interrupt::Suspend(thenable)) => self.throw_and_unwind(&thenable),
                Err(Interrupt::Error(err)) => {
                    self.record_error(err);
                    self.discard_work_in_progress();
                    return RootExitStatus::Errored;
                }
            }
        }
        if self.session.wip.is_some() {
            return RootExitStatus::Incomplete;
        }
        self.session.exit_status
    }

    fn prepare_fresh_stack(&mut self, lane: Lane) {
        if self.session.wip_root.is_some() {
            tracing::debug!(?lane, prev = ?self.session.lane, "discarding interrupted render");
            self.needs_sweep = true;
        }
        let current = self.root.current;
        let props = self.arena[current].pending_props.clone();
        let wip = self.arena.create_work_in_progress(current, props);
        self.session = RenderSession {
            wip_root: Some(wip),
            wip: Some(wip),
            lane,
            ..RenderSession::default()
        };
        tracing::debug!(?lane, "render started");
    }

    /// Drop the work-in-progress tree and release orphaned fibers.
    pub(crate) fn discard_work_in_progress(&mut self) {
        self.session = RenderSession::default();
        self.needs_sweep = true;
        self.sweep_if_needed();
    }

    pub(crate) fn sweep_if_needed(&mut self) {
        if self.needs_sweep && self.session.wip_root.is_none() {
            self.needs_sweep = false;
            self.arena.retain_reachable(self.root.current);
        }
    }

    fn work_loop_sync(&mut self) -> Result<(), Interrupt> {
        while let Some(fiber) = self.session.wip {
            self.perform_unit_of_work(fiber)?;
        }
        Ok(())
    }

    fn work_loop_concurrent(&mut self) -> Result<(), Interrupt> {
        while let Some(fiber) = self.session.wip {
            if self.signals.scheduler.should_yield() {
                tracing::trace!("render yielded");
                break;
            }
            self.perform_unit_of_work(fiber)?;
        }
        Ok(())
    }

    fn perform_unit_of_work(&mut self, fiber: FiberId) -> Result<(), Interrupt> {
        let next = self.begin_work(fiber)?;
        let f = &mut self.arena[fiber];
        f.memoized_props = Some(f.pending_props.clone());
        match next {
            Some(child) => self.session.wip = Some(child),
            None => self.complete_unit_of_work(fiber),
        }
        Ok(())
    }

    fn complete_unit_of_work(&mut self, fiber: FiberId) {
        let mut node = fiber;
        loop {
            self.complete_work(node);
            if let Some(sibling) = self.arena[node].sibling {
                self.session.wip = Some(sibling);
                return;
            }
            match self.arena[node].ret {
                Some(parent) => node = parent,
                None => {
                    self.session.wip = None;
                    if self.session.exit_status == RootExitStatus::InProgress {
                        self.session.exit_status = RootExitStatus::Completed;
                    }
                    return;
                }
            }
        }
    }

    fn throw_and_unwind(&mut self, thenable: &Thenable) {
        let Some(unit) = self.session.wip else {
            return;
        };
        let boundary = self.session.suspense_handlers.top();
        tracing::debug!(?unit, ?boundary, "render suspended");
        if let Some(boundary) = boundary {
            self.arena[boundary].flags |= Flags::SHOULD_CAPTURE;
        }
        self.attach_ping_listener(thenable, self.session.lane, boundary);
        self.needs_sweep = true;
        self.unwind_unit_of_work(unit);
    }

    fn attach_ping_listener(&mut self, thenable: &Thenable, lane: Lane, boundary: Option<FiberId>) {
        let key = thenable.key();
        let entry = self
            .root
            .ping_cache
            .entry(key)
            .or_insert_with(|| PingEntry::new(thenable.clone()));
        if !entry.wait(lane, boundary) {
            return;
        }
        let signals = self.signals.clone();
        thenable.then(move || signals.send(Signal::Ping { key, lane }));
    }

    /// Walk up from the interrupted fiber to the boundary that captures, undoing stack
    /// pushes on the way.
    fn unwind_unit_of_work(&mut self, unit: FiberId) {
        let mut node = Some(unit);
        while let Some(id) = node {
            if let Some(boundary) = self.unwind_work(id) {
                self.session.wip = Some(boundary);
                return;
            }
            let parent = self.arena[id].ret;
            if let Some(parent) = parent {
                let p = &mut self.arena[parent];
                p.deletions.clear();
                p.flags -= Flags::CHILD_DELETION;
                p.subtree_flags = Flags::empty();
            }
            node = parent;
        }
        self.session.exit_status = RootExitStatus::DidNotComplete;
        self.session.wip = None;
    }

    fn unwind_work(&mut self, id: FiberId) -> Option<FiberId> {
        match &self.arena[id].kind {
            FiberKind::Suspense => {
                self.session.suspense_handlers.pop();
                let f = &mut self.arena[id];
                if f.flags.contains(Flags::SHOULD_CAPTURE) {
                    // Begun again from scratch; deletions of the failed attempt are void.
                    f.flags = (f.flags - Flags::SHOULD_CAPTURE - Flags::CHILD_DELETION)
                        | Flags::DID_CAPTURE;
                    f.deletions.clear();
                    return Some(id);
                }
                None
            }
            FiberKind::ContextProvider(context) => {
                let context = context.clone();
                self.session.contexts.pop(&context);
                None
            }
            _ => None,
        }
    }
}
