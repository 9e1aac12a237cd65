// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The public entry point: a [`Root`] mounted into one host container.
//!
//! ## Signals
//!
//! State setters and settled thenables never touch the engine directly. They post a
//! [`Signal`] to the root's inbox and then try to pump it. Pumping succeeds only when the
//! engine is idle; otherwise the signal waits until the engine finishes its current render,
//! commit, or effect flush and drains the inbox itself. This keeps a single active render
//! without any global state.
//!
//! ## Lanes of new updates
//!
//! An update's lane is decided when it is dispatched: [`Lanes::SYNC`] inside
//! [`Root::flush_sync`], [`Lanes::TRANSITION`] inside a transition scope, and otherwise the
//! lane matching the scheduler's current priority.

use alloc::rc::{Rc, Weak};
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt;

use crate::element::Node;
use crate::error::ReconcileError;
use crate::hooks::StateQueue;
use crate::host::HostConfig;
use crate::lanes::{Lane, Lanes};
use crate::scheduler::Scheduler;
use crate::update_queue::{Action, Update};
use crate::work_loop::Engine;

/// Root configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RootOptions {
    /// Render non-synchronous lanes in slices, yielding to the scheduler between fibers.
    ///
    /// When false, every render runs to completion once started.
    pub time_slicing: bool,
    /// How many synchronous re-renders caused by updates scheduled during commit are allowed
    /// in a row before the root reports [`ReconcileError::MaximumUpdateDepth`].
    pub nested_update_limit: usize,
}

impl Default for RootOptions {
    fn default() -> Self {
        Self {
            time_slicing: true,
            nested_update_limit: 50,
        }
    }
}

/// A message for the engine, queued until it is idle.
pub(crate) enum Signal {
    Update {
        queue: Rc<StateQueue>,
        update: Update<Action>,
    },
    Ping {
        key: usize,
        lane: Lane,
    },
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update { queue, update } => f
                .debug_struct("Update")
                .field("fiber", &queue.fiber)
                .field("lane", &update.lane)
                .finish(),
            Self::Ping { key, lane } => f
                .debug_struct("Ping")
                .field("key", key)
                .field("lane", lane)
                .finish(),
        }
    }
}

/// Something that can drain the inbox when it is not busy.
pub(crate) trait Pump {
    fn pump(&self);
}

/// Inbox and dispatch-time context shared by a root and every setter it hands out.
pub(crate) struct Signals {
    inbox: RefCell<Vec<Signal>>,
    transition: Cell<bool>,
    lane_override: Cell<Option<Lane>>,
    pub(crate) scheduler: Rc<dyn Scheduler>,
    pump: RefCell<Option<Weak<dyn Pump>>>,
}

impl fmt::Debug for Signals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signals")
            .field("inbox", &self.inbox.borrow().len())
            .field("transition", &self.transition.get())
            .field("lane_override", &self.lane_override.get())
            .finish_non_exhaustive()
    }
}

impl Signals {
    pub(crate) fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inbox: RefCell::new(Vec::new()),
            transition: Cell::new(false),
            lane_override: Cell::new(None),
            scheduler,
            pump: RefCell::new(None),
        }
    }

    /// Lane for an update dispatched right now.
    pub(crate) fn request_update_lane(&self) -> Lane {
        if let Some(lane) = self.lane_override.get() {
            return lane;
        }
        if self.transition.get() {
            return Lanes::TRANSITION;
        }
        Lanes::from_priority(self.scheduler.current_priority())
    }

    /// Enter or leave a transition scope; returns the previous setting.
    pub(crate) fn set_transition(&self, on: bool) -> bool {
        self.transition.replace(on)
    }

    pub(crate) fn set_lane_override(&self, lane: Option<Lane>) -> Option<Lane> {
        self.lane_override.replace(lane)
    }

    pub(crate) fn dispatch(&self, queue: Rc<StateQueue>, action: Action) {
        let lane = self.request_update_lane();
        self.send(Signal::Update {
            queue,
            update: Update { action, lane },
        });
    }

    pub(crate) fn send(&self, signal: Signal) {
        self.inbox.borrow_mut().push(signal);
        let pump = self.pump.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(pump) = pump {
            pump.pump();
        }
    }

    pub(crate) fn take_inbox(&self) -> Vec<Signal> {
        core::mem::take(&mut *self.inbox.borrow_mut())
    }
}

/// Shared home of an engine. Scheduled tasks and microtasks hold it weakly.
pub(crate) struct RootCell<H: HostConfig> {
    pub(crate) engine: RefCell<Engine<H>>,
}

impl<H: HostConfig> Pump for RootCell<H> {
    fn pump(&self) {
        if let Ok(mut engine) = self.engine.try_borrow_mut() {
            engine.process_signals();
        }
    }
}

impl<H: HostConfig> RootCell<H> {
    /// Run `f` on the engine if the root is still alive and idle.
    pub(crate) fn with_engine<R>(
        this: &Weak<Self>,
        f: impl FnOnce(&mut Engine<H>) -> R,
    ) -> Option<R> {
        let cell = this.upgrade()?;
        let Ok(mut engine) = cell.engine.try_borrow_mut() else {
            tracing::error!("root callback ran while the root was busy; dropped");
            return None;
        };
        let out = f(&mut engine);
        Some(out)
    }
}

/// A reconciler root: the committed tree for one host container plus its pending work.
///
/// ```
/// use std::rc::Rc;
/// use understory_reconciler::element::{h, text};
/// use understory_reconciler::host::noop::NoopHost;
/// use understory_reconciler::root::Root;
/// use understory_reconciler::scheduler::manual::ManualScheduler;
///
/// let host = NoopHost::new();
/// let container = host.container();
/// let scheduler = Rc::new(ManualScheduler::new());
/// let root = Root::new(host, container.clone(), scheduler.clone());
///
/// root.render(h("p").child(text("hello"))).unwrap();
/// scheduler.flush_all();
/// assert_eq!(container.markup(), "<p>hello</p>");
/// ```
pub struct Root<H: HostConfig> {
    cell: Rc<RootCell<H>>,
    signals: Rc<Signals>,
}

impl<H: HostConfig> fmt::Debug for Root<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Root");
        if let Ok(engine) = self.cell.engine.try_borrow() {
            s.field("pending", &engine.root.lanes.pending);
        }
        s.field("signals", &self.signals).finish_non_exhaustive()
    }
}

impl<H: HostConfig> Root<H> {
    /// Create a root rendering into `container` with default options.
    pub fn new(host: H, container: H::Instance, scheduler: Rc<dyn Scheduler>) -> Self {
        Self::with_options(host, container, scheduler, RootOptions::default())
    }

    /// Create a root with explicit options.
    pub fn with_options(
        host: H,
        container: H::Instance,
        scheduler: Rc<dyn Scheduler>,
        options: RootOptions,
    ) -> Self {
        let signals = Rc::new(Signals::new(scheduler));
        let engine_signals = signals.clone();
        let cell = Rc::new_cyclic(|this: &Weak<RootCell<H>>| RootCell {
            engine: RefCell::new(Engine::new(
                host,
                container,
                engine_signals,
                options,
                this.clone(),
            )),
        });
        let weak = Rc::downgrade(&cell);
        let pump: Weak<dyn Pump> = weak;
        *signals.pump.borrow_mut() = Some(pump);
        Self { cell, signals }
    }

    fn engine(&self) -> Result<core::cell::RefMut<'_, Engine<H>>, ReconcileError> {
        self.cell
            .engine
            .try_borrow_mut()
            .map_err(|_| ReconcileError::Reentrant)
    }

    /// Schedule `node` as the new children of the container.
    ///
    /// The render happens when the scheduler (or, for synchronous lanes, the host's
    /// microtask queue) runs it.
    pub fn render(&self, node: impl Into<Node>) -> Result<(), ReconcileError> {
        let lane = self.signals.request_update_lane();
        let mut engine = self.engine()?;
        engine.update_container(node.into(), lane);
        engine.process_signals();
        Ok(())
    }

    /// Render `node` synchronously and commit before returning.
    pub fn render_sync(&self, node: impl Into<Node>) -> Result<(), ReconcileError> {
        self.flush_sync(|| self.render(node))?
    }

    /// Unmount everything rendered into the container.
    pub fn unmount(&self) -> Result<(), ReconcileError> {
        self.render_sync(Node::Empty)
    }

    /// Run `f` with every update it dispatches assigned to the synchronous lane, then
    /// render and commit synchronous work before returning.
    ///
    /// Returns the first error raised by that work. Every error also stays queued for
    /// [`Root::take_errors`].
    pub fn flush_sync<R>(&self, f: impl FnOnce() -> R) -> Result<R, ReconcileError> {
        let prev = self.signals.set_lane_override(Some(Lanes::SYNC));
        let out = f();
        self.signals.set_lane_override(prev);

        let mut engine = self.engine()?;
        let before = engine.errors.len();
        engine.flush_sync_work();
        match engine.errors.get(before).cloned() {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Run `f` with every update it dispatches assigned to the transition lane.
    pub fn start_transition(&self, f: impl FnOnce()) {
        let prev = self.signals.set_transition(true);
        f();
        self.signals.set_transition(prev);
    }

    /// Run pending passive effects now instead of waiting for their scheduled task.
    ///
    /// Returns true if any effect work was pending.
    pub fn flush_passive_effects(&self) -> Result<bool, ReconcileError> {
        let mut engine = self.engine()?;
        Ok(engine.flush_passive_effects())
    }

    /// Drain errors raised by work that had no caller to report to.
    pub fn take_errors(&self) -> Result<Vec<ReconcileError>, ReconcileError> {
        let mut engine = self.engine()?;
        Ok(core::mem::take(&mut engine.errors))
    }

    /// Lanes with work not yet committed.
    pub fn pending_lanes(&self) -> Result<Lanes, ReconcileError> {
        let engine = self
            .cell
            .engine
            .try_borrow()
            .map_err(|_| ReconcileError::Reentrant)?;
        Ok(engine.root.lanes.pending)
    }

    #[cfg(test)]
    pub(crate) fn with_engine_for_test<R>(&self, f: impl FnOnce(&mut Engine<H>) -> R) -> R {
        f(&mut self.cell.engine.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::noop::NoopHost;
    use crate::scheduler::Priority;
    use crate::scheduler::manual::ManualScheduler;

    #[test]
    fn new_root_starts_idle() {
        let host = NoopHost::new();
        let scheduler = Rc::new(ManualScheduler::new());
        let root = Root::new(host.clone(), host.container(), scheduler.clone());
        assert!(root.pending_lanes().unwrap().is_empty());
        assert!(root.signals.pump.borrow().is_some());
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn dispatch_lane_follows_context() {
        let scheduler = Rc::new(ManualScheduler::new());
        let signals = Signals::new(scheduler.clone());
        assert_eq!(signals.request_update_lane(), Lanes::DEFAULT);
        scheduler.run_with_priority(Priority::Immediate, || {
            assert_eq!(signals.request_update_lane(), Lanes::SYNC);
        });

        let prev = signals.set_transition(true);
        assert_eq!(signals.request_update_lane(), Lanes::TRANSITION);
        signals.set_lane_override(Some(Lanes::SYNC));
        assert_eq!(signals.request_update_lane(), Lanes::SYNC);
        signals.set_lane_override(None);
        signals.set_transition(prev);
        assert_eq!(signals.request_update_lane(), Lanes::DEFAULT);
    }

    #[test]
    fn default_options() {
        let options = RootOptions::default();
        assert!(options.time_slicing);
        assert_eq!(options.nested_update_limit, 50);
    }
}
