// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cooperative task scheduling service.
//!
//! The reconciler never runs its own event loop. Concurrent renders, passive-effect flushes,
//! and retries are handed to a [`Scheduler`] as [`Task`]s; time-sliced renders poll
//! [`Scheduler::should_yield`] between units of work and hand back a continuation when asked
//! to yield.
//!
//! [`manual::ManualScheduler`] is a deterministic implementation driven explicitly by the
//! embedder (and by tests).

pub mod manual;

use alloc::boxed::Box;
use core::fmt;

/// Scheduler priority levels, highest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Must run as soon as possible.
    Immediate,
    /// Direct user interaction.
    UserBlocking,
    /// Ordinary work.
    Normal,
    /// Work that can be deferred.
    Low,
    /// Work that runs only when nothing else is pending.
    Idle,
}

/// Handle to a scheduled task, used for cancellation and identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(pub u64);

/// A schedulable unit of work.
///
/// The argument is `did_timeout`: true when the task is overdue and should finish without
/// yielding. Returning `Some` hands back a continuation that replaces this task under the
/// same handle.
pub struct Task(Box<dyn FnOnce(bool) -> Option<Self>>);

impl Task {
    /// Wrap a closure.
    pub fn new(f: impl FnOnce(bool) -> Option<Self> + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Run the task.
    pub fn run(self, did_timeout: bool) -> Option<Self> {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task(..)")
    }
}

/// Priority-queued callback scheduling with cooperative yielding.
pub trait Scheduler {
    /// Queue `task` at `priority`.
    fn schedule_callback(&self, priority: Priority, task: Task) -> TaskHandle;

    /// Drop a queued task. Unknown or already-run handles are ignored.
    fn cancel_callback(&self, handle: TaskHandle);

    /// Returns true when the running task should hand control back.
    fn should_yield(&self) -> bool;

    /// Priority of the task currently running, or the ambient priority outside tasks.
    fn current_priority(&self) -> Priority;
}
