// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A deterministic scheduler flushed explicitly by its owner.
//!
//! Tasks run in priority order, FIFO within a priority. A continuation returned by a task
//! keeps its handle and its place in line. The yield budget controls time slicing: with a
//! budget of `n`, [`Scheduler::should_yield`] starts answering `true` after `n` checks inside
//! one task run.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use understory_reconciler::scheduler::manual::ManualScheduler;
//! use understory_reconciler::scheduler::{Priority, Scheduler, Task};
//!
//! let scheduler = ManualScheduler::new();
//! let ran = Rc::new(Cell::new(0));
//! let r = ran.clone();
//! scheduler.schedule_callback(Priority::Normal, Task::new(move |_| {
//!     r.set(r.get() + 1);
//!     None
//! }));
//! assert_eq!(scheduler.pending_count(), 1);
//! scheduler.flush_all();
//! assert_eq!(ran.get(), 1);
//! ```

use alloc::vec::Vec;
use core::cell::RefCell;

use super::{Priority, Scheduler, Task, TaskHandle};

#[derive(Debug)]
struct Entry {
    priority: Priority,
    seq: u64,
    handle: TaskHandle,
    task: Task,
}

#[derive(Debug)]
struct State {
    queue: Vec<Entry>,
    next_id: u64,
    next_seq: u64,
    current: Option<Priority>,
    ambient: Priority,
    budget: Option<usize>,
    checks: usize,
}

/// Deterministic, explicitly flushed [`Scheduler`].
#[derive(Debug)]
pub struct ManualScheduler {
    state: RefCell<State>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    /// Create an empty scheduler with no yield budget.
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                queue: Vec::new(),
                next_id: 1,
                next_seq: 0,
                current: None,
                ambient: Priority::Normal,
                budget: None,
                checks: 0,
            }),
        }
    }

    /// Set how many `should_yield` checks a task run gets before being asked to yield.
    /// `None` never yields.
    pub fn set_yield_budget(&self, budget: Option<usize>) {
        self.state.borrow_mut().budget = budget;
    }

    /// Number of queued tasks.
    pub fn pending_count(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Highest queued priority, if any.
    pub fn next_priority(&self) -> Option<Priority> {
        self.state.borrow().queue.iter().map(|e| e.priority).min()
    }

    /// Run `f` with `priority` as the ambient priority.
    pub fn run_with_priority<R>(&self, priority: Priority, f: impl FnOnce() -> R) -> R {
        let prev = core::mem::replace(&mut self.state.borrow_mut().ambient, priority);
        let out = f();
        self.state.borrow_mut().ambient = prev;
        out
    }

    /// Run the next task. Returns false if the queue was empty.
    pub fn flush_one(&self) -> bool {
        let entry = {
            let mut state = self.state.borrow_mut();
            let next = state
                .queue
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| (e.priority, e.seq))
                .map(|(i, _)| i);
            let Some(i) = next else {
                return false;
            };
            let entry = state.queue.remove(i);
            state.current = Some(entry.priority);
            state.checks = 0;
            entry
        };
        let Entry {
            priority,
            seq,
            handle,
            task,
        } = entry;
        let continuation = task.run(false);
        let mut state = self.state.borrow_mut();
        state.current = None;
        if let Some(task) = continuation {
            state.queue.push(Entry {
                priority,
                seq,
                handle,
                task,
            });
        }
        true
    }

    /// Run tasks until the queue is empty, including tasks scheduled along the way.
    pub fn flush_all(&self) {
        while self.flush_one() {}
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_callback(&self, priority: Priority, task: Task) -> TaskHandle {
        let mut state = self.state.borrow_mut();
        let handle = TaskHandle(state.next_id);
        state.next_id += 1;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Entry {
            priority,
            seq,
            handle,
            task,
        });
        handle
    }

    fn cancel_callback(&self, handle: TaskHandle) {
        self.state.borrow_mut().queue.retain(|e| e.handle != handle);
    }

    fn should_yield(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(budget) = state.budget else {
            return false;
        };
        state.checks += 1;
        state.checks > budget
    }

    fn current_priority(&self) -> Priority {
        let state = self.state.borrow();
        state.current.unwrap_or(state.ambient)
    }
}
