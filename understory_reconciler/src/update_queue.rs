// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Update queues and lane-aware rebasing.
//!
//! Updates are kept in enqueue order in plain vectors. Processing replays them on top of a
//! base state: updates whose lane is not being rendered are skipped but kept, together with
//! every update after the first skipped one, so a later render at the skipped lane replays
//! the same sequence in the same order.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use crate::lanes::{Lane, Lanes, NO_LANE};

/// One pending change.
#[derive(Clone, Debug)]
pub(crate) struct Update<A> {
    pub(crate) action: A,
    pub(crate) lane: Lane,
}

/// State-hook action: a replacement value or an updater of the previous value.
#[derive(Clone)]
pub(crate) enum Action {
    Replace(Rc<dyn Any>),
    /// Returns `None` if the previous state has an unexpected type; the state is then kept.
    Reduce(Rc<dyn Fn(&dyn Any) -> Option<Rc<dyn Any>>>),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace(_) => f.write_str("Replace(..)"),
            Self::Reduce(_) => f.write_str("Reduce(..)"),
        }
    }
}

impl Action {
    pub(crate) fn apply(&self, state: &Rc<dyn Any>) -> Rc<dyn Any> {
        match self {
            Self::Replace(value) => value.clone(),
            Self::Reduce(f) => f(&**state).unwrap_or_else(|| state.clone()),
        }
    }
}

/// Result of replaying a queue at one render lane.
#[derive(Debug)]
pub(crate) struct Processed<S, A> {
    /// State after applying every included update.
    pub(crate) memoized_state: S,
    /// State just before the first skipped update.
    pub(crate) base_state: S,
    /// The first skipped update and everything after it.
    pub(crate) base_queue: Vec<Update<A>>,
    /// Lanes of the skipped updates.
    pub(crate) skipped_lanes: Lanes,
}

/// Replay `queue` on top of `base_state`, applying only updates whose lane is in
/// `render_lanes`.
///
/// Updates carried after a skipped one are re-tagged with [`NO_LANE`] so any later render
/// applies them again, in order.
pub(crate) fn process_update_queue<S: Clone, A: Clone>(
    base_state: S,
    queue: &[Update<A>],
    render_lanes: Lanes,
    apply: impl Fn(&S, &A) -> S,
) -> Processed<S, A> {
    let mut new_state = base_state.clone();
    let mut new_base_state = base_state;
    let mut new_base_queue: Vec<Update<A>> = Vec::new();
    let mut skipped_lanes = Lanes::empty();

    for update in queue {
        if !render_lanes.is_superset_of(update.lane) {
            if new_base_queue.is_empty() {
                new_base_state = new_state.clone();
            }
            new_base_queue.push(update.clone());
            skipped_lanes |= update.lane;
        } else {
            if !new_base_queue.is_empty() {
                new_base_queue.push(Update {
                    action: update.action.clone(),
                    lane: NO_LANE,
                });
            }
            new_state = apply(&new_state, &update.action);
        }
    }

    if new_base_queue.is_empty() {
        new_base_state = new_state.clone();
    }

    Processed {
        memoized_state: new_state,
        base_state: new_base_state,
        base_queue: new_base_queue,
        skipped_lanes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[derive(Clone, Debug)]
    enum Op {
        Add(i64),
        Set(i64),
    }

    fn apply(s: &i64, op: &Op) -> i64 {
        match op {
            Op::Add(n) => s + n,
            Op::Set(n) => *n,
        }
    }

    fn upd(op: Op, lane: Lane) -> Update<Op> {
        Update { action: op, lane }
    }

    #[test]
    fn applies_in_enqueue_order() {
        let q = vec![upd(Op::Add(1), Lanes::SYNC), upd(Op::Add(1), Lanes::SYNC)];
        let p = process_update_queue(1, &q, Lanes::SYNC, apply);
        assert_eq!(p.memoized_state, 3);
        assert!(p.base_queue.is_empty());
        assert_eq!(p.base_state, 3);

        let q = vec![upd(Op::Add(1), Lanes::SYNC), upd(Op::Set(10), Lanes::SYNC)];
        assert_eq!(process_update_queue(1, &q, Lanes::SYNC, apply).memoized_state, 10);
    }

    #[test]
    fn skipped_updates_rebase_later() {
        // A default-lane +1 followed by a sync set(100).
        let q = vec![upd(Op::Add(1), Lanes::DEFAULT), upd(Op::Set(100), Lanes::SYNC)];

        let sync = process_update_queue(0, &q, Lanes::SYNC, apply);
        assert_eq!(sync.memoized_state, 100);
        assert_eq!(sync.base_state, 0);
        assert_eq!(sync.base_queue.len(), 2);
        assert_eq!(sync.base_queue[1].lane, NO_LANE);
        assert_eq!(sync.skipped_lanes, Lanes::DEFAULT);

        let default = process_update_queue(sync.base_state, &sync.base_queue, Lanes::DEFAULT, apply);
        assert_eq!(default.memoized_state, 100);
        assert!(default.skipped_lanes.is_empty());
    }

    #[test]
    fn state_actions_fall_back_on_type_mismatch() {
        let state: Rc<dyn Any> = Rc::new(5_i64);
        let bump = Action::Reduce(Rc::new(|prev: &dyn Any| {
            prev.downcast_ref::<u8>().map(|v| Rc::new(v + 1) as Rc<dyn Any>)
        }));
        let out = bump.apply(&state);
        assert_eq!(out.downcast_ref::<i64>(), Some(&5));
    }
}
