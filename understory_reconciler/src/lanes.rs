// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Lanes: bitset priorities used to batch, order, and selectively replay updates.
//!
//! ## Overview
//!
//! Each update is tagged with exactly one lane. A set of lanes is a [`Lanes`] bitset.
//! Lower bit values are higher priority: [`Lanes::SYNC`] preempts everything else.
//!
//! The root keeps three sets ([`RootLanes`]): lanes with pending work, lanes whose last
//! render suspended without a boundary, and suspended lanes that have since been pinged.
//! [`RootLanes::next_lane`] picks the single lane the next render works on.

use crate::scheduler::Priority;

bitflags::bitflags! {
    /// A set of lanes. The empty set doubles as "no lane".
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Lanes: u32 {
        /// Discrete, synchronous updates (initial mount, immediate priority).
        const SYNC             = 0b0_0001;
        /// Continuous input such as drags and scrolls.
        const INPUT_CONTINUOUS = 0b0_0010;
        /// Ordinary updates.
        const DEFAULT          = 0b0_0100;
        /// Updates dispatched inside a transition scope.
        const TRANSITION       = 0b0_1000;
        /// Work that can wait until nothing else is pending.
        const IDLE             = 0b1_0000;
    }
}

/// A single lane. Kept as an alias so signatures document intent.
pub type Lane = Lanes;

/// The empty lane.
pub const NO_LANE: Lane = Lanes::empty();

impl Lanes {
    /// Returns the highest priority (lowest bit) lane in the set, or the empty set.
    #[inline]
    pub fn highest_priority(self) -> Lane {
        let bits = self.bits();
        Self::from_bits_retain(bits & bits.wrapping_neg())
    }

    /// Returns true if every lane of `subset` is part of `self`.
    ///
    /// The empty lane is a subset of everything, so updates without a lane always apply.
    #[inline]
    pub fn is_superset_of(self, subset: Self) -> bool {
        self.contains(subset)
    }

    /// Map the highest priority lane of the set to a scheduler priority.
    ///
    /// Transition and idle lanes collapse to [`Priority::Idle`].
    pub fn to_priority(self) -> Priority {
        let lane = self.highest_priority();
        if lane == Self::SYNC {
            Priority::Immediate
        } else if lane == Self::INPUT_CONTINUOUS {
            Priority::UserBlocking
        } else if lane == Self::DEFAULT {
            Priority::Normal
        } else {
            Priority::Idle
        }
    }

    /// Map a scheduler priority to the lane an update dispatched at that priority receives.
    pub fn from_priority(priority: Priority) -> Lane {
        match priority {
            Priority::Immediate => Self::SYNC,
            Priority::UserBlocking => Self::INPUT_CONTINUOUS,
            Priority::Normal => Self::DEFAULT,
            Priority::Low => Self::TRANSITION,
            Priority::Idle => Self::IDLE,
        }
    }
}

/// Root-level lane bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RootLanes {
    /// Lanes with work not yet committed.
    pub pending: Lanes,
    /// Lanes whose last render suspended outside any boundary.
    pub suspended: Lanes,
    /// Suspended lanes whose awaited value has settled since.
    pub pinged: Lanes,
}

impl RootLanes {
    /// Record new work at `lane`.
    pub fn mark_updated(&mut self, lane: Lane) {
        self.pending |= lane;
    }

    /// Record that rendering `lane` could not complete.
    pub fn mark_suspended(&mut self, lane: Lane) {
        self.suspended |= lane;
        self.pinged -= lane;
    }

    /// Record that data awaited by a render at `lane` has settled.
    pub fn mark_pinged(&mut self, lane: Lane) {
        self.pinged |= self.suspended & lane;
    }

    /// Record a commit of `lane`. `remaining` is the union of lanes still pending in the
    /// committed tree; they stay pending.
    pub fn mark_finished(&mut self, lane: Lane, remaining: Lanes) {
        self.pending = (self.pending - lane) | remaining;
        self.suspended = Lanes::empty();
        self.pinged = Lanes::empty();
    }

    /// Pick the next lane to render.
    ///
    /// Suspended lanes are skipped unless they have been pinged.
    pub fn next_lane(&self) -> Lane {
        if self.pending.is_empty() {
            return NO_LANE;
        }
        let unsuspended = self.pending - self.suspended;
        if !unsuspended.is_empty() {
            return unsuspended.highest_priority();
        }
        let pinged = self.pending & self.pinged;
        pinged.highest_priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_priority_picks_lowest_bit() {
        let set = Lanes::DEFAULT | Lanes::TRANSITION | Lanes::INPUT_CONTINUOUS;
        assert_eq!(set.highest_priority(), Lanes::INPUT_CONTINUOUS);
        assert_eq!(Lanes::empty().highest_priority(), NO_LANE);
    }

    #[test]
    fn empty_lane_is_always_included() {
        assert!(Lanes::SYNC.is_superset_of(NO_LANE));
        assert!(!Lanes::SYNC.is_superset_of(Lanes::DEFAULT));
    }

    #[test]
    fn priority_mapping_collapses_low_end() {
        assert_eq!(Lanes::SYNC.to_priority(), Priority::Immediate);
        assert_eq!(Lanes::DEFAULT.to_priority(), Priority::Normal);
        assert_eq!(Lanes::TRANSITION.to_priority(), Priority::Idle);
        assert_eq!(Lanes::IDLE.to_priority(), Priority::Idle);
        assert_eq!(Lanes::from_priority(Priority::UserBlocking), Lanes::INPUT_CONTINUOUS);
    }

    #[test]
    fn suspended_lane_waits_for_ping() {
        let mut root = RootLanes::default();
        root.mark_updated(Lanes::DEFAULT);
        assert_eq!(root.next_lane(), Lanes::DEFAULT);

        root.mark_suspended(Lanes::DEFAULT);
        assert_eq!(root.next_lane(), NO_LANE);

        root.mark_updated(Lanes::TRANSITION);
        assert_eq!(root.next_lane(), Lanes::TRANSITION);

        root.mark_pinged(Lanes::DEFAULT);
        // Unsuspended work still goes first.
        assert_eq!(root.next_lane(), Lanes::TRANSITION);
        root.mark_finished(Lanes::TRANSITION, Lanes::empty());
        assert_eq!(root.next_lane(), Lanes::DEFAULT);
    }

    #[test]
    fn finishing_keeps_remaining_lanes() {
        let mut root = RootLanes::default();
        root.mark_updated(Lanes::SYNC | Lanes::DEFAULT);
        root.mark_finished(Lanes::SYNC, Lanes::DEFAULT);
        assert_eq!(root.pending, Lanes::DEFAULT);
    }
}
