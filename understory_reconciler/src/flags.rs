// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Effect bookkeeping bits carried on fibers and hook effects.

bitflags::bitflags! {
    /// Pending host mutations and render-phase markers on a fiber.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Flags: u16 {
        /// Insert or move the fiber's host nodes.
        const PLACEMENT      = 0b0000_0000_0001;
        /// Forward new committed props or text to the host node.
        const UPDATE         = 0b0000_0000_0010;
        /// One or more children were removed; see the fiber's deletion list.
        const CHILD_DELETION = 0b0000_0000_0100;
        /// Attach or detach the fiber's ref.
        const REF            = 0b0000_0000_1000;
        /// Toggle visibility of an offscreen subtree.
        const VISIBILITY     = 0b0000_0001_0000;
        /// Passive effects need to run after commit.
        const PASSIVE_EFFECT = 0b0000_0010_0000;
        /// Layout effects need to run during commit.
        const LAYOUT_EFFECT  = 0b0000_0100_0000;
        /// A suspension was caught below this boundary during the current render.
        const SHOULD_CAPTURE = 0b0000_1000_0000;
        /// This boundary is rendering its fallback.
        const DID_CAPTURE    = 0b0001_0000_0000;
    }
}

impl Flags {
    /// Flags handled by the mutation walk.
    pub const MUTATION_MASK: Self = Self::PLACEMENT
        .union(Self::UPDATE)
        .union(Self::CHILD_DELETION)
        .union(Self::REF)
        .union(Self::VISIBILITY)
        .union(Self::LAYOUT_EFFECT);

    /// Flags that require a passive-effect flush.
    pub const PASSIVE_MASK: Self = Self::PASSIVE_EFFECT.union(Self::CHILD_DELETION);

    /// Flags handled by the layout walk.
    pub const LAYOUT_MASK: Self = Self::REF.union(Self::LAYOUT_EFFECT);
}

bitflags::bitflags! {
    /// Kind and state bits of a hook effect.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EffectTag: u8 {
        /// The effect's dependencies changed; destroy and create must run this commit.
        const HAS_EFFECT = 0b001;
        /// Runs after commit, asynchronously.
        const PASSIVE    = 0b010;
        /// Runs synchronously during commit.
        const LAYOUT     = 0b100;
    }
}
