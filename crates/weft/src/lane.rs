//! Lane algebra for priority-aware scheduling.
//!
//! A lane is a single bit in a fixed-width mask; a lane set is a bitmask.
//! Bit position encodes urgency: the lower the bit, the more urgent the lane.
//! Roots track pending work per lane, and every render picks a lane set with
//! [`get_next_lanes`]. Lanes that wait too long are promoted to
//! `expired_lanes` and forced through the synchronous path.

use bitflags::bitflags;

/// Milliseconds on the host scheduler's clock.
pub type Millis = u64;

bitflags! {
    /// A set of priority lanes.
    ///
    /// Priority classes in descending urgency: sync, continuous input,
    /// default, transitions, retries, idle, offscreen.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Lanes: u32 {
        const SYNC = 1 << 0;
        const INPUT_CONTINUOUS = 1 << 1;
        const DEFAULT = 1 << 2;

        const TRANSITION_0 = 1 << 3;
        const TRANSITION_1 = 1 << 4;
        const TRANSITION_2 = 1 << 5;
        const TRANSITION_3 = 1 << 6;
        const TRANSITION_4 = 1 << 7;
        const TRANSITION_5 = 1 << 8;
        const TRANSITION_6 = 1 << 9;
        const TRANSITION_7 = 1 << 10;

        const RETRY_0 = 1 << 11;
        const RETRY_1 = 1 << 12;
        const RETRY_2 = 1 << 13;
        const RETRY_3 = 1 << 14;

        const IDLE = 1 << 15;
        const OFFSCREEN = 1 << 16;

        // === Groups ===

        const TRANSITION_MASK = Self::TRANSITION_0.bits()
            | Self::TRANSITION_1.bits()
            | Self::TRANSITION_2.bits()
            | Self::TRANSITION_3.bits()
            | Self::TRANSITION_4.bits()
            | Self::TRANSITION_5.bits()
            | Self::TRANSITION_6.bits()
            | Self::TRANSITION_7.bits();

        const RETRY_MASK = Self::RETRY_0.bits()
            | Self::RETRY_1.bits()
            | Self::RETRY_2.bits()
            | Self::RETRY_3.bits();

        /// Lanes that render without time slicing.
        const BLOCKING_MASK =
            Self::SYNC.bits() | Self::INPUT_CONTINUOUS.bits() | Self::DEFAULT.bits();

        /// Everything more urgent than idle work.
        const NON_IDLE_MASK = Self::SYNC.bits()
            | Self::INPUT_CONTINUOUS.bits()
            | Self::DEFAULT.bits()
            | Self::TRANSITION_MASK.bits()
            | Self::RETRY_MASK.bits();
    }
}

/// Number of distinct lanes; sizes the per-lane arrays on a root.
pub const LANE_COUNT: usize = 17;

impl Lanes {
    /// The single most urgent lane in this set (lowest set bit), or empty.
    pub fn highest_priority_lane(self) -> Lanes {
        Lanes::from_bits_retain(self.bits() & self.bits().wrapping_neg())
    }

    /// True if `self` is entirely contained in `other`.
    pub fn is_subset_of(self, other: Lanes) -> bool {
        other.contains(self)
    }

    /// Index of a single lane into the per-lane arrays on a root.
    ///
    /// Callers must pass exactly one lane.
    pub fn index(self) -> usize {
        debug_assert_eq!(self.bits().count_ones(), 1, "expected a single lane");
        self.bits().trailing_zeros() as usize
    }

    /// Iterate the individual lanes of this set, most urgent first.
    pub fn iter_lanes(self) -> impl Iterator<Item = Lanes> {
        let mut remaining = self;
        std::iter::from_fn(move || {
            if remaining.is_empty() {
                return None;
            }
            let lane = remaining.highest_priority_lane();
            remaining.remove(lane);
            Some(lane)
        })
    }

    /// True if the set contains a lane that must not be time sliced.
    pub fn includes_blocking_lane(self) -> bool {
        self.intersects(Lanes::BLOCKING_MASK)
    }

    /// True if the set contains work more urgent than idle.
    pub fn includes_non_idle_work(self) -> bool {
        self.intersects(Lanes::NON_IDLE_MASK)
    }

    /// True if only the default and transition classes are present.
    pub fn includes_only_transitions(self) -> bool {
        !self.is_empty() && Lanes::TRANSITION_MASK.contains(self)
    }

    /// The full priority class of the most urgent lane in `self`.
    ///
    /// Transitions and retries travel as a class: picking one transition lane
    /// picks every pending lane of that class so sibling transitions finish
    /// in one pass.
    pub fn highest_priority_class(self) -> Lanes {
        let lane = self.highest_priority_lane();
        if Lanes::TRANSITION_MASK.contains(lane) {
            self & Lanes::TRANSITION_MASK
        } else if Lanes::RETRY_MASK.contains(lane) {
            self & Lanes::RETRY_MASK
        } else {
            lane
        }
    }

    /// How long a single lane may stay pending before it is force-expired.
    /// `None` means the lane never expires.
    pub fn expiration_budget(self) -> Option<Millis> {
        let lane = self.highest_priority_lane();
        if lane.intersects(Lanes::SYNC) {
            Some(0)
        } else if lane.intersects(Lanes::INPUT_CONTINUOUS) {
            Some(250)
        } else if lane.intersects(Lanes::DEFAULT | Lanes::TRANSITION_MASK) {
            Some(5_000)
        } else {
            // Retry, idle, and offscreen work never starves anyone by waiting.
            None
        }
    }

    /// Scheduler priority used when a root's next work is in this set.
    pub fn to_scheduler_priority(self) -> SchedulerPriority {
        let lane = self.highest_priority_lane();
        if lane.intersects(Lanes::SYNC | Lanes::INPUT_CONTINUOUS) {
            SchedulerPriority::UserBlocking
        } else if lane.intersects(
            Lanes::DEFAULT | Lanes::TRANSITION_MASK | Lanes::RETRY_MASK | Lanes::OFFSCREEN,
        ) {
            SchedulerPriority::Normal
        } else {
            SchedulerPriority::Idle
        }
    }

    /// Event priority corresponding to this lane set, for the update
    /// priority channel.
    pub fn to_event_priority(self) -> Lanes {
        let lane = self.highest_priority_lane();
        if lane.intersects(Lanes::SYNC) {
            Lanes::SYNC
        } else if lane.intersects(Lanes::INPUT_CONTINUOUS) {
            Lanes::INPUT_CONTINUOUS
        } else if lane.includes_non_idle_work() {
            Lanes::DEFAULT
        } else {
            Lanes::IDLE
        }
    }
}

/// Priority levels understood by the external cooperative scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchedulerPriority {
    Immediate,
    UserBlocking,
    Normal,
    Idle,
}

#[cfg(test)]
mod tests;
