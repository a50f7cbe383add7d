use super::{Lanes, SchedulerPriority};

#[test]
fn highest_priority_lane_isolates_lowest_bit() {
    let set = Lanes::DEFAULT | Lanes::TRANSITION_2 | Lanes::IDLE;
    assert_eq!(set.highest_priority_lane(), Lanes::DEFAULT);

    let set = Lanes::TRANSITION_5 | Lanes::RETRY_1;
    assert_eq!(set.highest_priority_lane(), Lanes::TRANSITION_5);

    assert!(Lanes::empty().highest_priority_lane().is_empty());
}

#[test]
fn transitions_travel_as_a_class() {
    let set = Lanes::TRANSITION_1 | Lanes::TRANSITION_4 | Lanes::IDLE;
    assert_eq!(
        set.highest_priority_class(),
        Lanes::TRANSITION_1 | Lanes::TRANSITION_4
    );
}

#[test]
fn retries_travel_as_a_class() {
    let set = Lanes::RETRY_0 | Lanes::RETRY_3;
    assert_eq!(set.highest_priority_class(), Lanes::RETRY_0 | Lanes::RETRY_3);
}

#[test]
fn sync_class_is_a_single_lane() {
    let set = Lanes::SYNC | Lanes::DEFAULT | Lanes::TRANSITION_0;
    assert_eq!(set.highest_priority_class(), Lanes::SYNC);
}

#[test]
fn subset_checks() {
    let set = Lanes::SYNC | Lanes::DEFAULT;
    assert!(Lanes::SYNC.is_subset_of(set));
    assert!(!Lanes::IDLE.is_subset_of(set));
    assert!(Lanes::empty().is_subset_of(set), "empty is a subset of all");
}

#[test]
fn iter_lanes_yields_most_urgent_first() {
    let set = Lanes::IDLE | Lanes::SYNC | Lanes::TRANSITION_3;
    let lanes: Vec<Lanes> = set.iter_lanes().collect();
    assert_eq!(lanes, vec![Lanes::SYNC, Lanes::TRANSITION_3, Lanes::IDLE]);
}

#[test]
fn lane_index_matches_bit_position() {
    assert_eq!(Lanes::SYNC.index(), 0);
    assert_eq!(Lanes::DEFAULT.index(), 2);
    assert_eq!(Lanes::OFFSCREEN.index(), 16);
}

#[test]
fn blocking_lanes_skip_time_slicing() {
    assert!(Lanes::SYNC.includes_blocking_lane());
    assert!(Lanes::DEFAULT.includes_blocking_lane());
    assert!(!Lanes::TRANSITION_0.includes_blocking_lane());
    assert!(!Lanes::IDLE.includes_blocking_lane());
}

#[test]
fn expiration_budgets_by_class() {
    assert_eq!(Lanes::SYNC.expiration_budget(), Some(0));
    assert_eq!(Lanes::INPUT_CONTINUOUS.expiration_budget(), Some(250));
    assert_eq!(Lanes::DEFAULT.expiration_budget(), Some(5_000));
    assert_eq!(Lanes::TRANSITION_6.expiration_budget(), Some(5_000));
    assert_eq!(Lanes::IDLE.expiration_budget(), None, "idle never starves");
    assert_eq!(Lanes::RETRY_0.expiration_budget(), None);
}

#[test]
fn scheduler_priority_mapping() {
    assert_eq!(
        Lanes::SYNC.to_scheduler_priority(),
        SchedulerPriority::UserBlocking
    );
    assert_eq!(
        Lanes::INPUT_CONTINUOUS.to_scheduler_priority(),
        SchedulerPriority::UserBlocking
    );
    assert_eq!(
        Lanes::DEFAULT.to_scheduler_priority(),
        SchedulerPriority::Normal
    );
    assert_eq!(
        Lanes::TRANSITION_7.to_scheduler_priority(),
        SchedulerPriority::Normal
    );
    assert_eq!(Lanes::IDLE.to_scheduler_priority(), SchedulerPriority::Idle);
}

#[test]
fn event_priority_collapses_to_channel_lanes() {
    assert_eq!(Lanes::SYNC.to_event_priority(), Lanes::SYNC);
    assert_eq!(Lanes::TRANSITION_2.to_event_priority(), Lanes::DEFAULT);
    assert_eq!(Lanes::IDLE.to_event_priority(), Lanes::IDLE);
}
