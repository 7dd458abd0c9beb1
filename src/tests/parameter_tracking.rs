use std::sync::Arc;

use super::{ValueCore, sample_parameters};
use crate::BridgeError;
use crate::params::{
    ParameterChange, ParameterRanges, ParameterStore, ParameterChangeTracker, apply_parameter,
    is_equal,
};

#[test]
fn store_starts_at_defaults() {
    let store = ParameterStore::new(sample_parameters());
    assert_eq!(store.len(), 4);
    assert_eq!(store.value(0), Some(0.0));
    assert_eq!(store.value(4), None);
}

#[test]
fn ui_requests_are_clamped_and_coalesced() {
    let store = ParameterStore::new(sample_parameters());
    assert_eq!(store.request(0, 42.0).expect("depth accepts writes"), 10.0);
    assert_eq!(store.request(0, 3.0).expect("depth accepts writes"), 3.0);

    assert_eq!(store.take_request(0), Some(3.0));
    assert_eq!(store.take_request(0), None);
}

#[test]
fn ui_requests_reject_unknown_and_output_parameters() {
    let store = ParameterStore::new(sample_parameters());
    assert!(matches!(
        store.request(9, 1.0),
        Err(BridgeError::UnknownParameter(9))
    ));
    assert!(matches!(
        store.request(3, 1.0),
        Err(BridgeError::OutputParameter(3))
    ));
}

#[test]
fn apply_parameter_publishes_what_the_core_kept() {
    let store = ParameterStore::new(sample_parameters());
    let mut core = ValueCore::new(sample_parameters());

    assert!(apply_parameter(&mut core, &store, 0, 4.5, false));
    assert_eq!(store.value(0), Some(4.5));
    assert!(!store.take_changed(0));

    assert!(apply_parameter(&mut core, &store, 0, 6.0, true));
    assert!(store.take_changed(0));
    assert!(!store.take_changed(0));

    assert!(!apply_parameter(&mut core, &store, 12, 1.0, true));
    assert_eq!(core.writes, vec![(0, 4.5), (0, 6.0)]);
}

#[test]
fn tracker_reports_dirty_inputs_once() {
    let store = Arc::new(ParameterStore::new(sample_parameters()));
    let mut tracker = ParameterChangeTracker::new(Arc::clone(&store));
    assert!(tracker.poll_outputs().is_empty());

    store.publish(1, 2.0);
    store.mark_changed(1);
    assert_eq!(
        tracker.poll_outputs(),
        vec![ParameterChange {
            index: 1,
            value: 2.0
        }]
    );
    assert!(tracker.poll_outputs().is_empty());
}

#[test]
fn tracker_reports_output_changes_beyond_float_noise() {
    let store = Arc::new(ParameterStore::new(sample_parameters()));
    let mut tracker = ParameterChangeTracker::new(Arc::clone(&store));

    store.publish(3, 0.25);
    assert_eq!(
        tracker.poll_outputs(),
        vec![ParameterChange {
            index: 3,
            value: 0.25
        }]
    );

    store.publish(3, 0.25 + f32::EPSILON / 4.0);
    assert!(tracker.poll_outputs().is_empty());

    store.publish(3, 0.0);
    assert_eq!(tracker.poll_outputs().len(), 1);
}

#[test]
fn output_changes_are_not_driven_by_dirty_flags() {
    let store = Arc::new(ParameterStore::new(sample_parameters()));
    let mut tracker = ParameterChangeTracker::new(Arc::clone(&store));
    store.mark_changed(3);
    assert!(tracker.poll_outputs().is_empty());
}

#[test]
fn refresh_inputs_flags_every_input() {
    let store = ParameterStore::new(sample_parameters());
    let mut core = ValueCore::new(sample_parameters());
    core.values = vec![1.0, 2.0, 0.0, 0.7];

    store.refresh_inputs(&core, true);
    assert_eq!(store.value(1), Some(2.0));
    assert!(store.take_changed(0));
    assert!(store.take_changed(1));
    assert!(store.take_changed(2));
    assert!(!store.take_changed(3));
    assert_eq!(store.value(3), Some(0.0));

    store.mirror_outputs(&core);
    assert_eq!(store.value(3), Some(0.7));
}

#[test]
fn ranges_map_between_plain_and_normalized() {
    let ranges = ParameterRanges::new(-24.0, 24.0, 0.0);
    assert_eq!(ranges.fix_value(30.0), 24.0);
    assert_eq!(ranges.normalized_value(0.0), 0.5);
    assert_eq!(ranges.unnormalized_value(0.25), -12.0);
    assert_eq!(ranges.unnormalized_value(2.0), 24.0);
    assert!(is_equal(0.1 + 0.2, 0.3));
    assert!(!is_equal(0.1, 0.2));
}
