#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Layout generator properties
//!
//! Conditional fields, inline errors and determinism of the settings form.

use powermate_bridge::settings::layout::{
    self, Widget, LONG_PRESS_TIMEOUT, ROTATION_DAMPENER, SEEK_AMOUNT,
};
use powermate_bridge::settings::{PressAction, RotateAction, Settings};
use serde_json::json;

fn settings(value: serde_json::Value) -> Settings {
    Settings::from_value(value).expect("well-formed settings")
}

#[test]
fn timeout_field_only_with_long_press_action() {
    let with = layout::generate(&settings(json!({ "longPressAction": "standby" })));
    let without = layout::generate(&settings(json!({ "longPressAction": "none" })));

    assert!(with.widget(LONG_PRESS_TIMEOUT).is_some());
    assert!(without.widget(LONG_PRESS_TIMEOUT).is_none());
}

#[test]
fn seek_field_only_when_rotating_seeks() {
    let seek = layout::generate(&settings(json!({ "rotateAction": "seek" })));
    let volume = layout::generate(&settings(json!({ "rotateAction": "volume" })));
    let none = layout::generate(&settings(json!({ "rotateAction": "none" })));

    assert!(seek.widget(SEEK_AMOUNT).is_some());
    assert!(volume.widget(SEEK_AMOUNT).is_none());
    assert!(none.widget(SEEK_AMOUNT).is_none());

    // Dampener applies to any rotation action
    assert!(seek.widget(ROTATION_DAMPENER).is_some());
    assert!(volume.widget(ROTATION_DAMPENER).is_some());
    assert!(none.widget(ROTATION_DAMPENER).is_none());
}

#[test]
fn short_timeout_is_invalid_only_when_long_press_is_active() {
    let stop = layout::generate(&settings(json!({
        "longPressAction": "stop",
        "longPressTimeout": 50
    })));
    assert!(stop.has_error);
    assert_eq!(
        stop.error_for(LONG_PRESS_TIMEOUT),
        Some("Long Press Timeout must be between 100 and 2000 milliseconds.")
    );

    let none = layout::generate(&settings(json!({
        "longPressAction": "none",
        "longPressTimeout": 50
    })));
    assert!(!none.has_error);
}

#[test]
fn seek_amount_bounds() {
    for (amount, valid) in [(0, false), (1, true), (60, true), (61, false)] {
        let generated = layout::generate(&settings(json!({
            "rotateAction": "seek",
            "seekAmount": amount
        })));
        assert_eq!(generated.is_valid(), valid, "seekAmount {}", amount);
        assert_eq!(generated.error_for(SEEK_AMOUNT).is_none(), valid);
    }
}

#[test]
fn dampener_outside_choices_is_flagged() {
    let generated = layout::generate(&settings(json!({ "rotationDampener": 4 })));
    assert!(generated.has_error);
    assert!(generated.error_for(ROTATION_DAMPENER).is_some());
}

#[test]
fn invalid_values_are_echoed_back() {
    let candidate = settings(json!({ "longPressTimeout": 5000 }));
    let generated = layout::generate(&candidate);
    assert_eq!(generated.values, candidate);
}

#[test]
fn generation_is_deterministic() {
    let candidate = Settings {
        press_action: PressAction::Stop,
        long_press_action: PressAction::TogglePlayPause,
        rotate_action: RotateAction::Seek,
        seek_amount: 90.into(),
        ..Settings::default()
    };

    let first = layout::generate(&candidate);
    let second = layout::generate(&candidate);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn blank_or_null_inapplicable_fields_do_not_invalidate() {
    let blank_seek = layout::generate(&settings(json!({
        "rotateAction": "none",
        "seekAmount": ""
    })));
    assert!(blank_seek.is_valid());

    let null_timeout = layout::generate(&settings(json!({
        "longPressAction": "none",
        "longPressTimeout": null
    })));
    assert!(null_timeout.is_valid());
}

#[test]
fn non_numeric_applicable_field_is_an_inline_error() {
    let generated = layout::generate(&settings(json!({
        "longPressAction": "stop",
        "longPressTimeout": "abc"
    })));
    assert!(generated.has_error);
    assert!(generated.error_for(LONG_PRESS_TIMEOUT).is_some());
}

#[test]
fn fractional_values_are_out_of_domain() {
    let timeout = layout::generate(&settings(json!({
        "longPressAction": "stop",
        "longPressTimeout": 100.9
    })));
    assert!(timeout.error_for(LONG_PRESS_TIMEOUT).is_some());

    let seek = layout::generate(&settings(json!({
        "rotateAction": "seek",
        "seekAmount": "2.5"
    })));
    assert!(seek.error_for(SEEK_AMOUNT).is_some());
}

#[test]
fn zone_widget_comes_first() {
    let generated = layout::generate(&Settings::default());
    assert!(matches!(generated.layout.first(), Some(Widget::Zone { .. })));
}
