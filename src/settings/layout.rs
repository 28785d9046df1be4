//! Settings layout generator
//!
//! `generate` is a pure function of a candidate `Settings`: it emits the
//! form schema in a fixed order, attaches inline errors to out-of-bounds
//! numeric fields, and reports overall validity. It is safe to call for
//! previews and dry-runs; committing is the caller's job.
//!
//! A numeric field that is not emitted never affects validity. If it holds
//! something that is not a number, the returned values carry the default
//! in its place.

use serde::Serialize;
use serde_json::{json, Value};

use super::{
    PressAction, RotateAction, Settings, LONG_PRESS_TIMEOUT_MAX, LONG_PRESS_TIMEOUT_MIN,
    SEEK_AMOUNT_MAX, SEEK_AMOUNT_MIN,
};

/// One selectable option of a dropdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub title: &'static str,
    pub value: Value,
}

fn choice(title: &'static str, value: impl Into<Value>) -> Choice {
    Choice {
        title,
        value: value.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dropdown {
    pub title: &'static str,
    pub values: Vec<Choice>,
    pub setting: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Integer {
    pub title: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<&'static str>,
    pub min: i64,
    pub max: i64,
    pub setting: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Form widget, serialized with a `type` tag
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Widget {
    Zone {
        title: &'static str,
        setting: &'static str,
    },
    Dropdown(Dropdown),
    Integer(Integer),
}

impl Widget {
    pub fn setting(&self) -> &'static str {
        match self {
            Widget::Zone { setting, .. } => *setting,
            Widget::Dropdown(d) => d.setting,
            Widget::Integer(i) => i.setting,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Widget::Zone { .. } => None,
            Widget::Dropdown(d) => d.error.as_deref(),
            Widget::Integer(i) => i.error.as_deref(),
        }
    }
}

/// Generated schema plus validity and the (normalized) values it describes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub values: Settings,
    pub layout: Vec<Widget>,
    pub has_error: bool,
}

impl Layout {
    pub fn is_valid(&self) -> bool {
        !self.has_error
    }

    pub fn widget(&self, setting: &str) -> Option<&Widget> {
        self.layout.iter().find(|w| w.setting() == setting)
    }

    pub fn error_for(&self, setting: &str) -> Option<&str> {
        self.widget(setting).and_then(Widget::error)
    }

    /// Setting keys in emission order
    pub fn settings(&self) -> Vec<&'static str> {
        self.layout.iter().map(Widget::setting).collect()
    }
}

pub const ZONE: &str = "zone";
pub const HID_DRIVER: &str = "hidDriver";
pub const LED_MODE: &str = "ledMode";
pub const PRESS_ACTION: &str = "pressAction";
pub const LONG_PRESS_ACTION: &str = "longPressAction";
pub const LONG_PRESS_TIMEOUT: &str = "longPressTimeout";
pub const ROTATE_ACTION: &str = "rotateAction";
pub const SEEK_AMOUNT: &str = "seekAmount";
pub const ROTATION_DAMPENER: &str = "rotationDampener";

fn press_choices() -> Vec<Choice> {
    [
        PressAction::TogglePlayPause,
        PressAction::ToggleMute,
        PressAction::Stop,
        PressAction::Standby,
        PressAction::None,
    ]
    .into_iter()
    .map(|action| {
        let title = match action {
            PressAction::TogglePlayPause => "Toggle Play/Pause",
            PressAction::ToggleMute => "Toggle Mute",
            PressAction::Stop => "Stop Playback",
            PressAction::Standby => "Standby",
            PressAction::None => "Nothing",
        };
        choice(title, action.as_str())
    })
    .collect()
}

/// Build the settings form for `settings`.
pub fn generate(settings: &Settings) -> Layout {
    let mut layout = Vec::with_capacity(9);
    let mut has_error = false;
    let mut values = settings.clone();
    let defaults = Settings::default();

    layout.push(Widget::Zone {
        title: "Zone",
        setting: ZONE,
    });

    layout.push(Widget::Dropdown(Dropdown {
        title: "USB Driver",
        values: vec![
            choice("hidraw (Linux kernel driver)", "hidraw"),
            choice("libusb", "libusb"),
        ],
        setting: HID_DRIVER,
        error: None,
    }));

    layout.push(Widget::Dropdown(Dropdown {
        title: "Light",
        values: vec![
            choice("Always On", "on"),
            choice("On While Playing", "when-playing"),
            choice("Off", "off"),
        ],
        setting: LED_MODE,
        error: None,
    }));

    layout.push(Widget::Dropdown(Dropdown {
        title: "Press Action",
        values: press_choices(),
        setting: PRESS_ACTION,
        error: None,
    }));

    layout.push(Widget::Dropdown(Dropdown {
        title: "Long Press Action",
        values: press_choices(),
        setting: LONG_PRESS_ACTION,
        error: None,
    }));

    if settings.long_press_action != PressAction::None {
        let mut field = Integer {
            title: "Long Press Timeout (milliseconds)",
            subtitle: Some(
                "This is how long you have to hold the button down to register as a long press.",
            ),
            min: LONG_PRESS_TIMEOUT_MIN,
            max: LONG_PRESS_TIMEOUT_MAX,
            setting: LONG_PRESS_TIMEOUT,
            error: None,
        };
        if !settings.long_press_timeout_in_domain() {
            field.error = Some(format!(
                "Long Press Timeout must be between {} and {} milliseconds.",
                field.min, field.max
            ));
            has_error = true;
        }
        layout.push(Widget::Integer(field));
    } else if settings.long_press_timeout.get().is_none() {
        values.long_press_timeout = defaults.long_press_timeout.clone();
    }

    layout.push(Widget::Dropdown(Dropdown {
        title: "Rotation Action",
        values: vec![
            choice("Change Volume", "volume"),
            choice("Seek Song Position", "seek"),
            choice("Nothing", "none"),
        ],
        setting: ROTATE_ACTION,
        error: None,
    }));

    if settings.rotate_action == RotateAction::Seek {
        let mut field = Integer {
            title: "Seek Amount (seconds)",
            subtitle: None,
            min: SEEK_AMOUNT_MIN,
            max: SEEK_AMOUNT_MAX,
            setting: SEEK_AMOUNT,
            error: None,
        };
        if !settings.seek_amount_in_domain() {
            field.error = Some(format!(
                "Seek Amount must be between {} and {} seconds.",
                field.min, field.max
            ));
            has_error = true;
        }
        layout.push(Widget::Integer(field));
    } else if settings.seek_amount.get().is_none() {
        values.seek_amount = defaults.seek_amount.clone();
    }

    if settings.rotate_action != RotateAction::None {
        let mut field = Dropdown {
            title: "Rotation Dampener",
            values: vec![
                choice("None", json!(1)),
                choice("Low", json!(3)),
                choice("Medium", json!(5)),
                choice("High", json!(7)),
            ],
            setting: ROTATION_DAMPENER,
            error: None,
        };
        if !settings.rotation_dampener_in_domain() {
            field.error = Some("Rotation Dampener must be one of 1, 3, 5 or 7.".to_string());
            has_error = true;
        }
        layout.push(Widget::Dropdown(field));
    } else if settings.rotation_dampener.get().is_none() {
        values.rotation_dampener = defaults.rotation_dampener.clone();
    }

    Layout {
        values,
        layout,
        has_error,
    }
}
