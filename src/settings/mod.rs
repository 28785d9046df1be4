//! Settings model
//!
//! The user-editable gesture → action mapping. A single `Settings` value is
//! owned by the supervisor's control loop and replaced wholesale on commit;
//! validation lives in [`layout::generate`], which never mutates anything.
//!
//! Persisted documents are merged over the defaults on load, so a file
//! written by an older version with lowercase keys still loads. Numeric
//! fields outside their domain are reset to the default on load, so the
//! active settings are always valid.

pub mod layout;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Long-press timeout bounds (milliseconds)
pub const LONG_PRESS_TIMEOUT_MIN: i64 = 100;
pub const LONG_PRESS_TIMEOUT_MAX: i64 = 2000;

/// Seek amount bounds (seconds)
pub const SEEK_AMOUNT_MIN: i64 = 1;
pub const SEEK_AMOUNT_MAX: i64 = 60;

/// Allowed rotation dampener divisors
pub const DAMPENER_CHOICES: [i64; 4] = [1, 3, 5, 7];

pub const DEFAULT_LONG_PRESS_TIMEOUT: i64 = 500;
pub const DEFAULT_SEEK_AMOUNT: i64 = 5;
pub const DEFAULT_ROTATION_DAMPENER: i64 = 1;

/// File name used by [`JsonFileStore`] in the config directory
pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("settings I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Implements string conversions for a settings enum.
///
/// The first literal of each arm is the canonical (serialized) name; any
/// further literals are accepted aliases. Unrecognised strings map to the
/// fallback variant rather than failing the whole document.
macro_rules! settings_enum {
    ($name:ident, fallback = $fallback:ident, {
        $($variant:ident => $canonical:literal $(| $alias:literal)*),+ $(,)?
    }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $canonical),+
                }
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($canonical $(| $alias)* => Self::$variant,)+
                    _ => Self::$fallback,
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::from(s.as_str())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Action bound to a press or long-press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PressAction {
    TogglePlayPause,
    ToggleMute,
    Stop,
    Standby,
    None,
}

settings_enum!(PressAction, fallback = None, {
    TogglePlayPause => "toggle-play-pause" | "toggleplay" | "playpause" | "play_pause",
    ToggleMute => "toggle-mute" | "togglemute",
    Stop => "stop",
    Standby => "standby",
    None => "none",
});

/// Action bound to wheel rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RotateAction {
    Volume,
    Seek,
    None,
}

settings_enum!(RotateAction, fallback = None, {
    Volume => "volume",
    Seek => "seek",
    None => "none",
});

/// Indicator light policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LedMode {
    On,
    WhenPlaying,
    Off,
}

settings_enum!(LedMode, fallback = On, {
    On => "on",
    WhenPlaying => "when-playing" | "whenplaying" | "playing",
    Off => "off",
});

/// Device backend hint, consumed by the device collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HidDriver {
    Hidraw,
    Libusb,
}

settings_enum!(HidDriver, fallback = Hidraw, {
    Hidraw => "hidraw",
    Libusb => "libusb",
});

/// Integer setting as submitted.
///
/// UI hosts send numbers, numeric strings, blanks or nulls. Anything that is
/// not a whole number is kept as `Invalid` with its raw text, so the layout
/// generator can flag it inline when the field applies and ignore it when it
/// does not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntField {
    Int(i64),
    Invalid(String),
}

impl IntField {
    pub fn get(&self) -> Option<i64> {
        match self {
            IntField::Int(n) => Some(*n),
            IntField::Invalid(_) => None,
        }
    }

    /// Whole number within `min..=max`
    pub fn within(&self, min: i64, max: i64) -> bool {
        self.get().is_some_and(|n| (min..=max).contains(&n))
    }

    fn from_json(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => IntField::Int(i),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        IntField::Int(f as i64)
                    }
                    _ => IntField::Invalid(n.to_string()),
                },
            },
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(n) => IntField::Int(n),
                Err(_) => IntField::Invalid(s),
            },
            Value::Null => IntField::Invalid(String::new()),
            other => IntField::Invalid(other.to_string()),
        }
    }
}

impl From<i64> for IntField {
    fn from(n: i64) -> Self {
        IntField::Int(n)
    }
}

impl PartialEq<i64> for IntField {
    fn eq(&self, other: &i64) -> bool {
        self.get() == Some(*other)
    }
}

impl std::fmt::Display for IntField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntField::Int(n) => write!(f, "{}", n),
            IntField::Invalid(raw) => write!(f, "{:?}", raw),
        }
    }
}

impl Serialize for IntField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IntField::Int(n) => serializer.serialize_i64(*n),
            IntField::Invalid(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for IntField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(IntField::from_json(Value::deserialize(deserializer)?))
    }
}

/// Canonical configuration record
///
/// Numeric fields are stored unchecked so an out-of-range or unparseable
/// candidate can be echoed back with inline errors instead of being rejected
/// at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    #[serde(deserialize_with = "lenient_zone")]
    pub zone: Option<String>,

    #[serde(alias = "hiddriver")]
    pub hid_driver: HidDriver,

    #[serde(alias = "pressaction")]
    pub press_action: PressAction,

    #[serde(alias = "longpressaction")]
    pub long_press_action: PressAction,

    #[serde(alias = "longpresstimeout")]
    pub long_press_timeout: IntField,

    #[serde(alias = "rotateaction")]
    pub rotate_action: RotateAction,

    #[serde(alias = "seekamount")]
    pub seek_amount: IntField,

    #[serde(alias = "rotationdampener")]
    pub rotation_dampener: IntField,

    #[serde(alias = "ledmode")]
    pub led_mode: LedMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            zone: None,
            hid_driver: HidDriver::Hidraw,
            press_action: PressAction::ToggleMute,
            long_press_action: PressAction::Stop,
            long_press_timeout: IntField::Int(DEFAULT_LONG_PRESS_TIMEOUT),
            rotate_action: RotateAction::Volume,
            seek_amount: IntField::Int(DEFAULT_SEEK_AMOUNT),
            rotation_dampener: IntField::Int(DEFAULT_ROTATION_DAMPENER),
            led_mode: LedMode::On,
        }
    }
}

impl Settings {
    /// Parse a candidate document, filling missing keys from the defaults.
    pub fn from_value(value: Value) -> Result<Self, SettingsError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Load from a persistence collaborator, falling back to defaults when
    /// nothing is stored or the stored document is unreadable. Fields outside
    /// their domain fall back individually.
    pub fn load(store: &dyn SettingsStore) -> Self {
        match store.load() {
            Ok(Some(value)) => match Self::from_value(value) {
                Ok(settings) => settings.repaired(),
                Err(e) => {
                    tracing::warn!("Stored settings unreadable, using defaults: {}", e);
                    Self::default()
                }
            },
            Ok(None) => {
                tracing::info!("No stored settings, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to load settings, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// True iff every applicable numeric field is within its domain.
    pub fn is_valid(&self) -> bool {
        !layout::generate(self).has_error
    }

    pub fn long_press_timeout_in_domain(&self) -> bool {
        self.long_press_timeout
            .within(LONG_PRESS_TIMEOUT_MIN, LONG_PRESS_TIMEOUT_MAX)
    }

    pub fn seek_amount_in_domain(&self) -> bool {
        self.seek_amount.within(SEEK_AMOUNT_MIN, SEEK_AMOUNT_MAX)
    }

    pub fn rotation_dampener_in_domain(&self) -> bool {
        self.rotation_dampener
            .get()
            .is_some_and(|n| DAMPENER_CHOICES.contains(&n))
    }

    /// Reset every numeric field outside its domain to the default, whether
    /// or not the field currently applies.
    fn repaired(mut self) -> Self {
        let defaults = Self::default();
        if !self.long_press_timeout_in_domain() {
            tracing::warn!(
                "Stored longPressTimeout {} out of range, using {}",
                self.long_press_timeout,
                defaults.long_press_timeout
            );
            self.long_press_timeout = defaults.long_press_timeout;
        }
        if !self.seek_amount_in_domain() {
            tracing::warn!(
                "Stored seekAmount {} out of range, using {}",
                self.seek_amount,
                defaults.seek_amount
            );
            self.seek_amount = defaults.seek_amount;
        }
        if !self.rotation_dampener_in_domain() {
            tracing::warn!(
                "Stored rotationDampener {} not allowed, using {}",
                self.rotation_dampener,
                defaults.rotation_dampener
            );
            self.rotation_dampener = defaults.rotation_dampener;
        }
        self
    }

    /// The configured zone, if any and non-empty
    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref().filter(|z| !z.is_empty())
    }

    /// Long-press delay as a timer duration.
    ///
    /// Clamped because the timeout is only validated while a long-press
    /// action is configured, but the timer is armed on every press.
    pub fn long_press_duration(&self) -> Duration {
        let ms = self
            .long_press_timeout
            .get()
            .unwrap_or(DEFAULT_LONG_PRESS_TIMEOUT)
            .clamp(LONG_PRESS_TIMEOUT_MIN, LONG_PRESS_TIMEOUT_MAX);
        Duration::from_millis(ms as u64)
    }

    /// Seconds per rotate step when seeking
    pub fn seek_step_seconds(&self) -> i64 {
        self.seek_amount.get().unwrap_or(DEFAULT_SEEK_AMOUNT)
    }

    /// Wheel dampener divisor
    pub fn dampener(&self) -> i64 {
        self.rotation_dampener
            .get()
            .unwrap_or(DEFAULT_ROTATION_DAMPENER)
    }
}

/// Zone reference: a plain id, or a zone widget object carrying
/// `output_id`/`zone_id`
fn lenient_zone<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let id = match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Object(obj) => obj
            .get("output_id")
            .or_else(|| obj.get("zone_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        other => {
            return Err(D::Error::custom(format!(
                "expected a zone id, got {}",
                other
            )))
        }
    };
    Ok(id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()))
}

// =============================================================================
// Persistence collaborator
// =============================================================================

/// Settings persistence (`load(key)` / `save(key, value)` with a fixed key)
pub trait SettingsStore: Send {
    fn load(&self) -> Result<Option<Value>, SettingsError>;
    fn save(&self, settings: &Settings) -> Result<(), SettingsError>;
}

/// Pretty-printed JSON file store
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Option<Value>, SettingsError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, json).map_err(|e| self.io_error(e))?;
        tracing::debug!("Settings saved to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store; clones share the same slot
#[derive(Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<Value>>>,
    saves: Arc<Mutex<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a raw document
    pub fn with_value(value: Value) -> Self {
        let store = Self::default();
        if let Ok(mut slot) = store.slot.lock() {
            *slot = Some(value);
        }
        store
    }

    /// Number of successful `save` calls
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }

    /// Last stored document
    pub fn stored(&self) -> Option<Value> {
        self.slot.lock().ok().and_then(|slot| slot.clone())
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Option<Value>, SettingsError> {
        Ok(self.stored())
    }

    fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        let value = serde_json::to_value(settings)?;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(value);
        }
        if let Ok(mut saves) = self.saves.lock() {
            *saves += 1;
        }
        Ok(())
    }
}
