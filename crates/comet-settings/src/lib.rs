//! Addon settings: schema definitions, a validated flat store, and
//! per-addon read views.
//!
//! Keys use the flat `@<addon-id>/<setting-id>` form. The store also holds
//! framework keys: `locale` and the per-addon `@<id>/enabled` override.
//! Values a definition rejects are never stored. Persistence is a single
//! JSON file, loaded if present and written on an explicit `save`.

use comet_events::{CoreEvent, EventBus};
use crossbeam_channel::{Receiver, TryRecvError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting '{setting}' for addon '{addon}'")]
    UnknownSetting { addon: String, setting: String },

    #[error("type mismatch for setting '{setting}': expected {expected}")]
    TypeMismatch {
        setting: String,
        expected: &'static str,
    },

    #[error("value {value} out of range for setting '{setting}'")]
    OutOfRange { setting: String, value: i64 },

    #[error("invalid color '{value}' for setting '{setting}'")]
    InvalidColor { setting: String, value: String },

    #[error("'{value}' is not an item of select setting '{setting}'")]
    UnknownItem { setting: String, value: String },

    #[error("failed to read or write settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// Schema
// ============================================================================

/// One entry of a `select` setting.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectItem {
    pub id: String,
    pub name: String,
    pub value: String,
}

/// The typed part of a setting definition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingKind {
    Boolean {
        default: bool,
    },
    Integer {
        default: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
    PositiveInteger {
        default: i64,
        min: Option<i64>,
        max: Option<i64>,
    },
    String {
        default: String,
    },
    Color {
        default: String,
        #[serde(default)]
        allow_transparency: bool,
    },
    Select {
        default: String,
        items: Vec<SelectItem>,
    },
}

/// A setting declared by an addon manifest.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SettingDefinition {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: SettingKind,
}

/// A stored setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SettingValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SettingValue::Bool(v) => serde_json::Value::Bool(*v),
            SettingValue::Int(v) => serde_json::Value::from(*v),
            SettingValue::Str(v) => serde_json::Value::String(v.clone()),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{v}"),
            SettingValue::Int(v) => write!(f, "{v}"),
            SettingValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Str(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Str(v)
    }
}

impl SettingDefinition {
    /// The manifest default as a stored value.
    pub fn default_value(&self) -> SettingValue {
        match &self.kind {
            SettingKind::Boolean { default } => SettingValue::Bool(*default),
            SettingKind::Integer { default, .. }
            | SettingKind::PositiveInteger { default, .. } => SettingValue::Int(*default),
            SettingKind::String { default }
            | SettingKind::Color { default, .. }
            | SettingKind::Select { default, .. } => SettingValue::Str(default.clone()),
        }
    }

    fn expected(&self) -> &'static str {
        match &self.kind {
            SettingKind::Boolean { .. } => "boolean",
            SettingKind::Integer { .. } => "integer",
            SettingKind::PositiveInteger { .. } => "positive_integer",
            SettingKind::String { .. } => "string",
            SettingKind::Color { .. } => "color",
            SettingKind::Select { .. } => "select",
        }
    }

    /// Check a candidate value against this definition.
    pub fn validate(&self, value: &SettingValue) -> Result<(), SettingsError> {
        let mismatch = || SettingsError::TypeMismatch {
            setting: self.id.clone(),
            expected: self.expected(),
        };

        match (&self.kind, value) {
            (SettingKind::Boolean { .. }, SettingValue::Bool(_)) => Ok(()),
            (SettingKind::Integer { min, max, .. }, SettingValue::Int(v)) => {
                self.check_range(*v, *min, *max)
            }
            (SettingKind::PositiveInteger { min, max, .. }, SettingValue::Int(v)) => {
                if *v < 0 {
                    return Err(SettingsError::OutOfRange {
                        setting: self.id.clone(),
                        value: *v,
                    });
                }
                self.check_range(*v, *min, *max)
            }
            (SettingKind::String { .. }, SettingValue::Str(_)) => Ok(()),
            (
                SettingKind::Color {
                    allow_transparency, ..
                },
                SettingValue::Str(s),
            ) => {
                if is_hex_color(s, *allow_transparency) {
                    Ok(())
                } else {
                    Err(SettingsError::InvalidColor {
                        setting: self.id.clone(),
                        value: s.clone(),
                    })
                }
            }
            (SettingKind::Select { items, .. }, SettingValue::Str(s)) => {
                if items.iter().any(|item| item.value == *s) {
                    Ok(())
                } else {
                    Err(SettingsError::UnknownItem {
                        setting: self.id.clone(),
                        value: s.clone(),
                    })
                }
            }
            _ => Err(mismatch()),
        }
    }

    /// Validate the declared default itself. Manifest loading runs this so
    /// a bad manifest fails up front rather than at first read.
    pub fn validate_default(&self) -> Result<(), SettingsError> {
        self.validate(&self.default_value())
    }

    fn check_range(
        &self,
        value: i64,
        min: Option<i64>,
        max: Option<i64>,
    ) -> Result<(), SettingsError> {
        let below = min.is_some_and(|m| value < m);
        let above = max.is_some_and(|m| value > m);
        if below || above {
            return Err(SettingsError::OutOfRange {
                setting: self.id.clone(),
                value,
            });
        }
        Ok(())
    }
}

fn is_hex_color(s: &str, allow_alpha: bool) -> bool {
    let Some(hex) = s.strip_prefix('#') else {
        return false;
    };
    let valid_len = hex.len() == 6 || (allow_alpha && hex.len() == 8);
    valid_len && hex.chars().all(|c| c.is_ascii_hexdigit())
}

// ============================================================================
// Store
// ============================================================================

/// Flat key-value store for user settings.
#[derive(Debug)]
pub struct SettingsStore {
    values: BTreeMap<String, SettingValue>,
    path: Option<PathBuf>,
    bus: EventBus,
}

/// Single-threaded shared handle to the store.
pub type SharedSettings = Rc<RefCell<SettingsStore>>;

impl SettingsStore {
    /// An in-memory store with no persistence.
    pub fn new(bus: EventBus) -> Self {
        Self {
            values: BTreeMap::new(),
            path: None,
            bus,
        }
    }

    /// A store backed by a JSON file. A missing file is an empty store;
    /// an unreadable or malformed file is an error.
    pub fn with_path(path: PathBuf, bus: EventBus) -> Result<Self, SettingsError> {
        let values = if path.exists() {
            let text = fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            values,
            path: Some(path),
            bus,
        })
    }

    /// Wrap the store for sharing between the loader and addon contexts.
    pub fn into_shared(self) -> SharedSettings {
        Rc::new(RefCell::new(self))
    }

    /// Write the store to its backing file. No-op for in-memory stores.
    pub fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(&self.values)?;
        fs::write(path, text)?;
        tracing::debug!("settings saved to {}", path.display());
        Ok(())
    }

    /// The flat storage key for an addon setting.
    pub fn addon_key(addon_id: &str, setting_id: &str) -> String {
        format!("@{addon_id}/{setting_id}")
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    pub fn get_addon(&self, addon_id: &str, setting_id: &str) -> Option<&SettingValue> {
        self.values.get(&Self::addon_key(addon_id, setting_id))
    }

    /// Store an addon setting after validating it against its definition.
    pub fn set_addon(
        &mut self,
        addon_id: &str,
        definition: &SettingDefinition,
        value: SettingValue,
    ) -> Result<(), SettingsError> {
        definition.validate(&value)?;
        self.set_raw(Self::addon_key(addon_id, &definition.id), value);
        Ok(())
    }

    /// Store a framework key (or a pre-validated value) and notify
    /// subscribers.
    pub fn set_raw(&mut self, key: impl Into<String>, value: SettingValue) {
        let key = key.into();
        let json = value.to_json();
        self.values.insert(key.clone(), value);
        self.bus.emit(CoreEvent::SettingChanged { key, value: json });
    }

    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The user's explicit enable/disable choice for an addon, if any.
    pub fn enabled_override(&self, addon_id: &str) -> Option<bool> {
        self.get(&Self::addon_key(addon_id, "enabled"))
            .and_then(SettingValue::as_bool)
    }

    pub fn set_enabled(&mut self, addon_id: &str, enabled: bool) {
        self.set_raw(
            Self::addon_key(addon_id, "enabled"),
            SettingValue::Bool(enabled),
        );
    }

    pub fn locale(&self) -> String {
        self.get("locale")
            .and_then(SettingValue::as_str)
            .unwrap_or("en")
            .to_string()
    }
}

// ============================================================================
// Per-addon view
// ============================================================================

/// Read view over one addon's settings: the user value when set, otherwise
/// the manifest default.
#[derive(Clone)]
pub struct AddonSettings {
    addon_id: String,
    definitions: Vec<SettingDefinition>,
    store: SharedSettings,
    bus: EventBus,
}

impl AddonSettings {
    pub fn new(
        addon_id: impl Into<String>,
        definitions: Vec<SettingDefinition>,
        store: SharedSettings,
        bus: EventBus,
    ) -> Self {
        Self {
            addon_id: addon_id.into(),
            definitions,
            store,
            bus,
        }
    }

    pub fn addon_id(&self) -> &str {
        &self.addon_id
    }

    fn definition(&self, setting_id: &str) -> Result<&SettingDefinition, SettingsError> {
        self.definitions
            .iter()
            .find(|d| d.id == setting_id)
            .ok_or_else(|| SettingsError::UnknownSetting {
                addon: self.addon_id.clone(),
                setting: setting_id.to_string(),
            })
    }

    pub fn get(&self, setting_id: &str) -> Result<SettingValue, SettingsError> {
        let definition = self.definition(setting_id)?;
        if let Some(value) = self.store.borrow().get_addon(&self.addon_id, setting_id) {
            return Ok(value.clone());
        }
        Ok(definition.default_value())
    }

    pub fn get_bool(&self, setting_id: &str) -> Result<bool, SettingsError> {
        self.get(setting_id)?
            .as_bool()
            .ok_or(SettingsError::TypeMismatch {
                setting: setting_id.to_string(),
                expected: "boolean",
            })
    }

    pub fn get_int(&self, setting_id: &str) -> Result<i64, SettingsError> {
        self.get(setting_id)?
            .as_int()
            .ok_or(SettingsError::TypeMismatch {
                setting: setting_id.to_string(),
                expected: "integer",
            })
    }

    pub fn get_str(&self, setting_id: &str) -> Result<String, SettingsError> {
        let value = self.get(setting_id)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or(SettingsError::TypeMismatch {
                setting: setting_id.to_string(),
                expected: "string",
            })
    }

    /// Validate and store a new value for one of this addon's settings.
    pub fn set(&self, setting_id: &str, value: SettingValue) -> Result<(), SettingsError> {
        let definition = self.definition(setting_id)?.clone();
        self.store
            .borrow_mut()
            .set_addon(&self.addon_id, &definition, value)
    }

    /// Watch for changes to this addon's settings only. Setting ids arrive
    /// with the `@<id>/` prefix stripped.
    pub fn watch(&self) -> SettingsWatcher {
        SettingsWatcher {
            prefix: format!("@{}/", self.addon_id),
            rx: self.bus.subscribe(),
        }
    }
}

/// Filtered receiver handed out by [`AddonSettings::watch`].
pub struct SettingsWatcher {
    prefix: String,
    rx: Receiver<CoreEvent>,
}

impl SettingsWatcher {
    /// Next pending change for the watched addon, if any.
    pub fn poll(&self) -> Option<(String, serde_json::Value)> {
        loop {
            match self.rx.try_recv() {
                Ok(CoreEvent::SettingChanged { key, value }) => {
                    if let Some(name) = key.strip_prefix(&self.prefix) {
                        return Some((name.to_string(), value));
                    }
                }
                Ok(_) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}
