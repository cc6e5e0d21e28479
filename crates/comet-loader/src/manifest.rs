//! Addon manifests: the declarative half of an addon.
//!
//! A manifest carries everything the loader needs to know without running
//! code: identity, dependency list, enable flags, settings schema and
//! userstyles. Userscripts are executable and attach separately (see
//! [`crate::Addon`]). Manifest metadata deserializes from TOML.

use comet_match::Match;
use comet_settings::{SettingDefinition, SettingsError};
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to parse addon manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("addon manifest has an empty id")]
    EmptyId,

    #[error("invalid addon id '{0}': expected lowercase letters, digits and '-'")]
    InvalidId(String),

    #[error("addon '{addon}' declares setting '{setting}' more than once")]
    DuplicateSetting { addon: String, setting: String },

    #[error("addon '{0}' requires itself")]
    SelfRequirement(String),

    #[error("addon '{addon}' has an invalid setting default: {source}")]
    InvalidDefault {
        addon: String,
        source: SettingsError,
    },

    #[error("addon '{0}' is already registered")]
    DuplicateAddon(String),
}

/// A CSS stylesheet applied while its addon is active on a matching URL.
#[derive(Debug, Clone, Deserialize)]
pub struct Userstyle {
    pub stylesheet: String,
    pub matches: Vec<Match>,
}

/// Declarative addon metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct AddonManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ids of addons that must be active before this one.
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub enabled_by_default: bool,
    /// Whether the addon can be activated without reloading the page.
    #[serde(default)]
    pub dynamic_enable: bool,
    /// Whether the addon can be deactivated without reloading the page.
    #[serde(default)]
    pub dynamic_disable: bool,
    #[serde(default)]
    pub settings: Vec<SettingDefinition>,
    #[serde(default)]
    pub userstyles: Vec<Userstyle>,
}

impl AddonManifest {
    /// Parse and validate a manifest from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ManifestError> {
        let manifest: AddonManifest = toml::from_str(text)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural checks run before a manifest enters the registry.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.is_empty() {
            return Err(ManifestError::EmptyId);
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ManifestError::InvalidId(self.id.clone()));
        }
        if self.required.iter().any(|r| r == &self.id) {
            return Err(ManifestError::SelfRequirement(self.id.clone()));
        }

        let mut seen = HashSet::new();
        for setting in &self.settings {
            if !seen.insert(setting.id.as_str()) {
                return Err(ManifestError::DuplicateSetting {
                    addon: self.id.clone(),
                    setting: setting.id.clone(),
                });
            }
            setting
                .validate_default()
                .map_err(|source| ManifestError::InvalidDefault {
                    addon: self.id.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comet_settings::SettingKind;

    const TWEAKS: &str = r#"
id = "data-category-tweaks"
name = "Data category tweaks"
description = "Rearranges the variable toolbox category."
required = ["api"]
enabled_by_default = true
dynamic_enable = true
dynamic_disable = true

[[settings]]
id = "separate-lists"
name = "Separate lists"
type = "boolean"
default = false

[[settings]]
id = "gap"
name = "Gap size"
type = "integer"
default = 8
min = 0
max = 32

[[userstyles]]
stylesheet = ".blocklyFlyout { border: none; }"
matches = [{ platform = "sc", scopes = ["editor"] }]
"#;

    #[test]
    fn test_parse_full_manifest() {
        let manifest = AddonManifest::from_toml(TWEAKS).expect("valid manifest");
        assert_eq!(manifest.id, "data-category-tweaks");
        assert_eq!(manifest.required, vec!["api"]);
        assert!(manifest.enabled_by_default);
        assert!(manifest.dynamic_enable);
        assert_eq!(manifest.settings.len(), 2);
        assert!(matches!(
            manifest.settings[0].kind,
            SettingKind::Boolean { default: false }
        ));
        assert_eq!(manifest.userstyles.len(), 1);
    }

    #[test]
    fn test_defaults_are_conservative() {
        let manifest =
            AddonManifest::from_toml("id = \"pause\"\nname = \"Pause\"\n").expect("minimal");
        assert!(!manifest.enabled_by_default);
        assert!(!manifest.dynamic_enable);
        assert!(!manifest.dynamic_disable);
        assert!(manifest.required.is_empty());
        assert!(manifest.settings.is_empty());
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let manifest =
            AddonManifest::from_toml("id = \"Bad_Id\"\nname = \"x\"\n").expect_err("uppercase");
        assert!(matches!(manifest, ManifestError::InvalidId(_)));

        let manifest =
            AddonManifest::from_toml("id = \"\"\nname = \"x\"\n").expect_err("empty");
        assert!(matches!(manifest, ManifestError::EmptyId));
    }

    #[test]
    fn test_self_requirement_rejected() {
        let err = AddonManifest::from_toml(
            "id = \"pause\"\nname = \"Pause\"\nrequired = [\"pause\"]\n",
        )
        .expect_err("self loop");
        assert!(matches!(err, ManifestError::SelfRequirement(_)));
    }

    #[test]
    fn test_duplicate_setting_rejected() {
        let err = AddonManifest::from_toml(
            r#"
id = "pause"
name = "Pause"

[[settings]]
id = "key"
name = "Key"
type = "string"
default = "x"

[[settings]]
id = "key"
name = "Key again"
type = "string"
default = "y"
"#,
        )
        .expect_err("duplicate setting id");
        assert!(matches!(err, ManifestError::DuplicateSetting { .. }));
    }

    #[test]
    fn test_invalid_default_rejected() {
        let err = AddonManifest::from_toml(
            r#"
id = "tint"
name = "Tint"

[[settings]]
id = "color"
name = "Color"
type = "color"
default = "red"
"#,
        )
        .expect_err("not a hex color");
        assert!(matches!(err, ManifestError::InvalidDefault { .. }));
    }
}
