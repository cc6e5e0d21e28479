//! Insertion-ordered registry of known addons.

use crate::addon::Addon;
use crate::manifest::ManifestError;
use std::collections::HashMap;

/// Id -> addon map preserving registration order. Registration order is the
/// tie-breaker for activation, so hosts get stable behavior across runs.
#[derive(Default)]
pub struct Registry {
    order: Vec<String>,
    addons: HashMap<String, Addon>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register an addon. Ids must be unique.
    pub fn insert(&mut self, addon: Addon) -> Result<(), ManifestError> {
        addon.manifest.validate()?;
        let id = addon.manifest.id.clone();
        if self.addons.contains_key(&id) {
            return Err(ManifestError::DuplicateAddon(id));
        }
        self.order.push(id.clone());
        self.addons.insert(id, addon);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Addon> {
        self.addons.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.addons.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Iterate addons in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Addon)> {
        self.order
            .iter()
            .filter_map(|id| self.addons.get(id).map(|addon| (id.as_str(), addon)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::AddonManifest;

    fn manifest(id: &str) -> AddonManifest {
        AddonManifest::from_toml(&format!("id = \"{id}\"\nname = \"{id}\"\n"))
            .expect("valid manifest")
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let mut registry = Registry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.insert(Addon::new(manifest(id))).expect("unique id");
        }
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("mid"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = Registry::new();
        registry.insert(Addon::new(manifest("pause"))).expect("first");
        let err = registry
            .insert(Addon::new(manifest("pause")))
            .expect_err("second registration");
        assert!(matches!(err, ManifestError::DuplicateAddon(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_manifest_rejected_at_insert() {
        let mut registry = Registry::new();
        let bad = AddonManifest {
            required: vec!["loop".into()],
            ..manifest("loop")
        };
        assert!(registry.insert(Addon::new(bad)).is_err());
        assert!(registry.is_empty());
    }
}
