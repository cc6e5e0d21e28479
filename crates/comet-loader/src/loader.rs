//! The activation/deactivation sequencer.
//!
//! Activation walks the `required` lists into a dependency graph and runs
//! addons in topological order, dependencies first. Deactivation builds the
//! reverse graph so dependents unload before the addons they rely on. A
//! failure inside one addon's userscript is logged and never aborts the
//! batch; structural problems with the graph itself (missing dependency,
//! circular requirement) are hard errors raised before anything runs.

use crate::addon::{Addon, AddonCtx, ScriptFn};
use crate::host::SharedSink;
use crate::manifest::ManifestError;
use crate::registry::Registry;
use comet_events::{CoreEvent, EventBus};
use comet_graph::{DepGraph, GraphError};
use comet_match::PlatformTable;
use comet_settings::{AddonSettings, SettingDefinition, SharedSettings};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("unknown addon: {0}")]
    UnknownAddon(String),

    #[error("unavailable dependency {requested} requested by {by}")]
    MissingDependency { requested: String, by: String },

    #[error("circular requirement {requested} requested by {by}")]
    CircularRequirement { requested: String, by: String },

    #[error("cannot activate an enabled addon: {0}")]
    AlreadyEnabled(String),

    #[error("cannot deactivate a disabled addon: {0}")]
    NotEnabled(String),

    #[error("addon {0} cannot be enabled without a reload")]
    StaticEnable(String),

    #[error("addon {0} cannot be disabled without a reload")]
    StaticDisable(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Load progress of the host page. Userscripts flagged `run_at_complete`
/// wait for [`PagePhase::Complete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagePhase {
    Loading,
    Complete,
}

#[derive(Default)]
struct RuntimeAddon {
    enabled: bool,
    disposers: Vec<crate::addon::Disposer>,
}

struct DeferredScript {
    belongs: String,
    func: ScriptFn,
}

/// Owns the registry, runtime state and deferred-script queue, and drives
/// the addon lifecycle.
pub struct Loader {
    version: String,
    registry: Registry,
    settings: SharedSettings,
    bus: EventBus,
    platforms: PlatformTable,
    sink: SharedSink,
    url: String,
    phase: PagePhase,
    runtime: HashMap<String, RuntimeAddon>,
    deferred: Vec<DeferredScript>,
    started: bool,
}

impl Loader {
    pub fn new(
        version: impl Into<String>,
        settings: SharedSettings,
        bus: EventBus,
        platforms: PlatformTable,
        sink: SharedSink,
        url: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            registry: Registry::new(),
            settings,
            bus,
            platforms,
            sink,
            url: url.into(),
            phase: PagePhase::Loading,
            runtime: HashMap::new(),
            deferred: Vec::new(),
            started: false,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn page_phase(&self) -> PagePhase {
        self.phase
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> SharedSettings {
        self.settings.clone()
    }

    pub fn locale(&self) -> String {
        self.settings.borrow().locale()
    }

    /// Register an addon before (or after) startup.
    pub fn register(&mut self, addon: Addon) -> Result<(), ManifestError> {
        self.registry.insert(addon)
    }

    /// Replace the entire addon list. Runtime state for still-active ids is
    /// kept so a reload does not re-run userscripts.
    pub fn reload_addons(&mut self, addons: Vec<Addon>) -> Result<(), ManifestError> {
        let mut registry = Registry::new();
        for addon in addons {
            registry.insert(addon)?;
        }
        self.registry = registry;
        self.bus.emit(CoreEvent::AddonListReloaded);
        Ok(())
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.runtime.get(id).is_some_and(|r| r.enabled)
    }

    pub fn enabled_ids(&self) -> Vec<String> {
        self.registry
            .ids()
            .filter(|id| self.is_enabled(id))
            .map(str::to_string)
            .collect()
    }

    /// Activate every addon the user has enabled (explicit override, else
    /// the manifest's `enabled_by_default`), dependencies first. After this
    /// call the dynamic enable/disable gates apply.
    pub fn startup(&mut self) -> Result<(), LoaderError> {
        let ids: Vec<String> = {
            let settings = self.settings.borrow();
            self.registry
                .iter()
                .filter(|(id, addon)| {
                    settings
                        .enabled_override(id)
                        .unwrap_or(addon.manifest.enabled_by_default)
                })
                .map(|(id, _)| id.to_string())
                .collect()
        };
        self.activate_by_order(&ids)?;
        self.started = true;
        Ok(())
    }

    /// Deactivate everything, ignoring dynamic-disable gates. This is the
    /// page-unload path.
    pub fn shutdown(&mut self) -> Result<(), LoaderError> {
        self.started = false;
        let ids = self.enabled_ids();
        self.deactivate_by_order(&ids)
    }

    /// Record the user's enable choice and, when the addon supports it,
    /// apply the change immediately. Addons without the matching dynamic
    /// flag keep running (or stay off) until the next startup.
    pub fn set_user_enabled(&mut self, id: &str, enabled: bool) -> Result<(), LoaderError> {
        let Some(addon) = self.registry.get(id) else {
            return Err(LoaderError::UnknownAddon(id.to_string()));
        };
        let dynamic_enable = addon.manifest.dynamic_enable;
        let dynamic_disable = addon.manifest.dynamic_disable;

        self.settings.borrow_mut().set_enabled(id, enabled);
        if !self.started {
            return Ok(());
        }
        if enabled && dynamic_enable {
            self.activate_by_order(&[id.to_string()])
        } else if !enabled && dynamic_disable {
            self.deactivate_by_order(&[id.to_string()])
        } else {
            debug!("{id}: enable state change takes effect on next startup");
            Ok(())
        }
    }

    /// Activate the given addons plus their transitive dependencies, in
    /// dependency order. Graph problems abort the whole batch; a failure
    /// inside a single addon does not.
    pub fn activate_by_order(&mut self, ids: &[String]) -> Result<(), LoaderError> {
        let mut graph = DepGraph::new();
        let mut stack = Vec::new();
        for id in ids {
            self.check_loading_order(id, &mut stack, &mut graph)?;
        }
        for id in graph.topo()? {
            debug!("activating {id}...");
            match self.activate(&id) {
                Ok(()) => {}
                // An addon pulled in by several batches may already be on.
                Err(LoaderError::AlreadyEnabled(_)) => {}
                Err(e) => error!("error occurred while activating {id}: {e}"),
            }
        }
        Ok(())
    }

    /// Deactivate the given addons and every enabled addon that depends on
    /// them, dependents first.
    pub fn deactivate_by_order(&mut self, ids: &[String]) -> Result<(), LoaderError> {
        let mut graph = DepGraph::new();
        for id in ids {
            if self.is_enabled(id) {
                self.collect_unload_graph(id, &mut graph, None);
            }
        }
        for id in graph.topo()? {
            match self.deactivate(&id) {
                Ok(()) => {}
                Err(LoaderError::NotEnabled(_)) => {}
                Err(e) => error!("error occurred while deactivating {id}: {e}"),
            }
        }
        Ok(())
    }

    /// Activate one addon on the current URL.
    ///
    /// Userscripts flagged `run_at_complete` are queued while the page is
    /// still loading; the addon only reports enabled once the queue flushes
    /// in [`Loader::page_completed`].
    pub fn activate(&mut self, id: &str) -> Result<(), LoaderError> {
        let Some(addon) = self.registry.get(id) else {
            return Err(LoaderError::UnknownAddon(id.to_string()));
        };
        let name = addon.manifest.name.clone();
        let dynamic_enable = addon.manifest.dynamic_enable;
        let definitions = addon.manifest.settings.clone();
        let scripts = addon.userscripts.clone();
        let styles = addon.manifest.userstyles.clone();

        if self.is_enabled(id) {
            warn!("cannot activate an enabled addon: {id}");
            return Err(LoaderError::AlreadyEnabled(id.to_string()));
        }
        if self.started && !dynamic_enable {
            return Err(LoaderError::StaticEnable(id.to_string()));
        }

        let mut disposers = Vec::new();
        let mut has_deferred = false;
        for script in scripts {
            if !self.platforms.matches_url(&script.matches, &self.url) {
                continue;
            }
            if script.run_at_complete && self.phase == PagePhase::Loading {
                self.deferred.push(DeferredScript {
                    belongs: id.to_string(),
                    func: script.func.clone(),
                });
                has_deferred = true;
                continue;
            }
            let ctx = self.make_ctx(id, definitions.clone());
            match (script.func)(ctx) {
                Ok(Some(disposer)) => disposers.push(disposer),
                Ok(None) => {}
                Err(e) => error!("({id}) userscript failed: {e:#}"),
            }
        }

        let css: String = styles
            .iter()
            .filter(|style| self.platforms.matches_url(&style.matches, &self.url))
            .map(|style| style.stylesheet.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        if !css.is_empty() {
            self.sink.borrow_mut().inject(id, &css);
        }

        let entry = self.runtime.entry(id.to_string()).or_default();
        entry.disposers = disposers;
        if has_deferred {
            debug!("{id} has userscripts deferred until page completion");
        } else {
            entry.enabled = true;
            self.bus.emit(CoreEvent::AddonActivated { id: id.to_string() });
            info!("{name} (id: {id}) activated");
        }
        Ok(())
    }

    /// Deactivate one addon: run its disposers in registration order, drop
    /// its queued deferred scripts and pull its styles.
    pub fn deactivate(&mut self, id: &str) -> Result<(), LoaderError> {
        let Some(addon) = self.registry.get(id) else {
            return Err(LoaderError::UnknownAddon(id.to_string()));
        };
        let name = addon.manifest.name.clone();
        let dynamic_disable = addon.manifest.dynamic_disable;

        let enabled = self.is_enabled(id);
        let pending = self.deferred.iter().any(|s| s.belongs == id);
        if !enabled && !pending {
            warn!("cannot deactivate a disabled addon: {id}");
            return Err(LoaderError::NotEnabled(id.to_string()));
        }
        if self.started && !dynamic_disable {
            return Err(LoaderError::StaticDisable(id.to_string()));
        }

        let disposers = self
            .runtime
            .get_mut(id)
            .map(|entry| std::mem::take(&mut entry.disposers))
            .unwrap_or_default();
        for disposer in disposers {
            disposer();
        }

        self.deferred.retain(|s| s.belongs != id);
        self.sink.borrow_mut().remove(id);

        if let Some(entry) = self.runtime.get_mut(id) {
            entry.enabled = false;
        }
        self.bus.emit(CoreEvent::AddonDeactivated { id: id.to_string() });
        info!("{name} (id: {id}) deactivated");
        Ok(())
    }

    /// The host page finished loading: run the deferred queue in order and
    /// mark the owning addons enabled.
    pub fn page_completed(&mut self) {
        self.phase = PagePhase::Complete;
        let deferred = std::mem::take(&mut self.deferred);
        if deferred.is_empty() {
            return;
        }

        let mut finished: Vec<String> = Vec::new();
        for script in deferred {
            let Some(addon) = self.registry.get(&script.belongs) else {
                continue;
            };
            let definitions = addon.manifest.settings.clone();
            let ctx = self.make_ctx(&script.belongs, definitions);
            match (script.func)(ctx) {
                Ok(Some(disposer)) => {
                    self.runtime
                        .entry(script.belongs.clone())
                        .or_default()
                        .disposers
                        .push(disposer);
                }
                Ok(None) => {}
                Err(e) => error!("({}) deferred userscript failed: {e:#}", script.belongs),
            }
            if !finished.contains(&script.belongs) {
                finished.push(script.belongs.clone());
            }
        }

        for id in finished {
            let entry = self.runtime.entry(id.clone()).or_default();
            if entry.enabled {
                continue;
            }
            entry.enabled = true;
            let name = self
                .registry
                .get(&id)
                .map(|a| a.manifest.name.clone())
                .unwrap_or_default();
            self.bus.emit(CoreEvent::AddonActivated { id: id.clone() });
            info!("{name} (id: {id}) activated");
        }
    }

    fn make_ctx(&self, id: &str, definitions: Vec<SettingDefinition>) -> AddonCtx {
        AddonCtx {
            id: id.to_string(),
            settings: AddonSettings::new(id, definitions, self.settings.clone(), self.bus.clone()),
            bus: self.bus.clone(),
            locale: self.settings.borrow().locale(),
        }
    }

    fn check_loading_order(
        &self,
        id: &str,
        stack: &mut Vec<String>,
        graph: &mut DepGraph,
    ) -> Result<(), LoaderError> {
        let Some(addon) = self.registry.get(id) else {
            return Err(LoaderError::UnknownAddon(id.to_string()));
        };
        stack.push(id.to_string());
        graph.add_node(id);
        for dependency in &addon.manifest.required {
            if !self.registry.contains(dependency) {
                return Err(LoaderError::MissingDependency {
                    requested: dependency.clone(),
                    by: id.to_string(),
                });
            }
            if stack.iter().any(|s| s == dependency) {
                return Err(LoaderError::CircularRequirement {
                    requested: dependency.clone(),
                    by: id.to_string(),
                });
            }
            graph.add_edge(dependency, id);
            self.check_loading_order(dependency, stack, graph)?;
        }
        stack.pop();
        Ok(())
    }

    // Dependents point at their dependency so topo() unloads them first.
    // The edge-novelty check keeps mutually-requiring manifests from
    // recursing forever.
    fn collect_unload_graph(&self, id: &str, graph: &mut DepGraph, last: Option<&str>) {
        graph.add_node(id);
        for (other_id, other) in self.registry.iter() {
            if Some(other_id) == last {
                continue;
            }
            if other.manifest.required.iter().any(|r| r == id) && graph.add_edge(other_id, id) {
                self.collect_unload_graph(other_id, graph, Some(id));
            }
        }
    }
}
