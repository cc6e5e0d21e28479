//! Comet addon loader - lifecycle management for editor addons.
//!
//! An addon couples a declarative manifest (identity, dependencies, enable
//! flags, settings schema, userstyles) with executable userscripts. The
//! loader resolves activation order across the dependency graph, runs
//! userscripts at the right page-load phase on matching URLs, hands
//! userstyle CSS to the embedding host, and reverses every side effect on
//! deactivation.
//!
//! ```text
//! manifests (TOML)          userscripts (Rust closures)
//!        │                            │
//!        └────────► Registry ◄────────┘
//!                      │
//!              ┌───────▼────────┐     ┌──────────────┐
//!              │     Loader     │────►│  StyleSink   │ (host)
//!              │  topo ordering │     └──────────────┘
//!              │  defer/flush   │────► EventBus
//!              └───────┬────────┘
//!                      ▼
//!               SettingsStore
//! ```

mod addon;
mod host;
mod loader;
mod manifest;
mod registry;

pub use addon::{Addon, AddonCtx, Disposer, ScriptFn, Userscript};
pub use host::{RecordingSink, SharedSink, StyleSink};
pub use loader::{Loader, LoaderError, PagePhase};
pub use manifest::{AddonManifest, ManifestError, Userstyle};
pub use registry::Registry;

pub use comet_events::{CoreEvent, EventBus};
pub use comet_match::{Match, PlatformTable, Scope};
pub use comet_settings::{
    AddonSettings, SettingDefinition, SettingKind, SettingValue, SettingsStore, SharedSettings,
};
