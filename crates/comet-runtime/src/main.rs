//! Comet reference host.
//!
//! Drives the full addon lifecycle without a real page: read `comet.toml`,
//! register the built-in demo addons plus any manifest-only addons from the
//! configured directory, activate everything enabled for the configured
//! URL, flush the page-complete queue, then tear it all down and persist
//! settings. Embedders wire the same pieces to an actual webview.
//!
//! # Environment Variables
//!
//! - `COMET_LOG` - Log level (default: "info")

use anyhow::{Context, Result};
use comet_loader::{
    Addon, AddonManifest, CoreEvent, EventBus, Loader, Match, PlatformTable, RecordingSink,
    SettingsStore,
};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Host configuration from `comet.toml`.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Config {
    /// URL the loader evaluates match rules against.
    url: String,
    /// JSON file for user settings. In-memory when unset.
    settings_path: Option<PathBuf>,
    /// Directory of `*.toml` addon manifests (style/metadata-only addons).
    addon_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "https://turbowarp.org/editor".to_string(),
            settings_path: None,
            addon_dir: None,
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing with env-filter support
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("COMET_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Parse args: --config <path> --url <url>
    let mut args = env::args().skip(1);
    let mut config_path = PathBuf::from("comet.toml");
    let mut url_override: Option<String> = None;
    while let Some(a) = args.next() {
        match a.as_str() {
            "--config" => {
                config_path =
                    PathBuf::from(args.next().context("--config requires a path")?);
            }
            "--url" => {
                url_override = Some(args.next().context("--url requires a value")?);
            }
            _ => {}
        }
    }

    let mut config = if config_path.exists() {
        let text = fs::read_to_string(&config_path)
            .with_context(|| format!("reading config at {}", config_path.display()))?;
        toml::from_str(&text).context("parsing config")?
    } else {
        Config::default()
    };
    if let Some(url) = url_override {
        config.url = url;
    }

    tracing::info!("Starting comet host v{} on {}", env!("CARGO_PKG_VERSION"), config.url);

    let bus = EventBus::new();
    let events = bus.subscribe();
    let settings = match &config.settings_path {
        Some(path) => SettingsStore::with_path(path.clone(), bus.clone())
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => SettingsStore::new(bus.clone()),
    }
    .into_shared();
    let sink = RecordingSink::shared();

    let mut loader = Loader::new(
        env!("CARGO_PKG_VERSION"),
        settings.clone(),
        bus,
        PlatformTable::builtin(),
        sink.clone(),
        &config.url,
    );

    for addon in builtin_addons().context("building built-in addons")? {
        loader.register(addon)?;
    }
    if let Some(dir) = &config.addon_dir {
        register_manifest_addons(&mut loader, dir)?;
    }
    tracing::info!("{} addons registered", loader.registry().len());

    loader.startup().context("startup activation")?;
    loader.page_completed();

    for event in events.try_iter() {
        if let CoreEvent::AddonActivated { id } = event {
            tracing::debug!("activated: {id}");
        }
    }
    tracing::info!(
        "{} addons enabled, {} stylesheets injected",
        loader.enabled_ids().len(),
        sink.borrow().len()
    );

    loader.shutdown().context("shutdown")?;
    settings.borrow().save().context("saving settings")?;
    Ok(())
}

/// Demo addons exercising the whole lifecycle: dependency ordering, a
/// deferred userscript, settings reads and a userstyle.
fn builtin_addons() -> Result<Vec<Addon>> {
    let banner_manifest = AddonManifest::from_toml(
        r#"
id = "startup-banner"
name = "Startup banner"
description = "Logs a banner while addons are active."
enabled_by_default = true
dynamic_enable = true
dynamic_disable = true

[[userstyles]]
stylesheet = ".comet-banner { font-weight: bold; }"
matches = ["all"]
"#,
    )?;
    let banner =
        Addon::new(banner_manifest).with_userscript(vec![Match::All], false, |ctx| {
            tracing::info!("({}) addons active, locale {}", ctx.id, ctx.locale);
            let id = ctx.id.clone();
            Ok(Some(Box::new(move || {
                tracing::info!("({id}) banner removed");
            }) as comet_loader::Disposer))
        });

    let counter_manifest = AddonManifest::from_toml(
        r#"
id = "block-count"
name = "Block count"
description = "Reports a live block count once the editor is ready."
required = ["startup-banner"]
enabled_by_default = true
dynamic_enable = true
dynamic_disable = true

[[settings]]
id = "refresh-interval"
name = "Refresh interval (seconds)"
type = "positive_integer"
default = 5
max = 60
"#,
    )?;
    let counter =
        Addon::new(counter_manifest).with_userscript(vec![Match::All], true, |ctx| {
            let interval = ctx.settings.get_int("refresh-interval")?;
            tracing::info!("({}) counting blocks every {interval}s", ctx.id);
            Ok(None)
        });

    Ok(vec![banner, counter])
}

/// Load metadata-only addons (userstyles, settings) from a directory of
/// TOML manifests. Malformed files are reported and skipped.
fn register_manifest_addons(loader: &mut Loader, dir: &PathBuf) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("reading addon directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().map_or(true, |ext| ext != "toml") {
            continue;
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        match AddonManifest::from_toml(&text) {
            Ok(manifest) => {
                tracing::debug!("registering {} from {}", manifest.id, path.display());
                loader.register(Addon::new(manifest))?;
            }
            Err(e) => {
                tracing::warn!("skipping {}: {e}", path.display());
            }
        }
    }
    Ok(())
}
