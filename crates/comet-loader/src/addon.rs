//! Executable half of an addon: userscripts and the context they receive.

use crate::manifest::AddonManifest;
use comet_events::EventBus;
use comet_match::Match;
use comet_settings::AddonSettings;
use std::rc::Rc;

/// Cleanup returned by a userscript. Runs once when the addon deactivates.
pub type Disposer = Box<dyn FnOnce()>;

/// A userscript body. Receives a fresh [`AddonCtx`] per invocation and may
/// hand back a disposer that reverses its side effects.
pub type ScriptFn = Rc<dyn Fn(AddonCtx) -> anyhow::Result<Option<Disposer>>>;

/// Everything a userscript gets to see when it runs.
pub struct AddonCtx {
    pub id: String,
    pub settings: AddonSettings,
    pub bus: EventBus,
    pub locale: String,
}

/// A userscript plus its activation conditions.
#[derive(Clone)]
pub struct Userscript {
    pub func: ScriptFn,
    pub matches: Vec<Match>,
    /// Defer execution until the page reports completion.
    pub run_at_complete: bool,
}

/// A manifest bundled with its userscripts.
pub struct Addon {
    pub manifest: AddonManifest,
    pub userscripts: Vec<Userscript>,
}

impl Addon {
    pub fn new(manifest: AddonManifest) -> Self {
        Self {
            manifest,
            userscripts: Vec::new(),
        }
    }

    /// Attach a userscript. Builder-style so hosts can chain registrations.
    pub fn with_userscript<F>(mut self, matches: Vec<Match>, run_at_complete: bool, func: F) -> Self
    where
        F: Fn(AddonCtx) -> anyhow::Result<Option<Disposer>> + 'static,
    {
        self.userscripts.push(Userscript {
            func: Rc::new(func),
            matches,
            run_at_complete,
        });
        self
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }
}
