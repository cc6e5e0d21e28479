//! URL match rules deciding where a userscript or userstyle applies.
//!
//! Every supported editor platform has an alias and one URL pattern per
//! scope. A match rule names a platform (optionally narrowed to scopes) or
//! `all`. Patterns are globs; a platform's `root` scope usually covers the
//! whole site while `editor`/`projects` narrow to specific pages.

use globset::{Glob, GlobMatcher};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid URL pattern '{pattern}' for platform '{platform}': {source}")]
    InvalidPattern {
        platform: String,
        pattern: String,
        source: globset::Error,
    },
}

/// Where on a platform's site a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Root,
    Editor,
    Projects,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Root => "root",
            Scope::Editor => "editor",
            Scope::Projects => "projects",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single match rule from a manifest.
///
/// Deserializes from `"all"`, a bare platform alias, or a
/// `{ platform, scopes }` table.
#[derive(Debug, Clone, PartialEq)]
pub enum Match {
    /// Applies on every URL.
    All,
    /// Applies anywhere on the named platform (its `root` scope).
    Platform(String),
    /// Applies on specific scopes of the named platform.
    Scoped { platform: String, scopes: Vec<Scope> },
}

impl<'de> Deserialize<'de> for Match {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Alias(String),
            Scoped {
                platform: String,
                #[serde(default)]
                scopes: Vec<Scope>,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Alias(alias) if alias == "all" => Match::All,
            Raw::Alias(alias) => Match::Platform(alias),
            Raw::Scoped { platform, scopes } => Match::Scoped { platform, scopes },
        })
    }
}

/// Alias -> per-scope URL patterns for every known platform.
#[derive(Debug, Clone, Default)]
pub struct PlatformTable {
    platforms: HashMap<String, HashMap<Scope, GlobMatcher>>,
}

static BUILTIN: Lazy<PlatformTable> = Lazy::new(|| {
    let mut table = PlatformTable::empty();
    let entries: &[(&str, &[(Scope, &str)])] = &[
        ("ccw", &[(Scope::Root, "https://www.ccw.site*")]),
        ("twcn", &[(Scope::Root, "https://editor.turbowarp.cn*")]),
        (
            "gitblock",
            &[
                (Scope::Root, "https://gitblock.cn*"),
                (Scope::Editor, "https://gitblock.cn/Project/*/Editor*"),
                (Scope::Projects, "https://gitblock.cn/Project/*"),
            ],
        ),
        ("xmw", &[(Scope::Root, "https://world.xiaomawang.com*")]),
        ("cocrea", &[(Scope::Root, "https://cocrea.world*")]),
        ("codelab", &[(Scope::Root, "https://create.codelab.club*")]),
        ("sccn", &[(Scope::Root, "https://www.scratch-cn.cn*")]),
        ("40code", &[(Scope::Root, "https://www.40code.com*")]),
        ("tw", &[(Scope::Root, "https://turbowarp.org*")]),
        ("rc", &[(Scope::Root, "https://0832.ink/rc*")]),
        (
            "cc",
            &[
                (Scope::Root, "https://codingclip.com*"),
                (Scope::Editor, "https://codingclip.com/editor/*"),
                (Scope::Projects, "https://codingclip.com/project/*"),
            ],
        ),
        (
            "sc",
            &[
                (Scope::Root, "https://scratch.mit.edu*"),
                (Scope::Editor, "https://scratch.mit.edu/projects/*#editor*"),
                (Scope::Projects, "https://scratch.mit.edu/projects/*"),
            ],
        ),
        (
            "acamp",
            &[
                (Scope::Root, "https://aerfaying.com*"),
                (Scope::Editor, "https://aerfaying.com/Project/*/Editor*"),
                (Scope::Projects, "https://aerfaying.com/Project/*"),
            ],
        ),
        ("xueersi", &[(Scope::Root, "https://code.xueersi.com*")]),
        ("creaticode", &[(Scope::Root, "https://play.creaticode.com*")]),
        ("ada", &[(Scope::Root, "https://www.adacraft.org*")]),
        ("pm", &[(Scope::Root, "https://studio.penguinmod.com*")]),
    ];
    for (alias, patterns) in entries {
        table
            .register(alias, patterns)
            .expect("built-in platform patterns are valid globs");
    }
    table
});

impl PlatformTable {
    /// A table with no platforms. Useful for hosts targeting a single
    /// custom deployment.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The table of known Scratch-family platforms.
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Register (or replace) a platform's scope patterns.
    pub fn register(
        &mut self,
        alias: &str,
        patterns: &[(Scope, &str)],
    ) -> Result<(), MatchError> {
        let mut scopes = HashMap::new();
        for (scope, pattern) in patterns {
            let glob = Glob::new(pattern).map_err(|source| MatchError::InvalidPattern {
                platform: alias.to_string(),
                pattern: (*pattern).to_string(),
                source,
            })?;
            scopes.insert(*scope, glob.compile_matcher());
        }
        self.platforms.insert(alias.to_string(), scopes);
        Ok(())
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.platforms.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Whether any rule in `matches` applies to `url`.
    ///
    /// `All` short-circuits. Unknown platform aliases and scopes are logged
    /// and skipped rather than treated as errors, so a manifest written for
    /// a newer platform list degrades to "does not match here".
    pub fn matches_url(&self, matches: &[Match], url: &str) -> bool {
        if matches.iter().any(|m| matches!(m, Match::All)) {
            return true;
        }

        for rule in matches {
            match rule {
                Match::All => unreachable!("handled above"),
                Match::Platform(alias) => {
                    let Some(scopes) = self.platforms.get(alias) else {
                        warn!("unknown platform alias: {alias}");
                        continue;
                    };
                    if scopes
                        .get(&Scope::Root)
                        .is_some_and(|m| m.is_match(url))
                    {
                        return true;
                    }
                }
                Match::Scoped { platform, scopes } => {
                    let Some(known) = self.platforms.get(platform) else {
                        warn!("unknown platform alias: {platform}");
                        continue;
                    };
                    for scope in scopes {
                        let Some(matcher) = known.get(scope) else {
                            warn!("unknown scope '{scope}' for platform '{platform}'");
                            continue;
                        };
                        if matcher.is_match(url) {
                            return true;
                        }
                    }
                }
            }
        }
        false
    }
}
