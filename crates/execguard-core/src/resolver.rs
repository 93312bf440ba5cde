//! Whitelist pattern resolution.
//!
//! Policy patterns look like `%ProgramFiles%\Games\*` or `$HOME/tools/*`.
//! Resolution expands placeholders, drops everything from the first wildcard
//! segment onward and keeps only directories that exist right now. Patterns
//! that cannot be resolved are dropped silently: policies routinely name
//! software that is not installed yet.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

fn percent_var_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"%([^%/\\]+)%").expect("static regex"))
}

pub struct PathResolver {
    env: EnvLookup,
}

impl PathResolver {
    /// Resolver reading the process environment.
    pub fn new() -> Self {
        Self::with_env(|name| std::env::var(name).ok())
    }

    /// Resolver with an injected variable lookup.
    pub fn with_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        Self {
            env: Box::new(lookup),
        }
    }

    /// Expand `%VAR%`, `$VAR`, `${VAR}` and a leading `~`.
    /// Returns `None` when a `%VAR%` is undefined. A `$` token naming an
    /// undefined variable is kept literally, so directories such as
    /// `C:\$Recycle.Bin` still resolve.
    pub fn expand(&self, pattern: &str) -> Option<String> {
        let mut missing = false;
        let percent_expanded = percent_var_regex().replace_all(pattern, |caps: &regex::Captures| {
            match (self.env)(&caps[1]) {
                Some(value) => value,
                None => {
                    missing = true;
                    String::new()
                }
            }
        });
        if missing {
            return None;
        }

        let home = || (self.env)("HOME").or_else(|| (self.env)("USERPROFILE"));
        let expanded =
            shellexpand::full_with_context_no_errors(&*percent_expanded, home, |name: &str| {
                (self.env)(name)
            });
        Some(expanded.into_owned())
    }

    /// Resolve raw patterns into the deduplicated set of existing directories.
    pub fn resolve<S: AsRef<str>>(&self, patterns: &[S]) -> Vec<PathBuf> {
        let mut dirs = BTreeSet::new();
        for raw in patterns {
            let raw = raw.as_ref().trim().trim_matches('"');
            if raw.is_empty() {
                continue;
            }
            let Some(expanded) = self.expand(raw) else {
                debug!(pattern = raw, "dropping pattern with undefined variable");
                continue;
            };
            let base = normalize(&strip_wildcard(&expanded));
            if base.as_os_str().is_empty() || !base.is_dir() {
                debug!(pattern = raw, base = %base.display(), "dropping non-existent whitelist path");
                continue;
            }
            dirs.insert(base);
        }
        dirs.into_iter().collect()
    }
}

impl Default for PathResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Cut the pattern at the separator preceding its first wildcard segment.
pub fn strip_wildcard(pattern: &str) -> String {
    let Some(wild) = pattern.find(['*', '?']) else {
        return pattern.to_string();
    };
    match pattern[..wild].rfind(is_separator) {
        Some(sep) => pattern[..=sep].to_string(),
        None => String::new(),
    }
}

/// Collapse duplicate and trailing separators so equal directories compare equal.
fn normalize(path: &str) -> PathBuf {
    Path::new(path).components().collect()
}
