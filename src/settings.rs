//! Engine settings carried by each load session.
//!
//! Settings are explicit values on the [`Graph`](crate::Graph); nothing here
//! is process-global. They can be built in code, read from a JSON file, or
//! taken from `CATALOGUE_GRAPH_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub const ENV_DELETE_BAD_LINKS: &str = "CATALOGUE_GRAPH_DELETE_BAD_LINKS";
pub const ENV_GLOBAL_DUPLICATES: &str = "CATALOGUE_GRAPH_GLOBAL_DUPLICATES";
pub const ENV_SPLIT_EXACTLY: &str = "CATALOGUE_GRAPH_SPLIT_EXACTLY";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Resolution and view-building policy.
pub struct Settings {
    /// Prune links that stay unresolved after the fixed point. Editing
    /// sessions turn this off so a later insert can still satisfy them.
    pub delete_bad_links: bool,
    /// Report duplicate ids against every catalogue in the session, not only
    /// the catalogue's own import set.
    pub global_duplicate_check: bool,
    /// Rewrite `exactly` constraints into `-min`/`-max` pairs before indexing.
    pub split_exactly_constraints: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            delete_bad_links: true,
            global_duplicate_check: false,
            split_exactly_constraints: true,
        }
    }
}

impl Settings {
    /// Settings for interactive editing: keep dangling links pending.
    pub fn editing() -> Self {
        Self {
            delete_bad_links: false,
            ..Self::default()
        }
    }

    /// Read settings from a JSON file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&data)
            .with_context(|| format!("parsing settings {}", path.display()))?;
        Ok(settings)
    }

    /// Defaults overridden by any `CATALOGUE_GRAPH_*` variables that are set.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(flag) = env_flag(ENV_DELETE_BAD_LINKS) {
            settings.delete_bad_links = flag;
        }
        if let Some(flag) = env_flag(ENV_GLOBAL_DUPLICATES) {
            settings.global_duplicate_check = flag;
        }
        if let Some(flag) = env_flag(ENV_SPLIT_EXACTLY) {
            settings.split_exactly_constraints = flag;
        }
        settings
    }
}

/// A variable counts as on when it is non-empty and not `0`.
fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| !v.trim().is_empty() && v.trim() != "0")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn partial_files_keep_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"global_duplicate_check\": true}}").unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert!(settings.global_duplicate_check);
        assert!(settings.delete_bad_links);
        assert!(settings.split_exactly_constraints);
    }

    #[test]
    fn editing_keeps_pending_links() {
        assert!(!Settings::editing().delete_bad_links);
        assert!(Settings::default().delete_bad_links);
    }

    #[test]
    fn load_reports_the_path_on_error() {
        let err = Settings::load(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/settings.json"));
    }
}
