//! Filter configuration
//!
//! The run is described by a TOML file. Every field has a default, so an empty
//! file (or no file at all) filters stdin to stdout with no rules and no
//! banned words.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::filter::BannedWords;
use crate::policy::RuleSet;

/// Input path that selects standard input
pub const STDIN_PATH: &str = "-";

// ============================================================================
// Filter Config Types
// ============================================================================

/// Filter configuration parsed from TOML file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FilterConfig {
    /// Subscription file to filter, `-` for stdin
    pub input: String,

    /// Output file path; accepted links go to stdout when unset
    pub output: Option<String>,

    /// File receiving rejected lines with their reasons
    pub rejected_output: Option<String>,

    /// Per-protocol policy rules (YAML, JSON or TOML)
    pub rules: Option<String>,

    /// Newline-delimited banned words
    pub banned_words: Option<String>,

    /// Profile title written in the output header; no header when unset
    pub profile_title: Option<String>,

    /// Suggested client refresh interval in hours, at least 1
    pub update_interval_hours: u64,

    /// Collapse links that point at the same server
    pub dedup: bool,

    /// Worker threads for line processing, 0 for one per CPU
    pub workers: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            input: STDIN_PATH.to_string(),
            output: None,
            rejected_output: None,
            rules: None,
            banned_words: None,
            profile_title: None,
            update_interval_hours: 1,
            dedup: false,
            workers: 0,
        }
    }
}

// ============================================================================
// Filter Config Implementation
// ============================================================================

impl FilterConfig {
    /// Parse filter config from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: FilterConfig =
            toml::from_str(content).context("Failed to parse filter config TOML")?;

        if config.update_interval_hours == 0 {
            warn!("update_interval_hours must be at least 1, using 1");
            config.update_interval_hours = 1;
        }

        Ok(config)
    }

    /// Load filter config from file path
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read filter config from {:?}", path))?;
        Self::from_toml(&content)
    }

    /// Load filter config from a path, expanding `~`
    pub async fn load(path: &str) -> Result<Self> {
        let expanded = expand_tilde(path);
        debug!("Loading filter config from {}", expanded);
        Self::from_file(Path::new(&expanded)).await
    }

    /// Loads the configured rule set, or an empty one
    pub async fn load_rules(&self) -> Result<RuleSet> {
        match &self.rules {
            Some(path) => RuleSet::load(Path::new(&expand_tilde(path))).await,
            None => {
                debug!("No rules file configured, every protocol passes");
                Ok(RuleSet::new())
            }
        }
    }

    /// Loads the configured banned words, or an empty list
    ///
    /// A configured file that cannot be read is an error.
    pub async fn load_banned_words(&self) -> Result<BannedWords> {
        match &self.banned_words {
            Some(path) => BannedWords::load(Path::new(&expand_tilde(path))).await,
            None => Ok(BannedWords::new()),
        }
    }
}

// ============================================================================
// Path Utilities
// ============================================================================

/// Expand ~ to home directory in path
pub fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = dirs_home()
    {
        return path.replacen("~", &home, 1);
    }
    path.to_string()
}

/// Get home directory path
pub fn dirs_home() -> Option<String> {
    #[cfg(windows)]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(windows))]
    {
        std::env::var("HOME").ok()
    }
}
