//! Filtered subscription generator
//!
//! This module drives a whole run: it reads a subscription body, unwraps
//! Base64 if needed, canonicalizes every line on a bounded worker pool, and
//! writes the accepted links and the rejected lines with their reasons.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::config::{FilterConfig, STDIN_PATH, expand_tilde};
use crate::parser::{Dispatcher, content_lines, prepare_content};
use crate::transform::dedup_links;

/// Characters not allowed in a profile title
static PROFILE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9._-]").expect("profile pattern is valid"));

// ============================================================================
// Filter Report
// ============================================================================

/// A line that was not accepted, with the reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    pub reason: String,
    pub line: String,
}

impl fmt::Display for RejectedLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "# REASON: {}\n{}", self.reason, self.line)
    }
}

/// Outcome of filtering one subscription body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    /// Canonical links, in input order
    pub accepted: Vec<String>,
    /// Rejected original lines, in input order
    pub rejected: Vec<RejectedLine>,
}

impl FilterReport {
    /// Renders the rejected lines, each preceded by its reason comment
    pub fn render_rejected(&self) -> String {
        self.rejected
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Renders the accepted links, optionally under a profile header
///
/// The header is the title line, the update interval line, and a blank line.
pub fn render_output(accepted: &[String], title: Option<&str>, interval_hours: u64) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(accepted.len() + 3);
    if let Some(title) = title {
        lines.push(format!("#profile-title: {}", sanitize_profile_name(title)));
        lines.push(format!("#profile-update-interval: {}", interval_hours.max(1)));
        lines.push(String::new());
    }
    lines.extend(accepted.iter().cloned());
    lines.join("\n")
}

/// Replaces characters outside `[a-zA-Z0-9._-]` with `_`
pub fn sanitize_profile_name(name: &str) -> String {
    PROFILE_NAME_RE.replace_all(name, "_").into_owned()
}

// ============================================================================
// Generator
// ============================================================================

/// Generator that runs the filtering process
pub struct Generator {
    config: FilterConfig,
    dispatcher: Dispatcher,
    pool: ThreadPool,
}

impl Generator {
    /// Create a new generator with the given config and dispatcher
    pub fn new(config: FilterConfig, dispatcher: Dispatcher) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("sub-filter-{i}"))
            .build()
            .context("Failed to build worker pool")?;
        debug!("Worker pool started with {} thread(s)", pool.current_num_threads());
        Ok(Self {
            config,
            dispatcher,
            pool,
        })
    }

    /// Create a generator, loading the rules and banned words the config names
    pub async fn load(config: FilterConfig) -> Result<Self> {
        let rules = config.load_rules().await?;
        let banned = config.load_banned_words().await?;
        info!(
            "Loaded {} protocol rule(s) and {} banned word(s)",
            rules.len(),
            banned.len()
        );
        let dispatcher = Dispatcher::with_builtin(&rules, Arc::new(banned));
        Self::new(config, dispatcher)
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filters a raw subscription body
    pub fn filter_content(&self, content: &[u8]) -> FilterReport {
        let text = prepare_content(content);
        let lines: Vec<&str> = content_lines(&text).collect();
        debug!("Processing {} candidate line(s)", lines.len());

        let results = self
            .pool
            .install(|| self.dispatcher.process_batch(&lines));

        let mut report = FilterReport::default();
        for (line, result) in lines.iter().zip(results) {
            match result {
                Ok(canonical) => report.accepted.push(canonical),
                Err(rejection) => report.rejected.push(RejectedLine {
                    reason: rejection.reason().to_string(),
                    line: (*line).to_string(),
                }),
            }
        }

        if self.config.dedup {
            report.accepted = dedup_links(report.accepted);
        }

        debug!(
            "Filtering complete: {} accepted, {} rejected",
            report.accepted.len(),
            report.rejected.len()
        );
        report
    }

    /// Renders the accepted links with the configured profile header
    pub fn render(&self, report: &FilterReport) -> String {
        render_output(
            &report.accepted,
            self.config.profile_title.as_deref(),
            self.config.update_interval_hours,
        )
    }

    /// Run the filtering process end to end
    ///
    /// Filtering blocks on the worker pool, so this must run on a
    /// multi-threaded runtime.
    pub async fn run(&self) -> Result<FilterReport> {
        let content = read_input(&self.config.input).await?;
        let report = tokio::task::block_in_place(|| self.filter_content(&content));
        info!(
            "{} link(s) accepted, {} line(s) rejected",
            report.accepted.len(),
            report.rejected.len()
        );

        let output = self.render(&report);
        match &self.config.output {
            Some(path) => {
                let path = expand_tilde(path);
                write_file(Path::new(&path), &output).await?;
                info!("Filtered subscription written to {:?}", path);
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stdout
                    .write_all(output.as_bytes())
                    .await
                    .context("Failed to write to stdout")?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        if let Some(path) = &self.config.rejected_output {
            let path = expand_tilde(path);
            let path = Path::new(&path);
            if report.rejected.is_empty() {
                remove_stale(path).await?;
            } else {
                write_file(path, &report.render_rejected()).await?;
                info!("Rejected lines written to {:?}", path);
            }
        }

        Ok(report)
    }
}

// ============================================================================
// File Helpers
// ============================================================================

/// Reads the whole input, from stdin when the path is `-`
pub async fn read_input(path: &str) -> Result<Vec<u8>> {
    if path == STDIN_PATH {
        debug!("Reading subscription from stdin");
        let mut content = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut content)
            .await
            .context("Failed to read subscription from stdin")?;
        return Ok(content);
    }

    let expanded = expand_tilde(path);
    debug!("Reading subscription from {}", expanded);
    tokio::fs::read(&expanded)
        .await
        .with_context(|| format!("Failed to read subscription from {:?}", expanded))
}

/// Writes a file through a temporary sibling, creating parent directories
pub async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create output directory {:?}", parent))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, content)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move output into place at {:?}", path))
}

/// Removes a rejected-lines file left over from an earlier run
async fn remove_stale(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed stale rejected file {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", path)),
    }
}

// ============================================================================
// Tests
// ============================================================================
