//! Line dispatch
//!
//! Routes each line to the first canonicalizer whose scheme matches it.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::filter::BannedWords;
use crate::policy::RuleSet;

use super::protocols::{
    Hysteria2Canonicalizer, LinkCanonicalizer, LinkPolicy, Rejection, ShadowsocksCanonicalizer,
    TrojanCanonicalizer, VLessCanonicalizer, VMessCanonicalizer, check_length,
};

// ============================================================================
// Dispatcher
// ============================================================================

/// Ordered list of canonicalizers with dynamic dispatch
///
/// Holds no state besides the list, so one dispatcher can be shared across
/// threads.
#[derive(Default, Clone)]
pub struct Dispatcher {
    canonicalizers: Vec<Arc<dyn LinkCanonicalizer>>,
}

impl Dispatcher {
    /// Creates a dispatcher from an explicit canonicalizer list
    pub fn new(canonicalizers: Vec<Arc<dyn LinkCanonicalizer>>) -> Self {
        Self { canonicalizers }
    }

    /// Creates a dispatcher with all built-in canonicalizers
    ///
    /// Each canonicalizer gets the rule for its protocol from `rules`; both
    /// Hysteria2 schemes share the `hysteria2` rule.
    pub fn with_builtin(rules: &RuleSet, banned: Arc<BannedWords>) -> Self {
        let policy = |protocol: &str| LinkPolicy::for_protocol(rules, protocol, banned.clone());
        Self::new(vec![
            Arc::new(VLessCanonicalizer::new(policy("vless"))),
            Arc::new(VMessCanonicalizer::new(policy("vmess"))),
            Arc::new(TrojanCanonicalizer::new(policy("trojan"))),
            Arc::new(ShadowsocksCanonicalizer::new(policy("ss"))),
            Arc::new(Hysteria2Canonicalizer::new(policy("hysteria2"))),
        ])
    }

    /// Appends a canonicalizer, consulted after those already present
    pub fn register(&mut self, canonicalizer: Arc<dyn LinkCanonicalizer>) {
        self.canonicalizers.push(canonicalizer);
    }

    pub fn canonicalizers(&self) -> &[Arc<dyn LinkCanonicalizer>] {
        &self.canonicalizers
    }

    /// Canonicalizes one line
    ///
    /// The length bound is checked before any scheme matching. A line no
    /// canonicalizer claims is rejected as an unsupported protocol.
    pub fn process(&self, line: &str) -> Result<String, Rejection> {
        check_length(line)?;

        let canonicalizer = self
            .canonicalizers
            .iter()
            .find(|c| c.matches(line))
            .ok_or_else(Rejection::unsupported)?;

        let result = canonicalizer.process(line);
        if let Err(rejection) = &result {
            debug!("Rejected {} link: {}", canonicalizer.scheme(), rejection);
        }
        result
    }

    /// Canonicalizes many lines in parallel, keeping input order
    ///
    /// Runs on the current rayon pool; call inside `ThreadPool::install` to
    /// bound the worker count.
    pub fn process_batch(&self, lines: &[&str]) -> Vec<Result<String, Rejection>> {
        debug!("Dispatching {} line(s)", lines.len());
        lines.par_iter().map(|line| self.process(line)).collect()
    }
}
