//! Feature flag collaborator.
//!
//! Flag storage lives outside this layer; the client only asks two things of
//! it: whether a named flag is on, and which flags must be forwarded to the
//! storage nodes with every call.

use std::collections::BTreeMap;

/// Flag that forces N+1 enforcement on even in production.
pub const ENFORCE_REQUEST_LIMITS_FLAG: &str = "gitaly_enforce_requests_limits";

pub trait FeatureFlags: Send + Sync {
    /// Returns `true` if `flag` is enabled for this process.
    fn enabled(&self, flag: &str) -> bool;

    /// Server-side flags to forward, as `(name, enabled)` pairs.
    fn server_feature_flags(&self) -> Vec<(String, bool)>;
}

/// Fixed in-memory flag set.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlags {
    local: BTreeMap<String, bool>,
    server: BTreeMap<String, bool>,
}

impl StaticFeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a flag consulted locally via [`FeatureFlags::enabled`].
    pub fn with_flag(mut self, flag: impl Into<String>, enabled: bool) -> Self {
        self.local.insert(flag.into(), enabled);
        self
    }

    /// Set a flag forwarded to storage nodes.
    pub fn with_server_flag(mut self, flag: impl Into<String>, enabled: bool) -> Self {
        self.server.insert(flag.into(), enabled);
        self
    }
}

impl FeatureFlags for StaticFeatureFlags {
    fn enabled(&self, flag: &str) -> bool {
        self.local.get(flag).copied().unwrap_or(false)
    }

    fn server_feature_flags(&self) -> Vec<(String, bool)> {
        self.server
            .iter()
            .map(|(name, enabled)| (name.clone(), *enabled))
            .collect()
    }
}
