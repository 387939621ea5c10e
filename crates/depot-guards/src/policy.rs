//! Enforcement policy.
//!
//! Decides whether the N+1 ceiling raises in the current environment. The
//! guard always counts; the policy only controls whether crossing the ceiling
//! is fatal.

use depot_core::{ClientConfig, Environment, FeatureFlags, ENFORCE_REQUEST_LIMITS_FLAG};
use std::sync::Arc;

pub trait EnforcementPolicy: Send + Sync {
    /// Returns `true` if the ceiling should raise in `environment`.
    fn enabled(&self, environment: Environment) -> bool;
}

/// Default policy: enforce outside production unless explicitly switched.
///
/// - `disable_request_limits` wins over everything
/// - the `gitaly_enforce_requests_limits` flag forces enforcement on, which
///   lets production-like staging environments catch regressions
/// - otherwise production does not enforce
pub struct EnvironmentPolicy {
    disabled: bool,
    flags: Arc<dyn FeatureFlags>,
}

impl EnvironmentPolicy {
    pub fn new(disabled: bool, flags: Arc<dyn FeatureFlags>) -> Self {
        Self { disabled, flags }
    }

    pub fn from_config(config: &ClientConfig, flags: Arc<dyn FeatureFlags>) -> Self {
        Self::new(config.disable_request_limits, flags)
    }
}

impl std::fmt::Debug for EnvironmentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentPolicy")
            .field("disabled", &self.disabled)
            .field("flags", &"<dyn FeatureFlags>")
            .finish()
    }
}

impl EnforcementPolicy for EnvironmentPolicy {
    fn enabled(&self, environment: Environment) -> bool {
        if self.disabled {
            return false;
        }
        if self.flags.enabled(ENFORCE_REQUEST_LIMITS_FLAG) {
            return true;
        }
        !environment.is_production()
    }
}

/// Policy with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub bool);

impl EnforcementPolicy for FixedPolicy {
    fn enabled(&self, _environment: Environment) -> bool {
        self.0
    }
}
