//! Per-request call budget (the N+1 guard).
//!
//! Counts RPC invocations per call site inside one logical request and fails
//! fast once a single site fires more than [`MAXIMUM_CALLS_PER_SITE`] times.
//! The ceiling is per call site rather than global: a request making many
//! different calls is fine, the same call inside a loop over a collection is
//! not.
//!
//! Two counters exist per site:
//! - *actual*: every invocation, for telemetry
//! - *enforced*: invocations outside an exemption scope; this one is compared
//!   against the ceiling
//!
//! Crossing the ceiling is not a latch. Once past it, every further call on the
//! same site in the same request raises again.

use crate::policy::EnforcementPolicy;
use depot_core::{DepotError, DepotResult, Environment, RequestContext};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ceiling for enforced calls to one call site within one logical request.
pub const MAXIMUM_CALLS_PER_SITE: u64 = 30;

/// Enforces the per-call-site ceiling.
pub struct CallBudgetTracker {
    environment: Environment,
    policy: Arc<dyn EnforcementPolicy>,
}

impl std::fmt::Debug for CallBudgetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBudgetTracker")
            .field("environment", &self.environment)
            .field("policy", &"<dyn EnforcementPolicy>")
            .finish()
    }
}

impl CallBudgetTracker {
    pub fn new(environment: Environment, policy: Arc<dyn EnforcementPolicy>) -> Self {
        Self {
            environment,
            policy,
        }
    }

    /// Returns `true` if crossing the ceiling raises in this process.
    pub fn enforcement_enabled(&self) -> bool {
        self.policy.enabled(self.environment)
    }

    /// Account for one invocation of `call_site`.
    ///
    /// A no-op when `ctx` carries no request-scoped store. Fails with
    /// [`DepotError::TooManyInvocations`] once the enforced count passes the
    /// ceiling.
    pub fn enforce(&self, ctx: &RequestContext, call_site: &str) -> DepotResult<()> {
        let Some(store) = ctx.store() else {
            return Ok(());
        };

        let actual = store.increment_actual(call_site);

        if !self.enforcement_enabled() {
            if actual == MAXIMUM_CALLS_PER_SITE + 1 {
                warn!(
                    call_site = %call_site,
                    invocation_count = actual,
                    limit = MAXIMUM_CALLS_PER_SITE,
                    "Call site exceeded request budget (not enforced)"
                );
            }
            return Ok(());
        }

        if store.exemption_depth() > 0 {
            return Ok(());
        }

        let enforced = store.increment_enforced(call_site);
        store.record_stack(ctx.stack_signature());

        if enforced <= MAXIMUM_CALLS_PER_SITE {
            return Ok(());
        }

        let (max_call_count, max_call_stacks) = store.max_call_stacks();
        warn!(
            call_site = %call_site,
            invocation_count = actual,
            enforced_count = enforced,
            request_enforced = store.summary_enforced(),
            max_call_count = max_call_count,
            "Call site exceeded request budget"
        );

        Err(DepotError::TooManyInvocations {
            call_site: call_site.to_string(),
            invocation_count: actual,
            max_call_count,
            max_call_stacks,
        })
    }

    /// Number of calls made so far in this request, across all call sites.
    pub fn request_count(&self, ctx: &RequestContext) -> u64 {
        ctx.store().map_or(0, |store| store.summary_actual())
    }

    /// Number of calls this request made outside exemption scopes while
    /// enforcement was on, across all call sites.
    pub fn enforced_request_count(&self, ctx: &RequestContext) -> u64 {
        ctx.store().map_or(0, |store| store.summary_enforced())
    }

    /// Zero the summary counters for a host that reuses its request store.
    pub fn reset_counts(&self, ctx: &RequestContext) {
        if let Some(store) = ctx.store() {
            debug!(
                previous = store.summary_actual(),
                previous_enforced = store.summary_enforced(),
                "Resetting request call counters"
            );
            store.reset_summary();
        }
    }

    pub fn actual_count(&self, ctx: &RequestContext, call_site: &str) -> u64 {
        ctx.store().map_or(0, |store| store.actual_count(call_site))
    }

    pub fn enforced_count(&self, ctx: &RequestContext, call_site: &str) -> u64 {
        ctx.store().map_or(0, |store| store.enforced_count(call_site))
    }

    /// Highest stack occurrence count and the stacks tied at it.
    pub fn max_call_stacks(&self, ctx: &RequestContext) -> (u64, Vec<String>) {
        ctx.store()
            .map(|store| store.max_call_stacks())
            .unwrap_or_default()
    }
}

/// Run `f` with N+1 enforcement suspended.
///
/// The exemption depth is restored on every exit path, including unwinding.
pub fn allow_n_plus_one<T>(ctx: &RequestContext, f: impl FnOnce() -> T) -> T {
    let _exemption = ctx.store().map(|store| store.enter_exemption());
    f()
}

/// Async form of [`allow_n_plus_one`]; the exemption covers the whole future.
pub async fn allow_n_plus_one_async<F: Future>(ctx: &RequestContext, fut: F) -> F::Output {
    let _exemption = ctx.store().map(|store| store.enter_exemption());
    fut.await
}

/// Run `f` with ref-name caching allowed.
pub fn allow_ref_name_caching<T>(ctx: &RequestContext, f: impl FnOnce() -> T) -> T {
    with_ref_name_caching(ctx, true, f)
}

/// Run `f` with ref-name caching set to `allowed`, restoring the previous value
/// afterwards (not the default), so nested scopes compose.
pub fn with_ref_name_caching<T>(ctx: &RequestContext, allowed: bool, f: impl FnOnce() -> T) -> T {
    let _restore = ctx.store().map(|store| RefNameCachingRestore {
        previous: store.replace_ref_name_caching(allowed),
        ctx,
    });
    f()
}

/// Whether callers may key caches by mutable ref names in this request.
pub fn ref_name_caching_allowed(ctx: &RequestContext) -> bool {
    ctx.store().is_some_and(|store| store.ref_name_caching())
}

struct RefNameCachingRestore<'a> {
    previous: bool,
    ctx: &'a RequestContext,
}

impl Drop for RefNameCachingRestore<'_> {
    fn drop(&mut self) {
        if let Some(store) = self.ctx.store() {
            store.replace_ref_name_caching(self.previous);
        }
    }
}
