//! One outbound storage call, end to end.
//!
//! Order of a call:
//! 1. Budget check for the operation name
//! 2. Refuse if the enclosing request deadline has already passed
//! 3. Build metadata and deadline, then apply the caller's mutator
//! 4. Fetch or create the connection and dispatch
//! 5. Record timing and outcome in the request store
//!
//! Transport failures are returned unchanged. Nothing here retries.
//!
//! Calls issued concurrently within one request should each run on their own
//! [`RequestContext::child`] so call-site attribution stays per branch.

use crate::metadata::RequestMetadataBuilder;
use depot_core::{
    CallOutcome, CallRecord, ClientConfig, Clock, DepotError, DepotResult, FeatureFlags,
    RequestContext, SystemClock,
};
use depot_guards::{CallBudgetTracker, EnforcementPolicy, EnvironmentPolicy};
use depot_transport::{CallOptions, ConnectionRegistry, HealthStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Service and operation names used for health checks.
pub const HEALTH_SERVICE: &str = "health";
pub const HEALTH_CHECK_RPC: &str = "check";

/// Per-call parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallParams<'a> {
    /// Storage the receiving node should dial on our behalf
    pub remote_storage: Option<&'a str>,
    /// Zero means no deadline
    pub timeout: Duration,
}

impl<'a> CallParams<'a> {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            remote_storage: None,
            timeout,
        }
    }

    pub fn remote_storage(mut self, storage: &'a str) -> Self {
        self.remote_storage = Some(storage);
        self
    }
}

pub struct CallExecutor {
    config: Arc<ClientConfig>,
    registry: Arc<ConnectionRegistry>,
    flags: Arc<dyn FeatureFlags>,
    budget: CallBudgetTracker,
    metadata: RequestMetadataBuilder,
}

impl std::fmt::Debug for CallExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallExecutor")
            .field("registry", &self.registry)
            .field("budget", &self.budget)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl CallExecutor {
    /// Executor using the system clock and the environment-driven budget policy.
    pub fn new(
        config: Arc<ClientConfig>,
        registry: Arc<ConnectionRegistry>,
        flags: Arc<dyn FeatureFlags>,
    ) -> Self {
        let policy = Arc::new(EnvironmentPolicy::from_config(&config, Arc::clone(&flags)));
        Self {
            budget: CallBudgetTracker::new(config.environment, policy),
            metadata: RequestMetadataBuilder::new(
                Arc::clone(&config),
                Arc::clone(&flags),
                Arc::new(SystemClock),
            ),
            config,
            flags,
            registry,
        }
    }

    /// Replace the clock used for tokens and deadlines.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.metadata =
            RequestMetadataBuilder::new(Arc::clone(&self.config), Arc::clone(&self.flags), clock);
        self
    }

    /// Replace the policy deciding whether the call budget raises.
    pub fn with_policy(mut self, policy: Arc<dyn EnforcementPolicy>) -> Self {
        self.budget = CallBudgetTracker::new(self.config.environment, policy);
        self
    }

    pub fn budget(&self) -> &CallBudgetTracker {
        &self.budget
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn metadata(&self) -> &RequestMetadataBuilder {
        &self.metadata
    }

    pub async fn call(
        &self,
        ctx: &RequestContext,
        storage: &str,
        service: &str,
        rpc: &str,
        request: Vec<u8>,
        params: CallParams<'_>,
    ) -> DepotResult<Vec<u8>> {
        self.call_with(ctx, storage, service, rpc, request, params, |_| {})
            .await
    }

    /// Like [`CallExecutor::call`], with `mutate` applied to the finished
    /// call options right before dispatch.
    #[allow(clippy::too_many_arguments)]
    pub async fn call_with<F>(
        &self,
        ctx: &RequestContext,
        storage: &str,
        service: &str,
        rpc: &str,
        request: Vec<u8>,
        params: CallParams<'_>,
        mutate: F,
    ) -> DepotResult<Vec<u8>>
    where
        F: FnOnce(&mut CallOptions) + Send,
    {
        self.budget.enforce(ctx, rpc)?;
        self.metadata
            .deadlines()
            .ensure_request_deadline_not_exceeded(ctx)?;

        let mut options =
            self.metadata
                .build_metadata(ctx, storage, params.timeout, params.remote_storage)?;
        mutate(&mut options);

        let connection = self.registry.get_stub(service, storage)?;

        let started = Instant::now();
        let result = connection.invoke(rpc, request, options).await;
        let duration = started.elapsed();

        match result {
            Ok(response) => {
                debug!(
                    storage = %storage,
                    service = %service,
                    rpc = %rpc,
                    duration = ?duration,
                    "Storage call completed"
                );
                self.record(ctx, storage, service, rpc, duration, CallOutcome::Ok);
                Ok(response)
            }
            Err(status) => {
                warn!(
                    storage = %storage,
                    service = %service,
                    rpc = %rpc,
                    code = %status.code,
                    "Storage call failed"
                );
                self.record(
                    ctx,
                    storage,
                    service,
                    rpc,
                    duration,
                    CallOutcome::Failed(status.code),
                );
                Err(DepotError::Transport(status))
            }
        }
    }

    /// Ask `storage` whether it is serving, with the fast timeout.
    pub async fn health_check(
        &self,
        ctx: &RequestContext,
        storage: &str,
    ) -> DepotResult<HealthStatus> {
        self.budget.enforce(ctx, HEALTH_CHECK_RPC)?;
        self.metadata
            .deadlines()
            .ensure_request_deadline_not_exceeded(ctx)?;

        let options =
            self.metadata
                .build_metadata(ctx, storage, self.config.fast_timeout(), None)?;
        let connection = self.registry.get_stub(HEALTH_SERVICE, storage)?;

        let status = connection.health_check(options).await?;
        debug!(storage = %storage, status = ?status, "Storage health check");
        Ok(status)
    }

    fn record(
        &self,
        ctx: &RequestContext,
        storage: &str,
        service: &str,
        rpc: &str,
        duration: Duration,
        outcome: CallOutcome,
    ) {
        let Some(store) = ctx.store() else {
            return;
        };
        if outcome == CallOutcome::Ok {
            store.add_query_time(duration);
        }
        if store.call_details_enabled() {
            store.push_call_detail(CallRecord {
                call_site: ctx.current_call_site(),
                storage: storage.to_string(),
                service: service.to_string(),
                rpc: rpc.to_string(),
                duration,
                outcome,
            });
        }
    }
}
