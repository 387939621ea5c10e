//! Per-call request metadata.
//!
//! Every call carries a fresh signed token, the client identity and the
//! request's session id. Correlation id, caller identity, call site, forwarded
//! feature flags, cross-node delegation and replica pinning are added when the
//! request provides them.

use crate::auth::authorization_token;
use crate::deadline::{DeadlineCoordinator, DeadlineType};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use depot_core::{ClientConfig, Clock, DepotError, DepotResult, FeatureFlags, RequestContext};
use depot_transport::{AddressResolver, CallOptions, Metadata, ResolvedStorage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const AUTHORIZATION: &str = "authorization";
pub const CLIENT_NAME: &str = "client_name";
pub const CALL_SITE: &str = "call_site";
pub const SERVERS: &str = "gitaly-servers";
pub const CORRELATION_ID: &str = "x-gitlab-correlation-id";
pub const SESSION_ID: &str = "gitaly-session-id";
pub const USERNAME: &str = "username";
pub const USER_ID: &str = "user_id";
pub const REMOTE_IP: &str = "remote_ip";
pub const ROUTING_POLICY: &str = "gitaly-route-repository-accessor-policy";
pub const ROUTING_PRIMARY_ONLY: &str = "primary-only";
pub const DEADLINE_TYPE: &str = "deadline_type";
pub const FEATURE_FLAG_PREFIX: &str = "gitaly-feature-";

/// Address and token of a storage, as sent to another node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub address: String,
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServersMetadataError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode `{storage: {address, token}}` for the `gitaly-servers` key.
pub fn encode_servers_metadata(storage: &ResolvedStorage) -> DepotResult<String> {
    let mut servers = BTreeMap::new();
    servers.insert(
        storage.name.clone(),
        ServerInfo {
            address: storage.address.as_str().to_string(),
            token: storage.token.clone(),
        },
    );
    let json = serde_json::to_vec(&servers)
        .map_err(|err| DepotError::configuration(format!("cannot encode servers: {err}")))?;
    Ok(STANDARD.encode(json))
}

/// Inverse of [`encode_servers_metadata`], as the receiving node reads it.
pub fn decode_servers_metadata(
    value: &str,
) -> Result<BTreeMap<String, ServerInfo>, ServersMetadataError> {
    let json = STANDARD.decode(value)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Metadata key for a forwarded server-side feature flag.
pub fn feature_flag_key(flag: &str) -> String {
    format!("{FEATURE_FLAG_PREFIX}{}", flag.replace('_', "-"))
}

/// Builds the options every outbound call is sent with.
#[derive(Clone)]
pub struct RequestMetadataBuilder {
    config: Arc<ClientConfig>,
    resolver: AddressResolver,
    flags: Arc<dyn FeatureFlags>,
    clock: Arc<dyn Clock>,
    deadlines: DeadlineCoordinator,
}

impl std::fmt::Debug for RequestMetadataBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMetadataBuilder")
            .field("client_name", &self.config.client_name)
            .finish_non_exhaustive()
    }
}

impl RequestMetadataBuilder {
    pub fn new(
        config: Arc<ClientConfig>,
        flags: Arc<dyn FeatureFlags>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver: AddressResolver::new(Arc::clone(&config)),
            deadlines: DeadlineCoordinator::new(Arc::clone(&clock)),
            config,
            flags,
            clock,
        }
    }

    pub fn deadlines(&self) -> &DeadlineCoordinator {
        &self.deadlines
    }

    /// Metadata and deadline for a call to `storage`.
    ///
    /// `remote_storage` names a third node the receiving node should dial on
    /// the caller's behalf; its address and token are embedded in the call.
    pub fn build_metadata(
        &self,
        ctx: &RequestContext,
        storage: &str,
        timeout: Duration,
        remote_storage: Option<&str>,
    ) -> DepotResult<CallOptions> {
        let mut metadata = Metadata::new();

        let token = self.resolver.token(storage)?;
        metadata.insert(
            AUTHORIZATION,
            authorization_token(&token, self.clock.unix_timestamp())?,
        );
        metadata.insert(CLIENT_NAME, self.config.client_name.as_str());

        if let Some(call_site) = ctx.current_call_site() {
            metadata.insert(CALL_SITE, call_site);
        }
        if let Some(correlation_id) = ctx.correlation_id() {
            metadata.insert(CORRELATION_ID, correlation_id);
        }

        let session_id = match ctx.store() {
            Some(store) => store.session_id().to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        metadata.insert(SESSION_ID, session_id);

        let caller = ctx.caller();
        for (key, value) in [
            (USERNAME, &caller.username),
            (USER_ID, &caller.user_id),
            (REMOTE_IP, &caller.remote_ip),
        ] {
            if let Some(value) = value {
                metadata.insert(key, value.as_str());
            }
        }

        for (flag, enabled) in self.flags.server_feature_flags() {
            metadata.insert(feature_flag_key(&flag), enabled.to_string());
        }

        if let Some(remote) = remote_storage {
            let resolved = self.resolver.resolve(remote)?;
            metadata.insert(SERVERS, encode_servers_metadata(&resolved)?);
        }

        if ctx.store().is_some_and(|store| store.is_quarantined()) {
            metadata.insert(ROUTING_POLICY, ROUTING_PRIMARY_ONLY);
        }

        let deadline = self.deadlines.compute_deadline(ctx.kind(), timeout);
        if deadline.kind == Some(DeadlineType::Limited) {
            metadata.insert(DEADLINE_TYPE, DeadlineType::Limited.as_str());
        }

        Ok(CallOptions {
            metadata,
            deadline: deadline.expires_at,
        })
    }
}
