//! RPC client seam.
//!
//! The wire protocol lives in an external RPC client. This module defines what
//! the coordination layer needs from it: a factory that builds a lazily
//! connecting channel for a target, unary invocation with metadata and a
//! deadline, and health checks.

use crate::credentials::ChannelCredentials;
use async_trait::async_trait;
use depot_core::{DepotResult, RpcStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Request metadata sent alongside a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

/// Per-call options handed to the RPC client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub metadata: Metadata,
    /// Absolute expiry; `None` means unbounded
    pub deadline: Option<SystemTime>,
}

/// Transport-level tuning applied to every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Interval between keepalive pings
    pub keepalive_time: Duration,
    /// Whether pings may be sent while no call is active
    pub keepalive_permit_without_calls: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            keepalive_time: Duration::from_secs(20),
            keepalive_permit_without_calls: true,
        }
    }
}

/// Everything needed to build a channel for one (service, storage) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub service: String,
    pub storage: String,
    /// `host:port` or `unix:` address the client dials
    pub endpoint: String,
    pub credentials: ChannelCredentials,
    pub options: ChannelOptions,
}

/// Serving state reported by a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Serving,
    NotServing,
    Unknown,
}

/// A channel to one storage node.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Unary call. Deadline enforcement belongs to the implementation.
    async fn invoke(
        &self,
        service: &str,
        rpc: &str,
        request: Vec<u8>,
        options: CallOptions,
    ) -> Result<Vec<u8>, RpcStatus>;

    async fn health_check(&self, options: CallOptions) -> Result<HealthStatus, RpcStatus>;
}

/// Builds channels. Building must not open a socket; channels connect lazily.
pub trait ChannelFactory: Send + Sync {
    fn build(&self, target: &ChannelTarget) -> DepotResult<Arc<dyn RpcChannel>>;
}

/// Hook run on every call before dispatch.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, service: &str, rpc: &str, options: &mut CallOptions)
        -> Result<(), RpcStatus>;
}

/// Emits one `tracing` event per outbound call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

impl Interceptor for TracingInterceptor {
    fn intercept(
        &self,
        service: &str,
        rpc: &str,
        options: &mut CallOptions,
    ) -> Result<(), RpcStatus> {
        debug!(
            service = %service,
            rpc = %rpc,
            correlation_id = options.metadata.get("x-gitlab-correlation-id").unwrap_or(""),
            has_deadline = options.deadline.is_some(),
            "Outbound storage call"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keepalive_tuning() {
        let options = ChannelOptions::default();
        assert_eq!(options.keepalive_time, Duration::from_secs(20));
        assert!(options.keepalive_permit_without_calls);
    }

    #[test]
    fn test_metadata_is_ordered_by_key() {
        let mut metadata = Metadata::new();
        metadata.insert("client_name", "web");
        metadata.insert("authorization", "v2.abc.1");

        let keys: Vec<_> = metadata.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["authorization", "client_name"]);
        assert_eq!(metadata.remove("client_name").as_deref(), Some("web"));
        assert_eq!(metadata.len(), 1);
    }

    #[test]
    fn test_tracing_interceptor_leaves_options_untouched() {
        let mut options = CallOptions::default();
        options.metadata.insert("x-gitlab-correlation-id", "abc");
        let before = options.clone();

        TracingInterceptor
            .intercept("commit_service", "find_commit", &mut options)
            .unwrap();
        assert_eq!(options, before);
    }
}
