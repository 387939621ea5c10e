//! In-memory RPC channels
//!
//! [`MemoryChannelFactory`] records every channel it builds and every call
//! made on those channels. Responses are scripted per RPC name; unscripted
//! RPCs echo the request back.

use async_trait::async_trait;
use depot_core::{DepotResult, RpcStatus};
use depot_transport::{
    CallOptions, ChannelFactory, ChannelTarget, HealthStatus, RpcChannel,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// One call observed by a [`MemoryChannel`].
#[derive(Debug, Clone)]
pub struct Invocation {
    pub storage: String,
    pub service: String,
    pub rpc: String,
    pub request: Vec<u8>,
    pub options: CallOptions,
}

#[derive(Debug)]
struct MemoryState {
    builds: Vec<ChannelTarget>,
    invocations: Vec<Invocation>,
    responses: HashMap<String, Result<Vec<u8>, RpcStatus>>,
    health: Result<HealthStatus, RpcStatus>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            builds: Vec::new(),
            invocations: Vec::new(),
            responses: HashMap::new(),
            health: Ok(HealthStatus::Serving),
        }
    }
}

/// Channel factory that never touches the network.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannelFactory {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `rpc` with `response` from now on.
    pub fn respond(&self, rpc: &str, response: Vec<u8>) {
        self.state
            .lock()
            .responses
            .insert(rpc.to_string(), Ok(response));
    }

    /// Fail `rpc` with `status` from now on.
    pub fn fail(&self, rpc: &str, status: RpcStatus) {
        self.state
            .lock()
            .responses
            .insert(rpc.to_string(), Err(status));
    }

    pub fn set_health(&self, health: Result<HealthStatus, RpcStatus>) {
        self.state.lock().health = health;
    }

    /// Targets of every channel built so far, in build order.
    pub fn builds(&self) -> Vec<ChannelTarget> {
        self.state.lock().builds.clone()
    }

    pub fn build_count(&self) -> usize {
        self.state.lock().builds.len()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().invocations.clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.state.lock().invocations.len()
    }

    pub fn last_invocation(&self) -> Option<Invocation> {
        self.state.lock().invocations.last().cloned()
    }
}

impl ChannelFactory for MemoryChannelFactory {
    fn build(&self, target: &ChannelTarget) -> DepotResult<Arc<dyn RpcChannel>> {
        self.state.lock().builds.push(target.clone());
        Ok(Arc::new(MemoryChannel {
            storage: target.storage.clone(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Channel handed out by [`MemoryChannelFactory`].
#[derive(Debug)]
pub struct MemoryChannel {
    storage: String,
    state: Arc<Mutex<MemoryState>>,
}

#[async_trait]
impl RpcChannel for MemoryChannel {
    async fn invoke(
        &self,
        service: &str,
        rpc: &str,
        request: Vec<u8>,
        options: CallOptions,
    ) -> Result<Vec<u8>, RpcStatus> {
        let mut state = self.state.lock();
        state.invocations.push(Invocation {
            storage: self.storage.clone(),
            service: service.to_string(),
            rpc: rpc.to_string(),
            request: request.clone(),
            options,
        });
        state
            .responses
            .get(rpc)
            .cloned()
            .unwrap_or(Ok(request))
    }

    async fn health_check(&self, options: CallOptions) -> Result<HealthStatus, RpcStatus> {
        let mut state = self.state.lock();
        state.invocations.push(Invocation {
            storage: self.storage.clone(),
            service: "health".to_string(),
            rpc: "check".to_string(),
            request: Vec::new(),
            options,
        });
        state.health.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_core::StatusCode;
    use depot_transport::{ChannelCredentials, ChannelOptions};

    fn target(storage: &str) -> ChannelTarget {
        ChannelTarget {
            service: "ref_service".to_string(),
            storage: storage.to_string(),
            endpoint: "localhost:8075".to_string(),
            credentials: ChannelCredentials::Insecure,
            options: ChannelOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_unscripted_rpc_echoes() {
        let factory = MemoryChannelFactory::new();
        let channel = factory.build(&target("default")).unwrap();

        let response = channel
            .invoke("ref_service", "find_branch", b"main".to_vec(), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(response, b"main");
        assert_eq!(factory.build_count(), 1);
        assert_eq!(factory.last_invocation().unwrap().storage, "default");
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let factory = MemoryChannelFactory::new();
        factory.fail("find_branch", RpcStatus::new(StatusCode::NotFound, "no branch"));
        let channel = factory.build(&target("default")).unwrap();

        let status = channel
            .invoke("ref_service", "find_branch", Vec::new(), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(status.code, StatusCode::NotFound);
        assert_eq!(factory.invocation_count(), 1);
    }
}
