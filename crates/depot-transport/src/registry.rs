//! Memoized connection registry
//!
//! Holds at most one [`Connection`] per (service, storage) pair for the life
//! of the process:
//! 1. Read fast path once a pair is populated
//! 2. Creation serialized by a single mutex, re-checking the cache under it
//! 3. `clear_all` empties the cache wholesale; concurrent lookups simply
//!    repopulate it

use crate::address::AddressResolver;
use crate::channel::{
    CallOptions, ChannelFactory, ChannelOptions, ChannelTarget, HealthStatus, Interceptor,
    RpcChannel,
};
use crate::credentials::ChannelCredentials;
use depot_core::{ClientConfig, DepotResult, RpcStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// A channel bound to one (service, storage) pair.
///
/// Shared read-only by every caller for that pair.
pub struct Connection {
    service: String,
    storage: String,
    endpoint: String,
    credentials: ChannelCredentials,
    options: ChannelOptions,
    channel: Arc<dyn RpcChannel>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Connection {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn storage(&self) -> &str {
        &self.storage
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn credentials(&self) -> &ChannelCredentials {
        &self.credentials
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    /// Run the interceptors, then dispatch `rpc` on the channel.
    pub async fn invoke(
        &self,
        rpc: &str,
        request: Vec<u8>,
        mut options: CallOptions,
    ) -> Result<Vec<u8>, RpcStatus> {
        for interceptor in &self.interceptors {
            interceptor.intercept(&self.service, rpc, &mut options)?;
        }
        self.channel
            .invoke(&self.service, rpc, request, options)
            .await
    }

    pub async fn health_check(&self, mut options: CallOptions) -> Result<HealthStatus, RpcStatus> {
        for interceptor in &self.interceptors {
            interceptor.intercept(&self.service, "check", &mut options)?;
        }
        self.channel.health_check(options).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("service", &self.service)
            .field("storage", &self.storage)
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StubKey {
    service: String,
    storage: String,
}

/// Process-wide cache of connections.
pub struct ConnectionRegistry {
    resolver: AddressResolver,
    factory: Arc<dyn ChannelFactory>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    options: ChannelOptions,
    stubs: RwLock<HashMap<StubKey, Arc<Connection>>>,
    creation: Mutex<()>,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("options", &self.options)
            .field("interceptors", &self.interceptors.len())
            .field("stubs", &self.stubs.read().len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new(config: Arc<ClientConfig>, factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            resolver: AddressResolver::new(config),
            factory,
            interceptors: Vec::new(),
            options: ChannelOptions::default(),
            stubs: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }

    /// Attach an interceptor to every connection created from now on.
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn resolver(&self) -> &AddressResolver {
        &self.resolver
    }

    /// Connection for `(service, storage)`, created on first use.
    pub fn get_stub(&self, service: &str, storage: &str) -> DepotResult<Arc<Connection>> {
        let key = StubKey {
            service: service.to_string(),
            storage: storage.to_string(),
        };

        if let Some(stub) = self.stubs.read().get(&key) {
            return Ok(Arc::clone(stub));
        }

        let _creating = self.creation.lock();
        if let Some(stub) = self.stubs.read().get(&key) {
            return Ok(Arc::clone(stub));
        }

        let stub = Arc::new(self.build_connection(service, storage)?);
        self.stubs.write().insert(key, Arc::clone(&stub));

        info!(
            service = %service,
            storage = %storage,
            endpoint = %stub.endpoint,
            tls = stub.credentials.is_tls(),
            "Created storage connection"
        );

        Ok(stub)
    }

    fn build_connection(&self, service: &str, storage: &str) -> DepotResult<Connection> {
        let resolved = self.resolver.resolve(storage)?;
        let credentials = ChannelCredentials::for_scheme(
            resolved.address.scheme(),
            self.resolver.config().ca_bundle.as_deref(),
        )?;

        let target = ChannelTarget {
            service: service.to_string(),
            storage: storage.to_string(),
            endpoint: resolved.address.dial_target().to_string(),
            credentials,
            options: self.options,
        };
        let channel = self.factory.build(&target)?;

        Ok(Connection {
            service: target.service,
            storage: target.storage,
            endpoint: target.endpoint,
            credentials: target.credentials,
            options: target.options,
            channel,
            interceptors: self.interceptors.clone(),
        })
    }

    /// Drop every cached connection.
    pub fn clear_all(&self) {
        let _creating = self.creation.lock();
        let mut stubs = self.stubs.write();
        let cleared = stubs.len();
        stubs.clear();
        info!(cleared = cleared, "Cleared storage connection registry");
    }

    pub fn len(&self) -> usize {
        self.stubs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use depot_core::StorageConfig;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    struct NullChannel;

    #[async_trait]
    impl RpcChannel for NullChannel {
        async fn invoke(
            &self,
            _service: &str,
            _rpc: &str,
            request: Vec<u8>,
            _options: CallOptions,
        ) -> Result<Vec<u8>, RpcStatus> {
            Ok(request)
        }

        async fn health_check(&self, _options: CallOptions) -> Result<HealthStatus, RpcStatus> {
            Ok(HealthStatus::Serving)
        }
    }

    #[derive(Default)]
    struct CountingFactory {
        builds: AtomicUsize,
    }

    impl ChannelFactory for CountingFactory {
        fn build(&self, _target: &ChannelTarget) -> DepotResult<Arc<dyn RpcChannel>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullChannel))
        }
    }

    fn registry_with(config: ClientConfig) -> (ConnectionRegistry, Arc<CountingFactory>) {
        let factory = Arc::new(CountingFactory::default());
        let registry = ConnectionRegistry::new(Arc::new(config), factory.clone());
        (registry, factory)
    }

    fn config() -> ClientConfig {
        ClientConfig::default()
            .with_token("secret")
            .with_storage(StorageConfig::new("default", "tcp://gitaly1:8075"))
            .with_storage(StorageConfig::new("socket", "unix:/tmp/gitaly.socket"))
    }

    #[test]
    fn test_same_pair_returns_cached_instance() {
        let (registry, factory) = registry_with(config());

        let first = registry.get_stub("commit_service", "default").unwrap();
        let second = registry.get_stub("commit_service", "default").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_services_get_distinct_connections() {
        let (registry, factory) = registry_with(config());

        let commit = registry.get_stub("commit_service", "default").unwrap();
        let refs = registry.get_stub("ref_service", "default").unwrap();

        assert!(!Arc::ptr_eq(&commit, &refs));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_storage_never_builds_a_channel() {
        let (registry, factory) = registry_with(config());

        let err = registry.get_stub("commit_service", "missing").unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_credentials_follow_scheme() {
        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle.write_all(b"pem").unwrap();
        let mut config =
            config().with_storage(StorageConfig::new("secure", "tls://gitaly2:9999"));
        config.ca_bundle = Some(bundle.path().to_path_buf());
        let (registry, _factory) = registry_with(config);

        for _ in 0..2 {
            let tls = registry.get_stub("commit_service", "secure").unwrap();
            assert!(tls.credentials().is_tls());
            assert_eq!(tls.endpoint(), "gitaly2:9999");

            let tcp = registry.get_stub("commit_service", "default").unwrap();
            assert_eq!(tcp.credentials(), &ChannelCredentials::Insecure);

            let unix = registry.get_stub("commit_service", "socket").unwrap();
            assert_eq!(unix.credentials(), &ChannelCredentials::Insecure);
        }
    }

    #[test]
    fn test_keepalive_tuning_applied() {
        let (registry, _factory) = registry_with(config());
        let stub = registry.get_stub("commit_service", "default").unwrap();
        assert_eq!(stub.options(), &ChannelOptions::default());
    }

    #[test]
    fn test_concurrent_get_stub_builds_once() {
        const THREADS: usize = 16;
        let (registry, factory) = registry_with(config());
        let registry = Arc::new(registry);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_stub("commit_service", "default").unwrap()
                })
            })
            .collect();

        let stubs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
        assert!(stubs.iter().all(|stub| Arc::ptr_eq(stub, &stubs[0])));
    }

    #[test]
    fn test_clear_all_during_lookups_repopulates() {
        let (registry, _factory) = registry_with(config());
        let registry = Arc::new(registry);

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        registry.get_stub("commit_service", "default").unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..50 {
            registry.clear_all();
        }
        for reader in readers {
            reader.join().unwrap();
        }

        registry.get_stub("commit_service", "default").unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_interceptors_run_before_dispatch() {
        struct Reject;
        impl Interceptor for Reject {
            fn intercept(
                &self,
                _service: &str,
                _rpc: &str,
                _options: &mut CallOptions,
            ) -> Result<(), RpcStatus> {
                Err(RpcStatus::unavailable("rejected by interceptor"))
            }
        }

        let (registry, _factory) = registry_with(config());
        let registry = registry.with_interceptor(Arc::new(Reject));
        let stub = registry.get_stub("commit_service", "default").unwrap();

        let err = stub
            .invoke("find_commit", Vec::new(), CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.message, "rejected by interceptor");
    }
}
