//! Configuration and logging fixtures

use depot_core::{ClientConfig, Environment, StorageConfig};
use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Unix time every fixture clock starts at.
pub const TEST_EPOCH_SECS: u64 = 1_700_000_000;

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per process. Honours `RUST_LOG`.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Config with two plaintext storages and a fallback token, in the test
/// environment so the call budget raises.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default()
        .with_token("fallback-secret")
        .with_storage(StorageConfig::new("default", "tcp://gitaly-1.internal:8075"))
        .with_storage(
            StorageConfig::new("replica", "unix:/var/run/gitaly/gitaly.socket")
                .with_token("replica-secret"),
        );
    config.environment = Environment::Test;
    config
}
