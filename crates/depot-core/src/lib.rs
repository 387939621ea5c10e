//! Depot Core - shared vocabulary for the storage-node client
//!
//! Errors, configuration, the per-logical-request context and the collaborator
//! traits (clock, feature flags) that the other depot crates build on.

#![forbid(unsafe_code)]
#![allow(missing_docs)]

/// Client configuration loaded at process start
pub mod config;

/// Per-logical-request context and request-scoped store
pub mod context;

/// Unified error handling
pub mod errors;

/// Feature flag collaborator
pub mod flags;

/// Wall-clock access
pub mod time;

pub use config::{ClientConfig, Environment, StorageConfig, TimeoutConfig};
pub use context::{
    CallOutcome, CallRecord, CallerIdentity, ExecutionKind, FrameGuard, RequestContext,
    RequestStore, INTERNAL_FRAME_PREFIX,
};
pub use errors::{DepotError, DepotResult, RpcStatus, StatusCode};
pub use flags::{FeatureFlags, StaticFeatureFlags, ENFORCE_REQUEST_LIMITS_FLAG};
pub use time::{Clock, ManualClock, SystemClock};
