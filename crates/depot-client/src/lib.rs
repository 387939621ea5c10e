//! Depot Client - storage-node call orchestration
//!
//! Ties the depot crates together into a single entry point: every outbound
//! call is budget-checked, deadline-checked, signed, labelled with request
//! metadata and timed.
//!
//! ```ignore
//! let executor = CallExecutor::new(config, registry, flags);
//! let ctx = RequestContext::web(Some(request_deadline));
//! let _site = ctx.enter("Projects::TreeController#show");
//! let response = executor
//!     .call(&ctx, "default", "commit_service", "find_commit", request,
//!           CallParams::with_timeout(config.default_timeout()))
//!     .await?;
//! ```

#![allow(missing_docs)]

pub mod auth;
pub mod deadline;
pub mod executor;
pub mod metadata;

pub use auth::{authorization_token, TOKEN_VERSION};
pub use deadline::{Deadline, DeadlineCoordinator, DeadlineType};
pub use executor::{CallExecutor, CallParams, HEALTH_CHECK_RPC, HEALTH_SERVICE};
pub use metadata::{
    decode_servers_metadata, encode_servers_metadata, feature_flag_key, RequestMetadataBuilder,
    ServerInfo, ServersMetadataError,
};

pub use depot_core::{
    CallerIdentity, ClientConfig, DepotError, DepotResult, ExecutionKind, RequestContext,
};
pub use depot_guards::{allow_n_plus_one, allow_ref_name_caching, with_ref_name_caching};
