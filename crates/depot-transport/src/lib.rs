//! Depot Transport - storage-node connections
//!
//! Address resolution and validation, credential selection, the RPC client
//! seam, and the process-wide registry that memoizes one connection per
//! (service, storage) pair.

#![allow(missing_docs)]

pub mod address;
pub mod channel;
pub mod credentials;
pub mod registry;

pub use address::{AddressResolver, AddressScheme, ResolvedStorage, StorageAddress};
pub use channel::{
    CallOptions, ChannelFactory, ChannelOptions, ChannelTarget, HealthStatus, Interceptor,
    Metadata, RpcChannel, TracingInterceptor,
};
pub use credentials::ChannelCredentials;
pub use registry::{Connection, ConnectionRegistry};
