//! Depot Testing Infrastructure
//!
//! In-memory stand-ins for the RPC client and small fixtures shared by the
//! depot crates' tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]
//!
//! ```rust,ignore
//! let factory = Arc::new(MemoryChannelFactory::new());
//! factory.respond("find_commit", b"commit".to_vec());
//! let registry = Arc::new(ConnectionRegistry::new(config.clone(), factory.clone()));
//! ```

pub mod fixtures;
pub mod transport;

pub use fixtures::*;
pub use transport::*;
