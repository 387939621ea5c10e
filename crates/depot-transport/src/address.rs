//! Storage address resolution
//!
//! Maps a storage name to the address and shared secret configured for it and
//! validates the address scheme. Resolution is pure configuration lookup; no
//! network activity happens here.

use depot_core::{ClientConfig, DepotError, DepotResult};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Address schemes a storage may be reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressScheme {
    Tcp,
    Unix,
    Tls,
}

impl AddressScheme {
    fn parse(scheme: &str) -> Option<Self> {
        match scheme {
            "tcp" => Some(Self::Tcp),
            "unix" => Some(Self::Unix),
            "tls" => Some(Self::Tls),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
            Self::Tls => "tls",
        }
    }
}

impl fmt::Display for AddressScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated storage address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageAddress {
    raw: String,
    scheme: AddressScheme,
    target: String,
}

impl StorageAddress {
    /// Parse `tcp://host:port`, `tls://host:port`, `unix:/path` or `unix:///path`.
    pub fn parse(address: &str) -> DepotResult<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(DepotError::configuration("storage address is blank"));
        }

        let invalid = || DepotError::configuration(format!("invalid storage address {address:?}"));

        let url = Url::parse(trimmed).map_err(|err: url::ParseError| {
            DepotError::configuration(format!("invalid storage address {address:?}: {err}"))
        })?;
        let scheme = AddressScheme::parse(url.scheme()).ok_or_else(invalid)?;

        let target = match scheme {
            AddressScheme::Tcp | AddressScheme::Tls => {
                let host = url
                    .host_str()
                    .filter(|host| !host.is_empty())
                    .ok_or_else(invalid)?;
                let port = url.port().ok_or_else(invalid)?;
                format!("{host}:{port}")
            }
            AddressScheme::Unix => {
                if url.path().trim_start_matches('/').is_empty() {
                    return Err(invalid());
                }
                trimmed.to_string()
            }
        };

        Ok(Self {
            raw: trimmed.to_string(),
            scheme,
            target,
        })
    }

    pub fn scheme(&self) -> AddressScheme {
        self.scheme
    }

    /// What the RPC client dials: `host:port` for network schemes, the full
    /// address for unix sockets.
    pub fn dial_target(&self) -> &str {
        &self.target
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for StorageAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Address and token of one storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStorage {
    pub name: String,
    pub address: StorageAddress,
    pub token: String,
}

/// Resolves storage names against static configuration.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    config: Arc<ClientConfig>,
}

impl AddressResolver {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Resolve `storage` to a validated address and its token.
    pub fn resolve(&self, storage: &str) -> DepotResult<ResolvedStorage> {
        let entry = self
            .config
            .storage(storage)
            .ok_or_else(|| DepotError::storage_not_found(storage))?;

        let address = StorageAddress::parse(&entry.address).map_err(|_| {
            DepotError::configuration(format!(
                "invalid address {:?} for storage {storage:?}",
                entry.address
            ))
        })?;

        Ok(ResolvedStorage {
            name: storage.to_string(),
            address,
            token: self.token(storage)?,
        })
    }

    /// Per-storage token, else the process-wide fallback.
    pub fn token(&self, storage: &str) -> DepotResult<String> {
        let entry = self
            .config
            .storage(storage)
            .ok_or_else(|| DepotError::storage_not_found(storage))?;

        entry
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .or_else(|| self.config.token.as_deref().filter(|token| !token.is_empty()))
            .map(str::to_string)
            .ok_or_else(|| {
                DepotError::configuration(format!("no token configured for storage {storage:?}"))
            })
    }
}
