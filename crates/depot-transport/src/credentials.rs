//! Channel credential selection.
//!
//! `tls` addresses get TLS credentials built from the configured CA bundle.
//! Every other scheme gets the explicit insecure marker, never an ambient
//! default that could pick up the system trust store.

use crate::address::AddressScheme;
use depot_core::{DepotError, DepotResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone, PartialEq, Eq)]
pub enum ChannelCredentials {
    /// Plaintext channel, chosen explicitly
    Insecure,
    /// TLS verified against the given PEM bundle
    Tls {
        ca_bundle_path: PathBuf,
        ca_pem: Arc<[u8]>,
    },
}

impl ChannelCredentials {
    /// Credentials for a storage reached through `scheme`.
    pub fn for_scheme(scheme: AddressScheme, ca_bundle: Option<&Path>) -> DepotResult<Self> {
        match scheme {
            AddressScheme::Tcp | AddressScheme::Unix => Ok(Self::Insecure),
            AddressScheme::Tls => {
                let path = ca_bundle.ok_or_else(|| {
                    DepotError::configuration("tls storage address requires a configured ca_bundle")
                })?;
                Self::tls_from_bundle(path)
            }
        }
    }

    /// Read a PEM bundle from disk.
    pub fn tls_from_bundle(path: &Path) -> DepotResult<Self> {
        let pem = std::fs::read(path).map_err(|err| {
            DepotError::configuration(format!("cannot read ca_bundle {}: {err}", path.display()))
        })?;
        Ok(Self::Tls {
            ca_bundle_path: path.to_path_buf(),
            ca_pem: Arc::from(pem),
        })
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }
}

impl std::fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insecure => f.write_str("Insecure"),
            Self::Tls {
                ca_bundle_path,
                ca_pem,
            } => f
                .debug_struct("Tls")
                .field("ca_bundle_path", ca_bundle_path)
                .field("ca_pem_len", &ca_pem.len())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plaintext_schemes_use_insecure_marker() {
        for scheme in [AddressScheme::Tcp, AddressScheme::Unix] {
            let creds = ChannelCredentials::for_scheme(scheme, None).unwrap();
            assert_eq!(creds, ChannelCredentials::Insecure);
        }
    }

    #[test]
    fn test_tls_reads_bundle() {
        let mut bundle = tempfile::NamedTempFile::new().unwrap();
        bundle.write_all(b"-----BEGIN CERTIFICATE-----").unwrap();

        let creds = ChannelCredentials::for_scheme(AddressScheme::Tls, Some(bundle.path())).unwrap();
        assert!(creds.is_tls());
        let ChannelCredentials::Tls { ca_pem, .. } = creds else {
            panic!("expected tls credentials");
        };
        assert_eq!(&*ca_pem, b"-----BEGIN CERTIFICATE-----");
    }

    #[test]
    fn test_tls_without_bundle_is_configuration_error() {
        let err = ChannelCredentials::for_scheme(AddressScheme::Tls, None).unwrap_err();
        assert!(err.is_configuration());

        let err = ChannelCredentials::for_scheme(
            AddressScheme::Tls,
            Some(Path::new("/nonexistent/bundle.pem")),
        )
        .unwrap_err();
        assert!(err.is_configuration());
    }
}
