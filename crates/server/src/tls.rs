//! The secure-channel collaborator.
//!
//! TLS itself is delegated to rustls; this module only turns configuration
//! inputs — certificate and key material, a trust chain, a client-auth mode,
//! a cipher list, session-cache sizing — into a ready
//! [`SecureChannelFactory`]. Every failure here is a [`ConfigError`] raised
//! at server startup; a connection never sees a half-built TLS context.
//!
//! Certificate and key inputs are [`Material`] values: either a file path or
//! inline PEM bytes. When the mode is not forced, short inputs (under 256
//! bytes) are read as a path and longer ones as inline data.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerSessionMemoryCache, WebPkiClientVerifier};
use rustls::{RootCertStore, SupportedCipherSuite};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::debug;

use crate::config::ConfigError;

/// Below this length an auto-mode input is interpreted as a file path.
const PATH_HEURISTIC_LIMIT: usize = 256;

/// How a [`Material`] input is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    /// Decide by length: short inputs are paths, long inputs are inline.
    Auto,
    /// Always a file path.
    Path,
    /// Always inline PEM bytes.
    Inline,
}

/// Certificate, key or trust-chain input.
#[derive(Debug, Clone)]
pub struct Material {
    bytes: Vec<u8>,
    kind: MaterialKind,
}

impl Material {
    /// Input disambiguated by the length heuristic.
    pub fn auto(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into(), kind: MaterialKind::Auto }
    }

    /// Input forced to be read as a file path.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self { bytes: path.into().into_os_string().into_encoded_bytes(), kind: MaterialKind::Path }
    }

    /// Input forced to be used as inline PEM bytes.
    pub fn inline(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into(), kind: MaterialKind::Inline }
    }

    /// Resolves the input to PEM bytes, reading the file when it is a path.
    pub(crate) fn resolve(&self) -> Result<Vec<u8>, ConfigError> {
        let as_path = match self.kind {
            MaterialKind::Path => true,
            MaterialKind::Inline => false,
            MaterialKind::Auto => self.bytes.len() < PATH_HEURISTIC_LIMIT,
        };
        if as_path {
            let path = PathBuf::from(String::from_utf8_lossy(&self.bytes).into_owned());
            fs::read(&path).map_err(|source| ConfigError::UnreadableMaterial { path, source })
        } else {
            Ok(self.bytes.clone())
        }
    }
}

/// Client certificate requirements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientAuth {
    /// No client certificate is requested.
    #[default]
    None,
    /// A certificate is requested and verified when presented.
    Optional,
    /// A verified certificate is mandatory.
    Require,
}

impl FromStr for ClientAuth {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "none" => Ok(Self::None),
            "optional" => Ok(Self::Optional),
            "require" => Ok(Self::Require),
            other => Err(ConfigError::InvalidClientAuth { value: other.to_string() }),
        }
    }
}

impl fmt::Display for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Require => "require",
        })
    }
}

/// Inputs of the secure-channel factory.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    cert: Material,
    key: Material,
    trust: Option<Material>,
    client_auth: ClientAuth,
    ciphers: Option<Vec<String>>,
    session_cache_size: usize,
}

impl TlsSettings {
    pub fn new(cert: Material, key: Material) -> Self {
        Self { cert, key, trust: None, client_auth: ClientAuth::None, ciphers: None, session_cache_size: 256 }
    }

    /// Trust chain used to verify client certificates.
    pub fn trust(mut self, trust: Material) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn client_auth(mut self, client_auth: ClientAuth) -> Self {
        self.client_auth = client_auth;
        self
    }

    /// Restricts the cipher suites to the named ones, e.g.
    /// `TLS13_AES_256_GCM_SHA384`.
    pub fn ciphers(mut self, ciphers: Vec<String>) -> Self {
        self.ciphers = Some(ciphers);
        self
    }

    /// Number of TLS sessions cached for resumption.
    pub fn session_cache_size(mut self, session_cache_size: usize) -> Self {
        self.session_cache_size = session_cache_size;
        self
    }

    /// Structural checks that need no file access.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.client_auth != ClientAuth::None && self.trust.is_none() {
            return Err(ConfigError::MissingTrust { mode: self.client_auth.to_string() });
        }
        Ok(())
    }
}

/// Wraps a fully-built TLS acceptor; handed one connection at a time.
#[derive(Clone)]
pub struct SecureChannelFactory {
    acceptor: TlsAcceptor,
}

impl std::fmt::Debug for SecureChannelFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannelFactory").finish_non_exhaustive()
    }
}

impl SecureChannelFactory {
    /// Builds the factory, failing startup on any malformed input.
    pub fn new(settings: &TlsSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        let certs = load_certs(&settings.cert)?;
        let key = load_key(&settings.key)?;
        let provider = Arc::new(select_provider(settings.ciphers.as_deref())?);

        let builder = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;

        let builder = match settings.client_auth {
            ClientAuth::None => builder.with_no_client_auth(),
            mode => {
                // validate() guarantees the trust material is present
                let Some(trust) = &settings.trust else {
                    return Err(ConfigError::MissingTrust { mode: mode.to_string() });
                };
                let mut roots = RootCertStore::empty();
                for cert in load_certs(trust)? {
                    roots.add(cert)?;
                }
                let verifier_builder = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
                let verifier_builder = if mode == ClientAuth::Optional {
                    verifier_builder.allow_unauthenticated()
                } else {
                    verifier_builder
                };
                let verifier = verifier_builder
                    .build()
                    .map_err(|e| ConfigError::ClientVerifier { reason: e.to_string() })?;
                builder.with_client_cert_verifier(verifier)
            }
        };

        let mut config = builder.with_single_cert(certs, key)?;
        config.session_storage = ServerSessionMemoryCache::new(settings.session_cache_size.max(1));

        Ok(Self { acceptor: TlsAcceptor::from(Arc::new(config)) })
    }

    /// Runs the TLS handshake on an accepted connection.
    pub async fn accept(&self, stream: TcpStream) -> std::io::Result<TlsStream<TcpStream>> {
        self.acceptor.accept(stream).await
    }
}

fn load_certs(material: &Material) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let pem = material.resolve()?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| ConfigError::BadCertificate { reason: e.to_string() })?;
    if certs.is_empty() {
        return Err(ConfigError::BadCertificate { reason: "no certificate found in material".to_string() });
    }
    Ok(certs)
}

fn load_key(material: &Material) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let pem = material.resolve()?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| ConfigError::BadPrivateKey { reason: e.to_string() })?
        .ok_or_else(|| ConfigError::BadPrivateKey { reason: "no private key found in material".to_string() })
}

/// Builds a crypto provider, restricted to the named cipher suites when a
/// list is configured.
fn select_provider(ciphers: Option<&[String]>) -> Result<CryptoProvider, ConfigError> {
    let mut provider = rustls::crypto::ring::default_provider();
    if let Some(list) = ciphers {
        provider.cipher_suites.retain(|suite| list.iter().any(|name| name == &suite_name(suite)));
        if provider.cipher_suites.is_empty() {
            return Err(ConfigError::NoCipherOverlap { list: list.to_vec() });
        }
        debug!(suites = provider.cipher_suites.len(), "restricted cipher suites");
    }
    Ok(provider)
}

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_auto_material_is_read_as_a_path() {
        let material = Material::auto(&b"/definitely/not/there.pem"[..]);
        assert!(matches!(material.resolve(), Err(ConfigError::UnreadableMaterial { .. })));
    }

    #[test]
    fn long_auto_material_is_used_inline() {
        let pem = b"-----BEGIN CERTIFICATE-----\n".repeat(20);
        let material = Material::auto(pem.clone());
        assert_eq!(material.resolve().unwrap(), pem);
    }

    #[test]
    fn forced_inline_material_skips_the_heuristic() {
        let material = Material::inline(&b"short"[..]);
        assert_eq!(material.resolve().unwrap(), b"short");
    }

    #[test]
    fn forced_path_material_skips_the_heuristic() {
        let long_path = format!("/nope/{}", "x".repeat(300));
        let material = Material::path(long_path);
        assert!(matches!(material.resolve(), Err(ConfigError::UnreadableMaterial { .. })));
    }

    #[test]
    fn client_auth_parses_the_three_modes() {
        assert_eq!("none".parse::<ClientAuth>().unwrap(), ClientAuth::None);
        assert_eq!("optional".parse::<ClientAuth>().unwrap(), ClientAuth::Optional);
        assert_eq!("require".parse::<ClientAuth>().unwrap(), ClientAuth::Require);
        assert!(matches!(
            "mutual".parse::<ClientAuth>(),
            Err(ConfigError::InvalidClientAuth { value }) if value == "mutual"
        ));
    }

    #[test]
    fn malformed_certificate_material_fails_startup() {
        let garbage = b"not a pem at all ".repeat(32);
        let settings = TlsSettings::new(Material::inline(garbage.clone()), Material::inline(garbage));
        assert!(matches!(
            SecureChannelFactory::new(&settings),
            Err(ConfigError::BadCertificate { .. })
        ));
    }

    #[test]
    fn missing_trust_with_required_client_auth_fails() {
        let pem = b"-----BEGIN CERTIFICATE-----\n".repeat(20);
        let settings = TlsSettings::new(Material::inline(pem.clone()), Material::inline(pem))
            .client_auth(ClientAuth::Require);
        assert!(matches!(settings.validate(), Err(ConfigError::MissingTrust { .. })));
    }

    #[test]
    fn unknown_cipher_list_has_no_overlap() {
        let result = select_provider(Some(&["TLS_MADE_UP_SUITE".to_string()]));
        assert!(matches!(result, Err(ConfigError::NoCipherOverlap { .. })));
    }

    #[test]
    fn named_cipher_restricts_the_provider() {
        let provider = select_provider(Some(&["TLS13_AES_256_GCM_SHA384".to_string()])).unwrap();
        assert_eq!(provider.cipher_suites.len(), 1);
    }
}
