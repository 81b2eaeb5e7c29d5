//! Server configuration.
//!
//! All recognized options live on [`ServerConfig`], built through
//! [`ServerConfig::builder`]. Validation happens at build time: a server
//! must fail to start on a bad configuration rather than limp along with a
//! partially-valid one.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::tls::TlsSettings;

/// Configuration problems, raised at construction or startup time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid client auth mode: {value}")]
    InvalidClientAuth { value: String },

    #[error("{name} must be greater than zero")]
    ZeroOption { name: &'static str },

    #[error("client auth `{mode}` requires a trust chain")]
    MissingTrust { mode: String },

    #[error("unreadable tls material at {path}: {source}")]
    UnreadableMaterial { path: PathBuf, source: io::Error },

    #[error("malformed certificate material: {reason}")]
    BadCertificate { reason: String },

    #[error("malformed private key material: {reason}")]
    BadPrivateKey { reason: String },

    #[error("no configured cipher is supported: {list:?}")]
    NoCipherOverlap { list: Vec<String> },

    #[error("client certificate verifier: {reason}")]
    ClientVerifier { reason: String },

    #[error("tls setup failed: {source}")]
    Tls {
        #[from]
        source: rustls::Error,
    },

    #[error("runtime setup failed: {source}")]
    Runtime { source: io::Error },

    #[error("a handler must be set")]
    MissingHandler,
}

/// The recognized server options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) host: IpAddr,
    pub(crate) port: u16,
    pub(crate) chunk_size: usize,
    pub(crate) inbuf: usize,
    pub(crate) so_backlog: u32,
    pub(crate) aggregate_length: Option<usize>,
    pub(crate) executor: usize,
    pub(crate) disable_epoll: bool,
    pub(crate) loop_thread_count: Option<usize>,
    pub(crate) keep_alive: bool,
    pub(crate) idle_read_timeout: Option<Duration>,
    pub(crate) tls: Option<TlsSettings>,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            chunk_size: 16 * 1024 * 1024,
            inbuf: 100,
            so_backlog: 1024,
            aggregate_length: None,
            executor: 32,
            disable_epoll: false,
            loop_thread_count: None,
            keep_alive: false,
            idle_read_timeout: None,
            tls: None,
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Bind address. Defaults to the loopback address.
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.host = host;
        self
    }

    /// Listen port. Defaults to 8080.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Largest frame the response codec emits when re-chunking a streamed
    /// body. Defaults to 16 MiB.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    /// Capacity of the request body channel, in chunks. Defaults to 100.
    pub fn inbuf(mut self, inbuf: usize) -> Self {
        self.config.inbuf = inbuf;
        self
    }

    /// Listen backlog. Defaults to 1024.
    pub fn so_backlog(mut self, so_backlog: u32) -> Self {
        self.config.so_backlog = so_backlog;
        self
    }

    /// Reserved for a future aggregation mode; the streaming path ignores it.
    pub fn aggregate_length(mut self, aggregate_length: usize) -> Self {
        self.config.aggregate_length = Some(aggregate_length);
        self
    }

    /// Size of the bounded worker pool executing handlers. Defaults to 32.
    pub fn executor(mut self, executor: usize) -> Self {
        self.config.executor = executor;
        self
    }

    /// Requests the portable I/O backend. The tokio runtime selects its own
    /// backend, so this is accepted and logged, nothing more.
    pub fn disable_epoll(mut self, disable_epoll: bool) -> Self {
        self.config.disable_epoll = disable_epoll;
        self
    }

    /// Number of runtime worker threads. Defaults to the runtime's own
    /// choice (one per core).
    pub fn loop_thread_count(mut self, loop_thread_count: usize) -> Self {
        self.config.loop_thread_count = Some(loop_thread_count);
        self
    }

    /// Serves further requests on the same connection instead of closing it
    /// after every response. Off by default.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Closes connections idle at a request boundary longer than this.
    /// Disabled by default.
    pub fn idle_read_timeout(mut self, idle_read_timeout: Duration) -> Self {
        self.config.idle_read_timeout = Some(idle_read_timeout);
        self
    }

    /// Enables TLS with the given settings.
    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = Some(tls);
        self
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let config = self.config;
        if config.chunk_size == 0 {
            return Err(ConfigError::ZeroOption { name: "chunk_size" });
        }
        if config.inbuf == 0 {
            return Err(ConfigError::ZeroOption { name: "inbuf" });
        }
        if config.executor == 0 {
            return Err(ConfigError::ZeroOption { name: "executor" });
        }
        if let Some(0) = config.loop_thread_count {
            return Err(ConfigError::ZeroOption { name: "loop_thread_count" });
        }
        if let Some(tls) = &config.tls {
            tls.validate()?;
        }
        Ok(config)
    }
}
