//! Listener bootstrap and accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use weir_http::connection::{ConnectionConfig, HttpConnection};
use weir_http::handler::Handler;
use weir_http::handler::invoker::HandlerInvoker;

use crate::config::{ConfigError, ServerConfig};
use crate::tls::SecureChannelFactory;

/// A configured server, ready to run.
///
/// Owns its own runtime so `loop_thread_count` can size the reactor thread
/// group; handler work is bounded separately by the `executor` option.
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
}

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<ServerConfig>,
    handler: Option<Arc<dyn Handler>>,
}

impl ServerBuilder {
    /// Server configuration. Defaults apply when not set.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The application handler serving every request.
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn build(self) -> Result<Server, ConfigError> {
        let handler = self.handler.ok_or(ConfigError::MissingHandler)?;
        Ok(Server { config: self.config.unwrap_or_default(), handler })
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Builds the runtime and serves until the process ends.
    ///
    /// Configuration problems — including malformed TLS material — abort
    /// startup here; once the listener is up, failures stay local to their
    /// connection.
    pub fn run(self) -> Result<(), ConfigError> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        if let Some(threads) = self.config.loop_thread_count {
            builder.worker_threads(threads);
        }
        let runtime = builder.build().map_err(|source| ConfigError::Runtime { source })?;
        runtime.block_on(self.serve())
    }

    async fn serve(self) -> Result<(), ConfigError> {
        let subscriber = FmtSubscriber::builder().finish();
        let _ = tracing::subscriber::set_global_default(subscriber);

        if self.config.disable_epoll {
            debug!("disable_epoll set; the runtime selects its own i/o backend");
        }

        // startup failure, never a per-connection one
        let secure_channel = self.config.tls.as_ref().map(SecureChannelFactory::new).transpose()?;

        let addr = SocketAddr::new(self.config.host, self.config.port);
        let listener = bind(addr, self.config.so_backlog)?;
        info!(%addr, tls = secure_channel.is_some(), "listening");

        let invoker = HandlerInvoker::new(self.config.executor);
        let connection_config = ConnectionConfig {
            body_capacity: self.config.inbuf,
            max_chunk: self.config.chunk_size,
            keep_alive: self.config.keep_alive,
            idle_read_timeout: self.config.idle_read_timeout,
        };

        loop {
            let (stream, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };
            debug!(%remote, "accepted connection");

            let handler = Arc::clone(&self.handler);
            let invoker = invoker.clone();
            let connection_config = connection_config.clone();
            let secure_channel = secure_channel.clone();

            tokio::spawn(async move {
                match secure_channel {
                    Some(factory) => match factory.accept(stream).await {
                        Ok(tls_stream) => drive(tls_stream, connection_config, handler, invoker).await,
                        Err(e) => warn!(cause = %e, %remote, "tls handshake failed"),
                    },
                    None => drive(stream, connection_config, handler, invoker).await,
                }
            });
        }
    }
}

fn bind(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ConfigError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|source| ConfigError::Runtime { source })?;
    socket.bind(addr).map_err(|source| ConfigError::Runtime { source })?;
    socket.listen(backlog).map_err(|source| ConfigError::Runtime { source })
}

async fn drive<S>(stream: S, config: ConnectionConfig, handler: Arc<dyn Handler>, invoker: HandlerInvoker)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    match HttpConnection::with_config(reader, writer, config).process(handler, invoker).await {
        Ok(()) => debug!("connection finished"),
        Err(e) => error!(cause = %e, "connection failed"),
    }
}
