//! Server bootstrap for the weir HTTP engine.
//!
//! [`weir_http`] drives individual connections; this crate supplies what
//! surrounds them:
//!
//! - [`ServerConfig`]: the recognized options (`host`, `port`, `chunk_size`,
//!   `inbuf`, `so_backlog`, `aggregate_length`, `executor`, `disable_epoll`,
//!   `loop_thread_count`), plus the explicit `keep_alive` and
//!   `idle_read_timeout` switches,
//! - [`TlsSettings`] / [`SecureChannelFactory`]: the secure-channel
//!   collaborator, built on rustls; malformed material fails startup,
//! - [`Server`]: runtime construction, the listener, and the accept loop.
//!
//! # Example
//!
//! ```no_run
//! use http::{Response, StatusCode};
//! use weir_http::handler::{Reply, make_handler};
//! use weir_http::protocol::body::ResponseBody;
//! use weir_server::{Server, ServerConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::builder().port(8080).executor(16).build()?;
//!     let server = Server::builder()
//!         .config(config)
//!         .handler(make_handler(|_req| {
//!             let response = Response::builder()
//!                 .status(StatusCode::OK)
//!                 .body(ResponseBody::from("hello\n"))
//!                 .unwrap();
//!             Ok(Reply::Ready(response))
//!         }))
//!         .build()?;
//!     server.run()?;
//!     Ok(())
//! }
//! ```

mod config;
mod server;
mod tls;

pub use config::{ConfigError, ServerConfig, ServerConfigBuilder};
pub use server::{Server, ServerBuilder};
pub use tls::{ClientAuth, Material, MaterialKind, SecureChannelFactory, TlsSettings};
