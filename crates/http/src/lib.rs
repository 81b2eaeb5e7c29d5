//! A streaming HTTP/1.1 connection engine built on tokio.
//!
//! This crate drives accepted connections through one request/response cycle
//! at a time: request heads are decoded into `http::Request` values whose
//! bodies stream through a bounded, backpressure-aware channel; handlers run
//! on a bounded blocking worker pool and may answer immediately or through a
//! deferred one-shot reply; responses are written by a state machine that
//! emits the head, the body in one of three delivery modes (absent, a single
//! buffer, or a live stream), and exactly one terminal frame.
//!
//! By default a connection closes after every response. Keep-alive is an
//! explicit opt-in through [`connection::ConnectionConfig`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use http::{Response, StatusCode};
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//!
//! use weir_http::connection::HttpConnection;
//! use weir_http::handler::{Reply, make_handler};
//! use weir_http::handler::invoker::HandlerInvoker;
//! use weir_http::protocol::body::ResponseBody;
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(listener) => listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind failed");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(|_req| {
//!         let response = Response::builder()
//!             .status(StatusCode::OK)
//!             .body(ResponseBody::from("hello\n"))
//!             .unwrap();
//!         Ok(Reply::Ready(response))
//!     }));
//!     let invoker = HandlerInvoker::new(32);
//!
//!     loop {
//!         let (stream, _remote) = match listener.accept().await {
//!             Ok(accepted) => accepted,
//!             Err(e) => {
//!                 warn!(cause = %e, "accept failed");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = handler.clone();
//!         let invoker = invoker.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = stream.into_split();
//!             match HttpConnection::new(reader, writer).process(handler, invoker).await {
//!                 Ok(()) => info!("connection finished"),
//!                 Err(e) => error!(cause = %e, "connection failed"),
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`]: frame vocabulary, request/response heads, the body
//!   channel, and the error taxonomy,
//! - [`codec`]: HTTP/1.1 parsing and serialization as tokio-util codecs,
//! - [`connection`]: the per-connection engine and the response writer,
//! - [`handler`]: the handler contract and the bounded invoker.
//!
//! # Limits
//!
//! - HTTP/1.1 and HTTP/1.0 only; no TLS here (the server crate layers it on
//!   via a secure-channel factory), no pipelining, no upgrades,
//! - at most 64 headers and an 8 KiB head section per request.

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
