//! The per-connection engine.
//!
//! [`HttpConnection`] owns one transport connection and turns its decoded
//! frames into at most one in-flight request/response pair at a time:
//!
//! 1. a head frame builds the request and opens a bounded body channel when a
//!    body is announced; the request is handed to the invoker immediately,
//!    while the body is still arriving,
//! 2. content frames are pumped into the body channel under the channel's
//!    backpressure (a full channel suspends the pump, which stops transport
//!    reads until the consumer catches up),
//! 3. the reply is written by the response-writing state machine, and the
//!    connection closes — unless keep-alive is enabled, in which case the
//!    remaining request body is drained off the wire first and the loop
//!    continues with the next head.
//!
//! The connection task never blocks: handler execution happens on the worker
//! pool, and every transport interaction here is awaited. All per-connection
//! state lives in explicit fields owned by this task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{FutureExt, SinkExt, StreamExt};
use http::{Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::handler::invoker::{HandlerInvoker, Invocation};
use crate::protocol::body::{BodySender, RequestBody, ResponseBody, channel};
use crate::protocol::{
    BodySize, HandlerError, HttpError, Message, PayloadItem, ProtocolError, RequestHead, TransportError,
};

use super::expect::continue_pair;
use super::writer::ResponseWriter;

const CONTINUE_LINE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Read buffer handed to the framed decoder.
const READ_BUF_SIZE: usize = 8 * 1024;

/// Lifecycle of a connection. Owned exclusively by the connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Between requests, waiting for a head frame.
    Idle,
    /// A head arrived; the request object is being assembled.
    RequestBuilding,
    /// The handler owns the request; body frames may still be arriving.
    AwaitingResponse,
    /// The response writer is draining the reply.
    Writing,
    Closed,
}

/// Per-connection tuning, derived from the server configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Capacity of the request body channel, in chunks.
    pub body_capacity: usize,
    /// Largest frame the response codec will emit when re-chunking.
    pub max_chunk: usize,
    /// Whether to serve further requests on the same connection. Off by
    /// default: each request/response cycle owns its connection.
    pub keep_alive: bool,
    /// Closes connections that sit idle at a request boundary longer than
    /// this. `None` disables the limit.
    pub idle_read_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { body_capacity: 100, max_chunk: 16 * 1024 * 1024, keep_alive: false, idle_read_timeout: None }
    }
}

/// One accepted transport connection being driven through its lifecycle.
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    state: ConnectionState,
    config: ConnectionConfig,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, ConnectionConfig::default())
    }

    pub fn with_config(reader: R, writer: W, config: ConnectionConfig) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), READ_BUF_SIZE),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new(config.max_chunk)),
            state: ConnectionState::Idle,
            config,
        }
    }

    /// Drives the connection until it closes.
    ///
    /// Every exit path leaves the body channel closed and the state machine
    /// in [`ConnectionState::Closed`]; errors are fatal to this connection
    /// only.
    pub async fn process<H>(mut self, handler: Arc<H>, invoker: HandlerInvoker) -> Result<(), HttpError>
    where
        H: Handler + ?Sized + 'static,
    {
        loop {
            self.state = ConnectionState::Idle;

            let next = if let Some(limit) = self.config.idle_read_timeout {
                match tokio::time::timeout(limit, self.framed_read.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        info!(limit = ?limit, "connection idle past the read timeout, closing");
                        let _ = self.shutdown().await;
                        return Err(TransportError::idle_timeout(limit).into());
                    }
                }
            } else {
                self.framed_read.next().await
            };

            match next {
                Some(Ok(Message::Head((head, size)))) => {
                    let reusable = self.run_cycle(head, size, &handler, &invoker).await?;
                    if !(self.config.keep_alive && reusable) {
                        return self.shutdown().await;
                    }
                }

                Some(Ok(Message::Payload(_))) => {
                    error!("received body content while no request is open");
                    self.answer_error(StatusCode::BAD_REQUEST).await;
                    self.state = ConnectionState::Closed;
                    return Err(ProtocolError::unexpected_frame("payload", "idle").into());
                }

                Some(Err(e)) => {
                    error!(cause = %e, "failed to decode the next request");
                    self.answer_error(StatusCode::BAD_REQUEST).await;
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }

                None => {
                    debug!("peer closed the connection");
                    self.state = ConnectionState::Closed;
                    return Ok(());
                }
            }
        }
    }

    /// Serves one request/response pair. Returns whether the connection is
    /// clean enough to be reused.
    async fn run_cycle<H>(
        &mut self,
        head: RequestHead,
        size: BodySize,
        handler: &Arc<H>,
        invoker: &HandlerInvoker,
    ) -> Result<bool, HttpError>
    where
        H: Handler + ?Sized + 'static,
    {
        self.state = ConnectionState::RequestBuilding;

        let expects_continue = head.expects_continue();
        let (continue_token, mut continue_rx) = continue_pair();
        let mut continue_armed = expects_continue;

        let (body_sender, request_body) = if size.is_empty() {
            (None, RequestBody::empty())
        } else {
            let (sender, receiver) = channel(self.config.body_capacity);
            (Some(sender), RequestBody::stream(receiver))
        };

        let mut request = head.body(request_body);
        if expects_continue {
            request.extensions_mut().insert(continue_token);
        }

        // hand over right away: the body may still be arriving
        let mut invocation_rx = invoker.dispatch(Arc::clone(handler), request);
        self.state = ConnectionState::AwaitingResponse;

        let mut pump = BodyPump::new(&mut self.framed_read, body_sender);
        let body_started = pump.started_flag();

        let invocation = {
            let streamed = pump.run().fuse();
            tokio::pin!(streamed);
            loop {
                select! {
                    biased;

                    invocation = &mut invocation_rx => {
                        break invocation.unwrap_or_else(|_| Invocation::Failed(HandlerError::ReplyDropped));
                    }

                    granted = continue_rx.recv(), if continue_armed => {
                        // one-shot either way: a token drop yields `None`
                        continue_armed = false;
                        if granted.is_some() && !body_started.load(Ordering::Acquire) {
                            debug!("writing interim continue response");
                            let transport = self.framed_write.get_mut();
                            transport.write_all(CONTINUE_LINE).await.map_err(TransportError::from)?;
                            transport.flush().await.map_err(TransportError::from)?;
                        }
                    }

                    streamed = &mut streamed => {
                        if let Err(e) = streamed {
                            // the channel is torn down by the pump; a consumer
                            // blocked on it is already released
                            self.state = ConnectionState::Closed;
                            return Err(e);
                        }
                    }
                }
            }
        };

        let reusable = if self.config.keep_alive {
            // the wire must be clean before the next head can be decoded
            pump.discard_rest().await
        } else {
            true
        };
        drop(pump);

        self.state = ConnectionState::Writing;
        match invocation {
            Invocation::Complete(response) => {
                self.write_response(response).await?;
                Ok(reusable)
            }
            Invocation::Recovered(response) => {
                // an error reply went out; do not reuse the connection
                self.write_response(response).await?;
                Ok(false)
            }
            Invocation::Failed(failure) => {
                self.answer_error(StatusCode::INTERNAL_SERVER_ERROR).await;
                self.state = ConnectionState::Closed;
                Err(failure.into())
            }
        }
    }

    async fn write_response(&mut self, response: Response<ResponseBody>) -> Result<(), HttpError> {
        ResponseWriter::new(&mut self.framed_write).write(response).await
    }

    /// Best-effort error reply; the connection is closing anyway.
    async fn answer_error(&mut self, status: StatusCode) {
        let response = error_response(status);
        if let Err(e) = self.write_response(response).await {
            warn!(cause = %e, "failed to write the error response");
        }
        let _ = self.framed_write.get_mut().shutdown().await;
    }

    async fn shutdown(&mut self) -> Result<(), HttpError> {
        self.state = ConnectionState::Closed;
        self.framed_write.flush().await?;
        self.framed_write.get_mut().shutdown().await.map_err(TransportError::from)?;
        Ok(())
    }
}

fn error_response(status: StatusCode) -> Response<ResponseBody> {
    Response::builder().status(status).body(ResponseBody::Empty).expect("static response parts are valid")
}

/// Streams decoded content frames into the request body channel.
///
/// Runs concurrently with the handler: the handler may block on the body
/// while later chunks are still on the wire, and it may answer without ever
/// reading the body, in which case the leftovers are discarded.
struct BodyPump<'conn, R> {
    framed: &'conn mut FramedRead<R, RequestDecoder>,
    sender: Option<BodySender>,
    started: Arc<AtomicBool>,
    eof: bool,
}

impl<'conn, R> BodyPump<'conn, R>
where
    R: AsyncRead + Unpin,
{
    fn new(framed: &'conn mut FramedRead<R, RequestDecoder>, sender: Option<BodySender>) -> Self {
        let eof = sender.is_none();
        Self { framed, sender, started: Arc::new(AtomicBool::new(false)), eof }
    }

    fn started_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }

    /// Forwards content frames until end-of-body.
    ///
    /// A full channel suspends this future inside `push`, which stops the
    /// transport from being polled: that suspension is the read-pause side of
    /// the backpressure contract, and a consumer take resumes it.
    async fn run(&mut self) -> Result<(), HttpError> {
        while !self.eof {
            match self.framed.next().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => {
                    self.started.store(true, Ordering::Release);
                    if let Some(sender) = &mut self.sender {
                        if sender.push(bytes).await.is_err() {
                            // consumer tore the channel down; keep the wire
                            // moving but stop forwarding
                            self.sender = None;
                        }
                    }
                }

                Some(Ok(Message::Payload(PayloadItem::Eof))) => {
                    self.eof = true;
                    if let Some(mut sender) = self.sender.take() {
                        sender.close();
                    }
                }

                Some(Ok(Message::Head(_))) => {
                    self.abort();
                    return Err(ProtocolError::unexpected_frame("head", "awaiting response").into());
                }

                Some(Err(e)) => {
                    self.abort();
                    return Err(e);
                }

                None => {
                    self.abort();
                    return Err(TransportError::PeerClosed.into());
                }
            }
        }
        Ok(())
    }

    /// Force-closes the body channel so a blocked consumer is released.
    fn abort(&mut self) {
        self.eof = true;
        self.sender.take();
    }

    /// Reads the remaining body frames off the wire without forwarding them.
    /// Returns whether the wire is positioned at the next request head.
    async fn discard_rest(&mut self) -> bool {
        self.sender.take();
        let mut skipped: usize = 0;
        while !self.eof {
            match self.framed.next().await {
                Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => skipped += bytes.len(),
                Some(Ok(Message::Payload(PayloadItem::Eof))) => self.eof = true,
                _ => return false,
            }
        }
        if skipped > 0 {
            info!(skipped, "discarded unread request body");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ContinueToken;
    use crate::handler::{BoxError, Reply, make_handler};
    use crate::protocol::body::RequestBody;
    use bytes::Bytes;
    use http::Request;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, duplex};

    fn text_response(status: StatusCode, body: impl Into<ResponseBody>) -> Result<Reply, BoxError> {
        Ok(Reply::Ready(Response::builder().status(status).body(body.into()).unwrap()))
    }

    /// Runs one client/server exchange over an in-memory duplex transport and
    /// returns the raw bytes the client observed plus the engine's outcome.
    async fn exchange<H>(
        config: ConnectionConfig,
        handler: Arc<H>,
        raw: &[u8],
    ) -> (String, Result<(), HttpError>, HandlerInvoker)
    where
        H: Handler + 'static,
    {
        let (client, server) = duplex(1 << 20);
        let (server_rx, server_tx) = tokio::io::split(server);
        let invoker = HandlerInvoker::new(4);
        let task = tokio::spawn(
            HttpConnection::with_config(server_rx, server_tx, config).process(handler, invoker.clone()),
        );

        let (mut client_rx, mut client_tx) = tokio::io::split(client);
        client_tx.write_all(raw).await.unwrap();

        let mut buf = Vec::new();
        client_rx.read_to_end(&mut buf).await.unwrap();
        let result = task.await.unwrap();
        (String::from_utf8(buf).unwrap(), result, invoker)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn get_root_is_answered_and_the_connection_closes() {
        let handler = Arc::new(make_handler(|_req| text_response(StatusCode::OK, "ok")));
        let raw = b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n";

        let (text, result, _) = exchange(ConnectionConfig::default(), handler, raw).await;

        assert!(result.is_ok());
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn posted_body_reaches_a_blocking_handler() {
        let handler = Arc::new(make_handler(|mut req: Request<RequestBody>| {
            let mut collected = Vec::new();
            while let Some(chunk) = req.body_mut().take() {
                collected.extend_from_slice(&chunk);
            }
            text_response(StatusCode::OK, collected)
        }));
        let raw = b"POST /echo HTTP/1.1\r\ncontent-length: 11\r\n\r\nhello world";

        let (text, result, _) = exchange(ConnectionConfig::default(), handler, raw).await;

        assert!(result.is_ok());
        assert!(text.ends_with("\r\n\r\nhello world"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streamed_reply_keeps_chunk_order_and_closes_once() {
        let handler = Arc::new(make_handler(|_req| {
            let (mut tx, body) = ResponseBody::channel(4);
            std::thread::spawn(move || {
                for chunk in [&b"a"[..], b"b", b"c"] {
                    tx.blocking_push(Bytes::from_static(chunk)).unwrap();
                }
                tx.close();
            });
            text_response(StatusCode::OK, body)
        }));
        let raw = b"GET /stream HTTP/1.1\r\n\r\n";

        let (text, result, _) = exchange(ConnectionConfig::default(), handler, raw).await;

        assert!(result.is_ok());
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        let body_start = text.find("\r\n\r\n").unwrap() + 4;
        assert_eq!(&text[body_start..], "1\r\na\r\n1\r\nb\r\n1\r\nc\r\n0\r\n\r\n");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_handler_gets_one_error_request_and_the_pool_recovers() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let handler = Arc::new(make_handler(move |req: Request<RequestBody>| {
            recorded.lock().unwrap().push(req.method().to_string());
            if req.method().as_str() == "ERROR" {
                text_response(StatusCode::BAD_GATEWAY, ())
            } else {
                Err("boom".into())
            }
        }));
        let raw = b"GET /broken HTTP/1.1\r\n\r\n";

        let (text, result, invoker) = exchange(ConnectionConfig::default(), handler, raw).await;

        assert!(result.is_ok());
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert_eq!(seen.lock().unwrap().as_slice(), &["GET".to_string(), "ERROR".to_string()]);
        assert_eq!(invoker.available_workers(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unrecovered_failure_answers_500_and_errors_out() {
        let handler = Arc::new(make_handler(|_req| -> Result<Reply, BoxError> { Err("boom".into()) }));
        let raw = b"GET / HTTP/1.1\r\n\r\n";

        let (text, result, _) = exchange(ConnectionConfig::default(), handler, raw).await;

        assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(matches!(result, Err(HttpError::Handler { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_head_answers_400() {
        let handler = Arc::new(make_handler(|_req| text_response(StatusCode::OK, ())));
        let raw = b"NOT AN HTTP REQUEST\r\n\r\n";

        let (text, result, _) = exchange(ConnectionConfig::default(), handler, raw).await;

        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(matches!(result, Err(HttpError::Protocol { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn continue_token_emits_the_interim_status_at_most_once() {
        let handler = Arc::new(make_handler(|mut req: Request<RequestBody>| {
            let token = req.extensions().get::<ContinueToken>().cloned().expect("token attached");
            token.request_continue();
            token.request_continue();
            let mut collected = Vec::new();
            while let Some(chunk) = req.body_mut().take() {
                collected.extend_from_slice(&chunk);
            }
            text_response(StatusCode::OK, collected)
        }));

        let (client, server) = duplex(1 << 20);
        let (server_rx, server_tx) = tokio::io::split(server);
        let invoker = HandlerInvoker::new(4);
        let task = tokio::spawn(
            HttpConnection::with_config(server_rx, server_tx, ConnectionConfig::default())
                .process(handler, invoker),
        );

        let (mut client_rx, mut client_tx) = tokio::io::split(client);
        client_tx
            .write_all(b"PUT /up HTTP/1.1\r\nexpect: 100-continue\r\ncontent-length: 5\r\n\r\n")
            .await
            .unwrap();

        // hold the body back until the interim status arrives
        let mut seen = Vec::new();
        let mut chunk = [0u8; 256];
        while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = client_rx.read(&mut chunk).await.unwrap();
            seen.extend_from_slice(&chunk[..n]);
        }
        assert!(seen.starts_with(b"HTTP/1.1 100 Continue\r\n\r\n"));

        client_tx.write_all(b"hello").await.unwrap();
        client_rx.read_to_end(&mut seen).await.unwrap();
        task.await.unwrap().unwrap();

        let text = String::from_utf8(seen).unwrap();
        assert_eq!(text.matches("100 Continue").count(), 1);
        assert!(text.contains("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn keep_alive_serves_sequential_requests() {
        let handler = Arc::new(make_handler(|req: Request<RequestBody>| {
            text_response(StatusCode::OK, req.uri().path().to_string())
        }));
        let config = ConnectionConfig { keep_alive: true, ..ConnectionConfig::default() };

        let (client, server) = duplex(1 << 20);
        let (server_rx, server_tx) = tokio::io::split(server);
        let task = tokio::spawn(
            HttpConnection::with_config(server_rx, server_tx, config).process(handler, HandlerInvoker::new(4)),
        );

        let (mut client_rx, mut client_tx) = tokio::io::split(client);
        client_tx.write_all(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n").await.unwrap();
        client_tx.shutdown().await.unwrap();

        let mut buf = Vec::new();
        client_rx.read_to_end(&mut buf).await.unwrap();
        assert!(task.await.unwrap().is_ok());

        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(text.contains("/a"));
        assert!(text.contains("/b"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_connection_is_closed_after_the_read_timeout() {
        let handler = Arc::new(make_handler(|_req| text_response(StatusCode::OK, ())));
        let config = ConnectionConfig {
            idle_read_timeout: Some(Duration::from_millis(50)),
            ..ConnectionConfig::default()
        };

        let (text, result, _) = exchange(config, handler, b"").await;

        assert!(text.is_empty());
        assert!(matches!(
            result,
            Err(HttpError::Transport { source: TransportError::IdleTimeout { .. } })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn disconnect_mid_body_releases_the_blocked_consumer() {
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let collected = Arc::clone(&seen);
        let handler = Arc::new(make_handler(move |mut req: Request<RequestBody>| {
            while let Some(chunk) = req.body_mut().take() {
                collected.lock().unwrap().extend_from_slice(&chunk);
            }
            text_response(StatusCode::OK, ())
        }));

        let (client, server) = duplex(1 << 20);
        let (server_rx, server_tx) = tokio::io::split(server);
        let task = tokio::spawn(
            HttpConnection::with_config(server_rx, server_tx, ConnectionConfig::default())
                .process(handler, HandlerInvoker::new(4)),
        );

        let (_client_rx, mut client_tx) = tokio::io::split(client);
        client_tx.write_all(b"POST /up HTTP/1.1\r\ncontent-length: 10\r\n\r\nabc").await.unwrap();
        client_tx.shutdown().await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(HttpError::Transport { source: TransportError::PeerClosed })));

        // the forced channel close wakes the handler's blocking take
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.lock().unwrap().as_slice(), b"abc");
    }
}
