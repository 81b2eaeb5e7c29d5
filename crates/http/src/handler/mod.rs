//! The boundary between the engine and application code.
//!
//! A [`Handler`] receives a fully-headed request whose body may still be
//! arriving through the body channel, and answers in one of two shapes:
//!
//! - [`Reply::Ready`]: a response value, returned immediately,
//! - [`Reply::Later`]: a single-shot source that yields the response once
//!   some other context produces it.
//!
//! Handlers run on the bounded worker pool (see [`invoker`]), never on a
//! runtime thread, so they are free to block — including on
//! [`RequestBody::take`](crate::protocol::body::RequestBody::take).
//!
//! When a handler fails, the engine dispatches one synthetic request back to
//! the same handler so application-level error reporting stays uniform: its
//! method is [`ERROR_METHOD`] and the original failure rides in the request
//! extensions as [`HandlerFailure`].

pub mod invoker;

use std::error::Error;

use http::{Method, Request, Response, Uri, Version};
use tokio::sync::oneshot;

use crate::protocol::HandlerError;
use crate::protocol::body::{RequestBody, ResponseBody};

/// Boxed error type handlers may return.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Method name of the synthetic request dispatched after a handler failure.
pub const ERROR_METHOD: &str = "ERROR";

/// A request handler.
///
/// Object-safe so the server can hold `Arc<dyn Handler>`.
pub trait Handler: Send + Sync {
    fn handle(&self, request: Request<RequestBody>) -> Result<Reply, BoxError>;
}

/// The two response shapes a handler may produce.
#[derive(Debug)]
pub enum Reply {
    /// The response is ready now.
    Ready(Response<ResponseBody>),
    /// The response arrives later through a one-shot channel.
    Later(oneshot::Receiver<Response<ResponseBody>>),
}

impl Reply {
    /// Creates a deferred reply, returning the completion handle to hand off
    /// to whatever context will produce the response.
    pub fn later() -> (ReplySender, Reply) {
        let (tx, rx) = oneshot::channel();
        (ReplySender { tx }, Reply::Later(rx))
    }
}

impl From<Response<ResponseBody>> for Reply {
    fn from(response: Response<ResponseBody>) -> Self {
        Reply::Ready(response)
    }
}

/// Completion handle of a deferred reply.
#[derive(Debug)]
pub struct ReplySender {
    tx: oneshot::Sender<Response<ResponseBody>>,
}

impl ReplySender {
    /// Delivers the response. Returns it back when the connection is already
    /// gone.
    pub fn send(self, response: Response<ResponseBody>) -> Result<(), Response<ResponseBody>> {
        self.tx.send(response)
    }
}

/// Adapter turning a plain function or closure into a [`Handler`].
#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(Request<RequestBody>) -> Result<Reply, BoxError> + Send + Sync,
{
    fn handle(&self, request: Request<RequestBody>) -> Result<Reply, BoxError> {
        (self.f)(request)
    }
}

pub fn make_handler<F>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<RequestBody>) -> Result<Reply, BoxError> + Send + Sync,
{
    HandlerFn { f }
}

/// The original failure carried by a synthetic error request.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    error: HandlerError,
}

impl HandlerFailure {
    pub(crate) fn new(error: HandlerError) -> Self {
        Self { error }
    }

    pub fn error(&self) -> &HandlerError {
        &self.error
    }
}

/// Builds the synthetic request dispatched after a handler failure.
pub(crate) fn error_request(uri: Uri, version: Version, error: HandlerError) -> Request<RequestBody> {
    let method = Method::from_bytes(ERROR_METHOD.as_bytes()).expect("static method name is valid");
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .version(version)
        .body(RequestBody::empty())
        .expect("synthetic request parts are valid");
    request.extensions_mut().insert(HandlerFailure::new(error));
    request
}
