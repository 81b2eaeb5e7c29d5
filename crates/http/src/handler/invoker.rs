//! Handler invocation on the bounded worker pool.
//!
//! The invoker is the only place the engine runs application code. Every
//! invocation acquires a permit from a semaphore sized like the worker pool
//! and then executes the handler under `spawn_blocking`; when every worker is
//! busy, dispatches queue on the semaphore instead of spawning unbounded
//! blocking threads, which makes the pool size an admission-control limit.
//!
//! Both reply shapes converge here: an immediate response is forwarded as-is,
//! a deferred reply is awaited on its one-shot channel (subscribed exactly
//! once). Handler failures — an `Err` return, a panic, or a dropped deferred
//! reply — are logged and re-dispatched once as a synthetic error request to
//! the same handler before the connection is closed.

use std::sync::Arc;

use http::{Request, Response};
use tokio::sync::{Semaphore, oneshot};
use tokio::task;
use tracing::error;

use crate::protocol::HandlerError;
use crate::protocol::body::{RequestBody, ResponseBody};

use super::{Handler, Reply, error_request};

/// Dispatches requests to handlers on a bounded blocking pool.
///
/// Cloning is cheap and clones share the same pool.
#[derive(Debug, Clone)]
pub struct HandlerInvoker {
    permits: Arc<Semaphore>,
}

/// What came back from one handler invocation.
#[derive(Debug)]
pub enum Invocation {
    /// The handler answered normally.
    Complete(Response<ResponseBody>),
    /// The handler failed, but the synthetic error request produced a
    /// response. The connection must close after writing it.
    Recovered(Response<ResponseBody>),
    /// Both the handler and the error request failed; carries the original
    /// failure.
    Failed(HandlerError),
}

impl HandlerInvoker {
    /// Creates an invoker with `workers` concurrently-executing handler
    /// slots. A zero size is rounded up to one.
    pub fn new(workers: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(workers.max(1))) }
    }

    /// Free handler slots; equals the pool size when no handler is running.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Hands the request to the handler and returns a channel on which the
    /// outcome arrives.
    ///
    /// Never blocks the caller: handler execution, error re-dispatch and
    /// deferred-reply completion all happen on a spawned task.
    pub fn dispatch<H>(&self, handler: Arc<H>, request: Request<RequestBody>) -> oneshot::Receiver<Invocation>
    where
        H: Handler + ?Sized + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let (tx, rx) = oneshot::channel();

        // kept aside for the synthetic error request; the original request
        // moves into the handler
        let uri = request.uri().clone();
        let version = request.version();

        tokio::spawn(async move {
            let outcome = match run_one(&permits, &handler, request).await {
                Ok(response) => Invocation::Complete(response),
                Err(failure) => {
                    error!(cause = %failure, "handler failed, dispatching error request");
                    let synthetic = error_request(uri, version, failure.clone());
                    match run_one(&permits, &handler, synthetic).await {
                        Ok(response) => Invocation::Recovered(response),
                        Err(second) => {
                            error!(cause = %second, "error request failed as well");
                            Invocation::Failed(failure)
                        }
                    }
                }
            };
            // the connection may be gone already; nothing left to do then
            let _ = tx.send(outcome);
        });

        rx
    }
}

/// Runs the handler once and normalizes both reply shapes into a response.
///
/// The worker permit is held only while the handler itself executes; a
/// deferred reply resolving in some other context does not occupy a worker.
async fn run_one<H>(
    permits: &Arc<Semaphore>,
    handler: &Arc<H>,
    request: Request<RequestBody>,
) -> Result<Response<ResponseBody>, HandlerError>
where
    H: Handler + ?Sized + 'static,
{
    let reply = {
        // admission control: queue here while every worker is busy
        let _permit = match permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(HandlerError::failed("worker pool shut down")),
        };

        let handler = Arc::clone(handler);
        match task::spawn_blocking(move || handler.handle(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(cause)) => return Err(HandlerError::failed(cause)),
            Err(join_error) => return Err(HandlerError::panicked(&join_error)),
        }
    };

    match reply {
        Reply::Ready(response) => Ok(response),
        Reply::Later(receiver) => receiver.await.map_err(|_| HandlerError::ReplyDropped),
    }
}
