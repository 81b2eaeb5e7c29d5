//! Body plumbing: the bounded chunk channel and the request/response body
//! types built on top of it.
//!
//! An incoming body is either absent or a live stream fed by the connection
//! task ([`RequestBody`]). An outgoing body is absent, a single
//! pre-materialized buffer, or a live stream fed by the handler
//! ([`ResponseBody`]); the three variants map one-to-one onto the response
//! writer's delivery modes.

mod channel;

pub use channel::{BodyReceiver, BodySender, ChannelClosed, TryPushError, channel};

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use crate::protocol::BodySize;

/// Body of an incoming request.
#[derive(Debug)]
pub enum RequestBody {
    /// The request carries no body.
    Empty,
    /// The body streams through a bounded channel while it arrives.
    Stream(BodyReceiver),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Empty
    }

    pub fn stream(receiver: BodyReceiver) -> Self {
        Self::Stream(receiver)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Takes the next chunk, blocking until one arrives or the body ends.
    ///
    /// Handlers run on the worker pool, where blocking is allowed; `None`
    /// marks end-of-body.
    pub fn take(&mut self) -> Option<Bytes> {
        match self {
            Self::Empty => None,
            Self::Stream(receiver) => receiver.take(),
        }
    }

    /// Awaits the next chunk; `None` marks end-of-body.
    pub async fn recv(&mut self) -> Option<Bytes> {
        match self {
            Self::Empty => None,
            Self::Stream(receiver) => receiver.recv().await,
        }
    }

    /// Releases the producer side without reading the rest of the body.
    pub fn close(&mut self) {
        if let Self::Stream(receiver) = self {
            receiver.close();
        }
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Empty => Poll::Ready(None),
            Self::Stream(receiver) => Pin::new(receiver).poll_frame(cx),
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            Self::Empty => SizeHint::with_exact(0),
            Self::Stream(_) => SizeHint::new(),
        }
    }
}

/// Body of an outgoing response, in one of the three delivery modes.
#[derive(Debug)]
pub enum ResponseBody {
    /// No body; the writer still emits the terminal frame.
    Empty,
    /// A single pre-materialized buffer, written with a known length.
    Full(Bytes),
    /// A live stream drained chunk by chunk with chunked transfer encoding.
    Stream(BodyReceiver),
}

impl ResponseBody {
    /// Opens a body channel for a streamed response, returning the producer
    /// half for the handler and the body to put into the response.
    pub fn channel(capacity: usize) -> (BodySender, ResponseBody) {
        let (sender, receiver) = channel(capacity);
        (sender, ResponseBody::Stream(receiver))
    }

    /// The wire delimitation this body requires.
    pub fn size(&self) -> BodySize {
        match self {
            Self::Empty => BodySize::Empty,
            Self::Full(bytes) if bytes.is_empty() => BodySize::Empty,
            Self::Full(bytes) => BodySize::Length(bytes.len() as u64),
            Self::Stream(_) => BodySize::Chunked,
        }
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(Bytes::from(bytes))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(text: &'static str) -> Self {
        Self::Full(Bytes::from_static(text.as_bytes()))
    }
}

impl From<String> for ResponseBody {
    fn from(text: String) -> Self {
        Self::Full(Bytes::from(text))
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn request_body_works_with_standard_body_combinators() {
        let (mut tx, rx) = channel(4);
        let mut body = RequestBody::stream(rx);

        tx.push(Bytes::from_static(b"con")).await.unwrap();
        tx.push(Bytes::from_static(b"cat")).await.unwrap();
        tx.close();

        let collected = BodyExt::collect(&mut body).await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"concat"));
    }

    #[tokio::test]
    async fn empty_request_body_collects_to_nothing() {
        let mut body = RequestBody::empty();
        let collected = BodyExt::collect(&mut body).await.unwrap().to_bytes();
        assert!(collected.is_empty());
    }

    #[test]
    fn response_body_reports_its_wire_size() {
        assert_eq!(ResponseBody::Empty.size(), BodySize::Empty);
        assert_eq!(ResponseBody::from("ok").size(), BodySize::Length(2));
        assert_eq!(ResponseBody::from("").size(), BodySize::Empty);
        let (_tx, body) = ResponseBody::channel(1);
        assert_eq!(body.size(), BodySize::Chunked);
    }
}
