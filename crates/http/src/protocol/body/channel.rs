//! The bounded body channel bridging the connection task and the worker pool.
//!
//! A channel carries body chunks in FIFO order between a producer and a
//! consumer that run on different execution contexts: the connection task
//! pushes decoded request chunks toward a handler, and a handler pushes
//! response chunks toward the response writer.
//!
//! # Backpressure
//!
//! The channel holds at most `capacity` chunks. [`BodySender::push`] stays
//! pending while the channel is full; for the request path this is the read
//! pause signal — the connection task awaiting a push does not poll the
//! transport decoder, so no reads are issued until the consumer frees a slot,
//! at which point the push completes and reading resumes. No chunk is ever
//! dropped by the channel itself.
//!
//! # Close semantics
//!
//! Either side may close, and close is idempotent:
//!
//! - the producer closes to mark normal end-of-body; the consumer drains any
//!   buffered chunks and then observes end-of-stream,
//! - the consumer closes to force teardown; pending and future pushes fail
//!   with [`ChannelClosed`], while chunks already buffered stay readable.
//!
//! Closing always wakes a blocked consumer or a pending push; nothing hangs
//! on a closed channel.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use thiserror::Error;
use tokio::sync::mpsc;

/// Creates a bounded body channel with room for `capacity` chunks.
///
/// A zero capacity is rounded up to one slot.
pub fn channel(capacity: usize) -> (BodySender, BodyReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BodySender { tx: Some(tx) }, BodyReceiver { rx, done: false })
}

/// The channel rejected a chunk because the consumer side is gone or the
/// producer already closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("body channel closed")]
pub struct ChannelClosed;

/// Producer half of a body channel.
#[derive(Debug)]
pub struct BodySender {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl BodySender {
    /// Enqueues a chunk, waiting for a free slot when the channel is full.
    ///
    /// The pending future is the backpressure signal: a producer awaiting it
    /// must not pull more data from its source.
    pub async fn push(&mut self, chunk: Bytes) -> Result<(), ChannelClosed> {
        match &self.tx {
            Some(tx) => tx.send(chunk).await.map_err(|_| ChannelClosed),
            None => Err(ChannelClosed),
        }
    }

    /// Enqueues a chunk from a blocking context, such as a handler producing
    /// a streamed response body on the worker pool.
    pub fn blocking_push(&mut self, chunk: Bytes) -> Result<(), ChannelClosed> {
        match &self.tx {
            Some(tx) => tx.blocking_send(chunk).map_err(|_| ChannelClosed),
            None => Err(ChannelClosed),
        }
    }

    /// Enqueues a chunk without waiting, reporting a full channel instead of
    /// applying backpressure.
    pub fn try_push(&mut self, chunk: Bytes) -> Result<(), TryPushError> {
        match &self.tx {
            Some(tx) => tx.try_send(chunk).map_err(|e| match e {
                mpsc::error::TrySendError::Full(chunk) => TryPushError::Full(chunk),
                mpsc::error::TrySendError::Closed(chunk) => TryPushError::Closed(chunk),
            }),
            None => Err(TryPushError::Closed(chunk)),
        }
    }

    /// Marks normal end-of-body. Idempotent; buffered chunks stay readable.
    pub fn close(&mut self) {
        self.tx.take();
    }

    /// Whether the channel can no longer accept chunks.
    pub fn is_closed(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }
}

/// A [`BodySender::try_push`] rejection, handing the chunk back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub enum TryPushError {
    /// All capacity slots are occupied.
    Full(Bytes),
    /// The channel is closed.
    Closed(Bytes),
}

/// Consumer half of a body channel.
#[derive(Debug)]
pub struct BodyReceiver {
    rx: mpsc::Receiver<Bytes>,
    done: bool,
}

impl BodyReceiver {
    /// Awaits the next chunk; `None` marks end-of-stream and is sticky.
    pub async fn recv(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        let chunk = self.rx.recv().await;
        if chunk.is_none() {
            self.done = true;
        }
        chunk
    }

    /// Takes the next chunk, blocking the calling thread until one arrives or
    /// the channel closes.
    ///
    /// Must only be called from the worker pool; blocking a runtime thread
    /// this way would stall every connection scheduled on it.
    pub fn take(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }
        let chunk = self.rx.blocking_recv();
        if chunk.is_none() {
            self.done = true;
        }
        chunk
    }

    /// Forces teardown from the consumer side: pending and future pushes fail
    /// while already-buffered chunks stay readable. Idempotent.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub(crate) fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        if self.done {
            return Poll::Ready(None);
        }
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            self.done = true;
        }
        polled
    }
}

impl Body for BodyReceiver {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.get_mut().poll_recv(cx).map(|chunk| chunk.map(|bytes| Ok(Frame::data(bytes))))
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn chunks_drain_in_fifo_order_then_end_of_stream() {
        let (mut tx, mut rx) = channel(8);
        for chunk in [&b"one"[..], b"two", b"three"] {
            tx.push(Bytes::from_static(chunk)).await.unwrap();
        }
        tx.close();

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"one")));
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"two")));
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"three")));
        assert_eq!(rx.recv().await, None);
        // end-of-stream is sticky
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn full_channel_holds_push_until_a_take_frees_capacity() {
        let (mut tx, mut rx) = channel(2);
        tx.try_push(Bytes::from_static(b"a")).unwrap();
        tx.try_push(Bytes::from_static(b"b")).unwrap();
        assert!(matches!(tx.try_push(Bytes::from_static(b"c")), Err(TryPushError::Full(_))));

        let mut pending = Box::pin(tx.push(Bytes::from_static(b"c")));
        assert!((&mut pending).now_or_never().is_none());

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"a")));
        assert_eq!((&mut pending).now_or_never(), Some(Ok(())));
        drop(pending);
        tx.close();

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"b")));
        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"c")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_keeps_buffered_chunks() {
        let (mut tx, mut rx) = channel(4);
        tx.push(Bytes::from_static(b"kept")).await.unwrap();
        tx.close();
        tx.close();
        assert!(tx.push(Bytes::from_static(b"late")).await.is_err());

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"kept")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn consumer_close_fails_pending_push_but_keeps_buffered() {
        let (mut tx, mut rx) = channel(1);
        tx.push(Bytes::from_static(b"buffered")).await.unwrap();

        let mut pending = Box::pin(tx.push(Bytes::from_static(b"blocked")));
        assert!((&mut pending).now_or_never().is_none());

        rx.close();
        assert_eq!((&mut pending).now_or_never(), Some(Err(ChannelClosed)));
        drop(pending);

        assert_eq!(rx.recv().await, Some(Bytes::from_static(b"buffered")));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn producer_close_wakes_a_blocked_take() {
        let (mut tx, mut rx) = channel(4);

        let blocked = tokio::task::spawn_blocking(move || rx.take());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        tx.close();

        assert_eq!(blocked.await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_push_feeds_an_async_consumer() {
        let (mut tx, mut rx) = channel(2);

        let producer = tokio::task::spawn_blocking(move || {
            for chunk in [&b"a"[..], b"b", b"c", b"d"] {
                tx.blocking_push(Bytes::from_static(chunk)).unwrap();
            }
            tx.close();
        });

        let mut seen = Vec::new();
        while let Some(chunk) = rx.recv().await {
            seen.push(chunk);
        }
        producer.await.unwrap();
        assert_eq!(seen, vec![&b"a"[..], b"b", b"c", b"d"]);
    }
}
