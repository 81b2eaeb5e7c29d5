//! The response-writing state machine.
//!
//! One [`ResponseWriter`] instance drives exactly one response: the head
//! frame goes out first, unconditionally, then the body according to its
//! delivery mode, then exactly one terminal frame. The drain loop for
//! streamed bodies is an explicit loop in which each frame's write completion
//! gates the next take from the body channel, so a response can never
//! interleave with itself.

use futures::SinkExt;
use http::Response;
use tokio::io::AsyncWrite;
use tokio_util::codec::FramedWrite;
use tracing::debug;

use crate::codec::ResponseEncoder;
use crate::protocol::body::ResponseBody;
use crate::protocol::{HttpError, Message, PayloadItem, ResponseHead};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Idle,
    HeadWritten,
    Draining,
    Done,
    /// A write failed; the connection is unusable.
    Closed,
}

/// Writes one response to the transport.
pub(crate) struct ResponseWriter<'conn, W> {
    framed: &'conn mut FramedWrite<W, ResponseEncoder>,
    state: WriteState,
}

impl<'conn, W> ResponseWriter<'conn, W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(framed: &'conn mut FramedWrite<W, ResponseEncoder>) -> Self {
        Self { framed, state: WriteState::Idle }
    }

    /// Writes head, body and terminal frame for the given response.
    ///
    /// On a mid-drain write failure the body channel is closed so a producer
    /// blocked on it is released, and the error is returned for the
    /// connection to tear itself down.
    pub async fn write(mut self, response: Response<ResponseBody>) -> Result<(), HttpError> {
        debug_assert_eq!(self.state, WriteState::Idle);

        let (parts, body) = response.into_parts();
        let size = body.size();
        let head = ResponseHead::from_parts(parts, ());

        // the head is buffered, not flushed: it travels with the first body
        // frame or with the terminal frame
        let fed = self.framed.feed(Message::Head((head, size))).await;
        self.checked(fed)?;
        self.state = WriteState::HeadWritten;

        match body {
            ResponseBody::Empty => self.finish().await,

            ResponseBody::Full(bytes) => {
                let fed = self.framed.feed(Message::Payload(PayloadItem::Chunk(bytes))).await;
                self.checked(fed)?;
                self.finish().await
            }

            ResponseBody::Stream(mut receiver) => {
                self.state = WriteState::Draining;
                loop {
                    match receiver.recv().await {
                        Some(chunk) => {
                            let written = self.framed.send(Message::Payload(PayloadItem::Chunk(chunk))).await;
                            if written.is_err() {
                                // release the producer before reporting
                                receiver.close();
                                self.checked(written)?;
                            }
                        }
                        None => {
                            debug!("response body drained");
                            return self.finish().await;
                        }
                    }
                }
            }
        }
    }

    /// Emits the terminal frame and flushes. Runs at most once per response.
    async fn finish(&mut self) -> Result<(), HttpError> {
        debug_assert_ne!(self.state, WriteState::Done);
        let sent = self.framed.send(Message::Payload(PayloadItem::Eof)).await;
        self.checked(sent)?;
        self.state = WriteState::Done;
        Ok(())
    }

    fn checked(&mut self, written: Result<(), HttpError>) -> Result<(), HttpError> {
        if written.is_err() {
            self.state = WriteState::Closed;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::body::ResponseBody;
    use bytes::Bytes;
    use http::StatusCode;
    use tokio::io::AsyncReadExt;

    async fn write_response(body: ResponseBody) -> Vec<u8> {
        let (client, server) = tokio::io::duplex(1 << 16);
        let (_, write_half) = tokio::io::split(server);
        let mut framed = FramedWrite::new(write_half, ResponseEncoder::new(1 << 20));

        let response = Response::builder().status(StatusCode::OK).body(body).unwrap();
        ResponseWriter::new(&mut framed).write(response).await.unwrap();
        drop(framed);

        let mut buf = Vec::new();
        let (mut client_rx, client_tx) = tokio::io::split(client);
        drop(client_tx);
        client_rx.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn absent_body_writes_head_and_single_terminal_frame() {
        let bytes = write_response(ResponseBody::Empty).await;
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-length: 0\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn full_body_is_written_with_its_length() {
        let bytes = write_response(ResponseBody::from("ok")).await;
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("content-length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streamed_body_preserves_chunk_order_and_terminates_once() {
        let (mut tx, body) = ResponseBody::channel(4);
        let producer = tokio::task::spawn_blocking(move || {
            for chunk in [&b"a"[..], b"b", b"c"] {
                tx.blocking_push(Bytes::from_static(chunk)).unwrap();
            }
            tx.close();
        });

        let bytes = write_response(body).await;
        producer.await.unwrap();

        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("transfer-encoding: chunked\r\n"));
        let body_start = text.find("\r\n\r\n").unwrap() + 4;
        assert_eq!(&text[body_start..], "1\r\na\r\n1\r\nb\r\n1\r\nc\r\n0\r\n\r\n");
    }
}
