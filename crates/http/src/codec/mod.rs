//! HTTP/1.1 codec: framing between raw transport bytes and protocol
//! [`Message`]s.
//!
//! [`RequestDecoder`] and [`ResponseEncoder`] plug into
//! `tokio_util::codec::{FramedRead, FramedWrite}`; both are two-phase state
//! machines that deal with the head first and then stream the body:
//!
//! - decode: head phase (`httparse`-based parsing, see [`head`]) followed by
//!   a payload phase selected from the head's body delimitation,
//! - encode: head serialization followed by payload framing, re-chunking
//!   buffers larger than the configured chunk size.

mod head;
mod payload;

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::{BodySize, HttpError, Message, PayloadItem, ProtocolError, RequestHead, ResponseHead};

use payload::{PayloadDecoder, PayloadEncoder};

/// Decoder for the request side of a connection.
///
/// Yields one `Message::Head` per request, then the request's payload items
/// up to and including `PayloadItem::Eof`. Requests without a body yield
/// only the head frame.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    payload: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHead, BodySize)>;
    type Error = HttpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload) = &mut self.payload {
            return Ok(match payload.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof) => {
                    // body complete, next frame is a fresh head
                    self.payload = None;
                    Some(Message::Payload(item))
                }
                None => None,
            });
        }

        Ok(match head::parse_head(src)? {
            Some((head, size)) => {
                if !size.is_empty() {
                    self.payload = Some(PayloadDecoder::for_size(size));
                }
                Some(Message::Head((head, size)))
            }
            None => None,
        })
    }
}

/// Encoder for the response side of a connection.
///
/// Accepts exactly one head frame per response followed by its payload
/// items; anything out of sequence is a protocol violation. The terminal
/// item clears the payload phase so the next response can begin.
#[derive(Debug)]
pub struct ResponseEncoder {
    max_chunk: usize,
    payload: Option<PayloadEncoder>,
}

impl ResponseEncoder {
    /// `max_chunk` bounds the size of a single chunked frame; larger buffers
    /// are split.
    pub fn new(max_chunk: usize) -> Self {
        Self { max_chunk, payload: None }
    }
}

impl Encoder<Message<(ResponseHead, BodySize)>> for ResponseEncoder {
    type Error = HttpError;

    fn encode(&mut self, item: Message<(ResponseHead, BodySize)>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Head((head, size)) => {
                if self.payload.is_some() {
                    return Err(ProtocolError::unexpected_frame("head", "draining").into());
                }
                self.payload = Some(PayloadEncoder::for_size(size, self.max_chunk));
                head::encode_head(head, size, dst)
            }

            Message::Payload(item) => {
                let Some(payload) = &mut self.payload else {
                    return Err(ProtocolError::unexpected_frame("payload", "idle").into());
                };
                payload.encode(item, dst)?;
                if payload.is_finished() {
                    self.payload = None;
                }
                Ok(())
            }
        }
    }
}

/// `io::Write` adapter so `write!` can serialize straight into a `BytesMut`.
struct BufWriter<'a>(&'a mut BytesMut);

impl io::Write for BufWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{Response, StatusCode};
    use indoc::indoc;

    #[test]
    fn decodes_head_then_body_then_next_head() {
        let raw = indoc! {"
            POST /in HTTP/1.1\r
            content-length: 4\r
            \r
            wxyzGET / HTTP/1.1\r
            \r
        "};
        let mut decoder = RequestDecoder::new();
        let mut src = BytesMut::from(raw);

        let Some(Message::Head((head, size))) = decoder.decode(&mut src).unwrap() else {
            panic!("expected a head frame");
        };
        assert_eq!(head.uri().path(), "/in");
        assert_eq!(size, BodySize::Length(4));

        let Some(Message::Payload(PayloadItem::Chunk(chunk))) = decoder.decode(&mut src).unwrap() else {
            panic!("expected a body chunk");
        };
        assert_eq!(chunk, Bytes::from_static(b"wxyz"));

        assert!(matches!(decoder.decode(&mut src).unwrap(), Some(Message::Payload(PayloadItem::Eof))));

        let Some(Message::Head((head, size))) = decoder.decode(&mut src).unwrap() else {
            panic!("expected the second head frame");
        };
        assert_eq!(head.uri().path(), "/");
        assert_eq!(size, BodySize::Empty);
    }

    #[test]
    fn encodes_a_full_response_sequence() {
        let mut encoder = ResponseEncoder::new(1024);
        let mut dst = BytesMut::new();

        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();
        encoder.encode(Message::Head((head, BodySize::Length(2))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Chunk(Bytes::from_static(b"ok"))), &mut dst).unwrap();
        encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst).unwrap();

        let text = String::from_utf8(dst.to_vec()).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nok"));
    }

    #[test]
    fn payload_before_head_is_rejected() {
        let mut encoder = ResponseEncoder::new(1024);
        let mut dst = BytesMut::new();
        let result = encoder.encode(Message::Payload(PayloadItem::Eof), &mut dst);
        assert!(matches!(result, Err(HttpError::Protocol { source: ProtocolError::UnexpectedFrame { .. } })));
    }

    #[test]
    fn second_head_mid_body_is_rejected() {
        let mut encoder = ResponseEncoder::new(1024);
        let mut dst = BytesMut::new();

        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();
        encoder.encode(Message::Head((head, BodySize::Chunked)), &mut dst).unwrap();

        let head = Response::builder().status(StatusCode::OK).body(()).unwrap();
        let result = encoder.encode(Message::Head((head, BodySize::Empty)), &mut dst);
        assert!(matches!(result, Err(HttpError::Protocol { source: ProtocolError::UnexpectedFrame { .. } })));
    }
}
