//! Body framing: content-length and chunked transfer encoding.
//!
//! The decoder turns raw bytes into [`PayloadItem`]s according to the body
//! delimitation announced by the head; the encoder does the reverse for
//! responses, re-chunking oversized buffers so no single frame exceeds the
//! configured chunk size.

use std::cmp;
use std::io::Write;

use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

use crate::protocol::{BodySize, HttpError, PayloadItem, ProtocolError};

use super::BufWriter;

/// Streaming decoder for one request body.
#[derive(Debug)]
pub(crate) struct PayloadDecoder {
    kind: DecodeKind,
}

#[derive(Debug)]
enum DecodeKind {
    Length { remaining: u64 },
    Chunked(ChunkedDecoder),
}

impl PayloadDecoder {
    pub fn for_size(size: BodySize) -> Self {
        let kind = match size {
            BodySize::Empty => DecodeKind::Length { remaining: 0 },
            BodySize::Length(length) => DecodeKind::Length { remaining: length },
            BodySize::Chunked => DecodeKind::Chunked(ChunkedDecoder::new()),
        };
        Self { kind }
    }

    /// Decodes the next payload item, or `None` when more bytes are needed.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, HttpError> {
        match &mut self.kind {
            DecodeKind::Length { remaining } => {
                if *remaining == 0 {
                    return Ok(Some(PayloadItem::Eof));
                }
                if src.is_empty() {
                    return Ok(None);
                }
                let len = cmp::min(*remaining, src.len() as u64);
                let bytes = src.split_to(len as usize).freeze();
                *remaining -= bytes.len() as u64;
                Ok(Some(PayloadItem::Chunk(bytes)))
            }
            DecodeKind::Chunked(chunked) => chunked.decode(src),
        }
    }
}

/// State machine for chunked transfer decoding.
///
/// Chunk extensions are tolerated and discarded; trailer fields are consumed
/// and discarded as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Accumulating the hex chunk size.
    Size,
    /// Skipping everything after the size up to the end of the size line.
    Ext,
    /// Expecting the LF that ends the size line.
    SizeLf,
    /// Reading chunk data.
    Data,
    /// Expecting the CR after chunk data.
    DataCr,
    /// Expecting the LF after chunk data.
    DataLf,
    /// At the start of a trailer line.
    Trailer,
    /// Skipping the remainder of a trailer line.
    TrailerSkip,
    /// Expecting the LF that ends the message.
    EndLf,
    Done,
}

#[derive(Debug)]
struct ChunkedDecoder {
    state: ChunkedState,
    remaining: u64,
}

impl ChunkedDecoder {
    fn new() -> Self {
        Self { state: ChunkedState::Size, remaining: 0 }
    }

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<PayloadItem>, HttpError> {
        use ChunkedState::*;

        loop {
            if self.state == Done {
                return Ok(Some(PayloadItem::Eof));
            }
            if src.is_empty() {
                return Ok(None);
            }

            if self.state == Data {
                let len = cmp::min(self.remaining, src.len() as u64);
                let bytes = src.split_to(len as usize).freeze();
                self.remaining -= bytes.len() as u64;
                if self.remaining == 0 {
                    self.state = DataCr;
                }
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }

            let byte = src.get_u8();
            self.state = match (self.state, byte) {
                (Size, b'0'..=b'9') => self.push_size_digit(u64::from(byte - b'0'))?,
                (Size, b'a'..=b'f') => self.push_size_digit(u64::from(byte - b'a' + 10))?,
                (Size, b'A'..=b'F') => self.push_size_digit(u64::from(byte - b'A' + 10))?,
                (Size, b';' | b'\t' | b' ') => Ext,
                (Size | Ext, b'\r') => SizeLf,
                (Ext, b'\n') => return Err(ProtocolError::invalid_chunk("bare LF inside chunk extension").into()),
                (Ext, _) => Ext,
                (Size, other) => {
                    return Err(ProtocolError::invalid_chunk(format!("invalid size character {other:#04x}")).into());
                }
                (SizeLf, b'\n') if self.remaining == 0 => Trailer,
                (SizeLf, b'\n') => Data,
                (SizeLf, _) => return Err(ProtocolError::invalid_chunk("missing LF after chunk size").into()),
                (DataCr, b'\r') => DataLf,
                (DataCr, _) => return Err(ProtocolError::invalid_chunk("missing CR after chunk data").into()),
                (DataLf, b'\n') => Size,
                (DataLf, _) => return Err(ProtocolError::invalid_chunk("missing LF after chunk data").into()),
                (Trailer, b'\r') => EndLf,
                (Trailer, _) => TrailerSkip,
                (TrailerSkip, b'\n') => Trailer,
                (TrailerSkip, _) => TrailerSkip,
                (EndLf, b'\n') => Done,
                (EndLf, _) => return Err(ProtocolError::invalid_chunk("missing final LF").into()),
                (Data | Done, _) => unreachable!("handled above"),
            };
        }
    }

    fn push_size_digit(&mut self, digit: u64) -> Result<ChunkedState, HttpError> {
        self.remaining = self
            .remaining
            .checked_mul(16)
            .and_then(|size| size.checked_add(digit))
            .ok_or_else(|| ProtocolError::invalid_chunk("chunk size overflows u64"))?;
        Ok(ChunkedState::Size)
    }
}

/// Streaming encoder for one response body.
#[derive(Debug)]
pub(crate) struct PayloadEncoder {
    kind: EncodeKind,
    max_chunk: usize,
    finished: bool,
}

#[derive(Debug)]
enum EncodeKind {
    Empty,
    Length { remaining: u64 },
    Chunked,
}

impl PayloadEncoder {
    pub fn for_size(size: BodySize, max_chunk: usize) -> Self {
        let kind = match size {
            BodySize::Empty => EncodeKind::Empty,
            BodySize::Length(length) => EncodeKind::Length { remaining: length },
            BodySize::Chunked => EncodeKind::Chunked,
        };
        Self { kind, max_chunk: max_chunk.max(1), finished: false }
    }

    /// Whether the terminal item has been encoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), HttpError> {
        if self.finished {
            return Err(ProtocolError::unexpected_frame("payload", "finished").into());
        }

        match item {
            PayloadItem::Chunk(bytes) => match &mut self.kind {
                EncodeKind::Empty => {
                    if !bytes.is_empty() {
                        warn!(len = bytes.len(), "discarding body chunk of a bodyless response");
                    }
                    Ok(())
                }
                EncodeKind::Length { remaining } => {
                    let len = cmp::min(*remaining, bytes.len() as u64) as usize;
                    if len < bytes.len() {
                        warn!(
                            overflow = bytes.len() - len,
                            "body chunk exceeds the announced content-length, truncating"
                        );
                    }
                    dst.extend_from_slice(&bytes[..len]);
                    *remaining -= len as u64;
                    Ok(())
                }
                EncodeKind::Chunked => {
                    let mut bytes = bytes;
                    // an empty chunk would read as the terminator, skip it
                    while !bytes.is_empty() {
                        let frame = bytes.split_to(cmp::min(self.max_chunk, bytes.len()));
                        write!(BufWriter(dst), "{:X}\r\n", frame.len())?;
                        dst.reserve(frame.len() + 2);
                        dst.extend_from_slice(&frame);
                        dst.extend_from_slice(b"\r\n");
                    }
                    Ok(())
                }
            },
            PayloadItem::Eof => {
                if let EncodeKind::Length { remaining } = &self.kind {
                    if *remaining > 0 {
                        warn!(missing = *remaining, "body ended short of the announced content-length");
                    }
                }
                if matches!(self.kind, EncodeKind::Chunked) {
                    dst.extend_from_slice(b"0\r\n\r\n");
                }
                self.finished = true;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut PayloadDecoder, src: &mut BytesMut) -> Vec<PayloadItem> {
        let mut items = Vec::new();
        while let Some(item) = decoder.decode(src).unwrap() {
            let eof = item.is_eof();
            items.push(item);
            if eof {
                break;
            }
        }
        items
    }

    #[test]
    fn length_decoder_emits_chunks_then_eof() {
        let mut decoder = PayloadDecoder::for_size(BodySize::Length(10));
        let mut src = BytesMut::from(&b"0123456789tail"[..]);

        let items = decode_all(&mut decoder, &mut src);
        assert_eq!(items, vec![PayloadItem::Chunk(Bytes::from_static(b"0123456789")), PayloadItem::Eof]);
        assert_eq!(&src[..], b"tail");
    }

    #[test]
    fn length_decoder_spans_partial_reads() {
        let mut decoder = PayloadDecoder::for_size(BodySize::Length(6));
        let mut src = BytesMut::from(&b"abc"[..]);

        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"abc"))));
        assert_eq!(decoder.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"def");
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"def"))));
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Eof));
    }

    #[test]
    fn chunked_decoder_handles_split_frames_and_extensions() {
        let mut decoder = PayloadDecoder::for_size(BodySize::Chunked);
        let mut src = BytesMut::from(&b"4;name=value\r\nwi"[..]);

        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"wi"))));
        assert_eq!(decoder.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"ki\r\n0\r\n\r\n");
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Chunk(Bytes::from_static(b"ki"))));
        assert_eq!(decoder.decode(&mut src).unwrap(), Some(PayloadItem::Eof));
    }

    #[test]
    fn chunked_decoder_discards_trailers() {
        let mut decoder = PayloadDecoder::for_size(BodySize::Chunked);
        let mut src = BytesMut::from(&b"3\r\nabc\r\n0\r\nx-checksum: 99\r\n\r\n"[..]);

        let items = decode_all(&mut decoder, &mut src);
        assert_eq!(items, vec![PayloadItem::Chunk(Bytes::from_static(b"abc")), PayloadItem::Eof]);
    }

    #[test]
    fn chunked_decoder_rejects_bad_size_line() {
        let mut decoder = PayloadDecoder::for_size(BodySize::Chunked);
        let mut src = BytesMut::from(&b"zz\r\n"[..]);
        assert!(decoder.decode(&mut src).is_err());
    }

    #[test]
    fn chunked_encoder_rechunks_oversized_buffers() {
        let mut encoder = PayloadEncoder::for_size(BodySize::Chunked, 4);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"0123456789")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"4\r\n0123\r\n4\r\n4567\r\n2\r\n89\r\n0\r\n\r\n");
        assert!(encoder.is_finished());
    }

    #[test]
    fn chunked_encoder_skips_empty_chunks() {
        let mut encoder = PayloadEncoder::for_size(BodySize::Chunked, 16);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        assert!(dst.is_empty());

        encoder.encode(PayloadItem::Eof, &mut dst).unwrap();
        assert_eq!(&dst[..], b"0\r\n\r\n");
    }

    #[test]
    fn length_encoder_truncates_overflowing_chunks() {
        let mut encoder = PayloadEncoder::for_size(BodySize::Length(4), 1024);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"abcdef")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof, &mut dst).unwrap();

        assert_eq!(&dst[..], b"abcd");
        assert!(encoder.is_finished());
    }

    #[test]
    fn terminal_item_is_encoded_exactly_once() {
        let mut encoder = PayloadEncoder::for_size(BodySize::Empty, 1024);
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Eof, &mut dst).unwrap();
        assert!(encoder.is_finished());
        assert!(encoder.encode(PayloadItem::Eof, &mut dst).is_err());
    }
}
