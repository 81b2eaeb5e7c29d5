use bytes::Bytes;

/// One protocol frame flowing through the codec: a message head or a piece of
/// the message body.
///
/// `T` is the head type: `(RequestHead, BodySize)` on the decode side,
/// `(ResponseHead, BodySize)` on the encode side.
#[derive(Debug)]
pub enum Message<T> {
    Head(T),
    Payload(PayloadItem),
}

impl<T> Message<T> {
    #[inline]
    pub fn is_head(&self) -> bool {
        matches!(self, Message::Head(_))
    }

    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }
}

/// An element of a body stream: a chunk of bytes, or the end-of-body marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    Chunk(Bytes),
    Eof,
}

impl PayloadItem {
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof)
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    /// Returns the contained bytes, or `None` for the end-of-body marker.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof => None,
        }
    }
}

/// How a message body is delimited on the wire.
///
/// Drives both the payload decoder selection on the request side and the
/// `Content-Length` / `Transfer-Encoding` handling on the response side.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodySize {
    /// No body at all.
    Empty,
    /// Body of a known byte length.
    Length(u64),
    /// Body framed with chunked transfer encoding.
    Chunked,
}

impl BodySize {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, BodySize::Empty)
    }

    #[inline]
    pub fn is_chunked(&self) -> bool {
        matches!(self, BodySize::Chunked)
    }
}
