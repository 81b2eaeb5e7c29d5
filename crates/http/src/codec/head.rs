//! Request head parsing and response head encoding.
//!
//! Parsing is built on `httparse` and stays zero-copy: header names and
//! values reference slices of the frozen head buffer instead of owned
//! copies. The body delimitation is derived from `Content-Length` and
//! `Transfer-Encoding` following RFC 9112 §6.

use std::io::Write;
use std::mem::MaybeUninit;

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request, StatusCode, Version, header};
use httparse::Status;
use tracing::trace;

use crate::ensure;
use crate::protocol::{BodySize, HttpError, ProtocolError, RequestHead, ResponseHead};

use super::BufWriter;

/// Upper bound on the number of headers in one request.
pub(crate) const MAX_HEADERS: usize = 64;

/// Upper bound on the byte size of the whole head section.
pub(crate) const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Space reserved up front when serializing a response head.
const INIT_HEAD_SIZE: usize = 4 * 1024;

/// Parses one request head off the front of `src`.
///
/// Returns `None` when the buffer does not hold a complete head yet. On
/// success the consumed bytes are split off and the parsed head plus the
/// body delimitation are returned.
pub(crate) fn parse_head(src: &mut BytesMut) -> Result<Option<(RequestHead, BodySize)>, HttpError> {
    // shortest parseable request: "GET / HTTP/1.1\r\n\r\n"
    if src.len() < 14 {
        return Ok(None);
    }

    let mut parsed = httparse::Request::new(&mut []);
    let mut header_storage = [const { MaybeUninit::uninit() }; MAX_HEADERS];

    let status = parsed.parse_with_uninit_headers(src, &mut header_storage).map_err(|e| match e {
        httparse::Error::TooManyHeaders => ProtocolError::TooManyHeaders { max_num: MAX_HEADERS },
        other => ProtocolError::invalid_header(other.to_string()),
    })?;

    let head_end = match status {
        Status::Complete(head_end) => head_end,
        Status::Partial => {
            ensure!(src.len() <= MAX_HEAD_BYTES, ProtocolError::too_large_header(src.len(), MAX_HEAD_BYTES));
            return Ok(None);
        }
    };

    trace!(head_bytes = head_end, "parsed request head");
    ensure!(head_end <= MAX_HEAD_BYTES, ProtocolError::too_large_header(head_end, MAX_HEAD_BYTES));

    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        other => return Err(ProtocolError::InvalidVersion(other).into()),
    };

    let mut builder = Request::builder()
        .method(parsed.method.ok_or(ProtocolError::InvalidMethod)?)
        .uri(parsed.path.ok_or(ProtocolError::InvalidUri)?)
        .version(version);

    // record name/value offsets now: the parsed headers borrow `src`, and the
    // buffer can only be split once those borrows end
    let base = src.as_ptr() as usize;
    let mut ranges = [(0usize, 0usize, 0usize, 0usize); MAX_HEADERS];
    let header_count = parsed.headers.len();
    for (header, range) in parsed.headers.iter().zip(ranges.iter_mut()) {
        let name_start = header.name.as_ptr() as usize - base;
        let value_start = header.value.as_ptr() as usize - base;
        *range = (name_start, name_start + header.name.len(), value_start, value_start + header.value.len());
    }

    let head_bytes = src.split_to(head_end).freeze();
    if let Some(headers) = builder.headers_mut() {
        headers.reserve(header_count);
        for &(name_start, name_end, value_start, value_end) in &ranges[..header_count] {
            let name = HeaderName::from_bytes(&head_bytes[name_start..name_end])
                .map_err(|e| ProtocolError::invalid_header(e.to_string()))?;
            let value = HeaderValue::from_maybe_shared(head_bytes.slice(value_start..value_end))
                .map_err(|e| ProtocolError::invalid_header(e.to_string()))?;
            headers.append(name, value);
        }
    }

    let head = RequestHead::from(builder.body(()).map_err(|e| ProtocolError::invalid_header(e.to_string()))?);
    let size = body_size_of(&head)?;
    Ok(Some((head, size)))
}

/// Derives the body delimitation from the parsed head.
fn body_size_of(head: &RequestHead) -> Result<BodySize, HttpError> {
    if !head.allows_body() {
        return Ok(BodySize::Empty);
    }

    let transfer_encoding = head.headers().get(header::TRANSFER_ENCODING);
    let content_length = head.headers().get(header::CONTENT_LENGTH);

    match (transfer_encoding, content_length) {
        (None, None) => Ok(BodySize::Empty),

        (Some(_), Some(_)) => {
            Err(ProtocolError::invalid_content_length("both transfer-encoding and content-length present").into())
        }

        (Some(value), None) => {
            // chunked must be the final transfer coding to be usable
            if is_chunked(value) {
                Ok(BodySize::Chunked)
            } else {
                Ok(BodySize::Empty)
            }
        }

        (None, Some(value)) => {
            let text = value.to_str().map_err(|_| ProtocolError::invalid_content_length("not visible ascii"))?;
            let length = text
                .trim()
                .parse::<u64>()
                .map_err(|_| ProtocolError::invalid_content_length(format!("`{text}` is not a u64")))?;
            if length == 0 { Ok(BodySize::Empty) } else { Ok(BodySize::Length(length)) }
        }
    }
}

fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|byte| *byte == b',')
        .next()
        .is_some_and(|coding| coding.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}

/// Serializes a response head, fixing up the body-delimitation headers to
/// match the announced size.
pub(crate) fn encode_head(mut head: ResponseHead, size: BodySize, dst: &mut BytesMut) -> Result<(), HttpError> {
    dst.reserve(INIT_HEAD_SIZE);

    let version = match head.version() {
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        other => {
            return Err(ProtocolError::invalid_header(format!("cannot encode a {other:?} response")).into());
        }
    };
    let status = head.status();
    write!(BufWriter(dst), "{} {} {}\r\n", version, status.as_str(), reason(status))?;

    match size {
        BodySize::Length(length) => {
            head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        BodySize::Chunked => {
            head.headers_mut().insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        BodySize::Empty => {
            head.headers_mut().insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
    }

    for (name, value) in head.headers() {
        dst.extend_from_slice(name.as_ref());
        dst.extend_from_slice(b": ");
        dst.extend_from_slice(value.as_ref());
        dst.extend_from_slice(b"\r\n");
    }
    dst.extend_from_slice(b"\r\n");
    Ok(())
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Unknown")
}
