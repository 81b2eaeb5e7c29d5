//! Request head handling.
//!
//! Wraps `http::Request<()>` with the pieces of request metadata the engine
//! and handlers care about: body expectations, expect-continue negotiation,
//! and parsed query parameters.

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version, header};

/// The head of an incoming request: method, target, version and headers,
/// without a body attached yet.
#[derive(Debug)]
pub struct RequestHead {
    inner: Request<()>,
}

impl RequestHead {
    /// Attaches a body, turning the head into a full `http::Request`.
    pub fn body<T>(self, body: T) -> Request<T> {
        self.inner.map(|()| body)
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Query parameters parsed from the request target, in document order.
    ///
    /// Repeated keys are preserved; an unparsable query yields no pairs.
    pub fn query_params(&self) -> Vec<(String, String)> {
        query_params(self.uri())
    }

    /// Whether the peer asked for an interim `100 Continue` before sending
    /// the body.
    pub fn expects_continue(&self) -> bool {
        match self.headers().get(header::EXPECT) {
            Some(value) => {
                let bytes = value.as_bytes();
                bytes.len() >= 4 && bytes[..4].eq_ignore_ascii_case(b"100-")
            }
            None => false,
        }
    }

    /// Whether a body can accompany this request at all.
    ///
    /// GET, HEAD, DELETE, OPTIONS and CONNECT requests are treated as
    /// body-less regardless of their headers.
    pub fn allows_body(&self) -> bool {
        !matches!(
            self.method(),
            &Method::GET | &Method::HEAD | &Method::DELETE | &Method::OPTIONS | &Method::CONNECT
        )
    }
}

impl From<Parts> for RequestHead {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHead {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// Query parameters of any URI, in document order. Handlers holding a full
/// `http::Request` can call this directly on its URI.
pub fn query_params(uri: &Uri) -> Vec<(String, String)> {
    uri.query()
        .map(|query| serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_default())
        .unwrap_or_default()
}
