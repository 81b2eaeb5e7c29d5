//! Response head handling.

use http::Response;

/// The head of an outgoing response before a body is attached, represented
/// as `http::Response<()>`.
pub type ResponseHead = Response<()>;
