//! Connection handling: the per-connection engine and its collaborators.
//!
//! - [`HttpConnection`]: drives one accepted connection through decode →
//!   dispatch → respond, owning the body channel lifecycle and the explicit
//!   [`ConnectionState`],
//! - [`ContinueToken`]: handler-side trigger for the interim `100 Continue`
//!   response,
//! - the response writer (internal): the head/body/terminal state machine.

mod conn;
mod expect;
mod writer;

pub use conn::{ConnectionConfig, ConnectionState, HttpConnection};
pub use expect::ContinueToken;
