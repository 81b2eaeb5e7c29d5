//! Protocol types shared by the codec, the connection engine and handlers.
//!
//! - [`Message`], [`PayloadItem`], [`BodySize`]: the frame vocabulary flowing
//!   through the codec,
//! - [`RequestHead`] / [`ResponseHead`]: message heads before a body is
//!   attached,
//! - [`body`]: the bounded body channel and the request/response body types,
//! - [`HttpError`] and friends: the per-connection error taxonomy.

mod message;
pub use message::BodySize;
pub use message::Message;
pub use message::PayloadItem;

mod request;
pub use request::RequestHead;
pub use request::query_params;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HandlerError;
pub use error::HttpError;
pub use error::ProtocolError;
pub use error::TransportError;

pub mod body;
