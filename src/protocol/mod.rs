pub mod error;
pub mod headers;
pub mod request;
pub mod response;

pub use error::{ParseError, SendError};
pub use headers::{RequestHeader, ResponseHeader, CONTENT_LENGTH_CHUNKED, CONTENT_LENGTH_IDENTITY};
pub use request::Request;
pub use response::{BodyStream, Response};
