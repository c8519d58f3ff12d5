use thiserror::Error;

/// Errors produced while parsing request or response messages. Any of these
/// closes the connection; there is no partial-message resync.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid request line: {reason}")]
    InvalidRequestLine { reason: &'static str },

    #[error("invalid status line")]
    InvalidStatusLine,

    #[error("header line has no colon")]
    MissingColon,

    #[error("invalid Content-Length value")]
    InvalidContentLength,

    #[error("missing required Host header")]
    MissingHost,

    #[error("missing Content-Type for POST request")]
    MissingContentType,

    #[error("missing Content-Length for POST request")]
    MissingContentLength,

    #[error("cannot parse POST args: {reason}")]
    PostArgs { reason: &'static str },
}

/// Errors produced while serializing messages.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("missing required request URI")]
    MissingRequestUri,

    #[error("missing required Host header")]
    MissingHost,

    #[error("missing Content-Type for POST request")]
    MissingContentType,

    #[error("non-empty body on non-POST request")]
    UnexpectedBody,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
