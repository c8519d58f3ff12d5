use snafu::Snafu;

use crate::protocol::ParseError;

/// Errors raised while decoding wire bytes into messages. All of them close
/// the connection without a reply.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("header block too large: {current_size} exceeds {max_size}"))]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[snafu(display("invalid header: {source}"), context(false))]
    Header { source: ParseError },

    #[snafu(display("request body too large: {current_size} exceeds {max_size}"))]
    TooLargeBody { current_size: u64, max_size: u64 },

    #[snafu(display("non-GET request rejected"))]
    NonGetRequest,

    #[snafu(display("invalid chunk size"))]
    InvalidChunkSize,

    #[snafu(display("invalid chunk framing: expected {expected}"))]
    InvalidChunkFraming { expected: &'static str },

    #[snafu(display("unexpected end of stream"))]
    UnexpectedEof,

    #[snafu(display("io error: {source}"), context(false))]
    Io { source: std::io::Error },
}
