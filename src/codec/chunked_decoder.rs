//! Incremental chunked transfer decoder.
//!
//! Wire format: lowercase-or-uppercase hex size, CRLF, data, CRLF, repeated;
//! terminated by a zero-size chunk and an empty line. Chunk extensions are
//! skipped up to the CRLF; trailer lines are consumed but not parsed.

use bytes::{Buf, BytesMut};

use crate::bytesutil::unhex;
use crate::codec::error::DecodeError;
use crate::codec::PayloadItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Extension,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    EndCr,
    EndLf,
    Trailer,
    TrailerLf,
    Done,
}

#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    state: State,
    remaining: u64,
    size_digits: usize,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        ChunkedDecoder {
            state: State::Size,
            remaining: 0,
            size_digits: 0,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decodes the next body fragment. `Ok(None)` means more input is
    /// needed; `PayloadItem::Eof` is returned exactly once, after the
    /// terminating chunk.
    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<PayloadItem>, DecodeError> {
        loop {
            if self.state == State::Done {
                return Ok(Some(PayloadItem::Eof));
            }
            if src.is_empty() {
                return Ok(None);
            }

            // Data consumes a run of bytes; every other state consumes one.
            if self.state == State::Data {
                let take = self.remaining.min(src.len() as u64) as usize;
                let chunk = src.split_to(take).freeze();
                self.remaining -= take as u64;
                if self.remaining == 0 {
                    self.state = State::DataCr;
                }
                return Ok(Some(PayloadItem::Chunk(chunk)));
            }

            let c = src.get_u8();
            self.state = match self.state {
                State::Size => match unhex(c) {
                    Some(d) => {
                        self.remaining = self
                            .remaining
                            .checked_mul(16)
                            .and_then(|v| v.checked_add(u64::from(d)))
                            .ok_or(DecodeError::InvalidChunkSize)?;
                        self.size_digits += 1;
                        State::Size
                    }
                    None => {
                        if self.size_digits == 0 {
                            return Err(DecodeError::InvalidChunkSize);
                        }
                        match c {
                            b';' | b' ' | b'\t' => State::Extension,
                            b'\r' => State::SizeLf,
                            _ => return Err(DecodeError::InvalidChunkSize),
                        }
                    }
                },
                State::Extension => match c {
                    b'\r' => State::SizeLf,
                    b'\n' => {
                        return Err(DecodeError::InvalidChunkFraming {
                            expected: "CR before LF in chunk extension",
                        })
                    }
                    _ => State::Extension,
                },
                State::SizeLf => match c {
                    b'\n' => {
                        if self.remaining == 0 {
                            State::EndCr
                        } else {
                            State::Data
                        }
                    }
                    _ => {
                        return Err(DecodeError::InvalidChunkFraming {
                            expected: "LF after chunk size",
                        })
                    }
                },
                State::Data => unreachable!("handled above"),
                State::DataCr => match c {
                    b'\r' => State::DataLf,
                    _ => {
                        return Err(DecodeError::InvalidChunkFraming {
                            expected: "CR after chunk data",
                        })
                    }
                },
                State::DataLf => match c {
                    b'\n' => {
                        self.size_digits = 0;
                        State::Size
                    }
                    _ => {
                        return Err(DecodeError::InvalidChunkFraming {
                            expected: "LF after chunk data",
                        })
                    }
                },
                State::EndCr => match c {
                    b'\r' => State::EndLf,
                    _ => State::Trailer,
                },
                State::EndLf => match c {
                    b'\n' => State::Done,
                    _ => {
                        return Err(DecodeError::InvalidChunkFraming {
                            expected: "LF after final chunk",
                        })
                    }
                },
                State::Trailer => match c {
                    b'\r' => State::TrailerLf,
                    _ => State::Trailer,
                },
                State::TrailerLf => match c {
                    b'\n' => State::EndCr,
                    _ => {
                        return Err(DecodeError::InvalidChunkFraming {
                            expected: "LF after trailer line",
                        })
                    }
                },
                State::Done => unreachable!("handled above"),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(decoder: &mut ChunkedDecoder, src: &mut BytesMut) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            match decoder.decode(src).unwrap() {
                Some(PayloadItem::Chunk(b)) => body.extend_from_slice(&b),
                Some(PayloadItem::Eof) => return body,
                None => panic!("incomplete input"),
            }
        }
    }

    #[test]
    fn two_chunks_and_terminator() {
        let mut src = BytesMut::from(&b"3\r\nabc\r\n5\r\n12345\r\n0\r\n\r\ntrail"[..]);
        let mut dec = ChunkedDecoder::new();
        assert_eq!(drain(&mut dec, &mut src), b"abc12345");
        assert!(dec.is_done());
        assert_eq!(&src[..], b"trail");
    }

    #[test]
    fn uppercase_hex_sizes() {
        let mut src = BytesMut::from(&b"A\r\n0123456789\r\n0\r\n\r\n"[..]);
        let mut dec = ChunkedDecoder::new();
        assert_eq!(drain(&mut dec, &mut src), b"0123456789");
    }

    #[test]
    fn extensions_are_skipped() {
        let mut src = BytesMut::from(&b"3;name=val\r\nabc\r\n0\r\n\r\n"[..]);
        let mut dec = ChunkedDecoder::new();
        assert_eq!(drain(&mut dec, &mut src), b"abc");
    }

    #[test]
    fn trailers_are_consumed() {
        let mut src = BytesMut::from(&b"1\r\nx\r\n0\r\nX-Trailer: v\r\n\r\n"[..]);
        let mut dec = ChunkedDecoder::new();
        assert_eq!(drain(&mut dec, &mut src), b"x");
    }

    #[test]
    fn incremental_feeding() {
        let wire = b"3\r\nabc\r\n0\r\n\r\n";
        let mut dec = ChunkedDecoder::new();
        let mut src = BytesMut::new();
        let mut body = Vec::new();
        for &byte in wire.iter() {
            src.extend_from_slice(&[byte]);
            while let Some(item) = dec.decode(&mut src).unwrap() {
                match item {
                    PayloadItem::Chunk(b) => body.extend_from_slice(&b),
                    PayloadItem::Eof => {
                        assert_eq!(body, b"abc");
                        return;
                    }
                }
            }
        }
        panic!("terminator never decoded");
    }

    #[test]
    fn rejects_empty_size() {
        let mut src = BytesMut::from(&b"\r\nabc"[..]);
        let mut dec = ChunkedDecoder::new();
        assert!(dec.decode(&mut src).is_err());
    }

    #[test]
    fn rejects_bad_framing() {
        let mut src = BytesMut::from(&b"3\r\nabcXX"[..]);
        let mut dec = ChunkedDecoder::new();
        let item = dec.decode(&mut src).unwrap().unwrap();
        assert_eq!(item.as_bytes().map(|b| &b[..]), Some(&b"abc"[..]));
        assert!(dec.decode(&mut src).is_err());
    }
}
