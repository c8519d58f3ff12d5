//! Request and response header blocks.
//!
//! Well-known fields (`Host`, `Content-Type`, `Content-Length`,
//! `Transfer-Encoding`, `Connection`, `User-Agent`, `Server`, `Cookie`,
//! `Set-Cookie`) are parsed into owned buffers; everything else lands in an
//! ordered KV sequence keyed by canonical form. `Content-Length` and
//! `Transfer-Encoding` are never stored as plain headers: body framing is
//! carried by the content length sentinel and re-emitted at serialize time.
//!
//! Parsing is incremental: `parse` returns `Ok(None)` until the buffer holds
//! a complete header block, and may be retried with more data.

use bytes::BytesMut;

use crate::bytesutil::{append_uint, normalize_header_key, parse_uint, parse_uint_prefix};
use crate::cookie::{append_request_cookies, parse_request_cookies, Cookie};
use crate::kv::{KvList, KvPair};
use crate::protocol::error::{ParseError, SendError};
use crate::status;

/// Content length sentinel: body is chunked.
pub const CONTENT_LENGTH_CHUNKED: i64 = -1;
/// Content length sentinel: identity body, read until close.
pub const CONTENT_LENGTH_IDENTITY: i64 = -2;

pub(crate) const DEFAULT_CONTENT_TYPE: &[u8] = b"text/plain; charset=utf-8";
pub(crate) const POST_ARGS_CONTENT_TYPE: &[u8] = b"application/x-www-form-urlencoded";

/// Locates the next line starting at `pos`. Returns `(start, end, next)`
/// where `buf[start..end]` is the line without its terminator. Accepts both
/// CRLF and bare LF. `None` means the terminator has not arrived yet.
fn next_line(buf: &[u8], pos: usize) -> Option<(usize, usize, usize)> {
    let nl = memchr::memchr(b'\n', &buf[pos..])? + pos;
    let mut end = nl;
    if end > pos && buf[end - 1] == b'\r' {
        end -= 1;
    }
    Some((pos, end, nl + 1))
}

/// One parsed header line; the key is normalized in place inside `buf`.
fn parse_header_line<'a>(
    buf: &'a mut [u8],
    start: usize,
    end: usize,
) -> Result<(&'a [u8], &'a [u8]), ParseError> {
    let line = &mut buf[start..end];
    let colon = memchr::memchr(b':', line).ok_or(ParseError::MissingColon)?;
    let (key, rest) = line.split_at_mut(colon);
    normalize_header_key(key);
    let mut value = &rest[1..];
    while let Some((&b' ', tail)) = value.split_first() {
        value = tail;
    }
    Ok((key, value))
}

fn write_header_line(dst: &mut BytesMut, key: &[u8], value: &[u8]) {
    dst.extend_from_slice(key);
    dst.extend_from_slice(b": ");
    dst.extend_from_slice(value);
    dst.extend_from_slice(b"\r\n");
}

fn assign(buf: &mut BytesMut, value: &[u8]) {
    buf.clear();
    buf.extend_from_slice(value);
}

/// HTTP request header.
#[derive(Debug, Default)]
pub struct RequestHeader {
    method: BytesMut,
    request_uri: BytesMut,
    content_length: i64,
    host: BytesMut,
    content_type: BytesMut,
    user_agent: BytesMut,
    connection_close: bool,

    other: KvList,
    cookies: KvList,
    buf_kv: KvPair,
}

impl RequestHeader {
    pub fn method(&self) -> &[u8] {
        if self.method.is_empty() {
            b"GET"
        } else {
            &self.method
        }
    }

    pub fn set_method(&mut self, method: &[u8]) {
        assign(&mut self.method, method);
    }

    pub fn is_get(&self) -> bool {
        self.method() == b"GET"
    }

    pub fn is_post(&self) -> bool {
        self.method() == b"POST"
    }

    pub fn is_head(&self) -> bool {
        self.method() == b"HEAD"
    }

    pub fn is_put(&self) -> bool {
        self.method() == b"PUT"
    }

    pub fn request_uri(&self) -> &[u8] {
        &self.request_uri
    }

    pub fn set_request_uri(&mut self, uri: &[u8]) {
        assign(&mut self.request_uri, uri);
    }

    pub fn host(&self) -> &[u8] {
        &self.host
    }

    pub fn set_host(&mut self, host: &[u8]) {
        assign(&mut self.host, host);
    }

    pub fn content_type(&self) -> &[u8] {
        &self.content_type
    }

    pub fn set_content_type(&mut self, content_type: &[u8]) {
        assign(&mut self.content_type, content_type);
    }

    pub fn user_agent(&self) -> &[u8] {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: &[u8]) {
        assign(&mut self.user_agent, user_agent);
    }

    pub fn referer(&self) -> &[u8] {
        self.other.peek(b"Referer").unwrap_or(b"")
    }

    /// Content length of the body. Negative values are the chunked and
    /// identity sentinels.
    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn set_content_length(&mut self, content_length: i64) {
        self.content_length = content_length;
    }

    pub fn connection_close(&self) -> bool {
        self.connection_close
    }

    pub fn set_connection_close(&mut self) {
        self.connection_close = true;
    }

    /// Sets a header. The key is normalized to canonical form; well-known
    /// keys update their dedicated fields, framing keys are ignored.
    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.buf_kv.key.clear();
        self.buf_kv.key.extend_from_slice(key);
        normalize_header_key(&mut self.buf_kv.key);
        let key = std::mem::take(&mut self.buf_kv.key);
        self.set_canonical(&key, value);
        self.buf_kv.key = key;
    }

    fn set_canonical(&mut self, key: &[u8], value: &[u8]) {
        match key {
            b"Host" => assign(&mut self.host, value),
            b"Content-Type" => assign(&mut self.content_type, value),
            b"User-Agent" => assign(&mut self.user_agent, value),
            // framing headers are computed from body semantics
            b"Content-Length" | b"Transfer-Encoding" => {}
            b"Connection" => {
                if value == b"close" {
                    self.connection_close = true;
                }
            }
            b"Cookie" => parse_request_cookies(&mut self.cookies, value),
            _ => self.other.set(key, value),
        }
    }

    /// Returns the value for `key`. The key is normalized into a scratch
    /// buffer, hence `&mut self`; the returned borrow is valid until the
    /// next call on this header.
    pub fn peek(&mut self, key: &[u8]) -> Option<&[u8]> {
        self.buf_kv.key.clear();
        self.buf_kv.key.extend_from_slice(key);
        normalize_header_key(&mut self.buf_kv.key);
        match &self.buf_kv.key[..] {
            b"Host" => Some(&self.host[..]),
            b"Content-Type" => Some(&self.content_type[..]),
            b"User-Agent" => Some(&self.user_agent[..]),
            _ => self.other.peek(&self.buf_kv.key),
        }
        .filter(|v| !v.is_empty())
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.buf_kv.key.clear();
        self.buf_kv.key.extend_from_slice(key);
        normalize_header_key(&mut self.buf_kv.key);
        self.other.del(&self.buf_kv.key)
    }

    /// Calls `f` for every header in serialization order. Borrows do not
    /// escape the callback.
    pub fn visit_all(&self, mut f: impl FnMut(&[u8], &[u8])) {
        if !self.user_agent.is_empty() {
            f(b"User-Agent", &self.user_agent);
        }
        if !self.host.is_empty() {
            f(b"Host", &self.host);
        }
        if !self.content_type.is_empty() {
            f(b"Content-Type", &self.content_type);
        }
        self.other.visit(&mut f);
    }

    pub fn set_cookie(&mut self, key: &[u8], value: &[u8]) {
        self.cookies.set(key, value);
    }

    pub fn peek_cookie(&self, key: &[u8]) -> Option<&[u8]> {
        self.cookies.peek(key)
    }

    pub fn visit_all_cookies(&self, mut f: impl FnMut(&[u8], &[u8])) {
        self.cookies.visit(&mut f);
    }

    pub fn clear(&mut self) {
        self.method.clear();
        self.request_uri.clear();
        self.content_length = 0;
        self.host.clear();
        self.content_type.clear();
        self.user_agent.clear();
        self.connection_close = false;
        self.other.clear();
        self.cookies.clear();
    }

    pub fn copy_to(&self, dst: &mut RequestHeader) {
        dst.clear();
        dst.method.extend_from_slice(&self.method);
        dst.request_uri.extend_from_slice(&self.request_uri);
        dst.content_length = self.content_length;
        dst.host.extend_from_slice(&self.host);
        dst.content_type.extend_from_slice(&self.content_type);
        dst.user_agent.extend_from_slice(&self.user_agent);
        dst.connection_close = self.connection_close;
        dst.other.copy_from(&self.other);
        dst.cookies.copy_from(&self.cookies);
    }

    /// Incrementally parses a request header block from `buf`. Returns the
    /// number of bytes consumed, or `Ok(None)` when more input is needed.
    /// Header keys are normalized in place.
    pub fn parse(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ParseError> {
        self.clear();

        // skip empty lines before the request line
        let mut pos = 0;
        let (start, end) = loop {
            match next_line(buf, pos) {
                None => return Ok(None),
                Some((start, end, next)) => {
                    pos = next;
                    if end > start {
                        break (start, end);
                    }
                }
            }
        };

        {
            let line = &buf[start..end];
            let sp = memchr::memchr(b' ', line).ok_or(ParseError::InvalidRequestLine {
                reason: "missing method",
            })?;
            if sp == 0 {
                return Err(ParseError::InvalidRequestLine {
                    reason: "missing method",
                });
            }
            self.method.extend_from_slice(&line[..sp]);
            let rest = &line[sp + 1..];
            let (uri, proto) = match memchr::memchr(b' ', rest) {
                Some(i) => (&rest[..i], &rest[i + 1..]),
                None => (rest, &rest[rest.len()..]),
            };
            if uri.is_empty() {
                return Err(ParseError::InvalidRequestLine {
                    reason: "empty request URI",
                });
            }
            self.request_uri.extend_from_slice(uri);
            if proto != b"HTTP/1.1" {
                self.connection_close = true;
            }
        }

        self.content_length = CONTENT_LENGTH_IDENTITY;
        loop {
            let (start, end, next) = match next_line(buf, pos) {
                None => return Ok(None),
                Some(found) => found,
            };
            pos = next;
            if start == end {
                break;
            }
            let (key, value) = parse_header_line(buf, start, end)?;
            match key {
                b"Host" => assign(&mut self.host, value),
                b"Content-Type" => assign(&mut self.content_type, value),
                b"User-Agent" => assign(&mut self.user_agent, value),
                b"Content-Length" => {
                    if self.content_length != CONTENT_LENGTH_CHUNKED {
                        let n = parse_uint(value).ok_or(ParseError::InvalidContentLength)?;
                        self.content_length = n as i64;
                    }
                }
                b"Transfer-Encoding" => {
                    if value.eq_ignore_ascii_case(b"chunked") {
                        self.content_length = CONTENT_LENGTH_CHUNKED;
                    }
                }
                b"Connection" => {
                    if value == b"close" {
                        self.connection_close = true;
                    }
                }
                b"Cookie" => parse_request_cookies(&mut self.cookies, value),
                _ => self.other.set(key, value),
            }
        }

        if self.host.is_empty() {
            return Err(ParseError::MissingHost);
        }
        if self.is_post() {
            if self.content_type.is_empty() {
                return Err(ParseError::MissingContentType);
            }
            if self.content_length == CONTENT_LENGTH_IDENTITY {
                return Err(ParseError::MissingContentLength);
            }
        } else {
            self.content_length = 0;
        }
        Ok(Some(pos))
    }

    /// Serializes the header block. `body_len` becomes the emitted
    /// `Content-Length` for POST requests.
    pub fn write_to(
        &self,
        dst: &mut BytesMut,
        body_len: usize,
        default_user_agent: &[u8],
        scratch: &mut BytesMut,
    ) -> Result<(), SendError> {
        dst.extend_from_slice(self.method());
        dst.extend_from_slice(b" ");
        if self.request_uri.is_empty() {
            return Err(SendError::MissingRequestUri);
        }
        dst.extend_from_slice(&self.request_uri);
        dst.extend_from_slice(b" HTTP/1.1\r\n");

        let user_agent = if self.user_agent.is_empty() {
            default_user_agent
        } else {
            &self.user_agent[..]
        };
        write_header_line(dst, b"User-Agent", user_agent);

        if self.host.is_empty() {
            return Err(SendError::MissingHost);
        }
        write_header_line(dst, b"Host", &self.host);

        if self.is_post() {
            if self.content_type.is_empty() {
                return Err(SendError::MissingContentType);
            }
            write_header_line(dst, b"Content-Type", &self.content_type);
            dst.extend_from_slice(b"Content-Length: ");
            append_uint(dst, body_len as u64);
            dst.extend_from_slice(b"\r\n");
        }

        self.other.visit(|k, v| write_header_line(dst, k, v));

        if !self.cookies.is_empty() {
            scratch.clear();
            append_request_cookies(scratch, &self.cookies);
            write_header_line(dst, b"Cookie", scratch);
        }

        if self.connection_close {
            write_header_line(dst, b"Connection", b"close");
        }

        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// HTTP response header.
#[derive(Debug)]
pub struct ResponseHeader {
    status_code: u16,
    content_length: i64,
    content_type: BytesMut,
    server: BytesMut,
    connection_close: bool,

    other: KvList,
    /// One entry per `Set-Cookie`: key is the cookie name, value the full
    /// serialized header value.
    cookies: KvList,
    buf_kv: KvPair,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        ResponseHeader {
            status_code: status::OK,
            content_length: 0,
            content_type: BytesMut::new(),
            server: BytesMut::new(),
            connection_close: false,
            other: KvList::default(),
            cookies: KvList::default(),
            buf_kv: KvPair::default(),
        }
    }
}

impl ResponseHeader {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.status_code = code;
    }

    pub fn content_type(&self) -> &[u8] {
        if self.content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            &self.content_type
        }
    }

    pub fn set_content_type(&mut self, content_type: &[u8]) {
        assign(&mut self.content_type, content_type);
    }

    pub fn server(&self) -> &[u8] {
        &self.server
    }

    pub fn set_server(&mut self, server: &[u8]) {
        assign(&mut self.server, server);
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn set_content_length(&mut self, content_length: i64) {
        self.content_length = content_length;
    }

    pub fn connection_close(&self) -> bool {
        self.connection_close
    }

    pub fn set_connection_close(&mut self) {
        self.connection_close = true;
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.buf_kv.key.clear();
        self.buf_kv.key.extend_from_slice(key);
        normalize_header_key(&mut self.buf_kv.key);
        let key = std::mem::take(&mut self.buf_kv.key);
        self.set_canonical(&key, value);
        self.buf_kv.key = key;
    }

    fn set_canonical(&mut self, key: &[u8], value: &[u8]) {
        match key {
            b"Content-Type" => assign(&mut self.content_type, value),
            b"Server" => assign(&mut self.server, value),
            // framing and Date are computed at serialize time
            b"Content-Length" | b"Transfer-Encoding" | b"Date" => {}
            b"Connection" => {
                if value == b"close" {
                    self.connection_close = true;
                }
            }
            b"Set-Cookie" => self.store_cookie_line(value),
            _ => self.other.set(key, value),
        }
    }

    fn store_cookie_line(&mut self, line: &[u8]) {
        let name_end = memchr::memchr(b'=', line).unwrap_or(line.len());
        let name = line[..name_end].to_vec();
        self.cookies.set(&name, line);
    }

    /// Returns the value for `key`; see [`RequestHeader::peek`] for the
    /// borrow discipline.
    pub fn peek(&mut self, key: &[u8]) -> Option<&[u8]> {
        self.buf_kv.key.clear();
        self.buf_kv.key.extend_from_slice(key);
        normalize_header_key(&mut self.buf_kv.key);
        match &self.buf_kv.key[..] {
            b"Content-Type" => Some(&self.content_type[..]),
            b"Server" => Some(&self.server[..]),
            b"Connection" => {
                if self.connection_close {
                    Some(&b"close"[..])
                } else {
                    None
                }
            }
            _ => self.other.peek(&self.buf_kv.key),
        }
        .filter(|v| !v.is_empty())
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.buf_kv.key.clear();
        self.buf_kv.key.extend_from_slice(key);
        normalize_header_key(&mut self.buf_kv.key);
        self.other.del(&self.buf_kv.key)
    }

    pub fn visit_all(&self, mut f: impl FnMut(&[u8], &[u8])) {
        if !self.server.is_empty() {
            f(b"Server", &self.server);
        }
        if !self.content_type.is_empty() {
            f(b"Content-Type", &self.content_type);
        }
        self.other.visit(&mut f);
    }

    /// Adds a `Set-Cookie` entry; one line is emitted per cookie.
    pub fn set_cookie(&mut self, cookie: &Cookie) {
        self.buf_kv.value.clear();
        cookie.append_to(&mut self.buf_kv.value);
        let line = std::mem::take(&mut self.buf_kv.value);
        self.cookies.set(cookie.key(), &line);
        self.buf_kv.value = line;
    }

    /// Parses the stored `Set-Cookie` line for `key` into `cookie`.
    pub fn get_cookie(&self, key: &[u8], cookie: &mut Cookie) -> bool {
        match self.cookies.peek(key) {
            Some(line) => cookie.parse(line).is_ok(),
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.status_code = status::OK;
        self.content_length = 0;
        self.content_type.clear();
        self.server.clear();
        self.connection_close = false;
        self.other.clear();
        self.cookies.clear();
    }

    pub fn copy_to(&self, dst: &mut ResponseHeader) {
        dst.clear();
        dst.status_code = self.status_code;
        dst.content_length = self.content_length;
        dst.content_type.extend_from_slice(&self.content_type);
        dst.server.extend_from_slice(&self.server);
        dst.connection_close = self.connection_close;
        dst.other.copy_from(&self.other);
        dst.cookies.copy_from(&self.cookies);
    }

    /// Incrementally parses a response header block; same contract as
    /// [`RequestHeader::parse`].
    pub fn parse(&mut self, buf: &mut [u8]) -> Result<Option<usize>, ParseError> {
        self.clear();

        let mut pos = 0;
        let (start, end) = loop {
            match next_line(buf, pos) {
                None => return Ok(None),
                Some((start, end, next)) => {
                    pos = next;
                    if end > start {
                        break (start, end);
                    }
                }
            }
        };

        {
            let line = &buf[start..end];
            let sp = memchr::memchr(b' ', line).ok_or(ParseError::InvalidStatusLine)?;
            if &line[..sp] != b"HTTP/1.1" {
                self.connection_close = true;
            }
            let rest = &line[sp + 1..];
            let (code, consumed) =
                parse_uint_prefix(rest).ok_or(ParseError::InvalidStatusLine)?;
            if consumed < rest.len() && rest[consumed] != b' ' {
                return Err(ParseError::InvalidStatusLine);
            }
            if code > u16::MAX as u64 {
                return Err(ParseError::InvalidStatusLine);
            }
            self.status_code = code as u16;
        }

        self.content_length = CONTENT_LENGTH_IDENTITY;
        loop {
            let (start, end, next) = match next_line(buf, pos) {
                None => return Ok(None),
                Some(found) => found,
            };
            pos = next;
            if start == end {
                break;
            }
            let (key, value) = parse_header_line(buf, start, end)?;
            match key {
                b"Content-Type" => assign(&mut self.content_type, value),
                b"Server" => assign(&mut self.server, value),
                b"Content-Length" => {
                    if self.content_length != CONTENT_LENGTH_CHUNKED {
                        let n = parse_uint(value).ok_or(ParseError::InvalidContentLength)?;
                        self.content_length = n as i64;
                    }
                }
                b"Transfer-Encoding" => {
                    if value.eq_ignore_ascii_case(b"chunked") {
                        self.content_length = CONTENT_LENGTH_CHUNKED;
                    }
                }
                b"Connection" => {
                    if value == b"close" {
                        self.connection_close = true;
                    }
                }
                b"Set-Cookie" => self.store_cookie_line(value),
                _ => self.other.set(key, value),
            }
        }

        Ok(Some(pos))
    }

    /// Serializes the header block in deterministic order. `body_len` is the
    /// fixed body size, or [`CONTENT_LENGTH_CHUNKED`] for a chunked body.
    pub fn write_to(
        &self,
        dst: &mut BytesMut,
        body_len: i64,
        default_server_name: &[u8],
        date: &[u8],
    ) {
        dst.extend_from_slice(&status::status_line(self.status_code));

        let server = if self.server.is_empty() {
            default_server_name
        } else {
            &self.server[..]
        };
        write_header_line(dst, b"Server", server);
        write_header_line(dst, b"Date", date);
        write_header_line(dst, b"Content-Type", self.content_type());

        if body_len >= 0 {
            dst.extend_from_slice(b"Content-Length: ");
            append_uint(dst, body_len as u64);
            dst.extend_from_slice(b"\r\n");
        } else {
            write_header_line(dst, b"Transfer-Encoding", b"chunked");
        }

        self.other.visit(|k, v| write_header_line(dst, k, v));
        self.cookies.visit(|_, line| write_header_line(dst, b"Set-Cookie", line));

        if self.connection_close {
            write_header_line(dst, b"Connection", b"close");
        }
        dst.extend_from_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_request(input: &[u8]) -> Result<(RequestHeader, usize), ParseError> {
        let mut h = RequestHeader::default();
        let mut buf = input.to_vec();
        match h.parse(&mut buf)? {
            Some(n) => Ok((h, n)),
            None => panic!("incomplete header block: {:?}", input),
        }
    }

    fn parse_response(input: &[u8]) -> Result<(ResponseHeader, usize), ParseError> {
        let mut h = ResponseHeader::default();
        let mut buf = input.to_vec();
        match h.parse(&mut buf)? {
            Some(n) => Ok((h, n)),
            None => panic!("incomplete header block: {:?}", input),
        }
    }

    #[test]
    fn parse_simple_get() {
        let (mut h, n) =
            parse_request(b"GET /foo?bar=baz HTTP/1.1\r\nHost: google.com\r\nAccept: */*\r\n\r\ntail")
                .unwrap();
        assert_eq!(n, b"GET /foo?bar=baz HTTP/1.1\r\nHost: google.com\r\nAccept: */*\r\n\r\n".len());
        assert_eq!(h.method(), b"GET");
        assert_eq!(h.request_uri(), b"/foo?bar=baz");
        assert_eq!(h.host(), b"google.com");
        assert_eq!(h.content_length(), 0);
        assert!(!h.connection_close());
        assert_eq!(h.peek(b"accept"), Some(&b"*/*"[..]));
    }

    #[test]
    fn incremental_parse_eventually_succeeds() {
        let full = b"GET / HTTP/1.1\r\nHost: x\r\nX-Foo: bar\r\n\r\n";
        let mut h = RequestHeader::default();
        for n in 0..full.len() {
            let mut partial = full[..n].to_vec();
            assert!(matches!(h.parse(&mut partial), Ok(None)), "prefix {}", n);
        }
        let mut buf = full.to_vec();
        assert_eq!(h.parse(&mut buf).unwrap(), Some(full.len()));
    }

    #[test]
    fn keys_are_canonicalized() {
        let (mut h, _) =
            parse_request(b"GET / HTTP/1.1\r\nHOST: x\r\nx-cUsToM-hEaDeR: v\r\n\r\n").unwrap();
        assert_eq!(h.host(), b"x");
        let mut seen = Vec::new();
        h.visit_all(|k, _| seen.push(k.to_vec()));
        assert!(seen.contains(&b"X-Custom-Header".to_vec()));
        assert_eq!(h.peek(b"X-CUSTOM-HEADER"), Some(&b"v"[..]));
    }

    #[test]
    fn bare_lf_line_endings() {
        // indoc keeps these LF-only on purpose
        let wire = indoc::indoc! {"
            GET /lf HTTP/1.1
            Host: x
            X-Plain: yes

        "};
        let (mut h, _) = parse_request(wire.as_bytes()).unwrap();
        assert_eq!(h.host(), b"x");
        assert_eq!(h.request_uri(), b"/lf");
        assert_eq!(h.peek(b"X-Plain"), Some(&b"yes"[..]));
    }

    #[test]
    fn missing_host_is_an_error() {
        assert!(matches!(
            parse_request(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n"),
            Err(ParseError::MissingHost)
        ));
    }

    #[test]
    fn post_requires_content_type_and_length() {
        assert!(matches!(
            parse_request(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 3\r\n\r\n"),
            Err(ParseError::MissingContentType)
        ));
        assert!(matches!(
            parse_request(b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: a/b\r\n\r\n"),
            Err(ParseError::MissingContentLength)
        ));
        let (h, _) = parse_request(
            b"POST / HTTP/1.1\r\nHost: x\r\nContent-Type: a/b\r\nContent-Length: 3\r\n\r\n",
        )
        .unwrap();
        assert_eq!(h.content_length(), 3);
    }

    #[test]
    fn chunked_wins_over_content_length() {
        let (h, _) = parse_response(
            b"HTTP/1.1 200 OK\r\nContent-Type: foo/bar\r\nContent-Length: 123\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .unwrap();
        assert_eq!(h.content_length(), CONTENT_LENGTH_CHUNKED);

        // reversed order
        let (h, _) = parse_response(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nContent-Length: 123\r\n\r\n",
        )
        .unwrap();
        assert_eq!(h.content_length(), CONTENT_LENGTH_CHUNKED);
    }

    #[test]
    fn duplicate_headers_last_wins() {
        let (h, _) = parse_response(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Length: 9\r\nContent-Type: a/b\r\nContent-Type: c/d\r\n\r\n",
        )
        .unwrap();
        assert_eq!(h.content_length(), 9);
        assert_eq!(h.content_type(), b"c/d");
    }

    #[test]
    fn response_without_framing_is_identity() {
        let (h, _) = parse_response(b"HTTP/1.1 200 OK\r\nContent-Type: a/b\r\n\r\n").unwrap();
        assert_eq!(h.content_length(), CONTENT_LENGTH_IDENTITY);
    }

    #[test]
    fn connection_close_exact_match() {
        let (h, _) =
            parse_request(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n").unwrap();
        assert!(h.connection_close());
        let (h, _) =
            parse_request(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n").unwrap();
        assert!(!h.connection_close());
        let (h, _) = parse_request(
            b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close, keep-alive\r\n\r\n",
        )
        .unwrap();
        assert!(!h.connection_close());
    }

    #[test]
    fn non_http11_protocol_forces_close() {
        let (h, _) = parse_request(b"GET / HTTP/1.0\r\nHost: x\r\n\r\n").unwrap();
        assert!(h.connection_close());
        let (h, _) = parse_response(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n").unwrap();
        assert!(h.connection_close());
    }

    #[test]
    fn colonless_line_is_an_error() {
        assert!(matches!(
            parse_request(b"GET / HTTP/1.1\r\nHost: x\r\ngarbage line\r\n\r\n"),
            Err(ParseError::MissingColon)
        ));
    }

    #[test]
    fn request_cookies_parsed() {
        let (h, _) =
            parse_request(b"GET / HTTP/1.1\r\nHost: x\r\nCookie: a=b; c=d\r\n\r\n").unwrap();
        assert_eq!(h.peek_cookie(b"a"), Some(&b"b"[..]));
        assert_eq!(h.peek_cookie(b"c"), Some(&b"d"[..]));
    }

    #[test]
    fn request_write_order() {
        let mut h = RequestHeader::default();
        h.set_method(b"POST");
        h.set_request_uri(b"/submit");
        h.set_host(b"example.com");
        h.set_content_type(b"a/b");
        h.set(b"x-extra", b"1");
        h.set_cookie(b"s", b"t");

        let mut dst = BytesMut::new();
        let mut scratch = BytesMut::new();
        h.write_to(&mut dst, 5, b"test-agent", &mut scratch).unwrap();
        assert_eq!(
            &dst[..],
            &b"POST /submit HTTP/1.1\r\nUser-Agent: test-agent\r\nHost: example.com\r\nContent-Type: a/b\r\nContent-Length: 5\r\nX-Extra: 1\r\nCookie: s=t\r\n\r\n"[..]
        );
    }

    #[test]
    fn request_write_requires_host() {
        let mut h = RequestHeader::default();
        h.set_request_uri(b"/");
        let mut dst = BytesMut::new();
        let mut scratch = BytesMut::new();
        assert!(matches!(
            h.write_to(&mut dst, 0, b"ua", &mut scratch),
            Err(SendError::MissingHost)
        ));
    }

    #[test]
    fn response_write_order() {
        let mut h = ResponseHeader::default();
        h.set_content_type(b"text/plain");
        h.set(b"x-trace", b"abc");
        let mut cookie = crate::cookie::Cookie::new(b"sid", b"42");
        cookie.set_path(b"/");
        h.set_cookie(&cookie);
        h.set_connection_close();

        let mut dst = BytesMut::new();
        h.write_to(&mut dst, 10, b"srv", b"Tue, 10 Nov 2009 23:00:00 GMT");
        assert_eq!(
            &dst[..],
            &b"HTTP/1.1 200 OK\r\nServer: srv\r\nDate: Tue, 10 Nov 2009 23:00:00 GMT\r\nContent-Type: text/plain\r\nContent-Length: 10\r\nX-Trace: abc\r\nSet-Cookie: sid=42; path=/\r\nConnection: close\r\n\r\n"[..]
        );
    }

    #[test]
    fn response_chunked_write() {
        let h = ResponseHeader::default();
        let mut dst = BytesMut::new();
        h.write_to(&mut dst, CONTENT_LENGTH_CHUNKED, b"srv", b"D");
        let s = std::str::from_utf8(&dst).unwrap();
        assert!(s.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!s.contains("Content-Length"));
    }

    #[test]
    fn framing_headers_never_stored() {
        let mut h = ResponseHeader::default();
        h.set(b"Content-Length", b"100");
        h.set(b"Transfer-Encoding", b"chunked");
        assert_eq!(h.content_length(), 0);
        let mut dst = BytesMut::new();
        h.write_to(&mut dst, 0, b"s", b"D");
        let s = std::str::from_utf8(&dst).unwrap();
        assert_eq!(s.matches("Content-Length").count(), 1);
        assert!(!s.contains("chunked"));
    }

    #[test]
    fn set_cookie_parsed_from_response() {
        let (h, _) = parse_response(
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nSet-Cookie: sid=42; path=/app; HttpOnly\r\n\r\n",
        )
        .unwrap();
        let mut c = crate::cookie::Cookie::default();
        assert!(h.get_cookie(b"sid", &mut c));
        assert_eq!(c.value(), b"42");
        assert_eq!(c.path(), b"/app");
        assert!(c.http_only());
    }
}
