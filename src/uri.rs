//! Request URI parsing and composition.

use bytes::BytesMut;

use crate::args::Args;
use crate::bytesutil::{decode_arg, lowercase};

/// Parsed request URI.
///
/// `path` is percent-decoded; `path_original` keeps the bytes as received.
/// The query string and fragment stay raw.
#[derive(Debug, Default)]
pub struct Uri {
    scheme: BytesMut,
    host: BytesMut,
    path: BytesMut,
    path_original: BytesMut,
    query_string: BytesMut,
    hash: BytesMut,

    query_args: Args,
    parsed_query_args: bool,

    full_uri: BytesMut,
}

fn is_scheme(b: &[u8]) -> bool {
    !b.is_empty()
        && b.iter()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, b'+' | b'-' | b'.'))
}

impl Uri {
    pub fn scheme(&self) -> &[u8] {
        if self.scheme.is_empty() {
            b"http"
        } else {
            &self.scheme
        }
    }

    pub fn host(&self) -> &[u8] {
        &self.host
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn path_original(&self) -> &[u8] {
        &self.path_original
    }

    pub fn query_string(&self) -> &[u8] {
        &self.query_string
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn is_https(&self) -> bool {
        self.scheme() == b"https"
    }

    pub fn clear(&mut self) {
        self.scheme.clear();
        self.host.clear();
        self.path.clear();
        self.path_original.clear();
        self.query_string.clear();
        self.hash.clear();
        self.query_args.clear();
        self.parsed_query_args = false;
    }

    pub fn copy_to(&self, dst: &mut Uri) {
        dst.clear();
        dst.scheme.extend_from_slice(&self.scheme);
        dst.host.extend_from_slice(&self.host);
        dst.path.extend_from_slice(&self.path);
        dst.path_original.extend_from_slice(&self.path_original);
        dst.query_string.extend_from_slice(&self.query_string);
        dst.hash.extend_from_slice(&self.hash);
    }

    /// Parses `(host, raw_request_uri)`. When the request URI is absolute
    /// (`http://...` or `https://...`) the scheme and host are taken from it
    /// and the `host` argument is ignored.
    pub fn parse(&mut self, host: &[u8], raw_uri: &[u8]) {
        self.clear();

        let mut host = host;
        let mut rest = raw_uri;
        match find_subslice(raw_uri, b"://") {
            Some(pos) if is_scheme(&raw_uri[..pos]) => {
                self.scheme.extend_from_slice(&raw_uri[..pos]);
                lowercase(&mut self.scheme);
                (host, rest) = split_authority(&raw_uri[pos + 3..]);
            }
            _ => self.scheme.extend_from_slice(b"http"),
        }

        self.host.extend_from_slice(host);
        lowercase(&mut self.host);

        if rest.is_empty() {
            rest = b"/";
        }

        let (path_part, query_part) = match memchr::memchr(b'?', rest) {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, &rest[rest.len()..]),
        };
        self.path_original.extend_from_slice(path_part);
        decode_arg(&mut self.path, path_part, false);

        match memchr::memchr(b'#', query_part) {
            Some(i) => {
                self.query_string.extend_from_slice(&query_part[..i]);
                self.hash.extend_from_slice(&query_part[i + 1..]);
            }
            None => self.query_string.extend_from_slice(query_part),
        }
    }

    /// Updates the URI from `new_uri`, which may be absolute, rooted
    /// (`/path`) or relative to the last path segment.
    pub fn update(&mut self, new_uri: &[u8]) {
        if new_uri.is_empty() {
            return;
        }
        let host = self.host.to_vec();
        if find_subslice(new_uri, b"://").is_some() || new_uri[0] == b'/' {
            self.parse(&host, new_uri);
        } else {
            let mut composed = Vec::with_capacity(self.path_original.len() + new_uri.len() + 1);
            match self.path_original.iter().rposition(|&c| c == b'/') {
                Some(i) => composed.extend_from_slice(&self.path_original[..=i]),
                None => composed.push(b'/'),
            }
            composed.extend_from_slice(new_uri);
            self.parse(&host, &composed);
        }
    }

    /// Query args parsed from the query string on first use.
    pub fn query_args(&mut self) -> &mut Args {
        if !self.parsed_query_args {
            let qs = std::mem::take(&mut self.query_string);
            self.query_args.parse(&qs);
            self.query_string = qs;
            self.parsed_query_args = true;
        }
        &mut self.query_args
    }

    /// Appends `path?query#hash` suitable for a request line. A leading
    /// slash is added when the stored path lacks one.
    pub fn append_request_uri(&self, dst: &mut BytesMut) {
        if self.path_original.first() != Some(&b'/') {
            dst.extend_from_slice(b"/");
        }
        dst.extend_from_slice(&self.path_original);
        if !self.query_string.is_empty() {
            dst.extend_from_slice(b"?");
            dst.extend_from_slice(&self.query_string);
        }
        if !self.hash.is_empty() {
            dst.extend_from_slice(b"#");
            dst.extend_from_slice(&self.hash);
        }
    }

    /// Absolute URI `scheme://host/path?query#hash` in a scratch buffer
    /// owned by `self`.
    pub fn full_uri(&mut self) -> &[u8] {
        let mut buf = std::mem::take(&mut self.full_uri);
        buf.clear();
        buf.extend_from_slice(self.scheme());
        buf.extend_from_slice(b"://");
        buf.extend_from_slice(&self.host);
        self.append_request_uri(&mut buf);
        self.full_uri = buf;
        &self.full_uri
    }
}

/// Splits `authority/rest` after a scheme prefix into host and path-part.
fn split_authority(b: &[u8]) -> (&[u8], &[u8]) {
    match memchr::memchr(b'/', b) {
        Some(i) => (&b[..i], &b[i..]),
        None => (b, &b[b.len()..]),
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
