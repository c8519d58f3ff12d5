//! Request `Cookie` and response `Set-Cookie` codecs.

use std::time::SystemTime;

use bytes::BytesMut;

use crate::bytesutil::parse_uint;
use crate::kv::KvList;

/// Error returned when a `Set-Cookie` value has no `key=value` part.
#[derive(Debug, thiserror::Error)]
#[error("malformed cookie")]
pub struct MalformedCookie;

/// A response cookie with its optional attributes.
#[derive(Debug, Default)]
pub struct Cookie {
    key: BytesMut,
    value: BytesMut,
    expire: Option<SystemTime>,
    max_age: Option<u64>,
    domain: BytesMut,
    path: BytesMut,
    http_only: bool,
    secure: bool,
}

impl Cookie {
    pub fn new(key: &[u8], value: &[u8]) -> Self {
        let mut c = Cookie::default();
        c.set_key(key);
        c.set_value(value);
        c
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn set_key(&mut self, key: &[u8]) {
        self.key.clear();
        self.key.extend_from_slice(key);
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn set_value(&mut self, value: &[u8]) {
        self.value.clear();
        self.value.extend_from_slice(value);
    }

    pub fn expire(&self) -> Option<SystemTime> {
        self.expire
    }

    pub fn set_expire(&mut self, when: SystemTime) {
        self.expire = Some(when);
    }

    pub fn max_age(&self) -> Option<u64> {
        self.max_age
    }

    pub fn set_max_age(&mut self, seconds: u64) {
        self.max_age = Some(seconds);
    }

    pub fn domain(&self) -> &[u8] {
        &self.domain
    }

    pub fn set_domain(&mut self, domain: &[u8]) {
        self.domain.clear();
        self.domain.extend_from_slice(domain);
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn set_path(&mut self, path: &[u8]) {
        self.path.clear();
        self.path.extend_from_slice(path);
    }

    pub fn http_only(&self) -> bool {
        self.http_only
    }

    pub fn set_http_only(&mut self, on: bool) {
        self.http_only = on;
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, on: bool) {
        self.secure = on;
    }

    pub fn clear(&mut self) {
        self.key.clear();
        self.value.clear();
        self.expire = None;
        self.max_age = None;
        self.domain.clear();
        self.path.clear();
        self.http_only = false;
        self.secure = false;
    }

    /// Parses a `Set-Cookie` header value. The first `key=value` pair names
    /// the cookie; the remaining `;`-separated entries are attributes.
    pub fn parse(&mut self, src: &[u8]) -> Result<(), MalformedCookie> {
        self.clear();

        let mut parts = src.split(|&c| c == b';');
        let first = parts.next().ok_or(MalformedCookie)?;
        let (k, v) = split_pair(first).ok_or(MalformedCookie)?;
        self.set_key(k);
        self.set_value(v);

        for part in parts {
            let part = trim(part);
            if part.is_empty() {
                continue;
            }
            match split_pair(part) {
                Some((k, v)) => {
                    if k.eq_ignore_ascii_case(b"expires") {
                        if let Ok(s) = std::str::from_utf8(v) {
                            self.expire = httpdate::parse_http_date(s).ok();
                        }
                    } else if k.eq_ignore_ascii_case(b"max-age") {
                        self.max_age = parse_uint(v);
                    } else if k.eq_ignore_ascii_case(b"domain") {
                        self.set_domain(v);
                    } else if k.eq_ignore_ascii_case(b"path") {
                        self.set_path(v);
                    }
                }
                None => {
                    if part.eq_ignore_ascii_case(b"httponly") {
                        self.http_only = true;
                    } else if part.eq_ignore_ascii_case(b"secure") {
                        self.secure = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Appends the serialized `Set-Cookie` value to `dst`, attributes in
    /// fixed order.
    pub fn append_to(&self, dst: &mut BytesMut) {
        dst.extend_from_slice(&self.key);
        dst.extend_from_slice(b"=");
        dst.extend_from_slice(&self.value);
        if let Some(when) = self.expire {
            dst.extend_from_slice(b"; expires=");
            dst.extend_from_slice(httpdate::fmt_http_date(when).as_bytes());
        }
        if let Some(seconds) = self.max_age {
            dst.extend_from_slice(b"; max-age=");
            crate::bytesutil::append_uint(dst, seconds);
        }
        if !self.domain.is_empty() {
            dst.extend_from_slice(b"; domain=");
            dst.extend_from_slice(&self.domain);
        }
        if !self.path.is_empty() {
            dst.extend_from_slice(b"; path=");
            dst.extend_from_slice(&self.path);
        }
        if self.http_only {
            dst.extend_from_slice(b"; HttpOnly");
        }
        if self.secure {
            dst.extend_from_slice(b"; secure");
        }
    }
}

fn trim(b: &[u8]) -> &[u8] {
    let start = b.iter().position(|c| !c.is_ascii_whitespace());
    let end = b.iter().rposition(|c| !c.is_ascii_whitespace());
    match (start, end) {
        (Some(s), Some(e)) => &b[s..=e],
        _ => &b[..0],
    }
}

fn split_pair(b: &[u8]) -> Option<(&[u8], &[u8])> {
    let i = memchr::memchr(b'=', b)?;
    Some((trim(&b[..i]), trim(&b[i + 1..])))
}

/// Parses a request `Cookie: a=b; c=d` value into `kv`, appending one pair
/// per cookie. Entries without `=` become keys with empty values.
pub(crate) fn parse_request_cookies(kv: &mut KvList, src: &[u8]) {
    for part in src.split(|&c| c == b';') {
        let part = trim(part);
        if part.is_empty() {
            continue;
        }
        match split_pair(part) {
            Some((k, v)) => kv.push(k, v),
            None => kv.push(part, b""),
        }
    }
}

/// Appends request cookies joined by `; `.
pub(crate) fn append_request_cookies(dst: &mut BytesMut, kv: &KvList) {
    let mut first = true;
    kv.visit(|k, v| {
        if !first {
            dst.extend_from_slice(b"; ");
        }
        first = false;
        dst.extend_from_slice(k);
        dst.extend_from_slice(b"=");
        dst.extend_from_slice(v);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn request_cookies_roundtrip() {
        let mut kv = KvList::default();
        parse_request_cookies(&mut kv, b"a=b; c=d; bare");
        assert_eq!(kv.peek(b"a"), Some(&b"b"[..]));
        assert_eq!(kv.peek(b"c"), Some(&b"d"[..]));
        assert_eq!(kv.peek(b"bare"), Some(&b""[..]));

        let mut out = BytesMut::new();
        append_request_cookies(&mut out, &kv);
        assert_eq!(&out[..], b"a=b; c=d; bare=");
    }

    #[test]
    fn set_cookie_roundtrip() {
        let mut c = Cookie::new(b"session", b"tok123");
        c.set_domain(b"example.com");
        c.set_path(b"/app");
        c.set_max_age(3600);
        c.set_http_only(true);
        c.set_secure(true);

        let mut line = BytesMut::new();
        c.append_to(&mut line);

        let mut parsed = Cookie::default();
        parsed.parse(&line).unwrap();
        assert_eq!(parsed.key(), b"session");
        assert_eq!(parsed.value(), b"tok123");
        assert_eq!(parsed.domain(), b"example.com");
        assert_eq!(parsed.path(), b"/app");
        assert_eq!(parsed.max_age(), Some(3600));
        assert!(parsed.http_only());
        assert!(parsed.secure());
    }

    #[test]
    fn expires_attribute() {
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_257_894_000);
        let mut c = Cookie::new(b"k", b"v");
        c.set_expire(when);

        let mut line = BytesMut::new();
        c.append_to(&mut line);
        assert_eq!(&line[..], b"k=v; expires=Tue, 10 Nov 2009 23:00:00 GMT");

        let mut parsed = Cookie::default();
        parsed.parse(&line).unwrap();
        assert_eq!(parsed.expire(), Some(when));
    }

    #[test]
    fn rejects_valueless_cookie() {
        let mut c = Cookie::default();
        assert!(c.parse(b"no-equals-sign").is_err());
    }
}
