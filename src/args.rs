//! Query string and `application/x-www-form-urlencoded` codec.

use bytes::BytesMut;

use crate::bytesutil::{append_quoted_arg, decode_arg, parse_ufloat, parse_uint};
use crate::kv::KvList;

/// Parsed query arguments or urlencoded form body.
///
/// Keys without `=` yield an empty value. Duplicate keys are preserved in
/// order; `peek` returns the first one.
#[derive(Debug, Default)]
pub struct Args {
    kv: KvList,
    buf: BytesMut,
}

impl Args {
    pub fn len(&self) -> usize {
        self.kv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    pub fn clear(&mut self) {
        self.kv.clear();
    }

    pub fn copy_to(&self, dst: &mut Args) {
        dst.kv.copy_from(&self.kv);
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.kv.set(key, value);
    }

    pub fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        self.kv.peek(key)
    }

    pub fn has(&self, key: &[u8]) -> bool {
        self.kv.has(key)
    }

    pub fn del(&mut self, key: &[u8]) -> bool {
        self.kv.del(key)
    }

    pub fn visit_all(&self, f: impl FnMut(&[u8], &[u8])) {
        self.kv.visit(f);
    }

    /// Unsigned integer value for `key`, `None` when missing or malformed.
    pub fn get_uint(&self, key: &[u8]) -> Option<u64> {
        parse_uint(self.peek(key)?)
    }

    /// Unsigned float value for `key`, `None` when missing or malformed.
    pub fn get_ufloat(&self, key: &[u8]) -> Option<f64> {
        parse_ufloat(self.peek(key)?)
    }

    /// Parses `src` as `k=v&k2=v2`, percent-decoding keys and values with
    /// `+` treated as space. Replaces previous contents.
    pub fn parse(&mut self, src: &[u8]) {
        self.kv.clear();
        let mut rest = src;
        while !rest.is_empty() {
            let (pair, tail) = match memchr::memchr(b'&', rest) {
                Some(i) => (&rest[..i], &rest[i + 1..]),
                None => (rest, &rest[rest.len()..]),
            };
            rest = tail;
            if pair.is_empty() && rest.is_empty() {
                break;
            }
            let kv = self.kv.next_spare();
            match memchr::memchr(b'=', pair) {
                Some(i) => {
                    decode_arg(&mut kv.key, &pair[..i], true);
                    decode_arg(&mut kv.value, &pair[i + 1..], true);
                }
                None => {
                    decode_arg(&mut kv.key, pair, true);
                }
            }
            if kv.key.is_empty() && kv.value.is_empty() {
                self.kv.drop_last();
            }
        }
    }

    /// Appends the serialized query string to `dst`. Bytes outside
    /// `[A-Za-z0-9/.]` are percent-encoded.
    pub fn append_to(&self, dst: &mut BytesMut) {
        let n = self.kv.len();
        for (i, (k, v)) in self.kv.iter().enumerate() {
            append_quoted_arg(dst, k);
            if !v.is_empty() {
                dst.extend_from_slice(b"=");
                append_quoted_arg(dst, v);
            }
            if i + 1 < n {
                dst.extend_from_slice(b"&");
            }
        }
    }

    /// Serialized form in a scratch buffer owned by `self`.
    pub fn as_bytes(&mut self) -> &[u8] {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        self.append_to(&mut buf);
        self.buf = buf;
        &self.buf
    }
}

impl std::fmt::Display for Args {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut buf = BytesMut::new();
        self.append_to(&mut buf);
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}
