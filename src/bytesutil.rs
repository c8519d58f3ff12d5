//! Byte-level helpers shared by the header, args and cookie codecs.

use bytes::BytesMut;

/// Longest decimal integer accepted by [`parse_uint`]. Anything longer would
/// overflow an `i64` content length.
const MAX_INT_DIGITS: usize = 18;

/// Normalizes a header key in place to canonical `Foo-Bar-Baz` form: the
/// first byte and every byte following a `-` are uppercased, all other
/// alphabetic bytes are lowercased.
pub fn normalize_header_key(b: &mut [u8]) {
    let mut up = true;
    for c in b.iter_mut() {
        if *c == b'-' {
            up = true;
        } else if up {
            up = false;
            c.make_ascii_uppercase();
        } else {
            c.make_ascii_lowercase();
        }
    }
}

pub fn lowercase(b: &mut [u8]) {
    b.make_ascii_lowercase();
}

/// Parses a decimal unsigned integer prefix of `b`. Returns the value and the
/// number of bytes consumed, or `None` when `b` is empty, starts with a
/// non-digit or has more than [`MAX_INT_DIGITS`] digits.
pub fn parse_uint_prefix(b: &[u8]) -> Option<(u64, usize)> {
    let mut v: u64 = 0;
    let mut i = 0;
    for &c in b {
        if !c.is_ascii_digit() {
            break;
        }
        if i >= MAX_INT_DIGITS {
            return None;
        }
        v = v * 10 + u64::from(c - b'0');
        i += 1;
    }
    if i == 0 {
        return None;
    }
    Some((v, i))
}

/// Parses `b` as a decimal unsigned integer. Trailing non-digit bytes make
/// the whole parse fail.
pub fn parse_uint(b: &[u8]) -> Option<u64> {
    match parse_uint_prefix(b) {
        Some((v, n)) if n == b.len() => Some(v),
        _ => None,
    }
}

/// Parses an unsigned float of the form `123`, `1.23` or `1.2e-3`.
pub fn parse_ufloat(b: &[u8]) -> Option<f64> {
    if b.is_empty() {
        return None;
    }
    let mut v: u64 = 0;
    let mut offset = 1.0f64;
    let mut point_found = false;
    for (i, &c) in b.iter().enumerate() {
        if c.is_ascii_digit() {
            v = v.checked_mul(10)?.checked_add(u64::from(c - b'0'))?;
            if point_found {
                offset /= 10.0;
            }
            continue;
        }
        if c == b'.' {
            if point_found {
                return None;
            }
            point_found = true;
            continue;
        }
        if c == b'e' || c == b'E' {
            let mut exp = b.get(i + 1..)?;
            if exp.is_empty() {
                return None;
            }
            let minus = match exp[0] {
                b'+' => {
                    exp = &exp[1..];
                    false
                }
                b'-' => {
                    exp = &exp[1..];
                    true
                }
                _ => false,
            };
            let e = parse_uint(exp)? as i32;
            let pow = 10f64.powi(if minus { -e } else { e });
            return Some(v as f64 * offset * pow);
        }
        return None;
    }
    Some(v as f64 * offset)
}

/// Appends the decimal representation of `n` to `dst`.
pub fn append_uint(dst: &mut BytesMut, n: u64) {
    let mut buf = [0u8; 20];
    let mut i = buf.len();
    let mut n = n;
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    dst.extend_from_slice(&buf[i..]);
}

/// Appends the lowercase hex representation of `n` to `dst`.
pub fn append_hex_uint(dst: &mut BytesMut, n: u64) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut buf = [0u8; 16];
    let mut i = buf.len();
    let mut n = n;
    loop {
        i -= 1;
        buf[i] = DIGITS[(n & 0xf) as usize];
        n >>= 4;
        if n == 0 {
            break;
        }
    }
    dst.extend_from_slice(&buf[i..]);
}

/// Value of a single hex digit, or `None` for non-hex bytes.
pub fn unhex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn hex_char_upper(c: u8) -> u8 {
    if c < 10 {
        b'0' + c
    } else {
        c - 10 + b'A'
    }
}

/// Appends `src` to `dst`, percent-encoding every byte outside
/// `[A-Za-z0-9/.]`.
pub fn append_quoted_arg(dst: &mut BytesMut, src: &[u8]) {
    for &c in src {
        if c.is_ascii_alphanumeric() || c == b'/' || c == b'.' {
            dst.extend_from_slice(&[c]);
        } else {
            dst.extend_from_slice(&[b'%', hex_char_upper(c >> 4), hex_char_upper(c & 15)]);
        }
    }
}

/// Percent-decodes `src` into `dst` (cleared first). When `decode_plus` is
/// set, `+` decodes to a space as in query strings and urlencoded forms.
/// Malformed escapes are passed through verbatim.
pub fn decode_arg(dst: &mut BytesMut, src: &[u8], decode_plus: bool) {
    dst.clear();
    let mut i = 0;
    let n = src.len();
    while i < n {
        let c = src[i];
        match c {
            b'+' if decode_plus => dst.extend_from_slice(b" "),
            b'%' => {
                if i + 2 >= n {
                    dst.extend_from_slice(&src[i..]);
                    break;
                }
                match (unhex(src[i + 1]), unhex(src[i + 2])) {
                    (Some(x1), Some(x2)) => {
                        dst.extend_from_slice(&[(x1 << 4) | x2]);
                        i += 2;
                    }
                    _ => dst.extend_from_slice(&[c]),
                }
            }
            _ => dst.extend_from_slice(&[c]),
        }
        i += 1;
    }
}
