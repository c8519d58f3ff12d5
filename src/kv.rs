//! Ordered key/value sequence backing header and argument storage.
//!
//! Pairs beyond `len` are spare: their buffers stay allocated and are reused
//! by the next insert, so a cleared list parses the next message without
//! reallocating.

use bytes::BytesMut;

#[derive(Debug, Default)]
pub(crate) struct KvPair {
    pub(crate) key: BytesMut,
    pub(crate) value: BytesMut,
}

impl KvPair {
    pub(crate) fn assign(&mut self, key: &[u8], value: &[u8]) {
        self.key.clear();
        self.key.extend_from_slice(key);
        self.value.clear();
        self.value.extend_from_slice(value);
    }
}

#[derive(Debug, Default)]
pub(crate) struct KvList {
    pairs: Vec<KvPair>,
    len: usize,
}

impl KvList {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Truncates to zero length. Buffer capacity is retained for reuse.
    pub(crate) fn clear(&mut self) {
        self.len = 0;
    }

    /// Replaces the value of the first pair matching `key`, or appends a new
    /// pair.
    pub(crate) fn set(&mut self, key: &[u8], value: &[u8]) {
        for kv in &mut self.pairs[..self.len] {
            if kv.key == key {
                kv.value.clear();
                kv.value.extend_from_slice(value);
                return;
            }
        }
        self.push(key, value);
    }

    /// Appends a pair without looking for an existing key. Used by parsers
    /// that must keep duplicate keys (query args, cookies).
    pub(crate) fn push(&mut self, key: &[u8], value: &[u8]) {
        let kv = self.next_spare();
        kv.assign(key, value);
    }

    /// Returns a spare pair appended to the visible region. The caller fills
    /// it in place; key and value start out cleared.
    pub(crate) fn next_spare(&mut self) -> &mut KvPair {
        if self.len == self.pairs.len() {
            self.pairs.push(KvPair::default());
        }
        let kv = &mut self.pairs[self.len];
        kv.key.clear();
        kv.value.clear();
        self.len += 1;
        kv
    }

    /// Drops the most recently appended pair, keeping its buffers spare.
    pub(crate) fn drop_last(&mut self) {
        debug_assert!(self.len > 0);
        self.len -= 1;
    }

    pub(crate) fn peek(&self, key: &[u8]) -> Option<&[u8]> {
        self.pairs[..self.len]
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| &kv.value[..])
    }

    pub(crate) fn has(&self, key: &[u8]) -> bool {
        self.peek(key).is_some()
    }

    /// Removes the first pair matching `key`, preserving the order of the
    /// rest. The removed pair's buffers are kept for reuse.
    pub(crate) fn del(&mut self, key: &[u8]) -> bool {
        for i in 0..self.len {
            if self.pairs[i].key == key {
                self.pairs[i..self.len].rotate_left(1);
                self.len -= 1;
                return true;
            }
        }
        false
    }

    pub(crate) fn visit(&self, mut f: impl FnMut(&[u8], &[u8])) {
        for kv in &self.pairs[..self.len] {
            f(&kv.key, &kv.value);
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.pairs[..self.len]
            .iter()
            .map(|kv| (&kv.key[..], &kv.value[..]))
    }

    pub(crate) fn copy_from(&mut self, src: &KvList) {
        self.clear();
        for (k, v) in src.iter() {
            self.push(k, v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_in_place() {
        let mut l = KvList::default();
        l.set(b"a", b"1");
        l.set(b"b", b"2");
        l.set(b"a", b"3");
        assert_eq!(l.len(), 2);
        assert_eq!(l.peek(b"a"), Some(&b"3"[..]));
        assert_eq!(l.peek(b"b"), Some(&b"2"[..]));
        assert_eq!(l.peek(b"c"), None);
    }

    #[test]
    fn del_preserves_order() {
        let mut l = KvList::default();
        l.set(b"a", b"1");
        l.set(b"b", b"2");
        l.set(b"c", b"3");
        assert!(l.del(b"b"));
        assert!(!l.del(b"b"));
        let collected: Vec<(Vec<u8>, Vec<u8>)> =
            l.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect();
        assert_eq!(
            collected,
            vec![(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())]
        );
    }

    #[test]
    fn clear_keeps_spare_buffers() {
        let mut l = KvList::default();
        l.set(b"key", b"value");
        l.clear();
        assert!(l.is_empty());
        l.push(b"other", b"pair");
        assert_eq!(l.peek(b"other"), Some(&b"pair"[..]));
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn push_keeps_duplicates() {
        let mut l = KvList::default();
        l.push(b"k", b"1");
        l.push(b"k", b"2");
        assert_eq!(l.len(), 2);
        assert_eq!(l.peek(b"k"), Some(&b"1"[..]));
    }
}
