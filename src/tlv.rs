//! Tag-length-value codec for the compliance QR payload.
//!
//! Each field is one tag byte, one length byte, then the raw value. Readers
//! decode positionally by tag id, so [`TlvList::encode`] preserves the order
//! tags were supplied in.
use base64ct::{Base64, Encoding};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TlvError {
    #[error("invalid TLV tag id {id}: must be in 1-255")]
    InvalidTagId { id: u8 },
    #[error("TLV field {tag} exceeds 255 bytes (len={len})")]
    ValueTooLong { tag: u8, len: usize },
    #[error("no valid tag instances found")]
    NoValidTags,
}

/// A single immutable tag. The length is the value's byte length, which
/// matters for multi-byte text (seller names are usually Arabic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    id: u8,
    value: Vec<u8>,
}

impl Tag {
    pub fn new(id: u8, value: impl Into<Vec<u8>>) -> Result<Self, TlvError> {
        if id == 0 {
            return Err(TlvError::InvalidTagId { id });
        }
        let value = value.into();
        if value.len() > u8::MAX as usize {
            return Err(TlvError::ValueTooLong {
                tag: id,
                len: value.len(),
            });
        }
        Ok(Self { id, value })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.value.len() + 2);
        bytes.push(self.id);
        bytes.push(self.value.len() as u8);
        bytes.extend_from_slice(&self.value);
        bytes
    }
}

/// An ordered list of tags, encoded by concatenation. Order is preserved
/// exactly as given, never sorted or deduplicated.
#[derive(Debug, Clone)]
pub struct TlvList {
    tags: Vec<Tag>,
}

impl TlvList {
    pub fn from_tags(tags: Vec<Tag>) -> Result<Self, TlvError> {
        if tags.is_empty() {
            return Err(TlvError::NoValidTags);
        }
        Ok(Self { tags })
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        for tag in &self.tags {
            bytes.extend_from_slice(&tag.encode());
        }
        bytes
    }

    pub fn to_base64(&self) -> String {
        Base64::encode_string(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_tlv(bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
        let mut entries = Vec::new();
        let mut idx = 0;
        while idx < bytes.len() {
            let tag = bytes[idx];
            let len = bytes[idx + 1] as usize;
            let start = idx + 2;
            let end = start + len;
            entries.push((tag, bytes[start..end].to_vec()));
            idx = end;
        }
        entries
    }

    #[test]
    fn tag_round_trips() {
        let tag = Tag::new(3, "2024-01-01T12:30:00Z".as_bytes()).unwrap();
        let entries = decode_tlv(&tag.encode());
        assert_eq!(entries, vec![(3, b"2024-01-01T12:30:00Z".to_vec())]);
    }

    #[test]
    fn length_counts_bytes_not_characters() {
        let name = "\u{645}\u{624}\u{633}\u{633}\u{629}"; // 5 Arabic characters, 10 bytes
        let tag = Tag::new(1, name.as_bytes()).unwrap();
        assert_eq!(tag.len(), name.len());
        assert_eq!(tag.encode()[1] as usize, name.len());
        assert_ne!(tag.len(), name.chars().count());

        let entries = decode_tlv(&tag.encode());
        assert_eq!(entries, vec![(1, name.as_bytes().to_vec())]);
    }

    #[test]
    fn max_tag_id_and_length_accepted() {
        let value = vec![0xAB; 255];
        let tag = Tag::new(255, value.clone()).unwrap();
        let encoded = tag.encode();
        assert_eq!(encoded[0], 255);
        assert_eq!(encoded[1], 255);
        assert_eq!(&encoded[2..], value.as_slice());
    }

    #[test]
    fn zero_tag_id_rejected() {
        assert_eq!(
            Tag::new(0, b"x".to_vec()),
            Err(TlvError::InvalidTagId { id: 0 })
        );
    }

    #[test]
    fn oversized_value_rejected_not_truncated() {
        match Tag::new(6, vec![0u8; 256]) {
            Err(TlvError::ValueTooLong { tag: 6, len: 256 }) => {}
            other => panic!("expected ValueTooLong, got {other:?}"),
        }
    }

    #[test]
    fn encode_all_is_concatenation_in_order() {
        let t1 = Tag::new(9, b"last".to_vec()).unwrap();
        let t2 = Tag::new(1, b"first".to_vec()).unwrap();
        let t3 = Tag::new(9, b"last".to_vec()).unwrap();

        let mut expected = t1.encode();
        expected.extend_from_slice(&t2.encode());
        expected.extend_from_slice(&t3.encode());

        let list = TlvList::from_tags(vec![t1, t2, t3]).unwrap();
        assert_eq!(list.encode(), expected);

        let entries = decode_tlv(&list.encode());
        assert_eq!(entries[0].0, 9);
        assert_eq!(entries[1].0, 1);
        assert_eq!(entries[2].0, 9);
    }

    #[test]
    fn empty_tag_list_rejected() {
        match TlvList::from_tags(Vec::new()) {
            Err(TlvError::NoValidTags) => {}
            other => panic!("expected NoValidTags, got {other:?}"),
        }
    }

    #[test]
    fn single_tag_list_accepted() {
        let list = TlvList::from_tags(vec![Tag::new(1, b"ok".to_vec()).unwrap()]).unwrap();
        assert_eq!(list.encode(), vec![1, 2, b'o', b'k']);
    }

    #[test]
    fn base64_wraps_encoded_bytes() {
        use base64ct::{Base64, Encoding};
        let list = TlvList::from_tags(vec![Tag::new(2, b"310122393500003".to_vec()).unwrap()])
            .unwrap();
        let decoded = Base64::decode_vec(&list.to_base64()).unwrap();
        assert_eq!(decoded, list.encode());
    }
}
