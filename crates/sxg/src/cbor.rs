//! Canonical CBOR encoding, limited to what the `b3` header block needs:
//! byte strings and maps of byte strings, deterministically ordered.
//!
//! Map keys are sorted by their encoded representation, which for
//! same-major-type keys yields the canonical length-first-then-bytewise
//! order of RFC 7049 §3.9.

const MAJOR_BYTE_STRING: u8 = 2;
const MAJOR_MAP: u8 = 5;

fn write_type_header(out: &mut Vec<u8>, major: u8, len: u64) {
    let base = major << 5;
    if len < 24 {
        out.push(base | len as u8);
    } else if len <= u64::from(u8::MAX) {
        out.push(base | 24);
        out.push(len as u8);
    } else if len <= u64::from(u16::MAX) {
        out.push(base | 25);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else if len <= u64::from(u32::MAX) {
        out.push(base | 26);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    } else {
        out.push(base | 27);
        out.extend_from_slice(&len.to_be_bytes());
    }
}

fn encode_bytes(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 9);
    write_type_header(&mut out, MAJOR_BYTE_STRING, value.len() as u64);
    out.extend_from_slice(value);
    out
}

/// Builder for a canonical CBOR map with byte-string keys and values.
#[derive(Default)]
pub struct MapBuilder {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        self.entries.push((encode_bytes(key), encode_bytes(value)));
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::new();
        write_type_header(&mut out, MAJOR_MAP, self.entries.len() as u64);
        for (key, value) in &self.entries {
            out.extend_from_slice(key);
            out.extend_from_slice(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_string_header_widths() {
        assert_eq!(encode_bytes(b"")[0], 0x40);
        assert_eq!(encode_bytes(&[0u8; 23])[0], 0x40 | 23);
        assert_eq!(&encode_bytes(&[0u8; 24])[..2], &[0x58, 24]);
        assert_eq!(&encode_bytes(&[0u8; 256])[..3], &[0x59, 0x01, 0x00]);
    }

    #[test]
    fn map_keys_sorted_shorter_first_then_bytewise() {
        let mut map = MapBuilder::new();
        map.insert(b"content-type", b"text/html");
        map.insert(b":status", b"200");
        map.insert(b"digest", b"x");
        let encoded = map.finish();

        assert_eq!(encoded[0], 0xA3);
        let status_pos = find(&encoded, b":status").unwrap();
        let digest_pos = find(&encoded, b"digest").unwrap();
        let ct_pos = find(&encoded, b"content-type").unwrap();
        assert!(digest_pos < status_pos, "6-byte key before 7-byte key");
        assert!(status_pos < ct_pos, "7-byte key before 12-byte key");
    }

    #[test]
    fn same_length_keys_sorted_bytewise() {
        let mut map = MapBuilder::new();
        map.insert(b"bb", b"2");
        map.insert(b"ba", b"1");
        let encoded = map.finish();
        assert!(find(&encoded, b"ba").unwrap() < find(&encoded, b"bb").unwrap());
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    }
}
