//! Reverses the upstream byte-substitution obfuscation.
//!
//! The feed replaces digits, structural characters and quotes with two-byte
//! sequences that look like accented letters when read as UTF-8. Every
//! sequence has lead byte `0xC4` or `0xC5` and a trailing byte in
//! `0x80..=0xBE`, so no sequence can start inside another one and a single
//! left-to-right pass is equivalent to replacing each sequence globally.

use std::collections::HashMap;

/// Obfuscated sequence → plain output. An empty output deletes the sequence.
pub const SUBSTITUTIONS: [([u8; 2], &[u8]); 68] = [
    // Digits
    ([0xC4, 0x88], b"0"),
    ([0xC4, 0x89], b"1"),
    ([0xC4, 0x8A], b"2"),
    ([0xC4, 0x8B], b"3"),
    ([0xC4, 0x8C], b"4"),
    ([0xC4, 0x8D], b"5"),
    ([0xC4, 0x8E], b"6"),
    ([0xC4, 0x8F], b"7"),
    ([0xC4, 0x90], b"8"),
    ([0xC4, 0x91], b"9"),
    ([0xC4, 0x92], b"2"),
    ([0xC4, 0x93], b"3"),
    ([0xC4, 0x94], b"4"),
    ([0xC4, 0x95], b"5"),
    ([0xC4, 0x96], b"6"),
    ([0xC4, 0x97], b"7"),
    ([0xC4, 0x98], b"8"),
    ([0xC4, 0x99], b"9"),
    ([0xC4, 0x9A], b"0"),
    ([0xC4, 0x9B], b"1"),
    ([0xC4, 0xA0], b"0"),
    ([0xC4, 0xA1], b"1"),
    ([0xC4, 0xA2], b"2"),
    ([0xC4, 0xA3], b"3"),
    ([0xC4, 0xA4], b"4"),
    ([0xC4, 0xA5], b"5"),
    ([0xC4, 0xA6], b"6"),
    ([0xC4, 0xA7], b"7"),
    ([0xC4, 0xA8], b"8"),
    ([0xC4, 0xA9], b"9"),
    ([0xC5, 0x84], b"4"),
    ([0xC5, 0x85], b"5"),
    ([0xC5, 0x86], b"6"),
    ([0xC5, 0x88], b"8"),
    ([0xC5, 0x89], b"9"),
    // Structure
    ([0xC4, 0x86], b": "),
    ([0xC4, 0x87], b"."),
    // Quotes
    ([0xC4, 0x9C], b"\""),
    ([0xC4, 0x9D], b"\""),
    ([0xC4, 0x9E], b"\""),
    ([0xC4, 0x9F], b"\""),
    ([0xC4, 0xB0], b"\""),
    ([0xC4, 0xB1], b"\""),
    ([0xC4, 0xB2], b"\""),
    ([0xC4, 0xB3], b"\""),
    ([0xC4, 0xB4], b"\""),
    ([0xC4, 0xB5], b"\""),
    ([0xC4, 0xB8], b"\""),
    ([0xC4, 0xB9], b"\""),
    ([0xC4, 0xBA], b"\""),
    ([0xC4, 0xBB], b"\""),
    ([0xC4, 0xBC], b"\""),
    ([0xC4, 0xBD], b"\""),
    // Deleted
    ([0xC4, 0x80], b""),
    ([0xC4, 0x81], b""),
    ([0xC4, 0x83], b""),
    ([0xC4, 0x85], b""),
    ([0xC4, 0xAA], b""),
    ([0xC4, 0xAB], b""),
    ([0xC4, 0xAC], b""),
    ([0xC4, 0xAD], b""),
    ([0xC4, 0xAE], b""),
    ([0xC4, 0xB6], b""),
    ([0xC4, 0xBE], b""),
    ([0xC5, 0x80], b""),
    ([0xC5, 0x81], b""),
    ([0xC5, 0x8D], b""),
    ([0xC5, 0x9B], b""),
];

/// Turns raw feed frames into best-effort text.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    table: HashMap<[u8; 2], &'static [u8]>,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            table: SUBSTITUTIONS.iter().copied().collect(),
        }
    }

    /// Apply the substitution table once over `frame`.
    pub fn substitute(&self, frame: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame.len());
        let mut i = 0;

        while i < frame.len() {
            if let Some(pair) = frame.get(i..i + 2) {
                if let Some(replacement) = self.table.get(&[pair[0], pair[1]]) {
                    out.extend_from_slice(replacement);
                    i += 2;
                    continue;
                }
            }
            out.push(frame[i]);
            i += 1;
        }

        out
    }

    /// Substitute and decode as UTF-8. Invalid sequences become U+FFFD.
    ///
    /// Never fails; the text may still be malformed JSON.
    pub fn decode(&self, frame: &[u8]) -> String {
        String::from_utf8_lossy(&self.substitute(frame)).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_keys_are_distinct() {
        let keys: HashSet<[u8; 2]> = SUBSTITUTIONS.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), SUBSTITUTIONS.len());
    }

    #[test]
    fn test_every_sequence_independent_of_surroundings() {
        let decoder = FrameDecoder::new();

        for (key, expected) in SUBSTITUTIONS.iter() {
            let mut frame = b"ab".to_vec();
            frame.extend_from_slice(key);
            frame.extend_from_slice(b"cd");

            let mut want = b"ab".to_vec();
            want.extend_from_slice(expected);
            want.extend_from_slice(b"cd");

            assert_eq!(decoder.substitute(&frame), want, "sequence {:02X?}", key);
        }
    }

    #[test]
    fn test_digit_fixture() {
        let decoder = FrameDecoder::new();
        let frame: Vec<u8> = (0x88u8..=0x9B)
            .chain(0xA0..=0xA9)
            .flat_map(|trail| [0xC4, trail])
            .collect();

        assert_eq!(decoder.decode(&frame), "012345678923456789010123456789");
    }

    #[test]
    fn test_structure_and_deletions() {
        let decoder = FrameDecoder::new();
        let frame = [
            0xC4, 0xB8, b't', b'i', b'm', b'e', 0xC4, 0xB9, 0xC4, 0x86, 0xC4, 0x89, 0xC4, 0xAC,
            0xC4, 0x87, 0xC5, 0x85, 0xC5, 0x9B,
        ];
        assert_eq!(decoder.decode(&frame), "\"time\": 1.5");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let decoder = FrameDecoder::new();
        let text = r#"{"time":1700000000,"lat":45.2,"lon":16.04}"#;
        assert_eq!(decoder.decode(text.as_bytes()), text);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let decoder = FrameDecoder::new();
        // Lone lead byte at the end and an unmapped pair.
        let decoded = decoder.decode(&[b'x', 0xC4, 0xFF, b'y', 0xC5]);
        assert!(decoded.starts_with('x'));
        assert!(decoded.contains('y'));
        assert!(decoded.contains(char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn test_empty_frame() {
        assert_eq!(FrameDecoder::new().decode(&[]), "");
    }
}
