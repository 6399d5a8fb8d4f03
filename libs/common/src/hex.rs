//! Hex formatting helpers for CAN payloads

use std::fmt::Write;

/// Encode bytes as space separated uppercase pairs, the way bus monitors print frames
/// Example: [0x12, 0x34, 0xAB] -> "12 34 AB"
pub fn encode_spaced(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Parse a hex string into bytes.
///
/// Whitespace, `:` and `-` separators are ignored, as is an optional `0x` prefix,
/// so `"12 34 56"`, `"12:34:56"` and `"0x123456"` all parse to the same bytes.
pub fn decode(input: &str) -> Result<Vec<u8>, crate::Error> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let digits: Vec<u8> = body
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b':' && *b != b'-')
        .collect();

    ::hex::decode(&digits).map_err(|e| crate::Error::Parse(format!("{} in '{}'", e, input)))
}
