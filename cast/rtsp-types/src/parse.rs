//! Small parsing helpers shared across the protocol crates.
//!
//! Numeric parsing follows the wire protocol's rules: base-10 only, no
//! trailing characters, out-of-range input is a failure. Callers substitute
//! [`INVALID_VALUE`](crate::INVALID_VALUE) where the protocol expects the
//! `-1` sentinel.

/// Character class of a protocol token (method names, parameter keys).
pub fn token(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// Ascii whitespace.
pub fn whitespace(c: char) -> bool {
    c.is_ascii_whitespace()
}

/// Parse a base-10 integer, rejecting empty input, trailing garbage and
/// out-of-range values.
pub fn parse_int(s: &str) -> Option<i32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    s.parse::<i64>().ok()?.try_into().ok()
}

pub fn parse_uint32(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    // negative input maps through the same cast the wire protocol uses
    if let Some(v) = s.strip_prefix('-') {
        return v.parse::<i64>().ok().map(|v| (-v) as u32);
    }
    s.parse::<u64>().ok()?.try_into().ok()
}

/// Parse a base-10 float, rejecting empty input and trailing garbage.
pub fn parse_double(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let v = s.parse::<f64>().ok()?;
    v.is_finite().then_some(v)
}

/// Extract the trimmed substring between `key` and `end` inside `src`.
///
/// When `end` is empty, or not found after `key`, everything up to the end of
/// `src` is taken. Returns an empty string when `key` is absent or nothing
/// remains.
pub fn get_target_str(src: &str, key: &str, end: &str) -> String {
    let Some(pos) = src.find(key) else {
        return String::new();
    };
    let left = &src[pos + key.len()..];
    if left.is_empty() {
        return String::new();
    }
    if end.is_empty() {
        return left.trim().to_string();
    }

    let result = match left.find(end) {
        Some(end_pos) => &left[..end_pos],
        None => left,
    };
    result.trim().to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn int_rejects_trailing_chars() {
        assert_eq!(parse_int("+2abc"), None);
        assert_eq!(parse_int("2"), Some(2));
        assert_eq!(parse_int("-1"), Some(-1));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("99999999999999999999"), None);
    }

    #[test]
    fn double_rejects_trailing_chars() {
        assert_eq!(parse_double("+2.0abc"), None);
        assert_eq!(parse_double("1.05"), Some(1.05));
    }

    #[test]
    fn target_str_extraction() {
        let content = "codecs 2;fps 60;gop -1;bitrate 8000000;";

        assert_eq!(get_target_str(content, "codecs", ";"), "2");
        assert_eq!(get_target_str(content, "fps", ";"), "60");
        assert_eq!(get_target_str(content, "gop", ";"), "-1");
        assert_eq!(get_target_str(content, "missing", ";"), "");
        // no terminator: rest of the string is taken
        assert_eq!(get_target_str("client_port=4000", "client_port=", ""), "4000");
    }
}
