use crate::parser::{ParseError, ParseResult};

const UNITS: [(&str, i64); 7] = [
    ("y", 365 * 24 * 60 * 60 * 1000),
    ("w", 7 * 24 * 60 * 60 * 1000),
    ("d", 24 * 60 * 60 * 1000),
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

fn unit_index(unit: &str) -> Option<usize> {
    UNITS.iter().position(|(name, _)| *name == unit)
}

/// Parses a duration such as `1h30m` into milliseconds. Units must appear
/// from the largest to the smallest, each at most once.
pub fn parse_duration(s: &str) -> ParseResult<i64> {
    let invalid = || ParseError::InvalidDuration(s.to_string());
    if s.is_empty() {
        return Err(invalid());
    }
    let bytes = s.as_bytes();
    let mut pos = 0;
    let mut total: i64 = 0;
    let mut last_unit: Option<usize> = None;
    while pos < bytes.len() {
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if start == pos {
            return Err(invalid());
        }
        let value: i64 = s[start..pos].parse().map_err(|_| invalid())?;
        let unit_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let idx = unit_index(&s[unit_start..pos]).ok_or_else(invalid)?;
        if matches!(last_unit, Some(last) if last >= idx) {
            return Err(invalid());
        }
        last_unit = Some(idx);
        let ms = value.checked_mul(UNITS[idx].1).ok_or_else(invalid)?;
        total = total.checked_add(ms).ok_or_else(invalid)?;
    }
    Ok(total)
}
