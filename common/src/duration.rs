use std::fmt;
use std::fmt::Formatter;

const NAMES: [&str; 7] = ["y", "w", "d", "h", "m", "s", "ms"];
const SIZES_MS: [i64; 7] = [
    86_400_000 * 365,
    86_400_000 * 7,
    86_400_000,
    3_600_000,
    60_000,
    1_000,
    1,
];

/// Writes a millisecond duration in the compact `1h30m` notation. Negative
/// durations get a single leading minus sign.
pub fn fmt_duration_ms(f: &mut Formatter<'_>, v: i64) -> fmt::Result {
    if v == 0 {
        return write!(f, "0s");
    }
    if v < 0 {
        write!(f, "-")?;
    }
    let mut rest = v.unsigned_abs();
    for (size, name) in SIZES_MS.iter().zip(NAMES.iter()) {
        let size = *size as u64;
        let whole = rest / size;
        if whole > 0 {
            write!(f, "{whole}{name}")?;
            rest %= size;
        }
    }
    Ok(())
}

pub fn format_duration_ms(v: i64) -> String {
    struct Wrapper(i64);
    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            fmt_duration_ms(f, self.0)
        }
    }
    Wrapper(v).to_string()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::format_duration_ms;

    #[test_case(0, "0s")]
    #[test_case(100, "100ms")]
    #[test_case(90_000, "1m30s")]
    #[test_case(5_400_000, "1h30m")]
    #[test_case(-10_000, "-10s")]
    #[test_case(86_400_000 * 8, "1w1d")]
    fn formats_compactly(ms: i64, expected: &str) {
        assert_eq!(format_duration_ms(ms), expected);
    }
}
