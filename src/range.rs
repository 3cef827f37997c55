//! Byte-range expression parser
//!
//! Parses `"a-b"` (inclusive), `"a-"` (open end) and `"-n"` (last n bytes)
//! into a validated half-open `(start, end)` pair against a known content
//! length.

use crate::error::{Result, ServerError};

/// Parse a textual byte-range expression.
///
/// Returns `(start, end)` with `end` exclusive and
/// `0 <= start < end <= content_length`. A well-formed inclusive bound that
/// overruns the content is clamped to `content_length`.
pub fn parse_range(spec: &str, content_length: u64) -> Result<(u64, u64)> {
    let spec = spec.trim();
    if !spec.contains('-') {
        return Err(ServerError::InvalidRange(format!(
            "'{}' is missing a '-' separator",
            spec
        )));
    }

    let parts: Vec<&str> = spec.split('-').collect();
    if parts.len() != 2 {
        return Err(ServerError::InvalidRange(format!(
            "'{}' has too many parts",
            spec
        )));
    }

    let (start_part, end_part) = (parts[0], parts[1]);

    // "-n": suffix form, last n bytes
    if start_part.is_empty() {
        let n = parse_bound(end_part, spec)?;
        if n == 0 {
            return Err(ServerError::InvalidRange(
                "suffix length must be positive".to_string(),
            ));
        }
        let start = content_length.saturating_sub(n);
        return check_bounds(start, content_length, content_length, spec);
    }

    let start = parse_bound(start_part, spec)?;

    // "a-": from a to the end
    let end = if end_part.is_empty() {
        content_length
    } else {
        // "a-b": inclusive upper bound, clamped to the content length
        parse_bound(end_part, spec)?.saturating_add(1).min(content_length)
    };

    check_bounds(start, end, content_length, spec)
}

fn parse_bound(part: &str, spec: &str) -> Result<u64> {
    part.parse::<u64>().map_err(|_| {
        ServerError::InvalidRange(format!("'{}' has a non-integer bound", spec))
    })
}

fn check_bounds(start: u64, end: u64, content_length: u64, spec: &str) -> Result<(u64, u64)> {
    if start >= content_length {
        return Err(ServerError::InvalidRange(format!(
            "start {} is past the content length {}",
            start, content_length
        )));
    }
    if start >= end {
        return Err(ServerError::InvalidRange(format!(
            "'{}' selects an empty range",
            spec
        )));
    }
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_inclusive_form() {
        assert_eq!(parse_range("0-4", 10).unwrap(), (0, 5));
        assert_eq!(parse_range("3-9", 10).unwrap(), (3, 10));
        // inclusive end past the content clamps
        assert_eq!(parse_range("3-99", 10).unwrap(), (3, 10));
    }

    #[test]
    fn test_open_end_form() {
        assert_eq!(parse_range("0-", 10).unwrap(), (0, 10));
        assert_eq!(parse_range("7-", 10).unwrap(), (7, 10));
    }

    #[test]
    fn test_suffix_form() {
        assert_eq!(parse_range("-3", 10).unwrap(), (7, 10));
        // suffix longer than the content starts at zero
        assert_eq!(parse_range("-100", 10).unwrap(), (0, 10));
    }

    #[test]
    fn test_malformed_specs() {
        for spec in ["", "5", "1-2-3", "a-b", "1-x", "-", "-0", "--5"] {
            let err = parse_range(spec, 10).unwrap_err();
            assert!(
                matches!(err, ServerError::InvalidRange(_)),
                "spec {:?} should be InvalidRange, got {:?}",
                spec,
                err
            );
        }
    }

    #[test]
    fn test_out_of_bounds() {
        // start at or past the content length
        assert!(parse_range("10-", 10).is_err());
        assert!(parse_range("11-12", 10).is_err());
        // start after end
        assert!(parse_range("5-4", 10).is_err());
        // nothing to take from empty content
        assert!(parse_range("0-", 0).is_err());
        assert!(parse_range("-1", 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_inclusive_form_in_bounds(len in 1u64..100_000, a in 0u64..100_000, b in 0u64..200_000) {
            prop_assume!(a < len && a <= b);
            let (start, end) = parse_range(&format!("{}-{}", a, b), len).unwrap();
            prop_assert!(start < end);
            prop_assert!(end <= len);
            prop_assert_eq!(start, a);
        }

        #[test]
        fn prop_open_end_reaches_content_length(len in 1u64..100_000, a in 0u64..100_000) {
            prop_assume!(a < len);
            let (start, end) = parse_range(&format!("{}-", a), len).unwrap();
            prop_assert_eq!((start, end), (a, len));
        }

        #[test]
        fn prop_suffix_form_in_bounds(len in 1u64..100_000, n in 1u64..200_000) {
            let (start, end) = parse_range(&format!("-{}", n), len).unwrap();
            prop_assert_eq!(end, len);
            prop_assert_eq!(start, len.saturating_sub(n));
        }

        #[test]
        fn prop_garbage_never_panics(spec in "[0-9a-z-]{0,12}", len in 0u64..1000) {
            // must either parse into a valid window or fail with InvalidRange
            match parse_range(&spec, len) {
                Ok((start, end)) => {
                    prop_assert!(start < end);
                    prop_assert!(end <= len);
                }
                Err(ServerError::InvalidRange(_)) => {}
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }
    }
}
