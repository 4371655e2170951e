//! WAL log sequence number parsing and formatting.
//!
//! An LSN is printed by PostgreSQL as two hex numbers separated by a slash,
//! `"H/O"`. Ordering is numeric on the 64-bit value `(H << 32) | O`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BadLsn {
    #[error("LSN {0:?} is missing the '/' separator")]
    MissingSeparator(String),
    #[error("LSN {0:?} has a non-hexadecimal component")]
    NotHex(String),
}

/// Parses `"H/O"` into its 64-bit offset: `(H << 32) | O`.
///
/// # Errors
///
/// Returns an error if the separator is missing or either component is not
/// valid hexadecimal.
pub fn parse(lsn: &str) -> Result<u64, BadLsn> {
    let (high, low) = lsn
        .split_once('/')
        .ok_or_else(|| BadLsn::MissingSeparator(lsn.to_string()))?;

    let high = u64::from_str_radix(high, 16).map_err(|_| BadLsn::NotHex(lsn.to_string()))?;
    let low = u64::from_str_radix(low, 16).map_err(|_| BadLsn::NotHex(lsn.to_string()))?;

    Ok((high << 32) | low)
}

/// Formats a 64-bit offset back into `"H/O"`, upper-case hex, matching
/// PostgreSQL's own rendering.
#[must_use]
pub fn format(offset: u64) -> String {
    let high = offset >> 32;
    let low = offset & 0xFFFF_FFFF;
    format!("{high:X}/{low:X}")
}

/// Builds the 64-bit offset directly from the two hex components, as
/// `pglookout`'s `convert_xlog_location_to_offset` does.
#[must_use]
pub const fn offset(high: u64, low: u64) -> u64 {
    (high << 32) | low
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn parses_simple_lsn() {
        assert_eq!(parse("1/AAAA").unwrap(), offset(1, 0xAAAA));
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(parse("1AAAA"), Err(BadLsn::MissingSeparator(_))));
    }

    #[test]
    fn rejects_non_hex() {
        assert!(matches!(parse("Z/AAAA"), Err(BadLsn::NotHex(_))));
        assert!(matches!(parse("1/ZZZZ"), Err(BadLsn::NotHex(_))));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn round_trips_for_any_pair_of_32_bit_halves() {
        for (h, o) in [
            (0u64, 0u64),
            (1, 0xAAAA),
            (0xFFFF_FFFF, 0xFFFF_FFFF),
            (0x1234_5678, 0x9ABC_DEF0),
        ] {
            let formatted = format(offset(h, o));
            let parsed = parse(&formatted).unwrap();
            assert_eq!(parsed, offset(h, o));
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn equal_offsets_are_equal_regardless_of_hex_width() {
        assert_eq!(parse("0/0").unwrap(), parse("00/00").unwrap());
    }
}
