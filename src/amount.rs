//! Exact BTC <-> satoshi conversion. No floating point anywhere.

use crate::error::{Result, VaultError};

pub const SATS_PER_BTC: i64 = 100_000_000;

/// 21 million BTC in satoshis.
pub const MAX_MONEY_SATS: i64 = 21_000_000 * SATS_PER_BTC;

/// Renders satoshis as a BTC decimal string with exactly eight fractional
/// digits, e.g. `5847392` -> `"0.05847392"`. Negative amounts (outgoing
/// transactions) keep their sign.
pub fn format_btc(satoshis: i64) -> String {
    let sign = if satoshis < 0 { "-" } else { "" };
    let abs = satoshis.unsigned_abs();
    let per = SATS_PER_BTC as u64;
    format!("{sign}{}.{:08}", abs / per, abs % per)
}

/// Parses a BTC decimal string into satoshis.
///
/// Accepts an optional leading `-`, up to eight fractional digits and
/// amounts up to [`MAX_MONEY_SATS`] in magnitude.
pub fn to_satoshis(btc: &str) -> Result<i64> {
    let s = btc.trim();
    let invalid = |why: &str| VaultError::InvalidArgument(format!("invalid BTC amount '{s}': {why}"));

    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(invalid("empty"));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if frac.len() > 8 {
        return Err(invalid("more than 8 decimal places"));
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("too large"))?
    };
    let frac_sats: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<8}").parse().map_err(|_| invalid("not a decimal number"))?
    };

    let sats = whole
        .checked_mul(SATS_PER_BTC)
        .and_then(|w| w.checked_add(frac_sats))
        .filter(|v| *v <= MAX_MONEY_SATS)
        .ok_or_else(|| invalid("exceeds 21,000,000 BTC"))?;

    Ok(if negative { -sats } else { sats })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_eight_decimals() {
        assert_eq!(format_btc(5_847_392), "0.05847392");
        assert_eq!(format_btc(0), "0.00000000");
        assert_eq!(format_btc(1), "0.00000001");
        assert_eq!(format_btc(SATS_PER_BTC), "1.00000000");
        assert_eq!(format_btc(-567_890), "-0.00567890");
    }

    #[test]
    fn formats_max_money_exactly() {
        assert_eq!(format_btc(MAX_MONEY_SATS), "21000000.00000000");
        assert_eq!(format_btc(MAX_MONEY_SATS - 1), "20999999.99999999");
    }

    #[test]
    fn parses_exact_amounts() {
        assert_eq!(to_satoshis("0.05847392").unwrap(), 5_847_392);
        assert_eq!(to_satoshis("1").unwrap(), SATS_PER_BTC);
        assert_eq!(to_satoshis("0.1").unwrap(), 10_000_000);
        assert_eq!(to_satoshis(".5").unwrap(), 50_000_000);
        assert_eq!(to_satoshis("20999999.99999999").unwrap(), MAX_MONEY_SATS - 1);
        assert_eq!(to_satoshis("-0.00567890").unwrap(), -567_890);
    }

    #[test]
    fn float_trouble_amounts_stay_exact() {
        // 0.1 + 0.2 and 1.15 are the usual binary-float casualties
        assert_eq!(to_satoshis("0.3").unwrap(), 30_000_000);
        assert_eq!(to_satoshis("1.15").unwrap(), 115_000_000);
        assert_eq!(to_satoshis("20999999.12345678").unwrap(), 2_099_999_912_345_678);
    }

    #[test]
    fn rejects_bad_input() {
        for bad in ["", ".", "abc", "1.123456789", "1e5", "21000000.00000001", "1,5", "--1"] {
            assert!(to_satoshis(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn format_then_parse_is_identity() {
        for sats in [0, 1, 99, 5_847_392, 123_456_789_012, MAX_MONEY_SATS] {
            assert_eq!(to_satoshis(&format_btc(sats)).unwrap(), sats);
        }
    }
}
