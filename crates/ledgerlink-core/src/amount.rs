//! Decimal amount conversion between display strings and base units.

use crate::types::Amount;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Empty amount")]
    Empty,
    #[error("Invalid amount '{0}'")]
    Invalid(String),
    #[error("Amount '{0}' has more than {1} decimal places")]
    TooPrecise(String, u8),
    #[error("Amount '{0}' overflows")]
    Overflow(String),
}

/// Parse a decimal string (e.g. `"0.015"`) into base units with `decimals` places.
///
/// Exact: excess precision is an error rather than being rounded away, so a
/// declared amount can be compared against an on-chain value without tolerance.
pub fn parse_amount(text: &str, decimals: u8) -> Result<Amount, AmountError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Invalid(text.to_string()));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(AmountError::Invalid(text.to_string()));
    }

    let frac = frac.trim_end_matches('0');
    if frac.len() > decimals as usize {
        return Err(AmountError::TooPrecise(text.to_string(), decimals));
    }

    let scale = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| AmountError::Overflow(text.to_string()))?;

    let whole_units: u128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| AmountError::Overflow(text.to_string()))?
    };

    let frac_units: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded
            .parse::<u128>()
            .map_err(|_| AmountError::Invalid(text.to_string()))?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or_else(|| AmountError::Overflow(text.to_string()))
}

/// Render base units as a minimal decimal string (`150000000`, 8 → `"1.5"`).
pub fn format_amount(value: Amount, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string();
    }
    let scale = 10u128.pow(decimals as u32);
    let whole = value / scale;
    let frac = value % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(parse_amount("1", 8).unwrap(), 100_000_000);
        assert_eq!(parse_amount("1.5", 8).unwrap(), 150_000_000);
        assert_eq!(parse_amount("0.00000001", 8).unwrap(), 1);
        assert_eq!(parse_amount(".25", 2).unwrap(), 25);
        assert_eq!(parse_amount("2.", 2).unwrap(), 200);
    }

    #[test]
    fn test_parse_trailing_zeros_beyond_precision() {
        assert_eq!(parse_amount("1.1000000000", 6).unwrap(), 1_100_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_amount("", 8), Err(AmountError::Empty));
        assert!(matches!(parse_amount("-1", 8), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("1e5", 8), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount(".", 8), Err(AmountError::Invalid(_))));
        assert!(matches!(
            parse_amount("0.123", 2),
            Err(AmountError::TooPrecise(_, 2))
        ));
    }

    #[test]
    fn test_parse_overflow() {
        let huge = "9".repeat(60);
        assert!(matches!(parse_amount(&huge, 18), Err(AmountError::Overflow(_))));
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(150_000_000, 8), "1.5");
        assert_eq!(format_amount(100_000_000, 8), "1");
        assert_eq!(format_amount(1, 8), "0.00000001");
        assert_eq!(format_amount(42, 0), "42");
    }

    #[test]
    fn test_eth_precision() {
        let wei = parse_amount("0.000000000000000001", 18).unwrap();
        assert_eq!(wei, 1);
        assert_eq!(format_amount(wei, 18), "0.000000000000000001");
    }
}
