//! Arbitrary-precision decimal handling.
//!
//! Every quantity the chain reports — raw amounts, scaled amounts, indices,
//! rates, utilization — arrives as a decimal string. Nothing downstream of
//! the decoder is allowed to widen one into a binary float: we parse once,
//! at the boundary, into [`BigDecimal`] and keep it that way through
//! storage and arithmetic.

use thiserror::Error;

pub use bigdecimal::BigDecimal as Decimal;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseDecimalError {
    #[error("'{0}' is not a valid decimal")]
    Malformed(String),
    #[error("'{0}' must not be negative")]
    Negative(String),
}

/// Parse a decimal string as reported by a chain event attribute.
///
/// Accepts plain integers (`"1000000000000000000"`) and fractional strings
/// (`"0.85"`); does not accept scientific notation, which the chain never
/// emits.
pub fn parse_decimal(raw: &str) -> Result<Decimal, ParseDecimalError> {
    raw.parse::<Decimal>()
        .map_err(|_| ParseDecimalError::Malformed(raw.to_string()))
}

/// Parse a decimal string that must represent a non-negative quantity
/// (amounts, scaled amounts, totals).
pub fn parse_non_negative_decimal(raw: &str) -> Result<Decimal, ParseDecimalError> {
    let value = parse_decimal(raw)?;
    if value < Decimal::from(0) {
        return Err(ParseDecimalError::Negative(raw.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_amounts() {
        let d = parse_decimal("1000000000000000000").unwrap();
        assert_eq!(d, "1000000000000000000".parse::<Decimal>().unwrap());
    }

    #[test]
    fn parses_fractional_rates() {
        let d = parse_decimal("0.850000000000000000").unwrap();
        assert_eq!(d, "0.85".parse::<Decimal>().unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_decimal("not-a-number"),
            Err(ParseDecimalError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(matches!(
            parse_non_negative_decimal("-5"),
            Err(ParseDecimalError::Negative(_))
        ));
    }
}
