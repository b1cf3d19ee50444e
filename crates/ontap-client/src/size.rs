//! Size/unit parsing
//!
//! Sizes arrive either as plain integers (whose unit depends on the field:
//! bytes for REST, kilobytes for some legacy ZAPI fields) or as a decimal
//! number followed by a unit suffix such as `1567gb` or `1.5tb`.

use crate::error::SizeError;

/// Unit suffixes in increasing order of magnitude. `bytes` and `b` share
/// exponent 0.
const UNITS: [(&str, u32); 10] = [
    ("bytes", 0),
    ("b", 0),
    ("kb", 1),
    ("mb", 2),
    ("gb", 3),
    ("tb", 4),
    ("pb", 5),
    ("eb", 6),
    ("zb", 7),
    ("yb", 8),
];

/// Longest fractional part accepted before the value is considered malformed.
const MAX_FRACTION_DIGITS: usize = 18;

/// Which base the unit suffixes are multiplied with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitTable {
    /// 1000^n
    Decimal,
    /// 1024^n
    #[default]
    Binary,
}

impl UnitTable {
    fn base(self) -> u128 {
        match self {
            UnitTable::Decimal => 1000,
            UnitTable::Binary => 1024,
        }
    }

    /// Multiplier for a unit suffix, or `None` when the suffix is unknown.
    pub fn multiplier(self, unit: &str) -> Option<u128> {
        let unit = unit.trim().to_ascii_lowercase();
        UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .and_then(|(_, exp)| self.base().checked_pow(*exp))
    }
}

/// Parse a size string into bytes.
///
/// `implicit_unit` applies when `value` is a bare integer, e.g. `"kb"` for
/// legacy quota limits or `"bytes"` for REST fields.
pub fn parse_size(
    option: &str,
    value: &str,
    table: UnitTable,
    implicit_unit: &str,
) -> Result<u64, SizeError> {
    let unexpected_value = || SizeError::UnexpectedValue {
        option: option.to_string(),
        value: value.to_string(),
    };

    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);
    let suffix = suffix.trim();

    if number.is_empty() {
        return Err(unexpected_value());
    }

    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => {
            if suffix.is_empty() || fraction.is_empty() || fraction.contains('.') {
                return Err(unexpected_value());
            }
            (whole, fraction)
        }
        None => (number, ""),
    };
    if whole.is_empty() || fraction.len() > MAX_FRACTION_DIGITS {
        return Err(unexpected_value());
    }

    let unit = if suffix.is_empty() { implicit_unit } else { suffix };
    let multiplier = table
        .multiplier(unit)
        .ok_or_else(|| SizeError::UnexpectedUnit {
            option: option.to_string(),
            value: value.to_string(),
        })?;

    let whole: u128 = whole.parse().map_err(|_| unexpected_value())?;
    let mut bytes = whole.checked_mul(multiplier).ok_or_else(unexpected_value)?;

    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().map_err(|_| unexpected_value())?;
        let scale = 10u128.pow(u32::try_from(fraction.len()).map_err(|_| unexpected_value())?);
        let partial = digits
            .checked_mul(multiplier)
            .ok_or_else(unexpected_value)?
            / scale;
        bytes = bytes.checked_add(partial).ok_or_else(unexpected_value)?;
    }

    u64::try_from(bytes).map_err(|_| unexpected_value())
}

/// Format a byte count in the given unit, truncating toward zero.
pub fn format_size(bytes: u64, unit: &str, table: UnitTable) -> Result<String, SizeError> {
    let multiplier = table
        .multiplier(unit)
        .ok_or_else(|| SizeError::UnexpectedUnit {
            option: "unit".to_string(),
            value: unit.to_string(),
        })?;
    Ok(format!("{}{}", u128::from(bytes) / multiplier, unit.trim().to_ascii_lowercase()))
}
