//! Vendor and product identifiers.
//!
//! Matter encodes VIDs and PIDs in certificate subjects as exactly four
//! uppercase hexadecimal digits, zero-padded, without separators or prefix.
//! Values that do not match are rejected, never normalized.
//!
//! # Example
//!
//! ```
//! use matter_pki::identifier::{parse_product_ids, Identifier, IdentifierField};
//!
//! let vid = Identifier::validate(IdentifierField::VendorId, "FFF1").unwrap();
//! assert_eq!(vid.value(), 0xFFF1);
//!
//! assert!(Identifier::validate(IdentifierField::VendorId, "fff1").is_err());
//! assert!(parse_product_ids("").unwrap().is_empty());
//! ```

use crate::ValidationError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of an encoded identifier.
pub const IDENTIFIER_LEN: usize = 4;

/// Delimiter of the product id list.
pub const LIST_DELIMITER: char = ',';

/// Which identifier a value was supplied for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentifierField {
    /// Vendor id (`matter-oid-vid`).
    VendorId,
    /// Product id (`matter-oid-pid`).
    ProductId,
}

impl fmt::Display for IdentifierField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VendorId => write!(f, "VID"),
            Self::ProductId => write!(f, "PID"),
        }
    }
}

/// A validated 16-bit identifier in its canonical 4-hexdigit form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validates `value` against `^[0-9A-F]{4}$`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidIdentifier`] carrying the field and
    /// the offending value.
    pub fn validate(field: IdentifierField, value: &str) -> Result<Self, ValidationError> {
        if is_four_digit_upper_hex(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(ValidationError::InvalidIdentifier {
                field,
                value: value.to_string(),
            })
        }
    }

    /// Returns the encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the numeric value.
    pub fn value(&self) -> u16 {
        // Validated on construction: four hex digits always fit.
        u16::from_str_radix(&self.0, 16).unwrap_or_default()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = ValidationError;

    /// Parses a vendor id. Use [`Identifier::validate`] to name another field.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate(IdentifierField::VendorId, s)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if is_four_digit_upper_hex(&raw) {
            Ok(Self(raw))
        } else {
            Err(serde::de::Error::custom(format!(
                "invalid identifier '{raw}', should be 4-digit hexadecimal number in all capitals"
            )))
        }
    }
}

/// Parses a comma-delimited product id list.
///
/// An empty string is an empty list. Otherwise every element is validated
/// as-is (no trimming); the first invalid element rejects the whole list.
pub fn parse_product_ids(list: &str) -> Result<Vec<Identifier>, ValidationError> {
    if list.is_empty() {
        return Ok(Vec::new());
    }
    list.split(LIST_DELIMITER)
        .map(|pid| Identifier::validate(IdentifierField::ProductId, pid))
        .collect()
}

fn is_four_digit_upper_hex(value: &str) -> bool {
    value.len() == IDENTIFIER_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_boundaries() {
        for value in ["0000", "FFFF", "FFF1", "8000", "1234", "A0B9"] {
            assert!(
                Identifier::validate(IdentifierField::VendorId, value).is_ok(),
                "{value} should be accepted"
            );
        }
    }

    #[test]
    fn test_rejects_non_canonical() {
        for value in ["", "abcd", "FfF1", "12345", "123", " 123", "123 ", "0x12", "12-4", "GGGG", "١٢٣٤"] {
            let err = Identifier::validate(IdentifierField::ProductId, value).unwrap_err();
            assert_eq!(
                err,
                ValidationError::InvalidIdentifier {
                    field: IdentifierField::ProductId,
                    value: value.to_string(),
                }
            );
        }
    }

    #[test]
    fn test_value() {
        let id = Identifier::validate(IdentifierField::VendorId, "FFF1").unwrap();
        assert_eq!(id.value(), 0xFFF1);
        assert_eq!(id.to_string(), "FFF1");
    }

    #[test]
    fn test_error_names_field_and_value() {
        let err = Identifier::validate(IdentifierField::VendorId, "12ab").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("VID"));
        assert!(msg.contains("12ab"));
        assert!(msg.contains("all capitals"));
    }

    #[test]
    fn test_parse_product_ids() {
        assert!(parse_product_ids("").unwrap().is_empty());

        let pids = parse_product_ids("8000,8001,ABCD").unwrap();
        let values: Vec<_> = pids.iter().map(Identifier::as_str).collect();
        assert_eq!(values, ["8000", "8001", "ABCD"]);
    }

    #[test]
    fn test_single_bad_pid_rejects_batch() {
        let err = parse_product_ids("8000,80O1,8002").unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidIdentifier { field: IdentifierField::ProductId, ref value } if value == "80O1"
        ));
    }

    #[test]
    fn test_list_elements_are_not_trimmed() {
        assert!(parse_product_ids("8000, 8001").is_err());
        assert!(parse_product_ids("8000,").is_err());
    }

    #[test]
    fn test_deserialize_revalidates() {
        let ok: Identifier = serde_json::from_str("\"FFF1\"").unwrap();
        assert_eq!(ok.as_str(), "FFF1");
        assert!(serde_json::from_str::<Identifier>("\"fff1\"").is_err());
    }
}
