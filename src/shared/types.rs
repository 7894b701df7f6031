//! Identity and small value types shared across the engine.

use serde::{Deserialize, Serialize};

/// The identity performing an operation.
///
/// The id comes from the external credential verifier; the display name is
/// denormalized onto records and audit entries so history stays readable
/// even if the identity is later renamed or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Actor used by internal maintenance jobs (expiry sweep, purge).
    pub fn system() -> Self {
        Self::new("system", "System")
    }
}

/// Validate a `YYYY-MM` month string.
pub fn validate_month(month: &str) -> Result<(), String> {
    let bytes = month.as_bytes();
    let well_formed = bytes.len() == 7
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[4] == b'-'
        && bytes[5..].iter().all(u8::is_ascii_digit);
    if !well_formed {
        return Err(format!("month must be formatted as YYYY-MM, got {month:?}"));
    }
    match month[5..].parse::<u8>() {
        Ok(1..=12) => Ok(()),
        _ => Err(format!("month component out of range in {month:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_validation() {
        assert!(validate_month("2024-01").is_ok());
        assert!(validate_month("2024-12").is_ok());
        assert!(validate_month("2024-13").is_err());
        assert!(validate_month("2024-00").is_err());
        assert!(validate_month("202401").is_err());
        assert!(validate_month("24-01").is_err());
        assert!(validate_month("2024-1").is_err());
    }
}
