//! Human-readable document numbers.
//!
//! Format: `{PREFIX}/{YYYYMMDD}/{SEQ:04}`, e.g. `STO/20261019/0001`. The
//! sequence restarts per prefix and day; uniqueness is enforced by whoever
//! allocates the numbers, not by this type.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stockflow_core::DomainError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentNumber(String);

impl DocumentNumber {
    pub fn compose(prefix: &str, day: NaiveDate, sequence: u32) -> Result<Self, DomainError> {
        validate_prefix(prefix)?;
        if sequence == 0 {
            return Err(DomainError::validation("document sequence starts at 1"));
        }
        Ok(Self(format!("{prefix}/{}/{sequence:04}", day.format("%Y%m%d"))))
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let mut parts = raw.split('/');
        let (Some(prefix), Some(day), Some(seq), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DomainError::validation(format!(
                "malformed document number '{raw}'"
            )));
        };

        validate_prefix(prefix)?;
        NaiveDate::parse_from_str(day, "%Y%m%d")
            .map_err(|e| DomainError::validation(format!("document date '{day}': {e}")))?;
        match seq.parse::<u32>() {
            Ok(n) if n > 0 && seq.len() >= 4 => {}
            _ => {
                return Err(DomainError::validation(format!(
                    "document sequence '{seq}' must be a zero-padded positive number"
                )));
            }
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn prefix(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// Business day encoded in the number.
    pub fn day(&self) -> Option<NaiveDate> {
        let day = self.0.split('/').nth(1)?;
        NaiveDate::parse_from_str(day, "%Y%m%d").ok()
    }

    /// Trailing per-day counter.
    pub fn sequence(&self) -> Option<u32> {
        self.0.rsplit('/').next()?.parse().ok()
    }
}

fn validate_prefix(prefix: &str) -> Result<(), DomainError> {
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(DomainError::validation(format!(
            "document prefix '{prefix}' must be non-empty uppercase ASCII"
        )));
    }
    Ok(())
}

impl core::fmt::Display for DocumentNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
