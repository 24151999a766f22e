//! Human-facing business reference numbers (`PAY2510181A2B3C4D`, `RCP…`, `VIS…`).
//!
//! A reference is `PREFIX + yymmdd + 8 hex digits`. The suffix comes from a random
//! UUIDv4, so two references issued on the same day collide with probability 2^-32;
//! the store still checks every issued reference for uniqueness and re-draws on
//! collision.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

const DATE_LEN: usize = 6;
const SUFFIX_LEN: usize = 8;

/// Kind of record a reference identifies (determines the prefix).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Patient,
    Visit,
    LabRequest,
    Prescription,
    Medicine,
    Payment,
    Receipt,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 7] = [
        ReferenceKind::Patient,
        ReferenceKind::Visit,
        ReferenceKind::LabRequest,
        ReferenceKind::Prescription,
        ReferenceKind::Medicine,
        ReferenceKind::Payment,
        ReferenceKind::Receipt,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            ReferenceKind::Patient => "PAT",
            ReferenceKind::Visit => "VIS",
            ReferenceKind::LabRequest => "LAB",
            ReferenceKind::Prescription => "PRES",
            ReferenceKind::Medicine => "MED",
            ReferenceKind::Payment => "PAY",
            ReferenceKind::Receipt => "RCP",
        }
    }
}

/// Business reference number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessRef(String);

impl BusinessRef {
    /// Draw a new reference for `kind`, stamped with the date of `at`.
    pub fn generate(kind: ReferenceKind, at: DateTime<Utc>) -> Self {
        let bytes = Uuid::new_v4().into_bytes();
        Self(format!(
            "{}{}{:02X}{:02X}{:02X}{:02X}",
            kind.prefix(),
            at.format("%y%m%d"),
            bytes[0],
            bytes[1],
            bytes[2],
            bytes[3],
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The kind encoded in the prefix.
    pub fn kind(&self) -> Option<ReferenceKind> {
        ReferenceKind::ALL
            .into_iter()
            .find(|k| Self::matches_layout(&self.0, *k))
    }

    fn matches_layout(s: &str, kind: ReferenceKind) -> bool {
        let Some(rest) = s.strip_prefix(kind.prefix()) else {
            return false;
        };
        rest.len() == DATE_LEN + SUFFIX_LEN
            && rest.is_char_boundary(DATE_LEN)
            && rest[..DATE_LEN].bytes().all(|b| b.is_ascii_digit())
            && rest[DATE_LEN..].bytes().all(|b| b.is_ascii_hexdigit())
    }
}

impl core::fmt::Display for BusinessRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BusinessRef {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if ReferenceKind::ALL
            .into_iter()
            .any(|k| Self::matches_layout(s, k))
        {
            Ok(Self(s.to_string()))
        } else {
            Err(DomainError::invalid_id(format!("malformed business reference '{s}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generated_reference_carries_prefix_and_date() {
        let at = Utc.with_ymd_and_hms(2025, 10, 18, 9, 30, 0).unwrap();
        let r = BusinessRef::generate(ReferenceKind::Payment, at);
        assert!(r.as_str().starts_with("PAY251018"));
        assert_eq!(r.as_str().len(), 3 + 6 + 8);
        assert_eq!(r.kind(), Some(ReferenceKind::Payment));
    }

    #[test]
    fn prescription_prefix_is_not_confused_with_patient() {
        let r = BusinessRef::generate(ReferenceKind::Prescription, Utc::now());
        assert_eq!(r.kind(), Some(ReferenceKind::Prescription));
    }

    #[test]
    fn parse_rejects_unknown_layout() {
        assert!("PAY12".parse::<BusinessRef>().is_err());
        assert!("XYZ2510180000ABCD".parse::<BusinessRef>().is_err());
        assert!("RCP2510180000ABCD".parse::<BusinessRef>().is_ok());
    }

    #[test]
    fn consecutive_references_differ() {
        let at = Utc::now();
        let a = BusinessRef::generate(ReferenceKind::Receipt, at);
        let b = BusinessRef::generate(ReferenceKind::Receipt, at);
        assert_ne!(a, b);
    }
}
