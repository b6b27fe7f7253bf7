//! Participant identity types.
//!
//! The wire-level identity of a participant is an opaque, operator-assigned
//! string (`ParticipantId`, e.g. `"mpc-2"`). FROST itself only knows about
//! 1-based numeric identifiers (`ParticipantIndex`); a session fixes the
//! mapping between the two by sorting the participant id list once, at
//! session-creation time, and never again.

use std::fmt;
use std::num::NonZeroU16;

use serde::{Deserialize, Serialize};

/// Opaque, operator-assigned participant identity (e.g. `"mpc-2"`).
///
/// Unique within a session; stable across sessions is the operator's
/// business, not this crate's.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// 1-based FROST participant index, fixed by a session's total order over
/// `ParticipantId`s. Never zero (FROST identifiers are nonzero scalars).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct ParticipantIndex(NonZeroU16);

impl ParticipantIndex {
    /// Construct from a 1-based value, rejecting zero.
    pub fn new(value: u16) -> Option<Self> {
        NonZeroU16::new(value).map(Self)
    }

    /// Construct from a known-nonzero 1-based value.
    ///
    /// # Panics
    ///
    /// Panics if `value` is zero. Intended for call sites (tests, loops over
    /// `1..=n`) that already hold the invariant.
    pub fn new_unwrap(value: u16) -> Self {
        Self::new(value).unwrap_or_else(|| panic!("participant index must be nonzero"))
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for ParticipantIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for ParticipantIndex {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "participant index must be nonzero".to_string())
    }
}

impl From<ParticipantIndex> for u16 {
    fn from(value: ParticipantIndex) -> Self {
        value.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_index_rejects_zero() {
        assert!(ParticipantIndex::new(0).is_none());
        assert!(ParticipantIndex::new(1).is_some());
    }

    #[test]
    fn participant_id_display_roundtrip() {
        let id = ParticipantId::new("mpc-2");
        assert_eq!(id.to_string(), "mpc-2");
        assert_eq!(id.as_str(), "mpc-2");
    }

    #[test]
    fn participant_index_serde_rejects_zero() {
        let err: Result<ParticipantIndex, _> = serde_json::from_str("0");
        assert!(err.is_err());
    }
}
