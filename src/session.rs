//! Session Model (spec §4.3): immutable descriptors of a proposed/active
//! multi-party session.
//!
//! Pure data plus the validation the spec assigns to this component: unique
//! ids, `1 <= t <= n`, distinct participants, own id present. Everything else
//! — mesh liveness, DKG/signing progress — lives in the coordinators that
//! take a `SessionDescriptor` as an immutable input (§9 "cyclic references":
//! coordinators hold an `Arc<SessionDescriptor>`, never a back-reference).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::curve::Curve;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ParticipantId, ParticipantIndex};

/// Session identifier. Opaque string; global uniqueness is the proposer's
/// responsibility (spec §3 Invariant S1), enforced at the `WalletCore`
/// layer (one active `SessionDescriptor` per id, see [`crate::core`]).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Immutable descriptor of a proposed/active multi-party session (spec §3).
///
/// Every participant holds a byte-identical copy before DKG round 1 begins
/// (Invariant S1); there is no mutation after construction, only the
/// coordinators' own state machines change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    session_id: SessionId,
    threshold: u16,
    /// Participants in the session's fixed total order; index `i` (0-based)
    /// corresponds to `ParticipantIndex::new_unwrap(i + 1)`.
    participants: Vec<ParticipantId>,
    curve: Curve,
    blockchain_tag: String,
    /// HPKE public keys used to encrypt DKG round-2 packages (§10.7
    /// enrichment, additive over the base spec's data model).
    #[serde(default)]
    participant_hpke_pubkeys: HashMap<ParticipantId, String>,
}

impl SessionDescriptor {
    /// Construct and validate a session descriptor.
    ///
    /// `participants` is sorted to fix the total order the spec requires
    /// (`ParticipantId` is `Ord`); this makes the id→index mapping
    /// reproducible from the unordered set the proposer collects, so two
    /// proposers who agree on membership agree on indices without an
    /// explicit ordering handshake.
    pub fn new(
        session_id: SessionId,
        threshold: u16,
        mut participants: Vec<ParticipantId>,
        curve: Curve,
        blockchain_tag: impl Into<String>,
        own_id: &ParticipantId,
    ) -> CoreResult<Self> {
        if session_id.as_str().is_empty() {
            return Err(CoreError::InvalidInput("session_id must not be empty".to_string()));
        }

        let total = u16::try_from(participants.len())
            .map_err(|_| CoreError::InvalidInput("too many participants".to_string()))?;

        if threshold == 0 || threshold > total {
            return Err(CoreError::InvalidInput(format!(
                "threshold must satisfy 1 <= t <= n (t={threshold}, n={total})"
            )));
        }

        participants.sort();
        participants.dedup();
        if participants.len() != total as usize {
            return Err(CoreError::InvalidInput("participant ids must be distinct".to_string()));
        }

        if !participants.contains(own_id) {
            return Err(CoreError::InvalidInput(format!(
                "own participant id {own_id} is not a member of this session"
            )));
        }

        Ok(Self {
            session_id,
            threshold,
            participants,
            curve,
            blockchain_tag: blockchain_tag.into(),
            participant_hpke_pubkeys: HashMap::new(),
        })
    }

    /// Attach HPKE public keys for round-2 encryption (§10.7). Additive,
    /// does not re-validate membership invariants.
    #[must_use]
    pub fn with_hpke_pubkeys(mut self, pubkeys: HashMap<ParticipantId, String>) -> Self {
        self.participant_hpke_pubkeys = pubkeys;
        self
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    #[allow(clippy::cast_possible_truncation)]
    pub fn total(&self) -> u16 {
        self.participants.len() as u16
    }

    pub fn curve(&self) -> Curve {
        self.curve
    }

    pub fn blockchain_tag(&self) -> &str {
        &self.blockchain_tag
    }

    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn hpke_pubkey(&self, id: &ParticipantId) -> Option<&str> {
        self.participant_hpke_pubkeys.get(id).map(String::as_str)
    }

    /// 1-based index of `id` in the session's fixed total order.
    pub fn index_of(&self, id: &ParticipantId) -> Option<ParticipantIndex> {
        self.participants
            .iter()
            .position(|p| p == id)
            .and_then(|pos| ParticipantIndex::new(u16::try_from(pos + 1).ok()?))
    }

    /// The `ParticipantId` at a given 1-based index.
    pub fn id_at(&self, index: ParticipantIndex) -> Option<&ParticipantId> {
        self.participants.get(usize::from(index.get() - 1))
    }

    /// Every participant other than `id`.
    pub fn peers_of<'a>(&'a self, id: &'a ParticipantId) -> impl Iterator<Item = &'a ParticipantId> {
        self.participants.iter().filter(move |p| *p != id)
    }
}

/// Shared, reference-counted handle to a frozen session descriptor. The DKG
/// and signing coordinators hold this rather than owning/copying the
/// participant list per round (§9: id-keyed lookups, not reference cycles).
pub type SharedSession = Arc<SessionDescriptor>;
