//! Error types for the coordination core.
//!
//! Variants map 1:1 onto the error kinds of spec §7. There is no HTTP status
//! mapping here — that belongs to a binding/IPC layer out of scope for this
//! crate (spec §1); callers observe failures through the `failed` event
//! (see [`crate::core`]) and this `CoreError` type.

use thiserror::Error;

use crate::ids::{ParticipantId, ParticipantIndex};

/// Coordination core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    // --- §7 ProtocolViolation: wrong-state operation. ---
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    // --- §7 MalformedPackage: hex/JSON parse failure, wrong index, crypto library rejection. ---
    #[error("malformed package from {peer}: {reason}")]
    MalformedPackage { peer: ParticipantId, reason: String },

    // --- §7 DuplicatePackage: already-received package for (round, sender). Recovered locally. ---
    #[error("duplicate package for round {round} from {sender}")]
    DuplicatePackage { round: &'static str, sender: ParticipantId },

    // --- §7 TransportLost: peer channel closed mid-session. ---
    #[error("transport lost for peer {0}")]
    TransportLost(ParticipantId),

    // --- §7 IntegrityFailure: keystore AEAD tag mismatch or group-key mismatch across peers. ---
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    // --- §7 IOError: filesystem failure during keystore. Writes are atomic. ---
    #[error("io error: {0}")]
    IoError(String),

    // --- §7 Timeout: caller-supplied deadlines on signing. ---
    #[error("timeout: {0}")]
    Timeout(String),

    // Input validation, not itself a §7 kind but needed at every component
    // boundary (session creation, signer-subset selection, curve mismatch).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Session-model specific: unknown session id, or attempt to reuse one.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session id already in use: {0}")]
    SessionIdInUse(String),

    // Crypto-engine rejected an operation outright (aggregation failure,
    // invalid signature share identified by FROST's culprit-extraction path).
    #[error("invalid signature share from participant(s): {culprits:?}")]
    InvalidSignatureShare { culprits: Vec<ParticipantIndex> },

    // Keystore / storage infrastructure.
    #[error("keystore not found: {0}")]
    KeyShareNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<redb::Error> for CoreError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for CoreError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for CoreError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for CoreError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for CoreError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for CoreError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<hex::FromHexError> for CoreError {
    fn from(err: hex::FromHexError) -> Self {
        Self::Deserialization(format!("invalid hex: {err}"))
    }
}

/// Result type alias for coordination-core operations.
pub type CoreResult<T> = Result<T, CoreError>;
