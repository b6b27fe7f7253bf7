//! Signing Coordinator (spec §4.6): drives the two-round FROST signing
//! protocol over a chosen signer subset.
//!
//! Unlike DKG, signing packages are already addressed to a fixed,
//! coordinator-chosen subset known up front, so there is no pre-round
//! buffering requirement here — commitments and shares simply accumulate
//! until the subset is fully represented. Invariant Sg1 (at most one active
//! signing session per wallet) is enforced by [`crate::core::WalletCore`],
//! which owns at most one `SigningCoordinator` at a time; Invariant Sg2
//! (commit strictly before share, state cleared on completion/failure) is
//! enforced here by the state machine itself.

use std::collections::BTreeMap;

use crate::crypto::CryptoEngine;
use crate::error::{CoreError, CoreResult};
use crate::ids::ParticipantIndex;
use crate::session::SharedSession;

/// Signing protocol state (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    CommitmentsCollecting,
    SharesCollecting,
    Aggregating,
    Complete,
    Failed(String),
}

/// Drives one signing request's state machine. One instance per in-flight
/// request; `WalletCore` replaces it with a fresh `Idle` instance once this
/// reaches `Complete` or `Failed` (Invariant Sg2).
pub struct SigningCoordinator {
    session: SharedSession,
    own_index: ParticipantIndex,
    engine: Box<dyn CryptoEngine>,
    key_package: Vec<u8>,
    public_key_package: Vec<u8>,

    state: SigningState,
    message: Option<Vec<u8>>,
    signers: Vec<ParticipantIndex>,

    own_nonces: Option<Vec<u8>>,
    commitments: BTreeMap<ParticipantIndex, Vec<u8>>,
    pending_own_share: Option<Vec<u8>>,
    shares: BTreeMap<ParticipantIndex, Vec<u8>>,

    signature: Option<Vec<u8>>,
}

impl SigningCoordinator {
    pub fn new(
        session: SharedSession,
        own_index: ParticipantIndex,
        engine: Box<dyn CryptoEngine>,
        key_package: Vec<u8>,
        public_key_package: Vec<u8>,
    ) -> Self {
        Self {
            session,
            own_index,
            engine,
            key_package,
            public_key_package,
            state: SigningState::Idle,
            message: None,
            signers: Vec::new(),
            own_nonces: None,
            commitments: BTreeMap::new(),
            pending_own_share: None,
            shares: BTreeMap::new(),
            signature: None,
        }
    }

    pub fn state(&self) -> &SigningState {
        &self.state
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    fn fail(&mut self, reason: impl Into<String>) -> CoreError {
        let reason = reason.into();
        tracing::warn!(reason = %reason, session_id = %self.session.session_id(), "signing request failed");
        self.state = SigningState::Failed(reason.clone());
        CoreError::ProtocolViolation(reason)
    }

    /// Begin signing `message` with the given signer subset (must include
    /// `own_index` and have length >= the session threshold).
    ///
    /// Returns this participant's own commitment, for broadcast.
    pub fn start(&mut self, message: Vec<u8>, signers: Vec<ParticipantIndex>) -> CoreResult<Vec<u8>> {
        if self.state != SigningState::Idle {
            return Err(CoreError::ProtocolViolation(format!(
                "signing request already started (state: {:?})",
                self.state
            )));
        }
        if signers.len() < self.session.threshold() as usize {
            return Err(CoreError::InvalidInput(format!(
                "signer subset of size {} is below threshold {}",
                signers.len(),
                self.session.threshold()
            )));
        }
        if !signers.contains(&self.own_index) {
            return Err(CoreError::InvalidInput("signer subset must include own index".to_string()));
        }

        let (nonces, commitment) = self
            .engine
            .sign_commit(&self.key_package)
            .map_err(|e| self.fail(format!("sign_commit failed: {e}")))?;

        self.message = Some(message);
        self.signers = signers;
        self.own_nonces = Some(nonces);
        self.commitments.insert(self.own_index, commitment.clone());
        self.state = SigningState::CommitmentsCollecting;

        Ok(commitment)
    }

    fn all_commitments_received(&self) -> bool {
        self.signers.iter().all(|s| self.commitments.contains_key(s))
    }

    fn all_shares_received(&self) -> bool {
        self.signers.iter().all(|s| self.shares.contains_key(s))
    }

    /// Add a commitment from `from`. Once every signer in the chosen subset
    /// has a commitment on record, this computes and buffers this
    /// participant's own signature share (Invariant Sg2: commit precedes
    /// sign), retrievable via [`Self::take_own_share`].
    pub fn add_commitment(&mut self, from: ParticipantIndex, commitment: Vec<u8>) -> CoreResult<()> {
        if self.state != SigningState::CommitmentsCollecting {
            return Err(CoreError::ProtocolViolation(format!(
                "not collecting commitments (state: {:?})",
                self.state
            )));
        }
        if !self.signers.contains(&from) {
            return Err(CoreError::ProtocolViolation(format!("{from} is not in the chosen signer subset")));
        }
        if self.commitments.contains_key(&from) {
            return Err(CoreError::DuplicatePackage {
                round: "signing_commitment",
                sender: self.participant_id_of(from),
            });
        }

        self.commitments.insert(from, commitment);

        if self.all_commitments_received() {
            self.advance_to_shares()?;
        }
        Ok(())
    }

    fn advance_to_shares(&mut self) -> CoreResult<()> {
        let nonces = self
            .own_nonces
            .clone()
            .ok_or_else(|| CoreError::Internal("own nonces missing at shares transition".to_string()))?;
        let message = self
            .message
            .clone()
            .ok_or_else(|| CoreError::Internal("message missing at shares transition".to_string()))?;

        let own_share = self
            .engine
            .sign_round2(&self.key_package, &nonces, &message, &self.commitments)
            .map_err(|e| self.fail(format!("sign_round2 failed: {e}")))?;

        self.shares.insert(self.own_index, own_share.clone());
        self.pending_own_share = Some(own_share);
        self.state = SigningState::SharesCollecting;
        Ok(())
    }

    /// Drain this participant's own signature share, to be broadcast.
    /// Populated once, when commitments complete; empty before and after.
    pub fn take_own_share(&mut self) -> Option<Vec<u8>> {
        self.pending_own_share.take()
    }

    /// Add a signature share from `from`. Once every signer's share is on
    /// record, aggregates into the final signature.
    pub fn add_share(&mut self, from: ParticipantIndex, share: Vec<u8>) -> CoreResult<()> {
        if self.state != SigningState::SharesCollecting {
            return Err(CoreError::ProtocolViolation(format!(
                "not collecting shares (state: {:?})",
                self.state
            )));
        }
        if !self.signers.contains(&from) {
            return Err(CoreError::ProtocolViolation(format!("{from} is not in the chosen signer subset")));
        }
        if self.shares.contains_key(&from) {
            return Err(CoreError::DuplicatePackage {
                round: "signing_share",
                sender: self.participant_id_of(from),
            });
        }

        self.shares.insert(from, share);

        if self.all_shares_received() {
            self.aggregate()?;
        }
        Ok(())
    }

    fn aggregate(&mut self) -> CoreResult<()> {
        self.state = SigningState::Aggregating;

        let message = self
            .message
            .clone()
            .ok_or_else(|| CoreError::Internal("message missing at aggregation".to_string()))?;

        let signature = self
            .engine
            .aggregate(&self.public_key_package, &message, &self.commitments, &self.shares)
            .map_err(|e| match e {
                CoreError::InvalidSignatureShare { culprits } => {
                    self.state = SigningState::Failed(format!("invalid signature share(s): {culprits:?}"));
                    CoreError::InvalidSignatureShare { culprits }
                }
                other => self.fail(format!("aggregation failed: {other}")),
            })?;

        self.signature = Some(signature);
        self.state = SigningState::Complete;
        tracing::info!(session_id = %self.session.session_id(), "signing complete");
        Ok(())
    }

    /// A signer's channel dropped mid-request: abandon.
    pub fn on_peer_lost(&mut self) {
        if !matches!(self.state, SigningState::Complete | SigningState::Failed(_)) {
            self.state = SigningState::Failed("peer lost".to_string());
        }
    }

    /// Caller-supplied deadline elapsed before `Complete`.
    pub fn on_timeout(&mut self) {
        if !matches!(self.state, SigningState::Complete | SigningState::Failed(_)) {
            self.state = SigningState::Failed("timeout".to_string());
        }
    }

    fn participant_id_of(&self, index: ParticipantIndex) -> crate::ids::ParticipantId {
        self.session
            .id_at(index)
            .cloned()
            .unwrap_or_else(|| crate::ids::ParticipantId::new(format!("index-{index}")))
    }
}
