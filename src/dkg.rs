//! DKG Coordinator (spec §4.5): drives the three-round FROST key generation
//! protocol for one session.
//!
//! Round 1 is a broadcast: every participant's package must reach every
//! other participant before round 2 can start. Round 2 is pairwise: each
//! participant sends one package to each other participant, optionally HPKE
//! sealed. Packages that arrive before this coordinator has reached the
//! round they belong to are buffered and replayed the moment it transitions
//! into that round (spec §4.5 "Package buffering" / "Replay-after-transition
//! rule") rather than rejected — DKG has no fixed wall-clock ordering across
//! participants.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crypto::CryptoEngine;
use crate::crypto::hpke::{self, HpkeKeyPair};
use crate::error::{CoreError, CoreResult};
use crate::ids::ParticipantIndex;
use crate::session::SharedSession;

/// DKG protocol state (spec §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DkgState {
    Idle,
    Round1InProgress,
    Round2InProgress,
    Finalizing,
    Complete,
    Failed(String),
}

/// Result of a completed DKG run.
#[derive(Debug, Clone)]
pub struct DkgOutcome {
    pub key_package: Vec<u8>,
    pub public_key_package: Vec<u8>,
    pub group_public_key: Vec<u8>,
}

/// An outgoing round-2 package this coordinator must hand to the transport
/// layer, addressed to one recipient.
#[derive(Debug, Clone)]
pub struct OutgoingRound2Package {
    pub to: ParticipantIndex,
    pub package: Vec<u8>,
    pub encrypted: bool,
}

struct BufferedPackage {
    from: ParticipantIndex,
    bytes: Vec<u8>,
}

/// Drives one session's DKG state machine. One instance per session; not
/// reused after `Complete` or `Failed`.
pub struct DkgCoordinator {
    session: SharedSession,
    own_index: ParticipantIndex,
    engine: Box<dyn CryptoEngine>,
    hpke_keypair: Option<Arc<HpkeKeyPair>>,

    state: DkgState,

    round1_secret: Option<Vec<u8>>,
    round1_packages: BTreeMap<ParticipantIndex, Vec<u8>>,
    round1_buffer: Vec<BufferedPackage>,

    round2_secret: Option<Vec<u8>>,
    round2_packages: BTreeMap<ParticipantIndex, Vec<u8>>,
    round2_buffer: Vec<BufferedPackage>,
    pending_outgoing_round2: Vec<OutgoingRound2Package>,

    outcome: Option<DkgOutcome>,
}

impl DkgCoordinator {
    pub fn new(
        session: SharedSession,
        own_index: ParticipantIndex,
        engine: Box<dyn CryptoEngine>,
        hpke_keypair: Option<Arc<HpkeKeyPair>>,
    ) -> Self {
        Self {
            session,
            own_index,
            engine,
            hpke_keypair,
            state: DkgState::Idle,
            round1_secret: None,
            round1_packages: BTreeMap::new(),
            round1_buffer: Vec::new(),
            round2_secret: None,
            round2_packages: BTreeMap::new(),
            round2_buffer: Vec::new(),
            pending_outgoing_round2: Vec::new(),
            outcome: None,
        }
    }

    pub fn state(&self) -> &DkgState {
        &self.state
    }

    pub fn outcome(&self) -> Option<&DkgOutcome> {
        self.outcome.as_ref()
    }

    /// Drain the round-2 packages this coordinator must hand to the
    /// transport layer. Populated once, when round 1 completes and
    /// `dkg_part2` runs; empty before and after.
    pub fn take_outgoing_round2_packages(&mut self) -> Vec<OutgoingRound2Package> {
        std::mem::take(&mut self.pending_outgoing_round2)
    }

    fn fail(&mut self, reason: impl Into<String>) -> CoreError {
        let reason = reason.into();
        tracing::warn!(reason = %reason, session_id = %self.session.session_id(), "dkg session abandoned");
        self.state = DkgState::Failed(reason.clone());
        CoreError::ProtocolViolation(reason)
    }

    /// Begin round 1: generate this participant's round-1 package.
    ///
    /// Records the local contribution into the received set immediately
    /// (Invariant D2) so [`Self::all_round1_received`] only ever waits on
    /// genuinely remote packages.
    pub fn start(&mut self) -> CoreResult<Vec<u8>> {
        if self.state != DkgState::Idle {
            return Err(CoreError::ProtocolViolation(format!(
                "dkg already started (state: {:?})",
                self.state
            )));
        }

        let (secret, package) = self
            .engine
            .dkg_part1(self.own_index, self.session.threshold(), self.session.total())
            .map_err(|e| self.fail(format!("dkg_part1 failed: {e}")))?;

        self.round1_secret = Some(secret);
        self.round1_packages.insert(self.own_index, package.clone());
        self.state = DkgState::Round1InProgress;

        let buffered = std::mem::take(&mut self.round1_buffer);
        for pending in buffered {
            self.ingest_round1(pending.from, pending.bytes)?;
        }

        Ok(package)
    }

    fn all_round1_received(&self) -> bool {
        self.round1_packages.len() == self.session.total() as usize
    }

    fn all_round2_received(&self) -> bool {
        self.round2_packages.len() == self.session.total() as usize - 1
    }

    /// Add a round-1 package received from `from`.
    ///
    /// Arriving before [`Self::start`] has run is buffered, not rejected
    /// (spec §4.5 buffering rule). `from == own_index` is always a protocol
    /// violation (Invariant D1: this coordinator's own package is recorded
    /// at generation time in [`Self::start`], never through this path).
    pub fn add_round1_package(&mut self, from: ParticipantIndex, bytes: Vec<u8>) -> CoreResult<()> {
        if from == self.own_index {
            return Err(CoreError::ProtocolViolation(
                "own round-1 package must not be re-ingested through add_round1_package".to_string(),
            ));
        }

        match self.state {
            DkgState::Idle => {
                self.round1_buffer.push(BufferedPackage { from, bytes });
                Ok(())
            }
            DkgState::Round1InProgress => self.ingest_round1(from, bytes),
            DkgState::Round2InProgress | DkgState::Finalizing | DkgState::Complete => {
                Err(CoreError::DuplicatePackage { round: "round1", sender: self.participant_id_of(from) })
            }
            DkgState::Failed(ref reason) => {
                Err(CoreError::ProtocolViolation(format!("dkg session already failed: {reason}")))
            }
        }
    }

    fn ingest_round1(&mut self, from: ParticipantIndex, bytes: Vec<u8>) -> CoreResult<()> {
        if self.round1_packages.contains_key(&from) {
            return Err(CoreError::DuplicatePackage { round: "round1", sender: self.participant_id_of(from) });
        }
        self.round1_packages.insert(from, bytes);

        if self.all_round1_received() {
            self.advance_to_round2()?;
        }
        Ok(())
    }

    fn advance_to_round2(&mut self) -> CoreResult<()> {
        let round1_secret = self
            .round1_secret
            .clone()
            .ok_or_else(|| CoreError::Internal("round1 secret missing at round2 transition".to_string()))?;

        let (round2_secret, outgoing) = self
            .engine
            .dkg_part2(self.own_index, &round1_secret, &self.round1_packages)
            .map_err(|e| self.fail(format!("dkg_part2 failed: {e}")))?;

        self.round2_secret = Some(round2_secret);
        self.state = DkgState::Round2InProgress;

        self.pending_outgoing_round2 = self.prepare_outgoing_round2(outgoing)?;

        let buffered = std::mem::take(&mut self.round2_buffer);
        for pending in buffered {
            self.ingest_round2(pending.from, pending.bytes)?;
        }

        Ok(())
    }

    fn prepare_outgoing_round2(
        &self,
        outgoing: BTreeMap<ParticipantIndex, Vec<u8>>,
    ) -> CoreResult<Vec<OutgoingRound2Package>> {
        let mut prepared = Vec::with_capacity(outgoing.len());
        for (to, package) in outgoing {
            let recipient_id = self.participant_id_of(to);
            let (bytes, encrypted) = match self.session.hpke_pubkey(&recipient_id) {
                Some(pubkey_b64) => {
                    let pubkey = HpkeKeyPair::public_key_from_base64(pubkey_b64)?;
                    let info = hpke::dkg_round2_info(
                        &uuid_for_session(self.session.session_id()),
                        self.own_index.get(),
                        to.get(),
                        None,
                    );
                    let encrypted = hpke::encrypt(&pubkey, &package, &info)?;
                    (encrypted.to_base64().into_bytes(), true)
                }
                None => (package, false),
            };
            prepared.push(OutgoingRound2Package { to, package: bytes, encrypted });
        }
        Ok(prepared)
    }

    /// Add a round-2 package received from `from`, addressed to us.
    ///
    /// `encrypted` indicates whether `bytes` is an HPKE-sealed payload that
    /// must be opened with this coordinator's HPKE secret key before use.
    pub fn add_round2_package(
        &mut self,
        from: ParticipantIndex,
        bytes: Vec<u8>,
        encrypted: bool,
    ) -> CoreResult<()> {
        if from == self.own_index {
            return Err(CoreError::ProtocolViolation(
                "own round-2 package is never sent to self".to_string(),
            ));
        }

        let plaintext = if encrypted {
            let keypair = self.hpke_keypair.as_ref().ok_or_else(|| {
                CoreError::ProtocolViolation("no hpke keypair configured to decrypt round-2 package".to_string())
            })?;
            let payload = hpke::EncryptedPayload::from_base64(
                std::str::from_utf8(&bytes)
                    .map_err(|e| CoreError::MalformedPackage { peer: self.participant_id_of(from), reason: e.to_string() })?,
            )?;
            let info = hpke::dkg_round2_info(
                &uuid_for_session(self.session.session_id()),
                from.get(),
                self.own_index.get(),
                None,
            );
            hpke::decrypt(keypair.secret_key(), &payload, &info)?
        } else {
            bytes
        };

        match self.state {
            DkgState::Round1InProgress | DkgState::Idle => {
                self.round2_buffer.push(BufferedPackage { from, bytes: plaintext });
                Ok(())
            }
            DkgState::Round2InProgress => self.ingest_round2(from, plaintext),
            DkgState::Finalizing | DkgState::Complete => {
                Err(CoreError::DuplicatePackage { round: "round2", sender: self.participant_id_of(from) })
            }
            DkgState::Failed(ref reason) => {
                Err(CoreError::ProtocolViolation(format!("dkg session already failed: {reason}")))
            }
        }
    }

    fn ingest_round2(&mut self, from: ParticipantIndex, bytes: Vec<u8>) -> CoreResult<()> {
        if self.round2_packages.contains_key(&from) {
            return Err(CoreError::DuplicatePackage { round: "round2", sender: self.participant_id_of(from) });
        }
        self.round2_packages.insert(from, bytes);

        if self.all_round2_received() {
            self.finalize()?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> CoreResult<()> {
        self.state = DkgState::Finalizing;

        let round2_secret = self
            .round2_secret
            .clone()
            .ok_or_else(|| CoreError::Internal("round2 secret missing at finalize".to_string()))?;

        let (key_package, public_key_package) = self
            .engine
            .dkg_part3(self.own_index, &round2_secret, &self.round1_packages, &self.round2_packages)
            .map_err(|e| self.fail(format!("dkg_part3 failed: {e}")))?;

        let group_public_key = self
            .engine
            .group_public_key(&public_key_package)
            .map_err(|e| self.fail(format!("group public key extraction failed: {e}")))?;

        self.outcome = Some(DkgOutcome { key_package, public_key_package, group_public_key });
        self.state = DkgState::Complete;
        tracing::info!(session_id = %self.session.session_id(), "dkg complete");
        Ok(())
    }

    /// A peer's channel dropped mid-session: abandon (spec §4.5 failure
    /// semantics — no retry at this layer).
    pub fn on_peer_lost(&mut self) {
        if !matches!(self.state, DkgState::Complete | DkgState::Failed(_)) {
            self.state = DkgState::Failed("peer lost".to_string());
        }
    }

    fn participant_id_of(&self, index: ParticipantIndex) -> crate::ids::ParticipantId {
        self.session
            .id_at(index)
            .cloned()
            .unwrap_or_else(|| crate::ids::ParticipantId::new(format!("index-{index}")))
    }
}

/// Best-effort deterministic UUID derived from a session id, so the HPKE
/// info binding stays stable across the lifetime of a session without
/// requiring `SessionId` itself to be a UUID.
fn uuid_for_session(session_id: &crate::session::SessionId) -> uuid::Uuid {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(session_id.as_str().as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::engine_for;
    use crate::curve::Curve;
    use crate::ids::ParticipantId;
    use crate::session::{SessionDescriptor, SessionId};
    use std::sync::Arc;

    fn build_session(total: u16, threshold: u16, own: &str) -> SharedSession {
        let ids: Vec<ParticipantId> = (1..=total).map(|i| ParticipantId::new(format!("mpc-{i}"))).collect();
        Arc::new(
            SessionDescriptor::new(
                SessionId::new("sess-1"),
                threshold,
                ids,
                Curve::Secp256k1,
                "ethereum",
                &ParticipantId::new(own),
            )
            .unwrap(),
        )
    }

    #[test]
    fn full_three_party_dkg_completes() {
        let session = build_session(3, 2, "mpc-1");
        let mut coordinators: Vec<DkgCoordinator> = (1..=3)
            .map(|i| {
                DkgCoordinator::new(
                    session.clone(),
                    ParticipantIndex::new_unwrap(i),
                    engine_for(Curve::Secp256k1),
                    None,
                )
            })
            .collect();

        let round1: Vec<Vec<u8>> = coordinators.iter_mut().map(|c| c.start().unwrap()).collect();

        for (i, coordinator) in coordinators.iter_mut().enumerate() {
            for (j, package) in round1.iter().enumerate() {
                if i == j {
                    continue;
                }
                let from = ParticipantIndex::new_unwrap((j + 1) as u16);
                coordinator.add_round1_package(from, package.clone()).unwrap();
            }
        }

        for coordinator in &coordinators {
            assert_eq!(*coordinator.state(), DkgState::Round2InProgress);
        }

        // Round 2: drain each coordinator's outgoing packages (produced as a
        // side effect of reaching Round2InProgress) and deliver them.
        let mut round2_inbox: Vec<BTreeMap<ParticipantIndex, Vec<u8>>> = vec![BTreeMap::new(); 3];
        for (i, coordinator) in coordinators.iter_mut().enumerate() {
            let own_index = ParticipantIndex::new_unwrap((i + 1) as u16);
            for outgoing in coordinator.take_outgoing_round2_packages() {
                round2_inbox[(outgoing.to.get() - 1) as usize].insert(own_index, outgoing.package);
            }
        }

        for (i, coordinator) in coordinators.iter_mut().enumerate() {
            for (&from, package) in &round2_inbox[i] {
                coordinator.add_round2_package(from, package.clone(), false).unwrap();
            }
        }

        for coordinator in &coordinators {
            assert_eq!(*coordinator.state(), DkgState::Complete);
            assert!(coordinator.outcome().is_some());
        }
    }

    #[test]
    fn self_ingest_into_round1_is_rejected() {
        let session = build_session(2, 1, "mpc-1");
        let mut coordinator =
            DkgCoordinator::new(session, ParticipantIndex::new_unwrap(1), engine_for(Curve::Secp256k1), None);
        coordinator.start().unwrap();
        let err = coordinator.add_round1_package(ParticipantIndex::new_unwrap(1), vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, CoreError::ProtocolViolation(_)));
    }

    #[test]
    fn round1_package_before_start_is_buffered_then_applied() {
        let session = build_session(2, 1, "mpc-1");
        let mut coordinator =
            DkgCoordinator::new(session.clone(), ParticipantIndex::new_unwrap(1), engine_for(Curve::Secp256k1), None);

        let mut other =
            DkgCoordinator::new(session, ParticipantIndex::new_unwrap(2), engine_for(Curve::Secp256k1), None);
        let other_package = other.start().unwrap();

        // Arrives before our own start(): must be buffered, not rejected.
        coordinator.add_round1_package(ParticipantIndex::new_unwrap(2), other_package).unwrap();
        assert_eq!(*coordinator.state(), DkgState::Idle);

        coordinator.start().unwrap();
        assert_eq!(*coordinator.state(), DkgState::Round2InProgress);
    }

    #[test]
    fn duplicate_round1_package_is_recoverable_error() {
        let session = build_session(2, 1, "mpc-1");
        let mut coordinator =
            DkgCoordinator::new(session.clone(), ParticipantIndex::new_unwrap(1), engine_for(Curve::Secp256k1), None);
        coordinator.start().unwrap();

        let mut other =
            DkgCoordinator::new(session, ParticipantIndex::new_unwrap(2), engine_for(Curve::Secp256k1), None);
        let other_package = other.start().unwrap();

        coordinator.add_round1_package(ParticipantIndex::new_unwrap(2), other_package.clone()).unwrap();
        let err = coordinator.add_round1_package(ParticipantIndex::new_unwrap(2), other_package).unwrap_err();
        assert!(matches!(err, CoreError::DuplicatePackage { .. }));
    }
}
