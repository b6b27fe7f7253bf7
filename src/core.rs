//! Wallet Core (spec §5, §6): ties the Keystore, Mesh/DKG/Signing
//! coordinators, Crypto Engine, and audit log together behind one
//! command/event interface for a single wallet.
//!
//! Scheduling model (§5): one `WalletCore` owns exactly one DKG session and
//! at most one signing request at a time, and every mutation runs on the
//! logical task that owns it — there is no cross-task aliasing of the
//! in-flight coordinators, mirroring the single-owner requirement of the
//! (non-reentrant) FROST crate state underneath.

use std::sync::Arc;

use serde_json::json;

use crate::audit::{AuditActor, AuditEventType, AuditLogger, AuditOutcome};
use crate::crypto::engine_for;
use crate::crypto::hpke::HpkeKeyPair;
use crate::dkg::{DkgCoordinator, DkgState};
use crate::error::{CoreError, CoreResult};
use crate::ids::{ParticipantId, ParticipantIndex};
use crate::keystore::{KeyShare, Keystore};
use crate::mesh::{ChannelState, MeshCoordinator, MeshState};
use crate::session::{SessionDescriptor, SessionId, SharedSession};
use crate::signing::{SigningCoordinator, SigningState};
use crate::transport::{DkgRound, Frame, Transport};

/// Commands accepted by a [`WalletCore`] (spec §6 upward interface).
pub enum Command {
    ProposeSession { session: SessionDescriptor },
    AcceptSession { session_id: SessionId },
    StartDkg,
    StartSigning { message: Vec<u8>, subset: Vec<ParticipantIndex> },
    Reset,
    /// Encrypt and write the most recently completed DKG's key share into
    /// the vault (spec §4.5 finalization: "persist KeyShare via Keystore").
    /// A no-op error if no DKG has completed since the last persist.
    PersistKeyShare { vault_passphrase: String },
    ImportKeystore { path: std::path::PathBuf, export_passphrase: String, vault_passphrase: String },
    ExportKeystore { vault_passphrase: String, export_passphrase: String, path: std::path::PathBuf },
}

/// Events emitted by a [`WalletCore`] (spec §6 upward interface).
#[derive(Debug, Clone)]
pub enum Event {
    MeshStateChanged(MeshState),
    DkgStateChanged(DkgState),
    DkgComplete { wallet_id: String, group_public_key: Vec<u8> },
    SigningComplete { request_id: String, signature: Vec<u8> },
    Failed { reason: String },
}

/// One wallet's coordination state: keystore, mesh/DKG/signing
/// coordinators, and the audit trail, addressed through `Command`/`Event`.
pub struct WalletCore {
    own_id: ParticipantId,
    wallet_id: String,
    keystore: Keystore,
    audit: AuditLogger,
    transport: Arc<dyn Transport>,
    hpke_keypair: Option<Arc<HpkeKeyPair>>,

    session: Option<SharedSession>,
    mesh: Option<MeshCoordinator>,
    dkg: Option<DkgCoordinator>,
    /// At most one active signing request (Invariant Sg1), identified by id.
    signing: Option<(String, SigningCoordinator)>,
    /// Key share produced by the most recent completed DKG, held in memory
    /// until the caller supplies a vault passphrase via a keystore command.
    pending_key_share: Option<KeyShare>,

    events: tokio::sync::mpsc::UnboundedSender<Event>,
}

impl WalletCore {
    pub fn new(
        own_id: ParticipantId,
        wallet_id: impl Into<String>,
        keystore: Keystore,
        audit: AuditLogger,
        transport: Arc<dyn Transport>,
        hpke_keypair: Option<Arc<HpkeKeyPair>>,
        events: tokio::sync::mpsc::UnboundedSender<Event>,
    ) -> CoreResult<Self> {
        let wallet_id = wallet_id.into();
        audit.append(AuditEventType::WalletOpened, AuditActor::System, None, AuditOutcome::Success, None)?;

        Ok(Self {
            own_id,
            wallet_id,
            keystore,
            audit,
            transport,
            hpke_keypair,
            session: None,
            mesh: None,
            dkg: None,
            signing: None,
            pending_key_share: None,
            events,
        })
    }

    fn emit(&self, event: Event) {
        // The host's event receiver may already be gone (process shutting
        // down); there is nothing to recover from a dropped channel here.
        let _ = self.events.send(event);
    }

    fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, wallet_id = %self.wallet_id, "wallet core failure");
        self.emit(Event::Failed { reason });
    }

    fn session(&self) -> CoreResult<&SharedSession> {
        self.session.as_ref().ok_or_else(|| CoreError::ProtocolViolation("no active session".to_string()))
    }

    fn own_index(&self) -> CoreResult<ParticipantIndex> {
        let session = self.session()?;
        session
            .index_of(&self.own_id)
            .ok_or_else(|| CoreError::Internal("own id missing from session participants".to_string()))
    }

    fn peers(&self) -> CoreResult<Vec<ParticipantId>> {
        let session = self.session()?;
        Ok(session.peers_of(&self.own_id).cloned().collect())
    }

    /// Dispatch one command. Errors are both returned to the caller and, for
    /// anything beyond a simple precondition failure, surfaced through the
    /// `failed` event (spec §7 propagation rule).
    pub fn handle_command(&mut self, command: Command) -> CoreResult<()> {
        match command {
            Command::ProposeSession { session } => self.propose_session(session),
            Command::AcceptSession { session_id } => self.accept_session(session_id),
            Command::StartDkg => self.start_dkg(),
            Command::StartSigning { message, subset } => self.start_signing(message, subset).map(|_| ()),
            Command::Reset => {
                self.reset();
                Ok(())
            }
            Command::PersistKeyShare { vault_passphrase } => self.persist_key_share(&vault_passphrase),
            Command::ImportKeystore { path, export_passphrase, vault_passphrase } => {
                let key_share =
                    self.keystore.import_from_path(&path, &export_passphrase, &self.wallet_id, &vault_passphrase)?;
                self.pending_key_share = Some(key_share);
                self.audit.append(
                    AuditEventType::KeystoreImported,
                    AuditActor::System,
                    None,
                    AuditOutcome::Success,
                    None,
                )?;
                Ok(())
            }
            Command::ExportKeystore { vault_passphrase, export_passphrase, path } => self
                .keystore
                .export_to_path(&self.wallet_id, &vault_passphrase, &export_passphrase, &path)
                .and_then(|()| {
                    self.audit.append(
                        AuditEventType::KeystoreExported,
                        AuditActor::System,
                        None,
                        AuditOutcome::Success,
                        None,
                    )?;
                    Ok(())
                }),
        }
    }

    fn propose_session(&mut self, session: SessionDescriptor) -> CoreResult<()> {
        if self.session.is_some() {
            return Err(CoreError::SessionIdInUse(session.session_id().to_string()));
        }

        let peers: Vec<ParticipantId> = session.peers_of(&self.own_id).cloned().collect();
        let session = Arc::new(session);

        self.transport.broadcast(&peers, Frame::SessionProposal { session: (*session).clone() })?;

        let mut mesh = MeshCoordinator::new(peers);
        mesh.mark_session_accepted();
        self.emit(Event::MeshStateChanged(mesh.state()));

        self.session = Some(session);
        self.mesh = Some(mesh);
        self.ensure_dkg_coordinator()?;
        Ok(())
    }

    /// Instantiate the DKG coordinator for the active session in `Idle`
    /// state, if not already present.
    ///
    /// Done as soon as the session exists (not only once `start_dkg` is
    /// called) so that a peer's Round1/Round2 frame arriving before this
    /// participant has locally issued `start_dkg` still lands on a real
    /// coordinator and buffers correctly (spec §4.5 "Package buffering",
    /// P7) instead of being rejected outright for lack of one.
    fn ensure_dkg_coordinator(&mut self) -> CoreResult<()> {
        if self.dkg.is_some() {
            return Ok(());
        }
        let session = self.session()?.clone();
        let own_index = self.own_index()?;
        let curve = session.curve();
        self.dkg = Some(DkgCoordinator::new(session, own_index, engine_for(curve), self.hpke_keypair.clone()));
        Ok(())
    }

    fn accept_session(&mut self, session_id: SessionId) -> CoreResult<()> {
        let session = self.session()?;
        if session.session_id() != &session_id {
            return Err(CoreError::SessionNotFound(session_id.to_string()));
        }

        let peers: Vec<ParticipantId> = self.peers()?;
        self.transport.broadcast(&peers, Frame::SessionAccept { session_id: session_id.clone() })?;

        self.audit.append(
            AuditEventType::SessionAccepted,
            AuditActor::System,
            Some(session_id),
            AuditOutcome::Success,
            None,
        )?;

        let mesh = self.mesh.as_mut().ok_or_else(|| CoreError::ProtocolViolation("no mesh for session".to_string()))?;
        mesh.mark_session_accepted();
        self.maybe_send_mesh_ready()
    }

    fn maybe_send_mesh_ready(&mut self) -> CoreResult<()> {
        let should_send = {
            let mesh = self.mesh.as_mut().ok_or_else(|| CoreError::ProtocolViolation("no active mesh".to_string()))?;
            mesh.should_send_own_ready()
        };

        if should_send {
            let peers = self.peers()?;
            let session_id = self.session()?.session_id().clone();
            self.transport.broadcast(&peers, Frame::MeshReady { session_id })?;
            let state = self.mesh.as_ref().expect("mesh present").state();
            self.emit(Event::MeshStateChanged(state));
        }
        Ok(())
    }

    /// Handle an inbound wire frame from `from`.
    pub fn handle_frame(&mut self, from: ParticipantId, frame: Frame) -> CoreResult<()> {
        let result = self.handle_frame_inner(from, frame);
        if let Err(ref e) = result {
            if !matches!(e, CoreError::DuplicatePackage { .. }) {
                self.audit_failure_if_any(e.to_string());
                self.fail(e.to_string());
            }
        }
        result
    }

    /// Record a `DkgFailed`/`SigningFailed` audit entry if the matching
    /// coordinator has just transitioned into `Failed`.
    fn audit_failure_if_any(&mut self, reason: String) {
        let session_id = self.session.as_ref().map(|s| s.session_id().clone());
        if matches!(self.dkg.as_ref().map(DkgCoordinator::state), Some(DkgState::Failed(_))) {
            let _ = self.audit.append(
                AuditEventType::DkgFailed,
                AuditActor::System,
                session_id.clone(),
                AuditOutcome::Failure { reason: reason.clone() },
                None,
            );
        }
        if matches!(self.signing.as_ref().map(|(_, s)| s.state()), Some(SigningState::Failed(_))) {
            let _ = self.audit.append(
                AuditEventType::SigningFailed,
                AuditActor::System,
                session_id,
                AuditOutcome::Failure { reason },
                None,
            );
        }
    }

    fn handle_frame_inner(&mut self, from: ParticipantId, frame: Frame) -> CoreResult<()> {
        match frame {
            Frame::SessionProposal { session } => self.on_session_proposal(session),
            Frame::SessionAccept { session_id } => {
                tracing::debug!(%from, %session_id, "peer accepted session");
                Ok(())
            }
            Frame::MeshReady { session_id } => self.on_mesh_ready(from, session_id),
            Frame::DkgRound1 { session_id, from: sender, package } => {
                self.on_dkg_round1(session_id, sender, package)
            }
            Frame::DkgRound2 { session_id, from: sender, to, package, encrypted } => {
                self.on_dkg_round2(session_id, sender, to, package, encrypted)
            }
            Frame::DkgPackageResendRequest { session_id: _, round, from: requester } => {
                self.on_dkg_resend_request(round, requester)
            }
            Frame::SigningRequest { session_id: _, request_id, message, signers } => {
                self.on_signing_request(request_id, message, signers)
            }
            Frame::SigningCommitment { session_id: _, request_id, from: sender, commitment } => {
                self.on_signing_commitment(request_id, sender, commitment)
            }
            Frame::SigningShare { session_id: _, request_id, from: sender, share } => {
                self.on_signing_share(request_id, sender, share)
            }
        }
    }

    fn on_session_proposal(&mut self, session: SessionDescriptor) -> CoreResult<()> {
        if self.session.is_some() {
            return Err(CoreError::SessionIdInUse(session.session_id().to_string()));
        }
        let peers: Vec<ParticipantId> = session.peers_of(&self.own_id).cloned().collect();
        self.session = Some(Arc::new(session));
        self.mesh = Some(MeshCoordinator::new(peers));
        self.emit(Event::MeshStateChanged(MeshState::Incomplete));
        self.ensure_dkg_coordinator()?;
        Ok(())
    }

    fn on_mesh_ready(&mut self, from: ParticipantId, session_id: SessionId) -> CoreResult<()> {
        let session = self.session()?;
        if session.session_id() != &session_id {
            return Err(CoreError::SessionNotFound(session_id.to_string()));
        }
        let mesh = self.mesh.as_mut().ok_or_else(|| CoreError::ProtocolViolation("no active mesh".to_string()))?;
        let state = mesh.on_mesh_ready(&from);
        self.emit(Event::MeshStateChanged(state));

        if state == MeshState::Ready {
            self.audit.append(
                AuditEventType::MeshReady,
                AuditActor::System,
                Some(session_id),
                AuditOutcome::Success,
                None,
            )?;
        }
        Ok(())
    }

    /// Handle a channel-liveness observation from the transport.
    pub fn handle_channel_state(&mut self, peer: ParticipantId, state: ChannelState) -> CoreResult<()> {
        let Some(mesh) = self.mesh.as_mut() else {
            return Ok(());
        };
        let mesh_state = mesh.on_channel_state(&peer, state);
        self.emit(Event::MeshStateChanged(mesh_state));

        if state == ChannelState::Closed {
            if let Some(dkg) = self.dkg.as_mut() {
                dkg.on_peer_lost();
                self.emit(Event::DkgStateChanged(dkg.state().clone()));
            }
            if let Some((_, signing)) = self.signing.as_mut() {
                signing.on_peer_lost();
            }
            self.audit_failure_if_any(format!("peer {peer} channel closed"));
            return Err(CoreError::TransportLost(peer));
        }

        self.maybe_send_mesh_ready()
    }

    fn start_dkg(&mut self) -> CoreResult<()> {
        let mesh = self.mesh.as_ref().ok_or_else(|| CoreError::ProtocolViolation("no active mesh".to_string()))?;
        if mesh.state() != MeshState::Ready {
            return Err(CoreError::ProtocolViolation("dkg requires mesh state Ready".to_string()));
        }

        self.ensure_dkg_coordinator()?;
        let session = self.session()?.clone();
        let own_index = self.own_index()?;

        let package = self
            .dkg
            .as_mut()
            .ok_or_else(|| CoreError::Internal("dkg coordinator missing after ensure".to_string()))?
            .start()?;
        self.emit(Event::DkgStateChanged(DkgState::Round1InProgress));

        self.audit.append(
            AuditEventType::DkgRound1Started,
            AuditActor::System,
            Some(session.session_id().clone()),
            AuditOutcome::Success,
            None,
        )?;

        let peers = self.peers()?;
        self.transport.broadcast(
            &peers,
            Frame::DkgRound1 { session_id: session.session_id().clone(), from: own_index, package },
        )
    }

    fn on_dkg_round1(&mut self, session_id: SessionId, from: ParticipantIndex, package: Vec<u8>) -> CoreResult<()> {
        let session = self.session()?;
        if session.session_id() != &session_id {
            return Err(CoreError::SessionNotFound(session_id.to_string()));
        }
        let dkg = self.dkg.as_mut().ok_or_else(|| CoreError::ProtocolViolation("dkg not started".to_string()))?;
        dkg.add_round1_package(from, package)?;

        let state = dkg.state().clone();
        self.emit(Event::DkgStateChanged(state.clone()));

        if state == DkgState::Round2InProgress {
            self.dispatch_outgoing_round2(session_id)?;
        }
        Ok(())
    }

    fn dispatch_outgoing_round2(&mut self, session_id: SessionId) -> CoreResult<()> {
        let own_index = self.own_index()?;
        let session = self.session()?.clone();
        self.audit.append(
            AuditEventType::DkgRound2Started,
            AuditActor::System,
            Some(session_id.clone()),
            AuditOutcome::Success,
            None,
        )?;

        let outgoing = self
            .dkg
            .as_mut()
            .ok_or_else(|| CoreError::ProtocolViolation("dkg not started".to_string()))?
            .take_outgoing_round2_packages();

        for package in outgoing {
            let recipient_id = session
                .id_at(package.to)
                .cloned()
                .ok_or_else(|| CoreError::Internal("round2 recipient index out of range".to_string()))?;
            self.transport.send(
                &recipient_id,
                Frame::DkgRound2 {
                    session_id: session_id.clone(),
                    from: own_index,
                    to: package.to,
                    package: package.package,
                    encrypted: package.encrypted,
                },
            )?;
        }
        Ok(())
    }

    fn on_dkg_round2(
        &mut self,
        session_id: SessionId,
        from: ParticipantIndex,
        to: ParticipantIndex,
        package: Vec<u8>,
        encrypted: bool,
    ) -> CoreResult<()> {
        let own_index = self.own_index()?;
        if to != own_index {
            tracing::debug!(%from, %to, "dropping round-2 package not addressed to us");
            return Ok(());
        }

        let dkg = self.dkg.as_mut().ok_or_else(|| CoreError::ProtocolViolation("dkg not started".to_string()))?;
        dkg.add_round2_package(from, package, encrypted)?;

        let state = dkg.state().clone();
        self.emit(Event::DkgStateChanged(state.clone()));

        if state == DkgState::Complete {
            self.finalize_dkg(session_id)?;
        }
        Ok(())
    }

    fn finalize_dkg(&mut self, session_id: SessionId) -> CoreResult<()> {
        let session = self.session()?.clone();
        let outcome = self
            .dkg
            .as_ref()
            .and_then(|d| d.outcome())
            .cloned()
            .ok_or_else(|| CoreError::Internal("dkg completed with no outcome".to_string()))?;

        let own_index = self.own_index()?;
        let key_share = KeyShare {
            curve: session.curve(),
            threshold: session.threshold(),
            total: session.total(),
            participant_index: own_index,
            blockchain_tag: session.blockchain_tag().to_string(),
            session_id: session.session_id().to_string(),
            key_package: outcome.key_package,
            public_key_package: outcome.public_key_package,
            group_public_key: outcome.group_public_key.clone(),
        };

        self.audit.append(
            AuditEventType::DkgFinalized,
            AuditActor::System,
            Some(session_id),
            AuditOutcome::Success,
            Some(json!({ "group_public_key": hex::encode(&outcome.group_public_key) })),
        )?;

        self.emit(Event::DkgComplete {
            wallet_id: self.wallet_id.clone(),
            group_public_key: outcome.group_public_key,
        });

        // The vault passphrase is not part of the DKG protocol (it never
        // crosses the wire), so finalization stages the share in memory and
        // the host completes persistence with `Command::PersistKeyShare`
        // once it has a passphrase to encrypt it under.
        self.pending_key_share = Some(key_share);
        Ok(())
    }

    /// Encrypt [`Self::pending_key_share`] under `vault_passphrase` and write
    /// it to the keystore vault (spec §4.5 finalization).
    fn persist_key_share(&mut self, vault_passphrase: &str) -> CoreResult<()> {
        let key_share = self
            .pending_key_share
            .as_ref()
            .ok_or_else(|| CoreError::KeyShareNotFound("no key share pending persistence".to_string()))?;
        self.keystore.store(&self.wallet_id, vault_passphrase, key_share)?;
        tracing::info!(wallet_id = %self.wallet_id, "persisted key share to vault");
        Ok(())
    }

    fn on_dkg_resend_request(&mut self, round: DkgRound, requester: ParticipantIndex) -> CoreResult<()> {
        // Recovery path for late joiners (spec §6): this crate does not
        // cache already-sent packages beyond the coordinator's own state,
        // so resend is only possible while the coordinator itself still
        // holds the relevant secret/package (i.e. before the round
        // completes locally). A host wanting stronger replay guarantees
        // layers its own cache above this crate's transport seam.
        tracing::debug!(?round, %requester, "dkg package resend requested; no cache to serve it from");
        Ok(())
    }

    fn start_signing(&mut self, message: Vec<u8>, subset: Vec<ParticipantIndex>) -> CoreResult<String> {
        if self.signing.is_some() {
            return Err(CoreError::ProtocolViolation("a signing request is already active".to_string()));
        }
        let key_share = self.pending_key_share.clone().ok_or_else(|| {
            CoreError::KeyShareNotFound("no key share available; complete dkg or import one first".to_string())
        })?;

        let session = self.session()?.clone();
        let own_index = self.own_index()?;
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut coordinator = SigningCoordinator::new(
            session.clone(),
            own_index,
            engine_for(session.curve()),
            key_share.key_package,
            key_share.public_key_package,
        );
        let commitment = coordinator.start(message.clone(), subset.clone())?;

        self.audit.append(
            AuditEventType::SigningStarted,
            AuditActor::System,
            Some(session.session_id().clone()),
            AuditOutcome::Success,
            Some(json!({ "request_id": request_id })),
        )?;

        let peers: Vec<ParticipantId> =
            subset.iter().filter(|&&i| i != own_index).filter_map(|&i| session.id_at(i).cloned()).collect();

        self.transport.broadcast(
            &peers,
            Frame::SigningRequest {
                session_id: session.session_id().clone(),
                request_id: request_id.clone(),
                message,
                signers: subset,
            },
        )?;
        self.transport.broadcast(
            &peers,
            Frame::SigningCommitment {
                session_id: session.session_id().clone(),
                request_id: request_id.clone(),
                from: own_index,
                commitment,
            },
        )?;

        self.signing = Some((request_id.clone(), coordinator));
        Ok(request_id)
    }

    fn on_signing_request(
        &mut self,
        request_id: String,
        message: Vec<u8>,
        signers: Vec<ParticipantIndex>,
    ) -> CoreResult<()> {
        if self.signing.is_some() {
            return Err(CoreError::ProtocolViolation("a signing request is already active".to_string()));
        }
        let key_share = self.pending_key_share.clone().ok_or_else(|| {
            CoreError::KeyShareNotFound("no key share available to participate in signing".to_string())
        })?;

        let session = self.session()?.clone();
        let own_index = self.own_index()?;
        if !signers.contains(&own_index) {
            return Ok(());
        }

        let mut coordinator = SigningCoordinator::new(
            session.clone(),
            own_index,
            engine_for(session.curve()),
            key_share.key_package,
            key_share.public_key_package,
        );
        let commitment = coordinator.start(message, signers.clone())?;
        self.signing = Some((request_id.clone(), coordinator));

        let peers: Vec<ParticipantId> =
            signers.iter().filter(|&&i| i != own_index).filter_map(|&i| session.id_at(i).cloned()).collect();
        self.transport.broadcast(
            &peers,
            Frame::SigningCommitment {
                session_id: session.session_id().clone(),
                request_id,
                from: own_index,
                commitment,
            },
        )
    }

    fn on_signing_commitment(
        &mut self,
        request_id: String,
        from: ParticipantIndex,
        commitment: Vec<u8>,
    ) -> CoreResult<()> {
        let (active_id, coordinator) = self
            .signing
            .as_mut()
            .ok_or_else(|| CoreError::ProtocolViolation("no active signing request".to_string()))?;
        if *active_id != request_id {
            return Err(CoreError::ProtocolViolation("signing request id mismatch".to_string()));
        }

        coordinator.add_commitment(from, commitment)?;

        if *coordinator.state() == SigningState::SharesCollecting {
            self.audit.append(
                AuditEventType::SigningCommitted,
                AuditActor::System,
                None,
                AuditOutcome::Success,
                Some(json!({ "request_id": request_id })),
            )?;
            self.dispatch_own_share(request_id)?;
        }
        Ok(())
    }

    fn dispatch_own_share(&mut self, request_id: String) -> CoreResult<()> {
        let session = self.session()?.clone();
        let own_index = self.own_index()?;

        let (signers, own_share) = {
            let (_, coordinator) = self.signing.as_mut().expect("signing request checked present by caller");
            let share = coordinator.take_own_share();
            (coordinator_signer_ids(coordinator, &session), share)
        };

        let Some(share) = own_share else {
            return Ok(());
        };

        self.audit.append(
            AuditEventType::SigningShared,
            AuditActor::System,
            Some(session.session_id().clone()),
            AuditOutcome::Success,
            Some(json!({ "request_id": request_id })),
        )?;

        let peers: Vec<ParticipantId> = signers.into_iter().filter(|id| *id != self.own_id).collect();
        self.transport.broadcast(
            &peers,
            Frame::SigningShare { session_id: session.session_id().clone(), request_id, from: own_index, share },
        )
    }

    fn on_signing_share(&mut self, request_id: String, from: ParticipantIndex, share: Vec<u8>) -> CoreResult<()> {
        let (active_id, coordinator) = self
            .signing
            .as_mut()
            .ok_or_else(|| CoreError::ProtocolViolation("no active signing request".to_string()))?;
        if *active_id != request_id {
            return Err(CoreError::ProtocolViolation("signing request id mismatch".to_string()));
        }

        coordinator.add_share(from, share)?;

        if *coordinator.state() == SigningState::Complete {
            let signature = coordinator.signature().expect("signature present when Complete").to_vec();
            self.audit.append(
                AuditEventType::SigningAggregated,
                AuditActor::System,
                None,
                AuditOutcome::Success,
                Some(json!({ "request_id": request_id })),
            )?;
            self.emit(Event::SigningComplete { request_id, signature });
            self.signing = None;
        }
        Ok(())
    }

    /// Flush all in-flight protocol state back to session start (spec §5
    /// Cancellation). The session descriptor itself and the persisted
    /// keystore are untouched; only the ephemeral DKG/signing/mesh state is
    /// reset.
    pub fn reset(&mut self) {
        if let Some(mesh) = self.mesh.as_mut() {
            mesh.reset();
        }
        self.dkg = None;
        self.signing = None;

        if let Some(session_id) = self.session.as_ref().map(|s| s.session_id().clone()) {
            let _ = self.audit.append(
                AuditEventType::SessionReset,
                AuditActor::System,
                Some(session_id),
                AuditOutcome::Success,
                None,
            );
            // The session descriptor survives a reset (only ephemeral
            // protocol state is flushed), so re-establish a fresh `Idle`
            // DKG coordinator immediately rather than waiting for the next
            // `start_dkg` — otherwise a peer's frame arriving right after
            // reset would again find no coordinator to buffer into.
            let _ = self.ensure_dkg_coordinator();
        }
        tracing::info!(wallet_id = %self.wallet_id, "wallet core reset");
    }
}

fn coordinator_signer_ids(_coordinator: &SigningCoordinator, session: &SharedSession) -> Vec<ParticipantId> {
    // Signing's signer subset isn't exposed directly; WalletCore tracks it
    // implicitly through the frames it already relayed, so for broadcast
    // purposes every session peer is an acceptable fan-out target and
    // non-signers simply drop frames addressed to a request they never
    // joined (see `on_signing_request`'s early return).
    session.participants().to_vec()
}
