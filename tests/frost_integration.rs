//! End-to-end coordination tests driving real `WalletCore` instances through
//! a full DKG + signing flow over an in-memory routing transport (spec §8
//! scenarios, P1/P2/P3/P6/P7 properties).
//!
//! Each participant owns its own `WalletCore`, `Storage`, and audit log;
//! frames are recorded by a shared `RoutingTransport` and drained by the
//! test harness rather than delivered by a real network, so ordering is
//! deterministic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use coordination_core::audit::AuditLogger;
use coordination_core::core::{Command, Event, WalletCore};
use coordination_core::curve::Curve;
use coordination_core::dkg::{DkgCoordinator, DkgState};
use coordination_core::error::CoreError;
use coordination_core::ids::{ParticipantId, ParticipantIndex};
use coordination_core::keystore::Keystore;
use coordination_core::mesh::{ChannelState, MeshState};
use coordination_core::session::{SessionDescriptor, SessionId};
use coordination_core::storage::Storage;
use coordination_core::transport::{Frame, Transport};

/// Records every frame handed to it instead of delivering it immediately;
/// the test drives delivery explicitly via `drain`.
struct RoutingTransport {
    outbox: Mutex<VecDeque<(ParticipantId, ParticipantId, Frame)>>,
}

impl RoutingTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self { outbox: Mutex::new(VecDeque::new()) })
    }
}

/// `Transport::send` carries no sender identity, so each participant gets a
/// handle that bakes its own id in as `from` when recording into the shared
/// outbox.
struct SenderHandle {
    from: ParticipantId,
    shared: Arc<RoutingTransport>,
}

impl Transport for SenderHandle {
    fn send(&self, to: &ParticipantId, frame: Frame) -> coordination_core::error::CoreResult<()> {
        self.shared.outbox.lock().unwrap().push_back((self.from.clone(), to.clone(), frame));
        Ok(())
    }
}

struct Participant {
    id: ParticipantId,
    core: WalletCore,
    events: tokio::sync::mpsc::UnboundedReceiver<Event>,
}

fn build_participant(id: &str, wallet_id: &str, shared: &Arc<RoutingTransport>, dir: &std::path::Path) -> Participant {
    let own_id = ParticipantId::new(id);
    let storage = Storage::open(&dir.join(format!("{id}-{wallet_id}.redb"))).unwrap();
    let keystore = Keystore::new(storage.clone());
    let audit = AuditLogger::new(storage).unwrap();
    let transport = Arc::new(SenderHandle { from: own_id.clone(), shared: shared.clone() });
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let core = WalletCore::new(own_id.clone(), wallet_id, keystore, audit, transport, None, tx).unwrap();
    Participant { id: own_id, core, events: rx }
}

/// Deliver every queued frame to its recipient, repeating until the outbox
/// is empty (a delivered frame may itself enqueue further frames).
/// `DuplicatePackage` is tolerated (buffered-replay/idempotent-resend path);
/// any other error fails the test immediately.
fn drain(shared: &Arc<RoutingTransport>, participants: &mut [Participant]) {
    loop {
        let next = shared.outbox.lock().unwrap().pop_front();
        let Some((from, to, frame)) = next else {
            break;
        };
        let participant = participants.iter_mut().find(|p| p.id == to).expect("frame addressed to unknown participant");
        match participant.core.handle_frame(from, frame) {
            Ok(()) | Err(CoreError::DuplicatePackage { .. }) => {}
            Err(e) => panic!("unexpected error delivering frame to {to}: {e}"),
        }
    }
}

fn drain_events(participant: &mut Participant) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = participant.events.try_recv() {
        events.push(event);
    }
    events
}

/// Propose from `participants[proposer]`, have everyone else accept, then
/// bring every channel to `Open` on every participant so the mesh reaches
/// `Ready` (spec §4.4).
fn propose_and_accept(shared: &Arc<RoutingTransport>, participants: &mut [Participant], session: SessionDescriptor, proposer: usize) {
    participants[proposer].core.handle_command(Command::ProposeSession { session: session.clone() }).unwrap();
    drain(shared, participants);

    for i in 0..participants.len() {
        if i == proposer {
            continue;
        }
        participants[i].core.handle_command(Command::AcceptSession { session_id: session.session_id().clone() }).unwrap();
    }
    drain(shared, participants);

    let all_ids: Vec<ParticipantId> = participants.iter().map(|p| p.id.clone()).collect();
    for p in participants.iter_mut() {
        for peer in all_ids.iter().filter(|id| **id != p.id) {
            p.core.handle_channel_state(peer.clone(), ChannelState::Open).ok();
        }
    }
    drain(shared, participants);
}

fn assert_mesh_ready(participant: &mut Participant) {
    let events = drain_events(participant);
    assert!(
        events.iter().any(|e| matches!(e, Event::MeshStateChanged(MeshState::Ready))),
        "expected {} to observe MeshState::Ready, got {events:?}",
        participant.id
    );
}

fn session_descriptor(session_id: &str, threshold: u16, ids: &[&str], curve: Curve, own_id: &ParticipantId) -> SessionDescriptor {
    let participants = ids.iter().map(|s| ParticipantId::new(*s)).collect();
    SessionDescriptor::new(SessionId::new(session_id), threshold, participants, curve, "ethereum", own_id).unwrap()
}

#[tokio::test]
async fn dkg_and_signing_complete_2_of_3_secp256k1() {
    let dir = tempfile::tempdir().unwrap();
    let shared = RoutingTransport::new();
    let ids = ["mpc-1", "mpc-2", "mpc-3"];
    let mut participants: Vec<Participant> =
        ids.iter().map(|id| build_participant(id, "wallet-a", &shared, dir.path())).collect();

    let session = session_descriptor("sess-dkg-1", 2, &ids, Curve::Secp256k1, &participants[0].id);
    propose_and_accept(&shared, &mut participants, session, 0);
    for p in &mut participants {
        assert_mesh_ready(p);
    }

    // Every participant independently starts DKG once mesh is ready (spec
    // §4.5 preconditions are per-participant, not initiator-only).
    for p in &mut participants {
        p.core.handle_command(Command::StartDkg).unwrap();
    }
    drain(&shared, &mut participants);

    for p in &mut participants {
        let events = drain_events(p);
        assert!(
            events.iter().any(|e| matches!(e, Event::DkgComplete { .. })),
            "expected {} to complete dkg, got {events:?}",
            p.id
        );
    }

    for p in &mut participants {
        p.core.handle_command(Command::PersistKeyShare { vault_passphrase: "hunter2".to_string() }).unwrap();
    }

    let message = b"transfer 1 eth to 0xdead".to_vec();
    let subset = vec![ParticipantIndex::new_unwrap(1), ParticipantIndex::new_unwrap(2)];
    participants[0].core.handle_command(Command::StartSigning { message, subset }).unwrap();
    drain(&shared, &mut participants);

    let mut signatures = Vec::new();
    for p in participants.iter_mut().take(2) {
        for e in drain_events(p) {
            if let Event::SigningComplete { signature, .. } = e {
                signatures.push(signature);
            }
        }
    }
    assert_eq!(signatures.len(), 2, "both signers should observe SigningComplete");
    assert_eq!(signatures[0], signatures[1], "all signers must agree on the aggregated signature");

    // mpc-3 was not in the signer subset and never started a signing round.
    let events = drain_events(&mut participants[2]);
    assert!(!events.iter().any(|e| matches!(e, Event::SigningComplete { .. })));
}

#[tokio::test]
async fn dkg_completes_3_of_3_ed25519() {
    let dir = tempfile::tempdir().unwrap();
    let shared = RoutingTransport::new();
    let ids = ["mpc-1", "mpc-2", "mpc-3"];
    let mut participants: Vec<Participant> =
        ids.iter().map(|id| build_participant(id, "wallet-b", &shared, dir.path())).collect();

    let session = session_descriptor("sess-dkg-ed", 3, &ids, Curve::Ed25519, &participants[0].id);
    propose_and_accept(&shared, &mut participants, session, 0);
    for p in &mut participants {
        assert_mesh_ready(p);
    }

    for p in &mut participants {
        p.core.handle_command(Command::StartDkg).unwrap();
    }
    drain(&shared, &mut participants);

    let mut group_keys = Vec::new();
    for p in &mut participants {
        for e in drain_events(p) {
            if let Event::DkgComplete { group_public_key, .. } = e {
                group_keys.push(group_public_key);
            }
        }
    }
    assert_eq!(group_keys.len(), 3);
    assert!(group_keys.windows(2).all(|w| w[0] == w[1]), "all participants must agree on the group key");
}

#[tokio::test]
async fn duplicate_mesh_ready_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let shared = RoutingTransport::new();
    let ids = ["mpc-1", "mpc-2"];
    let mut participants: Vec<Participant> =
        ids.iter().map(|id| build_participant(id, "wallet-c", &shared, dir.path())).collect();

    let session = session_descriptor("sess-mesh-1", 2, &ids, Curve::Secp256k1, &participants[0].id);
    propose_and_accept(&shared, &mut participants, session.clone(), 0);
    for p in &mut participants {
        assert_mesh_ready(p);
    }

    // Replaying a MeshReady after the mesh is already Ready must be a no-op,
    // not a panic or a regression in mesh state (spec §8 scenario: duplicate
    // MeshReady send).
    let result = participants[1]
        .core
        .handle_frame(participants[0].id.clone(), Frame::MeshReady { session_id: session.session_id().clone() });
    assert!(result.is_ok());

    participants[1].core.handle_command(Command::Reset).unwrap();
}

#[test]
fn dkg_coordinator_buffers_out_of_order_round1_package() {
    use coordination_core::crypto::engine_for;

    let ids = ["mpc-1", "mpc-2", "mpc-3"];
    let participants: Vec<ParticipantId> = ids.iter().map(|s| ParticipantId::new(*s)).collect();
    let session = Arc::new(
        SessionDescriptor::new(SessionId::new("sess-buffer"), 2, participants, Curve::Secp256k1, "ethereum", &ParticipantId::new("mpc-1"))
            .unwrap(),
    );

    let mut coord1 =
        DkgCoordinator::new(session.clone(), ParticipantIndex::new_unwrap(1), engine_for(Curve::Secp256k1), None);
    let mut coord2 =
        DkgCoordinator::new(session.clone(), ParticipantIndex::new_unwrap(2), engine_for(Curve::Secp256k1), None);
    let mut coord3 = DkgCoordinator::new(session, ParticipantIndex::new_unwrap(3), engine_for(Curve::Secp256k1), None);

    // coord1 has not called `start()` yet: its own round-1 package arriving
    // from peers must buffer rather than error (spec §4.5 "Package
    // buffering", P7).
    let pkg3 = coord3.start().unwrap();
    coord1.add_round1_package(ParticipantIndex::new_unwrap(3), pkg3).unwrap();
    assert_eq!(*coord1.state(), DkgState::Idle);

    let pkg2 = coord2.start().unwrap();
    coord1.add_round1_package(ParticipantIndex::new_unwrap(2), pkg2.clone()).unwrap();
    assert_eq!(*coord1.state(), DkgState::Idle);

    // Now coord1 starts: both buffered packages replay immediately, driving
    // it straight through to Round2InProgress (3-of-3 round1 received).
    coord1.start().unwrap();
    assert_eq!(*coord1.state(), DkgState::Round2InProgress);

    // Re-delivering an already-ingested round-1 package is rejected as a
    // duplicate, not silently re-applied.
    let dup = coord1.add_round1_package(ParticipantIndex::new_unwrap(2), pkg2);
    assert!(matches!(dup, Err(CoreError::DuplicatePackage { round: "round1", .. })));
}

#[test]
fn dkg_coordinator_rejects_self_ingestion() {
    use coordination_core::crypto::engine_for;

    let ids = ["mpc-1", "mpc-2"];
    let participants: Vec<ParticipantId> = ids.iter().map(|s| ParticipantId::new(*s)).collect();
    let session = Arc::new(
        SessionDescriptor::new(SessionId::new("sess-self"), 2, participants, Curve::Secp256k1, "ethereum", &ParticipantId::new("mpc-1"))
            .unwrap(),
    );
    let mut coord1 = DkgCoordinator::new(session, ParticipantIndex::new_unwrap(1), engine_for(Curve::Secp256k1), None);
    let own_package = coord1.start().unwrap();

    // Invariant D1: a coordinator's own round-1 package is recorded at
    // generation time; re-ingesting it through `add_round1_package` is
    // always rejected, even innocuously (no self-to-self wire frame should
    // ever be constructed, but the guard holds regardless).
    let err = coord1.add_round1_package(ParticipantIndex::new_unwrap(1), own_package);
    assert!(matches!(err, Err(CoreError::ProtocolViolation(_))));
}

#[tokio::test]
async fn keystore_interop_export_then_import_recovers_signable_share() {
    let dir = tempfile::tempdir().unwrap();
    let shared = RoutingTransport::new();
    let ids = ["mpc-1", "mpc-2"];
    let mut participants: Vec<Participant> =
        ids.iter().map(|id| build_participant(id, "wallet-d", &shared, dir.path())).collect();

    let session = session_descriptor("sess-export", 2, &ids, Curve::Secp256k1, &participants[0].id);
    propose_and_accept(&shared, &mut participants, session, 0);
    for p in &mut participants {
        assert_mesh_ready(p);
    }

    for p in &mut participants {
        p.core.handle_command(Command::StartDkg).unwrap();
    }
    drain(&shared, &mut participants);
    for p in &mut participants {
        drain_events(p);
    }

    participants[0].core.handle_command(Command::PersistKeyShare { vault_passphrase: "vault-pass".to_string() }).unwrap();

    let export_path = dir.path().join("mpc-1-export.json");
    participants[0]
        .core
        .handle_command(Command::ExportKeystore {
            vault_passphrase: "vault-pass".to_string(),
            export_passphrase: "export-pass".to_string(),
            path: export_path.clone(),
        })
        .unwrap();

    // A fresh core on new storage (simulating recovery on another device)
    // imports the portable file under a new vault passphrase.
    let storage = Storage::open(&dir.path().join("mpc-1-recovered.redb")).unwrap();
    let keystore = Keystore::new(storage.clone());
    let audit = AuditLogger::new(storage).unwrap();
    let transport = Arc::new(SenderHandle { from: participants[0].id.clone(), shared: shared.clone() });
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let mut recovered = WalletCore::new(participants[0].id.clone(), "wallet-d", keystore, audit, transport, None, tx).unwrap();

    recovered
        .handle_command(Command::ImportKeystore {
            path: export_path,
            export_passphrase: "export-pass".to_string(),
            vault_passphrase: "new-vault-pass".to_string(),
        })
        .unwrap();

    // The recovered core has no active session, so it cannot start signing;
    // this confirms only that the import path succeeded and staged a usable
    // key share without needing a second full DKG run to exercise it.
    let err = recovered.handle_command(Command::StartSigning { message: vec![1, 2, 3], subset: vec![] });
    assert!(matches!(err, Err(CoreError::ProtocolViolation(_))));
}
