//! Wire frames and the transport seam (spec §6 external interfaces).
//!
//! This crate does not own a network stack (§1 Non-goals): it defines the
//! frame vocabulary and a thin [`Transport`] trait the host process
//! implements over whatever channel it already has (QUIC stream, websocket,
//! relay). Sends are fire-and-forget from the coordinators' point of view;
//! delivery and retry live on the host side of this seam.

use serde::{Deserialize, Serialize};

use crate::ids::{ParticipantId, ParticipantIndex};
use crate::mesh::ChannelState;
use crate::session::{SessionDescriptor, SessionId};

/// One wire frame exchanged between participants (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    /// Proposer -> all: the frozen session descriptor (spec §3 Invariant S1).
    SessionProposal { session: SessionDescriptor },
    /// Participant -> proposer: local acceptance of a proposed session.
    SessionAccept { session_id: SessionId },
    /// Any -> all: this participant's channels are all open and the session
    /// is locally accepted (spec §4.4). Sent at most once per session.
    MeshReady { session_id: SessionId },
    /// DKG round-1 broadcast package (spec §4.5). `package` is
    /// `hex(utf8(json(round1::Package)))` (§4.1), never the raw `frost-core`
    /// byte encoding.
    DkgRound1 { session_id: SessionId, from: ParticipantIndex, package: Vec<u8> },
    /// DKG round-2 package, addressed to one recipient and (if HPKE keys are
    /// configured for the session) encrypted to them (§10.7).
    DkgRound2 {
        session_id: SessionId,
        from: ParticipantIndex,
        to: ParticipantIndex,
        /// Base64 HPKE ciphertext of the `hex(utf8(json(round2::Package)))`
        /// payload when encrypted, that payload directly otherwise (§4.1).
        package: Vec<u8>,
        encrypted: bool,
    },
    /// Ask a peer to resend a round-1 or round-2 package this node is
    /// missing (spec §4.5 "Package buffering").
    DkgPackageResendRequest { session_id: SessionId, round: DkgRound, from: ParticipantIndex },
    /// Coordinator -> signer subset: message to sign and the chosen subset.
    SigningRequest {
        session_id: SessionId,
        request_id: String,
        message: Vec<u8>,
        signers: Vec<ParticipantIndex>,
    },
    /// Signer -> coordinator: round-1 signing commitment.
    SigningCommitment { session_id: SessionId, request_id: String, from: ParticipantIndex, commitment: Vec<u8> },
    /// Signer -> coordinator: round-2 signature share.
    SigningShare { session_id: SessionId, request_id: String, from: ParticipantIndex, share: Vec<u8> },
}

/// Which DKG round a [`Frame::DkgPackageResendRequest`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DkgRound {
    Round1,
    Round2,
}

/// Events delivered from the transport layer into the coordination core.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    FrameReceived { from: ParticipantId, frame: Frame },
    ChannelState { peer: ParticipantId, state: ChannelState },
}

/// The seam a host process implements to carry [`Frame`]s between
/// participants. Fire-and-forget: a `send` that returns `Ok(())` means the
/// frame was handed to the transport, not that it was delivered.
pub trait Transport: Send + Sync {
    fn send(&self, to: &ParticipantId, frame: Frame) -> crate::error::CoreResult<()>;

    /// Broadcast to every peer in `peers`.
    fn broadcast(&self, peers: &[ParticipantId], frame: Frame) -> crate::error::CoreResult<()> {
        for peer in peers {
            self.send(peer, frame.clone())?;
        }
        Ok(())
    }
}
