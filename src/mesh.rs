//! Mesh Coordinator (spec §4.4): per-peer channel liveness and mesh-readiness
//! barrier.
//!
//! `MeshReady` is a logical barrier separating the noisy channel-setup phase
//! from the cryptographic rounds; sending it more than once per session
//! causes peers to double-count and desynchronize downstream counters
//! (spec's documented historical bug). [`MeshCoordinator::mark_locally_ready`]
//! is therefore the only path that can flip `own_ready_sent`, and it does so
//! at most once (Invariant P3).

use std::collections::HashMap;

use crate::ids::ParticipantId;

/// Liveness of one peer channel (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// Aggregate mesh readiness (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshState {
    /// Not all channels open.
    Incomplete,
    /// All channels open locally but not yet confirmed that every peer is
    /// likewise ready.
    PartiallyReady,
    /// Own `MeshReady` sent, and `MeshReady` received from every peer.
    Ready,
}

struct PeerEntry {
    channel: ChannelState,
    ready: bool,
}

/// Tracks per-peer channel state and per-peer readiness for one session.
pub struct MeshCoordinator {
    peers: HashMap<ParticipantId, PeerEntry>,
    own_ready_sent: bool,
    own_session_accepted: bool,
    state: MeshState,
}

impl MeshCoordinator {
    /// Create a coordinator tracking the given peers (everyone but self),
    /// all starting `Connecting` and not-ready.
    pub fn new(peers: impl IntoIterator<Item = ParticipantId>) -> Self {
        let peers = peers
            .into_iter()
            .map(|id| (id, PeerEntry { channel: ChannelState::Connecting, ready: false }))
            .collect();
        Self { peers, own_ready_sent: false, own_session_accepted: false, state: MeshState::Incomplete }
    }

    pub fn state(&self) -> MeshState {
        self.state
    }

    pub fn own_ready_sent(&self) -> bool {
        self.own_ready_sent
    }

    fn all_channels_open(&self) -> bool {
        self.peers.values().all(|p| p.channel == ChannelState::Open)
    }

    fn all_peers_ready(&self) -> bool {
        self.peers.values().all(|p| p.ready)
    }

    fn recompute_state(&mut self) -> MeshState {
        let new_state = if self.own_ready_sent && self.all_peers_ready() {
            MeshState::Ready
        } else if self.all_channels_open() {
            MeshState::PartiallyReady
        } else {
            MeshState::Incomplete
        };
        if new_state != self.state {
            tracing::debug!(?new_state, "mesh state transition");
        }
        self.state = new_state;
        self.state
    }

    /// Record a channel-state observation from the transport layer.
    ///
    /// Returns the mesh state after applying the observation; a dropped
    /// channel always forces the mesh back to `Incomplete` (spec §4.4 "Any
    /// → Incomplete: a channel drops").
    pub fn on_channel_state(&mut self, peer: &ParticipantId, channel: ChannelState) -> MeshState {
        if let Some(entry) = self.peers.get_mut(peer) {
            entry.channel = channel;
            if channel == ChannelState::Closed {
                entry.ready = false;
                self.state = MeshState::Incomplete;
                return self.state;
            }
        }
        self.recompute_state()
    }

    /// Mark local session acceptance complete. Combined with all channels
    /// open, this is the trigger condition for sending our own `MeshReady`
    /// exactly once.
    pub fn mark_session_accepted(&mut self) {
        self.own_session_accepted = true;
    }

    /// Returns `true` exactly once per session: the first call after both
    /// "all local channels open" and "session accepted locally" hold. The
    /// caller is responsible for actually broadcasting `MeshReady` when this
    /// returns `true` (spec §4.4, Invariant P3).
    pub fn should_send_own_ready(&mut self) -> bool {
        if self.own_ready_sent {
            return false;
        }
        if self.own_session_accepted && self.all_channels_open() {
            self.own_ready_sent = true;
            self.recompute_state();
            true
        } else {
            false
        }
    }

    /// Record an incoming `MeshReady` from `peer`. Duplicates (dedupe by
    /// peer id) are silently dropped — the spec treats this as "observed at
    /// most once per peer per session", not an error.
    pub fn on_mesh_ready(&mut self, peer: &ParticipantId) -> MeshState {
        if let Some(entry) = self.peers.get_mut(peer) {
            if entry.ready {
                tracing::debug!(%peer, "duplicate MeshReady dropped");
                return self.state;
            }
            entry.ready = true;
        }
        self.recompute_state()
    }

    /// Flush all state back to session start (spec §5 Cancellation): resets
    /// `own_ready_sent`, all peer readiness, and channel states.
    pub fn reset(&mut self) {
        for entry in self.peers.values_mut() {
            entry.channel = ChannelState::Connecting;
            entry.ready = false;
        }
        self.own_ready_sent = false;
        self.own_session_accepted = false;
        self.state = MeshState::Incomplete;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str) -> ParticipantId {
        ParticipantId::new(name)
    }

    #[test]
    fn incomplete_until_all_channels_open() {
        let mut mesh = MeshCoordinator::new([peer("mpc-2"), peer("mpc-3")]);
        assert_eq!(mesh.state(), MeshState::Incomplete);
        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Open);
        assert_eq!(mesh.state(), MeshState::Incomplete);
        mesh.on_channel_state(&peer("mpc-3"), ChannelState::Open);
        assert_eq!(mesh.state(), MeshState::PartiallyReady);
    }

    #[test]
    fn own_ready_sent_exactly_once() {
        let mut mesh = MeshCoordinator::new([peer("mpc-2")]);
        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Open);
        mesh.mark_session_accepted();

        assert!(mesh.should_send_own_ready());
        assert!(!mesh.should_send_own_ready());
        assert!(!mesh.should_send_own_ready());
        assert!(mesh.own_ready_sent());
    }

    #[test]
    fn ready_requires_own_sent_and_all_peers_ready() {
        let mut mesh = MeshCoordinator::new([peer("mpc-2"), peer("mpc-3")]);
        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Open);
        mesh.on_channel_state(&peer("mpc-3"), ChannelState::Open);
        mesh.mark_session_accepted();
        assert!(mesh.should_send_own_ready());

        mesh.on_mesh_ready(&peer("mpc-2"));
        assert_eq!(mesh.state(), MeshState::PartiallyReady);

        mesh.on_mesh_ready(&peer("mpc-3"));
        assert_eq!(mesh.state(), MeshState::Ready);
    }

    #[test]
    fn duplicate_mesh_ready_counts_once() {
        let mut mesh = MeshCoordinator::new([peer("mpc-2")]);
        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Open);
        mesh.mark_session_accepted();
        assert!(mesh.should_send_own_ready());

        mesh.on_mesh_ready(&peer("mpc-2"));
        assert_eq!(mesh.state(), MeshState::Ready);
        // Simulated duplicate send (spec §8 scenario 5).
        mesh.on_mesh_ready(&peer("mpc-2"));
        assert_eq!(mesh.state(), MeshState::Ready);
    }

    #[test]
    fn dropped_channel_forces_incomplete() {
        let mut mesh = MeshCoordinator::new([peer("mpc-2")]);
        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Open);
        mesh.mark_session_accepted();
        mesh.should_send_own_ready();
        mesh.on_mesh_ready(&peer("mpc-2"));
        assert_eq!(mesh.state(), MeshState::Ready);

        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Closed);
        assert_eq!(mesh.state(), MeshState::Incomplete);
    }

    #[test]
    fn reset_clears_own_ready_sent() {
        let mut mesh = MeshCoordinator::new([peer("mpc-2")]);
        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Open);
        mesh.mark_session_accepted();
        assert!(mesh.should_send_own_ready());

        mesh.reset();
        assert!(!mesh.own_ready_sent());
        assert_eq!(mesh.state(), MeshState::Incomplete);

        mesh.on_channel_state(&peer("mpc-2"), ChannelState::Open);
        mesh.mark_session_accepted();
        assert!(mesh.should_send_own_ready());
    }
}
