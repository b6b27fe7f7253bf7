//! Curve-polymorphic FROST operations facade (§4.1, §9).
//!
//! [`CryptoEngine`] is the only place curve-specific FROST types are named.
//! Every operation takes and returns opaque bytes plus [`ParticipantIndex`]
//! keys; callers (the DKG and signing coordinators) never see
//! `frost_secp256k1::Identifier` or `frost_ed25519::Identifier` directly. The
//! one observable curve difference that crosses this boundary is the
//! identifier endianness rule used when [`CryptoEngine::aggregate`] extracts
//! a culprit index from a rejected signature share.
//!
//! The "opaque bytes" for any package type (round-1/round-2 DKG packages,
//! key packages, commitments, signature shares) are `hex(utf8(json(package)))`
//! (spec §4.1, §6), produced and consumed by [`macros::encode_package`] and
//! friends — never the raw `frost-core` byte format. Secret material that
//! never crosses the wire (DKG secrets, signing nonces) keeps that raw
//! format, since there is no interop contract covering it.

mod macros;
pub mod hpke;

use std::collections::{BTreeMap, HashMap};

use frost_ed25519 as frost_ed;
use frost_secp256k1 as frost_secp;
// frost-secp256k1 and frost-ed25519 both re-export rand_core 0.6.4; either works here.
use frost_secp::rand_core::OsRng;

use crate::curve::Curve;
use crate::error::{CoreError, CoreResult};
use crate::ids::{ParticipantId, ParticipantIndex};

use macros::{
    decode_own_package, decode_peer_package, encode_package, extract_culprit, impl_aggregate,
    impl_dkg_part1, impl_dkg_part2, impl_dkg_part3, impl_sign_commit, impl_sign_round2,
};

/// Curve-polymorphic FROST operations. One implementor per [`Curve`] variant.
pub trait CryptoEngine: Send + Sync {
    fn curve(&self) -> Curve;

    /// DKG round 1: produce `(round1_secret, round1_package)`.
    fn dkg_part1(
        &self,
        index: ParticipantIndex,
        threshold: u16,
        total: u16,
    ) -> CoreResult<(Vec<u8>, Vec<u8>)>;

    /// DKG round 2: produce `(round2_secret, {recipient_index: round2_package})`.
    fn dkg_part2(
        &self,
        own_index: ParticipantIndex,
        round1_secret: &[u8],
        round1_packages: &BTreeMap<ParticipantIndex, Vec<u8>>,
    ) -> CoreResult<(Vec<u8>, BTreeMap<ParticipantIndex, Vec<u8>>)>;

    /// DKG round 3 (finalize): produce `(key_package, public_key_package)`.
    fn dkg_part3(
        &self,
        own_index: ParticipantIndex,
        round2_secret: &[u8],
        round1_packages: &BTreeMap<ParticipantIndex, Vec<u8>>,
        round2_packages: &BTreeMap<ParticipantIndex, Vec<u8>>,
    ) -> CoreResult<(Vec<u8>, Vec<u8>)>;

    /// Signing round 1: produce `(nonces, commitments)` from a key package.
    fn sign_commit(&self, key_package: &[u8]) -> CoreResult<(Vec<u8>, Vec<u8>)>;

    /// Signing round 2: produce this participant's signature share.
    fn sign_round2(
        &self,
        key_package: &[u8],
        nonces: &[u8],
        message: &[u8],
        commitments: &BTreeMap<ParticipantIndex, Vec<u8>>,
    ) -> CoreResult<Vec<u8>>;

    /// Aggregate signature shares into the final signature.
    ///
    /// Returns [`CoreError::InvalidSignatureShare`] naming the culprit
    /// index(es) when a share fails verification.
    fn aggregate(
        &self,
        public_key_package: &[u8],
        message: &[u8],
        commitments: &BTreeMap<ParticipantIndex, Vec<u8>>,
        signature_shares: &BTreeMap<ParticipantIndex, Vec<u8>>,
    ) -> CoreResult<Vec<u8>>;

    /// Group public (verifying) key, serialized.
    fn group_public_key(&self, public_key_package: &[u8]) -> CoreResult<Vec<u8>>;
}

/// secp256k1 (Ethereum-compatible) engine.
pub struct Secp256k1Engine;

impl CryptoEngine for Secp256k1Engine {
    fn curve(&self) -> Curve {
        Curve::Secp256k1
    }

    impl_dkg_part1!(dkg_part1, frost_secp);
    impl_dkg_part2!(dkg_part2, frost_secp);
    impl_dkg_part3!(dkg_part3, frost_secp);
    impl_sign_commit!(sign_commit, frost_secp);
    impl_sign_round2!(sign_round2, frost_secp);
    impl_aggregate!(aggregate, frost_secp, big);

    fn group_public_key(&self, public_key_package: &[u8]) -> CoreResult<Vec<u8>> {
        let package: frost_secp::keys::PublicKeyPackage =
            decode_own_package(public_key_package, "public key package")?;
        package
            .verifying_key()
            .serialize()
            .map_err(|e| CoreError::Internal(format!("serialize group key: {e}")))
    }
}

/// Ed25519 (Solana-compatible) engine.
pub struct Ed25519Engine;

impl CryptoEngine for Ed25519Engine {
    fn curve(&self) -> Curve {
        Curve::Ed25519
    }

    impl_dkg_part1!(dkg_part1, frost_ed);
    impl_dkg_part2!(dkg_part2, frost_ed);
    impl_dkg_part3!(dkg_part3, frost_ed);
    impl_sign_commit!(sign_commit, frost_ed);
    impl_sign_round2!(sign_round2, frost_ed);
    impl_aggregate!(aggregate, frost_ed, little);

    fn group_public_key(&self, public_key_package: &[u8]) -> CoreResult<Vec<u8>> {
        let package: frost_ed::keys::PublicKeyPackage =
            decode_own_package(public_key_package, "public key package")?;
        package
            .verifying_key()
            .serialize()
            .map_err(|e| CoreError::Internal(format!("serialize group key: {e}")))
    }
}

/// Construct the engine for a curve.
pub fn engine_for(curve: Curve) -> Box<dyn CryptoEngine> {
    match curve {
        Curve::Secp256k1 => Box::new(Secp256k1Engine),
        Curve::Ed25519 => Box::new(Ed25519Engine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_full_dkg_and_sign(engine: &dyn CryptoEngine, threshold: u16, total: u16) {
        let indices: Vec<ParticipantIndex> =
            (1..=total).map(ParticipantIndex::new_unwrap).collect();

        let mut round1_secrets = HashMap::new();
        let mut round1_packages: BTreeMap<ParticipantIndex, Vec<u8>> = BTreeMap::new();
        for &index in &indices {
            let (secret, package) = engine.dkg_part1(index, threshold, total).unwrap();
            round1_secrets.insert(index, secret);
            round1_packages.insert(index, package);
        }

        let mut round2_secrets = HashMap::new();
        let mut round2_inbox: HashMap<ParticipantIndex, BTreeMap<ParticipantIndex, Vec<u8>>> =
            HashMap::new();
        for &index in &indices {
            let (secret, outgoing) = engine
                .dkg_part2(index, &round1_secrets[&index], &round1_packages)
                .unwrap();
            round2_secrets.insert(index, secret);
            for (to, package) in outgoing {
                round2_inbox.entry(to).or_default().insert(index, package);
            }
        }

        let mut key_packages = HashMap::new();
        let mut pubkey_package_bytes = Vec::new();
        for &index in &indices {
            let (key_package, pubkey_package) = engine
                .dkg_part3(
                    index,
                    &round2_secrets[&index],
                    &round1_packages,
                    &round2_inbox[&index],
                )
                .unwrap();
            key_packages.insert(index, key_package);
            pubkey_package_bytes = pubkey_package;
        }

        let signers = &indices[..threshold as usize];
        let mut nonces = HashMap::new();
        let mut commitments: BTreeMap<ParticipantIndex, Vec<u8>> = BTreeMap::new();
        for &index in signers {
            let (n, c) = engine.sign_commit(&key_packages[&index]).unwrap();
            nonces.insert(index, n);
            commitments.insert(index, c);
        }

        let message = b"test message";
        let mut shares: BTreeMap<ParticipantIndex, Vec<u8>> = BTreeMap::new();
        for &index in signers {
            let share = engine
                .sign_round2(&key_packages[&index], &nonces[&index], message, &commitments)
                .unwrap();
            shares.insert(index, share);
        }

        let signature = engine
            .aggregate(&pubkey_package_bytes, message, &commitments, &shares)
            .unwrap();
        assert!(!signature.is_empty());
    }

    #[test]
    fn secp256k1_full_dkg_and_sign() {
        run_full_dkg_and_sign(&Secp256k1Engine, 2, 3);
    }

    #[test]
    fn ed25519_full_dkg_and_sign() {
        run_full_dkg_and_sign(&Ed25519Engine, 2, 3);
    }

    #[test]
    fn identifier_endianness_matches_curve_contract() {
        let id_secp = frost_secp::Identifier::try_from(42u16).unwrap();
        let bytes_secp = id_secp.serialize();
        let len = bytes_secp.len();
        let extracted_secp = u16::from_be_bytes([bytes_secp[len - 2], bytes_secp[len - 1]]);
        assert_eq!(extracted_secp, 42);

        let id_ed = frost_ed::Identifier::try_from(99u16).unwrap();
        let bytes_ed = id_ed.serialize();
        let extracted_ed = u16::from_le_bytes([bytes_ed[0], bytes_ed[1]]);
        assert_eq!(extracted_ed, 99);
    }
}
