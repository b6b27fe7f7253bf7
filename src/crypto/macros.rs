//! Declarative macros generating [`super::CryptoEngine`] methods per ciphersuite.
//!
//! # Architecture Decision
//!
//! Macros, not a shared trait on the FROST types themselves: `frost_secp256k1`
//! and `frost_ed25519` expose separate, incompatible types
//! (`frost_secp::Identifier` and `frost_ed::Identifier` share no common
//! trait), but the operations performed on them are identical except for the
//! crate path. A macro gives one source of truth that expands per curve at
//! compile time.
//!
//! These operations are pure: no storage, no struct fields. Secret material
//! (round-1/round-2 DKG secrets, signing nonces) is threaded through by the
//! caller ([`crate::dkg::DkgCoordinator`], [`crate::signing::SigningCoordinator`])
//! rather than held behind the engine.
//!
//! # Wire encoding
//!
//! Every FROST *package* type that crosses the engine boundary — round-1/
//! round-2 DKG packages, key packages, public key packages, signing
//! commitments, signature shares — is encoded as `hex(utf8(json(package)))`
//! (spec §4.1, §6), never as the raw `frost-core` byte format. Secret
//! material that never leaves this process (DKG secret packages, signing
//! nonces) keeps the raw `.serialize()`/`.deserialize()` byte format, since
//! there is no interop contract for it to satisfy.

use crate::error::CoreError;
use crate::ids::ParticipantId;

/// JSON-serialize a FROST package type, then hex-encode the UTF-8 JSON —
/// the canonical wire/engine-boundary representation for any package.
pub(crate) fn encode_package<T: serde::Serialize>(package: &T, what: &str) -> Result<Vec<u8>, CoreError> {
    let json = serde_json::to_vec(package).map_err(|e| CoreError::Internal(format!("serialize {what}: {e}")))?;
    Ok(hex::encode(json).into_bytes())
}

/// Inverse of [`encode_package`] for this coordinator's own package fields
/// (key package, nonces-adjacent data not attributed to a specific peer).
/// Hex-decode failure surfaces the spec's documented fatal case of raw JSON
/// arriving where hex was expected.
pub(crate) fn decode_own_package<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, CoreError> {
    let json = hex::decode(bytes).map_err(|e| CoreError::Deserialization(format!("invalid hex for {what}: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| CoreError::Deserialization(format!("invalid {what} json: {e}")))
}

/// Inverse of [`encode_package`] for a package attributed to `peer`: hex and
/// JSON failures both surface as `MalformedPackage`, matching spec §7.
pub(crate) fn decode_peer_package<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
    peer: ParticipantId,
    what: &str,
) -> Result<T, CoreError> {
    let json = hex::decode(bytes)
        .map_err(|e| CoreError::MalformedPackage { peer: peer.clone(), reason: format!("invalid hex for {what}: {e}") })?;
    serde_json::from_slice(&json).map_err(|e| CoreError::MalformedPackage { peer, reason: format!("invalid {what} json: {e}") })
}

/// DKG round 1: generate this participant's secret package and public package.
macro_rules! impl_dkg_part1 {
    ($fn_name:ident, $frost:ident) => {
        fn $fn_name(
            &self,
            index: ParticipantIndex,
            threshold: u16,
            total: u16,
        ) -> CoreResult<(Vec<u8>, Vec<u8>)> {
            let identifier = $frost::Identifier::try_from(index.get()).map_err(|e| {
                CoreError::Internal(format!("invalid identifier {index}: {e}"))
            })?;

            let (secret, package) = $frost::keys::dkg::part1(identifier, total, threshold, OsRng)
                .map_err(|e| CoreError::ProtocolViolation(format!("dkg round1 failed: {e}")))?;

            // The round-1 secret never crosses a wire boundary; it stays in
            // frost-core's own validated byte format.
            let secret_bytes = secret
                .serialize()
                .map_err(|e| CoreError::Internal(format!("serialize round1 secret: {e}")))?;
            let package_bytes = encode_package(&package, "round1 package")?;

            Ok((secret_bytes, package_bytes))
        }
    };
}

/// DKG round 2: consume the round-1 secret and peers' round-1 packages,
/// produce the round-2 secret and one package per recipient.
macro_rules! impl_dkg_part2 {
    ($fn_name:ident, $frost:ident) => {
        fn $fn_name(
            &self,
            own_index: ParticipantIndex,
            round1_secret: &[u8],
            round1_packages: &BTreeMap<ParticipantIndex, Vec<u8>>,
        ) -> CoreResult<(Vec<u8>, BTreeMap<ParticipantIndex, Vec<u8>>)> {
            let secret = $frost::keys::dkg::round1::SecretPackage::deserialize(round1_secret)
                .map_err(|e| CoreError::Deserialization(format!("invalid round1 secret: {e}")))?;

            let mut decoded: BTreeMap<$frost::Identifier, $frost::keys::dkg::round1::Package> =
                BTreeMap::new();
            let mut identifier_to_index: HashMap<$frost::Identifier, ParticipantIndex> =
                HashMap::new();
            for (&peer_index, bytes) in round1_packages {
                let identifier = $frost::Identifier::try_from(peer_index.get()).map_err(|e| {
                    CoreError::MalformedPackage {
                        peer: ParticipantId::new(peer_index.to_string()),
                        reason: format!("invalid identifier: {e}"),
                    }
                })?;
                identifier_to_index.insert(identifier, peer_index);
                if peer_index == own_index {
                    continue;
                }
                let package: $frost::keys::dkg::round1::Package = decode_peer_package(
                    bytes,
                    ParticipantId::new(peer_index.to_string()),
                    "round1 package",
                )?;
                decoded.insert(identifier, package);
            }

            let (round2_secret, round2_packages) = $frost::keys::dkg::part2(secret, &decoded)
                .map_err(|e| CoreError::ProtocolViolation(format!("dkg round2 failed: {e}")))?;

            let round2_secret_bytes = round2_secret
                .serialize()
                .map_err(|e| CoreError::Internal(format!("serialize round2 secret: {e}")))?;

            let mut out = BTreeMap::new();
            for (identifier, package) in round2_packages {
                let to_index = *identifier_to_index.get(&identifier).ok_or_else(|| {
                    CoreError::Internal(format!("unknown identifier in round2 output: {identifier:?}"))
                })?;
                let bytes = encode_package(&package, "round2 package")?;
                out.insert(to_index, bytes);
            }

            Ok((round2_secret_bytes, out))
        }
    };
}

/// DKG round 3 (finalize): consume the round-2 secret and all round1/round2
/// packages, produce the key package and the group's public key package.
macro_rules! impl_dkg_part3 {
    ($fn_name:ident, $frost:ident) => {
        fn $fn_name(
            &self,
            own_index: ParticipantIndex,
            round2_secret: &[u8],
            round1_packages: &BTreeMap<ParticipantIndex, Vec<u8>>,
            round2_packages: &BTreeMap<ParticipantIndex, Vec<u8>>,
        ) -> CoreResult<(Vec<u8>, Vec<u8>)> {
            let secret = $frost::keys::dkg::round2::SecretPackage::deserialize(round2_secret)
                .map_err(|e| CoreError::Deserialization(format!("invalid round2 secret: {e}")))?;

            let mut decoded_round1: BTreeMap<$frost::Identifier, $frost::keys::dkg::round1::Package> =
                BTreeMap::new();
            for (&peer_index, bytes) in round1_packages {
                if peer_index == own_index {
                    continue;
                }
                let identifier = $frost::Identifier::try_from(peer_index.get()).map_err(|e| {
                    CoreError::MalformedPackage {
                        peer: ParticipantId::new(peer_index.to_string()),
                        reason: format!("invalid identifier: {e}"),
                    }
                })?;
                let package: $frost::keys::dkg::round1::Package = decode_peer_package(
                    bytes,
                    ParticipantId::new(peer_index.to_string()),
                    "round1 package",
                )?;
                decoded_round1.insert(identifier, package);
            }

            let mut decoded_round2: BTreeMap<$frost::Identifier, $frost::keys::dkg::round2::Package> =
                BTreeMap::new();
            for (&peer_index, bytes) in round2_packages {
                let identifier = $frost::Identifier::try_from(peer_index.get()).map_err(|e| {
                    CoreError::MalformedPackage {
                        peer: ParticipantId::new(peer_index.to_string()),
                        reason: format!("invalid identifier: {e}"),
                    }
                })?;
                let package: $frost::keys::dkg::round2::Package = decode_peer_package(
                    bytes,
                    ParticipantId::new(peer_index.to_string()),
                    "round2 package",
                )?;
                decoded_round2.insert(identifier, package);
            }

            let (key_package, pubkey_package) =
                $frost::keys::dkg::part3(&secret, &decoded_round1, &decoded_round2)
                    .map_err(|e| CoreError::ProtocolViolation(format!("dkg finalize failed: {e}")))?;

            let key_package_bytes = encode_package(&key_package, "key package")?;
            let pubkey_package_bytes = encode_package(&pubkey_package, "public key package")?;

            Ok((key_package_bytes, pubkey_package_bytes))
        }
    };
}

/// Signing round 1: generate nonces and public commitments from a key package.
macro_rules! impl_sign_commit {
    ($fn_name:ident, $frost:ident) => {
        fn $fn_name(&self, key_package: &[u8]) -> CoreResult<(Vec<u8>, Vec<u8>)> {
            let key_package: $frost::keys::KeyPackage = decode_own_package(key_package, "key package")?;

            let (nonces, commitments) = $frost::round1::commit(key_package.signing_share(), &mut OsRng);

            // Nonces are retained locally and consumed by sign_round2 on this
            // same engine; they never cross the wire.
            let nonces_bytes = nonces
                .serialize()
                .map_err(|e| CoreError::Internal(format!("serialize nonces: {e}")))?;
            let commitments_bytes = encode_package(&commitments, "commitment")?;

            Ok((nonces_bytes, commitments_bytes))
        }
    };
}

/// Signing round 2: produce this participant's signature share.
macro_rules! impl_sign_round2 {
    ($fn_name:ident, $frost:ident) => {
        fn $fn_name(
            &self,
            key_package: &[u8],
            nonces: &[u8],
            message: &[u8],
            commitments: &BTreeMap<ParticipantIndex, Vec<u8>>,
        ) -> CoreResult<Vec<u8>> {
            let key_package: $frost::keys::KeyPackage = decode_own_package(key_package, "key package")?;
            let nonces = $frost::round1::SigningNonces::deserialize(nonces)
                .map_err(|e| CoreError::Deserialization(format!("invalid signing nonces: {e}")))?;

            let mut decoded: BTreeMap<$frost::Identifier, $frost::round1::SigningCommitments> =
                BTreeMap::new();
            for (&peer_index, bytes) in commitments {
                let identifier = $frost::Identifier::try_from(peer_index.get()).map_err(|e| {
                    CoreError::MalformedPackage {
                        peer: ParticipantId::new(peer_index.to_string()),
                        reason: format!("invalid identifier: {e}"),
                    }
                })?;
                let commitment: $frost::round1::SigningCommitments = decode_peer_package(
                    bytes,
                    ParticipantId::new(peer_index.to_string()),
                    "commitment",
                )?;
                decoded.insert(identifier, commitment);
            }

            let signing_package = $frost::SigningPackage::new(decoded, message);

            let share = $frost::round2::sign(&signing_package, &nonces, &key_package)
                .map_err(|e| CoreError::ProtocolViolation(format!("partial signing failed: {e}")))?;

            encode_package(&share, "signature share")
        }
    };
}

/// Aggregate signature shares into the final signature.
///
/// On an invalid-share error, extracts the culprit identifier using the
/// endianness specific to this curve (see [`impl_extract_culprit`]).
macro_rules! impl_aggregate {
    ($fn_name:ident, $frost:ident, $endianness:tt) => {
        fn $fn_name(
            &self,
            public_key_package: &[u8],
            message: &[u8],
            commitments: &BTreeMap<ParticipantIndex, Vec<u8>>,
            signature_shares: &BTreeMap<ParticipantIndex, Vec<u8>>,
        ) -> CoreResult<Vec<u8>> {
            let pubkey_package: $frost::keys::PublicKeyPackage =
                decode_own_package(public_key_package, "public key package")?;

            let mut decoded_commitments: BTreeMap<
                $frost::Identifier,
                $frost::round1::SigningCommitments,
            > = BTreeMap::new();
            for (&peer_index, bytes) in commitments {
                let identifier = $frost::Identifier::try_from(peer_index.get()).map_err(|e| {
                    CoreError::MalformedPackage {
                        peer: ParticipantId::new(peer_index.to_string()),
                        reason: format!("invalid identifier: {e}"),
                    }
                })?;
                let commitment: $frost::round1::SigningCommitments = decode_peer_package(
                    bytes,
                    ParticipantId::new(peer_index.to_string()),
                    "commitment",
                )?;
                decoded_commitments.insert(identifier, commitment);
            }
            let signing_package = $frost::SigningPackage::new(decoded_commitments, message);

            let mut decoded_shares: BTreeMap<$frost::Identifier, $frost::round2::SignatureShare> =
                BTreeMap::new();
            for (&peer_index, bytes) in signature_shares {
                let identifier = $frost::Identifier::try_from(peer_index.get()).map_err(|e| {
                    CoreError::MalformedPackage {
                        peer: ParticipantId::new(peer_index.to_string()),
                        reason: format!("invalid identifier: {e}"),
                    }
                })?;
                let share: $frost::round2::SignatureShare = decode_peer_package(
                    bytes,
                    ParticipantId::new(peer_index.to_string()),
                    "signature share",
                )?;
                decoded_shares.insert(identifier, share);
            }

            let signature = $frost::aggregate(&signing_package, &decoded_shares, &pubkey_package)
                .map_err(|e| extract_culprit!(e, $frost, $endianness))?;

            signature
                .serialize()
                .map_err(|e| CoreError::Internal(format!("serialize signature: {e}")))
        }
    };
}

/// Extract the culprit's `ParticipantIndex` from a FROST aggregation error,
/// using the endianness this curve serializes identifiers with (§4.1).
macro_rules! extract_culprit {
    ($err:expr, $frost:ident, big) => {{
        match &$err {
            $frost::Error::InvalidSignatureShare { culprit } => {
                let bytes = culprit.serialize();
                let len = bytes.len();
                let raw = if len >= 2 {
                    u16::from_be_bytes([bytes[len - 2], bytes[len - 1]])
                } else {
                    tracing::warn!(len, "unexpected identifier serialization length, defaulting to 0");
                    0
                };
                CoreError::InvalidSignatureShare {
                    culprits: ParticipantIndex::new(raw).into_iter().collect(),
                }
            }
            other => CoreError::ProtocolViolation(format!("aggregation failed: {other}")),
        }
    }};
    ($err:expr, $frost:ident, little) => {{
        match &$err {
            $frost::Error::InvalidSignatureShare { culprit } => {
                let bytes = culprit.serialize();
                let raw = if bytes.len() >= 2 {
                    u16::from_le_bytes([bytes[0], bytes[1]])
                } else if !bytes.is_empty() {
                    u16::from(bytes[0])
                } else {
                    tracing::warn!("unexpected empty identifier serialization, defaulting to 0");
                    0
                };
                CoreError::InvalidSignatureShare {
                    culprits: ParticipantIndex::new(raw).into_iter().collect(),
                }
            }
            other => CoreError::ProtocolViolation(format!("aggregation failed: {other}")),
        }
    }};
}

pub(crate) use extract_culprit;
pub(crate) use impl_aggregate;
pub(crate) use impl_dkg_part1;
pub(crate) use impl_dkg_part2;
pub(crate) use impl_dkg_part3;
pub(crate) use impl_sign_commit;
pub(crate) use impl_sign_round2;
