//! HPKE encryption for DKG round-2 packages (§10.7 ambient enrichment).
//!
//! X-25519-HKDF-SHA256 with ChaCha20Poly1305. Round-2 DKG packages contain
//! secret share material that must only be readable by the intended
//! recipient; this isn't named by the wire-level spec but doesn't
//! contradict it.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hpke::{
    Deserializable, Kem, OpModeR, OpModeS, Serializable, aead::ChaCha20Poly1305, kdf::HkdfSha256,
    kem::X25519HkdfSha256, single_shot_open, single_shot_seal,
};
use hpke::rand_core::OsRng;
use zeroize::Zeroize;

use crate::error::{CoreError, CoreResult};

pub type HpkePublicKey = <X25519HkdfSha256 as Kem>::PublicKey;
pub type HpkeSecretKey = <X25519HkdfSha256 as Kem>::PrivateKey;
pub type HpkeEncappedKey = <X25519HkdfSha256 as Kem>::EncappedKey;

/// HPKE key pair for one participant.
pub struct HpkeKeyPair {
    pub public_key: HpkePublicKey,
    secret_key: HpkeSecretKey,
}

impl HpkeKeyPair {
    pub fn generate() -> Self {
        let (secret_key, public_key) = X25519HkdfSha256::gen_keypair(&mut OsRng);
        Self { public_key, secret_key }
    }

    pub fn from_secret_key(secret_key: HpkeSecretKey) -> Self {
        let public_key = X25519HkdfSha256::sk_to_pk(&secret_key);
        Self { public_key, secret_key }
    }

    pub fn secret_key(&self) -> &HpkeSecretKey {
        &self.secret_key
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public_key.to_bytes())
    }

    pub fn secret_key_base64(&self) -> String {
        BASE64.encode(self.secret_key.to_bytes())
    }

    pub fn public_key_from_base64(encoded: &str) -> CoreResult<HpkePublicKey> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CoreError::Deserialization(format!("invalid hpke pubkey base64: {e}")))?;
        HpkePublicKey::from_bytes(&bytes)
            .map_err(|e| CoreError::Deserialization(format!("invalid hpke public key: {e}")))
    }

    pub fn secret_key_from_base64(encoded: &str) -> CoreResult<HpkeSecretKey> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CoreError::Deserialization(format!("invalid hpke secret key base64: {e}")))?;
        HpkeSecretKey::from_bytes(&bytes)
            .map_err(|e| CoreError::Deserialization(format!("invalid hpke secret key: {e}")))
    }
}

impl Drop for HpkeKeyPair {
    fn drop(&mut self) {
        let mut sk_bytes = self.secret_key.to_bytes().to_vec();
        sk_bytes.zeroize();
    }
}

/// Encrypted HPKE payload: encapsulated key plus ciphertext.
#[derive(Debug, Clone)]
pub struct EncryptedPayload {
    pub encapped_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedPayload {
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::with_capacity(4 + self.encapped_key.len() + self.ciphertext.len());
        #[allow(clippy::cast_possible_truncation)]
        let len_bytes = (self.encapped_key.len() as u32).to_be_bytes();
        bytes.extend_from_slice(&len_bytes);
        bytes.extend_from_slice(&self.encapped_key);
        bytes.extend_from_slice(&self.ciphertext);
        BASE64.encode(&bytes)
    }

    pub fn from_base64(encoded: &str) -> CoreResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CoreError::Deserialization(format!("invalid hpke payload base64: {e}")))?;
        if bytes.len() < 4 {
            return Err(CoreError::Deserialization("hpke payload too short".to_string()));
        }
        let encapped_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + encapped_len {
            return Err(CoreError::Deserialization("hpke payload truncated".to_string()));
        }
        Ok(Self {
            encapped_key: bytes[4..4 + encapped_len].to_vec(),
            ciphertext: bytes[4 + encapped_len..].to_vec(),
        })
    }
}

/// Encrypt `plaintext` to `recipient_pubkey`, binding the ciphertext to `info`.
pub fn encrypt(
    recipient_pubkey: &HpkePublicKey,
    plaintext: &[u8],
    info: &[u8],
) -> CoreResult<EncryptedPayload> {
    let mode = OpModeS::Base;
    let (encapped_key, ciphertext) =
        single_shot_seal::<ChaCha20Poly1305, HkdfSha256, X25519HkdfSha256, _>(
            &mode,
            recipient_pubkey,
            info,
            plaintext,
            &[],
            &mut OsRng,
        )
        .map_err(|e| CoreError::Internal(format!("hpke seal failed: {e:?}")))?;

    Ok(EncryptedPayload { encapped_key: encapped_key.to_bytes().to_vec(), ciphertext })
}

/// Decrypt an [`EncryptedPayload`] addressed to `recipient_secret_key`.
///
/// A mismatched `info` or corrupted ciphertext surfaces as
/// [`CoreError::IntegrityFailure`]: the AEAD tag failed to verify.
pub fn decrypt(
    recipient_secret_key: &HpkeSecretKey,
    payload: &EncryptedPayload,
    info: &[u8],
) -> CoreResult<Vec<u8>> {
    let mode = OpModeR::Base;
    let encapped_key = HpkeEncappedKey::from_bytes(&payload.encapped_key)
        .map_err(|e| CoreError::Deserialization(format!("invalid hpke encapped key: {e}")))?;

    single_shot_open::<ChaCha20Poly1305, HkdfSha256, X25519HkdfSha256>(
        &mode,
        recipient_secret_key,
        &encapped_key,
        info,
        &payload.ciphertext,
        &[],
    )
    .map_err(|e| CoreError::IntegrityFailure(format!("hpke open failed: {e:?}")))
}

pub fn encrypt_to_base64(
    recipient_pubkey: &HpkePublicKey,
    plaintext: &[u8],
    info: &[u8],
) -> CoreResult<String> {
    Ok(encrypt(recipient_pubkey, plaintext, info)?.to_base64())
}

pub fn decrypt_from_base64(
    recipient_secret_key: &HpkeSecretKey,
    encrypted_base64: &str,
    info: &[u8],
) -> CoreResult<Vec<u8>> {
    let payload = EncryptedPayload::from_base64(encrypted_base64)?;
    decrypt(recipient_secret_key, &payload, info)
}

/// HPKE `info` binding an encrypted round-2 package to its session, sender,
/// recipient, and (once computed) the exact round-1 package set it followed.
pub fn dkg_round2_info(
    session_id: &uuid::Uuid,
    from_index: u16,
    to_index: u16,
    commitment_hash: Option<&[u8]>,
) -> Vec<u8> {
    commitment_hash.map_or_else(
        || format!("frost-dkg-round2|{session_id}|{from_index}|{to_index}").into_bytes(),
        |hash| {
            format!(
                "frost-dkg-round2|{session_id}|{from_index}|{to_index}|{}",
                hex::encode(hash)
            )
            .into_bytes()
        },
    )
}

/// Deterministic SHA-256 commitment over the sorted round-1 package set,
/// binding round-2 encryption to the exact set of round-1 packages it
/// followed (prevents a round-2 package from one DKG attempt being replayed
/// into a differently-composed one).
pub fn compute_commitment_hash(packages: &std::collections::BTreeMap<u16, &[u8]>) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for (index, package_bytes) in packages {
        hasher.update(index.to_be_bytes());
        #[allow(clippy::cast_possible_truncation)]
        let len = package_bytes.len() as u32;
        hasher.update(len.to_be_bytes());
        hasher.update(package_bytes);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_pair_roundtrips_through_base64() {
        let kp = HpkeKeyPair::generate();
        let pk = HpkeKeyPair::public_key_from_base64(&kp.public_key_base64()).unwrap();
        let sk = HpkeKeyPair::secret_key_from_base64(&kp.secret_key_base64()).unwrap();
        assert_eq!(pk.to_bytes(), kp.public_key.to_bytes());
        assert_eq!(sk.to_bytes(), kp.secret_key.to_bytes());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let recipient = HpkeKeyPair::generate();
        let plaintext = b"secret DKG round-2 share data";
        let info = b"test-context";
        let encrypted = encrypt(&recipient.public_key, plaintext, info).unwrap();
        let decrypted = decrypt(recipient.secret_key(), &encrypted, info).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_key_fails_as_integrity_failure() {
        let sender_recipient = HpkeKeyPair::generate();
        let wrong_recipient = HpkeKeyPair::generate();
        let encrypted = encrypt(&sender_recipient.public_key, b"secret", b"context").unwrap();
        let result = decrypt(wrong_recipient.secret_key(), &encrypted, b"context");
        assert!(matches!(result, Err(CoreError::IntegrityFailure(_))));
    }

    #[test]
    fn wrong_info_fails() {
        let recipient = HpkeKeyPair::generate();
        let encrypted = encrypt(&recipient.public_key, b"secret", b"correct-info").unwrap();
        let result = decrypt(recipient.secret_key(), &encrypted, b"wrong-info");
        assert!(result.is_err());
    }

    #[test]
    fn commitment_hash_is_order_independent() {
        let mut a = std::collections::BTreeMap::new();
        a.insert(1_u16, b"pkg1".as_slice());
        a.insert(2_u16, b"pkg2".as_slice());
        let mut b = std::collections::BTreeMap::new();
        b.insert(2_u16, b"pkg2".as_slice());
        b.insert(1_u16, b"pkg1".as_slice());
        assert_eq!(compute_commitment_hash(&a), compute_commitment_hash(&b));
    }
}
