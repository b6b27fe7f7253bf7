//! Curve selection.
//!
//! A wallet is bound to exactly one curve for its lifetime (spec §3). The
//! coordinators are generic over the curve's capability set (§9); curve-
//! specific types never cross the [`crate::crypto::CryptoEngine`] facade
//! except for the endianness rule in §4.1, which is an observable protocol
//! property rather than an implementation leak.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Elliptic-curve group a wallet's FROST key is instantiated over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    /// secp256k1 (Ethereum/Bitcoin-compatible). Identifiers serialize
    /// big-endian.
    Secp256k1,
    /// Ed25519 (Solana-compatible). Identifiers serialize little-endian.
    Ed25519,
}

impl Curve {
    /// Endianness FROST uses to serialize this curve's scalar identifiers
    /// (spec §4.1 "Endianness contract").
    pub fn identifier_endianness(self) -> Endianness {
        match self {
            Curve::Secp256k1 => Endianness::Big,
            Curve::Ed25519 => Endianness::Little,
        }
    }
}

/// Byte order used when a FROST identifier is packed/extracted from a fixed
/// 32-byte scalar representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

impl FromStr for Curve {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "secp256k1" => Ok(Curve::Secp256k1),
            "ed25519" => Ok(Curve::Ed25519),
            other => Err(format!("Invalid curve '{other}'. Must be 'secp256k1' or 'ed25519'.")),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Secp256k1 => write!(f, "secp256k1"),
            Curve::Ed25519 => write!(f, "ed25519"),
        }
    }
}
