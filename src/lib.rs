// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity (e.g., CoreError in error mod)
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit

//! FROST coordination core
//!
//! A library implementing the participant-side coordination for FROST
//! (Flexible Round-Optimized Schnorr Threshold) distributed key generation
//! and threshold signing, over secp256k1 and Ed25519.
//!
//! ## Architecture
//!
//! This crate has no network stack or process model of its own: a host
//! process embeds one [`core::WalletCore`] per wallet and drives it with
//! [`core::Command`]s and [`transport::Frame`]s carried over whatever
//! channel it already has, observing [`core::Event`]s in return. The pieces:
//!
//! - [`session`]: immutable, agreed-upon session descriptors.
//! - [`mesh`]: per-peer channel liveness and the mesh-readiness barrier.
//! - [`dkg`]: the three-round FROST key generation state machine.
//! - [`signing`]: the two-round FROST signing state machine.
//! - [`crypto`]: the curve-polymorphic FROST operations facade, plus HPKE
//!   sealing for DKG round-2 packages.
//! - [`keystore`]: encrypted at-rest storage and portable export/import of
//!   key shares.
//! - [`audit`]: a hash-chained, Ed25519-signed log of coordination events.
//!
//! ## Security model
//!
//! - **t-of-n threshold**: no single participant can forge a signature.
//! - **Share isolation**: a key share never leaves the process that holds
//!   it in plaintext; DKG round-2 packages are HPKE-sealed to their
//!   recipient when a session carries HPKE public keys.
//! - **Encrypted persistence**: key shares at rest are AEAD-sealed under a
//!   passphrase-derived key (native vault: PBKDF2; portable export: Argon2id).
//!
//! ## Curves
//!
//! Supports both secp256k1 (Ethereum/Bitcoin-compatible) and Ed25519
//! (Solana-compatible) ciphersuites; a wallet is bound to exactly one for
//! its lifetime.

pub mod audit;
pub mod config;
pub mod core;
pub mod crypto;
pub mod curve;
pub mod dkg;
pub mod error;
pub mod ids;
pub mod keystore;
pub mod mesh;
pub mod session;
pub mod signing;
pub mod storage;
pub mod transport;

#[cfg(feature = "otel")]
pub mod telemetry;

#[cfg(not(feature = "otel"))]
pub mod telemetry {
    //! Stub telemetry module when OpenTelemetry is disabled.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    /// Initialize tracing with console output only.
    pub fn init_tracing() {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "coordination_core=info".into());
        let fmt_layer = tracing_subscriber::fmt::layer();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    /// No-op shutdown when OpenTelemetry is disabled.
    pub fn shutdown_tracing() {}
}

pub use config::CoreConfig;
pub use core::{Command, Event, WalletCore};
pub use curve::Curve;
pub use error::{CoreError, CoreResult};
