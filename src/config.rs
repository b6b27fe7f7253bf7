//! Core configuration derived from environment variables.
//!
//! Configuration is loaded once by the host process and validated before a
//! wallet is opened. There is no `Role` split here: a single core is
//! instantiated once per wallet (§2, §5); host-process concerns like bind
//! address, mTLS, and JWKS endpoints belong to the binding/IPC layer this
//! crate doesn't own (§1).
//!
//! ## Environment Variables
//!
//! - `CORE_VAULT_PATH`: path to the ReDB database backing the keystore vault
//!   and audit log (default: `./.data/vault.redb`)
//! - `CORE_KEK_PROVIDER`: "local" or "kms" (default: "local")
//! - `CORE_KEK_ID`: KMS key id, required when the provider is "kms"
//! - `CORE_DKG_TIMEOUT_MS`: deadline for a DKG session to reach `Complete`
//! - `CORE_SIGNING_TIMEOUT_MS`: deadline for a signing session to reach `Complete`
//! - `CORE_AUDIT_SIGNING_KEY_PATH`: path to the Ed25519 key the audit log
//!   signs each entry with
//! - `RUST_LOG`: log level filter, read directly by `tracing-subscriber`

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_DKG_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_SIGNING_TIMEOUT_MS: u64 = 60_000;

/// Trimmed env var, or empty string if unset.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

/// Key Encryption Key provider for the native keystore format (§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KekProvider {
    /// Passphrase-derived local KEK (PBKDF2-HMAC-SHA256).
    #[default]
    Local,
    /// External KMS-held KEK. Extension point only: this crate does not ship
    /// a KMS client, it only threads `kek_id` through to one supplied by the
    /// host process.
    Kms,
}

impl FromStr for KekProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "kms" => Ok(Self::Kms),
            other => Err(format!("Invalid KEK provider '{other}'. Must be 'local' or 'kms'.")),
        }
    }
}

/// Core configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    vault_path: PathBuf,
    kek_provider: KekProvider,
    kek_id: Option<String>,
    dkg_timeout_ms: u64,
    signing_timeout_ms: u64,
    audit_signing_key_path: Option<PathBuf>,
}

impl CoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let vault_path = env_trim("CORE_VAULT_PATH")
            .parse::<PathBuf>()
            .ok()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("./.data/vault.redb"));

        let kek_provider = env_trim("CORE_KEK_PROVIDER")
            .parse::<KekProvider>()
            .unwrap_or_default();

        let kek_id = env_trim("CORE_KEK_ID");
        let kek_id = if kek_id.is_empty() { None } else { Some(kek_id) };

        let dkg_timeout_ms = env_trim("CORE_DKG_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_DKG_TIMEOUT_MS);

        let signing_timeout_ms = env_trim("CORE_SIGNING_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_SIGNING_TIMEOUT_MS);

        let audit_signing_key_path = env_trim("CORE_AUDIT_SIGNING_KEY_PATH")
            .parse::<PathBuf>()
            .ok()
            .filter(|p| !p.as_os_str().is_empty());

        Self {
            vault_path,
            kek_provider,
            kek_id,
            dkg_timeout_ms,
            signing_timeout_ms,
            audit_signing_key_path,
        }
    }

    /// Configuration for tests: a temp-directory vault path, local KEK,
    /// generous timeouts.
    pub fn for_tests(vault_path: PathBuf) -> Self {
        Self {
            vault_path,
            kek_provider: KekProvider::Local,
            kek_id: None,
            dkg_timeout_ms: 60_000,
            signing_timeout_ms: 60_000,
            audit_signing_key_path: None,
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.kek_provider == KekProvider::Kms && self.kek_id.is_none() {
            return Err("CORE_KEK_ID is required when CORE_KEK_PROVIDER=kms.".to_string());
        }
        if self.dkg_timeout_ms == 0 {
            return Err("CORE_DKG_TIMEOUT_MS must be nonzero.".to_string());
        }
        if self.signing_timeout_ms == 0 {
            return Err("CORE_SIGNING_TIMEOUT_MS must be nonzero.".to_string());
        }
        Ok(())
    }

    pub fn vault_path(&self) -> &PathBuf {
        &self.vault_path
    }

    pub fn kek_provider(&self) -> &KekProvider {
        &self.kek_provider
    }

    pub fn kek_id(&self) -> Option<&str> {
        self.kek_id.as_deref()
    }

    pub fn dkg_timeout(&self) -> Duration {
        Duration::from_millis(self.dkg_timeout_ms)
    }

    pub fn signing_timeout(&self) -> Duration {
        Duration::from_millis(self.signing_timeout_ms)
    }

    pub fn audit_signing_key_path(&self) -> Option<&PathBuf> {
        self.audit_signing_key_path.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kek_provider_parsing() {
        assert_eq!("local".parse::<KekProvider>().unwrap(), KekProvider::Local);
        assert_eq!("KMS".parse::<KekProvider>().unwrap(), KekProvider::Kms);
        assert!("invalid".parse::<KekProvider>().is_err());
    }

    #[test]
    fn test_config_validates() {
        let config = CoreConfig::for_tests(PathBuf::from("./.data/test-vault.redb"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn kms_without_id_fails_validation() {
        let mut config = CoreConfig::for_tests(PathBuf::from("./.data/test-vault.redb"));
        config.kek_provider = KekProvider::Kms;
        assert!(config.validate().is_err());
    }
}
