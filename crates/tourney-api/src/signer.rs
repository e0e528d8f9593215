//! Signing oracle for backend assertions.
//!
//! The backend only ever sees `(hotkey, signature)` pairs over the canonical
//! strings built in [`crate::messages`]; key material never leaves this
//! module.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use sp_core::crypto::Ss58Codec;
use sp_core::{sr25519, Pair};

use crate::error::ApiError;
use crate::Result;

/// Identity plus signing capability of a validator or miner.
pub trait Signer: Send + Sync {
    /// SS58 address of the hotkey.
    fn hotkey(&self) -> String;

    /// Hex-encoded raw public key.
    fn public_key_hex(&self) -> String;

    /// Hex-encoded signature over `message`.
    fn sign(&self, message: &[u8]) -> String;
}

/// sr25519 keypair held in memory.
pub struct Sr25519Signer {
    pair: sr25519::Pair,
}

impl std::fmt::Debug for Sr25519Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sr25519Signer")
            .field("hotkey", &self.hotkey())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HotkeyFile {
    #[serde(default)]
    secret_phrase: Option<String>,
    #[serde(default)]
    secret_seed: Option<String>,
}

impl Sr25519Signer {
    pub fn from_pair(pair: sr25519::Pair) -> Self {
        Self { pair }
    }

    /// Build from a secret URI: mnemonic, `0x`-prefixed seed, or dev URI
    /// such as `//Alice`.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        // Bare 64-char hex seeds are accepted without the prefix.
        let normalized = if secret.len() == 64 && secret.chars().all(|c| c.is_ascii_hexdigit()) {
            format!("0x{secret}")
        } else {
            secret.to_string()
        };
        let pair = sr25519::Pair::from_string(&normalized, None)
            .map_err(|e| ApiError::Signing(format!("invalid secret: {e:?}")))?;
        Ok(Self { pair })
    }

    /// Load the hotkey `<wallet_path>/<name>/hotkeys/<hotkey>`.
    pub fn from_wallet(wallet_path: &Path, name: &str, hotkey: &str) -> Result<Self> {
        let file = hotkey_file_path(wallet_path, name, hotkey);
        if !file.exists() {
            return Err(ApiError::Signing(format!(
                "hotkey '{hotkey}' not found for wallet '{name}' ({})",
                file.display()
            )));
        }
        Self::from_wallet_file(&file)
    }

    /// Parse a wallet keyfile holding `secretPhrase` or `secretSeed`.
    pub fn from_wallet_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: HotkeyFile = serde_json::from_str(&raw).map_err(|e| {
            ApiError::Signing(format!("unreadable hotkey file {}: {e}", path.display()))
        })?;

        match (parsed.secret_seed, parsed.secret_phrase) {
            (Some(seed), _) => Self::from_secret(&seed),
            (None, Some(phrase)) => Self::from_secret(&phrase),
            (None, None) => Err(ApiError::Signing(format!(
                "hotkey file {} has no secretSeed or secretPhrase (encrypted keys are not supported)",
                path.display()
            ))),
        }
    }
}

impl Signer for Sr25519Signer {
    fn hotkey(&self) -> String {
        self.pair.public().to_ss58check()
    }

    fn public_key_hex(&self) -> String {
        hex::encode(self.pair.public().0)
    }

    fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.pair.sign(message).0)
    }
}

/// Resolve the on-disk location of a wallet hotkey, expanding a leading `~`.
pub fn hotkey_file_path(wallet_path: &Path, name: &str, hotkey: &str) -> PathBuf {
    expand_home(wallet_path)
        .join(name)
        .join("hotkeys")
        .join(hotkey)
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Check a hex signature over `message` against an SS58 hotkey.
///
/// Malformed inputs verify as `false`.
pub fn verify_signature(hotkey_ss58: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(public) = sr25519::Public::from_ss58check(hotkey_ss58) else {
        return false;
    };
    let Ok(bytes) = hex::decode(signature_hex.trim_start_matches("0x")) else {
        return false;
    };
    let Ok(raw) = <[u8; 64]>::try_from(bytes.as_slice()) else {
        return false;
    };
    sr25519::Pair::verify(&sr25519::Signature::from_raw(raw), message, &public)
}
