//! Credential vault and sealed secret values.
//!
//! Values are sealed with AES-256-GCM under a master key and stored as
//! `enc:base64(nonce+ciphertext)`. Nothing is decrypted until a node or an
//! expression asks for it, and the plaintext is zeroized when dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Secure container for the master key that zeroizes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct SecureMasterKey(Vec<u8>);

impl SecureMasterKey {
    fn new(key: Vec<u8>) -> Self {
        Self(key)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Number of PBKDF2 iterations for key derivation.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// Master key length for AES-256.
const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM.
const NONCE_LEN: usize = 12;

/// Prefix marking a sealed value.
const SEALED_PREFIX: &str = "enc:";

/// A decrypted secret. Zeroized on drop and redacted in debug output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Resolves a node's credential reference at visit time.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, credential_id: &str) -> Result<Secret>;
}

/// Seals and opens secret variable values.
pub trait SecretCipher: Send + Sync {
    fn seal(&self, plaintext: &str) -> Result<String>;
    fn open(&self, sealed: &str) -> Result<Secret>;
}

#[derive(Debug, Clone)]
struct StoredCredential {
    /// Sealed value
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory credential store holding sealed values.
pub struct CredentialVault {
    master_key: SecureMasterKey,
    credentials: RwLock<HashMap<String, StoredCredential>>,
    rng: SystemRandom,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("master_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl CredentialVault {
    /// Create a vault under a fresh random master key.
    pub fn generate() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key = vec![0u8; KEY_LEN];
        rng.fill(&mut key)
            .map_err(|_| Error::Credential("Failed to generate master key".to_string()))?;
        Self::new(key)
    }

    /// Create a vault from a raw 32-byte master key.
    pub fn new(key: Vec<u8>) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::Credential(format!(
                "Master key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        Ok(Self {
            master_key: SecureMasterKey::new(key),
            credentials: RwLock::new(HashMap::new()),
            rng: SystemRandom::new(),
        })
    }

    /// Derive the master key from a passphrase with PBKDF2-HMAC-SHA256.
    pub fn from_passphrase(passphrase: &str, salt: &[u8]) -> Result<Self> {
        let iterations = std::num::NonZeroU32::new(PBKDF2_ITERATIONS)
            .ok_or_else(|| Error::Internal("PBKDF2 iterations must be non-zero".to_string()))?;
        let mut derived_key = vec![0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            iterations,
            salt,
            passphrase.as_bytes(),
            &mut derived_key,
        );
        Self::new(derived_key)
    }

    /// Seal and store a credential.
    pub async fn insert(&self, id: &str, plaintext: &str) -> Result<()> {
        let sealed = self.seal(plaintext)?;
        self.insert_sealed(id, &sealed).await
    }

    /// Store an already sealed credential.
    pub async fn insert_sealed(&self, id: &str, sealed: &str) -> Result<()> {
        if !is_sealed(sealed) {
            return Err(Error::Credential(format!(
                "Credential '{}' is not a sealed value",
                id
            )));
        }
        let now = Utc::now();
        let mut credentials = self.credentials.write().await;
        let created_at = credentials.get(id).map(|c| c.created_at).unwrap_or(now);
        credentials.insert(
            id.to_string(),
            StoredCredential {
                value: sealed.to_string(),
                created_at,
                updated_at: now,
            },
        );
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.credentials.write().await.remove(id).is_some()
    }

    /// Credential ids with their last update time, sorted by id.
    pub async fn list(&self) -> Vec<(String, DateTime<Utc>)> {
        let credentials = self.credentials.read().await;
        let mut ids: Vec<_> = credentials
            .iter()
            .map(|(id, c)| (id.clone(), c.updated_at))
            .collect();
        ids.sort();
        ids
    }

    /// Mask a credential value for display.
    pub fn mask_value(value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() <= 4 {
            "*".repeat(chars.len())
        } else {
            let head: String = chars[..2].iter().collect();
            let tail: String = chars[chars.len() - 2..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}

#[async_trait]
impl CredentialProvider for CredentialVault {
    async fn resolve(&self, credential_id: &str) -> Result<Secret> {
        let sealed = {
            let credentials = self.credentials.read().await;
            credentials
                .get(credential_id)
                .map(|c| c.value.clone())
                .ok_or_else(|| {
                    Error::Credential(format!("Credential '{}' not found", credential_id))
                })?
        };
        self.open(&sealed)
    }
}

impl SecretCipher for CredentialVault {
    fn seal(&self, plaintext: &str) -> Result<String> {
        let encrypted = encrypt_data(plaintext.as_bytes(), self.master_key.as_bytes(), &self.rng)?;
        Ok(format!("{}{}", SEALED_PREFIX, STANDARD.encode(encrypted)))
    }

    fn open(&self, sealed: &str) -> Result<Secret> {
        let encoded = sealed
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| Error::Credential("Value is not sealed".to_string()))?;
        let encrypted = STANDARD
            .decode(encoded)
            .map_err(|_| Error::Credential("Failed to decrypt credential".to_string()))?;
        let mut decrypted = decrypt_data(&encrypted, self.master_key.as_bytes())
            .map_err(|_| Error::Credential("Failed to decrypt credential".to_string()))?;
        let text = String::from_utf8(decrypted.clone())
            .map_err(|_| Error::Credential("Failed to decrypt credential".to_string()));
        decrypted.zeroize();
        text.map(Secret)
    }
}

/// Whether a stored string is a sealed value.
pub fn is_sealed(value: &str) -> bool {
    value.starts_with(SEALED_PREFIX)
}

/// Encrypt data using AES-256-GCM.
fn encrypt_data(plaintext: &[u8], key: &[u8], rng: &SystemRandom) -> Result<Vec<u8>> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| Error::Credential("Failed to create encryption key".to_string()))?;
    let key = LessSafeKey::new(unbound_key);

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| Error::Credential("Failed to generate nonce".to_string()))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut ciphertext = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut ciphertext)
        .map_err(|_| Error::Credential("Encryption failed".to_string()))?;

    // Nonce goes first.
    let mut result = nonce_bytes.to_vec();
    result.extend(ciphertext);
    Ok(result)
}

/// Decrypt data using AES-256-GCM.
fn decrypt_data(ciphertext: &[u8], key: &[u8]) -> std::result::Result<Vec<u8>, ()> {
    if ciphertext.len() < NONCE_LEN {
        return Err(());
    }

    let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_LEN);
    let nonce_array: [u8; NONCE_LEN] = nonce_bytes.try_into().map_err(|_| ())?;
    let nonce = Nonce::assume_unique_for_key(nonce_array);

    let unbound_key = UnboundKey::new(&AES_256_GCM, key).map_err(|_| ())?;
    let key = LessSafeKey::new(unbound_key);

    let mut data = encrypted.to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut data)
        .map_err(|_| ())?;

    Ok(plaintext.to_vec())
}
