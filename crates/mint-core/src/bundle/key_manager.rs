//! Credential resolution and encrypted key storage

use crate::error::CredentialError;
use crate::intent::CredentialRef;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable holding the key file password
pub const KEY_PASSWORD_VAR: &str = "FLASHMINT_KEY_PASSWORD";

/// Encrypted key file format
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedKeyFile {
    /// Nonce-prefixed AES-GCM ciphertext of the private key, hex encoded
    encrypted_key: String,
    kdf_params: KdfParams,
    cipher: String,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfParams {
    salt: String,
    iterations: u32,
    key_length: u32,
}

/// Where a credential reference points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// `env:NAME` - private key hex in an environment variable
    Env(String),
    /// `keyfile:PATH` - encrypted key file
    KeyFile(PathBuf),
    /// Private key hex given directly
    Inline,
}

impl CredentialSource {
    pub fn parse(reference: &CredentialRef) -> Self {
        let raw = reference.as_str();
        if let Some(name) = raw.strip_prefix("env:") {
            CredentialSource::Env(name.to_string())
        } else if let Some(path) = raw.strip_prefix("keyfile:") {
            CredentialSource::KeyFile(PathBuf::from(path))
        } else {
            CredentialSource::Inline
        }
    }
}

/// Turns credential references into wallets
#[derive(Debug, Clone)]
pub struct KeyStore {
    password_var: String,
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            password_var: KEY_PASSWORD_VAR.to_string(),
        }
    }

    /// Read the key file password from a different environment variable
    pub fn with_password_var(password_var: impl Into<String>) -> Self {
        Self {
            password_var: password_var.into(),
        }
    }

    /// Resolve a credential reference to a wallet
    pub async fn load_wallet(&self, reference: &CredentialRef) -> Result<LocalWallet, CredentialError> {
        let wallet = match CredentialSource::parse(reference) {
            CredentialSource::Env(name) => {
                let key = std::env::var(&name).map_err(|_| CredentialError::MissingEnv(name.clone()))?;
                parse_private_key(&key)?
            }
            CredentialSource::KeyFile(path) => {
                let password = std::env::var(&self.password_var)
                    .map_err(|_| CredentialError::MissingEnv(self.password_var.clone()))?;
                self.load_encrypted_key(&path, &password).await?
            }
            CredentialSource::Inline => parse_private_key(reference.as_str())?,
        };

        debug!(address = ?wallet.address(), "Resolved credential");
        Ok(wallet)
    }

    /// Load a wallet from an encrypted key file
    pub async fn load_encrypted_key<P: AsRef<Path>>(
        &self,
        key_file: P,
        password: &str,
    ) -> Result<LocalWallet, CredentialError> {
        let content = tokio::fs::read_to_string(key_file)
            .await
            .map_err(|e| CredentialError::KeyFile(e.to_string()))?;
        let encrypted: EncryptedKeyFile =
            serde_json::from_str(&content).map_err(|e| CredentialError::KeyFile(e.to_string()))?;

        let private_key = decrypt_key(&encrypted, password)?;
        parse_private_key(&private_key)
    }

    /// Generate a new key, save it encrypted, and return its address
    pub async fn create_encrypted_key<P: AsRef<Path>>(
        &self,
        key_file: P,
        password: &str,
    ) -> Result<Address, CredentialError> {
        let wallet = LocalWallet::new(&mut rand::thread_rng());
        let private_key_hex = hex::encode(wallet.signer().to_bytes());
        let encrypted = encrypt_key(&private_key_hex, password)?;

        let content =
            serde_json::to_string_pretty(&encrypted).map_err(|e| CredentialError::KeyFile(e.to_string()))?;
        tokio::fs::write(key_file, content)
            .await
            .map_err(|e| CredentialError::KeyFile(e.to_string()))?;

        Ok(wallet.address())
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_private_key(key: &str) -> Result<LocalWallet, CredentialError> {
    key.trim().parse::<LocalWallet>().map_err(|_| CredentialError::InvalidKey)
}

fn encrypt_key(private_key: &str, password: &str) -> Result<EncryptedKeyFile, CredentialError> {
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
    use hmac::Hmac;
    use pbkdf2::pbkdf2;
    use rand::RngCore;
    use sha2::Sha256;

    let mut salt = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut salt);

    let iterations = 100_000;
    let mut derived_key = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &salt, iterations, &mut derived_key);

    let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&derived_key);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, private_key.as_bytes())
        .map_err(|e| CredentialError::KeyFile(format!("encryption failed: {}", e)))?;

    let mut encrypted_data = nonce_bytes.to_vec();
    encrypted_data.extend_from_slice(&ciphertext);

    Ok(EncryptedKeyFile {
        encrypted_key: hex::encode(encrypted_data),
        kdf_params: KdfParams {
            salt: hex::encode(salt),
            iterations,
            key_length: 32,
        },
        cipher: "aes-256-gcm".to_string(),
        version: 1,
    })
}

fn decrypt_key(encrypted: &EncryptedKeyFile, password: &str) -> Result<String, CredentialError> {
    use aes_gcm::aead::Aead;
    use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
    use hmac::Hmac;
    use pbkdf2::pbkdf2;
    use sha2::Sha256;

    if encrypted.cipher != "aes-256-gcm" {
        return Err(CredentialError::KeyFile(format!("unsupported cipher: {}", encrypted.cipher)));
    }

    let salt = hex::decode(&encrypted.kdf_params.salt).map_err(|e| CredentialError::KeyFile(e.to_string()))?;
    let data = hex::decode(&encrypted.encrypted_key).map_err(|e| CredentialError::KeyFile(e.to_string()))?;

    if data.len() < 12 {
        return Err(CredentialError::KeyFile("invalid encrypted data length".to_string()));
    }

    let mut derived_key = [0u8; 32];
    pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &salt, encrypted.kdf_params.iterations, &mut derived_key);

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);
    let key = aes_gcm::Key::<Aes256Gcm>::from_slice(&derived_key);
    let cipher = Aes256Gcm::new(key);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CredentialError::KeyFile("decryption failed, wrong password?".to_string()))?;

    String::from_utf8(plaintext).map_err(|e| CredentialError::KeyFile(e.to_string()))
}
