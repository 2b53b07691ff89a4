//! Field-level encryption for sensitive data.
//!
//! AES-256-GCM over individual column values: backend credential blobs,
//! OAuth client secrets, PKCE verifiers, and tokens. The stored format is
//! `hex(nonce || ciphertext || tag)`.

use anyhow::{Context, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

/// Size of the encryption key (32 bytes = 256 bits).
pub const KEY_SIZE: usize = 32;

const NONCE_SIZE: usize = 12;

/// Encryptor for sensitive column values.
pub struct FieldEncryptor {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl FieldEncryptor {
    /// Create an encryptor from a 32-byte master key.
    pub fn new(master_key: &[u8; KEY_SIZE]) -> Result<Self> {
        let unbound_key = UnboundKey::new(&AES_256_GCM, master_key)
            .map_err(|_| anyhow::anyhow!("Failed to create encryption key"))?;
        Ok(Self {
            key: LessSafeKey::new(unbound_key),
            rng: SystemRandom::new(),
        })
    }

    /// Create an encryptor from a hex-encoded master key (64 hex chars).
    pub fn from_hex(master_key_hex: &str) -> Result<Self> {
        let key = parse_master_key(master_key_hex)?;
        Self::new(&key)
    }

    /// Encrypt a plaintext string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| anyhow::anyhow!("Encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(hex::encode(sealed))
    }

    /// Decrypt a value produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext_hex: &str) -> Result<String> {
        let sealed = hex::decode(ciphertext_hex).context("Invalid hex encoding")?;
        if sealed.len() < NONCE_SIZE + AES_256_GCM.tag_len() {
            anyhow::bail!("Ciphertext too short");
        }

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_SIZE);
        let nonce_array: [u8; NONCE_SIZE] = nonce_bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Invalid nonce"))?;

        let mut in_out = Zeroizing::new(encrypted.to_vec());
        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_array),
                Aad::empty(),
                in_out.as_mut_slice(),
            )
            .map_err(|_| anyhow::anyhow!("Decryption failed - wrong key or corrupted data"))?;

        String::from_utf8(plaintext.to_vec()).context("Decrypted data is not valid UTF-8")
    }

    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    pub fn decrypt_opt(&self, ciphertext_hex: Option<&str>) -> Result<Option<String>> {
        ciphertext_hex.map(|c| self.decrypt(c)).transpose()
    }
}

/// Generate a random master key.
pub fn generate_master_key() -> Result<[u8; KEY_SIZE]> {
    let mut key = [0u8; KEY_SIZE];
    SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| anyhow::anyhow!("Failed to generate random key"))?;
    Ok(key)
}

/// Parse a hex-encoded master key.
pub fn parse_master_key(master_key_hex: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = Zeroizing::new(
        hex::decode(master_key_hex.trim()).context("Master key is not valid hex")?,
    );
    let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        anyhow::anyhow!(
            "Master key must be {} bytes ({} hex chars), got {} bytes",
            KEY_SIZE,
            KEY_SIZE * 2,
            bytes.len()
        )
    })?;
    Ok(key)
}
