use aes_gcm::{
    aead::{Aead, KeyInit},
    AeadCore, Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::{VaultError, VaultResult};

pub const SALT_LEN: usize = 32;
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// 32 MiB, 3 passes: several hundred milliseconds on a desktop CPU.
    fn default() -> Self {
        Self {
            memory_kib: 32 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// A derived symmetric key. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; KEY_LEN]);

impl VaultKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for VaultKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Password-based key derivation with fixed cost parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyVault {
    params: KdfParams,
}

impl KeyVault {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Derive a key from `password`. A fresh random salt is generated when
    /// none is given; the salt used is returned alongside the key.
    pub fn derive_key(&self, password: &str, salt: Option<&[u8]>) -> VaultResult<(VaultKey, Vec<u8>)> {
        let salt = match salt {
            Some(s) if s.len() == SALT_LEN => s.to_vec(),
            Some(s) => return Err(VaultError::InvalidSalt(s.len())),
            None => {
                let mut s = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut s);
                s
            }
        };

        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| VaultError::Kdf(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon2
            .hash_password_into(password.as_bytes(), &salt, &mut key)
            .map_err(|e| VaultError::Kdf(e.to_string()))?;
        let out = VaultKey(key);
        key.zeroize();
        Ok((out, salt))
    }

    /// `derive_key` on the blocking pool, so async callers never stall a
    /// runtime worker (or hold a lock) while the KDF runs.
    pub async fn derive_key_blocking(
        &self,
        password: &str,
        salt: Option<Vec<u8>>,
    ) -> VaultResult<(VaultKey, Vec<u8>)> {
        let vault = *self;
        let password = Zeroizing::new(password.to_string());
        tokio::task::spawn_blocking(move || vault.derive_key(&password, salt.as_deref()))
            .await
            .map_err(|_| VaultError::TaskFailed)?
    }
}

/// Encrypt with a fresh random nonce; output is `nonce || ciphertext+tag`.
pub fn encrypt(data: &[u8], key: &VaultKey) -> VaultResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| VaultError::Authentication)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let body = cipher
        .encrypt(&nonce, data)
        .map_err(|_| VaultError::Authentication)?;

    let mut out = Vec::with_capacity(NONCE_LEN + body.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Split off the nonce and authenticate-and-decrypt the rest.
pub fn decrypt(ciphertext: &[u8], key: &VaultKey) -> VaultResult<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < NONCE_LEN {
        return Err(VaultError::Truncated);
    }
    let (nonce, body) = ciphertext.split_at(NONCE_LEN);

    let cipher = Aes256Gcm::new_from_slice(&key.0).map_err(|_| VaultError::Authentication)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), body)
        .map(Zeroizing::new)
        .map_err(|_| VaultError::Authentication)
}
