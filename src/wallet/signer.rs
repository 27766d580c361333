use super::keys::{derive_from_bip39_seed, derive_from_seed, PrivateKey};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bip39::Mnemonic;
use nanowallet_types::{Address, Signature, StateBlock};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Anything that can produce account keys' public halves and sign blocks
/// for a derivation index.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn address(&self, index: u32) -> AppResult<Address>;

    async fn sign(&self, index: u32, block: &StateBlock) -> AppResult<Signature>;
}

/// Opens a session with an external signing device.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn connect(&self) -> AppResult<Arc<dyn Signer>>;
}

enum SeedMaterial {
    Raw(Zeroizing<[u8; 32]>),
    Bip39(Zeroizing<[u8; 64]>),
}

/// Signer backed by a decrypted seed held in memory.
pub struct SeedSigner {
    material: SeedMaterial,
}

impl std::fmt::Debug for SeedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.material {
            SeedMaterial::Raw(_) => "raw",
            SeedMaterial::Bip39(_) => "bip39",
        };
        f.debug_struct("SeedSigner").field("kind", &kind).finish()
    }
}

impl SeedSigner {
    pub fn from_raw_seed(seed: &[u8]) -> AppResult<Self> {
        let bytes: [u8; 32] = seed
            .try_into()
            .map_err(|_| AppError::InvalidSeed(format!("expected 32 bytes, got {}", seed.len())))?;
        Ok(Self {
            material: SeedMaterial::Raw(Zeroizing::new(bytes)),
        })
    }

    /// `passphrase` is the BIP39 passphrase (the wallet password).
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> AppResult<Self> {
        let mnemonic =
            Mnemonic::parse(phrase).map_err(|e| AppError::InvalidMnemonic(e.to_string()))?;
        Ok(Self {
            material: SeedMaterial::Bip39(Zeroizing::new(mnemonic.to_seed(passphrase))),
        })
    }

    pub fn key(&self, index: u32) -> PrivateKey {
        match &self.material {
            SeedMaterial::Raw(seed) => derive_from_seed(seed, index),
            SeedMaterial::Bip39(seed) => derive_from_bip39_seed(seed, index),
        }
    }
}

#[async_trait]
impl Signer for SeedSigner {
    async fn address(&self, index: u32) -> AppResult<Address> {
        Ok(self.key(index).address())
    }

    async fn sign(&self, index: u32, block: &StateBlock) -> AppResult<Signature> {
        Ok(self.key(index).sign(&block.hash()))
    }
}

/// Parse a 64-hex-character raw seed.
pub fn parse_seed_hex(text: &str) -> AppResult<Zeroizing<Vec<u8>>> {
    if text.len() != 64 {
        return Err(AppError::InvalidSeed("seed must be 64 hex characters".into()));
    }
    hex::decode(text)
        .map(Zeroizing::new)
        .map_err(|e| AppError::InvalidSeed(e.to_string()))
}
