//! Account key derivation and Ed25519-Blake2b block signing.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest};
use ed25519_dalek::hazmat::{raw_sign, raw_verify, ExpandedSecretKey};
use ed25519_dalek::VerifyingKey;
use nanowallet_types::{Address, BlockHash, Signature};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// BIP44 purpose and the ledger's registered coin type.
const BIP44_PURPOSE: u32 = 44;
const COIN_TYPE: u32 = 165;

/// An account's 32-byte private key. Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; 32]);

impl PrivateKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn expanded(&self) -> ExpandedSecretKey {
        let mut h = Zeroizing::new([0u8; 64]);
        h.copy_from_slice(&Blake2b512::digest(self.0));
        ExpandedSecretKey::from_bytes(&h)
    }

    pub fn address(&self) -> Address {
        let vk = VerifyingKey::from(&self.expanded());
        Address(vk.to_bytes())
    }

    pub fn sign(&self, hash: &BlockHash) -> Signature {
        let esk = self.expanded();
        let vk = VerifyingKey::from(&esk);
        let sig = raw_sign::<Blake2b512>(&esk, hash.as_bytes(), &vk);
        Signature(sig.to_bytes())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// Raw-seed derivation: Blake2b-256(seed || index as big-endian u32).
pub fn derive_from_seed(seed: &[u8; 32], index: u32) -> PrivateKey {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(seed);
    hasher.update(index.to_be_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    PrivateKey(key)
}

/// Mnemonic derivation: SLIP-0010 Ed25519 at m/44'/165'/index'.
pub fn derive_from_bip39_seed(seed: &[u8; 64], index: u32) -> PrivateKey {
    PrivateKey(slip10_ed25519::derive_ed25519_private_key(
        seed,
        &[BIP44_PURPOSE, COIN_TYPE, index],
    ))
}

/// Check a block signature against the signing account.
pub fn verify(address: &Address, hash: &BlockHash, signature: &Signature) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(address.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    raw_verify::<Blake2b512>(&vk, hash.as_bytes(), &sig).is_ok()
}
