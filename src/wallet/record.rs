use nanowallet_types::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Where a wallet's signing keys come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// 32 random bytes, accounts derived by Blake2b(seed || index).
    RawSeed,
    /// A BIP39 phrase; the wallet password doubles as the BIP39 passphrase.
    Mnemonic,
    /// External signing device. No seed is stored.
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub index: u32,
}

/// One persisted wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub id: Uuid,
    pub label: String,
    /// Hex of the vault ciphertext (nonce || body). Empty for hardware wallets.
    #[serde(default)]
    pub seed: String,
    #[serde(default)]
    pub salt: String,
    pub kind: OriginKind,
    #[serde(default)]
    pub accounts: BTreeMap<Address, AccountEntry>,
}

impl WalletRecord {
    pub fn new(label: &str, kind: OriginKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.to_string(),
            seed: String::new(),
            salt: String::new(),
            kind,
            accounts: BTreeMap::new(),
        }
    }
}
