//! State blocks and their hashing.

use crate::{decode_fixed, Address, TypesError};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

type Blake2b256 = Blake2b<U32>;

/// Preamble for state block hashing: 31 zero bytes followed by the type tag 6.
const STATE_PREAMBLE: [u8; 32] = {
    let mut p = [0u8; 32];
    p[31] = 6;
    p
};

/// 32-byte block hash, shown as upper-case hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Interpret the 32 bytes as an account key (the `link_as_account` view).
    pub fn as_address(&self) -> Address {
        Address(self.0)
    }
}

impl From<Address> for BlockHash {
    fn from(address: Address) -> Self {
        Self(address.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self)
    }
}

impl FromStr for BlockHash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<32>(s).map(BlockHash)
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 64-byte Ed25519 signature over a block hash.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}

impl FromStr for Signature {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<64>(s).map(Signature)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// What a state block does, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subtype {
    Send,
    Receive,
    Open,
    Change,
    Epoch,
}

impl Subtype {
    /// Whether this block pockets a send (its link is a source block hash).
    pub fn is_receive(&self) -> bool {
        matches!(self, Subtype::Receive | Subtype::Open)
    }
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Subtype::Send => "send",
            Subtype::Receive => "receive",
            Subtype::Open => "open",
            Subtype::Change => "change",
            Subtype::Epoch => "epoch",
        };
        f.write_str(s)
    }
}

/// Serde helper for raw amounts, which the node transports as decimal strings.
pub mod raw_amount {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Proof-of-work nonce, transported as 16 hex digits.
pub mod work_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(work) => serializer.collect_str(&format_args!("{:016x}", work)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| u64::from_str_radix(&s, 16).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// A ledger state block.
///
/// Every block carries the full account state after it is applied: the
/// current representative and balance, plus a `link` whose meaning depends
/// on the subtype (destination key for sends, source hash for receives).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    pub account: Address,
    pub previous: BlockHash,
    pub representative: Address,
    #[serde(with = "raw_amount")]
    pub balance: u128,
    pub link: BlockHash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    #[serde(default, with = "work_hex", skip_serializing_if = "Option::is_none")]
    pub work: Option<u64>,
}

impl StateBlock {
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        hasher.update(STATE_PREAMBLE);
        hasher.update(self.account.0);
        hasher.update(self.previous.0);
        hasher.update(self.representative.0);
        hasher.update(self.balance.to_be_bytes());
        hasher.update(self.link.0);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        BlockHash(out)
    }

    /// Root used for proof-of-work: the previous hash, or the account key for an open block.
    pub fn work_root(&self) -> BlockHash {
        if self.previous.is_zero() {
            BlockHash::from(self.account)
        } else {
            self.previous
        }
    }

    pub fn link_as_account(&self) -> Address {
        self.link.as_address()
    }
}
