//! Account addresses: `nano_` + base32(public key) + base32(checksum).

use crate::TypesError;
use blake2::digest::consts::U5;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
const PREFIX: &str = "nano_";
const LEGACY_PREFIX: &str = "xrb_";

/// Characters used for the padded public key (260 bits / 5).
const KEY_CHARS: usize = 52;
/// Characters used for the 40-bit checksum.
const CHECKSUM_CHARS: usize = 8;

/// A 32-byte ledger account public key, displayed in `nano_` form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Upper-case hex of the raw public key.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    fn checksum(&self) -> [u8; 5] {
        let digest = Blake2b::<U5>::digest(self.0);
        let mut out = [0u8; 5];
        out.copy_from_slice(&digest);
        out.reverse();
        out
    }
}

fn encode_base32(bytes: &[u8], pad_bits: usize, out: &mut String) {
    let chars = (pad_bits + bytes.len() * 8) / 5;
    for i in 0..chars {
        let mut value = 0usize;
        for b in 0..5 {
            let pos = i * 5 + b;
            let bit = if pos < pad_bits {
                0
            } else {
                let idx = pos - pad_bits;
                (bytes[idx / 8] >> (7 - idx % 8)) & 1
            };
            value = (value << 1) | bit as usize;
        }
        out.push(ALPHABET[value] as char);
    }
}

fn decode_base32(text: &str, pad_bits: usize, out: &mut [u8]) -> Option<()> {
    let mut bit_pos = 0usize;
    for c in text.bytes() {
        let value = ALPHABET.iter().position(|&a| a == c)?;
        for b in (0..5).rev() {
            let bit = ((value >> b) & 1) as u8;
            if bit_pos < pad_bits {
                if bit != 0 {
                    return None;
                }
            } else {
                let idx = bit_pos - pad_bits;
                out[idx / 8] |= bit << (7 - idx % 8);
            }
            bit_pos += 1;
        }
    }
    Some(())
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::with_capacity(PREFIX.len() + KEY_CHARS + CHECKSUM_CHARS);
        s.push_str(PREFIX);
        encode_base32(&self.0, 4, &mut s);
        encode_base32(&self.checksum(), 0, &mut s);
        f.write_str(&s)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(PREFIX)
            .or_else(|| s.strip_prefix(LEGACY_PREFIX))
            .ok_or_else(|| TypesError::InvalidAddress(s.to_string()))?;
        if !body.is_ascii() || body.len() != KEY_CHARS + CHECKSUM_CHARS {
            return Err(TypesError::InvalidAddress(s.to_string()));
        }

        let mut key = [0u8; 32];
        decode_base32(&body[..KEY_CHARS], 4, &mut key)
            .ok_or_else(|| TypesError::InvalidAddress(s.to_string()))?;
        let mut checksum = [0u8; 5];
        decode_base32(&body[KEY_CHARS..], 0, &mut checksum)
            .ok_or_else(|| TypesError::InvalidAddress(s.to_string()))?;

        let address = Address(key);
        if address.checksum() != checksum {
            return Err(TypesError::InvalidAddress(format!("bad checksum: {}", s)));
        }
        Ok(address)
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GENESIS: &str = "nano_3t6k35gi95xu6tergt6p69ck76ogmitsa8mnijtpxm9fkcm736xtoncuohr3";
    const GENESIS_KEY: &str = "E89208DD038FBB269987689621D52292AE9C35941A7484756ECCED92A65093BA";

    #[test]
    fn test_encode_known_key() {
        let key: [u8; 32] = hex::decode(GENESIS_KEY).unwrap().try_into().unwrap();
        assert_eq!(Address(key).to_string(), GENESIS);
    }

    #[test]
    fn test_zero_key() {
        assert_eq!(
            Address::default().to_string(),
            "nano_1111111111111111111111111111111111111111111111111111hifc8npp"
        );
    }

    #[test]
    fn test_parse_known_address() {
        let address: Address = GENESIS.parse().unwrap();
        assert_eq!(address.to_hex(), GENESIS_KEY);

        let legacy = GENESIS.replacen("nano_", "xrb_", 1);
        assert_eq!(legacy.parse::<Address>().unwrap(), address);
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let mut bad = GENESIS.to_string();
        bad.pop();
        bad.push('1');
        assert!(bad.parse::<Address>().is_err());
    }

    #[test]
    fn test_rejects_multibyte_body() {
        // Byte length matches, but byte 52 falls inside the 'é'.
        let text = format!("nano_{}é{}", "1".repeat(51), "1".repeat(7));
        assert!(matches!(
            text.parse::<Address>(),
            Err(TypesError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("nano_abc".parse::<Address>().is_err());
        assert!("btc_3t6k35gi95xu6tergt6p69ck76ogmitsa8mnijtpxm9fkcm736xtoncuohr3"
            .parse::<Address>()
            .is_err());
        // '0', 'l', 'v' and '2' are not in the alphabet
        let bad = GENESIS.replacen('3', "2", 2);
        assert!(bad.parse::<Address>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let address: Address = GENESIS.parse().unwrap();
        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(json, format!("\"{}\"", GENESIS));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, address);
    }

    proptest! {
        #[test]
        fn prop_address_text_is_stable(bytes in any::<[u8; 32]>()) {
            let address = Address(bytes);
            let text = address.to_string();
            prop_assert_eq!(text.len(), 65);
            prop_assert_eq!(text.parse::<Address>().unwrap(), address);
        }
    }
}
