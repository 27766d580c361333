//! Push messages delivered by the confirmation websocket.

use crate::{Address, BlockHash, StateBlock, Subtype, TypesError};
use serde::Deserialize;

/// A block confirmed by the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// Owner of the confirmed block.
    pub account: Address,
    pub hash: BlockHash,
    /// Receiving end of a confirmed send; `None` for every other subtype.
    pub link_as_account: Option<Address>,
    pub subtype: Option<Subtype>,
    pub block: StateBlock,
}

/// Everything the event bus hands to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    Confirmation(Confirmation),
    /// The push connection failed; carries the error text.
    ConnectionError(String),
}

#[derive(Deserialize)]
struct Envelope {
    topic: Option<String>,
    message: Option<ConfirmationBody>,
}

#[derive(Deserialize)]
struct ConfirmationBody {
    account: Address,
    hash: BlockHash,
    block: WireBlock,
}

#[derive(Deserialize)]
struct WireBlock {
    #[serde(flatten)]
    block: StateBlock,
    #[serde(default)]
    subtype: Option<Subtype>,
}

impl Confirmation {
    /// Parse one websocket frame.
    ///
    /// Returns `Ok(None)` for frames that are not confirmations (acks, keepalives).
    pub fn from_ws_json(text: &str) -> Result<Option<Self>, TypesError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| TypesError::MalformedMessage(e.to_string()))?;
        if envelope.topic.as_deref() != Some("confirmation") {
            return Ok(None);
        }
        let body = envelope
            .message
            .ok_or_else(|| TypesError::MalformedMessage("confirmation without message".into()))?;

        let WireBlock { block, subtype } = body.block;
        let link_as_account = match subtype {
            Some(Subtype::Send) => Some(block.link_as_account()),
            _ => None,
        };

        Ok(Some(Self {
            account: body.account,
            hash: body.hash,
            link_as_account,
            subtype,
            block,
        }))
    }

    /// Addresses whose balance this confirmation may have changed.
    pub fn affected(&self) -> impl Iterator<Item = Address> + '_ {
        std::iter::once(self.account).chain(self.link_as_account)
    }
}
