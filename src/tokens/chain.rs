use super::protocol::TokenOp;
use crate::error::{AppError, AppResult};
use crate::ledger::{BlockInfo, LedgerClient};
use crate::wallet::keys::derive_from_seed;
use crate::wallet::{AccountHandle, SeedSigner};
use nanowallet_types::{Address, BlockHash, Subtype};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use zeroize::Zeroizing;

/// Blocks requested per `successors` call while parsing.
const PARSE_BATCH: u64 = 500;

/// A fungible asset defined by a genesis operation on a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Hash of the chain block that incorporated the genesis.
    pub hash: BlockHash,
    pub chain: Address,
    pub name: String,
    pub decimals: u8,
    pub supply: u128,
    balances: HashMap<Address, u128>,
}

impl Token {
    pub(crate) fn new(
        hash: BlockHash,
        chain: Address,
        name: String,
        decimals: u8,
        supply: u128,
        balances: HashMap<Address, u128>,
    ) -> Self {
        Self {
            hash,
            chain,
            name,
            decimals,
            supply,
            balances,
        }
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &HashMap<Address, u128> {
        &self.balances
    }

    /// Move `amount` between holders. False, with nothing changed, when the
    /// sender holds too little.
    fn transfer(&mut self, from: &Address, to: &Address, amount: u128) -> bool {
        let held = self.balance(from);
        let Some(left) = held.checked_sub(amount) else {
            return false;
        };
        if from == to {
            return true;
        }
        let Some(received) = self.balance(to).checked_add(amount) else {
            return false;
        };
        if left == 0 {
            self.balances.remove(from);
        } else {
            self.balances.insert(*from, left);
        }
        self.balances.insert(*to, received);
        true
    }
}

/// The last chain block whose effects are applied. Height 0 means none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub height: u64,
    pub frontier: BlockHash,
}

/// A ledger account whose received sends carry token operations.
#[derive(Clone)]
pub struct TokenChain {
    address: Address,
    seed: Option<Zeroizing<[u8; 32]>>,
    cursor: Cursor,
    tokens: BTreeMap<BlockHash, Token>,
}

impl std::fmt::Debug for TokenChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenChain")
            .field("address", &self.address)
            .field("owned", &self.is_owned())
            .field("cursor", &self.cursor)
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl TokenChain {
    /// A chain this process can write to.
    pub fn owned(seed: [u8; 32]) -> Self {
        let address = derive_from_seed(&seed, 0).address();
        Self {
            address,
            seed: Some(Zeroizing::new(seed)),
            cursor: Cursor::default(),
            tokens: BTreeMap::new(),
        }
    }

    /// A read-only view of somebody else's chain.
    pub fn remote(address: Address) -> Self {
        Self {
            address,
            seed: None,
            cursor: Cursor::default(),
            tokens: BTreeMap::new(),
        }
    }

    pub(crate) fn restore(
        address: Address,
        seed: Option<[u8; 32]>,
        cursor: Cursor,
        tokens: BTreeMap<BlockHash, Token>,
    ) -> Self {
        Self {
            address,
            seed: seed.map(Zeroizing::new),
            cursor,
            tokens,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_owned(&self) -> bool {
        self.seed.is_some()
    }

    pub(crate) fn seed(&self) -> Option<&[u8; 32]> {
        self.seed.as_deref()
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn tokens(&self) -> &BTreeMap<BlockHash, Token> {
        &self.tokens
    }

    pub fn token(&self, hash: &BlockHash) -> Option<&Token> {
        self.tokens.get(hash)
    }

    /// Signing handle for the chain account; `None` for remote chains.
    pub(crate) fn handle(
        &self,
        ledger: Arc<dyn LedgerClient>,
        write_lock: Arc<Mutex<()>>,
        default_representative: Address,
    ) -> AppResult<Option<AccountHandle>> {
        let Some(seed) = self.seed.as_deref() else {
            return Ok(None);
        };
        let signer = SeedSigner::from_raw_seed(seed)?;
        Ok(Some(AccountHandle::new(
            self.address,
            0,
            Arc::new(signer),
            ledger,
            write_lock,
            default_representative,
        )))
    }

    /// Apply every confirmed block after the cursor. Returns how many
    /// blocks were consumed.
    ///
    /// The cursor only moves forward and each block is applied exactly
    /// once, so calling this again with nothing new is a no-op.
    pub async fn parse(&mut self, ledger: &dyn LedgerClient) -> AppResult<usize> {
        let Some(info) = ledger.account_info(&self.address).await? else {
            return Ok(0);
        };
        let confirmed = info.confirmation_height;
        let mut applied = 0;

        while self.cursor.height < confirmed {
            let (start, skip) = if self.cursor.height == 0 {
                (info.open_block, 0)
            } else {
                (self.cursor.frontier, 1)
            };
            let remaining = confirmed - self.cursor.height;
            let hashes = ledger
                .successors(&start, remaining.min(PARSE_BATCH) + skip as u64)
                .await?;

            let before = applied;
            for hash in hashes.into_iter().skip(skip) {
                let block = ledger.block_info(&hash).await?;
                if block.height != self.cursor.height + 1 {
                    return Err(AppError::chain_protocol(format!(
                        "chain {} skipped from height {} to {}",
                        self.address, self.cursor.height, block.height
                    )));
                }
                self.apply(ledger, &hash, &block).await?;
                self.cursor = Cursor {
                    height: block.height,
                    frontier: hash,
                };
                applied += 1;
                if self.cursor.height >= confirmed {
                    break;
                }
            }
            if applied == before {
                break;
            }
        }

        if applied > 0 {
            debug!(chain = %self.address, applied, height = self.cursor.height, "Parsed token chain");
        }
        Ok(applied)
    }

    async fn apply(
        &mut self,
        ledger: &dyn LedgerClient,
        hash: &BlockHash,
        block: &BlockInfo,
    ) -> AppResult<()> {
        if !block.subtype.is_some_and(|s| s.is_receive()) {
            return Ok(());
        }
        let send = ledger.block_info(&block.contents.link).await?;
        let Some(op) = TokenOp::decode(&send.contents.representative) else {
            return Ok(());
        };

        match op {
            TokenOp::Genesis {
                name,
                decimals,
                supply,
            } => {
                if self.tokens.contains_key(hash) {
                    return Ok(());
                }
                debug!(chain = %self.address, token = %hash, name = %name, supply, "Token genesis");
                let balances = HashMap::from([(send.account, supply)]);
                self.tokens.insert(
                    *hash,
                    Token::new(*hash, self.address, name, decimals, supply, balances),
                );
            }
            TokenOp::Transfer { amount } => {
                let Some((recipient, token_hash)) = transfer_target(ledger, &send).await? else {
                    trace!(chain = %self.address, block = %hash, "Transfer without target, ignored");
                    return Ok(());
                };
                let Some(token) = self.tokens.get_mut(&token_hash) else {
                    trace!(chain = %self.address, token = %token_hash, "Transfer of unknown token, ignored");
                    return Ok(());
                };
                if token.transfer(&send.account, &recipient, amount) {
                    debug!(token = %token_hash, from = %send.account, to = %recipient, amount, "Token transfer");
                } else {
                    debug!(token = %token_hash, from = %send.account, amount, "Transfer exceeds balance, ignored");
                }
            }
        }
        Ok(())
    }
}

/// A transfer send is preceded on the sender's account by two
/// representative changes: first to the token hash, then to the recipient.
async fn transfer_target(
    ledger: &dyn LedgerClient,
    send: &BlockInfo,
) -> AppResult<Option<(Address, BlockHash)>> {
    let first = send.contents.previous;
    if first.is_zero() {
        return Ok(None);
    }
    let recipient_block = ledger.block_info(&first).await?;
    let second = recipient_block.contents.previous;
    if recipient_block.subtype != Some(Subtype::Change) || second.is_zero() {
        return Ok(None);
    }
    let token_block = ledger.block_info(&second).await?;
    if token_block.subtype != Some(Subtype::Change) {
        return Ok(None);
    }
    Ok(Some((
        recipient_block.contents.representative,
        BlockHash::from(token_block.contents.representative),
    )))
}
