//! In-memory ledger shared by the integration tests.
//!
//! Blocks are accepted without signature or work checks, but the account
//! chain rules that matter to the wallet are enforced: frontiers, balance
//! arithmetic and receivable bookkeeping.

#![allow(dead_code)]

use async_trait::async_trait;
use nanowallet::config::WalletConfig;
use nanowallet::ledger::{AccountBalance, AccountInfo, BlockCount, BlockInfo, LedgerClient};
use nanowallet::vault::{KdfParams, KeyVault};
use nanowallet::wallet::{WalletCollection, WalletStore};
use nanowallet::{AppError, AppResult};
use nanowallet_types::{Address, BlockHash, StateBlock, Subtype};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const REPRESENTATIVE: &str =
    "nano_3t6k35gi95xu6tergt6p69ck76ogmitsa8mnijtpxm9fkcm736xtoncuohr3";

pub fn representative() -> Address {
    REPRESENTATIVE.parse().unwrap()
}

/// Argon2 parameters cheap enough for tests.
pub fn fast_vault() -> KeyVault {
    KeyVault::new(KdfParams {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    })
}

pub async fn open_collection(
    ledger: Arc<MockLedger>,
    dir: &tempfile::TempDir,
) -> WalletCollection {
    WalletCollection::open(
        WalletStore::new(dir.path().join("wallets.json")),
        fast_vault(),
        ledger,
        None,
        &WalletConfig::default(),
    )
    .await
    .unwrap()
}

#[derive(Clone)]
struct Stored {
    block: StateBlock,
    subtype: Subtype,
    height: u64,
    amount: u128,
}

#[derive(Default)]
struct Inner {
    blocks: HashMap<BlockHash, Stored>,
    chains: HashMap<Address, Vec<BlockHash>>,
    confirmed: HashMap<Address, u64>,
    receivable: HashMap<Address, Vec<BlockHash>>,
    withheld: HashSet<Address>,
    faucet_blocks: u64,
}

impl Inner {
    fn frontier(&self, account: &Address) -> Option<&Stored> {
        let hash = self.chains.get(account)?.last()?;
        self.blocks.get(hash)
    }

    fn balance(&self, account: &Address) -> u128 {
        self.frontier(account).map(|s| s.block.balance).unwrap_or(0)
    }

    fn pending(&self, account: &Address) -> u128 {
        self.receivable
            .get(account)
            .map(|sources| sources.iter().map(|h| self.blocks[h].amount).sum())
            .unwrap_or(0)
    }

    fn store(&mut self, hash: BlockHash, block: StateBlock, subtype: Subtype, amount: u128) {
        let account = block.account;
        let chain = self.chains.entry(account).or_default();
        chain.push(hash);
        let height = chain.len() as u64;
        self.blocks.insert(
            hash,
            Stored {
                block,
                subtype,
                height,
                amount,
            },
        );
        if !self.withheld.contains(&account) {
            self.confirmed.insert(account, height);
        }
    }
}

/// In-memory `LedgerClient` with call counters and fault injection.
#[derive(Default)]
pub struct MockLedger {
    inner: Mutex<Inner>,
    failing: AtomicBool,
    withhold_all: AtomicBool,
    balance_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    info_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every subsequent call fails with a network error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// New blocks on every account stay unconfirmed.
    pub fn withhold_confirmations(&self, withhold: bool) {
        self.withhold_all.store(withhold, Ordering::SeqCst);
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    /// Balance queries of either kind.
    pub fn query_calls(&self) -> usize {
        self.balance_calls() + self.batch_calls()
    }

    pub fn block_count_for(&self, account: &Address) -> usize {
        self.inner
            .lock()
            .unwrap()
            .chains
            .get(account)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Make `amount` receivable by `account` from a faucet account outside
    /// any wallet. Returns the send hash.
    pub fn fund(&self, account: &Address, amount: u128) -> BlockHash {
        let mut inner = self.inner.lock().unwrap();
        inner.faucet_blocks += 1;
        let mut faucet_key = [0xFFu8; 32];
        faucet_key[..8].copy_from_slice(&inner.faucet_blocks.to_be_bytes());
        let faucet = Address(faucet_key);

        let block = StateBlock {
            account: faucet,
            previous: BlockHash::ZERO,
            representative: representative(),
            balance: 0,
            link: BlockHash::from(*account),
            signature: None,
            work: None,
        };
        let hash = block.hash();
        inner.store(hash, block, Subtype::Send, amount);
        inner.receivable.entry(*account).or_default().push(hash);
        hash
    }

    /// Fund and immediately open or credit `account`, bypassing signing.
    pub fn credit(&self, account: &Address, amount: u128) -> BlockHash {
        let source = self.fund(account, amount);
        let mut inner = self.inner.lock().unwrap();
        let (previous, rep, balance, subtype) = match inner.frontier(account) {
            Some(s) => (
                inner.chains[account].last().copied().unwrap(),
                s.block.representative,
                s.block.balance + amount,
                Subtype::Receive,
            ),
            None => (BlockHash::ZERO, representative(), amount, Subtype::Open),
        };
        let block = StateBlock {
            account: *account,
            previous,
            representative: rep,
            balance,
            link: source,
            signature: None,
            work: None,
        };
        let hash = block.hash();
        if let Some(sources) = inner.receivable.get_mut(account) {
            sources.retain(|h| *h != source);
        }
        inner.store(hash, block, subtype, amount);
        hash
    }

    fn check(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::network("injected failure"));
        }
        Ok(())
    }

    fn balance_of(&self, account: &Address) -> AccountBalance {
        let inner = self.inner.lock().unwrap();
        AccountBalance {
            balance: inner.balance(account),
            receivable: inner.pending(account),
        }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_count(&self) -> AppResult<BlockCount> {
        self.check()?;
        let count = self.inner.lock().unwrap().blocks.len() as u64;
        Ok(BlockCount {
            count,
            unchecked: 0,
        })
    }

    async fn account_balance(&self, account: &Address) -> AppResult<AccountBalance> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.balance_of(account))
    }

    async fn accounts_balances(
        &self,
        accounts: &[Address],
    ) -> AppResult<HashMap<Address, AccountBalance>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(accounts.iter().map(|a| (*a, self.balance_of(a))).collect())
    }

    async fn account_representative(&self, account: &Address) -> AppResult<Address> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        inner
            .frontier(account)
            .map(|s| s.block.representative)
            .ok_or_else(|| AppError::rpc("Account not found"))
    }

    async fn account_info(&self, account: &Address) -> AppResult<Option<AccountInfo>> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let inner = self.inner.lock().unwrap();
        let Some(chain) = inner.chains.get(account) else {
            return Ok(None);
        };
        let frontier = inner.blocks[chain.last().unwrap()].clone();
        let confirmation_height = inner.confirmed.get(account).copied().unwrap_or(0);
        let confirmation_frontier = match confirmation_height {
            0 => BlockHash::ZERO,
            h => chain[h as usize - 1],
        };
        Ok(Some(AccountInfo {
            frontier: *chain.last().unwrap(),
            open_block: chain[0],
            representative: frontier.block.representative,
            balance: frontier.block.balance,
            block_count: chain.len() as u64,
            confirmation_height,
            confirmation_frontier,
        }))
    }

    async fn block_info(&self, hash: &BlockHash) -> AppResult<BlockInfo> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        let stored = inner
            .blocks
            .get(hash)
            .ok_or_else(|| AppError::rpc("Block not found"))?;
        let account = stored.block.account;
        Ok(BlockInfo {
            account,
            height: stored.height,
            subtype: Some(stored.subtype),
            amount: stored.amount,
            confirmed: stored.height <= inner.confirmed.get(&account).copied().unwrap_or(0),
            contents: stored.block.clone(),
        })
    }

    async fn successors(&self, hash: &BlockHash, count: u64) -> AppResult<Vec<BlockHash>> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        let stored = inner
            .blocks
            .get(hash)
            .ok_or_else(|| AppError::rpc("Block not found"))?;
        let chain = &inner.chains[&stored.block.account];
        let start = stored.height as usize - 1;
        Ok(chain.iter().skip(start).take(count as usize).copied().collect())
    }

    async fn receivable(&self, account: &Address, count: u64) -> AppResult<Vec<BlockHash>> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .receivable
            .get(account)
            .map(|sources| sources.iter().take(count as usize).copied().collect())
            .unwrap_or_default())
    }

    async fn work_generate(&self, root: &BlockHash) -> AppResult<u64> {
        self.check()?;
        let mut work = [0u8; 8];
        work.copy_from_slice(&root.as_bytes()[..8]);
        Ok(u64::from_be_bytes(work))
    }

    async fn process(&self, block: &StateBlock, subtype: Subtype) -> AppResult<BlockHash> {
        self.check()?;
        if block.signature.is_none() || block.work.is_none() {
            return Err(AppError::rpc("Block is not signed"));
        }

        let mut inner = self.inner.lock().unwrap();
        let account = block.account;
        let frontier = inner.chains.get(&account).and_then(|c| c.last()).copied();
        if block.previous != frontier.unwrap_or(BlockHash::ZERO) {
            return Err(AppError::rpc("Fork"));
        }
        let previous_balance = inner.balance(&account);

        let amount = match subtype {
            Subtype::Send => previous_balance
                .checked_sub(block.balance)
                .filter(|a| *a > 0)
                .ok_or_else(|| AppError::rpc("Invalid send balance"))?,
            Subtype::Receive | Subtype::Open => {
                let sources = inner.receivable.get(&account).cloned().unwrap_or_default();
                if !sources.contains(&block.link) {
                    return Err(AppError::rpc("Unreceivable"));
                }
                let amount = inner.blocks[&block.link].amount;
                if block.balance != previous_balance + amount {
                    return Err(AppError::rpc("Balance mismatch"));
                }
                amount
            }
            Subtype::Change | Subtype::Epoch => {
                if block.balance != previous_balance {
                    return Err(AppError::rpc("Balance mismatch"));
                }
                0
            }
        };

        let hash = block.hash();
        if self.withhold_all.load(Ordering::SeqCst) {
            inner.withheld.insert(account);
        } else {
            inner.withheld.remove(&account);
        }
        if subtype.is_receive() {
            if let Some(sources) = inner.receivable.get_mut(&account) {
                sources.retain(|h| *h != block.link);
            }
        }
        if subtype == Subtype::Send {
            inner
                .receivable
                .entry(block.link_as_account())
                .or_default()
                .push(hash);
        }
        inner.store(hash, block.clone(), subtype, amount);
        Ok(hash)
    }
}
