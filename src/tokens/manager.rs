use super::chain::{Token, TokenChain};
use super::protocol::{validate_name, TokenOp, MAX_DECIMALS};
use super::store::TokenStore;
use crate::config::TokensConfig;
use crate::error::{AppError, AppResult};
use crate::events::{EventBus, SubscriptionKey};
use crate::ledger::LedgerClient;
use crate::wallet::AccountHandle;
use dashmap::{DashMap, DashSet};
use nanowallet_types::{Address, BlockHash, PushMessage};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

/// Raw amount carried by every send into a chain.
const CHAIN_SEND_RAW: u128 = 1;

#[derive(Default)]
struct State {
    chains: HashMap<Address, TokenChain>,
    token_chains: HashMap<BlockHash, Address>,
    tracked: BTreeSet<BlockHash>,
}

impl State {
    fn insert_chain(&mut self, chain: TokenChain) {
        for hash in chain.tokens().keys() {
            self.token_chains.insert(*hash, chain.address());
        }
        self.chains.insert(chain.address(), chain);
    }

    fn token(&self, hash: &BlockHash) -> Option<&Token> {
        let chain = self.token_chains.get(hash)?;
        self.chains.get(chain)?.token(hash)
    }
}

fn lock_for(locks: &DashMap<Address, Arc<Mutex<()>>>, address: &Address) -> Arc<Mutex<()>> {
    locks
        .entry(*address)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Cache of token chains, and the protocol for writing to them.
///
/// Chains are loaded lazily, parsed outside the cache lock and committed
/// back only if nobody advanced them in the meantime.
pub struct TokenChainManager {
    ledger: Arc<dyn LedgerClient>,
    store: TokenStore,
    state: RwLock<State>,
    /// Serializes loading and parsing of one chain.
    chain_locks: DashMap<Address, Arc<Mutex<()>>>,
    /// Block production on chain accounts.
    write_locks: DashMap<Address, Arc<Mutex<()>>>,
    /// Serializes token operations issued by one signing account.
    operation_locks: DashMap<Address, Arc<Mutex<()>>>,
    /// Chain addresses a confirmation can wake the parser for.
    watched: DashSet<Address>,
    wake: Notify,
    default_representative: Address,
    parse_interval: Duration,
    open_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for TokenChainManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenChainManager")
            .field("watched", &self.watched.len())
            .field("parse_interval", &self.parse_interval)
            .finish_non_exhaustive()
    }
}

impl TokenChainManager {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        store: TokenStore,
        config: &TokensConfig,
        default_representative: Address,
    ) -> Self {
        Self {
            ledger,
            store,
            state: RwLock::new(State::default()),
            chain_locks: DashMap::new(),
            write_locks: DashMap::new(),
            operation_locks: DashMap::new(),
            watched: DashSet::new(),
            wake: Notify::new(),
            default_representative,
            parse_interval: Duration::from_secs(config.parse_interval_secs),
            open_timeout: Duration::from_secs(config.open_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn with_open_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.open_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_parse_interval(mut self, interval: Duration) -> Self {
        self.parse_interval = interval;
        self
    }

    /// Rehydrate the cache from the store. Returns the number of chains.
    pub async fn load(&self) -> AppResult<usize> {
        let chains = self.store.load_chains().await?;
        let tracked = self.store.tracked_tokens().await?;

        let mut state = self.state.write().await;
        let count = chains.len();
        for chain in chains {
            self.watched.insert(chain.address());
            state.insert_chain(chain);
        }
        state.tracked.extend(tracked);
        info!(chains = count, tracked = state.tracked.len(), "Token cache loaded");
        Ok(count)
    }

    /// Tokens the user created or added, in hash order.
    pub async fn tokens(&self) -> Vec<Token> {
        let state = self.state.read().await;
        state
            .tracked
            .iter()
            .filter_map(|hash| state.token(hash).cloned())
            .collect()
    }

    /// Cached token, without touching the network.
    pub async fn token(&self, hash: &BlockHash) -> Option<Token> {
        self.state.read().await.token(hash).cloned()
    }

    pub async fn balance(&self, token: &BlockHash, address: &Address) -> AppResult<u128> {
        Ok(self.fetch_token(token).await?.balance(address))
    }

    pub async fn chains(&self) -> Vec<Address> {
        let mut chains: Vec<_> = self.state.read().await.chains.keys().copied().collect();
        chains.sort();
        chains
    }

    /// Cached chain, or a read-only copy loaded and parsed from the ledger.
    pub async fn fetch_chain(&self, address: &Address) -> AppResult<TokenChain> {
        if let Some(chain) = self.state.read().await.chains.get(address) {
            return Ok(chain.clone());
        }

        let lock = lock_for(&self.chain_locks, address);
        let _guard = lock.lock().await;
        if let Some(chain) = self.state.read().await.chains.get(address) {
            return Ok(chain.clone());
        }

        let mut chain = TokenChain::remote(*address);
        chain.parse(self.ledger.as_ref()).await?;
        self.store.save_chain(&chain).await?;
        info!(chain = %address, tokens = chain.tokens().len(), "Fetched token chain");

        self.watched.insert(*address);
        self.state.write().await.insert_chain(chain.clone());
        Ok(chain)
    }

    /// Cached token, or resolved through the chain that defines it.
    pub async fn fetch_token(&self, hash: &BlockHash) -> AppResult<Token> {
        if let Some(token) = self.token(hash).await {
            return Ok(token);
        }

        let block = self.ledger.block_info(hash).await.map_err(|e| match e {
            AppError::Rpc(_) => AppError::TokenNotFound(hash.to_string()),
            other => other,
        })?;
        let chain = self.fetch_chain(&block.account).await?;
        if let Some(token) = chain.token(hash) {
            return Ok(token.clone());
        }

        // The chain was cached before this token was parsed.
        self.refresh_chain(&block.account).await?;
        self.token(hash)
            .await
            .ok_or_else(|| AppError::TokenNotFound(hash.to_string()))
    }

    /// Fetch a token and remember it in the user's token list.
    pub async fn add_token(&self, hash: &BlockHash) -> AppResult<Token> {
        let token = self.fetch_token(hash).await?;
        self.track(hash).await?;
        Ok(token)
    }

    async fn track(&self, hash: &BlockHash) -> AppResult<()> {
        self.store.track_token(hash).await?;
        self.state.write().await.tracked.insert(*hash);
        Ok(())
    }

    /// Issue a new token owned by `account` on a fresh chain.
    ///
    /// The chain is opened and confirmed first, so the genesis send cannot
    /// race another writer. A chain that never confirms its open within the
    /// configured timeout fails with `ChainProtocol` and is not cached.
    pub async fn create_token(
        &self,
        account: &AccountHandle,
        name: &str,
        supply: u128,
        decimals: u8,
    ) -> AppResult<Token> {
        validate_name(name)?;
        if decimals > MAX_DECIMALS {
            return Err(AppError::invalid_amount(format!(
                "at most {} decimals",
                MAX_DECIMALS
            )));
        }
        if supply == 0 {
            return Err(AppError::invalid_amount("supply must be positive"));
        }

        let operation = lock_for(&self.operation_locks, &account.address());
        let _operation = operation.lock().await;

        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let chain = TokenChain::owned(seed);
        seed.zeroize();
        let chain_address = chain.address();
        let handle = chain
            .handle(
                self.ledger.clone(),
                lock_for(&self.write_locks, &chain_address),
                self.default_representative,
            )?
            .ok_or_else(|| AppError::internal("new chain has no seed"))?;
        info!(account = %account.address(), chain = %chain_address, name, "Creating token chain");

        let funding = account.send(&chain_address, CHAIN_SEND_RAW).await?;
        handle.receive(&funding).await?;
        self.wait_for_confirmed(&chain_address, 1).await?;

        // From here on the chain exists; keep it even if genesis fails.
        self.store.save_chain(&chain).await?;
        self.watched.insert(chain_address);
        self.state.write().await.insert_chain(chain);

        let header = TokenOp::Genesis {
            name: name.to_string(),
            decimals,
            supply,
        }
        .encode();
        let genesis = bracketed(account, || {
            account.send_with_representative(&chain_address, CHAIN_SEND_RAW, Some(header))
        })
        .await?;

        let token_hash = handle.receive(&genesis).await?;
        let height = self.ledger.block_info(&token_hash).await?.height;
        self.wait_for_confirmed(&chain_address, height).await?;
        self.refresh_chain(&chain_address).await?;

        let token = self.token(&token_hash).await.ok_or_else(|| {
            AppError::chain_protocol(format!("genesis not found on chain {}", chain_address))
        })?;
        self.track(&token.hash).await?;
        info!(token = %token.hash, chain = %chain_address, name, supply, "Token created");
        Ok(token)
    }

    /// Move `amount` of `token` from `account` to `recipient`. Returns the
    /// hash of the send that carries the transfer.
    ///
    /// Balances change once the chain incorporates and confirms the send.
    pub async fn transfer_token(
        &self,
        token: &BlockHash,
        account: &AccountHandle,
        recipient: &Address,
        amount: u128,
    ) -> AppResult<BlockHash> {
        if amount == 0 {
            return Err(AppError::invalid_amount("transfer amount must be positive"));
        }
        let known = self.fetch_token(token).await?;

        let operation = lock_for(&self.operation_locks, &account.address());
        let _operation = operation.lock().await;

        if known.balance(&account.address()) < amount {
            return Err(AppError::InsufficientBalance);
        }

        let chain = known.chain;
        let header = TokenOp::Transfer { amount }.encode();
        let hash = bracketed(account, || async {
            account.change_representative(&token.as_address()).await?;
            account.change_representative(recipient).await?;
            account
                .send_with_representative(&chain, CHAIN_SEND_RAW, Some(header))
                .await
        })
        .await?;
        info!(token = %token, from = %account.address(), to = %recipient, amount, hash = %hash, "Token transfer sent");

        if let Err(e) = self.refresh_chain(&chain).await {
            debug!(chain = %chain, error = %e, "Chain refresh after transfer failed");
        }
        self.wake.notify_one();
        Ok(hash)
    }

    /// Pocket pending sends on an owned chain, then parse it forward.
    pub async fn refresh_chain(&self, address: &Address) -> AppResult<usize> {
        if !self.state.read().await.chains.contains_key(address) {
            self.fetch_chain(address).await?;
            return Ok(0);
        }

        let lock = lock_for(&self.chain_locks, address);
        let _guard = lock.lock().await;

        let Some(mut chain) = self.state.read().await.chains.get(address).cloned() else {
            return Ok(0);
        };
        let before = chain.cursor();

        let write_lock = lock_for(&self.write_locks, address);
        if let Some(handle) =
            chain.handle(self.ledger.clone(), write_lock, self.default_representative)?
        {
            let pocketed = handle.receive_pending().await?;
            if !pocketed.is_empty() {
                debug!(chain = %address, count = pocketed.len(), "Pocketed chain sends");
            }
        }

        let applied = chain.parse(self.ledger.as_ref()).await?;
        if applied == 0 {
            return Ok(0);
        }

        {
            let mut state = self.state.write().await;
            match state.chains.get(address) {
                Some(current) if current.cursor() == before => state.insert_chain(chain.clone()),
                _ => {
                    debug!(chain = %address, "Chain advanced concurrently, discarding parse");
                    return Ok(0);
                }
            }
        }
        self.store.save_chain(&chain).await?;
        Ok(applied)
    }

    /// Re-parse every cached chain. Failures are logged per chain.
    pub async fn parse_all(&self) -> usize {
        let mut applied = 0;
        for address in self.chains().await {
            match self.refresh_chain(&address).await {
                Ok(count) => applied += count,
                Err(e) => {
                    warn!(chain = %address, error = %e, transient = e.is_transient(), "Chain parse failed")
                }
            }
        }
        applied
    }

    /// Ask the background parser for an early pass.
    pub fn nudge(&self) {
        self.wake.notify_one();
    }

    /// Wake the parser for confirmations that touch a cached chain.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> SubscriptionKey {
        let manager = self.clone();
        bus.subscribe(move |message| {
            if let PushMessage::Confirmation(confirmation) = message {
                if confirmation.affected().any(|a| manager.watched.contains(&a)) {
                    manager.wake.notify_one();
                }
            }
        })
    }

    /// Parse every interval, or sooner when nudged.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.parse_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = manager.wake.notified() => {}
                }
                let applied = manager.parse_all().await;
                if applied > 0 {
                    debug!(applied, "Token chains advanced");
                }
            }
        })
    }

    /// Poll until `address` has confirmed at least `height` blocks.
    async fn wait_for_confirmed(&self, address: &Address, height: u64) -> AppResult<()> {
        let poll = async {
            loop {
                if let Some(info) = self.ledger.account_info(address).await? {
                    if info.confirmation_height >= height {
                        return Ok::<_, AppError>(());
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        match tokio::time::timeout(self.open_timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(AppError::chain_protocol(format!(
                "chain {} did not confirm height {} within {:?}",
                address, height, self.open_timeout
            ))),
        }
    }
}

/// Run `operation` between reading `account`'s representative and putting
/// it back. The restore is attempted even when the operation fails; the
/// first error wins.
async fn bracketed<F, Fut>(account: &AccountHandle, operation: F) -> AppResult<BlockHash>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<BlockHash>>,
{
    let original = account.representative().await?;
    let outcome = operation().await;
    let restored = account.change_representative(&original).await;
    match (outcome, restored) {
        (Ok(hash), Ok(_)) => Ok(hash),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), restored) => {
            if let Err(restore_error) = restored {
                warn!(account = %account.address(), error = %restore_error, "Representative not restored");
            }
            Err(e)
        }
    }
}
