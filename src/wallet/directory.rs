use super::account::AccountHandle;
use super::record::{AccountEntry, OriginKind, WalletRecord};
use super::signer::{DeviceConnector, SeedSigner, Signer};
use crate::error::{AppError, AppResult};
use crate::ledger::{AccountBalance, LedgerClient};
use crate::vault::{self, KeyVault};
use dashmap::{DashMap, DashSet};
use nanowallet_types::Address;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// One derived account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub index: u32,
    pub address: Address,
}

/// One wallet's signing capability and its accounts.
///
/// The account list is kept sorted by derivation index. Balances live in
/// a separate map that a full refresh replaces under one write lock, so
/// readers never see a half-applied refresh. An address missing from that
/// map has an unknown balance, which is not the same as zero.
pub struct AccountDirectory {
    record: RwLock<WalletRecord>,
    vault: KeyVault,
    ledger: Arc<dyn LedgerClient>,
    device: Option<Arc<dyn DeviceConnector>>,
    default_representative: Address,
    signer: RwLock<Option<Arc<dyn Signer>>>,
    accounts: RwLock<Vec<Account>>,
    // Mirrors `accounts` for lookups that cannot await.
    members: DashSet<Address>,
    balances: RwLock<HashMap<Address, AccountBalance>>,
    write_locks: DashMap<Address, Arc<Mutex<()>>>,
    next_index: AtomicU32,
    refreshing: AtomicBool,
}

impl std::fmt::Debug for AccountDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountDirectory")
            .field("next_index", &self.next_index.load(Ordering::Relaxed))
            .field("refreshing", &self.refreshing.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight flag when a refresh ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AccountDirectory {
    pub fn new(
        record: WalletRecord,
        vault: KeyVault,
        ledger: Arc<dyn LedgerClient>,
        device: Option<Arc<dyn DeviceConnector>>,
        default_representative: Address,
    ) -> Self {
        let mut accounts: Vec<Account> = record
            .accounts
            .iter()
            .map(|(address, entry)| Account {
                index: entry.index,
                address: *address,
            })
            .collect();
        accounts.sort_by_key(|a| a.index);
        let next_index = accounts.last().map(|a| a.index + 1).unwrap_or(0);
        let members = accounts.iter().map(|a| a.address).collect();

        Self {
            record: RwLock::new(record),
            vault,
            ledger,
            device,
            default_representative,
            signer: RwLock::new(None),
            accounts: RwLock::new(accounts),
            members,
            balances: RwLock::new(HashMap::new()),
            write_locks: DashMap::new(),
            next_index: AtomicU32::new(next_index),
            refreshing: AtomicBool::new(false),
        }
    }

    pub async fn id(&self) -> Uuid {
        self.record.read().await.id
    }

    pub async fn label(&self) -> String {
        self.record.read().await.label.clone()
    }

    pub async fn kind(&self) -> OriginKind {
        self.record.read().await.kind
    }

    pub(crate) async fn set_label(&self, label: &str) {
        self.record.write().await.label = label.to_string();
    }

    /// Snapshot for persistence, with the current account set.
    pub async fn record(&self) -> WalletRecord {
        let mut record = self.record.read().await.clone();
        record.accounts = self
            .accounts
            .read()
            .await
            .iter()
            .map(|a| (a.address, AccountEntry { index: a.index }))
            .collect();
        record
    }

    pub async fn is_unlocked(&self) -> bool {
        self.signer.read().await.is_some()
    }

    /// Drop the signing capability.
    pub async fn lock(&self) {
        *self.signer.write().await = None;
    }

    /// Obtain a signer: from the device for hardware wallets, otherwise by
    /// decrypting the stored seed with `password`. Every recorded account is
    /// then re-derived and checked against its stored address.
    pub async fn unlock(&self, password: &str) -> AppResult<()> {
        let (kind, seed_hex, salt_hex) = {
            let record = self.record.read().await;
            (record.kind, record.seed.clone(), record.salt.clone())
        };

        let signer: Arc<dyn Signer> = match kind {
            OriginKind::Hardware => {
                let device = self
                    .device
                    .as_ref()
                    .ok_or_else(|| AppError::DeviceUnavailable("no device connector".into()))?;
                device.connect().await.map_err(|e| match e {
                    AppError::DeviceUnavailable(_) => e,
                    other => AppError::DeviceUnavailable(other.to_string()),
                })?
            }
            OriginKind::RawSeed | OriginKind::Mnemonic => {
                let salt = hex::decode(&salt_hex).map_err(|e| AppError::Vault(e.to_string()))?;
                let blob = hex::decode(&seed_hex).map_err(|e| AppError::Vault(e.to_string()))?;
                let (key, _) = self.vault.derive_key_blocking(password, Some(salt)).await?;
                let seed = vault::decrypt(&blob, &key)?;
                if kind == OriginKind::RawSeed {
                    Arc::new(SeedSigner::from_raw_seed(&seed)?)
                } else {
                    let phrase = std::str::from_utf8(&seed)
                        .map_err(|_| AppError::InvalidMnemonic("stored phrase is not UTF-8".into()))?;
                    Arc::new(SeedSigner::from_mnemonic(phrase, password)?)
                }
            }
        };

        self.install_signer(signer).await
    }

    /// Verify recorded accounts against `signer` and make it current.
    pub(crate) async fn install_signer(&self, signer: Arc<dyn Signer>) -> AppResult<()> {
        let accounts = self.accounts.read().await.clone();
        for account in &accounts {
            check_address(signer.as_ref(), account).await?;
        }
        *self.signer.write().await = Some(signer);
        info!(accounts = accounts.len(), "Wallet unlocked");
        Ok(())
    }

    async fn signer(&self) -> AppResult<Arc<dyn Signer>> {
        self.signer.read().await.clone().ok_or(AppError::WalletLocked)
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.accounts.read().await.clone()
    }

    pub async fn addresses(&self) -> Vec<Address> {
        self.accounts.read().await.iter().map(|a| a.address).collect()
    }

    pub async fn contains(&self, address: &Address) -> bool {
        self.accounts.read().await.iter().any(|a| a.address == *address)
    }

    /// Non-blocking membership check.
    pub fn holds(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    /// Position of `account` in the index-ordered list.
    pub async fn index_of(&self, account: &Account) -> Option<usize> {
        let accounts = self.accounts.read().await;
        accounts
            .binary_search_by_key(&account.index, |a| a.index)
            .ok()
            .filter(|&pos| accounts[pos].address == account.address)
    }

    /// `None` until the first successful fetch.
    pub async fn balance(&self, address: &Address) -> Option<AccountBalance> {
        self.balances.read().await.get(address).copied()
    }

    pub async fn balances(&self) -> HashMap<Address, AccountBalance> {
        self.balances.read().await.clone()
    }

    /// Append every account up to the first never-used index.
    ///
    /// An index counts as used if its account is open on the ledger or has
    /// something waiting to be received. Returns the newly added accounts.
    pub async fn scan_accounts(&self) -> AppResult<Vec<Account>> {
        let signer = self.signer().await?;
        let mut added = Vec::new();

        for index in 0.. {
            let address = signer.address(index).await?;
            let used = self.ledger.account_info(&address).await?.is_some()
                || !self.ledger.receivable(&address, 1).await?.is_empty();
            if !used {
                break;
            }
            if self.insert(Account { index, address }).await {
                added.push(Account { index, address });
            }
        }

        if !added.is_empty() {
            info!(added = added.len(), "Discovered accounts");
            let addresses: Vec<Address> = added.iter().map(|a| a.address).collect();
            if let Err(e) = self.fetch_into_cache(&addresses).await {
                warn!(error = %e, "Balance fetch after scan failed");
            }
        }
        Ok(added)
    }

    /// Derive the next unused index, insert it in order and fetch its balance.
    ///
    /// A failed balance fetch leaves the account added with an unknown balance.
    pub async fn add_account(&self) -> AppResult<Account> {
        let signer = self.signer().await?;

        let account = loop {
            let index = self.next_index.fetch_add(1, Ordering::SeqCst);
            let address = signer.address(index).await?;
            let account = Account { index, address };
            if self.insert(account).await {
                break account;
            }
            debug!(index, address = %address, "Address already present, skipping index");
        };

        if let Err(e) = self.refresh_account(&account.address).await {
            warn!(address = %account.address, error = %e, "Initial balance fetch failed");
        }
        info!(index = account.index, address = %account.address, "Added account");
        Ok(account)
    }

    /// Insert keeping index order. False if the index or address is taken.
    async fn insert(&self, account: Account) -> bool {
        let mut accounts = self.accounts.write().await;
        if accounts.iter().any(|a| a.address == account.address) {
            return false;
        }
        match accounts.binary_search_by_key(&account.index, |a| a.index) {
            Ok(_) => false,
            Err(pos) => {
                accounts.insert(pos, account);
                self.members.insert(account.address);
                if account.index >= self.next_index.load(Ordering::SeqCst) {
                    self.next_index.store(account.index + 1, Ordering::SeqCst);
                }
                true
            }
        }
    }

    /// Hide an account locally. The ledger is not touched.
    pub async fn remove_account(&self, address: &Address) -> AppResult<Account> {
        let removed = {
            let mut accounts = self.accounts.write().await;
            let pos = accounts
                .iter()
                .position(|a| a.address == *address)
                .ok_or_else(|| AppError::InvalidAddress(format!("{} is not in this wallet", address)))?;
            self.members.remove(address);
            accounts.remove(pos)
        };
        self.balances.write().await.remove(address);
        self.write_locks.remove(address);
        info!(index = removed.index, address = %address, "Removed account");
        Ok(removed)
    }

    /// One batched query for every account; all-or-nothing.
    ///
    /// A call made while another is in flight returns at once without
    /// touching the network.
    pub async fn refresh_balances(&self) -> AppResult<()> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Balance refresh already in flight, coalescing");
            return Ok(());
        }
        let _guard = RefreshGuard(&self.refreshing);

        let addresses = self.addresses().await;
        if addresses.is_empty() {
            return Ok(());
        }
        self.fetch_into_cache(&addresses).await
    }

    async fn fetch_into_cache(&self, addresses: &[Address]) -> AppResult<()> {
        let fetched = self.ledger.accounts_balances(addresses).await?;

        let current = self.addresses().await;
        let mut balances = self.balances.write().await;
        for (address, balance) in fetched {
            if current.contains(&address) {
                balances.insert(address, balance);
            }
        }
        balances.retain(|address, _| current.contains(address));
        Ok(())
    }

    /// Single-address refresh. No-op for addresses outside this wallet.
    pub async fn refresh_account(&self, address: &Address) -> AppResult<()> {
        if !self.contains(address).await {
            return Ok(());
        }
        let balance = self.ledger.account_balance(address).await?;
        if self.contains(address).await {
            self.balances.write().await.insert(*address, balance);
        }
        Ok(())
    }

    /// A signing handle for `address`, after re-deriving it from the signer.
    pub async fn account(&self, address: &Address) -> AppResult<AccountHandle> {
        let account = self
            .accounts
            .read()
            .await
            .iter()
            .find(|a| a.address == *address)
            .copied()
            .ok_or_else(|| AppError::InvalidAddress(format!("{} is not in this wallet", address)))?;
        let signer = self.signer().await?;
        check_address(signer.as_ref(), &account).await?;

        let write_lock = self
            .write_locks
            .entry(account.address)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        Ok(AccountHandle::new(
            account.address,
            account.index,
            signer,
            self.ledger.clone(),
            write_lock,
            self.default_representative,
        ))
    }
}

async fn check_address(signer: &dyn Signer, account: &Account) -> AppResult<()> {
    let derived = signer.address(account.index).await?;
    if derived != account.address {
        error!(
            index = account.index,
            expected = %account.address,
            derived = %derived,
            "Derived address does not match recorded address"
        );
        return Err(AppError::AddressMismatch {
            expected: account.address,
            derived,
        });
    }
    Ok(())
}
