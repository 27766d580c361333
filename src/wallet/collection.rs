use super::directory::AccountDirectory;
use super::record::{OriginKind, WalletRecord};
use super::signer::{parse_seed_hex, DeviceConnector, SeedSigner};
use super::store::WalletStore;
use crate::config::WalletConfig;
use crate::error::{AppError, AppResult};
use crate::ledger::LedgerClient;
use crate::vault::{self, KeyVault};
use bip39::Mnemonic;
use nanowallet_types::Address;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Every wallet the user has, in display order, persisted after each change.
pub struct WalletCollection {
    store: WalletStore,
    vault: KeyVault,
    ledger: Arc<dyn LedgerClient>,
    device: Option<Arc<dyn DeviceConnector>>,
    default_representative: Address,
    entropy_bytes: usize,
    wallets: RwLock<Vec<Arc<AccountDirectory>>>,
}

impl std::fmt::Debug for WalletCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletCollection")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl WalletCollection {
    /// Load persisted records into locked directories.
    pub async fn open(
        store: WalletStore,
        vault: KeyVault,
        ledger: Arc<dyn LedgerClient>,
        device: Option<Arc<dyn DeviceConnector>>,
        config: &WalletConfig,
    ) -> AppResult<Self> {
        let default_representative: Address = config.default_representative.parse()?;
        let entropy_bytes = match config.bip39_entropy_bits {
            bits @ (128 | 160 | 192 | 224 | 256) => bits / 8,
            other => {
                return Err(AppError::InvalidMnemonic(format!(
                    "unsupported entropy size: {} bits",
                    other
                )))
            }
        };

        let records = store.load().await?;
        info!(wallets = records.len(), path = %store.path().display(), "Loaded wallets");

        let wallets = records
            .into_iter()
            .map(|record| {
                Arc::new(AccountDirectory::new(
                    record,
                    vault,
                    ledger.clone(),
                    device.clone(),
                    default_representative,
                ))
            })
            .collect();

        Ok(Self {
            store,
            vault,
            ledger,
            device,
            default_representative,
            entropy_bytes,
            wallets: RwLock::new(wallets),
        })
    }

    pub async fn wallets(&self) -> Vec<Arc<AccountDirectory>> {
        self.wallets.read().await.clone()
    }

    pub async fn get(&self, id: Uuid) -> AppResult<Arc<AccountDirectory>> {
        for wallet in self.wallets.read().await.iter() {
            if wallet.id().await == id {
                return Ok(wallet.clone());
            }
        }
        Err(AppError::WalletNotFound(id.to_string()))
    }

    pub async fn records(&self) -> Vec<WalletRecord> {
        let wallets = self.wallets().await;
        let mut records = Vec::with_capacity(wallets.len());
        for wallet in wallets {
            records.push(wallet.record().await);
        }
        records
    }

    pub async fn save(&self) -> AppResult<()> {
        let records = self.records().await;
        self.store.save(&records).await
    }

    /// New raw-seed wallet from `seed_hex`, or from 32 random bytes.
    pub async fn create_seed_wallet(
        &self,
        label: &str,
        seed_hex: Option<&str>,
        password: &str,
    ) -> AppResult<Arc<AccountDirectory>> {
        let seed = match seed_hex {
            Some(text) => parse_seed_hex(text)?,
            None => {
                let mut seed = Zeroizing::new(vec![0u8; 32]);
                OsRng.fill_bytes(&mut seed);
                seed
            }
        };
        let signer = Arc::new(SeedSigner::from_raw_seed(&seed)?);
        let record = self
            .sealed_record(label, OriginKind::RawSeed, &seed, password)
            .await?;
        self.insert(record, signer).await
    }

    /// New mnemonic wallet. Returns the phrase so the user can back it up.
    pub async fn create_mnemonic_wallet(
        &self,
        label: &str,
        phrase: Option<&str>,
        password: &str,
    ) -> AppResult<(Arc<AccountDirectory>, Zeroizing<String>)> {
        let mnemonic = match phrase {
            Some(text) => Mnemonic::parse(text).map_err(|e| AppError::InvalidMnemonic(e.to_string()))?,
            None => {
                let mut entropy = Zeroizing::new(vec![0u8; self.entropy_bytes]);
                OsRng.fill_bytes(&mut entropy);
                Mnemonic::from_entropy(&entropy).map_err(|e| AppError::InvalidMnemonic(e.to_string()))?
            }
        };
        let phrase = Zeroizing::new(mnemonic.to_string());

        let signer = Arc::new(SeedSigner::from_mnemonic(&phrase, password)?);
        let record = self
            .sealed_record(label, OriginKind::Mnemonic, phrase.as_bytes(), password)
            .await?;
        let wallet = self.insert(record, signer).await?;
        Ok((wallet, phrase))
    }

    /// New hardware wallet. The device is contacted on unlock.
    pub async fn create_hardware_wallet(&self, label: &str) -> AppResult<Arc<AccountDirectory>> {
        let wallet = Arc::new(self.directory(WalletRecord::new(label, OriginKind::Hardware)));
        wallet.unlock("").await?;
        self.push(wallet.clone()).await?;
        Ok(wallet)
    }

    pub async fn rename(&self, id: Uuid, label: &str) -> AppResult<()> {
        self.get(id).await?.set_label(label).await;
        self.save().await
    }

    /// Forget a wallet. Only its seed or phrase can bring it back.
    pub async fn remove(&self, id: Uuid) -> AppResult<()> {
        let wallet = self.get(id).await?;
        self.wallets.write().await.retain(|w| !Arc::ptr_eq(w, &wallet));
        info!(wallet = %id, "Removed wallet");
        self.save().await
    }

    async fn sealed_record(
        &self,
        label: &str,
        kind: OriginKind,
        secret: &[u8],
        password: &str,
    ) -> AppResult<WalletRecord> {
        let (key, salt) = self.vault.derive_key_blocking(password, None).await?;
        let blob = vault::encrypt(secret, &key)?;
        let mut record = WalletRecord::new(label, kind);
        record.seed = hex::encode(blob);
        record.salt = hex::encode(salt);
        Ok(record)
    }

    fn directory(&self, record: WalletRecord) -> AccountDirectory {
        AccountDirectory::new(
            record,
            self.vault,
            self.ledger.clone(),
            self.device.clone(),
            self.default_representative,
        )
    }

    async fn insert(
        &self,
        record: WalletRecord,
        signer: Arc<SeedSigner>,
    ) -> AppResult<Arc<AccountDirectory>> {
        let wallet = Arc::new(self.directory(record));
        wallet.install_signer(signer).await?;
        self.push(wallet.clone()).await?;
        Ok(wallet)
    }

    async fn push(&self, wallet: Arc<AccountDirectory>) -> AppResult<()> {
        info!(wallet = %wallet.id().await, kind = ?wallet.kind().await, "Created wallet");
        self.wallets.write().await.push(wallet);
        self.save().await
    }
}
