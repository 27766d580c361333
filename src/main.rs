use nanowallet::{
    config::AppConfig,
    events::WsConnector,
    tokens::TokenStore,
    wallet::WalletStore,
    AppError, BalanceSynchronizer, EventBus, KeyVault, LedgerClient, RpcClient, TokenChainManager,
    WalletCollection,
};
use nanowallet_types::Address;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nanowallet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    info!("Starting NanoWallet v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::init()?;
    info!("Configuration loaded");

    tokio::fs::create_dir_all(&config.storage.data_dir).await?;

    let ledger: Arc<dyn LedgerClient> = Arc::new(RpcClient::connect(&config.ledger).await?);

    let wallets = WalletCollection::open(
        WalletStore::new(config.storage.wallets_path()),
        KeyVault::default(),
        ledger.clone(),
        None,
        &config.wallet,
    )
    .await?;

    let store = TokenStore::open(&config.storage.token_db_path()).await?;
    let default_representative: Address = config.wallet.default_representative.parse()?;
    let tokens = Arc::new(TokenChainManager::new(
        ledger.clone(),
        store,
        &config.tokens,
        default_representative,
    ));
    tokens.load().await?;

    let bus = Arc::new(EventBus::new(&config.events, Arc::new(WsConnector)));
    let sync = Arc::new(BalanceSynchronizer::new(&config.sync));
    sync.attach(&bus);
    tokens.attach(&bus);

    // Wallets without a password open unattended; the rest wait for a user.
    for wallet in wallets.wallets().await {
        let label = wallet.label().await;
        match wallet.unlock("").await {
            Ok(()) => {
                match wallet.scan_accounts().await {
                    Ok(found) => info!(wallet = %label, discovered = found.len(), "Wallet opened"),
                    Err(e) => warn!(wallet = %label, error = %e, "Account scan failed"),
                }
                sync.open(wallet).await;
            }
            Err(AppError::WrongPassword) => info!(wallet = %label, "Wallet is password protected"),
            Err(e) => warn!(wallet = %label, error = %e, "Failed to open wallet"),
        }
    }
    wallets.save().await?;

    let bus_handle = bus.spawn();
    let sync_handles = sync.spawn();
    let tokens_handle = tokens.spawn();
    info!(
        wallets = wallets.wallets().await.len(),
        chains = tokens.chains().await.len(),
        "Running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    bus_handle.abort();
    tokens_handle.abort();
    for handle in sync_handles {
        handle.abort();
    }

    Ok(())
}
