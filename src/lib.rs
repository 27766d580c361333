pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod sync;
pub mod tokens;
pub mod vault;
pub mod wallet;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use events::EventBus;
pub use ledger::{LedgerClient, RpcClient};
pub use sync::BalanceSynchronizer;
pub use tokens::TokenChainManager;
pub use vault::KeyVault;
pub use wallet::{AccountDirectory, WalletCollection};
