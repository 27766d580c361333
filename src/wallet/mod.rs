//! Wallets, their derived accounts and the keys behind them.

pub mod account;
pub mod collection;
pub mod directory;
pub mod keys;
pub mod record;
pub mod signer;
pub mod store;

pub use account::AccountHandle;
pub use collection::WalletCollection;
pub use directory::{Account, AccountDirectory};
pub use record::{AccountEntry, OriginKind, WalletRecord};
pub use signer::{DeviceConnector, SeedSigner, Signer};
pub use store::WalletStore;
