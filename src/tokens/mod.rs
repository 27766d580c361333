//! Token chains: ledger accounts whose incoming sends encode token
//! genesis and transfer operations.

pub mod amount;
pub mod chain;
pub mod manager;
pub mod protocol;
pub mod store;

pub use amount::{amount_from_string, amount_to_string};
pub use chain::{Cursor, Token, TokenChain};
pub use manager::TokenChainManager;
pub use protocol::TokenOp;
pub use store::TokenStore;
