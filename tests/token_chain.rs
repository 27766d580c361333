//! Token chains end to end: create, transfer, parse, persist.

mod common;

use common::{open_collection, representative, MockLedger};
use nanowallet::config::TokensConfig;
use nanowallet::tokens::{amount_to_string, TokenChainManager, TokenOp, TokenStore};
use nanowallet::wallet::{AccountDirectory, AccountHandle, SeedSigner};
use nanowallet::AppError;
use nanowallet_types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const ZERO_SEED: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn zero_seed_address(index: u32) -> Address {
    SeedSigner::from_raw_seed(&[0u8; 32]).unwrap().key(index).address()
}

struct Fixture {
    ledger: Arc<MockLedger>,
    wallet: Arc<AccountDirectory>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let ledger = MockLedger::new();
        ledger.credit(&zero_seed_address(0), 1_000);
        ledger.credit(&zero_seed_address(1), 1_000);

        let dir = tempfile::tempdir().unwrap();
        let wallets = open_collection(ledger.clone(), &dir).await;
        let wallet = wallets
            .create_seed_wallet("main", Some(ZERO_SEED), "pw")
            .await
            .unwrap();
        wallet.add_account().await.unwrap();
        wallet.add_account().await.unwrap();
        Self {
            ledger,
            wallet,
            _dir: dir,
        }
    }

    async fn handle(&self, index: u32) -> AccountHandle {
        self.wallet.account(&zero_seed_address(index)).await.unwrap()
    }

    fn manager(&self, store: TokenStore) -> TokenChainManager {
        TokenChainManager::new(
            self.ledger.clone(),
            store,
            &TokensConfig::default(),
            representative(),
        )
        .with_open_timeout(Duration::from_millis(200), Duration::from_millis(5))
    }
}

#[tokio::test]
async fn test_create_token() {
    let fx = Fixture::new().await;
    let manager = fx.manager(TokenStore::in_memory().await.unwrap());
    let creator = fx.handle(0).await;

    let token = manager
        .create_token(&creator, "GOLD", 1_000_000, 2)
        .await
        .unwrap();
    assert_eq!(token.name, "GOLD");
    assert_eq!(token.decimals, 2);
    assert_eq!(token.supply, 1_000_000);
    assert_eq!(token.balance(&creator.address()), 1_000_000);
    assert_eq!(
        amount_to_string(token.balance(&creator.address()), token.decimals),
        "10000.00"
    );

    // The chain identity is the token's block owner.
    let chain = manager.fetch_chain(&token.chain).await.unwrap();
    assert!(chain.is_owned());
    assert_eq!(chain.cursor().height, 2);
    assert_eq!(manager.tokens().await, vec![token.clone()]);

    // The creator's representative is back where it was.
    assert_eq!(creator.representative().await.unwrap(), representative());
}

#[tokio::test]
async fn test_transfer_moves_balance() {
    let fx = Fixture::new().await;
    let manager = fx.manager(TokenStore::in_memory().await.unwrap());
    let sender = fx.handle(0).await;
    let recipient = zero_seed_address(1);

    let token = manager.create_token(&sender, "GOLD", 1_000, 0).await.unwrap();
    assert_ok!(
        manager
            .transfer_token(&token.hash, &sender, &recipient, 250)
            .await
    );

    assert_eq!(manager.balance(&token.hash, &sender.address()).await.unwrap(), 750);
    assert_eq!(manager.balance(&token.hash, &recipient).await.unwrap(), 250);
    assert_eq!(sender.representative().await.unwrap(), representative());

    let err = assert_err!(
        manager
            .transfer_token(&token.hash, &sender, &recipient, 751)
            .await
    );
    assert!(matches!(err, AppError::InsufficientBalance));
}

#[tokio::test]
async fn test_reparse_is_idempotent() {
    let fx = Fixture::new().await;
    let manager = fx.manager(TokenStore::in_memory().await.unwrap());
    let sender = fx.handle(0).await;

    let token = manager.create_token(&sender, "GOLD", 1_000, 0).await.unwrap();
    manager
        .transfer_token(&token.hash, &sender, &zero_seed_address(1), 100)
        .await
        .unwrap();
    let before = manager.token(&token.hash).await.unwrap();
    let cursor = manager.fetch_chain(&token.chain).await.unwrap().cursor();

    assert_eq!(manager.parse_all().await, 0);
    assert_eq!(manager.parse_all().await, 0);
    assert_eq!(manager.token(&token.hash).await.unwrap(), before);
    assert_eq!(manager.fetch_chain(&token.chain).await.unwrap().cursor(), cursor);
}

#[tokio::test]
async fn test_overdrawn_transfer_on_chain_is_ignored() {
    let fx = Fixture::new().await;
    let manager = fx.manager(TokenStore::in_memory().await.unwrap());
    let issuer = fx.handle(0).await;
    let token = manager.create_token(&issuer, "GOLD", 500, 0).await.unwrap();

    // Account 1 holds none of the token but writes a transfer anyway,
    // bypassing the manager's local balance check.
    let rogue = fx.handle(1).await;
    rogue
        .change_representative(&token.hash.as_address())
        .await
        .unwrap();
    rogue.change_representative(&issuer.address()).await.unwrap();
    rogue
        .send_with_representative(
            &token.chain,
            1,
            Some(TokenOp::Transfer { amount: 100 }.encode()),
        )
        .await
        .unwrap();

    assert_eq!(manager.refresh_chain(&token.chain).await.unwrap(), 1);
    let after = manager.token(&token.hash).await.unwrap();
    assert_eq!(after.balance(&issuer.address()), 500);
    assert_eq!(after.balance(&rogue.address()), 0);
}

#[tokio::test]
async fn test_remote_manager_sees_same_state() {
    let fx = Fixture::new().await;
    let owner = fx.manager(TokenStore::in_memory().await.unwrap());
    let sender = fx.handle(0).await;
    let token = owner.create_token(&sender, "SILVER", 90, 1).await.unwrap();
    owner
        .transfer_token(&token.hash, &sender, &zero_seed_address(1), 30)
        .await
        .unwrap();

    let observer = fx.manager(TokenStore::in_memory().await.unwrap());
    let seen = observer.add_token(&token.hash).await.unwrap();
    assert_eq!(seen, owner.token(&token.hash).await.unwrap());
    assert!(!observer.fetch_chain(&token.chain).await.unwrap().is_owned());
    assert_eq!(observer.tokens().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_token() {
    let fx = Fixture::new().await;
    let manager = fx.manager(TokenStore::in_memory().await.unwrap());
    let missing = nanowallet_types::BlockHash([0xAB; 32]);
    assert!(matches!(
        manager.fetch_token(&missing).await,
        Err(AppError::TokenNotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_parameters() {
    let fx = Fixture::new().await;
    let manager = fx.manager(TokenStore::in_memory().await.unwrap());
    let creator = fx.handle(0).await;

    assert!(matches!(
        manager.create_token(&creator, "THIRTEEN_BYTE", 1, 0).await,
        Err(AppError::InvalidTokenName(_))
    ));
    assert!(matches!(
        manager.create_token(&creator, "GOLD", 1, 39).await,
        Err(AppError::InvalidAmount(_))
    ));
    assert!(matches!(
        manager.create_token(&creator, "GOLD", 0, 2).await,
        Err(AppError::InvalidAmount(_))
    ));
    // Nothing was sent.
    assert_eq!(fx.ledger.block_count_for(&creator.address()), 1);
}

#[tokio::test]
async fn test_unconfirmed_open_caches_nothing() {
    let fx = Fixture::new().await;
    let manager = fx.manager(TokenStore::in_memory().await.unwrap());
    let creator = fx.handle(0).await;

    fx.ledger.withhold_confirmations(true);
    let err = manager
        .create_token(&creator, "GOLD", 1_000, 2)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ChainProtocol(_)));
    assert!(manager.tokens().await.is_empty());
    assert!(manager.chains().await.is_empty());
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let fx = Fixture::new().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.db");
    let sender = fx.handle(0).await;

    let token = {
        let manager = fx.manager(TokenStore::open(&path).await.unwrap());
        let token = manager.create_token(&sender, "GOLD", 1_000, 3).await.unwrap();
        manager
            .transfer_token(&token.hash, &sender, &zero_seed_address(1), 1)
            .await
            .unwrap();
        manager.token(&token.hash).await.unwrap()
    };

    let manager = fx.manager(TokenStore::open(&path).await.unwrap());
    assert_eq!(manager.load().await.unwrap(), 1);
    assert_eq!(manager.tokens().await, vec![token.clone()]);
    assert!(manager.fetch_chain(&token.chain).await.unwrap().is_owned());

    // The restored cursor means nothing is applied twice.
    assert_eq!(manager.parse_all().await, 0);
    assert_eq!(manager.token(&token.hash).await.unwrap(), token);
}
