//! BalanceSynchronizer: periodic and confirmation-driven refresh.

mod common;

use common::{open_collection, representative, MockLedger};
use nanowallet::config::SyncConfig;
use nanowallet::wallet::{AccountDirectory, SeedSigner};
use nanowallet::BalanceSynchronizer;
use nanowallet_types::{Address, BlockHash, Confirmation, StateBlock, Subtype};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const ZERO_SEED: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn zero_seed_address(index: u32) -> Address {
    SeedSigner::from_raw_seed(&[0u8; 32]).unwrap().key(index).address()
}

fn confirmation(account: Address, subtype: Subtype, destination: Option<Address>) -> Confirmation {
    let block = StateBlock {
        account,
        previous: BlockHash([1; 32]),
        representative: representative(),
        balance: 0,
        link: destination.map(BlockHash::from).unwrap_or(BlockHash::ZERO),
        signature: None,
        work: None,
    };
    Confirmation {
        account,
        hash: block.hash(),
        link_as_account: destination,
        subtype: Some(subtype),
        block,
    }
}

async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn wallet_with_accounts(
    ledger: Arc<MockLedger>,
    dir: &tempfile::TempDir,
    count: usize,
) -> Arc<AccountDirectory> {
    let wallets = open_collection(ledger, dir).await;
    let wallet = wallets
        .create_seed_wallet("main", Some(ZERO_SEED), "pw")
        .await
        .unwrap();
    for _ in 0..count {
        wallet.add_account().await.unwrap();
    }
    wallet
}

#[tokio::test]
async fn test_unknown_address_costs_no_io() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 2).await;

    let sync = Arc::new(BalanceSynchronizer::new(&SyncConfig::default()));
    sync.open(wallet).await;
    let calls = ledger.query_calls();

    let stranger = Address([0x77; 32]);
    assert!(!sync.refresh_address(&stranger).await.unwrap());
    assert_eq!(ledger.query_calls(), calls);

    let singles = ledger.balance_calls();
    let handles = sync.spawn();
    sync.handle_confirmation(&confirmation(stranger, Subtype::Change, None));
    sync.handle_confirmation(&confirmation(stranger, Subtype::Send, Some(Address([0x78; 32]))));
    tokio::time::sleep(Duration::from_millis(100)).await;
    // Only the timer's first tick touched the ledger, with one batch.
    assert_eq!(ledger.balance_calls(), singles);
    assert_eq!(ledger.batch_calls(), 1);
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_confirmation_refreshes_one_account() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 3).await;

    let sync = Arc::new(
        BalanceSynchronizer::new(&SyncConfig::default()).with_interval(Duration::from_secs(3600)),
    );
    sync.open(wallet.clone()).await;
    let handles = sync.spawn();
    // Let the first timer tick pass.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let batches = ledger.batch_calls();
    let singles = ledger.balance_calls();

    let target = zero_seed_address(1);
    ledger.credit(&target, 42);
    sync.handle_confirmation(&confirmation(target, Subtype::Open, None));

    eventually(|| {
        let wallet = wallet.clone();
        async move { wallet.balance(&target).await.map(|b| b.balance) == Some(42) }
    })
    .await;
    assert_eq!(ledger.balance_calls(), singles + 1);
    assert_eq!(ledger.batch_calls(), batches);
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_send_refreshes_receiving_account() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 1).await;

    let sync = Arc::new(
        BalanceSynchronizer::new(&SyncConfig::default()).with_interval(Duration::from_secs(3600)),
    );
    sync.open(wallet.clone()).await;
    let handles = sync.spawn();

    let ours = zero_seed_address(0);
    ledger.fund(&ours, 9);
    let outsider = Address([0x55; 32]);
    sync.handle_confirmation(&confirmation(outsider, Subtype::Send, Some(ours)));

    eventually(|| {
        let wallet = wallet.clone();
        async move { wallet.balance(&ours).await.map(|b| b.receivable) == Some(9) }
    })
    .await;
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_timer_refreshes_without_events() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 2).await;

    let sync = Arc::new(
        BalanceSynchronizer::new(&SyncConfig::default()).with_interval(Duration::from_millis(20)),
    );
    sync.open(wallet.clone()).await;
    let handles = sync.spawn();

    ledger.credit(&zero_seed_address(0), 5);
    ledger.credit(&zero_seed_address(1), 6);
    eventually(|| {
        let wallet = wallet.clone();
        async move {
            wallet.balance(&zero_seed_address(0)).await.map(|b| b.balance) == Some(5)
                && wallet.balance(&zero_seed_address(1)).await.map(|b| b.balance) == Some(6)
        }
    })
    .await;
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_closed_directory_is_left_alone() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 1).await;

    let sync = BalanceSynchronizer::new(&SyncConfig::default());
    sync.open(wallet.clone()).await;
    sync.open(wallet.clone()).await;
    assert_eq!(sync.open_count().await, 1);

    sync.close(&wallet).await;
    assert_eq!(sync.open_count().await, 0);

    let calls = ledger.query_calls();
    sync.refresh_all().await;
    assert!(!sync.refresh_address(&zero_seed_address(0)).await.unwrap());
    assert_eq!(ledger.query_calls(), calls);
}

#[tokio::test]
async fn test_failed_cycle_is_swallowed() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 1).await;
    let before = wallet.balances().await;

    let sync = BalanceSynchronizer::new(&SyncConfig::default());
    sync.open(wallet.clone()).await;

    ledger.set_failing(true);
    sync.refresh_all().await;
    assert_eq!(wallet.balances().await, before);

    ledger.set_failing(false);
    ledger.credit(&zero_seed_address(0), 3);
    sync.refresh_all().await;
    assert_eq!(
        wallet.balance(&zero_seed_address(0)).await.unwrap().balance,
        3
    );
}

#[tokio::test]
async fn test_strangers_do_not_crowd_out_open_accounts() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 1).await;
    let ours = zero_seed_address(0);

    let config = SyncConfig {
        queue_capacity: 4,
        workers: 1,
        ..SyncConfig::default()
    };
    let sync = Arc::new(BalanceSynchronizer::new(&config).with_interval(Duration::from_secs(3600)));
    sync.open(wallet.clone()).await;
    assert!(sync.is_open(&ours));
    assert!(!sync.is_open(&Address([0x90; 32])));

    // Network-wide traffic arrives before any worker runs.
    for i in 0..8u8 {
        sync.handle_confirmation(&confirmation(Address([0x90 + i; 32]), Subtype::Change, None));
    }
    ledger.credit(&ours, 42);
    sync.handle_confirmation(&confirmation(ours, Subtype::Open, None));

    let singles = ledger.balance_calls();
    let handles = sync.spawn();
    eventually(|| {
        let ledger = ledger.clone();
        async move { ledger.balance_calls() == singles + 1 }
    })
    .await;
    eventually(|| {
        let wallet = wallet.clone();
        async move { wallet.balance(&ours).await.map(|b| b.balance) == Some(42) }
    })
    .await;
    for handle in handles {
        handle.abort();
    }
}

#[tokio::test]
async fn test_dropped_job_is_healed_by_timer() {
    let ledger = MockLedger::new();
    let dir = tempfile::tempdir().unwrap();
    let wallet = wallet_with_accounts(ledger.clone(), &dir, 2).await;
    let first = zero_seed_address(0);
    let second = zero_seed_address(1);

    let config = SyncConfig {
        queue_capacity: 1,
        workers: 1,
        ..SyncConfig::default()
    };
    let sync = Arc::new(BalanceSynchronizer::new(&config).with_interval(Duration::from_millis(20)));
    sync.open(wallet.clone()).await;

    // The first job fills the queue, so the second is dropped.
    sync.handle_confirmation(&confirmation(first, Subtype::Change, None));
    ledger.credit(&second, 6);
    sync.handle_confirmation(&confirmation(second, Subtype::Open, None));
    assert_eq!(wallet.balance(&second).await.unwrap().balance, 0);

    let handles = sync.spawn();
    eventually(|| {
        let wallet = wallet.clone();
        async move { wallet.balance(&second).await.map(|b| b.balance) == Some(6) }
    })
    .await;
    assert!(ledger.batch_calls() >= 1);
    for handle in handles {
        handle.abort();
    }
}
