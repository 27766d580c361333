use super::chain::{Cursor, Token, TokenChain};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use nanowallet_types::{Address, BlockHash};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub type DbPool = Pool<Sqlite>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS chains (
        address TEXT PRIMARY KEY NOT NULL,
        seed TEXT,
        height INTEGER NOT NULL,
        frontier TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tokens (
        hash TEXT PRIMARY KEY NOT NULL,
        chain TEXT NOT NULL REFERENCES chains(address),
        name TEXT NOT NULL,
        decimals INTEGER NOT NULL,
        supply TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS token_balances (
        token TEXT NOT NULL REFERENCES tokens(hash),
        address TEXT NOT NULL,
        amount TEXT NOT NULL,
        PRIMARY KEY (token, address)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracked_tokens (
        hash TEXT PRIMARY KEY NOT NULL,
        added_at TEXT NOT NULL
    )
    "#,
];

#[derive(Debug, FromRow)]
struct ChainRow {
    address: String,
    seed: Option<String>,
    height: i64,
    frontier: String,
}

#[derive(Debug, FromRow)]
struct TokenRow {
    hash: String,
    chain: String,
    name: String,
    decimals: i64,
    supply: String,
}

#[derive(Debug, FromRow)]
struct BalanceRow {
    token: String,
    address: String,
    amount: String,
}

fn corrupt(what: &str, value: &str) -> AppError {
    AppError::internal(format!("corrupt {} in token store: {}", what, value))
}

fn parse_address(text: &str) -> AppResult<Address> {
    text.parse().map_err(|_| corrupt("address", text))
}

fn parse_hash(text: &str) -> AppResult<BlockHash> {
    text.parse().map_err(|_| corrupt("hash", text))
}

fn parse_amount(text: &str) -> AppResult<u128> {
    text.parse().map_err(|_| corrupt("amount", text))
}

/// Chains, their tokens and the tracked-token list, in SQLite.
#[derive(Debug, Clone)]
pub struct TokenStore {
    pool: DbPool,
}

impl TokenStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: &Path) -> AppResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        info!("Token store opened: {}", path.display());
        Self::with_pool(pool).await
    }

    /// A private database that lives as long as the store.
    pub async fn in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: DbPool) -> AppResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Every persisted chain with its tokens and balances.
    pub async fn load_chains(&self) -> AppResult<Vec<TokenChain>> {
        let chains = sqlx::query_as::<_, ChainRow>(
            "SELECT address, seed, height, frontier FROM chains ORDER BY address",
        )
        .fetch_all(&self.pool)
        .await?;
        let tokens = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens")
            .fetch_all(&self.pool)
            .await?;
        let balances = sqlx::query_as::<_, BalanceRow>("SELECT * FROM token_balances")
            .fetch_all(&self.pool)
            .await?;

        let mut holders: HashMap<BlockHash, HashMap<Address, u128>> = HashMap::new();
        for row in balances {
            holders
                .entry(parse_hash(&row.token)?)
                .or_default()
                .insert(parse_address(&row.address)?, parse_amount(&row.amount)?);
        }

        let mut by_chain: HashMap<Address, BTreeMap<BlockHash, Token>> = HashMap::new();
        for row in tokens {
            let hash = parse_hash(&row.hash)?;
            let chain = parse_address(&row.chain)?;
            let decimals = u8::try_from(row.decimals)
                .map_err(|_| corrupt("decimals", &row.decimals.to_string()))?;
            let token = Token::new(
                hash,
                chain,
                row.name,
                decimals,
                parse_amount(&row.supply)?,
                holders.remove(&hash).unwrap_or_default(),
            );
            by_chain.entry(chain).or_default().insert(hash, token);
        }

        chains
            .into_iter()
            .map(|row| {
                let address = parse_address(&row.address)?;
                let seed = match row.seed {
                    Some(text) => {
                        let bytes = hex::decode(&text).map_err(|_| corrupt("seed", &row.address))?;
                        let seed: [u8; 32] = bytes
                            .try_into()
                            .map_err(|_| corrupt("seed", &row.address))?;
                        Some(seed)
                    }
                    None => None,
                };
                let cursor = Cursor {
                    height: u64::try_from(row.height)
                        .map_err(|_| corrupt("height", &row.height.to_string()))?,
                    frontier: parse_hash(&row.frontier)?,
                };
                let tokens = by_chain.remove(&address).unwrap_or_default();
                Ok(TokenChain::restore(address, seed, cursor, tokens))
            })
            .collect()
    }

    /// Persist `chain` in one transaction. Returns false, writing nothing,
    /// when the stored cursor is already further along.
    pub async fn save_chain(&self, chain: &TokenChain) -> AppResult<bool> {
        let cursor = chain.cursor();
        let height = i64::try_from(cursor.height)
            .map_err(|_| AppError::internal("chain height out of range"))?;
        let address = chain.address().to_string();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO chains (address, seed, height, frontier, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                seed = COALESCE(excluded.seed, chains.seed),
                height = excluded.height,
                frontier = excluded.frontier,
                updated_at = excluded.updated_at
            WHERE excluded.height >= chains.height
            "#,
        )
        .bind(&address)
        .bind(chain.seed().map(hex::encode))
        .bind(height)
        .bind(cursor.frontier.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(chain = %address, height, "Stored chain is newer, skipping save");
            return Ok(false);
        }

        for token in chain.tokens().values() {
            let hash = token.hash.to_string();
            sqlx::query(
                r#"
                INSERT INTO tokens (hash, chain, name, decimals, supply)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(hash) DO NOTHING
                "#,
            )
            .bind(&hash)
            .bind(&address)
            .bind(&token.name)
            .bind(i64::from(token.decimals))
            .bind(token.supply.to_string())
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM token_balances WHERE token = ?")
                .bind(&hash)
                .execute(&mut *tx)
                .await?;

            for (holder, amount) in token.balances() {
                sqlx::query("INSERT INTO token_balances (token, address, amount) VALUES (?, ?, ?)")
                    .bind(&hash)
                    .bind(holder.to_string())
                    .bind(amount.to_string())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        debug!(chain = %address, height, tokens = chain.tokens().len(), "Saved token chain");
        Ok(true)
    }

    pub async fn track_token(&self, hash: &BlockHash) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tracked_tokens (hash, added_at) VALUES (?, ?)
            ON CONFLICT(hash) DO NOTHING
            "#,
        )
        .bind(hash.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn tracked_tokens(&self) -> AppResult<BTreeSet<BlockHash>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT hash FROM tracked_tokens")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(hash,)| parse_hash(hash)).collect()
    }
}
