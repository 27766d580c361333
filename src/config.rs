use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Ledger RPC configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// RPC endpoints, in order of preference
    #[serde(default = "default_rpc_urls")]
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// An endpoint whose unchecked-block backlog is at or above this is skipped
    #[serde(default = "default_max_unchecked")]
    pub max_unchecked: u64,
}

fn default_rpc_urls() -> Vec<String> {
    vec![
        "https://mynano.ninja/api/node".to_string(),
        "https://nault.nanos.cc/proxy".to_string(),
        "https://voxpopuli.network/api".to_string(),
        "https://vault.nanocrawler.cc/api/node-api".to_string(),
    ]
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_unchecked() -> u64 {
    1000
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_urls: default_rpc_urls(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_unchecked: default_max_unchecked(),
        }
    }
}

impl LedgerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Confirmation push configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    #[serde(default = "default_ws_urls")]
    pub ws_urls: Vec<String>,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_ws_urls() -> Vec<String> {
    vec![
        "wss://gonano.dev/ws".to_string(),
        "wss://ws.mynano.ninja".to_string(),
        "wss://vox.nanos.cc/websocket".to_string(),
    ]
}

fn default_reconnect_delay_secs() -> u64 {
    10
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            ws_urls: default_ws_urls(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

/// Balance refresh settings
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Concurrent single-account refreshes
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_interval_secs() -> u64 {
    10
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Token chain settings
#[derive(Debug, Deserialize, Clone)]
pub struct TokensConfig {
    #[serde(default = "default_interval_secs")]
    pub parse_interval_secs: u64,
    /// How long create_token waits for the new chain's open block
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_open_timeout_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            parse_interval_secs: default_interval_secs(),
            open_timeout_secs: default_open_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Local storage locations
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_wallets_file")]
    pub wallets_file: String,
    #[serde(default = "default_token_db")]
    pub token_db: String,
}

fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nanowallet")
}

fn default_wallets_file() -> String {
    "wallets.json".to_string()
}

fn default_token_db() -> String {
    "tokenchains.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            wallets_file: default_wallets_file(),
            token_db: default_token_db(),
        }
    }
}

impl StorageConfig {
    pub fn wallets_path(&self) -> PathBuf {
        self.data_dir.join(&self.wallets_file)
    }

    pub fn token_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.token_db)
    }
}

/// Wallet defaults
#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    /// Representative for newly opened accounts
    #[serde(default = "default_representative")]
    pub default_representative: String,
    #[serde(default = "default_entropy_bits")]
    pub bip39_entropy_bits: usize,
}

fn default_representative() -> String {
    "nano_3t6k35gi95xu6tergt6p69ck76ogmitsa8mnijtpxm9fkcm736xtoncuohr3".to_string()
}

fn default_entropy_bits() -> usize {
    256
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            default_representative: default_representative(),
            bip39_entropy_bits: default_entropy_bits(),
        }
    }
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(env_source())
            .build()?;

        config.try_deserialize()
    }

    /// Initialize the global config for the binary
    pub fn init() -> Result<&'static Self, ConfigError> {
        let config = Self::load()?;
        Ok(CONFIG.get_or_init(|| config))
    }
}

/// e.g., NANOWALLET_LEDGER__TIMEOUT_SECS, NANOWALLET_SYNC__WORKERS
fn env_source() -> Environment {
    Environment::with_prefix("NANOWALLET")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
