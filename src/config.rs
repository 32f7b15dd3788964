use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub chain: ChainConfig,
    pub ledger: LedgerConfig,
    pub cooldown: CooldownConfig,
    pub schedule: ScheduleConfig,
    pub proxy_vote: ProxyVoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub rust_log: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(StorageBackend::File),
            "postgres" => Ok(StorageBackend::Postgres),
            other => Err(anyhow::anyhow!("Unknown STORAGE_BACKEND: {}", other)),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub snapshot_name: String,
    pub seed_on_empty: bool,
    pub backup_max_files: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub api_url: String,
    pub network_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub vote_options: String,
    pub retention_days: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CooldownConfig {
    pub vote_secs: i64,
    pub role_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    pub check_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub recheck_interval_secs: u64,
    pub proxy_vote_interval_secs: u64,
    pub outbox_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyVoteConfig {
    pub enabled: bool,
    pub threshold: Decimal,
    pub min_participation: Decimal,
    pub balance_alert: Decimal,
    pub conviction: String,
    pub periods_file: Option<PathBuf>,
}

impl StorageConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("vote_counts").join("ledger.json")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    pub fn vote_book_path(&self) -> PathBuf {
        self.data_dir.join("onchain_votes").join("book.json")
    }
}

fn var_or<T>(key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => Ok(raw.trim().parse()?),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let chain_api_url = env::var("CHAIN_API_URL")?;
        let network_name = env::var("NETWORK_NAME")?;

        let port: u16 = var_or("PORT", 8080)?;
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let backend: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "file".to_string())
            .parse()?;
        let database_url = env::var("DATABASE_URL").ok();
        if backend == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORAGE_BACKEND=postgres");
        }

        let proxy_enabled: bool = var_or("PROXY_VOTING_ENABLED", false)?;
        let periods_file = env::var("PROXY_VOTE_PERIODS_FILE").ok().map(PathBuf::from);
        if proxy_enabled && periods_file.is_none() {
            anyhow::bail!("PROXY_VOTE_PERIODS_FILE is required when PROXY_VOTING_ENABLED=true");
        }

        Ok(Config {
            server: ServerConfig { port, host, rust_log },
            storage: StorageConfig {
                backend,
                data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string())),
                database_url,
                snapshot_name: env::var("SNAPSHOT_NAME").unwrap_or_else(|_| "referenda".to_string()),
                seed_on_empty: var_or("SNAPSHOT_SEED_ON_EMPTY", false)?,
                backup_max_files: var_or("BACKUP_MAX_FILES", 10)?,
            },
            chain: ChainConfig {
                api_url: chain_api_url,
                network_name,
            },
            ledger: LedgerConfig {
                vote_options: env::var("VOTE_OPTIONS").unwrap_or_else(|_| "aye,nay,recuse".to_string()),
                retention_days: var_or("RETENTION_DAYS", 14)?,
            },
            cooldown: CooldownConfig {
                vote_secs: var_or("VOTE_COOLDOWN_SECS", 5)?,
                role_secs: var_or("ROLE_COOLDOWN_SECS", 15)?,
            },
            schedule: ScheduleConfig {
                check_interval_secs: var_or("CHECK_INTERVAL_SECS", 10800)?,
                sweep_interval_secs: var_or("SWEEP_INTERVAL_SECS", 3600)?,
                recheck_interval_secs: var_or("RECHECK_INTERVAL_SECS", 3600)?,
                proxy_vote_interval_secs: var_or("PROXY_VOTE_INTERVAL_SECS", 43200)?,
                outbox_capacity: var_or("OUTBOX_CAPACITY", 512)?,
            },
            proxy_vote: ProxyVoteConfig {
                enabled: proxy_enabled,
                threshold: var_or("PROXY_THRESHOLD", Decimal::new(66, 2))?,
                min_participation: var_or("PROXY_MIN_PARTICIPATION", Decimal::ZERO)?,
                balance_alert: var_or("PROXY_BALANCE_ALERT", Decimal::ZERO)?,
                conviction: env::var("PROXY_CONVICTION").unwrap_or_else(|_| "None".to_string()),
                periods_file,
            },
        })
    }
}
