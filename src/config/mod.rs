//! Environment-driven configuration

use std::env;
use std::time::Duration;

/// Runtime configuration for the oracle pool service.
///
/// Every option has a default so the simulator runs against a local ledger
/// with no environment set up.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of oracle identities to provision at startup.
    pub pool_size: usize,
    /// Size of the selection index space the ledger draws from.
    pub index_space_size: u8,
    /// How long an Open request waits for resolution before expiring.
    pub request_timeout: Duration,
    /// How long terminal records are retained for observability.
    pub retention_window: Duration,
    /// Upper bound on a single oracle's registration round-trip.
    pub registration_timeout: Duration,
    /// How long an early report waits for its request before being dropped.
    pub report_grace: Duration,
    /// Interval between expiry/eviction sweeps.
    pub sweep_interval: Duration,
    /// JSON-RPC endpoint of the ledger node.
    pub ledger_rpc_url: String,
    /// Address of the insurance application contract.
    pub app_contract_id: String,
    /// Block to replay events from on startup.
    pub from_block: u64,
    /// Accounts below this offset are reserved for owner, airlines and
    /// passengers; the oracle pool starts here.
    pub oracle_account_offset: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            pool_size: env_parse("ORACLE_POOL_SIZE", 20),
            index_space_size: env_parse("INDEX_SPACE_SIZE", 10),
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECONDS", 60)),
            retention_window: Duration::from_secs(env_parse("RETENTION_WINDOW_SECONDS", 600)),
            registration_timeout: Duration::from_secs(env_parse("REGISTRATION_TIMEOUT_SECONDS", 30)),
            report_grace: Duration::from_secs(env_parse("REPORT_GRACE_SECONDS", 10)),
            sweep_interval: Duration::from_secs(env_parse("SWEEP_INTERVAL_SECONDS", 15)),
            ledger_rpc_url: env::var("LEDGER_RPC_URL")
                .unwrap_or_else(|_| "http://localhost:8545".to_string()),
            app_contract_id: env::var("APP_CONTRACT_ID").unwrap_or_default(),
            from_block: env_parse("FROM_BLOCK", 0),
            oracle_account_offset: env_parse("ORACLE_ACCOUNT_OFFSET", 20),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 20,
            index_space_size: 10,
            request_timeout: Duration::from_secs(60),
            retention_window: Duration::from_secs(600),
            registration_timeout: Duration::from_secs(30),
            report_grace: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(15),
            ledger_rpc_url: "http://localhost:8545".to_string(),
            app_contract_id: String::new(),
            from_block: 0,
            oracle_account_offset: 20,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
