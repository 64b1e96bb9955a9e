use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "ASSET_LEDGER_";
pub const DEFAULT_LOG_FILTER: &str = "asset_ledger=info,sqlx=warn";

/// What to do when a custody transfer names the holder that already has the
/// asset and changes nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundantTransferPolicy {
    /// Fail with `NoChange`.
    Reject,
    /// Close the open interval and open an identical one anyway.
    Record,
}

/// How record/update writes maintain the asset's maintenance dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceCachePolicy {
    /// A written `next_maintenance_date` overwrites the cache as-is. The drift
    /// audit still expects the recomputed dates, so back-dated or date-less
    /// records show up as drift under this policy.
    LatestWriteWins,
    /// Every write re-derives the cache from the most recently performed record.
    Recompute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
    /// Upper bound for a single ledger operation, including retries.
    pub op_timeout_ms: Option<u64>,
    pub max_conflict_retries: u32,
    pub redundant_transfer: RedundantTransferPolicy,
    /// Whether `damaged` blocks moves back to `active`/`overdue`.
    pub damaged_is_terminal: bool,
    pub maintenance_cache: MaintenanceCachePolicy,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            max_connections: 8,
            busy_timeout_ms: 5_000,
            op_timeout_ms: None,
            max_conflict_retries: 3,
            redundant_transfer: RedundantTransferPolicy::Reject,
            damaged_is_terminal: false,
            maintenance_cache: MaintenanceCachePolicy::Recompute,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

pub fn default_db_path() -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    base.join("asset-ledger").join("ledger.sqlite3")
}

impl LedgerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `ASSET_LEDGER_*` keys resolved through `lookup`.
    /// Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let mut config = LedgerConfig::default();

        if let Some(path) = get("DB") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(raw) = get("MAX_CONNECTIONS") {
            config.max_connections = raw.parse().context("parse ASSET_LEDGER_MAX_CONNECTIONS")?;
        }
        if let Some(raw) = get("BUSY_TIMEOUT_MS") {
            config.busy_timeout_ms = raw.parse().context("parse ASSET_LEDGER_BUSY_TIMEOUT_MS")?;
        }
        if let Some(raw) = get("OP_TIMEOUT_MS") {
            config.op_timeout_ms = Some(raw.parse().context("parse ASSET_LEDGER_OP_TIMEOUT_MS")?);
        }
        if let Some(raw) = get("CONFLICT_RETRIES") {
            config.max_conflict_retries =
                raw.parse().context("parse ASSET_LEDGER_CONFLICT_RETRIES")?;
        }
        if let Some(raw) = get("REDUNDANT_TRANSFER") {
            config.redundant_transfer = match raw.to_ascii_lowercase().as_str() {
                "reject" => RedundantTransferPolicy::Reject,
                "record" => RedundantTransferPolicy::Record,
                other => return Err(anyhow!("unknown redundant transfer policy '{other}'")),
            };
        }
        if let Some(raw) = get("DAMAGED_TERMINAL") {
            config.damaged_is_terminal = parse_flag(&raw)
                .ok_or_else(|| anyhow!("ASSET_LEDGER_DAMAGED_TERMINAL must be a boolean"))?;
        }
        if let Some(raw) = get("MAINTENANCE_CACHE") {
            config.maintenance_cache = match raw.to_ascii_lowercase().as_str() {
                "latest_write_wins" => MaintenanceCachePolicy::LatestWriteWins,
                "recompute" => MaintenanceCachePolicy::Recompute,
                other => return Err(anyhow!("unknown maintenance cache policy '{other}'")),
            };
        }
        if let Some(filter) = get("LOG") {
            config.log_filter = filter;
        }
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = Some(PathBuf::from(dir));
        }

        if config.max_connections == 0 {
            return Err(anyhow!("ASSET_LEDGER_MAX_CONNECTIONS must be at least 1"));
        }
        Ok(config)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = LedgerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.redundant_transfer, RedundantTransferPolicy::Reject);
        assert!(!config.damaged_is_terminal);
        assert_eq!(config.maintenance_cache, MaintenanceCachePolicy::Recompute);
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert!(config.db_path.ends_with("asset-ledger/ledger.sqlite3"));
    }

    #[test]
    fn overrides_are_read_from_prefixed_keys() {
        let config = LedgerConfig::from_lookup(lookup_from(&[
            ("ASSET_LEDGER_DB", "/tmp/ledger.db"),
            ("ASSET_LEDGER_OP_TIMEOUT_MS", "250"),
            ("ASSET_LEDGER_REDUNDANT_TRANSFER", "record"),
            ("ASSET_LEDGER_DAMAGED_TERMINAL", "yes"),
            ("ASSET_LEDGER_MAINTENANCE_CACHE", "latest_write_wins"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.op_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.redundant_transfer, RedundantTransferPolicy::Record);
        assert!(config.damaged_is_terminal);
        assert_eq!(config.maintenance_cache, MaintenanceCachePolicy::LatestWriteWins);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(LedgerConfig::from_lookup(lookup_from(&[(
            "ASSET_LEDGER_MAX_CONNECTIONS",
            "many"
        )]))
        .is_err());
        assert!(LedgerConfig::from_lookup(lookup_from(&[(
            "ASSET_LEDGER_MAX_CONNECTIONS",
            "0"
        )]))
        .is_err());
        assert!(LedgerConfig::from_lookup(lookup_from(&[(
            "ASSET_LEDGER_DAMAGED_TERMINAL",
            "sometimes"
        )]))
        .is_err());
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{ "damaged_is_terminal": true }"#).unwrap();
        assert!(config.damaged_is_terminal);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }
}
