//! # Stockbook Configuration
//!
//! Settings for numbering, locking and reclamation.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKBOOK_RESERVATION_TTL_SECS=600                                 │
//! │     STOCKBOOK_REUSE_RELEASED_NUMBERS=true                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockbook/stockbook.toml (Linux)                         │
//! │     ~/Library/Application Support/com.stockbook.stockbook/... (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     15 minute TTL, 4 digits, gap-permanent numbering                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/stockbook/stockbook.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [sequence]
//! reservation_ttl_secs = 900
//! digits = 4
//! include_branch_in_code = true
//! reuse_released_numbers = false
//!
//! [locking]
//! lock_wait_ms = 2000
//! max_retries = 5
//! initial_backoff_ms = 25
//! max_backoff_ms = 1000
//!
//! [reclaim]
//! enabled = true
//! interval_secs = 60
//!
//! [[prefixes]]
//! document_type = "Goods Receipt"
//! code = "GR"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use stockbook_core::sequence::CodeFormat;
use stockbook_core::validation::{validate_document_type, validate_prefix_code};
use stockbook_core::DEFAULT_RESERVATION_TTL_SECS;

use crate::error::{DbError, DbResult};

// =============================================================================
// Database Settings
// =============================================================================

/// Where the database lives and how the pool is sized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. `None` means the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long SQLite waits on a locked database before reporting busy.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Sequence Settings
// =============================================================================

/// Document numbering behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceSettings {
    /// Lifetime of an unconfirmed reservation.
    #[serde(default = "default_reservation_ttl")]
    pub reservation_ttl_secs: u64,

    /// Zero-padding width of the number part.
    #[serde(default = "default_digits")]
    pub digits: usize,

    /// Render the branch code into document codes.
    #[serde(default = "default_true")]
    pub include_branch_in_code: bool,

    /// Strict-density mode: hand released/expired numbers out again before
    /// drawing new ones. Off by default; gaps stay permanent.
    #[serde(default)]
    pub reuse_released_numbers: bool,
}

fn default_reservation_ttl() -> u64 {
    DEFAULT_RESERVATION_TTL_SECS
}
fn default_digits() -> usize {
    stockbook_core::DEFAULT_SEQUENCE_DIGITS
}
fn default_true() -> bool {
    true
}

impl Default for SequenceSettings {
    fn default() -> Self {
        SequenceSettings {
            reservation_ttl_secs: default_reservation_ttl(),
            digits: default_digits(),
            include_branch_in_code: true,
            reuse_released_numbers: false,
        }
    }
}

impl SequenceSettings {
    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs as i64)
    }

    pub fn code_format(&self) -> DbResult<CodeFormat> {
        Ok(CodeFormat::new(self.digits, self.include_branch_in_code)?)
    }
}

// =============================================================================
// Locking Settings
// =============================================================================

/// Bounded waits and retry policy for contended keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSettings {
    /// Longest a single attempt waits for one key.
    #[serde(default = "default_lock_wait")]
    pub lock_wait_ms: u64,

    /// Retries after the first attempt; 0 disables retrying.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_lock_wait() -> u64 {
    2_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    25
}
fn default_max_backoff() -> u64 {
    1_000
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            lock_wait_ms: default_lock_wait(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl LockSettings {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

// =============================================================================
// Reclaim Settings
// =============================================================================

/// Background reclamation of expired reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReclaimSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reclaim_interval")]
    pub interval_secs: u64,
}

fn default_reclaim_interval() -> u64 {
    60
}

impl Default for ReclaimSettings {
    fn default() -> Self {
        ReclaimSettings {
            enabled: true,
            interval_secs: default_reclaim_interval(),
        }
    }
}

// =============================================================================
// Prefixes
// =============================================================================

/// A document type and the prefix its codes start with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixSetting {
    pub document_type: String,
    pub code: String,
}

impl PrefixSetting {
    fn new(document_type: &str, code: &str) -> Self {
        PrefixSetting {
            document_type: document_type.to_string(),
            code: code.to_string(),
        }
    }
}

fn default_prefixes() -> Vec<PrefixSetting> {
    vec![
        PrefixSetting::new("Purchase Order", "PO"),
        PrefixSetting::new("Goods Receipt", "GR"),
        PrefixSetting::new("Purchase Invoice", "PI"),
        PrefixSetting::new("Sales Invoice", "SI"),
        PrefixSetting::new("Payment", "PY"),
        PrefixSetting::new("Waybill", "WB"),
        PrefixSetting::new("Stock Transfer", "ST"),
        PrefixSetting::new("Stock Adjustment", "SA"),
        PrefixSetting::new("Stock Audit", "AU"),
        PrefixSetting::new("Sales Order", "SO"),
    ]
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete Stockbook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockbookConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sequence: SequenceSettings,

    #[serde(default)]
    pub locking: LockSettings,

    #[serde(default)]
    pub reclaim: ReclaimSettings,

    /// Registered at start-up; existing registrations are never changed.
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<PrefixSetting>,
}

impl Default for StockbookConfig {
    fn default() -> Self {
        StockbookConfig {
            database: DatabaseSettings::default(),
            sequence: SequenceSettings::default(),
            locking: LockSettings::default(),
            reclaim: ReclaimSettings::default(),
            prefixes: default_prefixes(),
        }
    }
}

impl StockbookConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (stockbook.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading stockbook config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load stockbook config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> DbResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| DbError::Config("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Stockbook config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.sequence.reservation_ttl_secs == 0 {
            return Err(DbError::Config(
                "reservation_ttl_secs must be greater than 0".into(),
            ));
        }

        self.sequence.code_format()?;

        if self.database.max_connections == 0 {
            return Err(DbError::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.locking.lock_wait_ms == 0 {
            return Err(DbError::Config("lock_wait_ms must be greater than 0".into()));
        }

        if self.locking.initial_backoff_ms > self.locking.max_backoff_ms {
            return Err(DbError::Config(
                "initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }

        if self.reclaim.interval_secs == 0 {
            return Err(DbError::Config("interval_secs must be greater than 0".into()));
        }

        let mut seen_types = std::collections::HashSet::new();
        let mut seen_codes = std::collections::HashSet::new();
        for prefix in &self.prefixes {
            validate_document_type(&prefix.document_type)?;
            validate_prefix_code(&prefix.code)?;
            if !seen_types.insert(prefix.document_type.as_str()) {
                return Err(DbError::Config(format!(
                    "document type '{}' is listed twice",
                    prefix.document_type
                )));
            }
            if !seen_codes.insert(prefix.code.as_str()) {
                return Err(DbError::Config(format!(
                    "prefix code '{}' is listed twice",
                    prefix.code
                )));
            }
        }

        Ok(())
    }

    /// Applies `STOCKBOOK_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring unparseable environment override");
                    None
                }
            }
        }

        if let Some(path) = lookup("STOCKBOOK_DATABASE_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(ttl) = parsed("STOCKBOOK_RESERVATION_TTL_SECS", lookup("STOCKBOOK_RESERVATION_TTL_SECS")) {
            debug!(ttl, "Overriding reservation TTL from environment");
            self.sequence.reservation_ttl_secs = ttl;
        }

        if let Some(digits) = parsed("STOCKBOOK_SEQUENCE_DIGITS", lookup("STOCKBOOK_SEQUENCE_DIGITS")) {
            self.sequence.digits = digits;
        }

        if let Some(include) = parsed(
            "STOCKBOOK_INCLUDE_BRANCH_IN_CODE",
            lookup("STOCKBOOK_INCLUDE_BRANCH_IN_CODE"),
        ) {
            self.sequence.include_branch_in_code = include;
        }

        if let Some(reuse) = parsed(
            "STOCKBOOK_REUSE_RELEASED_NUMBERS",
            lookup("STOCKBOOK_REUSE_RELEASED_NUMBERS"),
        ) {
            debug!(reuse, "Overriding number reuse from environment");
            self.sequence.reuse_released_numbers = reuse;
        }

        if let Some(wait) = parsed("STOCKBOOK_LOCK_WAIT_MS", lookup("STOCKBOOK_LOCK_WAIT_MS")) {
            self.locking.lock_wait_ms = wait;
        }

        if let Some(retries) = parsed("STOCKBOOK_LOCK_MAX_RETRIES", lookup("STOCKBOOK_LOCK_MAX_RETRIES")) {
            self.locking.max_retries = retries;
        }

        if let Some(interval) = parsed(
            "STOCKBOOK_RECLAIM_INTERVAL_SECS",
            lookup("STOCKBOOK_RECLAIM_INTERVAL_SECS"),
        ) {
            self.reclaim.interval_secs = interval;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockbook", "stockbook")
            .map(|dirs| dirs.config_dir().join("stockbook.toml"))
    }

    /// The database file: configured path, else the platform data directory.
    pub fn database_path(&self) -> DbResult<PathBuf> {
        if let Some(path) = &self.database.path {
            return Ok(path.clone());
        }
        directories::ProjectDirs::from("com", "stockbook", "stockbook")
            .map(|dirs| dirs.data_dir().join("stockbook.db"))
            .ok_or_else(|| DbError::Config("No data directory available".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_config_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stockbook.toml");
        (dir, path)
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = StockbookConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequence.reservation_ttl_secs, 900);
        assert!(!config.sequence.reuse_released_numbers);
        assert!(config
            .prefixes
            .iter()
            .any(|p| p.document_type == "Goods Receipt" && p.code == "GR"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = StockbookConfig::default();
        config.sequence.reservation_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = StockbookConfig::default();
        config.sequence.digits = 0;
        assert!(config.validate().is_err());

        let mut config = StockbookConfig::default();
        config.prefixes.push(PrefixSetting::new("Credit Note", "GR"));
        assert!(matches!(config.validate(), Err(DbError::Config(_))));

        let mut config = StockbookConfig::default();
        config.prefixes.push(PrefixSetting::new("Credit Note", "cn"));
        assert!(matches!(config.validate(), Err(DbError::Domain(_))));
    }

    #[test]
    fn test_file_then_environment_precedence() {
        let (_dir, path) = temp_config_path();
        std::fs::write(
            &path,
            r#"
            [sequence]
            reservation_ttl_secs = 300
            digits = 6

            [locking]
            max_retries = 2
            "#,
        )
        .unwrap();

        let mut config: StockbookConfig =
            toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.sequence.reservation_ttl_secs, 300);
        assert_eq!(config.sequence.digits, 6);
        // untouched sections keep their defaults
        assert_eq!(config.locking.lock_wait_ms, 2_000);
        assert_eq!(config.prefixes.len(), 10);

        let env: HashMap<&str, &str> = [
            ("STOCKBOOK_RESERVATION_TTL_SECS", "120"),
            ("STOCKBOOK_REUSE_RELEASED_NUMBERS", "true"),
            ("STOCKBOOK_LOCK_MAX_RETRIES", "not-a-number"),
        ]
        .into_iter()
        .collect();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.sequence.reservation_ttl_secs, 120);
        assert!(config.sequence.reuse_released_numbers);
        assert_eq!(config.locking.max_retries, 2);
        assert_eq!(config.sequence.digits, 6);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_dir, path) = temp_config_path();
        let mut config = StockbookConfig::default();
        config.sequence.include_branch_in_code = false;
        config.save(Some(path.clone())).unwrap();

        let loaded = StockbookConfig::load(Some(path.clone())).unwrap();
        assert!(!loaded.sequence.include_branch_in_code);
    }

    #[test]
    fn test_toml_serialization() {
        let config = StockbookConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[sequence]"));
        assert!(toml_str.contains("[[prefixes]]"));
    }
}
