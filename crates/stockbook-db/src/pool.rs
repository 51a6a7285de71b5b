//! # Database Pool Management
//!
//! Connection pool creation and the [`Database`] handle every service hangs
//! off.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Database handle                                │
//! │                                                                         │
//! │  StockbookConfig::load(path)  ← defaults → TOML → STOCKBOOK_* env       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::open(DbConfig, settings, clock)                              │
//! │       │   1. SqlitePool (WAL, foreign keys, busy timeout)               │
//! │       │   2. migrations                                                 │
//! │       │   3. register configured document prefixes                      │
//! │       ▼                                                                 │
//! │  ┌──────────────┐ ┌──────────────┐ ┌──────────────┐ ┌──────────────┐   │
//! │  │  SqlitePool  │ │  KeyedLocks  │ │   settings   │ │    Clock     │   │
//! │  └──────────────┘ └──────────────┘ └──────────────┘ └──────────────┘   │
//! │       shared by every clone (all behind Arc / pool handles)            │
//! │       │                                                                 │
//! │       ├── db.sequences()  → SequenceAllocator                           │
//! │       ├── db.ledger()     → Ledger                                      │
//! │       ├── db.begin_work() → UnitOfWork                                  │
//! │       └── db.items(), db.locations(), db.batches(), db.movements() ...  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! Readers never block the single writer, so stock queries keep working
//! while a document is being posted.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use stockbook_core::{Clock, SystemClock};

use crate::config::StockbookConfig;
use crate::error::{DbError, DbResult};
use crate::ledger::Ledger;
use crate::locks::KeyedLocks;
use crate::migrations;
use crate::repository::batch::BatchStore;
use crate::repository::item::ItemRepository;
use crate::repository::location::LocationRepository;
use crate::repository::movement::MovementLog;
use crate::repository::prefix::PrefixRepository;
use crate::sequence::SequenceAllocator;
use crate::unit_of_work::{UnitOfWork, WorkPlan};

// =============================================================================
// Configuration
// =============================================================================

/// Pool configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/stockbook/stockbook.db")
///     .max_connections(5)
///     .busy_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// How long to wait for a pooled connection.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long SQLite itself waits on a locked database before reporting
    /// busy.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a configuration for the database file at `path`. The file is
    /// created if it does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }

    /// Pool configuration from the `[database]` section.
    pub fn from_settings(settings: &StockbookConfig) -> DbResult<Self> {
        Ok(DbConfig::new(settings.database_path()?)
            .max_connections(settings.database.max_connections)
            .busy_timeout(Duration::from_millis(settings.database.busy_timeout_ms)))
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// An isolated in-memory database (for tests).
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Main database handle.
///
/// Cloning is cheap; clones share the pool, the lock table, the settings and
/// the clock. Every service that needs to serialize on a sequence scope or an
/// (item, location) pair must go through the same `Database` (or a clone of
/// it), since the locks are in-process.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    locks: Arc<KeyedLocks>,
    settings: Arc<StockbookConfig>,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Opens a database with default settings and the system clock.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        Self::open(config, StockbookConfig::default(), Arc::new(SystemClock)).await
    }

    /// Opens the database described by the settings' `[database]` section.
    pub async fn from_settings(settings: StockbookConfig) -> DbResult<Self> {
        let config = DbConfig::from_settings(&settings)?;
        Self::open(config, settings, Arc::new(SystemClock)).await
    }

    /// Creates the pool, runs migrations and registers the configured
    /// document prefixes.
    ///
    /// ## SQLite Settings
    /// - WAL journal, NORMAL synchronous
    /// - Foreign keys enabled
    /// - `busy_timeout` from the config
    pub async fn open(
        config: DbConfig,
        settings: StockbookConfig,
        clock: Arc<dyn Clock>,
    ) -> DbResult<Self> {
        settings.validate()?;

        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        // sqlite://path creates file if not exists
        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            // SQLite has them disabled by default
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            locks: Arc::new(KeyedLocks::new()),
            settings: Arc::new(settings),
            clock,
        };

        if config.run_migrations {
            db.run_migrations().await?;
            db.prefixes().register_all(&db.settings.prefixes).await?;
        }

        Ok(db)
    }

    /// Applies pending migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// The connection pool, for queries no repository covers.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &StockbookConfig {
        &self.settings
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    pub fn locations(&self) -> LocationRepository {
        LocationRepository::new(self.pool.clone())
    }

    pub fn items(&self) -> ItemRepository {
        ItemRepository::new(self.pool.clone())
    }

    pub fn prefixes(&self) -> PrefixRepository {
        PrefixRepository::new(self.pool.clone())
    }

    pub fn batches(&self) -> BatchStore {
        BatchStore::new(self.pool.clone())
    }

    pub fn movements(&self) -> MovementLog {
        MovementLog::new(self.pool.clone())
    }

    /// Document number allocation.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let handle = db
    ///     .sequences()
    ///     .reserve("Goods Receipt", Location::Branch(1), now, "clerk-7")
    ///     .await?;
    /// assert_eq!(handle.code, "GR-HQ-1026-0001");
    /// ```
    pub fn sequences(&self) -> SequenceAllocator {
        SequenceAllocator::new(self.clone())
    }

    /// Stock movements, transfers, audits and stock queries.
    pub fn ledger(&self) -> Ledger {
        Ledger::new(self.clone())
    }

    /// Locks the plan's keys and opens a transaction.
    ///
    /// Fails with `ScopeLocked` when a key stays contended past the lock
    /// wait; this is a single attempt, callers retry.
    pub async fn begin_work(&self, plan: WorkPlan) -> DbResult<UnitOfWork> {
        UnitOfWork::begin(self, plan).await
    }

    /// Closes the pool. Every later operation fails.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// True when the database answers a trivial query.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
