//! PostgreSQL persistence: schema setup, idempotent upserts and statistics.
//!
//! Upserts go through a per-transaction staging table. Rows are bulk inserted
//! there first, then merged into the target with `ON CONFLICT ... DO UPDATE`
//! so that the last writer for a natural key wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use migration::Migrator;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Alias, Query, SimpleExpr};
use sea_orm::{
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr, EntityTrait,
    FromQueryResult, QueryFilter, QueryOrder, Statement, TransactionTrait, Value,
};
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::entities::{balancing_reserves, day_ahead_prices};
use crate::models::records::{BalancingReserveRecord, CanonicalRecord, DataKind, DayAheadPriceRecord};

/// Rows per staging insert statement, well below the bind parameter limit
const STAGING_CHUNK: usize = 1000;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("{kind} row {row} is missing required column {column}")]
    MissingColumn {
        kind: DataKind,
        row: usize,
        column: &'static str,
    },
    #[error("{kind} row {row}: {column} value {value} is not a storable number")]
    InvalidNumber {
        kind: DataKind,
        row: usize,
        column: &'static str,
        value: f64,
    },
    #[error("failed to build query: {0}")]
    Query(String),
}

/// A record kind that knows its target table and natural key
pub trait Persistable: CanonicalRecord {
    const TABLE: &'static str;
    const KEY_COLUMNS: &'static [&'static str];
    /// Non-key columns, replaced on conflict
    const VALUE_COLUMNS: &'static [&'static str];
    /// Column definitions of the staging table, after `seq`
    const STAGING_COLUMNS: &'static str;

    /// Bind values in `KEY_COLUMNS` then `VALUE_COLUMNS` order
    fn values(&self, row: usize) -> Result<Vec<Value>, StorageError>;
}

fn required<T: Clone>(value: &Option<T>, kind: DataKind, row: usize, column: &'static str) -> Result<T, StorageError> {
    value.clone().ok_or(StorageError::MissingColumn { kind, row, column })
}

/// Scale of every `NUMERIC(12,3)` column
const NUMERIC_SCALE: u32 = 3;
/// Exclusive magnitude bound of `NUMERIC(12,3)`
const NUMERIC_LIMIT: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

/// Convert to the column's decimal. Values that overflow it, or that are
/// non-zero but round to zero at its scale, are rejected rather than altered.
fn decimal(value: Option<f64>, kind: DataKind, row: usize, column: &'static str) -> Result<Option<Decimal>, StorageError> {
    let Some(v) = value else {
        return Ok(None);
    };

    let rounded = Decimal::from_f64(v).map(|d| d.round_dp(NUMERIC_SCALE));
    match rounded {
        Some(d) if d.abs() < NUMERIC_LIMIT && (v == 0.0 || !d.is_zero()) => Ok(Some(d)),
        _ => Err(StorageError::InvalidNumber { kind, row, column, value: v }),
    }
}

impl Persistable for BalancingReserveRecord {
    const TABLE: &'static str = "balancing_reserves";
    const KEY_COLUMNS: &'static [&'static str] = &["country_code", "datetime_utc", "reserve_type"];
    const VALUE_COLUMNS: &'static [&'static str] = &["amount_mw", "price_eur", "created_at"];
    const STAGING_COLUMNS: &'static str = "country_code VARCHAR(10), datetime_utc TIMESTAMPTZ, \
        reserve_type VARCHAR(100), amount_mw NUMERIC(12,3), price_eur NUMERIC(12,3), created_at TIMESTAMPTZ";

    fn values(&self, row: usize) -> Result<Vec<Value>, StorageError> {
        let kind = Self::KIND;
        if let Some(column) = self.missing_column() {
            return Err(StorageError::MissingColumn { kind, row, column });
        }

        Ok(vec![
            required(&self.country_code, kind, row, "country_code")?.into(),
            required(&self.datetime_utc, kind, row, "datetime_utc")?.into(),
            required(&self.reserve_type, kind, row, "reserve_type")?.into(),
            decimal(self.amount_mw, kind, row, "amount_mw")?.into(),
            decimal(self.price_eur, kind, row, "price_eur")?.into(),
            required(&self.created_at, kind, row, "created_at")?.into(),
        ])
    }
}

impl Persistable for DayAheadPriceRecord {
    const TABLE: &'static str = "day_ahead_prices";
    const KEY_COLUMNS: &'static [&'static str] = &["country_code", "datetime_utc"];
    const VALUE_COLUMNS: &'static [&'static str] = &["price_eur_per_mwh", "created_at"];
    const STAGING_COLUMNS: &'static str = "country_code VARCHAR(10), datetime_utc TIMESTAMPTZ, \
        price_eur_per_mwh NUMERIC(12,3), created_at TIMESTAMPTZ";

    fn values(&self, row: usize) -> Result<Vec<Value>, StorageError> {
        let kind = Self::KIND;
        if let Some(column) = self.missing_column() {
            return Err(StorageError::MissingColumn { kind, row, column });
        }

        Ok(vec![
            required(&self.country_code, kind, row, "country_code")?.into(),
            required(&self.datetime_utc, kind, row, "datetime_utc")?.into(),
            decimal(self.price_eur_per_mwh, kind, row, "price_eur_per_mwh")?.into(),
            required(&self.created_at, kind, row, "created_at")?.into(),
        ])
    }
}

fn staging_table<R: Persistable>() -> String {
    format!("staging_{}", R::TABLE)
}

/// `INSERT ... SELECT DISTINCT ON (key) ... ON CONFLICT (key) DO UPDATE`, keeping the
/// highest `seq` per key so a single statement never touches a key twice
pub fn merge_sql<R: Persistable>() -> String {
    let keys = R::KEY_COLUMNS.join(", ");
    let columns = R::KEY_COLUMNS
        .iter()
        .chain(R::VALUE_COLUMNS.iter())
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    let updates = R::VALUE_COLUMNS
        .iter()
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} ({columns}) \
         SELECT DISTINCT ON ({keys}) {columns} FROM {staging} \
         ORDER BY {keys}, seq DESC \
         ON CONFLICT ({keys}) DO UPDATE SET {updates}",
        table = R::TABLE,
        staging = staging_table::<R>(),
    )
}

#[derive(Debug, Clone, PartialEq, FromQueryResult, Serialize)]
pub struct ReserveStats {
    pub total_records: i64,
    pub earliest: Option<DateTimeWithTimeZone>,
    pub latest: Option<DateTimeWithTimeZone>,
    pub reserve_types: i64,
}

#[derive(Debug, Clone, PartialEq, FromQueryResult, Serialize)]
pub struct PriceStats {
    pub total_records: i64,
    pub earliest: Option<DateTimeWithTimeZone>,
    pub latest: Option<DateTimeWithTimeZone>,
    pub avg_price: Option<Decimal>,
}

/// Read-only snapshot of both tables; `None` when the query failed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StorageStats {
    pub balancing_reserves: Option<ReserveStats>,
    pub day_ahead_prices: Option<PriceStats>,
}

/// Persistence seam used by the pipeline
#[async_trait]
pub trait RecordSink: Send {
    /// Trivial round trip; never fails outward
    async fn test_connection(&mut self) -> bool;

    async fn ensure_schema(&mut self) -> Result<(), StorageError>;

    /// Merge `rows` into the table of their kind, returning the rows affected
    async fn upsert<R: Persistable>(&mut self, rows: &[R]) -> Result<u64, StorageError>;

    async fn get_stats(&mut self) -> StorageStats;

    /// Release the connection pool. Safe to call repeatedly.
    async fn close(&mut self);
}

pub struct StorageWriter {
    database_url: String,
    db: Option<DatabaseConnection>,
}

impl StorageWriter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            database_url: settings.database_url.clone(),
            db: None,
        }
    }

    /// Wrap an existing connection
    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            database_url: String::new(),
            db: Some(db),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.db.is_some()
    }

    async fn connection(&mut self) -> Result<&DatabaseConnection, StorageError> {
        if self.db.is_none() {
            info!("Connecting to database...");
            let db = Database::connect(&self.database_url).await?;
            self.db = Some(db);
        }

        self.db
            .as_ref()
            .ok_or_else(|| StorageError::Database(DbErr::Custom("connection unavailable".to_string())))
    }

    /// Persisted price rows for `country_code` in `[from, to)`, oldest first
    pub async fn load_day_ahead_prices(
        &mut self,
        country_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<day_ahead_prices::Model>, StorageError> {
        let db = self.connection().await?;
        let rows = day_ahead_prices::Entity::find()
            .filter(day_ahead_prices::Column::CountryCode.eq(country_code))
            .filter(day_ahead_prices::Column::DatetimeUtc.gte(from))
            .filter(day_ahead_prices::Column::DatetimeUtc.lt(to))
            .order_by_asc(day_ahead_prices::Column::DatetimeUtc)
            .all(db)
            .await?;

        Ok(rows)
    }

    /// Persisted reserve rows for `country_code` in `[from, to)`
    pub async fn load_balancing_reserves(
        &mut self,
        country_code: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<balancing_reserves::Model>, StorageError> {
        let db = self.connection().await?;
        let rows = balancing_reserves::Entity::find()
            .filter(balancing_reserves::Column::CountryCode.eq(country_code))
            .filter(balancing_reserves::Column::DatetimeUtc.gte(from))
            .filter(balancing_reserves::Column::DatetimeUtc.lt(to))
            .order_by_asc(balancing_reserves::Column::DatetimeUtc)
            .order_by_asc(balancing_reserves::Column::ReserveType)
            .all(db)
            .await?;

        Ok(rows)
    }

    async fn query_stats(&mut self) -> Result<StorageStats, StorageError> {
        let db = self.connection().await?;

        let reserves = ReserveStats::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            r#"
            SELECT
                COUNT(*) AS total_records,
                MIN(datetime_utc) AS earliest,
                MAX(datetime_utc) AS latest,
                COUNT(DISTINCT reserve_type) AS reserve_types
            FROM balancing_reserves
            "#,
        ))
        .one(db)
        .await?;

        let prices = PriceStats::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            r#"
            SELECT
                COUNT(*) AS total_records,
                MIN(datetime_utc) AS earliest,
                MAX(datetime_utc) AS latest,
                ROUND(AVG(price_eur_per_mwh), 3) AS avg_price
            FROM day_ahead_prices
            "#,
        ))
        .one(db)
        .await?;

        Ok(StorageStats {
            balancing_reserves: reserves,
            day_ahead_prices: prices,
        })
    }
}

#[async_trait]
impl RecordSink for StorageWriter {
    async fn test_connection(&mut self) -> bool {
        let db = match self.connection().await {
            Ok(db) => db,
            Err(e) => {
                error!("Database connection failed: {}", e);
                return false;
            }
        };

        match db.execute_unprepared("SELECT 1").await {
            Ok(_) => {
                info!("Database connection OK");
                true
            }
            Err(e) => {
                error!("Database connection test failed: {}", e);
                false
            }
        }
    }

    async fn ensure_schema(&mut self) -> Result<(), StorageError> {
        let db = self.connection().await?;
        info!("Running migrations...");
        Migrator::up(db, None).await?;
        Ok(())
    }

    async fn upsert<R: Persistable>(&mut self, rows: &[R]) -> Result<u64, StorageError> {
        if rows.is_empty() {
            debug!(table = R::TABLE, "Nothing to upsert");
            return Ok(0);
        }

        // Reject incomplete batches before opening a transaction
        let values = rows
            .iter()
            .enumerate()
            .map(|(row, record)| record.values(row))
            .collect::<Result<Vec<_>, _>>()?;

        let staging = staging_table::<R>();
        let db = self.connection().await?;
        let txn = db.begin().await?;

        txn.execute_unprepared(&format!(
            "CREATE TEMP TABLE IF NOT EXISTS {staging} (seq BIGINT NOT NULL, {}) ON COMMIT DROP",
            R::STAGING_COLUMNS
        ))
        .await?;

        let backend = txn.get_database_backend();
        let columns: Vec<Alias> = std::iter::once("seq")
            .chain(R::KEY_COLUMNS.iter().copied())
            .chain(R::VALUE_COLUMNS.iter().copied())
            .map(Alias::new)
            .collect();

        for (chunk_index, chunk) in values.chunks(STAGING_CHUNK).enumerate() {
            let mut insert = Query::insert();
            insert.into_table(Alias::new(staging.as_str())).columns(columns.clone());

            for (offset, row_values) in chunk.iter().enumerate() {
                let seq = (chunk_index * STAGING_CHUNK + offset) as i64;
                let exprs = std::iter::once(SimpleExpr::Value(seq.into()))
                    .chain(row_values.iter().cloned().map(SimpleExpr::Value));
                insert
                    .values(exprs)
                    .map_err(|e| StorageError::Query(e.to_string()))?;
            }

            txn.execute(backend.build(&insert)).await?;
        }

        let merged = txn.execute_unprepared(&merge_sql::<R>()).await?.rows_affected();

        txn.execute_unprepared(&format!("DROP TABLE IF EXISTS {staging}")).await?;
        txn.commit().await?;

        info!(table = R::TABLE, rows = rows.len(), merged, "Upserted records");
        Ok(merged)
    }

    async fn get_stats(&mut self) -> StorageStats {
        match self.query_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Failed to read storage statistics: {}", e);
                StorageStats::default()
            }
        }
    }

    async fn close(&mut self) {
        if let Some(db) = self.db.take() {
            match db.close().await {
                Ok(()) => info!("Database connection closed"),
                Err(e) => warn!("Error while closing database connection: {}", e),
            }
        }
    }
}
