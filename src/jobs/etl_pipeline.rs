//! Orchestrates fetch -> transform -> validate -> upsert, one calendar day at a time.
//!
//! Storage setup failures abort the run. Any other failure only marks the
//! date it happened on, and the loop moves on to the next date.

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::country::Country;
use crate::models::records::{CanonicalRecord, DataKind};
use crate::services::entsoe_client::{ClientError, MarketDataSource};
use crate::services::storage::{RecordSink, StorageError, StorageStats};
use crate::services::transformer::RecordTransformer;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("database connection test failed")]
    ConnectionFailed,
    #[error("schema setup failed: {0}")]
    Schema(#[source] StorageError),
    #[error("failed to fetch {kind}: {source}")]
    Fetch {
        kind: DataKind,
        #[source]
        source: ClientError,
    },
    #[error("{0} batch failed validation")]
    Validation(DataKind),
    #[error("failed to store {kind}: {source}")]
    Store {
        kind: DataKind,
        #[source]
        source: StorageError,
    },
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Daily(NaiveDate),
    /// Inclusive on both ends
    Historical { start: NaiveDate, end: NaiveDate },
}

impl RunMode {
    pub fn dates(&self) -> Result<Vec<NaiveDate>, PipelineError> {
        match *self {
            RunMode::Daily(date) => Ok(vec![date]),
            RunMode::Historical { start, end } => date_range(start, end),
        }
    }
}

/// Every day from `start` to `end` inclusive
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, PipelineError> {
    if start > end {
        return Err(PipelineError::InvalidRange { start, end });
    }
    Ok(start.iter_days().take_while(|date| *date <= end).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateOutcome {
    pub date: NaiveDate,
    pub reserves_loaded: usize,
    pub prices_loaded: usize,
    pub error: Option<String>,
}

impl DateOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub country_code: String,
    pub outcomes: Vec<DateOutcome>,
    pub stats: StorageStats,
}

impl RunReport {
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// A run succeeds only when no date failed
    pub fn is_success(&self) -> bool {
        self.error_count() == 0
    }

    pub fn failed_dates(&self) -> Vec<NaiveDate> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.date)
            .collect()
    }
}

pub struct EtlPipeline<S, T, W> {
    source: S,
    transformer: T,
    writer: W,
    country: Country,
}

impl<S, T, W> EtlPipeline<S, T, W>
where
    S: MarketDataSource,
    T: RecordTransformer,
    W: RecordSink,
{
    pub fn new(source: S, transformer: T, writer: W, country: Country) -> Self {
        Self {
            source,
            transformer,
            writer,
            country,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Connection test then schema setup. Either failure is fatal for the run.
    pub async fn initialize_storage(&mut self) -> Result<(), PipelineError> {
        if !self.writer.test_connection().await {
            return Err(PipelineError::ConnectionFailed);
        }
        self.writer.ensure_schema().await.map_err(PipelineError::Schema)?;
        Ok(())
    }

    pub async fn run_daily(&mut self, date: NaiveDate) -> Result<RunReport, PipelineError> {
        self.run(RunMode::Daily(date)).await
    }

    pub async fn run_historical(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RunReport, PipelineError> {
        self.run(RunMode::Historical { start, end }).await
    }

    /// Run every date of `mode`. Does not release storage; call [`Self::cleanup`] afterwards.
    pub async fn run(&mut self, mode: RunMode) -> Result<RunReport, PipelineError> {
        let dates = mode.dates()?;

        info!(
            country = %self.country.code,
            eic = %self.country.eic_code,
            timezone = %self.country.timezone,
            dates = dates.len(),
            "Starting ETL run for {}",
            self.country.name
        );

        self.initialize_storage().await?;

        let total = dates.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, date) in dates.into_iter().enumerate() {
            info!("[{}/{}] Processing {} for {}", index + 1, total, date, self.country.code);

            let outcome = match self.process_date(date).await {
                Ok((reserves_loaded, prices_loaded)) => {
                    info!(
                        date = %date,
                        reserves = reserves_loaded,
                        prices = prices_loaded,
                        "✅ Date processed"
                    );
                    DateOutcome {
                        date,
                        reserves_loaded,
                        prices_loaded,
                        error: None,
                    }
                }
                Err(e) => {
                    error!(date = %date, "❌ Failed: {}", e);
                    DateOutcome {
                        date,
                        reserves_loaded: 0,
                        prices_loaded: 0,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let stats = self.writer.get_stats().await;
        let report = RunReport {
            country_code: self.country.code.clone(),
            outcomes,
            stats,
        };

        info!("=== ETL Run Complete ===");
        info!("Country: {}", report.country_code);
        info!("Dates: {}", report.outcomes.len());
        info!("Success: {}", report.success_count());
        info!("Errors: {}", report.error_count());
        if let Some(reserves) = &report.stats.balancing_reserves {
            info!(
                records = reserves.total_records,
                reserve_types = reserves.reserve_types,
                "Stored balancing reserves"
            );
        }
        if let Some(prices) = &report.stats.day_ahead_prices {
            info!(
                records = prices.total_records,
                avg_price = ?prices.avg_price,
                "Stored day-ahead prices"
            );
        }

        Ok(report)
    }

    /// Fetch, clean, validate and store one date. Returns rows loaded per kind.
    pub async fn process_date(&mut self, date: NaiveDate) -> Result<(usize, usize), PipelineError> {
        let raw_reserves = self
            .source
            .fetch_balancing_reserves(date)
            .await
            .map_err(|source| PipelineError::Fetch {
                kind: DataKind::BalancingReserves,
                source,
            })?;
        let raw_prices = self
            .source
            .fetch_day_ahead_prices(date)
            .await
            .map_err(|source| PipelineError::Fetch {
                kind: DataKind::DayAheadPrices,
                source,
            })?;

        let reserves = if raw_reserves.is_empty() {
            warn!(date = %date, "No balancing reserve data");
            Vec::new()
        } else {
            let cleaned = self.transformer.transform_balancing_reserves(&raw_reserves);
            self.check_batch(date, &cleaned)?;
            cleaned
        };

        let prices = if raw_prices.is_empty() {
            warn!(date = %date, "No day-ahead price data");
            Vec::new()
        } else {
            let cleaned = self.transformer.transform_day_ahead_prices(&raw_prices);
            self.check_batch(date, &cleaned)?;
            cleaned
        };

        if !reserves.is_empty() {
            self.writer
                .upsert(reserves.as_slice())
                .await
                .map_err(|source| PipelineError::Store {
                    kind: DataKind::BalancingReserves,
                    source,
                })?;
        }
        if !prices.is_empty() {
            self.writer
                .upsert(prices.as_slice())
                .await
                .map_err(|source| PipelineError::Store {
                    kind: DataKind::DayAheadPrices,
                    source,
                })?;
        }

        Ok((reserves.len(), prices.len()))
    }

    // Only called for non-empty raw batches, so an empty `cleaned` means every row was dropped
    fn check_batch<R: CanonicalRecord>(&self, date: NaiveDate, cleaned: &[R]) -> Result<(), PipelineError> {
        if cleaned.is_empty() {
            warn!(date = %date, kind = %R::KIND, "All rows dropped during transform");
        }
        if !self.transformer.validate(cleaned) {
            return Err(PipelineError::Validation(R::KIND));
        }

        let summary = self.transformer.summarize(cleaned);
        info!(
            date = %date,
            kind = %summary.kind,
            records = summary.records,
            first = ?summary.first,
            last = ?summary.last,
            min = ?summary.min,
            mean = ?summary.mean,
            max = ?summary.max,
            categories = ?summary.categories,
            "Batch ready"
        );
        Ok(())
    }

    /// Release storage resources. Always call this, also after a failed or interrupted run.
    pub async fn cleanup(&mut self) {
        self.writer.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::country;
    use crate::models::records::{BalancingReserveRecord, DayAheadPriceRecord};
    use crate::services::storage::Persistable;
    use crate::services::transformer::Transformer;
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    /// Two hours of reserves and prices for any requested date
    #[derive(Default)]
    struct FakeSource {
        fetches: AtomicUsize,
        fail_on: Option<NaiveDate>,
        negative_prices: bool,
    }

    #[async_trait]
    impl MarketDataSource for FakeSource {
        async fn fetch_balancing_reserves(
            &self,
            date: NaiveDate,
        ) -> Result<Vec<BalancingReserveRecord>, ClientError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_on == Some(date) {
                return Err(ClientError::Api {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }

            Ok((0..2)
                .map(|hour| BalancingReserveRecord {
                    country_code: Some("DE".to_string()),
                    datetime_utc: Some(Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap()).fixed_offset()),
                    reserve_type: Some("Primary Reserve".to_string()),
                    amount_mw: Some(100.0 + hour as f64),
                    price_eur: None,
                    created_at: None,
                })
                .collect())
        }

        async fn fetch_day_ahead_prices(
            &self,
            date: NaiveDate,
        ) -> Result<Vec<DayAheadPriceRecord>, ClientError> {
            let sign = if self.negative_prices { -1.0 } else { 1.0 };
            Ok((0..2)
                .map(|hour| DayAheadPriceRecord {
                    country_code: Some("DE".to_string()),
                    datetime_utc: Some(Utc.from_utc_datetime(&date.and_hms_opt(hour, 0, 0).unwrap()).fixed_offset()),
                    price_eur_per_mwh: Some(sign * 50.0),
                    created_at: None,
                })
                .collect())
        }
    }

    /// Shifts reserve datetimes on one date off UTC after cleaning
    struct OffsetShiftingTransformer {
        broken: NaiveDate,
    }

    impl RecordTransformer for OffsetShiftingTransformer {
        fn transform_balancing_reserves(&self, rows: &[BalancingReserveRecord]) -> Vec<BalancingReserveRecord> {
            let plus_one = FixedOffset::east_opt(3600).unwrap();
            Transformer
                .transform_balancing_reserves(rows)
                .into_iter()
                .map(|mut row| {
                    if row.datetime_utc.map(|dt| dt.date_naive()) == Some(self.broken) {
                        row.datetime_utc = row.datetime_utc.map(|dt| dt.with_timezone(&plus_one));
                    }
                    row
                })
                .collect()
        }

        fn transform_day_ahead_prices(&self, rows: &[DayAheadPriceRecord]) -> Vec<DayAheadPriceRecord> {
            Transformer.transform_day_ahead_prices(rows)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        unreachable: bool,
        upserts: Vec<(&'static str, usize)>,
        closed: usize,
    }

    #[async_trait]
    impl RecordSink for RecordingSink {
        async fn test_connection(&mut self) -> bool {
            !self.unreachable
        }

        async fn ensure_schema(&mut self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn upsert<R: Persistable>(&mut self, rows: &[R]) -> Result<u64, StorageError> {
            self.upserts.push((R::TABLE, rows.len()));
            Ok(rows.len() as u64)
        }

        async fn get_stats(&mut self) -> StorageStats {
            StorageStats::default()
        }

        async fn close(&mut self) {
            self.closed += 1;
        }
    }

    fn germany() -> Country {
        country::lookup("DE").unwrap()
    }

    #[tokio::test]
    async fn test_validation_failure_only_fails_its_date() {
        let mut pipeline = EtlPipeline::new(
            FakeSource::default(),
            OffsetShiftingTransformer { broken: date(2) },
            RecordingSink::default(),
            germany(),
        );

        let report = pipeline.run_historical(date(1), date(3)).await.unwrap();
        pipeline.cleanup().await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.success_count(), 2);
        assert_eq!(report.error_count(), 1);
        assert!(!report.is_success());
        assert_eq!(report.failed_dates(), vec![date(2)]);
        assert!(report.outcomes[1].error.as_deref().unwrap().contains("validation"));

        // Dates 1 and 3 stored both kinds, date 2 stored nothing
        assert_eq!(pipeline.writer().upserts.len(), 4);
        assert_eq!(pipeline.writer().closed, 1);
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal_and_cleanup_still_runs() {
        let mut pipeline = EtlPipeline::new(
            FakeSource::default(),
            Transformer,
            RecordingSink {
                unreachable: true,
                ..Default::default()
            },
            germany(),
        );

        let result = pipeline.run_daily(date(1)).await;
        pipeline.cleanup().await;

        assert!(matches!(result, Err(PipelineError::ConnectionFailed)));
        assert_eq!(pipeline.source.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.writer().closed, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_stop_the_range() {
        let mut pipeline = EtlPipeline::new(
            FakeSource {
                fail_on: Some(date(1)),
                ..Default::default()
            },
            Transformer,
            RecordingSink::default(),
            germany(),
        );

        let report = pipeline.run_historical(date(1), date(2)).await.unwrap();

        assert_eq!(report.success_count(), 1);
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("HTTP 503"));
        assert_eq!(report.outcomes[1].reserves_loaded, 2);
        assert_eq!(report.outcomes[1].prices_loaded, 2);
    }

    #[tokio::test]
    async fn test_fully_dropped_batch_fails_the_date() {
        let mut pipeline = EtlPipeline::new(
            FakeSource {
                negative_prices: true,
                ..Default::default()
            },
            Transformer,
            RecordingSink::default(),
            germany(),
        );

        let report = pipeline.run_daily(date(5)).await.unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failed_dates(), vec![date(5)]);
        let error = report.outcomes[0].error.as_deref().unwrap();
        assert_eq!(error, PipelineError::Validation(DataKind::DayAheadPrices).to_string());
        // Validation runs before any upsert, so the reserves are not stored either
        assert!(pipeline.writer().upserts.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_range_is_rejected_before_any_io() {
        let mut pipeline = EtlPipeline::new(
            FakeSource::default(),
            Transformer,
            RecordingSink::default(),
            germany(),
        );

        let result = pipeline.run_historical(date(3), date(1)).await;
        assert!(matches!(result, Err(PipelineError::InvalidRange { .. })));
        assert_eq!(pipeline.source.fetches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        assert_eq!(date_range(date(30), date(30)).unwrap(), vec![date(30)]);

        let span = date_range(NaiveDate::from_ymd_opt(2024, 2, 27).unwrap(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).unwrap();
        assert_eq!(span.len(), 4);
        assert_eq!(span[2], NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        assert_eq!(RunMode::Daily(date(9)).dates().unwrap(), vec![date(9)]);
    }
}
