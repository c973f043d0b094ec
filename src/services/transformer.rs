//! Cleaning, deduplication and validation of raw record batches.
//!
//! Transforms never touch their input; they build a new cleaned batch whose
//! datetimes are UTC, whose rows satisfy the value invariants of their kind
//! and which holds at most one row per natural key (the last one seen).

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::records::{BalancingReserveRecord, CanonicalRecord, DataKind, DayAheadPriceRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub kind: DataKind,
    pub records: usize,
    pub first: Option<DateTime<FixedOffset>>,
    pub last: Option<DateTime<FixedOffset>>,
    /// Distinct reserve types, empty for prices
    pub categories: Vec<String>,
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub max: Option<f64>,
}

/// Seam between the orchestrator and the cleaning stage
pub trait RecordTransformer: Send + Sync {
    fn transform_balancing_reserves(&self, rows: &[BalancingReserveRecord]) -> Vec<BalancingReserveRecord>;

    fn transform_day_ahead_prices(&self, rows: &[DayAheadPriceRecord]) -> Vec<DayAheadPriceRecord>;

    fn validate<R: CanonicalRecord>(&self, rows: &[R]) -> bool {
        validate(rows)
    }

    fn summarize<R: CanonicalRecord>(&self, rows: &[R]) -> BatchSummary {
        summarize(rows)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }
}

impl RecordTransformer for Transformer {
    fn transform_balancing_reserves(&self, rows: &[BalancingReserveRecord]) -> Vec<BalancingReserveRecord> {
        if rows.is_empty() {
            warn!("No balancing reserve rows to transform");
            return Vec::new();
        }

        let cleaned: Vec<BalancingReserveRecord> = rows
            .iter()
            .map(|row| BalancingReserveRecord {
                country_code: row.country_code.clone(),
                datetime_utc: row.datetime_utc.map(to_utc),
                reserve_type: row.reserve_type.clone(),
                amount_mw: finite(row.amount_mw),
                price_eur: finite(row.price_eur),
                created_at: row.created_at,
            })
            .filter(|row| {
                row.country_code.is_some()
                    && row.datetime_utc.is_some()
                    && row.reserve_type.is_some()
                    && row.amount_mw.is_some_and(|amount| amount > 0.0)
            })
            .collect();

        let result = finish(cleaned, |row| {
            (row.country_code.clone(), row.datetime_utc, row.reserve_type.clone())
        }, |row, now| row.created_at = Some(now));

        debug!(input = rows.len(), output = result.len(), "Transformed balancing reserves");
        result
    }

    fn transform_day_ahead_prices(&self, rows: &[DayAheadPriceRecord]) -> Vec<DayAheadPriceRecord> {
        if rows.is_empty() {
            warn!("No day-ahead price rows to transform");
            return Vec::new();
        }

        let cleaned: Vec<DayAheadPriceRecord> = rows
            .iter()
            .map(|row| DayAheadPriceRecord {
                country_code: row.country_code.clone(),
                datetime_utc: row.datetime_utc.map(to_utc),
                price_eur_per_mwh: finite(row.price_eur_per_mwh),
                created_at: row.created_at,
            })
            .filter(|row| {
                row.country_code.is_some()
                    && row.datetime_utc.is_some()
                    && row.price_eur_per_mwh.is_some_and(|price| price >= 0.0)
            })
            .collect();

        let result = finish(cleaned, |row| (row.country_code.clone(), row.datetime_utc), |row, now| {
            row.created_at = Some(now)
        });

        debug!(input = rows.len(), output = result.len(), "Transformed day-ahead prices");
        result
    }
}

/// Check a cleaned batch before it is persisted. Never panics or errors, only reports.
pub fn validate<R: CanonicalRecord>(rows: &[R]) -> bool {
    if rows.is_empty() {
        warn!(kind = %R::KIND, "Validation failed: batch is empty");
        return false;
    }

    for (index, row) in rows.iter().enumerate() {
        if let Some(column) = row.missing_column() {
            warn!(kind = %R::KIND, row = index, column, "Validation failed: missing required column");
            return false;
        }

        if let Some(datetime) = row.datetime_utc() {
            if datetime.offset().local_minus_utc() != 0 {
                warn!(kind = %R::KIND, row = index, %datetime, "Validation failed: datetime is not UTC");
                return false;
            }
        }
    }

    true
}

/// Count, time span, categories and min/mean/max of the measured value
pub fn summarize<R: CanonicalRecord>(rows: &[R]) -> BatchSummary {
    let datetimes = rows.iter().filter_map(|row| row.datetime_utc());
    let values: Vec<f64> = rows.iter().filter_map(|row| row.measure()).collect();

    let mut categories: Vec<String> = rows
        .iter()
        .filter_map(|row| row.category())
        .map(str::to_string)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    categories.sort();

    let mean = if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    };

    BatchSummary {
        kind: R::KIND,
        records: rows.len(),
        first: datetimes.clone().min(),
        last: datetimes.max(),
        categories,
        min: values.iter().copied().reduce(f64::min),
        mean,
        max: values.iter().copied().reduce(f64::max),
    }
}

fn to_utc(datetime: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    datetime.with_timezone(&Utc).fixed_offset()
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Keep the last row per key, stamp `created_at` and sort by datetime (stable)
fn finish<R, K, KeyFn, StampFn>(rows: Vec<R>, key: KeyFn, stamp: StampFn) -> Vec<R>
where
    R: CanonicalRecord,
    K: Eq + std::hash::Hash,
    KeyFn: Fn(&R) -> K,
    StampFn: Fn(&mut R, DateTime<Utc>),
{
    let mut seen = HashSet::new();
    let mut kept: Vec<R> = rows.into_iter().rev().filter(|row| seen.insert(key(row))).collect();
    kept.reverse();

    let now = Utc::now();
    for row in kept.iter_mut() {
        stamp(row, now);
    }

    kept.sort_by_key(|row| row.datetime_utc());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap().fixed_offset()
    }

    fn reserve(hour: u32, reserve_type: &str, amount: Option<f64>) -> BalancingReserveRecord {
        BalancingReserveRecord {
            country_code: Some("DE".to_string()),
            datetime_utc: Some(at(hour)),
            reserve_type: Some(reserve_type.to_string()),
            amount_mw: amount,
            price_eur: None,
            created_at: None,
        }
    }

    fn price(hour: u32, value: Option<f64>) -> DayAheadPriceRecord {
        DayAheadPriceRecord {
            country_code: Some("DE".to_string()),
            datetime_utc: Some(at(hour)),
            price_eur_per_mwh: value,
            created_at: None,
        }
    }

    #[test]
    fn test_dedup_keeps_later_row() {
        let rows = vec![
            reserve(0, "Primary Reserve", Some(100.0)),
            reserve(1, "Primary Reserve", Some(50.0)),
            reserve(0, "Primary Reserve", Some(120.0)),
        ];

        let cleaned = Transformer.transform_balancing_reserves(&rows);

        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].datetime_utc, Some(at(0)));
        assert_eq!(cleaned[0].amount_mw, Some(120.0));
        assert!(cleaned.iter().all(|row| row.created_at.is_some()));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let rows = vec![reserve(0, "Primary Reserve", Some(1.0))];
        let before = rows.clone();
        let _ = Transformer.transform_balancing_reserves(&rows);
        assert_eq!(rows, before);
    }

    #[test]
    fn test_reserves_drop_invalid_rows() {
        let mut missing_type = reserve(3, "x", Some(5.0));
        missing_type.reserve_type = None;
        let mut missing_country = reserve(4, "Primary Reserve", Some(5.0));
        missing_country.country_code = None;

        let rows = vec![
            reserve(0, "Primary Reserve", Some(0.0)),
            reserve(1, "Primary Reserve", Some(-3.0)),
            reserve(2, "Primary Reserve", None),
            missing_type,
            missing_country,
            reserve(5, "Primary Reserve", Some(f64::NAN)),
            reserve(6, "Secondary Reserve", Some(7.5)),
        ];

        let cleaned = Transformer.transform_balancing_reserves(&rows);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].reserve_type.as_deref(), Some("Secondary Reserve"));
    }

    #[test]
    fn test_same_time_different_types_are_kept() {
        let rows = vec![
            reserve(0, "Primary Reserve", Some(1.0)),
            reserve(0, "Secondary Reserve", Some(2.0)),
        ];
        assert_eq!(Transformer.transform_balancing_reserves(&rows).len(), 2);
    }

    #[test]
    fn test_negative_price_is_dropped() {
        let rows = vec![price(0, Some(45.1)), price(1, Some(-5.0)), price(2, None), price(3, Some(0.0))];

        let cleaned = Transformer.transform_day_ahead_prices(&rows);

        let hours: Vec<_> = cleaned.iter().map(|row| row.datetime_utc.unwrap()).collect();
        assert_eq!(hours, vec![at(0), at(3)]);
    }

    #[test]
    fn test_transform_is_idempotent() {
        let rows = vec![
            reserve(2, "Primary Reserve", Some(3.0)),
            reserve(0, "Primary Reserve", Some(1.0)),
            reserve(0, "Primary Reserve", Some(2.0)),
            reserve(1, "Tertiary Reserve", Some(-1.0)),
        ];

        let strip = |rows: Vec<BalancingReserveRecord>| -> Vec<BalancingReserveRecord> {
            rows.into_iter().map(|row| BalancingReserveRecord { created_at: None, ..row }).collect()
        };

        let once = Transformer.transform_balancing_reserves(&rows);
        let twice = Transformer.transform_balancing_reserves(&once);

        assert_eq!(once.len(), 2);
        assert_eq!(strip(once), strip(twice));
    }

    #[test]
    fn test_offsets_are_normalised_to_utc() {
        let berlin = FixedOffset::east_opt(3600).unwrap();
        let mut row = price(0, Some(10.0));
        row.datetime_utc = Some(berlin.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());

        let cleaned = Transformer.transform_day_ahead_prices(&[row]);

        let datetime = cleaned[0].datetime_utc.unwrap();
        assert_eq!(datetime.offset().local_minus_utc(), 0);
        assert_eq!(datetime, at(0));
        assert!(validate(&cleaned));
    }

    #[test]
    fn test_validate_rejects_non_utc_offset() {
        let mut cleaned = Transformer.transform_day_ahead_prices(&[price(0, Some(1.0)), price(1, Some(2.0))]);
        assert!(Transformer.validate(&cleaned));

        let plus_one = FixedOffset::east_opt(3600).unwrap();
        cleaned[1].datetime_utc = cleaned[1].datetime_utc.map(|dt| dt.with_timezone(&plus_one));
        assert!(!Transformer.validate(&cleaned));
    }

    #[test]
    fn test_validate_rejects_missing_columns_and_empty() {
        let raw = vec![reserve(0, "Primary Reserve", Some(1.0))];
        assert!(!validate(&raw), "created_at is required");
        assert!(!validate::<DayAheadPriceRecord>(&[]));
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert!(Transformer.transform_balancing_reserves(&[]).is_empty());
        assert!(Transformer.transform_day_ahead_prices(&[]).is_empty());
    }

    #[test]
    fn test_summarize() {
        let cleaned = Transformer.transform_balancing_reserves(&[
            reserve(1, "Secondary Reserve", Some(30.0)),
            reserve(0, "Primary Reserve", Some(10.0)),
            reserve(2, "Primary Reserve", Some(20.0)),
        ]);

        let summary = Transformer.summarize(&cleaned);

        assert_eq!(summary.kind, DataKind::BalancingReserves);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.first, Some(at(0)));
        assert_eq!(summary.last, Some(at(2)));
        assert_eq!(summary.categories, vec!["Primary Reserve", "Secondary Reserve"]);
        assert_eq!(summary.min, Some(10.0));
        assert_eq!(summary.mean, Some(20.0));
        assert_eq!(summary.max, Some(30.0));

        let empty = Transformer.summarize::<DayAheadPriceRecord>(&[]);
        assert_eq!(empty.records, 0);
        assert_eq!(empty.mean, None);
    }
}
