//! Canonical row types flowing from the client through the transformer into storage.
//!
//! Every column is optional while a batch is in flight, the same way a freshly
//! extracted table may carry holes. The transformer drops incomplete rows and
//! `validate` checks the result before anything reaches the writer.

use std::fmt;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    BalancingReserves,
    DayAheadPrices,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::BalancingReserves => "balancing_reserves",
            DataKind::DayAheadPrices => "day_ahead_prices",
        }
    }

    /// ENTSO-E document type requested for this kind
    pub fn document_type(&self) -> &'static str {
        match self {
            DataKind::BalancingReserves => "A73",
            DataKind::DayAheadPrices => "A44",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BalancingReserveRecord {
    pub country_code: Option<String>,
    pub datetime_utc: Option<DateTime<FixedOffset>>,
    pub reserve_type: Option<String>,
    pub amount_mw: Option<f64>,
    pub price_eur: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DayAheadPriceRecord {
    pub country_code: Option<String>,
    pub datetime_utc: Option<DateTime<FixedOffset>>,
    pub price_eur_per_mwh: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Shared view over both row kinds used by validation and summaries
pub trait CanonicalRecord: Clone + Send + Sync {
    const KIND: DataKind;

    fn datetime_utc(&self) -> Option<DateTime<FixedOffset>>;

    /// First required column that is empty on this row
    fn missing_column(&self) -> Option<&'static str>;

    /// The measured value: amount for reserves, price for day-ahead prices
    fn measure(&self) -> Option<f64>;

    fn category(&self) -> Option<&str> {
        None
    }
}

impl CanonicalRecord for BalancingReserveRecord {
    const KIND: DataKind = DataKind::BalancingReserves;

    fn datetime_utc(&self) -> Option<DateTime<FixedOffset>> {
        self.datetime_utc
    }

    fn missing_column(&self) -> Option<&'static str> {
        if self.country_code.is_none() {
            Some("country_code")
        } else if self.datetime_utc.is_none() {
            Some("datetime_utc")
        } else if self.reserve_type.is_none() {
            Some("reserve_type")
        } else if self.amount_mw.is_none() {
            Some("amount_mw")
        } else if self.created_at.is_none() {
            Some("created_at")
        } else {
            None
        }
    }

    fn measure(&self) -> Option<f64> {
        self.amount_mw
    }

    fn category(&self) -> Option<&str> {
        self.reserve_type.as_deref()
    }
}

impl CanonicalRecord for DayAheadPriceRecord {
    const KIND: DataKind = DataKind::DayAheadPrices;

    fn datetime_utc(&self) -> Option<DateTime<FixedOffset>> {
        self.datetime_utc
    }

    fn missing_column(&self) -> Option<&'static str> {
        if self.country_code.is_none() {
            Some("country_code")
        } else if self.datetime_utc.is_none() {
            Some("datetime_utc")
        } else if self.price_eur_per_mwh.is_none() {
            Some("price_eur_per_mwh")
        } else if self.created_at.is_none() {
            Some("created_at")
        } else {
            None
        }
    }

    fn measure(&self) -> Option<f64> {
        self.price_eur_per_mwh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_order() {
        let record = BalancingReserveRecord {
            country_code: Some("DE".to_string()),
            ..Default::default()
        };
        assert_eq!(record.missing_column(), Some("datetime_utc"));

        let price = DayAheadPriceRecord::default();
        assert_eq!(price.missing_column(), Some("country_code"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(DataKind::BalancingReserves.to_string(), "balancing_reserves");
        assert_eq!(DataKind::BalancingReserves.document_type(), "A73");
        assert_eq!(DataKind::DayAheadPrices.document_type(), "A44");
        assert_eq!(BalancingReserveRecord::KIND, DataKind::BalancingReserves);
        assert_eq!(DayAheadPriceRecord::KIND.document_type(), "A44");
    }
}
