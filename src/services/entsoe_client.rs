//! HTTP client for the ENTSO-E transparency platform.
//!
//! Requests one calendar day per call, retries the network send with bounded
//! backoff and turns the returned `Publication_MarketDocument` into records.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::models::country::Country;
use crate::models::records::{BalancingReserveRecord, DataKind, DayAheadPriceRecord};
use crate::services::retry::RetryPolicy;
use crate::services::time_series::{decode_period, extract_time_series, map_reserve_type, safe_float};
use crate::services::xml_document::{parse_document, XmlError};

const PERIOD_FORMAT: &str = "%Y%m%d0000";
const MAX_ERROR_BODY: usize = 500;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid response document: {0}")]
    Xml(#[from] XmlError),
    #[error("no request window for {0}")]
    DateOutOfRange(NaiveDate),
}

/// Source of raw market records for one calendar day
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_balancing_reserves(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<BalancingReserveRecord>, ClientError>;

    async fn fetch_day_ahead_prices(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DayAheadPriceRecord>, ClientError>;
}

#[derive(Clone)]
pub struct EntsoeClient {
    client: Client,
    base_url: String,
    api_key: String,
    country: Country,
    retry: RetryPolicy,
}

impl EntsoeClient {
    pub fn new(settings: &Settings, country: Country) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(settings.request_timeout).build()?;

        Ok(Self {
            client,
            base_url: settings.entsoe_base_url.clone(),
            api_key: settings.entsoe_api_key.clone(),
            country,
            retry: RetryPolicy::exponential(settings.max_retries),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Query parameters for one day of `kind`. The window is `[date 00:00, date+1 00:00)`.
    pub fn query_params(
        &self,
        kind: DataKind,
        date: NaiveDate,
    ) -> Result<Vec<(&'static str, String)>, ClientError> {
        let next_day = date.succ_opt().ok_or(ClientError::DateOutOfRange(date))?;

        Ok(vec![
            ("securityToken", self.api_key.clone()),
            ("documentType", kind.document_type().to_string()),
            ("in_Domain", self.country.eic_code.clone()),
            ("out_Domain", self.country.eic_code.clone()),
            ("periodStart", date.format(PERIOD_FORMAT).to_string()),
            ("periodEnd", next_day.format(PERIOD_FORMAT).to_string()),
        ])
    }

    async fn fetch_document(&self, kind: DataKind, date: NaiveDate) -> Result<Value, ClientError> {
        let params = self.query_params(kind, date)?;

        info!(
            document_type = kind.document_type(),
            domain = %self.country.eic_code,
            date = %date,
            "Requesting {} from ENTSO-E",
            kind
        );

        // Errors are stripped of their URL so the security token never reaches the logs
        let response = self
            .retry
            .run(kind.document_type(), || async {
                self.client
                    .get(&self.base_url)
                    .header(ACCEPT, "application/xml")
                    .query(&params)
                    .send()
                    .await
                    .map_err(|e| e.without_url())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let cut = (0..=MAX_ERROR_BODY)
                    .rev()
                    .find(|i| body.is_char_boundary(*i))
                    .unwrap_or(0);
                body.truncate(cut);
            }
            warn!(status = status.as_u16(), date = %date, "ENTSO-E API error for {}", kind);
            return Err(ClientError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| e.without_url())?;
        debug!(bytes = body.len(), "Received {} document", kind);

        Ok(parse_document(&body)?)
    }
}

#[async_trait]
impl MarketDataSource for EntsoeClient {
    async fn fetch_balancing_reserves(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<BalancingReserveRecord>, ClientError> {
        let document = self.fetch_document(DataKind::BalancingReserves, date).await?;
        let records = balancing_reserves_from_document(&document, &self.country.code);

        info!(country = %self.country.code, date = %date, "Fetched {} balancing reserve records", records.len());
        Ok(records)
    }

    async fn fetch_day_ahead_prices(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<DayAheadPriceRecord>, ClientError> {
        let document = self.fetch_document(DataKind::DayAheadPrices, date).await?;
        let records = day_ahead_prices_from_document(&document, &self.country.code);

        info!(country = %self.country.code, date = %date, "Fetched {} day-ahead price records", records.len());
        Ok(records)
    }
}

/// Build reserve records from a parsed A73 document, one per decodable point
pub fn balancing_reserves_from_document(
    document: &Value,
    country_code: &str,
) -> Vec<BalancingReserveRecord> {
    let mut records = Vec::new();

    for series in extract_time_series(document) {
        let reserve_type = series.business_type.as_deref().map(map_reserve_type);

        for period in &series.periods {
            for (decoded, point) in decode_period(period, |p| p.quantity.as_deref()) {
                records.push(BalancingReserveRecord {
                    country_code: Some(country_code.to_string()),
                    datetime_utc: Some(decoded.datetime),
                    reserve_type: reserve_type.clone(),
                    amount_mw: decoded.value,
                    price_eur: safe_float(point.price_amount.as_deref()),
                    created_at: None,
                });
            }
        }
    }

    records
}

/// Build price records from a parsed A44 document
pub fn day_ahead_prices_from_document(
    document: &Value,
    country_code: &str,
) -> Vec<DayAheadPriceRecord> {
    extract_time_series(document)
        .iter()
        .flat_map(|series| series.periods.iter())
        .flat_map(|period| decode_period(period, |p| p.price_amount.as_deref()))
        .map(|(decoded, _)| DayAheadPriceRecord {
            country_code: Some(country_code.to_string()),
            datetime_utc: Some(decoded.datetime),
            price_eur_per_mwh: decoded.value,
            created_at: None,
        })
        .collect()
}
