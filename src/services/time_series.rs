//! Time-series extraction and point decoding for `Publication_MarketDocument` trees.

use chrono::{DateTime, FixedOffset, TimeDelta};
use serde_json::Value;

const ROOT: &str = "Publication_MarketDocument";
const ACKNOWLEDGEMENT_ROOT: &str = "Acknowledgement_MarketDocument";

/// Business type codes of balancing reserve products
pub const RESERVE_TYPES: &[(&str, &str)] = &[
    ("A95", "Primary Reserve"),
    ("A96", "Secondary Reserve"),
    ("A97", "Tertiary Reserve"),
    ("A98", "Manual Frequency Restoration Reserve"),
    ("A99", "Automatic Frequency Restoration Reserve"),
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPoint {
    pub position: Option<String>,
    pub quantity: Option<String>,
    pub price_amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Period {
    /// `timeInterval.start` as served, e.g. `2024-01-01T00:00Z`
    pub start: Option<String>,
    pub points: Vec<RawPoint>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeSeries {
    pub business_type: Option<String>,
    pub periods: Vec<Period>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedPoint {
    pub datetime: DateTime<FixedOffset>,
    pub value: Option<f64>,
}

/// Map a business type code to its reserve label; unknown codes pass through unchanged
pub fn map_reserve_type(code: &str) -> String {
    RESERVE_TYPES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| code.to_string())
}

/// The source format collapses a single child into a bare value. Always hand back a sequence.
pub fn as_sequence(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

fn text_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Object(map) => match map.get("#text") {
            Some(Value::String(text)) => Some(text.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn read_point(value: &Value) -> Option<RawPoint> {
    let point = value.as_object()?;
    Some(RawPoint {
        position: text_of(point.get("position")),
        quantity: text_of(point.get("quantity")),
        price_amount: text_of(point.get("price.amount")),
    })
}

fn read_period(value: &Value) -> Option<Period> {
    let period = value.as_object()?;
    let start = period
        .get("timeInterval")
        .and_then(|interval| text_of(interval.get("start")));

    let points = as_sequence(period.get("Point"))
        .into_iter()
        .filter_map(|point| {
            let parsed = read_point(point);
            if parsed.is_none() {
                tracing::warn!("Skipping malformed Point element: {}", point);
            }
            parsed
        })
        .collect();

    Some(Period { start, points })
}

/// Pull the logical series out of a parsed document.
///
/// Structural problems (wrong root, missing container, non-object series) are logged
/// and yield fewer or no series; they never fail the caller.
pub fn extract_time_series(document: &Value) -> Vec<TimeSeries> {
    let Some(root) = document.get(ROOT) else {
        if let Some(ack) = document.get(ACKNOWLEDGEMENT_ROOT) {
            let reason = ack
                .get("Reason")
                .and_then(|reason| text_of(reason.get("text")))
                .unwrap_or_else(|| "no reason given".to_string());
            tracing::warn!("API acknowledged request without data: {}", reason);
        } else {
            tracing::warn!("Response is not a {} document", ROOT);
        }
        return Vec::new();
    };

    if !root.is_object() {
        tracing::warn!("{} has unexpected shape, no series extracted", ROOT);
        return Vec::new();
    }

    let series: Vec<TimeSeries> = as_sequence(root.get("TimeSeries"))
        .into_iter()
        .filter_map(|value| {
            let Some(series) = value.as_object() else {
                tracing::warn!("Skipping TimeSeries with unexpected shape");
                return None;
            };

            let periods = as_sequence(series.get("Period"))
                .into_iter()
                .filter_map(read_period)
                .collect();

            Some(TimeSeries {
                business_type: text_of(series.get("businessType")),
                periods,
            })
        })
        .collect();

    tracing::debug!("Extracted {} time series", series.len());
    series
}

/// Lenient numeric parsing: empty, unparsable or non-finite input becomes `None`
pub fn safe_float(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Parse a period start such as `2024-01-01T00:00Z` or `2024-01-01T00:00:00+01:00`
pub fn parse_start_instant(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    let normalized = match raw.strip_suffix('Z') {
        Some(stripped) => format!("{}+00:00", stripped),
        None => raw.to_string(),
    };

    DateTime::parse_from_rfc3339(&normalized)
        .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%:z"))
        .ok()
}

/// Decode one point: `start + (position - 1)` hours, whatever the period's resolution.
///
/// A missing or non-integer position (or one below 1) skips the point.
pub fn decode_point(
    raw_position: Option<&str>,
    raw_value: Option<&str>,
    start: DateTime<FixedOffset>,
) -> Option<DecodedPoint> {
    let position = match raw_position.map(|p| p.trim().parse::<i64>()) {
        Some(Ok(position)) if position >= 1 => position,
        _ => {
            tracing::warn!("Skipping point with invalid position {:?}", raw_position);
            return None;
        }
    };

    let offset = TimeDelta::try_hours(position - 1);
    let Some(datetime) = offset.and_then(|offset| start.checked_add_signed(offset)) else {
        tracing::warn!("Skipping point at position {}: timestamp out of range", position);
        return None;
    };

    Some(DecodedPoint {
        datetime,
        value: safe_float(raw_value),
    })
}

/// Decode every point of a period with the value chosen by `value_of`.
/// A period without a usable start instant is skipped as a whole.
pub fn decode_period<F>(period: &Period, value_of: F) -> Vec<(DecodedPoint, &RawPoint)>
where
    F: Fn(&RawPoint) -> Option<&str>,
{
    let Some(raw_start) = period.start.as_deref() else {
        tracing::warn!("Skipping period without timeInterval.start");
        return Vec::new();
    };
    let Some(start) = parse_start_instant(raw_start) else {
        tracing::warn!("Skipping period with unparsable start '{}'", raw_start);
        return Vec::new();
    };

    period
        .points
        .iter()
        .filter_map(|point| {
            decode_point(point.position.as_deref(), value_of(point), start)
                .map(|decoded| (decoded, point))
        })
        .collect()
}
