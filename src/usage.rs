//! Usage data model - metered entries grouped by service and tagged with a period

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Usage grouped by service name, entries kept in arrival order
pub type UsageMap = BTreeMap<String, Vec<UsageEntry>>;

/// One metered service instance.
///
/// The payload is opaque apart from its price, which is read from
/// `billing.price` (or `rating.price` for rated dataframes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageEntry(pub serde_json::Value);

impl UsageEntry {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// Convenience constructor for an entry carrying only a price
    pub fn priced(price: f64) -> Self {
        Self(serde_json::json!({ "billing": { "price": price } }))
    }

    pub fn price(&self) -> Option<f64> {
        ["billing", "rating"]
            .iter()
            .find_map(|section| self.0.get(section)?.get("price")?.as_f64())
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(deserialize_with = "epoch_seconds")]
    pub begin: i64,
    #[serde(deserialize_with = "epoch_seconds")]
    pub end: i64,
}

/// One batch element: usage collected over a single period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub period: Period,
    #[serde(default)]
    pub usage: UsageMap,
}

impl PeriodRecord {
    pub fn new(begin: i64, end: i64, usage: UsageMap) -> Self {
        Self {
            period: Period { begin, end },
            usage,
        }
    }

    pub fn begin(&self) -> i64 {
        self.period.begin
    }

    /// Sum of every entry price, or the name of the first service holding an unpriced entry
    pub fn price_total(&self) -> Result<f64, String> {
        let mut total = 0.0;
        for (service, entries) in &self.usage {
            for entry in entries {
                total += entry.price().ok_or_else(|| service.clone())?;
            }
        }
        Ok(total)
    }

    /// Parse one JSONL line holding a whole batch
    pub fn batch_from_jsonl(line: &str) -> Result<Vec<PeriodRecord>, serde_json::Error> {
        serde_json::from_str(line)
    }
}

// Rated dataframes carry their boundaries as decimal strings
fn epoch_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(v),
        // Whole seconds only; `i64::MAX as f64` rounds up to 2^63
        Raw::Float(v) if v.fract() == 0.0 && v >= i64::MIN as f64 && v < i64::MAX as f64 => {
            Ok(v as i64)
        }
        Raw::Float(v) => Err(serde::de::Error::custom(format!(
            "timestamp {} is not a whole number of seconds in range",
            v
        ))),
        Raw::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", s, e))),
    }
}
