use serde::{Deserialize, Serialize};

/// A `redis-server` topic value as the Kafka Connect Redis source
/// connector emits it. Only the fields the pipeline reads are bound;
/// the connector also emits a redundant lowercase `zsetEntries` array,
/// which serde ignores along with everything else unknown.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisChangeEvent {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "existType", default)]
    pub exist_type: Option<String>,
    #[serde(default)]
    pub ch: Option<bool>,
    #[serde(default)]
    pub incr: Option<bool>,
    #[serde(rename = "zSetEntries", default)]
    pub z_set_entries: Vec<ZSetEntry>,
}

/// One member of a Redis sorted set. The member score is not used and
/// its encoding varies between connector versions, so it is not bound.
#[derive(Debug, Clone, Deserialize)]
pub struct ZSetEntry {
    pub element: String,
}

/// Customer record stored in the Redis sorted set, base64-wrapped
/// inside a [`ZSetEntry::element`]. All fields are optional: JSON
/// parsing of a non-customer write yields nulls, not an error, and
/// such records are filtered out by the decode step.
#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    #[serde(rename = "customerName", default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(rename = "birthDay", default)]
    pub birth_day: Option<String>,
}

/// A `stedi-events` topic value. `riskDate` is ISO-8601 text and is
/// passed through verbatim; the graph consumer parses it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RiskEvent {
    pub customer: String,
    pub score: f64,
    #[serde(rename = "riskDate")]
    pub risk_date: String,
}

/// Sink-topic value consumed by the STEDI risk graph. Always carries
/// customer, score and riskDate; email and birthYear are present only
/// when the customer join produced a match.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RiskScore {
    pub customer: String,
    pub score: f64,
    #[serde(rename = "riskDate")]
    pub risk_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "birthYear", default, skip_serializing_if = "Option::is_none")]
    pub birth_year: Option<String>,
}

impl RiskScore {
    /// Pass-through output: the risk event unchanged, no enrichment.
    pub fn from_event(event: RiskEvent) -> RiskScore {
        RiskScore {
            customer: event.customer,
            score: event.score,
            risk_date: event.risk_date,
            email: None,
            birth_year: None,
        }
    }

    /// Join output: the risk event enriched with customer identity.
    pub fn enriched(event: RiskEvent, customer: &Customer) -> RiskScore {
        let birth_year = customer
            .birth_day
            .as_deref()
            .and_then(crate::decode::birth_year)
            .map(str::to_string);

        RiskScore {
            customer: event.customer,
            score: event.score,
            risk_date: event.risk_date,
            email: customer.email.clone(),
            birth_year,
        }
    }
}
