//! Decode-or-drop steps for both source topics.
//!
//! Every function here returns `Option`: a record that does not decode
//! is dropped and the stream keeps going. Malformed input is expected
//! on `redis-server` (the connector captures every Redis write, not
//! just customer records) and is never an error.

use crate::records::{Customer, RedisChangeEvent, RiskEvent};

/// Extract a customer record from a `redis-server` topic value.
///
/// The value is connector JSON wrapping a sorted-set write; the first
/// zset member holds a base64-encoded customer JSON document. Writes
/// for other Redis keys decode to something without an email or birth
/// day and are dropped here.
pub fn customer_from_redis(payload: &[u8]) -> Option<Customer> {
    let change: RedisChangeEvent = match serde_json::from_slice(payload) {
        Ok(change) => change,
        Err(e) => {
            log::debug!("dropping non-JSON redis-server record: {}", e);
            return None;
        }
    };

    let element = match change.z_set_entries.first() {
        Some(entry) => &entry.element,
        None => {
            log::debug!(
                "dropping redis-server record without zSetEntries (key {:?})",
                change.key
            );
            return None;
        }
    };

    let decoded = match base64::decode(element.trim()) {
        Ok(decoded) => decoded,
        Err(e) => {
            log::warn!("dropping redis-server record with bad base64 element: {}", e);
            return None;
        }
    };

    let customer: Customer = match serde_json::from_slice(&decoded) {
        Ok(customer) => customer,
        Err(e) => {
            log::debug!("dropping zset element that is not customer JSON: {}", e);
            return None;
        }
    };

    // Non-customer writes parse fine but leave every field null.
    if customer.email.is_none() || customer.birth_day.is_none() {
        log::debug!("dropping customer record without email and birthDay");
        return None;
    }

    Some(customer)
}

/// Parse a `stedi-events` topic value. The customer field is the join
/// key and must be non-empty.
pub fn risk_event(payload: &[u8]) -> Option<RiskEvent> {
    let event: RiskEvent = match serde_json::from_slice(payload) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("dropping malformed stedi-events record: {}", e);
            return None;
        }
    };

    if event.customer.is_empty() {
        log::warn!("dropping stedi-events record with empty customer");
        return None;
    }

    Some(event)
}

/// Birth year is the leading component of the dash-separated birth day.
pub fn birth_year(birth_day: &str) -> Option<&str> {
    birth_day.split('-').next().filter(|y| !y.is_empty())
}
