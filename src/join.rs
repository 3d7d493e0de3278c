//! Keyed stream-stream join state.
//!
//! Customers and risk events arrive on independent topics with no
//! ordering between them, so either side may show up first. The buffer
//! keeps the latest customer per email and any risk events still
//! waiting for one. Entries older than the window are evicted on the
//! next insert; an evicted risk event is surrendered to the caller so
//! it can still be published un-enriched.
//!
//! A buffered risk event has produced no output yet, so its source
//! offset must not be committed. Each pending entry remembers where it
//! came from and [`JoinBuffer::held_offset`] reports the lowest such
//! offset per partition, letting the driver hold its commit watermark
//! until the event is matched, evicted or flushed.
//!
//! A buffer instance is owned by a single transform and mutated only by
//! the thread processing its partitions, so there is no locking here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::records::{Customer, RiskEvent};

struct PendingRisk {
    event: RiskEvent,
    seen: Instant,
    partition: i32,
    offset: i64,
}

pub struct JoinBuffer {
    window: Duration,
    customers: HashMap<String, (Customer, Instant)>,
    pending: HashMap<String, Vec<PendingRisk>>,
}

impl JoinBuffer {
    pub fn new(window: Duration) -> JoinBuffer {
        JoinBuffer {
            window,
            customers: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Record a customer sighting. Returns the risk events that were
    /// waiting for this customer, now matched, in arrival order.
    pub fn push_customer(&mut self, customer: Customer, now: Instant) -> Vec<(RiskEvent, Customer)> {
        let email = match customer.email.clone() {
            Some(email) => email,
            None => return Vec::new(),
        };

        let matched = self
            .pending
            .remove(&email)
            .unwrap_or_default()
            .into_iter()
            .map(|pending| (pending.event, customer.clone()))
            .collect();

        // Latest write wins, matching Redis sorted-set semantics.
        self.customers.insert(email, (customer, now));
        matched
    }

    /// Record a risk event read from `partition` at `offset`. If the
    /// customer is already known the match is returned immediately;
    /// otherwise the event is buffered and its offset held.
    pub fn push_risk(
        &mut self,
        event: RiskEvent,
        partition: i32,
        offset: i64,
        now: Instant,
    ) -> Option<(RiskEvent, Customer)> {
        if let Some((customer, _)) = self.customers.get(&event.customer) {
            return Some((event, customer.clone()));
        }

        self.pending
            .entry(event.customer.clone())
            .or_default()
            .push(PendingRisk {
                event,
                seen: now,
                partition,
                offset,
            });
        None
    }

    /// Drop state older than the window. Expired customers vanish;
    /// expired risk events are returned for un-enriched publication.
    pub fn evict(&mut self, now: Instant) -> Vec<RiskEvent> {
        let window = self.window;
        self.customers
            .retain(|_, (_, seen)| now.duration_since(*seen) < window);

        let mut expired = Vec::new();
        self.pending.retain(|_, events| {
            let (keep, evicted): (Vec<_>, Vec<_>) = events
                .drain(..)
                .partition(|pending| now.duration_since(pending.seen) < window);
            expired.extend(evicted.into_iter().map(|pending| pending.event));
            *events = keep;
            !events.is_empty()
        });
        expired
    }

    /// Surrender every still-unmatched risk event, oldest first per
    /// key. Called on shutdown so buffered scores are not lost.
    pub fn drain_pending(&mut self) -> Vec<RiskEvent> {
        let mut remaining: Vec<PendingRisk> =
            self.pending.drain().flat_map(|(_, events)| events).collect();
        remaining.sort_by_key(|pending| pending.seen);
        self.customers.clear();
        remaining.into_iter().map(|pending| pending.event).collect()
    }

    /// Lowest source offset of a still-buffered risk event on the
    /// given partition. The driver must not commit past it.
    pub fn held_offset(&self, partition: i32) -> Option<i64> {
        self.pending
            .values()
            .flatten()
            .filter(|pending| pending.partition == partition)
            .map(|pending| pending.offset)
            .min()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(email: &str) -> Customer {
        Customer {
            customer_name: Some("Sam Test".to_string()),
            email: Some(email.to_string()),
            phone: None,
            birth_day: Some("2001-01-03".to_string()),
        }
    }

    fn risk(customer: &str, score: f64) -> RiskEvent {
        RiskEvent {
            customer: customer.to_string(),
            score,
            risk_date: "2020-09-14T07:54:06.417Z".to_string(),
        }
    }

    #[test]
    fn customer_first_then_risk_matches_immediately() {
        let mut buffer = JoinBuffer::new(Duration::from_secs(60));
        let now = Instant::now();

        assert!(buffer.push_customer(customer("a@test.com"), now).is_empty());
        let (event, matched) = buffer.push_risk(risk("a@test.com", 3.0), 0, 1, now).unwrap();

        assert_eq!("a@test.com", event.customer);
        assert_eq!(Some("a@test.com"), matched.email.as_deref());
        assert_eq!(0, buffer.pending_len());
        assert_eq!(None, buffer.held_offset(0));
    }

    #[test]
    fn risk_first_is_buffered_until_customer_arrives() {
        let mut buffer = JoinBuffer::new(Duration::from_secs(60));
        let now = Instant::now();

        assert!(buffer.push_risk(risk("a@test.com", 3.0), 0, 1, now).is_none());
        assert!(buffer.push_risk(risk("a@test.com", 5.0), 0, 2, now).is_none());
        assert_eq!(2, buffer.pending_len());

        let matched = buffer.push_customer(customer("a@test.com"), now);
        assert_eq!(2, matched.len());
        // arrival order preserved
        assert_eq!(3.0, matched[0].0.score);
        assert_eq!(5.0, matched[1].0.score);
        assert_eq!(0, buffer.pending_len());
    }

    #[test]
    fn buffered_events_hold_their_source_offsets() {
        let mut buffer = JoinBuffer::new(Duration::from_secs(60));
        let now = Instant::now();

        buffer.push_risk(risk("a@test.com", 1.0), 0, 7, now);
        buffer.push_risk(risk("b@test.com", 2.0), 0, 9, now);
        buffer.push_risk(risk("c@test.com", 3.0), 2, 4, now);

        // lowest per partition
        assert_eq!(Some(7), buffer.held_offset(0));
        assert_eq!(Some(4), buffer.held_offset(2));
        assert_eq!(None, buffer.held_offset(1));

        // matching releases the hold
        buffer.push_customer(customer("a@test.com"), now);
        assert_eq!(Some(9), buffer.held_offset(0));
    }

    #[test]
    fn eviction_returns_expired_risk_events() {
        let mut buffer = JoinBuffer::new(Duration::from_secs(60));
        let start = Instant::now();

        buffer.push_risk(risk("a@test.com", 1.0), 0, 1, start);
        buffer.push_customer(customer("b@test.com"), start);

        let later = start + Duration::from_secs(61);
        buffer.push_risk(risk("c@test.com", 2.0), 0, 2, later);

        let expired = buffer.evict(later);
        assert_eq!(1, expired.len());
        assert_eq!("a@test.com", expired[0].customer);
        assert_eq!(1, buffer.pending_len());

        // the expired event no longer pins the commit watermark
        assert_eq!(Some(2), buffer.held_offset(0));

        // expired customer is gone too
        assert!(buffer.push_risk(risk("b@test.com", 9.0), 0, 3, later).is_none());
    }

    #[test]
    fn drain_surrenders_everything_in_arrival_order() {
        let mut buffer = JoinBuffer::new(Duration::from_secs(60));
        let start = Instant::now();

        buffer.push_risk(risk("a@test.com", 1.0), 0, 1, start);
        buffer.push_risk(risk("b@test.com", 2.0), 0, 2, start + Duration::from_secs(1));

        let drained = buffer.drain_pending();
        assert_eq!(2, drained.len());
        assert_eq!("a@test.com", drained[0].customer);
        assert_eq!("b@test.com", drained[1].customer);
        assert_eq!(0, buffer.pending_len());
        assert_eq!(None, buffer.held_offset(0));
    }

    #[test]
    fn latest_customer_write_wins() {
        let mut buffer = JoinBuffer::new(Duration::from_secs(60));
        let now = Instant::now();

        let mut updated = customer("a@test.com");
        updated.birth_day = Some("1999-06-01".to_string());

        buffer.push_customer(customer("a@test.com"), now);
        buffer.push_customer(updated, now);

        let (_, matched) = buffer.push_risk(risk("a@test.com", 4.0), 0, 1, now).unwrap();
        assert_eq!(Some("1999-06-01"), matched.birth_day.as_deref());
    }
}
