//! The transform seam between drivers and pipeline logic.
//!
//! A driver feeds source-topic records into a [`Transform`] one at a
//! time and publishes whatever comes back. Per-partition ordering is
//! preserved because `apply` is synchronous and its outputs are
//! produced in return order.

use std::time::Instant;

use crate::join::JoinBuffer;
use crate::records::RiskScore;
use crate::{decode, Message};

pub trait Transform: Send {
    /// Process one source record, returning the records to publish.
    /// A record that does not decode yields an empty vec.
    fn apply(&mut self, message: &Message) -> Vec<Message>;

    /// Drain buffered state on graceful shutdown.
    fn flush(&mut self) -> Vec<Message> {
        Vec::new()
    }

    /// Lowest input offset on the given source partition whose output
    /// is still buffered inside the transform. The driver holds its
    /// commit watermark at this offset so a crash replays the record.
    fn held_offset(&self, _topic: &str, _partition: i32) -> Option<i64> {
        None
    }
}

fn serialize(sink_topic: &str, score: &RiskScore) -> Option<Message> {
    match serde_json::to_vec(score) {
        Ok(payload) => Some(Message::for_topic(
            sink_topic,
            Some(score.customer.clone().into_bytes()),
            payload,
        )),
        Err(e) => {
            // our own struct, should never happen
            log::error!("failed to serialize risk score: {}", e);
            None
        }
    }
}

/// Pass-through transform: `stedi-events` in, the same customer, score
/// and riskDate out on the sink topic.
pub struct RiskScoreTransform {
    sink_topic: String,
}

impl RiskScoreTransform {
    pub fn new(sink_topic: &str) -> RiskScoreTransform {
        RiskScoreTransform {
            sink_topic: sink_topic.to_string(),
        }
    }
}

impl Transform for RiskScoreTransform {
    fn apply(&mut self, message: &Message) -> Vec<Message> {
        let payload = match message.payload.as_deref() {
            Some(payload) => payload,
            None => return Vec::new(),
        };

        decode::risk_event(payload)
            .map(RiskScore::from_event)
            .and_then(|score| serialize(&self.sink_topic, &score))
            .into_iter()
            .collect()
    }
}

/// Stream-stream join: `redis-server` feeds the customer side,
/// `stedi-events` the risk side, matched on exact email equality.
/// A risk event whose customer never shows up inside the join window
/// is still published, just without enrichment.
pub struct CustomerRiskJoin {
    customers_topic: String,
    events_topic: String,
    sink_topic: String,
    buffer: JoinBuffer,
    clock: Box<dyn Fn() -> Instant + Send>,
}

impl CustomerRiskJoin {
    pub fn new(
        customers_topic: &str,
        events_topic: &str,
        sink_topic: &str,
        buffer: JoinBuffer,
    ) -> CustomerRiskJoin {
        CustomerRiskJoin {
            customers_topic: customers_topic.to_string(),
            events_topic: events_topic.to_string(),
            sink_topic: sink_topic.to_string(),
            buffer,
            clock: Box::new(Instant::now),
        }
    }

    /// Replace the wall clock, for exercising window expiry.
    pub fn with_clock(mut self, clock: impl Fn() -> Instant + Send + 'static) -> CustomerRiskJoin {
        self.clock = Box::new(clock);
        self
    }

    fn collect(&self, scores: Vec<RiskScore>) -> Vec<Message> {
        scores
            .iter()
            .filter_map(|score| serialize(&self.sink_topic, score))
            .collect()
    }
}

impl Transform for CustomerRiskJoin {
    fn apply(&mut self, message: &Message) -> Vec<Message> {
        let payload = match message.payload.as_deref() {
            Some(payload) => payload,
            None => return Vec::new(),
        };

        let now = (self.clock)();
        let mut scores: Vec<RiskScore> = self
            .buffer
            .evict(now)
            .into_iter()
            .map(RiskScore::from_event)
            .collect();

        if message.topic == self.customers_topic {
            if let Some(customer) = decode::customer_from_redis(payload) {
                for (event, matched) in self.buffer.push_customer(customer, now) {
                    scores.push(RiskScore::enriched(event, &matched));
                }
            }
        } else if let Some(event) = decode::risk_event(payload) {
            if let Some((event, matched)) =
                self.buffer
                    .push_risk(event, message.partition, message.offset, now)
            {
                scores.push(RiskScore::enriched(event, &matched));
            }
        }

        self.collect(scores)
    }

    fn flush(&mut self) -> Vec<Message> {
        let pending = self.buffer.pending_len();
        if pending > 0 {
            log::info!("flushing {} unmatched risk events", pending);
        }

        let scores: Vec<RiskScore> = self
            .buffer
            .drain_pending()
            .into_iter()
            .map(RiskScore::from_event)
            .collect();
        self.collect(scores)
    }

    fn held_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        if topic == self.events_topic {
            self.buffer.held_offset(partition)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_message;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const EVENT: &str =
        r#"{"customer":"Jason.Mitra@test.com","score":7.0,"riskDate":"2020-09-14T07:54:06.417Z"}"#;

    // {"customerName":"Jason Mitra","email":"Jason.Mitra@test.com",
    //  "phone":"8015551212","birthDay":"1996-01-03"}
    const JASON_B64: &str = "eyJjdXN0b21lck5hbWUiOiJKYXNvbiBNaXRyYSIsImVtYWlsIjoiSmFzb24uTWl0cmFAdGVzdC5jb20iLCJwaG9uZSI6IjgwMTU1NTEyMTIiLCJiaXJ0aERheSI6IjE5OTYtMDEtMDMifQ==";

    fn redis_message(element: &str) -> Message {
        new_message(
            "redis-server",
            &format!(
                r#"{{"key":"Q3VzdG9tZXI=","existType":"NONE","ch":false,"incr":false,"zSetEntries":[{{"element":"{}","score":0.0}}]}}"#,
                element
            ),
        )
    }

    fn joined() -> CustomerRiskJoin {
        CustomerRiskJoin::new(
            "redis-server",
            "stedi-events",
            "stedi-risk-score",
            JoinBuffer::new(Duration::from_secs(60)),
        )
    }

    fn output_score(message: &Message) -> RiskScore {
        serde_json::from_slice(message.payload.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn pass_through_preserves_fields() {
        let mut transform = RiskScoreTransform::new("stedi-risk-score");
        let out = transform.apply(&new_message("stedi-events", EVENT));

        assert_eq!(1, out.len());
        assert_eq!("stedi-risk-score", out[0].topic);

        let score = output_score(&out[0]);
        assert_eq!("Jason.Mitra@test.com", score.customer);
        assert_eq!(7.0, score.score);
        assert_eq!("2020-09-14T07:54:06.417Z", score.risk_date);
        assert_eq!(None, score.email);
    }

    #[test]
    fn pass_through_drops_malformed_input() {
        let mut transform = RiskScoreTransform::new("stedi-risk-score");
        assert!(transform.apply(&new_message("stedi-events", "not-json")).is_empty());
    }

    #[test]
    fn output_is_keyed_by_customer() {
        let mut transform = RiskScoreTransform::new("stedi-risk-score");
        let out = transform.apply(&new_message("stedi-events", EVENT));
        assert_eq!(
            Some("Jason.Mitra@test.com".as_bytes()),
            out[0].key.as_deref()
        );
    }

    #[test]
    fn join_enriches_when_customer_seen_first() {
        let mut transform = joined();

        assert!(transform.apply(&redis_message(JASON_B64)).is_empty());

        let out = transform.apply(&new_message("stedi-events", EVENT));
        assert_eq!(1, out.len());

        let score = output_score(&out[0]);
        assert_eq!(Some("Jason.Mitra@test.com"), score.email.as_deref());
        assert_eq!(Some("1996"), score.birth_year.as_deref());
    }

    #[test]
    fn join_enriches_when_risk_event_arrives_first() {
        let mut transform = joined();

        assert!(transform.apply(&new_message("stedi-events", EVENT)).is_empty());

        let out = transform.apply(&redis_message(JASON_B64));
        assert_eq!(1, out.len());
        assert_eq!(Some("1996"), output_score(&out[0]).birth_year.as_deref());
    }

    #[test]
    fn join_ignores_non_customer_redis_writes() {
        let mut transform = joined();

        let counter = base64::encode(r#"{"count":42}"#);
        assert!(transform.apply(&redis_message(&counter)).is_empty());
        assert!(transform.apply(&new_message("redis-server", "garbage")).is_empty());
    }

    #[test]
    fn buffered_event_pins_its_partition_watermark() {
        let mut transform = joined();

        let mut event = new_message("stedi-events", EVENT);
        event.partition = 3;
        event.offset = 42;

        assert!(transform.apply(&event).is_empty());
        assert_eq!(Some(42), transform.held_offset("stedi-events", 3));
        assert_eq!(None, transform.held_offset("stedi-events", 0));
        assert_eq!(None, transform.held_offset("redis-server", 3));

        // the match releases the hold
        let out = transform.apply(&redis_message(JASON_B64));
        assert_eq!(1, out.len());
        assert_eq!(None, transform.held_offset("stedi-events", 3));
    }

    #[test]
    fn expired_event_is_published_unenriched_mid_stream() {
        let start = Instant::now();
        let now = Arc::new(Mutex::new(start));
        let tick = now.clone();

        let mut transform = joined().with_clock(move || *tick.lock().unwrap());

        assert!(transform.apply(&new_message("stedi-events", EVENT)).is_empty());

        // window passes with no matching customer; the next record of
        // any shape sweeps the buffer
        *now.lock().unwrap() = start + Duration::from_secs(61);
        let out = transform.apply(&new_message("stedi-events", "not-json"));

        assert_eq!(1, out.len());
        let score = output_score(&out[0]);
        assert_eq!("Jason.Mitra@test.com", score.customer);
        assert_eq!(None, score.email);

        // expiry released the watermark and a late customer no longer matches
        assert_eq!(None, transform.held_offset("stedi-events", 0));
        assert!(transform.apply(&redis_message(JASON_B64)).is_empty());
    }

    #[test]
    fn flush_publishes_unmatched_events_without_enrichment() {
        let mut transform = joined();

        transform.apply(&new_message("stedi-events", EVENT));
        let out = transform.flush();

        assert_eq!(1, out.len());
        let score = output_score(&out[0]);
        assert_eq!("Jason.Mitra@test.com", score.customer);
        assert_eq!(None, score.email);
        assert!(transform.flush().is_empty());

        // nothing buffered, nothing held
        assert_eq!(None, transform.held_offset("stedi-events", 0));
    }

    #[test]
    fn same_partition_order_is_preserved() {
        let mut transform = RiskScoreTransform::new("stedi-risk-score");
        let first = transform.apply(&new_message(
            "stedi-events",
            r#"{"customer":"a@test.com","score":1.0,"riskDate":"2020-09-14T07:00:00.000Z"}"#,
        ));
        let second = transform.apply(&new_message(
            "stedi-events",
            r#"{"customer":"a@test.com","score":2.0,"riskDate":"2020-09-14T08:00:00.000Z"}"#,
        ));

        assert_eq!(1.0, output_score(&first[0]).score);
        assert_eq!(2.0, output_score(&second[0]).score);
    }
}
