//! Wiring between source topics, a transform and the sink topic.

use std::time::Duration;

use crate::config::JobConfig;
use crate::join::JoinBuffer;
use crate::transform::{CustomerRiskJoin, RiskScoreTransform, Transform};
use crate::Message;

pub struct Topology {
    sources: Vec<String>,
    sink: String,
    transform: Box<dyn Transform>,
}

impl Topology {
    pub fn new(sources: Vec<String>, sink: &str, transform: Box<dyn Transform>) -> Topology {
        Topology {
            sources,
            sink: sink.to_string(),
            transform,
        }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn sink(&self) -> &str {
        &self.sink
    }

    pub fn apply(&mut self, message: &Message) -> Vec<Message> {
        self.transform.apply(message)
    }

    pub fn flush(&mut self) -> Vec<Message> {
        self.transform.flush()
    }

    /// Lowest source offset still buffered for a partition; the
    /// driver's commit watermark must not pass it.
    pub fn held_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.transform.held_offset(topic, partition)
    }
}

/// stedi-events -> sink, no enrichment.
pub fn pass_through(config: &JobConfig) -> Topology {
    Topology::new(
        vec![config.events_topic.clone()],
        &config.sink_topic,
        Box::new(RiskScoreTransform::new(&config.sink_topic)),
    )
}

/// redis-server + stedi-events -> sink, risk scores enriched with
/// customer email and birth year where the join matches.
pub fn joined(config: &JobConfig) -> Topology {
    let buffer = JoinBuffer::new(Duration::from_secs(config.join_window_secs));
    Topology::new(
        vec![config.customers_topic.clone(), config.events_topic.clone()],
        &config.sink_topic,
        Box::new(CustomerRiskJoin::new(
            &config.customers_topic,
            &config.events_topic,
            &config.sink_topic,
            buffer,
        )),
    )
}
