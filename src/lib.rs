pub mod config;
pub mod decode;
pub mod driver;
pub mod error;
pub mod join;
pub mod records;
pub mod topology;
pub mod transform;

pub use rdkafka::message::Timestamp;

/// A single record moving through the pipeline: what was read from a
/// source topic, or what a transform wants published to a sink topic.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: Timestamp,
}

impl Message {
    /// A record as a transform emits it: not yet assigned a partition
    /// or offset by the broker.
    pub fn for_topic(topic: &str, key: Option<Vec<u8>>, payload: Vec<u8>) -> Message {
        Message {
            topic: topic.to_string(),
            key,
            payload: Some(payload),
            partition: -1,
            offset: -1,
            timestamp: Timestamp::NotAvailable,
        }
    }
}

/// Test and demo helper.
pub fn new_message(topic: &str, payload: &str) -> Message {
    Message {
        topic: topic.to_string(),
        key: None,
        payload: Some(payload.as_bytes().to_vec()),
        partition: 0,
        offset: 0,
        timestamp: Timestamp::NotAvailable,
    }
}
