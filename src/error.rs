use thiserror::Error;

/// Errors that stop the job. Malformed records are not represented
/// here: they are dropped by the decode step and the stream continues.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("driver task failed: {0}")]
    Driver(String),
}
