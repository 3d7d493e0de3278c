//! Runtime configuration from the environment.
//!
//! Defaults match the course compose file: a local broker, the
//! connector's `redis-server` topic, the application's `stedi-events`
//! topic, and a `stedi-risk-score` sink for the graph.

use std::env;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub brokers: String,
    pub group_id: String,
    pub customers_topic: String,
    pub events_topic: String,
    pub sink_topic: String,
    pub join_enabled: bool,
    pub join_window_secs: u64,
}

impl Default for JobConfig {
    fn default() -> JobConfig {
        JobConfig {
            brokers: "localhost:9092".to_string(),
            group_id: "stedi-streams".to_string(),
            customers_topic: "redis-server".to_string(),
            events_topic: "stedi-events".to_string(),
            sink_topic: "stedi-risk-score".to_string(),
            join_enabled: true,
            join_window_secs: 900,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl JobConfig {
    /// Bad values are a startup failure, not something to run through
    /// with defaults.
    pub fn from_env() -> Result<JobConfig, PipelineError> {
        let defaults = JobConfig::default();

        let join_enabled = match var_or("STEDI_JOIN", "true").as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(PipelineError::Config(format!(
                    "STEDI_JOIN must be true or false, got {:?}",
                    other
                )))
            }
        };

        let join_window_secs = var_or("STEDI_JOIN_WINDOW_SECS", "900")
            .parse::<u64>()
            .map_err(|e| {
                PipelineError::Config(format!("STEDI_JOIN_WINDOW_SECS is not a number: {}", e))
            })?;

        Ok(JobConfig {
            brokers: var_or("STEDI_BROKERS", &defaults.brokers),
            group_id: var_or("STEDI_GROUP_ID", &defaults.group_id),
            customers_topic: var_or("STEDI_CUSTOMERS_TOPIC", &defaults.customers_topic),
            events_topic: var_or("STEDI_EVENTS_TOPIC", &defaults.events_topic),
            sink_topic: var_or("STEDI_SINK_TOPIC", &defaults.sink_topic),
            join_enabled,
            join_window_secs,
        })
    }
}
