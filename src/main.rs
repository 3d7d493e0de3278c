use stedi_streams::config::JobConfig;
use stedi_streams::driver::kafka::KafkaDriver;
use stedi_streams::driver::Driver;
use stedi_streams::topology;

use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .parse_env("RUST_LOG")
        .format_timestamp_millis()
        .init();

    let config = JobConfig::from_env()?;
    log::info!(
        "starting stedi-streams against {} (join: {})",
        config.brokers,
        config.join_enabled
    );

    let topology = if config.join_enabled {
        topology::joined(&config)
    } else {
        topology::pass_through(&config)
    };

    let driver = KafkaDriver::start(&config.brokers, &config.group_id, topology)?;

    signal::ctrl_c().await?;

    driver.stop().await?;

    Ok(())
}
