// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Producer side of the message-channel example: installs the topology and
//! publishes one confirmed message to the configured routing key.

use message_channel::{
    config::{self, Settings},
    connection::ConnectionManager,
    errors::AmqpError,
    logging,
    publisher::{AmqpPublisher, PublishMessage, Publisher},
    topology::{AmqpTopology, Topology},
};
use opentelemetry::Context;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init("info");

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = err.to_string(), "failure to load configuration");
            return ExitCode::FAILURE;
        }
    };

    match run(&cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = err.to_string(), "producer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &Settings) -> Result<(), AmqpError> {
    let manager = ConnectionManager::new(cfg);

    let topology_channel = manager.open_channel().await?;
    AmqpTopology::new(topology_channel)
        .message_channel(&cfg.channel)
        .install()
        .await?;

    let channel = manager.open_channel().await?;
    let publisher = AmqpPublisher::new(channel, &cfg.channel).await?;

    info!("Sending message...");

    let msg = PublishMessage::new(
        &cfg.channel.exchange,
        &cfg.channel.routing_key,
        b"Hello from RabbitMQ again!",
    )
    .content_type("text/plain");

    let receipt = publisher.publish(&Context::current(), &msg).await?;

    info!(
        message_id = receipt.message_id,
        confirmed = receipt.confirmed,
        "message published"
    );

    Ok(())
}
