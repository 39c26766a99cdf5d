// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Consumer side of the message-channel example: installs the topology,
//! subscribes a logging handler to the configured queue, and runs until
//! interrupted. Ctrl-C triggers a graceful unsubscribe so the in-flight
//! delivery settles before the process exits.

use async_trait::async_trait;
use message_channel::{
    config::{self, Settings},
    connection::ConnectionManager,
    dispatcher::AmqpDispatcher,
    errors::AmqpError,
    handler::{ConsumerHandler, ConsumerMessage, Disposition},
    logging,
    queue::QueueDefinition,
    topology::{AmqpTopology, Topology},
};
use opentelemetry::Context;
use std::{process::ExitCode, sync::Arc};
use tracing::{error, info};

/// Logs each received payload and acknowledges it.
struct Receiver;

#[async_trait]
impl ConsumerHandler for Receiver {
    async fn exec(&self, _ctx: &Context, msg: &ConsumerMessage) -> Result<Disposition, AmqpError> {
        info!("Received <{}>", String::from_utf8_lossy(&msg.payload));
        Ok(Disposition::Ack)
    }
}

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
            error!(error = err.to_string(), "consumer failed");
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
    let dispatcher = Arc::new(AmqpDispatcher::new(channel, cfg));

    let mut queue_def = QueueDefinition::new(&cfg.channel.queue);
    if cfg.channel.durable {
        queue_def = queue_def.durable();
    }

    let handle = dispatcher.subscribe(queue_def, Arc::new(Receiver)).await?;

    {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                if let Err(err) = dispatcher.unsubscribe(handle).await {
                    error!(error = err.to_string(), "error during shutdown");
                }
            }
        });
    }

    info!("Waiting for messages...");
    dispatcher.consume_blocking().await
}
