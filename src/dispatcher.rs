// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Dispatcher
//!
//! This module manages consumer subscriptions. Each subscription runs its
//! delivery loop on its own task with a prefetch of one, so handler
//! invocations for a single subscription are serialized and FIFO order is
//! preserved; multiple subscriptions run concurrently and independently.
//!
//! Unsubscribing cancels the broker consumer, waits for the in-flight
//! delivery to reach a terminal acknowledgement within a bounded grace
//! period, then aborts the loop. Anything still unacknowledged at that
//! point is surfaced to the broker as eligible for redelivery.

use crate::{
    config::{AckMode, Settings},
    connection::ReconnectPolicy,
    consumer::consume,
    errors::AmqpError,
    handler::ConsumerHandler,
    queue::QueueDefinition,
};
use futures_util::{future::join_all, StreamExt};
use lapin::{
    options::{BasicCancelOptions, BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel,
};
use opentelemetry::global;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Attempts made to start a consumer before giving up. Transiently missing
/// queues at startup are retried with the reconnect backoff schedule.
const SUBSCRIBE_ATTEMPTS: u32 = 3;

/// Associates a queue with the handler consuming it.
#[derive(Clone)]
pub struct SubscriptionDefinition {
    pub(crate) queue_def: QueueDefinition,
    pub(crate) handler: Arc<dyn ConsumerHandler>,
    pub(crate) ack_mode: AckMode,
}

/// Handle identifying an active subscription, returned by `subscribe` and
/// consumed by `unsubscribe`.
#[derive(Debug)]
pub struct SubscriptionHandle {
    queue: String,
    consumer_tag: String,
}

impl SubscriptionHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }
}

/// Manages consumer subscriptions over one channel.
///
/// The dispatcher owns the channel it consumes on; acknowledgements for all
/// of its subscriptions travel over this channel. Subscriptions can be added
/// and removed while others keep running.
pub struct AmqpDispatcher {
    channel: Arc<Channel>,
    ack_mode: AckMode,
    grace: Duration,
    retry: ReconnectPolicy,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl AmqpDispatcher {
    /// Creates a new dispatcher on the given channel.
    pub fn new(channel: Arc<Channel>, cfg: &Settings) -> Self {
        AmqpDispatcher {
            channel,
            ack_mode: cfg.channel.ack_mode,
            grace: Duration::from_millis(cfg.channel.shutdown_grace_ms),
            retry: ReconnectPolicy::new(&cfg.rabbitmq),
            subscriptions: Mutex::new(HashMap::default()),
        }
    }

    /// Subscribes a handler to a queue.
    ///
    /// Starts a broker consumer with a unique consumer tag and spawns the
    /// delivery loop. The loop invokes the handler once per delivery and
    /// settles each delivery before taking the next one.
    pub async fn subscribe(
        &self,
        queue_def: QueueDefinition,
        handler: Arc<dyn ConsumerHandler>,
    ) -> Result<SubscriptionHandle, AmqpError> {
        let queue = queue_def.name().to_owned();
        let tag = format!("{}-{}", queue, Uuid::new_v4());

        self.channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(queue.clone())
            })?;

        let mut attempts: u32 = 0;
        let mut consumer = loop {
            match self
                .channel
                .basic_consume(
                    &queue,
                    &tag,
                    BasicConsumeOptions {
                        no_local: false,
                        no_ack: self.ack_mode == AckMode::Auto,
                        exclusive: false,
                        nowait: false,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => break consumer,
                Err(err) => {
                    attempts += 1;
                    if attempts >= SUBSCRIBE_ATTEMPTS {
                        error!(error = err.to_string(), "error to create the consumer");
                        return Err(AmqpError::SubscribeError(queue));
                    }

                    let delay = self.retry.delay(attempts);
                    warn!(
                        error = err.to_string(),
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        "failure to create the consumer, retrying"
                    );
                    sleep(delay).await;
                }
            }
        };

        let def = SubscriptionDefinition {
            queue_def,
            handler,
            ack_mode: self.ack_mode,
        };
        let channel = self.channel.clone();
        let loop_tag = tag.clone();

        let task = tokio::spawn(async move {
            let tracer = global::tracer("amqp consumer");

            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        if let Err(err) = consume(&tracer, &delivery, &def, channel.clone()).await {
                            error!(error = err.to_string(), "error consume msg");
                        }
                    }

                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }

            debug!(consumer_tag = loop_tag, "delivery loop finished");
        });

        self.subscriptions.lock().await.insert(tag.clone(), task);

        debug!(
            queue = queue.as_str(),
            consumer_tag = tag.as_str(),
            "subscription started"
        );

        Ok(SubscriptionHandle {
            queue,
            consumer_tag: tag,
        })
    }

    /// Cancels a subscription.
    ///
    /// The broker consumer is cancelled first, so no new deliveries are
    /// dispatched. The in-flight delivery, if any, keeps running until it
    /// reaches a terminal ack state or the grace period expires, at which
    /// point the loop is aborted and the unacknowledged message returns to
    /// the broker.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), AmqpError> {
        self.channel
            .basic_cancel(&handle.consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to cancel the consumer");
                AmqpError::ConsumerError(handle.queue.clone())
            })?;

        let task = self.subscriptions.lock().await.remove(&handle.consumer_tag);

        if let Some(task) = task {
            let abort = task.abort_handle();
            if timeout(self.grace, task).await.is_err() {
                warn!(
                    queue = handle.queue.as_str(),
                    "grace period expired, aborting delivery loop"
                );
                abort.abort();
            }
        }

        debug!(queue = handle.queue.as_str(), "subscription removed");

        Ok(())
    }

    /// Runs until every registered delivery loop finishes.
    ///
    /// Delivery loops only finish when their consumer is cancelled or the
    /// channel closes, so this is the blocking run mode for consumer
    /// processes.
    pub async fn consume_blocking(&self) -> Result<(), AmqpError> {
        let tasks: Vec<JoinHandle<()>> = self
            .subscriptions
            .lock()
            .await
            .drain()
            .map(|(_, task)| task)
            .collect();

        let spawned = join_all(tasks).await;
        for res in spawned {
            if res.is_err() {
                error!("delivery loop panicked");
                return Err(AmqpError::InternalError);
            }
        }

        Ok(())
    }
}
