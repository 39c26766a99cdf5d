// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handler Contract
//!
//! This module defines the contract between the dispatcher and application
//! code: the `ConsumerHandler` trait invoked once per delivery, the
//! `ConsumerMessage` it receives, and the `Disposition` it returns to decide
//! the acknowledgement.
//!
//! A delivery is broker-owned until the handler reaches a terminal outcome:
//! `Ack` removes it from the queue for good, the nack dispositions hand it
//! back. A handler that returns an error is treated as a negative
//! acknowledgement; the dispatcher routes it to the retry queue, the DLQ, or
//! back onto the queue depending on the queue definition.

use crate::errors::AmqpError;
use async_trait::async_trait;
use opentelemetry::Context;
use serde::de::DeserializeOwned;

/// Terminal outcome a handler reaches for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge: the message is removed from the queue and never
    /// redelivered.
    Ack,
    /// Negative-acknowledge with requeue: the broker redelivers the message
    /// ahead of newer enqueues.
    Requeue,
    /// Negative-acknowledge without requeue: dead-lettered when the queue
    /// has a DLQ, dropped otherwise. Never redelivered to this queue.
    Discard,
}

/// A message as delivered to a consumer.
///
/// The payload copy is owned by the consumer until the delivery is
/// acknowledged; the delivery tag is the broker-side handle the dispatcher
/// uses to ack or nack on the subscription's channel.
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub queue: String,
    pub msg_type: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

impl ConsumerMessage {
    pub fn new(
        queue: &str,
        msg_type: &str,
        payload: &[u8],
        content_type: &str,
        delivery_tag: u64,
        redelivered: bool,
    ) -> Self {
        Self {
            queue: queue.to_owned(),
            msg_type: msg_type.to_owned(),
            payload: payload.to_vec(),
            content_type: content_type.to_owned(),
            delivery_tag,
            redelivered,
        }
    }

    /// Deserializes the payload as JSON.
    pub fn json<T>(&self) -> Result<T, AmqpError>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.payload).map_err(|_| AmqpError::ParsePayloadError)
    }
}

/// Application callback invoked once per delivered message.
///
/// Invocations for a single subscription are serialized; the next delivery
/// is only dispatched after the previous one reached a terminal outcome.
/// Returning `Err` is treated as a negative acknowledgement with redelivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, ctx: &Context, msg: &ConsumerMessage) -> Result<Disposition, AmqpError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Greeting {
        text: String,
    }

    #[test]
    fn json_payloads_deserialize() {
        let msg = ConsumerMessage::new(
            "spring-boot",
            "greeting",
            br#"{"text":"Hello from RabbitMQ again!"}"#,
            "application/json",
            1,
            false,
        );

        let greeting: Greeting = msg.json().unwrap();
        assert_eq!(greeting.text, "Hello from RabbitMQ again!");
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let msg = ConsumerMessage::new("spring-boot", "", b"not json", "text/plain", 1, false);

        let parsed: Result<Greeting, _> = msg.json();
        assert_eq!(parsed.unwrap_err(), AmqpError::ParsePayloadError);
    }

    #[tokio::test]
    async fn mocked_handlers_run_behind_the_trait_object() {
        let mut mock = MockConsumerHandler::new();
        mock.expect_exec().returning(|_, _| Ok(Disposition::Ack));

        let handler: Arc<dyn ConsumerHandler> = Arc::new(mock);
        let msg = ConsumerMessage::new("spring-boot", "", b"payload", "text/plain", 7, false);

        let outcome = handler.exec(&Context::current(), &msg).await.unwrap();
        assert_eq!(outcome, Disposition::Ack);
    }
}
