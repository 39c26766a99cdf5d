// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! This module provides functionality for publishing messages to broker
//! exchanges with confirmable delivery. With publisher confirms enabled the
//! `publish` call resolves only after the broker acknowledges the message
//! into its store, bounded by the configured timeout; on timeout the
//! delivery outcome is unknown and the caller must treat the publish as
//! non-idempotent. OpenTelemetry trace context is propagated in the message
//! headers.

use crate::{config::ChannelSettings, errors::AmqpError, otel::AmqpTracePropagator};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    publisher_confirm::Confirmation,
    types::{
        AMQPValue, FieldTable, LongInt, LongLongInt, LongString, LongUInt, ShortInt, ShortString,
    },
    BasicProperties, Channel,
};
use opentelemetry::{global, Context};
use serde::Serialize;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use tracing::error;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Typed header values attached to a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValues {
    ShortString(String),
    LongString(String),
    Int(i16),
    LongInt(i32),
    LongLongInt(i64),
    Uint(u32),
    LongUint(u32),
}

/// A message to be published to an exchange.
#[derive(Debug, Clone)]
pub struct PublishMessage {
    pub to: String,
    pub key: Option<String>,
    pub msg_type: Option<String>,
    pub data: Vec<u8>,
    pub content_type: String,
    pub headers: Option<HashMap<String, HeaderValues>>,
}

impl PublishMessage {
    /// Creates a message with a raw payload and the JSON content type.
    pub fn new(exchange: &str, key: &str, data: &[u8]) -> Self {
        Self {
            to: exchange.to_owned(),
            key: Some(key.to_owned()),
            msg_type: None,
            data: data.to_vec(),
            content_type: JSON_CONTENT_TYPE.to_owned(),
            headers: None,
        }
    }

    /// Creates a message by serializing `payload` as JSON.
    pub fn json<T>(exchange: &str, key: &str, payload: &T) -> Result<Self, AmqpError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec(payload).map_err(|_| AmqpError::ParsePayloadError)?;
        Ok(Self::new(exchange, key, &data))
    }

    /// Sets the message type, carried in the message properties.
    pub fn msg_type(mut self, msg_type: &str) -> Self {
        self.msg_type = Some(msg_type.to_owned());
        self
    }

    /// Sets the content type.
    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = content_type.to_owned();
        self
    }

    /// Adds a single header to the message.
    pub fn header(mut self, key: &str, value: HeaderValues) -> Self {
        self.headers
            .get_or_insert_with(HashMap::default)
            .insert(key.to_owned(), value);
        self
    }
}

/// Receipt returned by a successful publish.
///
/// `confirmed` is true when publisher confirms were enabled and the broker
/// acknowledged the message into its store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub confirmed: bool,
}

/// Trait defining the publisher interface.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes a message, returning a receipt on success.
    async fn publish(&self, ctx: &Context, msg: &PublishMessage)
        -> Result<DeliveryReceipt, AmqpError>;
}

/// RabbitMQ implementation of the Publisher trait.
///
/// Owns a dedicated channel. A single channel is not safe for concurrent
/// publishes; callers either serialize their publishes or construct one
/// publisher per worker, each over its own channel.
pub struct AmqpPublisher {
    channel: Arc<Channel>,
    confirms: bool,
    timeout: Duration,
}

impl AmqpPublisher {
    /// Creates a new publisher on the given channel.
    ///
    /// When publisher confirms are enabled in the settings, the channel is
    /// put into confirm mode before the publisher is returned.
    pub async fn new(
        channel: Arc<Channel>,
        cfg: &ChannelSettings,
    ) -> Result<Arc<AmqpPublisher>, AmqpError> {
        if cfg.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|err| {
                    error!(error = err.to_string(), "error to enable publisher confirms");
                    AmqpError::ChannelError
                })?;
        }

        Ok(Arc::new(AmqpPublisher {
            channel,
            confirms: cfg.publisher_confirms,
            timeout: Duration::from_millis(cfg.publish_timeout_ms),
        }))
    }
}

#[async_trait]
impl Publisher for AmqpPublisher {
    /// Publishes a message to the configured exchange and routing key.
    ///
    /// The message is stamped with a fresh message id, and the given
    /// OpenTelemetry context is injected into the headers for distributed
    /// tracing. With confirms enabled the call awaits the broker
    /// acknowledgement up to the configured timeout.
    async fn publish(
        &self,
        ctx: &Context,
        msg: &PublishMessage,
    ) -> Result<DeliveryReceipt, AmqpError> {
        let mut btree = BTreeMap::<ShortString, AMQPValue>::default();

        global::get_text_map_propagator(|propagator| {
            propagator.inject_context(ctx, &mut AmqpTracePropagator::new(&mut btree))
        });

        if let Some(headers) = &msg.headers {
            btree_map(headers, &mut btree);
        }

        let message_id = Uuid::new_v4().to_string();

        let confirm = match self
            .channel
            .basic_publish(
                &msg.to,
                &msg.key.clone().unwrap_or_default(),
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                &msg.data,
                BasicProperties::default()
                    .with_content_type(ShortString::from(msg.content_type.clone()))
                    .with_type(ShortString::from(msg.msg_type.clone().unwrap_or_default()))
                    .with_message_id(ShortString::from(message_id.clone()))
                    .with_headers(FieldTable::from(btree)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                return Err(AmqpError::PublishError);
            }
            Ok(confirm) => confirm,
        };

        if !self.confirms {
            return Ok(DeliveryReceipt {
                message_id,
                confirmed: false,
            });
        }

        let confirmation = match tokio::time::timeout(self.timeout, confirm).await {
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                error!(timeout_ms, "publisher confirm timed out");
                return Err(AmqpError::PublishTimeoutError(timeout_ms));
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), "error awaiting publisher confirm");
                return Err(AmqpError::PublishError);
            }
            Ok(Ok(confirmation)) => confirmation,
        };

        if let Confirmation::Nack(_) = confirmation {
            error!("broker refused the published message");
            return Err(AmqpError::PublishError);
        }

        Ok(DeliveryReceipt {
            message_id,
            confirmed: true,
        })
    }
}

/// Converts the message's typed headers to AMQP field-table values.
fn btree_map(
    hash_map: &HashMap<String, HeaderValues>,
    btree: &mut BTreeMap<ShortString, AMQPValue>,
) {
    for (key, value) in hash_map {
        btree.insert(ShortString::from(key.clone()), amqp_value(value));
    }
}

fn amqp_value(value: &HeaderValues) -> AMQPValue {
    match value {
        HeaderValues::ShortString(v) => AMQPValue::ShortString(ShortString::from(v.clone())),
        HeaderValues::LongString(v) => AMQPValue::LongString(LongString::from(v.clone())),
        HeaderValues::Int(v) => AMQPValue::ShortInt(ShortInt::from(*v)),
        HeaderValues::LongInt(v) => AMQPValue::LongInt(LongInt::from(*v)),
        HeaderValues::LongLongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
        HeaderValues::Uint(v) => AMQPValue::LongUInt(LongUInt::from(*v)),
        HeaderValues::LongUint(v) => AMQPValue::LongUInt(LongUInt::from(*v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Greeting {
        text: String,
    }

    #[test]
    fn json_constructor_serializes_the_payload() {
        let msg = PublishMessage::json(
            "spring-boot-exchange",
            "spring-boot",
            &Greeting {
                text: "Hello from RabbitMQ again!".to_owned(),
            },
        )
        .unwrap();

        assert_eq!(msg.to, "spring-boot-exchange");
        assert_eq!(msg.key.as_deref(), Some("spring-boot"));
        assert_eq!(msg.content_type, JSON_CONTENT_TYPE);
        assert_eq!(msg.data, br#"{"text":"Hello from RabbitMQ again!"}"#);
    }

    #[test]
    fn headers_convert_to_field_table_values() {
        let mut headers = HashMap::new();
        headers.insert("attempt".to_owned(), HeaderValues::LongInt(2));
        headers.insert(
            "origin".to_owned(),
            HeaderValues::LongString("producer".to_owned()),
        );

        let mut btree = BTreeMap::default();
        btree_map(&headers, &mut btree);

        assert_eq!(
            btree.get(&ShortString::from("attempt")),
            Some(&AMQPValue::LongInt(LongInt::from(2)))
        );
        assert_eq!(
            btree.get(&ShortString::from("origin")),
            Some(&AMQPValue::LongString(LongString::from("producer")))
        );
    }

    #[test]
    fn header_builder_accumulates() {
        let msg = PublishMessage::new("spring-boot-exchange", "spring-boot", b"hi")
            .msg_type("greeting")
            .header("attempt", HeaderValues::Int(1))
            .header("origin", HeaderValues::ShortString("producer".to_owned()));

        assert_eq!(msg.msg_type.as_deref(), Some("greeting"));
        assert_eq!(msg.headers.as_ref().map(|h| h.len()), Some(2));
    }
}
