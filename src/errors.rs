// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Messaging Client
//!
//! This module provides the error taxonomy for broker operations. The
//! `AmqpError` enum covers connection, channel, topology, publishing and
//! consuming failures. Reconnection and channel re-open are handled
//! internally by the connection manager; every other failure propagates to
//! the caller as one of these typed variants.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Connection failures are retried internally with backoff and only surface
/// once the configured retry budget is exhausted. Topology conflicts are
/// configuration bugs and surface immediately. Publish failures are never
/// auto-retried; the caller decides whether a resend is safe.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the broker after exhausting retries
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// A queue or exchange was redeclared with different parameters
    #[error("topology conflict for `{0}`: {1}")]
    TopologyConflictError(String, String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishError,

    /// The broker confirm did not arrive within the configured timeout.
    /// The delivery outcome is unknown; the caller must treat the publish
    /// as non-idempotent.
    #[error("publish confirm not received within {0}ms")]
    PublishTimeoutError(u64),

    /// Error subscribing a consumer to the given queue
    #[error("failure to subscribe to queue `{0}`")]
    SubscribeError(String),

    /// Error parsing a message payload
    #[error("failure to parse payload")]
    ParsePayloadError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message to the Dead Letter Queue (DLQ)
    #[error("failure to publish to dlq")]
    PublishingToDlqError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}
