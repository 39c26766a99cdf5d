// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! This module provides types for defining broker queues and their bindings.
//! It includes support for Dead Letter Queues (DLQ) and retry queues, which
//! carry failed deliveries out of the hot path instead of requeueing them
//! forever.

/// Definition of a queue with its configuration parameters.
///
/// This struct implements the builder pattern to create and configure queue
/// definitions. It supports standard queue options as well as message TTL,
/// max length, Dead Letter Queues and a bounded retry mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
    pub(crate) dlq_name: Option<String>,
    pub(crate) retry_name: Option<String>,
    pub(crate) retry_ttl: Option<i32>,
    pub(crate) retries: Option<i32>,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name and standard
    /// settings (non-durable, non-exclusive, no DLQ or retry).
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..QueueDefinition::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the message Time-To-Live for the queue, in milliseconds.
    /// Messages that exceed the TTL are removed or dead-lettered.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Adds a Dead Letter Queue to the queue.
    ///
    /// The DLQ receives messages that are discarded, expired, or that
    /// exhaust their retry budget. The DLQ name is the queue name with a
    /// `-dlq` suffix.
    pub fn with_dlq(mut self) -> Self {
        self.dlq_name = Some(format!("{}-dlq", self.name));
        self
    }

    /// Adds a retry mechanism to the queue.
    ///
    /// Failed deliveries park in a retry queue for `ttl` milliseconds before
    /// being redelivered to the main queue, at most `retries` times. The
    /// retry queue name is the queue name with a `-retry` suffix.
    pub fn with_retry(mut self, ttl: i32, retries: i32) -> Self {
        self.retry_name = Some(format!("{}-retry", self.name));
        self.retries = Some(retries);
        self.retry_ttl = Some(ttl);
        self
    }
}

/// Configuration for binding a queue to an exchange.
///
/// Bindings define how messages flow from exchanges to queues based on a
/// routing key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueBinding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
}

impl QueueBinding {
    /// Creates a new binding for the given queue. The exchange and routing
    /// key start empty and are set with the `exchange` and `routing_key`
    /// methods.
    pub fn new(queue: &str) -> QueueBinding {
        QueueBinding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
        }
    }

    /// Sets the exchange to bind the queue to.
    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    /// Sets the routing key for the binding.
    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_and_retry_names_derive_from_the_queue_name() {
        let def = QueueDefinition::new("spring-boot")
            .with_dlq()
            .with_retry(15_000, 3);

        assert_eq!(def.dlq_name.as_deref(), Some("spring-boot-dlq"));
        assert_eq!(def.retry_name.as_deref(), Some("spring-boot-retry"));
        assert_eq!(def.retry_ttl, Some(15_000));
        assert_eq!(def.retries, Some(3));
    }

    #[test]
    fn binding_builder_sets_all_three_names() {
        let binding = QueueBinding::new("spring-boot")
            .exchange("spring-boot-exchange")
            .routing_key("spring-boot");

        assert_eq!(binding.queue_name, "spring-boot");
        assert_eq!(binding.exchange_name, "spring-boot-exchange");
        assert_eq!(binding.routing_key, "spring-boot");
    }

    #[test]
    fn identical_definitions_compare_equal() {
        let a = QueueDefinition::new("spring-boot");
        let b = QueueDefinition::new("spring-boot");
        let c = QueueDefinition::new("spring-boot").durable();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
