// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Topology Management
//!
//! This module provides functionality for defining and installing broker
//! topology: exchanges, queues, and the bindings between them, including
//! Dead Letter Queues and retry queues.
//!
//! Declaration is idempotent. The declarator records everything it has
//! declared; installing the same definition again is a no-op, while
//! installing a definition whose parameters differ from the recorded ones
//! fails with `TopologyConflictError` before any broker call. A conflicting
//! declaration the broker itself rejects (PRECONDITION_FAILED) maps to the
//! same error and leaves broker state unchanged.
//!
//! The main components are:
//! - `Topology` trait: interface for collecting definitions and installing
//! - `AmqpTopology`: implementation of the trait for RabbitMQ

use crate::{
    config::ChannelSettings,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, LongString, ShortString},
    Channel,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};
use tracing::{debug, error};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// A resource the declarator has already installed, with the parameters it
/// was installed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Declared {
    Exchange(ExchangeDefinition),
    Queue(QueueDefinition),
}

/// Outcome of checking a definition against the declaration registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// Not declared yet, go ahead
    New,
    /// Declared with identical parameters, skip
    Unchanged,
    /// Declared with different parameters, fail without touching the broker
    Conflict,
}

pub(crate) fn check_exchange(
    declared: &HashMap<String, Declared>,
    def: &ExchangeDefinition,
) -> Registration {
    match declared.get(def.name()) {
        None => Registration::New,
        Some(Declared::Exchange(existing)) if existing == def => Registration::Unchanged,
        Some(_) => Registration::Conflict,
    }
}

pub(crate) fn check_queue(
    declared: &HashMap<String, Declared>,
    def: &QueueDefinition,
) -> Registration {
    match declared.get(def.name()) {
        None => Registration::New,
        Some(Declared::Queue(existing)) if existing == def => Registration::Unchanged,
        Some(_) => Registration::Conflict,
    }
}

/// Whether a broker error is a PRECONDITION_FAILED answer, i.e. the resource
/// already exists with different parameters.
fn is_precondition_failed(err: &lapin::Error) -> bool {
    err.to_string().to_uppercase().contains("PRECONDITION")
}

/// Trait defining the interface for topology management.
///
/// This trait provides builder-style methods for registering exchanges,
/// queues, and bindings, and a method to install the collected topology on
/// the broker. Installation must succeed before the publisher or consumer
/// use the same topology.
#[async_trait]
pub trait Topology {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: ExchangeDefinition) -> Self;

    /// Adds a queue definition to the topology.
    fn queue(self, def: QueueDefinition) -> Self;

    /// Adds a queue-to-exchange binding to the topology.
    fn queue_binding(self, binding: QueueBinding) -> Self;

    /// Installs the topology on the broker.
    ///
    /// This creates all the exchanges and queues, and sets up all the
    /// bindings. Calling it twice with the same definitions succeeds both
    /// times and only declares once.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Topology trait.
///
/// Maintains collections of exchanges, queues, and bindings, plus the
/// registry of what has already been declared through this instance.
pub struct AmqpTopology {
    channel: Arc<Channel>,
    pub(crate) queues: HashMap<String, QueueDefinition>,
    pub(crate) queues_binding: Vec<QueueBinding>,
    pub(crate) exchanges: Vec<ExchangeDefinition>,
    declared: Mutex<HashMap<String, Declared>>,
}

impl AmqpTopology {
    /// Creates a new AmqpTopology instance on the given channel.
    pub fn new(channel: Arc<Channel>) -> AmqpTopology {
        AmqpTopology {
            channel,
            queues: HashMap::default(),
            queues_binding: vec![],
            exchanges: vec![],
            declared: Mutex::new(HashMap::default()),
        }
    }

    /// Registers the message-channel topology described by the channel
    /// settings: a topic exchange, a queue, and a binding between them with
    /// the configured routing key.
    pub fn message_channel(self, cfg: &ChannelSettings) -> Self {
        let mut exchange = ExchangeDefinition::new(&cfg.exchange).topic();
        let mut queue = QueueDefinition::new(&cfg.queue);
        if cfg.durable {
            exchange = exchange.durable();
            queue = queue.durable();
        }

        let binding = QueueBinding::new(&cfg.queue)
            .exchange(&cfg.exchange)
            .routing_key(&cfg.routing_key);

        self.exchange(exchange).queue(queue).queue_binding(binding)
    }
}

#[async_trait]
impl Topology for AmqpTopology {
    fn exchange(mut self, def: ExchangeDefinition) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: QueueDefinition) -> Self {
        self.queues.insert(def.name().to_owned(), def);
        self
    }

    fn queue_binding(mut self, binding: QueueBinding) -> Self {
        self.queues_binding.push(binding);
        self
    }

    /// Installs the topology on the broker.
    ///
    /// This method performs the following operations in order:
    /// 1. Creates all exchanges
    /// 2. Creates all queues (including DLQs and retry queues if configured)
    /// 3. Sets up queue-to-exchange bindings
    async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchange().await?;
        self.install_queue().await?;
        self.binding_queues().await
    }
}

impl AmqpTopology {
    /// Creates all exchanges defined in the topology.
    async fn install_exchange(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            match check_exchange(&self.declared.lock().unwrap(), exch) {
                Registration::Unchanged => {
                    debug!("exchange: {} already declared, skipping", exch.name());
                    continue;
                }
                Registration::Conflict => {
                    error!(name = exch.name(), "conflicting exchange redeclaration");
                    return Err(AmqpError::TopologyConflictError(
                        exch.name().to_owned(),
                        "exchange already declared with different parameters".to_owned(),
                    ));
                }
                Registration::New => {}
            }

            debug!("creating exchange: {}", exch.name());

            match self
                .channel
                .exchange_declare(
                    exch.name(),
                    exch.kind.clone().into(),
                    ExchangeDeclareOptions {
                        passive: exch.passive,
                        durable: exch.durable,
                        auto_delete: exch.delete,
                        internal: exch.internal,
                        nowait: exch.no_wait,
                    },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) if is_precondition_failed(&err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name(),
                        "exchange exists with different parameters"
                    );
                    Err(AmqpError::TopologyConflictError(
                        exch.name().to_owned(),
                        err.to_string(),
                    ))
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        name = exch.name(),
                        "error to declare the exchange"
                    );
                    Err(AmqpError::DeclareExchangeError(exch.name().to_owned()))
                }
                _ => Ok(()),
            }?;

            self.declared
                .lock()
                .unwrap()
                .insert(exch.name().to_owned(), Declared::Exchange(exch.clone()));

            debug!("exchange: {} was created", exch.name());
        }

        Ok(())
    }

    /// Creates all queues defined in the topology.
    ///
    /// This includes creating any associated DLQs and retry queues.
    async fn install_queue(&self) -> Result<(), AmqpError> {
        for (name, def) in &self.queues {
            match check_queue(&self.declared.lock().unwrap(), def) {
                Registration::Unchanged => {
                    debug!("queue: {} already declared, skipping", name);
                    continue;
                }
                Registration::Conflict => {
                    error!(name = name.as_str(), "conflicting queue redeclaration");
                    return Err(AmqpError::TopologyConflictError(
                        name.to_owned(),
                        "queue already declared with different parameters".to_owned(),
                    ));
                }
                Registration::New => {}
            }

            debug!("creating queue: {}", name);

            let mut queue_args = BTreeMap::new();

            if def.retry_name.is_some() {
                self.declare_retry(def, &mut queue_args).await?;
            }

            if def.dlq_name.is_some() {
                self.declare_dlq(def, &mut queue_args).await?;
            }

            if let Some(ttl) = def.ttl {
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                    AMQPValue::LongInt(LongInt::from(ttl)),
                );
            }

            if let Some(max_length) = def.max_length {
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                    AMQPValue::LongInt(LongInt::from(max_length)),
                );
            }

            if let Some(max_length_bytes) = def.max_length_bytes {
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
                    AMQPValue::LongInt(LongInt::from(max_length_bytes)),
                );
            }

            match self
                .channel
                .queue_declare(
                    name,
                    QueueDeclareOptions {
                        passive: def.passive,
                        durable: def.durable,
                        exclusive: def.exclusive,
                        auto_delete: def.delete,
                        nowait: def.no_wait,
                    },
                    FieldTable::from(queue_args),
                )
                .await
            {
                Err(err) if is_precondition_failed(&err) => {
                    error!(
                        error = err.to_string(),
                        name = name.as_str(),
                        "queue exists with different parameters"
                    );
                    Err(AmqpError::TopologyConflictError(
                        name.to_owned(),
                        err.to_string(),
                    ))
                }
                Err(err) => {
                    error!(error = err.to_string(), "error to declare the queue");
                    Err(AmqpError::DeclareQueueError(name.to_owned()))
                }
                _ => {
                    debug!("queue: {} was created", name);
                    Ok(())
                }
            }?;

            self.declared
                .lock()
                .unwrap()
                .insert(name.to_owned(), Declared::Queue(def.clone()));
        }

        Ok(())
    }

    /// Creates a retry queue for the specified queue.
    ///
    /// A retry queue holds failed messages temporarily before redelivering
    /// them to the original queue after the configured delay. The main
    /// queue's arguments are updated to dead-letter into the retry queue.
    async fn declare_retry(
        &self,
        def: &QueueDefinition,
        queue_args: &mut BTreeMap<ShortString, AMQPValue>,
    ) -> Result<(), AmqpError> {
        let mut args = BTreeMap::new();

        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from("")),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(def.name.clone())),
        );
        args.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongInt(LongInt::from(def.retry_ttl.unwrap_or(0))),
        );

        let retry_name = def.retry_name.clone().unwrap_or_default();

        match self
            .channel
            .queue_declare(
                &retry_name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                FieldTable::from(args),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to declare retry queue");
                Err(AmqpError::DeclareQueueError(retry_name))
            }
            _ => {
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                    AMQPValue::LongString(LongString::from("")),
                );
                queue_args.insert(
                    ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                    AMQPValue::LongString(LongString::from(retry_name)),
                );
                Ok(())
            }
        }
    }

    /// Creates a Dead Letter Queue for the specified queue.
    ///
    /// The DLQ receives messages that are discarded or that exhaust their
    /// retry budget. When no retry queue exists, the main queue dead-letters
    /// straight into the DLQ.
    async fn declare_dlq(
        &self,
        def: &QueueDefinition,
        queue_args: &mut BTreeMap<ShortString, AMQPValue>,
    ) -> Result<(), AmqpError> {
        let dlq_name = def.dlq_name.clone().unwrap_or_default();

        match self
            .channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to declare dlq");
                Err(AmqpError::DeclareQueueError(dlq_name))
            }
            _ => {
                if def.retry_name.is_none() {
                    queue_args.insert(
                        ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                        AMQPValue::LongString(LongString::from("")),
                    );
                    queue_args.insert(
                        ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                        AMQPValue::LongString(LongString::from(dlq_name)),
                    );
                }
                Ok(())
            }
        }
    }

    /// Sets up queue-to-exchange bindings.
    async fn binding_queues(&self) -> Result<(), AmqpError> {
        for binding in &self.queues_binding {
            debug!(
                "binding queue: {} to the exchange: {} with the key: {}",
                binding.queue_name, binding.exchange_name, binding.routing_key
            );

            match self
                .channel
                .queue_bind(
                    &binding.queue_name,
                    &binding.exchange_name,
                    &binding.routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
            {
                Err(err) => {
                    error!(error = err.to_string(), "error to bind queue to exchange");

                    Err(AmqpError::BindingExchangeToQueueError(
                        binding.exchange_name.to_owned(),
                        binding.queue_name.to_owned(),
                    ))
                }
                _ => Ok(()),
            }?;
        }

        debug!("queues were bound");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_declaration_is_new() {
        let declared = HashMap::new();
        let queue = QueueDefinition::new("spring-boot");

        assert_eq!(check_queue(&declared, &queue), Registration::New);
    }

    #[test]
    fn identical_redeclaration_is_a_noop() {
        let queue = QueueDefinition::new("spring-boot");
        let mut declared = HashMap::new();
        declared.insert("spring-boot".to_owned(), Declared::Queue(queue.clone()));

        assert_eq!(check_queue(&declared, &queue), Registration::Unchanged);
    }

    #[test]
    fn durability_flip_is_a_conflict() {
        let queue = QueueDefinition::new("spring-boot");
        let mut declared = HashMap::new();
        declared.insert("spring-boot".to_owned(), Declared::Queue(queue));

        let durable = QueueDefinition::new("spring-boot").durable();
        assert_eq!(check_queue(&declared, &durable), Registration::Conflict);
    }

    #[test]
    fn queue_and_exchange_sharing_a_name_conflict() {
        let mut declared = HashMap::new();
        declared.insert(
            "spring-boot".to_owned(),
            Declared::Queue(QueueDefinition::new("spring-boot")),
        );

        let exchange = ExchangeDefinition::new("spring-boot");
        assert_eq!(check_exchange(&declared, &exchange), Registration::Conflict);
    }

    #[test]
    fn identical_exchange_redeclaration_is_a_noop() {
        let exchange = ExchangeDefinition::new("spring-boot-exchange");
        let mut declared = HashMap::new();
        declared.insert(
            "spring-boot-exchange".to_owned(),
            Declared::Exchange(exchange.clone()),
        );

        assert_eq!(check_exchange(&declared, &exchange), Registration::Unchanged);
        assert_eq!(
            check_exchange(&declared, &exchange.clone().durable()),
            Registration::Conflict
        );
    }
}
