// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! This module implements the core per-delivery logic: invoke the
//! subscription's handler, then settle the delivery according to the
//! handler's outcome. A successful outcome acks or nacks explicitly; a
//! handler error is treated as a negative acknowledgement and routed to the
//! retry queue while attempts remain, to the DLQ once they are exhausted,
//! and back onto the queue when neither is configured. With auto-ack
//! enabled (opt-in) the broker already considers the delivery settled, so
//! failures are only logged.

use crate::{
    config::AckMode,
    dispatcher::SubscriptionDefinition,
    errors::AmqpError,
    handler::{ConsumerMessage, Disposition},
    otel,
    publisher::JSON_CONTENT_TYPE,
    queue::QueueDefinition,
};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicNackOptions, BasicPublishOptions},
    protocol::basic::AMQPProperties,
    types::FieldTable,
    Channel,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, error, warn};

/// Constant for the x-death header used in the broker's dead-lettering
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the count field in the x-death header
pub const AMQP_HEADERS_COUNT: &str = "count";

/// How to settle a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
    /// Nack without requeue so the queue dead-letters into the retry queue
    Retry,
    /// Retry budget exhausted: publish to the DLQ and ack the original
    DeadLetterPublish,
    /// Nack without requeue: the broker dead-letters or drops it
    Drop,
    /// Nack with requeue: redelivered ahead of newer enqueues
    Requeue,
}

/// Picks the failure route for a queue definition and the delivery's
/// dead-letter count.
pub(crate) fn failure_action(def: &QueueDefinition, count: i64) -> FailureAction {
    if let Some(retries) = def.retries {
        if count < retries as i64 {
            FailureAction::Retry
        } else if def.dlq_name.is_some() {
            FailureAction::DeadLetterPublish
        } else {
            FailureAction::Drop
        }
    } else if def.dlq_name.is_some() {
        FailureAction::Drop
    } else {
        FailureAction::Requeue
    }
}

/// Consumes and processes one delivery.
///
/// This function is the core of the message consumption process. It:
/// 1. Extracts the message type and dead-letter count from the headers
/// 2. Creates a trace span for distributed tracing
/// 3. Invokes the subscription's handler with the message
/// 4. Settles the delivery according to the handler's outcome
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    delivery: &Delivery,
    def: &SubscriptionDefinition,
    channel: Arc<Channel>,
) -> Result<(), AmqpError> {
    let (msg_type, count) = extract_header_properties(&delivery.properties);

    let (ctx, mut span) = otel::new_span(&delivery.properties, tracer, &msg_type);

    debug!(
        "received: {} - exchange: {}",
        msg_type,
        delivery.exchange.to_string(),
    );

    let content_type = delivery
        .properties
        .content_type()
        .clone()
        .map(|v| v.to_string())
        .unwrap_or_else(|| JSON_CONTENT_TYPE.to_owned());

    let msg = ConsumerMessage::new(
        def.queue_def.name(),
        &msg_type,
        &delivery.data,
        &content_type,
        delivery.delivery_tag,
        delivery.redelivered,
    );

    let outcome = def.handler.exec(&ctx, &msg).await;

    if def.ack_mode == AckMode::Auto {
        return match outcome {
            Ok(_) => {
                span.set_status(Status::Ok);
                Ok(())
            }
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    "handler failure with auto-ack, delivery is lost"
                );
                span.record_error(&err);
                span.set_status(Status::Error {
                    description: Cow::from("handler failure with auto-ack"),
                });
                Ok(())
            }
        };
    }

    let err = match outcome {
        Ok(Disposition::Ack) => {
            debug!("message successfully processed");
            return match delivery.ack(BasicAckOptions { multiple: false }).await {
                Err(e) => {
                    error!("error whiling ack msg");
                    span.record_error(&e);
                    span.set_status(Status::Error {
                        description: Cow::from("error to ack msg"),
                    });
                    Err(AmqpError::AckMessageError)
                }
                _ => {
                    span.set_status(Status::Ok);
                    Ok(())
                }
            };
        }
        Ok(Disposition::Requeue) => {
            debug!("handler asked for redelivery");
            return match delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
            {
                Err(e) => {
                    error!("error whiling nack msg");
                    span.record_error(&e);
                    span.set_status(Status::Error {
                        description: Cow::from("error to nack msg"),
                    });
                    Err(AmqpError::NackMessageError)
                }
                _ => {
                    span.set_status(Status::Ok);
                    Ok(())
                }
            };
        }
        Ok(Disposition::Discard) => {
            debug!("handler discarded the message");
            return match delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
            {
                Err(e) => {
                    error!("error whiling nack msg");
                    span.record_error(&e);
                    span.set_status(Status::Error {
                        description: Cow::from("error to nack msg"),
                    });
                    Err(AmqpError::NackMessageError)
                }
                _ => {
                    span.set_status(Status::Ok);
                    Ok(())
                }
            };
        }
        Err(err) => err,
    };

    span.record_error(&err);

    match failure_action(&def.queue_def, count) {
        // Park the delivery in the retry queue until the retry TTL expires
        FailureAction::Retry => {
            warn!("error whiling handling msg, requeuing for latter");
            match delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: false,
                })
                .await
            {
                Ok(_) => Ok(()),
                Err(e) => {
                    error!("error whiling requeuing");
                    span.record_error(&e);
                    span.set_status(Status::Error {
                        description: Cow::from("error to requeuing msg"),
                    });
                    Err(AmqpError::NackMessageError)
                }
            }
        }

        // Retry budget exhausted, move the message to the DLQ
        FailureAction::DeadLetterPublish => {
            error!("too many attempts, sending to dlq");

            match channel
                .basic_publish(
                    "",
                    &def.queue_def.dlq_name.clone().unwrap_or_default(),
                    BasicPublishOptions::default(),
                    &delivery.data,
                    delivery.properties.clone(),
                )
                .await
            {
                Err(e) => {
                    error!("error whiling sending to dlq");
                    span.record_error(&e);
                    span.set_status(Status::Error {
                        description: Cow::from("error to publish to dlq"),
                    });

                    Err(AmqpError::PublishingToDlqError)
                }
                _ => match delivery.ack(BasicAckOptions { multiple: false }).await {
                    Err(e) => {
                        error!("error whiling ack msg sent to dlq");
                        span.record_error(&e);
                        span.set_status(Status::Error {
                            description: Cow::from("msg was sent to dlq"),
                        });

                        Err(AmqpError::AckMessageError)
                    }
                    _ => Ok(()),
                },
            }
        }

        // The queue dead-letters the message itself, or drops it
        FailureAction::Drop => match delivery
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                error!("error whiling nack msg");
                span.record_error(&e);
                span.set_status(Status::Error {
                    description: Cow::from("error to nack msg"),
                });
                Err(AmqpError::NackMessageError)
            }
        },

        // No retry or DLQ configured: hand the message back for redelivery
        FailureAction::Requeue => {
            warn!("error whiling handling msg, requeuing");
            match delivery
                .nack(BasicNackOptions {
                    multiple: false,
                    requeue: true,
                })
                .await
            {
                Ok(_) => Ok(()),
                Err(e) => {
                    error!("error whiling requeuing");
                    span.record_error(&e);
                    span.set_status(Status::Error {
                        description: Cow::from("error to requeuing msg"),
                    });
                    Err(AmqpError::NackMessageError)
                }
            }
        }
    }
}

/// Extracts the message type and dead-letter count from message properties.
///
/// The count comes from the first entry of the broker-maintained `x-death`
/// header; a message that never died has a count of zero.
fn extract_header_properties(props: &AMQPProperties) -> (String, i64) {
    let headers = match props.headers() {
        Some(val) => val.to_owned(),
        None => FieldTable::default(),
    };

    let count = match headers.inner().get(AMQP_HEADERS_X_DEATH) {
        Some(value) => match value.as_array() {
            Some(arr) => match arr.as_slice().first() {
                Some(value) => match value.as_field_table() {
                    Some(table) => match table.inner().get(AMQP_HEADERS_COUNT) {
                        Some(value) => value.as_long_long_int().unwrap_or_default(),
                        _ => 0,
                    },
                    _ => 0,
                },
                _ => 0,
            },
            _ => 0,
        },
        _ => 0,
    };

    let msg_type = match props.kind() {
        Some(value) => value.to_string(),
        _ => "".to_owned(),
    };

    (msg_type, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::{AMQPValue, FieldArray, LongLongInt, ShortString};
    use lapin::BasicProperties;
    use std::collections::BTreeMap;

    #[test]
    fn failure_routes_to_retry_while_attempts_remain() {
        let def = QueueDefinition::new("spring-boot")
            .with_dlq()
            .with_retry(15_000, 3);

        assert_eq!(failure_action(&def, 0), FailureAction::Retry);
        assert_eq!(failure_action(&def, 2), FailureAction::Retry);
        assert_eq!(failure_action(&def, 3), FailureAction::DeadLetterPublish);
    }

    #[test]
    fn exhausted_retries_without_dlq_drop_the_message() {
        let def = QueueDefinition::new("spring-boot").with_retry(15_000, 1);

        assert_eq!(failure_action(&def, 1), FailureAction::Drop);
    }

    #[test]
    fn dlq_without_retry_dead_letters_immediately() {
        let def = QueueDefinition::new("spring-boot").with_dlq();

        assert_eq!(failure_action(&def, 0), FailureAction::Drop);
    }

    #[test]
    fn bare_queues_requeue_failed_deliveries() {
        let def = QueueDefinition::new("spring-boot");

        assert_eq!(failure_action(&def, 0), FailureAction::Requeue);
    }

    #[test]
    fn header_extraction_reads_type_and_death_count() {
        let mut death = BTreeMap::new();
        death.insert(
            ShortString::from(AMQP_HEADERS_COUNT),
            AMQPValue::LongLongInt(LongLongInt::from(5)),
        );

        let mut headers = BTreeMap::new();
        headers.insert(
            ShortString::from(AMQP_HEADERS_X_DEATH),
            AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::FieldTable(
                FieldTable::from(death),
            )])),
        );

        let props = BasicProperties::default()
            .with_type(ShortString::from("greeting"))
            .with_headers(FieldTable::from(headers));

        assert_eq!(
            extract_header_properties(&props),
            ("greeting".to_owned(), 5)
        );
    }

    #[test]
    fn missing_headers_default_to_zero_deaths() {
        let props = BasicProperties::default();

        assert_eq!(extract_header_properties(&props), ("".to_owned(), 0));
    }
}
