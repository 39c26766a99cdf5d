// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Client Configuration
//!
//! This module defines the configuration surface of the messaging client and
//! loads it from an optional `config/default` file merged with environment
//! variables. Every field has a default, so the client runs against a local
//! broker with no configuration at all. The defaults reproduce the canonical
//! message-channel example: queue `spring-boot` bound to the topic exchange
//! `spring-boot-exchange` with the routing key `spring-boot`.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Acknowledgement mode for consumer subscriptions.
///
/// Explicit ack/nack is the default: a delivery stays broker-owned until the
/// handler reaches a terminal outcome. Auto-ack is opt-in only, since the
/// broker considers an auto-acked message delivered the moment it is pushed
/// and a handler failure silently drops it.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    #[default]
    Explicit,
    Auto,
}

/// Top-level configuration for the messaging client.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub app: AppSettings,
    pub rabbitmq: RabbitMQSettings,
    pub channel: ChannelSettings,
}

/// Application identity, used as the broker connection name.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
}

/// Broker endpoint and reconnection parameters.
///
/// The backoff values are part of the public configuration surface rather
/// than buried client defaults: base delay, cap, and an optional attempt
/// budget (`None` retries forever).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RabbitMQSettings {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub user: String,
    pub password: String,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    pub reconnect_budget: Option<u32>,
}

/// Message-channel topology and delivery parameters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChannelSettings {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub durable: bool,
    pub publisher_confirms: bool,
    pub publish_timeout_ms: u64,
    pub ack_mode: AckMode,
    pub shutdown_grace_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: "message-channel".to_owned(),
        }
    }
}

impl Default for RabbitMQSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5672,
            vhost: "".to_owned(),
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            reconnect_base_ms: 1_000,
            reconnect_cap_ms: 30_000,
            reconnect_budget: None,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            queue: "spring-boot".to_owned(),
            exchange: "spring-boot-exchange".to_owned(),
            routing_key: "spring-boot".to_owned(),
            durable: false,
            publisher_confirms: true,
            publish_timeout_ms: 5_000,
            ack_mode: AckMode::default(),
            shutdown_grace_ms: 10_000,
        }
    }
}

/// Loads the configuration from the default file and environment variables.
///
/// The file source is optional; environment variables use `__` as the
/// nesting separator (`RABBITMQ__HOST` maps to `rabbitmq.host`,
/// `CHANNEL__ROUTING_KEY` to `channel.routing_key`). Missing values fall
/// back to the defaults above.
pub fn load() -> Result<Settings, ConfigError> {
    let cfg = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("__").try_parsing(true))
        .build()?;

    cfg.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_message_channel_example() {
        let settings = Settings::default();

        assert_eq!(settings.channel.queue, "spring-boot");
        assert_eq!(settings.channel.exchange, "spring-boot-exchange");
        assert_eq!(settings.channel.routing_key, "spring-boot");
        assert!(!settings.channel.durable);
    }

    #[test]
    fn explicit_ack_is_the_default_mode() {
        let settings = Settings::default();

        assert_eq!(settings.channel.ack_mode, AckMode::Explicit);
        assert!(settings.channel.publisher_confirms);
    }

    #[test]
    fn reconnect_policy_defaults_are_named_not_buried() {
        let settings = Settings::default();

        assert_eq!(settings.rabbitmq.reconnect_base_ms, 1_000);
        assert_eq!(settings.rabbitmq.reconnect_cap_ms, 30_000);
        assert_eq!(settings.rabbitmq.reconnect_budget, None);
    }
}
