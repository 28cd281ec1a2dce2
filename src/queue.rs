// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! A queue definition is a tagged union: standalone queues, and queues bound to an
//! exchange by routing key (`direct`/`topic`), by header match (`headers`), or
//! unconditionally (`fanout`). Bound queues may omit their name, in which case the
//! broker generates one on declaration.

use lapin::types::{AMQPValue, FieldTable, LongInt, LongString, ShortString};
use serde::Deserialize;
use std::collections::BTreeMap;

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
/// Constant for the binding argument selecting the headers match strategy
pub const AMQP_HEADERS_MATCH: &str = "x-match";

/// Declaration flags and arguments of a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub no_wait: bool,
    /// Message TTL in milliseconds
    pub message_ttl: Option<i32>,
    pub max_length: Option<i32>,
    pub max_length_bytes: Option<i32>,
    pub dead_letter_exchange: Option<String>,
    pub dead_letter_routing_key: Option<String>,
    pub arguments: BTreeMap<String, String>,
}

impl QueueOptions {
    /// Builds the declaration argument table sent to the broker.
    pub fn arguments(&self) -> FieldTable {
        let mut queue_args = BTreeMap::new();

        for (key, value) in &self.arguments {
            queue_args.insert(
                ShortString::from(key.as_str()),
                AMQPValue::LongString(LongString::from(value.as_str())),
            );
        }

        if let Some(exchange) = &self.dead_letter_exchange {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
                AMQPValue::LongString(LongString::from(exchange.as_str())),
            );
        }

        if let Some(key) = &self.dead_letter_routing_key {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
                AMQPValue::LongString(LongString::from(key.as_str())),
            );
        }

        if let Some(ttl) = self.message_ttl {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        if let Some(max) = self.max_length {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongInt(LongInt::from(max)),
            );
        }

        if let Some(max_bytes) = self.max_length_bytes {
            queue_args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
                AMQPValue::LongInt(LongInt::from(max_bytes)),
            );
        }

        FieldTable::from(queue_args)
    }
}

/// How a headers binding matches message headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderMatch {
    #[default]
    All,
    Any,
}

impl HeaderMatch {
    fn as_str(&self) -> &'static str {
        match self {
            HeaderMatch::All => "all",
            HeaderMatch::Any => "any",
        }
    }
}

/// Header predicate of a headers binding: the match strategy plus the key/value
/// pairs to match on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HeadersBinding {
    #[serde(rename = "match", default)]
    pub matching: HeaderMatch,
    #[serde(flatten)]
    pub values: BTreeMap<String, String>,
}

impl HeadersBinding {
    /// Creates a binding without header values.
    ///
    /// # Parameters
    /// * `matching` - Whether all or any of the header values must match
    pub fn new(matching: HeaderMatch) -> HeadersBinding {
        HeadersBinding {
            matching,
            values: BTreeMap::new(),
        }
    }

    /// Adds a header that must (or may, for `any`) be present with the given value.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Builds the `x-match` binding arguments.
    pub fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();

        args.insert(
            ShortString::from(AMQP_HEADERS_MATCH),
            AMQPValue::LongString(LongString::from(self.matching.as_str())),
        );

        for (key, value) in &self.values {
            args.insert(
                ShortString::from(key.as_str()),
                AMQPValue::LongString(LongString::from(value.as_str())),
            );
        }

        FieldTable::from(args)
    }
}

/// Definition of a RabbitMQ queue and, for the bound kinds, its binding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum QueueSpec {
    /// Standalone queue, declared without any binding.
    Queue {
        name: String,
        #[serde(default)]
        options: QueueOptions,
    },
    /// Queue bound to a direct exchange by exact routing key.
    Direct {
        exchange: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "routingKey")]
        routing_key: String,
        #[serde(default)]
        options: QueueOptions,
    },
    /// Queue bound to a topic exchange by routing pattern.
    Topic {
        exchange: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "routingKey")]
        routing_key: String,
        #[serde(default)]
        options: QueueOptions,
    },
    /// Queue bound to a headers exchange by header match.
    Headers {
        exchange: String,
        #[serde(default)]
        name: Option<String>,
        headers: HeadersBinding,
        #[serde(default)]
        options: QueueOptions,
    },
    /// Queue bound to a fanout exchange, no routing key.
    Fanout {
        exchange: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        options: QueueOptions,
    },
}

impl QueueSpec {
    /// Creates a standalone queue definition.
    pub fn standalone(name: &str) -> QueueSpec {
        QueueSpec::Queue {
            name: name.to_owned(),
            options: QueueOptions::default(),
        }
    }

    /// Creates a queue bound to a direct exchange.
    pub fn direct(exchange: &str, routing_key: &str) -> QueueSpec {
        QueueSpec::Direct {
            exchange: exchange.to_owned(),
            name: None,
            routing_key: routing_key.to_owned(),
            options: QueueOptions::default(),
        }
    }

    /// Creates a queue bound to a topic exchange.
    pub fn topic(exchange: &str, routing_key: &str) -> QueueSpec {
        QueueSpec::Topic {
            exchange: exchange.to_owned(),
            name: None,
            routing_key: routing_key.to_owned(),
            options: QueueOptions::default(),
        }
    }

    /// Creates a queue bound to a headers exchange.
    pub fn headers(exchange: &str, headers: HeadersBinding) -> QueueSpec {
        QueueSpec::Headers {
            exchange: exchange.to_owned(),
            name: None,
            headers,
            options: QueueOptions::default(),
        }
    }

    /// Creates a queue bound to a fanout exchange.
    pub fn fanout(exchange: &str) -> QueueSpec {
        QueueSpec::Fanout {
            exchange: exchange.to_owned(),
            name: None,
            options: QueueOptions::default(),
        }
    }

    /// Sets an explicit queue name.
    pub fn named(mut self, queue: &str) -> Self {
        match &mut self {
            QueueSpec::Queue { name, .. } => *name = queue.to_owned(),
            QueueSpec::Direct { name, .. }
            | QueueSpec::Topic { name, .. }
            | QueueSpec::Headers { name, .. }
            | QueueSpec::Fanout { name, .. } => *name = Some(queue.to_owned()),
        }
        self
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.options_mut().durable = true;
        self
    }

    /// Makes the queue exclusive to the declaring connection.
    pub fn exclusive(mut self) -> Self {
        self.options_mut().exclusive = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.options_mut().auto_delete = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.options_mut().message_ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(mut self, max: i32) -> Self {
        self.options_mut().max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.options_mut().max_length_bytes = Some(max_bytes);
        self
    }

    /// Routes rejected and expired messages to the given exchange and routing key.
    pub fn dead_letter(mut self, exchange: &str, routing_key: &str) -> Self {
        let options = self.options_mut();
        options.dead_letter_exchange = Some(exchange.to_owned());
        options.dead_letter_routing_key = Some(routing_key.to_owned());
        self
    }

    /// Name to declare; empty when the broker should generate one.
    pub fn name(&self) -> &str {
        match self {
            QueueSpec::Queue { name, .. } => name,
            QueueSpec::Direct { name, .. }
            | QueueSpec::Topic { name, .. }
            | QueueSpec::Headers { name, .. }
            | QueueSpec::Fanout { name, .. } => name.as_deref().unwrap_or_default(),
        }
    }

    /// Exchange the queue is bound to, if any.
    pub fn exchange(&self) -> Option<&str> {
        match self {
            QueueSpec::Queue { .. } => None,
            QueueSpec::Direct { exchange, .. }
            | QueueSpec::Topic { exchange, .. }
            | QueueSpec::Headers { exchange, .. }
            | QueueSpec::Fanout { exchange, .. } => Some(exchange),
        }
    }

    /// Declaration options of the queue.
    pub fn options(&self) -> &QueueOptions {
        match self {
            QueueSpec::Queue { options, .. }
            | QueueSpec::Direct { options, .. }
            | QueueSpec::Topic { options, .. }
            | QueueSpec::Headers { options, .. }
            | QueueSpec::Fanout { options, .. } => options,
        }
    }

    fn options_mut(&mut self) -> &mut QueueOptions {
        match self {
            QueueSpec::Queue { options, .. }
            | QueueSpec::Direct { options, .. }
            | QueueSpec::Topic { options, .. }
            | QueueSpec::Headers { options, .. }
            | QueueSpec::Fanout { options, .. } => options,
        }
    }
}
