// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Broker Manager
//!
//! Two error families live here. `AmqpError` covers everything the broker (or the
//! configuration describing it) can get wrong: connecting, opening channels,
//! declaring topology, closing resources. `ChannelLookupError` covers callers
//! asking the registry for something it does not hold, so application code can tell
//! "you asked for the wrong thing" apart from "the broker is down".

use crate::channel::ChannelMode;
use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Variants carry the name of the resource involved and, where the broker produced
/// one, the broker's error message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error: {0}")]
    InternalError(String),

    /// The topology descriptor or server parameters are invalid
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// `connect` was called on a manager that was already started
    #[error("broker manager is already connected")]
    AlreadyConnected,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`: {1}")]
    ConnectionError(String, String),

    /// The broker closed a connection, or the connection failed after being opened
    #[error("connection `{0}` was closed: {1}")]
    ConnectionClosed(String, String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`: {1}")]
    ChannelError(String, String),

    /// Error switching a channel into publisher-confirm mode
    #[error("failure to enable confirms: {0}")]
    ConfirmSelectError(String),

    /// Error waiting for publisher confirms
    #[error("failure to wait for confirms: {0}")]
    ConfirmError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error closing a channel or a connection
    #[error("failure to close `{0}`: {1}")]
    CloseError(String, String),
}

/// Failure to look up a channel in the registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelLookupError {
    /// No channel is registered under the name, either because it was never
    /// configured or because its connection gave up reconnecting.
    #[error("channel `{0}` is not registered")]
    NotFound(String),

    /// The channel exists but was opened in the other mode.
    #[error("channel `{name}` is a {actual} channel, requested as {requested}")]
    WrongMode {
        name: String,
        requested: ChannelMode,
        actual: ChannelMode,
    },
}
