// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Client Seam
//!
//! The traits the supervisor, provisioner and manager are written against. The
//! production implementation lives in [`crate::client`] on top of `lapin`; tests
//! substitute an in-memory broker.

use crate::{
    config::{ClientProperties, ServerParams},
    errors::AmqpError,
    exchange::ExchangeSpec,
    queue::QueueOptions,
};
use async_trait::async_trait;
use lapin::types::FieldTable;

#[cfg(test)]
use mockall::automock;

/// Called for every error the connection reports. Must not block.
pub type ErrorObserver = Box<dyn Fn(&AmqpError) + Send + Sync>;

/// Called once when the connection closes without having been asked to.
pub type CloseObserver = Box<dyn FnOnce(AmqpError) + Send>;

/// Opens connections to a broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Channel: BrokerChannel;
    type Connection: BrokerConnection<Channel = Self::Channel>;

    /// Opens a connection identified by the client properties.
    ///
    /// # Parameters
    /// * `server` - Broker address, credentials and virtual host
    /// * `client` - Connection name and extra client properties shown by the broker
    ///
    /// # Returns
    /// * `Result<Self::Connection, AmqpError>` - the open connection, or
    ///   `ConnectionError` naming the connection
    async fn open(
        &self,
        server: &ServerParams,
        client: &ClientProperties,
    ) -> Result<Self::Connection, AmqpError>;
}

/// An open connection to the broker.
///
/// Dropping a connection is not guaranteed to close it: owners call
/// [`close`](BrokerConnection::close) on every connection they stop using.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    /// Opens a new channel on this connection.
    async fn create_channel(&self) -> Result<Self::Channel, AmqpError>;

    /// Attaches the error observer, replacing any previous one.
    fn on_error(&self, observer: ErrorObserver);

    /// Attaches the close observer. It fires at most once, and never for a close
    /// requested through [`close`](BrokerConnection::close).
    fn on_close(&self, observer: CloseObserver);

    /// Closes the connection and, with it, every channel still open on it. Closing
    /// an already closed connection succeeds.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel on an open connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Switches the channel into publisher-confirm mode.
    async fn select_confirms(&self) -> Result<(), AmqpError>;

    /// Limits unacknowledged deliveries on this channel.
    async fn apply_prefetch(&self, prefetch: u16) -> Result<(), AmqpError>;

    /// Declares the exchange; redeclaring it identically is a no-op.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), AmqpError>;

    /// Declares the queue and returns its name, which the broker generates when
    /// `name` is empty.
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<String, AmqpError>;

    /// Binds the queue to the exchange with the routing key and binding arguments.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), AmqpError>;

    /// Waits for the broker to acknowledge every message published so far.
    async fn await_confirms(&self) -> Result<(), AmqpError>;

    /// Closes the channel.
    async fn close(&self) -> Result<(), AmqpError>;
}
