// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Manager
//!
//! The façade collaborators hold (usually behind an `Arc`). It owns one
//! [`ConnectionSupervisor`] per configured logical connection and the shared
//! [`ChannelRegistry`], brings everything up in order, hands out channels by name
//! and tears everything down again.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection},
    channel::{ChannelRegistry, ConfirmChannel},
    client::LapinBroker,
    config::TopologyDescriptor,
    errors::{AmqpError, ChannelLookupError},
    supervisor::{ConnectionState, ConnectionSupervisor},
    topology::TopologyProvisioner,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error, info};

/// Supervises the configured broker connections and their channels.
pub struct BrokerManager<B: Broker> {
    broker: Arc<B>,
    descriptor: TopologyDescriptor,
    registry: ChannelRegistry<B::Channel>,
    supervisors: Mutex<Vec<Arc<ConnectionSupervisor<B>>>>,
    started: AtomicBool,
}

impl BrokerManager<LapinBroker> {
    /// Creates a manager connecting through `lapin`.
    pub fn with_lapin(descriptor: TopologyDescriptor) -> Result<Self, AmqpError> {
        BrokerManager::new(LapinBroker, descriptor)
    }
}

impl<B: Broker> BrokerManager<B> {
    /// Creates a manager for the given descriptor. Nothing is opened until
    /// [`connect`](BrokerManager::connect).
    ///
    /// # Parameters
    /// * `broker` - The client used to open every connection
    /// * `descriptor` - Server, connections, channels and topology to manage
    ///
    /// # Returns
    /// * `Result<BrokerManager<B>, AmqpError>` - `ConfigError` when the descriptor
    ///   fails [`validate`](TopologyDescriptor::validate)
    pub fn new(broker: B, descriptor: TopologyDescriptor) -> Result<Self, AmqpError> {
        descriptor.validate()?;

        Ok(BrokerManager {
            broker: Arc::new(broker),
            descriptor,
            registry: ChannelRegistry::new(),
            supervisors: Mutex::new(vec![]),
            started: AtomicBool::new(false),
        })
    }

    /// The descriptor this manager was built from.
    pub fn descriptor(&self) -> &TopologyDescriptor {
        &self.descriptor
    }

    /// Opens every configured connection with its channels, one after the other in
    /// configuration order, then provisions the topology.
    ///
    /// Any failure closes whatever was already opened and is returned; the caller
    /// is expected to abort startup.
    ///
    /// A manager starts once: the topology is provisioned at most once per manager,
    /// and any later call fails with `AlreadyConnected`, whether the first one
    /// succeeded or not.
    ///
    /// # Returns
    /// * `Result<(), AmqpError>` - the first open, channel or provisioning error
    pub async fn connect(&self) -> Result<(), AmqpError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(AmqpError::AlreadyConnected);
        }

        info!(
            server = self.descriptor.server.identifier(),
            connections = self.descriptor.connections.len(),
            "connecting to the broker..."
        );

        if let Err(err) = self.open_all().await {
            error!(
                error = err.to_string(),
                "failure to start the broker connections"
            );
            self.close_all().await;
            return Err(err);
        }

        info!("broker connections ready");
        Ok(())
    }

    async fn open_all(&self) -> Result<(), AmqpError> {
        let server = Arc::new(self.descriptor.server.clone());

        for spec in &self.descriptor.connections {
            let supervisor = Arc::new(ConnectionSupervisor::new(
                spec.clone(),
                server.clone(),
                self.broker.clone(),
                self.registry.clone(),
            ));
            self.supervisors.lock().push(supervisor.clone());

            supervisor.start().await?;
        }

        TopologyProvisioner::new(
            self.broker.as_ref(),
            &self.descriptor.server,
            &self.descriptor.exchanges,
            &self.descriptor.queues,
        )
        .provision()
        .await
    }

    /// Returns the plain channel registered under `name`.
    ///
    /// # Returns
    /// * `Result<Arc<B::Channel>, ChannelLookupError>` - `NotFound` for an unknown or
    ///   abandoned channel, `WrongMode` when the channel is in confirm mode
    pub fn get_channel(&self, name: &str) -> Result<Arc<B::Channel>, ChannelLookupError> {
        self.registry.channel(name)
    }

    /// Returns the confirm-mode channel registered under `name`.
    ///
    /// # Returns
    /// * `Result<ConfirmChannel<B::Channel>, ChannelLookupError>` - `NotFound` for an
    ///   unknown or abandoned channel, `WrongMode` when the channel is plain
    pub fn get_confirm_channel(
        &self,
        name: &str,
    ) -> Result<ConfirmChannel<B::Channel>, ChannelLookupError> {
        self.registry.confirm_channel(name)
    }

    /// Current state of the named logical connection, if it is being supervised.
    pub fn connection_state(&self, name: &str) -> Option<ConnectionState> {
        self.supervisors
            .lock()
            .iter()
            .find(|supervisor| supervisor.name() == name)
            .map(|supervisor| supervisor.state())
    }

    /// Stops every supervisor (interrupting reconnections in progress), closes all
    /// channels, then all connections. Closes within each phase run concurrently;
    /// failures are logged and skipped. Safe to call repeatedly.
    pub async fn close_all(&self) {
        let supervisors = std::mem::take(&mut *self.supervisors.lock());

        let connections: Vec<_> = join_all(supervisors.iter().map(|supervisor| async move {
            supervisor
                .shutdown()
                .await
                .map(|connection| (supervisor.name().to_owned(), connection))
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

        let channels = self.registry.drain();
        let closed = join_all(channels.iter().map(|(name, handle)| async move {
            (name, handle.channel().close().await)
        }))
        .await;

        for (name, result) in closed {
            match result {
                Ok(()) => debug!(channel = name, "channel closed"),
                Err(err) => error!(
                    channel = name,
                    error = err.to_string(),
                    "failure to close the channel"
                ),
            }
        }

        let closed = join_all(connections.iter().map(|(name, connection)| async move {
            (name, connection.close().await)
        }))
        .await;

        for (name, result) in closed {
            match result {
                Ok(()) => debug!(connection = name, "connection closed"),
                Err(err) => error!(
                    connection = name,
                    error = err.to_string(),
                    "failure to close the connection"
                ),
            }
        }

        if !supervisors.is_empty() {
            info!(
                channels = channels.len(),
                connections = connections.len(),
                "broker connections closed"
            );
        }
    }
}
