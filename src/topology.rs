// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the exchanges, queues and bindings described by the
//! topology descriptor. The main components are:
//! - `Topology` trait: Interface for topology installation
//! - `AmqpTopology`: Declares a registered set of exchanges and queues on a channel
//! - `TopologyProvisioner`: Runs an installation on its own short-lived connection,
//!   so declarations never share a channel with publish/consume traffic

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection},
    config::{ClientProperties, ServerParams},
    errors::AmqpError,
    exchange::ExchangeSpec,
    queue::QueueSpec,
};
use async_trait::async_trait;
use lapin::types::FieldTable;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Trait defining the interface for topology management.
///
/// This trait provides methods for registering exchanges and queues (with their
/// bindings), as well as installing the topology to the RabbitMQ server.
#[async_trait]
pub trait Topology<'tp> {
    /// Adds an exchange definition to the topology.
    fn exchange(self, def: &'tp ExchangeSpec) -> Self;

    /// Adds a queue definition, binding included, to the topology.
    fn queue(self, def: &'tp QueueSpec) -> Self;

    /// Installs the topology to the RabbitMQ server.
    async fn install(&self) -> Result<(), AmqpError>;
}

/// Declares exchanges and queues over one channel.
pub struct AmqpTopology<'tp, C> {
    channel: Arc<C>,
    pub(crate) exchanges: Vec<&'tp ExchangeSpec>,
    pub(crate) queues: Vec<&'tp QueueSpec>,
}

impl<'tp, C: BrokerChannel> AmqpTopology<'tp, C> {
    /// Creates an empty topology installed over the given channel.
    ///
    /// # Parameters
    /// * `channel` - An open channel to the broker
    ///
    /// # Returns
    /// A new AmqpTopology instance
    pub fn new(channel: Arc<C>) -> AmqpTopology<'tp, C> {
        AmqpTopology {
            channel,
            exchanges: vec![],
            queues: vec![],
        }
    }
}

#[async_trait]
impl<'tp, C: BrokerChannel> Topology<'tp> for AmqpTopology<'tp, C> {
    fn exchange(mut self, def: &'tp ExchangeSpec) -> Self {
        self.exchanges.push(def);
        self
    }

    fn queue(mut self, def: &'tp QueueSpec) -> Self {
        self.queues.push(def);
        self
    }

    /// Declares every exchange first, then every queue along with its binding.
    ///
    /// Redeclaring an identical topology is a no-op on the broker, so installing
    /// twice is safe.
    async fn install(&self) -> Result<(), AmqpError> {
        self.install_exchanges().await?;
        self.install_queues().await
    }
}

impl<'tp, C: BrokerChannel> AmqpTopology<'tp, C> {
    async fn install_exchanges(&self) -> Result<(), AmqpError> {
        for exch in &self.exchanges {
            debug!("creating exchange: {} ({})", exch.name, exch.kind);
            self.channel.declare_exchange(exch).await?;
            debug!("exchange: {} was created", exch.name);
        }

        Ok(())
    }

    async fn install_queues(&self) -> Result<(), AmqpError> {
        for def in &self.queues {
            let name = self
                .channel
                .declare_queue(def.name(), def.options())
                .await?;
            debug!("queue: {} was created", name);

            match def {
                QueueSpec::Queue { .. } => {}
                QueueSpec::Direct {
                    exchange,
                    routing_key,
                    ..
                }
                | QueueSpec::Topic {
                    exchange,
                    routing_key,
                    ..
                } => {
                    self.bind(&name, exchange, routing_key, FieldTable::default())
                        .await?
                }
                QueueSpec::Headers {
                    exchange, headers, ..
                } => self.bind(&name, exchange, "", headers.arguments()).await?,
                QueueSpec::Fanout { exchange, .. } => {
                    self.bind(&name, exchange, "", FieldTable::default())
                        .await?
                }
            }
        }

        Ok(())
    }

    async fn bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );
        self.channel
            .bind_queue(queue, exchange, routing_key, arguments)
            .await
    }
}

/// Installs the topology over a dedicated connection and channel, closed again
/// once the declarations are done.
pub struct TopologyProvisioner<'tp, B> {
    broker: &'tp B,
    server: &'tp ServerParams,
    exchanges: &'tp [ExchangeSpec],
    queues: &'tp [QueueSpec],
}

impl<'tp, B: Broker> TopologyProvisioner<'tp, B> {
    /// Creates a provisioner. Nothing is opened until
    /// [`provision`](TopologyProvisioner::provision).
    ///
    /// # Parameters
    /// * `broker` - The client used to open the provisioning connection
    /// * `server` - Broker address and credentials
    /// * `exchanges` - Exchanges, declared first and in order
    /// * `queues` - Queues, declared and bound after the exchanges
    pub fn new(
        broker: &'tp B,
        server: &'tp ServerParams,
        exchanges: &'tp [ExchangeSpec],
        queues: &'tp [QueueSpec],
    ) -> TopologyProvisioner<'tp, B> {
        TopologyProvisioner {
            broker,
            server,
            exchanges,
            queues,
        }
    }

    /// Opens the provisioning connection, installs the topology and closes the
    /// connection again. Close failures are logged; installation failures are
    /// returned after the connection is closed.
    pub async fn provision(&self) -> Result<(), AmqpError> {
        let client = ClientProperties {
            connection_name: format!("topology-provisioner-{}", Uuid::new_v4()),
            ..ClientProperties::default()
        };

        let connection = self.broker.open(self.server, &client).await?;
        let result = match connection.create_channel().await {
            Ok(channel) => {
                let channel = Arc::new(channel);
                let result = self.install(channel.clone()).await;

                if let Err(err) = channel.close().await {
                    warn!(error = err.to_string(), "failure to close the topology channel");
                }

                result
            }
            Err(err) => Err(err),
        };

        if let Err(err) = connection.close().await {
            warn!(
                error = err.to_string(),
                "failure to close the topology connection"
            );
        }

        if result.is_ok() {
            info!(
                exchanges = self.exchanges.len(),
                queues = self.queues.len(),
                "topology provisioned"
            );
        }

        result
    }

    async fn install(&self, channel: Arc<B::Channel>) -> Result<(), AmqpError> {
        let topology = self
            .exchanges
            .iter()
            .fold(AmqpTopology::new(channel), |topology, exchange| {
                topology.exchange(exchange)
            });
        let topology = self
            .queues
            .iter()
            .fold(topology, |topology, queue| topology.queue(queue));

        topology.install().await
    }
}
