// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Broker Client
//!
//! Implements the broker seam on top of `lapin`, driven by the current tokio
//! runtime. Connections report failures through a single lapin error callback,
//! which this module fans out to the attached error observer and, once the
//! connection is no longer usable, to the close observer.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection, CloseObserver, ErrorObserver},
    config::{ClientProperties, ServerParams},
    errors::AmqpError,
    exchange::ExchangeSpec,
    queue::QueueOptions,
};
use async_trait::async_trait;
use lapin::{
    options::{
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, Connection, ConnectionProperties, Error as LapinError,
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error};

/// AMQP reply code for a normal shutdown.
const REPLY_SUCCESS: u16 = 200;

/// Opens `lapin` connections on the current tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinBroker;

#[derive(Default)]
struct Observers {
    error: Mutex<Option<ErrorObserver>>,
    close: Mutex<Option<CloseObserver>>,
    closing: AtomicBool,
}

/// A `lapin` connection with its observers.
pub struct LapinConnection {
    name: String,
    inner: Connection,
    observers: Arc<Observers>,
}

#[async_trait]
impl Broker for LapinBroker {
    type Channel = Channel;
    type Connection = LapinConnection;

    async fn open(
        &self,
        server: &ServerParams,
        client: &ClientProperties,
    ) -> Result<LapinConnection, AmqpError> {
        debug!(
            connection = client.connection_name,
            server = server.identifier(),
            "creating amqp connection..."
        );

        let mut options = ConnectionProperties::default()
            .with_connection_name(LongString::from(client.connection_name.clone()))
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        for (key, value) in &client.properties {
            options.client_properties.insert(
                ShortString::from(key.as_str()),
                AMQPValue::LongString(LongString::from(value.as_str())),
            );
        }

        let conn = match Connection::connect(&server.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    connection = client.connection_name,
                    "failure to connect"
                );
                Err(AmqpError::ConnectionError(
                    client.connection_name.clone(),
                    err.to_string(),
                ))
            }
        }?;
        debug!(connection = client.connection_name, "amqp connected");

        let observers = Arc::new(Observers::default());
        let hooks = observers.clone();
        let status = conn.status().clone();
        let name = client.connection_name.clone();

        conn.on_error(move |err| {
            let err = AmqpError::ConnectionClosed(name.clone(), err.to_string());

            if let Some(observer) = hooks.error.lock().as_ref() {
                observer(&err);
            }

            if hooks.closing.load(Ordering::Acquire) || status.connected() {
                return;
            }

            let observer = hooks.close.lock().take();
            if let Some(observer) = observer {
                observer(err);
            }
        });

        Ok(LapinConnection {
            name: client.connection_name.clone(),
            inner: conn,
            observers,
        })
    }
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    type Channel = Channel;

    async fn create_channel(&self) -> Result<Channel, AmqpError> {
        debug!(connection = self.name, "creating amqp channel...");
        match self.inner.create_channel().await {
            Ok(c) => {
                debug!(connection = self.name, "channel created");
                Ok(c)
            }
            Err(err) => {
                error!(
                    connection = self.name,
                    error = err.to_string(),
                    "error to create the channel"
                );
                Err(AmqpError::ChannelError(self.name.clone(), err.to_string()))
            }
        }
    }

    fn on_error(&self, observer: ErrorObserver) {
        *self.observers.error.lock() = Some(observer);
    }

    fn on_close(&self, observer: CloseObserver) {
        *self.observers.close.lock() = Some(observer);
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.observers.closing.store(true, Ordering::Release);

        match self.inner.close(REPLY_SUCCESS, "closing").await {
            Ok(_) | Err(LapinError::InvalidConnectionState(_)) => Ok(()),
            Err(err) => Err(AmqpError::CloseError(self.name.clone(), err.to_string())),
        }
    }
}

#[async_trait]
impl BrokerChannel for Channel {
    async fn select_confirms(&self) -> Result<(), AmqpError> {
        self.confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|err| {
                error!(channel = self.id(), error = err.to_string(), "failure to enable confirms");
                AmqpError::ConfirmSelectError(err.to_string())
            })
    }

    async fn apply_prefetch(&self, prefetch: u16) -> Result<(), AmqpError> {
        self.basic_qos(prefetch, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(
                    channel = self.id(),
                    error = err.to_string(),
                    prefetch,
                    "failure to configure qos"
                );
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), AmqpError> {
        match self
            .exchange_declare(
                &spec.name,
                spec.kind.into(),
                ExchangeDeclareOptions {
                    passive: spec.options.passive,
                    durable: spec.options.durable,
                    auto_delete: spec.options.auto_delete,
                    internal: spec.options.internal,
                    nowait: spec.options.no_wait,
                },
                spec.options.arguments(),
            )
            .await
        {
            Err(err) => {
                error!(
                    channel = self.id(),
                    error = err.to_string(),
                    name = spec.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(spec.name.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<String, AmqpError> {
        match self
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: options.passive,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: options.no_wait,
                },
                options.arguments(),
            )
            .await
        {
            Err(err) => {
                error!(
                    channel = self.id(),
                    error = err.to_string(),
                    name,
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            Ok(queue) => Ok(queue.name().as_str().to_owned()),
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        match self
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                arguments,
            )
            .await
        {
            Err(err) => {
                error!(
                    channel = self.id(),
                    error = err.to_string(),
                    queue,
                    exchange,
                    "error to bind queue to exchange"
                );
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn await_confirms(&self) -> Result<(), AmqpError> {
        Channel::wait_for_confirms(self)
            .await
            .map(|_| ())
            .map_err(|err| AmqpError::ConfirmError(err.to_string()))
    }

    async fn close(&self) -> Result<(), AmqpError> {
        match Channel::close(self, REPLY_SUCCESS, "closing").await {
            Ok(_) | Err(LapinError::InvalidChannelState(_)) => Ok(()),
            Err(err) => Err(AmqpError::CloseError(
                format!("channel {}", self.id()),
                err.to_string(),
            )),
        }
    }
}
