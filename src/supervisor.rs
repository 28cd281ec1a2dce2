// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Supervisor
//!
//! Owns the lifecycle of one logical connection: opens it, opens its declared
//! channels into the shared [`ChannelRegistry`], and watches for the connection to
//! drop. A drop starts a bounded reconnection loop in a background task:
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connected
//!                                                         \-> Exhausted
//! ```
//!
//! Every supervisor reconnects on its own; an exhausted connection only loses its own
//! channels. The background task is cancelled by [`ConnectionSupervisor::shutdown`],
//! which interrupts any reconnection attempt in flight.

use crate::{
    broker::{Broker, BrokerChannel, BrokerConnection},
    channel::{ChannelHandle, ChannelRegistry},
    config::{ConnectionSpec, ServerParams},
    errors::AmqpError,
};
use parking_lot::Mutex;
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};
use tokio::{
    select,
    sync::oneshot,
    task::JoinHandle,
    time::{sleep, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Exhausted,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Exhausted => "exhausted",
        };
        f.write_str(state)
    }
}

type CloseSignal = oneshot::Receiver<AmqpError>;

/// Supervises one logical connection.
pub struct ConnectionSupervisor<B: Broker> {
    spec: ConnectionSpec,
    server: Arc<ServerParams>,
    broker: Arc<B>,
    registry: ChannelRegistry<B::Channel>,
    state: Mutex<ConnectionState>,
    connection: Mutex<Option<Arc<B::Connection>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl<B: Broker> ConnectionSupervisor<B> {
    /// Creates a supervisor in the `Disconnected` state. Nothing is opened until
    /// [`start`](ConnectionSupervisor::start).
    ///
    /// # Parameters
    /// * `spec` - The logical connection with its channels and retry policy
    /// * `server` - Broker address and credentials, shared with the other supervisors
    /// * `broker` - The client used to open connections
    /// * `registry` - The registry the channels are published into
    pub fn new(
        spec: ConnectionSpec,
        server: Arc<ServerParams>,
        broker: Arc<B>,
        registry: ChannelRegistry<B::Channel>,
    ) -> ConnectionSupervisor<B> {
        ConnectionSupervisor {
            spec,
            server,
            broker,
            registry,
            state: Mutex::new(ConnectionState::Disconnected),
            connection: Mutex::new(None),
            task: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// Name of the supervised logical connection.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        if previous != state {
            debug!(
                connection = self.spec.name,
                from = %previous,
                to = %state,
                "connection state changed"
            );
        }
    }

    /// Opens the connection and its channels, then starts watching it.
    ///
    /// Fails without retrying: reconnection only covers connections that were
    /// established once.
    ///
    /// # Returns
    /// * `Result<(), AmqpError>` - the open or channel error, or
    ///   `ConnectionClosed` when shutdown was requested while connecting
    pub async fn start(self: &Arc<Self>) -> Result<(), AmqpError> {
        self.set_state(ConnectionState::Connecting);

        let closed = match self.establish().await {
            Ok(Some(closed)) => closed,
            Ok(None) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(AmqpError::ConnectionClosed(
                    self.spec.name.clone(),
                    "shutdown requested while connecting".to_owned(),
                ));
            }
            Err(err) => {
                error!(
                    connection = self.spec.name,
                    error = err.to_string(),
                    "failure to open the connection"
                );
                self.set_state(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        info!(
            connection = self.spec.name,
            server = self.server.identifier(),
            channels = self.spec.channels.len(),
            "connection established"
        );

        let task = tokio::spawn(self.clone().supervise(closed));
        *self.task.lock() = Some(task);

        Ok(())
    }

    /// Stops supervising: interrupts any reconnection in progress, waits for the
    /// background task to finish and hands back the current connection, if any, for
    /// the caller to close.
    ///
    /// A connection opened by an interrupted reconnection attempt is closed by the
    /// task itself before this returns.
    ///
    /// # Returns
    /// * `Option<Arc<B::Connection>>` - the published connection, `None` when the
    ///   connection was lost, exhausted or never opened
    pub async fn shutdown(&self) -> Option<Arc<B::Connection>> {
        self.shutdown.cancel();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(
                    connection = self.spec.name,
                    error = err.to_string(),
                    "supervisor task did not finish cleanly"
                );
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.connection.lock().take()
    }

    /// Opens a fresh connection with observers attached and all channels created,
    /// then publishes both.
    ///
    /// Shutdown is honoured at every step. A connection that was opened but not yet
    /// published is closed before returning, so nothing outlives the supervisor.
    ///
    /// # Returns
    /// * `Ok(Some(signal))` - the signal that fires when the broker side closes the
    ///   new connection
    /// * `Ok(None)` - shutdown was requested before the connection was published
    /// * `Err(_)` - the connection or one of its channels could not be opened
    async fn establish(&self) -> Result<Option<CloseSignal>, AmqpError> {
        let client = self.spec.client_properties();
        let connection = select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(None),
            result = self.broker.open(&self.server, &client) => result?,
        };

        let name = self.spec.name.clone();
        connection.on_error(Box::new(move |err: &AmqpError| {
            warn!(connection = name, error = err.to_string(), "connection error");
        }));

        let (notify, closed) = oneshot::channel();
        connection.on_close(Box::new(move |reason: AmqpError| {
            let _ = notify.send(reason);
        }));

        let opened = select! {
            biased;
            _ = self.shutdown.cancelled() => None,
            result = self.open_channels(&connection) => Some(result),
        };

        let channels = match opened {
            Some(Ok(channels)) => channels,
            Some(Err(err)) => {
                self.discard(connection, "channel setup failed").await;
                return Err(err);
            }
            None => {
                // channels already created go down with their connection
                self.discard(connection, "shutdown requested").await;
                return Ok(None);
            }
        };

        for (name, handle) in channels {
            if self.registry.register(&name, handle).is_some() {
                debug!(connection = self.spec.name, channel = name, "replaced stale channel");
            }
        }

        *self.connection.lock() = Some(Arc::new(connection));
        self.set_state(ConnectionState::Connected);

        Ok(Some(closed))
    }

    /// Closes a connection that was opened but never published.
    async fn discard(&self, connection: B::Connection, reason: &str) {
        debug!(connection = self.spec.name, reason, "discarding half-opened connection");
        if let Err(err) = connection.close().await {
            warn!(
                connection = self.spec.name,
                reason,
                error = err.to_string(),
                "failure to close a half-opened connection"
            );
        }
    }

    async fn open_channels(
        &self,
        connection: &B::Connection,
    ) -> Result<Vec<(String, ChannelHandle<B::Channel>)>, AmqpError> {
        let mut opened = Vec::with_capacity(self.spec.channels.len());

        for spec in &self.spec.channels {
            debug!(connection = self.spec.name, channel = spec.name, "opening channel");
            let channel = connection.create_channel().await?;

            if spec.confirm_select {
                channel.select_confirms().await?;
            }

            if let Some(prefetch) = spec.prefetch {
                channel.apply_prefetch(prefetch).await?;
            }

            let channel = Arc::new(channel);
            let handle = if spec.confirm_select {
                ChannelHandle::Confirm(channel)
            } else {
                ChannelHandle::Plain(channel)
            };

            opened.push((spec.name.clone(), handle));
        }

        Ok(opened)
    }

    /// Background task: waits for the connection to drop and reconnects, until
    /// shutdown or exhaustion.
    async fn supervise(self: Arc<Self>, mut closed: CloseSignal) {
        loop {
            let reason = select! {
                biased;
                _ = self.shutdown.cancelled() => return,
                reason = &mut closed => match reason {
                    Ok(reason) => reason,
                    // the connection handle went away without reporting a close
                    Err(_) => return,
                },
            };

            warn!(
                connection = self.spec.name,
                reason = reason.to_string(),
                "connection closed unexpectedly"
            );

            match self.reconnect().await {
                Some(next) => closed = next,
                None => return,
            }
        }
    }

    async fn reconnect(&self) -> Option<CloseSignal> {
        self.set_state(ConnectionState::Reconnecting);
        let dead = self.connection.lock().take();
        drop(dead);

        let max_retries = self.spec.reconnect_attempts();
        if max_retries == 0 {
            info!(
                connection = self.spec.name,
                "no reconnection policy, leaving the connection closed"
            );
            self.exhaust();
            return None;
        }

        let delay = self.spec.retry_delay();
        let deadline = self
            .spec
            .reconnect_deadline_duration()
            .map(|budget| Instant::now() + budget);

        for attempt in 1..=max_retries {
            select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                _ = sleep(delay) => {},
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(
                    connection = self.spec.name,
                    attempt, "reconnection deadline reached"
                );
                break;
            }

            debug!(connection = self.spec.name, attempt, max_retries, "reconnecting...");

            match self.establish().await {
                Ok(None) => return None,
                Ok(Some(closed)) => {
                    info!(connection = self.spec.name, attempt, "connection re-established");
                    return Some(closed);
                }
                Err(err) => warn!(
                    connection = self.spec.name,
                    attempt,
                    max_retries,
                    error = err.to_string(),
                    "reconnection attempt failed"
                ),
            }
        }

        error!(
            connection = self.spec.name,
            max_retries, "reconnection attempts exhausted, abandoning the connection"
        );
        self.exhaust();
        None
    }

    /// Terminal state: the connection's channels leave the registry.
    fn exhaust(&self) {
        for channel in &self.spec.channels {
            self.registry.remove(&channel.name);
        }
        self.set_state(ConnectionState::Exhausted);
    }
}
