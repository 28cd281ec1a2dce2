// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the integration tests.
//!
//! Records every connection attempt, lets tests make opens fail, drop live
//! connections from the broker side and make channel closes fail. Declarations
//! follow broker semantics: redeclaring an identical exchange is a no-op, a
//! different kind is rejected, binding to an undeclared exchange is rejected.

#![allow(dead_code)]

use amqp_broker::{
    broker::{Broker, BrokerChannel, BrokerConnection, CloseObserver, ErrorObserver},
    config::{ClientProperties, ServerParams},
    errors::AmqpError,
    exchange::{ExchangeKind, ExchangeSpec},
    queue::QueueOptions,
};
use async_trait::async_trait;
use lapin::types::FieldTable;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    fmt::{self, Debug, Formatter},
    future::pending,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{
    field::{Field, Visit},
    subscriber::DefaultGuard,
    Event, Subscriber,
};
use tracing_subscriber::{
    layer::{Context, SubscriberExt},
    Layer,
};

pub const PROVISIONER_PREFIX: &str = "topology-provisioner";

#[derive(Debug, Clone)]
pub struct OpenAttempt {
    pub connection: String,
    pub at: Instant,
    pub succeeded: bool,
}

#[derive(Default)]
pub struct BrokerState {
    pub opens: Vec<OpenAttempt>,
    /// Remaining failed opens per connection name.
    pub failures: HashMap<String, usize>,
    /// Connection names whose channels fail to close.
    pub failing_channel_close: BTreeSet<String>,
    /// Connection names whose channel creation never completes.
    pub stalled_channels: BTreeSet<String>,
    pub live: Vec<Arc<ConnectionShared>>,
    pub closed_connections: Vec<String>,
    pub closed_channels: Vec<String>,
    pub exchanges: BTreeMap<String, ExchangeKind>,
    pub queues: BTreeMap<String, VecDeque<Vec<u8>>>,
    /// (queue, exchange, routing key)
    pub bindings: BTreeSet<(String, String, String)>,
    generated: usize,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    pub state: Arc<Mutex<BrokerState>>,
}

pub struct ConnectionShared {
    pub name: String,
    error: Mutex<Option<ErrorObserver>>,
    close: Mutex<Option<CloseObserver>>,
    closed: AtomicBool,
}

pub struct FakeConnection {
    shared: Arc<ConnectionShared>,
    broker: Arc<Mutex<BrokerState>>,
}

pub struct FakeChannel {
    pub connection: String,
    broker: Arc<Mutex<BrokerState>>,
    pub confirms: AtomicBool,
    pub prefetch: Mutex<Option<u16>>,
    pub closed: AtomicBool,
}

impl FakeBroker {
    pub fn new() -> FakeBroker {
        FakeBroker::default()
    }

    /// Every open of the named connection fails from now on.
    pub fn fail_always(&self, connection: &str) {
        self.fail_next(connection, usize::MAX);
    }

    /// The next `count` opens of the named connection fail.
    pub fn fail_next(&self, connection: &str, count: usize) {
        self.state
            .lock()
            .failures
            .insert(connection.to_owned(), count);
    }

    pub fn fail_channel_close(&self, connection: &str) {
        self.state
            .lock()
            .failing_channel_close
            .insert(connection.to_owned());
    }

    /// Channel creation on the named connection hangs from now on.
    pub fn stall_channels(&self, connection: &str) {
        self.state
            .lock()
            .stalled_channels
            .insert(connection.to_owned());
    }

    /// Simulates the broker closing the newest live connection with that name.
    pub fn drop_connection(&self, connection: &str) {
        let shared = {
            let state = self.state.lock();
            state
                .live
                .iter()
                .rev()
                .find(|shared| shared.name == connection && !shared.closed.load(Ordering::SeqCst))
                .cloned()
        };

        let Some(shared) = shared else {
            panic!("no live connection `{connection}`");
        };

        shared.closed.store(true, Ordering::SeqCst);
        let err = AmqpError::ConnectionClosed(connection.to_owned(), "connection reset".to_owned());

        if let Some(observer) = shared.error.lock().as_ref() {
            observer(&err);
        }
        let observer = shared.close.lock().take();
        if let Some(observer) = observer {
            observer(err);
        }
    }

    /// Open attempts for the named connection.
    pub fn opens(&self, connection: &str) -> Vec<OpenAttempt> {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|open| open.connection == connection)
            .cloned()
            .collect()
    }

    pub fn opened_connections(&self) -> Vec<String> {
        self.state
            .lock()
            .opens
            .iter()
            .map(|open| open.connection.clone())
            .collect()
    }

    pub fn provisioner_opens(&self) -> usize {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|open| open.connection.starts_with(PROVISIONER_PREFIX))
            .count()
    }

    pub fn closed_connections(&self, connection: &str) -> usize {
        self.state
            .lock()
            .closed_connections
            .iter()
            .filter(|name| name.as_str() == connection)
            .count()
    }

    pub fn closed_channels(&self, connection: &str) -> usize {
        self.state
            .lock()
            .closed_channels
            .iter()
            .filter(|name| name.as_str() == connection)
            .count()
    }

    /// Name of the queue bound to the exchange with the routing key.
    pub fn queue_bound_to(&self, exchange: &str, routing_key: &str) -> Option<String> {
        self.state
            .lock()
            .bindings
            .iter()
            .find(|(_, e, k)| e == exchange && k == routing_key)
            .map(|(q, _, _)| q.clone())
    }
}

#[async_trait]
impl Broker for FakeBroker {
    type Channel = FakeChannel;
    type Connection = FakeConnection;

    async fn open(
        &self,
        _server: &ServerParams,
        client: &ClientProperties,
    ) -> Result<FakeConnection, AmqpError> {
        let mut state = self.state.lock();
        let name = client.connection_name.clone();

        let failing = match state.failures.get_mut(&name) {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(1);
                true
            }
            _ => false,
        };

        state.opens.push(OpenAttempt {
            connection: name.clone(),
            at: Instant::now(),
            succeeded: !failing,
        });

        if failing {
            return Err(AmqpError::ConnectionError(name, "connection refused".to_owned()));
        }

        let shared = Arc::new(ConnectionShared {
            name,
            error: Mutex::new(None),
            close: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        state.live.push(shared.clone());

        Ok(FakeConnection {
            shared,
            broker: self.state.clone(),
        })
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    type Channel = FakeChannel;

    async fn create_channel(&self) -> Result<FakeChannel, AmqpError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(AmqpError::ChannelError(
                self.shared.name.clone(),
                "connection is closed".to_owned(),
            ));
        }

        let stalled = self
            .broker
            .lock()
            .stalled_channels
            .contains(&self.shared.name);
        if stalled {
            pending::<()>().await;
        }

        Ok(FakeChannel {
            connection: self.shared.name.clone(),
            broker: self.broker.clone(),
            confirms: AtomicBool::new(false),
            prefetch: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn on_error(&self, observer: ErrorObserver) {
        *self.shared.error.lock() = Some(observer);
    }

    fn on_close(&self, observer: CloseObserver) {
        *self.shared.close.lock() = Some(observer);
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.broker
            .lock()
            .closed_connections
            .push(self.shared.name.clone());
        Ok(())
    }
}

impl Debug for FakeChannel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeChannel")
            .field("connection", &self.connection)
            .field("confirms", &self.confirms)
            .field("closed", &self.closed)
            .finish()
    }
}

impl FakeChannel {
    /// Routes the payload to every queue bound to the exchange with a matching key.
    pub fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) {
        let mut state = self.broker.lock();
        let kind = state.exchanges.get(exchange).copied();

        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|(_, e, key)| {
                e == exchange
                    && match kind {
                        Some(ExchangeKind::Fanout) => true,
                        Some(ExchangeKind::Topic) => topic_matches(key, routing_key),
                        _ => key == routing_key,
                    }
            })
            .map(|(q, _, _)| q.clone())
            .collect();

        for queue in targets {
            if let Some(messages) = state.queues.get_mut(&queue) {
                messages.push_back(payload.to_vec());
            }
        }
    }

    /// Takes the oldest message from the queue.
    pub fn consume(&self, queue: &str) -> Option<Vec<u8>> {
        self.broker
            .lock()
            .queues
            .get_mut(queue)
            .and_then(VecDeque::pop_front)
    }
}

fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn select_confirms(&self) -> Result<(), AmqpError> {
        self.confirms.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_prefetch(&self, prefetch: u16) -> Result<(), AmqpError> {
        *self.prefetch.lock() = Some(prefetch);
        Ok(())
    }

    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), AmqpError> {
        let mut state = self.broker.lock();
        let existing = state.exchanges.get(&spec.name).copied();
        match existing {
            Some(kind) if kind != spec.kind => {
                Err(AmqpError::DeclareExchangeError(spec.name.clone()))
            }
            _ => {
                state.exchanges.insert(spec.name.clone(), spec.kind);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, name: &str, _options: &QueueOptions) -> Result<String, AmqpError> {
        let mut state = self.broker.lock();
        let name = if name.is_empty() {
            state.generated += 1;
            format!("amq.gen-{}", state.generated)
        } else {
            name.to_owned()
        };

        state.queues.entry(name.clone()).or_default();
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        _arguments: FieldTable,
    ) -> Result<(), AmqpError> {
        let mut state = self.broker.lock();
        if !state.exchanges.contains_key(exchange) || !state.queues.contains_key(queue) {
            return Err(AmqpError::BindingExchangeToQueueError(
                exchange.to_owned(),
                queue.to_owned(),
            ));
        }

        state.bindings.insert((
            queue.to_owned(),
            exchange.to_owned(),
            routing_key.to_owned(),
        ));
        Ok(())
    }

    async fn await_confirms(&self) -> Result<(), AmqpError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.broker.lock();
        state.closed_channels.push(self.connection.clone());

        if state.failing_channel_close.contains(&self.connection) {
            return Err(AmqpError::CloseError(
                self.connection.clone(),
                "channel stuck".to_owned(),
            ));
        }

        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A tracing event as recorded by [`CapturedEvents`]: its message and the other
/// fields, formatted.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

/// Tracing layer recording every event emitted while it is installed.
#[derive(Clone, Default)]
pub struct CapturedEvents {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedEvents {
    /// Installs the layer as the default subscriber of the current thread. With
    /// `#[tokio::test]`'s current-thread runtime this covers spawned tasks too.
    pub fn install() -> (CapturedEvents, DefaultGuard) {
        let events = CapturedEvents::default();
        let subscriber = tracing_subscriber::registry().with(events.clone());
        let guard = tracing::subscriber::set_default(subscriber);
        (events, guard)
    }

    /// Events with the given message, in emission order.
    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.message == message)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct FieldRecorder {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Visit for FieldRecorder {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_owned(), value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.insert(field.name().to_owned(), format!("{value:?}"));
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = FieldRecorder::default();
        event.record(&mut recorder);
        self.events.lock().push(CapturedEvent {
            message: recorder.message,
            fields: recorder.fields,
        });
    }
}

/// Polls the condition until it holds, failing the test after two seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Runs the future with a two second timeout.
pub async fn timely<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
