// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Channel Registry
//!
//! A flat, name-keyed store of every channel opened by the connection supervisors.
//! Plain and confirm-mode channels share one namespace; the mode is stored alongside
//! the handle and checked on every lookup, so a caller asking for a plain channel
//! never silently receives a confirm-mode one (and vice versa).
//!
//! The registry is the single owner of each channel. Callers receive an `Arc` loan
//! of the handle that stays valid until the channel is replaced by a reconnection or
//! closed by shutdown.

use crate::{broker::BrokerChannel, errors::AmqpError, errors::ChannelLookupError};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt::{Debug, Display, Formatter},
    ops::Deref,
    sync::Arc,
};

/// Whether a channel was opened with publisher confirms enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Plain,
    Confirm,
}

impl Display for ChannelMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelMode::Plain => f.write_str("plain"),
            ChannelMode::Confirm => f.write_str("confirm"),
        }
    }
}

/// A registered channel, tagged with its mode.
#[derive(Debug)]
pub enum ChannelHandle<C> {
    Plain(Arc<C>),
    Confirm(Arc<C>),
}

impl<C> ChannelHandle<C> {
    /// The mode the channel was opened in.
    pub fn mode(&self) -> ChannelMode {
        match self {
            ChannelHandle::Plain(_) => ChannelMode::Plain,
            ChannelHandle::Confirm(_) => ChannelMode::Confirm,
        }
    }

    /// The underlying channel, whatever its mode.
    pub fn channel(&self) -> &Arc<C> {
        match self {
            ChannelHandle::Plain(channel) | ChannelHandle::Confirm(channel) => channel,
        }
    }
}

impl<C> Clone for ChannelHandle<C> {
    fn clone(&self) -> Self {
        match self {
            ChannelHandle::Plain(channel) => ChannelHandle::Plain(channel.clone()),
            ChannelHandle::Confirm(channel) => ChannelHandle::Confirm(channel.clone()),
        }
    }
}

/// A channel known to be in publisher-confirm mode.
///
/// Dereferences to the underlying channel for publishing; adds
/// [`wait_for_confirms`](ConfirmChannel::wait_for_confirms).
pub struct ConfirmChannel<C>(Arc<C>);

impl<C> ConfirmChannel<C> {
    /// Returns the shared underlying channel.
    pub fn channel(&self) -> Arc<C> {
        self.0.clone()
    }
}

impl<C: BrokerChannel> ConfirmChannel<C> {
    /// Waits until the broker has acknowledged every message published so far.
    pub async fn wait_for_confirms(&self) -> Result<(), AmqpError> {
        self.0.await_confirms().await
    }
}

impl<C: Debug> Debug for ConfirmChannel<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ConfirmChannel").field(&self.0).finish()
    }
}

impl<C> Deref for ConfirmChannel<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.0
    }
}

impl<C> Clone for ConfirmChannel<C> {
    fn clone(&self) -> Self {
        ConfirmChannel(self.0.clone())
    }
}

/// Name-keyed store of channel handles, cheap to clone and share.
pub struct ChannelRegistry<C> {
    entries: Arc<RwLock<HashMap<String, ChannelHandle<C>>>>,
}

impl<C> Clone for ChannelRegistry<C> {
    fn clone(&self) -> Self {
        ChannelRegistry {
            entries: self.entries.clone(),
        }
    }
}

impl<C> Default for ChannelRegistry<C> {
    fn default() -> Self {
        ChannelRegistry {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<C> ChannelRegistry<C> {
    /// Creates an empty registry.
    pub fn new() -> ChannelRegistry<C> {
        ChannelRegistry::default()
    }

    /// Stores the handle under the given name, returning the handle it replaced.
    ///
    /// # Parameters
    /// * `name` - Registry key of the channel
    /// * `handle` - The channel tagged with its mode
    ///
    /// # Returns
    /// The stale handle previously stored under `name`, if any
    pub fn register(&self, name: &str, handle: ChannelHandle<C>) -> Option<ChannelHandle<C>> {
        self.entries.write().insert(name.to_owned(), handle)
    }

    /// Looks up a plain channel.
    ///
    /// # Returns
    /// * `Result<Arc<C>, ChannelLookupError>` - `NotFound` when nothing is stored
    ///   under `name`, `WrongMode` when a confirm-mode channel is
    pub fn channel(&self, name: &str) -> Result<Arc<C>, ChannelLookupError> {
        match self.entries.read().get(name) {
            Some(ChannelHandle::Plain(channel)) => Ok(channel.clone()),
            Some(ChannelHandle::Confirm(_)) => Err(ChannelLookupError::WrongMode {
                name: name.to_owned(),
                requested: ChannelMode::Plain,
                actual: ChannelMode::Confirm,
            }),
            None => Err(ChannelLookupError::NotFound(name.to_owned())),
        }
    }

    /// Looks up a confirm-mode channel.
    ///
    /// # Returns
    /// * `Result<ConfirmChannel<C>, ChannelLookupError>` - `NotFound` when nothing is
    ///   stored under `name`, `WrongMode` when a plain channel is
    pub fn confirm_channel(&self, name: &str) -> Result<ConfirmChannel<C>, ChannelLookupError> {
        match self.entries.read().get(name) {
            Some(ChannelHandle::Confirm(channel)) => Ok(ConfirmChannel(channel.clone())),
            Some(ChannelHandle::Plain(_)) => Err(ChannelLookupError::WrongMode {
                name: name.to_owned(),
                requested: ChannelMode::Confirm,
                actual: ChannelMode::Plain,
            }),
            None => Err(ChannelLookupError::NotFound(name.to_owned())),
        }
    }

    /// Mode of the channel stored under `name`.
    pub fn mode(&self, name: &str) -> Option<ChannelMode> {
        self.entries.read().get(name).map(ChannelHandle::mode)
    }

    /// Removes the channel without closing it, returning its handle.
    pub fn remove(&self, name: &str) -> Option<ChannelHandle<C>> {
        self.entries.write().remove(name)
    }

    /// Empties the registry, handing every handle to the caller.
    pub fn drain(&self) -> Vec<(String, ChannelHandle<C>)> {
        self.entries.write().drain().collect()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
