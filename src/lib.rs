// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Broker Manager
//!
//! Keeps several named connections to a RabbitMQ broker alive, provisions the
//! exchange/queue topology once at startup and hands out channels by name.
//!
//! ```no_run
//! use amqp_broker::{config::TopologyDescriptor, manager::BrokerManager};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor = TopologyDescriptor::from_path("topology.json")?;
//! let manager = BrokerManager::with_lapin(descriptor)?;
//! manager.connect().await?;
//!
//! let channel = manager.get_channel("out")?;
//! # drop(channel);
//! manager.close_all().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod channel;
pub mod client;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod manager;
pub mod queue;
pub mod supervisor;
pub mod topology;
