//! switchboard: a keyword-routing message hub
//!
//! The hub sits between loosely-coupled "actor" services (instrument
//! controllers) and "commander" clients. It accepts commands, routes each to
//! the right actor through a permission gate, fans the actor's replies out to
//! every interested listener, and keeps a live keyword-value cache per
//! source.
//!
//! # Architecture
//!
//! ```text
//!  commanders ──TCP──┐                      ┌──TCP── actors
//!                    ▼                      ▼
//!              [net::conn tasks]     [net::conn tasks]
//!                    │   decoded events    │
//!                    └──────► Hub ◄────────┘
//!                      (one task, no locks)
//!                    ┌────────┼────────────┐
//!                 KvStore  PermGate   Tasters/fan-out
//! ```
//!
//! All routing state lives in one task; connection tasks only move bytes and
//! decoded values. See [`hub`] for the event loop, [`codec`] for the wire
//! grammars, and [`client`] for the commander-side API.

pub mod auth;
pub mod cimap;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod hub;
pub mod kv;
pub mod msg;
pub mod net;
pub mod taster;
pub mod vocab;

use std::sync::Arc;

use tokio::sync::mpsc;

pub use crate::client::HubClient;
pub use crate::config::HubConfig;
pub use crate::error::{Error, Result};
pub use crate::hub::Hub;

/// Capacity of the hub event channel
const EVENT_QUEUE: usize = 1024;

/// Assemble and run a hub: dial every configured actor, listen for
/// commanders, and process events until shutdown.
pub async fn run(config: HubConfig) -> Result<()> {
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let conn_ids = Arc::new(net::ConnIds::new());
    let dialer = net::Dialer::new(conn_ids.clone(), events_tx.clone(), config.scratch_dir());

    for spec in config.actors.clone() {
        dialer.dial(spec);
    }

    let listen = config.listen.clone();
    let hub = Hub::new(config, events_tx.clone(), events_rx, dialer);

    tokio::select! {
        result = net::listen_commanders(listen, conn_ids, events_tx) => result,
        _ = hub.run() => Ok(()),
    }
}
