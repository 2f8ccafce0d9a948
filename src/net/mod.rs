//! Socket plumbing
//!
//! Each connection runs as a reader task and a writer task. The reader
//! appends bounded chunks to a byte buffer and loops the codec until it
//! yields nothing, posting each decoded value into the hub's event channel.
//! The writer drains an unbounded queue of already-encoded chunks. A
//! zero-byte read, an I/O error, or unrecoverable framing damage tears the
//! connection down, never retried, and the closed event lets the hub
//! release everything the connection owned.

pub mod conn;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::{ActorSpec, ListenConfig};
use crate::error::Result;
use crate::hub::HubEvent;

/// Connection id allocator shared by the listener and the dialer
#[derive(Debug, Default)]
pub struct ConnIds(AtomicU64);

impl ConnIds {
    /// Create a new allocator starting at 1
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Allocate the next connection id
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Spawns outbound actor connections
#[derive(Clone)]
pub struct Dialer {
    conn_ids: Arc<ConnIds>,
    events_tx: mpsc::Sender<HubEvent>,
    scratch_dir: std::path::PathBuf,
}

impl Dialer {
    /// Create a dialer posting into the hub's event channel
    pub fn new(
        conn_ids: Arc<ConnIds>,
        events_tx: mpsc::Sender<HubEvent>,
        scratch_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            conn_ids,
            events_tx,
            scratch_dir,
        }
    }

    /// Dial one configured actor in the background
    pub fn dial(&self, spec: ActorSpec) {
        let conn_id = self.conn_ids.next();
        let events_tx = self.events_tx.clone();
        let scratch_dir = self.scratch_dir.clone();

        tokio::spawn(async move {
            tracing::info!(actor = %spec.name, addr = %spec.addr, "dialing actor");
            match TcpStream::connect(&spec.addr).await {
                Ok(socket) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::debug!(error = %e, "cannot set nodelay");
                    }
                    conn::run_actor_connection(socket, conn_id, spec, scratch_dir, events_tx)
                        .await;
                }
                Err(e) => {
                    tracing::error!(actor = %spec.name, addr = %spec.addr, error = %e, "dial failed");
                }
            }
        });
    }
}

/// Accept commander connections until the listener socket fails
pub async fn listen_commanders(
    listen: ListenConfig,
    conn_ids: Arc<ConnIds>,
    events_tx: mpsc::Sender<HubEvent>,
) -> Result<()> {
    let listener = TcpListener::bind(&listen.commanders).await?;
    tracing::info!(addr = %listen.commanders, needs_auth = listen.needs_auth, "listening for commanders");

    loop {
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                if let Err(e) = socket.set_nodelay(true) {
                    tracing::debug!(error = %e, "cannot set nodelay");
                }
                let conn_id = conn_ids.next();
                let events_tx = events_tx.clone();
                tracing::debug!(conn_id, peer = %peer_addr, "commander connection accepted");
                tokio::spawn(async move {
                    conn::run_commander_connection(socket, conn_id, peer_addr, events_tx).await;
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conn_id_allocation() {
        let ids = ConnIds::new();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }
}
