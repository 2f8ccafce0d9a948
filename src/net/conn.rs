//! Per-connection reader and writer tasks

use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::codec::{self, ascii};
use crate::config::ActorSpec;
use crate::hub::HubEvent;

/// Upper bound on one read; keeps a busy peer from starving the others
const READ_CHUNK: usize = 16 * 1024;

/// Run one actor connection until it tears down
pub async fn run_actor_connection(
    socket: TcpStream,
    conn_id: u64,
    spec: ActorSpec,
    scratch_dir: std::path::PathBuf,
    events_tx: mpsc::Sender<HubEvent>,
) {
    let (mut read_half, write_half) = socket.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    if events_tx
        .send(HubEvent::ActorConnected {
            conn_id,
            name: spec.name.clone(),
            tx,
        })
        .await
        .is_err()
    {
        return; // hub is gone
    }

    tokio::spawn(run_writer(write_half, rx, conn_id));

    let mut decoder = codec::make_codec(spec.codec, scratch_dir);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let error = loop {
        // Drain every complete frame before reading more.
        let decode_error = loop {
            match decoder.decode(&mut buf) {
                Ok(Some(line)) => {
                    if events_tx
                        .send(HubEvent::ActorReply { conn_id, line })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => break None,
                Err(e) => break Some(e.to_string()),
            }
        };
        if let Some(e) = decode_error {
            break Some(e);
        }

        buf.reserve(READ_CHUNK);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => break None,
            Ok(_) => {}
            Err(e) => break Some(e.to_string()),
        }
    };

    let _ = events_tx
        .send(HubEvent::ActorClosed { conn_id, error })
        .await;
}

/// Run one commander connection until it tears down
pub async fn run_commander_connection(
    socket: TcpStream,
    conn_id: u64,
    peer_addr: SocketAddr,
    events_tx: mpsc::Sender<HubEvent>,
) {
    let (mut read_half, write_half) = socket.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    if events_tx
        .send(HubEvent::CommanderConnected {
            conn_id,
            peer: peer_addr.to_string(),
            tx,
        })
        .await
        .is_err()
    {
        return;
    }

    tokio::spawn(run_writer(write_half, rx, conn_id));

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let error = loop {
        while let Some(line) = codec::take_line(&mut buf) {
            if let Some(parsed) = ascii::parse_command_line(&line) {
                if events_tx
                    .send(HubEvent::CommanderLine {
                        conn_id,
                        line: parsed,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        buf.reserve(READ_CHUNK);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => break None,
            Ok(_) => {}
            Err(e) => break Some(e.to_string()),
        }
    };

    let _ = events_tx
        .send(HubEvent::CommanderClosed { conn_id, error })
        .await;
}

/// Drain the outbound queue into the socket. Ends when the hub drops the
/// sender or the write fails; dropping the write half sends FIN, which the
/// reader then sees as end-of-file.
async fn run_writer(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    conn_id: u64,
) {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = write_half.write_all(&chunk).await {
            tracing::debug!(conn_id, error = %e, "write failed");
            break;
        }
    }
    tracing::debug!(conn_id, "writer done");
}
