//! Commander-side client
//!
//! Connects to the hub as a commander and exposes command calls as handles
//! whose reply streams resolve on the terminal reply.
//!
//! # Example
//! ```no_run
//! use switchboard::client::HubClient;
//!
//! # async fn example() -> switchboard::error::Result<()> {
//! let (mut client, mut updates) = HubClient::connect("localhost:6093").await?;
//!
//! // Unsolicited broadcasts arrive on the update stream.
//! tokio::spawn(async move {
//!     while let Some(reply) = updates.recv().await {
//!         println!("{}: {:?}", reply.source, reply.keys);
//!     }
//! });
//!
//! client.login("PU04", "obs2", "sekrit").await?;
//! let outcome = client.call("tcc", "track 121.3 -4.2").await?;
//! println!("finished with {}", outcome.flag);
//! # Ok(())
//! # }
//! ```
//!
//! Threading: a background reader task routes incoming lines to the call
//! table. Allocating a message id, registering its reply channel, and
//! queueing the outgoing line happen under one coarse lock, so two callers
//! can never race onto the same id. The lock is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::auth::login::challenge_response;
use crate::codec::ascii::{encode_client_command, parse_routed_reply, RoutedReply};
use crate::codec::take_line;
use crate::error::{ClientError, Result};
use crate::msg::ReplyFlag;

/// Everything a finished call produced
#[derive(Debug)]
pub struct CallOutcome {
    /// Terminal flag the call finished with
    pub flag: ReplyFlag,
    /// Every reply, terminal included, in arrival order
    pub replies: Vec<RoutedReply>,
}

impl CallOutcome {
    /// True when the call finished ok
    pub fn ok(&self) -> bool {
        self.flag == ReplyFlag::Done
    }
}

/// One outstanding call
pub struct CallHandle {
    mid: u32,
    rx: mpsc::UnboundedReceiver<RoutedReply>,
}

impl CallHandle {
    /// The message id this call went out under
    pub fn mid(&self) -> u32 {
        self.mid
    }

    /// Next reply, `None` once the terminal reply has been taken or the
    /// connection is gone
    pub async fn next(&mut self) -> Option<RoutedReply> {
        self.rx.recv().await
    }

    /// Collect replies until the terminal one
    pub async fn done(mut self) -> Result<CallOutcome> {
        let mut replies = Vec::new();
        while let Some(reply) = self.rx.recv().await {
            let flag = reply.flag;
            replies.push(reply);
            if flag.is_terminal() {
                return Ok(CallOutcome { flag, replies });
            }
        }
        Err(ClientError::ConnectionClosed.into())
    }
}

struct CallTable {
    next_mid: u32,
    pending: HashMap<u32, mpsc::UnboundedSender<RoutedReply>>,
}

/// Client connection to the hub
pub struct HubClient {
    calls: Arc<Mutex<CallTable>>,
    writer_tx: mpsc::UnboundedSender<Bytes>,
}

impl HubClient {
    /// Connect to a hub.
    ///
    /// Returns the client and a stream of unsolicited replies (broadcasts
    /// and completion notes for other commanders' commands).
    pub async fn connect(addr: &str) -> Result<(Self, mpsc::UnboundedReceiver<RoutedReply>)> {
        let socket = TcpStream::connect(addr).await?;
        let _ = socket.set_nodelay(true);
        let (mut read_half, mut write_half) = socket.into_split();

        let calls = Arc::new(Mutex::new(CallTable {
            next_mid: 1,
            pending: HashMap::new(),
        }));
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Bytes>();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(chunk) = writer_rx.recv().await {
                if write_half.write_all(&chunk).await.is_err() {
                    break;
                }
            }
        });

        let reader_calls = Arc::clone(&calls);
        tokio::spawn(async move {
            let mut buf = BytesMut::with_capacity(8 * 1024);
            loop {
                while let Some(line) = take_line(&mut buf) {
                    if let Some(reply) = parse_routed_reply(&line) {
                        route_reply(&reader_calls, &updates_tx, reply);
                    }
                }
                buf.reserve(8 * 1024);
                match read_half.read_buf(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            // Dropping the pending senders resolves every outstanding call
            // with ConnectionClosed.
            if let Ok(mut calls) = reader_calls.lock() {
                calls.pending.clear();
            }
        });

        Ok((Self { calls, writer_tx }, updates_rx))
    }

    /// Issue a command; the handle streams its replies
    pub fn send(&self, target: &str, text: &str) -> CallHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        // One lock around id allocation, registration, and transmit.
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        let mid = calls.next_mid;
        calls.next_mid += 1;
        calls.pending.insert(mid, tx);
        let _ = self
            .writer_tx
            .send(encode_client_command(mid, target, text));
        drop(calls);
        CallHandle { mid, rx }
    }

    /// Issue a command and wait for its terminal reply
    pub async fn call(&self, target: &str, text: &str) -> Result<CallOutcome> {
        self.send(target, text).done().await
    }

    /// Like [`call`](Self::call), failing if no terminal reply arrives in time
    pub async fn call_with_timeout(
        &self,
        target: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<CallOutcome> {
        match tokio::time::timeout(deadline, self.call(target, text)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::TimedOut.into()),
        }
    }

    /// Run the login handshake: knockKnock for a nonce, then answer the
    /// challenge. The password never crosses the wire.
    pub async fn login(&mut self, program: &str, username: &str, password: &str) -> Result<()> {
        let knock = self.call("knockKnock", "").await?;
        if !knock.ok() {
            return Err(ClientError::LoginRejected("knockKnock refused".into()).into());
        }
        let nonce = knock
            .replies
            .iter()
            .find_map(|r| r.keys.get("nonce").and_then(|v| v.as_scalar()))
            .map(str::to_string)
            .ok_or_else(|| ClientError::LoginRejected("no nonce offered".into()))?;

        let response = challenge_response(&nonce, password);
        let text = format!(
            "program={} username={} password={}",
            program, username, response
        );
        let outcome = self.call("login", &text).await?;
        if outcome.ok() {
            Ok(())
        } else {
            let why = outcome
                .replies
                .iter()
                .find_map(|r| r.keys.get("why").and_then(|v| v.as_scalar()))
                .unwrap_or("login refused")
                .to_string();
            Err(ClientError::LoginRejected(why).into())
        }
    }

    /// Log out, returning the connection to the unauthenticated state
    pub async fn logout(&mut self) -> Result<()> {
        self.call("logout", "").await.map(|_| ())
    }
}

fn route_reply(
    calls: &Mutex<CallTable>,
    updates_tx: &mpsc::UnboundedSender<RoutedReply>,
    reply: RoutedReply,
) {
    let mut calls = match calls.lock() {
        Ok(calls) => calls,
        Err(_) => return,
    };
    let mid = reply.key.mid;
    let terminal = reply.flag.is_terminal();

    match calls.pending.get(&mid) {
        Some(tx) if mid != 0 => {
            if tx.send(reply).is_err() {
                calls.pending.remove(&mid);
                return;
            }
            if terminal {
                calls.pending.remove(&mid);
            }
        }
        _ => {
            let _ = updates_tx.send(reply);
        }
    }
}
