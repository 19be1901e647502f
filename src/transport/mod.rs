//! Session channel with automatic reconnection.
//!
//! [`Transport`] owns one background task that keeps a WebSocket open to
//! `{server}/sessions/{id}/ws`. Decoded [`InboundEvent`]s, including the
//! synthesized [`InboundEvent::Connected`] / [`InboundEvent::Disconnected`]
//! transitions, come out of the receiver returned by [`Transport::connect`].
//!
//! # Architecture
//!
//! ```text
//!   SessionEngine                      background task
//!        │  emit(OutboundEvent)              │
//!        │ ─────── Outgoing::Frame ───────►  │ ──► WsWriter
//!        │                                   │
//!        │  ◄──────── InboundEvent ───────── │ ◄── WsReader (decode once)
//!        │                                   │
//!        │  close()                          │
//!        │ ─────── Outgoing::Close ───────►  │ close frame, exit loop
//! ```
//!
//! # Reconnection
//!
//! After a failed attempt or a dropped connection the task waits a fixed
//! interval and tries again, until [`Channel::close`] is called. Frames
//! emitted while disconnected are dropped; higher layers rely on idempotent
//! upserts rather than replay.

// Rust guideline compliant 2026-02

pub mod socket;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::protocol::{InboundEvent, OutboundEvent, ProtocolError, ProtocolVersion};

/// Outbound side of the session channel, as the engine sees it.
pub trait Channel: fmt::Debug + Send {
    /// Queue an event for sending. Dropped if the channel is down.
    fn emit(&self, event: &OutboundEvent);

    /// Stop reconnecting and close the connection. Idempotent.
    fn close(&self);

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Whether [`Self::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Command from the handle to the background task.
#[derive(Debug)]
enum Outgoing {
    Frame(String),
    Close,
}

/// Connection options.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    /// Fixed delay between reconnection attempts.
    pub reconnect_interval: Duration,
    /// Outbound event naming.
    pub protocol: ProtocolVersion,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: crate::constants::RECONNECT_INTERVAL,
            protocol: ProtocolVersion::default(),
        }
    }
}

/// Handle to the background connection task.
pub struct Transport {
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    protocol: ProtocolVersion,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Spawn the connection task for `url` (a `ws://` or `wss://` URL).
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(
        url: impl Into<String>,
        options: TransportOptions,
    ) -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let config = ConnectionConfig {
            url: url.into(),
            reconnect_interval: options.reconnect_interval,
            connected: Arc::clone(&connected),
            shutdown: Arc::clone(&shutdown),
        };

        tokio::spawn(run_connection_loop(config, outgoing_rx, events_tx));

        let transport = Self {
            outgoing_tx,
            connected,
            shutdown,
            protocol: options.protocol,
        };
        (transport, events_rx)
    }
}

impl Channel for Transport {
    fn emit(&self, event: &OutboundEvent) {
        if self.shutdown.load(Ordering::SeqCst) {
            log::debug!("[Transport] Closed, dropping '{}'", event.name(self.protocol));
            return;
        }
        if !self.connected.load(Ordering::SeqCst) {
            log::debug!(
                "[Transport] Not connected, dropping '{}'",
                event.name(self.protocol)
            );
            return;
        }
        match event.to_envelope(self.protocol).encode() {
            Ok(text) => {
                let _ = self.outgoing_tx.send(Outgoing::Frame(text));
            }
            Err(e) => log::error!("[Transport] Failed to encode outbound event: {}", e),
        }
    }

    fn close(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            log::info!("[Transport] Closing session channel");
            let _ = self.outgoing_tx.send(Outgoing::Close);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build the session socket URL from the backend origin.
pub fn session_ws_url(server_url: &str, session_id: &str) -> String {
    format!(
        "{}/sessions/{}/ws",
        socket::http_to_ws_scheme(server_url.trim_end_matches('/')),
        session_id
    )
}

/// State shared between the handle and the task.
struct ConnectionConfig {
    url: String,
    reconnect_interval: Duration,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

/// Why an inner loop returned.
enum LoopExit {
    /// Close was requested or nobody is listening anymore.
    Shutdown,
    /// The connection dropped; reconnect.
    Disconnected,
}

/// Outer loop: connect, run, wait, repeat.
async fn run_connection_loop(
    config: ConnectionConfig,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    events_tx: mpsc::UnboundedSender<InboundEvent>,
) {
    // Last transition reported to the engine; repeated failures report once.
    let mut reported_up: Option<bool> = None;

    loop {
        if config.shutdown.load(Ordering::SeqCst) {
            log::info!("[Transport] Shutdown requested, exiting connection loop");
            break;
        }

        log::info!("[Transport] Connecting to {}", config.url);

        match socket::connect(&config.url).await {
            Ok((mut writer, mut reader)) => {
                log::info!("[Transport] WebSocket connected");
                config.connected.store(true, Ordering::SeqCst);
                reported_up = Some(true);
                if events_tx.send(InboundEvent::Connected).is_err() {
                    let _ = writer.close().await;
                    break;
                }

                let exit =
                    run_message_loop(&mut writer, &mut reader, &mut outgoing_rx, &events_tx).await;
                config.connected.store(false, Ordering::SeqCst);

                if let LoopExit::Shutdown = exit {
                    break;
                }
                log::info!(
                    "[Transport] Disconnected, reconnecting in {}ms",
                    config.reconnect_interval.as_millis()
                );
            }
            Err(e) => {
                log::warn!(
                    "[Transport] Connection failed: {:#} (retry in {}ms)",
                    e,
                    config.reconnect_interval.as_millis()
                );
            }
        }

        if reported_up != Some(false) {
            reported_up = Some(false);
            if events_tx.send(InboundEvent::Disconnected).is_err() {
                break;
            }
        }

        if let LoopExit::Shutdown = wait_before_retry(&config, &mut outgoing_rx).await {
            break;
        }
    }

    config.connected.store(false, Ordering::SeqCst);
    log::debug!("[Transport] Connection task finished");
}

/// Sleep out the reconnect interval while draining outbound frames.
async fn wait_before_retry(
    config: &ConnectionConfig,
    outgoing_rx: &mut mpsc::UnboundedReceiver<Outgoing>,
) -> LoopExit {
    let sleep = tokio::time::sleep(config.reconnect_interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return LoopExit::Disconnected,
            cmd = outgoing_rx.recv() => match cmd {
                Some(Outgoing::Frame(_)) => {
                    log::debug!("[Transport] Dropping frame while disconnected");
                }
                Some(Outgoing::Close) | None => return LoopExit::Shutdown,
            },
        }
    }
}

/// Inner loop for one live connection.
async fn run_message_loop(
    writer: &mut socket::WsWriter,
    reader: &mut socket::WsReader,
    outgoing_rx: &mut mpsc::UnboundedReceiver<Outgoing>,
    events_tx: &mpsc::UnboundedSender<InboundEvent>,
) -> LoopExit {
    loop {
        tokio::select! {
            msg = reader.recv() => match msg {
                Some(Ok(socket::WsMessage::Text(text))) => {
                    match InboundEvent::decode_frame(&text) {
                        Ok(event) => {
                            if events_tx.send(event).is_err() {
                                let _ = writer.close().await;
                                return LoopExit::Shutdown;
                            }
                        }
                        Err(ProtocolError::UnknownEvent(name)) => {
                            log::trace!("[Transport] Ignoring unknown event '{}'", name);
                        }
                        Err(e) => log::warn!("[Transport] Dropping frame: {}", e),
                    }
                }
                Some(Ok(socket::WsMessage::Ping(data))) => {
                    let _ = writer.send_pong(data).await;
                }
                Some(Ok(socket::WsMessage::Binary(data))) => {
                    log::trace!("[Transport] Ignoring {} byte binary frame", data.len());
                }
                Some(Ok(socket::WsMessage::Close { code, reason })) => {
                    log::info!("[Transport] Connection closed by server ({} {})", code, reason);
                    return LoopExit::Disconnected;
                }
                Some(Err(e)) => {
                    log::warn!("[Transport] WebSocket error: {:#}", e);
                    return LoopExit::Disconnected;
                }
                None => {
                    log::info!("[Transport] WebSocket stream ended");
                    return LoopExit::Disconnected;
                }
            },

            cmd = outgoing_rx.recv() => match cmd {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = writer.send_text(&text).await {
                        log::warn!("[Transport] Send failed: {:#}", e);
                        return LoopExit::Disconnected;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = writer.close().await;
                    return LoopExit::Shutdown;
                }
            },
        }
    }
}
