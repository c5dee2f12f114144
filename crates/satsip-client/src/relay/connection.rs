//! A single relay's WebSocket connection.
//!
//! Each connection runs as one task owning the socket. Callers talk to it
//! through an outbound channel; frames coming back are routed to waiting
//! queries and publishes by subscription id and event id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use satsip_nostr::Event;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::{ClientMessage, Filter, RelayMessage};
use super::{PoolConfig, RelayError, RelayStatus};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum SubscriptionMessage {
    Event(Event),
    Eose,
    Closed(String),
}

struct Acknowledgement {
    accepted: bool,
    message: String,
}

#[derive(Default)]
struct Router {
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<SubscriptionMessage>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Acknowledgement>>>,
}

impl Router {
    async fn dispatch(&self, url: &str, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                debug!(relay = url, error = %e, "Ignoring malformed relay frame");
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                if let Some(tx) = self.subscriptions.lock().await.get(&subscription_id) {
                    let _ = tx.send(SubscriptionMessage::Event(event));
                }
            }
            RelayMessage::Eose { subscription_id } => {
                if let Some(tx) = self.subscriptions.lock().await.get(&subscription_id) {
                    let _ = tx.send(SubscriptionMessage::Eose);
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                if let Some(tx) = self.subscriptions.lock().await.remove(&subscription_id) {
                    let _ = tx.send(SubscriptionMessage::Closed(message));
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if let Some(tx) = self.pending.lock().await.remove(&event_id) {
                    let _ = tx.send(Acknowledgement { accepted, message });
                }
            }
            RelayMessage::Notice { message } => {
                info!(relay = url, notice = %message, "Relay notice");
            }
        }
    }

    /// Drop every waiter so in-flight calls observe the disconnect.
    async fn clear(&self) {
        self.subscriptions.lock().await.clear();
        self.pending.lock().await.clear();
    }
}

/// Handle to one relay's connection task.
pub(crate) struct RelayConnection {
    url: String,
    outbound: mpsc::UnboundedSender<String>,
    connected: AtomicBool,
    router: Router,
}

impl RelayConnection {
    /// Start the connection task. It connects, pumps frames, and reconnects
    /// with backoff until `cancel` fires or the policy gives up.
    pub(crate) fn spawn(
        url: String,
        config: PoolConfig,
        status: broadcast::Sender<RelayStatus>,
        cancel: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            url,
            outbound,
            connected: AtomicBool::new(false),
            router: Router::default(),
        });
        let task = ConnectionTask {
            conn: Arc::clone(&conn),
            config,
            status,
            cancel,
            outbound_rx,
        };
        (conn, tokio::spawn(task.run()))
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, message: &ClientMessage) -> Result<(), RelayError> {
        if !self.is_connected() {
            return Err(RelayError::Disconnected {
                url: self.url.clone(),
            });
        }
        let frame = message.to_json()?;
        self.outbound
            .send(frame)
            .map_err(|_| RelayError::Disconnected {
                url: self.url.clone(),
            })
    }

    /// Stored events matching `filter`. Collects until `EOSE`; when the
    /// relay stays silent past `eose_timeout`, returns what arrived so far.
    pub(crate) async fn query(
        &self,
        filter: &Filter,
        eose_timeout: Duration,
    ) -> Result<Vec<Event>, RelayError> {
        let subscription_id = uuid::Uuid::new_v4().simple().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.router
            .subscriptions
            .lock()
            .await
            .insert(subscription_id.clone(), tx);

        if let Err(e) = self.send(&ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filter: filter.clone(),
        }) {
            self.router.subscriptions.lock().await.remove(&subscription_id);
            return Err(e);
        }

        let mut events = Vec::new();
        let collected = timeout(eose_timeout, async {
            while let Some(message) = rx.recv().await {
                match message {
                    SubscriptionMessage::Event(event) => {
                        if !filter.matches(&event) {
                            debug!(relay = %self.url, id = %event.id, "Dropping event outside filter");
                        } else if let Err(e) = event.verify() {
                            debug!(relay = %self.url, id = %event.id, error = %e, "Dropping unverifiable event");
                        } else {
                            events.push(event);
                        }
                    }
                    SubscriptionMessage::Eose => return Ok(()),
                    SubscriptionMessage::Closed(message) => {
                        return Err(RelayError::Closed {
                            url: self.url.clone(),
                            message,
                        });
                    }
                }
            }
            Err(RelayError::Disconnected {
                url: self.url.clone(),
            })
        })
        .await;

        if self
            .router
            .subscriptions
            .lock()
            .await
            .remove(&subscription_id)
            .is_some()
        {
            let _ = self.send(&ClientMessage::Close { subscription_id });
        }

        match collected {
            Ok(Ok(())) => Ok(events),
            Ok(Err(e)) if events.is_empty() => Err(e),
            Ok(Err(e)) => {
                debug!(relay = %self.url, error = %e, kept = events.len(), "Subscription ended early");
                Ok(events)
            }
            Err(_) => {
                debug!(relay = %self.url, kept = events.len(), "No EOSE before timeout");
                Ok(events)
            }
        }
    }

    /// Send an event and wait for the relay's `OK`.
    pub(crate) async fn publish(
        &self,
        event: &Event,
        ack_timeout: Duration,
    ) -> Result<(), RelayError> {
        let (tx, rx) = oneshot::channel();
        self.router
            .pending
            .lock()
            .await
            .insert(event.id.clone(), tx);

        if let Err(e) = self.send(&ClientMessage::Event(event.clone())) {
            self.router.pending.lock().await.remove(&event.id);
            return Err(e);
        }

        match timeout(ack_timeout, rx).await {
            Ok(Ok(ack)) if ack.accepted => Ok(()),
            Ok(Ok(ack)) => Err(RelayError::Rejected {
                url: self.url.clone(),
                message: ack.message,
            }),
            Ok(Err(_)) => Err(RelayError::Disconnected {
                url: self.url.clone(),
            }),
            Err(_) => {
                self.router.pending.lock().await.remove(&event.id);
                Err(RelayError::AckTimeout {
                    url: self.url.clone(),
                    timeout_ms: u64::try_from(ack_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Cancelled,
    Dropped,
}

struct ConnectionTask {
    conn: Arc<RelayConnection>,
    config: PoolConfig,
    status: broadcast::Sender<RelayStatus>,
    cancel: CancellationToken,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let url = self.conn.url.clone();
        let mut attempt: u32 = 0;

        loop {
            let outcome = tokio::select! {
                () = self.cancel.cancelled() => return,
                result = timeout(self.config.connect_timeout, connect_async(url.as_str())) => result,
            };

            match outcome {
                Ok(Ok((ws, _response))) => {
                    attempt = 0;
                    // Anything queued while offline belongs to calls that
                    // already failed.
                    while self.outbound_rx.try_recv().is_ok() {}
                    self.conn.connected.store(true, Ordering::SeqCst);
                    info!(relay = %url, "Relay connected");
                    let _ = self.status.send(RelayStatus::Connected { url: url.clone() });

                    let exit = pump(&self.conn, ws, &mut self.outbound_rx, &self.cancel).await;

                    self.conn.connected.store(false, Ordering::SeqCst);
                    self.conn.router.clear().await;
                    let _ = self
                        .status
                        .send(RelayStatus::Disconnected { url: url.clone() });
                    if exit == Exit::Cancelled {
                        debug!(relay = %url, "Relay connection closed");
                        return;
                    }
                    info!(relay = %url, "Relay disconnected");
                }
                Ok(Err(e)) => warn!(relay = %url, error = %e, "Relay connection failed"),
                Err(_) => warn!(
                    relay = %url,
                    timeout_ms = self.config.connect_timeout.as_millis(),
                    "Relay connection timed out"
                ),
            }

            if !self.config.reconnect.should_retry(attempt) {
                warn!(relay = %url, attempt, "Giving up on relay");
                return;
            }
            let delay = self.config.reconnect.delay_for_attempt(attempt);
            debug!(relay = %url, attempt, delay_ms = delay.as_millis(), "Reconnecting");
            tokio::select! {
                () = sleep(delay) => {}
                () = self.cancel.cancelled() => return,
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

async fn pump(
    conn: &RelayConnection,
    ws: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
) -> Exit {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Exit::Cancelled;
            }
            outbound = outbound_rx.recv() => {
                let Some(text) = outbound else {
                    return Exit::Cancelled;
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    warn!(relay = %conn.url, error = %e, "Relay write failed");
                    return Exit::Dropped;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => conn.router.dispatch(&conn.url, text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => return Exit::Dropped,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(relay = %conn.url, error = %e, "Relay read failed");
                    return Exit::Dropped;
                }
            }
        }
    }
}
