//! WebSocket transport
//!
//! Accepts connections and translates JSON protocol frames into broker calls.
//! Responsibilities:
//! - Accept TCP/WebSocket connections, refusing any beyond `max_connections`
//! - Open a bounded `Session` per connection and pump its deliveries, request
//!   replies and (for observers) admin events into the socket
//! - Call `Broker::disconnect` exactly once when the connection ends, however
//!   it ends

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tracing::{debug, error, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::notifier::AdminEvent;
use crate::broker::{Broker, Session};
use crate::config::Settings;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::utils::{BrokerError, Result};

pub async fn start_websocket_server(broker: Arc<Broker>, settings: &Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, broker, settings.broker.max_connections).await
}

/// Run the accept loop on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    broker: Arc<Broker>,
    max_connections: usize,
) -> Result<()> {
    info!("WebSocket server listening on ws://{}", listener.local_addr()?);
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };

        // only this loop increments, so check-then-increment cannot race
        if active.load(Ordering::SeqCst) >= max_connections {
            warn!(%peer, max_connections, "connection limit reached, refusing");
            drop(stream);
            continue;
        }
        let slot = ConnectionSlot::take(active.clone());
        let broker = broker.clone();

        tokio::spawn(async move {
            let _slot = slot;
            match handle_connection(stream, broker).await {
                Ok(()) => {}
                Err(BrokerError::Transport(e)) => debug!(%peer, "connection closed: {e}"),
                Err(e) => error!(%peer, "connection failed: {e}"),
            }
        });
    }
}

/// Counts one live connection until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn take(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active)
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Broker>) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (session, mut deliveries) = broker.open_session();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<ServerMessage>();
    let session_id = session.id.clone();
    info!(session = %session_id, "client connected");

    let mut conn = Connection::new(session, reply_tx);

    // broker → client
    let writer = async move {
        loop {
            let frame = tokio::select! {
                Some(delivery) = deliveries.recv() => ServerMessage::from(delivery),
                Some(reply) = replies.recv() => reply,
                else => break,
            };
            let text = serde_json::to_string(&frame)?;
            ws_sender.send(WsMessage::text(text)).await?;
        }
        Ok::<(), BrokerError>(())
    };

    // client → broker
    let reader = async {
        while let Some(frame) = ws_receiver.next().await {
            match frame? {
                WsMessage::Text(text) => conn.handle_text(&broker, text.as_str()),
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
        Ok::<(), BrokerError>(())
    };

    let outcome = tokio::select! {
        res = reader => res,
        res = writer => res,
    };

    drop(conn);
    broker.disconnect(&session_id);
    info!(session = %session_id, "client disconnected");
    outcome
}

/// Per-connection request handling, independent of the socket so it can be
/// driven directly.
pub(crate) struct Connection {
    session: Session,
    replies: UnboundedSender<ServerMessage>,
    admin_task: Option<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn new(session: Session, replies: UnboundedSender<ServerMessage>) -> Self {
        Self {
            session,
            replies,
            admin_task: None,
        }
    }

    fn reply(&self, frame: ServerMessage) {
        if self.replies.send(frame).is_err() {
            debug!(session = %self.session.id, "reply dropped, writer gone");
        }
    }

    pub(crate) fn handle_text(&mut self, broker: &Broker, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => self.handle(broker, msg),
            Err(err) => {
                warn!(
                    session = %self.session.id,
                    "invalid client message: {err} | {}",
                    text.chars().take(100).collect::<String>()
                );
                self.reply(ServerMessage::error(format!("invalid message: {err}")));
            }
        }
    }

    pub(crate) fn handle(&mut self, broker: &Broker, msg: ClientMessage) {
        let outcome = match msg {
            ClientMessage::Subscribe { consumer, topics } => broker
                .subscribe(&self.session, &consumer, &topics)
                .map(|_| ServerMessage::Subscribed { topics }),

            ClientMessage::Publish {
                topic,
                message,
                producer,
                message_id,
            } => broker
                .publish(
                    &topic,
                    &message,
                    producer.as_deref(),
                    message_id.as_deref(),
                )
                .map(|message_id| ServerMessage::Published { message_id }),

            ClientMessage::Consumed {
                consumer,
                topic,
                message_id,
                message,
            } => {
                if [&consumer, &topic, &message_id, &message]
                    .iter()
                    .any(|field| field.is_empty())
                {
                    Err(BrokerError::validation(
                        "consumed requires consumer, topic, message_id and message",
                    ))
                } else {
                    broker
                        .consumed(&consumer, &topic, &message_id, &message)
                        .map(|row| ServerMessage::Recorded {
                            message_id: row.message_id,
                        })
                }
            }

            ClientMessage::Watch => {
                self.watch(broker);
                Ok(ServerMessage::Watching)
            }

            ClientMessage::ListMessages => broker
                .list_messages()
                .map(|rows| ServerMessage::Messages { rows }),

            ClientMessage::ListSubscriptions => broker
                .list_subscriptions()
                .map(|rows| ServerMessage::Subscriptions { rows }),

            ClientMessage::ListConsumptions => broker
                .list_consumptions()
                .map(|rows| ServerMessage::Consumptions { rows }),
        };

        match outcome {
            Ok(frame) => self.reply(frame),
            Err(e) => {
                if e.is_validation() {
                    debug!(session = %self.session.id, "request rejected: {e}");
                } else {
                    error!(session = %self.session.id, "request failed: {e}");
                }
                self.reply(ServerMessage::error(e));
            }
        }
    }

    /// Start forwarding admin events to this connection. Repeated calls keep
    /// the existing forwarder.
    fn watch(&mut self, broker: &Broker) {
        if self.admin_task.is_some() {
            return;
        }
        info!(session = %self.session.id, "admin observer joined");
        let task = tokio::spawn(forward_admin_events(broker.watch(), self.replies.clone()));
        self.admin_task = Some(task);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.admin_task.take() {
            task.abort();
        }
    }
}

async fn forward_admin_events(
    mut events: broadcast::Receiver<AdminEvent>,
    replies: UnboundedSender<ServerMessage>,
) {
    loop {
        let frame = match events.recv().await {
            Ok(event) => ServerMessage::Admin { event },
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "admin observer lagged");
                ServerMessage::Lagged { missed }
            }
            Err(RecvError::Closed) => break,
        };
        if replies.send(frame).is_err() {
            break;
        }
    }
}
