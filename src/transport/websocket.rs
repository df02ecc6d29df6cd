//! WebSocket transport
//!
//! Each accepted connection gets its own `Session`. The connection task
//! multiplexes two inputs: JSON messages from the dashboard, which are turned
//! into session operations, and session events (pull results, acknowledge
//! results, lease ticks), which are rendered back as server messages. A lease
//! tick that flipped eligibility re-renders the list; any other tick only
//! sends the countdowns.
//! Outgoing frames go through a per-connection channel drained by a writer
//! task.

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tungstenite::protocol::Message as WsMessage;

use std::sync::Arc;

use crate::ack::AckOutcome;
use crate::broker::BrokerClient;
use crate::logs::LogSource;
use crate::scheduler::{PullOutcome, PullTrigger};
use crate::session::{Session, SessionEvent, SessionSettings};
use crate::transport::message::{ClientMessage, ServerMessage};

pub async fn start_websocket_server(
    addr: String,
    broker: Arc<dyn BrokerClient>,
    logs: Option<Arc<dyn LogSource>>,
    settings: SessionSettings,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("WebSocket server listening on ws://{addr}");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Failed to accept connection: {e}");
                continue;
            }
        };
        let broker = broker.clone();
        let logs = logs.clone();
        let settings = settings.clone();

        tokio::spawn(async move {
            let client_id = format!("client-{}", uuid::Uuid::new_v4());
            tracing::info!(client = client_id.as_str(), %peer, "Dashboard connected");
            handle_connection(stream, &client_id, broker, logs, settings).await;
            tracing::info!(client = client_id.as_str(), "Dashboard disconnected");
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    client_id: &str,
    broker: Arc<dyn BrokerClient>,
    logs: Option<Arc<dyn LogSource>>,
    settings: SessionSettings,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(client = client_id, "WebSocket handshake error: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    {
        let client_id = client_id.to_string();
        spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    tracing::warn!(client = client_id.as_str(), "Failed to send message: {e}");
                    break;
                }
            }
            tracing::debug!(client = client_id.as_str(), "Send loop closed");
        });
    }

    let mut session = Session::new(broker, settings);
    if let Some(logs) = logs {
        session = session.with_logs(logs);
    }
    send_all(&tx, [render_messages(&session)]);

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::warn!(client = client_id, "WebSocket read error: {e}");
                        break;
                    }
                    None => break,
                };
                if msg.is_close() {
                    break;
                }
                if !msg.is_text() {
                    continue;
                }
                let Ok(text) = msg.to_text() else {
                    continue;
                };
                send_all(&tx, handle_text(&mut session, text));
            }
            Some(event) = session.next_event() => {
                send_all(&tx, handle_session_event(&session, event));
            }
        }
    }
}

fn send_all(tx: &mpsc::UnboundedSender<WsMessage>, replies: impl IntoIterator<Item = ServerMessage>) {
    for reply in replies {
        match serde_json::to_string(&reply) {
            Ok(json) => {
                let _ = tx.send(WsMessage::Text(json.into()));
            }
            Err(e) => tracing::error!("Failed to encode server message: {e}"),
        }
    }
}

/// Parse one text frame and apply it to the session.
pub fn handle_text(session: &mut Session, text: &str) -> Vec<ServerMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => handle_client_message(session, msg),
        Err(err) => {
            tracing::warn!(
                "Invalid client message: {err} | {}",
                text.chars().take(100).collect::<String>()
            );
            vec![ServerMessage::error(format!("Invalid message: {err}"))]
        }
    }
}

/// Replies that can be sent right away. Results of broker calls arrive later
/// as session events.
pub fn handle_client_message(session: &mut Session, msg: ClientMessage) -> Vec<ServerMessage> {
    match msg {
        ClientMessage::ListTopics => {
            session.list_topics();
            vec![]
        }
        ClientMessage::ListSubscriptions { topic } => {
            session.list_subscriptions(&topic);
            vec![]
        }
        ClientMessage::SelectSubscription { subscription } => {
            session.select_subscription(&subscription);
            vec![render_messages(session)]
        }
        ClientMessage::Pull => {
            session.request_pull();
            vec![]
        }
        ClientMessage::Ack { ack_id } => {
            session.acknowledge(&ack_id);
            vec![]
        }
        ClientMessage::AutoRefresh { enabled } => {
            session.set_auto_refresh(enabled);
            vec![render_messages(session)]
        }
        ClientMessage::Filter(filter) => {
            session.set_filter(filter);
            vec![render_messages(session)]
        }
        ClientMessage::Publish { topic, payload } => {
            session.publish(&topic, &payload);
            vec![]
        }
        ClientMessage::Logs(query) => {
            session.query_logs(query);
            vec![]
        }
        ClientMessage::ListFunctions => vec![ServerMessage::Functions {
            functions: session.functions(),
        }],
        ClientMessage::Health => vec![ServerMessage::Health {
            status: "ok".to_string(),
            timestamp: chrono::Utc::now(),
            logs_enabled: session.logs_enabled(),
        }],
    }
}

pub fn handle_session_event(session: &Session, event: SessionEvent) -> Vec<ServerMessage> {
    match event {
        SessionEvent::Pulled(report) => {
            let manual = report.trigger == PullTrigger::Manual;
            match report.result {
                Ok(PullOutcome::Completed { received, .. }) => {
                    let mut replies = vec![render_messages(session)];
                    if manual && received == 0 {
                        replies.push(ServerMessage::info("No new messages"));
                    }
                    replies
                }
                Ok(PullOutcome::Throttled { retry_in }) if manual => {
                    vec![ServerMessage::warning(format!(
                        "Pull is cooling down, retry in {}s",
                        retry_in.as_secs_f64().ceil()
                    ))]
                }
                Ok(PullOutcome::NoSubscription) if manual => {
                    vec![ServerMessage::warning("Select a subscription first")]
                }
                Ok(_) => vec![],
                Err(e) => vec![ServerMessage::error(format!("Pull failed: {e}"))],
            }
        }
        SessionEvent::Acked { result, .. } => match result {
            Ok(AckOutcome::Acknowledged { id }) => vec![
                render_messages(session),
                ServerMessage::info(format!("Acknowledged {id}")),
            ],
            Ok(AckOutcome::NotFound) => {
                vec![ServerMessage::warning("Message is no longer pending")]
            }
            Ok(AckOutcome::Superseded { id }) => vec![
                render_messages(session),
                ServerMessage::warning(format!(
                    "{id} was redelivered while acknowledging, acknowledge it again"
                )),
            ],
            Ok(AckOutcome::Stale) => vec![],
            Err(e) => vec![ServerMessage::error(format!("Acknowledge failed: {e}"))],
        },
        SessionEvent::AckRefused { id } => vec![
            render_messages(session),
            ServerMessage::warning(format!("Lease for {id} expired, repull to acknowledge")),
        ],
        SessionEvent::Lease(event) if event.has_flips() => vec![render_messages(session)],
        SessionEvent::Lease(_) => vec![ServerMessage::Leases {
            leases: session.lease_snapshot(),
        }],
        SessionEvent::Topics(result) => match result {
            Ok(topics) => vec![ServerMessage::Topics { topics }],
            Err(e) => vec![ServerMessage::error(format!("Failed to list topics: {e}"))],
        },
        SessionEvent::Subscriptions { topic, result } => match result {
            Ok(subscriptions) => vec![ServerMessage::Subscriptions {
                topic,
                subscriptions,
            }],
            Err(e) => vec![ServerMessage::error(format!(
                "Failed to list subscriptions of {topic}: {e}"
            ))],
        },
        SessionEvent::Published { topic, result } => match result {
            Ok(message_id) => vec![ServerMessage::Published { topic, message_id }],
            Err(e) => vec![ServerMessage::error(format!("Publish to {topic} failed: {e}"))],
        },
        SessionEvent::Logs(result) => match result {
            Ok(page) => vec![ServerMessage::Logs {
                entries: page.entries,
                next_page_token: page.next_page_token,
            }],
            Err(e) => vec![ServerMessage::error(format!("Failed to fetch logs: {e}"))],
        },
    }
}

pub fn render_messages(session: &Session) -> ServerMessage {
    ServerMessage::Messages {
        subscription: session.subscription(),
        messages: session.snapshot(),
        pending: session.pending_len(),
        auto_refresh: session.auto_refresh_enabled(),
    }
}
