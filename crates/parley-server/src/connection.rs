//! Per-connection handler: frames in, events and acknowledgements out.
//!
//! Each connection is one task. While a turn runs, the task forwards its
//! events and keeps serving START and PART frames for the next upload; a
//! disconnect abandons the turn.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parley_chat::{ChatError, ChatInput, Orchestrator};
use parley_common::{new_connection_id, ConnectionId, FrameAck, StreamEvent};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;

use crate::auth::TokenVerifier;
use crate::protocol::Frame;
use crate::reassembler::{Reassembled, Reassembler};


type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;
type SendResult = Result<(), tungstenite::Error>;

/// Everything a connection task needs, shared by all connections.
pub struct AppState {
    pub reassembler: Reassembler,
    pub verifier: Arc<dyn TokenVerifier>,
    pub orchestrator: Arc<Orchestrator>,
    /// Model alias for requests that name none.
    pub default_model: String,
}

/// Handle a single WebSocket connection until it closes.
pub async fn handle_connection(ws: WebSocketStream<TcpStream>, addr: SocketAddr, state: Arc<AppState>) {
    let connection = new_connection_id();
    let (mut sink, mut stream) = ws.split();
    tracing::info!(peer = %addr, connection = %connection, "Client connected");

    while let Some(frame) = stream.next().await {
        let result = match frame {
            Ok(Message::Text(text)) => {
                handle_frame(&mut sink, &mut stream, &state, &connection, &text).await
            }
            Ok(Message::Ping(data)) => sink.send(Message::Pong(data)).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(peer = %addr, error = %e, "WS error");
                break;
            }
        };
        if let Err(e) = result {
            tracing::debug!(connection = %connection, error = %e, "Send failed");
            break;
        }
    }

    tracing::info!(peer = %addr, connection = %connection, "Client disconnected");
}

async fn handle_frame(
    sink: &mut WsSink,
    stream: &mut WsStream,
    state: &AppState,
    connection: &ConnectionId,
    text: &str,
) -> SendResult {
    match parse_frame(sink, connection, text).await? {
        Some(Frame::Start { token }) => start_session(sink, state, connection, &token).await,
        Some(Frame::Part { index, part }) => store_part(sink, state, connection, index, part).await,
        Some(Frame::End) => {
            let Reassembled { user_id, payload } = match state.reassembler.close_session(connection).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(connection = %connection, error = %e, "END without session");
                    return report(sink, &e).await;
                }
            };
            let input = match ChatInput::from_json(&payload, &state.default_model) {
                Ok(input) => input,
                Err(e) => {
                    tracing::warn!(connection = %connection, error = %e, "Unparseable request");
                    return report(sink, &e).await;
                }
            };
            run_turn(sink, stream, state, connection, &user_id, &input).await
        }
        None => Ok(()),
    }
}

/// Parse a text frame. A malformed frame is reported and yields `None`.
async fn parse_frame(
    sink: &mut WsSink,
    connection: &ConnectionId,
    text: &str,
) -> Result<Option<Frame>, tungstenite::Error> {
    match Frame::parse(text) {
        Ok(frame) => Ok(Some(frame)),
        Err(e) => {
            tracing::warn!(connection = %connection, error = %e, "Rejected frame");
            report(sink, &e).await?;
            Ok(None)
        }
    }
}

async fn start_session(
    sink: &mut WsSink,
    state: &AppState,
    connection: &ConnectionId,
    token: &str,
) -> SendResult {
    match state.verifier.verify(token) {
        Ok(user_id) => {
            state.reassembler.open_session(connection, &user_id).await;
            send_ack(sink, &FrameAck::ok("Session started.")).await
        }
        Err(e) => {
            tracing::warn!(connection = %connection, "START rejected: invalid token");
            send_ack(sink, &FrameAck::new(e.status_code(), e.ack_body())).await
        }
    }
}

async fn store_part(
    sink: &mut WsSink,
    state: &AppState,
    connection: &ConnectionId,
    index: u32,
    part: String,
) -> SendResult {
    state.reassembler.append_fragment(connection, index, part).await;
    send_ack(sink, &FrameAck::ok("Message part received.")).await
}

/// Drive one turn, forwarding its events in order. Returns an error when the
/// client went away; the turn future is dropped with it.
async fn run_turn(
    sink: &mut WsSink,
    stream: &mut WsStream,
    state: &AppState,
    connection: &ConnectionId,
    user_id: &str,
    input: &ChatInput,
) -> SendResult {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<StreamEvent>();
    let turn = state.orchestrator.run_turn(user_id, input, &events_tx);
    tokio::pin!(turn);

    let ack = loop {
        tokio::select! {
            biased;

            Some(event) = events_rx.recv() => {
                send_event(sink, &event).await?;
            }

            ack = &mut turn => break ack,

            frame = stream.next() => match frame {
                // The next upload may start while this turn streams.
                Some(Ok(Message::Text(text))) => match parse_frame(sink, connection, &text).await? {
                    Some(Frame::Start { token }) => start_session(sink, state, connection, &token).await?,
                    Some(Frame::Part { index, part }) => {
                        store_part(sink, state, connection, index, part).await?
                    }
                    Some(Frame::End) => {
                        tracing::warn!(connection = %connection, "END while a turn is running");
                        let busy = ChatError::InvalidInput("a turn is already running".into());
                        report(sink, &busy).await?
                    }
                    None => {}
                },
                Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    tracing::info!(connection = %connection, "Client left mid-turn, abandoning turn");
                    return Err(tungstenite::Error::ConnectionClosed);
                }
                Some(Ok(_)) => {}
            },
        }
    };

    while let Ok(event) = events_rx.try_recv() {
        send_event(sink, &event).await?;
    }
    send_ack(sink, &ack).await
}

/// ERROR event followed by the matching acknowledgement.
async fn report(sink: &mut WsSink, e: &ChatError) -> SendResult {
    send_event(sink, &StreamEvent::error(e.reason())).await?;
    send_ack(sink, &FrameAck::new(e.status_code(), e.ack_body())).await
}

async fn send_event(sink: &mut WsSink, event: &StreamEvent) -> SendResult {
    sink.send(Message::Text(event.to_json().into())).await
}

async fn send_ack(sink: &mut WsSink, ack: &FrameAck) -> SendResult {
    sink.send(Message::Text(ack.to_json().into())).await
}
