//! Session WebSocket handler
//!
//! Adapts axum's WebSocket to the core `ClientStream` / `OutboundQueue` pair.
//! All protocol handling lives in `SessionClient`; this module only moves
//! frames.

use axum::{
    extract::{
        ws::{
            rejection::WebSocketUpgradeRejection, CloseFrame, Message as WsMessage, Utf8Bytes,
            WebSocket,
        },
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use cowatch_core::models::{SessionId, UserId};
use cowatch_core::session::{
    ClientConnection, ClientStream, InboundFrame, Outbound, OutboundQueue, SessionClient,
};
use cowatch_core::WatchSession;
use cowatch_proto::SUBPROTOCOL;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::http::{AppError, AppResult, AppState};

/// Header carrying the caller identity set by the fronting auth proxy
pub const USER_HEADER: &str = "x-cowatch-user";

const DEFAULT_DISPLAY_NAME: &str = "Guest";
const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Display name shown to other participants
    pub name: Option<String>,
}

/// WebSocket stream implementation of `ClientStream`
struct WebSocketStream {
    receiver: SplitStream<WebSocket>,
}

#[async_trait::async_trait]
impl ClientStream for WebSocketStream {
    async fn recv(&mut self) -> Option<Result<InboundFrame, String>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    return Some(Ok(InboundFrame::Text(text.as_str().to_owned())));
                }
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return Some(Ok(InboundFrame::Binary(bytes.len())));
                }
                Some(Ok(WsMessage::Close(_))) => return None,
                Some(Err(e)) => return Some(Err(format!("WebSocket error: {e}"))),
                None => return None,
                // Ping and pong are answered by axum
                Some(Ok(_)) => {}
            }
        }
    }
}

/// WebSocket handler for a watch session
///
/// <ws://host/api/sessions/{session_id}/ws?name={display_name}>
///
/// Sub-protocol and identity are checked before the upgrade itself, so a
/// bad offer is answered with 400 whatever the transport.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let offers_subprotocol = match offered_subprotocols(&headers) {
        None => false,
        Some(offered) if offered.iter().any(|p| p == SUBPROTOCOL) => true,
        Some(offered) => {
            return Err(AppError::bad_request(format!(
                "Unsupported WebSocket sub-protocol(s): {}; expected {SUBPROTOCOL}",
                offered.join(", ")
            )));
        }
    };

    let display_name = display_name(query.name.as_deref());
    let user_id = user_id(&headers, &display_name)?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let session = state
        .store
        .get_or_create(&SessionId::from(session_id.as_str()))
        .await?;

    let ws = if offers_subprotocol {
        ws.protocols([SUBPROTOCOL])
    } else {
        ws
    };
    let client_buffer = state.config.sessions.client_buffer;

    Ok(ws
        .max_message_size(state.config.server.max_message_size)
        .on_upgrade(move |socket| {
            handle_socket(socket, session, display_name, user_id, client_buffer)
        })
        .into_response())
}

async fn handle_socket(
    socket: WebSocket,
    session: Arc<WatchSession>,
    display_name: String,
    user_id: UserId,
    client_buffer: usize,
) {
    let (sink, receiver) = socket.split();
    let (connection, queue) = ClientConnection::new(client_buffer);

    // The writer runs even when the join fails so the close frame is sent.
    let writer = tokio::spawn(write_outbound(sink, queue));

    match SessionClient::join(Arc::clone(&session), connection, display_name, user_id).await {
        Ok(client) => {
            info!(
                session_id = %session.id(),
                client_id = %client.id(),
                "WebSocket connection established"
            );
            let client_id = client.id().clone();
            client.run(WebSocketStream { receiver }).await;
            info!(
                session_id = %session.id(),
                client_id = %client_id,
                "WebSocket connection closed"
            );
        }
        Err(e) => {
            warn!(session_id = %session.id(), error = %e, "Failed to join session");
        }
    }

    if let Err(e) = writer.await {
        warn!(error = %e, "WebSocket writer task failed");
    }
}

/// Drain the outbound queue into the socket, finishing with a close frame.
async fn write_outbound(mut sink: SplitSink<WebSocket, WsMessage>, mut queue: OutboundQueue) {
    loop {
        match queue.next().await {
            Outbound::Text(text) => {
                if let Err(e) = sink.send(WsMessage::Text(Utf8Bytes::from(&*text))).await {
                    debug!(error = %e, "Failed to send WebSocket message");
                    break;
                }
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: reason.code,
                    reason: reason.reason.into(),
                };
                if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                    debug!(error = %e, "Failed to send WebSocket close frame");
                }
                break;
            }
        }
    }
}

/// Protocols listed in `Sec-WebSocket-Protocol`, or `None` when absent
fn offered_subprotocols(headers: &HeaderMap) -> Option<Vec<String>> {
    let values: Vec<&HeaderValue> = headers
        .get_all(axum::http::header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .into_iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|protocol| protocol.trim().to_string())
            .filter(|protocol| !protocol.is_empty())
            .collect(),
    )
}

fn display_name(requested: Option<&str>) -> String {
    let name: String = requested
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_DISPLAY_NAME_CHARS)
        .collect();
    if name.is_empty() {
        DEFAULT_DISPLAY_NAME.to_string()
    } else {
        name
    }
}

/// Identity from the auth proxy header, else an anonymous id derived from
/// the display name.
fn user_id(headers: &HeaderMap, display_name: &str) -> AppResult<UserId> {
    if let Some(value) = headers.get(USER_HEADER) {
        let value = value
            .to_str()
            .map_err(|_| AppError::bad_request(format!("Invalid {USER_HEADER} header")))?;
        if !SessionId::is_valid(value) {
            return Err(AppError::bad_request(format!(
                "Invalid {USER_HEADER} header: {value}"
            )));
        }
        return Ok(UserId::from(value));
    }

    let slug: String = display_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .take(32)
        .collect::<String>()
        .to_ascii_lowercase();
    Ok(UserId::from(format!("anon-{slug}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_offered_subprotocols() {
        assert_eq!(offered_subprotocols(&HeaderMap::new()), None);
        assert_eq!(
            offered_subprotocols(&headers(&[("sec-websocket-protocol", "chat, cowatch.v1")])),
            Some(vec!["chat".to_string(), "cowatch.v1".to_string()])
        );
        assert_eq!(
            offered_subprotocols(&headers(&[
                ("sec-websocket-protocol", "a"),
                ("sec-websocket-protocol", "b"),
            ])),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_display_name_defaults_and_trims() {
        assert_eq!(display_name(None), "Guest");
        assert_eq!(display_name(Some("   ")), "Guest");
        assert_eq!(display_name(Some("  Alice \n")), "Alice");
        assert_eq!(display_name(Some("x".repeat(100).as_str())).len(), MAX_DISPLAY_NAME_CHARS);
    }

    #[test]
    fn test_user_id_from_header_or_name() {
        let id = user_id(&headers(&[(USER_HEADER, "user_42")]), "Alice").unwrap();
        assert_eq!(id.as_str(), "user_42");

        let id = user_id(&HeaderMap::new(), "Alice Smith").unwrap();
        assert_eq!(id.as_str(), "anon-alicesmith");

        assert!(user_id(&headers(&[(USER_HEADER, "../root")]), "Alice").is_err());
    }
}
