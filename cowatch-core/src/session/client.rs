//! Per-connection adapter between a transport and a [`WatchSession`].

use async_trait::async_trait;
use cowatch_proto::{decode, Decoded, Message, ProtocolError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, CloseReason};
use super::watch::WatchSession;
use crate::models::{ClientId, UserId};
use crate::Result;

/// Inbound frame as seen by the session layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(usize),
}

/// Inbound half of a client transport
#[async_trait]
pub trait ClientStream: Send {
    /// Receive the next frame
    ///
    /// Returns None when the connection is closed
    async fn recv(&mut self) -> Option<std::result::Result<InboundFrame, String>>;
}

/// Reasons a connection is closed with a protocol-error code
#[derive(Error, Debug)]
pub enum ProtocolViolation {
    #[error("malformed message: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("message claims client id {claimed}")]
    SpoofedClientId { claimed: String },

    #[error("{0} is reserved for the super-master")]
    NotSuperMaster(&'static str),

    #[error("invalid playback state: {0}")]
    InvalidPlaybackState(String),

    #[error("binary frames are not supported")]
    BinaryFrame,
}

/// One joined client: validates its messages and routes them to the session.
#[derive(Debug)]
pub struct SessionClient {
    session: Arc<WatchSession>,
    client_id: ClientId,
    closed: CancellationToken,
}

impl SessionClient {
    /// Welcome a new client into `session`.
    pub async fn join(
        session: Arc<WatchSession>,
        connection: ClientConnection,
        display_name: String,
        user_id: UserId,
    ) -> Result<Self> {
        let closed = connection.closed();
        let client_id = session
            .welcome_client(connection, display_name, user_id)
            .await?;
        Ok(Self {
            session,
            client_id,
            closed,
        })
    }

    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.client_id
    }

    /// Process inbound frames until the client leaves, the session closes
    /// the connection, or the client violates the protocol.
    pub async fn run<S: ClientStream>(self, mut stream: S) {
        let close = loop {
            let frame = tokio::select! {
                biased;
                () = self.closed.cancelled() => {
                    debug!(client_id = %self.client_id, "Connection closed by session");
                    return;
                }
                frame = stream.recv() => frame,
            };

            let outcome = match frame {
                Some(Ok(InboundFrame::Text(text))) => self.handle_text(&text).await,
                Some(Ok(InboundFrame::Binary(_))) => Err(ProtocolViolation::BinaryFrame),
                Some(Err(e)) => {
                    debug!(client_id = %self.client_id, error = %e, "Client transport failed");
                    break CloseReason::NORMAL;
                }
                None => break CloseReason::NORMAL,
            };

            if let Err(violation) = outcome {
                warn!(
                    session_id = %self.session.id(),
                    client_id = %self.client_id,
                    error = %violation,
                    "Protocol violation, closing connection"
                );
                break CloseReason::PROTOCOL_ERROR;
            }
        };

        self.session.remove_client(&self.client_id, close).await;
    }

    /// Validate one text frame and apply it to the session.
    pub async fn handle_text(&self, text: &str) -> std::result::Result<(), ProtocolViolation> {
        let message = match decode(text)? {
            Decoded::Message(message) => message,
            Decoded::Unknown(kind) => {
                warn!(client_id = %self.client_id, %kind, "Ignoring unknown message type");
                return Ok(());
            }
        };

        if let Some(claimed) = message.claimed_client_id() {
            if claimed != self.client_id.as_str() {
                return Err(ProtocolViolation::SpoofedClientId {
                    claimed: claimed.to_string(),
                });
            }
        }

        match message {
            Message::PlaybackStatePing(ping) => {
                ping.playback_state
                    .validate()
                    .map_err(ProtocolViolation::InvalidPlaybackState)?;
                self.session
                    .playback_ping(&self.client_id, ping.playback_state)
                    .await;
            }
            Message::RequestPlaybackStateChange(ref request) => {
                request
                    .playback_state
                    .validate()
                    .map_err(ProtocolViolation::InvalidPlaybackState)?;
                self.session
                    .forward_to_super_master(&self.client_id, &message)
                    .await;
            }
            Message::RequestMediaChange(_) => {
                self.session
                    .forward_to_super_master(&self.client_id, &message)
                    .await;
            }
            Message::MediaChange(change) => {
                let ticket = self
                    .session
                    .begin_media_change(&self.client_id)
                    .await
                    .map_err(|_| ProtocolViolation::NotSuperMaster("mediaChange"))?;

                let session = Arc::clone(&self.session);
                let issuer = self.client_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.complete_media_change(ticket, change.media).await {
                        warn!(
                            session_id = %session.id(),
                            client_id = %issuer,
                            error = %e,
                            "Media change failed"
                        );
                        let failure = Message::BackendDebugInfo(serde_json::json!({
                            "event": "mediaChangeFailed",
                            "error": e.to_string(),
                        }));
                        session.send_to(&issuer, &failure).await;
                    }
                });
            }
            Message::BackendDebugInfo(data) => {
                info!(client_id = %self.client_id, %data, "Client debug info");
            }
            Message::Welcome(_)
            | Message::ClientConnect(_)
            | Message::ClientDisconnect(_)
            | Message::SuperMasterChange(_) => {
                warn!(
                    client_id = %self.client_id,
                    kind = message.kind(),
                    "Ignoring server-only message from client"
                );
            }
        }

        Ok(())
    }
}
