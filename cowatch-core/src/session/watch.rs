//! Authoritative per-room state: membership, current media, playback state
//! and the super-master.
//!
//! All mutation happens under one async mutex, and every broadcast is queued
//! while that lock is held, so a state change and its broadcast are never
//! interleaved with another message of the same session. Queues are bounded
//! and written with `try_send`; a client that cannot keep up is dropped
//! instead of stalling everyone else.

use cowatch_proto::{
    encode, ClientDisconnectData, ClientInfo, MediaChangeData, MediaData, Message, PlaybackState,
    PlaybackStatePingData, SuperMasterChangeData, WelcomeData,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::connection::{ClientConnection, CloseReason, SendFailure};
use super::SessionServices;
use crate::media::SessionMedia;
use crate::models::{ClientId, SessionId, UserId};
use crate::storage::SessionDirs;
use crate::{Error, Result};

struct ConnectedClient {
    display_name: String,
    user_id: UserId,
    connection: ClientConnection,
}

#[derive(Default)]
struct SessionState {
    /// Insertion-ordered so election is deterministic
    clients: IndexMap<ClientId, ConnectedClient>,
    super_master: Option<ClientId>,
    playback: PlaybackState,
    media: Option<SessionMedia>,
    /// Epoch of the media change currently committed
    committed_epoch: u64,
    shut_down: bool,
}

#[derive(Clone, Copy)]
enum Audience<'a> {
    All,
    AllExcept(&'a ClientId),
    Only(&'a ClientId),
}

/// Authorization to run one media change, obtained from
/// [`WatchSession::begin_media_change`].
#[derive(Debug, Clone)]
pub struct MediaChangeTicket {
    issuer: ClientId,
    issuer_user: UserId,
    epoch: u64,
}

impl MediaChangeTicket {
    #[must_use]
    pub fn issuer(&self) -> &ClientId {
        &self.issuer
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub clients: Vec<ClientInfo>,
    pub super_master_id: Option<String>,
    pub media: Option<MediaData>,
    pub playback_state: PlaybackState,
}

pub struct WatchSession {
    id: SessionId,
    dirs: SessionDirs,
    services: Arc<SessionServices>,
    state: Mutex<SessionState>,
    media_epoch: AtomicU64,
}

impl std::fmt::Debug for WatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSession")
            .field("id", &self.id)
            .field("dirs", &self.dirs)
            .finish_non_exhaustive()
    }
}

impl WatchSession {
    #[must_use]
    pub fn new(id: SessionId, services: Arc<SessionServices>) -> Self {
        let dirs = SessionDirs::new(&services.sessions_dir, &id);
        Self {
            id,
            dirs,
            services,
            state: Mutex::new(SessionState::default()),
            media_epoch: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn dirs(&self) -> &SessionDirs {
        &self.dirs
    }

    pub async fn client_count(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    pub async fn super_master(&self) -> Option<ClientId> {
        self.state.lock().await.super_master.clone()
    }

    pub async fn playback_state(&self) -> PlaybackState {
        self.state.lock().await.playback
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await;
        SessionSnapshot {
            id: self.id.to_string(),
            clients: roster(&state),
            super_master_id: state.super_master.as_ref().map(ToString::to_string),
            media: state.media.as_ref().map(|media| media.data().clone()),
            playback_state: state.playback,
        }
    }

    /// Register a new client and send it the full session state.
    ///
    /// The client receives `welcome` followed by `backendDebugInfo`; everyone
    /// else receives `clientConnect`. Election runs if nobody holds authority.
    pub async fn welcome_client(
        &self,
        connection: ClientConnection,
        display_name: String,
        user_id: UserId,
    ) -> Result<ClientId> {
        let mut state = self.state.lock().await;

        if state.shut_down {
            connection.close(CloseReason::GOING_AWAY);
            return Err(Error::NotFound(format!("Session {} is closed", self.id)));
        }
        if state.clients.len() >= self.services.max_clients {
            connection.close(CloseReason::SESSION_FULL);
            return Err(Error::SessionFull(format!(
                "Session {} already has {} clients",
                self.id,
                state.clients.len()
            )));
        }

        let client_id = loop {
            let candidate = ClientId::new();
            if !state.clients.contains_key(&candidate) {
                break candidate;
            }
        };

        state.clients.insert(
            client_id.clone(),
            ConnectedClient {
                display_name: display_name.clone(),
                user_id: user_id.clone(),
                connection,
            },
        );
        info!(
            session_id = %self.id,
            client_id = %client_id,
            user_id = %user_id,
            display_name = %display_name,
            clients = state.clients.len(),
            "Client joined"
        );

        let welcome = Message::Welcome(WelcomeData {
            client_id: client_id.to_string(),
            display_name: display_name.clone(),
            clients: roster(&state),
            super_master_id: state.super_master.as_ref().map(ToString::to_string),
            media: state.media.as_ref().map(|media| media.data().clone()),
            playback_state: state.playback,
        });
        self.deliver(&mut state, Audience::Only(&client_id), &welcome);

        let debug_info = Message::BackendDebugInfo(serde_json::json!({
            "sessionId": self.id.as_str(),
            "clientCount": state.clients.len(),
            "mediaMode": state.media.as_ref().map(|media| media.mode().as_str()),
        }));
        self.deliver(&mut state, Audience::Only(&client_id), &debug_info);

        let connect = Message::ClientConnect(ClientInfo {
            client_id: client_id.to_string(),
            display_name,
        });
        self.deliver(&mut state, Audience::AllExcept(&client_id), &connect);

        self.elect(&mut state);

        Ok(client_id)
    }

    /// Remove a client and close its connection with `reason`.
    ///
    /// Returns `false` if the client was already gone.
    pub async fn remove_client(&self, client_id: &ClientId, reason: CloseReason) -> bool {
        let mut state = self.state.lock().await;
        if !state.clients.contains_key(client_id) {
            return false;
        }
        self.drop_clients(&mut state, vec![(client_id.clone(), reason)]);
        true
    }

    /// Record a client's playback progress and relay it to everyone else.
    ///
    /// Only the super-master's pings change the session's playback state.
    pub async fn playback_ping(&self, from: &ClientId, playback: PlaybackState) {
        let mut state = self.state.lock().await;
        if !state.clients.contains_key(from) {
            return;
        }

        if state.super_master.as_ref() == Some(from) {
            state.playback = playback;
        }

        let ping = Message::PlaybackStatePing(PlaybackStatePingData {
            client_id: from.to_string(),
            playback_state: playback,
        });
        self.deliver(&mut state, Audience::AllExcept(from), &ping);
    }

    /// Hand a change request to the super-master, who decides whether to act.
    pub async fn forward_to_super_master(&self, from: &ClientId, request: &Message) {
        let mut state = self.state.lock().await;
        if !state.clients.contains_key(from) {
            return;
        }

        match state.super_master.clone() {
            Some(master) if &master != from => {
                debug!(
                    session_id = %self.id,
                    from = %from,
                    to = %master,
                    kind = request.kind(),
                    "Forwarding request to super-master"
                );
                self.deliver(&mut state, Audience::Only(&master), request);
            }
            Some(_) => {
                debug!(session_id = %self.id, client_id = %from, "Super-master sent a request to itself");
            }
            None => {
                debug!(session_id = %self.id, client_id = %from, "No super-master to forward request to");
            }
        }
    }

    /// Send one message to a single client.
    pub async fn send_to(&self, client_id: &ClientId, message: &Message) {
        let mut state = self.state.lock().await;
        if state.clients.contains_key(client_id) {
            self.deliver(&mut state, Audience::Only(client_id), message);
        }
    }

    /// Authorize a media change; only the current super-master may start one.
    pub async fn begin_media_change(&self, issuer: &ClientId) -> Result<MediaChangeTicket> {
        let state = self.state.lock().await;

        if state.super_master.as_ref() != Some(issuer) {
            return Err(Error::Authorization(format!(
                "Client {issuer} is not the super-master of session {}",
                self.id
            )));
        }
        let Some(client) = state.clients.get(issuer) else {
            return Err(Error::NotFound(format!("Client {issuer} is not connected")));
        };

        Ok(MediaChangeTicket {
            issuer: issuer.clone(),
            issuer_user: client.user_id.clone(),
            epoch: self.media_epoch.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    /// Initialize the requested media and make it current.
    ///
    /// `init` runs without the session lock, so the session keeps serving
    /// messages while a transcode starts. On success playback resets, every
    /// client receives `mediaChange` and the previous media is cleaned up in
    /// the background. On failure nothing changes and nothing is broadcast.
    /// A change that finishes after a newer one was committed is discarded.
    pub async fn complete_media_change(
        &self,
        ticket: MediaChangeTicket,
        request: Option<MediaData>,
    ) -> Result<()> {
        let media = match request {
            Some(data) => {
                let mut media = SessionMedia::from_request(data)?;
                self.dirs.ensure().await?;
                media
                    .init(&self.services.media, &self.dirs, &ticket.issuer_user)
                    .await?;
                Some(media)
            }
            None => None,
        };

        let mut state = self.state.lock().await;
        if state.shut_down || ticket.epoch < state.committed_epoch {
            drop(state);
            info!(session_id = %self.id, epoch = ticket.epoch, "Discarding superseded media change");
            if let Some(media) = media {
                media.cleanup().await;
            }
            return Err(Error::Conflict(
                "A newer media change was already applied".to_string(),
            ));
        }

        let data = media.as_ref().map(|media| media.data().clone());
        let previous = std::mem::replace(&mut state.media, media);
        state.committed_epoch = ticket.epoch;
        state.playback = PlaybackState::default();

        info!(
            session_id = %self.id,
            issuer = %ticket.issuer,
            mode = data.as_ref().map(|media| media.mode.as_str()),
            uri = data.as_ref().map(|media| media.uri.as_str()),
            "Media changed"
        );

        let change = Message::MediaChange(MediaChangeData {
            issuer_client_id: Some(ticket.issuer.to_string()),
            media: data,
        });
        self.deliver(&mut state, Audience::All, &change);
        drop(state);

        if let Some(previous) = previous {
            tokio::spawn(previous.cleanup());
        }
        Ok(())
    }

    /// Close every connection and release media and files. Idempotent.
    pub async fn shutdown(&self) {
        let (clients, media) = {
            let mut state = self.state.lock().await;
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.super_master = None;
            state.playback.paused = true;
            (std::mem::take(&mut state.clients), state.media.take())
        };

        info!(session_id = %self.id, clients = clients.len(), "Shutting down session");
        for client in clients.values() {
            client.connection.close(CloseReason::GOING_AWAY);
        }
        if let Some(media) = media {
            media.cleanup().await;
        }
        self.dirs.remove().await;
    }

    pub async fn is_shut_down(&self) -> bool {
        self.state.lock().await.shut_down
    }

    /// Queue `message` for `audience`; clients whose queue is full or gone
    /// are dropped afterwards.
    fn deliver(&self, state: &mut SessionState, audience: Audience<'_>, message: &Message) {
        let text: Arc<str> = match encode(message) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                error!(session_id = %self.id, kind = message.kind(), error = %e, "Failed to encode message");
                return;
            }
        };

        let mut failed = Vec::new();
        for (id, client) in &state.clients {
            let addressed = match audience {
                Audience::All => true,
                Audience::AllExcept(skip) => id != skip,
                Audience::Only(target) => id == target,
            };
            if !addressed {
                continue;
            }
            if let Err(failure) = client.connection.send(Arc::clone(&text)) {
                failed.push((id.clone(), failure_reason(failure)));
            }
        }

        if !failed.is_empty() {
            self.drop_clients(state, failed);
        }
    }

    /// Remove clients, announcing each departure, then restore authority.
    fn drop_clients(&self, state: &mut SessionState, mut pending: Vec<(ClientId, CloseReason)>) {
        let mut removed_any = false;

        while let Some((client_id, reason)) = pending.pop() {
            let Some(client) = state.clients.shift_remove(&client_id) else {
                continue;
            };
            removed_any = true;
            client.connection.close(reason);
            info!(
                session_id = %self.id,
                client_id = %client_id,
                close_code = reason.code,
                clients = state.clients.len(),
                "Client left"
            );

            let disconnect = Message::ClientDisconnect(ClientDisconnectData {
                client_id: client_id.to_string(),
            });
            let text: Arc<str> = match encode(&disconnect) {
                Ok(text) => Arc::from(text),
                Err(e) => {
                    error!(session_id = %self.id, error = %e, "Failed to encode clientDisconnect");
                    continue;
                }
            };
            for (id, other) in &state.clients {
                if let Err(failure) = other.connection.send(Arc::clone(&text)) {
                    pending.push((id.clone(), failure_reason(failure)));
                }
            }
        }

        if !removed_any {
            return;
        }
        if state.clients.is_empty() {
            state.super_master = None;
            state.playback.paused = true;
            debug!(session_id = %self.id, "Session is empty; playback paused");
        } else {
            self.elect(state);
        }
    }

    /// Make the first remaining client super-master unless the current one
    /// is still connected.
    fn elect(&self, state: &mut SessionState) {
        if let Some(current) = &state.super_master {
            if state.clients.contains_key(current) {
                return;
            }
        }

        state.super_master = state.clients.keys().next().cloned();
        match state.super_master.clone() {
            Some(master) => {
                info!(session_id = %self.id, client_id = %master, "Super-master elected");
                let change = Message::SuperMasterChange(SuperMasterChangeData {
                    client_id: master.to_string(),
                });
                self.deliver(state, Audience::All, &change);
            }
            None => {
                warn!(session_id = %self.id, "Election found no connected client");
            }
        }
    }
}

fn roster(state: &SessionState) -> Vec<ClientInfo> {
    state
        .clients
        .iter()
        .map(|(id, client)| ClientInfo {
            client_id: id.to_string(),
            display_name: client.display_name.clone(),
        })
        .collect()
}

const fn failure_reason(failure: SendFailure) -> CloseReason {
    match failure {
        SendFailure::Full => CloseReason::SLOW_CLIENT,
        SendFailure::Closed => CloseReason::NORMAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaServices;
    use crate::session::connection::{Outbound, OutboundQueue};
    use crate::storage::LocalFileAccess;
    use crate::transcode::{toolkit::MockMediaToolkit, TranscoderLauncher};
    use cowatch_proto::{decode, Decoded, MediaMode};
    use std::time::Duration;

    struct Harness {
        _temp: tempfile::TempDir,
        session: Arc<WatchSession>,
    }

    fn harness(max_clients: usize) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let services = SessionServices {
            media: MediaServices::new(
                Arc::new(LocalFileAccess::new(temp.path().join("library"))),
                Arc::new(MockMediaToolkit::new()),
                TranscoderLauncher::new("true", Vec::new(), 1024),
                Duration::from_secs(1),
            ),
            sessions_dir: temp.path().join("sessions"),
            max_clients,
            client_buffer: 16,
        };
        let session = Arc::new(WatchSession::new(
            SessionId::from("room1"),
            Arc::new(services),
        ));
        Harness {
            _temp: temp,
            session,
        }
    }

    async fn join(session: &WatchSession, name: &str) -> (ClientId, OutboundQueue) {
        let (connection, queue) = ClientConnection::new(16);
        let id = session
            .welcome_client(connection, name.to_string(), UserId::from(name))
            .await
            .unwrap();
        (id, queue)
    }

    fn drain(queue: &mut OutboundQueue) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Some(text) = queue.try_next_text() {
            match decode(&text).unwrap() {
                Decoded::Message(message) => messages.push(message),
                Decoded::Unknown(kind) => panic!("unexpected kind {kind}"),
            }
        }
        messages
    }

    fn playing(time: f64) -> PlaybackState {
        PlaybackState {
            paused: false,
            current_time_seconds: time,
            playback_rate: 1.0,
        }
    }

    #[tokio::test]
    async fn test_first_client_is_welcomed_and_elected() {
        let h = harness(8);
        let (a, mut queue) = join(&h.session, "alice").await;

        let messages = drain(&mut queue);
        assert_eq!(messages.len(), 3);
        match &messages[0] {
            Message::Welcome(welcome) => {
                assert_eq!(welcome.client_id, a.as_str());
                assert_eq!(welcome.clients.len(), 1);
                assert_eq!(welcome.playback_state, PlaybackState::default());
                assert!(welcome.media.is_none());
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        assert_eq!(messages[1].kind(), "backendDebugInfo");
        assert_eq!(
            messages[2],
            Message::SuperMasterChange(SuperMasterChangeData {
                client_id: a.to_string()
            })
        );
        assert_eq!(h.session.super_master().await, Some(a));
    }

    #[tokio::test]
    async fn test_second_client_keeps_existing_authority() {
        let h = harness(8);
        let (a, mut queue_a) = join(&h.session, "alice").await;
        drain(&mut queue_a);
        let (b, mut queue_b) = join(&h.session, "bob").await;

        let to_a = drain(&mut queue_a);
        assert_eq!(
            to_a,
            vec![Message::ClientConnect(ClientInfo {
                client_id: b.to_string(),
                display_name: "bob".to_string(),
            })]
        );

        let to_b = drain(&mut queue_b);
        match &to_b[0] {
            Message::Welcome(welcome) => {
                assert_eq!(welcome.super_master_id.as_deref(), Some(a.as_str()));
                assert_eq!(welcome.clients.len(), 2);
            }
            other => panic!("expected welcome, got {other:?}"),
        }
        assert_eq!(to_b.len(), 2);
        assert_eq!(h.session.super_master().await, Some(a));
    }

    #[tokio::test]
    async fn test_super_master_leaving_elects_next_client() {
        let h = harness(8);
        let (a, _queue_a) = join(&h.session, "alice").await;
        let (b, mut queue_b) = join(&h.session, "bob").await;
        let (_c, _queue_c) = join(&h.session, "carol").await;
        drain(&mut queue_b);

        assert!(h.session.remove_client(&a, CloseReason::NORMAL).await);
        assert!(!h.session.remove_client(&a, CloseReason::NORMAL).await);

        let to_b = drain(&mut queue_b);
        assert_eq!(
            to_b,
            vec![
                Message::ClientDisconnect(ClientDisconnectData {
                    client_id: a.to_string()
                }),
                Message::SuperMasterChange(SuperMasterChangeData {
                    client_id: b.to_string()
                }),
            ]
        );
        assert_eq!(h.session.super_master().await, Some(b));
    }

    #[tokio::test]
    async fn test_last_client_leaving_pauses_playback() {
        let h = harness(8);
        let (a, _queue) = join(&h.session, "alice").await;
        h.session.playback_ping(&a, playing(42.0)).await;
        assert!(!h.session.playback_state().await.paused);

        h.session.remove_client(&a, CloseReason::NORMAL).await;

        let state = h.session.playback_state().await;
        assert!(state.paused);
        assert_eq!(state.current_time_seconds, 42.0);
        assert_eq!(h.session.super_master().await, None);
        assert_eq!(h.session.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_ping_authority() {
        let h = harness(8);
        let (a, mut queue_a) = join(&h.session, "alice").await;
        let (b, mut queue_b) = join(&h.session, "bob").await;
        drain(&mut queue_a);
        drain(&mut queue_b);

        h.session.playback_ping(&b, playing(500.0)).await;
        assert_eq!(h.session.playback_state().await, PlaybackState::default());
        assert_eq!(
            drain(&mut queue_a),
            vec![Message::PlaybackStatePing(PlaybackStatePingData {
                client_id: b.to_string(),
                playback_state: playing(500.0),
            })]
        );
        assert!(drain(&mut queue_b).is_empty());

        h.session.playback_ping(&a, playing(12.5)).await;
        assert_eq!(h.session.playback_state().await, playing(12.5));
        assert_eq!(drain(&mut queue_b).len(), 1);
    }

    #[tokio::test]
    async fn test_requests_go_only_to_super_master() {
        let h = harness(8);
        let (_a, mut queue_a) = join(&h.session, "alice").await;
        let (b, mut queue_b) = join(&h.session, "bob").await;
        let (_c, mut queue_c) = join(&h.session, "carol").await;
        for queue in [&mut queue_a, &mut queue_b, &mut queue_c] {
            drain(queue);
        }

        let request = Message::RequestPlaybackStateChange(
            cowatch_proto::RequestPlaybackStateChangeData {
                client_id: b.to_string(),
                playback_state: playing(3.0),
            },
        );
        h.session.forward_to_super_master(&b, &request).await;

        assert_eq!(drain(&mut queue_a), vec![request]);
        assert!(drain(&mut queue_b).is_empty());
        assert!(drain(&mut queue_c).is_empty());
    }

    #[tokio::test]
    async fn test_session_full() {
        let h = harness(1);
        let (_a, _queue) = join(&h.session, "alice").await;

        let (connection, mut queue) = ClientConnection::new(4);
        let result = h
            .session
            .welcome_client(connection, "bob".to_string(), UserId::from("bob"))
            .await;
        assert!(matches!(result, Err(Error::SessionFull(_))));
        assert_eq!(queue.next().await, Outbound::Close(CloseReason::SESSION_FULL));
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped() {
        let h = harness(8);
        let (a, _queue_a) = join(&h.session, "alice").await;

        let (connection, mut slow_queue) = ClientConnection::new(2);
        let slow = h
            .session
            .welcome_client(connection, "slow".to_string(), UserId::from("slow"))
            .await
            .unwrap();

        // welcome + backendDebugInfo filled the queue.
        h.session.playback_ping(&a, playing(1.0)).await;

        assert_eq!(h.session.client_count().await, 1);
        assert!(slow_queue.try_next_text().is_some());
        assert!(slow_queue.try_next_text().is_some());
        assert_eq!(slow_queue.next().await, Outbound::Close(CloseReason::SLOW_CLIENT));
        assert!(!h.session.remove_client(&slow, CloseReason::NORMAL).await);
    }

    #[tokio::test]
    async fn test_only_super_master_may_change_media() {
        let h = harness(8);
        let (a, _queue_a) = join(&h.session, "alice").await;
        let (b, _queue_b) = join(&h.session, "bob").await;

        assert!(matches!(
            h.session.begin_media_change(&b).await,
            Err(Error::Authorization(_))
        ));
        assert!(h.session.begin_media_change(&a).await.is_ok());
    }

    #[tokio::test]
    async fn test_media_change_broadcasts_and_resets_playback() {
        let h = harness(8);
        let (a, mut queue_a) = join(&h.session, "alice").await;
        let (_b, mut queue_b) = join(&h.session, "bob").await;
        h.session.playback_ping(&a, playing(80.0)).await;
        drain(&mut queue_a);
        drain(&mut queue_b);

        let media = MediaData::new(MediaMode::Youtube, "dQw4w9WgXcQ");
        let ticket = h.session.begin_media_change(&a).await.unwrap();
        h.session
            .complete_media_change(ticket, Some(media.clone()))
            .await
            .unwrap();

        let expected = Message::MediaChange(MediaChangeData {
            issuer_client_id: Some(a.to_string()),
            media: Some(media.clone()),
        });
        assert_eq!(drain(&mut queue_a), vec![expected.clone()]);
        assert_eq!(drain(&mut queue_b), vec![expected]);

        let snapshot = h.session.snapshot().await;
        assert_eq!(snapshot.media, Some(media));
        assert_eq!(snapshot.playback_state, PlaybackState::default());
    }

    #[tokio::test]
    async fn test_failed_media_change_keeps_previous_state() {
        let h = harness(8);
        let (a, mut queue_a) = join(&h.session, "alice").await;
        let media = MediaData::new(MediaMode::Twitch, "somechannel");
        let ticket = h.session.begin_media_change(&a).await.unwrap();
        h.session
            .complete_media_change(ticket, Some(media.clone()))
            .await
            .unwrap();
        h.session.playback_ping(&a, playing(30.0)).await;
        drain(&mut queue_a);

        let ticket = h.session.begin_media_change(&a).await.unwrap();
        let missing = MediaData::new(MediaMode::Native, "missing.mp4");
        assert!(h
            .session
            .complete_media_change(ticket, Some(missing))
            .await
            .is_err());

        assert!(drain(&mut queue_a).is_empty());
        let snapshot = h.session.snapshot().await;
        assert_eq!(snapshot.media, Some(media));
        assert_eq!(snapshot.playback_state, playing(30.0));
    }

    #[tokio::test]
    async fn test_superseded_media_change_is_discarded() {
        let h = harness(8);
        let (a, mut queue_a) = join(&h.session, "alice").await;
        drain(&mut queue_a);

        let older = h.session.begin_media_change(&a).await.unwrap();
        let newer = h.session.begin_media_change(&a).await.unwrap();
        let newest_media = MediaData::new(MediaMode::Youtube, "newer");
        h.session
            .complete_media_change(newer, Some(newest_media.clone()))
            .await
            .unwrap();
        drain(&mut queue_a);

        let result = h
            .session
            .complete_media_change(older, Some(MediaData::new(MediaMode::Youtube, "older")))
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert!(drain(&mut queue_a).is_empty());
        assert_eq!(h.session.snapshot().await.media, Some(newest_media));
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone_and_rejects_joins() {
        let h = harness(8);
        let (_a, mut queue_a) = join(&h.session, "alice").await;
        h.session.dirs().ensure().await.unwrap();

        h.session.shutdown().await;
        h.session.shutdown().await;

        assert_eq!(queue_a.next().await, Outbound::Close(CloseReason::GOING_AWAY));
        assert!(!h.session.dirs().root().exists());
        assert!(h.session.is_shut_down().await);

        let (connection, _queue) = ClientConnection::new(4);
        let result = h
            .session
            .welcome_client(connection, "late".to_string(), UserId::from("late"))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
