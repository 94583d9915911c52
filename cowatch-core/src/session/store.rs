use moka::future::Cache;
use moka::notification::RemovalCause;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::watch::WatchSession;
use super::SessionServices;
use crate::config::Config;
use crate::models::SessionId;
use crate::{Error, Result};

const MAX_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Owns every live [`WatchSession`].
///
/// Sessions are created on first access and evicted once they have been
/// empty for the idle timeout; eviction shuts them down.
#[derive(Clone)]
pub struct SessionStore {
    cache: Cache<SessionId, Arc<WatchSession>>,
    services: Arc<SessionServices>,
    idle_timeout: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.cache.entry_count())
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    #[must_use]
    pub fn new(services: SessionServices, idle_timeout: Duration, max_sessions: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_sessions)
            .time_to_idle(idle_timeout)
            .eviction_listener(|id: Arc<SessionId>, session: Arc<WatchSession>, cause| {
                if matches!(cause, RemovalCause::Explicit | RemovalCause::Replaced) {
                    return;
                }
                info!(session_id = %id, ?cause, "Evicting session");
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move { session.shutdown().await });
                    }
                    Err(_) => warn!(session_id = %id, "No runtime to shut down evicted session"),
                }
            })
            .build();

        Self {
            cache,
            services: Arc::new(services),
            idle_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SessionServices::from_config(config),
            config.sessions.idle_timeout(),
            config.sessions.max_sessions,
        )
    }

    #[must_use]
    pub fn services(&self) -> &SessionServices {
        &self.services
    }

    /// Session `id`, created if it does not exist yet
    pub async fn get_or_create(&self, id: &SessionId) -> Result<Arc<WatchSession>> {
        if !SessionId::is_valid(id.as_str()) {
            return Err(Error::InvalidInput(format!("Invalid session id: {id}")));
        }

        let services = Arc::clone(&self.services);
        let session = self
            .cache
            .get_with(id.clone(), async move {
                debug!(session_id = %id, "Creating session");
                Arc::new(WatchSession::new(id.clone(), services))
            })
            .await;
        Ok(session)
    }

    /// New session with a fresh id
    pub async fn create(&self) -> Arc<WatchSession> {
        loop {
            let id = SessionId::new();
            let services = Arc::clone(&self.services);
            let entry = self
                .cache
                .entry(id.clone())
                .or_insert_with(async move { Arc::new(WatchSession::new(id, services)) })
                .await;
            if entry.is_fresh() {
                let session = entry.into_value();
                info!(session_id = %session.id(), "Session created");
                return session;
            }
        }
    }

    pub async fn get(&self, id: &SessionId) -> Option<Arc<WatchSession>> {
        self.cache.get(id).await
    }

    /// Look a session up without counting as activity. Read-only HTTP
    /// routes use this so polling never keeps an empty session alive.
    #[must_use]
    pub fn peek(&self, id: &SessionId) -> Option<Arc<WatchSession>> {
        self.cache
            .iter()
            .find(|(key, _)| key.as_ref() == id)
            .map(|(_, session)| session)
    }

    /// Remove and shut down a session. Returns `false` if it did not exist.
    pub async fn remove(&self, id: &SessionId) -> bool {
        match self.cache.remove(id).await {
            Some(session) => {
                session.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Approximate number of sessions
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep occupied sessions alive and process expirations.
    pub async fn run_maintenance(&self) {
        let sessions: Vec<_> = self.cache.iter().map(|(_, session)| session).collect();
        for session in sessions {
            if session.client_count().await > 0 {
                // A read resets the idle timer.
                let _ = self.cache.get(session.id()).await;
            }
        }
        self.cache.run_pending_tasks().await;
    }

    /// Run [`Self::run_maintenance`] periodically until `shutdown` fires.
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        let period = (self.idle_timeout / 2)
            .min(MAX_MAINTENANCE_INTERVAL)
            .max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => store.run_maintenance().await,
                }
            }
            debug!("Session maintenance stopped");
        })
    }

    /// Shut down every session.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<_> = self.cache.iter().map(|(_, session)| session).collect();
        info!(sessions = sessions.len(), "Shutting down all sessions");
        self.cache.invalidate_all();
        for session in sessions {
            session.shutdown().await;
        }
        self.cache.run_pending_tasks().await;
    }
}
