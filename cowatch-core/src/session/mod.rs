//! Watch-together sessions.

mod client;
mod connection;
mod store;
mod watch;

use std::path::PathBuf;

use crate::config::Config;
use crate::media::MediaServices;

pub use client::{ClientStream, InboundFrame, ProtocolViolation, SessionClient};
pub use connection::{ClientConnection, CloseReason, Outbound, OutboundQueue};
pub use store::SessionStore;
pub use watch::{MediaChangeTicket, SessionSnapshot, WatchSession};

/// Everything a session needs from outside
#[derive(Debug, Clone)]
pub struct SessionServices {
    pub media: MediaServices,
    /// Parent of every session working directory
    pub sessions_dir: PathBuf,
    pub max_clients: usize,
    /// Outbound queue depth per connection
    pub client_buffer: usize,
}

impl SessionServices {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            media: MediaServices::from_config(config),
            sessions_dir: config.storage.sessions_dir.clone(),
            max_clients: config.sessions.max_clients_per_session,
            client_buffer: config.sessions.client_buffer,
        }
    }
}
