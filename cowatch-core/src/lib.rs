pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod models;
pub mod session;
pub mod storage;
pub mod transcode;

pub use config::Config;
pub use error::{Error, Result};
pub use session::{SessionServices, SessionStore, WatchSession};
