//! Live-transcode pipeline: the external transcoder process, its framed
//! stdout protocol, and the manifest assembled once it reports readiness.

pub mod codec;
pub mod manifest;
pub mod process;
pub mod ready;
pub mod toolkit;

use std::time::Duration;
use thiserror::Error;

pub use codec::{FrameError, TranscoderCodec, TranscoderFrame};
pub use manifest::{Manifest, ManifestGenerator};
pub use process::{TranscoderLauncher, TranscoderProcess};
pub use ready::{ManifestReady, ReadySignal};
pub use toolkit::{FfmpegToolkit, MediaToolkit, ProbeReport, ProbeStream};

/// Failure delivered to every waiter of a [`ReadySignal`]; cloneable so each
/// waiter gets its own copy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("transcoder exited before the manifest was ready ({status})")]
    ProcessExited { status: String },

    #[error("manifest was not ready within {0:?}")]
    Timeout(Duration),

    #[error("manifest readiness was already settled")]
    AlreadySettled,

    #[error("transcoder protocol error: {0}")]
    Protocol(String),

    #[error("transcoder was terminated")]
    Terminated,
}
