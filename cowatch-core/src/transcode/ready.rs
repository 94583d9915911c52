use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use super::TranscodeError;

/// Payload of the transcoder's `MANIFEST_READY` control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestReady {
    /// Video playlist, relative to the transcoder's output directory
    pub path: PathBuf,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone)]
enum ReadyState {
    Pending,
    Ready(ManifestReady),
    Failed(TranscodeError),
}

/// Settle-once completion signal with any number of waiters.
///
/// Resolving or rejecting a settled signal is a contract violation and
/// reported as [`TranscodeError::AlreadySettled`]; every waiter observes the
/// single settled value.
#[derive(Debug, Clone)]
pub struct ReadySignal {
    state: Arc<watch::Sender<ReadyState>>,
}

impl Default for ReadySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadySignal {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(ReadyState::Pending);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn resolve(&self, ready: ManifestReady) -> Result<(), TranscodeError> {
        self.settle(ReadyState::Ready(ready))
    }

    pub fn reject(&self, error: TranscodeError) -> Result<(), TranscodeError> {
        self.settle(ReadyState::Failed(error))
    }

    fn settle(&self, outcome: ReadyState) -> Result<(), TranscodeError> {
        let mut outcome = Some(outcome);
        let settled = self.state.send_if_modified(|state| {
            if matches!(state, ReadyState::Pending) {
                if let Some(outcome) = outcome.take() {
                    *state = outcome;
                }
                true
            } else {
                false
            }
        });

        if settled {
            Ok(())
        } else {
            Err(TranscodeError::AlreadySettled)
        }
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(*self.state.borrow(), ReadyState::Pending)
    }

    /// Wait until the signal settles.
    pub async fn wait(&self) -> Result<ManifestReady, TranscodeError> {
        let mut receiver = self.state.subscribe();
        let state = receiver
            .wait_for(|state| !matches!(state, ReadyState::Pending))
            .await
            .map_err(|_| TranscodeError::Terminated)?;

        match &*state {
            ReadyState::Ready(ready) => Ok(ready.clone()),
            ReadyState::Failed(error) => Err(error.clone()),
            ReadyState::Pending => Err(TranscodeError::Terminated),
        }
    }
}
