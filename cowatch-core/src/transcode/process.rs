//! Lifecycle of one external transcoder process.

use futures::StreamExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{TranscoderCodec, TranscoderFrame, START_COMMAND};
use super::ready::{ManifestReady, ReadySignal};
use super::TranscodeError;
use crate::config::TranscoderConfig;
use crate::{Error, Result};

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How long stdout may stay open after the process has exited. A forked
/// helper can inherit the pipe and keep it open indefinitely.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Spawns transcoder processes from a configured command line.
#[derive(Debug, Clone)]
pub struct TranscoderLauncher {
    program: PathBuf,
    args: Vec<String>,
    max_line_length: usize,
}

impl TranscoderLauncher {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, max_line_length: usize) -> Self {
        Self {
            program: program.into(),
            args,
            max_line_length,
        }
    }

    #[must_use]
    pub fn from_config(config: &TranscoderConfig) -> Self {
        Self::new(&config.program, config.args.clone(), config.max_line_length)
    }

    /// Arguments with `{input}` and `{output}` substituted
    #[must_use]
    pub fn command_args(&self, input: &Path, output_dir: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| match arg.as_str() {
                INPUT_PLACEHOLDER => input.as_os_str().to_owned(),
                OUTPUT_PLACEHOLDER => output_dir.as_os_str().to_owned(),
                other => OsString::from(
                    other
                        .replace(INPUT_PLACEHOLDER, &input.to_string_lossy())
                        .replace(OUTPUT_PLACEHOLDER, &output_dir.to_string_lossy()),
                ),
            })
            .collect()
    }

    /// Start a transcoder writing into `output_dir`.
    ///
    /// Stdout and stderr consumers are running before the start command is
    /// written, so no early output is lost.
    pub async fn launch(
        &self,
        transcode_id: &str,
        input: &Path,
        output_dir: &Path,
    ) -> Result<TranscoderProcess> {
        let mut child = Command::new(&self.program)
            .args(self.command_args(input, output_dir))
            .current_dir(output_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::Process(format!(
                    "Failed to spawn transcoder {}: {e}",
                    self.program.display()
                ))
            })?;

        let pid = child.id();
        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::Process("Transcoder stdio was not captured".to_string()));
        };

        info!(transcode_id, pid, input = %input.display(), "Transcoder started");

        let ready = ReadySignal::new();
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump_stdout(
            stdout,
            TranscoderCodec::new(self.max_line_length),
            ready.clone(),
            cancel.clone(),
            transcode_id.to_string(),
        ));
        tokio::spawn(log_stderr(stderr, transcode_id.to_string()));

        let started = async {
            stdin.write_all(START_COMMAND).await?;
            stdin.flush().await
        };
        if let Err(e) = started.await {
            cancel.cancel();
            return Err(Error::Process(format!(
                "Failed to send start command to transcoder: {e}"
            )));
        }

        let supervisor = tokio::spawn(supervise(
            child,
            stdin,
            pump,
            ready.clone(),
            cancel.clone(),
            transcode_id.to_string(),
        ));

        Ok(TranscoderProcess {
            id: transcode_id.to_string(),
            pid,
            ready,
            cancel,
            supervisor: Some(supervisor),
        })
    }
}

/// Handle to a running transcoder.
///
/// Dropping the handle kills the process; [`TranscoderProcess::terminate`]
/// additionally waits until it is gone.
#[derive(Debug)]
pub struct TranscoderProcess {
    id: String,
    pid: Option<u32>,
    ready: ReadySignal,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl TranscoderProcess {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Readiness signal, shareable with any number of waiters
    #[must_use]
    pub fn ready(&self) -> ReadySignal {
        self.ready.clone()
    }

    pub async fn wait_ready(&self) -> std::result::Result<ManifestReady, TranscodeError> {
        self.ready.wait().await
    }

    /// Kill the process and wait for its supervisor to finish.
    pub async fn terminate(mut self) {
        self.cancel.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                warn!(transcode_id = %self.id, error = %e, "Transcoder supervisor panicked");
            }
        }
    }
}

impl Drop for TranscoderProcess {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Owns the child until it exits or is cancelled, then rejects any waiter
/// still pending.
async fn supervise(
    mut child: Child,
    stdin: ChildStdin,
    mut pump: JoinHandle<()>,
    ready: ReadySignal,
    cancel: CancellationToken,
    transcode_id: String,
) {
    let transcode_id = transcode_id.as_str();
    let status = tokio::select! {
        () = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!(transcode_id, error = %e, "Failed to kill transcoder");
            }
            None
        }
        status = child.wait() => Some(status),
    };
    drop(stdin);

    // Stdout may still hold a final MANIFEST_READY after exit.
    match tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, &mut pump).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(transcode_id, error = %e, "Transcoder stdout task panicked"),
        Err(_) => {
            warn!(transcode_id, "Transcoder stdout still open after exit");
            pump.abort();
        }
    }

    let outcome = match status {
        None => {
            info!(transcode_id, "Transcoder terminated");
            TranscodeError::Terminated
        }
        Some(Ok(status)) => {
            log_exit(transcode_id, status);
            TranscodeError::ProcessExited {
                status: status.to_string(),
            }
        }
        Some(Err(e)) => {
            error!(transcode_id, error = %e, "Failed to wait for transcoder");
            TranscodeError::ProcessExited {
                status: e.to_string(),
            }
        }
    };

    if ready.reject(outcome).is_ok() {
        warn!(transcode_id, "Transcoder stopped before its manifest was ready");
    }
}

fn log_exit(transcode_id: &str, status: ExitStatus) {
    if status.success() {
        info!(transcode_id, %status, "Transcoder exited");
    } else {
        warn!(transcode_id, %status, "Transcoder exited abnormally");
    }
}

/// Decode transcoder stdout until EOF, a framing error, or cancellation.
pub(crate) async fn pump_stdout<R>(
    reader: R,
    codec: TranscoderCodec,
    ready: ReadySignal,
    cancel: CancellationToken,
    transcode_id: String,
) where
    R: AsyncRead + Unpin,
{
    let transcode_id = transcode_id.as_str();
    let mut frames = FramedRead::new(reader, codec);

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            frame = frames.next() => frame,
        };

        match frame {
            None => break,
            Some(Ok(TranscoderFrame::ManifestReady(manifest))) => {
                let path = manifest.path.display().to_string();
                let duration_seconds = manifest.duration_seconds;
                match ready.resolve(manifest) {
                    Ok(()) => {
                        info!(transcode_id, %path, duration_seconds, "Manifest ready");
                    }
                    Err(e) => {
                        error!(transcode_id, %path, error = %e, "Unexpected MANIFEST_READY");
                    }
                }
            }
            Some(Ok(TranscoderFrame::Log(line))) => {
                debug!(transcode_id, "{line}");
            }
            Some(Ok(TranscoderFrame::UnknownCommand { command, args })) => {
                warn!(transcode_id, %command, ?args, "Unknown transcoder command");
            }
            Some(Ok(TranscoderFrame::MalformedControl { line, reason })) => {
                warn!(transcode_id, %line, %reason, "Malformed transcoder control line");
            }
            Some(Err(e)) => {
                error!(transcode_id, error = %e, "Transcoder stdout failed");
                let _ = ready.reject(TranscodeError::Protocol(e.to_string()));
                cancel.cancel();
                break;
            }
        }
    }
}

async fn log_stderr(stderr: ChildStderr, transcode_id: String) {
    let transcode_id = transcode_id.as_str();
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(transcode_id, "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(transcode_id, error = %e, "Transcoder stderr closed");
                break;
            }
        }
    }
}
