use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// WebSocket close code and reason sent when the server ends a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: &'static str,
}

impl CloseReason {
    pub const NORMAL: Self = Self {
        code: 1000,
        reason: "bye",
    };
    pub const GOING_AWAY: Self = Self {
        code: 1001,
        reason: "session closed",
    };
    pub const SLOW_CLIENT: Self = Self {
        code: 1008,
        reason: "outbound queue full",
    };
    pub const PROTOCOL_ERROR: Self = Self {
        code: 4002,
        reason: "protocol error",
    };
    pub const SESSION_FULL: Self = Self {
        code: 4003,
        reason: "session full",
    };
}

/// Next thing the transport should write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Arc<str>),
    Close(CloseReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendFailure {
    Full,
    Closed,
}

/// Server side of one client connection: a bounded outbound queue plus a
/// close signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    outbound: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
    close_reason: Arc<OnceLock<CloseReason>>,
}

impl ClientConnection {
    /// Create a connection and the queue its transport drains.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, OutboundQueue) {
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        let closed = CancellationToken::new();
        let close_reason = Arc::new(OnceLock::new());

        let queue = OutboundQueue {
            receiver,
            closed: closed.clone(),
            close_reason: Arc::clone(&close_reason),
        };
        (
            Self {
                outbound,
                closed,
                close_reason,
            },
            queue,
        )
    }

    /// Queue a text frame without waiting.
    pub(crate) fn send(&self, text: Arc<str>) -> Result<(), SendFailure> {
        if self.closed.is_cancelled() {
            return Err(SendFailure::Closed);
        }
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Close the connection; the first reason given wins.
    pub fn close(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled once the connection is closed
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Transport side of a [`ClientConnection`].
#[derive(Debug)]
pub struct OutboundQueue {
    receiver: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
    close_reason: Arc<OnceLock<CloseReason>>,
}

impl OutboundQueue {
    /// Wait for the next frame. After a `Close` the queue is finished.
    pub async fn next(&mut self) -> Outbound {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Outbound::Close(self.reason()),
            text = self.receiver.recv() => match text {
                Some(text) => Outbound::Text(text),
                None => Outbound::Close(self.reason()),
            },
        }
    }

    /// Frames already queued, without waiting
    pub fn try_next_text(&mut self) -> Option<Arc<str>> {
        self.receiver.try_recv().ok()
    }

    fn reason(&self) -> CloseReason {
        self.close_reason
            .get()
            .copied()
            .unwrap_or(CloseReason::NORMAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_delivers_then_closes() {
        let (connection, mut queue) = ClientConnection::new(4);
        connection.send(Arc::from("one")).unwrap();
        assert_eq!(queue.next().await, Outbound::Text(Arc::from("one")));

        connection.close(CloseReason::PROTOCOL_ERROR);
        connection.close(CloseReason::NORMAL);
        assert_eq!(queue.next().await, Outbound::Close(CloseReason::PROTOCOL_ERROR));
        assert_eq!(connection.send(Arc::from("late")), Err(SendFailure::Closed));
    }

    #[tokio::test]
    async fn test_full_queue_reports_slow_client() {
        let (connection, _queue) = ClientConnection::new(1);
        connection.send(Arc::from("a")).unwrap();
        assert_eq!(connection.send(Arc::from("b")), Err(SendFailure::Full));
    }

    #[tokio::test]
    async fn test_dropped_queue_is_closed() {
        let (connection, queue) = ClientConnection::new(1);
        drop(queue);
        assert_eq!(connection.send(Arc::from("a")), Err(SendFailure::Closed));
    }
}
