//! Handle to the native-messaging pipe.
//!
//! Stdout writes are serialised through an unbounded queue owned by a single
//! writer task; enqueueing is the only suspension-free send point the rest
//! of the daemon needs. The handle itself only knows whether a pipe is
//! attached and how to enqueue; the reader/writer tasks live in
//! [`crate::bridge::Bridge::attach_upstream`].

use std::sync::Mutex;

use tokio::sync::mpsc;

use surf_types::protocol::{UpstreamState, WireMessage};
use surf_types::BridgeError;

/// The daemon's side of the pipe to the extension.
#[derive(Default)]
pub struct Upstream {
    tx: Mutex<Option<mpsc::UnboundedSender<WireMessage>>>,
}

impl Upstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pipe is currently attached.
    pub fn state(&self) -> UpstreamState {
        if self.tx.lock().expect("upstream lock poisoned").is_some() {
            UpstreamState::Connected
        } else {
            UpstreamState::Disconnected
        }
    }

    /// Enqueue a message for the writer task.
    pub fn send(&self, msg: WireMessage) -> Result<(), BridgeError> {
        let guard = self.tx.lock().expect("upstream lock poisoned");
        match guard.as_ref() {
            Some(tx) if tx.send(msg).is_ok() => Ok(()),
            _ => Err(BridgeError::transport("native host disconnected")),
        }
    }

    /// Install or clear the writer-queue sender.
    pub(crate) fn set(&self, tx: Option<mpsc::UnboundedSender<WireMessage>>) {
        *self.tx.lock().expect("upstream lock poisoned") = tx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detached_send_is_a_transport_error() {
        let upstream = Upstream::new();
        assert_eq!(upstream.state(), UpstreamState::Disconnected);
        let err = upstream.send(WireMessage::Ping).unwrap_err();
        assert_eq!(err.kind, surf_types::ErrorKind::Transport);
        assert!(err.message.contains("disconnected"));
    }

    #[tokio::test]
    async fn attached_send_enqueues() {
        let upstream = Upstream::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        upstream.set(Some(tx));
        assert_eq!(upstream.state(), UpstreamState::Connected);

        upstream.send(WireMessage::Ping).unwrap();
        assert!(matches!(rx.recv().await, Some(WireMessage::Ping)));
    }
}
