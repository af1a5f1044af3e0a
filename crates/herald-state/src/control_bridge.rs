//! Typed request channel from the HTTP surface into the gateway loop.
//!
//! The gateway session loop is the only context allowed to talk to the chat
//! provider, so the dashboard submits `ControlRequest`s over an mpsc channel
//! and waits on a per-request oneshot reply under a deadline. A timeout
//! abandons the wait only: the queued operation still runs to completion in
//! the owning context and its late reply is dropped with the receiver, so a
//! run that succeeded may still be reported as failed to the HTTP caller.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    PreviewToOwner,
    Announce,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreviewToOwner => "preview_to_owner",
            Self::Announce => "announce",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    PreviewSent,
    Announced { delivered: usize },
    Failed { reason: String },
}

#[derive(Debug)]
pub struct ControlRequest {
    pub action: ControlAction,
    pub reply: oneshot::Sender<ControlOutcome>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("control request timed out before the delivery loop replied")]
    Timeout,
    #[error("control channel is closed")]
    Closed,
}

/// Sender half handed to surfaces outside the owning context.
#[derive(Clone)]
pub struct ControlBridge {
    tx: mpsc::Sender<ControlRequest>,
}

/// Creates the bridge sender and the receiver drained by the gateway loop.
pub fn control_channel(capacity: usize) -> (ControlBridge, mpsc::Receiver<ControlRequest>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ControlBridge { tx }, rx)
}

impl ControlBridge {
    /// Submits a request and waits up to `bound` for the owning context to reply.
    pub async fn submit(
        &self,
        action: ControlAction,
        bound: Duration,
    ) -> Result<ControlOutcome, BridgeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlRequest {
                action,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BridgeError::Closed)?;
        match tokio::time::timeout(bound, reply_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => Err(BridgeError::Timeout),
        }
    }

    /// Fire-and-forget submission. The reply channel is dropped immediately;
    /// the owning context must tolerate a closed reply receiver.
    pub async fn dispatch(&self, action: ControlAction) -> Result<(), BridgeError> {
        let (reply_tx, _reply_rx) = oneshot::channel();
        self.tx
            .send(ControlRequest {
                action,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BridgeError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn functional_submit_round_trips_an_outcome() {
        let (bridge, mut rx) = control_channel(4);
        let owner = tokio::spawn(async move {
            let request = rx.recv().await.expect("request");
            assert_eq!(request.action, ControlAction::Announce);
            let _ = request.reply.send(ControlOutcome::Announced { delivered: 3 });
        });

        let outcome = bridge
            .submit(ControlAction::Announce, Duration::from_secs(1))
            .await
            .expect("outcome");
        assert_eq!(outcome, ControlOutcome::Announced { delivered: 3 });
        owner.await.expect("owner task");
    }

    #[tokio::test]
    async fn functional_submit_timeout_leaves_request_running() {
        let (bridge, mut rx) = control_channel(4);
        let owner = tokio::spawn(async move {
            let request = rx.recv().await.expect("request");
            tokio::time::sleep(Duration::from_millis(100)).await;
            // The caller gave up; the late reply lands on a dropped receiver.
            assert!(request
                .reply
                .send(ControlOutcome::Announced { delivered: 9 })
                .is_err());
        });

        let result = bridge
            .submit(ControlAction::Announce, Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(BridgeError::Timeout));
        owner.await.expect("owner task");
    }

    #[tokio::test]
    async fn unit_submit_reports_closed_channel() {
        let (bridge, rx) = control_channel(1);
        drop(rx);
        let result = bridge
            .submit(ControlAction::PreviewToOwner, Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn functional_dispatch_tolerates_dropped_reply() {
        let (bridge, mut rx) = control_channel(4);
        bridge
            .dispatch(ControlAction::PreviewToOwner)
            .await
            .expect("dispatch");

        let request = rx.recv().await.expect("request");
        assert_eq!(request.action, ControlAction::PreviewToOwner);
        assert!(request.reply.send(ControlOutcome::PreviewSent).is_err());
    }
}
