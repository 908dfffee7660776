//! One-shot completion handle for the compositor's asynchronous update.
//!
//! The compositor creates a pair with [`PendingPresent::channel`], hands
//! the [`PendingPresent`] back from its update call and resolves the
//! [`PresentCompleter`] from whatever thread or driver callback finishes
//! the read. The image keeps the handle only so teardown can drain it.

use std::sync::mpsc;
use std::time::Duration;

use crate::error::{HandoffError, HandoffResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug)]
pub struct PresentCompleter {
    sender: mpsc::SyncSender<HandoffResult<()>>,
}

impl PresentCompleter {
    pub fn complete(self) {
        self.resolve(Ok(()));
    }

    pub fn fail(self, error: HandoffError) {
        self.resolve(Err(error));
    }

    pub fn resolve(self, result: HandoffResult<()>) {
        // The image may already be gone; nobody is left to observe it.
        let _ = self.sender.send(result);
    }
}

#[derive(Debug)]
enum PendingState {
    Waiting(mpsc::Receiver<HandoffResult<()>>),
    Resolved(HandoffResult<()>),
}

#[derive(Debug)]
pub struct PendingPresent {
    state: PendingState,
}

impl PendingPresent {
    pub fn channel() -> (PresentCompleter, Self) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (
            PresentCompleter { sender },
            Self {
                state: PendingState::Waiting(receiver),
            },
        )
    }

    pub fn completed() -> Self {
        Self {
            state: PendingState::Resolved(Ok(())),
        }
    }

    pub fn failed(error: HandoffError) -> Self {
        Self {
            state: PendingState::Resolved(Err(error)),
        }
    }

    /// Non-blocking status check.
    pub fn poll(&mut self) -> PresentStatus {
        if let PendingState::Waiting(receiver) = &self.state {
            match receiver.try_recv() {
                Ok(result) => self.state = PendingState::Resolved(result),
                Err(mpsc::TryRecvError::Empty) => return PresentStatus::Pending,
                Err(mpsc::TryRecvError::Disconnected) => {
                    self.state = PendingState::Resolved(Err(HandoffError::PresentDropped));
                }
            }
        }
        self.resolved_status()
    }

    pub fn is_pending(&mut self) -> bool {
        self.poll() == PresentStatus::Pending
    }

    /// Blocks until the compositor resolves the present.
    pub fn wait(&mut self) -> HandoffResult<()> {
        if let PendingState::Waiting(receiver) = &self.state {
            let result = receiver
                .recv()
                .unwrap_or(Err(HandoffError::PresentDropped));
            self.state = PendingState::Resolved(result);
        }
        self.resolved_result()
    }

    /// Blocks for at most `timeout`. Returns `None` if the present is
    /// still outstanding afterwards.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<HandoffResult<()>> {
        if let PendingState::Waiting(receiver) = &self.state {
            match receiver.recv_timeout(timeout) {
                Ok(result) => self.state = PendingState::Resolved(result),
                Err(mpsc::RecvTimeoutError::Timeout) => return None,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    self.state = PendingState::Resolved(Err(HandoffError::PresentDropped));
                }
            }
        }
        Some(self.resolved_result())
    }

    fn resolved_status(&self) -> PresentStatus {
        match &self.state {
            PendingState::Waiting(_) => PresentStatus::Pending,
            PendingState::Resolved(Ok(())) => PresentStatus::Completed,
            PendingState::Resolved(Err(_)) => PresentStatus::Failed,
        }
    }

    fn resolved_result(&self) -> HandoffResult<()> {
        match &self.state {
            PendingState::Resolved(Ok(())) => Ok(()),
            PendingState::Resolved(Err(err)) => Err(err.to_sendable()),
            PendingState::Waiting(_) => Err(HandoffError::PresentFailed(
                "present is still outstanding".to_string(),
            )),
        }
    }
}
