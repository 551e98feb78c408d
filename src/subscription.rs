use crate::error::{AvrError, Result};
use crate::protocol::MessageKind;
use tokio::sync::broadcast;

/// State change notification
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    /// A status line of this kind was decoded and applied
    Changed(MessageKind),

    /// The link to the receiver failed; no further updates will arrive
    Disconnected(String),
}

impl StateUpdate {
    /// Wire prefix of the status line that caused the update, if any
    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            StateUpdate::Changed(kind) => Some(kind.prefix()),
            StateUpdate::Disconnected(_) => None,
        }
    }
}

/// Receiver for state updates
pub struct StateReceiver {
    rx: broadcast::Receiver<StateUpdate>,
}

impl StateReceiver {
    /// Create a new state receiver
    pub(crate) fn new(rx: broadcast::Receiver<StateUpdate>) -> Self {
        Self { rx }
    }

    /// Receive the next state update
    ///
    /// Fails with [`AvrError::ConnectionClosed`] once the controller is gone.
    /// Updates missed by a lagging receiver are skipped.
    pub async fn recv(&mut self) -> Result<StateUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => return Ok(update),
                Err(broadcast::error::RecvError::Closed) => return Err(AvrError::ConnectionClosed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("State subscriber lagged by {} updates", n);
                }
            }
        }
    }

    /// Try to receive a state update without blocking
    ///
    /// Returns `None` if no update is waiting. A lagging receiver skips the
    /// updates it missed and returns the oldest one still buffered.
    pub fn try_recv(&mut self) -> Result<Option<StateUpdate>> {
        loop {
            match self.rx.try_recv() {
                Ok(update) => return Ok(Some(update)),
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(AvrError::ConnectionClosed)
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("State subscriber lagged by {} updates", n);
                }
            }
        }
    }
}
