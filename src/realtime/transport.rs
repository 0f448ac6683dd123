//! Outbound side of a connection, as seen by the registry and broadcaster.

use crate::error::DeliveryError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// An encoded frame shared by every recipient of one publish.
pub type Frame = Arc<str>;

/// Work handed to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame to write.
    Frame(Frame),
    /// Close the connection with a reason.
    Close(String),
}

/// Non-blocking handle for pushing frames to one client.
///
/// Implementations must never wait on the client: a send either queues the
/// frame immediately or fails.
pub trait Transport: Send + Sync {
    /// Queues a frame for delivery.
    ///
    /// # Errors
    /// Returns a [`DeliveryError`] if the frame cannot be queued.
    fn send(&self, frame: Frame) -> Result<(), DeliveryError>;

    /// Asks the connection to close, even if its frame queue is full.
    fn close(&self, reason: &str);
}

/// Transport backed by a bounded queue drained by the socket writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    frames: mpsc::Sender<Frame>,
    close: Arc<watch::Sender<Option<String>>>,
}

/// Receiving half of a [`ChannelTransport`], owned by the writer task.
#[derive(Debug)]
pub struct OutboundQueue {
    frames: mpsc::Receiver<Frame>,
    close: watch::Receiver<Option<String>>,
}

impl ChannelTransport {
    /// Creates a transport and the queue its writer task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, OutboundQueue) {
        let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
        let (close_tx, close_rx) = watch::channel(None);
        (
            Self {
                frames: frames_tx,
                close: Arc::new(close_tx),
            },
            OutboundQueue {
                frames: frames_rx,
                close: close_rx,
            },
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Frame) -> Result<(), DeliveryError> {
        self.frames.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    fn close(&self, reason: &str) {
        self.close.send_replace(Some(reason.to_string()));
    }
}

impl OutboundQueue {
    /// Waits for the next unit of work. A close request takes priority over
    /// queued frames. Returns `None` once every transport handle is gone.
    pub async fn next(&mut self) -> Option<Outbound> {
        if let Some(reason) = self.close.borrow_and_update().clone() {
            return Some(Outbound::Close(reason));
        }

        tokio::select! {
            biased;
            changed = self.close.changed() => {
                let reason = match changed {
                    Ok(()) => self.close.borrow_and_update().clone(),
                    Err(_) => None,
                };
                match reason {
                    Some(reason) => Some(Outbound::Close(reason)),
                    None => self.frames.recv().await.map(Outbound::Frame),
                }
            }
            frame = self.frames.recv() => frame.map(Outbound::Frame),
        }
    }
}
