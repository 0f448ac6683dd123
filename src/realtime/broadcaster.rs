//! Room fan-out of server events.

use super::protocol::encode_event;
use super::registry::ConnectionRegistry;
use super::transport::Frame;
use crate::error::DeliveryError;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Members in the room when the publish ran.
    pub attempted: usize,
    /// Members the frame was queued for.
    pub delivered: usize,
    /// Members whose transport refused the frame.
    pub failed: usize,
}

/// Cumulative delivery counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcasterStats {
    /// Publish calls that reached the fan-out step.
    pub published: u64,
    /// Frames queued across all members.
    pub delivered: u64,
    /// Per-member delivery failures.
    pub failed: u64,
}

/// Sends events to every current member of a room.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Broadcaster {
    /// Creates a broadcaster over a registry.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Publishes `event` with `payload` to the members of `room` at call time.
    ///
    /// The payload is encoded once. A failing member is logged and skipped;
    /// it never prevents delivery to the others. An empty room is not an
    /// error.
    ///
    /// # Errors
    /// Returns [`DeliveryError::Encode`] if the payload cannot be serialized,
    /// in which case nothing is sent.
    pub fn publish<P: Serialize + ?Sized>(
        &self,
        room: &str,
        event: &str,
        payload: &P,
    ) -> Result<PublishReport, DeliveryError> {
        let frame: Frame = Arc::from(encode_event(event, payload)?);
        Ok(self.publish_frame(room, &frame))
    }

    /// Publishes an already-encoded frame.
    pub fn publish_frame(&self, room: &str, frame: &Frame) -> PublishReport {
        let members = self.registry.members(room);
        let mut report = PublishReport {
            attempted: members.len(),
            ..PublishReport::default()
        };

        for member in members {
            match member.transport.send(Arc::clone(frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(connection = %member.id, room, error = %e, "Dropped frame for room member");
                }
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);

        debug!(
            room,
            attempted = report.attempted,
            delivered = report.delivered,
            failed = report.failed,
            "Published frame"
        );
        report
    }

    /// Returns the cumulative counters.
    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
