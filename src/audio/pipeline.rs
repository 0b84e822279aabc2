use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use log::trace;
use tokio::sync::Notify;

use super::{ring::RingChannel, CHUNK_BYTES};
use crate::state::OutputGate;

/// Copy of the most recent producer frame for the light engine.
#[derive(Debug)]
pub struct Snapshot {
    bytes: Mutex<Vec<u8>>,
    /// Binary semaphore: at most one pending "frame ready"
    ready: Notify,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            bytes: Mutex::new(vec![0; CHUNK_BYTES]),
            ready: Notify::new(),
        }
    }
}

impl Snapshot {
    /// Store up to one chunk, zero padding a shorter frame.
    pub fn store(&self, data: &[u8]) {
        {
            let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
            let len = data.len().min(CHUNK_BYTES);
            bytes[..len].copy_from_slice(&data[..len]);
            bytes[len..].fill(0);
        }
        self.ready.notify_one();
    }

    /// Wait at most `wait` for a fresh frame and return a copy of it.
    pub async fn acquire(&self, wait: Duration) -> Option<Vec<u8>> {
        tokio::time::timeout(wait, self.ready.notified()).await.ok()?;
        Some(self.bytes.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

/// The shared audio path: every producer publishes here and the output
/// writer drains the ring.
#[derive(Debug)]
pub struct AudioPipeline {
    ring: RingChannel,
    snapshot: Snapshot,
    gate: Arc<OutputGate>,
}

impl AudioPipeline {
    pub fn new(capacity: usize, gate: Arc<OutputGate>) -> Self {
        Self {
            ring: RingChannel::new(capacity),
            snapshot: Snapshot::default(),
            gate,
        }
    }

    pub fn ring(&self) -> &RingChannel {
        &self.ring
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn gate(&self) -> &Arc<OutputGate> {
        &self.gate
    }

    /// Publish a producer frame (track playback or Bluetooth). While
    /// narration or the command overlay holds the output the frame is
    /// dropped and `false` is returned. Otherwise the frame seeds the
    /// snapshot and is queued, waiting as long as needed for ring space.
    pub async fn publish(&self, data: &[u8]) -> bool {
        if self.gate.is_closed() {
            trace!("Dropping {} byte frame, output is gated", data.len());
            return false;
        }
        self.snapshot.store(data);
        self.ring.send(data).await;
        true
    }

    /// Narration path. It raises the gate itself, so it goes straight to
    /// the ring without touching the snapshot.
    pub async fn publish_narration(&self, data: &[u8]) {
        self.ring.send(data).await;
    }
}
