use std::{
    collections::VecDeque,
    ops::Deref,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

#[derive(Debug, Default)]
struct RingState {
    bytes: VecDeque<u8>,
    /// Bytes handed to the consumer but not yet released
    in_flight: usize,
}

/// Bounded byte stream between the audio producers and the output writer.
///
/// Space taken by a received chunk is only returned once the chunk is
/// dropped, so a producer cannot run more than `capacity` bytes ahead of
/// what the peripheral has actually consumed.
#[derive(Debug)]
pub struct RingChannel {
    capacity: usize,
    state: Mutex<RingState>,
    space: Notify,
    data: Notify,
}

impl RingChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(RingState::default()),
            space: Notify::new(),
            data: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes queued and not yet received.
    pub fn len(&self) -> usize {
        self.state().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn free(&self) -> usize {
        let state = self.state();
        self.capacity - state.bytes.len() - state.in_flight
    }

    /// Queue `data`, waiting as long as it takes for space. Buffers larger
    /// than the ring go in capacity-sized pieces.
    pub async fn send(&self, data: &[u8]) {
        for piece in data.chunks(self.capacity) {
            loop {
                let space = self.space.notified();
                tokio::pin!(space);
                space.as_mut().enable();

                if self.try_push(piece) {
                    self.data.notify_waiters();
                    break;
                }
                space.await;
            }
        }
    }

    fn try_push(&self, piece: &[u8]) -> bool {
        let mut state = self.state();
        if self.capacity - state.bytes.len() - state.in_flight < piece.len() {
            return false;
        }
        state.bytes.extend(piece);
        true
    }

    /// Take up to `max` bytes, waiting at most `wait` for any to arrive.
    pub async fn receive(&self, max: usize, wait: Duration) -> Option<RingChunk<'_>> {
        let deadline = Instant::now() + wait;
        loop {
            let ready = self.data.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if let Some(chunk) = self.try_receive(max) {
                return Some(chunk);
            }
            if tokio::time::timeout_at(deadline, ready).await.is_err() {
                return None;
            }
        }
    }

    pub fn try_receive(&self, max: usize) -> Option<RingChunk<'_>> {
        let mut state = self.state();
        if state.bytes.is_empty() || max == 0 {
            return None;
        }
        let take = max.min(state.bytes.len());
        let bytes: Vec<u8> = state.bytes.drain(..take).collect();
        state.in_flight += take;
        Some(RingChunk {
            ring: self,
            bytes,
        })
    }

    /// Drop everything queued. Chunks already received stay valid.
    pub fn clear(&self) {
        self.state().bytes.clear();
        self.space.notify_waiters();
    }

    fn release(&self, len: usize) {
        {
            let mut state = self.state();
            state.in_flight -= len;
        }
        self.space.notify_waiters();
    }
}

/// Bytes received from the ring. Dropping it hands the space back.
#[derive(Debug)]
pub struct RingChunk<'a> {
    ring: &'a RingChannel,
    bytes: Vec<u8>,
}

impl RingChunk<'_> {
    /// Copy out the bytes for in-place processing.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl Deref for RingChunk<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for RingChunk<'_> {
    fn drop(&mut self) {
        self.ring.release(self.bytes.len());
    }
}
