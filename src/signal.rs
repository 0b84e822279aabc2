use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::Notify;

/// Control values posted to a long-running task. Only the latest one
/// matters; tasks must tolerate intermediate values being overwritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Start,
    Stop,
    Abort,
}

/// A one-element mailbox with overwrite-on-post semantics. The consumer
/// always sees the most recent value, never a history of them.
#[derive(Debug)]
pub struct Notification<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Default for Notification<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }
}

impl<T> Notification<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is pending and wake the consumer.
    pub fn post(&self, value: T) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
        // notify_one keeps a permit if nobody is waiting yet
        self.notify.notify_one();
    }

    /// Non-blocking read that clears the slot.
    pub fn try_take(&self) -> Option<T> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub async fn wait(&self) -> T {
        loop {
            if let Some(value) = self.try_take() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    /// Wait at most `timeout` for a value.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

impl Notification<Control> {
    /// Block until a Start or Abort arrives, skipping any Stop.
    pub async fn wait_for_start(&self) -> Control {
        loop {
            match self.wait().await {
                Control::Stop => continue,
                other => return other,
            }
        }
    }
}
