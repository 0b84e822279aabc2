use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Which audio source currently owns the output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMode {
    #[default]
    Idle,
    DefaultPlayback,
    BluetoothSink,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightMode {
    #[default]
    Off,
    On,
}

/// Mode state owned by the coordinator. It is only ever mutated from the
/// dispatch consumer, so no reader can see it half-updated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub mode: DeviceMode,
    pub light: LightMode,
}

/// Flags that decide who may feed the audio output.
///
/// `speaking` is written only by narration, `overlay` only by the
/// command-window handling in the coordinator. Everyone else reads.
#[derive(Debug)]
pub struct OutputGate {
    speaking: watch::Sender<bool>,
    overlay: AtomicBool,
}

impl Default for OutputGate {
    fn default() -> Self {
        let (speaking, _) = watch::channel(false);
        Self {
            speaking,
            overlay: AtomicBool::new(false),
        }
    }
}

impl OutputGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.send_replace(speaking);
    }

    pub fn is_overlay(&self) -> bool {
        self.overlay.load(Ordering::Acquire)
    }

    pub fn set_overlay(&self, overlay: bool) {
        self.overlay.store(overlay, Ordering::Release);
    }

    /// Producer frames are dropped while either flag is raised.
    pub fn is_closed(&self) -> bool {
        self.is_speaking() || self.is_overlay()
    }

    /// Resolve once no narration holds the output.
    pub async fn wait_until_quiet(&self) {
        let mut speaking = self.speaking.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = speaking.wait_for(|speaking| !*speaking).await;
    }
}
