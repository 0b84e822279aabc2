use common::{Clip, PeerAddress};
use state::{DeviceMode, LightMode};

pub mod audio;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod lights;
pub mod peripherals;
pub mod power;
pub mod serial;
pub mod signal;
pub mod state;
pub mod storage;

pub use error::{Result, SpecBoxError};

pub mod prelude {
    pub use crate::{
        audio::*, config::*, coordinator::*, dispatch::*, error::*, lifecycle::*, signal::*,
        state::*, storage::*,
    };
    pub use common::{Clip, CommandCode, PeerAddress};
}

/// Prompts played on their own, outside a mode change or command window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NarrationEvent {
    Wake,
    Sleep,
    CriticalBattery,
}

impl NarrationEvent {
    pub fn clip(self) -> Clip {
        match self {
            NarrationEvent::Wake => Clip::Wake,
            NarrationEvent::Sleep => Clip::Sleep,
            NarrationEvent::CriticalBattery => Clip::CriticalBattery,
        }
    }
}

/// Command window transitions reported by the command interpreter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowEvent {
    Active,
    Accepted,
    Inactive,
}

impl WindowEvent {
    pub fn clip(self) -> Clip {
        match self {
            WindowEvent::Active => Clip::CommandActive,
            WindowEvent::Accepted => Clip::CommandAccepted,
            WindowEvent::Inactive => Clip::CommandInactive,
        }
    }
}

/// Charger and battery events raised by the sensor task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerEvent {
    LowBattery,
    AdapterConnected,
    AdapterDisconnected,
}

impl PowerEvent {
    pub fn clip(self) -> Clip {
        match self {
            PowerEvent::LowBattery => Clip::LowBattery,
            PowerEvent::AdapterConnected => Clip::AdapterConnected,
            PowerEvent::AdapterDisconnected => Clip::AdapterDisconnected,
        }
    }
}

/// Messages that should be processed in the work queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkMessage {
    /// Leave the current mode and enter `mode`
    SetMode { mode: DeviceMode, peer: PeerAddress },
    /// Volume on the 0..=25 scale, honored only in default playback
    ChangeVolume { level: u8 },
    SetLight(LightMode),
    Narrate(NarrationEvent),
    CommandWindow(WindowEvent),
    Power(PowerEvent),
    /// Spawn the light, sensor, command and playback tasks
    StartCompanions,
    /// Abort every companion task
    StopCompanions,
}
