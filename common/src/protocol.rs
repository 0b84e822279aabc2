use core::fmt;

use serde::{Deserialize, Serialize};

/// Single-byte codes sent by the companion controller over the serial
/// profile link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandCode {
    /// Switch to looping the default track
    DefaultMode = 10,
    /// Switch to Bluetooth sink mode
    BluetoothMode = 15,
    LightOn = 20,
    LightOff = 25,
    /// Followed by one more byte carrying the level
    VolumeChange = 35,
    /// Opens the command window
    Activate = 100,
}

impl TryFrom<u8> for CommandCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(CommandCode::DefaultMode),
            15 => Ok(CommandCode::BluetoothMode),
            20 => Ok(CommandCode::LightOn),
            25 => Ok(CommandCode::LightOff),
            35 => Ok(CommandCode::VolumeChange),
            100 => Ok(CommandCode::Activate),
            other => Err(other),
        }
    }
}

impl From<CommandCode> for u8 {
    fn from(code: CommandCode) -> Self {
        code as u8
    }
}

/// Every audio clip the device knows how to play. Each one is a WAV file
/// on the clip storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Clip {
    DefaultTrack,
    Wake,
    Sleep,
    SwitchDefault,
    SwitchBluetooth,
    CommandActive,
    CommandAccepted,
    CommandInactive,
    CriticalBattery,
    LowBattery,
    AdapterConnected,
    AdapterDisconnected,
}

impl Clip {
    pub const ALL: [Clip; 12] = [
        Clip::DefaultTrack,
        Clip::Wake,
        Clip::Sleep,
        Clip::SwitchDefault,
        Clip::SwitchBluetooth,
        Clip::CommandActive,
        Clip::CommandAccepted,
        Clip::CommandInactive,
        Clip::CriticalBattery,
        Clip::LowBattery,
        Clip::AdapterConnected,
        Clip::AdapterDisconnected,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Clip::DefaultTrack => "monoman.wav",
            Clip::Wake => "gm.wav",
            Clip::Sleep => "gn.wav",
            Clip::SwitchDefault => "def.wav",
            Clip::SwitchBluetooth => "bt.wav",
            Clip::CommandActive => "yes.wav",
            Clip::CommandAccepted => "gotit.wav",
            Clip::CommandInactive => "icgi.wav",
            Clip::CriticalBattery => "b_crit.wav",
            Clip::LowBattery => "b_low.wav",
            Clip::AdapterConnected => "ac.wav",
            Clip::AdapterDisconnected => "ad.wav",
        }
    }
}

/// Bluetooth device address of the paired controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress(pub [u8; 6]);

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}
