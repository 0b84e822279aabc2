//! Boundaries to the hardware the control core drives. Everything here is a
//! thin synchronous call into a driver; the core never looks inside.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::PeerAddress;
use rgb::RGB8;

use crate::{audio::bluetooth::FrameSender, error::Result};

pub mod sim;

/// The digital audio output (I2S DAC on the device).
pub trait AudioOutput: Send {
    fn configure(&mut self, sample_rate: u32, bits_per_sample: u8, channels: u8) -> Result<()>;

    /// Blocks until every byte has been handed to the peripheral.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Silence whatever is still queued inside the peripheral.
    fn zero_buffer(&mut self) -> Result<()>;

    fn clock_rate(&self) -> u32;

    fn set_clock_rate(&mut self, sample_rate: u32) -> Result<()>;
}

/// The A2DP sink side of the Bluetooth stack.
pub trait BluetoothSink: Send {
    /// Bring the stack up. Decoded PCM from the source goes into `frames`
    /// until `deinit`.
    fn init(&mut self, frames: FrameSender) -> Result<()>;
    fn deinit(&mut self) -> Result<()>;
    fn connect(&mut self, peer: &PeerAddress) -> Result<()>;
    fn disconnect(&mut self, peer: &PeerAddress) -> Result<()>;
}

/// An addressable RGB strip.
pub trait LedStrip: Send {
    fn init(&mut self, pixels: usize) -> Result<()>;
    fn set_pixel(&mut self, index: usize, color: RGB8) -> Result<()>;
    fn refresh(&mut self) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
    fn deinit(&mut self) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LampChannel {
    Left,
    Right,
}

/// The two analog lamp channels, driven by a DAC level.
pub trait Lamps: Send {
    fn enable(&mut self) -> Result<()>;
    fn set_level(&mut self, channel: LampChannel, level: u8) -> Result<()>;
}

/// Raw charge indicator readings.
pub trait PowerSensor: Send {
    fn charger_level(&mut self) -> Result<u16>;
    fn battery_level(&mut self) -> Result<u16>;
}

pub type Shared<T> = Arc<Mutex<T>>;

/// Lock a shared peripheral, recovering it if a previous holder panicked.
pub fn lock<T: ?Sized>(peripheral: &Mutex<T>) -> MutexGuard<'_, T> {
    peripheral.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Every peripheral the core touches, shared between sessions.
#[derive(Clone)]
pub struct Peripherals {
    pub output: Shared<dyn AudioOutput>,
    pub bluetooth: Shared<dyn BluetoothSink>,
    pub strip: Shared<dyn LedStrip>,
    pub lamps: Shared<dyn Lamps>,
    pub sensor: Shared<dyn PowerSensor>,
}
