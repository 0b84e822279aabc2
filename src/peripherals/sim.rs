//! Stand-ins for the device drivers when running on a host. They keep
//! enough state to be inspected from tests and log what real hardware
//! would have done.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use common::PeerAddress;
use log::{debug, info};
use rgb::RGB8;

use super::{AudioOutput, BluetoothSink, LampChannel, Lamps, LedStrip, Peripherals, PowerSensor};
use crate::{
    audio::{bluetooth::FrameSender, BYTES_PER_FRAME, SAMPLE_RATE},
    error::{Result, SpecBoxError},
};

/// Records everything written to it. Optionally paces writes as if a DAC
/// were consuming the samples in real time.
#[derive(Debug, Default)]
pub struct SimAudioOutput {
    pub written: Vec<u8>,
    pub writes: usize,
    pub zeroed: usize,
    pub clock_rate: u32,
    pub clock_changes: Vec<u32>,
    pub realtime: bool,
    /// Keep the written bytes around for inspection
    pub capture: bool,
}

impl SimAudioOutput {
    pub fn new() -> Self {
        Self {
            clock_rate: SAMPLE_RATE,
            capture: true,
            ..Default::default()
        }
    }

    /// Paced, non-capturing output for the host binary.
    pub fn realtime() -> Self {
        Self {
            clock_rate: SAMPLE_RATE,
            realtime: true,
            ..Default::default()
        }
    }
}

impl AudioOutput for SimAudioOutput {
    fn configure(&mut self, sample_rate: u32, bits_per_sample: u8, channels: u8) -> Result<()> {
        if bits_per_sample != 16 || channels != 2 {
            return Err(SpecBoxError::peripheral(
                "audio output",
                format!("unsupported format {bits_per_sample} bit x {channels}"),
            ));
        }
        self.clock_rate = sample_rate;
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.capture {
            self.written.extend_from_slice(bytes);
        }
        self.writes += 1;
        if self.realtime && self.clock_rate > 0 {
            let frames = (bytes.len() / BYTES_PER_FRAME) as u64;
            std::thread::sleep(Duration::from_micros(
                frames * 1_000_000 / u64::from(self.clock_rate),
            ));
        }
        Ok(bytes.len())
    }

    fn zero_buffer(&mut self) -> Result<()> {
        self.zeroed += 1;
        Ok(())
    }

    fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    fn set_clock_rate(&mut self, sample_rate: u32) -> Result<()> {
        debug!("audio output: clock {} -> {}", self.clock_rate, sample_rate);
        self.clock_rate = sample_rate;
        self.clock_changes.push(sample_rate);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BluetoothCall {
    Init,
    Deinit,
    Connect(PeerAddress),
    Disconnect(PeerAddress),
}

#[derive(Debug, Default)]
pub struct SimBluetooth {
    pub calls: Vec<BluetoothCall>,
    pub initialized: bool,
    frames: Option<FrameSender>,
}

impl SimBluetooth {
    /// Deliver one PCM frame the way the A2DP data callback would. Returns
    /// false when the sink is down or its queue is full.
    pub fn feed(&self, frame: Vec<u8>) -> bool {
        match &self.frames {
            Some(frames) => frames.try_send(frame).is_ok(),
            None => false,
        }
    }
}

impl BluetoothSink for SimBluetooth {
    fn init(&mut self, frames: FrameSender) -> Result<()> {
        info!("bluetooth: sink init");
        self.initialized = true;
        self.frames = Some(frames);
        self.calls.push(BluetoothCall::Init);
        Ok(())
    }

    fn deinit(&mut self) -> Result<()> {
        info!("bluetooth: sink deinit");
        self.initialized = false;
        self.frames = None;
        self.calls.push(BluetoothCall::Deinit);
        Ok(())
    }

    fn connect(&mut self, peer: &PeerAddress) -> Result<()> {
        if !self.initialized {
            return Err(SpecBoxError::peripheral("bluetooth", "sink not initialized"));
        }
        info!("bluetooth: connecting to {}", peer);
        self.calls.push(BluetoothCall::Connect(*peer));
        Ok(())
    }

    fn disconnect(&mut self, peer: &PeerAddress) -> Result<()> {
        info!("bluetooth: disconnecting {}", peer);
        self.calls.push(BluetoothCall::Disconnect(*peer));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimLedStrip {
    pub pixels: Vec<RGB8>,
    /// Last frame pushed out by `refresh`
    pub shown: Vec<RGB8>,
    pub refreshes: usize,
    pub active: bool,
    pub fail_init: bool,
}

impl LedStrip for SimLedStrip {
    fn init(&mut self, pixels: usize) -> Result<()> {
        if self.fail_init {
            return Err(SpecBoxError::peripheral("led strip", "rmt channel busy"));
        }
        self.pixels = vec![RGB8::default(); pixels];
        self.shown = self.pixels.clone();
        self.active = true;
        Ok(())
    }

    fn set_pixel(&mut self, index: usize, color: RGB8) -> Result<()> {
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or_else(|| SpecBoxError::peripheral("led strip", format!("no pixel {index}")))?;
        *pixel = color;
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        self.shown = self.pixels.clone();
        self.refreshes += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.pixels.iter_mut().for_each(|p| *p = RGB8::default());
        self.shown = self.pixels.clone();
        Ok(())
    }

    fn deinit(&mut self) -> Result<()> {
        self.active = false;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SimLamps {
    pub enabled: bool,
    pub left: u8,
    pub right: u8,
}

impl Lamps for SimLamps {
    fn enable(&mut self) -> Result<()> {
        self.enabled = true;
        Ok(())
    }

    fn set_level(&mut self, channel: LampChannel, level: u8) -> Result<()> {
        match channel {
            LampChannel::Left => self.left = level,
            LampChannel::Right => self.right = level,
        }
        Ok(())
    }
}

/// Reports whatever readings were last set on it.
#[derive(Debug)]
pub struct SimPowerSensor {
    pub charger: u16,
    pub battery: u16,
}

impl Default for SimPowerSensor {
    fn default() -> Self {
        // On battery, fully charged
        Self {
            charger: 0,
            battery: 1023,
        }
    }
}

impl PowerSensor for SimPowerSensor {
    fn charger_level(&mut self) -> Result<u16> {
        Ok(self.charger)
    }

    fn battery_level(&mut self) -> Result<u16> {
        Ok(self.battery)
    }
}

/// Concrete handles to a full set of simulated peripherals, kept so tests
/// can inspect them after handing `Peripherals` to the core.
#[derive(Clone, Default)]
pub struct SimDevice {
    pub output: Arc<Mutex<SimAudioOutput>>,
    pub bluetooth: Arc<Mutex<SimBluetooth>>,
    pub strip: Arc<Mutex<SimLedStrip>>,
    pub lamps: Arc<Mutex<SimLamps>>,
    pub sensor: Arc<Mutex<SimPowerSensor>>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self::with_output(SimAudioOutput::new())
    }

    pub fn with_output(output: SimAudioOutput) -> Self {
        Self {
            output: Arc::new(Mutex::new(output)),
            ..Default::default()
        }
    }

    pub fn peripherals(&self) -> Peripherals {
        Peripherals {
            output: self.output.clone(),
            bluetooth: self.bluetooth.clone(),
            strip: self.strip.clone(),
            lamps: self.lamps.clone(),
            sensor: self.sensor.clone(),
        }
    }
}
