use std::{path::Path, path::PathBuf, time::Duration};

use anyhow::Error;
use common::PeerAddress;
use log::warn;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "specbox.ron";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Directory holding the track and prompt WAV files
    pub clip_root: PathBuf,
    /// Local socket standing in for the controller's serial profile link
    pub socket_path: String,
    /// Address reported for the controller when the link opens
    pub controller: PeerAddress,
    pub timings: Timings,
    pub audio: AudioConfig,
    pub power: PowerConfig,
}

/// All delays, in milliseconds.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Timings {
    pub command_poll_ms: u64,
    /// Command window length, counted in polls
    pub command_window_polls: u8,
    pub sensor_poll_ms: u64,
    pub narration_lead_in_ms: u64,
    pub narration_tail_ms: u64,
    pub mode_settle_ms: u64,
    pub writer_receive_ms: u64,
    pub dispatch_send_timeout_ms: u64,
    pub frame_ready_wait_ms: u64,
    pub overlay_frame_ms: u64,
    pub shutdown_grace_ms: u64,
    pub queue_drain_poll_ms: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub ring_capacity: usize,
    pub wake_volume: u8,
    pub bluetooth_volume: u8,
    pub max_user_volume: u8,
    /// Bytes cut off the end of the default track
    pub track_tail_margin: u64,
    pub clip_header_len: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct PowerConfig {
    pub charger_threshold: u16,
    pub critical_bound: u16,
    pub low_bound: u16,
    /// Polls between repeated low-battery prompts
    pub low_repeat_polls: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            clip_root: PathBuf::from("sdcard"),
            socket_path: "/tmp/specbox.sock".to_string(),
            controller: PeerAddress::default(),
            timings: Timings::default(),
            audio: AudioConfig::default(),
            power: PowerConfig::default(),
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            command_poll_ms: 1000,
            command_window_polls: 15,
            sensor_poll_ms: 10_000,
            narration_lead_in_ms: 200,
            narration_tail_ms: 1000,
            mode_settle_ms: 1000,
            writer_receive_ms: 10,
            dispatch_send_timeout_ms: 10,
            frame_ready_wait_ms: 100,
            overlay_frame_ms: 30,
            shutdown_grace_ms: 2000,
            queue_drain_poll_ms: 500,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 8192,
            wake_volume: 5,
            bluetooth_volume: 5,
            max_user_volume: 10,
            track_tail_margin: 60_000,
            clip_header_len: 44,
        }
    }
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            charger_threshold: 256,
            critical_bound: 560,
            low_bound: 590,
            low_repeat_polls: 6,
        }
    }
}

impl Timings {
    pub fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }

    pub fn sensor_poll(&self) -> Duration {
        Duration::from_millis(self.sensor_poll_ms)
    }

    pub fn narration_lead_in(&self) -> Duration {
        Duration::from_millis(self.narration_lead_in_ms)
    }

    pub fn narration_tail(&self) -> Duration {
        Duration::from_millis(self.narration_tail_ms)
    }

    pub fn mode_settle(&self) -> Duration {
        Duration::from_millis(self.mode_settle_ms)
    }

    pub fn writer_receive(&self) -> Duration {
        Duration::from_millis(self.writer_receive_ms)
    }

    pub fn dispatch_send_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_send_timeout_ms)
    }

    pub fn frame_ready_wait(&self) -> Duration {
        Duration::from_millis(self.frame_ready_wait_ms)
    }

    pub fn overlay_frame(&self) -> Duration {
        Duration::from_millis(self.overlay_frame_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn queue_drain_poll(&self) -> Duration {
        Duration::from_millis(self.queue_drain_poll_ms)
    }
}

impl Config {
    pub fn load() -> Result<Config, Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, Error> {
        let config = std::fs::read_to_string(path)?;
        let config: Config = ron::from_str(&config)?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise run with the stock device.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Config, Error> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("No config at {}, using defaults", path.display());
            return Ok(Config::default());
        }
        Self::load_from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("specbox.ron");

        // Write an example config file
        std::fs::write(
            &path,
            r#"(
    clip_root: "/sdcard",
    controller: ((1, 2, 3, 4, 5, 6)),
    timings: (
        command_poll_ms: 250,
        command_window_polls: 8,
    ),
    power: (
        low_bound: 600,
    ),
)"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config,
            Config {
                clip_root: PathBuf::from("/sdcard"),
                controller: PeerAddress([1, 2, 3, 4, 5, 6]),
                timings: Timings {
                    command_poll_ms: 250,
                    command_window_polls: 8,
                    ..Timings::default()
                },
                power: PowerConfig {
                    low_bound: 600,
                    ..PowerConfig::default()
                },
                ..Config::default()
            }
        );
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.ron")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.timings.command_window_polls, 15);
        assert_eq!(config.audio.ring_capacity, 8192);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.ron");
        std::fs::write(&path, "(timings: [").unwrap();
        assert!(Config::load_or_default(&path).is_err());
    }
}
