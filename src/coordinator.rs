//! Mode transitions and voice prompts. Every method here runs on the work
//! queue consumer, so a transition and a prompt never overlap. Both share
//! the one audio output with the playback task, which is kept off it by
//! the speaking flag.

use std::sync::Arc;

use common::{Clip, PeerAddress};
use log::{debug, error, info, warn};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    audio::{
        bluetooth::{forward_frames, BLUETOOTH_FRAME_QUEUE},
        AudioPipeline, Volume, CHUNK_BYTES, SAMPLE_RATE,
    },
    config::{AudioConfig, Timings},
    error::{Result, SpecBoxError},
    peripherals::{lock, Peripherals},
    signal::{Control, Notification},
    state::{DeviceMode, DeviceState, LightMode},
    storage::{ClipStorage, ClipStream},
    PowerEvent, WindowEvent,
};

/// Mailboxes of the tasks the coordinator steers.
#[derive(Clone, Debug, Default)]
pub struct TaskSignals {
    pub playback: Arc<Notification<Control>>,
    pub lights: Arc<Notification<Control>>,
    pub volume: Arc<Notification<Volume>>,
}

pub struct ModeCoordinator {
    state: DeviceState,
    mode: watch::Sender<DeviceMode>,
    pipeline: Arc<AudioPipeline>,
    peripherals: Peripherals,
    storage: Arc<dyn ClipStorage>,
    signals: TaskSignals,
    timings: Timings,
    audio: AudioConfig,
    /// Moves sink PCM into the pipeline while in Bluetooth mode
    bluetooth_audio: Option<JoinHandle<usize>>,
}

fn log_failure(what: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("{}: {}", what, e);
    }
}

impl ModeCoordinator {
    pub fn new(
        pipeline: Arc<AudioPipeline>,
        peripherals: Peripherals,
        storage: Arc<dyn ClipStorage>,
        signals: TaskSignals,
        timings: Timings,
        audio: AudioConfig,
    ) -> Self {
        let (mode, _) = watch::channel(DeviceMode::default());
        Self {
            state: DeviceState::default(),
            mode,
            pipeline,
            peripherals,
            storage,
            signals,
            timings,
            audio,
            bluetooth_audio: None,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Observe mode changes in the order they are applied.
    pub fn subscribe(&self) -> watch::Receiver<DeviceMode> {
        self.mode.subscribe()
    }

    pub fn signals(&self) -> &TaskSignals {
        &self.signals
    }

    pub async fn set_mode(&mut self, mode: DeviceMode, peer: PeerAddress) -> Result<()> {
        let previous = self.state.mode;
        if mode == previous {
            debug!("Already in {:?}", mode);
            return Ok(());
        }
        info!("Mode {:?} -> {:?}", previous, mode);

        match previous {
            DeviceMode::DefaultPlayback => self.signals.playback.post(Control::Stop),
            DeviceMode::BluetoothSink => {
                log_failure(
                    "Bluetooth disconnect",
                    lock(&self.peripherals.bluetooth).disconnect(&peer),
                );
                tokio::time::sleep(self.timings.mode_settle()).await;
                log_failure("Bluetooth deinit", lock(&self.peripherals.bluetooth).deinit());
                if let Some(forwarder) = self.bluetooth_audio.take() {
                    forwarder.abort();
                }
            }
            DeviceMode::Idle => {}
        }

        match mode {
            DeviceMode::DefaultPlayback => {
                log_failure("Mode prompt", self.narrate(Clip::SwitchDefault).await);
                self.signals.playback.post(Control::Start);
            }
            DeviceMode::BluetoothSink => {
                let (frames, source) = mpsc::channel(BLUETOOTH_FRAME_QUEUE);
                match lock(&self.peripherals.bluetooth).init(frames) {
                    Ok(()) => {
                        self.bluetooth_audio =
                            Some(tokio::spawn(forward_frames(self.pipeline.clone(), source)));
                    }
                    Err(e) => error!("Bluetooth init: {}", e),
                }
                tokio::time::sleep(self.timings.mode_settle()).await;
                log_failure("Mode prompt", self.narrate(Clip::SwitchBluetooth).await);
                log_failure(
                    "Bluetooth connect",
                    lock(&self.peripherals.bluetooth).connect(&peer),
                );
                self.signals
                    .volume
                    .post(Volume::new(self.audio.bluetooth_volume));
            }
            DeviceMode::Idle => {}
        }

        tokio::time::sleep(self.timings.mode_settle()).await;
        log_failure("Zeroing output", lock(&self.peripherals.output).zero_buffer());

        self.state.mode = mode;
        self.mode.send_replace(mode);
        Ok(())
    }

    /// Play one prompt straight into the ring while playback is held off.
    pub async fn narrate(&self, clip: Clip) -> Result<()> {
        let gate = self.pipeline.gate();
        gate.set_speaking(true);
        info!("Narrating {}", clip.file_name());

        match self.stream_clip(clip).await {
            Ok(()) => {
                tokio::time::sleep(self.timings.narration_tail()).await;
                gate.set_speaking(false);
                Ok(())
            }
            Err(e) => {
                gate.set_speaking(false);
                Err(e)
            }
        }
    }

    async fn stream_clip(&self, clip: Clip) -> Result<()> {
        tokio::time::sleep(self.timings.narration_lead_in()).await;
        log_failure("Zeroing output", lock(&self.peripherals.output).zero_buffer());

        let mut stream = ClipStream::open(
            self.storage.as_ref(),
            clip,
            self.audio.clip_header_len,
            0,
        )?;

        let previous_rate = lock(&self.peripherals.output).clock_rate();
        if previous_rate != SAMPLE_RATE {
            lock(&self.peripherals.output).set_clock_rate(SAMPLE_RATE)?;
        }

        let streamed = self.publish_stream(&mut stream).await;

        if previous_rate != SAMPLE_RATE {
            lock(&self.peripherals.output).set_clock_rate(previous_rate)?;
        }
        streamed
    }

    async fn publish_stream(&self, stream: &mut ClipStream) -> Result<()> {
        let mut buffer = vec![0u8; CHUNK_BYTES];
        loop {
            let read = stream.read_chunk(&mut buffer)?;
            if read == 0 {
                return Ok(());
            }
            self.pipeline.publish_narration(&buffer[..read]).await;
        }
    }

    pub fn change_volume(&mut self, level: u8) -> Result<()> {
        if level > self.audio.max_user_volume {
            return Err(SpecBoxError::Rejected(format!(
                "volume {} above {}",
                level, self.audio.max_user_volume
            )));
        }
        if self.state.mode != DeviceMode::DefaultPlayback {
            return Err(SpecBoxError::Rejected(format!(
                "volume change in {:?}",
                self.state.mode
            )));
        }
        info!("Volume -> {}", level);
        self.signals.volume.post(Volume::new(level));
        Ok(())
    }

    pub fn set_light(&mut self, light: LightMode) {
        if light == self.state.light {
            debug!("Light already {:?}", light);
            return;
        }
        info!("Light {:?} -> {:?}", self.state.light, light);
        self.signals.lights.post(match light {
            LightMode::On => Control::Start,
            LightMode::Off => Control::Stop,
        });
        self.state.light = light;
    }

    /// The overlay goes up before the "active" prompt and comes down after
    /// the closing one, even if that prompt could not be played.
    pub async fn command_window(&mut self, event: WindowEvent) -> Result<()> {
        let gate = self.pipeline.gate().clone();
        match event {
            WindowEvent::Active => {
                gate.set_overlay(true);
                self.narrate(event.clip()).await
            }
            WindowEvent::Accepted | WindowEvent::Inactive => {
                let result = self.narrate(event.clip()).await;
                gate.set_overlay(false);
                result
            }
        }
    }

    pub async fn power_event(&mut self, event: PowerEvent) -> Result<()> {
        if event == PowerEvent::LowBattery {
            warn!("Battery low");
        }
        self.narrate(event.clip()).await
    }
}

impl Drop for ModeCoordinator {
    fn drop(&mut self) {
        if let Some(forwarder) = self.bluetooth_audio.take() {
            forwarder.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        peripherals::sim::{BluetoothCall, SimDevice},
        state::OutputGate,
        storage::MemoryStorage,
    };

    const PEER: PeerAddress = PeerAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn prompt(fill: u8) -> Vec<u8> {
        let mut bytes = vec![0u8; 44];
        bytes.extend(std::iter::repeat(fill).take(1024));
        bytes
    }

    fn storage() -> MemoryStorage {
        Clip::ALL
            .iter()
            .enumerate()
            .filter(|(_, clip)| **clip != Clip::DefaultTrack)
            .fold(MemoryStorage::new(), |storage, (i, clip)| {
                storage.with(*clip, prompt(i as u8))
            })
    }

    fn coordinator(device: &SimDevice, storage: MemoryStorage) -> ModeCoordinator {
        let pipeline = Arc::new(AudioPipeline::new(1 << 16, Arc::new(OutputGate::new())));
        ModeCoordinator::new(
            pipeline,
            device.peripherals(),
            Arc::new(storage),
            TaskSignals::default(),
            Timings::default(),
            AudioConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_enter_default_narrates_then_starts_playback() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());
        let mut modes = coordinator.subscribe();

        coordinator
            .set_mode(DeviceMode::DefaultPlayback, PEER)
            .await
            .unwrap();

        assert_eq!(coordinator.state().mode, DeviceMode::DefaultPlayback);
        assert!(modes.has_changed().unwrap());
        assert_eq!(*modes.borrow_and_update(), DeviceMode::DefaultPlayback);
        assert_eq!(coordinator.signals().playback.try_take(), Some(Control::Start));
        assert_eq!(coordinator.pipeline.ring().len(), 1024);
        assert!(!coordinator.pipeline.gate().is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_mode_is_noop() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());
        coordinator.set_mode(DeviceMode::Idle, PEER).await.unwrap();
        assert_eq!(device.output.lock().unwrap().zeroed, 0);
        assert!(coordinator.pipeline.ring().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bluetooth_round_trip_sequences_the_sink() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());

        coordinator
            .set_mode(DeviceMode::BluetoothSink, PEER)
            .await
            .unwrap();
        assert_eq!(coordinator.signals().volume.try_take(), Some(Volume::new(5)));

        coordinator
            .set_mode(DeviceMode::DefaultPlayback, PEER)
            .await
            .unwrap();

        assert_eq!(
            device.bluetooth.lock().unwrap().calls,
            vec![
                BluetoothCall::Init,
                BluetoothCall::Connect(PEER),
                BluetoothCall::Disconnect(PEER),
                BluetoothCall::Deinit,
            ]
        );
        assert_eq!(coordinator.state().mode, DeviceMode::DefaultPlayback);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_default_stops_playback() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());
        coordinator
            .set_mode(DeviceMode::DefaultPlayback, PEER)
            .await
            .unwrap();
        coordinator.set_mode(DeviceMode::Idle, PEER).await.unwrap();
        assert_eq!(coordinator.signals().playback.try_take(), Some(Control::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_changes_observed_in_order() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());
        let mut modes = coordinator.subscribe();

        let requested = [
            DeviceMode::DefaultPlayback,
            DeviceMode::BluetoothSink,
            DeviceMode::Idle,
            DeviceMode::BluetoothSink,
        ];
        let mut observed = Vec::new();
        for mode in requested {
            coordinator.set_mode(mode, PEER).await.unwrap();
            if modes.has_changed().unwrap() {
                observed.push(*modes.borrow_and_update());
            }
        }
        assert_eq!(observed, requested);
    }

    #[tokio::test(start_paused = true)]
    async fn test_narration_restores_clock() {
        let device = SimDevice::new();
        device.output.lock().unwrap().clock_rate = 16_000;
        let coordinator = coordinator(&device, storage());

        coordinator.narrate(Clip::Wake).await.unwrap();
        assert_eq!(
            device.output.lock().unwrap().clock_changes,
            vec![SAMPLE_RATE, 16_000]
        );
        assert_eq!(device.output.lock().unwrap().clock_rate, 16_000);
    }

    /// Opens fine, then fails every read.
    struct UnreadableStorage;

    struct Unreadable(std::io::Cursor<Vec<u8>>);

    impl std::io::Read for Unreadable {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "card removed"))
        }
    }

    impl std::io::Seek for Unreadable {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            std::io::Seek::seek(&mut self.0, pos)
        }
    }

    impl ClipStorage for UnreadableStorage {
        fn open(&self, _clip: Clip) -> Result<Box<dyn crate::storage::ClipReader>> {
            Ok(Box::new(Unreadable(std::io::Cursor::new(prompt(0)))))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_still_restores_clock() {
        let device = SimDevice::new();
        device.output.lock().unwrap().clock_rate = 16_000;
        let pipeline = Arc::new(AudioPipeline::new(1 << 16, Arc::new(OutputGate::new())));
        let coordinator = ModeCoordinator::new(
            pipeline,
            device.peripherals(),
            Arc::new(UnreadableStorage),
            TaskSignals::default(),
            Timings::default(),
            AudioConfig::default(),
        );

        let result = coordinator.narrate(Clip::Wake).await;
        assert!(matches!(result, Err(SpecBoxError::Io(_))));
        assert_eq!(
            device.output.lock().unwrap().clock_changes,
            vec![SAMPLE_RATE, 16_000]
        );
        assert_eq!(device.output.lock().unwrap().clock_rate, 16_000);
        assert!(!coordinator.pipeline.gate().is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bluetooth_frames_reach_pipeline_only_in_bluetooth_mode() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());

        coordinator
            .set_mode(DeviceMode::BluetoothSink, PEER)
            .await
            .unwrap();
        let narrated = coordinator.pipeline.ring().len();

        let frame: Vec<u8> = (0..=255).collect();
        assert!(device.bluetooth.lock().unwrap().feed(frame.clone()));
        let snapshot = coordinator
            .pipeline
            .snapshot()
            .acquire(std::time::Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(&snapshot[..frame.len()], &frame[..]);
        assert_eq!(coordinator.pipeline.ring().len(), narrated + frame.len());

        coordinator.set_mode(DeviceMode::Idle, PEER).await.unwrap();
        assert!(!device.bluetooth.lock().unwrap().feed(frame));
        assert!(coordinator.bluetooth_audio.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_prompt_clears_speaking() {
        let device = SimDevice::new();
        let coordinator = coordinator(&device, MemoryStorage::new());

        let result = coordinator.narrate(Clip::Sleep).await;
        assert!(matches!(result, Err(SpecBoxError::MissingMedia { .. })));
        assert!(!coordinator.pipeline.gate().is_speaking());
        assert!(coordinator.pipeline.ring().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_policy() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());

        assert!(matches!(
            coordinator.change_volume(5),
            Err(SpecBoxError::Rejected(_))
        ));

        coordinator
            .set_mode(DeviceMode::DefaultPlayback, PEER)
            .await
            .unwrap();
        assert!(matches!(
            coordinator.change_volume(11),
            Err(SpecBoxError::Rejected(_))
        ));
        coordinator.change_volume(10).unwrap();
        assert_eq!(coordinator.signals().volume.try_take(), Some(Volume::new(10)));
    }

    #[tokio::test]
    async fn test_set_light_only_signals_changes() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());

        coordinator.set_light(LightMode::Off);
        assert_eq!(coordinator.signals().lights.try_take(), None);

        coordinator.set_light(LightMode::On);
        assert_eq!(coordinator.signals().lights.try_take(), Some(Control::Start));
        coordinator.set_light(LightMode::On);
        assert_eq!(coordinator.signals().lights.try_take(), None);

        coordinator.set_light(LightMode::Off);
        assert_eq!(coordinator.signals().lights.try_take(), Some(Control::Stop));
        assert_eq!(coordinator.state().light, LightMode::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_window_overlay() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, storage());

        coordinator.command_window(WindowEvent::Active).await.unwrap();
        assert!(coordinator.pipeline.gate().is_overlay());

        coordinator
            .command_window(WindowEvent::Inactive)
            .await
            .unwrap();
        assert!(!coordinator.pipeline.gate().is_overlay());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlay_cleared_when_prompt_missing() {
        let device = SimDevice::new();
        let mut coordinator = coordinator(&device, MemoryStorage::new());

        assert!(coordinator.command_window(WindowEvent::Active).await.is_err());
        assert!(coordinator.pipeline.gate().is_overlay());
        assert!(coordinator
            .command_window(WindowEvent::Accepted)
            .await
            .is_err());
        assert!(!coordinator.pipeline.gate().is_overlay());
    }
}
