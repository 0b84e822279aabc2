use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{Clip, PeerAddress};
use specbox::{
    audio::{frames, StereoFrame, Volume, CHUNK_BYTES},
    command::COMMAND_QUEUE_DEPTH,
    config::{AudioConfig, Config, Timings},
    lifecycle::{LifecycleController, LifecycleEvent},
    peripherals::sim::{SimAudioOutput, SimDevice},
    state::DeviceMode,
    storage::MemoryStorage,
};
use tokio::sync::{mpsc, Mutex};

const PEER: PeerAddress = PeerAddress([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);
const HEADER: usize = 44;

fn config() -> Config {
    Config {
        timings: Timings {
            command_poll_ms: 20,
            command_window_polls: 10,
            sensor_poll_ms: 20,
            narration_lead_in_ms: 1,
            narration_tail_ms: 50,
            mode_settle_ms: 5,
            writer_receive_ms: 5,
            dispatch_send_timeout_ms: 100,
            frame_ready_wait_ms: 20,
            overlay_frame_ms: 5,
            shutdown_grace_ms: 200,
            queue_drain_poll_ms: 5,
        },
        audio: AudioConfig {
            ring_capacity: 2 * CHUNK_BYTES,
            track_tail_margin: 0,
            ..AudioConfig::default()
        },
        ..Config::default()
    }
}

/// Every clip is a constant tone, distinct per clip.
fn tone(clip: Clip) -> i16 {
    let index = Clip::ALL.iter().position(|c| *c == clip).unwrap();
    (index as i16 + 1) * 1000
}

/// The same tone after the wake volume of 5 out of 25.
fn heard(clip: Clip) -> i16 {
    tone(clip) / 5
}

fn wav(clip: Clip, payload: usize) -> Vec<u8> {
    let frame = StereoFrame {
        left: tone(clip),
        right: tone(clip),
    };
    let mut bytes = vec![0u8; HEADER];
    for _ in 0..payload / 4 {
        bytes.extend_from_slice(&frame.to_le_bytes());
    }
    bytes
}

fn storage() -> MemoryStorage {
    Clip::ALL.iter().fold(MemoryStorage::new(), |storage, &clip| {
        let payload = if clip == Clip::DefaultTrack {
            3 * CHUNK_BYTES
        } else {
            1024
        };
        storage.with(clip, wav(clip, payload))
    })
}

fn device() -> SimDevice {
    SimDevice::with_output(SimAudioOutput {
        capture: true,
        ..SimAudioOutput::realtime()
    })
}

fn first_heard(device: &SimDevice, clip: Clip) -> Option<usize> {
    let output = device.output.lock().unwrap();
    let found = frames(&output.written).position(|frame| frame.left == heard(clip));
    found
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_session_runs_commands_end_to_end() {
    let device = device();
    let (commands, queue) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (mut controller, _events) = LifecycleController::new(
        config(),
        device.peripherals(),
        Arc::new(storage()),
        Arc::new(Mutex::new(queue)),
    );
    let awake = controller.awake();

    controller.handle(LifecycleEvent::Wake { peer: PEER }).await;
    assert!(*awake.borrow());
    assert_eq!(controller.mode(), Some(DeviceMode::Idle));

    // Activate, then default mode
    for byte in [100, 10] {
        commands.send(byte).await.unwrap();
    }
    wait_until("default mode", || {
        controller.mode() == Some(DeviceMode::DefaultPlayback)
    })
    .await;
    wait_until("track audio", || first_heard(&device, Clip::DefaultTrack).is_some()).await;

    // Activate, then lights on
    for byte in [100, 20] {
        commands.send(byte).await.unwrap();
    }
    wait_until("light frames", || device.strip.lock().unwrap().refreshes > 3).await;
    assert!(device.lamps.lock().unwrap().enabled);

    controller.handle(LifecycleEvent::Sleep).await;
    assert!(!*awake.borrow());
    assert_eq!(controller.mode(), None);
    assert!(!device.strip.lock().unwrap().active);

    let order: Vec<usize> = [
        Clip::Wake,
        Clip::CommandActive,
        Clip::CommandAccepted,
        Clip::SwitchDefault,
        Clip::Sleep,
    ]
    .iter()
    .map(|&clip| first_heard(&device, clip).unwrap_or_else(|| panic!("{:?} never heard", clip)))
    .collect();
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", order);
    assert!(first_heard(&device, Clip::CommandInactive).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bluetooth_audio_is_heard_at_bluetooth_volume() {
    let device = device();
    let (commands, queue) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (mut controller, _events) = LifecycleController::new(
        config(),
        device.peripherals(),
        Arc::new(storage()),
        Arc::new(Mutex::new(queue)),
    );

    controller.handle(LifecycleEvent::Wake { peer: PEER }).await;
    for byte in [100, 15] {
        commands.send(byte).await.unwrap();
    }
    wait_until("bluetooth mode", || {
        controller.mode() == Some(DeviceMode::BluetoothSink)
    })
    .await;

    let streamed = StereoFrame {
        left: 12_345,
        right: -12_345,
    };
    let frame: Vec<u8> = (0..256).flat_map(|_| streamed.to_le_bytes()).collect();
    let expected = streamed.scaled(Volume::new(5).gain());
    wait_until("bluetooth audio", || {
        device.bluetooth.lock().unwrap().feed(frame.clone());
        let output = device.output.lock().unwrap();
        let found = frames(&output.written).any(|written| written == expected);
        found
    })
    .await;

    controller.handle(LifecycleEvent::Sleep).await;
    assert!(!device.bluetooth.lock().unwrap().feed(frame));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_commands_do_not_carry_over_between_sessions() {
    let device = device();
    let (commands, queue) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (mut controller, _events) = LifecycleController::new(
        config(),
        device.peripherals(),
        Arc::new(storage()),
        Arc::new(Mutex::new(queue)),
    );

    // Sent just before the link dropped
    controller.handle(LifecycleEvent::Wake { peer: PEER }).await;
    for byte in [100, 10] {
        commands.send(byte).await.unwrap();
    }
    controller.handle(LifecycleEvent::Sleep).await;

    // Sent while nobody was awake
    for byte in [100, 10] {
        commands.send(byte).await.unwrap();
    }
    controller.handle(LifecycleEvent::Sleep).await;

    controller.handle(LifecycleEvent::Wake { peer: PEER }).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(controller.mode(), Some(DeviceMode::Idle));

    controller.handle(LifecycleEvent::Sleep).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_critical_battery_forces_sleep_without_goodbye() {
    let device = device();
    device.sensor.lock().unwrap().battery = 500;

    let (_commands, queue) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (controller, events) = LifecycleController::new(
        config(),
        device.peripherals(),
        Arc::new(storage()),
        Arc::new(Mutex::new(queue)),
    );
    let awake = controller.awake();
    let run = tokio::spawn(controller.run());

    events.send(LifecycleEvent::Wake { peer: PEER }).await.unwrap();
    wait_until("forced sleep", || {
        first_heard(&device, Clip::CriticalBattery).is_some() && !*awake.borrow()
    })
    .await;

    assert!(first_heard(&device, Clip::Wake).is_some());
    assert!(first_heard(&device, Clip::Sleep).is_none());

    // The controller stops once nobody can wake it any more
    drop(events);
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wake_and_sleep_are_idempotent() {
    let device = device();
    let (_commands, queue) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (mut controller, _events) = LifecycleController::new(
        config(),
        device.peripherals(),
        Arc::new(storage()),
        Arc::new(Mutex::new(queue)),
    );

    controller.handle(LifecycleEvent::Sleep).await;
    assert_eq!(controller.mode(), None);

    controller.handle(LifecycleEvent::Wake { peer: PEER }).await;
    controller.handle(LifecycleEvent::Wake { peer: PEER }).await;
    assert_eq!(controller.mode(), Some(DeviceMode::Idle));

    controller.handle(LifecycleEvent::Sleep).await;
    controller.handle(LifecycleEvent::Sleep).await;
    assert_eq!(controller.mode(), None);

    // One wake prompt and one goodbye, no matter how often each was asked for
    let output = device.output.lock().unwrap();
    let wake_frames = frames(&output.written)
        .filter(|frame| frame.left == heard(Clip::Wake))
        .count();
    assert_eq!(wake_frames, 256);
}
