use std::{sync::Arc, time::Duration};

use common::Clip;
use log::{error, info};

use super::{AudioPipeline, BYTES_PER_FRAME, CHUNK_BYTES, SAMPLE_RATE};
use crate::{
    error::{Result, SpecBoxError},
    peripherals::{lock, AudioOutput, Shared},
    signal::{Control, Notification},
    storage::{ClipStorage, ClipStream},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    WaitingToStart,
    Playing,
    Paused,
}

/// Loops the default track into the audio pipeline, driven by Start, Stop
/// and Abort posted from the coordinator.
pub struct Playback {
    pipeline: Arc<AudioPipeline>,
    output: Shared<dyn AudioOutput>,
    storage: Arc<dyn ClipStorage>,
    control: Arc<Notification<Control>>,
    header_len: u64,
    tail_margin: u64,
    state: PlaybackState,
}

/// How long the output takes to play `bytes`.
pub fn chunk_period(bytes: usize) -> Duration {
    let frames = (bytes / BYTES_PER_FRAME) as u64;
    Duration::from_micros(frames * 1_000_000 / u64::from(SAMPLE_RATE))
}

impl Playback {
    pub fn new(
        pipeline: Arc<AudioPipeline>,
        output: Shared<dyn AudioOutput>,
        storage: Arc<dyn ClipStorage>,
        control: Arc<Notification<Control>>,
        header_len: u64,
        tail_margin: u64,
    ) -> Self {
        Self {
            pipeline,
            output,
            storage,
            control,
            header_len,
            tail_margin,
            state: PlaybackState::WaitingToStart,
        }
    }

    /// Play until aborted. A track that cannot be opened or read ends the
    /// task with an error logged.
    pub async fn run(mut self) {
        info!("Default playback started");
        match self.play().await {
            Ok(()) => info!("Default playback stopped"),
            Err(e) => error!("Default playback gave up: {}", e),
        }
    }

    async fn play(&mut self) -> Result<()> {
        let mut track = ClipStream::open(
            self.storage.as_ref(),
            Clip::DefaultTrack,
            self.header_len,
            self.tail_margin,
        )?;
        if track.payload_len() <= CHUNK_BYTES as u64 {
            return Err(SpecBoxError::EmptyMedia {
                clip: Clip::DefaultTrack,
            });
        }

        if self.control.wait_for_start().await == Control::Abort {
            return Ok(());
        }
        self.enter(PlaybackState::Playing);
        self.sync_clock();

        let mut buffer = vec![0u8; CHUNK_BYTES];
        loop {
            track.rewind()?;
            if let Err(e) = lock(&self.output).zero_buffer() {
                error!("Could not clear audio output: {}", e);
            }

            while track.remaining() > CHUNK_BYTES as u64 {
                match self.control.try_take() {
                    Some(Control::Abort) => return Ok(()),
                    Some(Control::Stop) => {
                        self.enter(PlaybackState::Paused);
                        if self.control.wait_for_start().await == Control::Abort {
                            return Ok(());
                        }
                        self.enter(PlaybackState::Playing);
                        self.sync_clock();
                    }
                    Some(Control::Start) | None => {}
                }

                // Narration owns the output until it is done
                self.pipeline.gate().wait_until_quiet().await;

                let read = track.read_chunk(&mut buffer)?;
                if !self.pipeline.publish(&buffer[..read]).await {
                    // Dropped by the overlay gate; keep the track moving in real time
                    tokio::time::sleep(chunk_period(read)).await;
                }
            }
        }
    }

    fn enter(&mut self, state: PlaybackState) {
        if self.state != state {
            info!("Default playback {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Narration may have left the clock at another rate.
    fn sync_clock(&self) {
        let mut output = lock(&self.output);
        if output.clock_rate() != SAMPLE_RATE {
            if let Err(e) = output.set_clock_rate(SAMPLE_RATE) {
                error!("Could not restore sample clock: {}", e);
            }
        }
    }
}
