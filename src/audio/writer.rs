use std::{sync::Arc, time::Duration};

use log::{error, info};
use tokio::{runtime::Handle, task::JoinHandle};

use super::{apply_volume, AudioPipeline, Volume, CHUNK_BYTES};
use crate::{
    peripherals::{lock, AudioOutput, Shared},
    signal::{Control, Notification},
};

/// Drains the ring, applies the live volume and feeds the audio output.
pub struct OutputWriter {
    pipeline: Arc<AudioPipeline>,
    output: Shared<dyn AudioOutput>,
    volume: Arc<Notification<Volume>>,
    control: Arc<Notification<Control>>,
    receive_wait: Duration,
    level: Volume,
}

impl OutputWriter {
    pub fn new(
        pipeline: Arc<AudioPipeline>,
        output: Shared<dyn AudioOutput>,
        volume: Arc<Notification<Volume>>,
        control: Arc<Notification<Control>>,
        receive_wait: Duration,
    ) -> Self {
        Self {
            pipeline,
            output,
            volume,
            control,
            receive_wait,
            level: Volume::MUTE,
        }
    }

    /// The peripheral write blocks, so the writer lives on the blocking
    /// pool rather than on a runtime worker.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || self.run(Handle::current()))
    }

    pub fn run(mut self, runtime: Handle) {
        info!("Output writer started");
        loop {
            if self.control.try_take() == Some(Control::Abort) {
                break;
            }

            let ring = self.pipeline.ring();
            let chunk = runtime.block_on(ring.receive(CHUNK_BYTES, self.receive_wait));

            // Never wait on a volume change, just pick up the latest one
            if let Some(level) = self.volume.try_take() {
                self.level = level;
            }

            let Some(chunk) = chunk else { continue };
            let mut samples = chunk.to_vec();
            apply_volume(&mut samples, self.level);
            if let Err(e) = lock(&self.output).write(&samples) {
                error!("Audio output write failed: {}", e);
            }
            // chunk drops here, releasing its ring space after the write
        }
        info!("Output writer stopped");
    }
}
