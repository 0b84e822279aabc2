use std::sync::Arc;

use log::{debug, info};
use tokio::sync::mpsc;

use super::AudioPipeline;

/// PCM frames the sink may buffer before its data callback starts dropping
/// them.
pub const BLUETOOTH_FRAME_QUEUE: usize = 16;

/// Raw PCM frames delivered by the Bluetooth sink's data callback.
pub type FrameSender = mpsc::Sender<Vec<u8>>;

/// Feed every frame the sink delivers into the pipeline, the same way the
/// default track is fed. Ends once the sink drops its sender. Returns the
/// number of frames that made it past the gate.
pub async fn forward_frames(
    pipeline: Arc<AudioPipeline>,
    mut frames: mpsc::Receiver<Vec<u8>>,
) -> usize {
    info!("Bluetooth audio started");
    let mut published = 0;
    while let Some(frame) = frames.recv().await {
        if pipeline.publish(&frame).await {
            published += 1;
        } else {
            debug!("Bluetooth frame dropped, output is gated");
        }
    }
    info!("Bluetooth audio stopped after {} frames", published);
    published
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::OutputGate;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_are_published_until_sender_drops() {
        let pipeline = Arc::new(AudioPipeline::new(1024, Arc::new(OutputGate::new())));
        let (sender, receiver) = mpsc::channel(BLUETOOTH_FRAME_QUEUE);
        let task = tokio::spawn(forward_frames(pipeline.clone(), receiver));

        sender.send(vec![1; 64]).await.unwrap();
        let snapshot = pipeline
            .snapshot()
            .acquire(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(&snapshot[..64], &[1; 64][..]);

        pipeline.gate().set_speaking(true);
        sender.send(vec![2; 64]).await.unwrap();
        drop(sender);

        assert_eq!(task.await.unwrap(), 1);
        assert_eq!(pipeline.ring().len(), 64);
    }
}
