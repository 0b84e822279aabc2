use common::Clip;
use thiserror::Error;

/// Failures inside the control core. Each task handles these at its own
/// boundary; none of them crosses into another task.
#[derive(Debug, Error)]
pub enum SpecBoxError {
    #[error("work queue is full")]
    QueueFull,

    #[error("channel closed")]
    ChannelClosed,

    #[error("{device} failed: {reason}")]
    Peripheral {
        device: &'static str,
        reason: String,
    },

    #[error("cannot open clip {}: {source}", clip.file_name())]
    MissingMedia {
        clip: Clip,
        #[source]
        source: std::io::Error,
    },

    #[error("clip {} has no playable audio", clip.file_name())]
    EmptyMedia { clip: Clip },

    #[error("spectrum transform failed: {0}")]
    Transform(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SpecBoxError {
    pub fn peripheral(device: &'static str, reason: impl ToString) -> Self {
        SpecBoxError::Peripheral {
            device,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpecBoxError>;
