//! PCM handling shared by every audio producer and the output writer.
//!
//! Audio travels as interleaved 16-bit little-endian stereo at 44.1 kHz,
//! four bytes per frame (left then right).

pub mod bluetooth;
pub mod pipeline;
pub mod playback;
pub mod ring;
pub mod writer;

pub use pipeline::AudioPipeline;
pub use ring::{RingChannel, RingChunk};

pub const SAMPLE_RATE: u32 = 44_100;
pub const BITS_PER_SAMPLE: u8 = 16;
pub const CHANNELS: u8 = 2;
pub const BYTES_PER_FRAME: usize = 4;

/// One playback chunk, also the size of the spectrum snapshot.
pub const CHUNK_BYTES: usize = 4096;

/// The volume scale the controller speaks in.
pub const VOLUME_STEPS: u8 = 25;

/// One stereo sample pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StereoFrame {
    pub left: i16,
    pub right: i16,
}

impl StereoFrame {
    pub fn from_le_bytes(bytes: [u8; BYTES_PER_FRAME]) -> Self {
        Self {
            left: i16::from_le_bytes([bytes[0], bytes[1]]),
            right: i16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    pub fn to_le_bytes(self) -> [u8; BYTES_PER_FRAME] {
        let [l0, l1] = self.left.to_le_bytes();
        let [r0, r1] = self.right.to_le_bytes();
        [l0, l1, r0, r1]
    }

    /// Average of both channels.
    pub fn mono(self) -> f32 {
        (i32::from(self.left) + i32::from(self.right)) as f32 / 2.0
    }

    pub fn scaled(self, gain: f32) -> Self {
        Self {
            left: scale_sample(self.left, gain),
            right: scale_sample(self.right, gain),
        }
    }
}

/// Iterate the whole frames in a byte buffer. Trailing bytes that do not
/// make a full frame are ignored.
pub fn frames(bytes: &[u8]) -> impl Iterator<Item = StereoFrame> + '_ {
    bytes.chunks_exact(BYTES_PER_FRAME).map(|chunk| {
        StereoFrame::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
    })
}

fn scale_sample(sample: i16, gain: f32) -> i16 {
    // float to int casts saturate and truncate toward zero
    (f32::from(sample) * gain) as i16
}

/// Output level on the 0..=25 scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Volume(u8);

impl Volume {
    pub const MUTE: Volume = Volume(0);
    pub const FULL: Volume = Volume(VOLUME_STEPS);

    /// Levels above the scale are clamped to full.
    pub fn new(level: u8) -> Self {
        Volume(level.min(VOLUME_STEPS))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn gain(self) -> f32 {
        f32::from(self.0) / f32::from(VOLUME_STEPS)
    }
}

/// Scale every frame by `gain`.
pub fn scale_frames(frames: &[StereoFrame], gain: f32) -> Vec<StereoFrame> {
    frames.iter().map(|frame| frame.scaled(gain)).collect()
}

/// Apply `volume` in place to a little-endian stereo byte buffer. A partial
/// frame at the end is left untouched.
pub fn apply_volume(bytes: &mut [u8], volume: Volume) {
    let gain = volume.gain();
    for chunk in bytes.chunks_exact_mut(BYTES_PER_FRAME) {
        let frame = StereoFrame::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&frame.scaled(gain).to_le_bytes());
    }
}
