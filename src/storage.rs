use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, Cursor, ErrorKind, Read, Seek, SeekFrom},
    path::PathBuf,
    sync::Arc,
};

use common::Clip;
use log::debug;

use crate::error::{Result, SpecBoxError};

pub trait ClipReader: Read + Seek + Send {}

impl<T: Read + Seek + Send> ClipReader for T {}

/// Where the track and the voice prompts live (an SD card on the device).
pub trait ClipStorage: Send + Sync {
    fn open(&self, clip: Clip) -> Result<Box<dyn ClipReader>>;
}

/// Clips stored as `<root>/<file name>`.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ClipStorage for FsStorage {
    fn open(&self, clip: Clip) -> Result<Box<dyn ClipReader>> {
        let path = self.root.join(clip.file_name());
        debug!("Opening {}", path.display());
        let file = File::open(&path).map_err(|source| SpecBoxError::MissingMedia { clip, source })?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Clips held in memory, used when there is no card to read from.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    clips: HashMap<Clip, Arc<Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, clip: Clip, bytes: Vec<u8>) {
        self.clips.insert(clip, Arc::new(bytes));
    }

    pub fn with(mut self, clip: Clip, bytes: Vec<u8>) -> Self {
        self.insert(clip, bytes);
        self
    }
}

/// Shares the clip bytes between every reader opened on it.
struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl ClipStorage for MemoryStorage {
    fn open(&self, clip: Clip) -> Result<Box<dyn ClipReader>> {
        let bytes = self.clips.get(&clip).ok_or_else(|| SpecBoxError::MissingMedia {
            clip,
            source: ErrorKind::NotFound.into(),
        })?;
        Ok(Box::new(Cursor::new(SharedBytes(bytes.clone()))))
    }
}

/// A clip opened for streaming: the WAV header is skipped and, for the
/// looping track, a margin before the end is left unplayed.
pub struct ClipStream {
    reader: Box<dyn ClipReader>,
    start: u64,
    end: u64,
    position: u64,
}

impl ClipStream {
    pub fn open(
        storage: &dyn ClipStorage,
        clip: Clip,
        header_len: u64,
        tail_margin: u64,
    ) -> Result<Self> {
        let mut reader = storage.open(clip)?;
        let len = reader.seek(SeekFrom::End(0))?;
        let end = len.saturating_sub(tail_margin);
        if end <= header_len {
            return Err(SpecBoxError::EmptyMedia { clip });
        }
        reader.seek(SeekFrom::Start(header_len))?;
        Ok(Self {
            reader,
            start: header_len,
            end,
            position: header_len,
        })
    }

    /// Bytes of payload left before the end.
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }

    /// Payload length from header to end.
    pub fn payload_len(&self) -> u64 {
        self.end - self.start
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(self.start))?;
        self.position = self.start;
        Ok(())
    }

    /// Fill up to `buf.len()` bytes, stopping at the end. Returns how many
    /// bytes were read; zero means the end was reached.
    pub fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize> {
        let want = buf.len().min(self.remaining() as usize);
        let mut filled = 0;
        while filled < want {
            match self.reader.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }
}
