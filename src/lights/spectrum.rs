use log::trace;
use microfft::real::rfft_1024;

use crate::{
    audio::{frames, BYTES_PER_FRAME},
    error::{Result, SpecBoxError},
};

/// Points in one transform; one snapshot chunk holds exactly this many
/// stereo frames.
pub const FFT_POINTS: usize = 1024;
pub const SPECTRUM_BINS: usize = FFT_POINTS / 2;

/// Bin boundaries, roughly log spaced over the 512 bins.
pub const BIN_EDGES: [u16; 87] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 18, 19, 20, 22, 23, 25, 26, 28, 30,
    31, 33, 35, 37, 39, 42, 44, 46, 49, 51, 54, 57, 60, 63, 66, 69, 73, 76, 80, 84, 88, 92, 96,
    101, 105, 110, 115, 121, 126, 132, 138, 144, 151, 157, 164, 172, 179, 187, 195, 204, 213, 222,
    232, 242, 252, 263, 275, 286, 299, 311, 325, 339, 353, 368, 384, 400, 417, 435, 453, 472, 511,
];

/// First and last edge index of each band. Neighbouring bands share edges,
/// which is where their windows overlap.
pub const BAND_WINDOWS: [(usize, usize); 9] = [
    (0, 5),
    (4, 10),
    (9, 16),
    (15, 24),
    (23, 34),
    (33, 45),
    (44, 57),
    (56, 71),
    (70, 86),
];

/// Maps a magnitude spectrum onto a handful of bands.
#[derive(Clone, Debug, PartialEq)]
pub struct BandTable {
    edges: Vec<u16>,
    windows: Vec<(usize, usize)>,
}

impl Default for BandTable {
    fn default() -> Self {
        Self {
            edges: BIN_EDGES.to_vec(),
            windows: BAND_WINDOWS.to_vec(),
        }
    }
}

impl BandTable {
    /// Edges must be strictly increasing and every window must span at
    /// least three of them.
    pub fn new(edges: Vec<u16>, windows: Vec<(usize, usize)>) -> Result<Self> {
        if edges.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(SpecBoxError::Transform(
                "band edges are not increasing".to_string(),
            ));
        }
        if let Some(&(start, end)) = windows
            .iter()
            .find(|(start, end)| end < start || end - start < 2 || *end >= edges.len())
        {
            return Err(SpecBoxError::Transform(format!(
                "band window {start}..={end} does not fit {} edges",
                edges.len()
            )));
        }
        Ok(Self { edges, windows })
    }

    pub fn bands(&self) -> usize {
        self.windows.len()
    }

    pub fn band_edges(&self, band: usize) -> &[u16] {
        let (start, end) = self.windows[band];
        &self.edges[start..=end]
    }

    /// Level of every band. Each pair of adjacent sub-ranges in a band is
    /// summed with weights falling off linearly across each sub-range, and
    /// the band takes the loudest pair.
    pub fn levels(&self, spectrum: &[f32]) -> Vec<f32> {
        let bin = |k: usize| spectrum.get(k).copied().unwrap_or(0.0);
        let ramp = |from: u16, to: u16| -> f32 {
            let width = f32::from(to - from);
            (from..to)
                .map(|k| bin(usize::from(k)) * f32::from(to - k) / width)
                .sum()
        };

        (0..self.bands())
            .map(|band| {
                self.band_edges(band)
                    .windows(3)
                    .map(|edge| ramp(edge[0], edge[1]) + ramp(edge[1], edge[2]))
                    .fold(0.0, f32::max)
            })
            .collect()
    }
}

/// Downmixes a stereo chunk, transforms it and reduces it to band levels.
pub struct SpectrumAnalyzer {
    table: BandTable,
    samples: Box<[f32; FFT_POINTS]>,
}

impl SpectrumAnalyzer {
    pub fn new(table: BandTable) -> Self {
        Self {
            table,
            samples: Box::new([0.0; FFT_POINTS]),
        }
    }

    pub fn table(&self) -> &BandTable {
        &self.table
    }

    /// `|re| + |im|` of each bin of the chunk's mono downmix.
    pub fn spectrum(&mut self, chunk: &[u8]) -> Result<Vec<f32>> {
        if chunk.len() < FFT_POINTS * BYTES_PER_FRAME {
            return Err(SpecBoxError::Transform(format!(
                "need {} bytes, got {}",
                FFT_POINTS * BYTES_PER_FRAME,
                chunk.len()
            )));
        }

        for (slot, frame) in self.samples.iter_mut().zip(frames(chunk)) {
            *slot = frame.mono();
        }
        let bins = rfft_1024(&mut self.samples);
        // The transform packs the Nyquist term into bin 0's imaginary part
        bins[0].im = 0.0;

        let magnitudes: Vec<f32> = bins.iter().map(|c| c.re.abs() + c.im.abs()).collect();
        if magnitudes.iter().any(|m| !m.is_finite()) {
            return Err(SpecBoxError::Transform("non-finite magnitude".to_string()));
        }
        trace!("spectrum peak {:?}", magnitudes.iter().cloned().fold(0.0, f32::max));
        Ok(magnitudes)
    }

    pub fn analyze(&mut self, chunk: &[u8]) -> Result<Vec<f32>> {
        let spectrum = self.spectrum(chunk)?;
        Ok(self.table.levels(&spectrum))
    }
}
