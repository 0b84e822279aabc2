//! Spectrum-reactive strip and lamp animation.
//!
//! Each band of the latest audio frame drives two mirrored pixels, and the
//! two lamp channels follow the average of the lower and upper halves of
//! the bands. While the command window is open everything shows the high
//! anchor colour at full brightness instead.

use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use rgb::RGB8;

use crate::{
    audio::AudioPipeline,
    error::Result,
    peripherals::{lock, LampChannel, Lamps, LedStrip, Shared},
    signal::{Control, Notification},
};

pub mod bands;
pub mod palette;
pub mod spectrum;

use bands::BandTracker;
use palette::Palette;
use spectrum::{BandTable, SpectrumAnalyzer};

/// Lamp level with every band silent.
pub const LAMP_FLOOR: u8 = 35;
/// Lamp swing above the floor.
pub const LAMP_SPAN: f32 = 220.0;

/// One rendered frame for the strip and both lamps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LightFrame {
    pub pixels: Vec<RGB8>,
    pub left_lamp: u8,
    pub right_lamp: u8,
}

/// Pure renderer: band levels in, a frame out.
pub struct LightEngine {
    analyzer: SpectrumAnalyzer,
    trackers: Vec<BandTracker>,
    palette: Palette,
}

impl LightEngine {
    pub fn new(table: BandTable) -> Self {
        let bands = table.bands();
        Self {
            analyzer: SpectrumAnalyzer::new(table),
            trackers: vec![BandTracker::default(); bands],
            palette: Palette::default(),
        }
    }

    pub fn bands(&self) -> usize {
        self.trackers.len()
    }

    /// Two pixels per band, the second half mirroring the first.
    pub fn pixel_count(&self) -> usize {
        self.bands() * 2
    }

    /// Bands feeding the left lamp; the rest feed the right one.
    fn left_bands(&self) -> usize {
        (self.bands() + 1) / 2
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn trackers(&self) -> &[BandTracker] {
        &self.trackers
    }

    pub fn overlay_frame(&self) -> LightFrame {
        LightFrame {
            pixels: vec![self.palette.high(); self.pixel_count()],
            left_lamp: u8::MAX,
            right_lamp: u8::MAX,
        }
    }

    /// Render from the latest snapshot. A missing snapshot, or one the
    /// transform cannot handle, counts as silence.
    pub fn render(&mut self, snapshot: Option<&[u8]>) -> LightFrame {
        let levels = match snapshot.map(|chunk| self.analyzer.analyze(chunk)) {
            Some(Ok(levels)) => levels,
            Some(Err(e)) => {
                warn!("Treating frame as silence: {}", e);
                vec![0.0; self.bands()]
            }
            None => vec![0.0; self.bands()],
        };
        self.render_levels(&levels)
    }

    pub fn render_levels(&mut self, levels: &[f32]) -> LightFrame {
        let values: Vec<f32> = self
            .trackers
            .iter_mut()
            .enumerate()
            .map(|(band, tracker)| tracker.update(levels.get(band).copied().unwrap_or(0.0)))
            .collect();

        let half: Vec<RGB8> = values
            .iter()
            .map(|&value| self.palette.color_for(value))
            .collect();
        let mut pixels = half.clone();
        pixels.extend(half);

        let (left, right) = values.split_at(self.left_bands());
        LightFrame {
            pixels,
            left_lamp: lamp_level(left),
            right_lamp: lamp_level(right),
        }
    }

    /// Count one cycle for the hue walk.
    pub fn advance_palette(&mut self) {
        self.palette.tick();
    }
}

fn lamp_level(values: &[f32]) -> u8 {
    if values.is_empty() {
        return LAMP_FLOOR;
    }
    let average = values.iter().sum::<f32>() / values.len() as f32;
    (f32::from(LAMP_FLOOR) + (average * LAMP_SPAN).floor()).clamp(0.0, 255.0) as u8
}

/// The light task: owns the strip and lamps while it runs.
pub struct LightController {
    engine: LightEngine,
    pipeline: Arc<AudioPipeline>,
    strip: Shared<dyn LedStrip>,
    lamps: Shared<dyn Lamps>,
    control: Arc<Notification<Control>>,
    frame_wait: Duration,
    overlay_interval: Duration,
}

impl LightController {
    pub fn new(
        pipeline: Arc<AudioPipeline>,
        strip: Shared<dyn LedStrip>,
        lamps: Shared<dyn Lamps>,
        control: Arc<Notification<Control>>,
        frame_wait: Duration,
        overlay_interval: Duration,
    ) -> Self {
        Self {
            engine: LightEngine::new(BandTable::default()),
            pipeline,
            strip,
            lamps,
            control,
            frame_wait,
            overlay_interval,
        }
    }

    pub async fn run(mut self) {
        info!("Light engine started");
        if let Err(e) = self.init() {
            error!("Lights disabled: {}", e);
            return;
        }

        if self.control.wait_for_start().await == Control::Abort {
            self.teardown();
            return;
        }

        loop {
            if self.pipeline.gate().is_overlay() {
                let frame = self.engine.overlay_frame();
                self.show(&frame);
                tokio::time::sleep(self.overlay_interval).await;
            } else {
                let snapshot = self.pipeline.snapshot().acquire(self.frame_wait).await;
                let frame = self.engine.render(snapshot.as_deref());
                self.show(&frame);
            }
            self.engine.advance_palette();

            match self.control.try_take() {
                Some(Control::Abort) => break,
                Some(Control::Stop) => {
                    debug!("Lights stopped");
                    self.blank();
                    if self.control.wait_for_start().await == Control::Abort {
                        break;
                    }
                    debug!("Lights resumed");
                }
                Some(Control::Start) | None => {}
            }
        }

        self.teardown();
    }

    fn init(&self) -> Result<()> {
        lock(&self.strip).init(self.engine.pixel_count())?;
        lock(&self.lamps).enable()?;
        lock(&self.strip).clear()
    }

    fn show(&self, frame: &LightFrame) {
        let strip_result = {
            let mut strip = lock(&self.strip);
            frame
                .pixels
                .iter()
                .enumerate()
                .try_for_each(|(index, color)| strip.set_pixel(index, *color))
                .and_then(|()| strip.refresh())
        };
        if let Err(e) = strip_result {
            warn!("Strip update failed: {}", e);
        }
        self.set_lamps(frame.left_lamp, frame.right_lamp);
    }

    fn set_lamps(&self, left: u8, right: u8) {
        let mut lamps = lock(&self.lamps);
        let result = lamps
            .set_level(LampChannel::Left, left)
            .and_then(|()| lamps.set_level(LampChannel::Right, right));
        if let Err(e) = result {
            warn!("Lamp update failed: {}", e);
        }
    }

    fn blank(&self) {
        if let Err(e) = lock(&self.strip).clear() {
            warn!("Strip clear failed: {}", e);
        }
        self.set_lamps(0, 0);
    }

    fn teardown(&self) {
        self.blank();
        if let Err(e) = lock(&self.strip).deinit() {
            warn!("Strip release failed: {}", e);
        }
        info!("Light engine stopped");
    }
}
