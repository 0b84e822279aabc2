use rgb::RGB8;

/// Normalized level where the colour starts blending toward the high anchor.
pub const THRESHOLD: f32 = 0.7;

/// Render cycles between two hue steps, minus one.
const STEP_WAIT: u8 = 10;

/// Colour for a normalized band value. Below the threshold the low anchor
/// is dimmed by the value; from the threshold up it blends from the dimmed
/// low anchor to the high one, so both branches meet at the threshold.
pub fn map_color(low: RGB8, high: RGB8, value: f32) -> RGB8 {
    let value = value.clamp(0.0, 1.0);
    let channel = |low: u8, high: u8| -> u8 {
        let low = f32::from(low);
        let mixed = if value < THRESHOLD {
            low * value
        } else {
            let t = (value - THRESHOLD) / (1.0 - THRESHOLD);
            low * THRESHOLD * (1.0 - t) + f32::from(high) * t
        };
        mixed.floor().clamp(0.0, 255.0) as u8
    };
    RGB8::new(
        channel(low.r, high.r),
        channel(low.g, high.g),
        channel(low.b, high.b),
    )
}

/// Slow walk around the colour wheel: one channel ramps by one step at a
/// time, and every time it hits 0 or 255 the direction flips and the walk
/// moves on to another channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HueWalk {
    color: [u8; 3],
    channel: usize,
    rising: bool,
}

impl HueWalk {
    pub fn new(color: RGB8, channel: usize, rising: bool) -> Self {
        Self {
            color: [color.r, color.g, color.b],
            channel: channel % 3,
            rising,
        }
    }

    pub fn color(&self) -> RGB8 {
        RGB8::new(self.color[0], self.color[1], self.color[2])
    }

    pub fn step(&mut self) {
        let value = &mut self.color[self.channel];
        *value = if self.rising {
            value.wrapping_add(1)
        } else {
            value.wrapping_sub(1)
        };
        if *value == u8::MAX || *value == 0 {
            self.rising = !self.rising;
            self.channel = (self.channel + 2) % 3;
        }
    }
}

/// The low and high anchors, stepped together every eleventh cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Palette {
    low: HueWalk,
    high: HueWalk,
    wait: u8,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            low: HueWalk::new(RGB8::new(255, 0, 0), 1, true),
            high: HueWalk::new(RGB8::new(255, 128, 0), 1, true),
            wait: 0,
        }
    }
}

impl Palette {
    pub fn low(&self) -> RGB8 {
        self.low.color()
    }

    pub fn high(&self) -> RGB8 {
        self.high.color()
    }

    pub fn color_for(&self, value: f32) -> RGB8 {
        map_color(self.low(), self.high(), value)
    }

    /// Count one render cycle.
    pub fn tick(&mut self) {
        if self.wait < STEP_WAIT {
            self.wait += 1;
        } else {
            self.wait = 0;
            self.high.step();
            self.low.step();
        }
    }
}
