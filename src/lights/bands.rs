/// Fraction of the gap to the target taken each cycle.
pub const SMOOTHNESS: f32 = 0.1;
/// How fast a held maximum sinks back toward the level.
pub const DROP_RATE: f32 = 0.005;
/// How fast a held minimum rises back toward the level.
pub const RISE_RATE: f32 = 0.003;

/// Smoothing and auto-gain state for one band.
///
/// The level chases its target at a rate that only changes when the new
/// step is larger than the current rate, so it jumps up quickly and eases
/// back down. The running bounds follow the level instantly outward and
/// relax slowly inward.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandTracker {
    level: f32,
    rate: f32,
    max: f32,
    min: f32,
}

impl Default for BandTracker {
    fn default() -> Self {
        Self {
            level: 0.0,
            rate: 0.0,
            max: 0.0,
            min: f32::INFINITY,
        }
    }
}

impl BandTracker {
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.min, self.max)
    }

    /// Feed one cycle's band level and return the normalized value.
    pub fn update(&mut self, target: f32) -> f32 {
        let step = (target - self.level) * SMOOTHNESS;
        if step.abs() > self.rate {
            self.rate = step;
        }
        self.level += self.rate;

        self.max = if self.level >= self.max {
            self.level
        } else {
            self.max - DROP_RATE * (self.max - self.level)
        };
        self.min = if self.level <= self.min {
            self.level
        } else {
            self.min + RISE_RATE * (self.level - self.min)
        };

        self.normalized()
    }

    /// Position of the level between the bounds, 0 when they coincide.
    pub fn normalized(&self) -> f32 {
        if self.max == self.min {
            0.0
        } else {
            (self.level - self.min) / (self.max - self.min)
        }
    }
}
