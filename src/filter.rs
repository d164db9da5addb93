//! Complementary filters turning raw samples into pitch (and roll) angles.
//!
//! Two interchangeable strategies sit behind [`AngleEstimator`]: an
//! integer-only filter sized for targets without hardware floats, and a
//! trigonometric filter using `atan2`. Both keep their derived constants
//! bundled with the angle state, and those constants can only be computed
//! from an [`MpuConfig`], so they cannot silently go stale when the device
//! configuration changes.

use defmt::Format;
use libm::{atan2f, sqrtf};
use nalgebra::Vector2;

use crate::mpu6050::{ConfigField, MpuConfig, RawSample};
use crate::reg_data::mpu6050::{ACCEL_RANGE_G, GYRO_RANGE_DPS, GYRO_SENS};

/// PI, f32
pub const PI: f32 = core::f32::consts::PI;

/// PI / 180, for conversion to radians
pub const PI_180: f32 = PI / 180.0;

/// Fixed-point angle unit: one radian of tilt spans `ANGLE_SCALE_FACTOR`
/// times the reduced gravity count.
pub const ANGLE_SCALE_FACTOR: i32 = 256;

/// One angle estimate update per raw sample.
pub trait AngleEstimator {
    /// Fold one sample into the estimate and return the new pitch in
    /// radians. The state is mutated exactly once per call.
    fn update(&mut self, sample: &RawSample) -> f32;

    /// Current pitch estimate in radians.
    fn pitch(&self) -> f32;
}

/// Derived constants for the fixed-point strategy, computed once per
/// configuration the way the original AVR target wants them: integers only,
/// blend weights expressed out of 512.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
struct FixedGains {
    /// Gravity in reduced (top 8 bit) accelerometer counts.
    g: i32,
    g2: i32,
    /// Squared-magnitude gate: above this the accelerometer is distrusted.
    g_thresh: i32,
    /// Raw gyro counts per angle unit per sample.
    gyro_divider: i32,
    alpha: i32,
    alpha_complement: i32,
}

impl FixedGains {
    fn derive(config: &MpuConfig, alpha: i32) -> Self {
        let g = (i16::MAX as i32 / ACCEL_RANGE_G[config.accel_range as usize] as i32) >> 8;
        let g2 = g * g;
        let g_thresh = g * g * 3 / 2;

        // 314 approximates 100 pi, folding the radian conversion into the
        // integer divider. 18e6 / 256 matches the angle scale factor. The
        // product runs in i64: at the divider and range maxima it reaches
        // about 1e10, past what i32 holds.
        let c = (1 + config.sample_rate_divider as i64)
            * g as i64
            * 314
            * GYRO_RANGE_DPS[config.gyro_range as usize] as i64
            / i16::MAX as i64;
        let d = (18_000_000 / ANGLE_SCALE_FACTOR) as i64;

        FixedGains {
            g,
            g2,
            g_thresh,
            // Very coarse rate/range combinations push the divider below one
            // count per angle unit; it clamps to 1 so the per-sample division
            // stays defined.
            gyro_divider: (d / c).max(1) as i32,
            alpha,
            alpha_complement: 512 - alpha,
        }
    }
}

/// Integer-only complementary filter for the pitch angle.
///
/// Accelerometer channels are reduced to their 8 most significant bits; the
/// readings carry no more than 8 bits of real information, and the reduced
/// width keeps every product in single-instruction multiply range on small
/// targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub struct FixedPointFilter {
    pitch: i16,
    gains: FixedGains,
}

/// Default accelerometer weight, out of 512.
pub const DEFAULT_ALPHA: i32 = 16;

impl FixedPointFilter {
    pub fn new(config: &MpuConfig) -> Result<Self, ConfigField> {
        Self::with_alpha(config, DEFAULT_ALPHA)
    }

    /// `alpha` is the accelerometer weight out of 512. Rejects a config with
    /// an out-of-range field, same as the device layer.
    pub fn with_alpha(config: &MpuConfig, alpha: i32) -> Result<Self, ConfigField> {
        config.validate()?;
        Ok(FixedPointFilter {
            pitch: 0,
            gains: FixedGains::derive(config, alpha),
        })
    }

    /// Recompute the derived constants for a changed configuration while
    /// keeping the current angle. Mandatory after every reconfiguration of
    /// the device. An invalid config is rejected and the gains stay as they
    /// were.
    pub fn reconfigure(&mut self, config: &MpuConfig) -> Result<(), ConfigField> {
        config.validate()?;
        self.gains = FixedGains::derive(config, self.gains.alpha);
        Ok(())
    }

    /// Pitch in the filter's own fixed-point angle units.
    pub fn pitch_raw(&self) -> i16 {
        self.pitch
    }

    pub fn update_pitch(&mut self, sample: &RawSample) -> i16 {
        let ax = (sample.accel_x >> 8) as i32;
        let ay = (sample.accel_y >> 8) as i32;
        let az = (sample.accel_z >> 8) as i32;
        let gy = sample.gyro_y as i32;

        let a2 = ax * ax + ay * ay + az * az;

        let gyro_term = self.pitch as i32 + gy / self.gains.gyro_divider;
        if a2 < self.gains.g_thresh {
            let acc_term = ANGLE_SCALE_FACTOR * ax;
            self.pitch = ((self.gains.alpha_complement * gyro_term
                - self.gains.alpha * acc_term)
                / 512) as i16;
        } else {
            // Under non-gravity acceleration the tilt estimate is garbage;
            // advance by gyro integration alone.
            self.pitch = gyro_term as i16;
        }
        self.pitch
    }
}

impl AngleEstimator for FixedPointFilter {
    fn update(&mut self, sample: &RawSample) -> f32 {
        self.update_pitch(sample);
        self.pitch()
    }

    fn pitch(&self) -> f32 {
        self.pitch as f32 / (ANGLE_SCALE_FACTOR * self.gains.g) as f32
    }
}

/// Derived constants for the trigonometric strategy.
#[derive(Debug, Clone, Copy, PartialEq, Format)]
struct TrigGains {
    /// Radians per raw gyro count per sample.
    gyro_factor: f32,
    /// Accelerometer weight in [0, 1].
    weight: f32,
}

impl TrigGains {
    fn derive(config: &MpuConfig, weight: f32) -> Self {
        // With the lowpass filter active the gyro output rate is 1 kHz,
        // divided down by SMPRT_DIV.
        let dt = (1 + config.sample_rate_divider as u32) as f32 / 1000.0;
        let sens = GYRO_SENS[config.gyro_range as usize];
        TrigGains {
            gyro_factor: dt * PI_180 / sens,
            weight: weight.clamp(0.0, 1.0),
        }
    }
}

/// Floating-point complementary filter for pitch and roll.
///
/// The accelerometer-implied angle comes from `atan2(axis, sqrt(sum of the
/// squares of the other two))`; pitch and roll swap the axis roles
/// symmetrically.
#[derive(Debug, Clone, Copy, PartialEq, Format)]
pub struct TrigFilter {
    pitch: f32,
    roll: f32,
    gains: TrigGains,
}

/// Default accelerometer weight for the trigonometric strategy.
pub const DEFAULT_WEIGHT: f32 = 0.02;

impl TrigFilter {
    pub fn new(config: &MpuConfig) -> Result<Self, ConfigField> {
        Self::with_weight(config, DEFAULT_WEIGHT)
    }

    /// `weight` is the accelerometer share of the blend, clamped to [0, 1].
    /// Rejects a config with an out-of-range field, same as the device layer.
    pub fn with_weight(config: &MpuConfig, weight: f32) -> Result<Self, ConfigField> {
        config.validate()?;
        Ok(TrigFilter {
            pitch: 0.0,
            roll: 0.0,
            gains: TrigGains::derive(config, weight),
        })
    }

    /// Recompute the derived constants for a changed configuration while
    /// keeping the current angles. An invalid config is rejected and the
    /// gains stay as they were.
    pub fn reconfigure(&mut self, config: &MpuConfig) -> Result<(), ConfigField> {
        config.validate()?;
        self.gains = TrigGains::derive(config, self.gains.weight);
        Ok(())
    }

    pub fn roll(&self) -> f32 {
        self.roll
    }

    /// Roll and pitch, in that order, in radians.
    pub fn angles(&self) -> Vector2<f32> {
        Vector2::new(self.roll, self.pitch)
    }

    pub fn update_pitch(&mut self, sample: &RawSample) -> f32 {
        let a = sample.accel();
        let denom = sqrtf(a.y * a.y + a.z * a.z);
        // With a zero denominator the accelerometer angle is undefined;
        // keep the previous estimate untouched.
        if denom > 0.0 {
            let accel_pitch = atan2f(-a.x, denom);
            let gyro_pitch = self.pitch + self.gains.gyro_factor * sample.gyro_y as f32;
            self.pitch =
                (1.0 - self.gains.weight) * gyro_pitch + self.gains.weight * accel_pitch;
        }
        self.pitch
    }

    pub fn update_roll(&mut self, sample: &RawSample) -> f32 {
        let a = sample.accel();
        let denom = sqrtf(a.x * a.x + a.z * a.z);
        if denom > 0.0 {
            let accel_roll = atan2f(a.y, denom);
            let gyro_roll = self.roll + self.gains.gyro_factor * sample.gyro_x as f32;
            self.roll = (1.0 - self.gains.weight) * gyro_roll + self.gains.weight * accel_roll;
        }
        self.roll
    }
}

impl AngleEstimator for TrigFilter {
    fn update(&mut self, sample: &RawSample) -> f32 {
        self.update_roll(sample);
        self.update_pitch(sample)
    }

    fn pitch(&self) -> f32 {
        self.pitch
    }
}
