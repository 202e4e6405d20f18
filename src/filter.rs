//! First-order low-pass filter used by the rate controllers.

use std::f64::consts::PI;

/// First-order low-pass filter with a cutoff expressed in Hz.
///
/// A cutoff of zero (or below) disables filtering: every sample passes through
/// unchanged.
#[derive(Debug, Clone)]
pub struct LowPassFilter {
    cutoff_hz: f64,
    value: f64,
}

impl LowPassFilter {
    pub fn new(cutoff_hz: f64) -> Self {
        Self {
            cutoff_hz,
            value: 0.0,
        }
    }

    /// Smoothing factor for a given time step.
    pub fn alpha(&self, dt: f64) -> f64 {
        if self.cutoff_hz <= 0.0 || dt <= 0.0 {
            return 1.0;
        }
        let rc = 1.0 / (2.0 * PI * self.cutoff_hz);
        dt / (dt + rc)
    }

    /// Update filter with new sample
    pub fn apply(&mut self, sample: f64, dt: f64) -> f64 {
        let alpha = self.alpha(dt);
        self.value += alpha * (sample - self.value);
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    pub fn set_cutoff_hz(&mut self, cutoff_hz: f64) {
        self.cutoff_hz = cutoff_hz;
    }

    /// Reset filter state to a given value
    pub fn reset(&mut self, value: f64) {
        self.value = value;
    }
}
