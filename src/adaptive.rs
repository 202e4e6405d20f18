//! Model-reference adaptive correction for the body-rate loop
//!
//! Augments the fixed-gain rate PIDs with a term learned online. Each tick:
//!
//! e = [ω - x_ref(0..3), ξ - x_ref(3..6)]        (1x6 tracking error)
//! w = [ω, ξ, ω_des, 1]ᵀ                          (10x1 regressor)
//! W ← W + dt · w · e · P · B                     (10x3 weights)
//! u_a = -Γ · Wᵀ · w
//!
//! Where:
//! - ω: measured body rate
//! - ω_des: target body rate
//! - ξ: integral of the rate tracking error
//! - x_ref: reference model state (pass-through rate model and its integrator)
//! - P, B: fixed adaptation-law design matrices
//!
//! The law has no leakage term: with persistent non-zero-mean error the weights
//! drift without bound. `weight_bound` adds an optional element-wise clamp.

use nalgebra::{SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Regressor length: body rate (3), error integral (3), target rate (3), bias.
pub const REGRESSOR_LEN: usize = 10;

pub type WeightMatrix = SMatrix<f64, REGRESSOR_LEN, 3>;
pub type Regressor = SVector<f64, REGRESSOR_LEN>;
pub type LyapunovMatrix = SMatrix<f64, 6, 6>;
pub type InputMatrix = SMatrix<f64, 6, 3>;

/// Adaptive correction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveParams {
    /// Adaptation enabled
    pub enabled: bool,
    /// Vehicle is in the take-off phase, correction output is held at zero
    pub take_off: bool,
    /// Output gain Γ
    pub gamma: f64,
    /// Symmetric design matrix P of the adaptation law
    pub p: LyapunovMatrix,
    /// Input matrix B of the adaptation law
    pub b: InputMatrix,
    /// Optional element-wise bound on the weights (None = unbounded)
    pub weight_bound: Option<f64>,
}

impl Default for AdaptiveParams {
    fn default() -> Self {
        let mut b = InputMatrix::zeros();
        b.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
        b.fixed_view_mut::<3, 3>(3, 0).fill_with_identity();

        Self {
            enabled: true,
            take_off: true,
            gamma: 4.0,
            p: LyapunovMatrix::identity(),
            b,
            weight_bound: None,
        }
    }
}

/// State of one adaptive update, kept for telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveStep {
    /// Correction applied this tick (zero when gated)
    pub correction: Vector3<f64>,
    /// Rate tracking error against the reference model
    pub rate_error: Vector3<f64>,
    /// Reference model rate used this tick
    pub reference_rate: Vector3<f64>,
}

impl Default for AdaptiveStep {
    fn default() -> Self {
        Self {
            correction: Vector3::zeros(),
            rate_error: Vector3::zeros(),
            reference_rate: Vector3::zeros(),
        }
    }
}

/// Online adaptive corrector
#[derive(Debug, Clone)]
pub struct AdaptiveCorrector {
    pub params: AdaptiveParams,
    weights: WeightMatrix,
    /// [rate(3), rate-error integral(3)]
    x_ref: SVector<f64, 6>,
    error_integral: Vector3<f64>,
    last: AdaptiveStep,
}

impl AdaptiveCorrector {
    pub fn new(params: AdaptiveParams) -> Self {
        Self {
            params,
            weights: WeightMatrix::zeros(),
            x_ref: SVector::zeros(),
            error_integral: Vector3::zeros(),
            last: AdaptiveStep::default(),
        }
    }

    /// Run one adaptation step
    ///
    /// # Arguments
    /// * `omega` - Measured body rate [rad/s]
    /// * `omega_des` - Target body rate [rad/s]
    /// * `dt` - Time step
    ///
    /// # Returns
    /// Correction torque per axis, zero while adaptation is disabled or the
    /// vehicle is taking off
    pub fn update(
        &mut self,
        omega: &Vector3<f64>,
        omega_des: &Vector3<f64>,
        dt: f64,
    ) -> Vector3<f64> {
        let reference_rate = self.x_ref.fixed_rows::<3>(0).into_owned();
        let reference_integral = self.x_ref.fixed_rows::<3>(3).into_owned();

        let rate_error = omega - reference_rate;
        let integral_error = self.error_integral - reference_integral;
        let e = SMatrix::<f64, 1, 6>::from_iterator(
            rate_error.iter().chain(integral_error.iter()).copied(),
        );

        let w = self.regressor(omega, omega_des);

        self.weights += (w * e * self.params.p * self.params.b) * dt;
        if let Some(bound) = self.params.weight_bound {
            let bound = bound.abs();
            self.weights.apply(|x| *x = x.clamp(-bound, bound));
        }

        let correction = if self.is_active() {
            -self.params.gamma * (self.weights.transpose() * w)
        } else {
            Vector3::zeros()
        };

        // Propagate the error integral and the pass-through reference model
        self.error_integral += (omega - omega_des) * dt;
        let ref_drift = (reference_rate - omega_des) * dt;
        let mut ref_integral = self.x_ref.fixed_rows_mut::<3>(3);
        ref_integral += ref_drift;
        self.x_ref.fixed_rows_mut::<3>(0).copy_from(omega_des);

        self.last = AdaptiveStep {
            correction,
            rate_error,
            reference_rate,
        };

        correction
    }

    fn regressor(&self, omega: &Vector3<f64>, omega_des: &Vector3<f64>) -> Regressor {
        let mut w = Regressor::zeros();
        w.fixed_rows_mut::<3>(0).copy_from(omega);
        w.fixed_rows_mut::<3>(3).copy_from(&self.error_integral);
        w.fixed_rows_mut::<3>(6).copy_from(omega_des);
        w[9] = 1.0;
        w
    }

    /// Correction output is produced (not gated off)
    pub fn is_active(&self) -> bool {
        self.params.enabled && !self.params.take_off
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.params.enabled = enabled;
    }

    pub fn set_take_off(&mut self, take_off: bool) {
        self.params.take_off = take_off;
    }

    pub fn weights(&self) -> &WeightMatrix {
        &self.weights
    }

    /// Overwrite the learned weights, e.g. to restore a previous flight's state
    pub fn set_weights(&mut self, weights: WeightMatrix) {
        self.weights = weights;
    }

    pub fn error_integral(&self) -> Vector3<f64> {
        self.error_integral
    }

    pub fn reference_rate(&self) -> Vector3<f64> {
        self.x_ref.fixed_rows::<3>(0).into_owned()
    }

    pub fn reference_integral(&self) -> Vector3<f64> {
        self.x_ref.fixed_rows::<3>(3).into_owned()
    }

    pub fn last_step(&self) -> &AdaptiveStep {
        &self.last
    }

    /// Reset learned weights and reference model
    pub fn reset(&mut self) {
        self.weights = WeightMatrix::zeros();
        self.x_ref = SVector::zeros();
        self.error_integral = Vector3::zeros();
        self.last = AdaptiveStep::default();
    }
}

impl Default for AdaptiveCorrector {
    fn default() -> Self {
        Self::new(AdaptiveParams::default())
    }
}
