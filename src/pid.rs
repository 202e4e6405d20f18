use serde::{Deserialize, Serialize};

use crate::filter::LowPassFilter;

/// Lowest factor the slew limiter may apply to the P and D gains.
pub const SLEW_SCALE_MIN: f64 = 0.1;

/// Gains and filter settings for one body-rate axis.
///
/// All outputs are in normalised actuator units (roughly -1..1 of available
/// torque), inputs in rad/s. Fields missing from a serialized entry take the
/// roll/pitch defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisGains {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Feedforward gain applied to the filtered target
    pub kff: f64,
    /// Integrator magnitude limit
    pub imax: f64,
    /// Target filter cutoff (Hz), 0 disables
    pub filt_target_hz: f64,
    /// Error filter cutoff (Hz), 0 disables
    pub filt_error_hz: f64,
    /// Derivative filter cutoff (Hz), 0 disables
    pub filt_d_hz: f64,
    /// Maximum slew rate of the combined P+D output (units/s), 0 disables
    pub slew_max: f64,
}

impl AxisGains {
    /// Default gains for the roll and pitch axes.
    pub fn roll_pitch() -> Self {
        Self {
            kp: 0.135,
            ki: 0.135,
            kd: 0.0036,
            kff: 0.0,
            imax: 0.5,
            filt_target_hz: 20.0,
            filt_error_hz: 0.0,
            filt_d_hz: 20.0,
            slew_max: 0.0,
        }
    }

    /// Default gains for the yaw axis.
    pub fn yaw() -> Self {
        Self {
            kp: 0.18,
            ki: 0.018,
            kd: 0.0,
            kff: 0.0,
            imax: 0.5,
            filt_target_hz: 20.0,
            filt_error_hz: 2.5,
            filt_d_hz: 0.0,
            slew_max: 0.0,
        }
    }
}

impl Default for AxisGains {
    fn default() -> Self {
        Self::roll_pitch()
    }
}

/// Snapshot of the last update, for logging and tuning tools.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidInfo {
    pub target: f64,
    pub actual: f64,
    pub error: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub ff: f64,
    /// Gain modifier applied by the slew limiter this tick
    pub slew_scale: f64,
    /// Integrator was held by the saturation flag
    pub limit: bool,
}

/// Filtered PID + feedforward controller for a single body-rate axis.
///
/// The controller tracks a target rate using:
/// - a low-pass filtered target (also used for feedforward)
/// - a low-pass filtered error driving the P term
/// - a separately filtered error derivative driving the D term
/// - an integrator with saturation-aware anti-windup, bounded by `imax`
///
/// The combined P+D output is slew limited: when it would change faster than
/// `slew_max`, P and D are scaled down together for that tick, never below
/// [`SLEW_SCALE_MIN`] of nominal. The factor is the largest one that keeps the
/// change within `slew_max * dt`, so the bound holds whenever the floor is not
/// reached and the output is moving away from its previous value.
#[derive(Debug, Clone)]
pub struct RateAxisController {
    gains: AxisGains,
    dt: f64,
    target_filter: LowPassFilter,
    error_filter: LowPassFilter,
    derivative_filter: LowPassFilter,
    integrator: f64,
    last_pd: f64,
    slew_scale: f64,
    reset_filter: bool,
    info: PidInfo,
}

impl RateAxisController {
    /// Creates a controller for a fixed loop period.
    ///
    /// # Arguments
    ///
    /// * `gains` - Axis gains and filter cutoffs
    /// * `dt` - Control loop period in seconds (typically 0.0025 for 400 Hz)
    pub fn new(gains: AxisGains, dt: f64) -> Self {
        Self {
            target_filter: LowPassFilter::new(gains.filt_target_hz),
            error_filter: LowPassFilter::new(gains.filt_error_hz),
            derivative_filter: LowPassFilter::new(gains.filt_d_hz),
            gains,
            dt,
            integrator: 0.0,
            last_pd: 0.0,
            slew_scale: 1.0,
            reset_filter: true,
            info: PidInfo::default(),
        }
    }

    /// Runs one controller update and returns P + I + D.
    ///
    /// The feedforward term is not included in the return value; read it with
    /// [`RateAxisController::ff`] so it can be passed to the allocator separately.
    ///
    /// # Arguments
    ///
    /// * `target` - Desired body rate in rad/s
    /// * `measured` - Measured body rate in rad/s
    /// * `limit` - The allocator saturated this axis on the previous tick
    ///
    /// # Returns
    ///
    /// The P + I + D command in normalised units
    ///
    /// # Example
    ///
    /// let mut pid = RateAxisController::new(AxisGains::roll_pitch(), 0.0025);
    /// let out = pid.update_all(1.0, 0.0, false);
    /// // First tick after reset: out ≈ kp * 1.0
    pub fn update_all(&mut self, target: f64, measured: f64, limit: bool) -> f64 {
        let dt = self.dt;

        let (target_filt, error, derivative) = if self.reset_filter {
            self.reset_filter = false;
            let error = target - measured;
            self.target_filter.reset(target);
            self.error_filter.reset(error);
            self.derivative_filter.reset(0.0);
            (target, error, 0.0)
        } else {
            let prev_error = self.error_filter.value();
            let target_filt = self.target_filter.apply(target, dt);
            let error = self.error_filter.apply(target_filt - measured, dt);
            let derivative = if dt > 0.0 {
                self.derivative_filter.apply((error - prev_error) / dt, dt)
            } else {
                self.derivative_filter.value()
            };
            (target_filt, error, derivative)
        };

        self.update_integrator(error, limit);

        let p = self.gains.kp * error;
        let d = self.gains.kd * derivative;
        let scale = self.slew_modifier(p + d);
        let p = p * scale;
        let d = d * scale;
        self.last_pd = p + d;

        self.info = PidInfo {
            target: target_filt,
            actual: measured,
            error,
            p,
            i: self.integrator,
            d,
            ff: target_filt * self.gains.kff,
            slew_scale: scale,
            limit,
        };

        p + self.integrator + d
    }

    fn update_integrator(&mut self, error: f64, limit: bool) {
        if self.gains.ki <= 0.0 || self.dt <= 0.0 {
            self.integrator = 0.0;
            return;
        }

        // Saturated: only allow the integrator to shrink.
        let unwinding =
            (error > 0.0 && self.integrator < 0.0) || (error < 0.0 && self.integrator > 0.0);
        if !limit || unwinding {
            self.integrator += error * self.gains.ki * self.dt;
        }
        let imax = self.gains.imax.abs();
        self.integrator = self.integrator.clamp(-imax, imax);
    }

    /// Returns the common P/D gain factor for this tick and records it.
    fn slew_modifier(&mut self, pd: f64) -> f64 {
        let slew_max = self.gains.slew_max;
        self.slew_scale = 1.0;
        if slew_max <= 0.0 || self.dt <= 0.0 || pd == 0.0 {
            return 1.0;
        }

        let max_delta = slew_max * self.dt;
        let delta = pd - self.last_pd;
        if delta.abs() <= max_delta {
            return 1.0;
        }

        let allowed = self.last_pd + max_delta.copysign(delta);
        let scale = (allowed / pd).clamp(SLEW_SCALE_MIN, 1.0);
        if scale.is_finite() {
            self.slew_scale = scale;
        }
        self.slew_scale
    }

    /// Feedforward term from the last update.
    pub fn ff(&self) -> f64 {
        self.info.ff
    }

    pub fn integrator(&self) -> f64 {
        self.integrator
    }

    /// Gain factor applied by the slew limiter on the last update.
    pub fn slew_scale(&self) -> f64 {
        self.slew_scale
    }

    /// Combined (scaled) P + D output of the last update.
    pub fn last_pd(&self) -> f64 {
        self.last_pd
    }

    pub fn pid_info(&self) -> &PidInfo {
        &self.info
    }

    pub fn gains(&self) -> &AxisGains {
        &self.gains
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Replaces the gain set and filter cutoffs. Filter state is kept.
    pub fn set_gains(&mut self, gains: AxisGains) {
        self.target_filter.set_cutoff_hz(gains.filt_target_hz);
        self.error_filter.set_cutoff_hz(gains.filt_error_hz);
        self.derivative_filter.set_cutoff_hz(gains.filt_d_hz);
        self.gains = gains;
    }

    pub fn reset_integrator(&mut self) {
        self.integrator = 0.0;
    }

    /// Re-seeds the filters from the next sample.
    pub fn reset_filter(&mut self) {
        self.reset_filter = true;
    }

    /// Clears all state, as done when the vehicle is re-armed.
    pub fn reset(&mut self) {
        self.integrator = 0.0;
        self.last_pd = 0.0;
        self.slew_scale = 1.0;
        self.reset_filter = true;
        self.info = PidInfo::default();
    }
}
