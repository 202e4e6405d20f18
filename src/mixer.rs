use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fixed upper bound of the throttle/attitude mix ratio.
pub const MIX_UPPER_LIMIT: f64 = 5.0;
/// Lowest accepted value for any mix parameter.
pub const MIX_LOWER_LIMIT: f64 = 0.1;
/// Upper bound of the minimum mix parameter.
pub const MIX_MIN_LIMIT: f64 = 0.25;
/// Lower bound of the maximum mix parameter.
pub const MIX_MAX_FLOOR: f64 = 0.5;
/// Upper bound of the manual mix parameter.
pub const MIX_MAN_LIMIT: f64 = 4.0;

pub const MIX_MIN_DEFAULT: f64 = 0.1;
pub const MIX_MAX_DEFAULT: f64 = 0.5;
pub const MIX_MAN_DEFAULT: f64 = 0.1;

/// Throttle fraction of maximum thrust used for the alt-hold lean-angle limit.
pub const ANGLE_LIMIT_THROTTLE_MAX: f64 = 0.8;

/// Throttle/attitude mix parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixParams {
    /// Mix used when landing (prioritise throttle)
    pub thr_mix_min: f64,
    /// Mix used in active flight (prioritise attitude)
    pub thr_mix_max: f64,
    /// Mix used in manual flight
    pub thr_mix_man: f64,
    /// Apply lean-angle throttle boost
    pub angle_boost_enabled: bool,
    /// Time constant of the alt-hold lean-angle limit filter [s]
    pub angle_limit_tc: f64,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            thr_mix_min: MIX_MIN_DEFAULT,
            thr_mix_max: MIX_MAX_DEFAULT,
            thr_mix_man: MIX_MAN_DEFAULT,
            angle_boost_enabled: true,
            angle_limit_tc: 1.0,
        }
    }
}

/// Vehicle tilt used for throttle boost.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Tilt {
    /// Measured roll [rad]
    pub roll: f64,
    /// Measured pitch [rad]
    pub pitch: f64,
    /// Angle between the target thrust vector and vertical [rad]
    pub thrust_angle: f64,
}

impl Tilt {
    pub fn level() -> Self {
        Self::default()
    }

    pub fn from_attitude(roll: f64, pitch: f64) -> Self {
        Self {
            roll,
            pitch,
            thrust_angle: (roll.cos() * pitch.cos()).clamp(-1.0, 1.0).acos(),
        }
    }
}

/// Throttle handed to the allocator, plus the average-max throttle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThrottleOut {
    pub throttle: f64,
    pub avg_max: f64,
}

/// A parameter changed by [`ThrottlePriorityMixer::sanity_check`].
#[derive(Debug, Clone, PartialEq)]
pub struct MixCorrection {
    pub name: &'static str,
    pub from: f64,
    pub to: f64,
}

/// Throttle vs attitude priority mixer.
///
/// The mix ratio expresses how much throttle may be sacrificed to keep attitude
/// authority. It follows a desired value chosen by the flight mode, rising quickly
/// (2 per second) and falling slowly (0.5 per second).
#[derive(Debug, Clone)]
pub struct ThrottlePriorityMixer {
    params: MixParams,
    mix: f64,
    mix_desired: f64,
    angle_boost: f64,
    althold_lean_angle_max: f64,
}

impl ThrottlePriorityMixer {
    pub fn new(params: MixParams) -> Self {
        Self {
            mix: params.thr_mix_min,
            mix_desired: params.thr_mix_min,
            params,
            angle_boost: 0.0,
            althold_lean_angle_max: 0.0,
        }
    }

    /// Slews the mix ratio toward the desired value. Call once per tick.
    pub fn update_mix(&mut self, dt: f64) {
        if self.mix < self.mix_desired {
            // 0.1 to 0.9 in 0.4 s
            self.mix += (2.0 * dt).min(self.mix_desired - self.mix);
        } else if self.mix > self.mix_desired {
            // 0.9 to 0.1 in 1.6 s
            self.mix -= (0.5 * dt).min(self.mix - self.mix_desired);
        }
        let lower = self.params.thr_mix_min.min(MIX_UPPER_LIMIT);
        self.mix = self.mix.clamp(lower, MIX_UPPER_LIMIT);
    }

    /// Sets the desired mix as a blend of the min and max bounds.
    ///
    /// `ratio` of 0 selects `thr_mix_min`, 1 selects `thr_mix_max`.
    pub fn set_mix_max_ratio(&mut self, ratio: f64) {
        let ratio = ratio.clamp(0.0, 1.0);
        self.mix_desired =
            (1.0 - ratio) * self.params.thr_mix_min + ratio * self.params.thr_mix_max;
    }

    pub fn set_mix_min(&mut self) {
        self.mix_desired = self.params.thr_mix_min;
    }

    pub fn set_mix_man(&mut self) {
        self.mix_desired = self.params.thr_mix_man;
    }

    /// Sets the current and desired mix without slewing.
    pub fn set_mix_value(&mut self, value: f64) {
        self.mix = value;
        self.mix_desired = value;
    }

    pub fn mix(&self) -> f64 {
        self.mix
    }

    pub fn desired_mix(&self) -> f64 {
        self.mix_desired
    }

    pub fn is_mix_min(&self) -> bool {
        self.mix < 1.25 * self.params.thr_mix_min
    }

    /// Throttle compensated for the thrust lost to vehicle tilt.
    ///
    /// The boost is faded out between 60 and 90 degrees of tilt, where the
    /// vehicle cannot deliver the extra vertical thrust anyway.
    ///
    /// # Arguments
    ///
    /// * `throttle_in` - Commanded throttle, 0..1
    /// * `tilt` - Vehicle attitude and target thrust angle
    ///
    /// # Returns
    ///
    /// Boosted throttle. The boost itself is available from [`Self::angle_boost`].
    pub fn throttle_boosted(&mut self, throttle_in: f64, tilt: &Tilt) -> f64 {
        if !self.params.angle_boost_enabled {
            self.angle_boost = 0.0;
            return throttle_in;
        }

        let cos_tilt = tilt.pitch.cos() * tilt.roll.cos();
        let inverted_factor = (2.0 * cos_tilt).clamp(0.0, 1.0);
        let boost_factor = 1.0 / tilt.thrust_angle.cos().clamp(0.1, 1.0);

        let throttle_out = throttle_in * inverted_factor * boost_factor;
        self.angle_boost = (throttle_out - throttle_in).clamp(-1.0, 1.0);
        throttle_out
    }

    /// Boost applied by the last [`Self::throttle_boosted`] call.
    pub fn angle_boost(&self) -> f64 {
        self.angle_boost
    }

    /// Throttle the allocator may average up to, given the current mix.
    pub fn throttle_avg_max(&self, throttle_in: f64, throttle_hover: f64) -> f64 {
        let throttle_in = throttle_in.clamp(0.0, 1.0);
        throttle_in.max(throttle_in * (1.0 - self.mix).max(0.0) + throttle_hover * self.mix)
    }

    /// Updates the filtered lean-angle limit used by altitude-hold modes.
    ///
    /// A `throttle_thrust_max` of zero forces the limit to zero.
    pub fn update_althold_lean_angle_max(
        &mut self,
        throttle_in: f64,
        throttle_thrust_max: f64,
        dt: f64,
    ) {
        if throttle_thrust_max == 0.0 {
            self.althold_lean_angle_max = 0.0;
            return;
        }

        let target = (throttle_in / (ANGLE_LIMIT_THROTTLE_MAX * throttle_thrust_max))
            .clamp(0.0, 1.0)
            .acos();
        let alpha = dt / (dt + self.params.angle_limit_tc);
        self.althold_lean_angle_max += alpha * (target - self.althold_lean_angle_max);
    }

    pub fn althold_lean_angle_max(&self) -> f64 {
        self.althold_lean_angle_max
    }

    /// Runs the throttle output stage.
    ///
    /// # Arguments
    ///
    /// * `throttle_in` - Pilot or outer-loop throttle, 0..1
    /// * `apply_angle_boost` - Compensate for tilt
    /// * `tilt` - Vehicle tilt
    /// * `throttle_hover` - Estimated hover throttle, 0..1
    /// * `dt` - Loop period
    pub fn set_throttle_out(
        &mut self,
        throttle_in: f64,
        apply_angle_boost: bool,
        tilt: &Tilt,
        throttle_hover: f64,
        dt: f64,
    ) -> ThrottleOut {
        self.update_althold_lean_angle_max(throttle_in, 1.0, dt);

        let throttle = if apply_angle_boost {
            self.throttle_boosted(throttle_in, tilt)
        } else {
            self.angle_boost = 0.0;
            throttle_in
        };

        ThrottleOut {
            throttle,
            avg_max: self.throttle_avg_max(throttle.max(throttle_in), throttle_hover),
        }
    }

    pub fn params(&self) -> &MixParams {
        &self.params
    }

    /// Replaces the mix parameters. Run [`Self::sanity_check`] afterwards.
    pub fn set_params(&mut self, params: MixParams) {
        self.params = params;
    }

    /// Clamps mix parameters into their documented ranges.
    ///
    /// Call once before arming. Returns every correction made so the caller can
    /// persist the new values.
    pub fn sanity_check(&mut self) -> Vec<MixCorrection> {
        let mut corrections = Vec::new();
        let p = &mut self.params;

        let c = &mut corrections;
        clamp_param(c, "THR_MIX_MAN", &mut p.thr_mix_man, MIX_LOWER_LIMIT, MIX_MAN_LIMIT);
        clamp_param(c, "THR_MIX_MIN", &mut p.thr_mix_min, MIX_LOWER_LIMIT, MIX_MIN_LIMIT);
        clamp_param(c, "THR_MIX_MAX", &mut p.thr_mix_max, MIX_MAX_FLOOR, MIX_UPPER_LIMIT);

        if p.thr_mix_min > p.thr_mix_max {
            corrections.push(MixCorrection {
                name: "THR_MIX_MIN",
                from: p.thr_mix_min,
                to: MIX_MIN_DEFAULT,
            });
            corrections.push(MixCorrection {
                name: "THR_MIX_MAX",
                from: p.thr_mix_max,
                to: MIX_MAX_DEFAULT,
            });
            p.thr_mix_min = MIX_MIN_DEFAULT;
            p.thr_mix_max = MIX_MAX_DEFAULT;
        }

        for c in &corrections {
            warn!(
                param = c.name,
                from = c.from,
                to = c.to,
                "mix parameter out of range, corrected"
            );
        }
        corrections
    }
}

impl Default for ThrottlePriorityMixer {
    fn default() -> Self {
        Self::new(MixParams::default())
    }
}

fn clamp_param(
    corrections: &mut Vec<MixCorrection>,
    name: &'static str,
    value: &mut f64,
    lo: f64,
    hi: f64,
) {
    // NaN compares false, treat it as out of range too
    if !(*value >= lo && *value <= hi) {
        let to = if value.is_nan() { lo } else { value.clamp(lo, hi) };
        corrections.push(MixCorrection { name, from: *value, to });
        *value = to;
    }
}
