//! Controller configuration
//!
//! [`ControllerConfig`] groups every tunable of the rate loop. It loads from
//! JSON, and individual values can be changed by name with range validation
//! through [`ControllerConfig::set_param`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::adaptive::AdaptiveParams;
use crate::mixer::MixParams;
use crate::pid::AxisGains;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown parameter {0}")]
    UnknownParameter(String),
    #[error("{name} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Rate loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Control loop period [s]
    pub dt: f64,
    pub roll: AxisGains,
    pub pitch: AxisGains,
    pub yaw: AxisGains,
    /// Scale on the yaw feedforward handed to the allocator
    pub yaw_ff_scale: f64,
    /// Throttle needed to hover, 0..1
    pub throttle_hover: f64,
    pub mix: MixParams,
    pub adaptive: AdaptiveParams,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            dt: 0.0025, // 400 Hz
            roll: AxisGains::roll_pitch(),
            pitch: AxisGains::roll_pitch(),
            yaw: AxisGains::yaw(),
            yaw_ff_scale: 1.0,
            throttle_hover: 0.35,
            mix: MixParams::default(),
            adaptive: AdaptiveParams::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        if !(config.dt > 0.0 && config.dt <= 0.1) {
            return Err(ConfigError::OutOfRange {
                name: "dt".to_string(),
                value: config.dt,
                min: 0.0,
                max: 0.1,
            });
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Sets a tunable by name.
    ///
    /// Flags take 0 or 1. `MRAC_WMAX` of 0 removes the weight bound.
    pub fn set_param(&mut self, name: &str, value: f64) -> Result<(), ConfigError> {
        let (min, max) =
            param_range(name).ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))?;
        if !(min..=max).contains(&value) {
            return Err(ConfigError::OutOfRange {
                name: name.to_string(),
                value,
                min,
                max,
            });
        }
        self.write_param(name, value);
        debug!(param = name, value, "parameter set");
        Ok(())
    }

    pub fn get_param(&self, name: &str) -> Result<f64, ConfigError> {
        self.read_param(name)
            .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))
    }
}

macro_rules! param_table {
    ($($name:literal => $kind:ident $($field:ident).+ [$min:expr, $max:expr];)*) => {
        /// Every name accepted by [`ControllerConfig::set_param`].
        pub const PARAM_NAMES: &[&str] = &[$($name),*];

        fn param_range(name: &str) -> Option<(f64, f64)> {
            match name {
                $($name => Some(($min, $max)),)*
                _ => None,
            }
        }

        impl ControllerConfig {
            fn read_param(&self, name: &str) -> Option<f64> {
                match name {
                    $($name => Some(param_table!(@read $kind self.$($field).+)),)*
                    _ => None,
                }
            }

            fn write_param(&mut self, name: &str, value: f64) {
                match name {
                    $($name => param_table!(@write $kind self.$($field).+, value),)*
                    _ => {}
                }
            }
        }
    };
    (@read float $e:expr) => { $e };
    (@read flag $e:expr) => { if $e { 1.0 } else { 0.0 } };
    (@read bound $e:expr) => { $e.unwrap_or(0.0) };
    (@write float $e:expr, $v:expr) => { $e = $v };
    (@write flag $e:expr, $v:expr) => { $e = $v >= 0.5 };
    (@write bound $e:expr, $v:expr) => { $e = if $v > 0.0 { Some($v) } else { None } };
}

param_table! {
    "RAT_RLL_P" => float roll.kp [0.0, 0.5];
    "RAT_RLL_I" => float roll.ki [0.0, 2.0];
    "RAT_RLL_D" => float roll.kd [0.0, 0.05];
    "RAT_RLL_FF" => float roll.kff [0.0, 0.5];
    "RAT_RLL_IMAX" => float roll.imax [0.0, 1.0];
    "RAT_RLL_FLTT" => float roll.filt_target_hz [0.0, 100.0];
    "RAT_RLL_FLTE" => float roll.filt_error_hz [0.0, 100.0];
    "RAT_RLL_FLTD" => float roll.filt_d_hz [0.0, 100.0];
    "RAT_RLL_SMAX" => float roll.slew_max [0.0, 200.0];
    "RAT_PIT_P" => float pitch.kp [0.0, 0.5];
    "RAT_PIT_I" => float pitch.ki [0.0, 2.0];
    "RAT_PIT_D" => float pitch.kd [0.0, 0.05];
    "RAT_PIT_FF" => float pitch.kff [0.0, 0.5];
    "RAT_PIT_IMAX" => float pitch.imax [0.0, 1.0];
    "RAT_PIT_FLTT" => float pitch.filt_target_hz [0.0, 100.0];
    "RAT_PIT_FLTE" => float pitch.filt_error_hz [0.0, 100.0];
    "RAT_PIT_FLTD" => float pitch.filt_d_hz [0.0, 100.0];
    "RAT_PIT_SMAX" => float pitch.slew_max [0.0, 200.0];
    "RAT_YAW_P" => float yaw.kp [0.0, 2.5];
    "RAT_YAW_I" => float yaw.ki [0.0, 1.0];
    "RAT_YAW_D" => float yaw.kd [0.0, 0.02];
    "RAT_YAW_FF" => float yaw.kff [0.0, 0.5];
    "RAT_YAW_IMAX" => float yaw.imax [0.0, 1.0];
    "RAT_YAW_FLTT" => float yaw.filt_target_hz [0.0, 100.0];
    "RAT_YAW_FLTE" => float yaw.filt_error_hz [0.0, 100.0];
    "RAT_YAW_FLTD" => float yaw.filt_d_hz [0.0, 100.0];
    "RAT_YAW_SMAX" => float yaw.slew_max [0.0, 200.0];
    "RAT_YAW_FFSCL" => float yaw_ff_scale [0.0, 1.0];
    "THR_MIX_MIN" => float mix.thr_mix_min [0.1, 0.25];
    "THR_MIX_MAX" => float mix.thr_mix_max [0.5, 5.0];
    "THR_MIX_MAN" => float mix.thr_mix_man [0.1, 4.0];
    "ANGLE_BOOST" => flag mix.angle_boost_enabled [0.0, 1.0];
    "MOT_THST_HOVER" => float throttle_hover [0.125, 0.6875];
    "MRAC" => flag adaptive.enabled [0.0, 1.0];
    "TAKE_OFF" => flag adaptive.take_off [0.0, 1.0];
    "MRAC_GAMMA" => float adaptive.gamma [0.0, 100.0];
    "MRAC_WMAX" => bound adaptive.weight_bound [0.0, 1000.0];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_by_name() {
        let mut config = ControllerConfig::default();
        config.set_param("RAT_RLL_P", 0.2).unwrap();
        config.set_param("RAT_YAW_FLTE", 5.0).unwrap();
        config.set_param("THR_MIX_MAX", 0.9).unwrap();

        assert_eq!(config.roll.kp, 0.2);
        assert_eq!(config.yaw.filt_error_hz, 5.0);
        assert_eq!(config.get_param("THR_MIX_MAX").unwrap(), 0.9);
        // Pitch untouched
        assert_eq!(config.get_param("RAT_PIT_P").unwrap(), 0.135);
    }

    #[test]
    fn test_every_name_reads_back() {
        let config = ControllerConfig::default();
        for name in PARAM_NAMES {
            assert!(config.get_param(name).is_ok(), "{name} not readable");
        }
    }

    #[test]
    fn test_rejects_out_of_range() {
        let mut config = ControllerConfig::default();
        let err = config.set_param("RAT_PIT_D", 0.5).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { max, .. } if max == 0.05));
        assert_eq!(config.pitch.kd, 0.0036);

        assert!(config.set_param("RAT_RLL_P", f64::NAN).is_err());
    }

    #[test]
    fn test_rejects_unknown_name() {
        let mut config = ControllerConfig::default();
        assert!(matches!(
            config.set_param("RAT_RLL_Q", 1.0),
            Err(ConfigError::UnknownParameter(_))
        ));
        assert!(config.get_param("nope").is_err());
    }

    #[test]
    fn test_flags_and_bound() {
        let mut config = ControllerConfig::default();
        assert_eq!(config.get_param("TAKE_OFF").unwrap(), 1.0);

        config.set_param("TAKE_OFF", 0.0).unwrap();
        config.set_param("MRAC", 0.0).unwrap();
        assert!(!config.adaptive.take_off);
        assert!(!config.adaptive.enabled);

        config.set_param("MRAC_WMAX", 2.0).unwrap();
        assert_eq!(config.adaptive.weight_bound, Some(2.0));
        config.set_param("MRAC_WMAX", 0.0).unwrap();
        assert_eq!(config.adaptive.weight_bound, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ControllerConfig::from_json(r#"{"dt": 0.005, "mix": {"thr_mix_max": 0.8}}"#).unwrap();
        assert_eq!(config.dt, 0.005);
        assert_eq!(config.mix.thr_mix_max, 0.8);
        assert_eq!(config.mix.thr_mix_min, 0.1);
        assert_eq!(config.yaw, AxisGains::yaw());
        assert!(config.adaptive.take_off);
    }

    #[test]
    fn test_partial_axis_entry_keeps_other_gains() {
        let config = ControllerConfig::from_json(r#"{"roll": {"kp": 0.2}}"#).unwrap();
        assert_eq!(config.roll.kp, 0.2);
        assert_eq!(config.roll.ki, 0.135);
        assert_eq!(config.roll.filt_d_hz, 20.0);
        assert_eq!(config.pitch, AxisGains::roll_pitch());

        let config = ControllerConfig::from_json(r#"{"yaw": {"imax": 0.3}}"#).unwrap();
        assert_eq!(config.yaw.imax, 0.3);
        assert_eq!(config.yaw.kp, AxisGains::roll_pitch().kp);
    }

    #[test]
    fn test_json_round_trip_keeps_gains() {
        let mut config = ControllerConfig::default();
        config.set_param("RAT_RLL_SMAX", 50.0).unwrap();
        let restored = ControllerConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored.roll, config.roll);
        assert_eq!(restored.adaptive.b, config.adaptive.b);
    }

    #[test]
    fn test_invalid_dt_is_rejected() {
        assert!(matches!(
            ControllerConfig::from_json(r#"{"dt": 0.0}"#),
            Err(ConfigError::OutOfRange { .. })
        ));
        assert!(matches!(
            ControllerConfig::from_json("not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
