//! Actuator geometry and frame presets
//!
//! A frame is a list of actuators, each with its contribution factors to the
//! six demand axes. Presets are plain data: any frame can be described in JSON
//! and loaded with [`FrameConfig::from_json`].

use serde::{Deserialize, Serialize};

use crate::alloc::{ActuatorAllocator, AllocatorError};
use crate::config::ConfigError;

/// Maximum number of actuator slots an allocator manages.
pub const MAX_ACTUATORS: usize = 12;

/// What an actuator slot drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    /// Thrust-producing motor
    #[default]
    Motor,
    /// Servo tilting rotor `n` about the pitch axis
    TiltPitch(u8),
    /// Servo tilting rotor `n` about the roll axis
    TiltRoll(u8),
}

impl ActuatorKind {
    pub fn is_servo(&self) -> bool {
        !matches!(self, ActuatorKind::Motor)
    }
}

/// Contribution factors of one actuator
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorGeometry {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    /// Upward thrust factor
    pub throttle: f64,
    pub forward: f64,
    pub lateral: f64,
    /// Motor can produce thrust in both directions
    pub reversible: bool,
    /// Position in the motor-order test sequence (1-based)
    pub test_order: u8,
    pub kind: ActuatorKind,
}

impl ActuatorGeometry {
    /// Non-reversible motor with rotational and upward factors.
    pub fn motor(roll: f64, pitch: f64, yaw: f64, throttle: f64, test_order: u8) -> Self {
        Self {
            roll,
            pitch,
            yaw,
            throttle,
            test_order,
            ..Self::default()
        }
    }

    pub fn tilt_pitch(rotor: u8, forward: f64, test_order: u8) -> Self {
        Self {
            forward,
            test_order,
            kind: ActuatorKind::TiltPitch(rotor),
            ..Self::default()
        }
    }

    pub fn tilt_roll(rotor: u8, lateral: f64, test_order: u8) -> Self {
        Self {
            lateral,
            test_order,
            kind: ActuatorKind::TiltRoll(rotor),
            ..Self::default()
        }
    }

    pub fn reversible(mut self) -> Self {
        self.reversible = true;
        self
    }
}

/// Vehicle class derived from the number of configured actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    Tricopter,
    Quadrotor,
    Hexarotor,
    Octorotor,
    Decarotor,
    Dodecarotor,
    Generic,
}

impl FrameKind {
    pub fn from_count(count: usize) -> Self {
        match count {
            3 => FrameKind::Tricopter,
            4 => FrameKind::Quadrotor,
            6 => FrameKind::Hexarotor,
            8 => FrameKind::Octorotor,
            10 => FrameKind::Decarotor,
            12 => FrameKind::Dodecarotor,
            _ => FrameKind::Generic,
        }
    }
}

/// Actuator slot in a frame description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameActuator {
    pub index: usize,
    #[serde(flatten)]
    pub geometry: ActuatorGeometry,
}

/// Frame description: actuator table plus mounting offsets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameConfig {
    pub name: String,
    /// Roll mounting offset of the thrust frame [deg]
    #[serde(default)]
    pub roll_offset_deg: f64,
    /// Pitch mounting offset of the thrust frame [deg]
    #[serde(default)]
    pub pitch_offset_deg: f64,
    /// Mechanical limit of shared tilt servos [deg], None for fixed rotors
    #[serde(default)]
    pub max_tilt_deg: Option<f64>,
    pub actuators: Vec<FrameActuator>,
}

/// Servo mechanical limit used by the built-in tilt-rotor presets [deg]
pub const MAX_TILT_SERVO_DEG: f64 = 45.0;

impl FrameConfig {
    /// Quad with four upward motors and eight tilt servos that share one
    /// pivot angle pair. Servos are mixed as forward/lateral actuators.
    pub fn six_dof_quad() -> Self {
        // (roll, pitch, yaw), X layout
        let motors = [
            (-0.71, 0.71, 0.71),
            (0.71, 0.71, -0.71),
            (0.71, -0.71, 0.71),
            (-0.71, -0.71, -0.71),
        ];
        let mut actuators: Vec<FrameActuator> = motors
            .iter()
            .enumerate()
            .map(|(i, &(roll, pitch, yaw))| FrameActuator {
                index: i,
                geometry: ActuatorGeometry::motor(roll, pitch, yaw, 1.0, i as u8 + 1),
            })
            .collect();
        actuators.extend(tilt_servos(1.0));

        Self {
            name: "6dof-quad".to_string(),
            roll_offset_deg: 0.0,
            pitch_offset_deg: 0.0,
            max_tilt_deg: Some(MAX_TILT_SERVO_DEG),
            actuators,
        }
    }

    /// X quad with four independently tiltable rotors, for the pseudo-inverse allocator.
    pub fn overactuated_x() -> Self {
        // (roll, pitch, yaw, test order)
        let motors = [
            (-0.71, 0.71, 1.0, 1),
            (0.71, -0.71, 1.0, 3),
            (0.71, 0.71, -1.0, 4),
            (-0.71, -0.71, -1.0, 2),
        ];
        let mut actuators: Vec<FrameActuator> = motors
            .iter()
            .enumerate()
            .map(|(i, &(roll, pitch, yaw, order))| FrameActuator {
                index: i,
                geometry: ActuatorGeometry::motor(roll, pitch, yaw, 1.0, order),
            })
            .collect();
        actuators.extend(tilt_servos(1.0));

        Self {
            name: "overactuated-x".to_string(),
            roll_offset_deg: 0.0,
            pitch_offset_deg: 0.0,
            max_tilt_deg: Some(MAX_TILT_SERVO_DEG),
            actuators,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the actuator table into an allocator and initialises it.
    pub fn apply(
        &self,
        allocator: &mut dyn ActuatorAllocator,
    ) -> Result<FrameKind, AllocatorError> {
        allocator.set_roll_pitch_offset(self.roll_offset_deg, self.pitch_offset_deg);
        allocator.set_max_tilt_deg(self.max_tilt_deg);
        for actuator in &self.actuators {
            allocator.add_actuator(actuator.index, actuator.geometry)?;
        }
        allocator.init(self.actuators.len())
    }
}

/// Eight servos in slots 4..12, pitch and roll pairs for rotors 0..4.
fn tilt_servos(factor: f64) -> impl Iterator<Item = FrameActuator> {
    (0..4u8).flat_map(move |rotor| {
        let index = 4 + 2 * rotor as usize;
        let order = 5 + 2 * rotor;
        [
            FrameActuator {
                index,
                geometry: ActuatorGeometry::tilt_pitch(rotor, factor, order),
            },
            FrameActuator {
                index: index + 1,
                geometry: ActuatorGeometry::tilt_roll(rotor, factor, order + 1),
            },
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_from_count() {
        assert_eq!(FrameKind::from_count(4), FrameKind::Quadrotor);
        assert_eq!(FrameKind::from_count(12), FrameKind::Dodecarotor);
        assert_eq!(FrameKind::from_count(5), FrameKind::Generic);
    }

    #[test]
    fn test_six_dof_quad_layout() {
        let frame = FrameConfig::six_dof_quad();
        assert_eq!(frame.actuators.len(), 12);

        let motors: Vec<_> = frame
            .actuators
            .iter()
            .filter(|a| !a.geometry.kind.is_servo())
            .collect();
        assert_eq!(motors.len(), 4);
        let axes: [fn(&ActuatorGeometry) -> f64; 3] = [|g| g.roll, |g| g.pitch, |g| g.yaw];
        for axis in axes {
            let factors: Vec<f64> = motors.iter().map(|a| axis(&a.geometry)).collect();
            assert!(factors.iter().all(|f| f.abs() > 0.5), "{factors:?}");
            assert!(factors.iter().sum::<f64>().abs() < 1e-12);
        }

        assert_eq!(frame.actuators[4].geometry.kind, ActuatorKind::TiltPitch(0));
        assert_eq!(frame.actuators[11].geometry.kind, ActuatorKind::TiltRoll(3));
        assert_eq!(frame.actuators[11].geometry.test_order, 12);
    }

    #[test]
    fn test_indices_are_unique_and_in_range() {
        for frame in [FrameConfig::six_dof_quad(), FrameConfig::overactuated_x()] {
            let mut seen = [false; MAX_ACTUATORS];
            for a in &frame.actuators {
                assert!(a.index < MAX_ACTUATORS);
                assert!(!seen[a.index], "{} reuses slot {}", frame.name, a.index);
                seen[a.index] = true;
            }
        }
    }

    #[test]
    fn test_frame_from_json() {
        let json = r#"{
            "name": "tri",
            "actuators": [
                {"index": 0, "roll": -0.87, "pitch": 0.5, "throttle": 1.0, "test_order": 1},
                {"index": 1, "roll": 0.87, "pitch": 0.5, "throttle": 1.0, "test_order": 2},
                {"index": 2, "pitch": -1.0, "throttle": 1.0, "reversible": true, "test_order": 3}
            ]
        }"#;

        let frame = FrameConfig::from_json(json).unwrap();
        assert_eq!(frame.actuators.len(), 3);
        assert_eq!(frame.max_tilt_deg, None);
        assert!(frame.actuators[2].geometry.reversible);
        assert_eq!(frame.actuators[2].geometry.kind, ActuatorKind::Motor);
        assert_eq!(frame.actuators[0].geometry.yaw, 0.0);
    }

    #[test]
    fn test_frame_from_invalid_json() {
        assert!(matches!(
            FrameConfig::from_json("{\"name\": 3}"),
            Err(ConfigError::Parse(_))
        ));
    }
}
