use std::f64::consts::FRAC_PI_2;

use nalgebra::Vector3;

use super::{
    ActuatorAllocator, ActuatorCommand, ActuatorTable, AllocatorError, AllocatorInputs,
    AllocatorOutput,
};
use crate::geometry::{ActuatorKind, MAX_ACTUATORS};

/// Largest deadzone accepted for reversible motors.
pub const DEADZONE_MAX: f64 = 0.25;

/// Linear factor-table allocator for conventional and vectored-thrust frames.
///
/// Each tick the demand is layered onto the actuators in priority order:
/// 1. Upward thrust, rotated by the mounting offset
/// 2. Roll/pitch/yaw, scaled uniformly to fit the remaining range
/// 3. Forward/lateral, scaled uniformly to fit what is left
///
/// Uniform scaling keeps the relative authority between actuators instead of
/// clipping each one independently. Shared tilt servos follow the horizontal
/// thrust direction.
#[derive(Debug, Clone)]
pub struct MatrixAllocator {
    table: ActuatorTable,
    commands: [ActuatorCommand; MAX_ACTUATORS],
    deadzone: f64,
    pivot_pitch: f64,
    pivot_roll: f64,
    rpy_ratio: f64,
    horizontal_ratio: f64,
}

impl MatrixAllocator {
    pub fn new() -> Self {
        Self {
            table: ActuatorTable::default(),
            commands: [ActuatorCommand::default(); MAX_ACTUATORS],
            deadzone: 0.2,
            pivot_pitch: 0.0,
            pivot_roll: 0.0,
            rpy_ratio: 1.0,
            horizontal_ratio: 1.0,
        }
    }

    /// Sets the reversible-motor deadzone, clamped to 0..0.25.
    pub fn set_deadzone(&mut self, deadzone: f64) {
        self.deadzone = deadzone.clamp(0.0, DEADZONE_MAX);
    }

    pub fn deadzone(&self) -> f64 {
        self.deadzone
    }

    /// Scale applied to the roll/pitch/yaw term on the last tick.
    pub fn rpy_ratio(&self) -> f64 {
        self.rpy_ratio
    }

    /// Scale applied to the forward/lateral term on the last tick.
    pub fn horizontal_ratio(&self) -> f64 {
        self.horizontal_ratio
    }

    /// Shared servo angles (pitch, roll) [rad].
    pub fn pivot_angles(&self) -> (f64, f64) {
        (self.pivot_pitch, self.pivot_roll)
    }

    /// Adds `term` to the current thrusts, scaled by the largest common ratio
    /// (at most 1) that keeps every actuator inside -1..1.
    fn add_scaled(&mut self, term: &[f64; MAX_ACTUATORS]) -> f64 {
        let mut ratio: f64 = 1.0;
        for (i, _) in self.table.enabled() {
            let out = self.commands[i].thrust;
            let total = out + term[i];
            if total > 1.0 {
                ratio = ratio.min((1.0 - out) / term[i]);
            } else if total < -1.0 {
                ratio = ratio.min((-1.0 - out) / term[i]);
            }
        }

        for (i, _) in self.table.enabled() {
            self.commands[i].thrust = (self.commands[i].thrust + term[i] * ratio).clamp(-1.0, 1.0);
        }
        ratio
    }

    /// Stops reversible motors flipping direction for small commands.
    fn apply_deadzone(&mut self) {
        let deadzone = self.deadzone;
        for (i, geometry) in self.table.enabled() {
            if !geometry.reversible {
                continue;
            }
            let cmd = &mut self.commands[i];
            if cmd.thrust < 0.0 {
                if cmd.thrust > -deadzone && cmd.last_thrust > 0.0 {
                    cmd.thrust = 0.0;
                } else {
                    cmd.last_thrust = cmd.thrust;
                }
            } else if cmd.thrust > 0.0 {
                if cmd.thrust < deadzone && cmd.last_thrust < 0.0 {
                    cmd.thrust = 0.0;
                } else {
                    cmd.last_thrust = cmd.thrust;
                }
            }
        }
    }

    fn update_pivot(&mut self, horizontal: &Vector3<f64>) {
        let Some(max_tilt) = self.table.max_tilt else {
            return;
        };
        // The table field is public, so it may bypass set_max_tilt_deg
        let max_tilt = if max_tilt.is_nan() { FRAC_PI_2 } else { max_tilt.abs() };
        self.pivot_pitch = horizontal.x.clamp(-1.0, 1.0).asin().clamp(-max_tilt, max_tilt);
        self.pivot_roll = horizontal.y.clamp(-1.0, 1.0).asin().clamp(-max_tilt, max_tilt);
    }

    fn write_outputs(&mut self) {
        let spinning = self.table.spool.is_spinning();
        for (i, geometry) in self.table.enabled() {
            let cmd = &mut self.commands[i];
            match geometry.kind {
                ActuatorKind::Motor => {
                    cmd.angle = 0.0;
                    cmd.output = if spinning {
                        self.table.spin.thrust_to_output(cmd.thrust, geometry.reversible)
                    } else {
                        0.0
                    };
                }
                ActuatorKind::TiltPitch(_) | ActuatorKind::TiltRoll(_) => {
                    let pivot = if matches!(geometry.kind, ActuatorKind::TiltPitch(_)) {
                        self.pivot_pitch
                    } else {
                        self.pivot_roll
                    };
                    cmd.angle = if spinning { pivot } else { 0.0 };
                    cmd.output = cmd.angle;
                }
            }
        }
    }
}

impl Default for MatrixAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorAllocator for MatrixAllocator {
    fn table(&self) -> &ActuatorTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut ActuatorTable {
        &mut self.table
    }

    fn output(&mut self, inputs: &AllocatorInputs) -> Result<AllocatorOutput, AllocatorError> {
        self.table.begin_tick()?;
        let demand = self.table.compensated_demand(inputs);
        let rot = self.table.mounting_rotation();

        // Upward thrust
        let up = rot * Vector3::new(0.0, 0.0, demand.throttle);
        let mut upper = false;
        for (i, g) in self.table.enabled() {
            let out = up.x * g.forward + up.y * g.lateral + up.z * g.throttle;
            if out.abs() >= 1.0 {
                upper = true;
            }
            self.commands[i].thrust = out.clamp(-1.0, 1.0);
        }
        if upper {
            self.table.limit.throttle_upper = true;
        }

        // Roll, pitch and yaw
        let mut term = [0.0; MAX_ACTUATORS];
        for (i, g) in self.table.enabled() {
            term[i] = demand.rpy.x * g.roll + demand.rpy.y * g.pitch + demand.rpy.z * g.yaw;
        }
        self.rpy_ratio = self.add_scaled(&term);
        if self.rpy_ratio < 1.0 {
            self.table.limit.set_rpy();
        }

        // Forward and lateral
        let horizontal = rot * Vector3::new(demand.forward, demand.lateral, 0.0);
        let mut term = [0.0; MAX_ACTUATORS];
        for (i, g) in self.table.enabled() {
            term[i] =
                horizontal.x * g.forward + horizontal.y * g.lateral + horizontal.z * g.throttle;
        }
        self.update_pivot(&horizontal);
        self.horizontal_ratio = self.add_scaled(&term);

        self.apply_deadzone();
        self.write_outputs();

        let mut commands = [None; MAX_ACTUATORS];
        for (i, _) in self.table.enabled() {
            commands[i] = Some(self.commands[i]);
        }
        Ok(AllocatorOutput {
            commands,
            limit: self.table.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{LimitFlags, SpoolState};
    use crate::geometry::{ActuatorGeometry, FrameConfig};
    use approx::assert_relative_eq;

    fn quad_x() -> MatrixAllocator {
        let mut alloc = MatrixAllocator::new();
        let motors = [
            (-0.5, 0.5, 0.5),
            (0.5, -0.5, 0.5),
            (0.5, 0.5, -0.5),
            (-0.5, -0.5, -0.5),
        ];
        for (i, &(roll, pitch, yaw)) in motors.iter().enumerate() {
            alloc
                .add_actuator(i, ActuatorGeometry::motor(roll, pitch, yaw, 1.0, i as u8 + 1))
                .unwrap();
        }
        alloc.init(4).unwrap();
        alloc.set_spool_state(SpoolState::ThrottleUnlimited);
        alloc
    }

    fn thrusts(out: &AllocatorOutput) -> Vec<f64> {
        out.commands.iter().flatten().map(|c| c.thrust).collect()
    }

    #[test]
    fn test_output_before_init() {
        let mut alloc = MatrixAllocator::new();
        alloc.add_actuator(0, ActuatorGeometry::motor(0.0, 0.0, 0.0, 1.0, 1)).unwrap();
        assert_eq!(
            alloc.output(&AllocatorInputs::default()),
            Err(AllocatorError::NotInitialised)
        );
    }

    #[test]
    fn test_count_mismatch_and_lock() {
        let mut alloc = MatrixAllocator::new();
        alloc.add_actuator(0, ActuatorGeometry::default()).unwrap();
        assert!(alloc.init(4).is_err());
        assert!(!alloc.is_initialised());

        let mut alloc = quad_x();
        assert_eq!(
            alloc.add_actuator(5, ActuatorGeometry::default()),
            Err(AllocatorError::Locked)
        );
    }

    #[test]
    fn test_hover_throttle_is_shared_evenly() {
        let mut alloc = quad_x();
        let out = alloc
            .output(&AllocatorInputs {
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();

        for t in thrusts(&out) {
            assert_relative_eq!(t, 0.5);
        }
        assert_eq!(out.limit, LimitFlags::default());
    }

    #[test]
    fn test_throttle_above_one_is_clamped_and_flagged() {
        let mut alloc = quad_x();
        let out = alloc
            .output(&AllocatorInputs {
                throttle: 1.2,
                ..Default::default()
            })
            .unwrap();

        for t in thrusts(&out) {
            assert_relative_eq!(t, 1.0);
        }
        assert!(out.limit.throttle_upper);
        assert!(!out.limit.throttle_lower);
    }

    #[test]
    fn test_zero_throttle_flags_lower() {
        let mut alloc = quad_x();
        let out = alloc.output(&AllocatorInputs::default()).unwrap();
        assert!(out.limit.throttle_lower);
    }

    #[test]
    fn test_rpy_ratio_is_minimum_over_saturating_actuators() {
        let mut alloc = quad_x();
        let inputs = AllocatorInputs {
            roll: 2.0,
            pitch: 0.8,
            throttle: 0.3,
            ..Default::default()
        };
        let out = alloc.output(&inputs).unwrap();

        // Terms: m0 = -0.6, m1 = 0.6, m2 = 1.4, m3 = -1.4
        // m2 fits at (1 - 0.3)/1.4 = 0.5, m3 at (-1 - 0.3)/-1.4; the smaller wins
        assert_relative_eq!(alloc.rpy_ratio(), 0.5, epsilon = 1e-12);
        assert!(out.limit.roll && out.limit.pitch && out.limit.yaw);

        let t = thrusts(&out);
        assert_relative_eq!(t[2], 1.0, epsilon = 1e-12);
        assert_relative_eq!(t[3], -0.4, epsilon = 1e-12);
        assert_relative_eq!(t[0], 0.0, epsilon = 1e-12);
        // Relative authority survives the scaling
        assert_relative_eq!((t[2] - 0.3) / (t[1] - 0.3), 1.4 / 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_outputs_never_leave_unit_range() {
        let mut alloc = quad_x();
        for k in 0..50 {
            let x = k as f64 / 10.0 - 2.5;
            let out = alloc
                .output(&AllocatorInputs {
                    roll: 3.0 * x,
                    pitch: -2.0 * x,
                    yaw: x,
                    throttle: 0.1 * k as f64 / 5.0,
                    ..Default::default()
                })
                .unwrap();
            assert!(alloc.rpy_ratio() <= 1.0);
            for t in thrusts(&out) {
                assert!((-1.0..=1.0).contains(&t), "thrust {t} out of range");
            }
        }
    }

    #[test]
    fn test_feedforward_is_added_to_rotation() {
        let mut alloc = quad_x();
        let with_ff = alloc
            .output(&AllocatorInputs {
                roll: 0.1,
                roll_ff: 0.1,
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        let without_ff = alloc
            .output(&AllocatorInputs {
                roll: 0.2,
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(thrusts(&with_ff), thrusts(&without_ff));
    }

    #[test]
    fn test_reversible_deadzone_hysteresis() {
        // Forward factor only, so negative demand reaches the motor
        let mut alloc_fwd = MatrixAllocator::new();
        let mut geometry = ActuatorGeometry::motor(0.0, 0.0, 0.0, 0.0, 1).reversible();
        geometry.forward = 1.0;
        alloc_fwd.add_actuator(0, geometry).unwrap();
        alloc_fwd.init(1).unwrap();
        alloc_fwd.set_spool_state(SpoolState::ThrottleUnlimited);

        let demand = |forward: f64| AllocatorInputs {
            throttle: 1.0,
            forward,
            ..Default::default()
        };

        let out = alloc_fwd.output(&demand(0.5)).unwrap();
        assert_relative_eq!(out.commands[0].unwrap().thrust, 0.5);

        let out = alloc_fwd.output(&demand(-0.01)).unwrap();
        assert_eq!(out.commands[0].unwrap().thrust, 0.0);

        let out = alloc_fwd.output(&demand(-0.1)).unwrap();
        assert_eq!(out.commands[0].unwrap().thrust, 0.0);

        let out = alloc_fwd.output(&demand(-0.3)).unwrap();
        assert_relative_eq!(out.commands[0].unwrap().thrust, -0.3);
        assert_relative_eq!(out.commands[0].unwrap().last_thrust, -0.3);

        // Now a small positive command is suppressed instead
        let out = alloc_fwd.output(&demand(0.05)).unwrap();
        assert_eq!(out.commands[0].unwrap().thrust, 0.0);
    }

    #[test]
    fn test_deadzone_is_clamped() {
        let mut alloc = MatrixAllocator::new();
        alloc.set_deadzone(0.8);
        assert_eq!(alloc.deadzone(), DEADZONE_MAX);
        alloc.set_deadzone(-1.0);
        assert_eq!(alloc.deadzone(), 0.0);
    }

    #[test]
    fn test_shut_down_outputs_nothing_and_limits_everything() {
        let mut alloc = quad_x();
        alloc.set_spool_state(SpoolState::ShutDown);
        let out = alloc
            .output(&AllocatorInputs {
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        for cmd in out.commands.iter().flatten() {
            assert_eq!(cmd.output, 0.0);
        }
        assert_eq!(out.limit, LimitFlags::all());
    }

    #[test]
    fn test_spinning_maps_thrust_to_spin_range() {
        let mut alloc = quad_x();
        let out = alloc
            .output(&AllocatorInputs {
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        let expected = 0.15 + 0.8 * 0.5;
        for cmd in out.commands.iter().flatten() {
            assert_relative_eq!(cmd.output, expected);
        }
    }

    #[test]
    fn test_six_dof_quad_pivot_follows_horizontal_demand() {
        let mut alloc = MatrixAllocator::new();
        let frame = FrameConfig::six_dof_quad();
        assert!(frame.apply(&mut alloc).is_ok());
        alloc.set_spool_state(SpoolState::ThrottleUnlimited);

        let out = alloc
            .output(&AllocatorInputs {
                throttle: 0.5,
                forward: 0.4,
                lateral: -2.0,
                ..Default::default()
            })
            .unwrap();

        let (pitch, roll) = alloc.pivot_angles();
        assert_relative_eq!(pitch, 0.2f64.asin(), epsilon = 1e-12);
        // Lateral demand -1.0 after throttle scaling hits the servo limit
        assert_relative_eq!(roll, -45f64.to_radians(), epsilon = 1e-12);

        assert_relative_eq!(out.commands[4].unwrap().angle, pitch);
        assert_relative_eq!(out.commands[5].unwrap().angle, roll);
        assert_eq!(alloc.output_test_seq(5), Some(4));
    }

    #[test]
    fn test_six_dof_quad_mixes_roll_and_pitch() {
        let mut alloc = MatrixAllocator::new();
        FrameConfig::six_dof_quad().apply(&mut alloc).unwrap();
        alloc.set_spool_state(SpoolState::ThrottleUnlimited);

        let motors = |out: &AllocatorOutput| -> Vec<f64> {
            (0..4).map(|i| out.commands[i].unwrap().thrust).collect()
        };
        let level = alloc
            .output(&AllocatorInputs {
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(motors(&level), vec![0.5; 4]);

        let out = alloc
            .output(&AllocatorInputs {
                roll: 0.2,
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        let t = motors(&out);
        assert_relative_eq!(t[1] - t[0], 2.0 * 0.71 * 0.2, epsilon = 1e-12);
        assert_relative_eq!(t[2] - t[3], 2.0 * 0.71 * 0.2, epsilon = 1e-12);

        let out = alloc
            .output(&AllocatorInputs {
                pitch: 0.2,
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        let t = motors(&out);
        assert_relative_eq!(t[0] - t[3], 2.0 * 0.71 * 0.2, epsilon = 1e-12);
        assert_relative_eq!(t[1] - t[2], 2.0 * 0.71 * 0.2, epsilon = 1e-12);
        assert_eq!(out.limit, LimitFlags::default());

        // Large combined demand saturates and is reported
        let out = alloc
            .output(&AllocatorInputs {
                roll: 0.4,
                pitch: 0.4,
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        assert!(out.limit.roll && out.limit.pitch);
    }

    #[test]
    fn test_negative_tilt_limit_uses_magnitude() {
        let mut frame = FrameConfig::six_dof_quad();
        frame.max_tilt_deg = Some(-45.0);
        let frame = FrameConfig::from_json(&frame.to_json().unwrap()).unwrap();

        let mut alloc = MatrixAllocator::new();
        frame.apply(&mut alloc).unwrap();
        alloc.set_spool_state(SpoolState::ThrottleUnlimited);

        alloc
            .output(&AllocatorInputs {
                throttle: 0.5,
                forward: 0.2,
                lateral: -2.0,
                ..Default::default()
            })
            .unwrap();
        let (pitch, roll) = alloc.pivot_angles();
        assert_relative_eq!(pitch, 0.1f64.asin(), epsilon = 1e-12);
        assert_relative_eq!(roll, -45f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn test_non_finite_tilt_limit_does_not_stop_output() {
        let mut alloc = MatrixAllocator::new();
        FrameConfig::six_dof_quad().apply(&mut alloc).unwrap();
        alloc.set_spool_state(SpoolState::ThrottleUnlimited);
        let inputs = AllocatorInputs {
            throttle: 0.5,
            lateral: -2.0,
            ..Default::default()
        };

        alloc.set_max_tilt_deg(Some(f64::NAN));
        assert_eq!(alloc.table().max_tilt, None);
        assert!(alloc.output(&inputs).is_ok());

        alloc.table_mut().max_tilt = Some(f64::NAN);
        assert!(alloc.output(&inputs).is_ok());
        assert_relative_eq!(alloc.pivot_angles().1, -FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_mounting_offset_tilts_thrust() {
        let mut alloc = MatrixAllocator::new();
        let mut geometry = ActuatorGeometry::motor(0.0, 0.0, 0.0, 1.0, 1);
        geometry.forward = 1.0;
        alloc.add_actuator(0, geometry).unwrap();
        alloc.init(1).unwrap();
        alloc.set_roll_pitch_offset(0.0, 30.0);

        let out = alloc
            .output(&AllocatorInputs {
                throttle: 0.5,
                ..Default::default()
            })
            .unwrap();
        let (s, c) = 30f64.to_radians().sin_cos();
        assert_relative_eq!(out.commands[0].unwrap().thrust, 0.5 * (s + c), epsilon = 1e-12);
    }
}
