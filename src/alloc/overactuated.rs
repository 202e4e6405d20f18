use std::f64::consts::{FRAC_1_SQRT_2, PI};

use nalgebra::{SMatrix, SVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use super::{
    remainder, ActuatorAllocator, ActuatorCommand, ActuatorTable, AllocatorError, AllocatorInputs,
    AllocatorOutput,
};
use crate::geometry::{ActuatorKind, FrameKind, MAX_ACTUATORS};

/// Number of tiltable rotors on the frame.
pub const ROTORS: usize = 4;

/// Wrench (forward, lateral, up, roll, pitch, yaw) to per-rotor effort table.
pub type AllocationMatrix = SMatrix<f64, 6, 12>;
pub type Effort = SVector<f64, 12>;

/// Physical constants and tuning of the overactuated frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OveractuatedParams {
    /// Rotor thrust coefficient μ [N/(rad/s)²]
    pub thrust_coefficient: f64,
    /// Rotor drag torque coefficient κ [Nm/(rad/s)²]
    pub drag_coefficient: f64,
    /// Center to rotor distance [m]
    pub arm_length: f64,
    /// Rotor speed giving full motor output [rad/s]
    pub speed_scale: f64,
    /// Servo angle smoothing factor per tick
    pub smoothing: f64,
    /// Below this vertical effort the tilt angles are held
    pub min_vertical_effort: f64,
}

impl Default for OveractuatedParams {
    fn default() -> Self {
        Self {
            thrust_coefficient: 1.6e-6,
            drag_coefficient: 2.58e-8,
            arm_length: 0.16,
            speed_scale: 15000.0,
            smoothing: 0.1,
            min_vertical_effort: 1.0,
        }
    }
}

impl OveractuatedParams {
    /// Effectiveness matrix C: wrench = C · effort.
    ///
    /// Effort for rotor k is (3k, 3k+1, 3k+2) = thrust vector components, in
    /// units of speed squared.
    pub fn effectiveness(&self) -> AllocationMatrix {
        let mu = self.thrust_coefficient;
        let km = self.drag_coefficient;
        let cl = FRAC_1_SQRT_2 * self.arm_length * mu;

        #[rustfmt::skip]
        let c = AllocationMatrix::from_row_slice(&[
            mu,  0.0, 0.0, -mu, 0.0, 0.0, mu,  0.0, 0.0, -mu, 0.0, 0.0,
            0.0, -mu, 0.0, 0.0, mu,  0.0, 0.0, -mu, 0.0, 0.0, mu,  0.0,
            0.0, 0.0, mu,  0.0, 0.0, -mu, 0.0, 0.0, mu,  0.0, 0.0, -mu,
            -km, 0.0, cl,  -km, 0.0, -cl, -km, 0.0, -cl, -km, 0.0, cl,
            km,  0.0, -cl, km,  0.0, -cl, km,  0.0, cl,  km,  0.0, cl,
            -cl, -cl, -km, cl,  -cl, -km, cl,  cl,  -km, -cl, cl,  -km,
        ]);
        c
    }

    /// Allocation table M = pinv(C)ᵀ, so that effort = Mᵀ · wrench.
    pub fn allocation_matrix(&self) -> Result<AllocationMatrix, AllocatorError> {
        let c = self.effectiveness();
        let gram_inv = (c * c.transpose())
            .try_inverse()
            .ok_or(AllocatorError::SingularEffectiveness)?;
        // pinv(C) = Cᵀ(CCᵀ)⁻¹ and CCᵀ is symmetric
        Ok(gram_inv * c)
    }
}

/// Pseudo-inverse allocator for four rotors on independent pitch/roll tilt servos.
///
/// The wrench is mapped to a 12-element effort vector, three components per
/// rotor. Rotor speed comes from the vertical component (thrust ∝ speed²), tilt
/// angles from the horizontal to vertical ratios. Angles are 0 for a vertical
/// rotor and are smoothed against the previous tick.
#[derive(Debug, Clone)]
pub struct OveractuatedAllocator {
    table: ActuatorTable,
    params: OveractuatedParams,
    matrix: AllocationMatrix,
    effort: Effort,
    speeds: [f64; ROTORS],
    pitch: [Option<f64>; ROTORS],
    roll: [Option<f64>; ROTORS],
    motor_slots: [usize; ROTORS],
    commands: [ActuatorCommand; MAX_ACTUATORS],
}

impl OveractuatedAllocator {
    /// Builds the allocator, deriving the table from the frame constants.
    pub fn new(params: OveractuatedParams) -> Result<Self, AllocatorError> {
        let matrix = params.allocation_matrix()?;
        Ok(Self::with_matrix(params, matrix))
    }

    /// Builds the allocator from a precomputed table.
    pub fn with_matrix(params: OveractuatedParams, matrix: AllocationMatrix) -> Self {
        Self {
            table: ActuatorTable::default(),
            params,
            matrix,
            effort: Effort::zeros(),
            speeds: [0.0; ROTORS],
            pitch: [None; ROTORS],
            roll: [None; ROTORS],
            motor_slots: [0, 1, 2, 3],
            commands: [ActuatorCommand::default(); MAX_ACTUATORS],
        }
    }

    pub fn matrix(&self) -> &AllocationMatrix {
        &self.matrix
    }

    pub fn params(&self) -> &OveractuatedParams {
        &self.params
    }

    /// Effort vector of the last tick.
    pub fn effort(&self) -> &Effort {
        &self.effort
    }

    /// Normalised rotor speeds of the last tick.
    pub fn rotor_speeds(&self) -> [f64; ROTORS] {
        self.speeds
    }

    /// Tilt angle (pitch, roll) of rotor `k` [rad], 0 until a valid angle was computed.
    pub fn tilt(&self, rotor: usize) -> (f64, f64) {
        (
            self.pitch.get(rotor).copied().flatten().unwrap_or(0.0),
            self.roll.get(rotor).copied().flatten().unwrap_or(0.0),
        )
    }

    /// Forgets the smoothed angles, the next valid tick uses raw angles.
    pub fn reset_angles(&mut self) {
        self.pitch = [None; ROTORS];
        self.roll = [None; ROTORS];
    }

    fn update_rotor(&mut self, k: usize) {
        let vertical = self.effort[3 * k + 2];
        self.speeds[k] = (vertical.abs().sqrt() / self.params.speed_scale).clamp(0.0, 1.0);

        if vertical.abs() < self.params.min_vertical_effort {
            // Angle undefined without vertical thrust, hold
            return;
        }

        let alpha = self.params.smoothing;
        let raw_pitch = remainder(self.effort[3 * k] / vertical, PI);
        let raw_roll = remainder(self.effort[3 * k + 1] / vertical, PI);
        self.pitch[k] = Some(smooth(self.pitch[k], raw_pitch, alpha));
        self.roll[k] = Some(smooth(self.roll[k], raw_roll, alpha));
    }

    fn write_outputs(&mut self) {
        let spinning = self.table.spool.is_spinning();
        for (k, &slot) in self.motor_slots.iter().enumerate() {
            let reversible = self.table.get(slot).is_some_and(|g| g.reversible);
            let cmd = &mut self.commands[slot];
            cmd.thrust = self.speeds[k];
            cmd.output = if spinning {
                self.table.spin.thrust_to_output(cmd.thrust, reversible)
            } else {
                0.0
            };
        }

        for (i, geometry) in self.table.enabled() {
            let angle = match geometry.kind {
                ActuatorKind::Motor => continue,
                ActuatorKind::TiltPitch(r) => self.pitch[r as usize],
                ActuatorKind::TiltRoll(r) => self.roll[r as usize],
            };
            let cmd = &mut self.commands[i];
            cmd.angle = if spinning { angle.unwrap_or(0.0) } else { 0.0 };
            cmd.output = cmd.angle;
        }
    }
}

fn smooth(previous: Option<f64>, raw: f64, alpha: f64) -> f64 {
    match previous {
        Some(prev) => prev + alpha * (raw - prev),
        None => raw,
    }
}

impl ActuatorAllocator for OveractuatedAllocator {
    fn table(&self) -> &ActuatorTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut ActuatorTable {
        &mut self.table
    }

    /// Checks the layout (four motors, servos on rotors 0..4) before locking.
    fn init(&mut self, expected: usize) -> Result<FrameKind, AllocatorError> {
        let motors: Vec<usize> = self
            .table
            .enabled()
            .filter(|(_, g)| g.kind == ActuatorKind::Motor)
            .map(|(i, _)| i)
            .collect();
        if motors.len() != ROTORS {
            return Err(AllocatorError::UnsupportedLayout("exactly four motors required"));
        }
        let bad_servo = self.table.enabled().any(|(_, g)| match g.kind {
            ActuatorKind::TiltPitch(r) | ActuatorKind::TiltRoll(r) => r as usize >= ROTORS,
            ActuatorKind::Motor => false,
        });
        if bad_servo {
            return Err(AllocatorError::UnsupportedLayout("tilt servo refers to a missing rotor"));
        }

        self.motor_slots.copy_from_slice(&motors);
        self.table.init(expected)
    }

    fn output(&mut self, inputs: &AllocatorInputs) -> Result<AllocatorOutput, AllocatorError> {
        self.table.begin_tick()?;
        let demand = self.table.compensated_demand(inputs);

        let thrust = self.table.mounting_rotation()
            * Vector3::new(demand.forward, demand.lateral, demand.throttle);
        let wrench = Vector6::new(
            thrust.x,
            thrust.y,
            thrust.z,
            demand.rpy.x,
            demand.rpy.y,
            demand.rpy.z,
        );
        self.effort = self.matrix.transpose() * wrench;

        for k in 0..ROTORS {
            self.update_rotor(k);
        }
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
    use crate::alloc::SpoolState;
    use crate::geometry::FrameConfig;
    use approx::assert_relative_eq;

    #[rustfmt::skip]
    const REFERENCE_TABLE: [f64; 72] = [
        156250.0, 0.0, 0.0, -156250.0, 0.0, 0.0, 156250.0, 0.0, 0.0, -156250.0, 0.0, 0.0,
        0.0, -156250.0, 0.0, 0.0, 156250.0, 0.0, 0.0, -156250.0, 0.0, 0.0, 156250.0, 0.0,
        0.0, 0.0, 156250.0, 0.0, 0.0, -156250.0, 0.0, 0.0, 156250.0, 0.0, 0.0, -156250.0,
        -189153.55, 0.0, 1327149.25, -189153.55, 0.0, -1381067.93,
        -189153.55, 0.0, -1327149.25, -189153.55, 0.0, 1381067.93,
        189153.55, 0.0, -1327149.25, 189153.55, 0.0, -1381067.93,
        189153.55, 0.0, 1327149.25, 189153.55, 0.0, 1381067.93,
        -683590.83, -683590.83, -97429.61, 683590.83, -683590.83, -97429.61,
        683590.83, 683590.83, -97429.61, -683590.83, 683590.83, -97429.61,
    ];

    fn armed() -> OveractuatedAllocator {
        let mut alloc = OveractuatedAllocator::new(OveractuatedParams::default()).unwrap();
        FrameConfig::overactuated_x().apply(&mut alloc).unwrap();
        alloc.set_spool_state(SpoolState::ThrottleUnlimited);
        alloc
    }

    fn hover(forward: f64) -> AllocatorInputs {
        AllocatorInputs {
            throttle: 0.5,
            forward,
            ..Default::default()
        }
    }

    #[test]
    fn test_derived_table_matches_reference() {
        let computed = OveractuatedParams::default().allocation_matrix().unwrap();
        let reference = AllocationMatrix::from_row_slice(&REFERENCE_TABLE);
        assert_relative_eq!(computed, reference, epsilon = 1e-2, max_relative = 1e-6);
    }

    #[test]
    fn test_table_is_right_inverse() {
        let params = OveractuatedParams::default();
        let c = params.effectiveness();
        let m = params.allocation_matrix().unwrap();
        // C · pinv(C) = I for a full row-rank C
        let product = c * m.transpose();
        assert_relative_eq!(product, SMatrix::<f64, 6, 6>::identity(), epsilon = 1e-8);
    }

    #[test]
    fn test_singular_effectiveness_is_rejected() {
        let params = OveractuatedParams {
            thrust_coefficient: 0.0,
            drag_coefficient: 0.0,
            ..Default::default()
        };
        assert_eq!(
            OveractuatedAllocator::new(params).err(),
            Some(AllocatorError::SingularEffectiveness)
        );
    }

    #[test]
    fn test_pure_throttle_spins_rotors_evenly_upright() {
        let mut alloc = armed();
        let out = alloc.output(&hover(0.0)).unwrap();

        let expected = 78125f64.sqrt() / 15000.0;
        for (k, speed) in alloc.rotor_speeds().iter().enumerate() {
            assert_relative_eq!(*speed, expected, epsilon = 1e-6);
            let (pitch, roll) = alloc.tilt(k);
            assert_relative_eq!(pitch, 0.0, epsilon = 1e-9);
            assert_relative_eq!(roll, 0.0, epsilon = 1e-9);
        }
        assert_relative_eq!(out.commands[0].unwrap().thrust, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_forward_demand_tilts_and_smooths() {
        let mut alloc = armed();

        // forward 0.2 * throttle 0.5 = 0.1 against 0.5 vertical
        alloc.output(&hover(0.2)).unwrap();
        for k in 0..ROTORS {
            assert_relative_eq!(alloc.tilt(k).0, 0.2, epsilon = 1e-9);
        }

        let out = alloc.output(&hover(0.0)).unwrap();
        for k in 0..ROTORS {
            assert_relative_eq!(alloc.tilt(k).0, 0.18, epsilon = 1e-9);
            assert_relative_eq!(alloc.tilt(k).1, 0.0, epsilon = 1e-9);
        }
        // Pitch servo of rotor 0 sits in slot 4
        assert_relative_eq!(out.commands[4].unwrap().angle, 0.18, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_wrench_keeps_angles_and_stops_rotors() {
        let mut alloc = armed();
        alloc.output(&hover(0.2)).unwrap();
        let before: Vec<_> = (0..ROTORS).map(|k| alloc.tilt(k)).collect();

        alloc.output(&AllocatorInputs::default()).unwrap();

        assert_eq!(alloc.rotor_speeds(), [0.0; ROTORS]);
        let after: Vec<_> = (0..ROTORS).map(|k| alloc.tilt(k)).collect();
        assert_eq!(before, after);
        for (pitch, roll) in after {
            assert!(pitch.is_finite() && roll.is_finite());
        }
    }

    #[test]
    fn test_zero_wrench_from_rest_is_neutral() {
        let mut alloc = armed();
        let out = alloc.output(&AllocatorInputs::default()).unwrap();
        for cmd in out.commands.iter().flatten() {
            assert_eq!(cmd.thrust, 0.0);
            assert_eq!(cmd.angle, 0.0);
        }
        assert!(out.limit.throttle_lower);
    }

    #[test]
    fn test_rejects_wrong_layout() {
        let mut alloc = OveractuatedAllocator::new(OveractuatedParams::default()).unwrap();
        let mut frame = FrameConfig::overactuated_x();
        frame.actuators.remove(0);
        assert!(matches!(
            frame.apply(&mut alloc),
            Err(AllocatorError::UnsupportedLayout(_))
        ));
        assert!(!alloc.is_initialised());
    }

    #[test]
    fn test_shut_down_holds_servos_neutral() {
        let mut alloc = armed();
        alloc.set_spool_state(SpoolState::GroundIdle);
        let out = alloc.output(&hover(0.2)).unwrap();
        for cmd in out.commands.iter().flatten() {
            assert_eq!(cmd.output, 0.0);
        }
        // Smoothing state still tracks the demand
        assert_relative_eq!(alloc.tilt(0).0, 0.2, epsilon = 1e-9);
    }
}
