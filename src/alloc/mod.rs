//! Actuator allocation
//!
//! Maps the commanded roll/pitch/yaw/throttle/forward/lateral demand onto
//! individual motor thrusts and servo angles.
//!
//! Two strategies are provided:
//! - [`MatrixAllocator`]: linear factor table with uniform saturation scaling
//! - [`OveractuatedAllocator`]: closed-form pseudo-inverse for the 4-rotor, 8-servo frame

mod matrix;
mod overactuated;

pub use matrix::MatrixAllocator;
pub use overactuated::{AllocationMatrix, OveractuatedAllocator, OveractuatedParams};

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{ActuatorGeometry, FrameKind, MAX_ACTUATORS};

/// Allocator setup and lifecycle errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocatorError {
    #[error("actuator table is locked after init")]
    Locked,
    #[error("actuator index {0} out of range (max {MAX_ACTUATORS})")]
    IndexOutOfRange(usize),
    #[error("expected {expected} actuators, found {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("allocator used before init")]
    NotInitialised,
    #[error("frame layout not supported: {0}")]
    UnsupportedLayout(&'static str),
    #[error("effectiveness matrix is singular")]
    SingularEffectiveness,
}

/// Demand handed to the allocator each tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AllocatorInputs {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll_ff: f64,
    pub pitch_ff: f64,
    pub yaw_ff: f64,
    /// Collective throttle, 0..1
    pub throttle: f64,
    pub forward: f64,
    pub lateral: f64,
}

/// Saturation flags reported back to the rate loop and outer controllers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitFlags {
    pub roll: bool,
    pub pitch: bool,
    pub yaw: bool,
    pub throttle_lower: bool,
    pub throttle_upper: bool,
}

impl LimitFlags {
    pub fn all() -> Self {
        Self {
            roll: true,
            pitch: true,
            yaw: true,
            throttle_lower: true,
            throttle_upper: true,
        }
    }

    pub fn set_rpy(&mut self) {
        self.roll = true;
        self.pitch = true;
        self.yaw = true;
    }
}

/// Motor spool state, set by the vehicle arming logic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpoolState {
    #[default]
    ShutDown,
    GroundIdle,
    SpoolingUp,
    ThrottleUnlimited,
    SpoolingDown,
}

impl SpoolState {
    /// Motors may be commanded from the mixer output.
    pub fn is_spinning(&self) -> bool {
        matches!(
            self,
            SpoolState::SpoolingUp | SpoolState::ThrottleUnlimited | SpoolState::SpoolingDown
        )
    }
}

/// Command for one actuator slot
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActuatorCommand {
    /// Mixer thrust, -1..1 for reversible motors, 0..1 otherwise
    pub thrust: f64,
    /// Hardware-facing value: spool-mapped thrust for motors, tilt angle [rad] for servos
    pub output: f64,
    /// Tilt angle [rad]
    pub angle: f64,
    /// Last thrust not suppressed by the deadzone
    pub last_thrust: f64,
}

/// Result of one allocation tick
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatorOutput {
    /// Per-slot command, `None` for unused slots
    pub commands: [Option<ActuatorCommand>; MAX_ACTUATORS],
    pub limit: LimitFlags,
}

impl AllocatorOutput {
    pub fn command(&self, index: usize) -> Option<&ActuatorCommand> {
        self.commands.get(index).and_then(|c| c.as_ref())
    }
}

/// Motor output range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinRange {
    /// Lowest output of a spinning non-reversible motor
    pub spin_min: f64,
    pub spin_max: f64,
}

impl Default for SpinRange {
    fn default() -> Self {
        Self {
            spin_min: 0.15,
            spin_max: 0.95,
        }
    }
}

impl SpinRange {
    /// Converts a mixer thrust to the motor output.
    pub fn thrust_to_output(&self, thrust: f64, reversible: bool) -> f64 {
        if reversible {
            thrust.clamp(-1.0, 1.0) * self.spin_max
        } else {
            self.spin_min + (self.spin_max - self.spin_min) * thrust.clamp(0.0, 1.0)
        }
    }
}

/// Common allocator interface.
///
/// An allocator is configured with [`add_actuator`](Self::add_actuator), then
/// locked with [`init`](Self::init). Only `output` runs per tick.
pub trait ActuatorAllocator {
    fn table(&self) -> &ActuatorTable;

    fn table_mut(&mut self) -> &mut ActuatorTable;

    /// Runs one allocation tick.
    fn output(&mut self, inputs: &AllocatorInputs) -> Result<AllocatorOutput, AllocatorError>;

    fn add_actuator(
        &mut self,
        index: usize,
        geometry: ActuatorGeometry,
    ) -> Result<(), AllocatorError> {
        self.table_mut().add(index, geometry)
    }

    fn init(&mut self, expected: usize) -> Result<FrameKind, AllocatorError> {
        self.table_mut().init(expected)
    }

    fn is_initialised(&self) -> bool {
        self.table().is_initialised()
    }

    fn set_spool_state(&mut self, state: SpoolState) {
        self.table_mut().spool = state;
    }

    fn spool_state(&self) -> SpoolState {
        self.table().spool
    }

    /// Sets the thrust-frame mounting offset [deg].
    fn set_roll_pitch_offset(&mut self, roll_deg: f64, pitch_deg: f64) {
        let table = self.table_mut();
        table.roll_offset = roll_deg.to_radians();
        table.pitch_offset = pitch_deg.to_radians();
    }

    /// Sets the shared tilt-servo limit [deg]. The sign is ignored and a
    /// non-finite limit removes it.
    fn set_max_tilt_deg(&mut self, max_tilt_deg: Option<f64>) {
        let max_tilt = match max_tilt_deg {
            Some(deg) if deg.is_finite() => Some(deg.abs().to_radians()),
            Some(deg) => {
                tracing::warn!(max_tilt_deg = deg, "ignoring non-finite tilt limit");
                None
            }
            None => None,
        };
        self.table_mut().max_tilt = max_tilt;
    }

    fn set_compensation_gain(&mut self, gain: f64) {
        self.table_mut().compensation_gain = gain;
    }

    fn limit(&self) -> LimitFlags {
        self.table().limit
    }

    /// Slot driven by a motor-order test step, if any.
    fn output_test_seq(&self, seq: u8) -> Option<usize> {
        self.table().test_seq(seq)
    }
}

/// Actuator table and state shared by every allocator
#[derive(Debug, Clone)]
pub struct ActuatorTable {
    slots: [Option<ActuatorGeometry>; MAX_ACTUATORS],
    initialised: bool,
    frame_kind: FrameKind,
    pub spool: SpoolState,
    pub spin: SpinRange,
    /// Voltage/altitude compensation applied to the demand
    pub compensation_gain: f64,
    pub roll_offset: f64,
    pub pitch_offset: f64,
    /// Shared tilt-servo limit [rad]
    pub max_tilt: Option<f64>,
    pub limit: LimitFlags,
}

impl Default for ActuatorTable {
    fn default() -> Self {
        Self {
            slots: [None; MAX_ACTUATORS],
            initialised: false,
            frame_kind: FrameKind::Generic,
            spool: SpoolState::default(),
            spin: SpinRange::default(),
            compensation_gain: 1.0,
            roll_offset: 0.0,
            pitch_offset: 0.0,
            max_tilt: None,
            limit: LimitFlags::default(),
        }
    }
}

impl ActuatorTable {
    pub fn add(&mut self, index: usize, geometry: ActuatorGeometry) -> Result<(), AllocatorError> {
        if self.initialised {
            return Err(AllocatorError::Locked);
        }
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(AllocatorError::IndexOutOfRange(index))?;
        *slot = Some(geometry);
        Ok(())
    }

    /// Locks the table if the number of configured actuators matches.
    pub fn init(&mut self, expected: usize) -> Result<FrameKind, AllocatorError> {
        let found = self.count();
        if found != expected {
            self.initialised = false;
            self.frame_kind = FrameKind::Generic;
            tracing::warn!(expected, found, "actuator count mismatch, allocator not initialised");
            return Err(AllocatorError::CountMismatch { expected, found });
        }

        self.initialised = true;
        self.frame_kind = FrameKind::from_count(found);
        tracing::info!(actuators = found, frame = ?self.frame_kind, "allocator initialised");
        Ok(self.frame_kind)
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn frame_kind(&self) -> FrameKind {
        self.frame_kind
    }

    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn get(&self, index: usize) -> Option<&ActuatorGeometry> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    /// Enabled slots in index order.
    pub fn enabled(&self) -> impl Iterator<Item = (usize, &ActuatorGeometry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|g| (i, g)))
    }

    pub fn test_seq(&self, seq: u8) -> Option<usize> {
        self.enabled().find(|(_, g)| g.test_order == seq).map(|(i, _)| i)
    }

    /// Rotation of the thrust frame by the roll/pitch mounting offset (euler 3-1-2, zero yaw).
    pub fn mounting_rotation(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::x_axis(), self.roll_offset)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), self.pitch_offset)
    }

    /// Resets the limit flags for a new tick. Outside the spinning states every
    /// axis reports saturated so integrators cannot wind up on the ground.
    pub(crate) fn begin_tick(&mut self) -> Result<(), AllocatorError> {
        if !self.initialised {
            return Err(AllocatorError::NotInitialised);
        }
        self.limit = if self.spool.is_spinning() {
            LimitFlags::default()
        } else {
            LimitFlags::all()
        };
        Ok(())
    }

    /// Compensated demand: (roll, pitch, yaw, throttle, forward, lateral).
    ///
    /// Forward and lateral are scaled by the throttle so lean-angle acceleration
    /// stays proportional. Throttle is clamped to 0..1 and flagged.
    pub(crate) fn compensated_demand(&mut self, inputs: &AllocatorInputs) -> Demand {
        let gain = self.compensation_gain;
        let mut throttle = inputs.throttle * gain;
        let forward = inputs.forward * throttle;
        let lateral = inputs.lateral * throttle;

        if throttle <= 0.0 {
            throttle = 0.0;
            self.limit.throttle_lower = true;
        }
        if throttle >= 1.0 {
            throttle = 1.0;
            self.limit.throttle_upper = true;
        }

        Demand {
            rpy: Vector3::new(
                (inputs.roll + inputs.roll_ff) * gain,
                (inputs.pitch + inputs.pitch_ff) * gain,
                (inputs.yaw + inputs.yaw_ff) * gain,
            ),
            throttle,
            forward,
            lateral,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Demand {
    pub rpy: Vector3<f64>,
    pub throttle: f64,
    pub forward: f64,
    pub lateral: f64,
}

/// IEEE remainder: `x - n*y` with `n` the integer nearest `x/y`, ties to even.
pub fn remainder(x: f64, y: f64) -> f64 {
    x - (x / y).round_ties_even() * y
}
