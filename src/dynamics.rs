//! Rotational rigid-body plant used to close the loop in tests and demos.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mixer::Tilt;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlantError {
    #[error("integration stopped before t = {0}")]
    IntegrationFailed(f64),
}

/// Attitude and body rates of the vehicle.
///
/// # Fields
///
/// * `roll`, `pitch`, `yaw` - Euler angles (radians)
/// * `roll_rate`, `pitch_rate`, `yaw_rate` - Angular velocities in the body frame (rad/s)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AttitudeState {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub roll_rate: f64,
    pub pitch_rate: f64,
    pub yaw_rate: f64,
}

impl AttitudeState {
    /// State vector in the order [roll, pitch, yaw, p, q, r].
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.roll,
            self.pitch,
            self.yaw,
            self.roll_rate,
            self.pitch_rate,
            self.yaw_rate,
        ]
    }

    pub fn from_array(arr: &[f64; 6]) -> Self {
        Self {
            roll: arr[0],
            pitch: arr[1],
            yaw: arr[2],
            roll_rate: arr[3],
            pitch_rate: arr[4],
            yaw_rate: arr[5],
        }
    }

    /// Body rates as a gyro would report them.
    pub fn rates(&self) -> Vector3<f64> {
        Vector3::new(self.roll_rate, self.pitch_rate, self.yaw_rate)
    }

    /// Tilt for the throttle boost, taking the thrust axis as body z.
    pub fn tilt(&self) -> Tilt {
        Tilt::from_attitude(self.roll, self.pitch)
    }
}

/// Physical properties of the plant.
///
/// # Fields
///
/// * `ixx`, `iyy`, `izz` - Principal moments of inertia about body axes (kg⋅m²)
/// * `torque_scale` - Body torque per unit of normalised axis command (N⋅m)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlantParams {
    pub ixx: f64,
    pub iyy: f64,
    pub izz: f64,
    pub torque_scale: Vector3<f64>,
}

impl Default for PlantParams {
    /// A 250 mm class quadrotor.
    fn default() -> Self {
        Self {
            ixx: 0.01,
            iyy: 0.01,
            izz: 0.02,
            torque_scale: Vector3::new(0.3, 0.3, 0.1),
        }
    }
}

/// Euler kinematics and Euler's rotation equations under a constant body torque.
pub struct RotationalOde {
    pub params: PlantParams,
    pub torque: Vector3<f64>,
}

impl fast_ode::DifferentialEquation<6> for RotationalOde {
    fn ode_dot_y(&self, _t: f64, y: &fast_ode::Coord<6>) -> (fast_ode::Coord<6>, bool) {
        let state = y.0;

        let phi = state[0];
        let theta = state[1];
        let p = state[3];
        let q = state[4];
        let r = state[5];

        let cos_phi = phi.cos();
        let sin_phi = phi.sin();
        let cos_theta = theta.cos();
        let tan_theta = theta.tan();

        let mut dot_y = [0.0; 6];

        // Attitude derivatives (Euler angle rates)
        dot_y[0] = p + q * sin_phi * tan_theta + r * cos_phi * tan_theta;
        dot_y[1] = q * cos_phi - r * sin_phi;
        dot_y[2] = if cos_theta.abs() > 1e-6 {
            q * sin_phi / cos_theta + r * cos_phi / cos_theta
        } else {
            0.0 // gimbal lock
        };

        // Angular velocity derivatives (Euler's equations)
        let PlantParams { ixx, iyy, izz, .. } = self.params;
        dot_y[3] = (self.torque.x + (iyy - izz) * q * r) / ixx;
        dot_y[4] = (self.torque.y + (izz - ixx) * r * p) / iyy;
        dot_y[5] = (self.torque.z + (ixx - iyy) * p * q) / izz;

        (fast_ode::Coord(dot_y), true)
    }
}

/// Integrates the rotational dynamics under a constant torque.
///
/// # Arguments
///
/// * `initial` - State at the start of the span
/// * `params` - Inertia and torque scale
/// * `torque` - Body torque held over the span (N⋅m)
/// * `time_span` - (t0, t1) in seconds
/// * `tolerance` - Relative tolerance, the absolute one is ten times larger
///
/// # Returns
///
/// The state at t1
pub fn simulate_rotation(
    initial: AttitudeState,
    params: PlantParams,
    torque: Vector3<f64>,
    time_span: (f64, f64),
    tolerance: f64,
) -> Result<AttitudeState, PlantError> {
    let ode = RotationalOde { params, torque };

    let result = fast_ode::solve_ivp(
        &ode,
        time_span,
        fast_ode::Coord(initial.to_array()),
        |_, _| true,
        tolerance,
        tolerance * 10.0,
    );

    match result {
        fast_ode::IvpResult::FinalTimeReached(final_coord) => {
            Ok(AttitudeState::from_array(&final_coord.0))
        }
        _ => Err(PlantError::IntegrationFailed(time_span.1)),
    }
}

/// Plant driven tick by tick with normalised axis commands.
#[derive(Debug, Clone)]
pub struct RotationalPlant {
    params: PlantParams,
    state: AttitudeState,
    time: f64,
    tolerance: f64,
}

impl RotationalPlant {
    pub fn new(params: PlantParams) -> Self {
        Self {
            params,
            state: AttitudeState::default(),
            time: 0.0,
            tolerance: 1e-8,
        }
    }

    pub fn with_state(mut self, state: AttitudeState) -> Self {
        self.state = state;
        self
    }

    /// Holds `command` for `dt` seconds and returns the new state.
    pub fn step(&mut self, command: &Vector3<f64>, dt: f64) -> Result<AttitudeState, PlantError> {
        let torque = command.component_mul(&self.params.torque_scale);
        let span = (self.time, self.time + dt);
        self.state = simulate_rotation(self.state, self.params, torque, span, self.tolerance)?;
        self.time += dt;
        Ok(self.state)
    }

    pub fn state(&self) -> &AttitudeState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn params(&self) -> &PlantParams {
        &self.params
    }
}
