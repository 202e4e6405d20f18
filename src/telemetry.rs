//! One-way telemetry side channel for the rate loop.
//!
//! Nothing recorded here feeds back into control.

use nalgebra::Vector3;
use tracing::debug;

/// Snapshot of one rate-control tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub tick: u64,
    /// Target body rate, including any injected perturbation [rad/s]
    pub target: Vector3<f64>,
    /// Measured body rate [rad/s]
    pub measured: Vector3<f64>,
    /// Fixed-gain PID output
    pub pid: Vector3<f64>,
    /// Adaptive correction
    pub adaptive: Vector3<f64>,
    /// Command handed to the allocator (PID + adaptive + actuator perturbation)
    pub command: Vector3<f64>,
    pub feedforward: Vector3<f64>,
    /// Reference model rate used by the adaptive law
    pub reference_rate: Vector3<f64>,
    /// Measured rate minus reference model rate
    pub rate_error: Vector3<f64>,
    /// Throttle/attitude mix ratio
    pub mix: f64,
}

impl Default for TelemetryFrame {
    fn default() -> Self {
        Self {
            tick: 0,
            target: Vector3::zeros(),
            measured: Vector3::zeros(),
            pid: Vector3::zeros(),
            adaptive: Vector3::zeros(),
            command: Vector3::zeros(),
            feedforward: Vector3::zeros(),
            reference_rate: Vector3::zeros(),
            rate_error: Vector3::zeros(),
            mix: 0.0,
        }
    }
}

/// Telemetry sink
pub trait Telemetry {
    fn record(&mut self, frame: &TelemetryFrame);
}

/// Discards every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn record(&mut self, _frame: &TelemetryFrame) {}
}

/// Keeps every frame in memory.
impl Telemetry for Vec<TelemetryFrame> {
    fn record(&mut self, frame: &TelemetryFrame) {
        self.push(*frame);
    }
}

/// Emits `tracing` debug events, one every `decimation` ticks.
#[derive(Debug, Clone)]
pub struct TracingTelemetry {
    decimation: u64,
}

impl TracingTelemetry {
    pub fn new(decimation: u64) -> Self {
        Self {
            decimation: decimation.max(1),
        }
    }
}

impl Default for TracingTelemetry {
    fn default() -> Self {
        // 10 Hz at a 400 Hz loop
        Self::new(40)
    }
}

impl Telemetry for TracingTelemetry {
    fn record(&mut self, f: &TelemetryFrame) {
        if f.tick % self.decimation != 0 {
            return;
        }
        debug!(
            target: "uavctl::rate",
            tick = f.tick,
            un_roll = f.pid.x,
            un_pitch = f.pid.y,
            un_yaw = f.pid.z,
            ua_roll = f.adaptive.x,
            ua_pitch = f.adaptive.y,
            ua_yaw = f.adaptive.z,
            mix = f.mix,
            "rate loop"
        );
        debug!(
            target: "uavctl::adaptive",
            tick = f.tick,
            xref_roll = f.reference_rate.x,
            xref_pitch = f.reference_rate.y,
            xref_yaw = f.reference_rate.z,
            targ_roll = f.target.x,
            targ_pitch = f.target.y,
            targ_yaw = f.target.z,
            e_roll = f.rate_error.x,
            e_pitch = f.rate_error.y,
            e_yaw = f.rate_error.z,
            "reference model"
        );
    }
}
