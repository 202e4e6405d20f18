//! Inner control loop for multirotor and tilt-rotor vehicles.
//!
//! Desired body rates and a throttle demand go in, per-actuator thrust and tilt
//! commands come out. The pipeline is:
//!
//! 1. [`pid::RateAxisController`] per axis, augmented by [`adaptive::AdaptiveCorrector`]
//! 2. [`mixer::ThrottlePriorityMixer`] for throttle/attitude priority and angle boost
//! 3. an [`alloc::ActuatorAllocator`] mapping the demand onto actuators
//!
//! [`control::ControlLoop`] wires the stages together and feeds the allocator's
//! saturation flags back into the next tick's anti-windup.

pub mod adaptive;
pub mod alloc;
pub mod config;
pub mod control;
pub mod dynamics;
pub mod filter;
pub mod geometry;
pub mod mixer;
pub mod pid;
pub mod telemetry;

pub use adaptive::{AdaptiveCorrector, AdaptiveParams};
pub use alloc::{
    ActuatorAllocator, AllocatorError, AllocatorInputs, AllocatorOutput, LimitFlags,
    MatrixAllocator, OveractuatedAllocator, OveractuatedParams, SpoolState,
};
pub use config::{ConfigError, ControllerConfig};
pub use control::{ControlLoop, RateController, RateOutput, TickOutput};
pub use dynamics::{AttitudeState, PlantParams, RotationalPlant};
pub use geometry::{ActuatorGeometry, FrameConfig, FrameKind};
pub use mixer::{MixParams, ThrottlePriorityMixer, Tilt};
pub use pid::{AxisGains, RateAxisController};
pub use telemetry::{NullTelemetry, Telemetry, TelemetryFrame, TracingTelemetry};
