use nalgebra::Vector3;
use tracing::{debug, info};

use crate::adaptive::AdaptiveCorrector;
use crate::alloc::{ActuatorAllocator, AllocatorError, AllocatorInputs, AllocatorOutput, LimitFlags};
use crate::config::ControllerConfig;
use crate::mixer::{MixCorrection, ThrottleOut, ThrottlePriorityMixer, Tilt};
use crate::pid::RateAxisController;
use crate::telemetry::{NullTelemetry, Telemetry, TelemetryFrame};

/// Output of one rate-control tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateOutput {
    /// Per-axis command: PID + adaptive correction + actuator perturbation
    pub command: Vector3<f64>,
    /// Per-axis feedforward, passed to the allocator separately
    pub feedforward: Vector3<f64>,
    /// Fixed-gain PID part of the command
    pub pid: Vector3<f64>,
    /// Adaptive part of the command
    pub adaptive: Vector3<f64>,
}

/// Body-rate controller for roll, pitch and yaw.
///
/// Each tick runs three fixed-gain rate PIDs and an adaptive corrector that
/// augments them, and slews the throttle/attitude mix. The result is handed to an
/// actuator allocator by [`ControlLoop`].
///
/// # Control Architecture
///
/// Target rate (+ rate perturbation) → PID ×3 ─────────┐
///                                  ↓                  ↓
/// Measured rate ─────→ Adaptive corrector → Σ (+ actuator perturbation) → command
///
/// Saturation flags from the previous allocation freeze the PID integrators.
#[derive(Debug, Clone)]
pub struct RateController<T: Telemetry = NullTelemetry> {
    /// Control loop time step (seconds)
    dt: f64,
    roll: RateAxisController,
    pitch: RateAxisController,
    yaw: RateAxisController,
    adaptive: AdaptiveCorrector,
    mixer: ThrottlePriorityMixer,
    /// Scale on the yaw feedforward
    yaw_ff_scale: f64,
    throttle_hover: f64,

    /// Target body rate (rad/s), set by the outer loop
    target: Vector3<f64>,
    /// System-identification perturbations, consumed by the next tick
    sysid_rate: Vector3<f64>,
    sysid_actuator: Vector3<f64>,

    tick: u64,
    telemetry: T,
}

impl RateController {
    /// Creates a rate controller that discards telemetry.
    ///
    /// # Arguments
    ///
    /// * `config` - Gains, mix and adaptation parameters
    ///
    /// # Example
    ///
    /// let config = ControllerConfig::default();
    /// let mut controller = RateController::new(&config);
    /// controller.set_target_rate(Vector3::new(1.0, 0.0, 0.0));
    /// let out = controller.rate_controller_run(&Vector3::zeros(), &LimitFlags::default());
    pub fn new(config: &ControllerConfig) -> Self {
        Self::with_telemetry(config, NullTelemetry)
    }
}

impl<T: Telemetry> RateController<T> {
    pub fn with_telemetry(config: &ControllerConfig, telemetry: T) -> Self {
        info!(dt = config.dt, mrac = config.adaptive.enabled, "rate controller created");
        Self {
            dt: config.dt,
            roll: RateAxisController::new(config.roll, config.dt),
            pitch: RateAxisController::new(config.pitch, config.dt),
            yaw: RateAxisController::new(config.yaw, config.dt),
            adaptive: AdaptiveCorrector::new(config.adaptive.clone()),
            mixer: ThrottlePriorityMixer::new(config.mix),
            yaw_ff_scale: config.yaw_ff_scale,
            throttle_hover: config.throttle_hover,
            target: Vector3::zeros(),
            sysid_rate: Vector3::zeros(),
            sysid_actuator: Vector3::zeros(),
            tick: 0,
            telemetry,
        }
    }

    /// Applies a new configuration in flight.
    ///
    /// Controller state (integrators, filters, adaptive weights) is kept unless the
    /// loop period changes, in which case the axis controllers are rebuilt.
    pub fn apply_config(&mut self, config: &ControllerConfig) {
        if config.dt != self.dt {
            debug!(
                old = self.dt,
                new = config.dt,
                "loop period changed, rebuilding axis controllers"
            );
            self.dt = config.dt;
            self.roll = RateAxisController::new(config.roll, config.dt);
            self.pitch = RateAxisController::new(config.pitch, config.dt);
            self.yaw = RateAxisController::new(config.yaw, config.dt);
        } else {
            self.roll.set_gains(config.roll);
            self.pitch.set_gains(config.pitch);
            self.yaw.set_gains(config.yaw);
        }
        self.adaptive.params = config.adaptive.clone();
        self.mixer.set_params(config.mix);
        self.yaw_ff_scale = config.yaw_ff_scale;
        self.throttle_hover = config.throttle_hover;
    }

    /// Clamps the mix parameters. Call once before arming.
    pub fn sanity_check(&mut self) -> Vec<MixCorrection> {
        self.mixer.sanity_check()
    }

    /// Sets the target body rate [rad/s].
    pub fn set_target_rate(&mut self, target: Vector3<f64>) {
        self.target = target;
    }

    pub fn target_rate(&self) -> Vector3<f64> {
        self.target
    }

    /// Adds a perturbation to the next tick's target rate.
    pub fn inject_rate_perturbation(&mut self, perturbation: Vector3<f64>) {
        self.sysid_rate += perturbation;
    }

    /// Adds a perturbation to the next tick's command.
    pub fn inject_actuator_perturbation(&mut self, perturbation: Vector3<f64>) {
        self.sysid_actuator += perturbation;
    }

    /// Runs one rate-control tick.
    ///
    /// # Arguments
    ///
    /// * `gyro` - Measured body rate [rad/s]
    /// * `limits` - Saturation flags from the previous allocation
    ///
    /// # Returns
    ///
    /// Per-axis command and feedforward for the allocator
    pub fn rate_controller_run(&mut self, gyro: &Vector3<f64>, limits: &LimitFlags) -> RateOutput {
        self.mixer.update_mix(self.dt);

        let target = self.target + self.sysid_rate;

        let pid = Vector3::new(
            self.roll.update_all(target.x, gyro.x, limits.roll),
            self.pitch.update_all(target.y, gyro.y, limits.pitch),
            self.yaw.update_all(target.z, gyro.z, limits.yaw),
        );
        let feedforward = Vector3::new(
            self.roll.ff(),
            self.pitch.ff(),
            self.yaw.ff() * self.yaw_ff_scale,
        );

        let adaptive = self.adaptive.update(gyro, &target, self.dt);
        let command = pid + adaptive + self.sysid_actuator;

        self.sysid_rate = Vector3::zeros();
        self.sysid_actuator = Vector3::zeros();

        let step = self.adaptive.last_step();
        self.telemetry.record(&TelemetryFrame {
            tick: self.tick,
            target,
            measured: *gyro,
            pid,
            adaptive,
            command,
            feedforward,
            reference_rate: step.reference_rate,
            rate_error: step.rate_error,
            mix: self.mixer.mix(),
        });
        self.tick += 1;

        RateOutput {
            command,
            feedforward,
            pid,
            adaptive,
        }
    }

    /// Resets every axis controller and the adaptive state.
    pub fn reset(&mut self) {
        self.roll.reset();
        self.pitch.reset();
        self.yaw.reset();
        self.adaptive.reset();
        self.sysid_rate = Vector3::zeros();
        self.sysid_actuator = Vector3::zeros();
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn throttle_hover(&self) -> f64 {
        self.throttle_hover
    }

    pub fn set_throttle_hover(&mut self, throttle_hover: f64) {
        self.throttle_hover = throttle_hover.clamp(0.0, 1.0);
    }

    pub fn axis(&self, index: usize) -> Option<&RateAxisController> {
        match index {
            0 => Some(&self.roll),
            1 => Some(&self.pitch),
            2 => Some(&self.yaw),
            _ => None,
        }
    }

    pub fn adaptive(&self) -> &AdaptiveCorrector {
        &self.adaptive
    }

    pub fn adaptive_mut(&mut self) -> &mut AdaptiveCorrector {
        &mut self.adaptive
    }

    pub fn mixer(&self) -> &ThrottlePriorityMixer {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut ThrottlePriorityMixer {
        &mut self.mixer
    }

    pub fn telemetry(&self) -> &T {
        &self.telemetry
    }

    pub fn into_telemetry(self) -> T {
        self.telemetry
    }
}

/// Output of one [`ControlLoop`] tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub rate: RateOutput,
    pub throttle: ThrottleOut,
    pub allocation: AllocatorOutput,
}

/// Rate controller wired to an actuator allocator.
///
/// The allocator's saturation flags from one tick drive the anti-windup of the
/// next.
#[derive(Debug)]
pub struct ControlLoop<A: ActuatorAllocator, T: Telemetry = NullTelemetry> {
    rate: RateController<T>,
    allocator: A,
    limits: LimitFlags,
    apply_angle_boost: bool,
}

impl<A: ActuatorAllocator> ControlLoop<A> {
    pub fn new(config: &ControllerConfig, allocator: A) -> Self {
        Self::from_parts(RateController::new(config), allocator)
    }
}

impl<A: ActuatorAllocator, T: Telemetry> ControlLoop<A, T> {
    pub fn from_parts(rate: RateController<T>, allocator: A) -> Self {
        Self {
            rate,
            allocator,
            // Start frozen until the allocator has reported once
            limits: LimitFlags::all(),
            apply_angle_boost: true,
        }
    }

    /// Runs rate control, the throttle output stage and allocation.
    ///
    /// # Arguments
    ///
    /// * `gyro` - Measured body rate [rad/s]
    /// * `target` - Target body rate [rad/s]
    /// * `throttle` - Collective throttle demand, 0..1
    /// * `forward` - Forward thrust demand
    /// * `lateral` - Lateral thrust demand
    /// * `tilt` - Vehicle tilt for the angle boost
    ///
    /// # Returns
    ///
    /// The tick's rate, throttle and allocation outputs, or
    /// [`AllocatorError::NotInitialised`] if the allocator was never initialised.
    /// Controller state is not advanced in that case.
    pub fn tick(
        &mut self,
        gyro: &Vector3<f64>,
        target: &Vector3<f64>,
        throttle: f64,
        forward: f64,
        lateral: f64,
        tilt: &Tilt,
    ) -> Result<TickOutput, AllocatorError> {
        if !self.allocator.is_initialised() {
            return Err(AllocatorError::NotInitialised);
        }

        self.rate.set_target_rate(*target);
        let rate = self.rate.rate_controller_run(gyro, &self.limits);

        let (dt, hover) = (self.rate.dt(), self.rate.throttle_hover());
        let throttle = self
            .rate
            .mixer_mut()
            .set_throttle_out(throttle, self.apply_angle_boost, tilt, hover, dt);

        let inputs = AllocatorInputs {
            roll: rate.command.x,
            pitch: rate.command.y,
            yaw: rate.command.z,
            roll_ff: rate.feedforward.x,
            pitch_ff: rate.feedforward.y,
            yaw_ff: rate.feedforward.z,
            throttle: throttle.throttle,
            forward,
            lateral,
        };
        let allocation = self.allocator.output(&inputs)?;
        self.limits = allocation.limit;

        Ok(TickOutput {
            rate,
            throttle,
            allocation,
        })
    }

    pub fn set_angle_boost(&mut self, enabled: bool) {
        self.apply_angle_boost = enabled;
    }

    /// Saturation flags fed to the next tick.
    pub fn limits(&self) -> LimitFlags {
        self.limits
    }

    pub fn rate_controller(&self) -> &RateController<T> {
        &self.rate
    }

    pub fn rate_controller_mut(&mut self) -> &mut RateController<T> {
        &mut self.rate
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }
}
