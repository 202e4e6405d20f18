use nalgebra::Vector3;
use uavctl::alloc::AllocatorOutput;
use uavctl::geometry::ActuatorKind;
use uavctl::{
    ActuatorAllocator, ControlLoop, ControllerConfig, FrameConfig, MatrixAllocator, PlantParams,
    RateController, RotationalPlant, SpoolState, TracingTelemetry,
};

// Roll, then pitch rate steps on an X quad, with the body torque rebuilt from the
// per-motor thrusts.
fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut config = ControllerConfig::default();
    config.adaptive.take_off = false;

    let mut alloc = MatrixAllocator::new();
    let kind = FrameConfig::overactuated_x()
        .apply(&mut alloc)
        .expect("frame does not fit the allocator");
    alloc.set_spool_state(SpoolState::ThrottleUnlimited);
    println!("frame: {kind:?}");

    let rate = RateController::with_telemetry(&config, TracingTelemetry::default());
    let mut control = ControlLoop::from_parts(rate, alloc);
    for correction in control.rate_controller_mut().sanity_check() {
        println!("corrected {} {} -> {}", correction.name, correction.from, correction.to);
    }

    // Motor factors are 0.71 (roll/pitch) and 1 (yaw), so four motors double and
    // quadruple the torque per unit command.
    let mut plant = RotationalPlant::new(PlantParams {
        torque_scale: Vector3::new(0.15, 0.15, 0.025),
        ..Default::default()
    });

    let simulation_span = 4.0;
    let dt = config.dt;
    let mut current_time = 0.0;

    while current_time < simulation_span {
        let target = if current_time < 2.0 {
            Vector3::new(1.0, 0.0, 0.0)
        } else {
            Vector3::new(0.0, 0.5, 0.0)
        };

        let state = *plant.state();
        let out = match control.tick(&state.rates(), &target, 0.5, 0.0, 0.0, &state.tilt()) {
            Ok(out) => out,
            Err(e) => {
                println!("Allocation failed: {}", e);
                break;
            }
        };

        let command = body_command(control.allocator(), &out.allocation);
        match plant.step(&command, dt) {
            Ok(new_state) => println!(
                "{:.4} {:.4} {:.4} {:.4} {}",
                current_time,
                new_state.roll_rate,
                new_state.pitch_rate,
                new_state.yaw_rate,
                out.allocation.limit.roll
            ),
            Err(e) => println!("Simulation failed: {}", e),
        }

        current_time += dt;
    }
}

/// Roll/pitch/yaw command actually delivered by the motors.
fn body_command(alloc: &MatrixAllocator, out: &AllocatorOutput) -> Vector3<f64> {
    alloc
        .table()
        .enabled()
        .filter(|(_, g)| g.kind == ActuatorKind::Motor)
        .filter_map(|(i, g)| {
            out.command(i)
                .map(|c| Vector3::new(g.roll, g.pitch, g.yaw) * c.thrust)
        })
        .sum()
}
