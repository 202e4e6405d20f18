use nalgebra::Vector3;
use uavctl::{
    ActuatorAllocator, ControlLoop, ControllerConfig, FrameConfig, OveractuatedAllocator,
    OveractuatedParams, SpoolState, Tilt,
};

// Level hover on the tilt-rotor frame while the forward demand ramps up. The
// rotors tilt forward instead of the body pitching.
fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut config = ControllerConfig::default();
    config
        .set_param("MRAC", 0.0)
        .expect("MRAC is a known flag");

    let mut alloc = OveractuatedAllocator::new(OveractuatedParams::default())
        .expect("frame constants give an invertible allocation matrix");
    FrameConfig::overactuated_x()
        .apply(&mut alloc)
        .expect("frame does not fit the allocator");
    alloc.set_spool_state(SpoolState::ThrottleUnlimited);

    let mut control = ControlLoop::new(&config, alloc);
    control.set_angle_boost(false);

    let simulation_span: f64 = 2.0;
    let dt = config.dt;
    let mut current_time = 0.0;

    while current_time < simulation_span {
        let forward = (0.3 * current_time / simulation_span).min(0.3);

        let demand = Vector3::zeros();
        match control.tick(&Vector3::zeros(), &demand, 0.5, forward, 0.0, &Tilt::level()) {
            Ok(_) => {
                let alloc = control.allocator();
                let speeds = alloc.rotor_speeds();
                let (pitch, roll) = alloc.tilt(0);
                println!(
                    "{:.4} {:.3} {:.4} {:.4} {:.4} {:.4} {:.4} {:.4}",
                    current_time,
                    forward,
                    speeds[0],
                    speeds[1],
                    speeds[2],
                    speeds[3],
                    pitch.to_degrees(),
                    roll.to_degrees()
                );
            }
            Err(e) => {
                println!("Allocation failed: {}", e);
                break;
            }
        }

        current_time += dt;
    }
}
