// src/main.rs
//
// Headless test drive: one vehicle on the rapier ground, a scripted driver,
// JSON state lines in the log.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use log::{info, warn};
use tokio::time::{interval, Duration};

use aven_drivetrain::physics::PhysicsWorld;
use aven_drivetrain::{BehaviorPreset, ControlInput, GroundMaterials, Vehicle, VehicleConfig};

#[derive(Parser)]
#[command(version, about = "Drive a vehicle profile through a scripted test run")]
struct Args {
    /// Built-in profile: default, gt86, tank
    #[arg(long, default_value = "default")]
    profile: String,

    /// JSON vehicle config, replaces --profile
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Behavior preset: simulator, racing, semiarcade, drift, fun
    #[arg(long)]
    preset: Option<BehaviorPreset>,

    /// Ground patch material under the second half of the run (e.g. ice)
    #[arg(long)]
    surface: Option<String>,

    #[arg(long, default_value = "20")]
    seconds: f32,

    #[arg(long, default_value = "60")]
    hz: u32,

    /// Pace the loop at wall-clock speed
    #[arg(long)]
    realtime: bool,

    /// Log a state line every N ticks (0 = off)
    #[arg(long, default_value = "30")]
    report_every: u64,
}

/// Accelerate, sweep into a right-hander, brake hard, coast.
fn driver(t: f32) -> ControlInput {
    match t {
        t if t < 1.0 => ControlInput::default(),
        t if t < 8.0 => ControlInput::throttle(1.0),
        t if t < 12.0 => ControlInput { throttle: 0.6, steer: 0.4, ..ControlInput::default() },
        t if t < 15.0 => ControlInput::brake(1.0),
        _ => ControlInput::default(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => VehicleConfig::from_json_file(path)?,
        None => VehicleConfig::profile(&args.profile).ok_or_else(|| format!("unknown profile '{}'", args.profile))?,
    };
    if let Some(preset) = args.preset {
        config = config.with_preset(preset);
    }

    let materials = Arc::new(GroundMaterials::default());
    let mut world = PhysicsWorld::new(Arc::clone(&materials));
    if let Some(name) = &args.surface {
        let id = materials.index_of(name).ok_or_else(|| format!("unknown surface '{name}'"))?;
        world.add_ground_patch([0.0, 0.0, 150.0], [100.0, 0.02, 100.0], id)?;
    }
    let rig = world.spawn(&config, [0.0, 1.3, 0.0]);
    let mut vehicle = Vehicle::new(config, materials)?;
    vehicle.start_engine();

    let hz = args.hz.max(1);
    let dt = 1.0 / hz as f32;
    let ticks = (args.seconds.max(0.0) * hz as f32) as u64;
    let mut ticker = args.realtime.then(|| interval(Duration::from_secs_f32(dt)));

    info!("running '{}' for {ticks} ticks at {hz} Hz", vehicle.config().name);

    for tick in 0..ticks {
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }

        world.sense(dt);
        let Some(mut link) = world.link(rig) else {
            warn!("rig {rig} vanished");
            break;
        };
        let state = vehicle.tick(dt, driver(tick as f32 * dt), &mut link);

        if args.report_every > 0 && tick % args.report_every == 0 {
            info!("{}", state.to_json()?);
        }
        world.step(dt);
    }

    let s = vehicle.state();
    info!(
        "done: {:.1} km/h, {:.0} rpm, gear {} ({:?}), position {:?}",
        s.speed_kmh,
        s.rpm,
        s.gear_index + 1,
        s.gear_state,
        world.chassis_position(rig)
    );
    Ok(())
}
