use anyhow::Result;
use clap::Parser;
use grid_localiser::{
    configuration::{AppConfig, Waypoint},
    correction::{CorrectionCounts, OdometryCorrection},
    driver::{simulated::SimulatedRobot, LogNotifier, MotionDriver},
    localisation::{AbsoluteLocaliser, LocalisationReport},
    logging,
    odometer::Pose,
};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use tracing::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Localise a simulated robot on the floor grid and drive a mission"
)]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// log as json
    #[arg(long)]
    json: bool,

    /// trust the configured start pose instead of localising
    #[arg(long)]
    skip_localisation: bool,
}

#[derive(Serialize)]
struct MissionSummary {
    localisation: Option<LocalisationReport>,
    estimated_pose: Pose,
    true_pose: Pose,
    position_error: f64,
    corrections: CorrectionCounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity, args.json);

    let app_config = AppConfig::load_config(&args.config)?;
    let grid = app_config.grid.clone();

    let mut robot = SimulatedRobot::new(grid.clone(), app_config.simulation.clone());
    let odometer = robot.odometer();
    let sensor = robot.line_sensor();

    let localisation = if args.skip_localisation {
        info!("Skipping localisation, starting from {}", odometer.read());
        None
    } else {
        let mut localiser = AbsoluteLocaliser::new(
            grid.clone(),
            app_config.localiser.clone(),
            odometer.clone(),
            sensor.clone(),
            Arc::new(LogNotifier),
        );
        Some(localiser.run(&mut robot).await?)
    };

    let mut correction = OdometryCorrection::new(grid, odometer.clone(), sensor);
    correction.start();

    let mission = tokio::select! {
        result = drive_waypoints(&mut robot, &app_config.simulation.waypoints) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Mission interrupted");
            Ok(())
        }
    };
    correction.stop().await;
    robot.stop().await?;
    mission?;

    let estimated_pose = odometer.read();
    let true_pose = robot.true_pose();
    let summary = MissionSummary {
        localisation,
        estimated_pose,
        true_pose,
        position_error: (estimated_pose.position() - true_pose.position()).norm(),
        corrections: correction.counts(),
    };
    info!(
        "Mission finished at {} while truly at {}",
        estimated_pose, true_pose
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

async fn drive_waypoints(robot: &mut SimulatedRobot, waypoints: &[Waypoint]) -> Result<()> {
    for waypoint in waypoints {
        info!("Heading to [{:.2}, {:.2}]", waypoint.x, waypoint.y);
        robot.go_to(waypoint.x, waypoint.y).await?;
    }
    Ok(())
}
