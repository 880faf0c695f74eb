use config::Config;
use serde::Deserialize;
use std::{path::PathBuf, str, time::Duration};
use tracing::*;

use crate::odometer::Pose;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub localiser: LocaliserConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .add_source(config::Environment::with_prefix("APP").separator("__"))
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings").required(false))
                .add_source(config::Environment::with_prefix("APP").separator("__"))
                .build()?
        };

        Ok(settings.try_deserialize()?)
    }
}

/// Floor grid geometry shared by the localiser and the corrector.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    /// distance between floor lines in cm
    pub grid_spacing: f64,
    /// distance from the light sensor to the rotation centre in cm
    pub sensor_offset: f64,
    /// how close below a grid line the dead-reckoned coordinate must be to snap
    pub tolerance: f64,
    pub correction_period_ms: u64,
}

impl GridConfig {
    pub fn correction_period(&self) -> Duration {
        Duration::from_millis(self.correction_period_ms)
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_spacing: 30.48,
            sensor_offset: 4.5,
            tolerance: 0.5,
            correction_period_ms: 10,
        }
    }
}

/// How the localiser finds the first line.
#[derive(Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SeekStrategy {
    /// Spin in place.
    #[default]
    Rotate,
    /// Face `heading` degrees and drive straight.
    Diagonal { heading: f64 },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LocaliserConfig {
    pub seek: SeekStrategy,
    /// wheel speed while looking for the first line, cm/s
    pub seek_speed: f64,
    /// wheel speed during the four line sweep, cm/s
    pub sweep_speed: f64,
    pub poll_period_ms: u64,
    pub first_line_settle_ms: u64,
    pub compute_settle_ms: u64,
    pub seek_timeout_ms: u64,
    pub sweep_timeout_ms: u64,
    /// degrees of rotation allowed before giving up on the first line
    pub max_seek_rotation: f64,
    /// degrees of rotation allowed to collect all four lines
    pub max_sweep_rotation: f64,
}

impl LocaliserConfig {
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms.max(1))
    }

    pub fn first_line_settle(&self) -> Duration {
        Duration::from_millis(self.first_line_settle_ms)
    }

    pub fn compute_settle(&self) -> Duration {
        Duration::from_millis(self.compute_settle_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_millis(self.sweep_timeout_ms)
    }
}

impl Default for LocaliserConfig {
    fn default() -> Self {
        Self {
            seek: SeekStrategy::Rotate,
            seek_speed: 5.0,
            sweep_speed: 5.0,
            poll_period_ms: 2,
            first_line_settle_ms: 500,
            compute_settle_ms: 2000,
            seek_timeout_ms: 30_000,
            sweep_timeout_ms: 30_000,
            max_seek_rotation: 360.0,
            max_sweep_rotation: 400.0,
        }
    }
}

/// Parameters of the simulated robot and the mission the binary drives.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// distance between the wheels in cm
    pub track_width: f64,
    pub travel_speed: f64,
    pub turn_speed: f64,
    /// width of the painted floor lines in cm
    pub line_width: f64,
    /// relative error of the wheel encoders, 0.02 means odometry overestimates by 2%
    pub odometry_scale_error: f64,
    /// physical pose the robot starts at
    pub true_start: Pose,
    /// pose the odometer believes it starts at
    pub believed_start: Pose,
    pub waypoints: Vec<Waypoint>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            track_width: 15.0,
            travel_speed: 10.0,
            turn_speed: 5.0,
            line_width: 0.5,
            odometry_scale_error: 0.0,
            true_start: Pose::new(-5.0, -5.0, 0.0),
            believed_start: Pose::origin(),
            waypoints: vec![],
        }
    }
}
