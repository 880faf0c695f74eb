//! Kinematic differential drive robot on a gridded floor.
//!
//! Motion is integrated lazily against the tokio clock whenever the world is
//! touched, so tests on a paused clock are deterministic. The odometer is fed
//! the same wheel motion scaled by the configured encoder error, the light
//! sensor reports the true floor under it.

use super::MotionDriver;
use crate::configuration::{GridConfig, SimulationConfig};
use crate::light_sensor::LineSensor;
use crate::odometer::{shortest_turn, Odometer, Pose};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::*;

const INTEGRATION_STEP: f64 = 0.001;

struct SimWorld {
    true_pose: Pose,
    left: f64,
    right: f64,
    last_update: Instant,
    command_seq: u64,
    odometer: Arc<Odometer>,
    grid: GridConfig,
    config: SimulationConfig,
}

impl SimWorld {
    fn advance_to(&mut self, now: Instant) {
        let mut elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        if self.left == 0.0 && self.right == 0.0 {
            return;
        }
        while elapsed > 0.0 {
            let dt = elapsed.min(INTEGRATION_STEP);
            self.step(dt);
            elapsed -= dt;
        }
    }

    fn step(&mut self, dt: f64) {
        let distance = (self.left + self.right) / 2.0 * dt;
        let rotation = ((self.right - self.left) / self.config.track_width * dt).to_degrees();

        let pose = self.true_pose;
        let mid_heading = (pose.heading() + rotation / 2.0).to_radians();
        self.true_pose = Pose::new(
            pose.x() + distance * mid_heading.cos(),
            pose.y() + distance * mid_heading.sin(),
            pose.heading() + rotation,
        );

        let scale = self.odometry_scale();
        self.odometer.integrate(distance * scale, rotation * scale);
    }

    fn odometry_scale(&self) -> f64 {
        1.0 + self.config.odometry_scale_error
    }

    fn set_speeds(&mut self, left: f64, right: f64) -> u64 {
        self.advance_to(Instant::now());
        self.left = left;
        self.right = right;
        self.command_seq += 1;
        self.command_seq
    }

    fn sensor_on_line(&self) -> bool {
        let sensor = self.true_pose.point_ahead(self.grid.sensor_offset);
        let half_width = self.config.line_width / 2.0;
        distance_to_line(sensor.x, self.grid.grid_spacing) <= half_width
            || distance_to_line(sensor.y, self.grid.grid_spacing) <= half_width
    }
}

fn distance_to_line(value: f64, spacing: f64) -> f64 {
    let remainder = value.rem_euclid(spacing);
    remainder.min(spacing - remainder)
}

/// Simulated robot base. Clones share the same world.
#[derive(Clone)]
pub struct SimulatedRobot {
    world: Arc<Mutex<SimWorld>>,
    odometer: Arc<Odometer>,
    config: SimulationConfig,
}

impl SimulatedRobot {
    pub fn new(grid: GridConfig, config: SimulationConfig) -> Self {
        let odometer = Arc::new(Odometer::new(config.believed_start));
        let world = SimWorld {
            true_pose: config.true_start,
            left: 0.0,
            right: 0.0,
            last_update: Instant::now(),
            command_seq: 0,
            odometer: odometer.clone(),
            grid,
            config: config.clone(),
        };
        Self {
            world: Arc::new(Mutex::new(world)),
            odometer,
            config,
        }
    }

    pub fn odometer(&self) -> Arc<Odometer> {
        self.odometer.clone()
    }

    pub fn line_sensor(&self) -> Arc<SimulatedLineSensor> {
        Arc::new(SimulatedLineSensor {
            world: self.world.clone(),
        })
    }

    /// Where the robot really is, as opposed to what the odometer thinks.
    pub fn true_pose(&self) -> Pose {
        let mut world = self.lock();
        world.advance_to(Instant::now());
        world.true_pose
    }

    fn lock(&self) -> MutexGuard<'_, SimWorld> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command(&self, left: f64, right: f64) -> u64 {
        self.lock().set_speeds(left, right)
    }

    /// Stop unless another command replaced the one numbered `seq`.
    fn stop_if_current(&self, seq: u64) {
        let mut world = self.lock();
        if world.command_seq == seq {
            world.set_speeds(0.0, 0.0);
        }
    }

    async fn run_for(&self, left: f64, right: f64, duration: Duration) {
        let seq = self.command(left, right);
        sleep(duration).await;
        self.stop_if_current(seq);
    }

    /// Time for the odometer to register `amount` at `rate` per second.
    fn duration_for(&self, amount: f64, rate: f64) -> Result<Duration> {
        let odometry_rate = rate * (1.0 + self.config.odometry_scale_error);
        if !(odometry_rate.is_finite() && odometry_rate > 0.0) {
            bail!(
                "Simulated odometry rate {} is not positive, check speeds and odometry_scale_error",
                odometry_rate
            );
        }
        Ok(Duration::try_from_secs_f64(amount.abs() / odometry_rate)?)
    }
}

#[async_trait]
impl MotionDriver for SimulatedRobot {
    async fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<()> {
        self.command(left, right);
        Ok(())
    }

    async fn turn_to(&mut self, heading: f64, immediate: bool) -> Result<()> {
        let turn = shortest_turn(self.odometer.read().heading(), heading);
        if turn.abs() < 1e-6 {
            return Ok(());
        }
        let speed = self.config.turn_speed;
        let rate = (2.0 * speed / self.config.track_width).to_degrees();
        let duration = self.duration_for(turn, rate)?;
        let (left, right) = if turn > 0.0 {
            (-speed, speed)
        } else {
            (speed, -speed)
        };
        trace!("Turning {:.2} degrees to {:.2}", turn, heading);

        if immediate {
            let seq = self.command(left, right);
            let robot = self.clone();
            tokio::spawn(async move {
                sleep(duration).await;
                robot.stop_if_current(seq);
            });
        } else {
            self.run_for(left, right, duration).await;
        }
        Ok(())
    }

    async fn advance(&mut self, distance: f64) -> Result<()> {
        let speed = self.config.travel_speed.copysign(distance);
        let duration = self.duration_for(distance, speed.abs())?;
        trace!("Advancing {:.2}", distance);
        self.run_for(speed, speed, duration).await;
        Ok(())
    }

    async fn go_to(&mut self, x: f64, y: f64) -> Result<()> {
        let pose = self.odometer.read();
        let (dx, dy) = (x - pose.x(), y - pose.y());
        let distance = dx.hypot(dy);
        if distance < 0.01 {
            return Ok(());
        }
        debug!("Travelling from {} to [{:.2}, {:.2}]", pose, x, y);
        self.turn_to(dy.atan2(dx).to_degrees(), false).await?;
        self.advance(distance).await
    }
}

/// Light sensor view of a [`SimulatedRobot`]'s world.
pub struct SimulatedLineSensor {
    world: Arc<Mutex<SimWorld>>,
}

impl LineSensor for SimulatedLineSensor {
    fn is_on_line(&self) -> bool {
        let mut world = self.world.lock().unwrap_or_else(PoisonError::into_inner);
        world.advance_to(Instant::now());
        world.sensor_on_line()
    }
}
