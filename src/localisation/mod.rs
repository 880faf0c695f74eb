pub mod geometry;

use crate::configuration::{GridConfig, LocaliserConfig, SeekStrategy};
use crate::driver::{MotionDriver, Notifier};
use crate::error::{CalibrationFault, LocalisationError};
use crate::light_sensor::{EdgeLatch, LineSensor};
use crate::odometer::{shortest_turn, Odometer, Pose, PoseMask};
use geometry::{compute_offsets, GridOffsets, LineSamples};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, Instant, Interval, MissedTickBehavior};
use tracing::*;

/// Stages of the absolute localisation routine, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LocaliserState {
    Idle,
    SeekFirstLine,
    Advance,
    SweepFour,
    Compute,
    Correct,
    ReturnToOrigin,
    Done,
}

impl fmt::Display for LocaliserState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            LocaliserState::Idle => "idle",
            LocaliserState::SeekFirstLine => "seek first line",
            LocaliserState::Advance => "advance",
            LocaliserState::SweepFour => "sweep four",
            LocaliserState::Compute => "compute",
            LocaliserState::Correct => "correct",
            LocaliserState::ReturnToOrigin => "return to origin",
            LocaliserState::Done => "done",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalisationReport {
    pub samples: LineSamples,
    pub offsets: GridOffsets,
    pub corrected_pose: Pose,
}

/// One shot routine that finds the robot's true offset and heading from the
/// four grid lines around the starting intersection.
pub struct AbsoluteLocaliser {
    grid: GridConfig,
    config: LocaliserConfig,
    odometer: Arc<Odometer>,
    sensor: Arc<dyn LineSensor>,
    notifier: Arc<dyn Notifier>,
    state: LocaliserState,
}

impl AbsoluteLocaliser {
    pub fn new(
        grid: GridConfig,
        config: LocaliserConfig,
        odometer: Arc<Odometer>,
        sensor: Arc<dyn LineSensor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            grid,
            config,
            odometer,
            sensor,
            notifier,
            state: LocaliserState::Idle,
        }
    }

    pub fn state(&self) -> LocaliserState {
        self.state
    }

    /// Run every stage to completion and write the corrected pose.
    ///
    /// The wheels are stopped before any error is returned.
    pub async fn run(
        &mut self,
        driver: &mut dyn MotionDriver,
    ) -> Result<LocalisationReport, LocalisationError> {
        match self.run_stages(driver).await {
            Ok(report) => Ok(report),
            Err(err) => {
                error!("Localisation failed in {}: {}", self.state, err);
                if let Err(stop_err) = driver.stop().await {
                    warn!("Failed to stop after localisation failure {:?}", stop_err);
                }
                Err(err)
            }
        }
    }

    async fn run_stages(
        &mut self,
        driver: &mut dyn MotionDriver,
    ) -> Result<LocalisationReport, LocalisationError> {
        self.transition(LocaliserState::SeekFirstLine);
        self.seek_first_line(driver).await?;

        // put the rotation centre on the line instead of the sensor
        self.transition(LocaliserState::Advance);
        driver.advance(self.grid.sensor_offset).await?;

        self.transition(LocaliserState::SweepFour);
        let samples = self.sweep_four(driver).await?;

        self.transition(LocaliserState::Compute);
        sleep(self.config.compute_settle()).await;
        let offsets = compute_offsets(&samples, self.grid.sensor_offset);
        info!(
            "Samples {:?} give offsets x {:.3} y {:.3} heading {:.3}",
            samples, offsets.x, offsets.y, offsets.heading_correction
        );

        self.transition(LocaliserState::Correct);
        let heading = self.odometer.read().heading();
        let corrected_pose =
            Pose::new(offsets.x, offsets.y, heading + offsets.heading_correction);
        self.odometer.write(corrected_pose, PoseMask::ALL);
        info!("Pose corrected to {}", corrected_pose);

        self.transition(LocaliserState::ReturnToOrigin);
        driver.go_to(0.0, 0.0).await?;
        // blocking turn so Done means the robot is parked facing 0
        driver.turn_to(0.0, false).await?;
        driver.stop().await?;

        self.transition(LocaliserState::Done);
        Ok(LocalisationReport {
            samples,
            offsets,
            corrected_pose,
        })
    }

    async fn seek_first_line(
        &mut self,
        driver: &mut dyn MotionDriver,
    ) -> Result<(), LocalisationError> {
        let speed = self.config.seek_speed;
        let rotation_limit = match self.config.seek {
            SeekStrategy::Rotate => {
                driver.set_wheel_speeds(-speed, speed).await?;
                Some(self.config.max_seek_rotation)
            }
            SeekStrategy::Diagonal { heading } => {
                driver.turn_to(heading, false).await?;
                driver.set_wheel_speeds(speed, speed).await?;
                None
            }
        };

        let mut budget = SearchBudget::new(
            self.config.seek_timeout(),
            rotation_limit,
            self.odometer.read().heading(),
        );
        let mut poll = self.poll_interval();
        loop {
            poll.tick().await;
            if self.sensor.is_on_line() {
                break;
            }
            budget
                .check(self.odometer.read().heading())
                .map_err(|fault| self.fault(0, fault))?;
        }

        driver.stop().await?;
        self.notifier.signal();
        info!("First line found at {}", self.odometer.read());
        sleep(self.config.first_line_settle()).await;
        Ok(())
    }

    async fn sweep_four(
        &mut self,
        driver: &mut dyn MotionDriver,
    ) -> Result<LineSamples, LocalisationError> {
        let speed = self.config.sweep_speed;
        driver.set_wheel_speeds(-speed, speed).await?;

        let mut budget = SearchBudget::new(
            self.config.sweep_timeout(),
            Some(self.config.max_sweep_rotation),
            self.odometer.read().heading(),
        );
        let mut latch = EdgeLatch::default();
        let mut samples = [0.0; 4];
        let mut lines_seen = 0;
        let mut poll = self.poll_interval();
        while lines_seen < samples.len() {
            poll.tick().await;
            let on_line = self.sensor.is_on_line();
            let heading = self.odometer.read().heading();
            if latch.update(on_line) {
                self.notifier.signal();
                samples[lines_seen] = heading;
                lines_seen += 1;
                debug!("Line {} crossed at heading {:.2}", lines_seen, heading);
                continue;
            }
            budget
                .check(heading)
                .map_err(|fault| self.fault(lines_seen, fault))?;
        }

        driver.stop().await?;
        Ok(samples)
    }

    fn poll_interval(&self) -> Interval {
        let mut poll = interval(self.config.poll_period());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll
    }

    fn fault(&self, lines_seen: usize, fault: CalibrationFault) -> LocalisationError {
        LocalisationError::CalibrationFailed {
            stage: self.state,
            lines_seen,
            fault,
        }
    }

    fn transition(&mut self, next: LocaliserState) {
        debug!("Localiser {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Bounds a line search by time and, optionally, by how far the robot turned.
struct SearchBudget {
    timeout: Duration,
    deadline: Instant,
    rotation_limit: Option<f64>,
    last_heading: f64,
    rotated: f64,
}

impl SearchBudget {
    fn new(timeout: Duration, rotation_limit: Option<f64>, heading: f64) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
            rotation_limit,
            last_heading: heading,
            rotated: 0.0,
        }
    }

    fn check(&mut self, heading: f64) -> Result<(), CalibrationFault> {
        self.rotated += shortest_turn(self.last_heading, heading).abs();
        self.last_heading = heading;
        if let Some(limit) = self.rotation_limit {
            if self.rotated > limit {
                return Err(CalibrationFault::RotationExceeded {
                    degrees: self.rotated,
                });
            }
        }
        if Instant::now() >= self.deadline {
            return Err(CalibrationFault::Timeout(self.timeout));
        }
        Ok(())
    }
}
