use crate::configuration::GridConfig;
use crate::light_sensor::LineSensor;
use crate::odometer::{Odometer, Pose, PoseMask};
use nalgebra as na;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::*;

/// Grid snapping rules, independent of any sensor or timer.
#[derive(Debug, Clone)]
pub struct GridSnapper {
    grid: GridConfig,
}

/// Corrected axis values for one tick, `None` where the axis was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisSnap {
    pub x: Option<f64>,
    pub y: Option<f64>,
}

impl GridSnapper {
    pub fn new(grid: GridConfig) -> Self {
        Self { grid }
    }

    /// True when `value` sits less than the tolerance below a grid line.
    ///
    /// The remainder keeps the sign of `value`, so negative coordinates are
    /// never near a line.
    pub fn is_near_line(&self, value: f64) -> bool {
        let distance_from_line = self.grid.grid_spacing - value % self.grid.grid_spacing;
        distance_from_line.abs() < self.grid.tolerance
    }

    /// Grid multiple of `value` biased up by the tolerance, truncated towards
    /// zero.
    pub fn nearest_line(&self, value: f64) -> f64 {
        ((value + self.grid.tolerance) / self.grid.grid_spacing).trunc() * self.grid.grid_spacing
    }

    /// Sensor to centre offset along the current heading.
    pub fn sensor_projection(&self, heading: f64) -> na::Vector2<f64> {
        na::Rotation2::new(heading.to_radians()) * na::Vector2::new(self.grid.sensor_offset, 0.0)
    }

    pub fn snap(&self, pose: &Pose) -> AxisSnap {
        let projection = self.sensor_projection(pose.heading());
        let x = self
            .is_near_line(pose.x())
            .then(|| self.nearest_line(pose.x()) + projection.x);
        let y = self
            .is_near_line(pose.y())
            .then(|| self.nearest_line(pose.y()) + projection.y);
        AxisSnap { x, y }
    }
}

#[derive(Debug, Default)]
struct CorrectionStats {
    ticks: AtomicU64,
    x_snaps: AtomicU64,
    y_snaps: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CorrectionCounts {
    pub ticks: u64,
    pub x_snaps: u64,
    pub y_snaps: u64,
}

/// One correction step: read the sensor and snap the odometer if a line is
/// under it.
#[derive(Clone)]
pub struct GridCorrector {
    snapper: GridSnapper,
    odometer: Arc<Odometer>,
    sensor: Arc<dyn LineSensor>,
    stats: Arc<CorrectionStats>,
}

impl GridCorrector {
    pub fn new(grid: GridConfig, odometer: Arc<Odometer>, sensor: Arc<dyn LineSensor>) -> Self {
        Self {
            snapper: GridSnapper::new(grid),
            odometer,
            sensor,
            stats: Arc::default(),
        }
    }

    pub fn tick(&self) -> AxisSnap {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        if !self.sensor.is_on_line() {
            return AxisSnap::default();
        }

        let pose = self.odometer.read();
        let snap = self.snapper.snap(&pose);
        // each axis is its own masked write so heading and the other axis
        // keep whatever the integrator wrote in between
        if let Some(x) = snap.x {
            self.odometer.write(Pose::new(x, 0.0, 0.0), PoseMask::X);
            self.stats.x_snaps.fetch_add(1, Ordering::Relaxed);
            debug!("Snapped x {:.2} -> {:.2}", pose.x(), x);
        }
        if let Some(y) = snap.y {
            self.odometer.write(Pose::new(0.0, y, 0.0), PoseMask::Y);
            self.stats.y_snaps.fetch_add(1, Ordering::Relaxed);
            debug!("Snapped y {:.2} -> {:.2}", pose.y(), y);
        }
        snap
    }

    pub fn counts(&self) -> CorrectionCounts {
        CorrectionCounts {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            x_snaps: self.stats.x_snaps.load(Ordering::Relaxed),
            y_snaps: self.stats.y_snaps.load(Ordering::Relaxed),
        }
    }
}

struct CorrectionTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic odometry correction running on its own tokio task.
pub struct OdometryCorrection {
    corrector: GridCorrector,
    period: Duration,
    task: Option<CorrectionTask>,
}

impl OdometryCorrection {
    pub fn new(grid: GridConfig, odometer: Arc<Odometer>, sensor: Arc<dyn LineSensor>) -> Self {
        let period = grid.correction_period().max(Duration::from_millis(1));
        Self {
            corrector: GridCorrector::new(grid, odometer, sensor),
            period,
            task: None,
        }
    }

    /// Begin ticking. Does nothing if already running.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        info!("Starting odometry correction every {:?}", self.period);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(correction_loop(
            self.corrector.clone(),
            self.period,
            cancel.clone(),
        ));
        self.task = Some(CorrectionTask { cancel, handle });
    }

    /// Stop ticking. Once this returns no further tick runs.
    ///
    /// Safe to call when stopped or never started.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            if let Err(err) = task.handle.await {
                error!("Odometry correction task failed {:?}", err);
            }
            info!("Odometry correction stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn counts(&self) -> CorrectionCounts {
        self.corrector.counts()
    }
}

impl Drop for OdometryCorrection {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.cancel.cancel();
        }
    }
}

async fn correction_loop(corrector: GridCorrector, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                corrector.tick();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::atomic::AtomicBool;

    const SPACING: f64 = 30.48;

    #[derive(Default)]
    struct FixedSensor {
        on_line: AtomicBool,
    }

    impl FixedSensor {
        fn on() -> Arc<Self> {
            Arc::new(Self {
                on_line: AtomicBool::new(true),
            })
        }

        fn off() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set(&self, on_line: bool) {
            self.on_line.store(on_line, Ordering::SeqCst);
        }
    }

    impl LineSensor for FixedSensor {
        fn is_on_line(&self) -> bool {
            self.on_line.load(Ordering::SeqCst)
        }
    }

    fn snapper() -> GridSnapper {
        GridSnapper::new(GridConfig::default())
    }

    #[test]
    fn just_inside_tolerance_snaps() {
        let snapper = snapper();
        assert!(snapper.is_near_line(3.0 * SPACING - (0.5 - 1e-6)));
        assert!(!snapper.is_near_line(3.0 * SPACING - (0.5 + 1e-6)));
    }

    #[test]
    fn only_approach_from_below_is_near() {
        let snapper = snapper();
        assert!(snapper.is_near_line(SPACING - 0.2));
        assert!(!snapper.is_near_line(SPACING + 0.2));
        assert!(!snapper.is_near_line(SPACING));
        assert!(!snapper.is_near_line(SPACING / 2.0));
    }

    #[test]
    fn negative_coordinates_never_snap() {
        let snapper = snapper();
        for value in [-0.2, -0.49, -SPACING - 0.3, -SPACING + 0.2, -2.0 * SPACING - 0.1] {
            assert!(!snapper.is_near_line(value), "{value} snapped");
        }
    }

    #[test]
    fn negative_pose_tick_leaves_odometer() {
        let start = Pose::new(-0.2, -SPACING - 0.3, 45.0);
        let odometer = Arc::new(Odometer::new(start));
        let corrector = GridCorrector::new(GridConfig::default(), odometer.clone(), FixedSensor::on());

        assert_eq!(corrector.tick(), AxisSnap::default());
        assert_eq!(odometer.read(), start);
        assert_eq!(corrector.counts().x_snaps + corrector.counts().y_snaps, 0);
    }

    #[test]
    fn nearest_line_rounds_up_across_tolerance() {
        let snapper = snapper();
        assert_relative_eq!(snapper.nearest_line(2.0 * SPACING - 0.3), 2.0 * SPACING);
        assert_relative_eq!(snapper.nearest_line(2.0 * SPACING + 5.0), 2.0 * SPACING);
    }

    #[test]
    fn projection_follows_heading() {
        let snapper = snapper();
        let east = snapper.sensor_projection(0.0);
        assert_relative_eq!(east.x, 4.5, epsilon = 1e-9);
        assert_relative_eq!(east.y, 0.0, epsilon = 1e-9);
        let north = snapper.sensor_projection(90.0);
        assert_relative_eq!(north.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(north.y, 4.5, epsilon = 1e-9);
    }

    #[test]
    fn off_line_tick_changes_nothing() {
        let odometer = Arc::new(Odometer::new(Pose::new(SPACING - 0.2, 5.0, 90.0)));
        let corrector = GridCorrector::new(GridConfig::default(), odometer.clone(), FixedSensor::off());
        assert_eq!(corrector.tick(), AxisSnap::default());
        assert_eq!(odometer.read(), Pose::new(SPACING - 0.2, 5.0, 90.0));
    }

    #[test]
    fn x_snap_leaves_y_and_heading() {
        let odometer = Arc::new(Odometer::new(Pose::new(SPACING - 0.2, 5.0, 90.0)));
        let corrector = GridCorrector::new(GridConfig::default(), odometer.clone(), FixedSensor::on());

        let snap = corrector.tick();

        assert!(snap.x.is_some());
        assert!(snap.y.is_none());
        let pose = odometer.read();
        assert_relative_eq!(pose.x(), SPACING, epsilon = 1e-9);
        assert_relative_eq!(pose.y(), 5.0);
        assert_relative_eq!(pose.heading(), 90.0);
    }

    #[test]
    fn both_axes_snap_in_one_tick() {
        let odometer = Arc::new(Odometer::new(Pose::new(SPACING - 0.1, 2.0 * SPACING - 0.3, 45.0)));
        let corrector = GridCorrector::new(GridConfig::default(), odometer.clone(), FixedSensor::on());

        corrector.tick();

        let pose = odometer.read();
        let offset = 4.5 * 45_f64.to_radians().cos();
        assert_relative_eq!(pose.x(), SPACING + offset, epsilon = 1e-9);
        assert_relative_eq!(pose.y(), 2.0 * SPACING + offset, epsilon = 1e-9);
        assert_relative_eq!(pose.heading(), 45.0);
        assert_eq!(
            corrector.counts(),
            CorrectionCounts {
                ticks: 1,
                x_snaps: 1,
                y_snaps: 1
            }
        );
    }

    #[test]
    fn snap_is_a_fixed_point() {
        for heading in [0.0, 45.0, 90.0, 95.0, 180.0, 265.0, 300.0] {
            let odometer = Arc::new(Odometer::new(Pose::new(SPACING - 0.2, 3.0, heading)));
            let corrector =
                GridCorrector::new(GridConfig::default(), odometer.clone(), FixedSensor::on());
            corrector.tick();
            let first = odometer.read();
            corrector.tick();
            let second = odometer.read();
            assert_relative_eq!(first.x(), second.x(), epsilon = 1e-9);
            assert_relative_eq!(first.y(), second.y(), epsilon = 1e-9);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn service_ticks_until_stopped() {
        let odometer = Arc::new(Odometer::new(Pose::new(1.0, 1.0, 0.0)));
        let sensor = FixedSensor::off();
        let mut correction = OdometryCorrection::new(GridConfig::default(), odometer, sensor);

        correction.start();
        assert!(correction.is_running());
        tokio::time::sleep(Duration::from_millis(105)).await;
        correction.stop().await;
        assert!(!correction.is_running());

        let stopped_at = correction.counts().ticks;
        assert!(stopped_at >= 10, "only {} ticks", stopped_at);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(correction.counts().ticks, stopped_at);
    }

    #[tokio::test(start_paused = true)]
    async fn service_snaps_when_line_appears() {
        let odometer = Arc::new(Odometer::new(Pose::new(5.0, SPACING - 0.25, 90.0)));
        let sensor = FixedSensor::off();
        let mut correction =
            OdometryCorrection::new(GridConfig::default(), odometer.clone(), sensor.clone());
        correction.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_relative_eq!(odometer.read().y(), SPACING - 0.25);

        sensor.set(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        correction.stop().await;

        assert_relative_eq!(odometer.read().y(), SPACING + 4.5, epsilon = 1e-9);
        assert_eq!(correction.counts().y_snaps, 1);
        assert_eq!(correction.counts().x_snaps, 0);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let odometer = Arc::new(Odometer::default());
        let mut correction =
            OdometryCorrection::new(GridConfig::default(), odometer, FixedSensor::off());

        correction.stop().await;
        correction.start();
        correction.start();
        assert!(correction.is_running());
        correction.stop().await;
        correction.stop().await;
        assert!(!correction.is_running());

        correction.start();
        assert!(correction.is_running());
        correction.stop().await;
    }
}
