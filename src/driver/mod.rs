pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Motion primitives of a differential drive base.
///
/// Speeds are wheel surface speeds in cm/s, headings are degrees in the
/// odometer's frame.
#[async_trait]
pub trait MotionDriver: Send + Sync {
    async fn set_wheel_speeds(&mut self, left: f64, right: f64) -> Result<()>;

    /// Rotate in place to `heading`. With `immediate` the call returns once
    /// the turn is started and the base stops itself when it gets there.
    async fn turn_to(&mut self, heading: f64, immediate: bool) -> Result<()>;

    /// Drive straight for `distance` cm, negative backs up.
    async fn advance(&mut self, distance: f64) -> Result<()>;

    async fn go_to(&mut self, x: f64, y: f64) -> Result<()>;

    async fn stop(&mut self) -> Result<()> {
        self.set_wheel_speeds(0.0, 0.0).await
    }
}

/// Feedback on detected events, a beep on the real robot.
pub trait Notifier: Send + Sync {
    fn signal(&self);
}

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn signal(&self) {
        info!("Beep");
    }
}
