use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Wrap a heading in degrees into `[0, 360)`.
pub fn normalize_heading(heading: f64) -> f64 {
    let wrapped = heading.rem_euclid(360.0);
    // rem_euclid of a tiny negative value rounds up to 360.0
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed turn in degrees from `from` to `to`, in `[-180, 180)`.
pub fn shortest_turn(from: f64, to: f64) -> f64 {
    (to - from + 180.0).rem_euclid(360.0) - 180.0
}

/// Position in centimeters and heading in degrees.
///
/// Heading is measured counter clockwise from the positive x axis and is
/// always kept in `[0, 360)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawPose")]
pub struct Pose {
    x: f64,
    y: f64,
    heading: f64,
}

#[derive(Deserialize)]
struct RawPose {
    x: f64,
    y: f64,
    heading: f64,
}

impl From<RawPose> for Pose {
    fn from(raw: RawPose) -> Self {
        Pose::new(raw.x, raw.y, raw.heading)
    }
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading: normalize_heading(heading),
        }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn position(&self) -> na::Point2<f64> {
        na::Point2::new(self.x, self.y)
    }

    pub fn rotation(&self) -> na::Rotation2<f64> {
        na::Rotation2::new(self.heading.to_radians())
    }

    /// Point `distance` ahead of the rotation centre along the current heading.
    pub fn point_ahead(&self, distance: f64) -> na::Point2<f64> {
        self.position() + self.rotation() * na::Vector2::new(distance, 0.0)
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::origin()
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:.2}, {:.2}] -> {:.2}", self.x, self.y, self.heading)
    }
}

/// Selects which fields of a masked write are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoseMask {
    pub x: bool,
    pub y: bool,
    pub heading: bool,
}

impl PoseMask {
    pub const ALL: PoseMask = PoseMask::new(true, true, true);
    pub const X: PoseMask = PoseMask::new(true, false, false);
    pub const Y: PoseMask = PoseMask::new(false, true, false);
    pub const HEADING: PoseMask = PoseMask::new(false, false, true);

    pub const fn new(x: bool, y: bool, heading: bool) -> Self {
        Self { x, y, heading }
    }
}

/// Shared pose store.
///
/// Every read and write goes through one lock so a masked write is observed
/// as a single unit by concurrent readers.
#[derive(Debug, Default)]
pub struct Odometer {
    pose: Mutex<Pose>,
}

impl Odometer {
    pub fn new(initial: Pose) -> Self {
        Self {
            pose: Mutex::new(initial),
        }
    }

    pub fn read(&self) -> Pose {
        *self.lock()
    }

    /// Overwrite the fields selected by `mask`, leave the rest untouched.
    pub fn write(&self, values: Pose, mask: PoseMask) {
        let mut pose = self.lock();
        if mask.x {
            pose.x = values.x;
        }
        if mask.y {
            pose.y = values.y;
        }
        if mask.heading {
            pose.heading = normalize_heading(values.heading);
        }
    }

    /// Dead-reckoning update: move `distance` along the stored heading, then
    /// rotate by `rotation` degrees.
    pub fn integrate(&self, distance: f64, rotation: f64) {
        let mut pose = self.lock();
        let heading = pose.heading.to_radians();
        pose.x += distance * heading.cos();
        pose.y += distance * heading.sin();
        pose.heading = normalize_heading(pose.heading + rotation);
    }

    fn lock(&self) -> MutexGuard<'_, Pose> {
        // a panicking writer can't leave the pose half written
        self.pose.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
