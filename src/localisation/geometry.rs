use serde::Serialize;

/// Heading in degrees at each of the four line crossings, in crossing order.
pub type LineSamples = [f64; 4];

/// Correction derived from one four line sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridOffsets {
    pub x: f64,
    pub y: f64,
    /// degrees to add to the current heading, not normalized
    pub heading_correction: f64,
}

/// Turn the four sweep headings into the rotation centre's offset from the
/// line intersection and the heading error.
///
/// Crossings 1 and 3 bound the x offset, 0 and 2 the y offset. The robot is
/// assumed to start in the negative quadrant so both offsets are negative.
pub fn compute_offsets(samples: &LineSamples, sensor_offset: f64) -> GridOffsets {
    let x_span = (samples[3] - samples[1]).abs();
    let y_span = (samples[2] - samples[0]).abs();
    GridOffsets {
        x: -sensor_offset * (x_span / 2.0).to_radians().cos(),
        y: -sensor_offset * (y_span / 2.0).to_radians().cos(),
        heading_correction: 90.0 - (samples[1] - samples[3]).abs() / 2.0 - samples[3],
    }
}
