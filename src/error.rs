use std::time::Duration;

use crate::localisation::LocaliserState;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum LocalisationError {
    #[error("calibration failed in {stage} after {lines_seen} line(s): {fault}")]
    CalibrationFailed {
        stage: LocaliserState,
        lines_seen: usize,
        fault: CalibrationFault,
    },
    #[error("motion command failed: {0}")]
    Motion(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationFault {
    #[error("no line found within {0:?}")]
    Timeout(Duration),
    #[error("no line found within {degrees} degrees of rotation")]
    RotationExceeded { degrees: f64 },
}

impl LocalisationError {
    pub fn is_calibration_fault(&self) -> bool {
        matches!(self, LocalisationError::CalibrationFailed { .. })
    }
}
