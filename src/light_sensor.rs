/// Downward facing light sensor reporting whether it is over a grid line.
///
/// Readings are raw. Crossing detection is done by the caller with an
/// [`EdgeLatch`].
pub trait LineSensor: Send + Sync {
    fn is_on_line(&self) -> bool;
}

/// Counts one crossing per physical line.
///
/// The latch arms on a low reading and fires on the next high one, so the
/// sensor dwelling on a line's width is a single crossing.
#[derive(Debug, Default, Clone)]
pub struct EdgeLatch {
    on_line: bool,
}

impl EdgeLatch {
    /// Feed one reading, returns true on a new crossing.
    pub fn update(&mut self, on_line: bool) -> bool {
        let crossed = on_line && !self.on_line;
        self.on_line = on_line;
        crossed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_crossings(readings: &[bool]) -> usize {
        let mut latch = EdgeLatch::default();
        readings
            .iter()
            .filter(|reading| latch.update(**reading))
            .count()
    }

    #[test]
    fn dwell_then_new_line_is_two_crossings() {
        assert_eq!(count_crossings(&[true, true, true, false, true]), 2);
    }

    #[test]
    fn no_line_no_crossing() {
        assert_eq!(count_crossings(&[false, false, false]), 0);
    }

    #[test]
    fn starting_on_a_line_counts_once() {
        assert_eq!(count_crossings(&[true, true, false, false]), 1);
    }

    #[test]
    fn flicker_counts_every_rising_edge() {
        assert_eq!(count_crossings(&[false, true, false, true, false, true]), 3);
    }
}
