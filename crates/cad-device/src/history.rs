//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Append-only reading storage for the simulated device."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---

/// Instantaneous active power in watts.
pub type Watts = u32;

/// Ordered, append-only sequence of readings.
///
/// Readings are never mutated or removed once pushed; position encodes the
/// logical timestamp.
#[derive(Debug, Clone, Default)]
pub struct ReadingHistory {
    readings: Vec<Watts>,
}

impl ReadingHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            readings: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, reading: Watts) {
        self.readings.push(reading);
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn as_slice(&self) -> &[Watts] {
        &self.readings
    }

    /// The most recent `count` readings, or all of them when fewer exist.
    pub fn tail(&self, count: usize) -> &[Watts] {
        let start = self.readings.len().saturating_sub(count);
        &self.readings[start..]
    }

    /// Consecutive non-overlapping blocks from the oldest reading; the last
    /// block may be shorter.
    pub fn blocks(&self, size: usize) -> std::slice::Chunks<'_, Watts> {
        self.readings.chunks(size.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_of(values: &[Watts]) -> ReadingHistory {
        let mut history = ReadingHistory::default();
        for value in values {
            history.push(*value);
        }
        history
    }

    #[test]
    fn tail_is_a_suffix() {
        let history = history_of(&[1, 2, 3, 4, 5]);
        assert_eq!(history.tail(2), &[4, 5]);
        assert_eq!(history.tail(0), &[] as &[Watts]);
        assert_eq!(history.tail(50), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn blocks_keep_partial_remainder() {
        let history = history_of(&[1, 2, 3, 4, 5]);
        let blocks: Vec<&[Watts]> = history.blocks(2).collect();
        assert_eq!(blocks, vec![&[1, 2][..], &[3, 4][..], &[5][..]]);
    }

    #[test]
    fn empty_history_has_no_blocks() {
        assert_eq!(ReadingHistory::default().blocks(180).count(), 0);
    }
}
