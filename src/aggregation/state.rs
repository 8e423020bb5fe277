//! Incremental mean accumulator

/// Running sum and count for an arithmetic mean
///
/// The plain sum gives exact results for ordinary data. A running mean is
/// kept alongside it and takes over once the sum leaves the finite range.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeanState {
    /// Sum of values
    sum: f64,

    /// Mean of values so far, updated as a convex combination
    running: f64,

    /// Count of values
    count: u64,
}

impl MeanState {
    /// Create new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value
    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        let n = self.count as f64;
        self.running = self.running * ((n - 1.0) / n) + value / n;
    }

    /// Merge another state into this one
    pub fn merge(&mut self, other: &MeanState) {
        let total = self.count + other.count;
        if total == 0 {
            return;
        }
        let n = total as f64;
        self.running =
            self.running * (self.count as f64 / n) + other.running * (other.count as f64 / n);
        self.sum += other.sum;
        self.count = total;
    }

    /// Number of values added
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Mean of the values, `None` when empty
    pub fn finalize(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if self.sum.is_finite() {
            Some(self.sum / self.count as f64)
        } else {
            Some(self.running)
        }
    }
}

impl FromIterator<f64> for MeanState {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        let mut state = Self::new();
        for value in iter {
            state.add(value);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_basic() {
        let state: MeanState = [10.0, 20.0, 30.0].into_iter().collect();
        assert_eq!(state.finalize(), Some(20.0));
        assert_eq!(state.count(), 3);
    }

    #[test]
    fn test_mean_empty() {
        assert_eq!(MeanState::new().finalize(), None);
    }

    #[test]
    fn test_mean_merge() {
        let mut a: MeanState = [1.0, 3.0].into_iter().collect();
        let b: MeanState = [2.0, 2.0, 2.0].into_iter().collect();
        a.merge(&b);

        assert_eq!(a.count(), 5);
        assert_eq!(a.finalize(), Some(2.0));
    }

    #[test]
    fn test_mean_near_f64_max_stays_finite() {
        let state: MeanState = [1e308, 1e308].into_iter().collect();
        assert_eq!(state.finalize(), Some(1e308));

        let state: MeanState = [1.7e308, 1.7e308, 1.7e308].into_iter().collect();
        let mean = state.finalize().unwrap();
        assert!(mean.is_finite());
        assert!((mean - 1.7e308).abs() <= 1.7e308 * 1e-15);

        let mut a: MeanState = [1.5e308].into_iter().collect();
        let b: MeanState = [1.5e308, 1.5e308].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.count(), 3);
        assert!(a.finalize().unwrap().is_finite());
    }
}
