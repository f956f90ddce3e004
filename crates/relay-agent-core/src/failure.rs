use std::collections::VecDeque;

/// Density check over the most recent tool outcomes.
///
/// Stops once the failures still inside the window reach the threshold. A
/// success in between does not reset the count; only eviction does.
#[derive(Debug, Clone)]
pub struct FailureWindow {
    outcomes: VecDeque<bool>,
    window_size: usize,
    failure_threshold: usize,
}

impl FailureWindow {
    /// Both limits are clamped to at least 1.
    pub fn new(window_size: usize, failure_threshold: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            outcomes: VecDeque::with_capacity(window_size),
            window_size,
            failure_threshold: failure_threshold.max(1),
        }
    }

    pub fn record(&mut self, is_failure: bool) {
        if self.outcomes.len() == self.window_size {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(is_failure);
    }

    pub fn should_stop(&self) -> bool {
        self.failures() >= self.failure_threshold
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|failed| **failed).count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn reset(&mut self) {
        self.outcomes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_are_clamped() {
        let mut window = FailureWindow::new(0, 0);
        assert_eq!(window.window_size(), 1);
        assert_eq!(window.failure_threshold(), 1);
        assert!(!window.should_stop());
        window.record(true);
        assert!(window.should_stop());
        window.record(false);
        assert!(!window.should_stop());
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn reset_clears_history() {
        let mut window = FailureWindow::new(3, 2);
        window.record(true);
        window.record(true);
        assert!(window.should_stop());
        window.reset();
        assert!(window.is_empty());
        assert!(!window.should_stop());
    }
}
