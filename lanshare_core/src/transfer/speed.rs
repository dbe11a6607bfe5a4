use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of throughput samples in bytes per second
#[derive(Debug, Clone)]
pub struct SpeedMonitor {
    window: usize,
    samples: VecDeque<f64>,
}

impl SpeedMonitor {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn add_sample(&mut self, bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
        self.samples.push_back(speed);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
    }

    /// Mean of the retained samples; 0 before the first sample
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn current(&self) -> f64 {
        self.samples.back().copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_recent_samples() {
        let mut monitor = SpeedMonitor::new(3);
        assert_eq!(monitor.average(), 0.0);

        for bytes in [100, 200, 300, 400] {
            monitor.add_sample(bytes, Duration::from_secs(1));
        }

        assert_eq!(monitor.len(), 3);
        assert_eq!(monitor.current(), 400.0);
        assert_eq!(monitor.average(), 300.0);
    }

    #[test]
    fn test_zero_elapsed_counts_as_zero_speed() {
        let mut monitor = SpeedMonitor::new(10);
        monitor.add_sample(1024, Duration::ZERO);
        assert_eq!(monitor.current(), 0.0);
    }
}
