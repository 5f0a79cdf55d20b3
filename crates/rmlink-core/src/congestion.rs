//! AIMD congestion control and adaptive retry timeout.
//!
//! The retry timeout follows classic RTT estimation: a smoothed mean and a
//! smoothed mean deviation, combined with a Chebyshev-style bound. All values are
//! kept in fixed point, 128ths of a millisecond, so sub-millisecond samples
//! survive integer arithmetic.
//!
//! The window grows in slow start by the number of newly acknowledged messages
//! until it passes the slow start threshold, then linearly. A retry timeout is a
//! loss signal: the threshold halves, the window collapses to one message and the
//! timeout doubles.

use std::time::Duration;

/// Fixed-point shift: values are stored in 1/128 ms
pub const TIME_MULTIPLIER: u32 = 7;

/// Deviation multiplier, as a shift (factor 4)
pub const CHEBYSHEV_FACTOR: u32 = 2;

/// Smoothing gain for the mean and deviation, as a shift (gain 1/8)
const GAIN_SHIFT: u32 = 3;

/// Lower bound on the retry timeout, before adding the mean (ms)
const MIN_TIMEOUT_MS: i64 = 200;

/// Largest representable mean RTT
const MAX_MEAN_RTT: i64 = i64::MAX >> (TIME_MULTIPLIER + CHEBYSHEV_FACTOR + 2);

/// Cap on the backed-off retry timeout (fixed point)
const MAX_TIMEOUT: i64 = (60 * 60 * 1000) << TIME_MULTIPLIER;

/// Divisor turning the loss window distance into a segment size
const SEGMENT_DIVISOR: usize = 4;

fn to_fixed(duration: Duration) -> i64 {
    let micros = i64::try_from(duration.as_micros())
        .unwrap_or(i64::MAX)
        .min(MAX_MEAN_RTT);
    ((micros << TIME_MULTIPLIER) / 1000).min(MAX_MEAN_RTT)
}

fn from_fixed(value: i64) -> Duration {
    let micros = (value.max(0) * 1000) >> TIME_MULTIPLIER;
    Duration::from_micros(micros as u64)
}

/// Smoothed RTT statistics and derived retry timeout
#[derive(Debug, Clone)]
pub struct RttEstimator {
    mean_rtt: i64,
    serr_rtt: i64,
    timeout: i64,
}

impl RttEstimator {
    /// Seed the estimator with an initial RTT guess
    #[must_use]
    pub fn new(initial_rtt: Duration) -> Self {
        let mean_rtt = to_fixed(initial_rtt);
        let serr_rtt = mean_rtt >> 1;
        let mut estimator = Self {
            mean_rtt,
            serr_rtt,
            timeout: 0,
        };
        estimator.recompute_timeout();
        estimator
    }

    fn recompute_timeout(&mut self) {
        let floor = ((MIN_TIMEOUT_MS << TIME_MULTIPLIER) * 2) + self.mean_rtt;
        let bound = self.mean_rtt + (self.serr_rtt << CHEBYSHEV_FACTOR);
        self.timeout = floor.max(bound).min(MAX_TIMEOUT);
    }

    /// Fold a new RTT sample into the statistics
    pub fn update(&mut self, sample: Duration) {
        let sample = to_fixed(sample);
        let delta = sample - self.mean_rtt;
        self.mean_rtt = (self.mean_rtt + (delta >> GAIN_SHIFT)).clamp(0, MAX_MEAN_RTT);
        self.serr_rtt += (delta.abs() - self.serr_rtt) >> GAIN_SHIFT;
        self.recompute_timeout();
    }

    /// Double the retry timeout after a loss
    pub fn back_off(&mut self) {
        self.timeout = (self.timeout << 1).min(MAX_TIMEOUT);
    }

    /// Current retry timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        from_fixed(self.timeout)
    }

    /// Smoothed mean RTT
    #[must_use]
    pub fn mean_rtt(&self) -> Duration {
        from_fixed(self.mean_rtt)
    }

    /// Smoothed mean deviation
    #[must_use]
    pub fn deviation(&self) -> Duration {
        from_fixed(self.serr_rtt)
    }
}

/// AIMD congestion window, counted in messages
#[derive(Debug, Clone)]
pub struct CongestionWindow {
    window_size: usize,
    max_window_size: usize,
    slow_start_threshold: usize,
    loss_window_size: usize,
    congestion_control_mode_acks: usize,
    startup: bool,
}

impl CongestionWindow {
    /// Create a window starting at `initial` messages, never exceeding `max`
    ///
    /// # Panics
    ///
    /// Panics if `max` is 0.
    #[must_use]
    pub fn new(initial: usize, max: usize) -> Self {
        assert!(max > 0, "maximum window size must be greater than 0");
        Self {
            window_size: initial.clamp(1, max),
            max_window_size: max,
            slow_start_threshold: max,
            loss_window_size: 0,
            congestion_control_mode_acks: 0,
            startup: true,
        }
    }

    /// Current window size
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Maximum window size
    #[must_use]
    pub fn max_window_size(&self) -> usize {
        self.max_window_size
    }

    /// Slow start threshold
    #[must_use]
    pub fn slow_start_threshold(&self) -> usize {
        self.slow_start_threshold
    }

    /// Window size at the last loss
    #[must_use]
    pub fn loss_window_size(&self) -> usize {
        self.loss_window_size
    }

    /// Whether no loss has been observed yet
    #[must_use]
    pub fn in_startup(&self) -> bool {
        self.startup
    }

    /// Whether the window is still in slow start
    #[must_use]
    pub fn in_slow_start(&self) -> bool {
        self.window_size <= self.slow_start_threshold
    }

    /// Grow the window after `acked` messages slid out of it
    pub fn on_acked(&mut self, acked: usize) {
        if acked == 0 {
            return;
        }

        if self.in_slow_start() {
            self.window_size = (self.window_size + acked)
                .min(self.slow_start_threshold + 1)
                .min(self.max_window_size);
            return;
        }

        self.congestion_control_mode_acks += acked;
        let segment = (self.loss_window_size.saturating_sub(self.slow_start_threshold)
            / SEGMENT_DIVISOR)
            .max(1);
        let needed = (self.window_size / segment).max(1);
        if self.congestion_control_mode_acks >= needed {
            self.congestion_control_mode_acks -= needed;
            self.window_size = (self.window_size + 1).min(self.max_window_size);
        }
    }

    /// React to a loss: halve the threshold and restart from one message
    pub fn on_loss(&mut self) {
        self.congestion_control_mode_acks = 0;
        self.slow_start_threshold = (self.window_size >> 1).max(1);
        self.loss_window_size = self.window_size;
        self.window_size = 1;
        self.startup = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_timeout() {
        let rtt = RttEstimator::new(Duration::from_millis(200));
        assert_eq!(rtt.mean_rtt(), Duration::from_millis(200));
        assert_eq!(rtt.deviation(), Duration::from_millis(100));
        // max(2 * 200 + 200, 200 + 4 * 100)
        assert_eq!(rtt.timeout(), Duration::from_millis(600));
    }

    #[test]
    fn test_back_off_doubles() {
        let mut rtt = RttEstimator::new(Duration::from_millis(200));
        rtt.back_off();
        assert_eq!(rtt.timeout(), Duration::from_millis(1200));
        rtt.back_off();
        assert_eq!(rtt.timeout(), Duration::from_millis(2400));
    }

    #[test]
    fn test_back_off_is_capped() {
        let mut rtt = RttEstimator::new(Duration::from_secs(10));
        for _ in 0..64 {
            rtt.back_off();
        }
        assert_eq!(rtt.timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_sample_resets_backoff() {
        let mut rtt = RttEstimator::new(Duration::from_millis(200));
        rtt.back_off();
        rtt.back_off();
        rtt.update(Duration::from_millis(200));
        assert!(rtt.timeout() <= Duration::from_millis(600));
    }

    #[test]
    fn test_mean_converges() {
        let mut rtt = RttEstimator::new(Duration::from_millis(500));
        for _ in 0..100 {
            rtt.update(Duration::from_millis(20));
        }
        let mean = rtt.mean_rtt().as_millis();
        assert!((19..=21).contains(&mean), "mean {mean}");
        // The floor keeps the timeout above 400 ms plus the mean
        assert!(rtt.timeout() >= Duration::from_millis(420));
    }

    #[test]
    fn test_sub_millisecond_precision() {
        let mut rtt = RttEstimator::new(Duration::from_micros(250));
        rtt.update(Duration::from_micros(250));
        assert_eq!(rtt.mean_rtt().as_micros(), 250);
    }

    #[test]
    fn test_slow_start_growth() {
        let mut cw = CongestionWindow::new(1, 8);
        assert!(cw.in_slow_start());
        cw.on_acked(1);
        assert_eq!(cw.window_size(), 2);
        cw.on_acked(2);
        assert_eq!(cw.window_size(), 4);
        cw.on_acked(16);
        assert_eq!(cw.window_size(), 8);
    }

    #[test]
    fn test_loss_halves_threshold() {
        let mut cw = CongestionWindow::new(8, 8);
        cw.on_loss();
        assert_eq!(cw.window_size(), 1);
        assert_eq!(cw.slow_start_threshold(), 4);
        assert_eq!(cw.loss_window_size(), 8);
        assert!(!cw.in_startup());
    }

    #[test]
    fn test_loss_threshold_floor() {
        let mut cw = CongestionWindow::new(1, 1);
        cw.on_loss();
        assert_eq!(cw.window_size(), 1);
        assert_eq!(cw.slow_start_threshold(), 1);
    }

    #[test]
    fn test_slow_start_capped_at_threshold_plus_one() {
        let mut cw = CongestionWindow::new(16, 16);
        cw.on_loss();
        cw.on_acked(100);
        assert_eq!(cw.window_size(), 9);
        assert!(!cw.in_slow_start());
    }

    #[test]
    fn test_congestion_avoidance_is_linear() {
        let mut cw = CongestionWindow::new(16, 32);
        cw.on_loss();
        cw.on_acked(100);
        let start = cw.window_size();

        // One ack at a time never grows by more than one message per step
        let mut previous = start;
        for _ in 0..64 {
            cw.on_acked(1);
            assert!(cw.window_size() <= previous + 1);
            previous = cw.window_size();
        }
        assert!(cw.window_size() > start);
        assert!(cw.window_size() < start + 64);
    }
}
