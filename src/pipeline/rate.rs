use std::time::Instant;

/// Cumulative event rate: total samples over total elapsed time since start.
///
/// Converges over a run instead of tracking recent bursts. Each series owns
/// its own meter.
#[derive(Debug, Clone, Default)]
pub struct RateMeter {
    started: Option<Instant>,
    count: u64,
}

impl RateMeter {
    /// Meter whose clock starts at the first sample
    pub fn new() -> Self {
        Self::default()
    }

    /// Meter whose clock already runs
    pub fn started_at(start: Instant) -> Self {
        Self {
            started: Some(start),
            count: 0,
        }
    }

    pub fn sample(&mut self) {
        self.sample_at(Instant::now());
    }

    pub fn sample_at(&mut self, now: Instant) {
        self.started.get_or_insert(now);
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn current_rate(&self) -> f64 {
        self.rate_at(Instant::now())
    }

    /// Samples per second up to `now`; the raw count while no time has passed
    pub fn rate_at(&self, now: Instant) -> f64 {
        let Some(start) = self.started else {
            return 0.0;
        };
        let elapsed = now.saturating_duration_since(start).as_secs_f64();
        if elapsed > 0.0 {
            self.count as f64 / elapsed
        } else {
            self.count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn converges_to_sampling_frequency() {
        let t0 = Instant::now();
        let interval = Duration::from_micros(33_333);
        let mut meter = RateMeter::new();

        let mut last = t0;
        for k in 0..3000u32 {
            last = t0 + interval * k;
            meter.sample_at(last);
        }

        let expected = 1.0 / interval.as_secs_f64();
        assert_relative_eq!(meter.rate_at(last), expected, max_relative = 1e-3);
    }

    #[test]
    fn zero_elapsed_reports_count() {
        let t0 = Instant::now();
        let mut meter = RateMeter::new();
        meter.sample_at(t0);
        assert_eq!(meter.rate_at(t0), 1.0);
        assert_eq!(RateMeter::new().rate_at(t0), 0.0);
    }

    #[test]
    fn running_clock_counts_from_start() {
        let t0 = Instant::now();
        let mut meter = RateMeter::started_at(t0);
        for _ in 0..10 {
            meter.sample_at(t0 + Duration::from_millis(10));
        }
        assert_relative_eq!(meter.rate_at(t0 + Duration::from_secs(2)), 5.0);
    }

    #[test]
    fn meters_do_not_share_state() {
        let t0 = Instant::now();
        let mut video = RateMeter::new();
        let consumer = RateMeter::new();
        video.sample_at(t0);
        assert_eq!(video.count(), 1);
        assert_eq!(consumer.count(), 0);
    }
}
