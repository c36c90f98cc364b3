/// Smoothing factor of the frame-rate moving average.
pub const FPS_ALPHA: f64 = 0.1;

/// Exponential moving average of the tick rate.
#[derive(Clone, Debug, Default)]
pub struct FpsMeter {
    last_timestamp_ms: Option<f64>,
    average: Option<f64>,
}

impl FpsMeter {
    /// Fold the tick at `timestamp_ms` into the average. Returns the updated
    /// average, or `None` when no rate can be derived yet.
    pub fn sample(&mut self, timestamp_ms: f64) -> Option<f64> {
        let previous = self.last_timestamp_ms.replace(timestamp_ms)?;
        let delta = timestamp_ms - previous;
        if delta <= 0.0 {
            return None;
        }

        let instant = 1000.0 / delta;
        let average = match self.average {
            Some(average) => FPS_ALPHA * instant + (1.0 - FPS_ALPHA) * average,
            None => instant,
        };
        self.average = Some(average);
        Some(average)
    }

    pub fn reset(&mut self) {
        self.last_timestamp_ms = None;
        self.average = None;
    }
}

pub fn format_fps(average: f64) -> String {
    format!("{average:.1} FPS")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_tick_has_no_rate() {
        let mut meter = FpsMeter::default();
        assert_eq!(meter.sample(16.0), None);
    }

    #[test]
    fn second_tick_takes_instant_rate() {
        let mut meter = FpsMeter::default();
        meter.sample(0.0);
        let fps = meter.sample(20.0).unwrap();
        assert!((fps - 50.0).abs() < 1e-9);
    }

    #[test]
    fn later_ticks_are_smoothed() {
        let mut meter = FpsMeter::default();
        meter.sample(0.0);
        meter.sample(20.0); // 50 fps
        let fps = meter.sample(30.0).unwrap(); // 100 fps instant
        assert!((fps - (0.1 * 100.0 + 0.9 * 50.0)).abs() < 1e-9);
    }

    #[test]
    fn converges_toward_steady_rate() {
        let mut meter = FpsMeter::default();
        meter.sample(0.0);
        meter.sample(100.0); // start far away at 10 fps
        let mut now = 100.0;
        let mut last = 0.0;
        for _ in 0..200 {
            now += 1000.0 / 60.0;
            last = meter.sample(now).unwrap();
        }
        assert!((last - 60.0).abs() < 0.01, "got {last}");
    }

    #[test]
    fn non_positive_delta_is_skipped() {
        let mut meter = FpsMeter::default();
        meter.sample(10.0);
        assert_eq!(meter.sample(10.0), None);
        assert_eq!(meter.sample(5.0), None);
        assert!(meter.sample(15.0).is_some());
    }

    #[test]
    fn reset_forgets_previous_timestamp() {
        let mut meter = FpsMeter::default();
        meter.sample(0.0);
        meter.sample(16.0);
        meter.reset();
        assert_eq!(meter.sample(5000.0), None);
        // The next rate is not blended with the old average.
        let fps = meter.sample(5020.0).unwrap();
        assert!((fps - 50.0).abs() < 1e-9);
    }

    #[test]
    fn display_uses_one_decimal() {
        assert_eq!(format_fps(59.94), "59.9 FPS");
        assert_eq!(format_fps(30.0), "30.0 FPS");
    }
}
