//! Short-horizon price and liquidity velocity from the history ledger
use crate::config::VelocityConfig;
use crate::core::{HistorySample, TokenSnapshot, VelocityRecord};
use chrono::{DateTime, Duration, Utc};

pub struct VelocityCalculator {
    horizons: [Duration; 3],
    tolerance: Duration,
}

impl VelocityCalculator {
    pub fn new(config: &VelocityConfig) -> Self {
        Self {
            horizons: [
                Duration::seconds(config.horizon_1m_secs),
                Duration::seconds(config.horizon_5m_secs),
                Duration::seconds(config.horizon_30m_secs),
            ],
            tolerance: Duration::seconds(config.tolerance_secs),
        }
    }

    /// How far back the ledger must be read to cover every horizon
    pub fn lookback(&self) -> Duration {
        self.horizons.iter().copied().max().unwrap_or_else(Duration::zero) + self.tolerance
    }

    /// First sample (newest first) whose age lies within the tolerance band of `horizon`
    fn sample_at<'a>(
        &self,
        samples: &'a [HistorySample],
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> Option<&'a HistorySample> {
        samples.iter().find(|s| {
            let age = now - s.recorded_at;
            age >= horizon - self.tolerance && age <= horizon + self.tolerance
        })
    }

    /// `samples` must be ordered newest first. No interpolation: a horizon
    /// without a sample in its band reports 0.
    pub fn compute(&self, current: &TokenSnapshot, samples: &[HistorySample], now: DateTime<Utc>) -> VelocityRecord {
        let mut price = [0.0; 3];
        let mut liquidity = [0.0; 3];

        for (i, horizon) in self.horizons.iter().enumerate() {
            if let Some(sample) = self.sample_at(samples, *horizon, now) {
                price[i] = percent_change(current.price, sample.price);
                liquidity[i] = percent_change(current.liquidity, sample.liquidity);
            }
        }

        VelocityRecord {
            token: current.token.clone(),
            price_velocity_1m: price[0],
            price_velocity_5m: price[1],
            price_velocity_30m: price[2],
            liquidity_velocity_1m: liquidity[0],
            liquidity_velocity_5m: liquidity[1],
            liquidity_velocity_30m: liquidity[2],
        }
    }
}

fn percent_change(current: f64, historical: f64) -> f64 {
    if historical <= 0.0 || !historical.is_finite() || !current.is_finite() {
        return 0.0;
    }
    (current - historical) / historical * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> VelocityCalculator {
        VelocityCalculator::new(&VelocityConfig::default())
    }

    fn current(price: f64, liquidity: f64) -> TokenSnapshot {
        let mut s = TokenSnapshot::empty("mint");
        s.price = price;
        s.liquidity = liquidity;
        s
    }

    fn sample(age_secs: i64, price: f64, liquidity: f64, now: DateTime<Utc>) -> HistorySample {
        HistorySample {
            token: "mint".to_string(),
            price,
            liquidity,
            market_cap: 0.0,
            recorded_at: now - Duration::seconds(age_secs),
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_horizon_match_within_tolerance() {
        let now = Utc::now();
        let samples = vec![
            sample(58, 1.0, 100.0, now),
            sample(304, 0.5, 200.0, now),
            sample(1795, 2.0, 0.0, now),
        ];
        let v = calculator().compute(&current(1.5, 150.0), &samples, now);
        assert!((v.price_velocity_1m - 50.0).abs() < 1e-9);
        assert!((v.price_velocity_5m - 200.0).abs() < 1e-9);
        assert!((v.price_velocity_30m + 25.0).abs() < 1e-9);
        assert!((v.liquidity_velocity_1m - 50.0).abs() < 1e-9);
        assert!((v.liquidity_velocity_5m + 25.0).abs() < 1e-9);
        // historical liquidity of zero cannot be divided by
        assert_eq!(v.liquidity_velocity_30m, 0.0);
    }

    #[test]
    fn test_no_sample_in_band_is_zero() {
        let now = Utc::now();
        // neighbours on both sides of the 5m band, none inside
        let samples = vec![sample(280, 1.0, 1.0, now), sample(320, 1.0, 1.0, now)];
        let v = calculator().compute(&current(3.0, 3.0), &samples, now);
        assert_eq!(v.price_velocity_5m, 0.0);
        assert_eq!(v.liquidity_velocity_5m, 0.0);
    }

    #[test]
    fn test_first_descending_match_wins() {
        let now = Utc::now();
        let samples = vec![sample(57, 2.0, 1.0, now), sample(63, 1.0, 1.0, now)];
        let v = calculator().compute(&current(4.0, 1.0), &samples, now);
        assert!((v.price_velocity_1m - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_lookback_covers_longest_horizon() {
        assert_eq!(calculator().lookback(), Duration::seconds(1805));
    }
}
