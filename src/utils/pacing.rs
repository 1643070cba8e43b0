use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 請求之間的隨機等待區間（秒）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacer {
    min_seconds: f64,
    max_seconds: f64,
}

impl Pacer {
    pub fn new(min_seconds: f64, max_seconds: f64) -> Self {
        let min_seconds = min_seconds.max(0.0);
        Self {
            min_seconds,
            max_seconds: max_seconds.max(min_seconds),
        }
    }

    pub fn none() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn next_delay(&self) -> Duration {
        let span = self.max_seconds - self.min_seconds;
        Duration::from_secs_f64(self.min_seconds + span * jitter_fraction())
    }

    pub async fn pause(&self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tracing::debug!("⏳ Waiting {:.1}s before next request", delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
    }
}

/// 指數退避：第 n 次重試前等待 base * 2^n
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn is_last(&self, attempt: u32) -> bool {
        attempt + 1 >= self.attempts
    }
}

/// [0, 1) 之間的抖動比例
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mixed = (nanos as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 11;
    mixed as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacer_stays_within_bounds() {
        let pacer = Pacer::new(2.0, 4.0);
        for _ in 0..50 {
            let delay = pacer.next_delay().as_secs_f64();
            assert!((2.0..=4.0).contains(&delay), "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_pacer_swapped_bounds_collapse() {
        let pacer = Pacer::new(5.0, 1.0);
        assert_eq!(pacer.next_delay(), Duration::from_secs(5));
        assert!(Pacer::none().next_delay().is_zero());
    }

    #[test]
    fn test_retry_policy_exponential_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_secs(30));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(4), Duration::from_secs(480));
        assert!(!policy.is_last(3));
        assert!(policy.is_last(4));
    }
}
