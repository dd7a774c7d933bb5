use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 带上限与抖动的指数退避 / Capped exponential backoff with additive jitter
///
/// `delay(n) = min(base * 2^n, max) + U[0, jitter)`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl Backoff {
    /// 不含抖动的延迟 / Delay before jitter is added
    pub fn delay_without_jitter(&self, attempt: u32) -> Duration {
        // 2^31 秒早已超过任何上限 / shift is clamped so the multiplication cannot overflow
        let factor = 1u32 << attempt.min(31);
        self.base.checked_mul(factor).unwrap_or(self.max).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.delay_without_jitter(attempt) + jitter
    }
}

/// 等待延迟或取消 / Sleep for `delay` unless `token` fires first
///
/// 返回 `false` 表示已取消 / Returns `false` when cancelled.
pub async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_sequence_caps_at_thirty_seconds() {
        let backoff = Backoff::default();
        let secs: Vec<u64> = (0..8).map(|n| backoff.delay_without_jitter(n).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(backoff.delay_without_jitter(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_below_one_second() {
        let backoff = Backoff::default();
        for attempt in 0..10 {
            let base = backoff.delay_without_jitter(attempt);
            for _ in 0..50 {
                let d = backoff.delay(attempt);
                assert!(d >= base);
                assert!(d < base + Duration::from_secs(1));
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let backoff = Backoff {
            jitter: Duration::ZERO,
            ..Backoff::default()
        };
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(Duration::from_secs(5), &token).await);

        token.cancel();
        assert!(!sleep_or_cancel(Duration::from_secs(3600), &token).await);
    }
}
