use std::time::Duration;

const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 60_000;

/// `delay = min(1000ms * 2^retryCount, 60000ms)`. Retry counts are owned by
/// the pool (or the single-connection state machine), never by the
/// connection object, so a fresh socket never resets backoff prematurely.
pub fn delay_for_retry(retry_count: u32) -> Duration {
    let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    let ms = BASE_DELAY_MS.saturating_mul(factor).min(MAX_DELAY_MS);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_and_capped() {
        let delays: Vec<u64> = (0..8).map(|k| delay_for_retry(k).as_millis() as u64).collect();
        assert_eq!(delays[0], 1_000);
        assert_eq!(delays[1], 2_000);
        assert_eq!(delays[2], 4_000);
        assert_eq!(delays[3], 8_000);
        assert_eq!(delays[4], 16_000);
        assert_eq!(delays[5], 32_000);
        assert_eq!(delays[6], 60_000); // 64000 capped
        assert_eq!(delays[7], 60_000);

        for w in delays.windows(2) {
            assert!(w[1] >= w[0]);
        }
    }

    #[test]
    fn never_panics_on_large_retry_count() {
        let d = delay_for_retry(1000);
        assert_eq!(d.as_millis() as u64, MAX_DELAY_MS);
    }
}
