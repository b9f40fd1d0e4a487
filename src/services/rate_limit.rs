use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Token-bucket rate limiter, one instance per vendor.
///
/// The bucket starts full, so bursts up to capacity are admitted
/// immediately. Refill is computed lazily from a monotonic clock at each
/// call; wall-clock jumps never grant tokens. Worst-case wait for a fully
/// drained bucket is `capacity / refill_per_sec` (60 s).
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rate_limit_per_minute: u32) -> Self {
        let capacity = f64::from(rate_limit_per_minute.max(1));
        Self {
            capacity,
            refill_per_sec: capacity / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens =
                    (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available, after applying lazy refill.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
        bucket.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn initial_burst_up_to_capacity() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            // Must not block: the bucket starts full.
            tokio::time::timeout(Duration::from_millis(1), limiter.acquire())
                .await
                .expect("burst acquire should not wait");
        }
        assert!(limiter.available().await < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn drained_bucket_waits_for_refill() {
        // 60/min refills one token per second.
        let limiter = RateLimiter::new(60);
        for _ in 0..60 {
            limiter.acquire().await;
        }

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(
            waited >= Duration::from_millis(900),
            "expected ~1s wait, got {:?}",
            waited
        );
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_cap_at_capacity() {
        let limiter = RateLimiter::new(5);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(limiter.available().await <= 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn admissions_bounded_by_capacity_plus_refill() {
        let limiter = Arc::new(RateLimiter::new(30));
        let admitted = Arc::new(std::sync::atomic::AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..90 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }));
        }

        // After 60 simulated seconds: capacity (30) + 60s * 0.5/s = 60.
        tokio::time::sleep(Duration::from_secs(60)).await;
        let count = admitted.load(std::sync::atomic::Ordering::SeqCst);
        assert!(count <= 61, "admitted {} calls in 60s window", count);
        assert!(count >= 55, "admitted only {} calls in 60s window", count);

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
