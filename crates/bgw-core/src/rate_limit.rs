use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Shards the bucket map so unrelated keys contend on different locks.
const SHARD_COUNT: usize = 32;
/// Buckets untouched for this many windows are reaped.
const IDLE_WINDOWS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_epoch: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(RateInfo),
    Rejected(RateInfo),
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: u32,
    last_refill: Instant,
    last_touch: Instant,
}

/// Per-key token buckets, in-memory only; state is rebuilt on process
/// start. Buckets are created lazily at full capacity on first sighting.
pub struct RateLimiter {
    shards: Vec<Mutex<HashMap<String, Bucket>>>,
    window: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Arc<Self> {
        let shards = (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect();
        Arc::new(Self { shards, window })
    }

    pub fn admit(&self, api_key: &str, capacity: u32) -> RateDecision {
        let wall_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        self.admit_at(api_key, capacity, Instant::now(), wall_now)
    }

    fn admit_at(&self, api_key: &str, capacity: u32, now: Instant, wall_now: i64) -> RateDecision {
        let capacity = capacity.max(1);
        let mut shard = self
            .shard(api_key)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let bucket = shard.entry(api_key.to_string()).or_insert_with(|| Bucket {
            tokens: capacity as f64,
            capacity,
            last_refill: now,
            last_touch: now,
        });
        // An admin-side limit change takes effect on next sighting.
        if bucket.capacity != capacity {
            bucket.capacity = capacity;
            bucket.tokens = bucket.tokens.min(capacity as f64);
        }

        let refill_rate = capacity as f64 / self.window.as_secs_f64();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(capacity as f64);
        bucket.last_refill = now;
        bucket.last_touch = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let reset = seconds_until(capacity as f64 - bucket.tokens, refill_rate);
            RateDecision::Allowed(RateInfo {
                limit: capacity,
                remaining: bucket.tokens.floor() as u32,
                reset_epoch: wall_now + reset,
            })
        } else {
            let reset = seconds_until(1.0 - bucket.tokens, refill_rate);
            RateDecision::Rejected(RateInfo {
                limit: capacity,
                remaining: 0,
                reset_epoch: wall_now + reset,
            })
        }
    }

    /// Reports the current bucket state without consuming a token, for
    /// endpoints that carry rate headers but are not rate limited.
    pub fn peek(&self, api_key: &str, capacity: u32) -> RateInfo {
        let capacity = capacity.max(1);
        let wall_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);
        let now = Instant::now();
        let refill_rate = capacity as f64 / self.window.as_secs_f64();

        let shard = self
            .shard(api_key)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tokens = match shard.get(api_key) {
            Some(bucket) => {
                let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
                (bucket.tokens + elapsed * refill_rate).min(capacity as f64)
            }
            None => capacity as f64,
        };
        RateInfo {
            limit: capacity,
            remaining: tokens.floor() as u32,
            reset_epoch: wall_now + seconds_until(capacity as f64 - tokens, refill_rate),
        }
    }

    /// Evicts buckets idle for more than ten windows; bounds the map.
    pub fn reap_idle(&self, now: Instant) {
        let cutoff = self.window * IDLE_WINDOWS;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            shard.retain(|_, bucket| now.saturating_duration_since(bucket.last_touch) <= cutoff);
        }
    }

    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        let period = limiter.window;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                limiter.reap_idle(Instant::now());
            }
        })
    }

    fn shard(&self, api_key: &str) -> &Mutex<HashMap<String, Bucket>> {
        let mut hasher = DefaultHasher::new();
        api_key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    #[cfg(test)]
    fn bucket_count(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                shard
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .len()
            })
            .sum()
    }
}

fn seconds_until(tokens_needed: f64, refill_rate: f64) -> i64 {
    if tokens_needed <= 0.0 {
        return 0;
    }
    (tokens_needed / refill_rate).ceil() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> Arc<RateLimiter> {
        RateLimiter::new(Duration::from_secs(60))
    }

    #[test]
    fn burst_up_to_capacity_then_reject() {
        let limiter = limiter();
        let now = Instant::now();

        let first = limiter.admit_at("sk-a", 2, now, 1_000);
        let second = limiter.admit_at("sk-a", 2, now, 1_000);
        let third = limiter.admit_at("sk-a", 2, now, 1_000);

        assert!(matches!(first, RateDecision::Allowed(info) if info.remaining == 1));
        assert!(matches!(second, RateDecision::Allowed(info) if info.remaining == 0));
        let RateDecision::Rejected(info) = third else {
            panic!("third request should be rejected");
        };
        assert_eq!(info.limit, 2);
        assert_eq!(info.remaining, 0);
        // One token refills in window/capacity = 30s.
        assert_eq!(info.reset_epoch, 1_000 + 30);
    }

    #[test]
    fn tokens_refill_over_time() {
        let limiter = limiter();
        let start = Instant::now();

        assert!(matches!(
            limiter.admit_at("sk-a", 1, start, 0),
            RateDecision::Allowed(_)
        ));
        assert!(matches!(
            limiter.admit_at("sk-a", 1, start, 0),
            RateDecision::Rejected(_)
        ));

        let later = start + Duration::from_secs(61);
        assert!(matches!(
            limiter.admit_at("sk-a", 1, later, 61),
            RateDecision::Allowed(_)
        ));
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.admit_at("sk-a", 2, start, 0);

        // A long idle period refills to capacity, not beyond.
        let later = start + Duration::from_secs(3600);
        let RateDecision::Allowed(info) = limiter.admit_at("sk-a", 2, later, 3600) else {
            panic!("should be allowed after refill");
        };
        assert_eq!(info.remaining, 1);
    }

    #[test]
    fn steady_state_window_admits_at_most_capacity_plus_one() {
        let limiter = limiter();
        let start = Instant::now();
        let capacity = 5;

        // Drain the initial burst before the measured window opens.
        for _ in 0..capacity {
            limiter.admit_at("sk-a", capacity, start, 0);
        }

        let mut admitted = 0;
        for tick in 1..=60u64 {
            let now = start + Duration::from_secs(tick);
            if matches!(
                limiter.admit_at("sk-a", capacity, now, tick as i64),
                RateDecision::Allowed(_)
            ) {
                admitted += 1;
            }
        }
        assert!(
            admitted <= capacity + 1,
            "admitted {admitted} in one window"
        );
        assert!(admitted >= capacity - 1, "refill stalled at {admitted}");
    }

    #[test]
    fn distinct_keys_do_not_share_buckets() {
        let limiter = limiter();
        let now = Instant::now();
        assert!(matches!(
            limiter.admit_at("sk-a", 1, now, 0),
            RateDecision::Allowed(_)
        ));
        assert!(matches!(
            limiter.admit_at("sk-b", 1, now, 0),
            RateDecision::Allowed(_)
        ));
    }

    #[test]
    fn idle_buckets_are_reaped() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.admit_at("sk-a", 1, start, 0);
        limiter.admit_at("sk-b", 1, start + Duration::from_secs(590), 590);
        assert_eq!(limiter.bucket_count(), 2);

        // 10 windows = 600s; sk-a is past the cutoff, sk-b is not.
        limiter.reap_idle(start + Duration::from_secs(601));
        assert_eq!(limiter.bucket_count(), 1);
    }
}
