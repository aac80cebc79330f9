use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Sliding window in-memory rate limiter (pod local). Keys are caller user
/// ids; every request here is authenticated, so there is no IP keying.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action budgets derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub follow_limit: usize,
    pub follow_window: Duration,
    pub post_limit: usize,
    pub post_window: Duration,
    pub answer_limit: usize,
    pub answer_window: Duration,
    pub message_limit: usize,
    pub message_window: Duration,
    pub mood_limit: usize,
    pub mood_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            follow_limit: usize_env("RL_FOLLOW_LIMIT", 20),
            follow_window: dur_env("RL_FOLLOW_WINDOW", 3600),
            post_limit: usize_env("RL_POST_LIMIT", 5),
            post_window: dur_env("RL_POST_WINDOW", 300),
            answer_limit: usize_env("RL_ANSWER_LIMIT", 20),
            answer_window: dur_env("RL_ANSWER_WINDOW", 300),
            message_limit: usize_env("RL_MESSAGE_LIMIT", 60),
            message_window: dur_env("RL_MESSAGE_WINDOW", 60),
            mood_limit: usize_env("RL_MOOD_LIMIT", 10),
            mood_window: dur_env("RL_MOOD_WINDOW", 3600),
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_follow(&self, user: &str) -> bool { self.limiter.check(&format!("follow:{user}"), self.cfg.follow_limit, self.cfg.follow_window) }
    pub fn allow_post(&self, user: &str) -> bool { self.limiter.check(&format!("post:{user}"), self.cfg.post_limit, self.cfg.post_window) }
    pub fn allow_answer(&self, user: &str) -> bool { self.limiter.check(&format!("answer:{user}"), self.cfg.answer_limit, self.cfg.answer_window) }
    pub fn allow_message(&self, user: &str) -> bool { self.limiter.check(&format!("message:{user}"), self.cfg.message_limit, self.cfg.message_window) }
    pub fn allow_mood(&self, user: &str) -> bool { self.limiter.check(&format!("mood:{user}"), self.cfg.mood_limit, self.cfg.mood_window) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        assert!(rl.check("k", 2, window));
        assert!(rl.check("k", 2, window));
        assert!(!rl.check("k", 2, window));
        std::thread::sleep(Duration::from_millis(60));
        assert!(rl.check("k", 2, window));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..100 {
            assert!(rl.check("k", 1, Duration::from_secs(60)));
        }
    }

    #[test]
    fn keys_are_independent() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_secs(60);
        assert!(rl.check("a", 1, window));
        assert!(!rl.check("a", 1, window));
        assert!(rl.check("b", 1, window));
    }
}
