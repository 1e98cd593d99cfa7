use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use shellymgr_domain::NotificationRule;
use tokio::sync::RwLock;

/// Per-rule in-process delivery budget.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub last_sent_at: Option<DateTime<Utc>>,
    pub hourly_count: u32,
    pub hourly_reset_at: DateTime<Utc>,
}

/// In-memory rate limiter keyed by rule id.
///
/// Consulting and updating both take the write lock outright; the hourly
/// window reset happens inside the same critical section as the comparison,
/// so there is no read-to-write upgrade anywhere.
#[derive(Debug, Default)]
pub struct RateLimiter {
    state: RwLock<HashMap<i64, RateLimitState>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `rule` may deliver at `now`. Resets an expired hourly window
    /// as a side effect.
    pub async fn is_limited(&self, rule: &NotificationRule, now: DateTime<Utc>) -> bool {
        let mut guard = self.state.write().await;
        let state = guard.entry(rule.id).or_insert_with(|| RateLimitState {
            last_sent_at: None,
            hourly_count: 0,
            hourly_reset_at: now + Duration::hours(1),
        });

        if state.hourly_reset_at <= now {
            state.hourly_count = 0;
            state.hourly_reset_at = now + Duration::hours(1);
        }

        if state.hourly_count >= rule.effective_max_per_hour() {
            return true;
        }
        if rule.min_interval_minutes > 0 {
            if let Some(last) = state.last_sent_at {
                if now - last < Duration::minutes(rule.min_interval_minutes as i64) {
                    return true;
                }
            }
        }
        false
    }

    /// Record a delivery attempt for `rule` at `now`.
    pub async fn note_attempt(&self, rule: &NotificationRule, now: DateTime<Utc>) {
        let mut guard = self.state.write().await;
        let state = guard.entry(rule.id).or_insert_with(|| RateLimitState {
            last_sent_at: None,
            hourly_count: 0,
            hourly_reset_at: now + Duration::hours(1),
        });
        if state.hourly_reset_at <= now {
            state.hourly_count = 0;
            state.hourly_reset_at = now + Duration::hours(1);
        }
        state.hourly_count += 1;
        state.last_sent_at = Some(now);
    }

    /// Drop all per-rule state (used when a rule is deleted).
    pub async fn forget(&self, rule_id: i64) {
        self.state.write().await.remove(&rule_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellymgr_domain::RuleLevel;

    fn rule(max_per_hour: Option<u32>, min_interval_minutes: u32) -> NotificationRule {
        NotificationRule {
            id: 1,
            name: "r".into(),
            enabled: true,
            channel_id: 1,
            alert_level: RuleLevel::All,
            categories: vec![],
            device_filter: None,
            min_severity: None,
            min_interval_minutes,
            max_per_hour,
            schedule: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn hourly_cap_blocks_after_max() {
        let limiter = RateLimiter::new();
        let r = rule(Some(2), 0);
        let now = Utc::now();

        assert!(!limiter.is_limited(&r, now).await);
        limiter.note_attempt(&r, now).await;
        assert!(!limiter.is_limited(&r, now).await);
        limiter.note_attempt(&r, now).await;
        assert!(limiter.is_limited(&r, now).await);
    }

    #[tokio::test]
    async fn window_resets_after_an_hour() {
        let limiter = RateLimiter::new();
        let r = rule(Some(1), 0);
        let now = Utc::now();

        limiter.note_attempt(&r, now).await;
        assert!(limiter.is_limited(&r, now).await);

        let later = now + Duration::minutes(61);
        assert!(!limiter.is_limited(&r, later).await);
    }

    #[tokio::test]
    async fn min_interval_blocks_rapid_sends() {
        let limiter = RateLimiter::new();
        let r = rule(Some(100), 10);
        let now = Utc::now();

        limiter.note_attempt(&r, now).await;
        assert!(limiter.is_limited(&r, now + Duration::minutes(5)).await);
        assert!(!limiter.is_limited(&r, now + Duration::minutes(11)).await);
    }

    #[tokio::test]
    async fn default_cap_is_ten() {
        let limiter = RateLimiter::new();
        let r = rule(None, 0);
        let now = Utc::now();

        for _ in 0..10 {
            assert!(!limiter.is_limited(&r, now).await);
            limiter.note_attempt(&r, now).await;
        }
        assert!(limiter.is_limited(&r, now).await);
    }
}
