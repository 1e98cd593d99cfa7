use std::sync::Arc;

use chrono::{Datelike, Duration, Local, Utc};
use shellymgr_domain::{
    AlertLevel, HistoryStatus, NotificationChannel, NotificationEvent, NotificationHistory,
    NotificationRule,
};
use shellymgr_store::{HistoryPage, Store};
use tracing::{debug, warn};

use crate::driver::DriverSet;
use crate::error::NotifyError;
use crate::ratelimit::RateLimiter;

/// Delivery attempts beyond this stay `failed` for good.
pub const MAX_DELIVERY_RETRIES: u32 = 3;

/// Backoff before retry attempt `retry_count + 1`: 1 min, 5 min, 25 min.
fn retry_backoff(retry_count: u32) -> Duration {
    Duration::seconds(60 * 5_i64.pow(retry_count.min(2)))
}

/// Event ingestion, rule matching, rate limiting, schedule gating, and
/// history lifecycle. Invokes channel drivers and owns the in-memory
/// rate-limit state.
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    drivers: DriverSet,
    limiter: RateLimiter,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_drivers(store, DriverSet::standard())
    }

    pub fn with_drivers(store: Arc<dyn Store>, drivers: DriverSet) -> Self {
        Self { store, drivers, limiter: RateLimiter::new() }
    }

    // ── Channels ──────────────────────────────────────────────────────────────

    pub async fn create_channel(
        &self,
        channel: NotificationChannel,
    ) -> Result<NotificationChannel, NotifyError> {
        channel.validate_config()?;
        Ok(self.store.create_channel(&channel).await?)
    }

    pub async fn update_channel(
        &self,
        mut channel: NotificationChannel,
    ) -> Result<NotificationChannel, NotifyError> {
        channel.validate_config()?;
        channel.updated_at = Utc::now();
        self.store.update_channel(&channel).await?;
        Ok(channel)
    }

    pub async fn delete_channel(&self, id: i64) -> Result<(), NotifyError> {
        Ok(self.store.delete_channel(id).await?)
    }

    // ── Rules ─────────────────────────────────────────────────────────────────

    pub async fn create_rule(
        &self,
        rule: NotificationRule,
    ) -> Result<NotificationRule, NotifyError> {
        self.require_channel(rule.channel_id).await?;
        self.validate_rule(&rule)?;
        Ok(self.store.create_rule(&rule).await?)
    }

    pub async fn update_rule(
        &self,
        mut rule: NotificationRule,
    ) -> Result<NotificationRule, NotifyError> {
        self.require_channel(rule.channel_id).await?;
        self.validate_rule(&rule)?;
        rule.updated_at = Utc::now();
        self.store.update_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: i64) -> Result<(), NotifyError> {
        self.store.delete_rule(id).await?;
        self.limiter.forget(id).await;
        Ok(())
    }

    async fn require_channel(&self, id: i64) -> Result<NotificationChannel, NotifyError> {
        self.store
            .get_channel(id)
            .await?
            .ok_or(NotifyError::ChannelNotFound(id))
    }

    fn validate_rule(&self, rule: &NotificationRule) -> Result<(), NotifyError> {
        if let Some(sched) = &rule.schedule {
            shellymgr_domain::parse_time_of_day(&sched.start)?;
            shellymgr_domain::parse_time_of_day(&sched.end)?;
        }
        Ok(())
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Evaluate every enabled rule against `event`, in sequence, and deliver
    /// through the surviving rules' channels. Driver failures are recorded on
    /// the history row without aborting the remaining rules.
    pub async fn send_notification(
        &self,
        event: &NotificationEvent,
    ) -> Result<Vec<NotificationHistory>, NotifyError> {
        let rules = self.store.list_rules().await?;
        let now = Utc::now();
        let local = Local::now();
        let mut results = Vec::new();

        for rule in rules
            .iter()
            .filter(|r| r.enabled && r.alert_level.matches(event.alert_level))
        {
            if self.limiter.is_limited(rule, now).await {
                debug!(rule_id = rule.id, "rate limited, skipping");
                continue;
            }
            if let Some(sched) = &rule.schedule {
                match sched.allows(local.weekday(), local.time()) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(rule_id = rule.id, "outside schedule window, skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!(rule_id = rule.id, error = %e, "bad schedule on rule, skipping");
                        continue;
                    }
                }
            }
            if !rule.categories.is_empty()
                && !event.categories.iter().any(|c| rule.categories.contains(c))
            {
                continue;
            }
            if let (Some(filter), Some(device_id)) = (&rule.device_filter, event.device_id) {
                if !filter.allows(device_id) {
                    continue;
                }
            }
            if let Some(min) = rule.min_severity {
                if event.alert_level.rank() < min.rank() {
                    continue;
                }
            }

            let channel = match self.store.get_channel(rule.channel_id).await? {
                Some(c) if c.enabled => c,
                Some(_) => {
                    debug!(rule_id = rule.id, "channel disabled, skipping");
                    continue;
                }
                None => {
                    warn!(rule_id = rule.id, channel_id = rule.channel_id, "rule references missing channel");
                    continue;
                }
            };

            let row = history_from_event(event, Some(rule), &channel);
            let row = self.store.create_history(&row).await?;
            let row = self.attempt_delivery(&channel, row).await?;
            self.limiter.note_attempt(rule, now).await;
            results.push(row);
        }

        Ok(results)
    }

    /// Synthesize an info-level test event and deliver it directly, bypassing
    /// rules and rate limits.
    pub async fn test_channel(&self, id: i64) -> Result<NotificationHistory, NotifyError> {
        let channel = self.require_channel(id).await?;
        let now = Utc::now();
        let row = NotificationHistory {
            id: 0,
            rule_id: None,
            channel_id: channel.id,
            trigger_type: "test".into(),
            device_id: None,
            subject: format!("Test notification for channel '{}'", channel.name),
            message: "This is a test notification.".into(),
            alert_level: AlertLevel::Info,
            affected_devices: vec![],
            status: HistoryStatus::Pending,
            error: None,
            retry_count: 0,
            sent_at: None,
            next_retry_at: None,
            created_at: now,
        };
        let row = self.store.create_history(&row).await?;
        self.attempt_delivery(&channel, row).await
    }

    pub async fn get_history(
        &self,
        channel_id: Option<i64>,
        status: Option<HistoryStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, NotifyError> {
        Ok(self
            .store
            .query_history(channel_id, status, limit, offset)
            .await?)
    }

    // ── Delivery ──────────────────────────────────────────────────────────────

    /// Run one driver attempt and persist the resulting state transition.
    /// `pending → sent` on success, `pending → failed` (with a retry slot
    /// while the policy allows) on error.
    async fn attempt_delivery(
        &self,
        channel: &NotificationChannel,
        mut row: NotificationHistory,
    ) -> Result<NotificationHistory, NotifyError> {
        let outcome = match self.drivers.for_channel(channel) {
            Ok(driver) => driver.deliver(channel, &row).await,
            Err(e) => Err(e),
        };
        let now = Utc::now();
        match outcome {
            Ok(()) => {
                row.status = HistoryStatus::Sent;
                row.sent_at = Some(now);
                row.error = None;
                row.next_retry_at = None;
            }
            Err(e) => {
                warn!(channel_id = channel.id, error = %e, "delivery failed");
                row.status = HistoryStatus::Failed;
                row.error = Some(e.to_string());
                row.next_retry_at = if row.retry_count < MAX_DELIVERY_RETRIES {
                    Some(now + retry_backoff(row.retry_count))
                } else {
                    None
                };
            }
        }
        self.store.update_history(&row).await?;
        Ok(row)
    }

    /// Re-enter delivery for `failed` rows whose retry slot elapsed. Returns
    /// the number of rows retried.
    pub async fn retry_due(&self, now: chrono::DateTime<Utc>) -> Result<usize, NotifyError> {
        let due = self.store.list_due_retries(now).await?;
        let mut retried = 0;
        for mut row in due {
            let channel = match self.store.get_channel(row.channel_id).await? {
                Some(c) => c,
                None => {
                    // Channel deleted since the failure; park the row for good.
                    row.next_retry_at = None;
                    self.store.update_history(&row).await?;
                    continue;
                }
            };
            row.retry_count += 1;
            row.status = HistoryStatus::Pending;
            row.next_retry_at = None;
            self.store.update_history(&row).await?;
            self.attempt_delivery(&channel, row).await?;
            retried += 1;
        }
        Ok(retried)
    }
}

fn history_from_event(
    event: &NotificationEvent,
    rule: Option<&NotificationRule>,
    channel: &NotificationChannel,
) -> NotificationHistory {
    NotificationHistory {
        id: 0,
        rule_id: rule.map(|r| r.id),
        channel_id: channel.id,
        trigger_type: event.event_type.clone(),
        device_id: event.device_id,
        subject: event.title.clone(),
        message: event.message.clone(),
        alert_level: event.alert_level,
        affected_devices: event.affected_devices.clone(),
        status: HistoryStatus::Pending,
        error: None,
        retry_count: 0,
        sent_at: None,
        next_retry_at: None,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shellymgr_domain::{ChannelType, RuleLevel};
    use shellymgr_store::{InMemoryStore, Store};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn webhook_channel(url: String) -> NotificationChannel {
        NotificationChannel {
            id: 0,
            name: "sink".into(),
            channel_type: ChannelType::Webhook,
            enabled: true,
            config: json!({"url": url}),
            description: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn rule(channel_id: i64) -> NotificationRule {
        NotificationRule {
            id: 0,
            name: "r".into(),
            enabled: true,
            channel_id,
            alert_level: RuleLevel::All,
            categories: vec![],
            device_filter: None,
            min_severity: None,
            min_interval_minutes: 0,
            max_per_hour: None,
            schedule: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn event(level: AlertLevel) -> NotificationEvent {
        NotificationEvent {
            event_type: "alert".into(),
            alert_level: level,
            device_id: None,
            device_name: None,
            title: "t".into(),
            message: "m".into(),
            timestamp: Utc::now(),
            affected_devices: vec![],
            categories: vec![],
            metadata: serde_json::Value::Null,
        }
    }

    async fn sink() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn invalid_channel_config_is_not_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        let mut chan = webhook_channel(String::new());
        chan.config = json!({"url": ""});
        let err = d.create_channel(chan).await.unwrap_err();
        assert_eq!(err.kind(), shellymgr_domain::ErrorKind::Validation);
        assert!(store.list_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rule_with_missing_channel_is_not_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        let err = d.create_rule(rule(999)).await.unwrap_err();
        assert_eq!(err.kind(), shellymgr_domain::ErrorKind::NotFound);
        assert!(store.list_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_allows_exactly_one_of_two_back_to_back() {
        let server = sink().await;
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        let chan = d
            .create_channel(webhook_channel(format!("{}/hook", server.uri())))
            .await
            .unwrap();
        let mut r = rule(chan.id);
        r.max_per_hour = Some(1);
        r.min_interval_minutes = 0;
        let r = d.create_rule(r).await.unwrap();

        d.send_notification(&event(AlertLevel::Info)).await.unwrap();
        d.send_notification(&event(AlertLevel::Info)).await.unwrap();

        let page = store
            .query_history(Some(chan.id), Some(HistoryStatus::Sent), 100, 0)
            .await
            .unwrap();
        let for_rule: Vec<_> = page
            .rows
            .iter()
            .filter(|h| h.rule_id == Some(r.id))
            .collect();
        assert_eq!(for_rule.len(), 1);
    }

    #[tokio::test]
    async fn severity_floor_drops_events_below_it() {
        let server = sink().await;
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        let chan = d
            .create_channel(webhook_channel(format!("{}/hook", server.uri())))
            .await
            .unwrap();
        let mut r = rule(chan.id);
        r.min_severity = Some(AlertLevel::Warning);
        r.max_per_hour = Some(100);
        d.create_rule(r).await.unwrap();

        d.send_notification(&event(AlertLevel::Info)).await.unwrap();
        d.send_notification(&event(AlertLevel::Warning)).await.unwrap();

        let page = store
            .query_history(Some(chan.id), Some(HistoryStatus::Sent), 100, 0)
            .await
            .unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].alert_level, AlertLevel::Warning);
    }

    #[tokio::test]
    async fn category_filter_requires_overlap() {
        let server = sink().await;
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        let chan = d
            .create_channel(webhook_channel(format!("{}/hook", server.uri())))
            .await
            .unwrap();
        let mut r = rule(chan.id);
        r.categories = vec!["power".into()];
        d.create_rule(r).await.unwrap();

        let mut ev = event(AlertLevel::Info);
        ev.categories = vec!["network".into()];
        assert!(d.send_notification(&ev).await.unwrap().is_empty());

        ev.categories = vec!["power".into(), "network".into()];
        assert_eq!(d.send_notification(&ev).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn driver_failure_records_failed_row_and_retry_slot() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());
        let chan = d
            .create_channel(webhook_channel(format!("{}/hook", server.uri())))
            .await
            .unwrap();
        d.create_rule(rule(chan.id)).await.unwrap();

        let rows = d.send_notification(&event(AlertLevel::Info)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, HistoryStatus::Failed);
        assert!(rows[0].error.is_some());
        assert!(rows[0].next_retry_at.is_some());
    }

    #[tokio::test]
    async fn test_channel_bypasses_rules_and_records_history() {
        let server = sink().await;
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        // No rules at all: test sends still go out.
        let chan = d
            .create_channel(webhook_channel(format!("{}/hook", server.uri())))
            .await
            .unwrap();
        let row = d.test_channel(chan.id).await.unwrap();
        assert_eq!(row.status, HistoryStatus::Sent);
        assert_eq!(row.trigger_type, "test");
        assert!(row.rule_id.is_none());
    }

    #[tokio::test]
    async fn identical_channel_updates_are_idempotent() {
        let server = sink().await;
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        let chan = d
            .create_channel(webhook_channel(format!("{}/hook", server.uri())))
            .await
            .unwrap();

        let first = d.update_channel(chan.clone()).await.unwrap();
        let second = d.update_channel(chan.clone()).await.unwrap();

        let mut a = first.clone();
        let mut b = second.clone();
        a.updated_at = b.updated_at;
        assert_eq!(a, b, "rows must be equivalent apart from updated_at");
    }

    #[tokio::test]
    async fn channel_in_use_cannot_be_deleted() {
        let server = sink().await;
        let store = Arc::new(InMemoryStore::new());
        let d = NotificationDispatcher::new(store.clone());

        let chan = d
            .create_channel(webhook_channel(format!("{}/hook", server.uri())))
            .await
            .unwrap();
        d.create_rule(rule(chan.id)).await.unwrap();

        let err = d.delete_channel(chan.id).await.unwrap_err();
        assert_eq!(err.kind(), shellymgr_domain::ErrorKind::Conflict);
    }
}
