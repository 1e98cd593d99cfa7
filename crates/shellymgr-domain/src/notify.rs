use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

// ── Channels ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Webhook,
    Slack,
}

impl ChannelType {
    pub fn parse(s: &str) -> Result<ChannelType, DomainError> {
        match s {
            "email" => Ok(ChannelType::Email),
            "webhook" => Ok(ChannelType::Webhook),
            "slack" => Ok(ChannelType::Slack),
            other => Err(DomainError::UnknownChannelType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Email => write!(f, "email"),
            ChannelType::Webhook => write!(f, "webhook"),
            ChannelType::Slack => write!(f, "slack"),
        }
    }
}

/// Typed view of an email channel's config payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub use_tls: bool,
    /// Optional body template with `{{.Subject}}`, `{{.Message}}`,
    /// `{{.AlertLevel}}` placeholders.
    #[serde(default)]
    pub template: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

/// Typed view of a webhook channel's config payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    /// When set, requests carry `X-Signature: sha256=<hex HMAC-SHA256 of body>`.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Typed view of a slack-style channel's config payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub icon_emoji: Option<String>,
}

/// A delivery endpoint configured once and referenced by many rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub enabled: bool,
    /// Type-specific payload; must validate against `channel_type` before
    /// persistence.
    pub config: Value,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationChannel {
    /// Validate the config payload against the declared channel type.
    pub fn validate_config(&self) -> Result<(), DomainError> {
        let invalid = |message: String| DomainError::InvalidChannelConfig {
            channel_type: self.channel_type.to_string(),
            message,
        };
        match self.channel_type {
            ChannelType::Email => {
                let cfg: EmailConfig = serde_json::from_value(self.config.clone())
                    .map_err(|e| invalid(e.to_string()))?;
                if cfg.recipients.is_empty() {
                    return Err(invalid("at least one recipient is required".into()));
                }
                if cfg.smtp_host.is_empty() {
                    return Err(invalid("smtp_host is required".into()));
                }
            }
            ChannelType::Webhook => {
                let cfg: WebhookConfig = serde_json::from_value(self.config.clone())
                    .map_err(|e| invalid(e.to_string()))?;
                if cfg.url.is_empty() {
                    return Err(invalid("url is required".into()));
                }
            }
            ChannelType::Slack => {
                let cfg: SlackConfig = serde_json::from_value(self.config.clone())
                    .map_err(|e| invalid(e.to_string()))?;
                if cfg.webhook_url.is_empty() {
                    return Err(invalid("webhook_url is required".into()));
                }
            }
        }
        Ok(())
    }
}

// ── Alert levels ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    /// Numeric severity rank for floor comparisons.
    pub fn rank(&self) -> u8 {
        match self {
            AlertLevel::Info => 0,
            AlertLevel::Warning => 1,
            AlertLevel::Critical => 2,
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// A rule's alert-level selector: a literal level or `all`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLevel {
    All,
    Info,
    Warning,
    Critical,
}

impl RuleLevel {
    pub fn matches(&self, level: AlertLevel) -> bool {
        match self {
            RuleLevel::All => true,
            RuleLevel::Info => level == AlertLevel::Info,
            RuleLevel::Warning => level == AlertLevel::Warning,
            RuleLevel::Critical => level == AlertLevel::Critical,
        }
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl DayOfWeek {
    pub fn from_weekday(w: Weekday) -> DayOfWeek {
        match w {
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
            Weekday::Sun => DayOfWeek::Sunday,
        }
    }
}

/// Optional time-of-day / day-of-week gate on a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSchedule {
    pub enabled: bool,
    pub days: Vec<DayOfWeek>,
    /// `HH:MM`, inclusive window start.
    pub start: String,
    /// `HH:MM`, inclusive window end.
    pub end: String,
}

impl RuleSchedule {
    /// Whether `weekday` at local time `time` falls inside this schedule.
    pub fn allows(&self, weekday: Weekday, time: NaiveTime) -> Result<bool, DomainError> {
        if !self.enabled {
            return Ok(true);
        }
        if !self.days.contains(&DayOfWeek::from_weekday(weekday)) {
            return Ok(false);
        }
        let start = parse_time_of_day(&self.start)?;
        let end = parse_time_of_day(&self.end)?;
        Ok(time >= start && time <= end)
    }
}

pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, DomainError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| DomainError::InvalidTimeOfDay(s.to_string()))
}

/// Explicit device-id inclusion or exclusion list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFilter {
    pub device_ids: Vec<i64>,
    #[serde(default)]
    pub exclude: bool,
}

impl DeviceFilter {
    pub fn allows(&self, device_id: i64) -> bool {
        let listed = self.device_ids.contains(&device_id);
        if self.exclude {
            !listed
        } else {
            listed
        }
    }
}

/// A predicate over notification events plus rate/schedule constraints,
/// pointing at exactly one channel (by id — resolved at use, never owned).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub channel_id: i64,
    pub alert_level: RuleLevel,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub device_filter: Option<DeviceFilter>,
    /// Floor: events strictly below this severity are dropped.
    #[serde(default)]
    pub min_severity: Option<AlertLevel>,
    #[serde(default)]
    pub min_interval_minutes: u32,
    /// Defaults to 10 when unset.
    #[serde(default)]
    pub max_per_hour: Option<u32>,
    #[serde(default)]
    pub schedule: Option<RuleSchedule>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_MAX_PER_HOUR: u32 = 10;

impl NotificationRule {
    pub fn effective_max_per_hour(&self) -> u32 {
        self.max_per_hour.unwrap_or(DEFAULT_MAX_PER_HOUR)
    }
}

// ── Events and history ────────────────────────────────────────────────────────

/// A transient event submitted for dispatch. Never persisted as-is; surviving
/// rule matches produce [`NotificationHistory`] rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub alert_level: AlertLevel,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub device_name: Option<String>,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub affected_devices: Vec<i64>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStatus::Pending => write!(f, "pending"),
            HistoryStatus::Sent => write!(f, "sent"),
            HistoryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One delivery attempt lifecycle: created `pending`, transitions to `sent`
/// or `failed`; `failed` rows with a future `next_retry_at` re-enter delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationHistory {
    pub id: i64,
    /// None for test sends.
    pub rule_id: Option<i64>,
    pub channel_id: i64,
    pub trigger_type: String,
    #[serde(default)]
    pub device_id: Option<i64>,
    pub subject: String,
    pub message: String,
    pub alert_level: AlertLevel,
    #[serde(default)]
    pub affected_devices: Vec<i64>,
    pub status: HistoryStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel(channel_type: ChannelType, config: Value) -> NotificationChannel {
        NotificationChannel {
            id: 0,
            name: "c".into(),
            channel_type,
            enabled: true,
            config,
            description: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn email_config_requires_recipients() {
        let c = channel(
            ChannelType::Email,
            json!({"smtp_host": "mail.example.com", "from": "a@b.c", "recipients": []}),
        );
        assert!(c.validate_config().is_err());

        let c = channel(
            ChannelType::Email,
            json!({"smtp_host": "mail.example.com", "from": "a@b.c", "recipients": ["x@y.z"]}),
        );
        assert!(c.validate_config().is_ok());
    }

    #[test]
    fn webhook_config_requires_url() {
        let c = channel(ChannelType::Webhook, json!({"url": ""}));
        assert!(c.validate_config().is_err());

        let c = channel(ChannelType::Webhook, json!({"url": "http://sink.example/hook"}));
        assert!(c.validate_config().is_ok());
    }

    #[test]
    fn slack_config_requires_webhook_url() {
        let c = channel(ChannelType::Slack, json!({}));
        assert!(c.validate_config().is_err());

        let c = channel(
            ChannelType::Slack,
            json!({"webhook_url": "https://hooks.slack.example/T0/B0/xyz"}),
        );
        assert!(c.validate_config().is_ok());
    }

    #[test]
    fn rule_level_matching() {
        assert!(RuleLevel::All.matches(AlertLevel::Info));
        assert!(RuleLevel::Warning.matches(AlertLevel::Warning));
        assert!(!RuleLevel::Warning.matches(AlertLevel::Critical));
    }

    #[test]
    fn schedule_gate() {
        let sched = RuleSchedule {
            enabled: true,
            days: vec![DayOfWeek::Monday, DayOfWeek::Tuesday],
            start: "09:00".into(),
            end: "17:00".into(),
        };
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        let night = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        assert!(sched.allows(Weekday::Mon, noon).unwrap());
        assert!(!sched.allows(Weekday::Mon, night).unwrap());
        assert!(!sched.allows(Weekday::Sun, noon).unwrap());

        let disabled = RuleSchedule { enabled: false, ..sched };
        assert!(disabled.allows(Weekday::Sun, night).unwrap());
    }

    #[test]
    fn device_filter_include_exclude() {
        let include = DeviceFilter { device_ids: vec![1, 2], exclude: false };
        assert!(include.allows(1));
        assert!(!include.allows(3));

        let exclude = DeviceFilter { device_ids: vec![1, 2], exclude: true };
        assert!(!exclude.allows(1));
        assert!(exclude.allows(3));
    }
}
