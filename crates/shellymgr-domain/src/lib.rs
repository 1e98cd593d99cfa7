pub mod device;
pub mod error;
pub mod notify;
pub mod provision;
pub mod sync;

pub use device::{
    classify_ssid, model_generation, Device, DeviceStatus, DiscoveredDevice, Mac, Template,
};
pub use error::{DomainError, ErrorKind};
pub use notify::{
    parse_time_of_day, AlertLevel, ChannelType, DayOfWeek, DeviceFilter, EmailConfig,
    HistoryStatus, NotificationChannel, NotificationEvent, NotificationHistory, NotificationRule,
    RuleLevel, RuleSchedule, SlackConfig, WebhookConfig, DEFAULT_MAX_PER_HOUR,
};
pub use provision::{
    CloudConfig, DeviceAuthConfig, MqttConfig, ProvisionOutcome, ProvisionRequest,
    ProvisioningAgent, ProvisioningTask, StepStatus, TaskStatus, TaskType, WifiCredentials,
    WorkflowStep, DEFAULT_VERIFY_TIMEOUT_SECS, DEFAULT_WORKFLOW_TIMEOUT_SECS,
};
pub use sync::{
    validate_schedule_interval, BackupRecord, DeviceConfiguration, ExportData, ExportFilters,
    ExportHistory, ExportMetadata, ExportRequest, ExportSchedule, ImportHistory, ImportRequest,
    ImportSource, MAX_SCHEDULE_INTERVAL_SECS, MIN_SCHEDULE_INTERVAL_SECS,
};
