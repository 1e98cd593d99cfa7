use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use shellymgr_domain::{ChannelType, NotificationChannel, NotificationHistory};

use crate::error::NotifyError;

/// Per-call HTTP deadline for delivery drivers.
pub(crate) const DRIVER_TIMEOUT_SECS: u64 = 15;

/// A stateless adapter that converts a history record into a wire
/// transmission for one channel type.
#[async_trait]
pub trait ChannelDriver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Transmit `history` through `channel`. The caller owns the history
    /// row's lifecycle; drivers only report success or failure.
    async fn deliver(
        &self,
        channel: &NotificationChannel,
        history: &NotificationHistory,
    ) -> Result<(), NotifyError>;
}

/// Dispatches deliveries to the driver registered for a channel's type.
pub struct DriverSet {
    drivers: HashMap<ChannelType, Arc<dyn ChannelDriver>>,
}

impl DriverSet {
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    /// The production set: email, webhook, and slack drivers.
    pub fn standard() -> Self {
        let mut set = Self::new();
        set.register(ChannelType::Email, Arc::new(crate::email::EmailDriver::new()));
        set.register(ChannelType::Webhook, Arc::new(crate::webhook::WebhookDriver::new()));
        set.register(ChannelType::Slack, Arc::new(crate::slack::SlackDriver::new()));
        set
    }

    pub fn register(&mut self, channel_type: ChannelType, driver: Arc<dyn ChannelDriver>) {
        self.drivers.insert(channel_type, driver);
    }

    pub fn for_channel(
        &self,
        channel: &NotificationChannel,
    ) -> Result<Arc<dyn ChannelDriver>, NotifyError> {
        self.drivers
            .get(&channel.channel_type)
            .cloned()
            .ok_or(NotifyError::NoDriver(channel.channel_type))
    }
}

impl Default for DriverSet {
    fn default() -> Self {
        Self::standard()
    }
}
