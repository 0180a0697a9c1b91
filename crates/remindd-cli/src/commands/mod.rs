pub mod ack;
pub mod engine;
pub mod reminder;

use std::sync::Arc;

use remindd_core::config::EngineConfig;
use remindd_core::{
    EventSink, LogEventSink, LogNotifier, Notifier, ReminderStore, SqliteStore, WebhookNotifier,
};

/// Shared wiring for every command: config, store, event sink, notifier.
pub(crate) struct Context {
    pub config: EngineConfig,
    pub store: Arc<dyn ReminderStore>,
    pub events: Arc<dyn EventSink>,
}

impl Context {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = EngineConfig::load()?;
        let store: Arc<dyn ReminderStore> = Arc::new(SqliteStore::open()?);
        let events: Arc<dyn EventSink> = Arc::new(LogEventSink);
        Ok(Self {
            config,
            store,
            events,
        })
    }

    /// Webhook notifier when configured, log-only otherwise.
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        match &self.config.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(LogNotifier),
        }
    }
}
