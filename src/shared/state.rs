use crate::config::AppConfig;
use crate::shared::utils::DbPool;
use crate::tickets::notify::NotificationSink;
use std::sync::Arc;

pub struct AppState {
    pub conn: DbPool,
    pub config: AppConfig,
    pub notifier: Arc<dyn NotificationSink>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            config: self.config.clone(),
            notifier: Arc::clone(&self.notifier),
        }
    }
}
