use chrono::Utc;
use diesel::prelude::*;
use log::error;
use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

use crate::shared::schema::notifications;
use crate::shared::utils::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TicketAssigned,
    TicketEscalated,
    TicketClosed,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::TicketAssigned => "ticket_assigned",
            NotificationKind::TicketEscalated => "ticket_escalated",
            NotificationKind::TicketClosed => "ticket_closed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    pub target_user_id: Uuid,
    pub kind: NotificationKind,
    pub ticket_id: Uuid,
    pub message: String,
}

/// Delivery boundary. The engine produces events; whatever sits behind this
/// trait owns delivery, retries and failures. Emission is fire-and-forget.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, event: NotificationEvent);
}

/// Production sink: writes events to the notifications table, where the
/// channel workers (mail, WhatsApp, in-app) pick them up. Failures are
/// logged and dropped, never bubbled into the engine.
pub struct DbNotificationSink {
    pool: DbPool,
}

impl DbNotificationSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl NotificationSink for DbNotificationSink {
    fn deliver(&self, event: NotificationEvent) {
        let mut conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                error!("notification dropped, pool error: {e}");
                return;
            }
        };
        let result = diesel::insert_into(notifications::table)
            .values((
                notifications::id.eq(Uuid::new_v4()),
                notifications::target_user_id.eq(event.target_user_id),
                notifications::kind.eq(event.kind.as_str()),
                notifications::ticket_id.eq(Some(event.ticket_id)),
                notifications::message.eq(&event.message),
                notifications::is_read.eq(false),
                notifications::created_at.eq(Utc::now()),
            ))
            .execute(&mut conn);
        if let Err(e) = result {
            error!("notification dropped: {e}");
        }
    }
}

/// Records events instead of delivering them. Used by tests and by local
/// runs without the notifications table.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingSink {
    pub fn taken(&self) -> Vec<NotificationEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, event: NotificationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
