pub mod assignment;
pub mod autoclose;
pub mod error;
pub mod escalation;
pub mod notify;
pub mod sla;
pub mod status;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::schema::{
    auto_close_configs, escalation_rules, sla_policies, ticket_messages, ticket_sla_tracking,
    tickets,
};
use crate::shared::state::AppState;

use self::assignment::AGENT_ROLES;
use self::error::TicketError;
use self::sla::{persist_tracking, SlaBadge, SlaPolicySet};
use self::status::{normalize, status_update_payload, CanonicalStatus};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_number: String,
    pub subject: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: String,
    pub department_id: Uuid,
    pub client_id: Option<Uuid>,
    pub assigned_agent_id: Option<Uuid>,
    pub last_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = ticket_sla_tracking)]
pub struct SlaTracking {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub first_response_due_at: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub first_response_breached: bool,
    pub resolution_due_at: DateTime<Utc>,
    pub resolution_at: Option<DateTime<Utc>>,
    pub resolution_breached: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = sla_policies)]
pub struct SlaPolicy {
    pub id: Uuid,
    pub department_id: Option<Uuid>,
    pub priority: String,
    pub first_response_hours: i32,
    pub resolution_hours: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = escalation_rules)]
pub struct EscalationRule {
    pub id: Uuid,
    pub department_id: Uuid,
    pub priority: String,
    pub hours_without_response: i32,
    pub escalate_to_agent_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = auto_close_configs)]
pub struct AutoCloseConfig {
    pub id: Uuid,
    pub days_after_resolved: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_messages)]
pub struct TicketMessage {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub author_id: Option<Uuid>,
    pub content: String,
    pub is_internal: bool,
    pub created_at: DateTime<Utc>,
}

/// Row-level form of a `StatusUpdate`. The double-`Option` timestamps keep
/// diesel's changeset semantics: outer `None` skips the column, `Some(None)`
/// nulls it, so a reopen drops stale terminal timestamps in the same
/// statement that writes the status.
#[derive(AsChangeset)]
#[diesel(table_name = tickets)]
pub(crate) struct StatusChangeset {
    status: String,
    resolved_at: Option<Option<DateTime<Utc>>>,
    closed_at: Option<Option<DateTime<Utc>>>,
    updated_at: DateTime<Utc>,
}

impl StatusChangeset {
    pub(crate) fn new(payload: &status::StatusUpdate, now: DateTime<Utc>) -> Self {
        StatusChangeset {
            status: payload.status.as_str().to_string(),
            resolved_at: payload.resolved_at,
            closed_at: payload.closed_at,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }

    /// Accepts the canonical tokens and the Portuguese labels the legacy UI
    /// sent.
    pub fn parse(raw: &str) -> Option<Self> {
        match status::fold(raw).as_str() {
            "low" | "baixa" => Some(TicketPriority::Low),
            "medium" | "media" => Some(TicketPriority::Medium),
            "high" | "alta" => Some(TicketPriority::High),
            "urgent" | "urgente" => Some(TicketPriority::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub subject: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub department_id: Uuid,
    pub client_id: Option<Uuid>,
    pub assigned_agent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub assignee_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateMessageRequest {
    pub content: String,
    pub author_id: Option<Uuid>,
    pub is_internal: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub department_id: Option<Uuid>,
    pub assigned_agent_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreatedTicket {
    pub ticket: Ticket,
    pub assigned_agent_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StatusChanged {
    pub status: CanonicalStatus,
}

#[derive(Debug, Serialize)]
pub struct SlaView {
    pub tracking: SlaTracking,
    pub badge: SlaBadge,
    pub label: &'static str,
}

#[derive(Debug, Serialize)]
pub struct TicketStats {
    pub total_tickets: i64,
    pub open_tickets: i64,
    pub in_progress_tickets: i64,
    pub waiting_tickets: i64,
    pub resolved_tickets: i64,
    pub closed_tickets: i64,
    pub first_response_breaches: i64,
    pub resolution_breaches: i64,
}

fn generate_ticket_number(conn: &mut PgConnection) -> String {
    let count: i64 = tickets::table.count().get_result(conn).unwrap_or(0);
    format!("TKT-{:06}", count + 1)
}

pub(crate) fn insert_audit_message(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    content: &str,
    now: DateTime<Utc>,
) -> QueryResult<usize> {
    diesel::insert_into(ticket_messages::table)
        .values((
            ticket_messages::id.eq(Uuid::new_v4()),
            ticket_messages::ticket_id.eq(ticket_id),
            ticket_messages::author_id.eq(None::<Uuid>),
            ticket_messages::content.eq(content),
            ticket_messages::is_internal.eq(true),
            ticket_messages::created_at.eq(now),
        ))
        .execute(conn)
}

/// Ticket intake: inserts the ticket and its SLA tracking (due timestamps
/// from the policy resolver) in one transaction, then auto-assigns by load.
/// No eligible agent is not a failure of intake: the ticket stays open and
/// unassigned for manual triage.
pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<Json<CreatedTicket>, TicketError> {
    let mut conn = state.conn.get()?;
    let now = Utc::now();

    let priority = req
        .priority
        .as_deref()
        .and_then(TicketPriority::parse)
        .unwrap_or(TicketPriority::Medium);

    let ticket = Ticket {
        id: Uuid::new_v4(),
        ticket_number: generate_ticket_number(&mut conn),
        subject: req.subject,
        description: req.description,
        status: CanonicalStatus::Open.as_str().to_string(),
        priority: priority.as_str().to_string(),
        department_id: req.department_id,
        client_id: req.client_id,
        assigned_agent_id: req.assigned_agent_id,
        last_response_at: None,
        resolved_at: None,
        closed_at: None,
        created_at: now,
        updated_at: now,
    };

    let policies = SlaPolicySet::load(&mut conn)?;
    let targets = policies.resolve(ticket.department_id, &ticket.priority);
    let tracking = SlaTracking::new(ticket.id, now, targets);

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(conn)?;
        diesel::insert_into(ticket_sla_tracking::table)
            .values(&tracking)
            .execute(conn)?;
        Ok(())
    })?;

    let assigned_agent_id = if ticket.assigned_agent_id.is_none() {
        match assignment::assign_ticket(&mut conn, state.notifier.as_ref(), ticket.id, now) {
            Ok(agent_id) => Some(agent_id),
            Err(TicketError::NoEligibleAgents) => {
                warn!("no eligible agents for ticket {}, left unassigned", ticket.id);
                None
            }
            Err(e) => return Err(e),
        }
    } else {
        ticket.assigned_agent_id
    };

    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(ticket.id))
        .first(&mut conn)?;
    Ok(Json(CreatedTicket {
        ticket,
        assigned_agent_id,
    }))
}

/// The single status-changing path. Every caller goes through the
/// normalizer; the status and its timestamps land in one update (a reopen
/// clears the stale terminal ones), and SLA tracking is brought up to date
/// on the same call.
pub async fn update_ticket_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<StatusChanged>, TicketError> {
    let mut conn = state.conn.get()?;
    let now = Utc::now();

    let payload = status_update_payload(&req.status, now)?;
    let updated = diesel::update(tickets::table.filter(tickets::id.eq(id)))
        .set(StatusChangeset::new(&payload, now))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(TicketError::NotFound);
    }

    if let Some(mut tracking) = ticket_sla_tracking::table
        .filter(ticket_sla_tracking::ticket_id.eq(id))
        .first::<SlaTracking>(&mut conn)
        .optional()?
    {
        let mut changed = tracking.evaluate(now);
        if payload.status == CanonicalStatus::Resolved {
            changed |= tracking.record_resolution(now);
        }
        if changed {
            tracking.updated_at = now;
            persist_tracking(&mut conn, &tracking)?;
        }
    }

    Ok(Json(StatusChanged {
        status: payload.status,
    }))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, TicketError> {
    let mut conn = state.conn.get()?;
    let ticket = tickets::table
        .filter(tickets::id.eq(id))
        .first(&mut conn)?;
    Ok(Json(ticket))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Ticket>>, TicketError> {
    let mut conn = state.conn.get()?;
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let mut q = tickets::table.into_boxed();
    if let Some(raw) = query.status {
        let status = normalize(&raw)?;
        q = q.filter(tickets::status.eq(status.as_str()));
    }
    if let Some(priority) = query.priority {
        q = q.filter(tickets::priority.eq(priority));
    }
    if let Some(department_id) = query.department_id {
        q = q.filter(tickets::department_id.eq(department_id));
    }
    if let Some(assigned_agent_id) = query.assigned_agent_id {
        q = q.filter(tickets::assigned_agent_id.eq(assigned_agent_id));
    }

    let rows = q
        .order(tickets::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;
    Ok(Json(rows))
}

/// Manual assignment by a supervisor. Assignee and audit message move
/// together; the load balancer is only for intake.
pub async fn assign_ticket_manual(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignTicketRequest>,
) -> Result<Json<Ticket>, TicketError> {
    let mut conn = state.conn.get()?;
    let now = Utc::now();

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let updated = diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set((
                tickets::assigned_agent_id.eq(Some(req.assignee_id)),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;
        if updated == 0 {
            return Err(diesel::result::Error::NotFound);
        }
        insert_audit_message(
            conn,
            id,
            &format!("Ticket atribuído ao agente {}", req.assignee_id),
            now,
        )?;
        Ok(())
    })?;

    state.notifier.deliver(notify::NotificationEvent {
        target_user_id: req.assignee_id,
        kind: notify::NotificationKind::TicketAssigned,
        ticket_id: id,
        message: "Um ticket foi atribuído a você".to_string(),
    });

    let ticket = tickets::table
        .filter(tickets::id.eq(id))
        .first(&mut conn)?;
    Ok(Json(ticket))
}

/// Messages double as the SLA response events: the first non-internal agent
/// message records the SLA first response and moves the escalation clock.
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<Uuid>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<Json<TicketMessage>, TicketError> {
    let mut conn = state.conn.get()?;
    let now = Utc::now();

    let ticket_exists: i64 = tickets::table
        .filter(tickets::id.eq(ticket_id))
        .count()
        .get_result(&mut conn)?;
    if ticket_exists == 0 {
        return Err(TicketError::NotFound);
    }

    let message = TicketMessage {
        id: Uuid::new_v4(),
        ticket_id,
        author_id: req.author_id,
        content: req.content,
        is_internal: req.is_internal.unwrap_or(false),
        created_at: now,
    };
    diesel::insert_into(ticket_messages::table)
        .values(&message)
        .execute(&mut conn)?;

    let from_agent = match message.author_id {
        Some(author_id) => {
            use crate::shared::schema::users;
            let role: Option<String> = users::table
                .filter(users::id.eq(author_id))
                .filter(users::is_active.eq(true))
                .select(users::role)
                .first(&mut conn)
                .optional()?;
            role.is_some_and(|r| AGENT_ROLES.contains(&r.as_str()))
        }
        None => false,
    };

    if from_agent && !message.is_internal {
        diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
            .set((
                tickets::last_response_at.eq(Some(now)),
                tickets::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        if let Some(mut tracking) = ticket_sla_tracking::table
            .filter(ticket_sla_tracking::ticket_id.eq(ticket_id))
            .first::<SlaTracking>(&mut conn)
            .optional()?
        {
            if tracking.record_first_response(now) {
                tracking.updated_at = now;
                persist_tracking(&mut conn, &tracking)?;
            }
        }
    }

    Ok(Json(message))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Vec<TicketMessage>>, TicketError> {
    let mut conn = state.conn.get()?;
    let messages = ticket_messages::table
        .filter(ticket_messages::ticket_id.eq(ticket_id))
        .order(ticket_messages::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(messages))
}

/// SLA state for one ticket. Breach evaluation runs on every read; a flag
/// that turns true here is persisted before the response goes out.
pub async fn get_ticket_sla(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SlaView>, TicketError> {
    let mut conn = state.conn.get()?;
    let now = Utc::now();

    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(id))
        .first(&mut conn)?;
    let mut tracking: SlaTracking = ticket_sla_tracking::table
        .filter(ticket_sla_tracking::ticket_id.eq(id))
        .first(&mut conn)?;

    if tracking.evaluate(now) {
        tracking.updated_at = now;
        persist_tracking(&mut conn, &tracking)?;
    }

    let status = normalize(&ticket.status)?;
    let badge = tracking.badge(status, now);
    Ok(Json(SlaView {
        tracking,
        badge,
        label: badge.label(),
    }))
}

pub async fn get_ticket_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TicketStats>, TicketError> {
    let mut conn = state.conn.get()?;

    let count_status = |conn: &mut PgConnection, status: CanonicalStatus| -> i64 {
        tickets::table
            .filter(tickets::status.eq(status.as_str()))
            .count()
            .get_result(conn)
            .unwrap_or(0)
    };

    let total_tickets: i64 = tickets::table.count().get_result(&mut conn).unwrap_or(0);
    let first_response_breaches: i64 = ticket_sla_tracking::table
        .filter(ticket_sla_tracking::first_response_breached.eq(true))
        .count()
        .get_result(&mut conn)
        .unwrap_or(0);
    let resolution_breaches: i64 = ticket_sla_tracking::table
        .filter(ticket_sla_tracking::resolution_breached.eq(true))
        .count()
        .get_result(&mut conn)
        .unwrap_or(0);

    Ok(Json(TicketStats {
        total_tickets,
        open_tickets: count_status(&mut conn, CanonicalStatus::Open),
        in_progress_tickets: count_status(&mut conn, CanonicalStatus::InProgress),
        waiting_tickets: count_status(&mut conn, CanonicalStatus::Waiting),
        resolved_tickets: count_status(&mut conn, CanonicalStatus::Resolved),
        closed_tickets: count_status(&mut conn, CanonicalStatus::Closed),
        first_response_breaches,
        resolution_breaches,
    }))
}

/// Open tickets already past their resolution due time, oldest due first.
pub async fn list_overdue_tickets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Ticket>>, TicketError> {
    let mut conn = state.conn.get()?;
    let now = Utc::now();

    let rows: Vec<Ticket> = tickets::table
        .inner_join(ticket_sla_tracking::table)
        .filter(tickets::status.ne(CanonicalStatus::Resolved.as_str()))
        .filter(tickets::status.ne(CanonicalStatus::Closed.as_str()))
        .filter(ticket_sla_tracking::resolution_due_at.lt(now))
        .order(ticket_sla_tracking::resolution_due_at.asc())
        .select(tickets::all_columns)
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn trigger_escalation_pass(
    State(state): State<Arc<AppState>>,
) -> Result<Json<escalation::EscalationOutcome>, TicketError> {
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = state.conn.get()?;
        escalation::run_escalation_pass(&mut conn, state.notifier.as_ref(), Utc::now())
    })
    .await
    .map_err(|e| TicketError::Internal(e.to_string()))??;
    Ok(Json(outcome))
}

pub async fn trigger_auto_close_pass(
    State(state): State<Arc<AppState>>,
) -> Result<Json<autoclose::AutoCloseOutcome>, TicketError> {
    let outcome = tokio::task::spawn_blocking(move || {
        let mut conn = state.conn.get()?;
        autoclose::run_auto_close_pass(&mut conn, state.notifier.as_ref(), Utc::now())
    })
    .await
    .map_err(|e| TicketError::Internal(e.to_string()))??;
    Ok(Json(outcome))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/stats", get(get_ticket_stats))
        .route("/api/tickets/overdue", get(list_overdue_tickets))
        .route("/api/tickets/passes/escalation", post(trigger_escalation_pass))
        .route("/api/tickets/passes/auto-close", post(trigger_auto_close_pass))
        .route("/api/tickets/:id", get(get_ticket))
        .route("/api/tickets/:id/status", put(update_ticket_status))
        .route("/api/tickets/:id/assign", put(assign_ticket_manual))
        .route("/api/tickets/:id/messages", get(list_messages).post(add_message))
        .route("/api/tickets/:id/sla", get(get_ticket_sla))
}
