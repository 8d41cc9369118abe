use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{error, info};
use serde::Serialize;

use super::error::TicketError;
use super::notify::{NotificationEvent, NotificationKind, NotificationSink};
use super::status::{normalize, status_update_payload, CanonicalStatus};
use super::{insert_audit_message, AutoCloseConfig, StatusChangeset, Ticket};
use crate::shared::schema::{auto_close_configs, tickets};

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct AutoCloseOutcome {
    pub tickets_closed: usize,
    pub failures: usize,
}

/// Resolved tickets idle past the grace period. Idempotent by construction:
/// a closed ticket no longer has status resolved and can never match again.
pub fn eligible_for_auto_close(
    config: &AutoCloseConfig,
    ticket: &Ticket,
    now: DateTime<Utc>,
) -> bool {
    if !config.is_active {
        return false;
    }
    if !matches!(normalize(&ticket.status), Ok(CanonicalStatus::Resolved)) {
        return false;
    }
    let cutoff = now - Duration::days(i64::from(config.days_after_resolved.max(0)));
    match ticket.resolved_at {
        Some(resolved_at) => resolved_at < cutoff,
        None => false,
    }
}

/// One scan over resolved tickets. No active config is a no-op, not an
/// error. Per-ticket failures are counted and do not abort the pass.
pub fn run_auto_close_pass(
    conn: &mut PgConnection,
    sink: &dyn NotificationSink,
    now: DateTime<Utc>,
) -> Result<AutoCloseOutcome, TicketError> {
    let config: Option<AutoCloseConfig> = auto_close_configs::table
        .filter(auto_close_configs::is_active.eq(true))
        .first(conn)
        .optional()?;
    let Some(config) = config else {
        info!("auto-close pass skipped: no active configuration");
        return Ok(AutoCloseOutcome::default());
    };

    let candidates: Vec<Ticket> = tickets::table
        .filter(tickets::status.eq(CanonicalStatus::Resolved.as_str()))
        .load(conn)?;

    let mut outcome = AutoCloseOutcome::default();
    for ticket in candidates
        .iter()
        .filter(|t| eligible_for_auto_close(&config, t, now))
    {
        match close_ticket(conn, &config, ticket, now) {
            Ok(()) => {
                outcome.tickets_closed += 1;
                if let Some(client_id) = ticket.client_id {
                    sink.deliver(NotificationEvent {
                        target_user_id: client_id,
                        kind: NotificationKind::TicketClosed,
                        ticket_id: ticket.id,
                        message: format!(
                            "O ticket {} foi encerrado automaticamente",
                            ticket.ticket_number
                        ),
                    });
                }
            }
            Err(e) => {
                outcome.failures += 1;
                error!("auto-close of ticket {} failed: {e}", ticket.id);
            }
        }
    }

    info!(
        "auto-close pass: {} tickets closed, {} failures",
        outcome.tickets_closed, outcome.failures
    );
    Ok(outcome)
}

fn close_ticket(
    conn: &mut PgConnection,
    config: &AutoCloseConfig,
    ticket: &Ticket,
    now: DateTime<Utc>,
) -> Result<(), TicketError> {
    let payload = status_update_payload(CanonicalStatus::Closed.as_str(), now)?;
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        // resolved_at stays untouched, so the closed row still records when
        // the ticket was resolved.
        diesel::update(tickets::table.filter(tickets::id.eq(ticket.id)))
            .set(StatusChangeset::new(&payload, now))
            .execute(conn)?;
        insert_audit_message(
            conn,
            ticket.id,
            &format!(
                "Ticket fechado automaticamente após {} dias resolvido",
                config.days_after_resolved
            ),
            now,
        )?;
        Ok(())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::test_fixtures::{auto_close_config, ticket};
    use uuid::Uuid;

    fn resolved_ticket(days_ago: i64, now: DateTime<Utc>) -> Ticket {
        let mut t = ticket(
            Uuid::new_v4(),
            "medium",
            "resolved",
            now - Duration::days(days_ago + 1),
        );
        t.resolved_at = Some(now - Duration::days(days_ago));
        t
    }

    #[test]
    fn resolved_past_grace_period_is_eligible() {
        let now = Utc::now();
        let config = auto_close_config(5);
        assert!(eligible_for_auto_close(&config, &resolved_ticket(6, now), now));
    }

    #[test]
    fn recently_resolved_is_excluded() {
        let now = Utc::now();
        let config = auto_close_config(5);
        assert!(!eligible_for_auto_close(&config, &resolved_ticket(2, now), now));
    }

    #[test]
    fn only_resolved_status_matches() {
        let now = Utc::now();
        let config = auto_close_config(5);
        for status in ["open", "in_progress", "waiting", "closed"] {
            let mut t = ticket(Uuid::new_v4(), "medium", status, now - Duration::days(10));
            t.resolved_at = Some(now - Duration::days(10));
            assert!(!eligible_for_auto_close(&config, &t, now));
        }
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let now = Utc::now();
        let config = auto_close_config(5);
        let mut t = resolved_ticket(6, now);
        assert!(eligible_for_auto_close(&config, &t, now));

        // What the pass writes back.
        t.status = CanonicalStatus::Closed.as_str().to_string();
        t.closed_at = Some(now);
        assert!(!eligible_for_auto_close(&config, &t, now));
    }

    #[test]
    fn inactive_config_never_matches() {
        let now = Utc::now();
        let mut config = auto_close_config(5);
        config.is_active = false;
        assert!(!eligible_for_auto_close(&config, &resolved_ticket(10, now), now));
    }

    #[test]
    fn missing_resolution_timestamp_is_excluded() {
        let now = Utc::now();
        let config = auto_close_config(5);
        let t = ticket(Uuid::new_v4(), "medium", "resolved", now - Duration::days(10));
        assert_eq!(t.resolved_at, None);
        assert!(!eligible_for_auto_close(&config, &t, now));
    }
}
