use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::{error, info};
use serde::Serialize;

use super::insert_audit_message;
use super::notify::{NotificationEvent, NotificationKind, NotificationSink};
use super::status::{normalize, WORKLOAD_STATUSES};
use super::{EscalationRule, Ticket};
use crate::shared::schema::{escalation_rules, tickets};
use super::error::TicketError;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct EscalationOutcome {
    pub rules_checked: usize,
    pub tickets_escalated: usize,
    pub failures: usize,
}

/// A ticket matches a rule when it has sat without an agent response past
/// the rule's threshold and is not already owned by the escalation target.
/// The ownership guard is what makes re-running a pass harmless; a ticket
/// stays eligible for other rules with other targets.
pub fn rule_matches(rule: &EscalationRule, ticket: &Ticket, now: DateTime<Utc>) -> bool {
    if !rule.is_active {
        return false;
    }
    if ticket.department_id != rule.department_id || ticket.priority != rule.priority {
        return false;
    }
    if !matches!(normalize(&ticket.status), Ok(status) if status.counts_toward_workload()) {
        return false;
    }
    if ticket.assigned_agent_id == Some(rule.escalate_to_agent_id) {
        return false;
    }
    let cutoff = now - Duration::hours(i64::from(rule.hours_without_response.max(0)));
    match ticket.last_response_at {
        None => true,
        Some(last_response) => last_response < cutoff,
    }
}

/// One scan over all active rules. Stateless and safe to re-run on any
/// schedule, including concurrently: every write is guarded by the ticket's
/// own eligibility predicate. A failure on one ticket is counted and does
/// not abort the pass. Escalation changes ownership, never status.
pub fn run_escalation_pass(
    conn: &mut PgConnection,
    sink: &dyn NotificationSink,
    now: DateTime<Utc>,
) -> Result<EscalationOutcome, TicketError> {
    let rules: Vec<EscalationRule> = escalation_rules::table
        .filter(escalation_rules::is_active.eq(true))
        .load(conn)?;

    let mut outcome = EscalationOutcome::default();
    for rule in &rules {
        outcome.rules_checked += 1;
        let candidates: Vec<Ticket> = tickets::table
            .filter(tickets::department_id.eq(rule.department_id))
            .filter(tickets::priority.eq(&rule.priority))
            .filter(tickets::status.eq_any(WORKLOAD_STATUSES))
            .load(conn)?;

        for ticket in candidates.iter().filter(|t| rule_matches(rule, t, now)) {
            match escalate_ticket(conn, rule, ticket, now) {
                Ok(()) => {
                    outcome.tickets_escalated += 1;
                    sink.deliver(NotificationEvent {
                        target_user_id: rule.escalate_to_agent_id,
                        kind: NotificationKind::TicketEscalated,
                        ticket_id: ticket.id,
                        message: format!(
                            "O ticket {} foi escalado para você",
                            ticket.ticket_number
                        ),
                    });
                }
                Err(e) => {
                    outcome.failures += 1;
                    error!("escalation of ticket {} failed: {e}", ticket.id);
                }
            }
        }
    }

    info!(
        "escalation pass: {} rules checked, {} tickets escalated, {} failures",
        outcome.rules_checked, outcome.tickets_escalated, outcome.failures
    );
    Ok(outcome)
}

fn escalate_ticket(
    conn: &mut PgConnection,
    rule: &EscalationRule,
    ticket: &Ticket,
    now: DateTime<Utc>,
) -> Result<(), diesel::result::Error> {
    conn.transaction(|conn| {
        diesel::update(tickets::table.filter(tickets::id.eq(ticket.id)))
            .set((
                tickets::assigned_agent_id.eq(Some(rule.escalate_to_agent_id)),
                tickets::updated_at.eq(now),
            ))
            .execute(conn)?;
        insert_audit_message(
            conn,
            ticket.id,
            &format!(
                "Ticket escalado automaticamente após {}h sem resposta",
                rule.hours_without_response
            ),
            now,
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::test_fixtures::{rule, ticket};
    use uuid::Uuid;

    #[test]
    fn unanswered_ticket_past_threshold_matches() {
        let now = Utc::now();
        let dept = Uuid::new_v4();
        let r = rule(dept, "high", 4);
        let mut t = ticket(dept, "high", "waiting", now - Duration::hours(10));
        t.last_response_at = Some(now - Duration::hours(5));
        assert!(rule_matches(&r, &t, now));
    }

    #[test]
    fn never_answered_ticket_matches_immediately() {
        let now = Utc::now();
        let dept = Uuid::new_v4();
        let r = rule(dept, "high", 4);
        let t = ticket(dept, "high", "in_progress", now - Duration::minutes(10));
        assert_eq!(t.last_response_at, None);
        assert!(rule_matches(&r, &t, now));
    }

    #[test]
    fn recent_response_does_not_match() {
        let now = Utc::now();
        let dept = Uuid::new_v4();
        let r = rule(dept, "high", 4);
        let mut t = ticket(dept, "high", "waiting", now - Duration::hours(10));
        t.last_response_at = Some(now - Duration::hours(1));
        assert!(!rule_matches(&r, &t, now));
    }

    #[test]
    fn ticket_already_with_the_target_is_excluded() {
        let now = Utc::now();
        let dept = Uuid::new_v4();
        let r = rule(dept, "high", 4);
        let mut t = ticket(dept, "high", "waiting", now - Duration::hours(10));
        t.assigned_agent_id = Some(r.escalate_to_agent_id);
        assert!(!rule_matches(&r, &t, now));
    }

    #[test]
    fn department_priority_and_status_must_line_up() {
        let now = Utc::now();
        let dept = Uuid::new_v4();
        let r = rule(dept, "high", 4);

        let other_dept = ticket(Uuid::new_v4(), "high", "waiting", now - Duration::hours(10));
        assert!(!rule_matches(&r, &other_dept, now));

        let other_priority = ticket(dept, "low", "waiting", now - Duration::hours(10));
        assert!(!rule_matches(&r, &other_priority, now));

        for status in ["open", "resolved", "closed"] {
            let t = ticket(dept, "high", status, now - Duration::hours(10));
            assert!(!rule_matches(&r, &t, now));
        }
    }

    #[test]
    fn inactive_rule_never_matches() {
        let now = Utc::now();
        let dept = Uuid::new_v4();
        let mut r = rule(dept, "high", 4);
        r.is_active = false;
        let t = ticket(dept, "high", "waiting", now - Duration::hours(10));
        assert!(!rule_matches(&r, &t, now));
    }

    #[test]
    fn second_pass_does_not_rematch_an_escalated_ticket() {
        let now = Utc::now();
        let dept = Uuid::new_v4();
        let r = rule(dept, "high", 4);
        let mut t = ticket(dept, "high", "waiting", now - Duration::hours(10));

        assert!(rule_matches(&r, &t, now));
        // What the pass writes back.
        t.assigned_agent_id = Some(r.escalate_to_agent_id);
        assert!(!rule_matches(&r, &t, now));

        // A different rule with a different target still applies.
        let other = rule(dept, "high", 4);
        assert!(rule_matches(&other, &t, now));
    }
}
