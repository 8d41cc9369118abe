use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use std::collections::HashMap;
use uuid::Uuid;

use super::error::TicketError;
use super::notify::{NotificationEvent, NotificationKind, NotificationSink};
use super::status::{status_update_payload, CanonicalStatus, WORKLOAD_STATUSES};
use super::{insert_audit_message, StatusChangeset};
use crate::shared::schema::{tickets, users};

/// Roles allowed to take ticket assignments.
pub const AGENT_ROLES: [&str; 2] = ["agent", "admin"];

/// Strict minimum of current open workload; agents with no open tickets
/// count zero. Ties go to the first agent encountered, so the caller's
/// iteration order is the tie-break.
pub fn pick_least_loaded(eligible: &[Uuid], workloads: &HashMap<Uuid, i64>) -> Option<Uuid> {
    let mut best: Option<(Uuid, i64)> = None;
    for agent in eligible {
        let load = workloads.get(agent).copied().unwrap_or(0);
        match best {
            Some((_, current)) if load >= current => {}
            _ => best = Some((*agent, load)),
        }
    }
    best.map(|(agent, _)| agent)
}

/// Active users holding an agent role, in a stable order (creation order,
/// id as a final key) so tie-breaking is deterministic across runs.
pub fn eligible_agents(conn: &mut PgConnection) -> Result<Vec<Uuid>, TicketError> {
    users::table
        .filter(users::is_active.eq(true))
        .filter(users::role.eq_any(AGENT_ROLES))
        .order((users::created_at.asc(), users::id.asc()))
        .select(users::id)
        .load(conn)
        .map_err(Into::into)
}

/// Open-ticket counts ({waiting, in_progress}) grouped by assignee,
/// restricted to the given agents.
pub fn open_workloads(
    conn: &mut PgConnection,
    agents: &[Uuid],
) -> Result<HashMap<Uuid, i64>, TicketError> {
    let agent_ids: Vec<Option<Uuid>> = agents.iter().map(|id| Some(*id)).collect();
    let rows: Vec<(Option<Uuid>, i64)> = tickets::table
        .filter(tickets::assigned_agent_id.is_not_null())
        .filter(tickets::assigned_agent_id.eq_any(agent_ids))
        .filter(tickets::status.eq_any(WORKLOAD_STATUSES))
        .group_by(tickets::assigned_agent_id)
        .select((tickets::assigned_agent_id, diesel::dsl::count_star()))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .filter_map(|(agent, count)| agent.map(|agent| (agent, count)))
        .collect())
}

/// Picks the least-loaded eligible agent and hands the ticket to them. The
/// assignee, the in_progress transition and the audit message move in one
/// transaction; a failure leaves the ticket exactly as it was.
pub fn assign_ticket(
    conn: &mut PgConnection,
    sink: &dyn NotificationSink,
    ticket_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Uuid, TicketError> {
    let agents = eligible_agents(conn)?;
    if agents.is_empty() {
        return Err(TicketError::NoEligibleAgents);
    }
    let workloads = open_workloads(conn, &agents)?;
    let agent_id =
        pick_least_loaded(&agents, &workloads).ok_or(TicketError::NoEligibleAgents)?;

    let payload = status_update_payload(CanonicalStatus::InProgress.as_str(), now)?;
    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        let updated = diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
            .set((
                tickets::assigned_agent_id.eq(Some(agent_id)),
                StatusChangeset::new(&payload, now),
            ))
            .execute(conn)?;
        if updated == 0 {
            return Err(diesel::result::Error::NotFound);
        }
        insert_audit_message(
            conn,
            ticket_id,
            &format!("Ticket atribuído automaticamente ao agente {agent_id}"),
            now,
        )?;
        Ok(())
    })?;

    sink.deliver(NotificationEvent {
        target_user_id: agent_id,
        kind: NotificationKind::TicketAssigned,
        ticket_id,
        message: "Um novo ticket foi atribuído a você".to_string(),
    });
    info!("ticket {ticket_id} assigned to agent {agent_id}");
    Ok(agent_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_the_agent_with_the_lowest_workload() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let workloads = HashMap::from([(a, 3), (b, 1)]);
        assert_eq!(pick_least_loaded(&[a, b], &workloads), Some(b));
    }

    #[test]
    fn unseen_agents_count_zero() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let workloads = HashMap::from([(a, 1)]);
        assert_eq!(pick_least_loaded(&[a, b], &workloads), Some(b));
    }

    #[test]
    fn ties_go_to_the_first_agent_in_iteration_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let workloads = HashMap::from([(a, 2), (b, 2), (c, 2)]);
        assert_eq!(pick_least_loaded(&[a, b, c], &workloads), Some(a));
        assert_eq!(pick_least_loaded(&[c, b, a], &workloads), Some(c));
    }

    #[test]
    fn no_eligible_agents_yields_none() {
        assert_eq!(pick_least_loaded(&[], &HashMap::new()), None);
    }

    #[test]
    fn selection_is_minimal_over_the_eligible_set() {
        let agents: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let workloads: HashMap<Uuid, i64> = agents
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, (7 * i as i64 + 3) % 5))
            .collect();
        let picked = pick_least_loaded(&agents, &workloads).unwrap();
        let picked_load = workloads[&picked];
        for agent in &agents {
            assert!(picked_load <= workloads[agent]);
        }
    }
}
