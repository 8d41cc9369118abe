use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::warn;
use serde::Serialize;
use uuid::Uuid;

use super::error::TicketError;
use super::status::CanonicalStatus;
use super::{SlaPolicy, SlaTracking};
use crate::shared::schema::{sla_policies, ticket_sla_tracking};

/// System-wide fallback targets, used when no policy row matches. Tracking
/// degrades to these rather than blocking ticket intake.
pub const DEFAULT_FIRST_RESPONSE_HOURS: i64 = 8;
pub const DEFAULT_RESOLUTION_HOURS: i64 = 48;

// Urgency bands for open tickets. Fixed constants of the tracker, not
// configuration.
const URGENT_FIRST_RESPONSE_WINDOW_MINUTES: i64 = 60;
const URGENT_RESOLUTION_WINDOW_HOURS: i64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaTargets {
    pub first_response: Duration,
    pub resolution: Duration,
}

impl SlaTargets {
    pub fn system_default() -> Self {
        Self {
            first_response: Duration::hours(DEFAULT_FIRST_RESPONSE_HOURS),
            resolution: Duration::hours(DEFAULT_RESOLUTION_HOURS),
        }
    }
}

/// Read-only policy snapshot. Loaded once per operation and passed in, so
/// tests can resolve against synthetic policy sets.
pub struct SlaPolicySet {
    policies: Vec<SlaPolicy>,
}

impl SlaPolicySet {
    pub fn new(policies: Vec<SlaPolicy>) -> Self {
        Self {
            policies: policies.into_iter().filter(|p| p.is_active).collect(),
        }
    }

    pub fn load(conn: &mut PgConnection) -> Result<Self, TicketError> {
        let policies = sla_policies::table
            .filter(sla_policies::is_active.eq(true))
            .load::<SlaPolicy>(conn)?;
        Ok(Self::new(policies))
    }

    /// Lookup precedence: department+priority row, then the department-less
    /// priority default, then the system default. Targets are always
    /// positive.
    pub fn resolve(&self, department_id: Uuid, priority: &str) -> SlaTargets {
        let exact = self
            .policies
            .iter()
            .find(|p| p.department_id == Some(department_id) && p.priority == priority);
        let priority_default = self
            .policies
            .iter()
            .find(|p| p.department_id.is_none() && p.priority == priority);
        match exact.or(priority_default) {
            Some(policy) => SlaTargets {
                first_response: Duration::hours(i64::from(policy.first_response_hours.max(1))),
                resolution: Duration::hours(i64::from(policy.resolution_hours.max(1))),
            },
            None => {
                warn!(
                    "no SLA policy for department {department_id} priority {priority:?}, using system default"
                );
                SlaTargets::system_default()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaBadge {
    SlaOk,
    SlaBreached,
    FirstResponseLate,
    ResolutionLate,
    Urgent,
    OnTrack,
}

impl SlaBadge {
    /// Labels as the UI has always shown them.
    pub fn label(&self) -> &'static str {
        match self {
            SlaBadge::SlaOk => "SLA OK",
            SlaBadge::SlaBreached => "SLA Violado",
            SlaBadge::FirstResponseLate => "Primeira Resposta Atrasada",
            SlaBadge::ResolutionLate => "Resolução Atrasada",
            SlaBadge::Urgent => "Urgente",
            SlaBadge::OnTrack => "No Prazo",
        }
    }
}

impl SlaTracking {
    pub fn new(ticket_id: Uuid, created_at: DateTime<Utc>, targets: SlaTargets) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            first_response_due_at: created_at + targets.first_response,
            first_response_at: None,
            first_response_breached: false,
            resolution_due_at: created_at + targets.resolution,
            resolution_at: None,
            resolution_breached: false,
            created_at,
            updated_at: created_at,
        }
    }

    /// Sets whichever breach flags have become true; returns whether anything
    /// changed. Never clears a flag: an SLA miss is a fact of history even if
    /// clocks or rows are edited later.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if !self.first_response_breached
            && self.first_response_at.is_none()
            && now > self.first_response_due_at
        {
            self.first_response_breached = true;
            changed = true;
        }
        if !self.resolution_breached
            && self.resolution_at.is_none()
            && now > self.resolution_due_at
        {
            self.resolution_breached = true;
            changed = true;
        }
        changed
    }

    /// Records the first agent response. Breaches are evaluated first so a
    /// late response cannot retroactively hide the miss; recording the time
    /// does not itself flip the flag.
    pub fn record_first_response(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = self.evaluate(now);
        if self.first_response_at.is_none() {
            self.first_response_at = Some(now);
            changed = true;
        }
        changed
    }

    pub fn record_resolution(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = self.evaluate(now);
        if self.resolution_at.is_none() {
            self.resolution_at = Some(now);
            changed = true;
        }
        changed
    }

    /// Presentation badge. Closed/resolved tickets report from the resolution
    /// breach flag alone; open tickets report their urgency band.
    pub fn badge(&self, status: CanonicalStatus, now: DateTime<Utc>) -> SlaBadge {
        if matches!(status, CanonicalStatus::Resolved | CanonicalStatus::Closed) {
            return if self.resolution_breached {
                SlaBadge::SlaBreached
            } else {
                SlaBadge::SlaOk
            };
        }

        let first_response_pending = self.first_response_at.is_none();
        let resolution_pending = self.resolution_at.is_none();

        if first_response_pending && now > self.first_response_due_at {
            return SlaBadge::FirstResponseLate;
        }
        if resolution_pending && now > self.resolution_due_at {
            return SlaBadge::ResolutionLate;
        }

        let first_response_close = first_response_pending
            && self.first_response_due_at - now
                <= Duration::minutes(URGENT_FIRST_RESPONSE_WINDOW_MINUTES);
        let resolution_close = resolution_pending
            && self.resolution_due_at - now <= Duration::hours(URGENT_RESOLUTION_WINDOW_HOURS);
        if first_response_close || resolution_close {
            SlaBadge::Urgent
        } else {
            SlaBadge::OnTrack
        }
    }
}

pub fn persist_tracking(conn: &mut PgConnection, tracking: &SlaTracking) -> QueryResult<usize> {
    diesel::update(ticket_sla_tracking::table.filter(ticket_sla_tracking::id.eq(tracking.id)))
        .set(tracking)
        .execute(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(
        department_id: Option<Uuid>,
        priority: &str,
        first_response_hours: i32,
        resolution_hours: i32,
    ) -> SlaPolicy {
        SlaPolicy {
            id: Uuid::new_v4(),
            department_id,
            priority: priority.to_string(),
            first_response_hours,
            resolution_hours,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn resolver_prefers_department_policy_over_priority_default() {
        let dept = Uuid::new_v4();
        let set = SlaPolicySet::new(vec![
            policy(None, "high", 4, 24),
            policy(Some(dept), "high", 1, 8),
        ]);
        let targets = set.resolve(dept, "high");
        assert_eq!(targets.first_response, Duration::hours(1));
        assert_eq!(targets.resolution, Duration::hours(8));
    }

    #[test]
    fn resolver_falls_back_to_priority_default_then_system_default() {
        let dept = Uuid::new_v4();
        let set = SlaPolicySet::new(vec![policy(None, "high", 4, 24)]);
        assert_eq!(set.resolve(dept, "high").first_response, Duration::hours(4));
        assert_eq!(set.resolve(dept, "low"), SlaTargets::system_default());
    }

    #[test]
    fn resolver_ignores_inactive_policies() {
        let dept = Uuid::new_v4();
        let mut inactive = policy(Some(dept), "urgent", 1, 2);
        inactive.is_active = false;
        let set = SlaPolicySet::new(vec![inactive]);
        assert_eq!(set.resolve(dept, "urgent"), SlaTargets::system_default());
    }

    #[test]
    fn resolved_targets_are_always_positive() {
        let dept = Uuid::new_v4();
        let set = SlaPolicySet::new(vec![policy(Some(dept), "low", 0, -5)]);
        let targets = set.resolve(dept, "low");
        assert!(targets.first_response > Duration::zero());
        assert!(targets.resolution > Duration::zero());
    }

    fn tracking_with(first_response_hours: i64, resolution_hours: i64) -> SlaTracking {
        let created = Utc::now();
        SlaTracking::new(
            Uuid::new_v4(),
            created,
            SlaTargets {
                first_response: Duration::hours(first_response_hours),
                resolution: Duration::hours(resolution_hours),
            },
        )
    }

    #[test]
    fn high_priority_ticket_unanswered_past_due_is_breached_and_badged() {
        let mut tracking = tracking_with(1, 24);
        let later = tracking.created_at + Duration::minutes(90);
        assert!(tracking.evaluate(later));
        assert!(tracking.first_response_breached);
        assert!(!tracking.resolution_breached);
        let badge = tracking.badge(CanonicalStatus::Open, later);
        assert_eq!(badge, SlaBadge::FirstResponseLate);
        assert_eq!(badge.label(), "Primeira Resposta Atrasada");
    }

    #[test]
    fn breach_flags_are_monotonic() {
        let mut tracking = tracking_with(1, 24);
        let late = tracking.created_at + Duration::hours(2);
        assert!(tracking.evaluate(late));
        assert!(tracking.first_response_breached);

        // No later operation may clear the flag, not even a response, a
        // resolution, or a re-evaluation at an earlier clock.
        tracking.record_first_response(late + Duration::minutes(5));
        assert!(tracking.first_response_breached);
        tracking.record_resolution(late + Duration::hours(1));
        assert!(tracking.first_response_breached);
        tracking.evaluate(tracking.created_at);
        assert!(tracking.first_response_breached);
    }

    #[test]
    fn timely_response_never_sets_the_flag() {
        let mut tracking = tracking_with(4, 24);
        let on_time = tracking.created_at + Duration::hours(1);
        assert!(tracking.record_first_response(on_time));
        assert!(!tracking.first_response_breached);
        assert_eq!(tracking.first_response_at, Some(on_time));

        // Later evaluations see the recorded response and stay quiet.
        assert!(!tracking.evaluate(tracking.created_at + Duration::hours(10)));
        assert!(!tracking.first_response_breached);
    }

    #[test]
    fn first_response_is_recorded_once() {
        let mut tracking = tracking_with(4, 24);
        let first = tracking.created_at + Duration::hours(1);
        tracking.record_first_response(first);
        tracking.record_first_response(first + Duration::hours(1));
        assert_eq!(tracking.first_response_at, Some(first));
    }

    #[test]
    fn late_resolution_keeps_the_breach_it_evaluated() {
        let mut tracking = tracking_with(1, 8);
        let late = tracking.created_at + Duration::hours(9);
        assert!(tracking.record_resolution(late));
        assert!(tracking.resolution_breached);
        assert_eq!(tracking.resolution_at, Some(late));
        assert_eq!(
            tracking.badge(CanonicalStatus::Resolved, late),
            SlaBadge::SlaBreached
        );
    }

    #[test]
    fn resolved_on_time_reports_sla_ok() {
        let mut tracking = tracking_with(1, 8);
        let on_time = tracking.created_at + Duration::hours(2);
        tracking.record_first_response(tracking.created_at + Duration::minutes(30));
        tracking.record_resolution(on_time);
        assert_eq!(
            tracking.badge(CanonicalStatus::Closed, on_time),
            SlaBadge::SlaOk
        );
    }

    #[test]
    fn urgency_bands_for_open_tickets() {
        let tracking = tracking_with(4, 48);
        let created = tracking.created_at;

        assert_eq!(
            tracking.badge(CanonicalStatus::Open, created),
            SlaBadge::OnTrack
        );
        // 30 minutes before the first-response due time.
        assert_eq!(
            tracking.badge(CanonicalStatus::Open, created + Duration::minutes(210)),
            SlaBadge::Urgent
        );

        let mut responded = tracking_with(4, 48);
        responded.record_first_response(created + Duration::hours(1));
        // 2 hours before the resolution due time.
        assert_eq!(
            responded.badge(CanonicalStatus::Open, created + Duration::hours(46)),
            SlaBadge::Urgent
        );
        assert_eq!(
            responded.badge(CanonicalStatus::InProgress, created + Duration::hours(49)),
            SlaBadge::ResolutionLate
        );
    }
}
