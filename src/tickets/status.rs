use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::error::TicketError;

/// The five lifecycle states every other subsystem (filters, reporting, SLA
/// math) keys on. The string tokens are part of the persisted format and must
/// stay byte-for-byte stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Open,
    InProgress,
    Waiting,
    Resolved,
    Closed,
}

/// Statuses that count toward an agent's open workload and are eligible for
/// escalation.
pub const WORKLOAD_STATUSES: [&str; 2] = ["waiting", "in_progress"];

impl CanonicalStatus {
    pub const ALL: [CanonicalStatus; 5] = [
        CanonicalStatus::Open,
        CanonicalStatus::InProgress,
        CanonicalStatus::Waiting,
        CanonicalStatus::Resolved,
        CanonicalStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Open => "open",
            CanonicalStatus::InProgress => "in_progress",
            CanonicalStatus::Waiting => "waiting",
            CanonicalStatus::Resolved => "resolved",
            CanonicalStatus::Closed => "closed",
        }
    }

    /// Resolved and closed are the settled states: they are the only ones
    /// allowed to carry `resolved_at`/`closed_at`. Moving out of them is a
    /// reopen and must drop those timestamps.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CanonicalStatus::Resolved | CanonicalStatus::Closed)
    }

    pub fn counts_toward_workload(&self) -> bool {
        matches!(self, CanonicalStatus::Waiting | CanonicalStatus::InProgress)
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synonym table: canonical tokens, their space-separated variants and the
/// Portuguese labels the legacy UI stored over the years. Rows are matched
/// after case-folding and accent-stripping, so "Resolvido" and "resolvido"
/// share one entry. New synonyms are additions to this table, not new code.
static STATUS_SYNONYMS: &[(&str, CanonicalStatus)] = &[
    ("open", CanonicalStatus::Open),
    ("new", CanonicalStatus::Open),
    ("aberto", CanonicalStatus::Open),
    ("aberta", CanonicalStatus::Open),
    ("novo", CanonicalStatus::Open),
    ("nova", CanonicalStatus::Open),
    ("in_progress", CanonicalStatus::InProgress),
    ("in progress", CanonicalStatus::InProgress),
    ("em_andamento", CanonicalStatus::InProgress),
    ("em andamento", CanonicalStatus::InProgress),
    ("andamento", CanonicalStatus::InProgress),
    ("em atendimento", CanonicalStatus::InProgress),
    ("atendimento", CanonicalStatus::InProgress),
    ("waiting", CanonicalStatus::Waiting),
    ("pending", CanonicalStatus::Waiting),
    ("aguardando", CanonicalStatus::Waiting),
    ("aguardando cliente", CanonicalStatus::Waiting),
    ("aguardando_cliente", CanonicalStatus::Waiting),
    ("pendente", CanonicalStatus::Waiting),
    ("em espera", CanonicalStatus::Waiting),
    ("espera", CanonicalStatus::Waiting),
    ("resolved", CanonicalStatus::Resolved),
    ("resolvido", CanonicalStatus::Resolved),
    ("resolvida", CanonicalStatus::Resolved),
    ("solucionado", CanonicalStatus::Resolved),
    ("concluido", CanonicalStatus::Resolved),
    ("closed", CanonicalStatus::Closed),
    ("fechado", CanonicalStatus::Closed),
    ("fechada", CanonicalStatus::Closed),
    ("encerrado", CanonicalStatus::Closed),
    ("encerrada", CanonicalStatus::Closed),
    ("finalizado", CanonicalStatus::Closed),
];

static STATUS_LOOKUP: Lazy<HashMap<&'static str, CanonicalStatus>> =
    Lazy::new(|| STATUS_SYNONYMS.iter().copied().collect());

/// Trims, lowercases and strips the accents the Portuguese labels carry.
pub(crate) fn fold(raw: &str) -> String {
    raw.trim()
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(strip_accent)
        .collect()
}

fn strip_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ç' => 'c',
        other => other,
    }
}

/// Canonicalizes a raw status string. Unmapped input is a hard error: a
/// silent default here would corrupt SLA breach computation and every
/// reporting aggregate that keys on status.
pub fn normalize(raw: &str) -> Result<CanonicalStatus, TicketError> {
    STATUS_LOOKUP
        .get(fold(raw).as_str())
        .copied()
        .ok_or_else(|| TicketError::InvalidStatus(raw.trim().to_string()))
}

/// Everything a status change must write to the ticket row, applied as one
/// update. The timestamp fields are three-valued, diesel changeset style:
/// `None` leaves the column alone, `Some(None)` nulls it, `Some(ts)` stamps
/// it. Writing the status without them leaves rows the scanners misread: a
/// reopened ticket that kept its `resolved_at` still looks auto-closeable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusUpdate {
    pub status: CanonicalStatus,
    pub resolved_at: Option<Option<DateTime<Utc>>>,
    pub closed_at: Option<Option<DateTime<Utc>>>,
}

pub fn status_update_payload(raw: &str, now: DateTime<Utc>) -> Result<StatusUpdate, TicketError> {
    let status = normalize(raw)?;
    let (resolved_at, closed_at) = if !status.is_terminal() {
        // Reopen: clear both stale timestamps.
        (Some(None), Some(None))
    } else if status == CanonicalStatus::Resolved {
        (Some(Some(now)), Some(None))
    } else {
        // Closing keeps resolved_at as it stands: stamped when closing after
        // resolution, null when force-closing straight from an open state.
        (None, Some(Some(now)))
    };
    Ok(StatusUpdate {
        status,
        resolved_at,
        closed_at,
    })
}
