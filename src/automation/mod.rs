use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use log::{error, info};
use std::str::FromStr;
use std::sync::Arc;

use crate::shared::state::AppState;
use crate::tickets::error::TicketError;
use crate::tickets::{autoclose, escalation};

/// Default cadences: escalation hourly, auto-close once a night. The passes
/// themselves are plain re-runnable functions; this adapter only decides
/// when to call them, so any external cron can replace it.
const ESCALATION_SCHEDULE: &str = "0 0 * * * *";
const AUTO_CLOSE_SCHEDULE: &str = "0 30 3 * * *";

type PassFn = fn(&AppState) -> Result<String, TicketError>;

struct ScheduledPass {
    name: &'static str,
    schedule: Schedule,
    next_run: DateTime<Utc>,
    run: PassFn,
}

impl ScheduledPass {
    fn new(name: &'static str, expression: &str, run: PassFn) -> Result<Self, cron::error::Error> {
        let schedule = Schedule::from_str(expression)?;
        let next_run = schedule
            .upcoming(Utc)
            .next()
            .unwrap_or_else(|| Utc::now() + Duration::hours(1));
        Ok(Self {
            name,
            schedule,
            next_run,
            run,
        })
    }
}

pub struct PassScheduler {
    state: Arc<AppState>,
    passes: Vec<ScheduledPass>,
}

impl PassScheduler {
    pub fn new(state: Arc<AppState>) -> Result<Self, cron::error::Error> {
        let passes = vec![
            ScheduledPass::new("escalation", ESCALATION_SCHEDULE, run_escalation)?,
            ScheduledPass::new("auto_close", AUTO_CLOSE_SCHEDULE, run_auto_close)?,
        ];
        Ok(Self { state, passes })
    }

    pub fn start(mut self) {
        info!("starting pass scheduler");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let now = Utc::now();
                for pass in self.passes.iter_mut() {
                    if pass.next_run > now {
                        continue;
                    }
                    pass.next_run = pass
                        .schedule
                        .upcoming(Utc)
                        .next()
                        .unwrap_or_else(|| now + Duration::hours(1));

                    let state = self.state.clone();
                    let name = pass.name;
                    let run = pass.run;
                    info!("running {name} pass");
                    match tokio::task::spawn_blocking(move || run(&state)).await {
                        Ok(Ok(summary)) => info!("{name} pass finished: {summary}"),
                        Ok(Err(e)) => error!("{name} pass failed: {e}"),
                        Err(e) => error!("{name} pass panicked: {e}"),
                    }
                }
            }
        });
    }
}

fn run_escalation(state: &AppState) -> Result<String, TicketError> {
    let mut conn = state.conn.get()?;
    let outcome = escalation::run_escalation_pass(&mut conn, state.notifier.as_ref(), Utc::now())?;
    Ok(format!(
        "{} rules checked, {} tickets escalated, {} failures",
        outcome.rules_checked, outcome.tickets_escalated, outcome.failures
    ))
}

fn run_auto_close(state: &AppState) -> Result<String, TicketError> {
    let mut conn = state.conn.get()?;
    let outcome = autoclose::run_auto_close_pass(&mut conn, state.notifier.as_ref(), Utc::now())?;
    Ok(format!(
        "{} tickets closed, {} failures",
        outcome.tickets_closed, outcome.failures
    ))
}
