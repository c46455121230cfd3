use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tokio::time::sleep;

use crate::state::AppState;

/// Spawn the background scheduler that runs the daily billing jobs.
///
/// Each job fires once per calendar day at or after its configured UTC hour
/// (invoice generation, then the overdue sweep, then reminders) and runs in
/// its own `tokio::spawn`, so a failure in one job never crashes the
/// scheduler loop or the other jobs. Every job is idempotent, so an extra
/// manual trigger or an overlapping run is harmless.
pub async fn run_background_scheduler(state: AppState) {
    if !state.config.scheduler_enabled {
        tracing::info!("Background scheduler disabled by configuration");
        return;
    }
    tracing::info!("Background scheduler started");

    let mut last_generation_day: Option<u32> = None;
    let mut last_sweep_day: Option<u32> = None;
    let mut last_reminder_day: Option<u32> = None;

    loop {
        sleep(Duration::from_secs(15)).await;
        let now = Utc::now();

        if job_due(
            now,
            state.config.invoice_generation_hour_utc,
            &mut last_generation_day,
        ) {
            let st = state.clone();
            tokio::spawn(async move {
                let result = crate::services::invoice_generator::run_invoice_generation(
                    st.store.as_ref(),
                    Utc::now(),
                    st.config.invoice_batch_limit,
                )
                .await;
                tracing::info!(
                    invoices = result.invoices_created,
                    errors = result.errors,
                    "Scheduler: invoice generation completed"
                );
            });
        }

        if job_due(now, state.config.overdue_sweep_hour_utc, &mut last_sweep_day) {
            let st = state.clone();
            tokio::spawn(async move {
                let result = crate::services::overdue_sweep::run_overdue_sweep(
                    st.store.as_ref(),
                    Utc::now(),
                    st.config.invoice_batch_limit,
                )
                .await;
                tracing::info!(
                    marked = result.marked_overdue,
                    errors = result.errors,
                    "Scheduler: overdue sweep completed"
                );
            });
        }

        if job_due(now, state.config.reminder_hour_utc, &mut last_reminder_day) {
            let st = state.clone();
            tokio::spawn(async move {
                let result = crate::services::reminder_scheduler::run_reminder_scheduling(
                    st.store.as_ref(),
                    Utc::now(),
                    st.config.invoice_batch_limit,
                )
                .await;
                tracing::info!(
                    created = result.reminders_created,
                    errors = result.errors,
                    "Scheduler: reminder scheduling completed"
                );
            });
        }
    }
}

/// True at most once per calendar day, the first tick at or after `hour_utc`.
fn job_due(now: DateTime<Utc>, hour_utc: u32, last_run_day: &mut Option<u32>) -> bool {
    let today = now.ordinal();
    if *last_run_day == Some(today) || now.hour() < hour_utc {
        return false;
    }
    *last_run_day = Some(today);
    true
}

#[cfg(test)]
mod tests {
    use super::job_due;
    use chrono::{TimeZone, Utc};

    #[test]
    fn fires_once_per_day_after_the_gate_hour() {
        let mut last = None;
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 5, 59, 0).unwrap();
        let on_time = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 10).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 6, 0, 0).unwrap();

        assert!(!job_due(early, 6, &mut last));
        assert!(job_due(on_time, 6, &mut last));
        assert!(!job_due(later, 6, &mut last));
        assert!(job_due(next_day, 6, &mut last));
    }

    #[test]
    fn missed_gate_still_fires_later_the_same_day() {
        // Process started at noon; the 06:00 job should still run today.
        let mut last = None;
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(job_due(noon, 6, &mut last));
    }
}
