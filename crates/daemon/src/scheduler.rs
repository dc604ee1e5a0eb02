//! Background loop running a full pass every scan interval.

use crate::daemon::Organizer;
use crate::status::Trigger;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Interval between scheduled passes; never shorter than one minute
pub fn scan_interval(interval_minutes: u64) -> Duration {
    Duration::from_secs(interval_minutes.max(1) * 60)
}

/// Sleep `interval`, run a pass, repeat forever.
///
/// A tick that finds another guarded job running is skipped.
pub async fn run_scheduler(organizer: Arc<Organizer>, interval: Duration) {
    log::info!("Scheduler started, interval {}s", interval.as_secs());
    loop {
        tokio::time::sleep(interval).await;
        if organizer.scheduled_pass().await == Trigger::Busy {
            log::debug!("Scheduled pass skipped");
        }
    }
}

/// Spawn the scheduler loop
pub fn start_scheduler(organizer: Arc<Organizer>) -> JoinHandle<()> {
    let interval = scan_interval(organizer.config().scan.interval_minutes);
    tokio::spawn(run_scheduler(organizer, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::tests::organizer;
    use crate::status::JobKind;
    use tempfile::TempDir;

    #[test]
    fn test_scan_interval() {
        assert_eq!(scan_interval(60), Duration::from_secs(3600));
        assert_eq!(scan_interval(0), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_scheduler_runs_passes() {
        let tmp = TempDir::new().unwrap();
        let org = organizer(&tmp, "http://127.0.0.1:9/api".to_string()).await;

        let handle = tokio::spawn(run_scheduler(org.clone(), Duration::from_millis(20)));
        let mut ran = false;
        for _ in 0..300 {
            if org.guard().snapshot().last_kind == Some(JobKind::Scan) {
                ran = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert!(ran, "scheduler never completed a pass");
    }

    #[tokio::test]
    async fn test_scheduler_skips_tick_while_busy() {
        let tmp = TempDir::new().unwrap();
        let org = organizer(&tmp, "http://127.0.0.1:9/api".to_string()).await;
        let ticket = org.guard().try_begin(JobKind::Cleanup).unwrap();

        let handle = tokio::spawn(run_scheduler(org.clone(), Duration::from_millis(5)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();

        // The held job is still the running one and no scan has finished
        let state = org.guard().snapshot();
        assert_eq!(state.running, Some(JobKind::Cleanup));
        assert_eq!(state.last_kind, None);
        let skipped = org
            .log_tail(0, 100)
            .lines
            .iter()
            .any(|l| l.contains("Scheduled scan skipped"));
        assert!(skipped);
        drop(ticket);
    }
}
