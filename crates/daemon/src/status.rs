//! Job state and the single-flight guard for mirror passes.
//!
//! Scans, cleanups and orphan detection share one guard: at most one of them
//! runs at a time and a trigger that arrives meanwhile is rejected.

use crate::job_executor::TranscodeJob;
use crate::record::{now_rfc3339, StatusCounts, VideoRecord};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Kinds of mirror pass guarded by [`SingleFlight`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scan,
    Cleanup,
    Orphans,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Scan => "scan",
            JobKind::Cleanup => "cleanup",
            JobKind::Orphans => "orphans",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable run/idle state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub running: Option<JobKind>,
    pub started_at: Option<String>,
    pub last_kind: Option<JobKind>,
    pub last_finished_at: Option<String>,
    pub last_summary: Option<String>,
}

impl JobStatus {
    pub fn is_busy(&self) -> bool {
        self.running.is_some()
    }
}

/// Answer to a scan or cleanup trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Accepted,
    Busy,
}

/// Everything the status surface reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub counts: StatusCounts,
    pub videos: Vec<VideoRecord>,
    pub job: JobStatus,
    pub transcodes: Vec<TranscodeJob>,
}

/// At most one guarded job at a time
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    state: Arc<Mutex<JobStatus>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JobStatus> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the guard for `kind`, or `None` while another job holds it.
    pub fn try_begin(&self, kind: JobKind) -> Option<FlightTicket> {
        let mut state = self.lock();
        if state.is_busy() {
            return None;
        }
        state.running = Some(kind);
        state.started_at = Some(now_rfc3339());
        Some(FlightTicket {
            state: self.state.clone(),
            kind,
            done: false,
        })
    }

    pub fn snapshot(&self) -> JobStatus {
        self.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.lock().is_busy()
    }
}

/// Held for the duration of a guarded job; releases the guard when finished or dropped.
#[derive(Debug)]
pub struct FlightTicket {
    state: Arc<Mutex<JobStatus>>,
    kind: JobKind,
    done: bool,
}

impl FlightTicket {
    /// Release the guard and record what the job did.
    pub fn finish(mut self, summary: impl Into<String>) {
        self.release(Some(summary.into()));
    }

    fn release(&mut self, summary: Option<String>) {
        if self.done {
            return;
        }
        self.done = true;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.running = None;
        state.started_at = None;
        state.last_kind = Some(self.kind);
        state.last_finished_at = Some(now_rfc3339());
        state.last_summary =
            Some(summary.unwrap_or_else(|| format!("{} aborted", self.kind)));
    }
}

impl Drop for FlightTicket {
    fn drop(&mut self) {
        self.release(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_is_rejected() {
        let guard = SingleFlight::new();
        let ticket = guard.try_begin(JobKind::Scan).unwrap();
        assert!(guard.try_begin(JobKind::Cleanup).is_none());
        assert!(guard.try_begin(JobKind::Scan).is_none());

        let state = guard.snapshot();
        assert_eq!(state.running, Some(JobKind::Scan));
        assert!(state.started_at.is_some());

        ticket.finish("3 new");
        let state = guard.snapshot();
        assert!(!state.is_busy());
        assert_eq!(state.last_kind, Some(JobKind::Scan));
        assert_eq!(state.last_summary.as_deref(), Some("3 new"));
        assert!(guard.try_begin(JobKind::Cleanup).is_some());
    }

    #[test]
    fn test_dropped_ticket_releases_guard() {
        let guard = SingleFlight::new();
        {
            let _ticket = guard.try_begin(JobKind::Orphans).unwrap();
            assert!(guard.is_busy());
        }
        let state = guard.snapshot();
        assert!(!state.is_busy());
        assert_eq!(state.last_summary.as_deref(), Some("orphans aborted"));
    }

    #[test]
    fn test_trigger_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Trigger::Busy).unwrap(), "\"busy\"");
        assert_eq!(serde_json::to_string(&JobKind::Cleanup).unwrap(), "\"cleanup\"");
    }
}
