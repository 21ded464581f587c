use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// One-way transitions per the job state machine (§4.8):
    /// `pending -> running -> {completed | failed | cancelled}`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub records_read: u64,
    pub records_uploaded: u64,
    pub records_failed: u64,
    pub retries: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    RateLimit,
    Server,
    Network,
    Timeout,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobErrorRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub when: OffsetDateTime,
    pub where_: String,
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

/// Bounded list of error records kept on a `Job`; oldest entries are dropped once
/// the cap is hit so one pathological source can't grow a job's memory unboundedly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoundedErrorLog {
    capacity: usize,
    entries: Vec<JobErrorRecord>,
    dropped: u64,
}

impl BoundedErrorLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, record: JobErrorRecord) {
        if self.entries.len() >= self.capacity {
            self.entries.remove(0);
            self.dropped += 1;
        }
        self.entries.push(record);
    }

    pub fn entries(&self) -> &[JobErrorRecord] {
        &self.entries
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub connector_instance_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub status: JobStatus,
    pub stats: JobStats,
    pub errors: BoundedErrorLog,
}

impl Job {
    pub fn new(id: String, connector_instance_id: String, started_at: OffsetDateTime) -> Self {
        Self {
            id,
            connector_instance_id,
            started_at,
            completed_at: None,
            status: JobStatus::Pending,
            stats: JobStats::default(),
            errors: BoundedErrorLog::new(256),
        }
    }

    /// Invariant from §8: `recordsUploaded + recordsFailed <= recordsRead`.
    pub fn stats_are_consistent(&self) -> bool {
        self.stats.records_uploaded + self.stats.records_failed <= self.stats.records_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_one_way() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn bounded_error_log_drops_oldest() {
        let mut log = BoundedErrorLog::new(2);
        for i in 0..3 {
            log.push(JobErrorRecord {
                when: OffsetDateTime::UNIX_EPOCH,
                where_: format!("source-{i}"),
                kind: ErrorKind::Network,
                message: "boom".into(),
                retryable: true,
            });
        }
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.dropped(), 1);
        assert_eq!(log.entries()[0].where_, "source-1");
    }
}
