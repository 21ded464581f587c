use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ingestion_common::new_trace_id;
use ingestion_protocol::{ConnectorInstance, Schedule, SyncParams};
use time::OffsetDateTime;
use std::sync::Mutex as StdMutex;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::runtime::ConnectorRuntime;

/// Resolves whether this process currently holds the scheduling lock. The spec
/// requires ticks to fire from exactly one process at a time (§4.9) but doesn't
/// mandate a specific election algorithm, so the runtime takes this as a
/// pluggable hook rather than baking in a distributed lease — a single-process
/// deployment just returns `true` always.
pub type LeaderLock = Arc<dyn Fn() -> bool + Send + Sync>;

pub fn always_leader() -> LeaderLock {
    Arc::new(|| true)
}

/// One scheduled connector instance's firing state.
struct Registration {
    instance: Arc<ConnectorInstance>,
    schedule: Schedule,
    next_fire: OffsetDateTime,
    overlap_skipped: AtomicU64,
}

/// Fires connector pulls on a cron or interval schedule (§4.9). A tick that lands
/// while the previous run for that instance is still in flight is skipped, not
/// queued — `overlap_skipped` on the registration counts how often this happens
/// so an operator can see a connector that can't keep up with its own schedule.
pub struct Scheduler {
    runtime: Arc<ConnectorRuntime>,
    registrations: RwLock<HashMap<String, Arc<Registration>>>,
    leader: LeaderLock,
    tick_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(runtime: Arc<ConnectorRuntime>, leader: LeaderLock) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            registrations: RwLock::new(HashMap::new()),
            leader,
            tick_handle: StdMutex::new(None),
        })
    }

    pub async fn register(&self, instance: ConnectorInstance, schedule: Schedule) {
        let next_fire = next_fire_after(&schedule, OffsetDateTime::now_utc());
        let registration = Arc::new(Registration {
            instance: Arc::new(instance.clone()),
            schedule,
            next_fire,
            overlap_skipped: AtomicU64::new(0),
        });
        self.registrations.write().await.insert(instance.id, registration);
    }

    pub async fn deregister(&self, instance_id: &str) {
        self.registrations.write().await.remove(instance_id);
    }

    pub async fn overlap_count(&self, instance_id: &str) -> Option<u64> {
        self.registrations
            .read()
            .await
            .get(instance_id)
            .map(|r| r.overlap_skipped.load(Ordering::SeqCst))
    }

    /// Fires a pull for `instance_id` immediately, bypassing its schedule. Still
    /// subject to the Connector Runtime's own one-job-per-instance lock.
    pub async fn run_now(self: &Arc<Self>, instance_id: &str) -> ingestion_core::ConnectorResult<()> {
        let registration = self
            .registrations
            .read()
            .await
            .get(instance_id)
            .cloned()
            .ok_or(ingestion_core::ConnectorError::Validation(format!(
                "no scheduled connector instance {instance_id}"
            )))?;
        self.fire(registration).await;
        Ok(())
    }

    /// Runs the scheduler's tick loop on a background task until `stop` is
    /// called. Every `resolution` (default 1s) it checks each registration's
    /// `next_fire` against now and, if this process holds the leader lock,
    /// fires any that are due.
    pub fn start(self: &Arc<Self>, resolution: std::time::Duration) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resolution);
            loop {
                ticker.tick().await;
                scheduler.tick().await;
            }
        });
        // start() may be called more than once across a process lifetime (e.g.
        // after a config reload); only the latest tick loop stays alive.
        let previous = self.tick_handle.lock().unwrap().replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(handle) = self.tick_handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn tick(self: &Arc<Self>) {
        if !(self.leader)() {
            return;
        }

        let now = OffsetDateTime::now_utc();
        let due: Vec<Arc<Registration>> = {
            let registrations = self.registrations.read().await;
            registrations
                .values()
                .filter(|registration| registration.next_fire <= now)
                .cloned()
                .collect()
        };

        for registration in due {
            self.fire(registration.clone()).await;
            self.reschedule(&registration.instance.id, now).await;
        }
    }

    async fn reschedule(&self, instance_id: &str, after: OffsetDateTime) {
        let mut registrations = self.registrations.write().await;
        if let Some(slot) = registrations.get(instance_id) {
            let next_fire = next_fire_after(&slot.schedule, after);
            let updated = Arc::new(Registration {
                instance: slot.instance.clone(),
                schedule: slot.schedule.clone(),
                next_fire,
                overlap_skipped: AtomicU64::new(slot.overlap_skipped.load(Ordering::SeqCst)),
            });
            registrations.insert(instance_id.to_string(), updated);
        }
    }

    async fn fire(&self, registration: Arc<Registration>) {
        if self.runtime.is_running(&registration.instance.id).await {
            registration.overlap_skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let runtime = self.runtime.clone();
        let instance = registration.instance.clone();
        let params = SyncParams::first_run(new_trace_id());
        tokio::spawn(async move {
            let _ = runtime.pull(instance, params).await;
        });
    }
}

/// Hand-rolled minute-precision matcher: no `cron` crate is a workspace
/// dependency, and the schedule vocabulary this system needs (5-field
/// minute/hour/day-of-month/month/day-of-week, `*`, lists, ranges, steps) is
/// small enough to not warrant pulling one in.
fn next_fire_after(schedule: &Schedule, after: OffsetDateTime) -> OffsetDateTime {
    match schedule {
        Schedule::Interval { millis } => after + time::Duration::milliseconds(*millis as i64),
        Schedule::Cron { expr } => match CronSchedule::parse(expr) {
            Ok(cron) => cron.next_after(after),
            Err(_) => after + time::Duration::minutes(1),
        },
    }
}

#[derive(Debug, Clone)]
struct CronField {
    allowed: [bool; 60],
}

impl CronField {
    fn parse(field: &str, max: u32) -> Result<Self, String> {
        let mut allowed = [false; 60];
        for part in field.split(',') {
            let (range_part, step) = match part.split_once('/') {
                Some((range, step)) => (range, step.parse::<u32>().map_err(|_| format!("bad step {step}"))?),
                None => (part, 1),
            };
            let (lo, hi) = if range_part == "*" {
                (0, max - 1)
            } else if let Some((lo, hi)) = range_part.split_once('-') {
                (
                    lo.parse::<u32>().map_err(|_| format!("bad range start {lo}"))?,
                    hi.parse::<u32>().map_err(|_| format!("bad range end {hi}"))?,
                )
            } else {
                let v = range_part.parse::<u32>().map_err(|_| format!("bad value {range_part}"))?;
                (v, v)
            };
            if hi >= max || lo > hi {
                return Err(format!("field value out of range: {part}"));
            }
            let mut v = lo;
            while v <= hi {
                allowed[v as usize] = true;
                v += step.max(1);
            }
        }
        Ok(Self { allowed })
    }

    fn matches(&self, value: u32) -> bool {
        self.allowed.get(value as usize).copied().unwrap_or(false)
    }
}

/// A parsed 5-field cron expression: `minute hour day-of-month month day-of-week`.
struct CronSchedule {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronSchedule {
    fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!("cron expression must have 5 fields, got {}", fields.len()));
        }
        Ok(Self {
            minute: CronField::parse(fields[0], 60)?,
            hour: CronField::parse(fields[1], 24)?,
            day_of_month: CronField::parse(fields[2], 32)?,
            month: CronField::parse(fields[3], 13)?,
            day_of_week: CronField::parse(fields[4], 7)?,
        })
    }

    fn matches(&self, at: OffsetDateTime) -> bool {
        self.minute.matches(at.minute() as u32)
            && self.hour.matches(at.hour() as u32)
            && self.day_of_month.matches(at.day() as u32)
            && self.month.matches(u8::from(at.month()) as u32)
            && self.day_of_week.matches(at.weekday().number_days_from_sunday() as u32)
    }

    /// Linear minute-by-minute scan, bounded to four years out so a malformed
    /// expression that can never match doesn't spin forever.
    fn next_after(&self, after: OffsetDateTime) -> OffsetDateTime {
        let start = truncate_to_minute(after) + time::Duration::minutes(1);
        let limit = start + time::Duration::days(366 * 4);
        let mut candidate = start;
        while candidate < limit {
            if self.matches(candidate) {
                return candidate;
            }
            candidate = candidate + time::Duration::minutes(1);
        }
        limit
    }
}

fn truncate_to_minute(at: OffsetDateTime) -> OffsetDateTime {
    at - time::Duration::seconds(at.second() as i64) - time::Duration::nanoseconds(at.nanosecond() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn every_minute_matches_any_time() {
        let cron = CronSchedule::parse("* * * * *").unwrap();
        assert!(cron.matches(datetime!(2026-01-01 13:45:00 UTC)));
    }

    #[test]
    fn step_field_matches_only_multiples() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        assert!(cron.matches(datetime!(2026-01-01 13:30:00 UTC)));
        assert!(!cron.matches(datetime!(2026-01-01 13:31:00 UTC)));
    }

    #[test]
    fn fixed_hour_matches_only_that_hour() {
        let cron = CronSchedule::parse("0 9 * * *").unwrap();
        assert!(cron.matches(datetime!(2026-01-01 09:00:00 UTC)));
        assert!(!cron.matches(datetime!(2026-01-01 10:00:00 UTC)));
    }

    #[test]
    fn next_after_finds_the_following_occurrence() {
        let cron = CronSchedule::parse("30 9 * * *").unwrap();
        let next = cron.next_after(datetime!(2026-01-01 09:00:00 UTC));
        assert_eq!(next, datetime!(2026-01-01 09:30:00 UTC));
    }

    #[test]
    fn next_after_rolls_to_the_next_day_once_todays_slot_has_passed() {
        let cron = CronSchedule::parse("0 9 * * *").unwrap();
        let next = cron.next_after(datetime!(2026-01-01 10:00:00 UTC));
        assert_eq!(next, datetime!(2026-01-02 09:00:00 UTC));
    }

    #[test]
    fn malformed_field_count_is_rejected() {
        assert!(CronSchedule::parse("* * *").is_err());
    }

    #[test]
    fn interval_schedule_advances_by_its_period() {
        let next = next_fire_after(&Schedule::Interval { millis: 60_000 }, datetime!(2026-01-01 00:00:00 UTC));
        assert_eq!(next, datetime!(2026-01-01 00:01:00 UTC));
    }
}
