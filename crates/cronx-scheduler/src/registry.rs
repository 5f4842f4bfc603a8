//! In-memory map of live schedule handles, one per job id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cronx_core::JobId;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cron::{parse_timezone, CronSchedule};
use crate::error::{Result, SchedulerError};
use crate::types::{ActiveJob, Job};

/// Next fire instant, shared between a handle and its timer task.
#[derive(Debug, Clone, Default)]
pub struct NextFire(Arc<Mutex<Option<DateTime<Utc>>>>);

impl NextFire {
    pub fn new(at: Option<DateTime<Utc>>) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        *self.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set(&self, at: Option<DateTime<Utc>>) {
        *self.0.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }
}

/// Everything a timer task needs; handed to the spawner by `register`.
pub struct TimerContext {
    pub schedule: CronSchedule,
    pub tz: Tz,
    pub cancel: CancellationToken,
    pub next_fire: NextFire,
}

/// A live trigger bound to one job's cron expression.
pub struct ScheduleHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    next_fire: NextFire,
}

impl ScheduleHandle {
    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_fire.get()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Lets a caller force-stop the timer after `stop` has taken ownership.
    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Cancel and drop the timer immediately.
    fn abort(self) {
        self.cancel.cancel();
        self.task.abort();
    }

    /// Cancel, then give the timer task `grace` to exit on its own before
    /// aborting it. Returns `true` if it exited in time.
    pub async fn stop(self, grace: Duration) -> bool {
        self.cancel.cancel();
        let abort = self.task.abort_handle();
        match tokio::time::timeout(grace, self.task).await {
            Ok(_) => true,
            Err(_) => {
                abort.abort();
                false
            }
        }
    }
}

struct Entry {
    job: Job,
    schedule: CronSchedule,
    tz: Tz,
    generation: u64,
    handle: ScheduleHandle,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<JobId, Entry>,
    generation: u64,
    /// Set by `drain`; no handle is accepted afterwards.
    closed: bool,
}

/// Next fire of a registered job, tagged with the registration it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upcoming {
    pub next: Option<DateTime<Utc>>,
    pub generation: u64,
}

/// Job id → live handle + cached definition. Guarded by a mutex because API
/// calls and the shutdown path mutate it concurrently.
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Install a handle for `job`, replacing (and tearing down) any existing
    /// one for the same id. Returns the first fire instant after `now`.
    ///
    /// The expression and timezone are validated before anything changes;
    /// on error the registry is left untouched. Fails with `ShuttingDown`
    /// once the registry has been drained.
    pub fn register<F>(
        &self,
        job: Job,
        now: DateTime<Utc>,
        spawn: F,
    ) -> Result<Option<DateTime<Utc>>>
    where
        F: FnOnce(TimerContext) -> JoinHandle<()>,
    {
        let schedule = CronSchedule::parse(&job.cron_expression)?;
        let tz = parse_timezone(&job.timezone)?;
        let first = schedule.next_after(&tz, now);

        let mut inner = self.inner();
        if inner.closed {
            return Err(SchedulerError::ShuttingDown);
        }
        if let Some(old) = inner.entries.remove(&job.id) {
            old.handle.abort();
            debug!(job_id = %job.id, "previous handle torn down");
        }

        let cancel = CancellationToken::new();
        let next_fire = NextFire::new(first);
        let task = spawn(TimerContext {
            schedule: schedule.clone(),
            tz,
            cancel: cancel.clone(),
            next_fire: next_fire.clone(),
        });
        inner.generation += 1;
        let generation = inner.generation;
        inner.entries.insert(
            job.id.clone(),
            Entry {
                job,
                schedule,
                tz,
                generation,
                handle: ScheduleHandle {
                    cancel,
                    task,
                    next_fire,
                },
            },
        );
        Ok(first)
    }

    /// Remove the handle for `id`. The caller decides how to stop it.
    pub fn unregister(&self, id: &JobId) -> Option<ScheduleHandle> {
        self.inner().entries.remove(id).map(|e| e.handle)
    }

    /// Next fire after `after` under the job's *current* registration, or
    /// `None` when the job is not scheduled.
    pub fn upcoming(&self, id: &JobId, after: DateTime<Utc>) -> Option<Upcoming> {
        self.inner().entries.get(id).map(|e| Upcoming {
            next: e.schedule.next_after(&e.tz, after),
            generation: e.generation,
        })
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.inner().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().entries.is_empty()
    }

    pub fn list_active(&self) -> Vec<ActiveJob> {
        let mut active: Vec<ActiveJob> = self
            .inner()
            .entries
            .values()
            .map(|e| ActiveJob {
                job_id: e.job.id.clone(),
                name: e.job.name.clone(),
                is_scheduled: !e.handle.is_cancelled(),
                next_execution: e.handle.next_fire(),
            })
            .collect();
        active.sort_by(|a, b| a.next_execution.cmp(&b.next_execution));
        active
    }

    /// Take every handle out of the registry and close it to new ones.
    pub fn drain(&self) -> Vec<(JobId, ScheduleHandle)> {
        let mut inner = self.inner();
        inner.closed = true;
        inner
            .entries
            .drain()
            .map(|(id, e)| (id, e.handle))
            .collect()
    }
}
