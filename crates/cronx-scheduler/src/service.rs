//! Scheduler service: owns the registry, drives timer tasks and implements
//! the execution protocol (template fetch → HTTP → stats → next fire → log).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cronx_core::config::SchedulerConfig;
use cronx_core::JobId;
use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SchedulerError};
use crate::executor::HttpExecutor;
use crate::log_writer::ExecutionLogWriter;
use crate::registry::{JobRegistry, TimerContext};
use crate::store::JobStore;
use crate::types::{ActiveJob, ExecutionResult, Job};

/// Process-level lifecycle: `Initializing → Running → ShuttingDown → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceState {
    Initializing = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl ServiceState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServiceState::Initializing,
            1 => ServiceState::Running,
            2 => ServiceState::ShuttingDown,
            _ => ServiceState::Stopped,
        }
    }

    /// No new executions or schedules are accepted in these states.
    pub fn is_stopping(&self) -> bool {
        matches!(self, ServiceState::ShuttingDown | ServiceState::Stopped)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServiceState::Initializing => "initializing",
            ServiceState::Running => "running",
            ServiceState::ShuttingDown => "shutting_down",
            ServiceState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

pub struct SchedulerService {
    store: Arc<dyn JobStore>,
    executor: HttpExecutor,
    clock: Arc<dyn Clock>,
    registry: JobRegistry,
    log_writer: ExecutionLogWriter,
    state: AtomicU8,
    /// Executions that passed the lifecycle gate; shutdown waits for them.
    in_flight: TaskTracker,
    shutdown_timeout: Duration,
    handle_grace: Duration,
    unschedule_grace: Duration,
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: HttpExecutor,
        config: &SchedulerConfig,
    ) -> Arc<Self> {
        Self::with_clock(store, executor, config, Arc::new(SystemClock))
    }

    /// Like [`SchedulerService::new`] with an explicit time source.
    pub fn with_clock(
        store: Arc<dyn JobStore>,
        executor: HttpExecutor,
        config: &SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            log_writer: ExecutionLogWriter::new(Arc::clone(&store)),
            store,
            executor,
            clock,
            registry: JobRegistry::new(),
            state: AtomicU8::new(ServiceState::Initializing as u8),
            in_flight: TaskTracker::new(),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
            handle_grace: Duration::from_millis(config.handle_grace_ms),
            unschedule_grace: Duration::from_millis(config.unschedule_grace_ms),
        })
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_stopping(&self) -> bool {
        self.state().is_stopping()
    }

    /// Load every enabled job from the store and schedule it, then enter
    /// `Running`. A job that fails to schedule is logged and skipped.
    /// Returns the number of jobs scheduled.
    pub async fn start(self: &Arc<Self>) -> usize {
        if self.state() != ServiceState::Initializing {
            warn!(state = %self.state(), "scheduler already started");
            return 0;
        }

        let jobs = match self.store.list_enabled_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("failed to load enabled jobs: {e}");
                Vec::new()
            }
        };

        let mut scheduled = 0usize;
        for job in jobs {
            if self.is_stopping() {
                break;
            }
            let id = job.id.clone();
            match self.schedule_job(job).await {
                Ok(()) => scheduled += 1,
                Err(e) => warn!(job_id = %id, error = %e, "skipping job on startup"),
            }
        }

        let _ = self.state.compare_exchange(
            ServiceState::Initializing as u8,
            ServiceState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        info!(scheduled, "scheduler service started");
        scheduled
    }

    /// Register `job` with a live timer, replacing any existing one, and
    /// persist its first fire time.
    pub async fn schedule_job(self: &Arc<Self>, job: Job) -> Result<()> {
        if self.is_stopping() {
            warn!(job_id = %job.id, "cannot schedule job during shutdown");
            return Err(SchedulerError::ShuttingDown);
        }
        job.validate()?;

        let service = Arc::downgrade(self);
        let clock = Arc::clone(&self.clock);
        let timer_job = job.clone();
        // a drained registry refuses the handle, so a shutdown racing with
        // this call cannot leave a timer behind
        let first = self
            .registry
            .register(job.clone(), self.clock.now(), move |ctx| {
                tokio::spawn(run_timer(service, clock, timer_job, ctx))
            })?;

        if first.is_none() {
            warn!(job_id = %job.id, expression = %job.cron_expression, "expression never fires");
        }
        self.write_next_execution(&job.id, first).await;

        info!(
            job_id = %job.id,
            name = %job.name,
            expression = %job.cron_expression,
            timezone = %job.timezone,
            next = ?first,
            "job scheduled"
        );
        Ok(())
    }

    /// Stop and remove the job's handle. Unknown ids are a no-op.
    pub async fn unschedule_job(&self, id: &JobId) {
        let Some(handle) = self.registry.unregister(id) else {
            debug!(job_id = %id, "unschedule: job not scheduled");
            return;
        };
        let clean = handle.stop(self.unschedule_grace).await;
        self.write_next_execution(id, None).await;
        info!(job_id = %id, clean, "job unscheduled");
    }

    /// Apply an edited job: enabled jobs are (re)scheduled, disabled ones
    /// unscheduled.
    pub async fn update_job(self: &Arc<Self>, job: Job) -> Result<()> {
        if job.is_enabled {
            self.schedule_job(job).await
        } else {
            self.unschedule_job(&job.id).await;
            Ok(())
        }
    }

    pub fn list_active(&self) -> Vec<ActiveJob> {
        self.registry.list_active()
    }

    /// Run `job` once now. Used by timers and by manual "run now" requests.
    ///
    /// Always returns a result; failures (missing template, transport
    /// errors, unexpected status) are recorded as failed executions.
    pub async fn execute_job(&self, job: &Job) -> ExecutionResult {
        // taken before the state check so shutdown cannot miss this execution
        let _in_flight = self.in_flight.token();
        if self.is_stopping() {
            info!(job_id = %job.id, "skipping job execution during shutdown");
            return ExecutionResult::shutting_down();
        }

        let started_at = self.clock.now();
        let started = Instant::now();
        let result = match self.store.get_template(&job.template_id).await {
            Ok(Some(mut template)) => {
                template.timeout_seconds = template.timeout_seconds.min(job.timeout_seconds);
                self.executor.execute(&template, job.retry_attempts).await
            }
            Ok(None) => ExecutionResult::failure(
                SchedulerError::TemplateNotFound {
                    id: job.template_id.to_string(),
                }
                .to_string(),
                elapsed_ms(started),
            ),
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to load template");
                ExecutionResult::failure(
                    format!("failed to load template: {e}"),
                    elapsed_ms(started),
                )
            }
        };

        let finished_at = self.clock.now();
        if let Err(e) = self
            .store
            .increment_job_stats(&job.id, result.success, finished_at)
            .await
        {
            error!(job_id = %job.id, error = %e, "failed to update execution stats");
        }
        self.persist_next_execution(&job.id, finished_at).await;
        self.log_writer.append(&job.id, started_at, &result).await;

        if result.success {
            info!(
                job_id = %job.id,
                status = ?result.status_code,
                duration_ms = result.duration_ms,
                attempts = result.attempts,
                "job executed"
            );
        } else {
            warn!(
                job_id = %job.id,
                status = ?result.status_code,
                error = ?result.error,
                duration_ms = result.duration_ms,
                attempts = result.attempts,
                "job execution failed"
            );
        }
        result
    }

    /// Write the next fire time from the job's live registration. Jobs that
    /// are not scheduled (disabled, unscheduled, manual run of an idle job)
    /// keep whatever the store holds.
    async fn persist_next_execution(&self, id: &JobId, after: DateTime<Utc>) {
        let Some(seen) = self.registry.upcoming(id, after) else {
            debug!(job_id = %id, "job not scheduled, next execution left as is");
            return;
        };
        self.write_next_execution(id, seen.next).await;

        // unscheduled or rescheduled while we were writing
        match self.registry.upcoming(id, after) {
            Some(current) if current.generation == seen.generation => {}
            Some(current) => self.write_next_execution(id, current.next).await,
            None => self.write_next_execution(id, None).await,
        }
    }

    async fn write_next_execution(&self, id: &JobId, next: Option<DateTime<Utc>>) {
        if let Err(e) = self.store.set_next_execution(id, next).await {
            error!(job_id = %id, error = %e, "failed to persist next execution");
        }
    }

    /// Stop every handle and wait (bounded) for in-flight executions.
    ///
    /// Each handle is cancelled and given `handle_grace` to exit; whatever is
    /// still alive when `shutdown_timeout` elapses is aborted. Executions that
    /// start after this call return the synthetic "shutting down" result and
    /// write nothing.
    pub async fn shutdown(&self) {
        let flipped = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                match ServiceState::from_u8(s) {
                    ServiceState::Initializing | ServiceState::Running => {
                        Some(ServiceState::ShuttingDown as u8)
                    }
                    _ => None,
                }
            });
        if flipped.is_err() {
            debug!("shutdown already in progress");
            return;
        }
        info!("shutting down scheduler service");

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        let handles = self.registry.drain();
        let count = handles.len();
        let aborts: Vec<_> = handles.iter().map(|(_, h)| h.abort_handle()).collect();

        let grace = self.handle_grace;
        let stops = join_all(handles.into_iter().map(|(id, handle)| async move {
            let clean = handle.stop(grace).await;
            if !clean {
                warn!(job_id = %id, "handle did not stop within grace period");
            }
            debug!(job_id = %id, "stopped job timer");
            clean
        }));

        match tokio::time::timeout_at(deadline, stops).await {
            Ok(results) => {
                let clean = results.iter().filter(|c| **c).count();
                debug!(clean, total = count, "timers stopped");
            }
            Err(_) => {
                warn!("shutdown timeout elapsed, force-clearing remaining timers");
                for abort in &aborts {
                    abort.abort();
                }
            }
        }

        self.in_flight.close();
        if tokio::time::timeout_at(deadline, self.in_flight.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.in_flight.len(),
                "executions still running at shutdown deadline"
            );
        }

        self.state
            .store(ServiceState::Stopped as u8, Ordering::SeqCst);
        info!(stopped = count, "scheduler service shut down");
    }
}

/// Timer loop for one job: sleep until the next fire instant, then spawn the
/// execution so a slow request never delays the following tick.
async fn run_timer(
    service: Weak<SchedulerService>,
    clock: Arc<dyn Clock>,
    job: Job,
    ctx: TimerContext,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        let now = clock.now();
        // never fire the same instant twice if the sleep woke up early
        let from = last_fire.map_or(now, |t| t.max(now));
        let Some(next) = ctx.schedule.next_after(&ctx.tz, from) else {
            warn!(job_id = %job.id, "no further fire times, timer exiting");
            ctx.next_fire.set(None);
            break;
        };
        ctx.next_fire.set(Some(next));

        let wait = (next - clock.now()).to_std().unwrap_or_default();
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
        last_fire = Some(next);

        let Some(service) = service.upgrade() else {
            break;
        };
        if service.is_stopping() {
            info!(job_id = %job.id, "skipping job execution during shutdown");
            break;
        }

        debug!(job_id = %job.id, fire_at = %next, "timer fired");
        let job = job.clone();
        tokio::spawn(async move {
            service.execute_job(&job).await;
        });
    }
    debug!(job_id = %job.id, "timer stopped");
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ServiceState::Initializing,
            ServiceState::Running,
            ServiceState::ShuttingDown,
            ServiceState::Stopped,
        ] {
            assert_eq!(ServiceState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn only_late_states_are_stopping() {
        assert!(!ServiceState::Initializing.is_stopping());
        assert!(!ServiceState::Running.is_stopping());
        assert!(ServiceState::ShuttingDown.is_stopping());
        assert!(ServiceState::Stopped.is_stopping());
    }
}
