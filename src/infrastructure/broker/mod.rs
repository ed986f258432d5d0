use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::{Job, JobOptions, JobSpec, JobState};
use crate::domain::errors::{PipelineError, PipelineResult};
use crate::domain::ports::job_broker::{FailureDisposition, JobBroker};
use crate::infrastructure::persistence::Database;
use crate::shared::events::{BrokerEvent, EventBus};

/// What one maintenance sweep did.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaintenanceReport {
    pub promoted: u64,
    pub reclaimed: u64,
    pub force_failed: u64,
    pub removed: u64,
}

/// SQL implementation of the job broker.
///
/// Durability and mutual exclusion both come from the database: leasing is
/// a guarded UPDATE inside a transaction, so losing a race shows up as zero
/// affected rows rather than a double lease.
#[derive(Clone)]
pub struct SqlJobBroker {
    db: Database,
    events: Arc<dyn EventBus>,
    options: JobOptions,
}

fn parse_date_col(row: &AnyRow, col: &str) -> PipelineResult<DateTime<Utc>> {
    let s: String = row.try_get(col)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::Database(sqlx::Error::Decode(Box::new(e))))
}

fn parse_opt_date_col(row: &AnyRow, col: &str) -> PipelineResult<Option<DateTime<Utc>>> {
    let s: Option<String> = row.try_get(col)?;
    match s {
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| PipelineError::Database(sqlx::Error::Decode(Box::new(e)))),
        None => Ok(None),
    }
}

fn job_from_row(row: &AnyRow) -> PipelineResult<Job> {
    let state_str: String = row.try_get("state")?;
    let custom_data_str: Option<String> = row.try_get("custom_data")?;
    let custom_data = custom_data_str.and_then(|s| serde_json::from_str(&s).ok());
    let result_str: Option<String> = row.try_get("result")?;
    let result = result_str.and_then(|s| serde_json::from_str(&s).ok());

    Ok(Job {
        id: row.try_get("id")?,
        claim_id: row.try_get("claim_id")?,
        student_id: row.try_get("student_id")?,
        course_id: row.try_get("course_id")?,
        custom_data,
        custom_reg_number: row.try_get("custom_reg_number")?,
        state: JobState::from(state_str),
        progress: row.try_get("progress")?,
        attempts_made: row.try_get("attempts_made")?,
        max_attempts: row.try_get("max_attempts")?,
        backoff_base_ms: row.try_get("backoff_base_ms")?,
        max_stalled_count: row.try_get("max_stalled_count")?,
        stalled_count: row.try_get("stalled_count")?,
        run_at: parse_date_col(row, "run_at")?,
        locked_by: row.try_get("locked_by")?,
        locked_until: parse_opt_date_col(row, "locked_until")?,
        result,
        error_message: row.try_get("error_message")?,
        created_at: parse_date_col(row, "created_at")?,
        updated_at: parse_date_col(row, "updated_at")?,
        finished_at: parse_opt_date_col(row, "finished_at")?,
    })
}

const JOB_COLUMNS: &str = "id, claim_id, student_id, course_id, custom_data, custom_reg_number, \
     state, progress, attempts_made, max_attempts, backoff_base_ms, max_stalled_count, \
     stalled_count, run_at, locked_by, locked_until, result, error_message, created_at, \
     updated_at, finished_at";

impl SqlJobBroker {
    pub fn new(db: Database, events: Arc<dyn EventBus>, options: JobOptions) -> Self {
        let broker = Self {
            db,
            events,
            options,
        };
        let _ = broker.events.publish(BrokerEvent::Ready);
        broker
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    async fn claim_id_and_state(&self, job_id: &str) -> PipelineResult<(i64, JobState)> {
        let row = sqlx::query("SELECT claim_id, state FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        let state_str: String = row.try_get("state")?;
        Ok((row.try_get("claim_id")?, JobState::from(state_str)))
    }

    /// One pass of the broker's periodic housekeeping: promote due delayed
    /// jobs, reclaim or fail stalled ones, drop expired records.
    pub async fn run_maintenance(&self) -> PipelineResult<MaintenanceReport> {
        let promoted = self.promote_delayed().await?;
        let (reclaimed, force_failed) = self.sweep_stalled().await?;
        let removed = self.enforce_retention().await?;
        Ok(MaintenanceReport {
            promoted,
            reclaimed,
            force_failed,
            removed,
        })
    }

    /// Drive maintenance until cancelled. Broker connectivity trouble is
    /// reported on the event bus and retried on the next tick, never raised
    /// as a job failure.
    pub async fn run_maintenance_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let interval_ms = (self.options.stall_check_interval_ms / 2).max(10) as u64;
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut recovering = false;

        info!("Broker maintenance loop started (tick {}ms)", interval_ms);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_maintenance().await {
                        Ok(report) => {
                            if recovering {
                                recovering = false;
                                info!("Broker maintenance recovered");
                            }
                            if report.promoted + report.reclaimed + report.force_failed + report.removed > 0 {
                                info!(
                                    "Maintenance sweep: {} promoted, {} reclaimed, {} force-failed, {} removed",
                                    report.promoted, report.reclaimed, report.force_failed, report.removed
                                );
                            }
                        }
                        Err(e) => {
                            error!("Broker maintenance sweep failed: {}", e);
                            let _ = self.events.publish(BrokerEvent::Error {
                                message: e.to_string(),
                            });
                            let _ = self.events.publish(BrokerEvent::Reconnecting);
                            recovering = true;
                        }
                    }
                }
            }
        }
        info!("Broker maintenance loop stopped");
    }

    /// Return delayed jobs whose backoff has elapsed to the waiting state.
    async fn promote_delayed(&self) -> PipelineResult<u64> {
        let now = Utc::now();
        let rows = sqlx::query("SELECT id FROM jobs WHERE state = 'delayed' AND run_at <= ?")
            .bind(now.to_rfc3339())
            .fetch_all(self.db.pool())
            .await?;

        let mut promoted = 0;
        for row in rows {
            let id: String = row.try_get("id")?;
            let result = sqlx::query(
                "UPDATE jobs SET state = 'waiting', updated_at = ?
                 WHERE id = ? AND state = 'delayed'",
            )
            .bind(now.to_rfc3339())
            .bind(&id)
            .execute(self.db.pool())
            .await?;

            if result.rows_affected() > 0 {
                promoted += 1;
                let _ = self.events.publish(BrokerEvent::Waiting { job_id: id });
            }
        }
        Ok(promoted)
    }

    /// Find active jobs whose lease expired, mark them stalled, then either
    /// return them to waiting or force a terminal failure once the stall
    /// budget is spent. A reclaimed attempt is refunded: the worker never
    /// reported an outcome, so it does not count against max_attempts.
    async fn sweep_stalled(&self) -> PipelineResult<(u64, u64)> {
        let now = Utc::now();

        sqlx::query(
            "UPDATE jobs SET state = 'stalled', updated_at = ?
             WHERE state = 'active' AND locked_until IS NOT NULL AND locked_until < ?",
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        let rows = sqlx::query(
            "SELECT id, claim_id, stalled_count, max_stalled_count FROM jobs WHERE state = 'stalled'",
        )
        .fetch_all(self.db.pool())
        .await?;

        let mut reclaimed = 0;
        let mut force_failed = 0;
        for row in rows {
            let id: String = row.try_get("id")?;
            let claim_id: i64 = row.try_get("claim_id")?;
            let stalled_count: i32 = row.try_get("stalled_count")?;
            let max_stalled_count: i32 = row.try_get("max_stalled_count")?;
            let new_count = stalled_count + 1;

            if new_count <= max_stalled_count {
                let result = sqlx::query(
                    "UPDATE jobs
                     SET state = 'waiting', stalled_count = ?, attempts_made = attempts_made - 1,
                         locked_by = NULL, locked_until = NULL, run_at = ?, updated_at = ?
                     WHERE id = ? AND state = 'stalled'",
                )
                .bind(new_count)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(&id)
                .execute(self.db.pool())
                .await?;

                if result.rows_affected() > 0 {
                    reclaimed += 1;
                    warn!("Job {} stalled, returned to waiting ({}/{})", id, new_count, max_stalled_count);
                    let _ = self.events.publish(BrokerEvent::Stalled {
                        job_id: id.clone(),
                        reclaimed: true,
                    });
                    let _ = self.events.publish(BrokerEvent::Waiting { job_id: id });
                }
            } else {
                let stall_error = PipelineError::Stalled(new_count).to_string();
                let result = sqlx::query(
                    "UPDATE jobs
                     SET state = 'failed', stalled_count = ?, error_message = ?,
                         locked_by = NULL, locked_until = NULL, finished_at = ?, updated_at = ?
                     WHERE id = ? AND state = 'stalled'",
                )
                .bind(new_count)
                .bind(&stall_error)
                .bind(now.to_rfc3339())
                .bind(now.to_rfc3339())
                .bind(&id)
                .execute(self.db.pool())
                .await?;

                if result.rows_affected() > 0 {
                    force_failed += 1;
                    error!("Job {} exceeded stall budget, terminally failed", id);
                    let _ = self.events.publish(BrokerEvent::Stalled {
                        job_id: id.clone(),
                        reclaimed: false,
                    });
                    let _ = self.events.publish(BrokerEvent::Failed {
                        job_id: id,
                        claim_id,
                        error: stall_error,
                        terminal: true,
                    });
                }
            }
        }
        Ok((reclaimed, force_failed))
    }

    /// Drop finished job records per retention policy. Status-store rows
    /// for the same claims are permanent and untouched.
    async fn enforce_retention(&self) -> PipelineResult<u64> {
        let now = Utc::now();
        let mut removed = 0;

        let completed_cutoff = now - Duration::seconds(self.options.completed_retention.max_age_secs);
        let result = sqlx::query(
            "DELETE FROM jobs WHERE state = 'completed' AND finished_at IS NOT NULL AND finished_at < ?",
        )
        .bind(completed_cutoff.to_rfc3339())
        .execute(self.db.pool())
        .await?;
        removed += result.rows_affected();

        // Keep only the newest N completed jobs
        let result = sqlx::query(
            "DELETE FROM jobs WHERE state = 'completed' AND id NOT IN (
                 SELECT id FROM jobs WHERE state = 'completed'
                 ORDER BY finished_at DESC LIMIT ?
             )",
        )
        .bind(self.options.completed_retention.max_count)
        .execute(self.db.pool())
        .await?;
        removed += result.rows_affected();

        let failed_cutoff = now - Duration::seconds(self.options.failed_retention.max_age_secs);
        let result = sqlx::query(
            "DELETE FROM jobs WHERE state = 'failed' AND finished_at IS NOT NULL AND finished_at < ?",
        )
        .bind(failed_cutoff.to_rfc3339())
        .execute(self.db.pool())
        .await?;
        removed += result.rows_affected();

        Ok(removed)
    }

    /// Announce shutdown to subscribers and close the pool.
    pub async fn close(&self) {
        let _ = self.events.publish(BrokerEvent::Close);
        self.db.close().await;
    }
}

#[async_trait]
impl JobBroker for SqlJobBroker {
    async fn submit(&self, spec: JobSpec, options: &JobOptions) -> PipelineResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let custom_data = spec
            .custom_data
            .as_ref()
            .map(|v| serde_json::to_string(v).unwrap_or_default());

        sqlx::query(
            "INSERT INTO jobs (id, claim_id, student_id, course_id, custom_data, custom_reg_number,
                               state, progress, attempts_made, max_attempts, backoff_base_ms,
                               max_stalled_count, stalled_count, run_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 'waiting', 0, 0, ?, ?, ?, 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(spec.claim_id)
        .bind(spec.student_id)
        .bind(spec.course_id)
        .bind(custom_data)
        .bind(&spec.custom_reg_number)
        .bind(options.max_attempts)
        .bind(options.backoff.base_delay_ms)
        .bind(options.max_stalled_count)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await
        // Submission must fail loudly when the broker is unreachable so the
        // caller can retry at its own boundary.
        .map_err(|e| PipelineError::Submission(e.to_string()))?;

        info!("Job {} submitted for claim {}", id, spec.claim_id);
        let _ = self.events.publish(BrokerEvent::Waiting { job_id: id.clone() });
        Ok(id)
    }

    async fn lease(&self, worker_id: &str) -> PipelineResult<Option<Job>> {
        let now = Utc::now();
        let locked_until = now + Duration::milliseconds(self.options.stall_check_interval_ms);

        let mut tx = self.db.pool().begin().await?;

        let candidate = sqlx::query(
            "SELECT id FROM jobs
             WHERE state = 'waiting' AND run_at <= ?
             ORDER BY run_at ASC
             LIMIT 1",
        )
        .bind(now.to_rfc3339())
        .fetch_optional(&mut *tx)
        .await?;

        let id: String = match candidate {
            Some(row) => row.try_get("id")?,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };

        // The guarded transition is what makes the lease exclusive: if
        // another worker won the race, zero rows match.
        let result = sqlx::query(
            "UPDATE jobs
             SET state = 'active', locked_by = ?, locked_until = ?,
                 attempts_made = attempts_made + 1, progress = 0, updated_at = ?
             WHERE id = ? AND state = 'waiting' AND attempts_made < max_attempts",
        )
        .bind(worker_id)
        .bind(locked_until.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        let job = job_from_row(&row)?;
        info!(
            "Job {} leased by {} (attempt {}/{})",
            job.id, worker_id, job.attempts_made, job.max_attempts
        );
        let _ = self.events.publish(BrokerEvent::Active {
            job_id: job.id.clone(),
            worker_id: worker_id.to_string(),
        });
        Ok(Some(job))
    }

    async fn renew_lease(&self, job_id: &str, worker_id: &str) -> PipelineResult<()> {
        let now = Utc::now();
        let locked_until = now + Duration::milliseconds(self.options.stall_check_interval_ms);

        let result = sqlx::query(
            "UPDATE jobs SET locked_until = ?, updated_at = ?
             WHERE id = ? AND locked_by = ? AND state = 'active'",
        )
        .bind(locked_until.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(job_id)
        .bind(worker_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            // Lease already reclaimed; the worker's eventual result will be
            // ignored by the state guards.
            warn!("Lease renewal for job {} by {} matched no active lease", job_id, worker_id);
        }
        Ok(())
    }

    async fn report_progress(&self, job_id: &str, percent: i32) -> PipelineResult<()> {
        let now = Utc::now();
        let percent = percent.clamp(0, 100);

        sqlx::query(
            "UPDATE jobs SET progress = ?, updated_at = ?
             WHERE id = ? AND state = 'active' AND progress < ?",
        )
        .bind(percent)
        .bind(now.to_rfc3339())
        .bind(job_id)
        .bind(percent)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: Value) -> PipelineResult<()> {
        let (claim_id, state) = self.claim_id_and_state(job_id).await?;
        if state.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        let result_str = serde_json::to_string(&result).unwrap_or_default();

        let updated = sqlx::query(
            "UPDATE jobs
             SET state = 'completed', progress = 100, result = ?, error_message = NULL,
                 locked_by = NULL, locked_until = NULL, finished_at = ?, updated_at = ?
             WHERE id = ? AND state NOT IN ('completed', 'failed')",
        )
        .bind(&result_str)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(job_id)
        .execute(self.db.pool())
        .await?;

        if updated.rows_affected() > 0 {
            info!("Job {} completed", job_id);
            let _ = self.events.publish(BrokerEvent::Completed {
                job_id: job_id.to_string(),
                claim_id,
            });
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> PipelineResult<FailureDisposition> {
        let row = sqlx::query(
            "SELECT claim_id, state, attempts_made, max_attempts, backoff_base_ms
             FROM jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| PipelineError::JobNotFound(job_id.to_string()))?;

        let claim_id: i64 = row.try_get("claim_id")?;
        let state = JobState::from(row.try_get::<String, _>("state")?);
        let attempts_made: i32 = row.try_get("attempts_made")?;
        let max_attempts: i32 = row.try_get("max_attempts")?;
        let backoff_base_ms: i64 = row.try_get("backoff_base_ms")?;

        if state.is_terminal() {
            return Ok(FailureDisposition::AlreadyTerminal);
        }

        let now = Utc::now();

        if attempts_made < max_attempts {
            let delay = crate::domain::entities::BackoffPolicy::new(backoff_base_ms)
                .delay_after(attempts_made);
            let run_at = now + delay;

            let updated = sqlx::query(
                "UPDATE jobs
                 SET state = 'delayed', run_at = ?, error_message = ?,
                     locked_by = NULL, locked_until = NULL, updated_at = ?
                 WHERE id = ? AND state = 'active'",
            )
            .bind(run_at.to_rfc3339())
            .bind(error)
            .bind(now.to_rfc3339())
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

            if updated.rows_affected() == 0 {
                // Raced with the stall sweep or another resolution
                return Ok(FailureDisposition::AlreadyTerminal);
            }

            info!(
                "Job {} failed attempt {}/{}, retrying in {}ms",
                job_id,
                attempts_made,
                max_attempts,
                delay.num_milliseconds()
            );
            let _ = self.events.publish(BrokerEvent::Failed {
                job_id: job_id.to_string(),
                claim_id,
                error: error.to_string(),
                terminal: false,
            });
            Ok(FailureDisposition::Retry { run_at })
        } else {
            sqlx::query(
                "UPDATE jobs
                 SET state = 'failed', error_message = ?,
                     locked_by = NULL, locked_until = NULL, finished_at = ?, updated_at = ?
                 WHERE id = ? AND state NOT IN ('completed', 'failed')",
            )
            .bind(error)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

            error!(
                "Job {} failed terminally after {} attempt(s): {}",
                job_id, attempts_made, error
            );
            let _ = self.events.publish(BrokerEvent::Failed {
                job_id: job_id.to_string(),
                claim_id,
                error: error.to_string(),
                terminal: true,
            });
            Ok(FailureDisposition::Terminal)
        }
    }

    async fn get_job(&self, job_id: &str) -> PipelineResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(job_from_row(&row)?)),
            None => Ok(None),
        }
    }
}
