use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::domain::entities::{ClaimCertificate, ClaimStatus, GenerationOutcome};
use crate::domain::errors::PipelineResult;
use crate::domain::ports::status_store::StatusStore;
use crate::infrastructure::persistence::Database;

/// Relational implementation of the status store: one permanent row per
/// claim in `claim_certificates`.
#[derive(Clone)]
pub struct SqlStatusStore {
    db: Database,
}

impl SqlStatusStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Update-then-insert keyed on claim_id. Portable across the Any
    /// drivers, unlike ON CONFLICT.
    async fn upsert(
        &self,
        claim_id: i64,
        status: ClaimStatus,
        registration_number: Option<&str>,
        generated_cert_id: Option<i64>,
        error_message: Option<&str>,
    ) -> PipelineResult<()> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE claim_certificates
             SET status = ?, registration_number = ?, generated_cert_id = ?, error_message = ?, updated_at = ?
             WHERE claim_id = ?",
        )
        .bind(status.to_string())
        .bind(registration_number)
        .bind(generated_cert_id)
        .bind(error_message)
        .bind(now.to_rfc3339())
        .bind(claim_id)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO claim_certificates (claim_id, status, registration_number, generated_cert_id, error_message, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(claim_id)
            .bind(status.to_string())
            .bind(registration_number)
            .bind(generated_cert_id)
            .bind(error_message)
            .bind(now.to_rfc3339())
            .execute(self.db.pool())
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl StatusStore for SqlStatusStore {
    async fn mark_pending(&self, claim_id: i64) -> PipelineResult<()> {
        self.upsert(claim_id, ClaimStatus::Pending, None, None, None)
            .await
    }

    async fn mark_processing(&self, claim_id: i64) -> PipelineResult<()> {
        // Never downgrade a terminal row: a late-arriving attempt must not
        // mask a recorded outcome.
        let now = Utc::now();
        sqlx::query(
            "UPDATE claim_certificates
             SET status = 'processing', updated_at = ?
             WHERE claim_id = ? AND status NOT IN ('completed', 'failed')",
        )
        .bind(now.to_rfc3339())
        .bind(claim_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn mark_completed(
        &self,
        claim_id: i64,
        outcome: &GenerationOutcome,
    ) -> PipelineResult<()> {
        self.upsert(
            claim_id,
            ClaimStatus::Completed,
            Some(&outcome.registration_number),
            Some(outcome.generated_cert_id),
            None,
        )
        .await
    }

    async fn mark_failed(&self, claim_id: i64, error: &str) -> PipelineResult<()> {
        self.upsert(claim_id, ClaimStatus::Failed, None, None, Some(error))
            .await
    }

    async fn get(&self, claim_id: i64) -> PipelineResult<Option<ClaimCertificate>> {
        let row = sqlx::query(
            "SELECT claim_id, status, registration_number, generated_cert_id, error_message, updated_at
             FROM claim_certificates
             WHERE claim_id = ?",
        )
        .bind(claim_id)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(row) = row {
            let status_str: String = row.try_get("status")?;
            let updated_at_str: String = row.try_get("updated_at")?;
            let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_at_str)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

            Ok(Some(ClaimCertificate {
                claim_id: row.try_get("claim_id")?,
                status: ClaimStatus::from(status_str),
                registration_number: row.try_get("registration_number").ok().flatten(),
                generated_cert_id: row.try_get("generated_cert_id").ok().flatten(),
                error_message: row.try_get("error_message").ok().flatten(),
                updated_at,
            }))
        } else {
            Ok(None)
        }
    }
}
