use chrono::Utc;
use sqlx::Row;

use crate::domain::entities::GenerationOutcome;
use crate::domain::errors::PipelineResult;
use crate::infrastructure::persistence::Database;

/// Claim-keyed record of every registration number ever allocated.
///
/// This table is what makes duplicate generator invocations harmless: a
/// recorded outcome is returned as-is instead of allocating a new number.
#[derive(Clone)]
pub struct CertificateRegistry {
    db: Database,
}

impl CertificateRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn find(&self, claim_id: i64) -> PipelineResult<Option<GenerationOutcome>> {
        let row = sqlx::query(
            "SELECT registration_number, generated_cert_id, message
             FROM certificate_registry
             WHERE claim_id = ?",
        )
        .bind(claim_id)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(row) = row {
            Ok(Some(GenerationOutcome {
                registration_number: row.try_get("registration_number")?,
                generated_cert_id: row.try_get("generated_cert_id")?,
                message: row.try_get("message")?,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn record(&self, claim_id: i64, outcome: &GenerationOutcome) -> PipelineResult<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO certificate_registry (claim_id, registration_number, generated_cert_id, message, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(claim_id)
        .bind(&outcome.registration_number)
        .bind(outcome.generated_cert_id)
        .bind(&outcome.message)
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Allocate the next registration sequence value. Runs in its own
    /// transaction so concurrent allocations never hand out the same value.
    pub async fn next_sequence(&self) -> PipelineResult<i64> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("UPDATE registration_sequence SET next_value = next_value + 1 WHERE id = 1")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query("SELECT next_value FROM registration_sequence WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?;
        let value: i64 = row.try_get("next_value")?;

        tx.commit().await?;
        Ok(value)
    }
}
