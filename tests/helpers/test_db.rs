use certmill::Database;

/// Spin up a throwaway file-based SQLite database with the pipeline schema.
/// A unique file per test keeps parallel test execution isolated.
pub async fn setup_test_db() -> Database {
    // Install drivers for AnyPool (required for tests)
    sqlx::any::install_default_drivers();

    use uuid::Uuid;
    let temp_file = format!("test_{}.db", Uuid::new_v4());
    let db_url = format!("sqlite://{}?mode=rwc", temp_file);

    let db = Database::connect(&db_url)
        .await
        .expect("Failed to connect to test database");

    setup_schema(&db).await;

    db
}

async fn setup_schema(db: &Database) {
    let pool = db.pool();

    sqlx::query(
        "CREATE TABLE jobs (
            id TEXT PRIMARY KEY,
            claim_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            custom_data TEXT,
            custom_reg_number TEXT,
            state TEXT NOT NULL DEFAULT 'waiting' CHECK(state IN ('waiting', 'active', 'delayed', 'completed', 'failed', 'stalled')),
            progress INTEGER NOT NULL DEFAULT 0,
            attempts_made INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL DEFAULT 3,
            backoff_base_ms INTEGER NOT NULL DEFAULT 2000,
            max_stalled_count INTEGER NOT NULL DEFAULT 1,
            stalled_count INTEGER NOT NULL DEFAULT 0,
            run_at TEXT NOT NULL,
            locked_by TEXT,
            locked_until TEXT,
            result TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            finished_at TEXT
        )",
    )
    .execute(pool)
    .await
    .expect("Failed to create jobs table");

    sqlx::query("CREATE INDEX idx_jobs_state_run_at ON jobs(state, run_at)")
        .execute(pool)
        .await
        .ok();

    sqlx::query(
        "CREATE TABLE claim_certificates (
            claim_id INTEGER PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending', 'processing', 'completed', 'failed')),
            registration_number TEXT,
            generated_cert_id INTEGER,
            error_message TEXT,
            updated_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .expect("Failed to create claim_certificates table");

    sqlx::query(
        "CREATE TABLE certificate_registry (
            claim_id INTEGER PRIMARY KEY,
            registration_number TEXT NOT NULL,
            generated_cert_id INTEGER NOT NULL,
            message TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .expect("Failed to create certificate_registry table");

    sqlx::query(
        "CREATE TABLE registration_sequence (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            next_value INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await
    .expect("Failed to create registration_sequence table");

    sqlx::query("INSERT INTO registration_sequence (id, next_value) VALUES (1, 0)")
        .execute(pool)
        .await
        .expect("Failed to seed registration_sequence");
}
