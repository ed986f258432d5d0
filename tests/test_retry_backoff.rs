mod helpers;

use std::sync::Arc;

use certmill::infrastructure::broker::SqlJobBroker;
use certmill::shared::events::LocalEventBus;
use certmill::{BackoffPolicy, FailureDisposition, JobBroker, JobOptions, JobSpec, JobState};
use chrono::Utc;
use helpers::test_db::setup_test_db;

fn spec(claim_id: i64) -> JobSpec {
    JobSpec {
        claim_id,
        student_id: 7,
        course_id: 3,
        custom_data: None,
        custom_reg_number: None,
    }
}

fn options_with_backoff(base_delay_ms: i64) -> JobOptions {
    JobOptions {
        backoff: BackoffPolicy::new(base_delay_ms),
        ..JobOptions::default()
    }
}

#[tokio::test]
async fn test_failure_with_remaining_attempts_delays_job() {
    let db = setup_test_db().await;
    let events = Arc::new(LocalEventBus::default());
    let options = options_with_backoff(2_000);
    let broker = SqlJobBroker::new(db, events, options.clone());

    let job_id = broker.submit(spec(1), &options).await.unwrap();
    broker.lease("worker-a").await.unwrap().unwrap();

    let before = Utc::now();
    let disposition = broker.fail(&job_id, "renderer crashed").await.unwrap();

    let run_at = match disposition {
        FailureDisposition::Retry { run_at } => run_at,
        other => panic!("Expected retry, got {:?}", other),
    };

    // First failure: delay = base * 2^0 = 2000ms
    let delay_ms = (run_at - before).num_milliseconds();
    assert!(
        (1_900..=2_200).contains(&delay_ms),
        "unexpected first-retry delay: {}ms",
        delay_ms
    );

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Delayed);
    assert_eq!(job.attempts_made, 1);
    assert_eq!(job.error_message.as_deref(), Some("renderer crashed"));
    assert!(job.locked_by.is_none());

    // Delayed jobs are not leasable until promoted
    assert!(broker.lease("worker-b").await.unwrap().is_none());
}

#[tokio::test]
async fn test_backoff_doubles_on_second_failure() {
    let db = setup_test_db().await;
    let events = Arc::new(LocalEventBus::default());
    let options = options_with_backoff(10);
    let broker = SqlJobBroker::new(db, events, options.clone());

    let job_id = broker.submit(spec(1), &options).await.unwrap();

    broker.lease("worker-a").await.unwrap().unwrap();
    broker.fail(&job_id, "attempt 1 failed").await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    let report = broker.run_maintenance().await.unwrap();
    assert_eq!(report.promoted, 1);

    broker.lease("worker-a").await.unwrap().unwrap();
    let before = Utc::now();
    let disposition = broker.fail(&job_id, "attempt 2 failed").await.unwrap();

    let run_at = match disposition {
        FailureDisposition::Retry { run_at } => run_at,
        other => panic!("Expected retry, got {:?}", other),
    };

    // Second failure: delay = base * 2^1
    let delay_ms = (run_at - before).num_milliseconds();
    assert!(
        (15..=120).contains(&delay_ms),
        "unexpected second-retry delay: {}ms",
        delay_ms
    );

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts_made, 2);
}

#[tokio::test]
async fn test_attempts_exhaustion_is_terminal() {
    let db = setup_test_db().await;
    let events = Arc::new(LocalEventBus::default());
    let options = options_with_backoff(10);
    let broker = SqlJobBroker::new(db, events, options.clone());

    let job_id = broker.submit(spec(1), &options).await.unwrap();

    let mut active_phases = 0;
    loop {
        if broker.lease("worker-a").await.unwrap().is_some() {
            active_phases += 1;
            let disposition = broker.fail(&job_id, "permanently broken").await.unwrap();
            if disposition == FailureDisposition::Terminal {
                break;
            }
        } else {
            tokio::time::sleep(std::time::Duration::from_millis(15)).await;
            broker.run_maintenance().await.unwrap();
        }

        let job = broker.get_job(&job_id).await.unwrap().unwrap();
        assert!(job.attempts_made <= job.max_attempts);
    }

    // Exactly max_attempts active phases
    assert_eq!(active_phases, 3);

    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts_made, 3);
    assert_eq!(job.error_message.as_deref(), Some("permanently broken"));
    assert!(job.finished_at.is_some());

    // A terminal job never re-enters the waiting state
    broker.run_maintenance().await.unwrap();
    assert!(broker.lease("worker-a").await.unwrap().is_none());
    let job = broker.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Failed);
}
