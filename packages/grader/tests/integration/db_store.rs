use std::sync::Arc;

use chrono::Duration;
use common::{DispatchToken, OutcomeCode, SubmissionStatus};
use grader::consumers::IngestOutcome;
use grader::recovery::RecoveryAction;
use grader::store::{
    CorrelationStore, NewSubmission, NewSubmissionResult, NewTask, NewTestResult,
    SubmissionStore, TransitionOutcome, store_now,
};
use serde_json::json;

use crate::common::{TestApp, sqlite_store, success_payload};

async fn seed(store: &impl SubmissionStore) -> (i32, i32) {
    let task = store
        .create_task(NewTask {
            title: "Shortest path".into(),
            time_limit_ms: 2000,
            memory_limit_kb: 131072,
        })
        .await
        .unwrap();
    let submission = store
        .create_submission(NewSubmission {
            user_id: 7,
            task_id: task.task_id,
            language: "rust".into(),
            source_location: "s3://sources/7/main.rs".into(),
        })
        .await
        .unwrap();
    (task.task_id, submission.id)
}

async fn dispatched(store: &(impl SubmissionStore + ?Sized), id: i32) {
    let claim = store
        .claim_for_dispatch(id, SubmissionStatus::Received, Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    let outcome = store
        .finish_dispatch(id, SubmissionStatus::Received, claim.claimed_at)
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Applied);
}

mod submissions {
    use super::*;

    #[tokio::test]
    async fn create_submission_assigns_attempt_order() {
        let (_dir, store) = sqlite_store().await;
        let (task_id, first) = seed(&store).await;

        let second = store
            .create_submission(NewSubmission {
                user_id: 7,
                task_id,
                language: "rust".into(),
                source_location: "s3://sources/7/v2.rs".into(),
            })
            .await
            .unwrap();

        let first = store.get_submission(first).await.unwrap().unwrap();
        assert_eq!(first.attempt_order, 1);
        assert_eq!(first.status, SubmissionStatus::Received);
        assert_eq!(first.dispatch_attempts, 0);
        assert!(first.checked_at.is_none());
        assert_eq!(second.attempt_order, 2);

        let limits = store.task_limits(task_id).await.unwrap().unwrap();
        assert_eq!(limits.time_limit_ms, 2000);
        assert!(store.task_limits(task_id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_stuck_respects_cutoff() {
        let (_dir, store) = sqlite_store().await;
        let (_, received) = seed(&store).await;
        let (_, sent) = seed(&store).await;
        dispatched(&store, sent).await;

        let past = store_now() - Duration::hours(1);
        assert!(
            store
                .find_stuck(SubmissionStatus::Received, past)
                .await
                .unwrap()
                .is_empty()
        );

        let future = store_now() + Duration::hours(1);
        let stuck_received = store
            .find_stuck(SubmissionStatus::Received, future)
            .await
            .unwrap();
        assert_eq!(stuck_received.len(), 1);
        assert_eq!(stuck_received[0].id, received);

        let stuck_sent = store
            .find_stuck(SubmissionStatus::Dispatched, future)
            .await
            .unwrap();
        assert_eq!(stuck_sent.len(), 1);
        assert_eq!(stuck_sent[0].id, sent);
    }
}

mod dispatch_lease {
    use super::*;

    #[tokio::test]
    async fn dispatch_lease_is_exclusive() {
        let (_dir, store) = sqlite_store().await;
        let (_, id) = seed(&store).await;

        let claim = store
            .claim_for_dispatch(id, SubmissionStatus::Received, Duration::seconds(30))
            .await
            .unwrap()
            .expect("first claim wins");
        assert_eq!(claim.submission.dispatch_attempts, 1);
        assert_eq!(claim.submission.dispatch_claimed_at, Some(claim.claimed_at));

        let second = store
            .claim_for_dispatch(id, SubmissionStatus::Received, Duration::seconds(30))
            .await
            .unwrap();
        assert!(second.is_none());

        store.release_claim(id, claim.claimed_at).await.unwrap();
        // Lease timestamps have microsecond precision; make sure the next one differs.
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let again = store
            .claim_for_dispatch(id, SubmissionStatus::Received, Duration::seconds(30))
            .await
            .unwrap()
            .expect("claim after release");

        let stale = store
            .finish_dispatch(id, SubmissionStatus::Received, claim.claimed_at)
            .await
            .unwrap();
        assert_eq!(
            stale,
            TransitionOutcome::Stale {
                current: Some(SubmissionStatus::Received)
            }
        );

        let applied = store
            .finish_dispatch(id, SubmissionStatus::Received, again.claimed_at)
            .await
            .unwrap();
        assert!(applied.is_applied());

        let stored = store.get_submission(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Dispatched);
        assert!(stored.dispatch_claimed_at.is_none());
        assert!(stored.last_dispatched_at.is_some());
        assert_eq!(stored.dispatch_attempts, 2);
    }
}

mod results {
    use super::*;

    #[tokio::test]
    async fn record_evaluation_writes_result_once() {
        let (_dir, store) = sqlite_store().await;
        let (_, id) = seed(&store).await;
        dispatched(&store, id).await;

        let result = NewSubmissionResult {
            outcome_code: OutcomeCode::Partial,
            message: "2/3 tests passed".into(),
            tests: vec![
                NewTestResult {
                    test_case_id: Some(11),
                    passed: true,
                    error_message: None,
                },
                NewTestResult {
                    test_case_id: Some(12),
                    passed: false,
                    error_message: Some("Wrong answer on line 2".into()),
                },
                NewTestResult {
                    test_case_id: Some(13),
                    passed: true,
                    error_message: None,
                },
            ],
        };

        let outcome = store.record_evaluation(id, result.clone()).await.unwrap();
        assert!(outcome.is_applied());

        let stored = store.get_result(id).await.unwrap().unwrap();
        assert_eq!(stored.outcome_code, OutcomeCode::Partial);
        assert_eq!(stored.message, "2/3 tests passed");
        let cases: Vec<_> = stored.tests.iter().map(|t| t.test_case_id).collect();
        assert_eq!(cases, vec![Some(11), Some(12), Some(13)]);
        assert_eq!(
            stored.tests[1].error_message.as_deref(),
            Some("Wrong answer on line 2")
        );

        let again = store.record_evaluation(id, result).await.unwrap();
        assert_eq!(
            again,
            TransitionOutcome::Stale {
                current: Some(SubmissionStatus::Evaluated)
            }
        );
        assert_eq!(store.get_result(id).await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let (_dir, store) = sqlite_store().await;
        let (_, id) = seed(&store).await;
        dispatched(&store, id).await;

        let lost = store
            .transition(
                id,
                SubmissionStatus::Dispatched,
                SubmissionStatus::Lost,
                Some("No grading result after 1 dispatch attempt(s)".into()),
            )
            .await
            .unwrap();
        assert!(lost.is_applied());
        let checked_at = store.get_submission(id).await.unwrap().unwrap().checked_at;
        assert!(checked_at.is_some());

        for to in SubmissionStatus::ALL {
            let outcome = store
                .transition(id, SubmissionStatus::Lost, *to, None)
                .await
                .unwrap();
            assert!(matches!(outcome, TransitionOutcome::InvalidEdge { .. }));
        }

        let failed = store
            .transition(
                id,
                SubmissionStatus::Dispatched,
                SubmissionStatus::Failed,
                Some("late".into()),
            )
            .await
            .unwrap();
        assert_eq!(
            failed,
            TransitionOutcome::Stale {
                current: Some(SubmissionStatus::Lost)
            }
        );

        let evaluated = store
            .record_evaluation(id, NewSubmissionResult::from_verdicts(None, vec![]))
            .await
            .unwrap();
        assert!(!evaluated.is_applied());
        assert!(store.get_result(id).await.unwrap().is_none());

        let stored = store.get_submission(id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Lost);
        assert_eq!(stored.checked_at, checked_at);
        assert_eq!(
            stored.status_message.as_deref(),
            Some("No grading result after 1 dispatch attempt(s)")
        );
    }
}

mod correlations {
    use super::*;

    #[tokio::test]
    async fn correlation_records_are_kept_for_audit() {
        let (_dir, store) = sqlite_store().await;
        let (_, id) = seed(&store).await;
        let token = DispatchToken::from("tok-audit");

        let first = store.record(&token, id).await.unwrap();
        let second = store.record(&token, id).await.unwrap();
        assert_eq!(first, second);
        assert!(store.record(&DispatchToken::from("tok-x"), 999).await.is_err());

        assert!(store.mark_resolved(&token).await.unwrap());
        assert!(!store.mark_resolved(&token).await.unwrap());
        assert!(!store.mark_resolved(&DispatchToken::from("tok-ghost")).await.unwrap());

        let records = store.records_for(id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_resolved());
    }
}

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn dispatch_and_ingest_round_trip() {
        let (_dir, store) = sqlite_store().await;
        let app = TestApp::with_store(Arc::new(store));
        let submission = app.create_submission(3).await;
        let token = app.state.dispatcher.dispatch(submission.id).await.unwrap();

        let outcome = app
            .consumer
            .ingest(success_payload(
                token.as_str(),
                &[(true, None), (false, Some("TLE"))],
            ))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Evaluated);

        let result = app.store.get_result(submission.id).await.unwrap().unwrap();
        assert_eq!(result.outcome_code, OutcomeCode::Partial);
        assert_eq!(result.tests.len(), 2);
        assert!(app.store.resolve(&token).await.unwrap().unwrap().is_resolved());

        let duplicate = app
            .consumer
            .ingest(json!({"token": token.as_str(), "statusCode": 2, "message": "late"}))
            .await
            .unwrap();
        assert_eq!(duplicate, IngestOutcome::Duplicate);
        assert_eq!(app.status(submission.id).await, SubmissionStatus::Evaluated);
    }

    #[tokio::test]
    async fn sweeper_recovers_then_marks_lost() {
        let (_dir, store) = sqlite_store().await;
        let app = TestApp::with_store(Arc::new(store));
        let submission = app.create_submission(4).await;

        app.broker.set_unavailable(true).await;
        assert!(app.state.dispatcher.dispatch(submission.id).await.is_err());
        app.broker.set_unavailable(false).await;

        let recovered = app.sweeper.sweep(Duration::zero(), 0).await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].action, RecoveryAction::Dispatched);
        assert_eq!(app.status(submission.id).await, SubmissionStatus::Dispatched);

        // A cutoff in the future makes the fresh dispatch count as stuck.
        let recovered = app.sweeper.sweep(Duration::hours(-1), 0).await.unwrap();
        assert_eq!(recovered[0].action, RecoveryAction::MarkedLost);

        let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Lost);
        assert_eq!(
            stored.status_message.as_deref(),
            Some("No grading result after 1 dispatch attempt(s)")
        );
    }
}
