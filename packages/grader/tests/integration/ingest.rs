use std::sync::Arc;

use common::grading_request::GradingRequest;
use common::{OutcomeCode, SubmissionStatus};
use grader::consumers::IngestOutcome;
use grader::store::{CorrelationStore, SubmissionStore};
use mq::Broker;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::common::{RESULTS, TestApp, success_payload};

mod graded_results {
    use super::*;

    #[tokio::test]
    async fn partial_result_is_recorded() {
        let app = TestApp::new();
        let submission = app.create_submission(1).await;
        let token = app.dispatch_with_token(submission.id, "tok-1").await;

        app.broker
            .send(
                RESULTS,
                json!({
                    "token": "tok-1",
                    "statusCode": 1,
                    "tests": [{"passed": true}, {"passed": false, "error": "TLE"}]
                }),
            )
            .await
            .unwrap();
        let delivery = app.broker.receive(RESULTS).await.unwrap();
        let outcome = app.consumer.handle_delivery(delivery).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Evaluated);

        assert_eq!(app.status(submission.id).await, SubmissionStatus::Evaluated);
        let result = app.store.get_result(submission.id).await.unwrap().unwrap();
        assert_eq!(result.outcome_code, OutcomeCode::Partial);
        assert_eq!(result.outcome_code.as_str(), "partial");
        assert_eq!(result.tests.len(), 2);

        let failing: Vec<_> = result.tests.iter().filter(|t| !t.passed).collect();
        assert_eq!(failing.len(), 1);
        assert_eq!(failing[0].error_message.as_deref(), Some("TLE"));

        assert_eq!(app.broker.acked().await.len(), 1);
        assert!(app.store.resolve(&token).await.unwrap().unwrap().is_resolved());
    }

    #[tokio::test]
    async fn worker_round_trip_keeps_every_test_result() {
        let app = Arc::new(TestApp::new());
        let submission = app.create_submission(2).await;
        app.state.dispatcher.dispatch(submission.id).await.unwrap();

        let cancel = CancellationToken::new();
        let consumer = {
            let app = Arc::clone(&app);
            let cancel = cancel.clone();
            tokio::spawn(async move { app.consumer.run(cancel).await })
        };

        // Act as the worker: take the request and answer with its token.
        let request: GradingRequest =
            serde_json::from_value(app.broker.drain(crate::common::REQUESTS).await.remove(0))
                .unwrap();
        let verdicts = [(true, None), (true, None), (true, None), (true, None), (true, None)];
        app.broker
            .send(RESULTS, success_payload(request.dispatch_token.as_str(), &verdicts))
            .await
            .unwrap();

        let status = app
            .wait_for_change(submission.id, SubmissionStatus::Dispatched)
            .await;
        assert_eq!(status, SubmissionStatus::Evaluated);

        let result = app.store.get_result(submission.id).await.unwrap().unwrap();
        assert_eq!(result.outcome_code, OutcomeCode::AllPassed);
        assert_eq!(result.tests.len(), verdicts.len());
        let positions: Vec<i32> = result.tests.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5]);

        cancel.cancel();
        consumer.await.unwrap();
    }
}

mod worker_failures {
    use super::*;

    #[tokio::test]
    async fn failure_marks_failed_with_message() {
        let app = TestApp::new();
        let submission = app.create_submission(1).await;
        app.dispatch_with_token(submission.id, "tok-ce").await;

        let outcome = app
            .consumer
            .ingest(json!({
                "dispatchToken": "tok-ce",
                "statusCode": 2,
                "message": "Compilation error: 'main' was not declared"
            }))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Failed);

        let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Failed);
        assert_eq!(
            stored.status_message.as_deref(),
            Some("Compilation error: 'main' was not declared")
        );
        assert!(stored.checked_at.is_some());

        // A late success for the same token cannot move a terminal submission.
        let late = app
            .consumer
            .ingest(success_payload("tok-ce", &[(true, None)]))
            .await
            .unwrap();
        assert_eq!(late, IngestOutcome::Duplicate);
        assert_eq!(app.status(submission.id).await, SubmissionStatus::Failed);
        assert!(app.store.get_result(submission.id).await.unwrap().is_none());
    }
}

mod duplicates {
    use super::*;

    #[tokio::test]
    async fn same_result_twice_applies_once() {
        let app = TestApp::new();
        let submission = app.create_submission(1).await;
        app.dispatch_with_token(submission.id, "tok-dup").await;

        let payload = success_payload("tok-dup", &[(false, Some("WA"))]);
        app.broker.send(RESULTS, payload.clone()).await.unwrap();
        app.broker.send(RESULTS, payload).await.unwrap();

        let first = app.broker.receive(RESULTS).await.unwrap();
        assert_eq!(
            app.consumer.handle_delivery(first).await.unwrap(),
            IngestOutcome::Evaluated
        );
        let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
        let result = app.store.get_result(submission.id).await.unwrap().unwrap();

        let second = app.broker.receive(RESULTS).await.unwrap();
        assert_eq!(
            app.consumer.handle_delivery(second).await.unwrap(),
            IngestOutcome::Duplicate
        );

        assert_eq!(
            app.store.get_submission(submission.id).await.unwrap().unwrap(),
            stored
        );
        assert_eq!(
            app.store.get_result(submission.id).await.unwrap().unwrap(),
            result
        );
        assert_eq!(result.outcome_code, OutcomeCode::NonePassed);
        assert_eq!(app.broker.acked().await.len(), 2);
    }

    #[tokio::test]
    async fn result_for_older_token_after_redispatch_still_applies() {
        let app = TestApp::new();
        let submission = app.create_submission(1).await;
        let first = app.state.dispatcher.dispatch(submission.id).await.unwrap();
        let second = app.state.dispatcher.redispatch(submission.id).await.unwrap();

        let outcome = app
            .consumer
            .ingest(success_payload(first.as_str(), &[(true, None)]))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Evaluated);

        let late = app
            .consumer
            .ingest(success_payload(second.as_str(), &[(false, None)]))
            .await
            .unwrap();
        assert_eq!(late, IngestOutcome::Duplicate);

        let records = app.store.records_for(submission.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.is_resolved()).count(), 1);
        assert_eq!(
            app.store
                .get_result(submission.id)
                .await
                .unwrap()
                .unwrap()
                .outcome_code,
            OutcomeCode::AllPassed
        );
    }
}

mod bad_messages {
    use super::*;

    #[tokio::test]
    async fn unknown_token_is_dropped_and_loop_continues() {
        let app = Arc::new(TestApp::new());
        let ghost_target = app.create_submission(1).await;
        app.dispatch_with_token(ghost_target.id, "tok-real").await;
        let before = app
            .store
            .get_submission(ghost_target.id)
            .await
            .unwrap()
            .unwrap();

        let cancel = CancellationToken::new();
        let consumer = {
            let app = Arc::clone(&app);
            let cancel = cancel.clone();
            tokio::spawn(async move { app.consumer.run(cancel).await })
        };

        app.broker
            .send(RESULTS, success_payload("tok-ghost", &[(true, None)]))
            .await
            .unwrap();
        app.broker.send(RESULTS, json!("not a result")).await.unwrap();
        app.broker
            .send(RESULTS, json!({"token": "tok-real", "statusCode": 42}))
            .await
            .unwrap();

        // A well-formed message after the bad ones proves the loop survived them.
        let other = app.create_submission(2).await;
        app.dispatch_with_token(other.id, "tok-after").await;
        app.broker
            .send(RESULTS, success_payload("tok-after", &[(true, None)]))
            .await
            .unwrap();

        let status = app.wait_for_change(other.id, SubmissionStatus::Dispatched).await;
        assert_eq!(status, SubmissionStatus::Evaluated);
        assert!(!consumer.is_finished());

        // The delivery in flight is settled before the loop stops.
        cancel.cancel();
        consumer.await.unwrap();

        assert_eq!(
            app.store
                .get_submission(ghost_target.id)
                .await
                .unwrap()
                .unwrap(),
            before
        );
        assert_eq!(app.broker.acked().await.len(), 4);
        assert!(app.broker.rejected().await.is_empty());
    }
}

mod unconfirmed_publishes {
    use super::*;

    #[tokio::test]
    async fn result_for_token_of_failed_publish_still_applies() {
        let app = TestApp::new();
        let submission = app.create_submission(1).await;

        // The broker errors out, yet a worker may still have received the request.
        app.broker.set_unavailable(true).await;
        assert!(app.state.dispatcher.dispatch(submission.id).await.is_err());
        app.broker.set_unavailable(false).await;
        let records = app.store.records_for(submission.id).await.unwrap();
        let unconfirmed = records[0].dispatch_token.clone();

        let confirmed = app.state.dispatcher.dispatch(submission.id).await.unwrap();
        assert_ne!(confirmed, unconfirmed);

        let outcome = app
            .consumer
            .ingest(success_payload(unconfirmed.as_str(), &[(true, None), (true, None)]))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Evaluated);
        assert_eq!(app.status(submission.id).await, SubmissionStatus::Evaluated);
        assert!(app.store.resolve(&unconfirmed).await.unwrap().unwrap().is_resolved());

        let late = app
            .consumer
            .ingest(success_payload(confirmed.as_str(), &[(false, None)]))
            .await
            .unwrap();
        assert_eq!(late, IngestOutcome::Duplicate);
    }
}
