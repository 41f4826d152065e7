use std::sync::Arc;

use common::SubmissionStatus;
use grader::error::DispatchError;
use grader::store::{CorrelationStore, NewSubmission, SubmissionStore};
use mq::MqError;

use crate::common::TestApp;

mod requests {
    use super::*;

    #[tokio::test]
    async fn sends_request_with_task_limits() {
        let app = TestApp::new();
        let submission = app.create_submission(1).await;

        let token = app.state.dispatcher.dispatch(submission.id).await.unwrap();

        let requests = app.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].dispatch_token, token);
        assert_eq!(requests[0].submission_id, submission.id);
        assert_eq!(requests[0].language, "cpp");
        assert_eq!(requests[0].source_location, "s3://sources/1/main.cpp");
        assert_eq!(requests[0].limits.time_limit_ms, 1000);
        assert_eq!(requests[0].limits.memory_limit_kb, 262144);

        assert_eq!(app.status(submission.id).await, SubmissionStatus::Dispatched);
        let records = app.store.records_for(submission.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].dispatch_token, token);
        assert!(!records[0].is_resolved());
    }

    #[tokio::test]
    async fn attempt_order_follows_user_and_task() {
        let app = TestApp::new();
        let first = app.create_submission(1).await;
        let second = app
            .store
            .create_submission(NewSubmission {
                user_id: 1,
                task_id: first.task_id,
                language: "cpp".into(),
                source_location: "s3://sources/1/again.cpp".into(),
            })
            .await
            .unwrap();

        assert_eq!(first.attempt_order, 1);
        assert_eq!(second.attempt_order, 2);

        app.state.dispatcher.dispatch(second.id).await.unwrap();
        assert_eq!(app.requests().await[0].attempt_order, 2);
    }
}

mod exclusivity {
    use super::*;

    #[tokio::test]
    async fn concurrent_dispatch_publishes_once() {
        let app = Arc::new(TestApp::new());
        let submission = app.create_submission(1).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let app = Arc::clone(&app);
                tokio::spawn(async move { app.state.dispatcher.dispatch(submission.id).await })
            })
            .collect();

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(DispatchError::AlreadyClaimed(_) | DispatchError::NotDispatchable { .. }) => {}
                Err(e) => panic!("unexpected dispatch error: {e}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(app.requests().await.len(), 1);
        assert_eq!(app.store.records_for(submission.id).await.unwrap().len(), 1);

        let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Dispatched);
        assert_eq!(stored.dispatch_attempts, 1);
    }
}

mod broker_failure {
    use super::*;

    #[tokio::test]
    async fn broker_down_leaves_submission_received_and_keeps_token() {
        let app = TestApp::new();
        let submission = app.create_submission(1).await;
        app.broker.set_unavailable(true).await;

        let err = app.state.dispatcher.dispatch(submission.id).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(MqError::Unavailable(_))));
        assert!(err.is_retryable());

        assert!(app.requests().await.is_empty());

        let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubmissionStatus::Received);
        assert_eq!(stored.requests_sent, 0);

        let records = app.store.records_for(submission.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].is_resolved());
    }
}
