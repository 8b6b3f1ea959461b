use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use notification_dispatcher::{
    clients::store::{InMemoryRecordStore, RecordStore},
    models::{
        error::{DispatchError, GatewayError, GatewayErrorKind},
        record::{NewNotification, RecordFilter, RecordUpdate},
        status::NotificationStatus,
    },
    services::dispatcher::{DispatchOutcome, Dispatcher, PostSuccessAction},
};
use serde_json::json;
use tokio_test::assert_ok;

use crate::common::{FlakyStore, RecordingGateway, dispatcher, notification, settings};

/// Test: A record without a correlation key is sent exactly once
#[tokio::test]
async fn test_uncorrelated_record_is_sent_once() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let record = store.create(notification("tok-plain")).await?;
    let outcome = dispatcher.dispatch(&record).await?;

    assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    assert_eq!(gateway.call_count().await, 1);

    let stored = store.get(record.id).await?.expect("record retained");
    assert_eq!(stored.status, NotificationStatus::Sent);
    assert!(stored.processed_at.is_some());
    assert_eq!(stored.retry_count, 0);

    Ok(())
}

/// Test: Correlated record reaches sent with the gateway's delivery id
#[tokio::test]
async fn test_correlated_record_sent_to_recipient_token() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let record = store
        .create(notification("tok1").with_correlation_key("msg-42"))
        .await?;

    let outcome = dispatcher.dispatch(&record).await?;

    let calls = gateway.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].target, "tok1");
    assert_eq!(calls[0].title, "Hi");
    assert_eq!(calls[0].body, "There");

    let DispatchOutcome::Sent { delivery_id } = outcome else {
        panic!("expected sent outcome, got {:?}", outcome);
    };
    assert!(!delivery_id.is_empty());

    let stored = store.get(record.id).await?.expect("record retained");
    assert_eq!(stored.status, NotificationStatus::Sent);
    assert_eq!(stored.delivery_id.as_deref(), Some(delivery_id.as_str()));

    Ok(())
}

/// Test: A second record with an already delivered correlation key is a duplicate
#[tokio::test]
async fn test_second_submission_of_delivered_key_is_duplicate() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let first = store
        .create(notification("tok1").with_correlation_key("msg-42"))
        .await?;
    dispatcher.dispatch(&first).await?;

    let second = store
        .create(notification("tok1").with_correlation_key("msg-42"))
        .await?;
    let outcome = dispatcher.dispatch(&second).await?;

    assert!(matches!(outcome, DispatchOutcome::Duplicate));
    assert_eq!(gateway.call_count().await, 1, "No additional gateway call");

    let stored = store.get(second.id).await?.expect("duplicate retained");
    assert_eq!(stored.status, NotificationStatus::Duplicate);
    assert!(stored.processed_at.is_some());
    assert!(stored.delivery_id.is_none());

    Ok(())
}

/// Test: Failed deliveries with the same key do not block a later send
#[tokio::test]
async fn test_failed_record_does_not_count_as_delivered() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let failing = RecordingGateway::failing_with(GatewayError::unavailable("503"));
    let failing_dispatcher = dispatcher(store.clone(), failing, PostSuccessAction::Retain);

    let first = store
        .create(notification("tok1").with_correlation_key("msg-7"))
        .await?;
    failing_dispatcher.dispatch(&first).await?;

    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);
    let second = store
        .create(notification("tok1").with_correlation_key("msg-7"))
        .await?;

    let outcome = dispatcher.dispatch(&second).await?;

    assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    assert_eq!(gateway.call_count().await, 1);

    Ok(())
}

/// Test: Gateway failure marks the record failed and bumps the retry count
#[tokio::test]
async fn test_gateway_failure_records_error() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::failing_with(GatewayError::invalid_token(
        "Requested entity was not found.",
    ));
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let record = store.create(notification("tok-stale")).await?;
    let outcome = dispatcher.dispatch(&record).await?;

    match outcome {
        DispatchOutcome::Failed {
            reason: DispatchError::Gateway(error),
            retry_count,
        } => {
            assert_eq!(error.kind, GatewayErrorKind::InvalidToken);
            assert_eq!(retry_count, 1);
        }
        other => panic!("expected gateway failure, got {:?}", other),
    }

    let stored = store.get(record.id).await?.expect("failed record retained");
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    assert!(
        stored
            .last_error
            .as_deref()
            .is_some_and(|error| error.starts_with("invalid-token")),
        "last_error should carry the error class, got {:?}",
        stored.last_error
    );
    assert!(stored.processed_at.is_some());
    assert_eq!(gateway.call_count().await, 1);

    Ok(())
}

/// Test: Missing or blank recipient tokens fail without a gateway call
#[tokio::test]
async fn test_missing_recipient_fails_without_gateway_call() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let missing = store
        .create(NewNotification::new(None, "Hi", "There"))
        .await?;
    let blank = store
        .create(NewNotification::new(Some("   ".to_string()), "Hi", "There"))
        .await?;

    for record in [missing, blank] {
        let outcome = dispatcher.dispatch(&record).await?;

        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                reason: DispatchError::RecipientMissing,
                retry_count: 1
            }
        ));

        let stored = store.get(record.id).await?.expect("record retained");
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert!(
            stored
                .last_error
                .as_deref()
                .is_some_and(|error| error.starts_with("recipient-missing"))
        );
    }

    assert_eq!(gateway.call_count().await, 0);

    Ok(())
}

/// Test: Dispatching a terminal record again is a no-op
#[tokio::test]
async fn test_redispatch_of_terminal_record_is_noop() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let sent = store
        .create(notification("tok1").with_correlation_key("msg-1"))
        .await?;
    dispatcher.dispatch_by_id(sent.id).await?;

    let duplicate = store
        .create(notification("tok1").with_correlation_key("msg-1"))
        .await?;
    dispatcher.dispatch_by_id(duplicate.id).await?;

    let sent_before = store.get(sent.id).await?;
    let duplicate_before = store.get(duplicate.id).await?;

    let again = dispatcher.dispatch_by_id(sent.id).await?;
    assert!(matches!(
        again,
        DispatchOutcome::Skipped {
            status: NotificationStatus::Sent
        }
    ));

    let again = dispatcher.dispatch_by_id(duplicate.id).await?;
    assert!(matches!(
        again,
        DispatchOutcome::Skipped {
            status: NotificationStatus::Duplicate
        }
    ));

    assert_eq!(gateway.call_count().await, 1);
    assert_eq!(store.get(sent.id).await?, sent_before);
    assert_eq!(store.get(duplicate.id).await?, duplicate_before);

    Ok(())
}

/// Test: Fire-and-forget mode deletes the record after a successful send
#[tokio::test]
async fn test_delete_action_removes_sent_record() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Delete);

    let record = store.create(notification("tok-ff")).await?;
    let outcome = dispatcher.dispatch(&record).await?;

    assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    assert!(store.get(record.id).await?.is_none());

    let redelivered = dispatcher.dispatch_by_id(record.id).await;
    assert!(matches!(redelivered, Err(DispatchError::NotFound(_))));
    assert_eq!(gateway.call_count().await, 1);

    Ok(())
}

/// Test: Failures are retained even in fire-and-forget mode
#[tokio::test]
async fn test_delete_action_keeps_failed_record() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::failing_with(GatewayError::unavailable("down"));
    let dispatcher = dispatcher(store.clone(), gateway, PostSuccessAction::Delete);

    let record = store.create(notification("tok-ff")).await?;
    dispatcher.dispatch(&record).await?;

    let stored = store.get(record.id).await?.expect("failed record retained");
    assert_eq!(stored.status, NotificationStatus::Failed);

    Ok(())
}

/// Test: A store failure after delivery is surfaced and never re-sends
#[tokio::test]
async fn test_store_failure_after_send_is_surfaced() -> Result<()> {
    let store = FlakyStore::new();
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let record = store.create(notification("tok-flaky")).await?;
    store.fail_writes();

    let result = dispatcher.dispatch(&record).await;

    match result {
        Err(DispatchError::Unrecorded { delivery_id, .. }) => {
            assert_eq!(delivery_id.as_deref(), Some("projects/test/messages/1"));
        }
        other => panic!("expected unrecorded delivery, got {:?}", other),
    }
    assert_eq!(gateway.call_count().await, 1, "Exactly one gateway call");

    Ok(())
}

/// Test: A store failure during the duplicate check happens before any send
#[tokio::test]
async fn test_store_failure_before_send_is_plain_store_error() -> Result<()> {
    let store = FlakyStore::new();
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let record = store
        .create(notification("tok-flaky").with_correlation_key("msg-7"))
        .await?;
    store.fail_reads();

    let result = dispatcher.dispatch(&record).await;

    assert!(matches!(result, Err(DispatchError::Store(_))));
    assert_eq!(gateway.call_count().await, 0);
    assert_eq!(
        store.inner.get(record.id).await?.map(|r| r.status),
        Some(NotificationStatus::Pending)
    );

    Ok(())
}

/// Test: A record that leaves pending mid-dispatch is reported as skipped
#[tokio::test]
async fn test_record_moved_on_during_dispatch_is_skipped() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let loaded = store.create(notification("tok-race")).await?;
    store
        .update(
            loaded.id,
            RecordUpdate::failed(1, "unavailable: 503".to_string(), Utc::now()),
        )
        .await?;

    let outcome = dispatcher.dispatch(&loaded).await?;

    assert!(matches!(
        outcome,
        DispatchOutcome::Skipped {
            status: NotificationStatus::Failed
        }
    ));

    let stored = store.get(loaded.id).await?.expect("record exists");
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.delivery_id.is_none());

    Ok(())
}

/// Test: A concurrent duplicate mark that loses the race is not reported as done
#[tokio::test]
async fn test_lost_duplicate_transition_is_skipped() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let first = store
        .create(notification("tok1").with_correlation_key("msg-9"))
        .await?;
    dispatcher.dispatch(&first).await?;

    let second = store
        .create(notification("tok1").with_correlation_key("msg-9"))
        .await?;
    store
        .update(second.id, RecordUpdate::sent("projects/test/messages/other", Utc::now()))
        .await?;

    let outcome = dispatcher.dispatch(&second).await?;

    assert!(matches!(
        outcome,
        DispatchOutcome::Skipped {
            status: NotificationStatus::Sent
        }
    ));
    assert_eq!(
        store.get(second.id).await?.map(|r| r.status),
        Some(NotificationStatus::Sent)
    );
    assert_eq!(gateway.call_count().await, 1);

    Ok(())
}

/// Test: Same-key records dispatched together both end terminal
///
/// The duplicate check is a plain query, so both may pass it and send.
#[tokio::test]
async fn test_concurrent_same_key_dispatch_ends_terminal() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let first = store
        .create(notification("tok1").with_correlation_key("msg-race"))
        .await?;
    let second = store
        .create(notification("tok1").with_correlation_key("msg-race"))
        .await?;

    let (a, b) = tokio::join!(dispatcher.dispatch(&first), dispatcher.dispatch(&second));
    a?;
    b?;

    let calls = gateway.call_count().await;
    assert!((1..=2).contains(&calls), "{} sends for one key", calls);

    let mut statuses = Vec::new();
    for id in [first.id, second.id] {
        let record = store.get(id).await?.expect("record retained");
        assert!(record.status.is_terminal());
        statuses.push(record.status);
    }
    assert!(statuses.contains(&NotificationStatus::Sent));

    let sent = store
        .query(
            &[
                RecordFilter::CorrelationKey("msg-race".to_string()),
                RecordFilter::Status(NotificationStatus::Sent),
            ],
            10,
        )
        .await?;
    assert_eq!(sent.len(), calls);

    Ok(())
}

/// Test: Payload values reach the gateway as strings, with platform hints
#[tokio::test]
async fn test_payload_is_stringified_for_gateway() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = dispatcher(store.clone(), gateway.clone(), PostSuccessAction::Retain);

    let payload: HashMap<String, serde_json::Value> = [
        ("count".to_string(), json!(3)),
        ("flag".to_string(), json!(true)),
    ]
    .into_iter()
    .collect();

    let record = store
        .create(notification("tok-data").with_payload(payload))
        .await?;
    assert_ok!(dispatcher.dispatch(&record).await);

    let calls = gateway.calls().await;
    let expected: HashMap<String, String> = [
        ("count".to_string(), "3".to_string()),
        ("flag".to_string(), "true".to_string()),
    ]
    .into_iter()
    .collect();

    assert_eq!(calls[0].data, expected);
    assert_eq!(calls[0].hints.android_channel_id, "rent_app_channel");
    assert_eq!(calls[0].hints.android_priority, "high");

    Ok(())
}

/// Test: A gateway that does not answer in time is recorded as a timeout
#[tokio::test]
async fn test_gateway_timeout_marks_record_failed() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::slow(Duration::from_secs(5));

    let mut settings = settings(PostSuccessAction::Retain);
    settings.gateway_timeout = Duration::from_millis(50);
    let dispatcher = Dispatcher::new(store.clone(), gateway.clone(), settings);

    let record = store.create(notification("tok-slow")).await?;
    let outcome = dispatcher.dispatch(&record).await?;

    match outcome {
        DispatchOutcome::Failed {
            reason: DispatchError::Gateway(error),
            ..
        } => assert_eq!(error.kind, GatewayErrorKind::Timeout),
        other => panic!("expected timeout failure, got {:?}", other),
    }

    let stored = store.get(record.id).await?.expect("record retained");
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(gateway.call_count().await, 1);

    Ok(())
}

/// Test: Unrelated records dispatch concurrently and all leave pending
#[tokio::test]
async fn test_concurrent_dispatch_of_unrelated_records() -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let gateway = RecordingGateway::new();
    let dispatcher = Arc::new(dispatcher(
        store.clone(),
        gateway.clone(),
        PostSuccessAction::Retain,
    ));

    let mut handles = Vec::new();
    for i in 0..20 {
        let record = store
            .create(notification(&format!("tok-{}", i)))
            .await?;
        let dispatcher = Arc::clone(&dispatcher);
        handles.push(tokio::spawn(async move { dispatcher.dispatch(&record).await }));
    }

    for handle in handles {
        let outcome = handle.await??;
        assert!(matches!(outcome, DispatchOutcome::Sent { .. }));
    }

    assert_eq!(gateway.call_count().await, 20);
    let pending = store
        .query(
            &[RecordFilter::Status(NotificationStatus::Pending)],
            100,
        )
        .await?;
    assert!(pending.is_empty());

    Ok(())
}
