//! Integration tests for the orchestrator facade

mod support;

use std::time::Duration;

use herald::{
    AuditEvent, Behavior, CircuitBreakerStats, CircuitState, DeliveryState, HeraldConfig, Message,
    MockProvider, QueueReason, StateCounts, Statistics,
};
use pretty_assertions::assert_eq;
use support::{fast_config, orchestrator, recorded_orchestrator, wait_for, wait_for_state};

fn message(id: &str) -> Message {
    Message::new(id, "x@y.com", "hello").with_subject("greetings")
}

fn breaker_state(stats: &Statistics, provider: &str) -> Option<CircuitState> {
    stats
        .breakers
        .iter()
        .find(|breaker| breaker.provider == provider)
        .map(|breaker| breaker.state)
}

#[tokio::test]
async fn test_resubmitting_delivered_message_is_idempotent() {
    let email = MockProvider::succeeding("email");
    let orchestrator = orchestrator(fast_config(), &[&email]);

    let first = orchestrator.submit(message("m1")).await;
    let second = orchestrator.submit(message("m1")).await;

    assert!(first.success);
    assert_eq!(first, second);
    assert_eq!(email.calls(), 1);
    assert_eq!(orchestrator.status_of("m1").map(|status| status.attempts), Some(1));
}

#[tokio::test]
async fn test_falls_back_to_second_provider() {
    let primary = MockProvider::failing("primary");
    let backup = MockProvider::succeeding("backup");
    let orchestrator = orchestrator(fast_config(), &[&primary, &backup]);

    let outcome = orchestrator.submit(message("m1")).await;

    assert!(outcome.success);
    assert_eq!(outcome.provider.as_deref(), Some("backup"));
    assert_eq!(primary.calls(), 3);

    let status = orchestrator.status_of("m1");
    assert_eq!(status.as_ref().map(|status| status.attempts), Some(4));
    assert_eq!(
        status.and_then(|status| status.last_provider),
        Some("backup".to_string())
    );
}

#[tokio::test]
async fn test_all_providers_exhausted() {
    let email = MockProvider::failing("email");
    let sms = MockProvider::failing("sms");
    let (orchestrator, recorder) = recorded_orchestrator(fast_config(), &[&email, &sms]);

    let outcome = orchestrator.submit(message("m1")).await;

    assert!(!outcome.success);
    assert!(!outcome.is_queued());
    let error = outcome.error.unwrap_or_default();
    assert!(error.starts_with("All providers exhausted"), "{error}");
    assert!(error.contains("sms rejected message m1"), "{error}");
    assert_eq!(outcome.provider.as_deref(), Some("sms"));

    let status = orchestrator.status_of("m1");
    assert_eq!(status.as_ref().map(|status| status.state), Some(DeliveryState::Failed));
    assert_eq!(status.as_ref().map(|status| status.attempts), Some(6));
    assert_eq!(status.and_then(|status| status.last_error), Some(error));

    assert_eq!(
        recorder.count(|event| matches!(
            event,
            AuditEvent::DeliveryFailure { attempts: 6, .. }
        )),
        1
    );
}

#[tokio::test]
async fn test_failed_message_can_be_resubmitted() {
    let email = MockProvider::new("email", Behavior::FailTimes(3));
    let orchestrator = orchestrator(fast_config(), &[&email]);

    let first = orchestrator.submit(message("m1")).await;
    assert!(!first.success);

    let second = orchestrator.submit(message("m1")).await;
    assert!(second.success);

    // The attempt counter is never reset
    let status = orchestrator.status_of("m1");
    assert_eq!(status.as_ref().map(|status| status.attempts), Some(4));
    assert_eq!(status.map(|status| status.state), Some(DeliveryState::Sent));
}

#[tokio::test]
async fn test_attempts_equal_failures_plus_one() {
    let email = MockProvider::new("email", Behavior::FailTimes(2));
    let (orchestrator, recorder) = recorded_orchestrator(fast_config(), &[&email]);

    let outcome = orchestrator.submit(message("m1")).await;

    assert!(outcome.success);
    assert_eq!(orchestrator.status_of("m1").map(|status| status.attempts), Some(3));
    assert_eq!(
        recorder.events().last(),
        Some(&AuditEvent::DeliverySuccess {
            message_id: "m1".to_string(),
            destination: "x@y.com".to_string(),
            provider: "email".to_string(),
            attempts: 3,
        })
    );
}

#[tokio::test]
async fn test_breaker_trips_and_skips_provider() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 3;

    let primary = MockProvider::failing("primary");
    let backup = MockProvider::succeeding("backup");
    let orchestrator = orchestrator(config, &[&primary, &backup]);

    for id in ["m1", "m2", "m3"] {
        assert!(orchestrator.submit(message(id)).await.success);
    }
    assert_eq!(
        breaker_state(&orchestrator.statistics(), "primary"),
        Some(CircuitState::Open)
    );

    let outcome = orchestrator.submit(message("m4")).await;

    assert_eq!(outcome.provider.as_deref(), Some("backup"));
    // The rejected try still counts, but the provider was never called
    assert_eq!(primary.calls(), 3);
    assert_eq!(orchestrator.status_of("m4").map(|status| status.attempts), Some(2));
}

#[tokio::test]
async fn test_breaker_recovers_after_two_probe_successes() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.reset_timeout_ms = 50;

    let primary = MockProvider::new("primary", Behavior::FailTimes(1));
    let backup = MockProvider::succeeding("backup");
    let orchestrator = orchestrator(config, &[&primary, &backup]);

    orchestrator.submit(message("m1")).await;
    assert_eq!(
        breaker_state(&orchestrator.statistics(), "primary"),
        Some(CircuitState::Open)
    );

    tokio::time::sleep(Duration::from_millis(80)).await;

    let outcome = orchestrator.submit(message("m2")).await;
    assert_eq!(outcome.provider.as_deref(), Some("primary"));
    assert_eq!(
        breaker_state(&orchestrator.statistics(), "primary"),
        Some(CircuitState::HalfOpen)
    );

    orchestrator.submit(message("m3")).await;
    assert_eq!(
        breaker_state(&orchestrator.statistics(), "primary"),
        Some(CircuitState::Closed)
    );
}

#[tokio::test]
async fn test_failed_probe_reopens_breaker() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 1;
    config.circuit_breaker.reset_timeout_ms = 50;

    let primary = MockProvider::failing("primary");
    let backup = MockProvider::succeeding("backup");
    let (orchestrator, recorder) = recorded_orchestrator(config, &[&primary, &backup]);

    orchestrator.submit(message("m1")).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    orchestrator.submit(message("m2")).await;

    assert_eq!(primary.calls(), 2);
    assert_eq!(
        breaker_state(&orchestrator.statistics(), "primary"),
        Some(CircuitState::Open)
    );

    let transitions: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            AuditEvent::BreakerTransition { from, to, .. } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Open),
        ]
    );
}

#[tokio::test]
async fn test_all_breakers_open_queues_until_reset() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    config.circuit_breaker.failure_threshold = 3;

    let email = MockProvider::new("email", Behavior::FailTimes(3));
    let (orchestrator, recorder) = recorded_orchestrator(config, &[&email]);

    for id in ["m1", "m2", "m3"] {
        assert!(!orchestrator.submit(message(id)).await.success);
    }

    let outcome = orchestrator.submit(message("m4")).await;
    assert_eq!(outcome.queued, Some(QueueReason::AllBreakersOpen));
    assert_eq!(
        outcome.error.as_deref(),
        Some("all circuit breakers open, message queued")
    );
    assert_eq!(email.calls(), 3);
    assert_eq!(
        orchestrator.status_of("m4").map(|status| (status.state, status.attempts)),
        Some((DeliveryState::Queued, 0))
    );

    // Let the drain task observe the open breaker at least once
    assert!(
        wait_for(Duration::from_secs(1), || recorder.count(|event| matches!(
            event,
            AuditEvent::DrainPaused {
                reason: QueueReason::AllBreakersOpen,
                ..
            }
        )) > 0)
        .await
    );
    assert_eq!(orchestrator.queue_len(), 1);

    orchestrator.reset_breakers();

    assert!(wait_for_state(&orchestrator, "m4", DeliveryState::Sent, Duration::from_secs(2)).await);
    assert!(recorder.count(|event| matches!(event, AuditEvent::DrainResumed)) >= 1);
    assert!(wait_for(Duration::from_secs(1), || !orchestrator.is_draining()).await);
    assert_eq!(orchestrator.queue_len(), 0);
}

#[tokio::test]
async fn test_admission_denies_beyond_capacity() {
    let mut config = fast_config();
    config.admission.capacity = 1;
    config.admission.window_ms = 1000;

    let email = MockProvider::succeeding("email");
    let orchestrator = orchestrator(config, &[&email]);

    let first = orchestrator.submit(message("m1")).await;
    let second = orchestrator.submit(message("m2")).await;

    assert!(first.success);
    assert!(!second.success);
    match second.queued {
        Some(QueueReason::RateLimited { retry_in }) => {
            assert!(retry_in > Duration::ZERO && retry_in <= Duration::from_secs(1));
        }
        other => panic!("expected rate limited deferral, got {other:?}"),
    }
    assert_eq!(email.calls(), 1);

    // Quota comes back once the window has elapsed, and the queue uses it
    assert!(wait_for_state(&orchestrator, "m2", DeliveryState::Sent, Duration::from_secs(3)).await);
    assert_eq!(email.calls(), 2);
}

#[tokio::test]
async fn test_queue_drains_in_order_without_caller() {
    let mut config = fast_config();
    config.admission.capacity = 1;
    config.admission.window_ms = 100;

    let email = MockProvider::succeeding("email");
    let (orchestrator, recorder) = recorded_orchestrator(config, &[&email]);

    assert!(orchestrator.submit(message("m1")).await.success);
    assert!(orchestrator.submit(message("m2")).await.is_queued());
    assert!(orchestrator.submit(message("m3")).await.is_queued());
    assert_eq!(orchestrator.queue_len(), 2);

    assert!(wait_for_state(&orchestrator, "m3", DeliveryState::Sent, Duration::from_secs(2)).await);
    assert!(wait_for(Duration::from_secs(1), || !orchestrator.is_draining()).await);

    let delivered: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event {
            AuditEvent::DeliverySuccess { message_id, .. } => Some(message_id),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, vec!["m1", "m2", "m3"]);
    assert!(recorder.count(|event| matches!(event, AuditEvent::MessageQueued { .. })) >= 2);
    assert!(recorder.count(|event| matches!(event, AuditEvent::DrainResumed)) >= 1);

    let stats = orchestrator.statistics();
    assert_eq!(stats.counts.sent, 3);
    assert_eq!(stats.queue_depth, 0);
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_fallback_with_default_delays() {
    let config = HeraldConfig::from_ron_str(
        r"(
            retry: (max_attempts: 3, base_delay_ms: 1000, backoff_factor: 2.0),
            admission: (capacity: 5, window_ms: 10000),
            circuit_breaker: (
                failure_threshold: 3,
                monitoring_window_ms: 60000,
                reset_timeout_ms: 30000,
            ),
        )",
    );
    let Ok(config) = config else {
        panic!("configuration should parse");
    };

    let a = MockProvider::failing("A");
    let b = MockProvider::succeeding("B");
    let orchestrator = orchestrator(config, &[&a, &b]);

    let outcome = orchestrator
        .submit(Message::new("m1", "x@y.com", "hello"))
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.provider.as_deref(), Some("B"));
    assert_eq!(orchestrator.status_of("m1").map(|status| status.attempts), Some(4));

    let stats = orchestrator.statistics();
    assert_eq!(breaker_state(&stats, "A"), Some(CircuitState::Open));
    assert_eq!(breaker_state(&stats, "B"), Some(CircuitState::Closed));
    assert_eq!(stats.available_tokens, 4);
}

#[tokio::test]
async fn test_concurrent_submission_of_same_message() {
    let email = MockProvider::succeeding("email").with_latency(Duration::from_millis(100));
    let orchestrator = orchestrator(fast_config(), &[&email]);

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.submit(message("m1")).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = orchestrator.submit(message("m1")).await;

    assert!(!second.success);
    assert!(
        second
            .error
            .as_deref()
            .is_some_and(|error| error.contains("already in progress"))
    );
    assert_eq!(
        orchestrator.status_of("m1").map(|status| status.state),
        Some(DeliveryState::Sending)
    );

    let first = first.await;
    assert!(first.is_ok_and(|outcome| outcome.success));
    assert_eq!(email.calls(), 1);
}

#[tokio::test]
async fn test_provider_panic_is_contained() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;

    let broken = MockProvider::new("broken", Behavior::Panic);
    let only_broken = orchestrator(config.clone(), &[&broken]);

    let outcome = only_broken.submit(message("m1")).await;
    assert!(!outcome.success);
    assert!(outcome.error.is_some_and(|error| error.contains("panicked")));
    assert_eq!(
        only_broken.status_of("m1").map(|status| status.state),
        Some(DeliveryState::Failed)
    );

    let backup = MockProvider::succeeding("backup");
    let with_backup = orchestrator(config, &[&broken, &backup]);
    let outcome = with_backup.submit(message("m2")).await;
    assert_eq!(outcome.provider.as_deref(), Some("backup"));
}

#[tokio::test]
async fn test_clear_forgets_delivered_messages() {
    let email = MockProvider::succeeding("email");
    let orchestrator = orchestrator(fast_config(), &[&email]);

    orchestrator.submit(message("m1")).await;
    orchestrator.clear();

    assert!(orchestrator.all_statuses().is_empty());
    assert_eq!(orchestrator.statistics().counts, StateCounts::default());

    // No longer in the idempotency set, so the provider is called again
    assert!(orchestrator.submit(message("m1")).await.success);
    assert_eq!(email.calls(), 2);
}

#[tokio::test]
async fn test_statistics_snapshot() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;
    // Slow refill keeps the token count stable while asserting
    config.admission.window_ms = 3_600_000;

    let email = MockProvider::new("email", Behavior::FailTimes(1));
    let orchestrator = orchestrator(config, &[&email]);

    orchestrator.submit(message("m1")).await;
    orchestrator.submit(message("m2")).await;

    let statuses = orchestrator.all_statuses();
    assert_eq!(
        statuses
            .iter()
            .map(|status| (status.id.to_string(), status.state))
            .collect::<Vec<_>>(),
        vec![
            ("m1".to_string(), DeliveryState::Failed),
            ("m2".to_string(), DeliveryState::Sent),
        ]
    );

    assert_eq!(
        orchestrator.statistics(),
        Statistics {
            counts: StateCounts {
                total: 2,
                queued: 0,
                sending: 0,
                sent: 1,
                failed: 1,
            },
            available_tokens: 98,
            queue_depth: 0,
            draining: false,
            breakers: vec![CircuitBreakerStats {
                provider: "email".to_string(),
                state: CircuitState::Closed,
                failure_count: 1,
                consecutive_failures: 0,
                consecutive_successes: 0,
            }],
        }
    );
}

#[tokio::test]
async fn test_config_file_drives_orchestrator() {
    let path = std::env::temp_dir().join(format!("herald-{}.config.ron", ulid::Ulid::new()));
    let written = std::fs::write(
        &path,
        r#"(
            admission: (capacity: 5, window_ms: 10000),
            circuit_breaker: (
                provider_overrides: {
                    "sms": (
                        failure_threshold: 1,
                        monitoring_window_ms: 60000,
                        reset_timeout_ms: 30000,
                        success_threshold: 1,
                    ),
                },
            ),
            audit: (redact_destination: true),
        )"#,
    );
    assert!(written.is_ok());

    let config = HeraldConfig::load(&path);
    let _ = std::fs::remove_file(&path);
    let Ok(mut config) = config else {
        panic!("configuration should load");
    };
    config.retry.max_attempts = 1;

    let sms = MockProvider::failing("sms");
    let email = MockProvider::succeeding("email");
    let (orchestrator, recorder) = recorded_orchestrator(config, &[&sms, &email]);

    orchestrator.submit(message("m1")).await;

    let stats = orchestrator.statistics();
    assert_eq!(stats.available_tokens, 4);
    assert_eq!(breaker_state(&stats, "sms"), Some(CircuitState::Open));
    assert_eq!(
        recorder.count(|event| matches!(
            event,
            AuditEvent::DeliverySuccess { destination, .. } if destination == "[REDACTED]@y.com"
        )),
        1
    );
}
