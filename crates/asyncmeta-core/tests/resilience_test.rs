//! Dispatcher integration tests: transport failures, deadlines, abandon,
//! admission and background reaping.

mod support;

use asyncmeta_common::{
    DeleteRequest, OperationTimeouts, QuarantineConfig, ResultCode, Scope, SearchRequest,
    TargetConfig,
};
use asyncmeta_client::SessionStatus;
use asyncmeta_core::{DispatchConfig, Dispatcher};
use std::time::Duration;
use support::{
    dispatcher, dn, drain, init_tracing, people_and_groups, Script, ScriptedConnector,
    ScriptedTarget,
};
use tokio::sync::mpsc;

fn people_only(
    script: Script,
    config: DispatchConfig,
) -> (Dispatcher<ScriptedConnector>, ScriptedConnector) {
    people_with(script, config, |_| {})
}

fn people_with(
    script: Script,
    config: DispatchConfig,
    configure: impl FnOnce(&mut TargetConfig),
) -> (Dispatcher<ScriptedConnector>, ScriptedConnector) {
    let connector = ScriptedConnector::new(vec![("people", script)]);
    let mut target = TargetConfig::new("people", "ldap://people.example", "ou=people,dc=x");
    configure(&mut target);
    let dispatcher = dispatcher(vec![target], &connector, config);
    (dispatcher, connector)
}

fn delete_bob(id: u64) -> DeleteRequest {
    DeleteRequest::new(id, dn("cn=bob,ou=people,dc=x"))
}

/// Polls until `condition` holds; panics after two seconds.
async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn wait_for_sends(target: &ScriptedTarget, sends: usize) {
    wait_until(|| target.sends() >= sends).await;
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_unreachable_target_is_retried_once() {
    init_tracing();
    let (dispatcher, connector) = people_only(Script::unreachable(), DispatchConfig::default());

    let result = dispatcher.delete(delete_bob(1)).await;

    assert_eq!(result.code, ResultCode::Unavailable);
    assert_eq!(connector.target("people").connects(), 2);
    assert_eq!(dispatcher.metrics().targets["people"].retries, 1);
}

#[tokio::test]
async fn test_send_failure_recovers_on_fresh_session() {
    let (dispatcher, connector) =
        people_only(Script::ok().with_failing_sends(1), DispatchConfig::default());

    let result = dispatcher.delete(delete_bob(2)).await;

    assert_eq!(result.code, ResultCode::Success);
    let people = connector.target("people");
    assert_eq!(people.connects(), 2);
    assert_eq!(people.sends(), 1);
}

#[tokio::test]
async fn test_send_failure_is_not_retried_twice() {
    let (dispatcher, connector) =
        people_only(Script::ok().with_failing_sends(5), DispatchConfig::default());

    let result = dispatcher.delete(delete_bob(3)).await;

    assert_eq!(result.code, ResultCode::Unavailable);
    assert_eq!(connector.target("people").connects(), 2);
    assert_eq!(connector.target("people").sends(), 0);
}

#[tokio::test]
async fn test_read_error_fails_in_flight_request() {
    let (dispatcher, connector) =
        people_only(Script::ok().dropping_on_request(), DispatchConfig::default());

    let result = dispatcher.delete(delete_bob(4)).await;

    assert_eq!(result.code, ResultCode::Unavailable);
    assert_eq!(
        result.text.as_deref(),
        Some("Read error on connection to target")
    );
    assert_eq!(connector.target("people").sends(), 1);
    assert_eq!(dispatcher.metrics().targets["people"].read_errors, 1);
}

#[tokio::test]
async fn test_unexpected_entry_is_a_protocol_error() {
    let (dispatcher, connector) =
        people_only(Script::ok().with_stray_entries(), DispatchConfig::default());

    let result = dispatcher.delete(delete_bob(40)).await;

    assert_eq!(result.code, ResultCode::ProtocolError);
    assert_eq!(connector.target("people").sends(), 1);
    assert_eq!(dispatcher.requests_in_flight(), 0);
}

#[tokio::test]
async fn test_quarantined_target_fails_fast() {
    let config = DispatchConfig::default().with_quarantine(QuarantineConfig {
        failure_threshold: 1,
        base_interval_ms: 60_000,
        max_interval_ms: 60_000,
        backoff_multiplier: 2.0,
        max_timeout_ops: 0,
    });
    let (dispatcher, connector) = people_only(Script::unreachable(), config);

    let first = dispatcher.delete(delete_bob(5)).await;
    assert_eq!(first.code, ResultCode::Unavailable);
    assert_eq!(connector.target("people").connects(), 1);

    let second = dispatcher.delete(delete_bob(6)).await;
    assert_eq!(second.code, ResultCode::Unavailable);
    assert_eq!(connector.target("people").connects(), 1);
    assert_eq!(dispatcher.metrics().targets["people"].quarantines, 1);
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeated_timeouts_quarantine_target() {
    let config = DispatchConfig::default().with_quarantine(QuarantineConfig {
        max_timeout_ops: 1,
        ..QuarantineConfig::default()
    });
    let (dispatcher, connector) = people_with(Script::silent(), config, |t| {
        t.timeouts = OperationTimeouts::uniform(500);
    });
    let people = connector.target("people");

    let first = dispatcher.delete(delete_bob(30)).await;
    assert_eq!(first.code, ResultCode::AdminLimitExceeded);

    let second = dispatcher.delete(delete_bob(31)).await;
    assert_eq!(second.code, ResultCode::Unavailable);
    assert_eq!(second.text.as_deref(), Some("Operation timed out"));
    assert_eq!(dispatcher.metrics().targets["people"].quarantines, 1);
    assert_eq!(people.sends(), 2);

    // The open session is not used while the target is quarantined.
    let third = dispatcher.delete(delete_bob(32)).await;
    assert_eq!(third.code, ResultCode::Unavailable);
    assert_eq!(people.sends(), 2);
    assert_eq!(people.connects(), 1);
    assert_eq!(dispatcher.metrics().timeouts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_target_timeout_yields_admin_limit() {
    let (dispatcher, connector) = people_with(Script::silent(), DispatchConfig::default(), |t| {
        t.timeouts = OperationTimeouts::uniform(500);
    });

    let result = dispatcher.delete(delete_bob(7)).await;

    assert_eq!(result.code, ResultCode::AdminLimitExceeded);
    assert_eq!(result.text.as_deref(), Some("Operation timed out"));
    assert_eq!(connector.target("people").abandons(), 1);
    assert_eq!(dispatcher.pending_operations(), 0);
    assert_eq!(dispatcher.metrics().timeouts, 1);
    assert_eq!(dispatcher.requests_in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_client_time_limit_yields_time_limit_exceeded() {
    let (dispatcher, connector) = people_with(Script::silent(), DispatchConfig::default(), |t| {
        t.timeouts.search_ms = 60_000;
    });

    let (tx, _rx) = mpsc::unbounded_channel();
    let request = SearchRequest::new(8, dn("ou=people,dc=x"), Scope::Subtree, "(uid=*)")
        .with_time_limit(1);
    let result = dispatcher.search(request, tx).await;

    assert_eq!(result.code, ResultCode::TimeLimitExceeded);
    assert_eq!(connector.target("people").abandons(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_streamed_entries() {
    let (dispatcher, _connector) = people_and_groups(
        Script::ok().with_entries("ou=people,dc=x", 3),
        Script::silent(),
        DispatchConfig::default(),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let request =
        SearchRequest::new(9, dn("dc=x"), Scope::Subtree, "(uid=*)").with_time_limit(2);
    let result = dispatcher.search(request, tx).await;

    assert_eq!(result.code, ResultCode::TimeLimitExceeded);
    assert_eq!(drain(&mut rx).0.len(), 3);
}

// ============================================================================
// Session groups
// ============================================================================

#[tokio::test]
async fn test_operations_rotate_over_sessions() {
    let (dispatcher, connector) = people_only(
        Script::ok(),
        DispatchConfig::default().with_sessions_per_target(2),
    );
    let people = connector.target("people");

    assert_eq!(dispatcher.delete(delete_bob(33)).await.code, ResultCode::Success);
    assert_eq!(people.connects(), 1);
    assert_eq!(dispatcher.delete(delete_bob(34)).await.code, ResultCode::Success);
    assert_eq!(people.connects(), 2);

    // Both sessions are open now and get reused in turn.
    assert_eq!(dispatcher.delete(delete_bob(35)).await.code, ResultCode::Success);
    assert_eq!(dispatcher.delete(delete_bob(36)).await.code, ResultCode::Success);
    assert_eq!(people.connects(), 2);
    assert_eq!(people.sends(), 4);
    assert_eq!(dispatcher.session_status(0), SessionStatus::Bound);
}

// ============================================================================
// Abandon and admission
// ============================================================================

#[tokio::test]
async fn test_admission_rejects_when_full_and_abandon_releases() {
    init_tracing();
    let (dispatcher, connector) = people_only(
        Script::silent(),
        DispatchConfig::default().with_max_pending_ops(1),
    );
    let people = connector.target("people");

    let pending = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.delete(delete_bob(10)).await })
    };
    wait_for_sends(&people, 1).await;
    assert_eq!(dispatcher.pending_operations(), 1);

    let rejected = dispatcher.delete(delete_bob(11)).await;
    assert_eq!(rejected.code, ResultCode::Busy);
    assert_eq!(people.sends(), 1);
    assert_eq!(dispatcher.metrics().busy_rejections, 1);

    assert!(dispatcher.abandon(10));
    assert!(!dispatcher.abandon(10));
    let abandoned = pending.await.unwrap();
    assert_eq!(abandoned.code, ResultCode::Canceled);
    assert_eq!(people.abandons(), 1);
    assert_eq!(dispatcher.pending_operations(), 0);
}

#[tokio::test]
async fn test_abandon_unknown_operation() {
    let (dispatcher, _connector) = people_only(Script::ok(), DispatchConfig::default());
    assert!(!dispatcher.abandon(404));
}

#[tokio::test]
async fn test_shutdown_fails_pending_operations() {
    let (dispatcher, connector) = people_only(Script::silent(), DispatchConfig::default());

    let pending = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.delete(delete_bob(12)).await })
    };
    wait_for_sends(&connector.target("people"), 1).await;

    dispatcher.shutdown();
    let result = pending.await.unwrap();
    assert_eq!(result.code, ResultCode::Unavailable);
    assert_eq!(dispatcher.session_status(0), SessionStatus::Absent);
}

// ============================================================================
// Reaper
// ============================================================================

#[tokio::test]
async fn test_reaper_abandons_orphaned_operations() {
    let (dispatcher, connector) = people_only(
        Script::silent(),
        DispatchConfig::default().with_reaper_interval_ms(10),
    );
    let people = connector.target("people");
    let reaper = dispatcher.spawn_reaper();

    let caller = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.delete(delete_bob(13)).await })
    };
    wait_for_sends(&people, 1).await;
    caller.abort();

    wait_until(|| dispatcher.pending_operations() == 0).await;
    assert_eq!(people.abandons(), 1);
    reaper.abort();
}

#[tokio::test]
async fn test_reap_closes_idle_sessions() {
    let (dispatcher, connector) = people_only(
        Script::ok(),
        DispatchConfig::default().with_idle_timeout_ms(5),
    );

    assert_eq!(dispatcher.delete(delete_bob(14)).await.code, ResultCode::Success);
    assert_eq!(dispatcher.session_status(0), SessionStatus::Bound);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(dispatcher.reap(), 0);
    assert_eq!(dispatcher.session_status(0), SessionStatus::Absent);

    assert_eq!(dispatcher.delete(delete_bob(15)).await.code, ResultCode::Success);
    assert_eq!(connector.target("people").connects(), 2);
}

#[tokio::test]
async fn test_reap_keeps_sessions_with_requests_in_flight() {
    let (dispatcher, connector) = people_only(
        Script::silent(),
        DispatchConfig::default().with_idle_timeout_ms(5),
    );

    let pending = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.delete(delete_bob(16)).await })
    };
    wait_for_sends(&connector.target("people"), 1).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    dispatcher.reap();
    assert_eq!(dispatcher.session_status(0), SessionStatus::Bound);

    assert!(dispatcher.abandon(16));
    assert_eq!(pending.await.unwrap().code, ResultCode::Canceled);
}
