use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use payloadvisor::{
    AppBuilder, AppConfig, DispatchError, EventKind, ExecutionContext, Gateway, HandlerFn,
    HealthFn, HealthStatus, InvocationRequest, PayloadApplication, RuntimeError, ScriptedTransport,
    SequenceError, Step, Transport,
};
use tokio_util::sync::CancellationToken;

mod common;
use common::{noop, quiet_config, wait_for_event, Recorder};

#[tokio::test]
async fn scripted_transport_drives_a_full_run() {
    let recorder = Recorder::arc();
    let transport = ScriptedTransport::new(vec![
        Step::invoke("HelloWorld", ""),
        Step::invoke("HelloFriend", "ground"),
        Step::invoke("Nope", ""),
        Step::CheckHealth,
        Step::ExportMetrics,
    ]);
    let outcomes = transport.outcome_log();

    let app = AppBuilder::new(quiet_config())
        .with_subscriber(recorder.clone())
        .with_transport(transport)
        .build();
    app.mount_sequence("HelloWorld", noop()).unwrap();
    app.mount_sequence(
        "HelloFriend",
        HandlerFn::arc(|ctx: ExecutionContext| async move {
            ctx.metrics().inc_counter(0)?;
            Ok::<_, SequenceError>(format!("hello {}", ctx.params_str()?))
        }),
    )
    .unwrap();

    app.run().await.unwrap();

    let outcomes = outcomes.lock().unwrap().clone();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert_eq!(outcomes[1].result.as_ref().unwrap().message(), Some("hello ground"));
    assert_eq!(
        outcomes[2].result,
        Err(DispatchError::SequenceNotFound { name: "Nope".into() })
    );
    assert_eq!(app.metrics().value(0).unwrap(), 1);

    let kinds = recorder.kinds();
    for expected in [
        EventKind::AppStarted,
        EventKind::SequenceStarting,
        EventKind::SequenceCompleted,
        EventKind::SequenceNotFound,
        EventKind::ShutdownRequested,
        EventKind::AllStoppedWithin,
    ] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }
    assert_eq!(kinds.first(), Some(&EventKind::AppStarted));
    assert_eq!(kinds.last(), Some(&EventKind::AllStoppedWithin));

    let stats = app.stats();
    assert_eq!((stats.dispatched, stats.completed, stats.not_found), (3, 2, 1));
}

struct BrokenLink;

#[async_trait]
impl Transport for BrokenLink {
    async fn serve(&self, _gateway: Gateway, _shutdown: CancellationToken) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("carrier lost").context("uplink receive"))
    }
}

#[tokio::test]
async fn transport_failure_ends_the_run_with_an_error() {
    let app = AppBuilder::new(quiet_config())
        .with_transport(BrokenLink)
        .build();
    app.mount_sequence("HelloWorld", noop()).unwrap();

    match app.run().await {
        Err(RuntimeError::Transport { error }) => {
            assert!(error.contains("uplink receive"), "{error}");
            assert!(error.contains("carrier lost"), "{error}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_handle_stops_an_idle_run() {
    let app = Arc::new(PayloadApplication::new(quiet_config()));
    let handle = app.shutdown_handle();
    let mut rx = app.bus().subscribe();

    let runner = tokio::spawn({
        let app = app.clone();
        async move { app.run().await }
    });
    assert!(wait_for_event(&mut rx, EventKind::AppStarted, None, 1000).await.is_some());

    handle.shutdown();
    runner.await.unwrap().unwrap();
    assert!(matches!(
        app.dispatch(InvocationRequest::new("HelloWorld", "")).await,
        Err(DispatchError::Closed)
    ));
}

#[tokio::test]
async fn stuck_handler_exceeds_grace() {
    let cfg = AppConfig {
        grace: Duration::from_millis(100),
        ..quiet_config()
    };
    let app = Arc::new(PayloadApplication::new(cfg));
    app.mount_sequence(
        "StageFile",
        HandlerFn::arc(|_ctx: ExecutionContext| async {
            // Ignores cancellation on purpose.
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, SequenceError>(())
        }),
    )
    .unwrap();
    let mut rx = app.bus().subscribe();

    let runner = tokio::spawn({
        let app = app.clone();
        async move { app.run().await }
    });
    let _stuck = tokio::spawn({
        let app = app.clone();
        async move { app.dispatch(InvocationRequest::new("StageFile", "")).await }
    });
    assert!(wait_for_event(&mut rx, EventKind::SequenceStarting, Some("StageFile"), 1000)
        .await
        .is_some());

    app.shutdown();
    match runner.await.unwrap() {
        Err(RuntimeError::GraceExceeded { grace, stuck }) => {
            assert_eq!(grace, Duration::from_millis(100));
            assert_eq!(stuck, vec!["StageFile".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn racing_health_polls_evaluate_once() {
    let app = Arc::new(PayloadApplication::new(quiet_config()));
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    app.set_health_check(HealthFn::arc(move || {
        seen.fetch_add(1, Ordering::SeqCst);
        true
    }))
    .unwrap();

    let polls: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { app.check().await })
        })
        .collect();
    let mut fresh = 0;
    for p in polls {
        let report = p.await.unwrap();
        assert_eq!(report.status, HealthStatus::Healthy);
        if !report.cached {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn panicking_health_predicate_reports_unhealthy() {
    let app = PayloadApplication::new(quiet_config());
    let mut rx = app.bus().subscribe();
    app.set_health_check(HealthFn::arc(|| -> bool { panic!("sensor bus stuck") }))
        .unwrap();

    let report = app.check().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
    let ev = wait_for_event(&mut rx, EventKind::HealthCheckFaulted, None, 1000)
        .await
        .unwrap();
    assert!(ev.reason.as_deref().unwrap_or("").contains("sensor bus stuck"));
}

#[tokio::test]
async fn no_predicate_means_healthy() {
    let app = PayloadApplication::new(quiet_config());
    assert!(app.check().await.status.is_healthy());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_increments_are_not_lost() {
    const TASKS: u64 = 8;
    const PER_TASK: u64 = 500;

    let app = Arc::new(PayloadApplication::new(quiet_config()));
    app.mount_sequence(
        "Count",
        HandlerFn::arc(|ctx: ExecutionContext| async move {
            for _ in 0..PER_TASK {
                ctx.metrics().inc_counter(3)?;
            }
            Ok::<_, SequenceError>(())
        }),
    )
    .unwrap();

    let runs: Vec<_> = (0..TASKS)
        .map(|_| {
            let app = app.clone();
            tokio::spawn(async move { app.dispatch(InvocationRequest::new("Count", "")).await })
        })
        .collect();
    for r in runs {
        r.await.unwrap().unwrap();
    }

    assert_eq!(app.metrics().value(3).unwrap(), TASKS * PER_TASK);
    assert_eq!(app.metrics().used_counter(), 4);
}
