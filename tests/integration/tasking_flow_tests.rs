//! Integration tests for module tasking, fan-out, autorun, and result
//! collection across the dispatcher, queue, and registry.

use chrono::Utc;
use cinder::errors::AppError;
use cinder::models::module::ModuleMetadata;
use cinder::models::session::CheckinMetadata;
use cinder::models::task::{ResultFragment, TaskKind};
use cinder::tasking::dispatcher::TaskTarget;

use super::test_helpers::{native_listener, TestEngine};

fn inline_module(name: &str) -> ModuleMetadata {
    ModuleMetadata {
        name: name.into(),
        background: false,
        run_on_disk: false,
        output_extension: None,
        needs_admin: false,
    }
}

#[tokio::test]
async fn single_target_tasking_queues_exactly_one_task() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let session = engine.register_agent(&listener, Utc::now()).await;

    let report = engine
        .dispatcher
        .task_module(
            &TaskTarget::Session(session.id.clone()),
            &inline_module("collection/screenshot"),
            b"payload".to_vec(),
        )
        .await
        .expect("tasking");

    assert_eq!(report.tasked, vec![session.id.clone()]);
    assert!(report.failures.is_empty());

    let tasks = engine.dispatcher.drain_for(&session.id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].command.kind, TaskKind::RunInline);
    assert_eq!(tasks[0].payload, b"payload".to_vec());
    assert!(engine.dispatcher.drain_for(&session.id).await.is_empty());
}

#[tokio::test]
async fn fan_out_reaches_every_session_in_registration_order() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let now = Utc::now();
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(engine.register_agent(&listener, now).await.id);
    }

    let report = engine
        .dispatcher
        .task_module(&TaskTarget::All, &inline_module("situational/whoami"), Vec::new())
        .await
        .expect("fan-out");

    assert_eq!(report.tasked, ids);
    assert!(report.failures.is_empty());
    for id in &ids {
        assert_eq!(engine.queue.pending_count(id).await, 1);
    }
}

#[tokio::test]
async fn fan_out_collects_admin_gate_failures_without_aborting() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let now = Utc::now();
    let plain = engine.register_agent(&listener, now).await;

    let meta = CheckinMetadata {
        session_key: "k".repeat(32),
        elevated: true,
        ..CheckinMetadata::default()
    };
    let (elevated, _) = engine
        .registry
        .register(&listener, &meta, None, now)
        .await
        .expect("elevated registration");

    let module = ModuleMetadata {
        needs_admin: true,
        ..inline_module("privesc/dump-creds")
    };
    let report = engine
        .dispatcher
        .task_module(&TaskTarget::All, &module, Vec::new())
        .await
        .expect("fan-out");

    assert_eq!(report.tasked, vec![elevated.id.clone()]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains(&plain.id));
    assert_eq!(engine.queue.pending_count(&plain.id).await, 0);
    assert_eq!(engine.queue.pending_count(&elevated.id).await, 1);
}

#[tokio::test]
async fn admin_gate_failure_on_single_target_is_an_error() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let session = engine.register_agent(&listener, Utc::now()).await;

    let module = ModuleMetadata {
        needs_admin: true,
        ..inline_module("privesc/dump-creds")
    };
    let err = engine
        .dispatcher
        .task_module(&TaskTarget::Session(session.id.clone()), &module, Vec::new())
        .await
        .expect_err("gate");
    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(engine.queue.pending_count(&session.id).await, 0);
}

#[tokio::test]
async fn autorun_template_seeds_new_sessions_exactly_once() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");

    engine
        .dispatcher
        .task_module(
            &TaskTarget::Autorun,
            &inline_module("management/situational"),
            b"sysinfo".to_vec(),
        )
        .await
        .expect("autorun template");

    let session = engine.register_agent(&listener, Utc::now()).await;
    engine.dispatcher.apply_autorun(&session.id).await;

    let tasks = engine.dispatcher.drain_for(&session.id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].payload, b"sysinfo".to_vec());

    // Draining consumed it; autorun only seeds at registration time.
    assert!(engine.dispatcher.drain_for(&session.id).await.is_empty());
}

#[tokio::test]
async fn sleep_tasking_persists_cadence_and_queues_a_directive() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let session = engine.register_agent(&listener, Utc::now()).await;

    let report = engine
        .dispatcher
        .task_sleep(&TaskTarget::Session(session.id.clone()), 120, 0.5)
        .await
        .expect("sleep tasking");
    assert_eq!(report.tasked, vec![session.id.clone()]);

    let updated = engine.registry.resolve(&session.id).await.expect("resolve");
    assert_eq!(updated.delay, 120);
    assert!((updated.jitter - 0.5).abs() < f64::EPSILON);

    let tasks = engine.dispatcher.drain_for(&session.id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].command.kind, TaskKind::RunInline);
    let directive = String::from_utf8(tasks[0].payload.clone()).expect("utf8");
    assert!(directive.starts_with("SET "));
    assert!(directive.contains("delay"));
}

#[tokio::test]
async fn out_of_range_sleep_is_rejected_before_anything_changes() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let session = engine.register_agent(&listener, Utc::now()).await;

    let err = engine
        .dispatcher
        .task_sleep(&TaskTarget::Session(session.id.clone()), 120, 1.5)
        .await
        .expect_err("jitter out of range");
    assert!(matches!(err, AppError::Validation(_)));

    let unchanged = engine.registry.resolve(&session.id).await.expect("resolve");
    assert_eq!(unchanged.delay, 60);
    assert_eq!(engine.queue.pending_count(&session.id).await, 0);
}

#[tokio::test]
async fn kill_tasking_queues_exit_payload() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let session = engine.register_agent(&listener, Utc::now()).await;

    engine
        .dispatcher
        .task_kill(&TaskTarget::Session(session.id.clone()))
        .await
        .expect("kill tasking");

    let tasks = engine.dispatcher.drain_for(&session.id).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].payload, b"EXIT".to_vec());
}

#[tokio::test]
async fn multipart_results_land_in_the_session_buffer_once_complete() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let session = engine.register_agent(&listener, Utc::now()).await;

    let fragment = |seq, data: &str| ResultFragment {
        key: "t1".into(),
        seq,
        total: 3,
        data: data.into(),
    };

    engine
        .dispatcher
        .record_result(&session.id, fragment(2, "gamma"))
        .await
        .expect("fragment 2");
    engine
        .dispatcher
        .record_result(&session.id, fragment(0, "alpha"))
        .await
        .expect("fragment 0");
    assert_eq!(
        engine.registry.take_results(&session.id).await.expect("buffer"),
        "",
        "incomplete results stay buffered"
    );

    engine
        .dispatcher
        .record_result(&session.id, fragment(1, "beta"))
        .await
        .expect("fragment 1");

    let output = engine.registry.take_results(&session.id).await.expect("buffer");
    assert_eq!(output, "alphabetagamma");

    // The take cleared the buffer.
    let again = engine.registry.take_results(&session.id).await.expect("buffer");
    assert!(again.is_empty());
}

#[tokio::test]
async fn clear_all_target_empties_every_queue() {
    let engine = TestEngine::new().await;
    let listener = native_listener("l1");
    let now = Utc::now();
    let a = engine.register_agent(&listener, now).await;
    let b = engine.register_agent(&listener, now).await;

    engine
        .dispatcher
        .task_module(&TaskTarget::All, &inline_module("situational/whoami"), Vec::new())
        .await
        .expect("fan-out");
    engine
        .dispatcher
        .clear(&TaskTarget::All)
        .await
        .expect("clear all");

    assert_eq!(engine.queue.pending_count(&a.id).await, 0);
    assert_eq!(engine.queue.pending_count(&b.id).await, 0);
}
