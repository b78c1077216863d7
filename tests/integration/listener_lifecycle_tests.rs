//! Integration tests for listener definition, start/stop, and restart
//! after a process restart (fresh manager over the same database).

use std::io::Write;

use chrono::Utc;
use cinder::errors::AppError;
use cinder::models::listener::{ListenerKind, ListenerOptions};

use super::test_helpers::TestEngine;

fn loopback_options(port: u16) -> ListenerOptions {
    ListenerOptions {
        host: Some("127.0.0.1".into()),
        port: Some(port),
        ..ListenerOptions::default()
    }
}

#[tokio::test]
async fn create_validates_and_persists_the_definition() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();

    let listener = manager
        .create("l1", ListenerKind::Native, loopback_options(0))
        .await
        .expect("create");
    assert_eq!(listener.name, "l1");
    assert!(!listener.running);

    let err = manager
        .create("l2", ListenerKind::Native, ListenerOptions::default())
        .await
        .expect_err("missing options");
    assert!(matches!(err, AppError::Validation(_)));

    let err = manager
        .create("l1", ListenerKind::Native, loopback_options(0))
        .await
        .expect_err("duplicate name");
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn execute_binds_and_marks_running() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();
    manager
        .create("l1", ListenerKind::Native, loopback_options(0))
        .await
        .expect("create");

    let addr = manager.execute("l1").await.expect("execute");
    assert_ne!(addr.port(), 0);
    assert!(manager.is_running("l1").await);
    assert_eq!(manager.local_addr("l1").await, Some(addr));
    assert!(manager.get("l1").await.expect("get").running);

    let err = manager.execute("l1").await.expect_err("double execute");
    assert!(matches!(err, AppError::Conflict(_)));

    manager.kill_one("l1").await.expect("kill");
    assert!(!manager.is_running("l1").await);
    assert!(!manager.get("l1").await.expect("get").running);
}

#[tokio::test]
async fn execute_unknown_and_kill_stopped_report_distinct_errors() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();
    manager
        .create("l1", ListenerKind::Native, loopback_options(0))
        .await
        .expect("create");

    let err = manager.execute("ghost").await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));

    let err = manager.kill_one("l1").await.expect_err("not running");
    assert!(matches!(err, AppError::Conflict(_)));

    let err = manager.kill_one("ghost").await.expect_err("unknown");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn bind_failure_is_a_transport_error_and_leaves_state_stopped() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();

    // Occupy a port so the listener's bind must fail.
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("occupy port");
    let port = occupied.local_addr().expect("addr").port();

    manager
        .create("l1", ListenerKind::Native, loopback_options(port))
        .await
        .expect("create");
    let err = manager.execute("l1").await.expect_err("bind clash");
    assert!(matches!(err, AppError::Transport(_)));
    assert!(!manager.is_running("l1").await);
    assert!(!manager.get("l1").await.expect("get").running);
}

#[tokio::test]
async fn delete_stops_a_running_listener_first() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();
    manager
        .create("l1", ListenerKind::Native, loopback_options(0))
        .await
        .expect("create");
    manager.execute("l1").await.expect("execute");

    manager.delete("l1").await.expect("delete");
    assert!(!manager.is_running("l1").await);
    let err = manager.get("l1").await.expect_err("definition gone");
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn restart_reactivates_listeners_that_were_running() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();
    manager
        .create("l1", ListenerKind::Native, loopback_options(0))
        .await
        .expect("create l1");
    manager
        .create("l2", ListenerKind::Native, loopback_options(0))
        .await
        .expect("create l2");
    manager.execute("l1").await.expect("execute l1");

    // Simulated process shutdown: endpoints drop, running flags persist.
    manager.stop_all_for_shutdown().await;
    drop(manager);

    let manager = engine.manager();
    let report = manager.start_existing().await.expect("startup");
    assert_eq!(report.started, vec!["l1".to_owned()]);
    assert!(report.failures.is_empty());
    assert!(manager.is_running("l1").await);
    assert!(!manager.is_running("l2").await);
}

#[tokio::test]
async fn startup_failures_never_abort_the_batch() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();

    let probe = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("probe port");
    let port = probe.local_addr().expect("addr").port();
    drop(probe);

    manager
        .create("blocked", ListenerKind::Native, loopback_options(port))
        .await
        .expect("create blocked");
    manager
        .create("open", ListenerKind::Native, loopback_options(0))
        .await
        .expect("create open");
    manager.execute("blocked").await.expect("execute blocked");
    manager.execute("open").await.expect("execute open");
    manager.stop_all_for_shutdown().await;
    drop(manager);

    // Occupy blocked's port so only it fails to come back.
    let holder = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("occupy port");

    let manager = engine.manager();
    let report = manager.start_existing().await.expect("startup");
    assert_eq!(report.started, vec!["open".to_owned()]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("blocked"));
    drop(holder);
}

#[tokio::test]
async fn create_resolves_a_profile_file_to_its_effective_line() {
    let engine = TestEngine::new().await;
    let manager = engine.manager();

    let mut file = tempfile::NamedTempFile::new().expect("profile file");
    writeln!(file, "# comm profile").expect("write");
    writeln!(file, "\"/admin/get.php|Mozilla/5.0\"").expect("write");

    let mut options = loopback_options(0);
    options.profile = Some(file.path().to_string_lossy().into_owned());
    let listener = manager
        .create("l1", ListenerKind::Native, options)
        .await
        .expect("create");
    assert_eq!(listener.options.profile.as_deref(), Some("/admin/get.php|Mozilla/5.0"));

    // A value that names no file is stored as the literal profile line.
    let mut options = loopback_options(0);
    options.profile = Some("/news.asp|curl/8.0".into());
    let listener = manager
        .create("l2", ListenerKind::Native, options)
        .await
        .expect("create literal");
    assert_eq!(listener.options.profile.as_deref(), Some("/news.asp|curl/8.0"));
}

#[tokio::test]
async fn configured_defaults_seed_listener_creation_and_sessions() {
    let engine = TestEngine::new().await;
    let manager = engine.manager_with_defaults(ListenerOptions {
        default_delay: 30,
        default_jitter: 0.2,
        default_lost_limit: 10,
        ..ListenerOptions::default()
    });

    let mut options = manager.default_options();
    options.host = Some("127.0.0.1".into());
    options.port = Some(0);
    let listener = manager
        .create("l1", ListenerKind::Native, options)
        .await
        .expect("create");
    assert_eq!(listener.options.default_delay, 30);

    let session = engine.register_agent(&listener, Utc::now()).await;
    assert_eq!(session.delay, 30);
    assert!((session.jitter - 0.2).abs() < f64::EPSILON);
    assert_eq!(session.lost_limit, 10);
}
