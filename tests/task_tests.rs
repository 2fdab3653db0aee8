//! Integration tests for task composition and the build mode latch

use assetflow::build::{BuildContext, BuildMode, NullReporter, RecordingReporter};
use assetflow::config::default_config;
use assetflow::session::Session;
use assetflow::tasks::standard::standard_runner;
use assetflow::tasks::{BoxError, TaskError, TaskRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Barrier;

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(registry: &mut TaskRegistry, log: &Log, name: &'static str) {
    let log = log.clone();
    registry
        .register(name, move || {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name.to_string());
                Ok(())
            }
        })
        .unwrap();
}

#[tokio::test]
async fn test_nested_series_and_parallel() {
    let log: Log = Arc::default();
    let mut registry = TaskRegistry::new();
    for name in ["clean", "styles", "scripts", "zip"] {
        recorder(&mut registry, &log, name);
    }
    registry.parallel("compile", &["styles", "scripts"]).unwrap();
    registry.series("package", &["clean", "compile", "zip"]).unwrap();
    let runner = registry.into_runner().unwrap();

    runner.run("package").await.unwrap();
    let order = log.lock().unwrap().clone();
    assert_eq!(order.len(), 4);
    assert_eq!(order.first().map(String::as_str), Some("clean"));
    assert_eq!(order.last().map(String::as_str), Some("zip"));
}

#[tokio::test]
async fn test_parallel_members_overlap() {
    let barrier = Arc::new(Barrier::new(2));
    let mut registry = TaskRegistry::new();
    for name in ["left", "right"] {
        let barrier = barrier.clone();
        registry
            .register(name, move || {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    Ok(())
                }
            })
            .unwrap();
    }
    registry.parallel("both", &["left", "right"]).unwrap();
    let runner = registry.into_runner().unwrap();

    // Each member waits for the other, so this only finishes if they overlap.
    tokio::time::timeout(Duration::from_secs(5), runner.run("both")).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_series_stops_at_failure() {
    let log: Log = Arc::default();
    let mut registry = TaskRegistry::new();
    recorder(&mut registry, &log, "first");
    registry.register("broken", || async { Err::<(), BoxError>("disk full".into()) }).unwrap();
    recorder(&mut registry, &log, "never");
    registry.series("all", &["first", "broken", "never"]).unwrap();
    let runner = registry.into_runner().unwrap();

    let err = runner.run("all").await.unwrap_err();
    assert_eq!(err.failed_task(), Some("broken"));
    assert!(err.to_string().contains("disk full"));
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
}

#[tokio::test]
async fn test_unknown_requested_task() {
    let temp = TempDir::new().unwrap();
    let session = Arc::new(Session::new(
        BuildContext::new(default_config(), temp.path().to_path_buf()),
        Arc::new(NullReporter),
    ));
    let runner = standard_runner(&session).unwrap();
    let dist = temp.path().join("public_html/dist");
    std::fs::create_dir_all(&dist).unwrap();

    let err = runner.run_series(&["clean".to_string(), "deploy".to_string()]).await.unwrap_err();
    assert!(matches!(err, TaskError::NotFound(ref name) if name == "deploy"));
    // Nothing ran: the unknown name is rejected before `clean` starts.
    assert!(dist.is_dir());
}

#[tokio::test]
async fn test_production_latch_survives_later_tasks() {
    let temp = TempDir::new().unwrap();
    let reporter = Arc::new(RecordingReporter::new());
    let session = Arc::new(Session::new(
        BuildContext::new(default_config(), temp.path().to_path_buf()),
        reporter.clone(),
    ));
    let runner = standard_runner(&session).unwrap();

    runner.run_parallel(&["compile".to_string()]).await.unwrap();
    assert_eq!(session.mode(), BuildMode::Development);

    runner.run_series(&["build".to_string(), "compile".to_string()]).await.unwrap();
    assert_eq!(session.mode(), BuildMode::Production);
    let built = reporter.messages().iter().filter(|m| *m == "Production version built").count();
    assert_eq!(built, 2);
}
