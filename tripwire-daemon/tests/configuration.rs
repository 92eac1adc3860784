use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tripwire_core::{ConfigureOptions, ContextKind, LogTarget, WatchOptions};
use tripwire_daemon::{Activation, ConfigKey, ConfigureError, Hub, PollingState};

struct Fixture {
    dir: TempDir,
    hub: Hub,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        fs::create_dir(dir.path().join("watched")).expect("watched dir");
        let hub = Hub::builder()
            .polling_interval(Duration::from_millis(20))
            .start()
            .expect("hub");
        Self { dir, hub }
    }

    fn log_file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn watched(&self) -> PathBuf {
        self.dir.path().join("watched")
    }
}

fn assert_sentinel(path: &Path) {
    let contents = fs::read_to_string(path).expect("log file exists");
    assert!(
        contents.starts_with("FileLogger opened"),
        "{} starts with {:?}",
        path.display(),
        contents.lines().next()
    );
}

#[tokio::test]
async fn validates_its_arguments() {
    let fixture = Fixture::new();
    let err = fixture.hub.configure(None).await.unwrap_err();
    assert!(matches!(err, ConfigureError::Argument(_)));
    assert!(err.to_string().contains("requires an option object"));
}

#[tokio::test]
async fn empty_options_touch_nothing() {
    let fixture = Fixture::new();
    let err = fixture
        .hub
        .configure(Some(ConfigureOptions::new()))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("requires an option object"));
    assert_eq!(fixture.hub.logs().active_target(ContextKind::Main), None);
}

#[tokio::test]
async fn configures_the_main_thread_logger() {
    let fixture = Fixture::new();
    let main_log = fixture.log_file("main.log");
    fixture
        .hub
        .configure(Some(ConfigureOptions::new().main_log(main_log.clone())))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_sentinel(&main_log);
}

#[tokio::test]
async fn configures_the_worker_thread_logger() {
    let fixture = Fixture::new();
    let worker_log = fixture.log_file("worker.log");
    fixture
        .hub
        .configure(Some(ConfigureOptions::new().worker_log(worker_log.clone())))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_sentinel(&worker_log);
}

#[tokio::test]
async fn polling_logger_configured_while_stopped_opens_on_first_poll_watch() {
    let fixture = Fixture::new();
    let polling_log = fixture.log_file("polling.log");

    let report = fixture
        .hub
        .configure(Some(ConfigureOptions::new().polling_log(polling_log.clone())))
        .await
        .unwrap();
    assert!(matches!(
        report.outcome(ConfigKey::PollingLog),
        Some(Ok(Activation::Deferred))
    ));
    assert!(!polling_log.exists());

    fixture
        .hub
        .watch(vec![fixture.watched()], WatchOptions::polling())
        .await
        .unwrap();
    assert_sentinel(&polling_log);
}

#[tokio::test]
async fn polling_logger_configured_after_start_opens_immediately() {
    let fixture = Fixture::new();
    let polling_log = fixture.log_file("polling.log");
    fixture
        .hub
        .watch(vec![fixture.watched()], WatchOptions::polling())
        .await
        .unwrap();
    assert_ne!(fixture.hub.status().polling.state, PollingState::Stopped);

    let report = fixture
        .hub
        .configure(Some(ConfigureOptions::new().polling_log(polling_log.clone())))
        .await
        .unwrap();
    assert!(matches!(
        report.outcome(ConfigKey::PollingLog),
        Some(Ok(Activation::Active { .. }))
    ));
    assert_sentinel(&polling_log);
}

#[tokio::test]
async fn second_configure_closes_the_first_target() {
    let fixture = Fixture::new();
    let first = fixture.log_file("first.log");
    let second = fixture.log_file("second.log");

    fixture
        .hub
        .configure(Some(ConfigureOptions::new().main_log(first.clone())))
        .await
        .unwrap();
    let activations = fixture
        .hub
        .configure(Some(ConfigureOptions::new().main_log(second.clone())))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(
        activations,
        vec![(
            ConfigKey::MainLog,
            Activation::Active {
                replaced: Some(LogTarget::File(first.clone())),
                close_error: None,
            }
        )]
    );

    let frozen = fs::read_to_string(&first).unwrap();
    fixture
        .hub
        .logs()
        .write(ContextKind::Main, "after the swap")
        .unwrap();
    assert_eq!(fs::read_to_string(&first).unwrap(), frozen);
    assert_sentinel(&second);
    assert!(fs::read_to_string(&second)
        .unwrap()
        .ends_with("after the swap\n"));
}

#[tokio::test]
async fn main_and_worker_in_one_call_are_independent_of_polling() {
    let fixture = Fixture::new();
    let main_log = fixture.log_file("main.log");
    let worker_log = fixture.log_file("worker.log");

    let report = fixture
        .hub
        .configure(Some(
            ConfigureOptions::new()
                .main_log(main_log.clone())
                .worker_log(worker_log.clone()),
        ))
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 2);
    assert_sentinel(&main_log);
    assert_sentinel(&worker_log);
    assert_eq!(fixture.hub.status().polling.state, PollingState::Stopped);
}

#[tokio::test]
async fn open_failure_is_reported_for_its_key_only() {
    let fixture = Fixture::new();
    let main_log = fixture.log_file("main.log");
    let unwritable = fixture.log_file("missing-dir").join("worker.log");

    let report = fixture
        .hub
        .configure(Some(
            ConfigureOptions::new()
                .main_log(main_log.clone())
                .worker_log(unwritable),
        ))
        .await
        .unwrap();

    assert!(!report.is_success());
    let failures: Vec<_> = report.failures().map(|(key, _)| key).collect();
    assert_eq!(failures, vec![ConfigKey::WorkerLog]);
    assert!(matches!(
        report.outcome(ConfigKey::WorkerLog),
        Some(Err(ConfigureError::Open {
            context: ContextKind::Worker,
            ..
        }))
    ));
    assert_sentinel(&main_log);
    assert_eq!(fixture.hub.logs().active_target(ContextKind::Worker), None);
}

#[tokio::test]
async fn failed_swap_keeps_the_previous_sink() {
    let fixture = Fixture::new();
    let good = fixture.log_file("good.log");
    fixture
        .hub
        .configure(Some(ConfigureOptions::new().worker_log(good.clone())))
        .await
        .unwrap();

    let report = fixture
        .hub
        .configure(Some(
            ConfigureOptions::new().worker_log(fixture.log_file("nope").join("bad.log")),
        ))
        .await
        .unwrap();
    assert!(!report.is_success());
    assert_eq!(
        fixture.hub.logs().active_target(ContextKind::Worker),
        Some(LogTarget::File(good))
    );
}

#[tokio::test]
async fn zero_polling_parameters_are_argument_errors() {
    let fixture = Fixture::new();
    let interval = fixture
        .hub
        .configure(Some(ConfigureOptions::new().polling_interval(0)))
        .await
        .unwrap_err();
    assert!(matches!(interval, ConfigureError::Argument(_)));

    let throttle = fixture
        .hub
        .configure(Some(
            ConfigureOptions::new()
                .main_log(fixture.log_file("main.log"))
                .polling_throttle(0),
        ))
        .await
        .unwrap_err();
    assert!(matches!(throttle, ConfigureError::Argument(_)));
    assert!(
        !fixture.log_file("main.log").exists(),
        "argument errors are raised before any sink opens"
    );
}

#[tokio::test]
async fn polling_parameters_show_in_status() {
    let fixture = Fixture::new();
    let report = fixture
        .hub
        .configure(Some(
            ConfigureOptions::new()
                .polling_interval(750)
                .polling_throttle(64),
        ))
        .await
        .unwrap();
    assert!(report.is_success());

    let status = fixture.hub.status();
    assert_eq!(status.polling.interval_ms, 750);
    assert_eq!(status.polling.throttle, 64);
}

#[tokio::test]
async fn disabled_target_writes_nothing() {
    let fixture = Fixture::new();
    fixture
        .hub
        .configure(Some(ConfigureOptions::new().main_log(LogTarget::Disabled)))
        .await
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(
        fixture.hub.logs().active_target(ContextKind::Main),
        Some(LogTarget::Disabled)
    );
    assert!(fixture
        .hub
        .logs()
        .write(ContextKind::Main, "dropped")
        .unwrap());
}
