use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tripwire_core::DaemonConfig;

use crate::coordinator::parse_options;
use crate::error::{io_err, DaemonError};
use crate::hub::Hub;
use crate::log_registry::ThreadLogRegistry;
use crate::paths::{config_path, logs_dir, socket_path, tripwire_root};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::sink_layer::SinkLayer;

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let logs = Arc::new(ThreadLogRegistry::new());
    init_tracing(Arc::clone(&logs));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), logs))
}

/// Run the daemon: apply `~/.tripwire/config.yaml`, open its watches, and
/// serve the control socket until `stop` or ctrl-c.
pub async fn run(home: PathBuf, logs: Arc<ThreadLogRegistry>) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = tripwire_core::config::load_at(&home)?;
    tracing::info!(
        config = %config_path(&home).display(),
        watches = config.watches.len(),
        "configuration loaded",
    );

    let hub = Arc::new(
        Hub::builder()
            .logs(logs)
            .polling_interval(Duration::from_millis(config.polling_interval_ms.max(1)))
            .polling_throttle(config.polling_throttle.max(1))
            .start()?,
    );
    apply_config(&hub, &config).await;

    let started_at_unix = unix_seconds_now();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                hub,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);
    hub.shutdown();

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Push the config file through the regular configure path, then open its
/// watches. Failures are logged; the daemon keeps running with whatever
/// applied.
async fn apply_config(hub: &Hub, config: &DaemonConfig) {
    match hub.configure(Some(config.configure_options())).await {
        Ok(report) => {
            for (key, err) in report.failures() {
                tracing::warn!(key = %key, error = %err, "config entry not applied");
            }
        }
        Err(err) => tracing::warn!(error = %err, "config rejected"),
    }

    for entry in &config.watches {
        match hub.watch(entry.paths.clone(), entry.options()).await {
            Ok(mut handle) => {
                tokio::spawn(async move {
                    while let Some(event) = handle.events.recv().await {
                        tracing::info!(event = %event, "change");
                    }
                });
            }
            Err(err) => {
                tracing::warn!(paths = ?entry.paths, error = %err, "configured watch failed");
            }
        }
    }
}

async fn socket_server_task(
    home: PathBuf,
    hub: Arc<Hub>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let hub = Arc::clone(&hub);
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, hub, shutdown_tx, started_at_unix).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    hub: Arc<Hub>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response = dispatch_request(&hub, request, &shutdown_tx, started_at_unix).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

async fn dispatch_request(
    hub: &Hub,
    request: DaemonRequest,
    shutdown_tx: &broadcast::Sender<()>,
    started_at_unix: u64,
) -> DaemonResponse {
    match request.cmd.as_str() {
        "status" => DaemonResponse::ok(build_status_payload(hub, started_at_unix)),
        "configure" => {
            let options = match parse_options(request.options) {
                Ok(options) => options,
                Err(err) => return DaemonResponse::error(err.to_string()),
            };
            match hub.configure(Some(options)).await {
                Ok(report) if report.is_success() => DaemonResponse::ok(report.to_json()),
                Ok(report) => DaemonResponse::error_with(
                    format!("configure failed for {} key(s)", report.failures().count()),
                    report.to_json(),
                ),
                Err(err) => DaemonResponse::error(err.to_string()),
            }
        }
        "stop" => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
        other => DaemonResponse::error(format!("unknown command '{other}'")),
    }
}

fn build_status_payload(hub: &Hub, started_at_unix: u64) -> Value {
    let status = serde_json::to_value(hub.status()).unwrap_or(Value::Null);
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": started_at_unix,
        "uptime_secs": unix_seconds_now().saturating_sub(started_at_unix),
        "hub": status,
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [tripwire_root(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG`-filtered stderr output plus the per-context sinks.
pub fn init_tracing(logs: Arc<ThreadLogRegistry>) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(SinkLayer::new(logs))
        .try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{request_configure, request_status, request_stop, send_request};
    use tempfile::TempDir;
    use tripwire_core::{ConfigureOptions, LogTarget, WatchEntry};

    async fn blocking<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        tokio::task::spawn_blocking(f).await.expect("blocking task")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn socket_round_trip_status_configure_stop() {
        let home = TempDir::new().unwrap();
        let home_path = home.path().to_path_buf();
        let daemon = tokio::spawn(run(home_path.clone(), Arc::new(ThreadLogRegistry::new())));

        let status = blocking({
            let home = home_path.clone();
            move || request_status(&home)
        })
        .await
        .expect("status");
        assert_eq!(status["running"], json!(true));
        assert_eq!(status["hub"]["polling"]["state"], json!("stopped"));

        let main_log = home_path.join("main.log");
        let data = blocking({
            let home = home_path.clone();
            let options = ConfigureOptions::new().main_log(main_log.clone());
            move || request_configure(&home, Some(&options))
        })
        .await
        .expect("configure");
        assert_eq!(data["mainLog"]["status"], json!("active"));
        assert!(fs::read_to_string(&main_log)
            .unwrap()
            .starts_with("FileLogger opened"));

        let missing = blocking({
            let home = home_path.clone();
            move || request_configure(&home, None)
        })
        .await
        .unwrap_err();
        assert!(missing.to_string().contains("requires an option object"));

        blocking({
            let home = home_path.clone();
            move || request_stop(&home)
        })
        .await
        .expect("stop");
        daemon.await.expect("join").expect("daemon exits cleanly");
        assert!(!socket_path(&home_path).exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_commands_and_bad_json_get_error_responses() {
        let home = TempDir::new().unwrap();
        let home_path = home.path().to_path_buf();
        let daemon = tokio::spawn(run(home_path.clone(), Arc::new(ThreadLogRegistry::new())));

        blocking({
            let home = home_path.clone();
            move || request_status(&home)
        })
        .await
        .expect("daemon up");
        let response = blocking({
            let home = home_path.clone();
            move || send_request(&home, &DaemonRequest::new("sync"))
        })
        .await
        .expect("response");
        assert!(!response.ok);
        assert!(response.error.unwrap().contains("unknown command"));

        blocking({
            let home = home_path.clone();
            move || request_stop(&home)
        })
        .await
        .expect("stop");
        daemon.await.expect("join").expect("daemon exits cleanly");
    }

    #[tokio::test]
    async fn config_file_is_applied_at_startup() {
        let home = TempDir::new().unwrap();
        let share = home.path().join("share");
        fs::create_dir(&share).unwrap();
        let worker_log = home.path().join("worker.log");
        let config = DaemonConfig {
            worker_log: Some(LogTarget::File(worker_log.clone())),
            watches: vec![WatchEntry {
                paths: vec![share],
                poll: true,
                recursive: true,
            }],
            ..DaemonConfig::default()
        };

        let hub = Hub::builder()
            .polling_interval(Duration::from_secs(60))
            .start()
            .unwrap();
        apply_config(&hub, &config).await;

        let status = hub.status();
        assert_eq!(status.poll_sessions, 1);
        assert_eq!(status.logs.worker, Some(LogTarget::File(worker_log.clone())));
        assert!(fs::read_to_string(&worker_log)
            .unwrap()
            .starts_with("FileLogger opened"));
    }

    #[test]
    fn stale_socket_is_removed_before_bind() {
        let home = TempDir::new().unwrap();
        let socket = home.path().join("stale.sock");
        fs::write(&socket, "").unwrap();
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }
}
