//! tripwire daemon: file watching with live reconfiguration of logging.
//!
//! - [`hub`]: the service facade for configure, watch, unwatch, status
//! - [`coordinator`]: validates option objects and applies them per key
//! - [`log_registry`] / [`sink`]: one swappable log sink per thread context
//! - [`sink_layer`]: routes `tracing` events to the emitting thread's sink
//! - [`polling`] / [`scan`]: polling thread state machine and stat scanner
//! - [`worker`]: native watcher thread
//! - [`protocol`] / `runtime`: the Unix socket daemon

pub mod coordinator;
mod error;
pub mod hub;
pub mod log_registry;
pub mod log_rotation;
pub mod paths;
pub mod polling;
pub mod protocol;
mod runtime;
pub mod scan;
pub mod session;
pub mod sink;
pub mod sink_layer;
pub mod worker;

pub use coordinator::{parse_options, Activation, ConfigKey, ConfigurationCoordinator, ConfigureReport};
pub use error::{ConfigureError, DaemonError};
pub use hub::{Hub, HubBuilder, HubStatus, LogStatus};
pub use log_registry::{SwapOutcome, ThreadLogRegistry};
pub use polling::{PollingAudit, PollingChange, PollingCycleController, PollingState, PollingStatus};
pub use protocol::{
    request_configure, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{init_tracing, run, start_blocking};
pub use scan::{FsScanner, ScanReport, Scanner};
pub use session::{WatchHandle, WatchSession, WatchSessionRegistry};
pub use sink::LogSink;
