//! The `configure` entry point.
//!
//! Validation happens up front and touches nothing. After that every key is
//! applied on its own: main and worker logs swap directly in the registry,
//! polling keys go through the polling thread's safe point. One key failing
//! never rolls back or blocks another.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tripwire_core::{ConfigureOptions, ContextKind, LogTarget};

use crate::error::ConfigureError;
use crate::log_registry::{SwapOutcome, ThreadLogRegistry};
use crate::polling::{PollingChange, PollingCycleController};

const MISSING_OPTIONS: &str = "configure requires an option object";

/// One recognized key of the option object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigKey {
    MainLog,
    WorkerLog,
    PollingLog,
    PollingInterval,
    PollingThrottle,
}

impl ConfigKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::MainLog => "mainLog",
            ConfigKey::WorkerLog => "workerLog",
            ConfigKey::PollingLog => "pollingLog",
            ConfigKey::PollingInterval => "pollingInterval",
            ConfigKey::PollingThrottle => "pollingThrottle",
        }
    }

    fn for_log(context: ContextKind) -> Self {
        match context {
            ContextKind::Main => ConfigKey::MainLog,
            ContextKind::Worker => ConfigKey::WorkerLog,
            ContextKind::Polling => ConfigKey::PollingLog,
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a successful key took effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Activation {
    /// The new sink is open with its sentinel written. `replaced` was closed.
    Active {
        replaced: Option<LogTarget>,
        #[serde(skip_serializing_if = "Option::is_none")]
        close_error: Option<String>,
    },
    /// Polling is stopped; the sink opens when the first poll session starts.
    Deferred,
    /// A polling parameter was updated.
    Applied,
}

impl From<SwapOutcome> for Activation {
    fn from(outcome: SwapOutcome) -> Self {
        match outcome {
            SwapOutcome::Opened => Activation::Active {
                replaced: None,
                close_error: None,
            },
            SwapOutcome::Replaced {
                previous,
                close_error,
            } => Activation::Active {
                replaced: Some(previous),
                close_error,
            },
        }
    }
}

#[derive(Debug)]
pub struct KeyOutcome {
    pub key: ConfigKey,
    pub result: Result<Activation, ConfigureError>,
}

/// Per-key result of one `configure` call, in application order.
#[derive(Debug, Default)]
pub struct ConfigureReport {
    pub outcomes: Vec<KeyOutcome>,
}

impl ConfigureReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (ConfigKey, &ConfigureError)> {
        self.outcomes
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().err().map(|err| (outcome.key, err)))
    }

    pub fn outcome(&self, key: ConfigKey) -> Option<&Result<Activation, ConfigureError>> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.key == key)
            .map(|outcome| &outcome.result)
    }

    /// The activations, or the first failing key's error.
    pub fn into_result(self) -> Result<Vec<(ConfigKey, Activation)>, ConfigureError> {
        self.outcomes
            .into_iter()
            .map(|outcome| outcome.result.map(|activation| (outcome.key, activation)))
            .collect()
    }

    /// `{"mainLog": {"status": "active", ...}, "workerLog": {"error": "..."}}`
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for outcome in &self.outcomes {
            let value = match &outcome.result {
                Ok(activation) => serde_json::to_value(activation)
                    .unwrap_or_else(|err| json!({ "error": err.to_string() })),
                Err(err) => json!({ "error": err.to_string() }),
            };
            map.insert(outcome.key.as_str().to_string(), value);
        }
        Value::Object(map)
    }
}

/// Turn the raw `options` field of a request into [`ConfigureOptions`].
pub fn parse_options(raw: Option<Value>) -> Result<ConfigureOptions, ConfigureError> {
    match raw {
        None | Some(Value::Null) => Err(ConfigureError::argument(MISSING_OPTIONS)),
        Some(value @ Value::Object(_)) => serde_json::from_value(value)
            .map_err(|err| ConfigureError::argument(format!("invalid configure options: {err}"))),
        Some(other) => Err(ConfigureError::argument(format!(
            "{MISSING_OPTIONS}, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn validate(options: Option<ConfigureOptions>) -> Result<ConfigureOptions, ConfigureError> {
    let options = options.ok_or_else(|| ConfigureError::argument(MISSING_OPTIONS))?;
    if options.is_empty() {
        return Err(ConfigureError::argument(format!(
            "{MISSING_OPTIONS} with at least one of mainLog, workerLog, pollingLog, \
             pollingInterval, pollingThrottle"
        )));
    }
    if options.polling_interval == Some(0) {
        return Err(ConfigureError::argument("pollingInterval must be greater than 0"));
    }
    if options.polling_throttle == Some(0) {
        return Err(ConfigureError::argument("pollingThrottle must be greater than 0"));
    }
    Ok(options)
}

pub struct ConfigurationCoordinator {
    logs: Arc<ThreadLogRegistry>,
    polling: Arc<PollingCycleController>,
}

impl ConfigurationCoordinator {
    pub fn new(logs: Arc<ThreadLogRegistry>, polling: Arc<PollingCycleController>) -> Self {
        Self { logs, polling }
    }

    /// Apply `options`. Resolves once every requested sink is open (or
    /// recorded for lazy activation) and every replaced sink is closed.
    ///
    /// `Err` only for a missing or malformed option object; per-key failures
    /// are in the report.
    pub async fn configure(
        &self,
        options: Option<ConfigureOptions>,
    ) -> Result<ConfigureReport, ConfigureError> {
        let options = validate(options)?;
        let mut report = ConfigureReport::default();

        for context in [ContextKind::Main, ContextKind::Worker] {
            if let Some(target) = options.log_for(context) {
                let result = self.swap_direct(context, target.clone()).await;
                report.push(ConfigKey::for_log(context), result);
            }
        }
        if let Some(target) = &options.polling_log {
            let result = self
                .polling
                .with_quiescence(PollingChange::Log(target.clone()))
                .await;
            report.push(ConfigKey::PollingLog, result);
        }
        if let Some(millis) = options.polling_interval {
            let result = self
                .polling
                .with_quiescence(PollingChange::Interval(Duration::from_millis(millis)))
                .await;
            report.push(ConfigKey::PollingInterval, result);
        }
        if let Some(throttle) = options.polling_throttle {
            let result = self
                .polling
                .with_quiescence(PollingChange::Throttle(throttle))
                .await;
            report.push(ConfigKey::PollingThrottle, result);
        }

        Ok(report)
    }

    async fn swap_direct(
        &self,
        context: ContextKind,
        target: LogTarget,
    ) -> Result<Activation, ConfigureError> {
        let logs = Arc::clone(&self.logs);
        tokio::task::spawn_blocking(move || logs.swap(context, target))
            .await
            .map_err(|err| ConfigureError::InternalSwap {
                context,
                reason: err.to_string(),
            })?
            .map(Activation::from)
    }
}

impl ConfigureReport {
    fn push(&mut self, key: ConfigKey, result: Result<Activation, ConfigureError>) {
        match &result {
            Ok(activation) => tracing::info!(key = %key, outcome = ?activation, "configured"),
            Err(err) => tracing::warn!(key = %key, error = %err, "configure failed"),
        }
        self.outcomes.push(KeyOutcome { key, result });
    }
}
