//! Parsing tests for the `configure` option object and log targets.
//!
//! Each `#[case]` is isolated; no shared state.

use rstest::rstest;
use serde_json::json;
use std::path::PathBuf;
use tripwire_core::types::{ConfigureOptions, ContextKind, LogTarget};

// ---------------------------------------------------------------------------
// Log targets
// ---------------------------------------------------------------------------

#[rstest]
#[case(":stderr", LogTarget::Stderr)]
#[case(":stdout", LogTarget::Stdout)]
#[case(":disabled", LogTarget::Disabled)]
#[case("/var/log/tripwire/main.log", LogTarget::File(PathBuf::from("/var/log/tripwire/main.log")))]
#[case("relative.log", LogTarget::File(PathBuf::from("relative.log")))]
fn log_target_parses_from_json_string(#[case] raw: &str, #[case] expected: LogTarget) {
    let parsed: LogTarget = serde_json::from_value(json!(raw)).expect("parse target");
    assert_eq!(parsed, expected);
    assert_eq!(serde_json::to_value(&parsed).expect("encode"), json!(raw));
}

// ---------------------------------------------------------------------------
// Option objects
// ---------------------------------------------------------------------------

#[rstest]
#[case(json!({"mainLog": "/tmp/m.log"}), ContextKind::Main)]
#[case(json!({"workerLog": "/tmp/w.log"}), ContextKind::Worker)]
#[case(json!({"pollingLog": "/tmp/p.log"}), ContextKind::Polling)]
fn single_key_options_target_one_context(
    #[case] raw: serde_json::Value,
    #[case] context: ContextKind,
) {
    let options: ConfigureOptions = serde_json::from_value(raw).expect("parse options");
    assert!(!options.is_empty());
    for other in ContextKind::ALL {
        assert_eq!(options.log_for(other).is_some(), other == context, "{other}");
    }
}

#[test]
fn polling_parameters_parse_in_camel_case() {
    let options: ConfigureOptions =
        serde_json::from_value(json!({"pollingInterval": 250, "pollingThrottle": 32}))
            .expect("parse options");
    assert_eq!(options.polling_interval, Some(250));
    assert_eq!(options.polling_throttle, Some(32));
}

#[rstest]
#[case(json!({"mainlog": "/tmp/m.log"}))]
#[case(json!({"mainLog": "/tmp/m.log", "verbose": true}))]
#[case(json!(["mainLog"]))]
#[case(json!("mainLog"))]
#[case(json!({"pollingInterval": "fast"}))]
fn malformed_option_objects_are_rejected(#[case] raw: serde_json::Value) {
    let parsed: Result<ConfigureOptions, _> = serde_json::from_value(raw);
    assert!(parsed.is_err(), "expected rejection, got {parsed:?}");
}

#[test]
fn empty_object_parses_but_is_empty() {
    let options: ConfigureOptions = serde_json::from_value(json!({})).expect("parse options");
    assert!(options.is_empty());
}

#[test]
fn builder_matches_deserialized_form() {
    let built = ConfigureOptions::new()
        .main_log("/tmp/m.log")
        .polling_log(LogTarget::Stderr)
        .polling_interval(50);
    let parsed: ConfigureOptions = serde_json::from_value(json!({
        "mainLog": "/tmp/m.log",
        "pollingLog": ":stderr",
        "pollingInterval": 50,
    }))
    .expect("parse options");
    assert_eq!(built, parsed);
}
