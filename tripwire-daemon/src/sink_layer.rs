//! Bridge from `tracing` events to the per-context sinks.
//!
//! The worker and polling threads call [`enter_context`] once at startup;
//! every other thread counts as the main context. [`SinkLayer`] formats each
//! event and appends it to the sink of the emitting thread's context.

use std::cell::Cell;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;
use tripwire_core::ContextKind;

use crate::log_registry::ThreadLogRegistry;

thread_local! {
    static CURRENT_CONTEXT: Cell<ContextKind> = const { Cell::new(ContextKind::Main) };
}

/// Tag the calling thread as belonging to `context`.
pub fn enter_context(context: ContextKind) {
    CURRENT_CONTEXT.with(|current| current.set(context));
}

pub fn current_context() -> ContextKind {
    CURRENT_CONTEXT.with(Cell::get)
}

pub struct SinkLayer {
    logs: Arc<ThreadLogRegistry>,
}

impl SinkLayer {
    pub fn new(logs: Arc<ThreadLogRegistry>) -> Self {
        Self { logs }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);

        let line = format!(
            "{} {:>5} {}: {}{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields
        );
        // A failing sink cannot report through tracing without recursing.
        let _ = self.logs.write(current_context(), &line);
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
