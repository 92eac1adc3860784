//! Per-context table of active log sinks.
//!
//! Each context owns one entry guarded by its own mutex, so a swap on the
//! polling entry never waits on main or worker writers. Writers hold the
//! entry lock for the duration of one line; the swap holds it only for the
//! pointer exchange. Opening the new sink and closing the old one both happen
//! outside the lock. Swaps on one context are serialized by a second,
//! swap-only mutex that writers never touch.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tripwire_core::{ContextKind, LogTarget};

use crate::error::ConfigureError;
use crate::log_rotation::RotationPolicy;
use crate::sink::LogSink;

/// What a successful swap replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The context had no sink before.
    Opened,
    /// `previous` was unpublished and closed. `close_error` carries a failed
    /// final flush of the previous sink; the new sink is active regardless.
    Replaced {
        previous: LogTarget,
        close_error: Option<String>,
    },
}

#[derive(Debug, Default)]
pub struct ThreadLogRegistry {
    entries: [Mutex<Option<LogSink>>; 3],
    swaps: [Mutex<()>; 3],
    rotation: RotationPolicy,
}

impl ThreadLogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rotation(rotation: RotationPolicy) -> Self {
        Self {
            entries: Default::default(),
            swaps: Default::default(),
            rotation,
        }
    }

    /// Open `target`, publish it as the sink of `context`, then close the
    /// sink it replaced.
    ///
    /// On open failure the current sink stays published and open. A target
    /// that any context is still writing to is reopened without rotation.
    pub fn swap(
        &self,
        context: ContextKind,
        target: LogTarget,
    ) -> Result<SwapOutcome, ConfigureError> {
        let _swapping = self.swaps[context.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let rotation = if self.is_live(&target) {
            RotationPolicy::disabled()
        } else {
            self.rotation
        };
        let sink = LogSink::open_with(target.clone(), rotation).map_err(|source| {
            ConfigureError::Open {
                context,
                target,
                source,
            }
        })?;

        let previous = self.entry(context).replace(sink);

        Ok(match previous {
            None => SwapOutcome::Opened,
            Some(old) => {
                let previous = old.target().clone();
                let close_error = old.close().err().map(|err| err.to_string());
                SwapOutcome::Replaced {
                    previous,
                    close_error,
                }
            }
        })
    }

    /// Append one line to the active sink of `context`.
    ///
    /// Returns `Ok(false)` when the context has no sink.
    pub fn write(&self, context: ContextKind, line: &str) -> io::Result<bool> {
        let mut entry = self.entry(context);
        match entry.as_mut() {
            Some(sink) => sink.write_line(line).map(|()| true),
            None => Ok(false),
        }
    }

    pub fn active_target(&self, context: ContextKind) -> Option<LogTarget> {
        self.entry(context).as_ref().map(|sink| sink.target().clone())
    }

    /// Unpublish and close the sink of `context`, if any.
    pub fn close(&self, context: ContextKind) -> io::Result<Option<LogTarget>> {
        let taken = self.entry(context).take();
        match taken {
            Some(sink) => {
                let target = sink.target().clone();
                sink.close()?;
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    /// Close every sink. Returns the contexts whose final flush failed.
    pub fn close_all(&self) -> Vec<(ContextKind, io::Error)> {
        ContextKind::ALL
            .into_iter()
            .filter_map(|context| self.close(context).err().map(|err| (context, err)))
            .collect()
    }

    fn is_live(&self, target: &LogTarget) -> bool {
        ContextKind::ALL
            .into_iter()
            .any(|context| self.active_target(context).as_ref() == Some(target))
    }

    fn entry(&self, context: ContextKind) -> MutexGuard<'_, Option<LogSink>> {
        self.entries[context.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ThreadLogRegistry {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
