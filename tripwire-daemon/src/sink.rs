//! Log sinks: one open destination for diagnostic text.
//!
//! A sink announces itself with a sentinel line (`FileLogger opened`, …)
//! before anything else is written, and the sentinel is flushed to the OS
//! (and fsync'd for files) before [`LogSink::open`] returns. `close` consumes
//! the sink, so nothing can write to it afterwards.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};

use tripwire_core::LogTarget;

use crate::log_rotation::{rotate_before_open, RotationPolicy};

enum SinkWriter {
    File(LineWriter<File>),
    Stderr(io::Stderr),
    Stdout(io::Stdout),
    Null,
}

pub struct LogSink {
    target: LogTarget,
    writer: SinkWriter,
    bytes_written: u64,
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("target", &self.target)
            .field("bytes_written", &self.bytes_written)
            .finish()
    }
}

impl LogSink {
    /// Open `target` with the default rotation policy.
    pub fn open(target: LogTarget) -> io::Result<Self> {
        Self::open_with(target, RotationPolicy::default())
    }

    pub fn open_with(target: LogTarget, rotation: RotationPolicy) -> io::Result<Self> {
        let writer = match &target {
            LogTarget::File(path) => {
                rotate_before_open(path, rotation)?;
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                SinkWriter::File(LineWriter::new(file))
            }
            LogTarget::Stderr => SinkWriter::Stderr(io::stderr()),
            LogTarget::Stdout => SinkWriter::Stdout(io::stdout()),
            LogTarget::Disabled => SinkWriter::Null,
        };

        let mut sink = Self {
            target,
            writer,
            bytes_written: 0,
        };
        if !matches!(sink.writer, SinkWriter::Null) {
            let sentinel = format!("{} opened", sink.target.sink_kind());
            sink.write_line(&sentinel)?;
            sink.sync()?;
        }
        Ok(sink)
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    /// Bytes appended through this sink, sentinel included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Append one line. A trailing newline is added.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let line = line.trim_end_matches('\n');
        match &mut self.writer {
            SinkWriter::File(w) => writeln!(w, "{line}")?,
            SinkWriter::Stderr(w) => writeln!(w.lock(), "{line}")?,
            SinkWriter::Stdout(w) => writeln!(w.lock(), "{line}")?,
            SinkWriter::Null => return Ok(()),
        }
        self.bytes_written += line.len() as u64 + 1;
        Ok(())
    }

    /// Flush everything written so far and, for files, fsync it.
    pub fn sync(&mut self) -> io::Result<()> {
        match &mut self.writer {
            SinkWriter::File(w) => {
                w.flush()?;
                w.get_ref().sync_data()
            }
            SinkWriter::Stderr(w) => w.flush(),
            SinkWriter::Stdout(w) => w.flush(),
            SinkWriter::Null => Ok(()),
        }
    }

    /// Flush and release the destination.
    pub fn close(mut self) -> io::Result<()> {
        self.sync()
    }
}
