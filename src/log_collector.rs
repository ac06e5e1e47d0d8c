//! Decoupled logging pipeline for telemetry runs.
//!
//! Every `log` record is handed to a dedicated OS thread over an unbounded
//! channel, so logging from a tick never waits on the disk.
//!
//! # Architecture
//!
//! ```text
//! log::info!/warn!/... (any thread, any runtime)
//!     |
//! [LogCollector] (log::Log impl, non-blocking send)
//!     | (crossbeam unbounded channel)
//! [DiskPersister thread]
//!     |                      |
//! logs/telemetry_<ts>.log   stderr (warnings and errors only)
//! ```
//!
//! `flush()` sends a marker down the same channel and waits for the thread to
//! reach it, so every line logged before the call is on disk afterwards.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// Default log directory relative to the working directory: ./logs
pub fn default_logs_path() -> io::Result<PathBuf> {
    Ok(std::env::current_dir()?.join("logs"))
}

/// A formatted log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
    /// Wall-clock time the line was created (HH:MM:SS.mmm)
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, message: String) -> Self {
        LogLine {
            level,
            message,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    fn formatted(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// `log` backend that persists every record to a per-session file.
#[derive(Clone)]
pub struct LogCollector {
    /// crossbeam unbounded sender; usable from any thread or runtime
    tx: Sender<LogMessage>,
    log_path: PathBuf,
    level: LevelFilter,
}

impl LogCollector {
    /// Create the log directory and session file and start the writer thread.
    pub fn new(log_dir: &Path, level: LevelFilter) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("telemetry_{}.log", timestamp));
        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let (tx, rx) = unbounded::<LogMessage>();

        // OS thread rather than a tokio task: records arrive from blocking
        // workload threads and from outside any runtime
        std::thread::Builder::new()
            .name("log-persister".to_string())
            .spawn(move || persist_loop(file, rx))?;

        Ok(LogCollector {
            tx,
            log_path,
            level,
        })
    }

    /// Register a clone of this collector as the global `log` backend.
    pub fn install(&self) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(self.level);
        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Queue a line. Never blocks; lines sent after the writer exits are lost.
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Block until every line queued before this call is written.
    pub fn flush_blocking(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        done_rx
            .recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    /// Async wrapper over `flush_blocking` that keeps the runtime free.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let collector = self.clone();
        tokio::task::spawn_blocking(move || collector.flush_blocking())
            .await
            .map_err(|e| format!("Flush task failed: {}", e))?
    }
}

fn persist_loop(mut file: File, rx: crossbeam_channel::Receiver<LogMessage>) {
    while let Ok(msg) = rx.recv() {
        match msg {
            LogMessage::Line(line) => {
                let formatted = line.formatted();
                if file.write_all(formatted.as_bytes()).is_err() {
                    eprint!("[Log] write failed: {}", formatted);
                }
                if line.level <= Level::Warn {
                    eprint!("{}", formatted);
                }
            }
            LogMessage::Flush(done) => {
                let _ = file.flush();
                let _ = file.sync_data();
                let _ = done.send(());
            }
        }
    }
}

/// Wires `log::info!()` and friends into the collector.
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.log_line(LogLine::new(record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {
        let _ = self.flush_blocking();
    }
}
