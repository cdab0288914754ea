//! Integer percent progress for a single job.
//!
//! A job reports `floor(done * 100 / total)` to an optional sink every time
//! the value changes, and 100 once the encode completes. Reported values
//! never go backwards.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::Result;

/// Destination for progress updates
pub trait ProgressSink: Send {
    fn publish(&mut self, percent: u8) -> Result<()>;
}

/// Writes the current percentage as plain text to a file
///
/// The value goes to a sibling temp file that is renamed over the target,
/// so a reader polling the path always sees a whole number.
#[derive(Debug, Clone)]
pub struct FileProgressSink {
    path: PathBuf,
    staging: PathBuf,
}

impl FileProgressSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let mut staging = path.clone().into_os_string();
        staging.push(".tmp");
        Self { path, staging: PathBuf::from(staging) }
    }

    /// Read back a progress file, `None` if it does not exist yet
    pub fn read(path: &Path) -> Result<Option<u8>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(text.trim().parse().ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl ProgressSink for FileProgressSink {
    fn publish(&mut self, percent: u8) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.staging, percent.to_string())?;
        fs::rename(&self.staging, &self.path)?;
        Ok(())
    }
}

/// Forwards progress to a closure
pub struct CallbackProgressSink<F> {
    callback: F,
}

impl<F: FnMut(u8) + Send> CallbackProgressSink<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(u8) + Send> ProgressSink for CallbackProgressSink<F> {
    fn publish(&mut self, percent: u8) -> Result<()> {
        (self.callback)(percent);
        Ok(())
    }
}

/// Percent of `done` out of `total`, floored
///
/// Overshooting the total reports 99, never 100.
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    if done > total {
        return 99;
    }
    (done as u128 * 100 / total as u128) as u8
}

/// Tracks frames written and reports percentage changes
pub struct ProgressTracker {
    sink: Option<Box<dyn ProgressSink>>,
    total: u64,
    completed: u64,
    last_reported: Option<u8>,
}

impl ProgressTracker {
    pub fn new(sink: Option<Box<dyn ProgressSink>>) -> Self {
        Self {
            sink,
            total: 0,
            completed: 0,
            last_reported: None,
        }
    }

    /// A tracker that counts but reports nowhere
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn last_reported(&self) -> Option<u8> {
        self.last_reported
    }

    /// Report the starting value
    pub fn start(&mut self) {
        self.report(percent_of(self.completed, self.total));
    }

    /// Count one more unit of work
    pub fn advance(&mut self) {
        self.completed += 1;
        self.report(percent_of(self.completed, self.total));
    }

    /// Report 100 regardless of rounding
    pub fn complete(&mut self) {
        self.report(100);
    }

    fn report(&mut self, percent: u8) {
        if self.last_reported.is_some_and(|last| percent <= last) {
            return;
        }
        self.last_reported = Some(percent);

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.publish(percent) {
                warn!("Failed to publish progress {}%: {}", percent, e);
            }
        }
    }
}
