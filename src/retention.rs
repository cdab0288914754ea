//! Age-based cleanup of shared working directories.
//!
//! [`sweep`] walks each watched root depth-first, children before parents,
//! deleting files older than the threshold and then any expired directory
//! left empty. [`RetentionScheduler`] repeats that pass on a fixed interval
//! in the background.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Local;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RetentionConfig;
use crate::error::{ConfigError, Result, RetentionError};

/// Roots, age threshold and cadence of the cleanup loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    roots: Vec<PathBuf>,
    max_age: Duration,
    interval: Duration,
}

impl RetentionPolicy {
    /// Policy over `roots`; the interval between passes must be non-zero
    pub fn new(roots: Vec<PathBuf>, max_age: Duration, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "retention.interval_secs".to_string(),
                value: format!("{:?}", interval),
            }.into());
        }
        Ok(Self { roots, max_age, interval })
    }

    pub fn from_config(config: &RetentionConfig) -> Result<Self> {
        Self::new(config.roots.clone(), config.max_age(), config.interval())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One retention pass against the current wall clock
    pub fn run_pass(&self) -> RetentionReport {
        info!("Starting cleanup at {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        let report = sweep(&self.roots, self.max_age, SystemTime::now());
        info!(
            "Cleanup finished: {} files, {} directories removed, {} failures",
            report.files_removed, report.dirs_removed, report.failures
        );
        report
    }
}

/// What one pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub files_removed: u64,
    pub dirs_removed: u64,
    pub failures: u64,
}

/// Delete everything under `roots` last modified more than `max_age` before `now`
///
/// Files go first; a directory is removed only if it had expired before
/// its contents were swept and is empty afterwards. Roots themselves are
/// kept, missing roots are skipped, and symlinks are removed as links,
/// never followed. Failures are logged and counted, never fatal.
pub fn sweep(roots: &[PathBuf], max_age: Duration, now: SystemTime) -> RetentionReport {
    let mut report = RetentionReport::default();

    for root in roots {
        match fs::symlink_metadata(root) {
            Ok(meta) if meta.is_dir() => sweep_dir(root, max_age, now, &mut report),
            Ok(_) => debug!("Skipping non-directory root {}", root.display()),
            Err(_) => debug!("Skipping missing root {}", root.display()),
        }
    }
    report
}

fn sweep_dir(dir: &Path, max_age: Duration, now: SystemTime, report: &mut RetentionReport) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read directory {}: {}", dir.display(), e);
            report.failures += 1;
            return;
        }
    };

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                warn!("Cannot read entry in {}: {}", dir.display(), e);
                report.failures += 1;
                continue;
            }
        };

        // Vanished since the listing: someone else cleaned it up.
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };
        let expired = is_expired(meta.modified().ok(), max_age, now);

        if meta.is_dir() {
            sweep_dir(&path, max_age, now, report);
            if expired && is_empty_dir(&path) {
                match fs::remove_dir(&path) {
                    Ok(()) => {
                        info!("Deleted directory: {}", path.display());
                        report.dirs_removed += 1;
                    }
                    Err(e) => {
                        warn!("Failed to delete directory {}: {}", path.display(), e);
                        report.failures += 1;
                    }
                }
            }
        } else if expired {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!("Deleted file: {}", path.display());
                    report.files_removed += 1;
                }
                Err(e) => {
                    warn!("Failed to delete file {}: {}", path.display(), e);
                    report.failures += 1;
                }
            }
        }
    }
}

/// Strictly older than `max_age`; timestamps in the future never expire
fn is_expired(modified: Option<SystemTime>, max_age: Duration, now: SystemTime) -> bool {
    modified
        .and_then(|m| now.duration_since(m).ok())
        .is_some_and(|age| age > max_age)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

/// Lifecycle of a [`RetentionScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Stopped => "stopped",
        };
        write!(f, "{}", name)
    }
}

/// Background loop running a retention pass every `policy.interval()`
///
/// The first pass runs as soon as the loop starts.
pub struct RetentionScheduler {
    policy: Arc<RetentionPolicy>,
    state: SchedulerState,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
    passes: Arc<AtomicU64>,
}

impl RetentionScheduler {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            state: SchedulerState::Idle,
            shutdown: None,
            handle: None,
            passes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Passes finished since the scheduler was created
    pub fn passes_completed(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Spawn the loop on the current tokio runtime and return immediately
    pub fn start(&mut self) -> Result<()> {
        if self.state != SchedulerState::Idle {
            return Err(RetentionError::InvalidTransition { state: self.state.to_string() }.into());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| RetentionError::LoopFailed {
            reason: format!("no tokio runtime: {}", e),
        })?;

        let (tx, rx) = watch::channel(false);
        let policy = Arc::clone(&self.policy);
        let passes = Arc::clone(&self.passes);

        self.handle = Some(runtime.spawn(run_loop(policy, passes, rx)));
        self.shutdown = Some(tx);
        self.state = SchedulerState::Running;

        info!(
            "Retention scheduler started ({} roots, max age {:?}, interval {:?})",
            self.policy.roots.len(),
            self.policy.max_age,
            self.policy.interval
        );
        Ok(())
    }

    /// Signal the loop to exit and wait until it has
    ///
    /// A pass already in progress finishes first. Stopping a scheduler
    /// that is not running does nothing.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != SchedulerState::Running {
            return Ok(());
        }
        self.state = SchedulerState::Stopped;

        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            handle.await.map_err(|e| RetentionError::LoopFailed { reason: e.to_string() })?;
        }

        info!("Retention scheduler stopped after {} passes", self.passes_completed());
        Ok(())
    }
}

impl Drop for RetentionScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run_loop(policy: Arc<RetentionPolicy>, passes: Arc<AtomicU64>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let pass_policy = Arc::clone(&policy);
                match tokio::task::spawn_blocking(move || pass_policy.run_pass()).await {
                    Ok(_) => {
                        passes.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => error!("Retention pass aborted: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Retention loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompositorError;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::tempdir;

    const DAY: u64 = 24 * 60 * 60;

    fn age(path: &Path, now: SystemTime, days: u64) {
        let when = now - Duration::from_secs(days * DAY);
        set_file_mtime(path, FileTime::from_system_time(when)).unwrap();
    }

    fn two_days() -> Duration {
        Duration::from_secs(2 * DAY)
    }

    #[test]
    fn test_only_files_past_threshold_are_deleted() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let old = dir.path().join("old.mp4");
        let recent = dir.path().join("recent.mp4");
        fs::write(&old, b"x").unwrap();
        fs::write(&recent, b"x").unwrap();
        age(&old, now, 3);
        age(&recent, now, 1);

        let report = sweep(&[dir.path().to_path_buf()], two_days(), now);

        assert!(!old.exists());
        assert!(recent.exists());
        assert_eq!(report, RetentionReport { files_removed: 1, dirs_removed: 0, failures: 0 });
    }

    #[test]
    fn test_old_empty_directory_is_removed() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let empty = dir.path().join("job_1");
        fs::create_dir(&empty).unwrap();
        age(&empty, now, 3);

        let report = sweep(&[dir.path().to_path_buf()], two_days(), now);
        assert!(!empty.exists());
        assert_eq!(report.dirs_removed, 1);
        assert!(dir.path().exists());
    }

    #[test]
    fn test_non_empty_directory_is_kept_at_any_age() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let job = dir.path().join("job_2");
        fs::create_dir(&job).unwrap();
        let recent = job.join("progress.txt");
        fs::write(&recent, b"42").unwrap();
        age(&job, now, 30);

        sweep(&[dir.path().to_path_buf()], two_days(), now);
        assert!(job.exists());
        assert!(recent.exists());
    }

    #[test]
    fn test_expired_parent_emptied_in_same_pass() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let job = dir.path().join("job_3").join("frames");
        fs::create_dir_all(&job).unwrap();
        let file = job.join("silent.mp4");
        fs::write(&file, b"x").unwrap();
        age(&file, now, 5);
        age(&job, now, 5);
        age(&dir.path().join("job_3"), now, 5);

        let report = sweep(&[dir.path().to_path_buf()], two_days(), now);

        assert!(!dir.path().join("job_3").exists());
        assert_eq!(report, RetentionReport { files_removed: 1, dirs_removed: 2, failures: 0 });
    }

    #[test]
    fn test_recent_empty_directory_is_kept() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        let fresh = dir.path().join("fresh");
        fs::create_dir(&fresh).unwrap();

        sweep(&[dir.path().to_path_buf()], two_days(), now);
        assert!(fresh.exists());
    }

    #[test]
    fn test_root_is_never_removed_and_missing_roots_are_skipped() {
        let dir = tempdir().unwrap();
        let now = SystemTime::now();
        age(dir.path(), now, 10);

        let roots = vec![dir.path().join("does-not-exist"), dir.path().to_path_buf()];
        let report = sweep(&roots, two_days(), now);

        assert!(dir.path().exists());
        assert_eq!(report, RetentionReport::default());
    }

    #[test]
    fn test_future_timestamps_never_expire() {
        let now = SystemTime::now();
        let future = now + Duration::from_secs(DAY);
        assert!(!is_expired(Some(future), two_days(), now));
        assert!(!is_expired(None, two_days(), now));
        assert!(is_expired(Some(now - Duration::from_secs(3 * DAY)), two_days(), now));
    }

    #[tokio::test]
    async fn test_scheduler_lifecycle() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.mp4");
        fs::write(&old, b"x").unwrap();
        age(&old, SystemTime::now(), 3);

        let policy = RetentionPolicy::new(vec![dir.path().to_path_buf()], two_days(), Duration::from_secs(3600)).unwrap();
        let mut scheduler = RetentionScheduler::new(policy);
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);

        let err = scheduler.start().unwrap_err();
        assert!(matches!(err, CompositorError::Retention(RetentionError::InvalidTransition { .. })));

        for _ in 0..200 {
            if scheduler.passes_completed() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(scheduler.passes_completed(), 1);
        assert!(!old.exists());

        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.start().is_err());
        scheduler.stop().await.unwrap();
    }

    #[test]
    fn test_start_requires_runtime() {
        let policy = RetentionPolicy::new(vec![], two_days(), Duration::from_secs(60)).unwrap();
        let mut scheduler = RetentionScheduler::new(policy);
        assert!(scheduler.start().is_err());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn test_zero_interval_is_rejected_before_the_loop_starts() {
        let err = RetentionPolicy::new(vec![PathBuf::from("data")], two_days(), Duration::ZERO).unwrap_err();
        assert!(matches!(err, CompositorError::Config(ConfigError::InvalidValue { .. })));

        let config = RetentionConfig { interval_secs: 0, ..RetentionConfig::default() };
        assert!(RetentionPolicy::from_config(&config).is_err());
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetentionPolicy::from_config(&RetentionConfig::default()).unwrap();
        assert_eq!(policy.max_age(), two_days());
        assert_eq!(policy.interval(), Duration::from_secs(7200));
        assert_eq!(policy.roots(), &[PathBuf::from("data")]);
    }
}
