//! File-watch based reload trigger.
//!
//! The proxy watches the configuration directory itself. This trigger keeps
//! its own watcher on the same directory so it can tell when the writes have
//! become visible to file-system watchers, and optionally runs a hard-reload
//! command afterwards.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::process::Command;

use super::{ReloadError, ReloadOutcome, ReloadTrigger};
use crate::config::{ReloadConfig, ReloadMode};
use crate::repository::atomic::sync_dir;
use crate::repository::is_config_path;

const POLL_STEP: Duration = Duration::from_millis(25);
/// Events older than this (plus twice the settle time) are dropped.
const MIN_HORIZON: Duration = Duration::from_secs(1);

/// Key for an event path: the path relative to `base`, for repository-owned
/// files only. Temp files from atomic writes and the backup tree are ignored.
fn tracked_key(base: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(base).ok()?;
    let label = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?
        .join("/");
    is_config_path(&label).then(|| relative.to_path_buf())
}

pub struct FileWatchTrigger {
    root: PathBuf,
    mode: ReloadMode,
    settle: Duration,
    hard_command: Option<Vec<String>>,
    /// Last event time per path relative to `root`.
    seen: Arc<DashMap<PathBuf, Instant>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileWatchTrigger {
    /// Start watching `root`. A watcher that cannot start degrades to
    /// durable-write-only reloads.
    pub fn start(root: &Path, config: &ReloadConfig) -> Self {
        let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let seen: Arc<DashMap<PathBuf, Instant>> = Arc::new(DashMap::new());

        let settle = Duration::from_millis(config.settle_ms);
        let watcher = match Self::watch(&root, seen.clone(), settle * 2 + MIN_HORIZON) {
            Ok(w) => {
                tracing::info!(path = %root.display(), mode = ?config.mode, "Reload watcher started");
                Some(w)
            }
            Err(e) => {
                tracing::warn!(path = %root.display(), error = %e, "Reload watcher unavailable; reloads will be unconfirmed");
                None
            }
        };

        Self {
            root,
            mode: config.mode,
            settle,
            hard_command: config.hard_command.clone(),
            seen,
            watcher: Mutex::new(watcher),
        }
    }

    fn watch(
        root: &Path,
        seen: Arc<DashMap<PathBuf, Instant>>,
        horizon: Duration,
    ) -> Result<RecommendedWatcher, notify::Error> {
        let base = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                        let now = Instant::now();
                        for key in event.paths.iter().filter_map(|p| tracked_key(&base, p)) {
                            seen.insert(key, now);
                        }
                        seen.retain(|_, at| now.duration_since(*at) <= horizon);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(watcher)
    }

    fn is_watching(&self) -> bool {
        self.watcher.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    fn relative(&self, path: &Path) -> PathBuf {
        let absolute = path
            .parent()
            .and_then(|p| std::fs::canonicalize(p).ok())
            .zip(path.file_name())
            .map(|(dir, name)| dir.join(name))
            .unwrap_or_else(|| path.to_path_buf());
        absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or(absolute)
    }

    /// Wait until the watcher has seen every path, or `settle` elapses.
    async fn await_events(&self, changed: &[PathBuf], since: Instant) -> bool {
        let wanted: Vec<PathBuf> = changed.iter().map(|p| self.relative(p)).collect();
        let deadline = Instant::now() + self.settle;
        let all_seen = loop {
            let all_seen = wanted
                .iter()
                .all(|p| self.seen.get(p).is_some_and(|at| *at >= since));
            if all_seen || Instant::now() >= deadline {
                break all_seen;
            }
            tokio::time::sleep(POLL_STEP).await;
        };
        for path in &wanted {
            self.seen.remove(path);
        }
        all_seen
    }

    async fn run_hard_command(&self) -> Result<(), ReloadError> {
        let Some((program, args)) = self.hard_command.as_ref().and_then(|c| c.split_first()) else {
            return Err(ReloadError::Command("hard reload requested without a command".into()));
        };

        let output = Command::new(program).args(args).kill_on_drop(true).output().await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ReloadError::Command(format!("`{program}` exited with {}: {}", output.status, stderr.trim())))
        }
    }
}

#[async_trait]
impl ReloadTrigger for FileWatchTrigger {
    async fn trigger(&self, changed: &[PathBuf]) -> Result<ReloadOutcome, ReloadError> {
        if changed.is_empty() && self.mode == ReloadMode::Graceful {
            return Ok(ReloadOutcome::NoChanges);
        }

        // Events for these writes may already have arrived.
        let since = Instant::now().checked_sub(self.settle).unwrap_or_else(Instant::now);

        for path in changed {
            if let Some(parent) = path.parent() {
                sync_dir(parent).await;
            }
        }

        let acknowledged = self.is_watching() && self.await_events(changed, since).await;

        if self.mode == ReloadMode::Hard {
            self.run_hard_command().await?;
            tracing::info!(files = changed.len(), "Hard reload completed");
            return Ok(ReloadOutcome::Restarted);
        }

        let outcome = if acknowledged {
            ReloadOutcome::Acknowledged
        } else {
            ReloadOutcome::Unconfirmed
        };
        tracing::debug!(files = changed.len(), outcome = outcome.as_str(), "Reload signalled");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_changes_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let trigger = FileWatchTrigger::start(dir.path(), &ReloadConfig::default());
        assert_eq!(trigger.trigger(&[]).await.unwrap(), ReloadOutcome::NoChanges);
    }

    #[tokio::test]
    async fn test_written_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let trigger = FileWatchTrigger::start(dir.path(), &ReloadConfig::default());
        let path = dir.path().join("static.toml");
        std::fs::write(&path, "[entry_points.web]\naddress = \":80\"\n").unwrap();

        let outcome = trigger.trigger(&[path]).await.unwrap();
        // best effort: either the watcher saw it or the wait ran out
        assert!(matches!(outcome, ReloadOutcome::Acknowledged | ReloadOutcome::Unconfirmed));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hard_command_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReloadConfig {
            mode: ReloadMode::Hard,
            settle_ms: 0,
            hard_command: Some(vec!["false".into()]),
            ..ReloadConfig::default()
        };
        let trigger = FileWatchTrigger::start(dir.path(), &config);
        assert!(matches!(trigger.trigger(&[]).await, Err(ReloadError::Command(_))));

        let config = ReloadConfig {
            hard_command: Some(vec!["true".into()]),
            ..config
        };
        let trigger = FileWatchTrigger::start(dir.path(), &config);
        assert_eq!(trigger.trigger(&[]).await.unwrap(), ReloadOutcome::Restarted);
    }

    #[test]
    fn test_only_repository_files_are_tracked() {
        let base = Path::new("/srv/proxy");
        let key = |p: &str| tracked_key(base, &base.join(p));

        assert_eq!(key("static.toml"), Some(PathBuf::from("static.toml")));
        assert_eq!(key("routes/default.toml"), Some(PathBuf::from("routes/default.toml")));
        assert_eq!(key(".static.toml.tmp-0f3a"), None);
        assert_eq!(key("routes/.default.toml.tmp-0f3a"), None);
        assert_eq!(key("backups/20240101T000000000000Z/manifest.json"), None);
        assert_eq!(tracked_key(base, Path::new("/elsewhere/static.toml")), None);
    }

    #[tokio::test]
    async fn test_seen_paths_do_not_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReloadConfig {
            settle_ms: 50,
            ..ReloadConfig::default()
        };
        let trigger = FileWatchTrigger::start(dir.path(), &config);
        let path = dir.path().join("static.toml");

        for i in 0..20 {
            crate::repository::write_atomic(&path, format!("# revision {i}\n").as_bytes())
                .await
                .unwrap();
            trigger.trigger(std::slice::from_ref(&path)).await.unwrap();
        }
        // at most a late event for the one file survives
        assert!(trigger.seen.len() <= 1);
    }
}
