//! Per-release build trees.
//!
//! A build tree lives at `<home>/<release>`. It is created on first use and
//! reused afterwards, with the import tool's two cache directories purged
//! before every build so a previous (possibly failed) run cannot leak into
//! the next one.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::catalog::Release;
use crate::command::{CommandInvocation, CommandRunner};
use crate::config::LangpackConfig;
use crate::error::CommandFailure;

/// Cache directories the import tool leaves behind.
pub const CACHE_DIRS: [&str; 2] = ["sources-base", "sources-update"];

/// What happened to the cache directories of an existing tree.
///
/// Purging is best-effort: `PartialFailure` is logged and reported but
/// never stops a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeResult {
    /// No cache directory was present
    Clean,
    /// Every present cache directory was removed
    Purged(Vec<PathBuf>),
    /// Some cache directories could not be removed
    PartialFailure {
        removed: Vec<PathBuf>,
        failed: Vec<(PathBuf, String)>,
    },
}

impl PurgeResult {
    pub fn is_partial_failure(&self) -> bool {
        matches!(self, PurgeResult::PartialFailure { .. })
    }
}

/// How the tree came to be ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkspaceOrigin {
    Created,
    Reused(PurgeResult),
}

/// A build tree ready for the import step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub release: Release,
    pub root: PathBuf,
    pub origin: WorkspaceOrigin,
}

impl Workspace {
    pub fn freshly_created(&self) -> bool {
        self.origin == WorkspaceOrigin::Created
    }
}

pub struct WorkspaceManager<'a> {
    config: &'a LangpackConfig,
    runner: &'a dyn CommandRunner,
}

impl<'a> WorkspaceManager<'a> {
    pub fn new(config: &'a LangpackConfig, runner: &'a dyn CommandRunner) -> Self {
        Self { config, runner }
    }

    /// Make the tree for `release` exist with no stale caches in it.
    ///
    /// Creation runs as the service account so the tree is owned by it.
    pub async fn prepare(&self, release: &Release) -> Result<Workspace, CommandFailure> {
        let root = self.config.workspace_dir(release.as_str());

        let origin = if root.exists() {
            WorkspaceOrigin::Reused(purge_caches(&root).await)
        } else {
            let mkdir = CommandInvocation::new("mkdir")
                .arg(root.to_string_lossy())
                .identity(self.config.service_identity())
                .timeout(self.config.command_timeout());
            self.runner.run(&mkdir).await?;
            info!("Created build tree {}", root.display());
            WorkspaceOrigin::Created
        };

        Ok(Workspace {
            release: release.clone(),
            root,
            origin,
        })
    }
}

/// Remove the cache directories below `root`, leaving everything else.
pub async fn purge_caches(root: &Path) -> PurgeResult {
    let mut removed = Vec::new();
    let mut failed = Vec::new();

    for name in CACHE_DIRS {
        let dir = root.join(name);
        if !dir.exists() {
            continue;
        }
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Removed the existing cache directory: {}", dir.display());
                removed.push(dir);
            }
            Err(e) => {
                error!("Failed to remove cache directory {}: {}", dir.display(), e);
                failed.push((dir, e.to_string()));
            }
        }
    }

    match (removed.is_empty(), failed.is_empty()) {
        (true, true) => PurgeResult::Clean,
        (_, true) => PurgeResult::Purged(removed),
        _ => PurgeResult::PartialFailure { removed, failed },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::resolve_release;
    use crate::command::ProcessRunner;
    use crate::fakes::RecordingRunner;

    fn config_in(home: &Path) -> LangpackConfig {
        LangpackConfig::default()
            .with_home(home)
            .with_elevation(false)
    }

    #[tokio::test]
    async fn test_prepare_creates_missing_tree() {
        let home = tempfile::tempdir().unwrap();
        let config = config_in(home.path());
        let runner = ProcessRunner::new();
        let manager = WorkspaceManager::new(&config, &runner);

        let ws = manager.prepare(&resolve_release("noble", "")).await.unwrap();
        assert!(ws.freshly_created());
        assert!(ws.root.is_dir());
        assert_eq!(ws.root, home.path().join("noble"));
    }

    #[tokio::test]
    async fn test_prepare_missing_tree_runs_only_mkdir() {
        let home = tempfile::tempdir().unwrap();
        let config = LangpackConfig::default().with_home(home.path());
        let runner = RecordingRunner::new();
        let manager = WorkspaceManager::new(&config, &runner);

        manager.prepare(&resolve_release("noble", "")).await.unwrap();

        let argv = runner.argvs();
        assert_eq!(argv.len(), 1);
        assert_eq!(argv[0][..4], ["sudo", "-u", "ubuntu", "mkdir"]);
    }

    #[tokio::test]
    async fn test_prepare_purges_only_cache_dirs() {
        let home = tempfile::tempdir().unwrap();
        let root = home.path().join("noble");
        for dir in ["sources-base/po", "sources-update", "keep-me"] {
            std::fs::create_dir_all(root.join(dir)).unwrap();
        }
        std::fs::write(root.join("notes.txt"), "keep").unwrap();

        let config = config_in(home.path());
        let runner = RecordingRunner::new();
        let manager = WorkspaceManager::new(&config, &runner);
        let ws = manager.prepare(&resolve_release("noble", "")).await.unwrap();

        assert!(!ws.freshly_created());
        assert!(runner.invocations().is_empty(), "reuse must not shell out");
        match &ws.origin {
            WorkspaceOrigin::Reused(PurgeResult::Purged(removed)) => assert_eq!(removed.len(), 2),
            other => panic!("unexpected origin: {other:?}"),
        }
        assert!(!root.join("sources-base").exists());
        assert!(!root.join("sources-update").exists());
        assert!(root.join("keep-me").is_dir());
        assert!(root.join("notes.txt").is_file());
    }

    #[tokio::test]
    async fn test_purge_on_tree_without_caches_is_clean() {
        let home = tempfile::tempdir().unwrap();
        assert_eq!(purge_caches(home.path()).await, PurgeResult::Clean);
    }

    #[tokio::test]
    async fn test_purge_failure_is_reported_not_fatal() {
        let home = tempfile::tempdir().unwrap();
        // A regular file where a directory is expected makes remove_dir_all fail.
        std::fs::write(home.path().join("sources-base"), "not a dir").unwrap();
        std::fs::create_dir(home.path().join("sources-update")).unwrap();

        let result = purge_caches(home.path()).await;
        match result {
            PurgeResult::PartialFailure { removed, failed } => {
                assert_eq!(removed, vec![home.path().join("sources-update")]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].0, home.path().join("sources-base"));
            }
            other => panic!("expected partial failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prepare_propagates_mkdir_failure() {
        let home = tempfile::tempdir().unwrap();
        let config = config_in(home.path());
        let runner = RecordingRunner::new().fail_on("mkdir", "mkdir: permission denied");
        let manager = WorkspaceManager::new(&config, &runner);

        let failure = manager
            .prepare(&resolve_release("noble", ""))
            .await
            .unwrap_err();
        assert!(failure.output().contains("permission denied"));
    }
}
