//! Language pack build and upload orchestration.
//!
//! A build walks a fixed sequence of stages:
//!
//! ```text
//! ValidatingRelease -> PreparingWorkspace -> Downloading -> Importing -> Done
//!         |                    |                  |             |
//!      Aborted              Failed             Failed        Failed
//! ```
//!
//! Requesting an inactive series is an expected outcome (`Aborted`), not an
//! error. Every external step that fails stops the build and propagates
//! its [`CommandFailure`](crate::error::CommandFailure) to the caller.
//! Nothing is rolled back; the next build purges the caches instead.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::catalog::{Release, ReleaseCatalog};
use crate::command::{CommandInvocation, CommandOutput, CommandRunner};
use crate::config::LangpackConfig;
use crate::error::{BuildError, CommandFailure, UnimplementedPath, UnsupportedRelease};
use crate::workspace::{Workspace, WorkspaceManager};

/// Stages of a build (and the standalone upload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStage {
    ValidatingRelease,
    PreparingWorkspace,
    Downloading,
    Importing,
    Uploading,
    Done,
    Aborted,
    Failed,
}

impl BuildStage {
    pub fn name(&self) -> &'static str {
        match self {
            BuildStage::ValidatingRelease => "validating release",
            BuildStage::PreparingWorkspace => "preparing workspace",
            BuildStage::Downloading => "downloading",
            BuildStage::Importing => "importing",
            BuildStage::Uploading => "uploading",
            BuildStage::Done => "done",
            BuildStage::Aborted => "aborted",
            BuildStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStage::Done | BuildStage::Aborted | BuildStage::Failed
        )
    }
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which flavour of language packs to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildVariant {
    /// Full base packs built from the latest translation export
    Base,
    /// Incremental -updates packs (not implemented yet)
    Updates,
}

impl BuildVariant {
    pub fn from_base_flag(base: bool) -> Self {
        if base {
            BuildVariant::Base
        } else {
            BuildVariant::Updates
        }
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildVariant::Base => f.write_str("base"),
            BuildVariant::Updates => f.write_str("updates"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Series name in any case, or the `devel` alias
    pub release: String,
    pub variant: BuildVariant,
}

impl BuildRequest {
    pub fn base(release: &str) -> Self {
        Self {
            release: release.to_string(),
            variant: BuildVariant::Base,
        }
    }

    pub fn updates(release: &str) -> Self {
        Self {
            release: release.to_string(),
            variant: BuildVariant::Updates,
        }
    }
}

/// Everything a successful build produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub release: Release,
    pub workspace: Workspace,
    pub archive: PathBuf,
    pub import_output: String,
    /// Stages visited, in order, ending with `Done`
    pub stages: Vec<BuildStage>,
}

#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Completed(BuildReport),
    /// The resolved release is not an active series
    Aborted(UnsupportedRelease),
    /// The requested variant has no build path yet
    Unimplemented(UnimplementedPath),
}

impl BuildOutcome {
    pub fn final_stage(&self) -> BuildStage {
        match self {
            BuildOutcome::Completed(_) => BuildStage::Done,
            BuildOutcome::Aborted(_) => BuildStage::Aborted,
            BuildOutcome::Unimplemented(_) => BuildStage::Aborted,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BuildOutcome::Completed(_))
    }
}

/// Builds and uploads language packs for one service account.
///
/// Not safe to run two builds of the same release concurrently: the build
/// tree is assumed to be exclusively owned for the duration of a call.
pub struct LangpackBuilder<'a> {
    config: &'a LangpackConfig,
    runner: &'a dyn CommandRunner,
    catalog: &'a dyn ReleaseCatalog,
}

impl<'a> LangpackBuilder<'a> {
    pub fn new(
        config: &'a LangpackConfig,
        runner: &'a dyn CommandRunner,
        catalog: &'a dyn ReleaseCatalog,
    ) -> Self {
        Self {
            config,
            runner,
            catalog,
        }
    }

    /// Build the source packages for `request`.
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, BuildError> {
        let mut stages = vec![BuildStage::ValidatingRelease];
        debug!(requested = %request.release, variant = %request.variant, "validating release");

        let release = match self.validate(&request.release).await {
            Ok(Ok(release)) => release,
            Ok(Err(unsupported)) => {
                info!("{unsupported}, not building");
                return Ok(BuildOutcome::Aborted(unsupported));
            }
            Err(e) => return Err(failed(e)),
        };

        if request.variant == BuildVariant::Updates {
            let gap = UnimplementedPath {
                release,
                variant: request.variant,
            };
            warn!("{gap}");
            return Ok(BuildOutcome::Unimplemented(gap));
        }

        stages.push(BuildStage::PreparingWorkspace);
        let workspace = WorkspaceManager::new(self.config, self.runner)
            .prepare(&release)
            .await
            .map_err(|source| {
                failed(BuildError::Command {
                    stage: BuildStage::PreparingWorkspace,
                    source,
                })
            })?;

        stages.push(BuildStage::Downloading);
        let archive = self.download(&release).await.map_err(|source| {
            failed(BuildError::Command {
                stage: BuildStage::Downloading,
                source,
            })
        })?;

        stages.push(BuildStage::Importing);
        let imported = self
            .import(&release, &archive, &workspace)
            .await
            .map_err(|source| {
                failed(BuildError::Command {
                    stage: BuildStage::Importing,
                    source,
                })
            })?;

        stages.push(BuildStage::Done);
        info!(release = %release, tree = %workspace.root.display(), "language packs built");

        Ok(BuildOutcome::Completed(BuildReport {
            release,
            workspace,
            archive,
            import_output: imported.output,
            stages,
        }))
    }

    /// Upload the packages prepared in the checkout. See [`upload`].
    pub async fn upload(&self) -> Result<CommandOutput, BuildError> {
        upload(self.config, self.runner).await
    }

    /// Resolve the requested name and check it against the active series.
    ///
    /// The active set is fetched fresh on every call.
    async fn validate(
        &self,
        requested: &str,
    ) -> Result<Result<Release, UnsupportedRelease>, BuildError> {
        let catalog_err = |source| BuildError::Catalog {
            stage: BuildStage::ValidatingRelease,
            source,
        };

        let active = self.catalog.active_series().await.map_err(catalog_err)?;
        let release = self.catalog.resolve(requested).await.map_err(catalog_err)?;

        if active.contains(release.as_str()) {
            Ok(Ok(release))
        } else {
            Ok(Err(UnsupportedRelease {
                requested: requested.to_string(),
                resolved: release,
            }))
        }
    }

    async fn download(&self, release: &Release) -> Result<PathBuf, CommandFailure> {
        let archive = self.config.archive_path(release.as_str());
        let url = self.config.archive_url(release.as_str());

        let mut invocation = CommandInvocation::new("wget");
        if !self.config.verify_tls {
            warn!(%url, "downloading translations WITHOUT TLS certificate verification");
            invocation = invocation.arg("--no-check-certificate");
        }
        let invocation = invocation
            .args(["-q", "-O"])
            .arg(archive.to_string_lossy())
            .arg(url)
            .identity(self.config.service_identity())
            .timeout(self.config.command_timeout());

        self.runner.run(&invocation).await?;
        debug!(archive = %archive.display(), "translations downloaded");
        Ok(archive)
    }

    async fn import(
        &self,
        release: &Release,
        archive: &std::path::Path,
        workspace: &Workspace,
    ) -> Result<CommandOutput, CommandFailure> {
        let import_tool = self.config.checkout().join("import");
        // `--treshold` is the spelling the import tool accepts.
        let invocation = CommandInvocation::new(import_tool.to_string_lossy())
            .arg("-v")
            .arg(format!("--treshold={}", self.config.import_threshold))
            .arg(archive.to_string_lossy())
            .arg(release.as_str())
            .arg(workspace.root.to_string_lossy())
            .identity(self.config.service_identity())
            .timeout(self.config.command_timeout());

        self.runner.run(&invocation).await
    }
}

/// Run `<checkout>/packages upload` from inside the checkout.
///
/// Needs no release catalog, so uploads still work while the distribution
/// API is unreachable.
pub async fn upload(
    config: &LangpackConfig,
    runner: &dyn CommandRunner,
) -> Result<CommandOutput, BuildError> {
    let checkout = config.checkout();
    let invocation = CommandInvocation::new(checkout.join("packages").to_string_lossy())
        .arg("upload")
        .current_dir(&checkout)
        .identity(config.service_identity())
        .timeout(config.command_timeout());

    let output = runner.run(&invocation).await.map_err(|source| {
        failed(BuildError::Command {
            stage: BuildStage::Uploading,
            source,
        })
    })?;
    info!("language packs uploaded");
    Ok(output)
}

fn failed(err: BuildError) -> BuildError {
    error!(stage = %err.stage(), "build {}: {err}", BuildStage::Failed);
    err
}
