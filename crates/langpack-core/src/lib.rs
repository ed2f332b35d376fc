//! langpack-core: build and publish Ubuntu language packs
//!
//! Drives the langpack-o-matic toolchain for one distribution series:
//! checks the series against the distribution's active releases, prepares
//! the per-release build tree, downloads the translation export, runs the
//! import step and uploads the resulting source packages.
//!
//! Every external tool runs through a [`CommandRunner`]; every release
//! query goes through a [`ReleaseCatalog`]. Both are traits so tests (and
//! other hosts) can substitute them, see [`fakes`].

pub mod bootstrap;
pub mod builder;
pub mod catalog;
pub mod command;
pub mod config;
pub mod error;
pub mod fakes;
pub mod telemetry;
pub mod workspace;

pub use bootstrap::EnvironmentBootstrap;
pub use builder::{
    upload, BuildOutcome, BuildReport, BuildRequest, BuildStage, BuildVariant, LangpackBuilder,
};
pub use catalog::{
    is_devel_alias, resolve_release, LaunchpadCatalog, Release, ReleaseCatalog, DEVEL_ALIAS,
};
pub use command::{CommandInvocation, CommandOutput, CommandRunner, ExecIdentity, ProcessRunner};
pub use config::LangpackConfig;
pub use error::{
    BootstrapError, BuildError, CatalogError, CommandFailure, ConfigError, UnimplementedPath,
    UnsupportedRelease,
};
pub use telemetry::{init_tracing, LogFormat};
pub use workspace::{PurgeResult, Workspace, WorkspaceManager, WorkspaceOrigin, CACHE_DIRS};
