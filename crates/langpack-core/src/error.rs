//! Error types for langpack-core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::builder::{BuildStage, BuildVariant};
use crate::catalog::Release;

/// An external command that did not complete successfully.
///
/// Always carries whatever output was captured so callers can surface the
/// diagnostics without re-running the tool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    /// The program ran and exited non-zero (or was killed by a signal).
    #[error("`{program}` exited with status {}: {output}", display_status(.status))]
    Exited {
        program: String,
        /// Exit code, `None` when terminated by a signal.
        status: Option<i32>,
        output: String,
    },

    /// The program could not be started at all.
    #[error("failed to spawn `{program}`: {reason}")]
    Spawn { program: String, reason: String },

    /// The program exceeded the configured timeout and was killed.
    #[error("`{program}` timed out after {limit:?}: {output}")]
    TimedOut {
        program: String,
        limit: Duration,
        /// Output produced before the kill
        output: String,
    },
}

impl CommandFailure {
    /// The program that failed.
    pub fn program(&self) -> &str {
        match self {
            CommandFailure::Exited { program, .. }
            | CommandFailure::Spawn { program, .. }
            | CommandFailure::TimedOut { program, .. } => program,
        }
    }

    /// Captured diagnostic output (empty when nothing could be captured).
    pub fn output(&self) -> &str {
        match self {
            CommandFailure::Exited { output, .. } | CommandFailure::TimedOut { output, .. } => {
                output
            }
            CommandFailure::Spawn { reason, .. } => reason,
        }
    }
}

fn display_status(status: &Option<i32>) -> String {
    status.map_or_else(|| "signal".to_string(), |code| code.to_string())
}

/// Errors building a [`LangpackConfig`](crate::config::LangpackConfig)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The user database could not be queried for the service account
    #[error("looking up account {user} failed: {reason}")]
    UserLookup { user: String, reason: String },
}

/// Errors talking to the distribution-tracking service
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Transport-level failure (DNS, TLS, connection reset...)
    #[error("catalog request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// The service answered with a non-success status
    #[error("catalog returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The body could not be decoded into the expected shape
    #[error("malformed catalog response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    /// The service reported no current development series
    #[error("no development series published for {distribution}")]
    NoDevelopmentSeries { distribution: String },
}

/// The requested release resolved to a series that is not active.
///
/// Benign: the build is skipped, nothing is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("release {resolved} (requested as {requested:?}) is not an active series")]
pub struct UnsupportedRelease {
    pub requested: String,
    pub resolved: Release,
}

/// The requested build variant has no implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{variant} language packs for {release} cannot be built yet")]
pub struct UnimplementedPath {
    pub release: Release,
    pub variant: BuildVariant,
}

/// A build or upload that failed at a specific stage.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("{stage} failed: {source}")]
    Command {
        stage: BuildStage,
        #[source]
        source: CommandFailure,
    },

    #[error("{stage} failed: {source}")]
    Catalog {
        stage: BuildStage,
        #[source]
        source: CatalogError,
    },

    #[error("{stage} failed on {path:?}: {source}")]
    Io {
        stage: BuildStage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Stage the build was in when it failed.
    pub fn stage(&self) -> BuildStage {
        match self {
            BuildError::Command { stage, .. }
            | BuildError::Catalog { stage, .. }
            | BuildError::Io { stage, .. } => *stage,
        }
    }

    /// The underlying command failure, if that is what stopped the build.
    pub fn command_failure(&self) -> Option<&CommandFailure> {
        match self {
            BuildError::Command { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors raised while bootstrapping the build host
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("{step}: {source}")]
    Command {
        step: &'static str,
        #[source]
        source: CommandFailure,
    },

    #[error("{step}: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("signing key material is empty")]
    EmptyKey,
}
