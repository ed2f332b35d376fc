//! In-memory fakes for the runner and catalog traits (testing only)
//!
//! `RecordingRunner` records every invocation instead of spawning it and
//! can be told to fail specific programs. `StaticCatalog` answers from a
//! fixed series list and can simulate an unreachable service.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::catalog::ReleaseCatalog;
use crate::command::{CommandInvocation, CommandOutput, CommandRunner};
use crate::error::{CatalogError, CommandFailure};

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// Runner that records invocations and succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<CommandInvocation>>,
    failures: Vec<(String, String)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every invocation of `program` (matched on its file name) with
    /// exit status 1 and the given captured output.
    pub fn fail_on(mut self, program: &str, output: &str) -> Self {
        self.failures.push((program.to_string(), output.to_string()));
        self
    }

    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Effective argv of every recorded invocation, identity applied.
    pub fn argvs(&self) -> Vec<Vec<String>> {
        self.invocations().iter().map(|i| i.argv()).collect()
    }

    /// File names of the programs run, in order.
    pub fn programs(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(|i| program_name(&i.program).to_string())
            .collect()
    }

    pub fn ran(&self, program: &str) -> bool {
        self.programs().iter().any(|p| p == program)
    }
}

fn program_name(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(program)
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &CommandInvocation) -> Result<CommandOutput, CommandFailure> {
        self.invocations.lock().unwrap().push(invocation.clone());

        let name = program_name(&invocation.program);
        if let Some((_, output)) = self.failures.iter().find(|(p, _)| p == name) {
            return Err(CommandFailure::Exited {
                program: invocation.program.clone(),
                status: Some(1),
                output: output.clone(),
            });
        }
        Ok(CommandOutput::default())
    }
}

// ---------------------------------------------------------------------------
// StaticCatalog
// ---------------------------------------------------------------------------

/// Catalog with a fixed active set and development series.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    active: BTreeSet<String>,
    development: String,
    unreachable: bool,
    active_queries: AtomicUsize,
    development_queries: AtomicUsize,
}

impl StaticCatalog {
    pub fn new<I, S>(active: I, development: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            active: active.into_iter().map(Into::into).collect(),
            development: development.to_string(),
            ..Self::default()
        }
    }

    /// A catalog whose every query fails as if the service were down.
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn active_queries(&self) -> usize {
        self.active_queries.load(Ordering::SeqCst)
    }

    pub fn development_queries(&self) -> usize {
        self.development_queries.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<(), CatalogError> {
        if self.unreachable {
            return Err(CatalogError::Http {
                url: "memory://catalog".to_string(),
                reason: "service unreachable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReleaseCatalog for StaticCatalog {
    async fn active_series(&self) -> Result<BTreeSet<String>, CatalogError> {
        self.active_queries.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.active.clone())
    }

    async fn development_series(&self) -> Result<String, CatalogError> {
        self.development_queries.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.development.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_runner_records_and_fails_by_name() {
        let runner = RecordingRunner::new().fail_on("import", "boom");
        assert!(runner.run(&CommandInvocation::new("wget")).await.is_ok());

        let err = runner
            .run(&CommandInvocation::new("/home/ubuntu/langpack-o-matic/import"))
            .await
            .unwrap_err();
        assert_eq!(err.output(), "boom");
        assert_eq!(runner.programs(), vec!["wget", "import"]);
        assert!(runner.ran("import"));
        assert!(!runner.ran("packages"));
    }

    #[tokio::test]
    async fn static_catalog_counts_queries() {
        let catalog = StaticCatalog::new(["noble", "oracular"], "plucky");
        assert_eq!(catalog.active_series().await.unwrap().len(), 2);
        assert_eq!(catalog.development_series().await.unwrap(), "plucky");
        assert_eq!(catalog.active_queries(), 1);
        assert_eq!(catalog.development_queries(), 1);
    }

    #[tokio::test]
    async fn unreachable_catalog_fails_every_query() {
        let catalog = StaticCatalog::unreachable();
        assert!(catalog.active_series().await.is_err());
        assert!(catalog.development_series().await.is_err());
    }
}
