use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};

use crate::product::ProductVersion;
use crate::reaper::{Reaper, RemovalFailure};
use crate::registry::{QueryFailure, Registry};
use crate::resolver::DependencyResolver;
use crate::retained::Closure;
use crate::seed;
use crate::undeclare::{UndeclareFailure, Undeclarer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Seeded,
    Resolving,
    Frozen,
    PruningRegistry,
    PruningFilesystem,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Seeded => "seeded",
            Self::Resolving => "resolving",
            Self::Frozen => "frozen",
            Self::PruningRegistry => "pruning-registry",
            Self::PruningFilesystem => "pruning-filesystem",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize)]
pub struct CleanupReport {
    pub tag: String,
    pub dry_run: bool,
    pub retained: Closure,
    /// Retained products that came from dependencies rather than the tag itself.
    pub discovered: Vec<ProductVersion>,
    pub dependency_queries: usize,
    pub undeclared: Vec<ProductVersion>,
    pub undeclare_failures: Vec<UndeclareFailure>,
    pub removed_dirs: Vec<PathBuf>,
    pub removal_failures: Vec<RemovalFailure>,
    pub query_failures: Vec<QueryFailure>,
}

impl CleanupReport {
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    pub fn removals(&self) -> usize {
        self.undeclared.len() + self.removed_dirs.len()
    }

    pub fn failures(&self) -> usize {
        self.undeclare_failures.len() + self.removal_failures.len() + self.query_failures.len()
    }
}

pub struct CleanupOptions {
    pub workers: usize,
    pub tag_marker: String,
    pub roots: Vec<PathBuf>,
    pub dry_run: bool,
}

/// Seed → resolve → undeclare → reap, one phase after the other.
pub struct Cleanup {
    registry: Arc<dyn Registry>,
    options: CleanupOptions,
}

impl Cleanup {
    pub fn new(registry: Arc<dyn Registry>, options: CleanupOptions) -> Self {
        Self { registry, options }
    }

    fn enter(&self, phase: Phase) {
        info!(%phase, "cleanup phase");
    }

    pub async fn run(&self, tag: &str) -> anyhow::Result<CleanupReport> {
        let retained = seed::load(self.registry.as_ref(), tag).await?;
        self.enter(Phase::Seeded);
        info!(%tag, products = retained.len(), "loaded tag");

        self.enter(Phase::Resolving);
        let resolver = DependencyResolver::new(Arc::clone(&self.registry), self.options.workers);
        let resolution = resolver.resolve(&retained).await;

        let closure = retained.freeze();
        self.enter(Phase::Frozen);

        self.enter(Phase::PruningRegistry);
        let undeclarer = Undeclarer::new(
            Arc::clone(&self.registry),
            self.options.tag_marker.clone(),
            self.options.dry_run,
        );
        let undeclared = undeclarer.run(&closure).await;

        self.enter(Phase::PruningFilesystem);
        let mut query_failures = resolution.failures;
        query_failures.extend(undeclared.query_failures);

        let reaped = match self.registry.flavor().await {
            Ok(flavor) => Reaper::new(self.options.roots.clone(), self.options.dry_run).reap(&flavor, &closure),
            Err(e) => {
                warn!("could not determine flavor, leaving the installation tree alone: {:#}", e);
                query_failures.push(QueryFailure {
                    operation: "flavor",
                    product: String::new(),
                    version: None,
                    message: format!("{:#}", e),
                });
                Default::default()
            }
        };

        self.enter(Phase::Done);

        Ok(CleanupReport {
            tag: tag.to_string(),
            dry_run: self.options.dry_run,
            retained: closure,
            discovered: resolution.discovered,
            dependency_queries: resolution.queries,
            undeclared: undeclared.undeclared,
            undeclare_failures: undeclared.failed,
            removed_dirs: reaped.removed,
            removal_failures: reaped.failed,
            query_failures,
        })
    }
}
