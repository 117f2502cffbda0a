use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::product::ProductVersion;
use crate::registry::{QueryFailure, Registry};
use crate::retained::RetainedSet;

// `eups list -D` indents nested dependencies and prefixes them with `|`
static DEPENDENCY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s|]*([^\s|]\S*)\s+(\S+)").expect("dependency line pattern is valid")
});

#[derive(Debug, Default)]
pub struct Resolution {
    /// Products added on top of the seed.
    pub discovered: Vec<ProductVersion>,
    /// Dependency queries issued, one per retained product.
    pub queries: usize,
    pub failures: Vec<QueryFailure>,
}

pub fn parse_dependencies(listing: &str) -> Vec<ProductVersion> {
    listing
        .lines()
        .filter_map(|line| DEPENDENCY_LINE.captures(line))
        .map(|caps| ProductVersion::new(&caps[1], &caps[2]))
        .collect()
}

struct Expansion {
    discovered: Vec<ProductVersion>,
    failure: Option<QueryFailure>,
}

/// Grows a retained set into its full dependency closure.
///
/// Each retained product is handed to at most one worker. A worker queries
/// the product's dependencies and claims every unseen one with
/// [`RetainedSet::insert_if_absent`]; claimed products go back on the
/// backlog, so deep subtrees spread across the whole pool.
pub struct DependencyResolver {
    registry: Arc<dyn Registry>,
    workers: usize,
}

impl DependencyResolver {
    pub fn new(registry: Arc<dyn Registry>, workers: usize) -> Self {
        Self {
            registry,
            workers: workers.max(1),
        }
    }

    pub async fn resolve(&self, retained: &RetainedSet) -> Resolution {
        let mut resolution = Resolution::default();
        let mut backlog: VecDeque<String> = retained.products().into();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < self.workers {
                let Some(product) = backlog.pop_front() else {
                    break;
                };

                let registry = Arc::clone(&self.registry);
                let retained = retained.clone();
                resolution.queries += 1;
                in_flight.spawn(async move { expand(registry.as_ref(), &retained, product).await });
            }

            // Backlog drained and nothing running: the closure is complete.
            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok(expansion) => {
                    for found in &expansion.discovered {
                        backlog.push_back(found.product.clone());
                    }
                    resolution.discovered.extend(expansion.discovered);
                    if let Some(failure) = expansion.failure {
                        resolution.failures.push(failure);
                    }
                }
                Err(e) => warn!("dependency worker did not finish: {}", e),
            }
        }

        info!(
            retained = retained.len(),
            discovered = resolution.discovered.len(),
            queries = resolution.queries,
            "dependency closure resolved"
        );

        resolution
    }
}

async fn expand(registry: &dyn Registry, retained: &RetainedSet, product: String) -> Expansion {
    let mut expansion = Expansion {
        discovered: Vec::new(),
        failure: None,
    };

    let Some(version) = retained.version_of(&product) else {
        return expansion;
    };

    let listing = match registry.list_dependencies(&product, &version).await {
        Ok(listing) => listing,
        Err(e) => {
            warn!(%product, %version, "dependency query failed, assuming no dependencies: {:#}", e);
            expansion.failure = Some(QueryFailure {
                operation: "list dependencies",
                product,
                version: Some(version),
                message: format!("{:#}", e),
            });
            return expansion;
        }
    };

    for dep in parse_dependencies(&listing) {
        if retained.insert_if_absent(&dep.product, &dep.version) {
            debug!(parent = %product, dependency = %dep, "discovered dependency");
            expansion.discovered.push(dep);
        }
    }

    expansion
}
