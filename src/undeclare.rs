use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::product::ProductVersion;
use crate::registry::{QueryFailure, Registry};
use crate::retained::Closure;

static VERSION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\S+)").expect("version line pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UndeclareFailure {
    pub target: ProductVersion,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct UndeclareReport {
    /// Undeclared versions, or the ones that would have been in a dry run.
    pub undeclared: Vec<ProductVersion>,
    pub failed: Vec<UndeclareFailure>,
    pub query_failures: Vec<QueryFailure>,
}

/// Versions from an `eups list <product>` listing that may be undeclared:
/// anything other than `keep` that isn't a tag reference.
pub fn stale_versions<'a>(listing: &'a str, keep: &str, tag_marker: &str) -> Vec<&'a str> {
    listing
        .lines()
        .filter_map(|line| VERSION_LINE.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|version| *version != keep && !version.contains(tag_marker))
        .collect()
}

/// Removes every non-retained version of each retained product from the registry.
pub struct Undeclarer {
    registry: Arc<dyn Registry>,
    tag_marker: String,
    dry_run: bool,
}

impl Undeclarer {
    pub fn new(registry: Arc<dyn Registry>, tag_marker: impl Into<String>, dry_run: bool) -> Self {
        Self {
            registry,
            tag_marker: tag_marker.into(),
            dry_run,
        }
    }

    pub async fn run(&self, closure: &Closure) -> UndeclareReport {
        let mut report = UndeclareReport::default();

        for (product, keep) in closure.iter() {
            let listing = match self.registry.list_versions(product).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(%product, "could not list versions, skipping: {:#}", e);
                    report.query_failures.push(QueryFailure {
                        operation: "list versions",
                        product: product.to_string(),
                        version: None,
                        message: format!("{:#}", e),
                    });
                    continue;
                }
            };

            for version in stale_versions(&listing, keep, &self.tag_marker) {
                let target = ProductVersion::new(product, version);

                if self.dry_run {
                    info!(%target, "would undeclare");
                    report.undeclared.push(target);
                    continue;
                }

                info!(%target, "undeclaring");
                match self.registry.undeclare(product, version).await {
                    Ok(()) => report.undeclared.push(target),
                    Err(e) => {
                        warn!(%target, "problem undeclaring: {:#}", e);
                        report.failed.push(UndeclareFailure {
                            target,
                            message: format!("{:#}", e),
                        });
                    }
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::fake::FakeRegistry;

    #[test]
    fn test_stale_versions() {
        let listing = "   19.0.0+1 \tw_2020_01 current\n\
                       \x20  18.1.0\n\
                       \x20  tag:w_2019_40\n\
                       \n\
                       \x20  19.0.0+10   setup\n";

        let stale = stale_versions(listing, "19.0.0+1", "tag:");
        assert_eq!(stale, vec!["18.1.0", "19.0.0+10"]);
    }

    #[test]
    fn test_keep_match_is_exact() {
        let stale = stale_versions("1.0\n1.0.0\n", "1.0", "tag:");
        assert_eq!(stale, vec!["1.0.0"]);
    }

    #[tokio::test]
    async fn test_run_undeclares_everything_but_kept_and_tags() {
        let registry = Arc::new(
            FakeRegistry::new()
                .with_versions("pkgA", &["0.9", "1.0", "tag:current", "1.1"])
                .with_versions("pkgB", &["2.0"])
                .with_versions("pkgC", &["5.0", "6.0"]),
        );
        let closure: Closure = [("pkgA", "1.0"), ("pkgB", "2.0")].into_iter().collect();

        let report = Undeclarer::new(registry.clone(), "tag:", false).run(&closure).await;

        assert_eq!(
            report.undeclared,
            vec![ProductVersion::new("pkgA", "0.9"), ProductVersion::new("pkgA", "1.1")]
        );
        assert_eq!(registry.installed_versions("pkgA"), vec!["1.0", "tag:current"]);
        assert_eq!(registry.installed_versions("pkgC"), vec!["5.0", "6.0"]);
        for (_, version) in registry.undeclared() {
            assert!(!version.contains("tag:"));
        }
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_skipped() {
        let registry = Arc::new(
            FakeRegistry::new()
                .with_versions("pkgA", &["0.8", "0.9", "1.0"])
                .with_failing_undeclare("pkgA", "0.8"),
        );
        let closure: Closure = [("pkgA", "1.0"), ("ghost", "3.0")].into_iter().collect();

        let report = Undeclarer::new(registry.clone(), "tag:", false).run(&closure).await;

        assert_eq!(report.undeclared, vec![ProductVersion::new("pkgA", "0.9")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].target, ProductVersion::new("pkgA", "0.8"));
        assert_eq!(report.query_failures.len(), 1);
        assert_eq!(report.query_failures[0].product, "ghost");
    }

    #[tokio::test]
    async fn test_dry_run_issues_nothing() {
        let registry = Arc::new(FakeRegistry::new().with_versions("pkgA", &["0.9", "1.0"]));
        let closure: Closure = [("pkgA", "1.0")].into_iter().collect();

        let report = Undeclarer::new(registry.clone(), "tag:", true).run(&closure).await;

        assert_eq!(report.undeclared, vec![ProductVersion::new("pkgA", "0.9")]);
        assert!(registry.undeclared().is_empty());
        assert_eq!(registry.installed_versions("pkgA").len(), 2);
    }
}
