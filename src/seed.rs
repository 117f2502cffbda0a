use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tracing::debug;

use crate::product::ProductVersion;
use crate::registry::Registry;
use crate::retained::RetainedSet;

// product, version, then whatever tags/flags eups prints after them
static TAG_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+(\S+)\s*(.*)$").expect("tag line pattern is valid"));

/// Picks the product/version pairs out of an `eups list -t` listing.
/// Lines that don't look like `product version ...` are skipped.
pub fn parse_tag_listing(listing: &str) -> Vec<ProductVersion> {
    listing
        .lines()
        .filter_map(|line| TAG_LINE.captures(line))
        .map(|caps| ProductVersion::new(&caps[1], &caps[2]))
        .collect()
}

/// Builds the initial retained set from the products listed under `tag`.
pub async fn load(registry: &dyn Registry, tag: &str) -> anyhow::Result<RetainedSet> {
    let listing = registry
        .list_tag(tag)
        .await
        .with_context(|| format!("failed to fetch tag list for tag: {}", tag))?;

    let retained = RetainedSet::new();
    for entry in parse_tag_listing(&listing) {
        if !retained.insert_if_absent(&entry.product, &entry.version) {
            debug!(product = %entry.product, version = %entry.version, "duplicate tag entry ignored");
        }
    }

    Ok(retained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::fake::FakeRegistry;

    #[test]
    fn test_parse_tag_listing() {
        let listing = "afw                   19.0.0+1 \tw_2020_01 current\n\
                       base                  19.0.0\tw_2020_01\n\
                       \n\
                       lonely\n";

        let entries = parse_tag_listing(listing);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ProductVersion::new("afw", "19.0.0+1"));
        assert_eq!(entries[1], ProductVersion::new("base", "19.0.0"));
    }

    #[tokio::test]
    async fn test_load_seeds_retained_set() -> anyhow::Result<()> {
        let registry = FakeRegistry::new().with_tag("w_2020_01", "afw 1.0 w_2020_01\nbase 2.0\nafw 9.9\n");

        let retained = load(&registry, "w_2020_01").await?;
        assert_eq!(retained.len(), 2);
        assert_eq!(retained.version_of("afw").as_deref(), Some("1.0"));
        assert_eq!(retained.version_of("base").as_deref(), Some("2.0"));

        Ok(())
    }

    #[tokio::test]
    async fn test_load_failure_names_tag() {
        let registry = FakeRegistry::new();

        let err = load(&registry, "w_1999_01").await.unwrap_err();
        assert!(err.to_string().contains("w_1999_01"));
    }
}
