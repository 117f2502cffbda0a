use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use reqwest::Client;

use crate::registry::Registry;

static REMOTE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">w_(\d{4})_(\d+)\.list<").expect("remote tag pattern is valid"));
static LOCAL_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"w_(\d{4})_(\d+)").expect("local tag pattern is valid"));

/// A weekly release tag, `w_<year>_<week>`. Orders by year, then week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WeeklyTag {
    pub year: u32,
    pub week: u32,
}

impl fmt::Display for WeeklyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w_{}_{:02}", self.year, self.week)
    }
}

fn newest(pattern: &Regex, haystack: &str) -> Option<WeeklyTag> {
    pattern
        .captures_iter(haystack)
        .filter_map(|caps| {
            Some(WeeklyTag {
                year: caps[1].parse().ok()?,
                week: caps[2].parse().ok()?,
            })
        })
        .max()
}

/// Newest tag in a package root's HTML directory listing.
pub fn newest_remote(listing: &str) -> Option<WeeklyTag> {
    newest(&REMOTE_TAG, listing)
}

/// Newest tag in `eups tags` output.
pub fn newest_local(tags: &str) -> Option<WeeklyTag> {
    newest(&LOCAL_TAG, tags)
}

pub struct StackVersionChecker {
    registry: Arc<dyn Registry>,
    client: Client,
    pkgroot: String,
}

impl StackVersionChecker {
    pub fn new(registry: Arc<dyn Registry>, pkgroots: &[String]) -> anyhow::Result<Self> {
        let Some(pkgroot) = pkgroots.first() else {
            anyhow::bail!("EUPS_PKGROOT is not set - source the stack's loadLSST script first");
        };

        let client = Client::builder()
            .user_agent(concat!("eups-tidy/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            registry,
            client,
            pkgroot: pkgroot.clone(),
        })
    }

    async fn remote(&self) -> anyhow::Result<WeeklyTag> {
        let response = self
            .client
            .get(&self.pkgroot)
            .send()
            .await
            .with_context(|| format!("problem fetching pkgroot {}", self.pkgroot))?;
        if !response.status().is_success() {
            anyhow::bail!("problem fetching pkgroot {}: HTTP {}", self.pkgroot, response.status());
        }

        let body = response.text().await?;
        newest_remote(&body).with_context(|| format!("no weekly tags listed at {}", self.pkgroot))
    }

    async fn local(&self) -> anyhow::Result<WeeklyTag> {
        let tags = self.registry.tags().await.context("problem reading local tags")?;
        newest_local(&tags).context("no weekly tags installed locally")
    }

    /// (newest installed, newest available)
    pub async fn check(&self) -> anyhow::Result<(WeeklyTag, WeeklyTag)> {
        tokio::try_join!(self.local(), self.remote())
    }
}
