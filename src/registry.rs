use std::fmt;
use std::process::ExitStatus;

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

/// Everything the cleanup tools need from the package manager. Every query
/// returns the tool's raw line-oriented output; callers own the parsing.
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    /// Products and versions making up `tag`.
    async fn list_tag(&self, tag: &str) -> anyhow::Result<String>;
    /// Dependencies of one installed product version.
    async fn list_dependencies(&self, product: &str, version: &str) -> anyhow::Result<String>;
    /// Every version of `product` the registry knows about, tag references included.
    async fn list_versions(&self, product: &str) -> anyhow::Result<String>;
    async fn undeclare(&self, product: &str, version: &str) -> anyhow::Result<()>;
    /// Platform identifier selecting the installation subtree.
    async fn flavor(&self) -> anyhow::Result<String>;
    async fn tags(&self) -> anyhow::Result<String>;
}

/// A registry query that failed and was treated as returning nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryFailure {
    pub operation: &'static str,
    pub product: String,
    pub version: Option<String>,
    pub message: String,
}

#[derive(Debug)]
pub enum QueryError {
    Spawn {
        command: String,
        source: std::io::Error,
    },
    Status {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { command, source } => write!(f, "failed to execute `{}`: {}", command, source),
            Self::Status { command, status, stderr } if stderr.is_empty() => {
                write!(f, "`{}` exited with {}", command, status)
            }
            Self::Status { command, status, stderr } => {
                write!(f, "`{}` exited with {}: {}", command, status, stderr)
            }
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn { source, .. } => Some(source),
            Self::Status { .. } => None,
        }
    }
}

/// Talks to the registry by running the `eups` command line tool.
#[derive(Debug, Clone)]
pub struct EupsCli {
    program: String,
}

impl EupsCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    async fn run(&self, args: &[&str]) -> Result<String, QueryError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!(%command, "running registry query");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| QueryError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(QueryError::Status {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait::async_trait]
impl Registry for EupsCli {
    async fn list_tag(&self, tag: &str) -> anyhow::Result<String> {
        Ok(self.run(&["list", "-t", tag]).await?)
    }

    async fn list_dependencies(&self, product: &str, version: &str) -> anyhow::Result<String> {
        Ok(self.run(&["list", "-D", product, version]).await?)
    }

    async fn list_versions(&self, product: &str) -> anyhow::Result<String> {
        Ok(self.run(&["list", product]).await?)
    }

    async fn undeclare(&self, product: &str, version: &str) -> anyhow::Result<()> {
        self.run(&["undeclare", product, version]).await?;
        Ok(())
    }

    async fn flavor(&self) -> anyhow::Result<String> {
        let output = self.run(&["flavor"]).await?;
        Ok(output.trim_end_matches(['\n', '\r']).to_string())
    }

    async fn tags(&self) -> anyhow::Result<String> {
        Ok(self.run(&["tags"]).await?)
    }
}

/// In-memory registry used by the unit tests across the crate.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use super::Registry;

    #[derive(Debug, Default)]
    pub struct FakeRegistry {
        tags: HashMap<String, String>,
        dependencies: HashMap<(String, String), String>,
        failing_dependencies: HashSet<String>,
        failing_undeclares: HashSet<(String, String)>,
        versions: Mutex<HashMap<String, Vec<String>>>,
        flavor: Option<String>,
        tag_names: String,
        dependency_queries: Mutex<HashMap<String, usize>>,
        undeclared: Mutex<Vec<(String, String)>>,
    }

    impl FakeRegistry {
        pub fn new() -> Self {
            Self {
                flavor: Some("Linux64".to_string()),
                ..Self::default()
            }
        }

        pub fn with_tag(mut self, tag: &str, listing: &str) -> Self {
            self.tags.insert(tag.to_string(), listing.to_string());
            self
        }

        pub fn with_dependencies(mut self, product: &str, version: &str, listing: &str) -> Self {
            self.dependencies
                .insert((product.to_string(), version.to_string()), listing.to_string());
            self
        }

        pub fn with_failing_dependencies(mut self, product: &str) -> Self {
            self.failing_dependencies.insert(product.to_string());
            self
        }

        pub fn with_versions(self, product: &str, versions: &[&str]) -> Self {
            self.versions
                .lock()
                .unwrap()
                .insert(product.to_string(), versions.iter().map(|v| v.to_string()).collect());
            self
        }

        pub fn with_failing_undeclare(mut self, product: &str, version: &str) -> Self {
            self.failing_undeclares
                .insert((product.to_string(), version.to_string()));
            self
        }

        pub fn without_flavor(mut self) -> Self {
            self.flavor = None;
            self
        }

        pub fn with_tag_names(mut self, names: &str) -> Self {
            self.tag_names = names.to_string();
            self
        }

        pub fn dependency_queries(&self, product: &str) -> usize {
            self.dependency_queries
                .lock()
                .unwrap()
                .get(product)
                .copied()
                .unwrap_or(0)
        }

        pub fn total_dependency_queries(&self) -> usize {
            self.dependency_queries.lock().unwrap().values().sum()
        }

        pub fn undeclared(&self) -> Vec<(String, String)> {
            self.undeclared.lock().unwrap().clone()
        }

        pub fn installed_versions(&self, product: &str) -> Vec<String> {
            self.versions
                .lock()
                .unwrap()
                .get(product)
                .cloned()
                .unwrap_or_default()
        }
    }

    #[async_trait::async_trait]
    impl Registry for FakeRegistry {
        async fn list_tag(&self, tag: &str) -> anyhow::Result<String> {
            match self.tags.get(tag) {
                Some(listing) => Ok(listing.clone()),
                None => anyhow::bail!("no such tag: {}", tag),
            }
        }

        async fn list_dependencies(&self, product: &str, version: &str) -> anyhow::Result<String> {
            *self
                .dependency_queries
                .lock()
                .unwrap()
                .entry(product.to_string())
                .or_default() += 1;

            // Let other workers interleave with this one.
            tokio::task::yield_now().await;

            if self.failing_dependencies.contains(product) {
                anyhow::bail!("dependency query for {} failed", product);
            }

            Ok(self
                .dependencies
                .get(&(product.to_string(), version.to_string()))
                .cloned()
                .unwrap_or_default())
        }

        async fn list_versions(&self, product: &str) -> anyhow::Result<String> {
            match self.versions.lock().unwrap().get(product) {
                Some(versions) => Ok(versions
                    .iter()
                    .map(|v| format!("   {}  \tsetup\n", v))
                    .collect()),
                None => anyhow::bail!("no product {} declared", product),
            }
        }

        async fn undeclare(&self, product: &str, version: &str) -> anyhow::Result<()> {
            if self
                .failing_undeclares
                .contains(&(product.to_string(), version.to_string()))
            {
                anyhow::bail!("cannot undeclare {} {}", product, version);
            }

            if let Some(versions) = self.versions.lock().unwrap().get_mut(product) {
                versions.retain(|v| v != version);
            }
            self.undeclared
                .lock()
                .unwrap()
                .push((product.to_string(), version.to_string()));
            Ok(())
        }

        async fn flavor(&self) -> anyhow::Result<String> {
            match &self.flavor {
                Some(flavor) => Ok(flavor.clone()),
                None => anyhow::bail!("eups flavor failed"),
            }
        }

        async fn tags(&self) -> anyhow::Result<String> {
            Ok(self.tag_names.clone())
        }
    }
}
