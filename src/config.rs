use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const EUPS_PATH_VAR: &str = "EUPS_PATH";
pub const EUPS_PKGROOT_VAR: &str = "EUPS_PKGROOT";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Program used for every registry query.
    pub eups_bin: String,
    /// Size of the dependency resolution pool.
    pub workers: usize,
    /// Versions containing this substring are tag references and are never undeclared.
    pub tag_marker: String,
    pub eups_path: Vec<PathBuf>,
    pub pkgroot: Vec<String>,
    pub shebang: ShebangSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShebangSettings {
    pub workers: usize,
    pub skip_extensions: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            eups_bin: "eups".to_string(),
            workers: 4,
            tag_marker: "tag:".to_string(),
            eups_path: Vec::new(),
            pkgroot: Vec::new(),
            shebang: ShebangSettings::default(),
        }
    }
}

impl Default for ShebangSettings {
    fn default() -> Self {
        let skip_extensions = [
            "c", "h", "dox", "html", "rst", "chain", "cpp", "cc", "xml", "hpp", "fits", "js", "png",
            "css",
        ];

        Self {
            workers: 10,
            skip_extensions: skip_extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl Settings {
    /// Reads the optional config file, then lays the stack environment over it.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        settings.apply_env(|key| env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(paths) = lookup(EUPS_PATH_VAR) {
            let roots: Vec<PathBuf> = paths
                .split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
            if !roots.is_empty() {
                self.eups_path = roots;
            }
        }

        if let Some(roots) = lookup(EUPS_PKGROOT_VAR) {
            let roots: Vec<String> = roots
                .split('|')
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            if !roots.is_empty() {
                self.pkgroot = roots;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        if self.shebang.workers == 0 {
            anyhow::bail!("shebang.workers must be at least 1");
        }
        if self.tag_marker.is_empty() {
            anyhow::bail!("tag_marker must not be empty");
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> anyhow::Result<Self> {
        if let Some(workers) = workers {
            self.workers = workers;
            self.validate()?;
        }
        Ok(self)
    }

    pub fn require_eups_path(&self) -> anyhow::Result<&[PathBuf]> {
        if self.eups_path.is_empty() {
            anyhow::bail!("{} is not set - source the stack's loadLSST script first", EUPS_PATH_VAR);
        }
        Ok(&self.eups_path)
    }
}
