use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::retained::Closure;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ReapReport {
    /// Deleted version directories, or the ones that would have been in a dry run.
    pub removed: Vec<PathBuf>,
    pub failed: Vec<RemovalFailure>,
}

/// Deletes sibling version directories of retained products under
/// `<root>/<flavor>/<product>/<version>`. Products it doesn't know about are
/// never touched.
#[derive(Debug, Clone)]
pub struct Reaper {
    roots: Vec<PathBuf>,
    dry_run: bool,
}

impl Reaper {
    pub fn new(roots: Vec<PathBuf>, dry_run: bool) -> Self {
        Self { roots, dry_run }
    }

    pub fn reap(&self, flavor: &str, closure: &Closure) -> ReapReport {
        let mut report = ReapReport::default();

        for root in &self.roots {
            let flavor_dir = root.join(flavor);
            let products = match list_dirs(&flavor_dir) {
                Ok(products) => products,
                Err(e) => {
                    warn!(path = %flavor_dir.display(), "cannot read installation tree: {}", e);
                    report.failed.push(RemovalFailure {
                        path: flavor_dir,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            info!(path = %flavor_dir.display(), products = products.len(), "scanning installed products");

            for product_dir in products {
                let Some(keep) = product_dir
                    .file_name()
                    .and_then(OsStr::to_str)
                    .and_then(|product| closure.get(product))
                else {
                    continue;
                };

                self.prune_versions(&product_dir, keep, &mut report);
            }
        }

        report
    }

    fn prune_versions(&self, product_dir: &Path, keep: &str, report: &mut ReapReport) {
        let versions = match list_dirs(product_dir) {
            Ok(versions) => versions,
            Err(e) => {
                warn!(path = %product_dir.display(), "cannot list versions: {}", e);
                report.failed.push(RemovalFailure {
                    path: product_dir.to_path_buf(),
                    message: e.to_string(),
                });
                return;
            }
        };

        for version_dir in versions {
            if version_dir.file_name() == Some(OsStr::new(keep)) {
                continue;
            }

            if self.dry_run {
                info!(path = %version_dir.display(), "would remove");
                report.removed.push(version_dir);
                continue;
            }

            info!(path = %version_dir.display(), "removing");
            match fs::remove_dir_all(&version_dir) {
                Ok(()) => report.removed.push(version_dir),
                Err(e) => {
                    warn!(path = %version_dir.display(), "problem removing: {}", e);
                    report.failed.push(RemovalFailure {
                        path: version_dir,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}

// Real directories only; symlinks and plain files are left alone.
fn list_dirs(path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = vec![];
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
