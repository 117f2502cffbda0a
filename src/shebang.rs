use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::Context;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// The file has to open with the shebang; the match runs to the last
// `python` on that first line.
static PYTHON_SHEBANG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#!(.*python)").expect("shebang pattern is valid"));
static ENV_SHEBANG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s?/usr/bin/env").expect("env pattern is valid"));
static CHAIN_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"VERSION = (.*)").expect("chain version pattern is valid"));

const SNIFF_LEN: usize = 512;

/// Interpreter named by a rewritable python shebang at the top of `content`.
/// `#!/usr/bin/env python` style lines are left alone.
pub fn find_shebang(content: &str) -> Option<&str> {
    let caps = PYTHON_SHEBANG.captures(content)?;
    let interpreter = caps.get(1)?.as_str();
    if ENV_SHEBANG.is_match(interpreter) {
        return None;
    }
    Some(interpreter)
}

/// `content` with its python shebang replaced by `replacement`, or `None`
/// when nothing would change.
pub fn rewrite(content: &str, replacement: &str) -> Option<String> {
    find_shebang(content)?;
    let end = PYTHON_SHEBANG.find(content)?.end();

    let rewritten = format!("{}{}", replacement, &content[end..]);
    if rewritten == content {
        return None;
    }
    Some(rewritten)
}

/// Rough "text/plain; charset=utf-8" check on the first bytes of a file.
pub fn looks_like_text(head: &[u8]) -> bool {
    let binary = head
        .iter()
        .any(|&b| matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F));
    if binary {
        return false;
    }

    match std::str::from_utf8(head) {
        Ok(_) => true,
        // A multi-byte character cut off by the sniff window is still text.
        Err(e) => e.error_len().is_none(),
    }
}

#[derive(Debug, Default)]
pub struct ShebangReport {
    pub scanned: usize,
    pub rewritten: Vec<PathBuf>,
    /// (file, interpreter) pairs found in list mode.
    pub found: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone)]
pub struct ShebangOptions {
    pub list_only: bool,
    pub workers: usize,
    pub skip_extensions: Vec<String>,
}

enum Outcome {
    Skipped,
    Unchanged,
    Rewritten(PathBuf),
    Found(PathBuf, String),
}

pub struct ShebangRewriter {
    shebang_line: Arc<str>,
    options: ShebangOptions,
}

impl ShebangRewriter {
    /// `interpreter` is the path to put after `#!`.
    pub fn new(interpreter: &str, options: ShebangOptions) -> Self {
        Self {
            shebang_line: Arc::from(format!("#!{}", interpreter)),
            options,
        }
    }

    /// Every regular file under `dirs` that isn't excluded by extension.
    pub fn candidates(&self, dirs: &[PathBuf]) -> Vec<PathBuf> {
        let skip: HashSet<&str> = self.options.skip_extensions.iter().map(String::as_str).collect();

        dirs.iter()
            .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map_or(true, |ext| !skip.contains(ext))
            })
            .map(|e| e.into_path())
            .collect()
    }

    pub async fn run(&self, dirs: &[PathBuf]) -> ShebangReport {
        let mut report = ShebangReport::default();
        let mut pending = self.candidates(dirs).into_iter();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < self.options.workers {
                let Some(path) = pending.next() else {
                    break;
                };
                report.scanned += 1;
                let shebang_line = Arc::clone(&self.shebang_line);
                let list_only = self.options.list_only;
                in_flight.spawn(async move { process(path, &shebang_line, list_only).await });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok(Outcome::Rewritten(path)) => report.rewritten.push(path),
                Ok(Outcome::Found(path, interpreter)) => report.found.push((path, interpreter)),
                Ok(Outcome::Skipped | Outcome::Unchanged) => {}
                Err(e) => warn!("shebang worker did not finish: {}", e),
            }
        }

        report.rewritten.sort();
        report.found.sort();
        info!(scanned = report.scanned, rewritten = report.rewritten.len(), "shebang scan finished");
        report
    }
}

async fn process(path: PathBuf, shebang_line: &str, list_only: bool) -> Outcome {
    let mut head = vec![0u8; SNIFF_LEN];
    let read = match tokio::fs::File::open(&path).await {
        Ok(mut file) => file.read(&mut head).await,
        Err(e) => Err(e),
    };
    let n = match read {
        Ok(n) if n > 0 => n,
        _ => return Outcome::Skipped,
    };
    if !looks_like_text(&head[..n]) {
        return Outcome::Skipped;
    }

    let Ok(content) = tokio::fs::read_to_string(&path).await else {
        return Outcome::Skipped;
    };

    if list_only {
        return match find_shebang(&content) {
            Some(interpreter) => Outcome::Found(path, interpreter.to_string()),
            None => Outcome::Unchanged,
        };
    }

    let Some(rewritten) = rewrite(&content, shebang_line) else {
        return Outcome::Unchanged;
    };

    match tokio::fs::write(&path, rewritten).await {
        Ok(()) => {
            debug!(path = %path.display(), "rewrote shebang");
            Outcome::Rewritten(path)
        }
        Err(e) => {
            warn!(path = %path.display(), "could not rewrite shebang: {}", e);
            Outcome::Skipped
        }
    }
}

/// Directories holding the versions of every product declared under `tag`
/// in `<root>/ups_db/<product>/<tag>.chain`.
pub fn tagged_dirs(root: &Path, flavor: &str, tag: &str) -> anyhow::Result<Vec<PathBuf>> {
    let ups_db = root.join("ups_db");
    let entries = fs::read_dir(&ups_db)
        .with_context(|| format!("failed to read {}", ups_db.display()))?;

    let mut dirs = vec![];
    for entry in entries {
        let entry = entry?;
        let chain = entry.path().join(format!("{}.chain", tag));
        let Ok(data) = fs::read_to_string(&chain) else {
            continue;
        };
        let Some(caps) = CHAIN_VERSION.captures(&data) else {
            continue;
        };
        dirs.push(root.join(flavor).join(entry.file_name()).join(caps[1].trim()));
    }

    dirs.sort();
    Ok(dirs)
}

/// Absolute path of the `python` found on PATH.
pub async fn default_interpreter() -> anyhow::Result<String> {
    let output = Command::new("which")
        .arg("python")
        .output()
        .await
        .context("failed to execute which")?;
    if !output.status.success() {
        anyhow::bail!("no python found on PATH");
    }

    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if path.is_empty() {
        anyhow::bail!("no python found on PATH");
    }
    Ok(path)
}
