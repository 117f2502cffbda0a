mod cleanup;
mod config;
mod product;
mod reaper;
mod registry;
mod resolver;
mod retained;
mod seed;
mod shebang;
mod undeclare;
mod weekly;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cleanup::{Cleanup, CleanupOptions};
use config::Settings;
use registry::{EupsCli, Registry};
use shebang::{ShebangOptions, ShebangRewriter};
use weekly::StackVersionChecker;

/// Maintenance tools for an EUPS software stack.
/// Must be run after sourcing the stack's loadLSST.<shell> script.
#[derive(Parser, Debug)]
#[command(name = "eups-tidy", version)]
struct Cli {
    /// TOML file overriding the default settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Undeclare and delete all products from the stack except those in the
    /// supplied tag and their dependencies
    Cleanup {
        /// Tag to keep
        tag: String,
        /// Report what would be removed without touching anything
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Number of concurrent dependency lookups
        #[arg(short, long)]
        workers: Option<usize>,
        /// Write a JSON report of the run to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Rewrite python shebang lines in the stack to point at the current python
    Shebang {
        /// Only display a list of shebangs found
        #[arg(short, long)]
        list: bool,
        /// Restrict the rewrite to products in this tag
        #[arg(short, long)]
        tag: Option<String>,
        /// Interpreter to use instead of the python found on PATH
        #[arg(long)]
        python: Option<String>,
    },
    /// Compare the newest weekly tag installed with the newest one available
    StackVersion,
}

fn parse_cli() -> Result<Cli, ExitCode> {
    match Cli::try_parse() {
        Ok(cli) => Ok(cli),
        // Usage errors exit with 1; --help and --version keep clap's handling.
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            Err(ExitCode::from(1))
        }
        Err(e) => e.exit(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = match parse_cli() {
        Ok(cli) => cli,
        Err(code) => return Ok(code),
    };

    let settings = Settings::load(cli.config.as_deref())?;
    let registry: Arc<dyn Registry> = Arc::new(EupsCli::new(settings.eups_bin.clone()));

    match cli.command {
        Commands::Cleanup { tag, dry_run, workers, report } => {
            let settings = settings.with_workers(workers)?;
            let options = CleanupOptions {
                workers: settings.workers,
                tag_marker: settings.tag_marker.clone(),
                roots: settings.require_eups_path()?.to_vec(),
                dry_run,
            };

            println!("Checking for extra dependencies of {}", tag);
            let outcome = Cleanup::new(registry, options).run(&tag).await?;

            let verb = if dry_run { "would be" } else { "were" };
            println!(
                "{} products retained ({} pulled in as dependencies)",
                outcome.retained.len(),
                outcome.discovered.len()
            );
            if outcome.removals() == 0 {
                println!("Nothing to remove, the stack is already clean");
            } else {
                println!("{} versions {} undeclared", outcome.undeclared.len(), verb);
                println!("{} directories {} removed", outcome.removed_dirs.len(), verb);
            }
            if outcome.failures() > 0 {
                println!("{} problems were reported, see the log for details", outcome.failures());
            }

            if let Some(path) = report {
                outcome.write(&path)?;
                println!("Report written to {}", path.display());
            }
        }

        Commands::Shebang { list, tag, python } => {
            let roots = settings.require_eups_path()?.to_vec();
            let flavor = registry.flavor().await?;

            let interpreter = match python {
                Some(python) => python,
                None => shebang::default_interpreter().await?,
            };

            let mut dirs = vec![];
            for root in &roots {
                match &tag {
                    Some(tag) => dirs.extend(shebang::tagged_dirs(root, &flavor, tag)?),
                    None => dirs.push(root.join(&flavor)),
                }
            }

            let rewriter = ShebangRewriter::new(
                &interpreter,
                ShebangOptions {
                    list_only: list,
                    workers: settings.shebang.workers,
                    skip_extensions: settings.shebang.skip_extensions.clone(),
                },
            );
            let outcome = rewriter.run(&dirs).await;

            if list {
                for (path, found) in &outcome.found {
                    println!("File: {} Shebang: {}", path.display(), found);
                }
            } else {
                println!("Shebang successfully updated in {} files", outcome.rewritten.len());
            }
        }

        Commands::StackVersion => {
            let checker = StackVersionChecker::new(registry, &settings.pkgroot)?;
            let (installed, available) = checker.check().await?;
            println!("Latest tag installed is {}", installed);
            println!("Latest tag available is {}", available);
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_takes_exactly_one_tag() {
        assert!(Cli::try_parse_from(["eups-tidy", "cleanup"]).is_err());
        assert!(Cli::try_parse_from(["eups-tidy", "cleanup", "w_2020_01", "w_2020_02"]).is_err());

        let cli = Cli::try_parse_from(["eups-tidy", "cleanup", "w_2020_01", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Cleanup { tag, dry_run, workers, .. } => {
                assert_eq!(tag, "w_2020_01");
                assert!(dry_run);
                assert_eq!(workers, None);
            }
            _ => panic!("expected cleanup"),
        }
    }

    #[test]
    fn test_usage_errors_are_reported_on_stderr() {
        let err = Cli::try_parse_from(["eups-tidy", "cleanup"]).unwrap_err();
        assert!(err.use_stderr());

        let help = Cli::try_parse_from(["eups-tidy", "--help"]).unwrap_err();
        assert!(!help.use_stderr());
    }

    #[test]
    fn test_shebang_args() {
        let cli = Cli::try_parse_from(["eups-tidy", "shebang", "--list", "-t", "w_2020_01"]).unwrap();
        match cli.command {
            Commands::Shebang { list, tag, python } => {
                assert!(list);
                assert_eq!(tag.as_deref(), Some("w_2020_01"));
                assert_eq!(python, None);
            }
            _ => panic!("expected shebang"),
        }
    }
}
