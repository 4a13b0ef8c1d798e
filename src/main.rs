use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wpress_oxide::ops;

#[derive(Debug, Parser)]
#[command(name = "wpress", about = "Create, list and extract wpress archives.", version)]
struct Cli {
    /// Show verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(visible_alias = "x", about = "Extract files from an archive")]
    Extract {
        /// Path to the .wpress archive
        input: PathBuf,

        /// Output directory [default: archive name without extension]
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Extract even if the output directory already exists
        #[arg(short, long)]
        force: bool,

        /// Restore file modification times
        #[arg(long)]
        preserve_mtime: bool,
    },

    #[command(visible_alias = "c", about = "Create an archive from a directory")]
    Compress {
        /// Directory to archive
        input: PathBuf,

        /// Output archive [default: directory name with .wpress appended]
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Close the archive with an end of archive block
        #[arg(long)]
        terminator: bool,
    },

    #[command(visible_aliases = ["l", "ls"], about = "List files in an archive")]
    List {
        /// Path to the .wpress archive
        input: PathBuf,
    },
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Extract {
            input,
            out,
            force,
            preserve_mtime,
        } => {
            let out = match out {
                Some(out) => out,
                None => ops::default_extract_dir(&input)?,
            };
            let count = ops::extract_with(&input, &out, force, preserve_mtime)
                .with_context(|| format!("Cannot extract `{}`", input.display()))?;
            println!("Extracted {count} files to {}", out.display());
        }
        Commands::Compress {
            input,
            out,
            terminator,
        } => {
            let out = match out {
                Some(out) => out,
                None => ops::default_archive_path(&input)?,
            };
            let count = ops::compress_with(&input, &out, terminator)
                .with_context(|| format!("Cannot compress `{}`", input.display()))?;
            println!("Archived {count} files into {}", out.display());
        }
        Commands::List { input } => {
            let headers =
                ops::list(&input).with_context(|| format!("Cannot list `{}`", input.display()))?;
            println!("{:>14}  {:>12}  Path", "Size", "Modified");
            for header in headers {
                println!(
                    "{:>14}  {:>12}  {}",
                    header.size(),
                    header.mtime(),
                    header.path().display()
                );
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}
