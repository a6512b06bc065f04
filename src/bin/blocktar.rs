//! Command-line front end for the blocktar library.
//!
//! `blocktar` archives a directory tree, lists an archive's contents, or
//! writes one member's payload to stdout. It is a thin mapping onto the
//! library's `archive`/`list_files`/`read_file` operations.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use blocktar::{InputStream, DEFAULT_BLOCKING_FACTOR};

/// blocktar
#[derive(Debug, Parser)]
#[clap(name = "blocktar", version)]
struct App {
    /// Blocks per record for archive I/O
    #[clap(long, default_value_t = DEFAULT_BLOCKING_FACTOR)]
    blocking_factor: usize,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Archive a directory tree
    Create {
        /// The tree to archive
        source: PathBuf,
        /// Destination archive; defaults to the source name with a `.tar`
        /// suffix appended when not already present
        destination: Option<PathBuf>,
    },
    /// List the entries of an archive
    List {
        /// The archive to read
        archive: PathBuf,
    },
    /// Write one member's payload to stdout
    Cat {
        /// The archive to read
        archive: PathBuf,
        /// Path of the member, as shown by `list`
        member: String,
    },
}

fn default_destination(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    if source.extension().is_none_or(|ext| ext != "tar") {
        name.push(".tar");
    }
    PathBuf::from(name)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = App::parse();

    match args.cmd {
        Command::Create {
            source,
            destination,
        } => {
            let destination = destination.unwrap_or_else(|| default_destination(&source));
            blocktar::archive_with_blocking_factor(&source, &destination, args.blocking_factor)
                .with_context(|| format!("could not archive {source:?}"))?;
        }
        Command::List { archive } => {
            let mut stream =
                InputStream::open_with_blocking_factor(&archive, args.blocking_factor)
                    .with_context(|| format!("could not open {archive:?}"))?;
            for entry in blocktar::Parser::new(&mut stream).list_files()? {
                println!("{}", entry.path_lossy());
            }
        }
        Command::Cat { archive, member } => {
            let mut stream =
                InputStream::open_with_blocking_factor(&archive, args.blocking_factor)
                    .with_context(|| format!("could not open {archive:?}"))?;
            let mut parser = blocktar::Parser::new(&mut stream);
            let entries = parser.list_files()?;
            let Some(entry) = entries.iter().find(|e| e.path_lossy() == member) else {
                bail!("no member {member:?} in {archive:?}");
            };
            let payload = parser.read_file(entry)?;
            std::io::stdout().write_all(&payload)?;
        }
    }

    Ok(())
}
