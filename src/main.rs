//! The `restree` command line: browse a resource tree from the shell.
//!
//! ```text
//! restree --server https://central.xnat.org list /projects/CENTRAL_OASIS_CS/subjects --pattern 'OAS1_00*'
//! restree show /projects/P1/subjects/S1
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use restree::{Interface, Result, Selection, Settings};

#[derive(Parser)]
#[command(name = "restree", version, about = "Browse a hierarchical REST resource tree")]
struct Cli {
    /// Configuration file, layered under RESTREE_* environment variables.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server: Option<String>,
    /// Surface transport faults instead of skipping over them.
    #[arg(long)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the members of a collection path, e.g. /projects/P1/subjects.
    List {
        path: String,
        #[arg(long, default_value = "*")]
        pattern: String,
    },
    /// Print the XML document of an element path.
    Show { path: String },
    /// Tell whether an element path exists.
    Exists { path: String },
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.config.as_deref())?.with_debug(cli.debug);
    if let Some(server) = cli.server {
        settings.server = server.trim_end_matches('/').to_string();
    }
    let intf = Interface::connect(settings)?;

    match cli.command {
        Command::List { path, pattern } => {
            let collection = match intf.select(&path)? {
                Selection::Collection(collection) => collection,
                Selection::Element(element) => {
                    println!("{} (element)", element.uri());
                    return Ok(());
                }
            };
            for element in collection.with_pattern(&pattern).try_collect()? {
                println!("{}", element.uri());
            }
        }
        Command::Show { path } => match intf.select(&path)? {
            Selection::Element(element) => println!("{}", element.get()?),
            Selection::Collection(collection) => {
                for element in collection.try_collect()? {
                    println!("{}", element.uri());
                }
            }
        },
        Command::Exists { path } => {
            let exists = match intf.select(&path)? {
                Selection::Element(element) => element.exists(),
                Selection::Collection(collection) => collection.first().is_some(),
            };
            println!("{exists}");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
