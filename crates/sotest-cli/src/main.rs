//! sotest CLI - run tests discovered in compiled shared libraries.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use sotest::Options;

#[derive(Parser)]
#[command(name = "sotest")]
#[command(version, about = "Runs tests exported by shared libraries, each isolated in its own process")]
struct Cli {
    /// Colorize output
    #[arg(short = 'c', long, global = true)]
    color: bool,

    /// Minimize console output by moving the cursor
    #[arg(short = 'm', long, global = true)]
    cursor: bool,

    /// Summarize statistics in prose
    #[arg(short = 'n', long, global = true)]
    nice: bool,

    /// Shorthand for --color --cursor --nice, with output capture enabled
    #[arg(short = 'i', long, global = true)]
    interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every test in the given libraries
    All {
        /// Shared libraries containing tests
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run tests named as `library:test` lines, from a file or stdin
    Named {
        /// File of test lines; stdin when omitted
        path: Option<PathBuf>,
    },

    /// List the tests in the given libraries without running them
    List {
        /// Shared libraries containing tests
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn options(cli: &Cli) -> Options {
    Options {
        use_color: cli.color || cli.interactive,
        use_cursor: cli.cursor || cli.interactive,
        nice_stats: cli.nice || cli.interactive,
        capture: cli.interactive,
        ..Options::default()
    }
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    match &cli.command {
        Commands::All { paths } => Ok(sotest::run_all(paths, &options(cli))?),
        Commands::Named { path } => {
            let options = options(cli);
            match path {
                Some(path) => {
                    let file = File::open(path)
                        .with_context(|| format!("failed to open {}", path.display()))?;
                    Ok(sotest::run_named(BufReader::new(file), &options)?)
                }
                None => Ok(sotest::run_named(io::stdin().lock(), &options)?),
            }
        }
        Commands::List { paths } => {
            sotest::list(paths)?;
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("sotest: {e:#}");
            ExitCode::from(1)
        }
    }
}
