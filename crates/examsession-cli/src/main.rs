//! examsession CLI: take timed exams and inspect their results.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;
mod render;

#[derive(Parser)]
#[command(name = "examsession", version, about = "Timed exam session client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take an exam attempt interactively
    Take {
        /// Attempt identifier
        #[arg(long)]
        attempt: String,

        /// Save the final result as JSON
        #[arg(long)]
        save: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the scored result of a finalized attempt
    Result {
        /// Attempt identifier
        #[arg(long)]
        attempt: String,

        /// Output format: text, json, markdown, html
        #[arg(long, default_value = "text")]
        format: String,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show progress and remaining time of an attempt
    Status {
        /// Attempt identifier
        #[arg(long)]
        attempt: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter config
    Init,
}

#[tokio::main]
async fn main() {
    let directive = match "examsession=info".parse() {
        Ok(directive) => directive,
        Err(e) => {
            eprintln!("Error: invalid log directive: {e}");
            process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Take {
            attempt,
            save,
            config,
        } => commands::take::execute(attempt, save, config).await,
        Commands::Result {
            attempt,
            format,
            output,
            config,
        } => commands::result::execute(attempt, format, output, config).await,
        Commands::Status {
            attempt,
            json,
            config,
        } => commands::status::execute(attempt, json, config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }

    // A blocking stdin read left over from `take` would keep the runtime alive.
    process::exit(0);
}
