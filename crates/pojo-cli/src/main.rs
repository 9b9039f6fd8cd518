//! pojoize: component bytecode manipulator
//!
//! Turns plain Java classes into managed components: fields are routed
//! through an instance manager, constructors receive the manager, and the
//! bundle manifest gains the component metadata and imports.

use clap::{Parser, Subcommand};
use pojo_cli::commands::{bundle, manipulate, parse, scan};
use pojo_cli::load_config;
use pojo_cli::output::{resolve_color_choice, StyledOutput};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pojoize")]
#[command(about = "Component bytecode manipulator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./pojo.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// When to use colors
    #[arg(long, global = true, value_parser = ["auto", "always", "never"])]
    color: Option<String>,

    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse component metadata and print it back
    Parse {
        /// Metadata text
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        text: Option<String>,
        /// Read the metadata from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Treat the text as a whole iPOJO-Components header
        #[arg(long)]
        header: bool,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List the packages and bundle activator of class files
    Scan {
        /// Class files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Class output directory the files are relative to
        #[arg(long)]
        root: Option<PathBuf>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Manipulate one class file
    Manipulate {
        /// Input class file
        file: PathBuf,
        /// Output class file
        #[arg(short, long)]
        output: PathBuf,
        /// Write the Manipulation element to this file
        #[arg(long)]
        metadata_out: Option<PathBuf>,
    },

    /// Manipulate every component of a bundle archive
    Bundle {
        /// Input bundle (jar)
        input: PathBuf,
        /// Output bundle (jar)
        #[arg(short, long)]
        output: PathBuf,
        /// Component metadata (instead of the iPOJO-Components header)
        #[arg(long)]
        metadata: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut out = StyledOutput::new(resolve_color_choice(cli.color.as_deref()));
    if let Err(e) = run(cli, &mut out) {
        out.stderr_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli, out: &mut StyledOutput) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Parse {
            text,
            file,
            header,
            json,
        } => parse::execute(text, file.as_deref(), header, json, out),

        Commands::Scan { files, root, json } => {
            scan::execute(&files, root.as_deref(), json, &config.scan, out)
        }

        Commands::Manipulate {
            file,
            output,
            metadata_out,
        } => manipulate::execute(
            &file,
            &output,
            metadata_out.as_deref(),
            &config.manipulation,
            out,
        ),

        Commands::Bundle {
            input,
            output,
            metadata,
        } => bundle::execute(&input, &output, metadata.as_deref(), &config, out),
    }
}
