//! faceid CLI - seed identity stores, build the vector index, match and
//! enroll faces from the command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    BenchCommand, BuildIndexCommand, EnrollCommand, MatchCommand, SeedCommand, StatsCommand,
};

/// faceid CLI - identify people from face embeddings.
///
/// Identities live in a JSON file (see --store). Matching switches from an
/// exact scan to the HNSW index once the store holds at least
/// `index_min_identities` people.
#[derive(Parser)]
#[command(name = "faceid")]
#[command(about = "Face embedding matching CLI tool")]
#[command(version)]
pub struct Cli {
    /// Matcher config file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Identity store file
    #[arg(long, global = true, default_value = "./storage/identities.json")]
    pub store: String,

    /// Index file (overrides config)
    #[arg(long, global = true)]
    pub index: Option<String>,

    /// Output file (default: stdout)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<String>,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fill the identity store with random identities
    Seed(SeedCommand),
    /// Build the vector index from the store and save it
    BuildIndex(BuildIndexCommand),
    /// Identify the face in an embedding file
    Match(MatchCommand),
    /// Add an embedding to an identity
    Enroll(EnrollCommand),
    /// Compare exact and indexed matching on the current store
    Bench(BenchCommand),
    /// Show cache and index statistics
    Stats(StatsCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Seed(cmd) => cmd.run(&cli).await,
        Commands::BuildIndex(cmd) => cmd.run(&cli).await,
        Commands::Match(cmd) => cmd.run(&cli).await,
        Commands::Enroll(cmd) => cmd.run(&cli).await,
        Commands::Bench(cmd) => cmd.run(&cli).await,
        Commands::Stats(cmd) => cmd.run(&cli).await,
    }
}
