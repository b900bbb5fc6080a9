//! Point d'entrée CLI pour postal-lookup

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::Commands;

/// Charger les codes postaux OpenStreetMap dans PostgreSQL
#[derive(Parser)]
#[command(name = "postal-lookup")]
#[command(author, version)]
#[command(about = "Load OpenStreetMap postal codes into a PostgreSQL lookup table")]
#[command(long_about = "Streams a GeoJSON export of an OSM extract, keeps Point features carrying a postal code and loads them in batches into postal_lookup (postcode, lat, lon).\n\nUse 'convert' to produce the GeoJSON with osmium, or 'run' to do both.")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Load { input, options } => {
            cli::cmd_load(input, options).await?;
        }
        Commands::Convert {
            input,
            output,
            osmium,
        } => {
            info!(input = %input.display(), output = %output.display(), "Conversion vers GeoJSON");
            cli::cmd_convert(&input, &output, &osmium).await?;
        }
        Commands::Run {
            input,
            workdir,
            osmium,
            options,
        } => {
            info!(input = %input.display(), workdir = %workdir.display(), "Conversion puis chargement");
            cli::cmd_run(&input, &workdir, &osmium, options).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
