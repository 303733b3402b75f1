use anyhow::Result;
use clap::{Parser, Subcommand};
use dmkit_core::batch::{self, BatchOutput, Document};
use dmkit_core::file_utils::read_json;
use dmkit_core::registry::ItemRegistry;
use dmkit_core::{CanonicalEntity, ConversionContext, ConvertConfig};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(
    name = "dmkit",
    version = "0.1.0",
    about = "CLI tool for converting 5etools-style compendium data into canonical entities",
    long_about = None
)]
struct Cli {
    /// Path to TOML conversion config
    #[arg(long, global = true, env = "DMKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Path to log file
    #[arg(long, global = true, default_value = "/tmp/dmkit.log")]
    log_file: PathBuf,

    /// Verbosity level (repeat for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert bestiary files into canonical monsters
    ConvertMonsters {
        /// Bestiary JSON files or directories
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output JSON file
        #[arg(long)]
        output: PathBuf,
    },

    /// Convert item, base item and magic variant files into canonical items
    ConvertItems {
        /// Item JSON files or directories
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output JSON file
        #[arg(long)]
        output: PathBuf,
    },

    /// Convert class files into canonical classes
    ConvertClasses {
        /// Class JSON files or directories
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output JSON file
        #[arg(long)]
        output: PathBuf,
    },

    /// Convert race files into canonical races
    ConvertRaces {
        /// Race JSON files or directories
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Output JSON file
        #[arg(long)]
        output: PathBuf,
    },

    /// Check that a converted file reads back unchanged
    Verify {
        /// Converted JSON file
        #[arg(long)]
        input: PathBuf,
    },

    /// Look an item up by name or name|source
    LookupItem {
        /// Converted items JSON file
        #[arg(long)]
        items: PathBuf,
        /// Item name, optionally followed by |source
        name: String,
    },
}

fn setup_logging(verbose: u8, log_file: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter_level = match verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(filter_level.into());

    let file_appender = tracing_appender::rolling::never(
        log_file.parent().unwrap_or(Path::new(".")),
        log_file.file_name().unwrap_or(std::ffi::OsStr::new("dmkit.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().with_writer(std::io::stderr).with_ansi(true))
        .with(fmt::Layer::new().with_writer(non_blocking).with_ansi(false));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(guard)
}

fn load_context(config: Option<&Path>) -> Result<ConversionContext> {
    let config = match config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {:?}", path);
            }
            ConvertConfig::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
        None => ConvertConfig::default(),
    };
    Ok(ConversionContext::new(config))
}

fn run_conversion<F>(
    input: &[PathBuf],
    output: &Path,
    default_section: &str,
    ctx: &ConversionContext,
    convert: F,
) -> Result<()>
where
    F: Fn(&[Document], &ConversionContext) -> dmkit_core::Result<BatchOutput>,
{
    let documents = batch::load_documents(input, default_section)?;
    let result = convert(&documents, ctx)?;
    batch::write_entities(output, &result.entities)?;
    info!(
        "Successfully converted {} {} record(s) ({} skipped, {} failed)",
        result.stats.converted, default_section, result.stats.skipped, result.stats.failed
    );
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = setup_logging(cli.verbose, &cli.log_file)?;

    info!("Starting dmkit CLI");

    match cli.command {
        Commands::ConvertMonsters { input, output } => {
            let ctx = load_context(cli.config.as_deref())?;
            run_conversion(&input, &output, "monster", &ctx, batch::convert_monsters)?;
        }
        Commands::ConvertItems { input, output } => {
            let ctx = load_context(cli.config.as_deref())?;
            run_conversion(&input, &output, "item", &ctx, batch::convert_items)?;
        }
        Commands::ConvertClasses { input, output } => {
            let ctx = load_context(cli.config.as_deref())?;
            run_conversion(&input, &output, "class", &ctx, batch::convert_classes)?;
        }
        Commands::ConvertRaces { input, output } => {
            let ctx = load_context(cli.config.as_deref())?;
            run_conversion(&input, &output, "race", &ctx, batch::convert_races)?;
        }
        Commands::Verify { input } => {
            if !input.exists() {
                anyhow::bail!("Input file not found: {:?}", input);
            }
            let report = batch::verify_file(&input)?;
            println!("{}: {} entities round-trip cleanly", input.display(), report.count);
            if !report.duplicates.is_empty() {
                anyhow::bail!(
                    "{} duplicate key(s): {}",
                    report.duplicates.len(),
                    report.duplicates.join(", ")
                );
            }
        }
        Commands::LookupItem { items, name } => {
            let entities: Vec<CanonicalEntity> = serde_json::from_value(read_json(&items)?)?;
            let items: Vec<_> = entities
                .into_iter()
                .filter_map(|entity| match entity {
                    CanonicalEntity::Item(item) => Some(item),
                    _ => None,
                })
                .collect();
            let registry = ItemRegistry::new(items);
            info!("Loaded {} items", registry.len());

            match registry.lookup(&name) {
                Some(item) => println!("{}", serde_json::to_string_pretty(item)?),
                None => anyhow::bail!("No item named '{}'", name),
            }
        }
    }

    info!("dmkit CLI finished");
    Ok(())
}
