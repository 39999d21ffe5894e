use caf_core::blob::state_dir;
use caf_core::*;
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "hfcf")]
#[command(about = "Half-life caffeine tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current caffeine level and active doses (default)
    Status,

    /// Log a dose taken now
    Add {
        /// Dose size in mg (defaults to dose.size_mg from the config)
        #[arg(long)]
        mg: Option<f64>,
    },

    /// Clear all active doses
    Reset {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,

        /// Move an unreadable state file aside instead of failing
        #[arg(long)]
        discard_corrupt: bool,
    },

    /// Keep recomputing and print the level on every tick
    Watch {
        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Print one stored value as JSON (history, totalMg)
    Get {
        key: String,
    },
}

fn main() {
    caf_core::logging::init_with_level("warn");

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    tracing::debug!("Using data directory {:?}", data_dir);

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => cmd_status(&config, &data_dir),
        Commands::Add { mg } => cmd_add(&config, &data_dir, mg),
        Commands::Reset {
            yes,
            discard_corrupt,
        } => cmd_reset(&config, &data_dir, yes, discard_corrupt),
        Commands::Watch { ticks } => cmd_watch(&config, &data_dir, ticks),
        Commands::Get { key } => cmd_get(&config, &data_dir, &key),
    }
}

/// Open the persisted tracker, pointing at the state file if it is unreadable
fn load_tracker(config: &Config, data_dir: &Path) -> Result<Tracker> {
    Tracker::open_in(config, data_dir).map_err(|e| {
        if matches!(e, Error::PersistedStateCorrupt { .. }) {
            eprintln!(
                "State file {} could not be read. Inspect it, or run `hfcf reset --discard-corrupt` to start over.",
                state_file(data_dir).display()
            );
        }
        e
    })
}

/// Open the persisted tracker and bring it up to date
fn open_tracker(config: &Config, data_dir: &Path) -> Result<Tracker> {
    let mut tracker = load_tracker(config, data_dir)?;
    tracker.tick(Utc::now());
    Ok(tracker)
}

fn state_file(data_dir: &Path) -> PathBuf {
    state_dir(data_dir).join(format!("{}.json", STATE_KEY))
}

fn cmd_status(config: &Config, data_dir: &Path) -> Result<()> {
    let tracker = open_tracker(config, data_dir)?;
    display_status(&tracker);
    Ok(())
}

fn cmd_add(config: &Config, data_dir: &Path, mg: Option<f64>) -> Result<()> {
    let mut tracker = open_tracker(config, data_dir)?;
    let now = Utc::now();

    let dose = match mg {
        Some(mg) => tracker.add_dose_of(now, mg)?,
        None => tracker.add_dose(now)?,
    };

    println!("✓ Added {}", format_mg(dose.orig_amount));
    println!("Total: {}", format_mg(tracker.total_mg()));
    Ok(())
}

fn cmd_reset(config: &Config, data_dir: &Path, yes: bool, discard_corrupt: bool) -> Result<()> {
    let mut tracker = match Tracker::open_in(config, data_dir) {
        Ok(tracker) => tracker,
        Err(Error::PersistedStateCorrupt { .. }) if discard_corrupt => {
            let path = state_file(data_dir);
            let aside = path.with_extension("json.corrupt");
            std::fs::rename(&path, &aside)?;
            println!("Moved unreadable state to {}", aside.display());
            Tracker::open_in(config, data_dir)?
        }
        Err(e) => {
            if matches!(e, Error::PersistedStateCorrupt { .. }) {
                eprintln!(
                    "State file {} could not be read. Pass --discard-corrupt to move it aside.",
                    state_file(data_dir).display()
                );
            }
            return Err(e);
        }
    };

    if !yes && !confirm("Reset all doses?")? {
        println!("Reset cancelled");
        return Ok(());
    }

    tracker.reset();
    println!("✓ History reset");
    println!("Total: {}", format_mg(tracker.total_mg()));
    Ok(())
}

fn cmd_watch(config: &Config, data_dir: &Path, ticks: Option<u64>) -> Result<()> {
    let mut tracker = load_tracker(config, data_dir)?;

    tracker.store_mut().subscribe::<TotalMg>(|total, values| {
        println!(
            "{}  Total: {} ({} active)",
            Local::now().format("%H:%M:%S"),
            format_mg(*total),
            values.history.len()
        );
    });

    let ticker = Ticker::new(SystemClock, config.ticker.interval());
    ticker.run(&mut tracker, ticks);
    Ok(())
}

fn cmd_get(config: &Config, data_dir: &Path, key: &str) -> Result<()> {
    let key: Key = key.parse()?;
    let tracker = open_tracker(config, data_dir)?;

    let value = tracker.store().get_json(key)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn display_status(tracker: &Tracker) {
    println!("Total: {}", format_mg(tracker.total_mg()));

    let history = tracker.history();
    if history.is_empty() {
        println!("No active doses");
        return;
    }

    println!();
    for dose in history {
        println!(
            "  {}  {:>8} left of {}",
            format_time(dose.time),
            format_mg(dose.current_amount),
            format_mg(dose.orig_amount)
        );
    }
}

fn format_mg(amount: f64) -> String {
    format!("{:.1}mg", amount)
}

fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
