use std::path::PathBuf;

use chrono::{Datelike, Local, Weekday};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Result};
use easy_mornings::*;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Edit and inspect an easy-mornings schedule", long_about = None)]
struct Cli {
    /// Schedule file to operate on
    #[arg(short, long, global = true, default_value = "schedule.toml")]
    schedule: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the rules in the schedule
    List,
    /// Add a rule
    Add {
        /// Unique rule name
        name: String,
        /// Level behaviour (constant, increasing, decreasing)
        #[arg(short, long, default_value = "constant")]
        mode: Mode,
        /// Window start (HH:MM, HH:MM:SS or milliseconds)
        #[arg(long)]
        start: Option<String>,
        /// Window end (HH:MM, HH:MM:SS or milliseconds)
        #[arg(long)]
        end: Option<String>,
        /// Keep the rule after it has run
        #[arg(short, long)]
        repeat: bool,
        /// Days (mon,tue,wed,thu,fri,sat,sun,all,weekdays,weekend)
        #[arg(short, long)]
        days: Option<DaySet>,
    },
    /// Remove a rule by name
    Remove {
        name: String,
    },
    /// Validate the schedule and report overlapping rules
    Check,
    /// Show which rule would control the light at a given time
    Preview {
        /// Time of day (HH:MM, HH:MM:SS or milliseconds)
        #[arg(long)]
        at: String,
        /// Day of the week, defaults to today
        #[arg(short, long)]
        day: Option<Weekday>,
    },
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with pretty colors
    let default_filter = if cli.verbose {
        "easy_mornings=debug"
    } else {
        "easy_mornings=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .compact()
        .init();

    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;
    debug!("Parsed command line arguments");

    let storage = TomlFileStorage::new(&cli.schedule);
    let mut store = ScheduleStore::from_records(storage.load()?);

    match cli.command.unwrap_or(Commands::List) {
        Commands::List => {
            if store.is_empty() {
                println!("No rules in {}", cli.schedule.display());
            }
            for rule in store.list() {
                println!("{rule}");
            }
        }
        Commands::Add {
            name,
            mode,
            start,
            end,
            repeat,
            days,
        } => {
            let record = RuleRecord {
                name,
                mode,
                start_time: start.as_deref().map(parse_time_of_day).transpose()?,
                end_time: end.as_deref().map(parse_time_of_day).transpose()?,
                repeat,
                days_of_week: days,
            };
            let rule = ScheduledRule::new(record)?;
            let description = rule.to_string();
            store.add(rule)?;
            save(&storage, &store)?;
            info!("Added {}", description);
        }
        Commands::Remove { name } => {
            if store.remove(&name) {
                save(&storage, &store)?;
                info!("Removed {}", name);
            } else {
                warn!("No rule named {}", name);
            }
        }
        Commands::Check => {
            let overlaps = store.overlaps();
            for (a, b) in &overlaps {
                println!("{} overlaps {}", a.name(), b.name());
            }
            if !overlaps.is_empty() {
                bail!("{} overlapping rule pairs", overlaps.len());
            }
            println!("{} rules, no overlaps", store.len());
        }
        Commands::Preview { at, day } => {
            let now_ms = parse_time_of_day(&at)?;
            let day = day.unwrap_or_else(|| Local::now().weekday());
            let scheduler = Scheduler::new(store);
            match scheduler.preview(now_ms, day) {
                Some((rule, level)) => println!("{} at {:.0}%", rule.name(), level * 100.0),
                None => println!("No rule active at {} on {}", format_time_of_day(now_ms), day),
            }
        }
    }

    Ok(())
}

/// Writes the store back to its schedule file
#[instrument(skip_all)]
fn save(storage: &TomlFileStorage, store: &ScheduleStore) -> Result<()> {
    storage.save(&store.records())?;
    debug!("Saved {} rules to {}", store.len(), storage.path().display());
    Ok(())
}
