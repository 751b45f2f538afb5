use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::Result;
use easy_mornings::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Light scheduler daemon, controlled line by line over stdin
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Schedule file, overrides `schedule_file` from the configuration
    #[arg(short, long)]
    schedule: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "easy_mornings=debug,emd=debug"
    } else {
        "easy_mornings=info,emd=info"
    };
    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    color_eyre::install()?;

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::default(),
    };
    debug!("Using {:?}", config);

    let storage: Arc<dyn Storage> = match args.schedule.or(config.schedule_file.clone()) {
        Some(path) => {
            info!("Schedule file: {}", path.display());
            Arc::new(TomlFileStorage::new(path))
        }
        None => {
            warn!("No schedule file configured, rules will not survive a restart");
            Arc::new(MemoryStorage::default())
        }
    };

    let service = LightService::open(storage, Arc::new(SystemClock))?;
    let control = service.control_loop(config.sink.open()?, config.polling);
    let control_task = tokio::spawn(control.run());

    // Inform about successful initialization
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"OK\n").await?;
    stdout.flush().await?;

    // Mainloop: wait for user input, line by line
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            debug!("End of input");
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        for reply in respond(&service, line) {
            stdout.write_all(reply.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
    }

    control_task.abort();
    info!("Shutting down");
    Ok(())
}
