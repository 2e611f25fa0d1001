use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use shoutrip_core::{platform, Config, RecordingSession, SessionEvent, SessionStatus};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Command-line arguments for shoutrip
#[derive(Parser, Debug)]
#[command(name = "shoutrip")]
#[command(about = "Record a SHOUTcast/Icecast stream into one file per track")]
#[command(version)]
struct Args {
    /// Stream URL, or a .pls/.m3u playlist (URL or local path)
    url: String,

    /// Download directory
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// Append _N when a track with the same name was already saved
    #[arg(short = 'q', long = "sequence")]
    sequence: bool,

    /// Overwrite tracks that were already saved
    #[arg(short = 'o', long = "overwrite")]
    overwrite: bool,

    /// Write ID3 tags (artist, title) into saved tracks
    #[arg(short = 'i', long = "id3")]
    id3: bool,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn init_logging(default_filter: &str) -> Result<PathBuf> {
    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create {:?}", data_dir))?;
    let log_path = platform::log_file();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {:?}", log_path))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    // Status lines already go to stdout; the terminal only needs problems.
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    Ok(log_path)
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "ON"
    } else {
        "OFF"
    }
}

async fn print_events(
    mut rx: mpsc::Receiver<SessionEvent>,
    status: watch::Receiver<SessionStatus>,
    json: bool,
) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => error!("Failed to encode event: {}", e),
            }
            continue;
        }

        match event {
            SessionEvent::Status { message } => println!("{}", message),
            SessionEvent::TrackChanged(track) => {
                println!("Now recording: {} - {}", track.station, track.title);
                println!("{}", *status.borrow());
            }
            SessionEvent::Progress { .. } => {}
            SessionEvent::Finished { error: Some(e) } => eprintln!("Recording stopped: {}", e),
            SessionEvent::Finished { error: None } => println!("{}", *status.borrow()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;

    let log_path = init_logging(&config.logging.filter)?;
    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", config_path);

    if let Some(dir) = args.dir {
        config.recorder.output_dir = dir;
    }
    config.recorder.append_sequence_suffix |= args.sequence;
    config.recorder.overwrite_existing |= args.overwrite;
    config.recorder.write_id3_tag |= args.id3;

    println!(
        "Add Sequence flag is: {}",
        on_off(config.recorder.append_sequence_suffix)
    );
    println!("Add ID3 tag flag is: {}", on_off(config.recorder.write_id3_tag));
    println!("Overwrite flag is: {}", on_off(config.recorder.overwrite_existing));

    std::fs::create_dir_all(&config.recorder.output_dir).with_context(|| {
        format!(
            "failed to create download directory {:?}",
            config.recorder.output_dir
        )
    })?;

    let (mut session, events) = RecordingSession::new(args.url.clone(), &config);
    let printer = tokio::spawn(print_events(events, session.subscribe_status(), args.json));

    let started = tokio::select! {
        r = session.start() => Some(r),
        _ = tokio::signal::ctrl_c() => None,
    };
    let started = match started {
        Some(r) => r,
        None => {
            info!("Interrupted while connecting");
            if let Err(e) = session.stop().await {
                warn!("Failed to stop the connecting session: {}", e);
            }
            drop(session);
            let _ = printer.await;
            return Ok(());
        }
    };
    if let Err(e) = started {
        drop(session);
        let _ = printer.await;
        return Err(e).with_context(|| format!("could not record {}", args.url));
    }

    if let Some(cancel) = session.cancellation() {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping");
                cancel.cancel();
            }
        });
    }

    let outcome = session.wait().await;
    drop(session);
    let _ = printer.await;

    outcome.with_context(|| format!("recording of {} failed", args.url))
}
