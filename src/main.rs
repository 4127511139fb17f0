use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lastfm_relay::config::Config;
use lastfm_relay::playback::{PlaybackEvent, PlaybackTracker};
use lastfm_relay::queue::{DrainReport, DrainSkip};
use lastfm_relay::scrobbler::{lastfm_auth, TrackInfo};
use lastfm_relay::service::ScrobbleService;
use lastfm_relay::text_cleanup::TextCleaner;
use log::LevelFilter;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file
    ///
    /// [default: lastfm_relay.toml in the user config directory]
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging (same as `debug = true` in the config)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read playback events as JSON lines from stdin and scrobble them (default)
    Run,
    /// Connect a Last.fm account
    Auth,
    /// Print the authorization URL without starting the flow
    AuthUrl,
    /// Show session and queue state
    Status,
    /// Queue a scrobble and try to deliver it
    Scrobble(TrackArgs),
    /// Send a now playing notification
    NowPlaying(TrackArgs),
    /// Run one delivery cycle now
    Flush,
    /// Drop every pending scrobble
    ClearQueue,
    /// Forget the stored session
    Logout,
}

#[derive(clap::Args, Debug)]
struct TrackArgs {
    #[arg(long)]
    artist: String,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    album: String,
    #[arg(long, default_value = "")]
    album_artist: String,
    /// Track length in seconds
    #[arg(long, default_value_t = 0)]
    duration: u32,
    #[arg(long, default_value_t = 0)]
    track_number: u32,
    /// When playback started, in epoch seconds [default: now]
    #[arg(long)]
    timestamp: Option<i64>,
}

impl TrackArgs {
    fn into_track(self) -> TrackInfo {
        TrackInfo::new(self.artist, self.title)
            .with_album(self.album)
            .with_album_artist(self.album_artist)
            .with_duration(self.duration)
            .with_track_number(self.track_number)
            .with_timestamp(self.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp()))
    }
}

/// `RUST_LOG` wins; otherwise info, or debug for this crate when asked for
fn init_logger(debug: bool) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    if debug && std::env::var_os(env_logger::DEFAULT_FILTER_ENV).is_none() {
        logger.filter_module("lastfm_relay", LevelFilter::Debug);
    }
    logger.init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    let config = Config::load_from(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_logger(cli.verbose || config.debug);
    log::debug!("Config loaded from {:?}", config_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(&config, &config_path),
        Command::Auth => {
            let service = ScrobbleService::open(&config, Some(config_path.as_path()))?;
            let stdin = io::stdin();
            lastfm_auth::authenticate(service.client(), &mut stdin.lock(), &mut io::stdout())?;
            Ok(())
        }
        Command::AuthUrl => {
            let service = ScrobbleService::open(&config, Some(config_path.as_path()))?;
            let client = service.client();
            let token = client
                .request_token()
                .context("Failed to request an authentication token")?;
            println!("{}", client.auth_url(Some(&token)));
            println!("Token: {}", token);
            Ok(())
        }
        Command::Status => status(&config, &config_path),
        Command::Scrobble(args) => {
            let service = ScrobbleService::open(&config, Some(config_path.as_path()))?;
            let report = service.submit(args.into_track());
            print_report(&report);
            Ok(())
        }
        Command::NowPlaying(args) => {
            let service = ScrobbleService::open(&config, Some(config_path.as_path()))?;
            service
                .client()
                .update_now_playing(&args.into_track())
                .context("Now playing update failed")?;
            println!("Now playing updated");
            Ok(())
        }
        Command::Flush => {
            let service = ScrobbleService::open(&config, Some(config_path.as_path()))?;
            print_report(&service.flush());
            Ok(())
        }
        Command::ClearQueue => {
            let service = ScrobbleService::open(&config, Some(config_path.as_path()))?;
            let dropped = service.queue().size();
            service.queue().clear();
            println!("Dropped {} pending scrobbles", dropped);
            Ok(())
        }
        Command::Logout => {
            let service = ScrobbleService::open(&config, Some(config_path.as_path()))?;
            service.logout();
            println!("Logged out");
            Ok(())
        }
    }
}

fn run(config: &Config, config_path: &Path) -> Result<()> {
    let service = ScrobbleService::start(config, Some(config_path))?;
    let mut tracker = PlaybackTracker::new(
        config.enabled,
        config.scrobble_threshold,
        TextCleaner::new(&config.cleanup),
    );

    log::info!("Reading playback events from stdin");
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<PlaybackEvent>(&line) {
            Ok(event) => {
                let now = chrono::Utc::now().timestamp();
                if let Some(action) = tracker.handle(event, service.is_authenticated(), now) {
                    service.handle_action(action);
                }
            }
            Err(e) => log::warn!("Ignoring malformed event: {}", e),
        }
        service.replies().run_pending();
    }

    log::info!("Input closed, shutting down");
    service.shutdown();
    Ok(())
}

fn status(config: &Config, config_path: &Path) -> Result<()> {
    let service = ScrobbleService::open(config, Some(config_path))?;

    match (service.is_authenticated(), service.account_name()) {
        (true, Some(name)) => println!("Authenticated as {}", name),
        (true, None) => println!("Authenticated"),
        (false, _) => println!("Not authenticated"),
    }
    println!("Session file: {}", service.session_store().path().display());
    println!("Queue file:   {}", service.queue().path().display());

    let pending = service.queue().snapshot();
    println!("Pending scrobbles: {}", pending.len());
    for item in &pending {
        println!(
            "  {} (played {}, {} failed attempts)",
            item.track, item.track.timestamp, item.retry_count
        );
    }
    Ok(())
}

fn print_report(report: &DrainReport) {
    match report.skipped {
        Some(DrainSkip::NotAuthenticated) => println!("Not authenticated, nothing sent"),
        Some(DrainSkip::Offline) => println!("Offline, nothing sent"),
        Some(DrainSkip::Empty) => println!("Queue is empty"),
        None => println!(
            "Delivered {}, failed {}, abandoned {}",
            report.delivered, report.failed, report.abandoned
        ),
    }
    println!("{} scrobbles pending", report.remaining);
}
