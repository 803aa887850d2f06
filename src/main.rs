use std::{error::Error, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use futures_util::StreamExt;
use log::{debug, error, info, warn, LevelFilter};
use reqwest::header::AUTHORIZATION;
use url::Url;
use veil::Redact;

use aimusic::{
    config::Config,
    error,
    gateway::Gateway,
    http::Client as HttpClient,
    player::{Player, QueueItem},
    protocol::generate::{GenerationRequest, TaskState},
    session::SessionStore,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// How often a dropped progress stream is reattached before giving up.
const MAX_STREAM_ATTEMPTS: usize = 5;

/// Command line arguments as parsed by `clap`.
///
/// Debug output redacts the password so argument dumps are safe to log.
#[derive(Clone, Parser, Redact)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Description of the track to generate
    prompt: String,

    /// Base URL of the AiMusic service
    #[arg(short, long, value_name = "URL", value_hint = ValueHint::Url, default_value = "http://localhost:8000")]
    server: Url,

    /// Token file
    ///
    /// Where the access/refresh token pair is persisted between runs. Keep
    /// this file secure: it grants access to your account.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("tokens.toml"))]
    tokens_file: String,

    /// Account email, needed when no token pair is stored yet
    #[arg(long, env = "AIMUSIC_EMAIL")]
    email: Option<String>,

    /// Account password, needed when no token pair is stored yet
    #[redact]
    #[arg(long, env = "AIMUSIC_PASSWORD")]
    password: Option<String>,

    /// Lyrics to sing; omit for an instrumental track
    #[arg(short, long)]
    lyrics: Option<String>,

    /// Track length in seconds
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..=300), default_value_t = 60)]
    duration: u64,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Follows one attachment of the progress stream.
///
/// Returns the terminal task state when the task finished, or `None` when
/// the stream dropped before a terminal state arrived.
async fn follow_task(
    http: &HttpClient,
    url: Url,
    access_token: Option<String>,
) -> error::Result<Option<TaskState>> {
    let mut request = http.unlimited.get(url);
    if let Some(access) = access_token {
        request = request.header(AUTHORIZATION, format!("Bearer {access}"));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(error::Error::unavailable(format!(
            "progress stream refused: HTTP {}",
            status.as_u16()
        )));
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut event_name = String::new();
    let mut data = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(position) = buffer.find('\n') {
            let line = buffer[..position].trim_end_matches('\r').to_owned();
            buffer.drain(..=position);

            if let Some(name) = line.strip_prefix("event:") {
                event_name = name.trim().to_owned();
            } else if let Some(payload) = line.strip_prefix("data:") {
                data = payload.trim().to_owned();
            } else if line.is_empty() && !data.is_empty() {
                // Blank line ends one server-sent event.
                match event_name.as_str() {
                    "progress" | "" => {
                        let state: TaskState = serde_json::from_str(&data)?;
                        info!(
                            "{:>3}% {}",
                            state.progress,
                            state.message.as_deref().unwrap_or_default()
                        );
                        if state.status.is_terminal() {
                            return Ok(Some(state));
                        }
                    }
                    "error" => {
                        return Err(error::Error::not_found(data.clone()));
                    }
                    other => debug!("ignoring unhandled stream event: {other}"),
                }
                event_name.clear();
                data.clear();
            }
        }
    }

    Ok(None)
}

/// Main application flow: authenticate, queue a generation, follow its
/// progress, and hand the finished track to the playback queue.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::new(args.server);
    config.tokens_file = args.tokens_file.clone().into();

    let session = Arc::new(SessionStore::with_file(&config.tokens_file));
    let gateway = Gateway::new(&config, Arc::clone(&session))?;

    if !session.is_authenticated() {
        match (&args.email, &args.password) {
            (Some(email), Some(password)) => {
                gateway.login(email, password).await?;
                info!("logged in as {email}");
            }
            _ => {
                return Err("no stored session; pass --email and --password to log in".into());
            }
        }
    }

    let request = GenerationRequest {
        prompt: args.prompt.clone(),
        lyrics: args.lyrics.clone(),
        duration: Duration::from_secs(args.duration),
    };
    let created = gateway.create_generation(&request).await?;
    info!("generation task {} queued", created.task_id);

    let events_url = gateway.base_url().join(&created.events_url)?;
    let http = gateway.http();

    let mut terminal = None;
    for attempt in 1..=MAX_STREAM_ATTEMPTS {
        match follow_task(&http, events_url.clone(), session.access_token()).await {
            Ok(Some(state)) => {
                terminal = Some(state);
                break;
            }
            Ok(None) => warn!("progress stream ended early"),
            Err(e) => {
                if e.is_unauthenticated() {
                    return Err(e.into());
                }
                warn!("progress stream dropped: {e}");
            }
        }

        if attempt == MAX_STREAM_ATTEMPTS {
            return Err("progress stream kept dropping".into());
        }

        // Sleep with jitter to avoid reattaching in lockstep with other
        // clients when the service recovers.
        let delay = Duration::from_millis(1_000 + fastrand::u64(..1_000));
        info!("reattaching stream in {:.1}s", delay.as_secs_f32());
        tokio::time::sleep(delay).await;
    }

    let Some(state) = terminal else {
        return Err("progress stream ended without a result".into());
    };
    let Some(result) = state.result else {
        return Err(state
            .message
            .unwrap_or_else(|| "generation failed".to_string())
            .into());
    };

    // Push the finished track into the playback queue, as any UI surface
    // would; a playback surface bound to this store takes it from here.
    let player = Player::new();
    let _subscription = player.subscribe(|state| {
        if let Some(track) = state.current() {
            let transport = if state.is_playing { "playing" } else { "paused" };
            info!("now {transport}: {} ({})", track.title, track.audio_url);
        }
    });

    let audio_url = gateway.base_url().join(&result.audio_url)?;
    player.set_queue(
        vec![QueueItem::new(result.song_id, args.prompt, audio_url)],
        0,
    );

    Ok(())
}

/// Main entry point of the application.
///
/// Initializes the logger facade, parses the command line arguments, and
/// runs the generation flow until it finishes or Ctrl-C arrives.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {args:#?}");

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    tokio::select! {
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }

        result = run(args) => {
            if let Err(e) = result {
                error!("{e}");
                process::exit(1);
            }
        }
    }
}
