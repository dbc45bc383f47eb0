// actions-status binary.
// Wires config, auth, scheduler and a console surface that prints status lines and takes click commands.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use actions_status::actions::{self, ActionOutcome, Modifier};
use actions_status::auth::{self, AuthSession, Credentials, DeviceCode, DeviceFlow};
use actions_status::config::MonitorConfig;
use actions_status::github::{ActionsApi, GitHubClient};
use actions_status::indicator::{self, Indicator};
use actions_status::menu;
use actions_status::paths;
use actions_status::scheduler::Scheduler;
use actions_status::snapshot::Snapshot;

/// How often the config file's modification time is checked.
const RELOAD_CHECK: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "actions-status", version, about = "GitHub Actions status for your repositories")]
struct Cli {
    /// Config file (default: <config dir>/actions-status/config.json)
    #[arg(long, global = true, env = "ACTIONS_STATUS_CONFIG")]
    config: Option<PathBuf>,

    /// Poll interval in seconds, overriding the config file
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// More output (-v warn, -vv info, -vvv debug, -vvvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Poll the configured targets and print their status (default)
    Watch,
    /// Authorize with GitHub through the OAuth device flow
    Login,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => paths::config_path().context("no home directory to keep the config in")?,
    };
    let mut config = MonitorConfig::load_or_init(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    apply_overrides(&mut config, cli.interval);

    init_tracing(config.verbosity.max(cli.verbose), config.logfile.as_deref())?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        targets = config.repos.len(),
        "actions-status starting"
    );

    let token_path = paths::token_path();
    let explicit = std::env::var("GITHUB_TOKEN").ok().or_else(|| config.token.clone());
    let credentials = Credentials::new(auth::initial_token(explicit, token_path.as_deref())?);
    let client = Arc::new(GitHubClient::new(credentials.clone(), config.client_options())?);
    let flow: Arc<dyn DeviceFlow> = client.clone();
    let session = Arc::new(AuthSession::new(
        flow,
        credentials,
        std::env::var("GITHUB_OAUTH_CLIENT_ID").ok(),
        token_path,
    ));

    match cli.command.unwrap_or(Command::Watch) {
        Command::Login => login(&session).await,
        Command::Watch => watch(&cli, &config_path, config, client, session).await,
    }
}

fn apply_overrides(config: &mut MonitorConfig, interval: Option<u64>) {
    if let Some(interval) = interval.filter(|i| *i > 0) {
        config.interval = interval;
    }
}

fn init_tracing(verbosity: u8, logfile: Option<&Path>) -> Result<()> {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    // Dependencies stay at info or quieter unless RUST_LOG says otherwise.
    let directive = if verbosity >= 3 {
        format!("info,actions_status={}", level)
    } else {
        level.to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

fn print_code(code: &DeviceCode) {
    println!(
        "Open {} and enter the code {} (expires {})",
        code.verification_uri,
        code.user_code,
        code.expires_at.format("%H:%M:%S")
    );
}

async fn login(session: &AuthSession) -> Result<()> {
    if !session.can_authenticate() {
        anyhow::bail!("set GITHUB_OAUTH_CLIENT_ID to log in with the device flow");
    }
    session.login(print_code).await?;
    println!("Logged in.");
    Ok(())
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn watch(
    cli: &Cli,
    config_path: &Path,
    config: MonitorConfig,
    client: Arc<GitHubClient>,
    session: Arc<AuthSession>,
) -> Result<()> {
    tokio::spawn(Arc::clone(&session).watch_revocations());

    let api: Arc<dyn ActionsApi> = client.clone();
    let (mut scheduler, mut reader) = Scheduler::start(Arc::clone(&api), config).await;

    let mut previous = reader.current();
    let mut overall = Indicator::overall(&previous);
    print_lines(&previous, None);

    let mut modified = modified_at(config_path);
    let mut reload_tick = tokio::time::interval(RELOAD_CHECK);
    let mut commands = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            snapshot = reader.changed() => {
                let Some(snapshot) = snapshot else { break };
                print_lines(&snapshot, Some(&previous));
                let next = Indicator::overall(&snapshot);
                if let Some(notice) = indicator::notice(overall, next) {
                    tracing::warn!(from = ?overall, to = ?next, "{}", notice.message());
                    println!("{} {}", next.symbol(), notice.message());
                }
                overall = next;
                previous = snapshot;
            }
            _ = reload_tick.tick() => {
                let current = modified_at(config_path);
                if current != modified {
                    modified = current;
                    reload(&mut scheduler, config_path, cli.interval).await;
                }
            }
            line = commands.next_line(), if stdin_open => match line {
                Ok(Some(line)) => handle_command(line.trim(), &reader.current(), api.as_ref(), &session).await,
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin closed");
                    stdin_open = false;
                }
            },
        }
    }

    tracing::info!("shutting down");
    scheduler.shutdown().await;
    Ok(())
}

async fn reload(scheduler: &mut Scheduler, config_path: &Path, interval: Option<u64>) {
    match MonitorConfig::load(config_path) {
        Ok(mut config) => {
            apply_overrides(&mut config, interval);
            if &config == scheduler.config() {
                tracing::debug!("config file touched without changes");
            }
            scheduler.apply(config).await;
        }
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "ignoring invalid config, keeping current targets");
        }
    }
}

/// Print every line on first render, then only lines whose text changed.
fn print_lines(snapshot: &Snapshot, previous: Option<&Snapshot>) {
    let now = Utc::now();
    let full = previous.is_none_or(|p| p.targets() != snapshot.targets());
    let changed = previous.map(|p| snapshot.changed_targets(p)).unwrap_or_default();

    for (index, (target, entry)) in snapshot.iter().enumerate() {
        let title = menu::menu_title(target, entry, now);
        let show = full
            || (changed.contains(&target)
                && previous.is_some_and(|p| menu::menu_title(target, p.get(target), now) != title));
        if show {
            println!("{:>2}. {}", index + 1, title);
        }
    }
}

async fn handle_command(line: &str, snapshot: &Snapshot, api: &dyn ActionsApi, session: &Arc<AuthSession>) {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return;
    };

    match first {
        "list" => {
            println!("{} overall", Indicator::overall(snapshot).symbol());
            for (index, line) in menu::menu_lines(snapshot, Utc::now()).iter().enumerate() {
                println!("{:>2}. {}", index + 1, line);
            }
        }
        "auth" => println!("auth: {}", session.state().label()),
        "login" => {
            if !session.can_authenticate() {
                println!("set GITHUB_OAUTH_CLIENT_ID to log in");
                return;
            }
            // Pollers keep running anonymously while the user authorizes.
            let session = Arc::clone(session);
            tokio::spawn(async move {
                match session.login(print_code).await {
                    Ok(()) => println!("Logged in."),
                    Err(e) => println!("Login failed: {}", e),
                }
            });
        }
        index => {
            let Some(target) = index
                .parse::<usize>()
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| snapshot.targets().get(i))
            else {
                println!("usage: <index> [plain|secondary|rerun|actor|commit] | list | login | auth");
                return;
            };
            let modifier = words
                .next()
                .unwrap_or("plain")
                .parse::<Modifier>()
                .unwrap_or(Modifier::Plain);
            let Some(run) = snapshot.get(target).and_then(|e| e.run()) else {
                println!("{}: no run yet", target);
                return;
            };
            match actions::perform(api, run, &modifier).await {
                Ok(ActionOutcome::Open(url)) => println!("open {}", url),
                Ok(ActionOutcome::RerunRequested) => println!("rerun requested for run {}", run.id),
                Ok(ActionOutcome::NoOp) => println!("nothing to do for {} on run {}", modifier, run.id),
                Err(e) => println!("{}", e),
            }
        }
    }
}
