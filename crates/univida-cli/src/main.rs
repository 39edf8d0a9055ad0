//! Univida CLI - a terminal client for the Univida insurance portal.
//!
//! Logs in against the portal's auth server, keeps the session on disk
//! between runs, and sends authenticated requests that survive access token
//! expiry.

mod config;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use univida_core::auth::{FileStore, SessionHooks};
use univida_core::{
    ActivityEvent, ApiClient, ApiError, EndReason, GuardDecision, InactivityWatchdog, RouteGuard,
    SessionManager,
};

use config::Config;

const USAGE: &str = "\
Usage: univida <command>

Commands:
  login [username]   Log in and store the session
  whoami             Show the logged-in user
  logout             End the session
  get <path>         Authenticated GET against the portal API
  watch              Keep the session open while you type; ends after 30 idle minutes";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Session-ending side effects for a terminal: print the notice and point
/// the user back at `login`.
struct TerminalHooks;

impl SessionHooks for TerminalHooks {
    fn notify(&self, reason: EndReason, message: &str) {
        debug!(%reason, "Showing session notice");
        eprintln!("{}", message);
    }

    fn redirect(&self, route: &str) {
        debug!(route, "Session ended, back to login");
        eprintln!("Run `univida login` to start a new session.");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let mut config = Config::load()?;
    let cache_dir = config.cache_dir()?;
    let store = FileStore::open(&cache_dir).context("Failed to open session file")?;
    let session = Arc::new(SessionManager::new(store).with_hooks(Arc::new(TerminalHooks)));
    let client = ApiClient::new(config.endpoints(), Arc::clone(&session))?;
    info!(command, "Univida CLI starting");

    match command {
        "login" => login(&client, &mut config, args.get(2).cloned()).await,
        "whoami" => whoami(&session),
        "logout" => {
            if !client.logout() {
                eprintln!("Not logged in.");
            }
            Ok(())
        }
        "get" => {
            let path = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing path. Usage: univida get <path>"))?;
            get(&client, path).await
        }
        "watch" => watch(session).await,
        _ => {
            eprintln!("{}", USAGE);
            Ok(())
        }
    }
}

async fn login(client: &ApiClient, config: &mut Config, username: Option<String>) -> Result<()> {
    let username = match username {
        Some(username) => username,
        None => prompt_username(config.last_username.as_deref())?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    eprintln!("Authenticating...");
    let identity = match client.login(&username, &password).await {
        Ok(identity) => identity,
        Err(ApiError::InvalidCredentials) => {
            anyhow::bail!("Usuario o contraseña incorrectos.")
        }
        Err(e) => return Err(e).context("Login failed"),
    };

    config.last_username = Some(username);
    config.save()?;

    println!("Welcome, {}!", identity.display_name());
    println!("Role: {} (home: {})", identity.role, identity.role.landing_route());
    Ok(())
}

fn prompt_username(last_username: Option<&str>) -> Result<String> {
    match last_username {
        Some(last) => print!("Username [{}]: ", last),
        None => print!("Username: "),
    }
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let input = input.trim();

    match (input.is_empty(), last_username) {
        (true, Some(last)) => Ok(last.to_string()),
        (true, None) => anyhow::bail!("Username is required"),
        (false, _) => Ok(input.to_string()),
    }
}

fn whoami(session: &SessionManager) -> Result<()> {
    match RouteGuard::any_role().check(session) {
        GuardDecision::Render(identity) => {
            println!("{} ({})", identity.display_name(), identity.username);
            if !identity.email.is_empty() {
                println!("Email: {}", identity.email);
            }
            println!("Role: {}", identity.role);
            println!(
                "Session ends after {} more idle minutes",
                session.minutes_until_expiry()
            );
        }
        GuardDecision::Redirect(_) => println!("Not logged in."),
    }
    Ok(())
}

async fn get(client: &ApiClient, path: &str) -> Result<()> {
    if let GuardDecision::Redirect(_) = RouteGuard::any_role().check(client.session()) {
        anyhow::bail!("Not logged in. Run `univida login` first.");
    }

    let body: Value = client
        .get_json(path)
        .await
        .with_context(|| format!("GET {} failed", path))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn watch(session: Arc<SessionManager>) -> Result<()> {
    if let GuardDecision::Redirect(_) = RouteGuard::any_role().check(&session) {
        anyhow::bail!("Not logged in. Run `univida login` first.");
    }

    let mut watchdog = InactivityWatchdog::new(Arc::clone(&session)).spawn();
    let listener = watchdog.listener();
    eprintln!(
        "Watching session ({} idle minutes left). Each line you type counts as activity; Ctrl+C to stop.",
        session.minutes_until_expiry()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = watchdog.closed() => break,
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(_) => {
                    listener.notify(ActivityEvent::KeyPress);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Watch finished");
    Ok(())
}
