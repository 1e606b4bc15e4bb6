//! authkeeper - command-line front end for an authkeeper session.
//!
//! Tokens are kept in the cache directory (or the OS keychain with
//! `--keyring`) so a session survives between invocations, the same way a
//! browser keeps its cookies between page loads.

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use authkeeper_core::auth::{CookieJar, FileJar, KeyringJar};
use authkeeper_core::{AuthConfig, LoginCredentials, SessionAuth};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "authkeeper", version, about = "Sign in to an API and keep the session fresh")]
struct Cli {
    /// Store tokens in the OS keychain instead of the cache directory
    #[arg(long, global = true)]
    keyring: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the config file
    Configure(ConfigureArgs),
    /// Sign in (prompts for the password)
    Login {
        email: String,
        /// One-time password for accounts with two-factor auth
        #[arg(long)]
        otp: Option<String>,
    },
    /// Sign out and forget stored tokens
    Logout,
    /// Restore the stored session and print the user
    Whoami,
    /// Exchange the refresh token for new tokens
    Refresh,
    /// Show stored token state without network calls
    Status,
    /// Print where a route guard would redirect PATH
    Guard { path: String },
    /// Authorized GET, retried once after a refresh
    Get { path: String },
}

#[derive(Args, Debug)]
struct ConfigureArgs {
    #[arg(long, env = "AUTHKEEPER_API_URL")]
    api_url: String,
    #[arg(long)]
    access_cookie: Option<String>,
    #[arg(long)]
    refresh_cookie: Option<String>,
    #[arg(long)]
    login_route: Option<String>,
    #[arg(long)]
    home_route: Option<String>,
    /// Redirect signed-in users away from the login route
    #[arg(long)]
    hide_login_when_authenticated: Option<bool>,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();

    let cli = Cli::parse();
    if let Command::Configure(args) = &cli.command {
        return configure(args);
    }

    let config = AuthConfig::load().context("Failed to load configuration")?;
    let jar: Arc<dyn CookieJar> = if cli.keyring {
        Arc::new(KeyringJar::default())
    } else {
        Arc::new(FileJar::new(AuthConfig::cache_dir()?))
    };
    let session = SessionAuth::new(config, jar)?;
    info!(command = ?cli.command, "authkeeper starting");

    match cli.command {
        Command::Configure(_) => Ok(()),
        Command::Login { email, otp } => login(&session, email, otp).await,
        Command::Logout => {
            session.logout().await;
            println!("Signed out");
            Ok(())
        }
        Command::Whoami => whoami(&session).await,
        Command::Refresh => {
            session.refresh().await?;
            println!("Tokens refreshed");
            print_status(&session);
            Ok(())
        }
        Command::Status => {
            print_status(&session);
            Ok(())
        }
        Command::Guard { path } => {
            session.bootstrap().await;
            match session.guard(&path) {
                Some(redirect) => println!("redirect {}", redirect.path),
                None => println!("allow {}", path),
            }
            Ok(())
        }
        Command::Get { path } => {
            let value: serde_json::Value = session.client().get_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

/// Merge `args` into the existing config file and write it back
fn configure(args: &ConfigureArgs) -> Result<()> {
    let path = AuthConfig::config_path()?;
    let mut config = AuthConfig::load_from(&path)?;
    apply_configure_args(&mut config, args);
    config.validate()?;

    let path = config.save()?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn apply_configure_args(config: &mut AuthConfig, args: &ConfigureArgs) {
    config.api_url = args.api_url.clone();
    if let Some(name) = &args.access_cookie {
        config.access_token_cookie_name = name.clone();
    }
    if let Some(name) = &args.refresh_cookie {
        config.refresh_token_cookie_name = name.clone();
    }
    if let Some(route) = &args.login_route {
        config.login_route = route.clone();
    }
    if let Some(route) = &args.home_route {
        config.home_route = route.clone();
    }
    if let Some(hide) = args.hide_login_when_authenticated {
        config.hide_login_when_authenticated = hide;
    }
}

async fn login(session: &SessionAuth, email: String, otp: Option<String>) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let mut credentials = LoginCredentials::new(email, password);
    if let Some(otp) = otp {
        credentials = credentials.with_otp(otp);
    }

    let user = session.login(&credentials).await?;
    println!("Signed in as {}", user.display_name());
    Ok(())
}

async fn whoami(session: &SessionAuth) -> Result<()> {
    match session.bootstrap().await {
        Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
        None => println!("Not signed in"),
    }
    Ok(())
}

fn print_status(session: &SessionAuth) {
    let credential = session.credential();
    let clock = session.coordinator().clock();

    println!("access token:  {}", if credential.access_token.is_some() { "stored" } else { "none" });
    println!("refresh token: {}", if credential.refresh_token.is_some() { "stored" } else { "none" });
    match credential.expires_at {
        Some(expires_at) => println!("expires at:    {}", expires_at.to_rfc3339()),
        None => println!("expires at:    unknown"),
    }
    if let Some(token) = credential.access_token.as_deref() {
        match clock.time_until_refresh_needed(token) {
            Ok(remaining) if remaining.num_seconds() > 0 => {
                println!("refresh due in {}m {}s", remaining.num_minutes(), remaining.num_seconds() % 60)
            }
            Ok(_) => println!("refresh due now"),
            Err(e) => println!("refresh due now ({})", e),
        }
    }
}
