//! Digi-Key token demo
//!
//! Obtains and inspects the access token used for the Digi-Key catalog API.
//!
//! Commands:
//! - `token`: print a valid access token, authorizing or refreshing first if needed
//! - `status`: show the stored credential state without touching the network
//! - `headers`: print the headers a catalog request needs
//! - `logout`: forget stored tokens
//!
//! Run with: cargo run -p dk-token -- status

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use digikey_oauth::{Clock, CredentialState, OAuthConfig, SystemClock, TokenManager};

#[derive(Parser, Debug)]
#[command(name = "dk-token", version, about = "Digi-Key OAuth token helper")]
struct Args {
    /// Credential file (overrides DK_CREDENTIALS_FILE)
    #[arg(long, global = true)]
    credentials: Option<PathBuf>,

    /// Callback listener port (overrides DK_CALLBACK_PORT)
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Print the authorization URL instead of opening a browser
    #[arg(long, global = true)]
    no_browser: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Print a valid access token
    Token,
    /// Show stored credential state
    Status,
    /// Print catalog request headers
    Headers,
    /// Forget stored tokens
    Logout,
}

fn config(args: &Args) -> anyhow::Result<OAuthConfig> {
    let mut config = OAuthConfig::from_env()?;
    if let Some(path) = &args.credentials {
        config.credentials_path.clone_from(path);
    }
    if let Some(port) = args.port {
        config.callback_port = port;
    }
    if args.no_browser {
        config.auto_open_browser = false;
    }
    Ok(config)
}

fn describe_expiry(expiry: Option<u64>, now: u64) -> String {
    match expiry {
        None => style("absent").dim().to_string(),
        Some(at) if at > now => {
            let left = Duration::from_secs(at - now);
            format!("{at} ({} left)", humanize(left))
        }
        Some(at) => style(format!("{at} (expired)")).red().to_string(),
    }
}

fn humanize(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0..=119 => format!("{secs}s"),
        120..=7_199 => format!("{}m", secs / 60),
        7_200..=172_799 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

fn print_status(manager: &TokenManager) -> anyhow::Result<()> {
    let now = SystemClock.now();
    let record = manager.record()?;
    let state = manager.state()?;

    let badge = match state {
        CredentialState::Ready => style(state.to_string()).green(),
        CredentialState::Authorized => style(state.to_string()).yellow(),
        _ => style(state.to_string()).red(),
    };

    println!("{} {}", style("credentials:").dim(), manager.store().path().display());
    println!("{} {badge}", style("state:").dim());
    println!(
        "{} {}",
        style("access token expiry:").dim(),
        describe_expiry(record.access_token.as_ref().and(record.access_token_expiry), now)
    );
    println!(
        "{} {}",
        style("refresh token expiry:").dim(),
        describe_expiry(record.refresh_token.as_ref().and(record.refresh_token_expiry), now)
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "digikey_oauth=info,dk_token=info,warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = config(&args)?;
    tracing::debug!(
        command = ?args.command,
        credentials = %config.credentials_path.display(),
        port = config.callback_port,
        "Dispatching command"
    );
    let manager = TokenManager::builder().config(config).build()?;

    match args.command {
        Command::Token => {
            let token = manager.access_token().await?;
            println!("{token}");
        }
        Command::Status => print_status(&manager)?,
        Command::Headers => {
            let headers = manager.authorization_headers().await?;
            for (name, value) in &headers {
                println!("{name}: {}", value.to_str()?);
            }
        }
        Command::Logout => {
            manager.logout().await?;
            println!("{} stored tokens cleared", style("✓").green());
        }
    }

    Ok(())
}
