//! cloudterm CLI
//!
//! Opens an interactive cloud shell session: resolves a tenant,
//! acquires a token (device-code flow with an on-disk cache, or the
//! ambient managed identity), provisions a console, negotiates a
//! terminal, and bridges its WebSocket to the local TTY.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ct_auth::{BrokerConfig, Tenant, TokenBroker};
use ct_core::CredentialStore;
use ct_session::{ChannelConfig, DuplexChannel, SessionHandle, SessionProvisioner, TerminalBridge};

mod output;
use output::{print_error, print_info, print_success};

/// Shell requested when neither the flag nor the account preference
/// names one
const DEFAULT_SHELL: &str = "bash";

#[derive(Parser)]
#[command(name = "cloudterm")]
#[command(author, version, about = "Interactive cloud shell in your terminal")]
struct Cli {
    /// Tenant (directory) id to operate against
    #[arg(short, long)]
    tenant: Option<String>,

    /// Shell to request (e.g. bash, pwsh)
    #[arg(short, long)]
    shell: Option<String>,

    /// Delete the stored settings and exit
    #[arg(long)]
    reset: bool,

    /// Directory holding cached tokens and settings
    #[arg(long, env = "CLOUDTERM_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity; session bytes own stdout, so
    // diagnostics go to stderr
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let cache_dir = cli
        .cache_dir
        .clone()
        .unwrap_or_else(CredentialStore::default_dir);
    let store = CredentialStore::new(cache_dir);

    if cli.reset {
        store.reset().context("Failed to reset settings")?;
        print_success("Settings cleared");
        return Ok(());
    }

    let broker = Arc::new(
        TokenBroker::new(store, BrokerConfig::from_env())
            .context("Failed to initialize token broker")?,
    );

    let tenant_id = resolve_tenant(&broker, cli.tenant.as_deref()).await?;
    tracing::info!(tenant = %tenant_id, "Operating against tenant");

    let provisioner = Arc::new(
        SessionProvisioner::new(Arc::clone(&broker))
            .context("Failed to initialize session provisioner")?,
    );

    let user_settings = provisioner
        .check_user_settings(&tenant_id)
        .await
        .context("Failed to read cloud shell user settings")?;

    let shell = cli
        .shell
        .clone()
        .or(user_settings.preferred_shell_type)
        .unwrap_or_else(|| DEFAULT_SHELL.to_string());

    print_info("Requesting cloud shell...");
    let console_uri = provisioner
        .provision(&tenant_id)
        .await
        .context("Failed to provision cloud shell")?;

    print_info(&format!("Connecting terminal ({shell})..."));
    let session = provisioner
        .negotiate_terminal(&tenant_id, &console_uri, &shell)
        .await
        .context("Failed to negotiate terminal")?;

    let channel = DuplexChannel::connect(ChannelConfig::new(session.socket_uri.clone()))
        .await
        .context("Failed to open terminal stream")?;

    let handle = Arc::new(SessionHandle {
        provisioner: Arc::clone(&provisioner),
        session,
    });

    // The bridge owns the pumps; this scope only owns the TTY mode
    enable_raw_mode().context("Failed to enter raw mode")?;
    let result = TerminalBridge::new(channel, handle)
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await;
    disable_raw_mode().context("Failed to restore terminal")?;
    result?;

    print_success("Session ended");
    Ok(())
}

/// Pick the tenant to operate against: the flag wins, then the stored
/// selection, then the directory listing (prompting when several are
/// accessible). Listing-based selections are persisted.
async fn resolve_tenant(broker: &TokenBroker, flag: Option<&str>) -> Result<String> {
    if let Some(tenant) = flag {
        return Ok(tenant.to_string());
    }

    let settings = broker
        .store()
        .load_settings()
        .context("Failed to read settings")?;
    if settings.has_active_tenant() {
        return Ok(settings.active_tenant);
    }

    let tenants = broker
        .list_accessible_tenants()
        .await
        .context("Failed to list tenants")?;

    let selected = match tenants.len() {
        0 => anyhow::bail!("You don't have access to any tenants (directories)"),
        1 => tenants[0].tenant_id.clone(),
        _ => prompt_tenant(&tenants)?,
    };

    broker
        .set_active_tenant(&selected)
        .context("Failed to save tenant selection")?;
    Ok(selected)
}

/// Numbered selection prompt on stderr; runs before raw mode
fn prompt_tenant(tenants: &[Tenant]) -> Result<String> {
    eprintln!();
    eprintln!("Select a tenant:");
    for (index, tenant) in tenants.iter().enumerate() {
        eprintln!(
            "  {}. {} ({})",
            index + 1,
            tenant.display_name,
            tenant.tenant_id
        );
    }

    loop {
        eprint!("Tenant [1-{}]: ", tenants.len());
        std::io::stderr().flush().ok();

        let mut line = String::new();
        if std::io::stdin()
            .read_line(&mut line)
            .context("Failed to read selection")?
            == 0
        {
            anyhow::bail!("No tenant selected; pass one with --tenant");
        }

        match line.trim().parse::<usize>() {
            Ok(n) if (1..=tenants.len()).contains(&n) => {
                return Ok(tenants[n - 1].tenant_id.clone())
            }
            _ => eprintln!("Enter a number between 1 and {}", tenants.len()),
        }
    }
}
