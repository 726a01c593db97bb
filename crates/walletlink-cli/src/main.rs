//! WalletLink CLI
//!
//! Pair a wallet from the terminal, sign messages with it, and run the relay.

mod config;
mod progress;
mod qr;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use walletlink_core::session::is_expired;
use walletlink_core::{
    FileSessionStore, PairingPayload, PersistedSession, SessionManager, SessionState,
    SessionStore, WalletLinkError,
};
use walletlink_crypto::signatures::verify_message_signature;
use walletlink_discovery::relay::RelayServer;
use walletlink_discovery::relay::protocol::now_millis;

use config::Config;
use progress::{WaitSpinner, format_age, format_duration};

/// WalletLink - pair a wallet and request signatures over an encrypted relay
#[derive(Parser)]
#[command(name = "walletlink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to ~/.config/walletlink/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay URL, overriding the configuration file
    #[arg(long)]
    relay_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a pairing and wait for the wallet
    Pair {
        /// Seconds to wait for the wallet
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Do not print a QR code
        #[arg(long)]
        no_qr: bool,
    },

    /// Restore the saved session
    Restore,

    /// Show the saved session
    Status,

    /// Ask the paired wallet to sign a message
    Sign {
        /// Message to sign
        #[arg(required = true)]
        message: String,

        /// Verify the returned Ed25519 signature locally
        #[arg(long)]
        verify: bool,
    },

    /// End the saved session
    Disconnect,

    /// Inspect a pairing link (the key is never printed)
    Decode {
        /// Deep link or pairing string
        #[arg(required = true)]
        link: String,
    },

    /// Run a forwarding relay
    Relay {
        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    if let Some(relay_url) = &cli.relay_url {
        config.link.relay_url.clone_from(relay_url);
    }

    tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose {
            "debug".to_string()
        } else {
            config.logging.level.to_lowercase()
        })
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    match cli.command {
        Commands::Pair { timeout, no_qr } => {
            let timeout = timeout.map_or(
                Duration::from_secs(config.timeouts.connection_secs),
                Duration::from_secs,
            );
            pair(&config, timeout, !no_qr).await?;
        }
        Commands::Restore => restore(&config).await?,
        Commands::Status => show_status(&config)?,
        Commands::Sign { message, verify } => sign(&config, &message, verify).await?,
        Commands::Disconnect => disconnect(&config).await?,
        Commands::Decode { link } => decode(&link)?,
        Commands::Relay { bind } => {
            if let Some(bind) = bind {
                config.relay.bind_addr = bind;
            }
            run_relay(&config).await?;
        }
    }

    Ok(())
}

fn session_store(config: &Config) -> Arc<FileSessionStore> {
    Arc::new(FileSessionStore::in_dir(&config.session.dir))
}

fn session_manager(config: &Config) -> SessionManager {
    SessionManager::new(config.walletlink_config(), session_store(config))
}

/// Cancelled when the user presses Ctrl+C
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    token
}

async fn wait_for_wallet(
    manager: &SessionManager,
    timeout: Duration,
) -> anyhow::Result<String> {
    let spinner = WaitSpinner::new("Waiting for the wallet to approve", timeout);
    let cancel = ctrl_c_token();
    match manager.wait_for_connection_until(timeout, &cancel).await {
        Ok(address) => {
            spinner.finish(format!("Connected to {address}"));
            Ok(address)
        }
        Err(e) => {
            spinner.abandon();
            Err(e.into())
        }
    }
}

/// Start a pairing and wait for the wallet
async fn pair(config: &Config, timeout: Duration, show_qr: bool) -> anyhow::Result<()> {
    let manager = session_manager(config);
    let info = manager.generate_session().await?;
    tracing::info!("Pairing session {} via {}", info.session_id, config.link.relay_url);

    println!("Open this link in the Sultan wallet:");
    println!();
    println!("  {}", info.pairing_url);
    println!();
    if show_qr {
        qr::print(&info.pairing_url);
        println!();
    }

    let address = wait_for_wallet(&manager, timeout).await?;
    println!("Wallet: {address}");
    if let Some(public_key) = manager.public_key() {
        println!("Public key: {public_key}");
    }
    println!(
        "Session saved; it stays usable for {}.",
        format_duration(manager.config().session_ttl)
    );
    Ok(())
}

/// Restore the saved session; resume waiting if the wallet never approved
async fn restore(config: &Config) -> anyhow::Result<()> {
    let manager = session_manager(config);
    match manager.try_restore_session().await {
        Ok(false) => {
            println!("No saved session.");
            return Ok(());
        }
        Ok(true) => {}
        Err(WalletLinkError::SessionExpired) => {
            println!("The saved session expired and was removed.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    match manager.state() {
        SessionState::Connected => {
            manager.reconnect().await?;
            println!(
                "Restored session with {}",
                manager.address().unwrap_or_default()
            );
        }
        SessionState::Waiting => {
            if let Some(info) = manager.pairing_info() {
                println!("Still waiting for the wallet. Pairing link:");
                println!();
                println!("  {}", info.pairing_url);
                println!();
            }
            let timeout = Duration::from_secs(config.timeouts.connection_secs);
            let address = wait_for_wallet(&manager, timeout).await?;
            println!("Wallet: {address}");
        }
        state => println!("Session state: {state}"),
    }
    Ok(())
}

/// Show the saved session without touching the relay
fn show_status(config: &Config) -> anyhow::Result<()> {
    let store = session_store(config);
    println!("WalletLink Status");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Configuration:");
    println!("  Relay: {}", config.link.relay_url);
    println!("  Wallet: {}", config.link.wallet_url);
    println!("  App: {}", config.link.app_name);
    println!("  Origin: {}", config.link.origin);
    println!("  Session file: {}", store.path().display());
    println!();

    let Some(text) = store.load()? else {
        println!("No saved session.");
        return Ok(());
    };
    let record = match PersistedSession::from_json(&text) {
        Ok(record) => record,
        Err(e) => {
            println!("Saved session is unreadable: {e}");
            return Ok(());
        }
    };

    let now = now_millis();
    let ttl = config.walletlink_config().session_ttl;
    println!("Session:");
    println!("  Id: {}", record.session_id);
    println!("  Age: {}", format_age(record.created_at, now));
    println!(
        "  State: {}",
        if is_expired(record.created_at, ttl, now) {
            "expired"
        } else if record.is_connected {
            "connected"
        } else {
            "waiting"
        }
    );
    if let Some(address) = &record.wallet_address {
        println!("  Wallet: {address}");
    }
    if let Some(public_key) = &record.wallet_public_key {
        println!("  Public key: {public_key}");
    }
    Ok(())
}

/// Ask the paired wallet to sign a message
async fn sign(config: &Config, message: &str, verify: bool) -> anyhow::Result<()> {
    let manager = session_manager(config);
    if !manager.try_restore_session().await? {
        anyhow::bail!("No saved session; run `walletlink pair` first");
    }
    if manager.state() != SessionState::Connected {
        anyhow::bail!("The saved session is not connected (state: {})", manager.state());
    }
    manager.reconnect().await?;

    let spinner = WaitSpinner::new("Waiting for the wallet to sign", manager.config().sign_timeout);
    let response = tokio::select! {
        result = manager.sign_message(message) => result,
        _ = tokio::signal::ctrl_c() => Err(WalletLinkError::cancelled("Interrupted")),
    };
    let response = match response {
        Ok(response) => {
            spinner.finish("Signed".to_string());
            response
        }
        Err(e) => {
            spinner.abandon();
            return Err(e.into());
        }
    };

    println!("Signature: {}", response.signature);
    println!("Public key: {}", response.public_key);
    if verify {
        verify_message_signature(&response.public_key, message.as_bytes(), &response.signature)
            .map_err(|e| anyhow::anyhow!("Signature does not verify: {e}"))?;
        println!("Signature verified.");
    }
    Ok(())
}

/// End the saved session, telling the wallet if it can be reached
async fn disconnect(config: &Config) -> anyhow::Result<()> {
    let manager = session_manager(config);
    match manager.try_restore_session().await {
        Ok(true) => {
            if let Err(e) = manager.reconnect().await {
                tracing::debug!("Wallet not notified: {}", e);
            }
        }
        Ok(false) => {}
        Err(e) => tracing::debug!("Saved session not restored: {}", e),
    }
    manager.disconnect().await;
    println!("Disconnected.");
    Ok(())
}

/// Inspect a pairing link
fn decode(link: &str) -> anyhow::Result<()> {
    let payload = PairingPayload::parse(link)?;
    let relay = url::Url::parse(&payload.relay_url)?;

    println!("Session: {}", payload.session_id);
    println!("Relay: {}", payload.relay_url);
    if let Some(host) = relay.host_str() {
        println!("Relay host: {host}");
    }
    println!("App: {}", payload.app_name);
    println!("Origin: {}", payload.origin);
    println!(
        "Key: {} bytes (not shown)",
        payload.secret.as_bytes().len()
    );
    Ok(())
}

/// Run a forwarding relay until Ctrl+C
async fn run_relay(config: &Config) -> anyhow::Result<()> {
    let addr = config.parse_bind_addr()?;
    let server = RelayServer::bind_with_config(addr, config.relay_server_config()).await?;

    println!("WalletLink Relay");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Listen: {}", server.url());
    println!("Max sessions: {}", config.relay.max_sessions);
    println!("Peers per session: {}", config.relay.max_peers_per_session);
    println!();
    println!("Press Ctrl+C to stop");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!(
                "Shutting down ({} frames forwarded)",
                server.frames_forwarded()
            );
        }
    }
    Ok(())
}
