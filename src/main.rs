//! peerchat CLI - line-oriented chat with a single TCP peer.
//!
//! This is the main binary entry point. See the `peerchat` library for the
//! transport.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use peerchat::{ChatLog, Config, Role, Session, SessionEvent};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// How long `/quit` waits for unsent messages to reach the socket.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

// CLI
#[derive(Parser)]
#[command(name = "peerchat")]
#[command(version)]
#[command(about = "Point-to-point chat over a single TCP connection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for one peer to connect, then chat
    Listen {
        #[command(flatten)]
        net: NetArgs,
    },
    /// Connect to a listening peer, then chat
    Connect {
        #[command(flatten)]
        net: NetArgs,
        /// Give up dialing after this many seconds
        #[arg(long, value_name = "SECS")]
        connect_timeout: Option<u64>,
    },
    /// Show or change the saved configuration
    Config {
        key: Option<String>,
        value: Option<String>,
    },
}

#[derive(Args)]
struct NetArgs {
    /// Host to bind or dial
    #[arg(long)]
    host: Option<String>,
    /// TCP port
    #[arg(long)]
    port: Option<u16>,
    /// Outgoing text encoding (utf8 or modified-utf8)
    #[arg(long)]
    encoding: Option<String>,
}

impl NetArgs {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(host) = self.host {
            config.set("host", &host)?;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(encoding) = self.encoding {
            config.set("encoding", &encoding)?;
        }
        Ok(())
    }
}

/// Log to `PEERCHAT_LOG_FILE` if set, otherwise to stderr.
fn init_logging() -> Result<()> {
    if let Ok(path) = std::env::var("PEERCHAT_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .format_timestamp_secs()
            .init();
    } else {
        let filter = peerchat::env::Environment::current().default_log_filter();
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
            .format_timestamp_secs()
            .init();
    }
    Ok(())
}

/// Runs an interactive chat until `/quit`, EOF or Ctrl-C.
async fn run_chat(role: Role, config: &Config) -> Result<()> {
    let (session, mut events) = Session::new(role, config.session_config());
    let mut log = ChatLog::new(role);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    log::info!("peerchat v{} starting as {}", env!("CARGO_PKG_VERSION"), role);
    // Failures are already queued as events.
    let _ = session.open();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let SessionEvent::Connected { peer_addr } = &event {
                    log::info!("Chatting with {peer_addr}");
                }
                if let Some(line) = log.apply(&event) {
                    println!("{line}");
                }
            }
            line = stdin.next_line() => {
                let Some(mut line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "/quit" => break,
                    "/close" => session.close(),
                    "/open" => {
                        let _ = session.open();
                    }
                    _ => {
                        session.submit(&mut line);
                    }
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    session.close_and_flush(FLUSH_TIMEOUT).await;
    // Show whatever the close produced.
    while let Ok(event) = events.try_recv() {
        if let Some(line) = log.apply(&event) {
            println!("{line}");
        }
    }
    Ok(())
}

fn show_config(key: Option<String>, value: Option<String>) -> Result<()> {
    match (key, value) {
        (None, _) => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        (Some(key), None) => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        (Some(key), Some(value)) => {
            // Persist file values only, not environment overrides.
            let mut config = Config::load_from(&Config::config_path()?)?;
            config.set(&key, &value)?;
            config.save()?;
            println!("{key} = {}", config.get(&key)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    let (role, net, connect_timeout) = match cli.command {
        Commands::Config { key, value } => return show_config(key, value),
        Commands::Listen { net } => (Role::Listener, net, None),
        Commands::Connect {
            net,
            connect_timeout,
        } => (Role::Connector, net, connect_timeout),
    };

    let mut config = Config::load()?;
    net.apply(&mut config)?;
    if let Some(secs) = connect_timeout {
        config.set("connect_timeout_secs", &secs.to_string())?;
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run_chat(role, &config))
}
