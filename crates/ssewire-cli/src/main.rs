use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ssewire_client::StreamNotifier;
use ssewire_core::config::{Config, LoggingConfig};
use ssewire_core::protocol::Message;
use ssewire_server::ServerState;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ssewire",
    about = "Serve and watch text/event-stream push channels",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the event stream server
    Serve {
        /// Port to listen on (default: 8089)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,

        /// Reconnection delay announced to clients, in milliseconds
        #[arg(long)]
        retry_ms: Option<u64>,

        /// Broadcast a `tick` event every N seconds
        #[arg(long)]
        tick: Option<u64>,
    },

    /// Subscribe to an event stream and print its events
    Watch {
        url: String,

        /// Print an unterminated event left at end of stream
        #[arg(long)]
        partial: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve {
            port,
            bind,
            retry_ms,
            tick,
        } => {
            let mut server = config.server();
            if let Some(retry_ms) = retry_ms {
                server.retry_ms = Some(retry_ms);
            }
            let port = port.unwrap_or_else(|| config.server_port());
            let bind = bind.unwrap_or_else(|| config.server_bind());

            let state = Arc::new(ServerState::from_config(&server));
            if let Some(secs) = tick.filter(|s| *s > 0) {
                tokio::spawn(run_ticker(state.clone(), Duration::from_secs(secs)));
            }

            ssewire_server::start_server(state, &format!("{bind}:{port}")).await?;
        }
        Commands::Watch { url, partial } => {
            let mut client = config.client();
            client.dispatch_partial_on_eof |= partial;
            watch(&url, &client).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", config_path.display());
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");

                let (warnings, errors) = config.validate();
                for w in &warnings {
                    eprintln!("warning: {w}");
                }
                for e in &errors {
                    eprintln!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("configuration has {} error(s)", errors.len());
                }
            }
        },
    }

    Ok(())
}

/// `RUST_LOG` wins, then `-v`, then the configured level, then `info`.
fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug"
        } else {
            logging.and_then(|l| l.level.as_deref()).unwrap_or("info")
        };
        let mut directives = vec![level.to_string()];
        if let Some(logging) = logging {
            directives.extend(logging.filters.iter().cloned());
        }
        EnvFilter::new(directives.join(","))
    });

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

async fn run_ticker(state: Arc<ServerState>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let mut seq = 0u64;
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = interval.tick() => {
                seq += 1;
                let message = Message::new(seq.to_string())
                    .with_id(seq.to_string())
                    .with_event("tick");
                state.hub.broadcast(message).await;
            }
        }
    }
}

async fn watch(url: &str, client: &ssewire_core::config::ClientConfig) -> anyhow::Result<()> {
    let notifier = StreamNotifier::from_client_config(client)?;
    let (tx, mut rx) = mpsc::channel::<ssewire_client::Event>(client.channel_capacity.max(1));
    let cancel = CancellationToken::new();

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let line = serde_json::json!({
                "type": event.event_type(),
                "id": event.id(),
                "data": event.text(),
            });
            println!("{line}");
        }
    });

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, closing stream");
                cancel.cancel();
            }
        })
    };

    let result = notifier.notify(url, tx, cancel).await;
    ctrl_c.abort();
    printer.await?;
    result?;
    Ok(())
}
