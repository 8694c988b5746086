//! LANShare CLI
//!
//! Peer-to-peer chat and file sharing over a WebRTC data channel.

mod config;
mod progress;
mod repl;

use clap::{Args, Parser, Subcommand};
use console::style;
use lanshare_core::{EndpointHandle, TransferError, TransferEvent, spawn_endpoint};
use lanshare_signal::{
    Established, ManualSignaling, NegotiationError, Negotiator, RelayServer, RelayedSignaling,
    Role, SignalingTransport, establish_as_answerer, establish_as_offerer,
};
use lanshare_transport::WebRtcConnector;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::SessionView;
use repl::{HELP, Input};

/// LANShare - chat and share files directly with a peer
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session by creating the offer
    Offer(SessionArgs),

    /// Join a session by answering a peer's offer
    Answer(SessionArgs),

    /// Run a signaling relay
    Relay {
        /// Bind address
        #[arg(short, long)]
        bind: Option<String>,

        /// Maximum concurrent clients
        #[arg(long)]
        max_clients: Option<usize>,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// Exchange descriptions through this relay instead of copy/paste
    #[arg(short, long)]
    relay: Option<String>,

    /// Directory for received files
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::resolve(cli.config.as_deref())?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Offer(args) => {
            args.apply(&mut config);
            config.validate()?;
            run_session(Role::Offerer, &config).await?;
        }
        Commands::Answer(args) => {
            args.apply(&mut config);
            config.validate()?;
            run_session(Role::Answerer, &config).await?;
        }
        Commands::Relay { bind, max_clients } => {
            if let Some(bind) = bind {
                config.signaling.bind = bind;
            }
            if let Some(max_clients) = max_clients {
                config.signaling.max_clients = max_clients;
            }
            config.validate()?;
            run_relay(&config).await?;
        }
    }

    Ok(())
}

impl SessionArgs {
    fn apply(self, config: &mut Config) {
        if let Some(relay) = self.relay {
            config.signaling.relay = Some(relay);
        }
        if let Some(output) = self.output {
            config.receive.output_dir = output;
        }
    }
}

async fn establish<S>(
    role: Role,
    negotiator: &mut Negotiator<WebRtcConnector>,
    signaling: &mut S,
) -> Result<Established<WebRtcConnector>, NegotiationError>
where
    S: SignalingTransport + ?Sized,
{
    match role {
        Role::Offerer => establish_as_offerer(negotiator, signaling).await,
        Role::Answerer => establish_as_answerer(negotiator, signaling).await,
    }
}

/// Negotiate a channel, then run the interactive session over it
async fn run_session(role: Role, config: &Config) -> anyhow::Result<()> {
    let connector = WebRtcConnector::new(config.negotiation.ice_servers.clone());
    let mut negotiator = Negotiator::new(connector, config.negotiation_config());
    let mut stdin = BufReader::new(tokio::io::stdin());

    let (channel, events) = match &config.signaling.relay {
        Some(relay) => {
            println!("Connecting to relay {relay}...");
            let mut signaling = RelayedSignaling::connect(relay).await?;
            establish(role, &mut negotiator, &mut signaling).await?
        }
        None => {
            let mut signaling = ManualSignaling::new(stdin, tokio::io::stdout());
            let established = establish(role, &mut negotiator, &mut signaling).await;
            stdin = signaling.into_inner().0;
            established?
        }
    };

    info!(role = %role, "Data channel open");
    println!(
        "{} Type a message and press Enter to chat. /help lists commands.",
        style("Connected.").green().bold()
    );

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (handle, task) = spawn_endpoint(channel, events, config.transfer_config(), event_tx);

    let mut view = SessionView::new(config.receive.output_dir.clone());
    interact(&handle, &mut view, event_rx, stdin).await?;

    drop(handle);
    if let Err(e) = task.await {
        debug!(error = %e, "Endpoint task ended abnormally");
    }
    Ok(())
}

async fn interact<R>(
    handle: &EndpointHandle,
    view: &mut SessionView,
    mut events: mpsc::UnboundedReceiver<TransferEvent>,
    stdin: R,
) -> anyhow::Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if !view.handle(event).await {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                }
            }
            line = lines.next_line() => {
                let input = match line? {
                    Some(line) => Input::parse(&line),
                    None => Input::Quit,
                };
                if !execute(handle, view, input).await {
                    break;
                }
            }
        }
    }

    // Closing: render whatever the endpoint reports until it stops
    while let Some(event) = events.recv().await {
        if !view.handle(event).await {
            break;
        }
    }
    Ok(())
}

/// Run one operator input. Returns `false` once the session is closing.
async fn execute(handle: &EndpointHandle, view: &SessionView, input: Input) -> bool {
    let result = match input {
        Input::Empty => Ok(()),
        Input::Help => {
            view.println(HELP);
            Ok(())
        }
        Input::Invalid(msg) => {
            view.println(format!("{} {msg}", style("?").yellow()));
            Ok(())
        }
        Input::Chat(text) => handle.send_chat(text).await,
        Input::Send(path) => handle.send_file(&path).await.map(|id| {
            debug!(id = %id, path = %path.display(), "Send started");
        }),
        Input::CancelSend => match handle.cancel_send().await {
            Err(TransferError::NoActiveTransfer) => {
                view.println("No file is being sent");
                Ok(())
            }
            other => other,
        },
        Input::CancelReceive => match handle.cancel_receive().await {
            Err(TransferError::NoActiveTransfer) => {
                view.println("No file is being received");
                Ok(())
            }
            other => other,
        },
        Input::Quit => {
            if let Err(e) = handle.close().await {
                debug!(error = %e, "Close failed");
            }
            return false;
        }
    };

    match result {
        Ok(()) => true,
        Err(TransferError::EndpointClosed) => false,
        Err(e) => {
            view.println(format!("{} {e}", style("error:").red().bold()));
            true
        }
    }
}

/// Run the signaling relay until interrupted
async fn run_relay(config: &Config) -> anyhow::Result<()> {
    let addr = config.parse_relay_bind()?;
    let server = RelayServer::bind_with_config(addr, config.relay_server_config()).await?;

    println!(
        "{} relay listening on {} (max {} clients)",
        style("LANShare").bold(),
        server.local_addr()?,
        config.signaling.max_clients
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Relay shutting down");
        }
    }
    Ok(())
}
