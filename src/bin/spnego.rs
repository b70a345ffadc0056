//! SPNEGO over HTTP CLI binary.
//!
//! # Commands
//!
//! - `server` - Start the negotiate-protected HTTP service
//! - `client` - Call a service endpoint with a negotiated context
//! - `keygen` - Write a fresh realm secret

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use spnego::{
    config::{Config, EngineSection},
    server::{create_router, AppState},
    CredentialUsage, NegotiateClient, RealmSecret, SecurityEngine, VERSION,
};

#[derive(Parser)]
#[command(name = "spnego")]
#[command(version = VERSION)]
#[command(about = "SPNEGO (Negotiate) authentication over HTTP", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/spnego/config.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the negotiate-protected HTTP service
    Server {
        /// Listen address (host:port)
        #[arg(short, long)]
        addr: Option<SocketAddr>,

        /// Bind to all interfaces
        #[arg(long)]
        bind_all: bool,

        /// Principal to accept contexts as
        #[arg(short, long)]
        service_name: Option<String>,

        /// File holding the base64 realm secret
        #[arg(long)]
        realm_secret_file: Option<PathBuf>,
    },

    /// Call a service endpoint
    Client {
        /// Endpoint to exercise
        #[arg(value_enum)]
        action: ClientAction,

        /// Service base URL (e.g. http://localhost:8080)
        url: String,

        /// Message for unwrap and verify-mic
        #[arg(short, long, default_value = "test message in body")]
        message: String,

        /// Initiating principal
        #[arg(short, long)]
        principal: Option<String>,

        /// Target service name (default: HTTP@<host>)
        #[arg(short, long)]
        service_name: Option<String>,

        /// Require the server to authenticate itself
        #[arg(long)]
        mutual: bool,

        /// File holding the base64 realm secret
        #[arg(long)]
        realm_secret_file: Option<PathBuf>,
    },

    /// Generate a realm secret
    Keygen {
        /// Output file (default: ~/.config/spnego/realm.key)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ClientAction {
    /// GET /access/
    Access,
    /// POST /unwrap/ with a wrapped message
    Unwrap,
    /// POST /verify_mic/ with a signed message
    VerifyMic,
    /// GET /inquire_context/
    Inquire,
}

impl ClientAction {
    fn path(self) -> &'static str {
        match self {
            ClientAction::Access => "/access/",
            ClientAction::Unwrap => "/unwrap/",
            ClientAction::VerifyMic => "/verify_mic/",
            ClientAction::Inquire => "/inquire_context/",
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Server {
            addr,
            bind_all,
            service_name,
            realm_secret_file,
        } => cmd_server(config, addr, bind_all, service_name, realm_secret_file),

        Commands::Client {
            action,
            url,
            message,
            principal,
            service_name,
            mutual,
            realm_secret_file,
        } => cmd_client(
            config,
            action,
            &url,
            &message,
            principal,
            service_name,
            mutual,
            realm_secret_file,
        ),

        Commands::Keygen { output, force } => cmd_keygen(output, force),
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_server(
    mut config: Config,
    addr: Option<SocketAddr>,
    bind_all: bool,
    service_name: Option<String>,
    realm_secret_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(name) = service_name {
        config.server.service_name = Some(name);
    }
    if let Some(path) = realm_secret_file {
        config.engine.realm_secret_file = Some(path);
    }

    let mut server_config = config.server.to_server_config()?;
    if let Some(addr) = addr {
        server_config = server_config.with_addr(addr);
    }
    if bind_all {
        server_config = server_config.bind_all();
    }

    let engine = Arc::new(
        config
            .engine
            .build_engine(server_config.service_name.as_deref())
            .context("failed to set up security engine")?,
    );

    // Create state and router
    let state = Arc::new(AppState::new(server_config.clone(), engine)?);
    let app = create_router(state);

    tracing::info!("Starting SPNEGO service on {}", server_config.addr);
    tracing::info!(
        "Accepting as {}",
        server_config
            .service_name
            .as_deref()
            .unwrap_or(&config.engine.principal)
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(server_config.addr).await?;
        axum::serve(listener, app).await?;
        Ok::<_, anyhow::Error>(())
    })
}

#[allow(clippy::too_many_arguments)]
fn cmd_client(
    mut config: Config,
    action: ClientAction,
    url: &str,
    message: &str,
    principal: Option<String>,
    service_name: Option<String>,
    mutual: bool,
    realm_secret_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(path) = realm_secret_file {
        config.engine.realm_secret_file = Some(path);
    }
    let principal = principal.or(config.client.principal.clone());
    let service_name = service_name.or(config.client.service_name.clone());

    let engine = Arc::new(config.engine.build_engine(principal.as_deref())?);
    let credential = engine.acquire_credential(None, CredentialUsage::Initiate)?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.client.timeout_secs))
        .build()?;
    let mut client = NegotiateClient::new(engine, Arc::new(credential)).with_http_client(http);
    if let Some(name) = service_name {
        client = client.with_service_name(name);
    }
    if mutual || config.client.mutual {
        client = client.with_mutual();
    }

    let endpoint = format!("{}{}", url.trim_end_matches('/'), action.path());

    let runtime = tokio::runtime::Runtime::new()?;
    let output = runtime.block_on(async {
        match action {
            ClientAction::Access => {
                let response = client.get(&endpoint).await?.error_for_status()?;
                Ok::<_, anyhow::Error>(response.body)
            },
            ClientAction::Inquire => {
                let response = client.get(&endpoint).await?.error_for_status()?;
                let attrs: serde_json::Value = serde_json::from_str(&response.body)?;
                Ok(serde_json::to_string_pretty(&attrs)?)
            },
            ClientAction::Unwrap => {
                let reply = client.post_wrapped(&endpoint, message.as_bytes()).await?;
                let reply = String::from_utf8(reply).context("reply is not UTF-8")?;
                if reply != message {
                    anyhow::bail!("got {reply:?}, expected {message:?}");
                }
                Ok(reply)
            },
            ClientAction::VerifyMic => {
                let response = client
                    .post_signed(&endpoint, message.as_bytes())
                    .await?
                    .error_for_status()?;
                Ok(response.body)
            },
        }
    })?;

    println!("{}", output.trim_end());
    Ok(())
}

fn cmd_keygen(output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = output
        .or_else(EngineSection::default_secret_path)
        .context("no output path and no config directory")?;

    if path.exists() && !force {
        anyhow::bail!("{} exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let secret = RealmSecret::generate();
    write_secret(&path, &secret)?;

    eprintln!("Wrote realm secret to {}", path.display());
    Ok(())
}

fn write_secret(path: &Path, secret: &RealmSecret) -> anyhow::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{}", secret.to_base64())?;
    Ok(())
}
