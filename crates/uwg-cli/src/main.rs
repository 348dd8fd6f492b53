//! uwg: userspace WireGuard operator tool
//!
//! Generates keys and shows exactly what the backend would hand to the
//! tunnel engine for a given tunnel config.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use uwg_backend::{
    BackendConfig, DEFAULT_CACHE_TTL, DnsResolver, EndpointResolver, Key, ResolveError, ResolvedEndpoints,
    TunnelConfig, effective_mtu, render, resolve_endpoints,
};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "uwg", version, about = "Userspace WireGuard backend tool")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a new private key (base64)
    Genkey,
    /// Print a new preshared key (base64)
    Genpsk,
    /// Print the public key for a private key (argument or stdin)
    Pubkey {
        private_key: Option<String>,
    },
    /// Validate a tunnel config (.toml or .json)
    Check {
        config: PathBuf,
    },
    /// Print the engine protocol text for a tunnel config
    Render {
        config: PathBuf,
        /// Print secret keys instead of hiding them
        #[arg(long)]
        show_keys: bool,
        /// Endpoint cache TTL in seconds
        #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs())]
        cache_secs: u64,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load(path: &Path) -> Result<TunnelConfig> {
    TunnelConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))
}

/// Does any peer endpoint need a DNS lookup?
fn needs_lookup(config: &TunnelConfig) -> bool {
    config.endpoints().any(|ep| ep.literal().is_none())
}

/// Resolver used when every endpoint is a literal
struct LiteralOnly;

#[async_trait::async_trait]
impl EndpointResolver for LiteralOnly {
    async fn resolve(&self, endpoint: &uwg_backend::InetEndpoint) -> Result<std::net::SocketAddr, ResolveError> {
        Err(ResolveError::Resolver(format!("no resolver for {}", endpoint)))
    }
}

async fn resolve(config: &TunnelConfig, cache: Duration) -> Result<ResolvedEndpoints> {
    let resolver: Arc<dyn EndpointResolver> = if needs_lookup(config) {
        Arc::new(DnsResolver::from_system_conf(cache)?)
    } else {
        Arc::new(LiteralOnly)
    };

    let endpoints = resolve_endpoints(config, resolver.as_ref()).await?;
    debug!("Resolved {} endpoints", endpoints.len());
    Ok(endpoints)
}

fn read_key_arg(arg: Option<String>) -> Result<String> {
    if let Some(key) = arg {
        return Ok(key);
    }
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)
        .context("failed to read key from stdin")?;
    if line.trim().is_empty() {
        bail!("no private key given");
    }
    Ok(line)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Genkey => {
            println!("{}", Key::generate_private().to_base64());
        }
        Command::Genpsk => {
            println!("{}", Key::generate_preshared().to_base64());
        }
        Command::Pubkey { private_key } => {
            let encoded = read_key_arg(private_key)?;
            let key = Key::from_base64(&encoded).context("invalid private key")?;
            println!("{}", key.public_key().to_base64());
        }
        Command::Check { config: path } => {
            let config = load(&path)?;
            config.validate()
                .with_context(|| format!("{} is invalid", path.display()))?;

            info!("{} is valid", path.display());
            println!(
                "ok: {} address(es), {} peer(s), mtu {}",
                config.interface.addresses.len(),
                config.peers.len(),
                effective_mtu(&config, BackendConfig::default().default_mtu),
            );
        }
        Command::Render { config: path, show_keys, cache_secs } => {
            let config = load(&path)?;
            let endpoints = resolve(&config, Duration::from_secs(cache_secs)).await?;
            let text = render(&config, &endpoints)?;

            if show_keys {
                print!("{}", text.as_str());
            } else {
                print!("{}", text.redacted());
            }
        }
    }

    Ok(())
}
