//! Side-channel probe
//!
//! Resolves the TLS identity of an endpoint exactly the way a relayed client
//! connection would: over a side channel, through an HTTP CONNECT proxy when
//! one applies. Useful for checking proxy settings before deploying a client.

use anyhow::{anyhow, Context as _, Result};
use base64::Engine;
use clap::Parser;
use sidechannel::config::{generate_example_config, Config, LoggingConfig, ProxyMode};
use sidechannel::{Context, SideChannelCredentials, TlsAuthInfo, TlsCredentials, TransportCredentials};
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Side-channel probe - resolve an endpoint's identity over a side channel
#[derive(Parser, Debug)]
#[command(name = "sidechannel-probe")]
#[command(about = "Resolve an endpoint's TLS identity over a side channel")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Endpoint to probe, host:port (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Authority used for certificate verification (defaults to the endpoint)
    #[arg(short, long)]
    authority: Option<String>,

    /// Tunnel through this HTTP proxy instead of the environment's
    #[arg(long, conflicts_with = "direct")]
    proxy: Option<String>,

    /// Ignore proxy settings and dial directly
    #[arg(long)]
    direct: bool,

    /// Give up after this many seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Print the peer certificate chain as PEM
    #[arg(long)]
    pem: bool,

    /// Print an example configuration and exit
    #[arg(long)]
    example_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.example_config {
        print!("{}", toml::to_string_pretty(&generate_example_config())?);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => {
            let endpoint = args
                .endpoint
                .clone()
                .ok_or_else(|| anyhow!("No endpoint given; pass --endpoint or --config"))?;
            let mut config = Config::default();
            config.side_channel.endpoint = endpoint;
            config
        }
    };
    apply_overrides(&mut config, &args);

    init_logging(&config.logging)?;
    debug!("Probe configuration: {:?}", config);

    let mut tls = TlsCredentials::with_webpki_roots()?.with_alpn(
        config
            .side_channel
            .alpn
            .iter()
            .map(|p| p.as_bytes().to_vec())
            .collect(),
    );
    if let Some(name) = &config.side_channel.server_name {
        tls = tls.with_server_name(name.clone());
    }

    let creds = SideChannelCredentials::from_config(&config.side_channel, &config.transport, tls)
        .context("Invalid proxy configuration")?;

    let ctx = Context::with_timeout(Duration::from_secs(args.timeout));
    let canceller = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    // The probe has no relayed connection of its own; an in-memory stream
    // stands in for it and is handed back untouched.
    let (primary, _peer) = tokio::io::duplex(1024);
    let authority = config.side_channel.authority().to_string();
    info!("Probing {} (authority {})", creds.endpoint(), authority);

    let (_conn, auth_info) = creds
        .client_handshake(&ctx, &authority, Box::new(primary))
        .await
        .with_context(|| format!("Failed to resolve identity of {}", creds.endpoint()))?;

    match auth_info.as_any().downcast_ref::<TlsAuthInfo>() {
        Some(tls) => print_tls(tls, args.pem),
        None => println!("{:?}", auth_info),
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(endpoint) = &args.endpoint {
        config.side_channel.endpoint = endpoint.clone();
    }
    if let Some(authority) = &args.authority {
        config.side_channel.authority = Some(authority.clone());
    }
    if let Some(proxy) = &args.proxy {
        config.side_channel.proxy.mode = ProxyMode::Fixed;
        config.side_channel.proxy.url = Some(proxy.clone());
    }
    if args.direct {
        config.side_channel.proxy.mode = ProxyMode::Direct;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&logging.level)
        .with_context(|| format!("Invalid log level {:?}", logging.level))?;

    let writer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(logging.file.is_none())
        .with_writer(writer);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
    Ok(())
}

fn print_tls(tls: &TlsAuthInfo, pem: bool) {
    println!("server name:   {}", tls.server_name);
    println!("protocol:      {}", tls.protocol_version.as_deref().unwrap_or("unknown"));
    println!("cipher suite:  {}", tls.cipher_suite.as_deref().unwrap_or("unknown"));
    if let Some(alpn) = &tls.alpn_protocol {
        println!("alpn:          {}", String::from_utf8_lossy(alpn));
    }
    println!("certificates:  {}", tls.peer_certificates.len());

    if pem {
        let engine = base64::engine::general_purpose::STANDARD;
        for cert in &tls.peer_certificates {
            println!("-----BEGIN CERTIFICATE-----");
            let encoded = engine.encode(cert.as_ref());
            for line in encoded.as_bytes().chunks(64) {
                println!("{}", String::from_utf8_lossy(line));
            }
            println!("-----END CERTIFICATE-----");
        }
    }
}
