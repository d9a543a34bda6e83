mod fallback;
mod ingress;

use clap::Parser;
use relayd_core::{Dialer, Listener, PeerAddr, Registry, Resolver, TunnelIn};
use relayd_proto::{Config, ConfigHandle, RunMode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "relayd", about = "Dual-role tunnelling proxy — direct, client, and server modes in one binary")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/relayd/config.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_handle = ConfigHandle::load(&cli.config)?;
    let config = config_handle.current();
    let log_level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    tracing::info!(mode = ?config.run_mode, "relayd starting");

    // Keep the watcher alive for the process lifetime; dropping it stops reloads.
    let _watcher = config_handle.watch().ok();

    let resolver = Arc::new(Resolver::new(&config.dns.name_servers, &config.dns.hosts)?);
    let dialer = Arc::new(Dialer::new(Arc::clone(&resolver)));
    let registry = Registry::new();

    let (tunnel_in, _workers) = relayd_core::dispatcher::start(Arc::clone(&config_handle), dialer, registry);

    let listener = match config.run_mode {
        RunMode::Direct | RunMode::Client => bind_ingress(&config, tunnel_in).await?,
        RunMode::Server => bind_tunnel(&config, resolver, tunnel_in).await?,
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining listener");
    if let Err(err) = listener.shutdown(Duration::from_secs(10)).await {
        tracing::warn!(%err, "listener did not drain cleanly");
    }

    tracing::info!("relayd stopped");
    Ok(())
}

fn inbound_addr(config: &Config) -> std::io::Result<SocketAddr> {
    format!("{}:{}", config.inbound.host, config.inbound.port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad [inbound] address: {e}")))
}

async fn bind_ingress(config: &Config, tunnel_in: TunnelIn) -> std::io::Result<Listener> {
    let addr = inbound_addr(config)?;
    let sessions = ingress::mixed::session_limiter();
    Listener::bind(addr, move |conn, peer: PeerAddr| {
        let tunnel_in = tunnel_in.clone();
        let sessions = Arc::clone(&sessions);
        async move {
            ingress::mixed::handle(conn, peer, tunnel_in, sessions).await;
        }
    })
    .await
}

async fn bind_tunnel(config: &Arc<Config>, resolver: Arc<Resolver>, tunnel_in: TunnelIn) -> std::io::Result<Listener> {
    let addr = inbound_addr(config)?;
    let codec =
        relayd_core::codec_for_server(&config.inbound).expect("server mode requires an [inbound] token");

    let acceptor = if config.inbound.tls.enable {
        let cert = config
            .inbound
            .tls
            .cert
            .as_deref()
            .expect("tls.enable requires tls.cert");
        let key = config
            .inbound
            .tls
            .key
            .as_deref()
            .expect("tls.enable requires tls.key");
        Some(relayd_core::tls::server_acceptor(cert, key).map_err(std::io::Error::other)?)
    } else {
        None
    };

    Listener::bind(addr, move |conn, peer: PeerAddr| {
        let tunnel_in = tunnel_in.clone();
        let codec = codec.clone();
        let resolver = Arc::clone(&resolver);
        let acceptor = acceptor.clone();
        async move {
            match acceptor {
                Some(acceptor) => match acceptor.accept(conn).await {
                    Ok(tls_conn) => ingress::tunnel::handle(tls_conn, peer, codec, resolver, tunnel_in).await,
                    Err(err) => tracing::debug!(peer = %peer.source, %err, "tls handshake failed"),
                },
                None => ingress::tunnel::handle(conn, peer, codec, resolver, tunnel_in).await,
            }
        }
    })
    .await
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {},
        _ = sigterm.recv() => {},
    }
}
