//! mvirt-dhcp6 daemon: DHCPv6 responder for unnumbered tap interfaces.

use clap::Parser;
use mvirt_dhcp6::config::{
    self, DEFAULT_DOMAIN_NAME, DEFAULT_HOSTNAME, DEFAULT_LEASE_TIME, DEFAULT_OVERRIDE_FILE_PREFIX,
};
use mvirt_dhcp6::pool::{BufferPool, POOL_SIZE};
use mvirt_dhcp6::{
    BootUrls, ConfigError, Handler, HostnamePolicy, LinkEvent, ListenerConfig, ListenerFactory,
    NetlinkHandle, Registry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mvirt-dhcp6")]
#[command(about = "DHCPv6 responder for unnumbered tap interfaces")]
struct Args {
    /// Serve interfaces whose name matches this regex
    #[arg(long, default_value = "placeholder$")]
    regex: String,

    /// Only lease host routes inside this IPv6 prefix
    #[arg(long)]
    accept_prefix: String,

    /// DNS server to hand out (repeatable)
    #[arg(long = "dns")]
    dns: Vec<String>,

    /// Preferred lifetime in seconds, the valid lifetime is twice this
    #[arg(long, default_value_t = DEFAULT_LEASE_TIME)]
    lease_time: u32,

    /// Static hostname
    #[arg(long, default_value = DEFAULT_HOSTNAME)]
    hostname: String,

    /// Static domain name
    #[arg(long, default_value = DEFAULT_DOMAIN_NAME)]
    domain_name: String,

    /// Derive the hostname from the leased address
    #[arg(long)]
    dynamic_hostname: bool,

    /// Read per-interface hostname overrides
    #[arg(long)]
    hostname_override: bool,

    /// Path prefix of hostname override files, the interface name is appended
    #[arg(long, default_value = DEFAULT_OVERRIDE_FILE_PREFIX)]
    override_file_prefix: PathBuf,

    /// Generic HTTP boot URL
    #[arg(long)]
    http_url: Option<String>,

    /// Boot URL for BIOS / UNDI clients
    #[arg(long)]
    bios_url: Option<String>,

    /// Boot URL for UEFI clients
    #[arg(long)]
    uefi_url: Option<String>,

    /// Boot URL for iPXE clients
    #[arg(long)]
    ipxe_url: Option<String>,

    /// Log level (trace, debug, info, warn, error, none), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// EnvFilter directive for a `--log-level` value.
fn log_directive(level: &str) -> Option<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "fatal" => Some("error"),
        "off" | "none" => Some("off"),
        _ => None,
    }
}

/// Install the tracing subscriber. An invalid level falls back to `info`.
fn init_logging(level: &str) -> Result<(), ConfigError> {
    let directive = log_directive(level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive.unwrap_or("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    directive
        .map(|_| ())
        .ok_or_else(|| ConfigError::InvalidLogLevel(level.to_string()))
}

fn build_config(args: &Args) -> Result<ListenerConfig, ConfigError> {
    let dns = config::parse_dns_servers(&args.dns)?;
    let hostname = HostnamePolicy {
        hostname: args.hostname.clone(),
        domain_name: args.domain_name.clone(),
        dynamic: args.dynamic_hostname,
        override_prefix: args
            .hostname_override
            .then(|| args.override_file_prefix.clone()),
    };
    let boot = BootUrls::new(
        args.http_url.clone(),
        args.bios_url.clone(),
        args.uefi_url.clone(),
        args.ipxe_url.clone(),
    );

    Ok(ListenerConfig::new(&args.regex, &args.accept_prefix)?
        .with_dns(dns)
        .with_lease_time(args.lease_time)?
        .with_hostname(hostname)
        .with_boot_urls(boot))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args.log_level) {
        error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    let config = match build_config(&args) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        pattern = %config.interface_pattern,
        accept_prefix = %config.accept_prefix,
        dns = ?config.dns_servers,
        lease_time = config.lease_time,
        "mvirt-dhcp6 starting"
    );

    let netlink = match NetlinkHandle::new().await {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "Failed to open netlink connection");
            std::process::exit(1);
        }
    };

    // Subscribe before listing links so no change between the two is lost.
    let mut events = match netlink.subscribe_links() {
        Ok(rx) => rx,
        Err(e) => {
            error!(error = %e, "Failed to subscribe to link events");
            std::process::exit(1);
        }
    };

    let links = match netlink.links().await {
        Ok(links) => links,
        Err(e) => {
            error!(error = %e, "Failed to list links");
            std::process::exit(1);
        }
    };

    let handler = Arc::new(Handler::new(Arc::clone(&config), Arc::new(netlink.clone())));
    let factory = ListenerFactory::new(netlink, handler, BufferPool::new(POOL_SIZE));
    let registry = Registry::new(Arc::clone(&config), factory);

    for link in links {
        registry.on_link_event(LinkEvent::Changed(link)).await;
    }
    info!(listeners = registry.len().await, "Existing interfaces processed");

    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => registry.on_link_event(event).await,
                None => {
                    error!("Link event subscription closed");
                    registry.close_all().await;
                    std::process::exit(1);
                }
            },
            _ = sigint.recv() => { info!("Received SIGINT"); break; }
            _ = sigterm.recv() => { info!("Received SIGTERM"); break; }
        }
    }

    info!("Shutting down...");
    registry.close_all().await;
    info!("mvirt-dhcp6 stopped");
}
